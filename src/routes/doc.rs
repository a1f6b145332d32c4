use utoipa::{
    Modify, OpenApi,
    openapi::{
        self,
        OpenApi as OpenApiSpec,
        security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    },
};
use utoipa_scalar::{Scalar, Servable};

use crate::{
    dto::{
        admin::{
            DashboardStats, InventoryAdjustRequest, LowStockQuery, OrderStatusCount,
            UpdateOrderStatusRequest, UpdateUserRoleRequest,
        },
        affiliates::{
            AffiliatePortal, AffiliateSummary, AffiliateSummaryList, CommissionList,
            CommissionSummary, UpdateCommissionStatusRequest,
        },
        auth::{ConvertGuestRequest, ConvertGuestResponse, LoginRequest, LoginResponse, RegisterRequest},
        cart::{AddToCartRequest, CartItemDto, CartLine, CartList, MergeCartRequest, UpdateCartQuantityRequest},
        chat::{AssistantRequest, AssistantResponse, ChatReply, ProductAutofill, PublicChatRequest},
        discounts::{
            AppliedDiscount, CreateDiscountRequest, DiscountCodeList, UpdateDiscountRequest,
            ValidateDiscountRequest, ValidateDiscountResponse,
        },
        orders::{
            CaptureRequest, OrderList, OrderWithItems, PayPalOrderResponse, Quote, QuoteLine,
            QuoteRequest, ShippingDetails,
        },
        products::{CreateProductRequest, ProductList, UpdateProductRequest},
        wishlist::{
            AddWishlistRequest, MergeWishlistRequest, ToggleWishlistResponse, WishlistEntry,
            WishlistLine, WishlistProductList,
        },
    },
    llm::{Message, Role},
    models::{
        AffiliateCommission, CommissionStatus, DiscountCode, DiscountKind, Order, OrderItem,
        Product, User,
    },
    response::{ApiResponse, Meta},
    routes::{
        admin, affiliate, auth, cart, chat, checkout, discounts, health, orders, params,
        products as product_routes, wishlist,
    },
};

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health_check,
        auth::login,
        auth::register,
        auth::convert_guest,
        product_routes::list_products,
        product_routes::create_product,
        product_routes::get_product,
        product_routes::update_product,
        product_routes::delete_product,
        cart::cart_list,
        cart::add_to_cart,
        cart::update_quantity,
        cart::remove_from_cart,
        cart::clear_cart,
        cart::merge_cart,
        wishlist::list_wishlist,
        wishlist::add_item,
        wishlist::toggle_item,
        wishlist::remove_item,
        wishlist::clear_wishlist,
        wishlist::merge_wishlist,
        orders::list_order,
        orders::get_order,
        orders::lookup_guest_order,
        checkout::quote,
        checkout::create_paypal_order,
        checkout::capture,
        discounts::validate_code,
        chat::public_chat,
        affiliate::portal,
        admin::dashboard,
        admin::list_all_orders,
        admin::get_order_admin,
        admin::update_order_status,
        admin::list_low_stock,
        admin::adjust_inventory,
        admin::list_discounts,
        admin::create_discount,
        admin::update_discount,
        admin::deactivate_discount,
        admin::list_affiliates,
        admin::list_commissions,
        admin::update_commission_status,
        admin::update_user_role,
        admin::assistant
    ),
    components(
        schemas(
            User,
            Product,
            Order,
            OrderItem,
            DiscountCode,
            DiscountKind,
            AffiliateCommission,
            CommissionStatus,
            RegisterRequest,
            LoginRequest,
            LoginResponse,
            ConvertGuestRequest,
            ConvertGuestResponse,
            CreateProductRequest,
            UpdateProductRequest,
            ProductList,
            AddToCartRequest,
            UpdateCartQuantityRequest,
            MergeCartRequest,
            CartLine,
            CartItemDto,
            CartList,
            AddWishlistRequest,
            MergeWishlistRequest,
            WishlistLine,
            WishlistEntry,
            WishlistProductList,
            ToggleWishlistResponse,
            ShippingDetails,
            QuoteRequest,
            QuoteLine,
            Quote,
            PayPalOrderResponse,
            CaptureRequest,
            OrderList,
            OrderWithItems,
            ValidateDiscountRequest,
            ValidateDiscountResponse,
            AppliedDiscount,
            CreateDiscountRequest,
            UpdateDiscountRequest,
            DiscountCodeList,
            CommissionSummary,
            AffiliateSummary,
            AffiliateSummaryList,
            CommissionList,
            UpdateCommissionStatusRequest,
            AffiliatePortal,
            UpdateOrderStatusRequest,
            InventoryAdjustRequest,
            LowStockQuery,
            UpdateUserRoleRequest,
            OrderStatusCount,
            DashboardStats,
            Message,
            Role,
            PublicChatRequest,
            ChatReply,
            AssistantRequest,
            AssistantResponse,
            ProductAutofill,
            params::Pagination,
            params::ProductQuery,
            params::OrderListQuery,
            Meta,
            ApiResponse<Product>,
            ApiResponse<ProductList>,
            ApiResponse<CartList>,
            ApiResponse<WishlistProductList>,
            ApiResponse<OrderWithItems>,
            ApiResponse<OrderList>,
            ApiResponse<Quote>,
            ApiResponse<DiscountCode>,
            ApiResponse<AffiliatePortal>
        )
    ),
    security(
        ("bearer_auth" = [])
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Health check endpoint"),
        (name = "Auth", description = "Accounts, sign-in and guest conversion"),
        (name = "Products", description = "Peptide catalog"),
        (name = "Cart", description = "Signed-in cart"),
        (name = "Wishlist", description = "Signed-in wishlist"),
        (name = "Orders", description = "Order history and guest lookup"),
        (name = "Checkout", description = "Quotes and PayPal payment"),
        (name = "Discounts", description = "Discount code validation"),
        (name = "Chat", description = "Storefront assistant"),
        (name = "Affiliate", description = "Affiliate portal"),
        (name = "Admin", description = "Back-office endpoints"),
    )
)]
pub struct ApiDoc;

pub fn scalar_docs() -> Scalar<OpenApiSpec> {
    Scalar::with_url("/docs", ApiDoc::openapi())
}
