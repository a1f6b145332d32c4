use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, patch, post},
};
use uuid::Uuid;

use crate::{
    dto::{
        admin::{
            DashboardStats, InventoryAdjustRequest, LowStockQuery, UpdateOrderStatusRequest,
            UpdateUserRoleRequest,
        },
        affiliates::{
            AffiliateSummaryList, CommissionList, CommissionListQuery,
            UpdateCommissionStatusRequest,
        },
        chat::{AssistantRequest, AssistantResponse},
        discounts::{CreateDiscountRequest, DiscountCodeList, UpdateDiscountRequest},
        orders::{OrderList, OrderWithItems},
        products::ProductList,
    },
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_admin},
    models::{AffiliateCommission, DiscountCode, Order, Product, User},
    response::ApiResponse,
    routes::params::OrderListQuery,
    services::{admin_service, chat_service, commission_service, discount_service},
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/dashboard", get(dashboard))
        .route("/orders", get(list_all_orders))
        .route("/orders/{id}", get(get_order_admin))
        .route("/orders/{id}/status", patch(update_order_status))
        .route("/inventory/low-stock", get(list_low_stock))
        .route("/inventory/{id}", patch(adjust_inventory))
        .route("/discounts", get(list_discounts).post(create_discount))
        .route(
            "/discounts/{id}",
            patch(update_discount).delete(deactivate_discount),
        )
        .route("/affiliates", get(list_affiliates))
        .route("/commissions", get(list_commissions))
        .route("/commissions/{id}/status", patch(update_commission_status))
        .route("/users/{id}/role", patch(update_user_role))
        .route("/assistant", post(assistant))
}

#[utoipa::path(
    get,
    path = "/api/admin/dashboard",
    responses(
        (status = 200, description = "Store totals", body = ApiResponse<DashboardStats>)
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn dashboard(
    State(state): State<AppState>,
    user: AuthUser,
) -> AppResult<Json<ApiResponse<DashboardStats>>> {
    let resp = admin_service::dashboard(&state, &user).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    get,
    path = "/api/admin/orders",
    params(
        ("page" = Option<i64>, Query, description = "Page number, default 1"),
        ("per_page" = Option<i64>, Query, description = "Items per page, default 20"),
        ("status" = Option<String>, Query, description = "Filter by status"),
        ("sort_order" = Option<String>, Query, description = "Sort order: asc, desc")
    ),
    responses(
        (status = 200, description = "List all orders", body = ApiResponse<OrderList>)
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn list_all_orders(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<OrderListQuery>,
) -> AppResult<Json<ApiResponse<OrderList>>> {
    let resp = admin_service::list_all_orders(&state, &user, query).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    get,
    path = "/api/admin/orders/{id}",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Order detail", body = ApiResponse<OrderWithItems>),
        (status = 404, description = "Order not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn get_order_admin(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<OrderWithItems>>> {
    let resp = admin_service::get_order_admin(&state, &user, id).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    patch,
    path = "/api/admin/orders/{id}/status",
    params(("id" = Uuid, Path, description = "Order ID")),
    request_body = UpdateOrderStatusRequest,
    responses(
        (status = 200, description = "Order status updated", body = ApiResponse<Order>),
        (status = 400, description = "Invalid status")
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn update_order_status(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateOrderStatusRequest>,
) -> AppResult<Json<ApiResponse<Order>>> {
    let resp = admin_service::update_order_status(&state, &user, id, payload).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    get,
    path = "/api/admin/inventory/low-stock",
    params(
        ("threshold" = Option<i32>, Query, description = "Stock at or below this value, default 5"),
        ("page" = Option<i64>, Query, description = "Page number, default 1"),
        ("per_page" = Option<i64>, Query, description = "Items per page, default 20")
    ),
    responses(
        (status = 200, description = "Low stock products", body = ApiResponse<ProductList>)
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn list_low_stock(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<LowStockQuery>,
) -> AppResult<Json<ApiResponse<ProductList>>> {
    let resp = admin_service::list_low_stock(&state, &user, query).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    patch,
    path = "/api/admin/inventory/{id}",
    params(("id" = Uuid, Path, description = "Product ID")),
    request_body = InventoryAdjustRequest,
    responses(
        (status = 200, description = "Stock adjusted", body = ApiResponse<Product>),
        (status = 400, description = "Adjustment would make stock negative")
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn adjust_inventory(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<InventoryAdjustRequest>,
) -> AppResult<Json<ApiResponse<Product>>> {
    let resp = admin_service::adjust_inventory(&state, &user, id, payload).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    get,
    path = "/api/admin/discounts",
    responses(
        (status = 200, description = "All discount codes", body = ApiResponse<DiscountCodeList>)
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn list_discounts(
    State(state): State<AppState>,
    user: AuthUser,
) -> AppResult<Json<ApiResponse<DiscountCodeList>>> {
    let resp = discount_service::list_codes(&state, &user).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/api/admin/discounts",
    request_body = CreateDiscountRequest,
    responses(
        (status = 201, description = "Discount code created", body = ApiResponse<DiscountCode>),
        (status = 409, description = "Code already exists")
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn create_discount(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<CreateDiscountRequest>,
) -> AppResult<(StatusCode, Json<ApiResponse<DiscountCode>>)> {
    let resp = discount_service::create_code(&state, &user, payload).await?;
    Ok((StatusCode::CREATED, Json(resp)))
}

#[utoipa::path(
    patch,
    path = "/api/admin/discounts/{id}",
    params(("id" = Uuid, Path, description = "Discount code ID")),
    request_body = UpdateDiscountRequest,
    responses(
        (status = 200, description = "Discount code updated", body = ApiResponse<DiscountCode>),
        (status = 404, description = "Discount code not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn update_discount(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateDiscountRequest>,
) -> AppResult<Json<ApiResponse<DiscountCode>>> {
    let resp = discount_service::update_code(&state, &user, id, payload).await?;
    Ok(Json(resp))
}

/// Codes referenced by orders are never removed, only switched off.
#[utoipa::path(
    delete,
    path = "/api/admin/discounts/{id}",
    params(("id" = Uuid, Path, description = "Discount code ID")),
    responses(
        (status = 200, description = "Discount code deactivated", body = ApiResponse<DiscountCode>),
        (status = 404, description = "Discount code not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn deactivate_discount(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<DiscountCode>>> {
    let resp = discount_service::deactivate_code(&state, &user, id).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    get,
    path = "/api/admin/affiliates",
    responses(
        (status = 200, description = "Affiliate codes with commission totals", body = ApiResponse<AffiliateSummaryList>)
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn list_affiliates(
    State(state): State<AppState>,
    user: AuthUser,
) -> AppResult<Json<ApiResponse<AffiliateSummaryList>>> {
    let resp = commission_service::list_affiliates(&state, &user).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    get,
    path = "/api/admin/commissions",
    params(
        ("page" = Option<i64>, Query, description = "Page number, default 1"),
        ("per_page" = Option<i64>, Query, description = "Items per page, default 20"),
        ("status" = Option<String>, Query, description = "pending|approved|paid|cancelled"),
        ("discount_code_id" = Option<Uuid>, Query, description = "Only commissions for this code")
    ),
    responses(
        (status = 200, description = "Commission records", body = ApiResponse<CommissionList>)
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn list_commissions(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<CommissionListQuery>,
) -> AppResult<Json<ApiResponse<CommissionList>>> {
    let resp = commission_service::list_commissions(&state, &user, query).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    patch,
    path = "/api/admin/commissions/{id}/status",
    params(("id" = Uuid, Path, description = "Commission ID")),
    request_body = UpdateCommissionStatusRequest,
    responses(
        (status = 200, description = "Commission moved to the new status", body = ApiResponse<AffiliateCommission>),
        (status = 409, description = "Status changed concurrently"),
        (status = 422, description = "Transition not allowed")
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn update_commission_status(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateCommissionStatusRequest>,
) -> AppResult<Json<ApiResponse<AffiliateCommission>>> {
    let resp = commission_service::update_status(&state, &user, id, payload.status).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    patch,
    path = "/api/admin/users/{id}/role",
    params(("id" = Uuid, Path, description = "User ID")),
    request_body = UpdateUserRoleRequest,
    responses(
        (status = 200, description = "Role updated", body = ApiResponse<User>),
        (status = 422, description = "Cannot remove own admin role")
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn update_user_role(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateUserRoleRequest>,
) -> AppResult<Json<ApiResponse<User>>> {
    let resp = admin_service::update_user_role(&state, &user, id, payload).await?;
    Ok(Json(resp))
}

/// Back-office assistant: free chat with store context, or product copy
/// autofill. Limited per admin account.
#[utoipa::path(
    post,
    path = "/api/admin/assistant",
    request_body = AssistantRequest,
    responses(
        (status = 200, description = "Assistant result", body = ApiResponse<AssistantResponse>),
        (status = 429, description = "Too many requests"),
        (status = 503, description = "Assistant unavailable")
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn assistant(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<AssistantRequest>,
) -> AppResult<(HeaderMap, Json<ApiResponse<AssistantResponse>>)> {
    ensure_admin(&user)?;

    let decision = state.admin_chat_limiter.check(&user.user_id.to_string());
    if !decision.allowed {
        tracing::warn!(user_id = %user.user_id, "admin assistant rate limited");
        return Err(AppError::RateLimited(decision));
    }

    let resp = chat_service::admin_assistant(&state, &user, payload).await?;
    Ok((decision.headers(), Json(resp)))
}
