use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    dto::cart::CartLine,
    models::{Order, OrderItem},
};

#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
pub struct ShippingDetails {
    pub name: String,
    pub phone: Option<String>,
    pub address: String,
}

/// Price a basket. Signed-in buyers are priced from their server cart when
/// `items` is omitted.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct QuoteRequest {
    pub items: Option<Vec<CartLine>>,
    pub discount_code: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct QuoteLine {
    pub product_id: Uuid,
    pub name: String,
    pub unit_price: i64,
    pub quantity: i32,
    pub line_total: i64,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Quote {
    pub lines: Vec<QuoteLine>,
    pub subtotal: i64,
    pub discount_code: Option<String>,
    pub discount_amount: i64,
    pub total: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PayPalOrderResponse {
    pub paypal_order_id: String,
    pub quote: Quote,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CaptureRequest {
    pub paypal_order_id: String,
    pub items: Option<Vec<CartLine>>,
    pub discount_code: Option<String>,
    /// Required for guests, ignored for signed-in buyers.
    pub email: Option<String>,
    pub shipping: ShippingDetails,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct GuestOrderLookupQuery {
    pub order_number: String,
    pub email: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderWithItems {
    pub order: Order,
    pub items: Vec<OrderItem>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderList {
    pub items: Vec<Order>,
}
