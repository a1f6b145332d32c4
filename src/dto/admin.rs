use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{dto::affiliates::CommissionSummary, routes::params::Pagination};

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateOrderStatusRequest {
    pub status: String,
    pub tracking_number: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LowStockQuery {
    #[serde(flatten)]
    pub pagination: Pagination,
    pub threshold: Option<i32>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct InventoryAdjustRequest {
    pub delta: i32,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateUserRoleRequest {
    pub role: String,
}

#[derive(Debug, Clone, Default, Serialize, ToSchema)]
pub struct OrderStatusCount {
    pub status: String,
    pub count: i64,
}

/// Back-office KPIs. Money in cents.
#[derive(Debug, Clone, Default, Serialize, ToSchema)]
pub struct DashboardStats {
    pub revenue: i64,
    pub paid_orders: i64,
    pub average_order_value: i64,
    pub orders_by_status: Vec<OrderStatusCount>,
    pub customers: i64,
    pub guest_orders: i64,
    pub low_stock_products: i64,
    pub active_discount_codes: i64,
    pub commissions: CommissionSummary,
}
