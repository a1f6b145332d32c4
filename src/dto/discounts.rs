use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::{DiscountCode, DiscountKind};

#[derive(Debug, Deserialize, ToSchema)]
pub struct ValidateDiscountRequest {
    pub code: String,
    /// Order subtotal in cents.
    pub order_total: i64,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AppliedDiscount {
    pub code_id: Uuid,
    pub code: String,
    pub kind: DiscountKind,
    pub value: Decimal,
    /// Amount taken off the order, in cents.
    pub amount: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ValidateDiscountResponse {
    pub valid: bool,
    pub discount: Option<AppliedDiscount>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CreateDiscountRequest {
    pub code: String,
    pub discount_value: Decimal,
    pub discount_kind: DiscountKind,
    #[serde(default)]
    pub is_affiliate: bool,
    pub affiliate_name: Option<String>,
    pub affiliate_email: Option<String>,
    pub commission_percent: Option<Decimal>,
    #[serde(default)]
    pub min_order_amount: i64,
    pub max_uses: Option<i32>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Absent fields are left unchanged. The code string itself is immutable.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct UpdateDiscountRequest {
    pub discount_value: Option<Decimal>,
    pub discount_kind: Option<DiscountKind>,
    pub is_affiliate: Option<bool>,
    pub affiliate_name: Option<String>,
    pub affiliate_email: Option<String>,
    pub commission_percent: Option<Decimal>,
    pub min_order_amount: Option<i64>,
    pub max_uses: Option<i32>,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DiscountCodeList {
    pub items: Vec<DiscountCode>,
}
