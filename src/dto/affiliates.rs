use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    models::{AffiliateCommission, CommissionStatus},
    routes::params::Pagination,
};

/// Commission amounts in cents grouped by status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct CommissionSummary {
    pub pending: i64,
    pub approved: i64,
    pub paid: i64,
    pub cancelled: i64,
    /// Pending + approved + paid.
    pub total_earned: i64,
    pub order_count: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AffiliateSummary {
    pub discount_code_id: Uuid,
    pub code: String,
    pub affiliate_name: Option<String>,
    pub affiliate_email: Option<String>,
    pub commission_percent: Option<Decimal>,
    pub uses: i32,
    pub totals: CommissionSummary,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AffiliateSummaryList {
    pub items: Vec<AffiliateSummary>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CommissionList {
    pub items: Vec<AffiliateCommission>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateCommissionStatusRequest {
    pub status: CommissionStatus,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CommissionListQuery {
    #[serde(flatten)]
    pub pagination: Pagination,
    pub status: Option<CommissionStatus>,
    pub discount_code_id: Option<Uuid>,
}

/// What an affiliate sees about their own codes.
#[derive(Debug, Serialize, ToSchema)]
pub struct AffiliatePortal {
    pub codes: Vec<AffiliateSummary>,
    pub commissions: Vec<AffiliateCommission>,
    pub totals: CommissionSummary,
}
