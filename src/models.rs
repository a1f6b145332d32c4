use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::entity::{
    affiliate_commissions, discount_codes, order_items, orders, products, users,
};

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub role: String,
    pub full_name: Option<String>,
    pub phone: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    /// Unit price in cents.
    pub price: i64,
    pub stock: i32,
    pub purity: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Order {
    pub id: Uuid,
    pub order_number: String,
    pub user_id: Option<Uuid>,
    pub guest_email: Option<String>,
    pub status: String,
    pub payment_status: String,
    pub subtotal: i64,
    pub discount_amount: i64,
    pub total_amount: i64,
    pub discount_code_id: Option<Uuid>,
    pub shipping_name: String,
    pub shipping_phone: Option<String>,
    pub shipping_address: String,
    pub tracking_number: Option<String>,
    pub capture_id: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub quantity: i32,
    pub price: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DiscountKind {
    Percentage,
    Fixed,
}

impl DiscountKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscountKind::Percentage => "percentage",
            DiscountKind::Fixed => "fixed",
        }
    }
}

impl FromStr for DiscountKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "percentage" => Ok(DiscountKind::Percentage),
            "fixed" => Ok(DiscountKind::Fixed),
            other => Err(format!("unknown discount kind {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DiscountCode {
    pub id: Uuid,
    pub code: String,
    pub discount_value: Decimal,
    pub discount_kind: String,
    pub is_affiliate: bool,
    pub affiliate_name: Option<String>,
    pub affiliate_email: Option<String>,
    pub commission_percent: Option<Decimal>,
    pub min_order_amount: i64,
    pub max_uses: Option<i32>,
    pub current_uses: i32,
    pub is_active: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CommissionStatus {
    Pending,
    Approved,
    Paid,
    Cancelled,
}

impl CommissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommissionStatus::Pending => "pending",
            CommissionStatus::Approved => "approved",
            CommissionStatus::Paid => "paid",
            CommissionStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for CommissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommissionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(CommissionStatus::Pending),
            "approved" => Ok(CommissionStatus::Approved),
            "paid" => Ok(CommissionStatus::Paid),
            "cancelled" => Ok(CommissionStatus::Cancelled),
            other => Err(format!("unknown commission status {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AffiliateCommission {
    pub id: Uuid,
    pub order_id: Uuid,
    pub discount_code_id: Uuid,
    pub order_total: i64,
    pub commission_rate: Decimal,
    pub commission_amount: i64,
    pub status: String,
    pub approved_at: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<users::Model> for User {
    fn from(model: users::Model) -> Self {
        Self {
            id: model.id,
            email: model.email,
            role: model.role,
            full_name: model.full_name,
            phone: model.phone,
            created_at: model.created_at.with_timezone(&Utc),
        }
    }
}

impl From<products::Model> for Product {
    fn from(model: products::Model) -> Self {
        Self {
            id: model.id,
            name: model.name,
            description: model.description,
            price: model.price,
            stock: model.stock,
            purity: model.purity,
            created_at: model.created_at.with_timezone(&Utc),
        }
    }
}

impl From<orders::Model> for Order {
    fn from(model: orders::Model) -> Self {
        Self {
            id: model.id,
            order_number: model.order_number,
            user_id: model.user_id,
            guest_email: model.guest_email,
            status: model.status,
            payment_status: model.payment_status,
            subtotal: model.subtotal,
            discount_amount: model.discount_amount,
            total_amount: model.total_amount,
            discount_code_id: model.discount_code_id,
            shipping_name: model.shipping_name,
            shipping_phone: model.shipping_phone,
            shipping_address: model.shipping_address,
            tracking_number: model.tracking_number,
            capture_id: model.capture_id,
            paid_at: model.paid_at.map(|dt| dt.with_timezone(&Utc)),
            created_at: model.created_at.with_timezone(&Utc),
            updated_at: model.updated_at.with_timezone(&Utc),
        }
    }
}

impl From<order_items::Model> for OrderItem {
    fn from(model: order_items::Model) -> Self {
        Self {
            id: model.id,
            order_id: model.order_id,
            product_id: model.product_id,
            quantity: model.quantity,
            price: model.price,
            created_at: model.created_at.with_timezone(&Utc),
        }
    }
}

impl From<discount_codes::Model> for DiscountCode {
    fn from(model: discount_codes::Model) -> Self {
        Self {
            id: model.id,
            code: model.code,
            discount_value: model.discount_value,
            discount_kind: model.discount_kind,
            is_affiliate: model.is_affiliate,
            affiliate_name: model.affiliate_name,
            affiliate_email: model.affiliate_email,
            commission_percent: model.commission_percent,
            min_order_amount: model.min_order_amount,
            max_uses: model.max_uses,
            current_uses: model.current_uses,
            is_active: model.is_active,
            expires_at: model.expires_at.map(|dt| dt.with_timezone(&Utc)),
            created_at: model.created_at.with_timezone(&Utc),
            updated_at: model.updated_at.with_timezone(&Utc),
        }
    }
}

impl From<affiliate_commissions::Model> for AffiliateCommission {
    fn from(model: affiliate_commissions::Model) -> Self {
        Self {
            id: model.id,
            order_id: model.order_id,
            discount_code_id: model.discount_code_id,
            order_total: model.order_total,
            commission_rate: model.commission_rate,
            commission_amount: model.commission_amount,
            status: model.status,
            approved_at: model.approved_at.map(|dt| dt.with_timezone(&Utc)),
            paid_at: model.paid_at.map(|dt| dt.with_timezone(&Utc)),
            created_at: model.created_at.with_timezone(&Utc),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commission_status_round_trips_through_text() {
        for status in [
            CommissionStatus::Pending,
            CommissionStatus::Approved,
            CommissionStatus::Paid,
            CommissionStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<CommissionStatus>(), Ok(status));
        }
        assert!("refunded".parse::<CommissionStatus>().is_err());
    }

    #[test]
    fn discount_kind_rejects_unknown() {
        assert_eq!("fixed".parse::<DiscountKind>(), Ok(DiscountKind::Fixed));
        assert!("bogo".parse::<DiscountKind>().is_err());
    }
}
