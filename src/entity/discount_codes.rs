use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "discount_codes")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub code: String,
    /// Percent off for `percentage` codes, cents off for `fixed` codes.
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
    pub expires_at: Option<DateTimeWithTimeZone>,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::affiliate_commissions::Entity")]
    AffiliateCommissions,
    #[sea_orm(has_many = "super::orders::Entity")]
    Orders,
}

impl Related<super::affiliate_commissions::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::AffiliateCommissions.def()
    }
}

impl Related<super::orders::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Orders.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
