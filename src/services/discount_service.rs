//! Discount code validation, pricing and atomic redemption.

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, EntityTrait, QueryFilter,
    QueryOrder, Set,
};
use sea_orm::ActiveValue::NotSet;
use sea_orm::sea_query::{Expr, Func};
use thiserror::Error;
use uuid::Uuid;

use crate::{
    audit,
    dto::discounts::{
        AppliedDiscount, CreateDiscountRequest, DiscountCodeList, UpdateDiscountRequest,
        ValidateDiscountResponse,
    },
    entity::discount_codes::{
        ActiveModel as DiscountActive, Column as DiscountCol, Entity as DiscountCodes,
        Model as DiscountModel,
    },
    error::{AppError, AppResult, conflict_on_unique},
    middleware::auth::{AuthUser, ensure_admin},
    models::{DiscountCode, DiscountKind},
    response::{ApiResponse, Meta},
    state::AppState,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiscountError {
    #[error("Invalid discount code")]
    Invalid,

    #[error("This discount code has expired")]
    Expired,

    #[error("This discount code has reached its usage limit")]
    UsageLimitReached,

    #[error("Minimum order of {} required for this discount code", format_dollars(*.minimum))]
    MinimumOrder { minimum: i64 },
}

impl From<DiscountError> for AppError {
    fn from(err: DiscountError) -> Self {
        match err {
            DiscountError::Invalid => AppError::BadRequest(err.to_string()),
            _ => AppError::BusinessRule(err.to_string()),
        }
    }
}

pub fn format_dollars(cents: i64) -> String {
    format!("${}.{:02}", cents / 100, (cents % 100).abs())
}

pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

/// Business rules for applying `code` to an order of `order_total` cents.
pub fn check_eligibility(
    code: &DiscountModel,
    order_total: i64,
    now: DateTime<Utc>,
) -> Result<(), DiscountError> {
    if !code.is_active {
        return Err(DiscountError::Invalid);
    }
    if let Some(expires_at) = code.expires_at {
        if expires_at.with_timezone(&Utc) <= now {
            return Err(DiscountError::Expired);
        }
    }
    if let Some(max_uses) = code.max_uses {
        if code.current_uses >= max_uses {
            return Err(DiscountError::UsageLimitReached);
        }
    }
    if order_total < code.min_order_amount {
        return Err(DiscountError::MinimumOrder {
            minimum: code.min_order_amount,
        });
    }
    Ok(())
}

/// Cents taken off `order_total`. Never negative and never more than the order.
pub fn calculate_discount(code: &DiscountModel, order_total: i64) -> i64 {
    if order_total <= 0 {
        return 0;
    }
    let kind = code
        .discount_kind
        .parse::<DiscountKind>()
        .unwrap_or(DiscountKind::Fixed);
    let raw = match kind {
        DiscountKind::Percentage => {
            Decimal::from(order_total) * code.discount_value / Decimal::ONE_HUNDRED
        }
        DiscountKind::Fixed => code.discount_value,
    };
    let cents = to_cents(raw);
    cents.clamp(0, order_total)
}

pub(crate) fn to_cents(value: Decimal) -> i64 {
    let rounded = value.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
    i64::try_from(rounded).unwrap_or(if rounded.is_sign_negative() { 0 } else { i64::MAX })
}

pub fn applied_discount(code: &DiscountModel, order_total: i64) -> AppliedDiscount {
    AppliedDiscount {
        code_id: code.id,
        code: code.code.clone(),
        kind: code
            .discount_kind
            .parse::<DiscountKind>()
            .unwrap_or(DiscountKind::Fixed),
        value: code.discount_value,
        amount: calculate_discount(code, order_total),
    }
}

pub async fn find_by_code<C: ConnectionTrait>(
    conn: &C,
    code: &str,
) -> AppResult<Option<DiscountModel>> {
    let normalized = normalize_code(code);
    if normalized.is_empty() {
        return Ok(None);
    }
    let found = DiscountCodes::find()
        .filter(Expr::expr(Func::upper(Expr::col(DiscountCol::Code))).eq(normalized))
        .one(conn)
        .await?;
    Ok(found)
}

/// Look up an active code and check it against `order_total`. Usage is not
/// consumed here; see [`redeem`].
pub async fn lookup_valid<C: ConnectionTrait>(
    conn: &C,
    code: &str,
    order_total: i64,
) -> AppResult<Result<DiscountModel, DiscountError>> {
    let found = find_by_code(conn, code)
        .await?
        .filter(|model| model.is_active);
    let Some(model) = found else {
        return Ok(Err(DiscountError::Invalid));
    };
    Ok(check_eligibility(&model, order_total, Utc::now()).map(|()| model))
}

pub async fn validate(
    state: &AppState,
    code: &str,
    order_total: i64,
) -> AppResult<ApiResponse<ValidateDiscountResponse>> {
    if order_total < 0 {
        return Err(AppError::BadRequest("order_total must not be negative".into()));
    }
    let data = match lookup_valid(&state.orm, code, order_total).await? {
        Ok(model) => ValidateDiscountResponse {
            valid: true,
            discount: Some(applied_discount(&model, order_total)),
            error: None,
        },
        Err(err) => ValidateDiscountResponse {
            valid: false,
            discount: None,
            error: Some(err.to_string()),
        },
    };
    Ok(ApiResponse::success("OK", data, Some(Meta::empty())))
}

/// Consume one use of `code_id` for an order of `order_total` cents.
///
/// The eligibility rules and the increment are a single conditional UPDATE, so
/// two checkouts racing for the last use cannot both succeed. Run it inside the
/// order transaction so a failed capture gives the use back.
pub async fn redeem<C: ConnectionTrait>(
    conn: &C,
    code_id: Uuid,
    order_total: i64,
) -> AppResult<DiscountModel> {
    let now = Utc::now();
    let result = DiscountCodes::update_many()
        .col_expr(
            DiscountCol::CurrentUses,
            Expr::col(DiscountCol::CurrentUses).add(1),
        )
        .col_expr(DiscountCol::UpdatedAt, Expr::value(now))
        .filter(DiscountCol::Id.eq(code_id))
        .filter(DiscountCol::IsActive.eq(true))
        .filter(DiscountCol::MinOrderAmount.lte(order_total))
        .filter(
            Condition::any()
                .add(DiscountCol::ExpiresAt.is_null())
                .add(DiscountCol::ExpiresAt.gt(now)),
        )
        .filter(
            Condition::any()
                .add(DiscountCol::MaxUses.is_null())
                .add(Expr::col(DiscountCol::CurrentUses).lt(Expr::col(DiscountCol::MaxUses))),
        )
        .exec(conn)
        .await?;

    let current = DiscountCodes::find_by_id(code_id).one(conn).await?;
    let Some(current) = current else {
        return Err(DiscountError::Invalid.into());
    };

    if result.rows_affected == 1 {
        return Ok(current);
    }

    // Nothing matched: report which rule the code now fails.
    match check_eligibility(&current, order_total, now) {
        Err(err) => Err(err.into()),
        Ok(()) => Err(DiscountError::UsageLimitReached.into()),
    }
}

pub async fn list_codes(
    state: &AppState,
    user: &AuthUser,
) -> AppResult<ApiResponse<DiscountCodeList>> {
    ensure_admin(user)?;
    let items: Vec<DiscountCode> = DiscountCodes::find()
        .order_by_desc(DiscountCol::CreatedAt)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(DiscountCode::from)
        .collect();
    let meta = Meta::whole(items.len());
    Ok(ApiResponse::success(
        "Discount codes",
        DiscountCodeList { items },
        Some(meta),
    ))
}

fn validate_affiliate_fields(
    is_affiliate: bool,
    affiliate_name: Option<&str>,
    commission_percent: Option<Decimal>,
) -> AppResult<()> {
    if !is_affiliate {
        return Ok(());
    }
    if affiliate_name.map(str::trim).filter(|n| !n.is_empty()).is_none() {
        return Err(AppError::BadRequest(
            "affiliate codes require an affiliate name".into(),
        ));
    }
    match commission_percent {
        Some(pct) if pct > Decimal::ZERO && pct <= Decimal::ONE_HUNDRED => Ok(()),
        Some(_) => Err(AppError::BadRequest(
            "commission_percent must be between 0 and 100".into(),
        )),
        None => Err(AppError::BadRequest(
            "affiliate codes require a commission percent".into(),
        )),
    }
}

fn validate_value(kind: DiscountKind, value: Decimal) -> AppResult<()> {
    if value < Decimal::ZERO {
        return Err(AppError::BadRequest("discount_value must not be negative".into()));
    }
    if kind == DiscountKind::Percentage && value > Decimal::ONE_HUNDRED {
        return Err(AppError::BadRequest(
            "percentage discounts cannot exceed 100".into(),
        ));
    }
    Ok(())
}

pub async fn create_code(
    state: &AppState,
    user: &AuthUser,
    payload: CreateDiscountRequest,
) -> AppResult<ApiResponse<DiscountCode>> {
    ensure_admin(user)?;
    let code = normalize_code(&payload.code);
    if code.is_empty() {
        return Err(AppError::BadRequest("code is required".into()));
    }
    validate_value(payload.discount_kind, payload.discount_value)?;
    validate_affiliate_fields(
        payload.is_affiliate,
        payload.affiliate_name.as_deref(),
        payload.commission_percent,
    )?;
    if payload.max_uses.is_some_and(|max| max < 0) || payload.min_order_amount < 0 {
        return Err(AppError::BadRequest(
            "max_uses and min_order_amount must not be negative".into(),
        ));
    }

    let exists = format!("Discount code {code} already exists");
    if find_by_code(&state.orm, &code).await?.is_some() {
        return Err(AppError::Conflict(exists));
    }

    let (affiliate_name, affiliate_email, commission_percent) = if payload.is_affiliate {
        (
            payload.affiliate_name,
            payload.affiliate_email.map(|e| e.trim().to_lowercase()),
            payload.commission_percent,
        )
    } else {
        (None, None, None)
    };

    let now = Utc::now();
    let model = DiscountActive {
        id: Set(Uuid::new_v4()),
        code: Set(code),
        discount_value: Set(payload.discount_value),
        discount_kind: Set(payload.discount_kind.as_str().to_string()),
        is_affiliate: Set(payload.is_affiliate),
        affiliate_name: Set(affiliate_name),
        affiliate_email: Set(affiliate_email),
        commission_percent: Set(commission_percent),
        min_order_amount: Set(payload.min_order_amount),
        max_uses: Set(payload.max_uses),
        current_uses: Set(0),
        is_active: Set(true),
        expires_at: Set(payload.expires_at.map(Into::into)),
        created_at: Set(now.into()),
        updated_at: NotSet,
    }
    .insert(&state.orm)
    .await
    .map_err(|err| conflict_on_unique(err, exists))?;

    audit::record(
        &state.pool,
        Some(user.user_id),
        "discount_create",
        "discount_codes",
        serde_json::json!({ "discount_code_id": model.id, "code": model.code }),
    )
    .await;

    Ok(ApiResponse::success(
        "Discount code created",
        DiscountCode::from(model),
        Some(Meta::empty()),
    ))
}

pub async fn update_code(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateDiscountRequest,
) -> AppResult<ApiResponse<DiscountCode>> {
    ensure_admin(user)?;
    let existing = DiscountCodes::find_by_id(id)
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound)?;

    let kind = payload
        .discount_kind
        .unwrap_or_else(|| existing.discount_kind.parse().unwrap_or(DiscountKind::Fixed));
    let value = payload.discount_value.unwrap_or(existing.discount_value);
    validate_value(kind, value)?;

    let is_affiliate = payload.is_affiliate.unwrap_or(existing.is_affiliate);
    let affiliate_name = payload
        .affiliate_name
        .clone()
        .or_else(|| existing.affiliate_name.clone());
    let commission_percent = payload.commission_percent.or(existing.commission_percent);
    validate_affiliate_fields(is_affiliate, affiliate_name.as_deref(), commission_percent)?;

    let affiliate_email = payload
        .affiliate_email
        .map(|e| e.trim().to_lowercase())
        .or_else(|| existing.affiliate_email.clone());

    let mut active: DiscountActive = existing.into();
    active.discount_kind = Set(kind.as_str().to_string());
    active.discount_value = Set(value);
    active.is_affiliate = Set(is_affiliate);
    if is_affiliate {
        active.affiliate_name = Set(affiliate_name);
        active.affiliate_email = Set(affiliate_email);
        // Existing commission records keep their snapshot rate.
        active.commission_percent = Set(commission_percent);
    } else {
        active.affiliate_name = Set(None);
        active.affiliate_email = Set(None);
        active.commission_percent = Set(None);
    }
    if let Some(min) = payload.min_order_amount {
        active.min_order_amount = Set(min.max(0));
    }
    if let Some(max) = payload.max_uses {
        active.max_uses = Set(Some(max.max(0)));
    }
    if let Some(expires_at) = payload.expires_at {
        active.expires_at = Set(Some(expires_at.into()));
    }
    if let Some(is_active) = payload.is_active {
        active.is_active = Set(is_active);
    }
    active.updated_at = Set(Utc::now().into());
    let model = active.update(&state.orm).await?;

    audit::record(
        &state.pool,
        Some(user.user_id),
        "discount_update",
        "discount_codes",
        serde_json::json!({ "discount_code_id": model.id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Discount code updated",
        DiscountCode::from(model),
        Some(Meta::empty()),
    ))
}

/// Codes are never deleted: orders and commissions keep pointing at them.
pub async fn deactivate_code(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<DiscountCode>> {
    ensure_admin(user)?;
    let existing = DiscountCodes::find_by_id(id)
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound)?;

    let mut active: DiscountActive = existing.into();
    active.is_active = Set(false);
    active.updated_at = Set(Utc::now().into());
    let model = active.update(&state.orm).await?;

    audit::record(
        &state.pool,
        Some(user.user_id),
        "discount_deactivate",
        "discount_codes",
        serde_json::json!({ "discount_code_id": model.id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Discount code deactivated",
        DiscountCode::from(model),
        Some(Meta::empty()),
    ))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::Duration;

    pub(crate) fn code(kind: DiscountKind, value: i64) -> DiscountModel {
        let now = Utc::now();
        DiscountModel {
            id: Uuid::new_v4(),
            code: "SAVE10".into(),
            discount_value: Decimal::from(value),
            discount_kind: kind.as_str().into(),
            is_affiliate: false,
            affiliate_name: None,
            affiliate_email: None,
            commission_percent: None,
            min_order_amount: 0,
            max_uses: None,
            current_uses: 0,
            is_active: true,
            expires_at: None,
            created_at: now.into(),
            updated_at: now.into(),
        }
    }

    #[test]
    fn normalizes_whitespace_and_case() {
        assert_eq!(normalize_code("  save10 \n"), "SAVE10");
    }

    #[test]
    fn fixed_discount_never_exceeds_order() {
        let fifty = code(DiscountKind::Fixed, 5_000);
        assert_eq!(calculate_discount(&fifty, 3_000), 3_000);
        assert_eq!(calculate_discount(&fifty, 8_000), 5_000);
        assert_eq!(calculate_discount(&fifty, 0), 0);
    }

    #[test]
    fn percentage_discount_rounds_to_cent() {
        let mut pct = code(DiscountKind::Percentage, 0);
        pct.discount_value = Decimal::new(125, 1); // 12.5%
        assert_eq!(calculate_discount(&pct, 1_001), 125);
        assert_eq!(calculate_discount(&pct, 10_000), 1_250);
    }

    #[test]
    fn hundred_percent_is_whole_order() {
        let all = code(DiscountKind::Percentage, 100);
        assert_eq!(calculate_discount(&all, 4_999), 4_999);
    }

    #[test]
    fn inactive_code_is_invalid() {
        let mut c = code(DiscountKind::Fixed, 500);
        c.is_active = false;
        assert_eq!(
            check_eligibility(&c, 10_000, Utc::now()),
            Err(DiscountError::Invalid)
        );
    }

    #[test]
    fn expired_code_is_rejected() {
        let mut c = code(DiscountKind::Fixed, 500);
        let now = Utc::now();
        c.expires_at = Some((now - Duration::minutes(1)).into());
        assert_eq!(check_eligibility(&c, 10_000, now), Err(DiscountError::Expired));

        c.expires_at = Some((now + Duration::days(1)).into());
        assert_eq!(check_eligibility(&c, 10_000, now), Ok(()));
    }

    #[test]
    fn usage_cap_blocks_the_next_use() {
        let mut c = code(DiscountKind::Fixed, 500);
        c.max_uses = Some(3);
        for used in 0..3 {
            c.current_uses = used;
            assert_eq!(check_eligibility(&c, 10_000, Utc::now()), Ok(()));
        }
        c.current_uses = 3;
        let err = check_eligibility(&c, 10_000, Utc::now()).expect_err("capped");
        assert_eq!(err, DiscountError::UsageLimitReached);
        assert!(err.to_string().contains("usage limit"));
    }

    #[test]
    fn minimum_order_names_threshold() {
        let mut c = code(DiscountKind::Percentage, 10);
        c.min_order_amount = 7_550;

        assert_eq!(check_eligibility(&c, 7_550, Utc::now()), Ok(()));
        assert_eq!(check_eligibility(&c, 12_000, Utc::now()), Ok(()));

        let err = check_eligibility(&c, 7_549, Utc::now()).expect_err("below minimum");
        assert_eq!(err, DiscountError::MinimumOrder { minimum: 7_550 });
        assert_eq!(
            err.to_string(),
            "Minimum order of $75.50 required for this discount code"
        );
    }

    #[test]
    fn rules_are_checked_in_order() {
        let mut c = code(DiscountKind::Fixed, 500);
        let now = Utc::now();
        c.expires_at = Some((now - Duration::days(1)).into());
        c.max_uses = Some(1);
        c.current_uses = 1;
        c.min_order_amount = 100_000;
        assert_eq!(check_eligibility(&c, 10, now), Err(DiscountError::Expired));
    }

    #[test]
    fn affiliate_fields_are_required_together() {
        assert!(validate_affiliate_fields(false, None, None).is_ok());
        assert!(validate_affiliate_fields(true, Some("Dr. Lee"), Some(Decimal::from(10))).is_ok());
        assert!(validate_affiliate_fields(true, None, Some(Decimal::from(10))).is_err());
        assert!(validate_affiliate_fields(true, Some("Dr. Lee"), None).is_err());
        assert!(validate_affiliate_fields(true, Some("  "), Some(Decimal::from(10))).is_err());
        assert!(
            validate_affiliate_fields(true, Some("Dr. Lee"), Some(Decimal::from(101))).is_err()
        );
    }

    #[test]
    fn business_errors_map_to_unprocessable() {
        let err: AppError = DiscountError::Expired.into();
        assert!(matches!(err, AppError::BusinessRule(_)));
        let err: AppError = DiscountError::Invalid.into();
        assert!(matches!(err, AppError::BadRequest(_)));
    }
}
