//! Affiliate commission ledger: snapshot on paid orders, then a small
//! server-enforced status machine.

use std::collections::HashMap;

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Set,
};
use sea_orm::sea_query::{Expr, Func};
use uuid::Uuid;

use crate::{
    audit,
    dto::affiliates::{
        AffiliatePortal, AffiliateSummary, AffiliateSummaryList, CommissionList,
        CommissionListQuery, CommissionSummary,
    },
    entity::{
        affiliate_commissions::{
            ActiveModel as CommissionActive, Column as CommissionCol, Entity as Commissions,
            Model as CommissionModel,
        },
        discount_codes::{Column as DiscountCol, Entity as DiscountCodes, Model as DiscountModel},
    },
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_admin},
    models::{AffiliateCommission, CommissionStatus},
    response::{ApiResponse, Meta},
    services::discount_service::to_cents,
    state::AppState,
};

/// `order_total × rate / 100`, rounded to the nearest cent.
pub fn commission_amount(order_total: i64, rate: Decimal) -> i64 {
    if order_total <= 0 || rate <= Decimal::ZERO {
        return 0;
    }
    to_cents(Decimal::from(order_total) * rate / Decimal::ONE_HUNDRED)
}

pub fn can_transition(from: CommissionStatus, to: CommissionStatus) -> bool {
    use CommissionStatus::*;
    matches!(
        (from, to),
        (Pending, Approved) | (Approved, Paid) | (Pending, Cancelled) | (Approved, Cancelled)
    )
}

/// Fold commission rows into per-status totals.
pub fn summarize<'a, I>(records: I) -> CommissionSummary
where
    I: IntoIterator<Item = &'a CommissionModel>,
{
    records
        .into_iter()
        .fold(CommissionSummary::default(), |mut acc, record| {
            let amount = record.commission_amount;
            match record.status.parse::<CommissionStatus>() {
                Ok(CommissionStatus::Pending) => acc.pending += amount,
                Ok(CommissionStatus::Approved) => acc.approved += amount,
                Ok(CommissionStatus::Paid) => acc.paid += amount,
                Ok(CommissionStatus::Cancelled) => acc.cancelled += amount,
                Err(err) => {
                    tracing::warn!(commission_id = %record.id, error = %err, "skipping commission with unknown status");
                    return acc;
                }
            }
            acc.order_count += 1;
            acc.total_earned = acc.pending + acc.approved + acc.paid;
            acc
        })
}

/// Create the pending commission for a paid order. `Ok(None)` when the code
/// is not an affiliate code.
pub async fn record_for_order<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
    code: &DiscountModel,
    order_total: i64,
) -> AppResult<Option<CommissionModel>> {
    if !code.is_affiliate {
        return Ok(None);
    }
    let Some(rate) = code.commission_percent else {
        return Ok(None);
    };

    let record = CommissionActive {
        id: Set(Uuid::new_v4()),
        order_id: Set(order_id),
        discount_code_id: Set(code.id),
        order_total: Set(order_total),
        commission_rate: Set(rate),
        commission_amount: Set(commission_amount(order_total, rate)),
        status: Set(CommissionStatus::Pending.as_str().to_string()),
        approved_at: Set(None),
        paid_at: Set(None),
        created_at: Set(Utc::now().into()),
    }
    .insert(conn)
    .await?;

    tracing::info!(
        order_id = %order_id,
        discount_code_id = %code.id,
        amount = record.commission_amount,
        "affiliate commission recorded"
    );
    Ok(Some(record))
}

pub async fn transition<C: ConnectionTrait>(
    conn: &C,
    id: Uuid,
    to: CommissionStatus,
) -> AppResult<CommissionModel> {
    let current = Commissions::find_by_id(id)
        .one(conn)
        .await?
        .ok_or(AppError::NotFound)?;
    let from = current
        .status
        .parse::<CommissionStatus>()
        .map_err(|err| AppError::Internal(anyhow::anyhow!(err)))?;

    if !can_transition(from, to) {
        return Err(AppError::BusinessRule(format!(
            "Commission cannot move from {from} to {to}"
        )));
    }

    let now = Utc::now();
    let mut update = Commissions::update_many()
        .col_expr(CommissionCol::Status, Expr::value(to.as_str()))
        .filter(CommissionCol::Id.eq(id))
        .filter(CommissionCol::Status.eq(from.as_str()));
    match to {
        CommissionStatus::Approved => {
            update = update.col_expr(CommissionCol::ApprovedAt, Expr::value(now));
        }
        CommissionStatus::Paid => {
            update = update.col_expr(CommissionCol::PaidAt, Expr::value(now));
        }
        _ => {}
    }
    let result = update.exec(conn).await?;
    if result.rows_affected == 0 {
        return Err(AppError::Conflict(
            "Commission status changed concurrently, reload and retry".into(),
        ));
    }

    Commissions::find_by_id(id)
        .one(conn)
        .await?
        .ok_or(AppError::NotFound)
}

pub async fn update_status(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    to: CommissionStatus,
) -> AppResult<ApiResponse<AffiliateCommission>> {
    ensure_admin(user)?;
    let updated = transition(&state.orm, id, to).await?;

    audit::record(
        &state.pool,
        Some(user.user_id),
        "commission_status_update",
        "affiliate_commissions",
        serde_json::json!({ "commission_id": id, "status": to.as_str() }),
    )
    .await;

    Ok(ApiResponse::success(
        "Commission updated",
        AffiliateCommission::from(updated),
        Some(Meta::empty()),
    ))
}

pub async fn list_commissions(
    state: &AppState,
    user: &AuthUser,
    query: CommissionListQuery,
) -> AppResult<ApiResponse<CommissionList>> {
    ensure_admin(user)?;
    let (page, limit, offset) = query.pagination.normalize();

    let mut condition = Condition::all();
    if let Some(status) = query.status {
        condition = condition.add(CommissionCol::Status.eq(status.as_str()));
    }
    if let Some(code_id) = query.discount_code_id {
        condition = condition.add(CommissionCol::DiscountCodeId.eq(code_id));
    }

    let finder = Commissions::find()
        .filter(condition)
        .order_by_desc(CommissionCol::CreatedAt);
    let total = finder.clone().count(&state.orm).await? as i64;
    let items = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(AffiliateCommission::from)
        .collect();

    Ok(ApiResponse::success(
        "Commissions",
        CommissionList { items },
        Some(Meta::new(page, limit, total)),
    ))
}

async fn summaries_for_codes<C: ConnectionTrait>(
    conn: &C,
    codes: Vec<DiscountModel>,
) -> AppResult<(Vec<AffiliateSummary>, Vec<CommissionModel>)> {
    let ids: Vec<Uuid> = codes.iter().map(|c| c.id).collect();
    let records = if ids.is_empty() {
        Vec::new()
    } else {
        Commissions::find()
            .filter(CommissionCol::DiscountCodeId.is_in(ids))
            .order_by_desc(CommissionCol::CreatedAt)
            .all(conn)
            .await?
    };

    let mut by_code: HashMap<Uuid, Vec<&CommissionModel>> = HashMap::new();
    for record in &records {
        by_code.entry(record.discount_code_id).or_default().push(record);
    }

    let summaries = codes
        .into_iter()
        .map(|code| {
            let totals = summarize(by_code.get(&code.id).into_iter().flatten().copied());
            AffiliateSummary {
                discount_code_id: code.id,
                code: code.code,
                affiliate_name: code.affiliate_name,
                affiliate_email: code.affiliate_email,
                commission_percent: code.commission_percent,
                uses: code.current_uses,
                totals,
            }
        })
        .collect();
    Ok((summaries, records))
}

pub async fn list_affiliates(
    state: &AppState,
    user: &AuthUser,
) -> AppResult<ApiResponse<AffiliateSummaryList>> {
    ensure_admin(user)?;
    let codes = DiscountCodes::find()
        .filter(DiscountCol::IsAffiliate.eq(true))
        .order_by_asc(DiscountCol::Code)
        .all(&state.orm)
        .await?;
    let (items, _) = summaries_for_codes(&state.orm, codes).await?;
    let meta = Meta::whole(items.len());
    Ok(ApiResponse::success(
        "Affiliates",
        AffiliateSummaryList { items },
        Some(meta),
    ))
}

/// Codes whose affiliate email matches the signed-in user.
pub async fn affiliate_portal(
    state: &AppState,
    user: &AuthUser,
) -> AppResult<ApiResponse<AffiliatePortal>> {
    let email = user.email.trim().to_lowercase();
    let codes = DiscountCodes::find()
        .filter(DiscountCol::IsAffiliate.eq(true))
        .filter(Expr::expr(Func::lower(Expr::col(DiscountCol::AffiliateEmail))).eq(email))
        .order_by_asc(DiscountCol::Code)
        .all(&state.orm)
        .await?;
    if codes.is_empty() {
        return Err(AppError::Forbidden);
    }

    let (codes, records) = summaries_for_codes(&state.orm, codes).await?;
    let totals = summarize(&records);
    let commissions = records.into_iter().map(AffiliateCommission::from).collect();

    Ok(ApiResponse::success(
        "Affiliate portal",
        AffiliatePortal {
            codes,
            commissions,
            totals,
        },
        Some(Meta::empty()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(status: CommissionStatus, amount: i64) -> CommissionModel {
        CommissionModel {
            id: Uuid::new_v4(),
            order_id: Uuid::new_v4(),
            discount_code_id: Uuid::new_v4(),
            order_total: amount * 10,
            commission_rate: Decimal::from(10),
            commission_amount: amount,
            status: status.as_str().into(),
            approved_at: None,
            paid_at: None,
            created_at: Utc::now().into(),
        }
    }

    #[test]
    fn commission_is_rounded_to_cent() {
        assert_eq!(commission_amount(10_000, Decimal::from(10)), 1_000);
        assert_eq!(commission_amount(9_999, Decimal::new(75, 1)), 750); // 749.925
        assert_eq!(commission_amount(0, Decimal::from(10)), 0);
        assert_eq!(commission_amount(5_000, Decimal::ZERO), 0);
    }

    #[test]
    fn only_forward_transitions_are_allowed() {
        use CommissionStatus::*;
        let all = [Pending, Approved, Paid, Cancelled];
        let allowed = [
            (Pending, Approved),
            (Approved, Paid),
            (Pending, Cancelled),
            (Approved, Cancelled),
        ];
        for from in all {
            for to in all {
                assert_eq!(
                    can_transition(from, to),
                    allowed.contains(&(from, to)),
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn summary_groups_by_status() {
        let rows = vec![
            record(CommissionStatus::Pending, 100),
            record(CommissionStatus::Pending, 50),
            record(CommissionStatus::Approved, 200),
            record(CommissionStatus::Paid, 300),
            record(CommissionStatus::Cancelled, 999),
        ];
        let summary = summarize(&rows);
        assert_eq!(
            summary,
            CommissionSummary {
                pending: 150,
                approved: 200,
                paid: 300,
                cancelled: 999,
                total_earned: 650,
                order_count: 5,
            }
        );
    }

    #[test]
    fn empty_summary_is_zero() {
        assert_eq!(summarize(&Vec::new()), CommissionSummary::default());
    }
}
