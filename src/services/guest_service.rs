//! Turning a guest checkout into a customer account.

use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter};
use sea_orm::sea_query::{Expr, Func};
use uuid::Uuid;

use crate::{
    audit,
    dto::auth::{ConvertGuestRequest, ConvertGuestResponse},
    entity::orders::{Column as OrderCol, Entity as Orders},
    error::{AppError, AppResult},
    models::User,
    response::{ApiResponse, Meta},
    services::auth_service::{
        ACCOUNT_EXISTS, create_account, find_by_email, issue_token, normalize_email,
        validate_credentials,
    },
    state::AppState,
};

/// Name and phone from a guest order's shipping snapshot, only if that order
/// was placed with `email`.
async fn profile_from_order<C: ConnectionTrait>(
    conn: &C,
    order_number: &str,
    email: &str,
) -> AppResult<(Option<String>, Option<String>)> {
    let order = Orders::find()
        .filter(OrderCol::OrderNumber.eq(order_number.trim()))
        .filter(OrderCol::UserId.is_null())
        .filter(Expr::expr(Func::lower(Expr::col(OrderCol::GuestEmail))).eq(email))
        .one(conn)
        .await?;
    Ok(match order {
        Some(order) => (Some(order.shipping_name), order.shipping_phone),
        None => (None, None),
    })
}

/// Re-point every guest order placed with `email` to `user_id`.
pub async fn link_guest_orders<C: ConnectionTrait>(
    conn: &C,
    email: &str,
    user_id: Uuid,
) -> AppResult<u64> {
    let result = Orders::update_many()
        .col_expr(OrderCol::UserId, Expr::value(user_id))
        .col_expr(OrderCol::UpdatedAt, Expr::value(chrono::Utc::now()))
        .filter(OrderCol::UserId.is_null())
        .filter(Expr::expr(Func::lower(Expr::col(OrderCol::GuestEmail))).eq(email))
        .exec(conn)
        .await?;
    Ok(result.rows_affected)
}

pub async fn convert_guest_to_account(
    state: &AppState,
    payload: ConvertGuestRequest,
) -> AppResult<ApiResponse<ConvertGuestResponse>> {
    let email = normalize_email(&payload.email);
    if find_by_email(&state.orm, &email).await?.is_some() {
        return Err(AppError::Conflict(ACCOUNT_EXISTS.into()));
    }
    validate_credentials(&email, &payload.password)?;

    let (full_name, phone) = match payload.order_number.as_deref().filter(|n| !n.trim().is_empty()) {
        Some(number) => profile_from_order(&state.orm, number, &email).await?,
        None => (None, None),
    };

    let user = create_account(&state.orm, &email, &payload.password, full_name, phone).await?;

    // The account exists now; a failed link leaves orders reachable by guest
    // lookup and must not fail the sign-up.
    let linked_orders = match link_guest_orders(&state.orm, &email, user.id).await {
        Ok(count) => count,
        Err(err) => {
            tracing::warn!(error = %err, user_id = %user.id, "linking guest orders failed");
            0
        }
    };

    let token = issue_token(user.id, &user.email, &user.role)?;

    audit::record(
        &state.pool,
        Some(user.id),
        "guest_convert",
        "users",
        serde_json::json!({ "user_id": user.id, "linked_orders": linked_orders }),
    )
    .await;

    tracing::info!(user_id = %user.id, linked_orders, "guest converted to account");

    Ok(ApiResponse::success(
        "Account created",
        ConvertGuestResponse {
            user: User::from(user),
            linked_orders,
            token,
        },
        Some(Meta::empty()),
    ))
}
