use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect, TransactionTrait,
};
use sea_orm::ActiveValue::Set;
use sea_orm::sea_query::LockType;
use uuid::Uuid;

use crate::{
    audit,
    dto::{
        admin::{
            DashboardStats, InventoryAdjustRequest, LowStockQuery, OrderStatusCount,
            UpdateOrderStatusRequest, UpdateUserRoleRequest,
        },
        orders::{OrderList, OrderWithItems},
        products::ProductList,
    },
    entity::{
        affiliate_commissions::Entity as Commissions,
        orders::{ActiveModel as OrderActive, Column as OrderCol, Entity as Orders},
        products::{ActiveModel as ProductActive, Column as ProdCol, Entity as Products},
        users::{ActiveModel as UserActive, Entity as Users},
    },
    error::{AppError, AppResult},
    middleware::auth::{ADMIN_ROLE, AuthUser, CUSTOMER_ROLE, ensure_admin},
    models::{Order, Product, User},
    response::{ApiResponse, Meta},
    routes::params::{OrderListQuery, SortOrder},
    services::{commission_service, order_service::with_items},
    state::AppState,
};

pub const ORDER_STATUSES: [&str; 7] = [
    "pending",
    "paid",
    "on_hold",
    "processing",
    "shipped",
    "delivered",
    "cancelled",
];
pub const DEFAULT_LOW_STOCK_THRESHOLD: i32 = 5;

pub async fn list_all_orders(
    state: &AppState,
    user: &AuthUser,
    query: OrderListQuery,
) -> AppResult<ApiResponse<OrderList>> {
    ensure_admin(user)?;
    let (page, limit, offset) = query.pagination.normalize();

    let mut condition = Condition::all();
    if let Some(status) = query.status.as_ref().filter(|s| !s.is_empty()) {
        condition = condition.add(OrderCol::Status.eq(status.clone()));
    }

    let mut finder = Orders::find().filter(condition);
    finder = match query.sort_order.unwrap_or(SortOrder::Desc) {
        SortOrder::Asc => finder.order_by_asc(OrderCol::CreatedAt),
        SortOrder::Desc => finder.order_by_desc(OrderCol::CreatedAt),
    };

    let total = finder.clone().count(&state.orm).await? as i64;

    let orders = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(Order::from)
        .collect();

    let meta = Meta::new(page, limit, total);
    Ok(ApiResponse::success("Orders", OrderList { items: orders }, Some(meta)))
}

pub async fn get_order_admin(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<OrderWithItems>> {
    ensure_admin(user)?;
    let order = Orders::find_by_id(id)
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound)?;

    let data = with_items(&state.orm, order).await?;
    Ok(ApiResponse::success("Order found", data, Some(Meta::empty())))
}

pub async fn update_order_status(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateOrderStatusRequest,
) -> AppResult<ApiResponse<Order>> {
    ensure_admin(user)?;
    validate_order_status(&payload.status)?;

    let existing = Orders::find_by_id(id)
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound)?;

    let mut active: OrderActive = existing.into();
    active.status = Set(payload.status);
    if let Some(tracking) = payload.tracking_number.map(|t| t.trim().to_string()) {
        active.tracking_number = Set(Some(tracking).filter(|t| !t.is_empty()));
    }
    active.updated_at = Set(Utc::now().into());
    let order = active.update(&state.orm).await?;

    audit::record(
        &state.pool,
        Some(user.user_id),
        "order_status_update",
        "orders",
        serde_json::json!({
            "order_id": order.id,
            "status": order.status,
            "tracking_number": order.tracking_number,
        }),
    )
    .await;

    Ok(ApiResponse::success(
        "Order updated",
        Order::from(order),
        Some(Meta::empty()),
    ))
}

pub async fn list_low_stock(
    state: &AppState,
    user: &AuthUser,
    query: LowStockQuery,
) -> AppResult<ApiResponse<ProductList>> {
    ensure_admin(user)?;
    let threshold = query.threshold.unwrap_or(DEFAULT_LOW_STOCK_THRESHOLD);
    let (page, limit, offset) = query.pagination.normalize();

    let finder = Products::find()
        .filter(ProdCol::Stock.lte(threshold))
        .order_by_asc(ProdCol::Stock)
        .order_by_desc(ProdCol::CreatedAt);

    let total = finder.clone().count(&state.orm).await? as i64;

    let items = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(Product::from)
        .collect();

    let meta = Meta::new(page, limit, total);
    Ok(ApiResponse::success("Low stock", ProductList { items }, Some(meta)))
}

pub async fn adjust_inventory(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: InventoryAdjustRequest,
) -> AppResult<ApiResponse<Product>> {
    ensure_admin(user)?;
    if payload.delta == 0 {
        return Err(AppError::BadRequest("delta must not be 0".into()));
    }

    let txn = state.orm.begin().await?;
    let product = Products::find_by_id(id)
        .lock(LockType::Update)
        .one(&txn)
        .await?
        .ok_or(AppError::NotFound)?;

    let new_stock = product.stock + payload.delta;
    if new_stock < 0 {
        return Err(AppError::BadRequest("stock cannot be negative".into()));
    }

    let mut active: ProductActive = product.into();
    active.stock = Set(new_stock);
    let updated = active.update(&txn).await?;

    txn.commit().await?;

    audit::record(
        &state.pool,
        Some(user.user_id),
        "inventory_adjust",
        "products",
        serde_json::json!({ "product_id": updated.id, "delta": payload.delta }),
    )
    .await;

    Ok(ApiResponse::success(
        "Inventory updated",
        Product::from(updated),
        Some(Meta::empty()),
    ))
}

pub fn average_order_value(revenue: i64, paid_orders: i64) -> i64 {
    if paid_orders <= 0 {
        return 0;
    }
    (revenue + paid_orders / 2) / paid_orders
}

pub async fn dashboard(
    state: &AppState,
    user: &AuthUser,
) -> AppResult<ApiResponse<DashboardStats>> {
    ensure_admin(user)?;
    let pool = &state.pool;

    let (revenue, paid_orders): (i64, i64) = sqlx::query_as(
        r#"
        SELECT COALESCE(SUM(total_amount), 0)::BIGINT, COUNT(*)
        FROM orders
        WHERE payment_status = 'paid'
        "#,
    )
    .fetch_one(pool)
    .await?;

    let orders_by_status: Vec<(String, i64)> =
        sqlx::query_as("SELECT status, COUNT(*) FROM orders GROUP BY status ORDER BY status")
            .fetch_all(pool)
            .await?;

    let (customers,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users WHERE role = $1")
        .bind(CUSTOMER_ROLE)
        .fetch_one(pool)
        .await?;

    let (guest_orders,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM orders WHERE user_id IS NULL")
            .fetch_one(pool)
            .await?;

    let (low_stock_products,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM products WHERE stock <= $1")
            .bind(DEFAULT_LOW_STOCK_THRESHOLD)
            .fetch_one(pool)
            .await?;

    let (active_discount_codes,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM discount_codes WHERE is_active")
            .fetch_one(pool)
            .await?;

    let commissions = Commissions::find().all(&state.orm).await?;

    let stats = DashboardStats {
        revenue,
        paid_orders,
        average_order_value: average_order_value(revenue, paid_orders),
        orders_by_status: orders_by_status
            .into_iter()
            .map(|(status, count)| OrderStatusCount { status, count })
            .collect(),
        customers,
        guest_orders,
        low_stock_products,
        active_discount_codes,
        commissions: commission_service::summarize(&commissions),
    };

    Ok(ApiResponse::success("Dashboard", stats, Some(Meta::empty())))
}

/// An admin may not strip their own admin role.
pub fn check_role_change(actor: &AuthUser, target: Uuid, role: &str) -> AppResult<()> {
    if role != ADMIN_ROLE && role != CUSTOMER_ROLE {
        return Err(AppError::BadRequest(format!("Unknown role {role}")));
    }
    if actor.user_id == target && role != ADMIN_ROLE {
        return Err(AppError::BusinessRule(
            "You cannot remove your own admin role".into(),
        ));
    }
    Ok(())
}

pub async fn update_user_role(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateUserRoleRequest,
) -> AppResult<ApiResponse<User>> {
    ensure_admin(user)?;
    let role = payload.role.trim().to_lowercase();
    check_role_change(user, id, &role)?;

    let existing = Users::find_by_id(id)
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound)?;
    let previous = existing.role.clone();

    let mut active: UserActive = existing.into();
    active.role = Set(role);
    let updated = active.update(&state.orm).await?;

    audit::record(
        &state.pool,
        Some(user.user_id),
        "user_role_update",
        "users",
        serde_json::json!({ "user_id": updated.id, "from": previous, "to": updated.role }),
    )
    .await;

    Ok(ApiResponse::success(
        "Role updated",
        User::from(updated),
        Some(Meta::empty()),
    ))
}

fn validate_order_status(status: &str) -> Result<(), AppError> {
    if ORDER_STATUSES.contains(&status) {
        Ok(())
    } else {
        Err(AppError::BadRequest("Invalid order status".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn admin() -> AuthUser {
        AuthUser {
            user_id: Uuid::new_v4(),
            email: "admin@example.com".into(),
            role: ADMIN_ROLE.into(),
        }
    }

    #[test]
    fn admins_cannot_demote_themselves() {
        let me = admin();
        assert!(matches!(
            check_role_change(&me, me.user_id, CUSTOMER_ROLE),
            Err(AppError::BusinessRule(_))
        ));
        assert!(check_role_change(&me, me.user_id, ADMIN_ROLE).is_ok());
        assert!(check_role_change(&me, Uuid::new_v4(), CUSTOMER_ROLE).is_ok());
    }

    #[test]
    fn unknown_roles_are_rejected() {
        let me = admin();
        assert!(matches!(
            check_role_change(&me, Uuid::new_v4(), "superuser"),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn average_handles_no_orders() {
        assert_eq!(average_order_value(0, 0), 0);
        assert_eq!(average_order_value(10_000, 3), 3_333);
        assert_eq!(average_order_value(10_001, 2), 5_001);
    }

    #[test]
    fn order_status_must_be_known() {
        assert!(validate_order_status("shipped").is_ok());
        assert!(validate_order_status("lost").is_err());
    }
}
