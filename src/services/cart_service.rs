use std::collections::HashSet;

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use crate::{
    audit,
    db::DbPool,
    dto::cart::{AddToCartRequest, CartItemDto, CartLine, CartList},
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::Product,
    response::{ApiResponse, Meta},
};

#[derive(FromRow)]
struct CartWithProductRow {
    cart_id: Uuid,
    quantity: i32,
    product_id: Uuid,
    name: String,
    description: Option<String>,
    price: i64,
    stock: i32,
    purity: Option<String>,
    created_at: DateTime<Utc>,
}

/// Sum `guest` into `server` per product. Server order is kept and new
/// products are appended in guest order. Non-positive guest quantities are
/// ignored.
pub fn merge_lines(server: &[CartLine], guest: &[CartLine]) -> Vec<CartLine> {
    let mut merged: Vec<CartLine> = Vec::with_capacity(server.len() + guest.len());
    for line in server.iter().chain(guest.iter()) {
        if line.quantity <= 0 {
            continue;
        }
        match merged.iter_mut().find(|m| m.product_id == line.product_id) {
            Some(existing) => existing.quantity = existing.quantity.saturating_add(line.quantity),
            None => merged.push(*line),
        }
    }
    merged
}

pub async fn load_cart(pool: &DbPool, user_id: Uuid) -> AppResult<CartList> {
    let rows = sqlx::query_as::<_, CartWithProductRow>(
        r#"
        SELECT ci.id AS cart_id, ci.quantity,
               p.id AS product_id, p.name, p.description, p.price, p.stock, p.purity,
               p.created_at
        FROM cart_items ci
        JOIN products p ON p.id = ci.product_id
        WHERE ci.user_id = $1
        ORDER BY ci.created_at ASC, ci.id ASC
        "#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    let items = rows
        .into_iter()
        .map(|row| CartItemDto {
            id: row.cart_id,
            product: Product {
                id: row.product_id,
                name: row.name,
                description: row.description,
                price: row.price,
                stock: row.stock,
                purity: row.purity,
                created_at: row.created_at,
            },
            quantity: row.quantity,
        })
        .collect();

    Ok(CartList { items })
}

fn cart_response(message: &str, cart: CartList) -> ApiResponse<CartList> {
    let meta = Meta::whole(cart.items.len());
    ApiResponse::success(message, cart, Some(meta))
}

pub async fn list_cart(pool: &DbPool, user: &AuthUser) -> AppResult<ApiResponse<CartList>> {
    let cart = load_cart(pool, user.user_id).await?;
    Ok(cart_response("OK", cart))
}

async fn ensure_product(pool: &DbPool, product_id: Uuid) -> AppResult<()> {
    let product_exist: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM products WHERE id = $1")
        .bind(product_id)
        .fetch_optional(pool)
        .await?;
    if product_exist.is_none() {
        return Err(AppError::BadRequest("product not found".to_string()));
    }
    Ok(())
}

/// Adds `quantity` on top of whatever the cart already holds for the product.
pub async fn add_to_cart(
    pool: &DbPool,
    user: &AuthUser,
    payload: AddToCartRequest,
) -> AppResult<ApiResponse<CartList>> {
    if payload.quantity <= 0 {
        return Err(AppError::BadRequest(
            "quantity must be greater than 0".to_string(),
        ));
    }
    ensure_product(pool, payload.product_id).await?;

    sqlx::query(
        r#"
        INSERT INTO cart_items (id, user_id, product_id, quantity)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (user_id, product_id)
        DO UPDATE SET quantity = cart_items.quantity + EXCLUDED.quantity
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(user.user_id)
    .bind(payload.product_id)
    .bind(payload.quantity)
    .execute(pool)
    .await?;

    audit::record(
        pool,
        Some(user.user_id),
        "cart_add",
        "cart_items",
        serde_json::json!({ "product_id": payload.product_id, "quantity": payload.quantity }),
    )
    .await;

    let cart = load_cart(pool, user.user_id).await?;
    Ok(cart_response("Added to cart", cart))
}

/// Sets the line to exactly `quantity`. Zero or less removes it.
pub async fn set_quantity(
    pool: &DbPool,
    user: &AuthUser,
    product_id: Uuid,
    quantity: i32,
) -> AppResult<ApiResponse<CartList>> {
    if quantity <= 0 {
        return remove_from_cart(pool, user, product_id).await;
    }
    ensure_product(pool, product_id).await?;

    sqlx::query(
        r#"
        INSERT INTO cart_items (id, user_id, product_id, quantity)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (user_id, product_id)
        DO UPDATE SET quantity = EXCLUDED.quantity
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(user.user_id)
    .bind(product_id)
    .bind(quantity)
    .execute(pool)
    .await?;

    let cart = load_cart(pool, user.user_id).await?;
    Ok(cart_response("Cart updated", cart))
}

pub async fn remove_from_cart(
    pool: &DbPool,
    user: &AuthUser,
    product_id: Uuid,
) -> AppResult<ApiResponse<CartList>> {
    let result = sqlx::query("DELETE FROM cart_items WHERE product_id = $1 AND user_id = $2")
        .bind(product_id)
        .bind(user.user_id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound);
    }

    audit::record(
        pool,
        Some(user.user_id),
        "cart_remove",
        "cart_items",
        serde_json::json!({ "product_id": product_id }),
    )
    .await;

    let cart = load_cart(pool, user.user_id).await?;
    Ok(cart_response("Removed from cart", cart))
}

pub async fn clear_user_cart(pool: &DbPool, user_id: Uuid) -> AppResult<u64> {
    let result = sqlx::query("DELETE FROM cart_items WHERE user_id = $1")
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

pub async fn clear_cart(pool: &DbPool, user: &AuthUser) -> AppResult<ApiResponse<CartList>> {
    let removed = clear_user_cart(pool, user.user_id).await?;
    audit::record(
        pool,
        Some(user.user_id),
        "cart_clear",
        "cart_items",
        serde_json::json!({ "removed": removed }),
    )
    .await;
    Ok(cart_response("Cart cleared", CartList { items: Vec::new() }))
}

/// Fold a device cart into the account cart. Quantities for the same product
/// are summed; lines for products that no longer exist are dropped.
pub async fn merge_cart(
    pool: &DbPool,
    user: &AuthUser,
    guest: Vec<CartLine>,
) -> AppResult<ApiResponse<CartList>> {
    let guest = merge_lines(&[], &guest);
    if guest.is_empty() {
        return list_cart(pool, user).await;
    }

    let ids: Vec<Uuid> = guest.iter().map(|l| l.product_id).collect();
    let known: Vec<(Uuid,)> = sqlx::query_as("SELECT id FROM products WHERE id = ANY($1)")
        .bind(&ids)
        .fetch_all(pool)
        .await?;
    let known: HashSet<Uuid> = known.into_iter().map(|(id,)| id).collect();

    let mut tx = pool.begin().await?;
    let mut merged = 0usize;
    for line in &guest {
        if !known.contains(&line.product_id) {
            tracing::debug!(product_id = %line.product_id, "dropping unknown product from merged cart");
            continue;
        }
        sqlx::query(
            r#"
            INSERT INTO cart_items (id, user_id, product_id, quantity)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id, product_id)
            DO UPDATE SET quantity = cart_items.quantity + EXCLUDED.quantity
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user.user_id)
        .bind(line.product_id)
        .bind(line.quantity)
        .execute(&mut *tx)
        .await?;
        merged += 1;
    }
    tx.commit().await?;

    audit::record(
        pool,
        Some(user.user_id),
        "cart_merge",
        "cart_items",
        serde_json::json!({ "lines": merged }),
    )
    .await;

    let cart = load_cart(pool, user.user_id).await?;
    Ok(cart_response("Cart merged", cart))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(product_id: Uuid, quantity: i32) -> CartLine {
        CartLine {
            product_id,
            quantity,
        }
    }

    #[test]
    fn merge_sums_shared_products() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let guest = [line(a, 2), line(b, 1)];
        let server = [line(b, 3)];

        let merged = merge_lines(&server, &guest);
        assert_eq!(merged, vec![line(b, 4), line(a, 2)]);
    }

    #[test]
    fn merge_collapses_duplicate_guest_lines() {
        let a = Uuid::new_v4();
        let merged = merge_lines(&[], &[line(a, 1), line(a, 2)]);
        assert_eq!(merged, vec![line(a, 3)]);
    }

    #[test]
    fn merge_ignores_empty_lines() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let merged = merge_lines(&[line(a, 1)], &[line(b, 0), line(a, -4)]);
        assert_eq!(merged, vec![line(a, 1)]);
    }

    #[test]
    fn merge_with_empty_guest_is_server() {
        let a = Uuid::new_v4();
        assert_eq!(merge_lines(&[line(a, 5)], &[]), vec![line(a, 5)]);
    }
}
