use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use crate::{
    audit,
    db::DbPool,
    dto::wishlist::{ToggleWishlistResponse, WishlistEntry, WishlistLine, WishlistProductList},
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::Product,
    response::{ApiResponse, Meta},
};

#[derive(FromRow)]
struct WishlistRow {
    added_at: DateTime<Utc>,
    product_id: Uuid,
    name: String,
    description: Option<String>,
    price: i64,
    stock: i32,
    purity: Option<String>,
    created_at: DateTime<Utc>,
}

/// Union of two wishlists. A product present in both keeps its earliest
/// `added_at`.
pub fn merge_wishlists(server: &[WishlistLine], guest: &[WishlistLine]) -> Vec<WishlistLine> {
    let mut order: Vec<Uuid> = Vec::new();
    let mut earliest: HashMap<Uuid, DateTime<Utc>> = HashMap::new();
    for line in server.iter().chain(guest.iter()) {
        earliest
            .entry(line.product_id)
            .and_modify(|at| *at = (*at).min(line.added_at))
            .or_insert_with(|| {
                order.push(line.product_id);
                line.added_at
            });
    }
    order
        .into_iter()
        .filter_map(|product_id| {
            earliest.get(&product_id).map(|added_at| WishlistLine {
                product_id,
                added_at: *added_at,
            })
        })
        .collect()
}

pub async fn load_wishlist(pool: &DbPool, user_id: Uuid) -> AppResult<WishlistProductList> {
    let rows = sqlx::query_as::<_, WishlistRow>(
        r#"
        SELECT w.added_at,
               p.id AS product_id, p.name, p.description, p.price, p.stock, p.purity,
               p.created_at
        FROM wishlist_items w
        JOIN products p ON p.id = w.product_id
        WHERE w.user_id = $1
        ORDER BY w.added_at DESC
        "#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    let items = rows
        .into_iter()
        .map(|row| WishlistEntry {
            product: Product {
                id: row.product_id,
                name: row.name,
                description: row.description,
                price: row.price,
                stock: row.stock,
                purity: row.purity,
                created_at: row.created_at,
            },
            added_at: row.added_at,
        })
        .collect();
    Ok(WishlistProductList { items })
}

fn wishlist_response(message: &str, list: WishlistProductList) -> ApiResponse<WishlistProductList> {
    let meta = Meta::whole(list.items.len());
    ApiResponse::success(message, list, Some(meta))
}

pub async fn list_wishlist(
    pool: &DbPool,
    user: &AuthUser,
) -> AppResult<ApiResponse<WishlistProductList>> {
    let list = load_wishlist(pool, user.user_id).await?;
    Ok(wishlist_response("OK", list))
}

async fn insert_item(pool: &DbPool, user_id: Uuid, product_id: Uuid) -> AppResult<()> {
    let product_exists: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM products WHERE id = $1")
        .bind(product_id)
        .fetch_optional(pool)
        .await?;
    if product_exists.is_none() {
        return Err(AppError::BadRequest("Product not found".into()));
    }

    sqlx::query(
        r#"
        INSERT INTO wishlist_items (id, user_id, product_id)
        VALUES ($1, $2, $3)
        ON CONFLICT (user_id, product_id) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(user_id)
    .bind(product_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Idempotent: adding a product that is already saved keeps its `added_at`.
pub async fn add_item(
    pool: &DbPool,
    user: &AuthUser,
    product_id: Uuid,
) -> AppResult<ApiResponse<WishlistProductList>> {
    insert_item(pool, user.user_id, product_id).await?;

    audit::record(
        pool,
        Some(user.user_id),
        "wishlist_add",
        "wishlist_items",
        serde_json::json!({ "product_id": product_id }),
    )
    .await;

    let list = load_wishlist(pool, user.user_id).await?;
    Ok(wishlist_response("Added to wishlist", list))
}

async fn delete_item(pool: &DbPool, user_id: Uuid, product_id: Uuid) -> AppResult<bool> {
    let result = sqlx::query("DELETE FROM wishlist_items WHERE user_id = $1 AND product_id = $2")
        .bind(user_id)
        .bind(product_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn remove_item(
    pool: &DbPool,
    user: &AuthUser,
    product_id: Uuid,
) -> AppResult<ApiResponse<WishlistProductList>> {
    if !delete_item(pool, user.user_id, product_id).await? {
        return Err(AppError::NotFound);
    }

    audit::record(
        pool,
        Some(user.user_id),
        "wishlist_remove",
        "wishlist_items",
        serde_json::json!({ "product_id": product_id }),
    )
    .await;

    let list = load_wishlist(pool, user.user_id).await?;
    Ok(wishlist_response("Removed from wishlist", list))
}

pub async fn toggle_item(
    pool: &DbPool,
    user: &AuthUser,
    product_id: Uuid,
) -> AppResult<ApiResponse<ToggleWishlistResponse>> {
    let in_wishlist = if delete_item(pool, user.user_id, product_id).await? {
        false
    } else {
        insert_item(pool, user.user_id, product_id).await?;
        true
    };

    Ok(ApiResponse::success(
        if in_wishlist { "Added to wishlist" } else { "Removed from wishlist" },
        ToggleWishlistResponse {
            product_id,
            in_wishlist,
        },
        Some(Meta::empty()),
    ))
}

pub async fn clear_wishlist(
    pool: &DbPool,
    user: &AuthUser,
) -> AppResult<ApiResponse<WishlistProductList>> {
    sqlx::query("DELETE FROM wishlist_items WHERE user_id = $1")
        .bind(user.user_id)
        .execute(pool)
        .await?;
    Ok(wishlist_response(
        "Wishlist cleared",
        WishlistProductList { items: Vec::new() },
    ))
}

pub async fn merge_wishlist(
    pool: &DbPool,
    user: &AuthUser,
    guest: Vec<WishlistLine>,
) -> AppResult<ApiResponse<WishlistProductList>> {
    let guest = merge_wishlists(&[], &guest);
    if guest.is_empty() {
        return list_wishlist(pool, user).await;
    }

    let mut tx = pool.begin().await?;
    for line in &guest {
        // Unknown products are skipped rather than failing the whole merge.
        sqlx::query(
            r#"
            INSERT INTO wishlist_items (id, user_id, product_id, added_at)
            SELECT $1, $2, p.id, $4 FROM products p WHERE p.id = $3
            ON CONFLICT (user_id, product_id)
            DO UPDATE SET added_at = LEAST(wishlist_items.added_at, EXCLUDED.added_at)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user.user_id)
        .bind(line.product_id)
        .bind(line.added_at)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;

    audit::record(
        pool,
        Some(user.user_id),
        "wishlist_merge",
        "wishlist_items",
        serde_json::json!({ "lines": guest.len() }),
    )
    .await;

    let list = load_wishlist(pool, user.user_id).await?;
    Ok(wishlist_response("Wishlist merged", list))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn merge_keeps_earliest_timestamp() {
        let shared = Uuid::new_v4();
        let only_guest = Uuid::new_v4();
        let now = Utc::now();
        let server = [WishlistLine {
            product_id: shared,
            added_at: now,
        }];
        let guest = [
            WishlistLine {
                product_id: shared,
                added_at: now - Duration::days(3),
            },
            WishlistLine {
                product_id: only_guest,
                added_at: now - Duration::days(1),
            },
        ];

        let merged = merge_wishlists(&server, &guest);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].product_id, shared);
        assert_eq!(merged[0].added_at, now - Duration::days(3));
        assert_eq!(merged[1].product_id, only_guest);
    }

    #[test]
    fn merge_has_no_duplicates() {
        let a = Uuid::new_v4();
        let now = Utc::now();
        let line = WishlistLine {
            product_id: a,
            added_at: now,
        };
        assert_eq!(merge_wishlists(&[line], &[line, line]), vec![line]);
    }
}
