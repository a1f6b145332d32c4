use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::Product;

#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct AddWishlistRequest {
    pub product_id: Uuid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct WishlistLine {
    pub product_id: Uuid,
    pub added_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct MergeWishlistRequest {
    pub items: Vec<WishlistLine>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct WishlistEntry {
    pub product: Product,
    pub added_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct WishlistProductList {
    pub items: Vec<WishlistEntry>,
}

impl WishlistProductList {
    pub fn lines(&self) -> Vec<WishlistLine> {
        self.items
            .iter()
            .map(|entry| WishlistLine {
                product_id: entry.product.id,
                added_at: entry.added_at,
            })
            .collect()
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ToggleWishlistResponse {
    pub product_id: Uuid,
    pub in_wishlist: bool,
}
