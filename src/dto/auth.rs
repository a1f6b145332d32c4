use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::models::User;

#[derive(Deserialize, Debug, ToSchema)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub full_name: Option<String>,
}

#[derive(Deserialize, Debug, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LoginResponse {
    pub token: String,
}

#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct Claims {
    pub sub: String,
    pub email: String,
    pub role: String,
    pub exp: usize,
}

/// Create an account after a guest checkout.
#[derive(Deserialize, Debug, ToSchema)]
pub struct ConvertGuestRequest {
    pub email: String,
    pub password: String,
    /// Guest order whose shipping details seed the new profile.
    pub order_number: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ConvertGuestResponse {
    pub user: User,
    /// Guest orders now owned by the new account.
    pub linked_orders: u64,
    pub token: String,
}
