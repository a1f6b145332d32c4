use axum::{Json, Router, extract::State, routing::get};

use crate::{
    dto::affiliates::AffiliatePortal,
    error::AppResult,
    middleware::auth::AuthUser,
    response::ApiResponse,
    services::commission_service,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(portal))
}

#[utoipa::path(
    get,
    path = "/api/affiliate",
    responses(
        (status = 200, description = "Codes and commissions for the signed-in affiliate", body = ApiResponse<AffiliatePortal>),
        (status = 403, description = "No affiliate code registered to this email")
    ),
    security(("bearer_auth" = [])),
    tag = "Affiliate"
)]
pub async fn portal(
    State(state): State<AppState>,
    user: AuthUser,
) -> AppResult<Json<ApiResponse<AffiliatePortal>>> {
    let resp = commission_service::affiliate_portal(&state, &user).await?;
    Ok(Json(resp))
}
