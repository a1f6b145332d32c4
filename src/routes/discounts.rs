use axum::{Json, Router, extract::State, routing::post};

use crate::{
    dto::discounts::{ValidateDiscountRequest, ValidateDiscountResponse},
    error::AppResult,
    response::ApiResponse,
    services::discount_service,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new().route("/validate", post(validate_code))
}

/// An unusable code is still a 200; the reason is carried in the body.
#[utoipa::path(
    post,
    path = "/api/discounts/validate",
    request_body = ValidateDiscountRequest,
    responses(
        (status = 200, description = "Validation result", body = ApiResponse<ValidateDiscountResponse>)
    ),
    tag = "Discounts"
)]
pub async fn validate_code(
    State(state): State<AppState>,
    Json(payload): Json<ValidateDiscountRequest>,
) -> AppResult<Json<ApiResponse<ValidateDiscountResponse>>> {
    let resp = discount_service::validate(&state, &payload.code, payload.order_total).await?;
    Ok(Json(resp))
}
