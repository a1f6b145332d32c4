use axum::{Json, Router, extract::State, http::StatusCode, routing::post};

use crate::{
    dto::orders::{CaptureRequest, OrderWithItems, PayPalOrderResponse, Quote, QuoteRequest},
    error::AppResult,
    middleware::auth::OptionalAuthUser,
    response::ApiResponse,
    services::checkout_service,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/quote", post(quote))
        .route("/paypal", post(create_paypal_order))
        .route("/capture", post(capture))
}

#[utoipa::path(
    post,
    path = "/api/checkout/quote",
    request_body = QuoteRequest,
    responses(
        (status = 200, description = "Priced cart with any discount applied", body = ApiResponse<Quote>),
        (status = 400, description = "Empty cart or unknown product"),
        (status = 422, description = "Discount code not applicable")
    ),
    tag = "Checkout"
)]
pub async fn quote(
    State(state): State<AppState>,
    OptionalAuthUser(user): OptionalAuthUser,
    Json(payload): Json<QuoteRequest>,
) -> AppResult<Json<ApiResponse<Quote>>> {
    let resp = checkout_service::quote(&state, user.as_ref(), payload).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/api/checkout/paypal",
    request_body = QuoteRequest,
    responses(
        (status = 200, description = "PayPal order created for the quoted total", body = ApiResponse<PayPalOrderResponse>),
        (status = 502, description = "PayPal unavailable")
    ),
    tag = "Checkout"
)]
pub async fn create_paypal_order(
    State(state): State<AppState>,
    OptionalAuthUser(user): OptionalAuthUser,
    Json(payload): Json<QuoteRequest>,
) -> AppResult<Json<ApiResponse<PayPalOrderResponse>>> {
    let resp = checkout_service::create_paypal_order(&state, user.as_ref(), payload).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/api/checkout/capture",
    request_body = CaptureRequest,
    responses(
        (status = 201, description = "Payment captured and order placed", body = ApiResponse<OrderWithItems>),
        (status = 409, description = "PayPal order already used"),
        (status = 422, description = "Stock, discount or payment rule failed")
    ),
    tag = "Checkout"
)]
pub async fn capture(
    State(state): State<AppState>,
    OptionalAuthUser(user): OptionalAuthUser,
    Json(payload): Json<CaptureRequest>,
) -> AppResult<(StatusCode, Json<ApiResponse<OrderWithItems>>)> {
    let resp = checkout_service::capture(&state, user.as_ref(), payload).await?;
    Ok((StatusCode::CREATED, Json(resp)))
}
