use axum::{Json, Router, extract::State, http::StatusCode, routing::post};

use crate::{
    dto::auth::{ConvertGuestRequest, ConvertGuestResponse, LoginRequest, LoginResponse, RegisterRequest},
    error::AppResult,
    models::User,
    response::ApiResponse,
    services::{
        auth_service::{login_user, register_user},
        guest_service::convert_guest_to_account,
    },
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/convert-guest", post(convert_guest))
}

#[utoipa::path(
    post,
    path = "/api/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Register user", body = ApiResponse<User>),
        (status = 400, description = "Invalid email or password"),
        (status = 409, description = "Email already registered")
    ),
    tag = "Auth"
)]
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> AppResult<(StatusCode, Json<ApiResponse<User>>)> {
    let resp = register_user(&state, payload).await?;
    Ok((StatusCode::CREATED, Json(resp)))
}

#[utoipa::path(
    post,
    path = "/api/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login user", body = ApiResponse<LoginResponse>),
        (status = 400, description = "Invalid credentials")
    ),
    tag = "Auth"
)]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> AppResult<Json<ApiResponse<LoginResponse>>> {
    let resp = login_user(&state, payload).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/api/auth/convert-guest",
    request_body = ConvertGuestRequest,
    responses(
        (status = 201, description = "Account created and guest orders linked", body = ApiResponse<ConvertGuestResponse>),
        (status = 400, description = "Invalid email or password"),
        (status = 409, description = "An account already exists for this email")
    ),
    tag = "Auth"
)]
pub async fn convert_guest(
    State(state): State<AppState>,
    Json(payload): Json<ConvertGuestRequest>,
) -> AppResult<(StatusCode, Json<ApiResponse<ConvertGuestResponse>>)> {
    let resp = convert_guest_to_account(&state, payload).await?;
    Ok((StatusCode::CREATED, Json(resp)))
}
