use axum::{Json, Router, extract::State, http::HeaderMap, routing::post};

use crate::{
    dto::chat::{ChatReply, PublicChatRequest},
    error::{AppError, AppResult},
    middleware::{auth::OptionalAuthUser, client_ip::ClientIp},
    response::ApiResponse,
    services::chat_service,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new().route("/", post(public_chat))
}

/// Storefront assistant. Limited per client address; signed-in customers get
/// their recent orders as context.
#[utoipa::path(
    post,
    path = "/api/chat",
    request_body = PublicChatRequest,
    responses(
        (status = 200, description = "Assistant reply", body = ApiResponse<ChatReply>),
        (status = 429, description = "Too many requests"),
        (status = 503, description = "Assistant unavailable")
    ),
    tag = "Chat"
)]
pub async fn public_chat(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    OptionalAuthUser(user): OptionalAuthUser,
    Json(payload): Json<PublicChatRequest>,
) -> AppResult<(HeaderMap, Json<ApiResponse<ChatReply>>)> {
    let decision = state.public_chat_limiter.check(&ip);
    if !decision.allowed {
        tracing::warn!(client_ip = %ip, "public chat rate limited");
        return Err(AppError::RateLimited(decision));
    }

    let resp = chat_service::public_chat(&state, user.as_ref(), payload).await?;
    Ok((decision.headers(), Json(resp)))
}
