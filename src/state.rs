use std::sync::Arc;

use crate::{
    db::{DbPool, OrmConn},
    llm::LlmClient,
    paypal::PayPalClient,
    rate_limit::FixedWindowLimiter,
};

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub orm: OrmConn,
    pub llm: LlmClient,
    pub paypal: PayPalClient,
    pub public_chat_limiter: Arc<FixedWindowLimiter>,
    pub admin_chat_limiter: Arc<FixedWindowLimiter>,
}
