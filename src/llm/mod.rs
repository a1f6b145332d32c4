//! Client for the hosted language model that backs the storefront assistant.

mod client;
mod error;
mod types;

pub use client::LlmClient;
pub use error::{ApiErrorResponse, LlmError};
pub use types::{ChatRequest, ChatResponse, ContentBlock, Message, Role, Usage};
