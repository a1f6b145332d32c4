use std::sync::Arc;

use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue, RETRY_AFTER};
use secrecy::ExposeSecret;
use tracing::instrument;

use crate::config::LlmConfig;

use super::error::{ApiErrorResponse, LlmError};
use super::types::{ChatRequest, ChatResponse, Message};

const API_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 1024;

/// Messages API client. Cheap to clone.
///
/// Built without a key when none is configured; every call then fails with
/// [`LlmError::MissingApiKey`] so callers can report a configuration problem
/// instead of a generic outage.
#[derive(Clone)]
pub struct LlmClient {
    inner: Arc<LlmClientInner>,
}

struct LlmClientInner {
    client: Option<reqwest::Client>,
    model: String,
    api_url: String,
}

impl LlmClient {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let client = match &config.api_key {
            Some(key) => {
                let mut headers = HeaderMap::new();
                headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                let key = HeaderValue::from_str(key.expose_secret())
                    .map_err(|_| LlmError::Unauthorized("API key is not a valid header".into()))?;
                headers.insert("x-api-key", key);
                headers.insert("anthropic-version", HeaderValue::from_static(API_VERSION));
                Some(
                    reqwest::Client::builder()
                        .default_headers(headers)
                        .build()?,
                )
            }
            None => None,
        };

        Ok(Self {
            inner: Arc::new(LlmClientInner {
                client,
                model: config.model.clone(),
                api_url: config.api_url.clone(),
            }),
        })
    }

    pub fn is_configured(&self) -> bool {
        self.inner.client.is_some()
    }

    #[instrument(skip(self, messages, system), fields(model = %self.inner.model, turns = messages.len()))]
    pub async fn chat(
        &self,
        messages: Vec<Message>,
        system: Option<String>,
    ) -> Result<ChatResponse, LlmError> {
        let client = self.inner.client.as_ref().ok_or(LlmError::MissingApiKey)?;

        let request = ChatRequest {
            model: self.inner.model.clone(),
            max_tokens: DEFAULT_MAX_TOKENS,
            messages,
            system,
        };

        let response = client
            .post(&self.inner.api_url)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            let body = response.text().await?;
            return serde_json::from_str(&body)
                .map_err(|e| LlmError::Parse(format!("Failed to parse response: {e}")));
        }

        Err(error_from_status(status, response).await)
    }
}

async fn error_from_status(status: reqwest::StatusCode, response: reqwest::Response) -> LlmError {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse().ok())
            .unwrap_or(60);
        return LlmError::RateLimited(retry_after);
    }

    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return LlmError::Unauthorized(format!("provider rejected credentials ({status})"));
    }

    // 529 is the provider's "overloaded" status.
    if status.as_u16() == 529 {
        return LlmError::Overloaded;
    }

    match response.text().await {
        Ok(body) => parse_error_body(&body),
        Err(e) => LlmError::Http(e),
    }
}

fn parse_error_body(body: &str) -> LlmError {
    match serde_json::from_str::<ApiErrorResponse>(body) {
        Ok(api_error) if api_error.error.error_type == "overloaded_error" => LlmError::Overloaded,
        Ok(api_error) => LlmError::Api {
            error_type: api_error.error.error_type,
            message: api_error.error.message,
        },
        Err(_) => LlmError::Api {
            error_type: "unknown".to_string(),
            message: body.to_string(),
        },
    }
}
