//! Errors returned by the language model client.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LlmError {
    /// No API key was configured for this process.
    #[error("language model API key is not configured")]
    MissingApiKey,

    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Provider returned an error body.
    #[error("API error ({error_type}): {message}")]
    Api { error_type: String, message: String },

    /// Rate limited by the provider.
    #[error("rate limited, retry after {0} seconds")]
    RateLimited(u64),

    /// Provider is temporarily overloaded.
    #[error("provider overloaded")]
    Overloaded,

    /// Authentication with the provider failed.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Response body could not be parsed.
    #[error("parse error: {0}")]
    Parse(String),
}

/// Error envelope returned by the provider.
#[derive(Debug, serde::Deserialize)]
pub struct ApiErrorResponse {
    #[serde(rename = "type")]
    pub error_type: String,
    pub error: ApiError,
}

#[derive(Debug, serde::Deserialize)]
pub struct ApiError {
    #[serde(rename = "type")]
    pub error_type: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        assert_eq!(
            LlmError::RateLimited(30).to_string(),
            "rate limited, retry after 30 seconds"
        );
        let err = LlmError::Api {
            error_type: "invalid_request_error".into(),
            message: "max_tokens is too large".into(),
        };
        assert_eq!(
            err.to_string(),
            "API error (invalid_request_error): max_tokens is too large"
        );
    }

    #[test]
    fn api_error_envelope_parses() {
        let json = r#"{
            "type": "error",
            "error": { "type": "overloaded_error", "message": "Overloaded" }
        }"#;
        let parsed: ApiErrorResponse = serde_json::from_str(json).expect("deserialize");
        assert_eq!(parsed.error_type, "error");
        assert_eq!(parsed.error.error_type, "overloaded_error");
    }
}
