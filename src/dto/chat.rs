use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::llm::Message;

#[derive(Debug, Deserialize, ToSchema)]
pub struct PublicChatRequest {
    pub message: String,
    #[serde(default)]
    pub history: Vec<Message>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ChatReply {
    pub reply: String,
}

/// Admin assistant request, discriminated by `mode`.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum AssistantRequest {
    Chat {
        message: String,
        #[serde(default)]
        history: Vec<Message>,
    },
    Autofill {
        product_name: String,
        notes: Option<String>,
    },
}

/// Draft catalog copy produced for a product name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ProductAutofill {
    pub description: String,
    pub short_description: String,
    pub storage: Option<String>,
    pub suggested_purity: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(tag = "mode", content = "result", rename_all = "snake_case")]
pub enum AssistantResponse {
    Chat(ChatReply),
    Autofill(ProductAutofill),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assistant_request_dispatches_on_mode() {
        let chat: AssistantRequest =
            serde_json::from_str(r#"{"mode":"chat","message":"hi"}"#).expect("chat");
        assert!(matches!(chat, AssistantRequest::Chat { ref history, .. } if history.is_empty()));

        let autofill: AssistantRequest =
            serde_json::from_str(r#"{"mode":"autofill","product_name":"BPC-157"}"#)
                .expect("autofill");
        assert!(matches!(autofill, AssistantRequest::Autofill { notes: None, .. }));
    }

    #[test]
    fn unknown_mode_is_rejected() {
        let parsed = serde_json::from_str::<AssistantRequest>(r#"{"mode":"summarize"}"#);
        assert!(parsed.is_err());
    }
}
