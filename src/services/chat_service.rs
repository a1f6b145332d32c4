//! Prompt assembly for the storefront and back-office assistants.
//!
//! Everything above the `// handlers` marker is pure: it turns identities,
//! history and context into a [`PromptBundle`] without touching the network.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use crate::{
    db::DbPool,
    dto::chat::{AssistantRequest, AssistantResponse, ChatReply, ProductAutofill, PublicChatRequest},
    error::{AppError, AppResult},
    llm::{LlmError, Message},
    middleware::auth::{AuthUser, ensure_admin},
    response::{ApiResponse, Meta},
    services::discount_service::format_dollars,
    state::AppState,
};

pub const PUBLIC_HISTORY_LIMIT: usize = 10;
pub const ADMIN_HISTORY_LIMIT: usize = 20;
pub const RECENT_ORDER_LIMIT: usize = 10;
pub const MAX_MESSAGE_CHARS: usize = 4_000;
const LOW_STOCK_THRESHOLD: i32 = 5;

const STORE_PROMPT: &str = "You are the customer assistant for a research peptide store. \
Answer questions about products, purity, storage, shipping and order status. \
All products are sold strictly for laboratory research use and are not for human consumption; \
never give dosing or medical advice. Be concise.";

const ADMIN_PROMPT: &str = "You are the back-office assistant for a research peptide store. \
Help staff with catalog copy, inventory, orders, discount codes and affiliate commissions. \
Use the store snapshot below when it is relevant and say so when you do not know.";

const AUTOFILL_PROMPT: &str = "You write catalog copy for a research peptide store. \
Reply with a single JSON object and nothing else, with the keys \
\"description\" (2-3 paragraphs), \"short_description\" (one sentence), \
\"storage\" (storage guidance or null) and \"suggested_purity\" (e.g. \">=99%\" or null). \
State that the product is for research use only.";

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct OrderSummary {
    pub id: Uuid,
    pub order_number: String,
    pub created_at: DateTime<Utc>,
    pub total_amount: i64,
    pub status: String,
    pub tracking_number: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatIdentity {
    Anonymous,
    Customer {
        name: Option<String>,
        email: String,
        orders: Vec<OrderSummary>,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdminContext {
    pub admin_email: String,
    pub product_count: i64,
    pub pending_orders: i64,
    pub low_stock: Vec<(String, i32)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptBundle {
    pub system: String,
    pub messages: Vec<Message>,
}

/// Newest `limit` turns, oldest dropped first.
pub fn truncate_history(history: &[Message], limit: usize) -> Vec<Message> {
    let start = history.len().saturating_sub(limit);
    history[start..].to_vec()
}

fn order_line(order: &OrderSummary) -> String {
    format!(
        "- {} (id {}), placed {}, total {}, status {}, tracking {}",
        order.order_number,
        order.id,
        order.created_at.format("%Y-%m-%d"),
        format_dollars(order.total_amount),
        order.status,
        order.tracking_number.as_deref().unwrap_or("not yet assigned"),
    )
}

pub fn customer_system_prompt(identity: &ChatIdentity) -> String {
    match identity {
        ChatIdentity::Anonymous => STORE_PROMPT.to_string(),
        ChatIdentity::Customer {
            name,
            email,
            orders,
        } => {
            let mut prompt = String::from(STORE_PROMPT);
            prompt.push_str("\n\nYou are speaking with a signed-in customer.");
            prompt.push_str(&format!(
                "\nName: {}\nEmail: {email}",
                name.as_deref().unwrap_or("not provided")
            ));
            if orders.is_empty() {
                prompt.push_str("\nThey have no orders yet.");
            } else {
                prompt.push_str("\nTheir most recent orders:");
                for order in orders.iter().take(RECENT_ORDER_LIMIT) {
                    prompt.push('\n');
                    prompt.push_str(&order_line(order));
                }
            }
            prompt
        }
    }
}

pub fn admin_system_prompt(context: &AdminContext) -> String {
    let mut prompt = String::from(ADMIN_PROMPT);
    prompt.push_str(&format!(
        "\n\nStaff member: {}\nProducts in catalog: {}\nOrders awaiting fulfilment: {}",
        context.admin_email, context.product_count, context.pending_orders
    ));
    if !context.low_stock.is_empty() {
        prompt.push_str("\nLow stock:");
        for (name, stock) in &context.low_stock {
            prompt.push_str(&format!("\n- {name}: {stock} left"));
        }
    }
    prompt
}

fn with_message(history: &[Message], limit: usize, message: &str) -> Vec<Message> {
    let mut messages = truncate_history(history, limit);
    messages.push(Message::user(message.trim()));
    messages
}

pub fn build_public_prompt(
    identity: &ChatIdentity,
    history: &[Message],
    message: &str,
) -> PromptBundle {
    PromptBundle {
        system: customer_system_prompt(identity),
        messages: with_message(history, PUBLIC_HISTORY_LIMIT, message),
    }
}

pub fn build_admin_prompt(
    context: &AdminContext,
    history: &[Message],
    message: &str,
) -> PromptBundle {
    PromptBundle {
        system: admin_system_prompt(context),
        messages: with_message(history, ADMIN_HISTORY_LIMIT, message),
    }
}

pub fn build_autofill_prompt(product_name: &str, notes: Option<&str>) -> PromptBundle {
    let mut request = format!("Product: {}", product_name.trim());
    if let Some(notes) = notes.map(str::trim).filter(|n| !n.is_empty()) {
        request.push_str(&format!("\nNotes from staff: {notes}"));
    }
    PromptBundle {
        system: AUTOFILL_PROMPT.to_string(),
        messages: vec![Message::user(request)],
    }
}

/// Pull the JSON object out of a model reply, tolerating code fences or
/// chatter around it.
pub fn parse_autofill(text: &str) -> Result<ProductAutofill, AppError> {
    let start = text.find('{');
    let end = text.rfind('}');
    let json = match (start, end) {
        (Some(start), Some(end)) if start < end => &text[start..=end],
        _ => {
            return Err(AppError::ExternalService(
                "assistant reply did not contain a JSON object".into(),
            ));
        }
    };
    serde_json::from_str(json)
        .map_err(|e| AppError::ExternalService(format!("assistant reply was not valid autofill JSON: {e}")))
}

/// Operators need to tell a broken setup from a busy provider.
pub fn classify_llm_error(err: &LlmError) -> AppError {
    match err {
        LlmError::MissingApiKey | LlmError::Unauthorized(_) => AppError::ServiceMisconfigured,
        LlmError::RateLimited(_) | LlmError::Overloaded => AppError::ServiceBusy,
        LlmError::Http(_) | LlmError::Api { .. } | LlmError::Parse(_) => {
            AppError::ExternalService(err.to_string())
        }
    }
}

pub fn validate_message(message: &str) -> AppResult<()> {
    let trimmed = message.trim();
    if trimmed.is_empty() {
        return Err(AppError::BadRequest("message is required".into()));
    }
    if trimmed.chars().count() > MAX_MESSAGE_CHARS {
        return Err(AppError::BadRequest(format!(
            "message must be at most {MAX_MESSAGE_CHARS} characters"
        )));
    }
    Ok(())
}

// handlers

async fn send(state: &AppState, bundle: PromptBundle) -> AppResult<String> {
    let response = state
        .llm
        .chat(bundle.messages, Some(bundle.system))
        .await
        .map_err(|err| {
            let mapped = classify_llm_error(&err);
            tracing::warn!(error = %err, "assistant call failed");
            mapped
        })?;
    tracing::debug!(
        input_tokens = response.usage.input_tokens,
        output_tokens = response.usage.output_tokens,
        "assistant replied"
    );
    Ok(response.text())
}

async fn load_identity(pool: &DbPool, user: Option<&AuthUser>) -> AppResult<ChatIdentity> {
    let Some(user) = user else {
        return Ok(ChatIdentity::Anonymous);
    };

    let name: Option<(Option<String>,)> =
        sqlx::query_as("SELECT full_name FROM users WHERE id = $1")
            .bind(user.user_id)
            .fetch_optional(pool)
            .await?;
    let orders = sqlx::query_as::<_, OrderSummary>(
        r#"
        SELECT id, order_number, created_at, total_amount, status, tracking_number
        FROM orders
        WHERE user_id = $1
        ORDER BY created_at DESC
        LIMIT $2
        "#,
    )
    .bind(user.user_id)
    .bind(RECENT_ORDER_LIMIT as i64)
    .fetch_all(pool)
    .await?;

    Ok(ChatIdentity::Customer {
        name: name.and_then(|(n,)| n),
        email: user.email.clone(),
        orders,
    })
}

async fn load_admin_context(pool: &DbPool, user: &AuthUser) -> AppResult<AdminContext> {
    let (product_count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM products")
        .fetch_one(pool)
        .await?;
    let (pending_orders,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM orders WHERE status IN ('pending', 'paid')")
            .fetch_one(pool)
            .await?;
    let low_stock: Vec<(String, i32)> = sqlx::query_as(
        "SELECT name, stock FROM products WHERE stock <= $1 ORDER BY stock ASC, name ASC LIMIT 10",
    )
    .bind(LOW_STOCK_THRESHOLD)
    .fetch_all(pool)
    .await?;

    Ok(AdminContext {
        admin_email: user.email.clone(),
        product_count,
        pending_orders,
        low_stock,
    })
}

pub async fn public_chat(
    state: &AppState,
    user: Option<&AuthUser>,
    payload: PublicChatRequest,
) -> AppResult<ApiResponse<ChatReply>> {
    validate_message(&payload.message)?;
    let identity = load_identity(&state.pool, user).await?;
    let bundle = build_public_prompt(&identity, &payload.history, &payload.message);
    let reply = send(state, bundle).await?;
    Ok(ApiResponse::success("OK", ChatReply { reply }, Some(Meta::empty())))
}

async fn admin_chat(
    state: &AppState,
    user: &AuthUser,
    message: String,
    history: Vec<Message>,
) -> AppResult<ChatReply> {
    validate_message(&message)?;
    let context = load_admin_context(&state.pool, user).await?;
    let bundle = build_admin_prompt(&context, &history, &message);
    let reply = send(state, bundle).await?;
    Ok(ChatReply { reply })
}

async fn autofill(
    state: &AppState,
    product_name: String,
    notes: Option<String>,
) -> AppResult<ProductAutofill> {
    if product_name.trim().is_empty() {
        return Err(AppError::BadRequest("product_name is required".into()));
    }
    let bundle = build_autofill_prompt(&product_name, notes.as_deref());
    let reply = send(state, bundle).await?;
    parse_autofill(&reply)
}

pub async fn admin_assistant(
    state: &AppState,
    user: &AuthUser,
    payload: AssistantRequest,
) -> AppResult<ApiResponse<AssistantResponse>> {
    ensure_admin(user)?;
    let data = match payload {
        AssistantRequest::Chat { message, history } => {
            AssistantResponse::Chat(admin_chat(state, user, message, history).await?)
        }
        AssistantRequest::Autofill {
            product_name,
            notes,
        } => AssistantResponse::Autofill(autofill(state, product_name, notes).await?),
    };
    Ok(ApiResponse::success("OK", data, Some(Meta::empty())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn turns(n: usize) -> Vec<Message> {
        (0..n)
            .map(|i| {
                if i % 2 == 0 {
                    Message::user(format!("q{i}"))
                } else {
                    Message::assistant(format!("a{i}"))
                }
            })
            .collect()
    }

    fn order(n: usize) -> OrderSummary {
        OrderSummary {
            id: Uuid::new_v4(),
            order_number: format!("PS-{n:04}"),
            created_at: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).single().expect("date"),
            total_amount: 12_345,
            status: "paid".into(),
            tracking_number: None,
        }
    }

    #[test]
    fn truncation_keeps_newest_in_order() {
        let history = turns(25);
        let kept = truncate_history(&history, PUBLIC_HISTORY_LIMIT);
        assert_eq!(kept.len(), 10);
        assert_eq!(kept.first(), history.get(15));
        assert_eq!(kept.last(), history.last());
    }

    #[test]
    fn short_history_is_untouched() {
        let history = turns(3);
        assert_eq!(truncate_history(&history, ADMIN_HISTORY_LIMIT), history);
        assert!(truncate_history(&[], 10).is_empty());
    }

    #[test]
    fn public_prompt_appends_message_last() {
        let bundle = build_public_prompt(&ChatIdentity::Anonymous, &turns(30), "  where is my order? ");
        assert_eq!(bundle.messages.len(), PUBLIC_HISTORY_LIMIT + 1);
        assert_eq!(bundle.messages.last(), Some(&Message::user("where is my order?")));
        assert_eq!(bundle.system, STORE_PROMPT);
    }

    #[test]
    fn admin_prompt_keeps_twenty_turns() {
        let context = AdminContext {
            admin_email: "ops@example.com".into(),
            product_count: 12,
            pending_orders: 3,
            low_stock: vec![("BPC-157 5mg".into(), 2)],
        };
        let bundle = build_admin_prompt(&context, &turns(40), "restock?");
        assert_eq!(bundle.messages.len(), ADMIN_HISTORY_LIMIT + 1);
        assert!(bundle.system.contains("ops@example.com"));
        assert!(bundle.system.contains("BPC-157 5mg: 2 left"));
    }

    #[test]
    fn customer_prompt_lists_at_most_ten_orders() {
        let identity = ChatIdentity::Customer {
            name: Some("Ada".into()),
            email: "ada@example.com".into(),
            orders: (0..12).map(order).collect(),
        };
        let prompt = customer_system_prompt(&identity);
        assert!(prompt.contains("Name: Ada"));
        assert!(prompt.contains("ada@example.com"));
        assert!(prompt.contains("PS-0009"));
        assert!(!prompt.contains("PS-0010"));
        assert!(prompt.contains("$123.45"));
        assert!(prompt.contains("2026-03-01"));
        assert!(prompt.contains("not yet assigned"));
    }

    #[test]
    fn errors_split_broken_from_busy() {
        assert!(matches!(
            classify_llm_error(&LlmError::MissingApiKey),
            AppError::ServiceMisconfigured
        ));
        assert!(matches!(
            classify_llm_error(&LlmError::Unauthorized("401".into())),
            AppError::ServiceMisconfigured
        ));
        assert!(matches!(
            classify_llm_error(&LlmError::RateLimited(10)),
            AppError::ServiceBusy
        ));
        assert!(matches!(
            classify_llm_error(&LlmError::Overloaded),
            AppError::ServiceBusy
        ));
        assert!(matches!(
            classify_llm_error(&LlmError::Parse("bad".into())),
            AppError::ExternalService(_)
        ));
    }

    #[test]
    fn autofill_reply_is_extracted_from_fences() {
        let reply = "Here you go:\n```json\n{\"description\":\"Long\",\"short_description\":\"Short\",\"storage\":\"-20C\",\"suggested_purity\":null}\n```";
        let parsed = parse_autofill(reply).expect("parse");
        assert_eq!(parsed.short_description, "Short");
        assert_eq!(parsed.storage.as_deref(), Some("-20C"));
        assert_eq!(parsed.suggested_purity, None);

        assert!(parse_autofill("sorry, I can't").is_err());
    }

    #[test]
    fn autofill_prompt_includes_notes() {
        let bundle = build_autofill_prompt("TB-500", Some("10mg vial"));
        assert_eq!(bundle.messages.len(), 1);
        assert!(bundle.messages[0].content.contains("TB-500"));
        assert!(bundle.messages[0].content.contains("10mg vial"));
    }

    #[test]
    fn blank_messages_are_rejected() {
        assert!(validate_message("   ").is_err());
        assert!(validate_message(&"x".repeat(MAX_MESSAGE_CHARS + 1)).is_err());
        assert!(validate_message("hello").is_ok());
    }
}
