//! PayPal Orders v2 client.
//!
//! The storefront only creates an order for a quoted total and later captures
//! it; settlement, refunds and fraud screening stay with PayPal.

use std::{future::Future, sync::Arc};

use chrono::{DateTime, Duration, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::instrument;

use crate::config::PayPalConfig;

#[derive(Debug, Error)]
pub enum PayPalError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("authentication with PayPal failed: {0}")]
    Authentication(String),

    #[error("PayPal returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("payment was not completed (status {0})")]
    NotCompleted(String),

    #[error("unexpected PayPal response: {0}")]
    Parse(String),
}

/// A payment PayPal reports as captured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedPayment {
    pub paypal_order_id: String,
    pub capture_id: String,
    pub amount_cents: i64,
    pub currency: String,
}

/// Seam between checkout and the payment provider.
pub trait PaymentGateway {
    fn capture(
        &self,
        paypal_order_id: &str,
    ) -> impl Future<Output = Result<CapturedPayment, PayPalError>> + Send;
}

#[derive(Clone)]
pub struct PayPalClient {
    inner: Arc<PayPalClientInner>,
}

struct PayPalClientInner {
    client: reqwest::Client,
    client_id: String,
    client_secret: SecretString,
    api_url: String,
    currency: String,
    token: Mutex<Option<AccessToken>>,
}

struct AccessToken {
    value: SecretString,
    expires_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Serialize)]
struct CreateOrderRequest<'a> {
    intent: &'static str,
    purchase_units: Vec<PurchaseUnitRequest<'a>>,
}

#[derive(Serialize)]
struct PurchaseUnitRequest<'a> {
    reference_id: &'a str,
    amount: Money,
}

#[derive(Debug, Serialize, Deserialize)]
struct Money {
    currency_code: String,
    value: String,
}

#[derive(Deserialize)]
struct OrderResponse {
    id: String,
    status: String,
    #[serde(default)]
    purchase_units: Vec<PurchaseUnitResponse>,
}

#[derive(Deserialize)]
struct PurchaseUnitResponse {
    #[serde(default)]
    payments: Option<Payments>,
}

#[derive(Deserialize)]
struct Payments {
    #[serde(default)]
    captures: Vec<Capture>,
}

#[derive(Deserialize)]
struct Capture {
    id: String,
    status: String,
    amount: Money,
}

impl PayPalClient {
    pub fn new(config: &PayPalConfig) -> Result<Self, PayPalError> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            inner: Arc::new(PayPalClientInner {
                client,
                client_id: config.client_id.clone(),
                client_secret: config.client_secret.clone(),
                api_url: config.api_url.trim_end_matches('/').to_string(),
                currency: config.currency.clone(),
                token: Mutex::new(None),
            }),
        })
    }

    /// Create a PayPal order for `amount_cents`, returning PayPal's order id.
    #[instrument(skip(self), fields(currency = %self.inner.currency))]
    pub async fn create_order(
        &self,
        reference: &str,
        amount_cents: i64,
    ) -> Result<String, PayPalError> {
        let token = self.access_token().await?;
        let body = CreateOrderRequest {
            intent: "CAPTURE",
            purchase_units: vec![PurchaseUnitRequest {
                reference_id: reference,
                amount: Money {
                    currency_code: self.inner.currency.clone(),
                    value: format_cents(amount_cents),
                },
            }],
        };

        let response = self
            .inner
            .client
            .post(format!("{}/v2/checkout/orders", self.inner.api_url))
            .bearer_auth(token.expose_secret())
            .json(&body)
            .send()
            .await?;

        let order: OrderResponse = read_json(response).await?;
        Ok(order.id)
    }

    async fn capture_order(&self, paypal_order_id: &str) -> Result<CapturedPayment, PayPalError> {
        let token = self.access_token().await?;
        let response = self
            .inner
            .client
            .post(format!(
                "{}/v2/checkout/orders/{}/capture",
                self.inner.api_url, paypal_order_id
            ))
            .bearer_auth(token.expose_secret())
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body("{}")
            .send()
            .await?;

        let order: OrderResponse = read_json(response).await?;
        captured_payment(order)
    }

    async fn access_token(&self) -> Result<SecretString, PayPalError> {
        let mut cached = self.inner.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at > Utc::now() {
                return Ok(token.value.clone());
            }
        }

        let response = self
            .inner
            .client
            .post(format!("{}/v1/oauth2/token", self.inner.api_url))
            .basic_auth(
                &self.inner.client_id,
                Some(self.inner.client_secret.expose_secret()),
            )
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(PayPalError::Authentication(format!("HTTP {status}: {text}")));
        }

        let token: TokenResponse = response.json().await?;
        let value = SecretString::from(token.access_token);
        // Refresh a minute early so a token never expires mid-request.
        *cached = Some(AccessToken {
            value: value.clone(),
            expires_at: Utc::now() + Duration::seconds((token.expires_in - 60).max(0)),
        });
        Ok(value)
    }
}

impl PaymentGateway for PayPalClient {
    #[instrument(skip(self))]
    async fn capture(&self, paypal_order_id: &str) -> Result<CapturedPayment, PayPalError> {
        self.capture_order(paypal_order_id).await
    }
}

async fn read_json<T: for<'de> Deserialize<'de>>(
    response: reqwest::Response,
) -> Result<T, PayPalError> {
    let status = response.status();
    let text = response.text().await?;
    if !status.is_success() {
        return Err(PayPalError::Api {
            status: status.as_u16(),
            message: text,
        });
    }
    serde_json::from_str(&text).map_err(|e| PayPalError::Parse(e.to_string()))
}

fn captured_payment(order: OrderResponse) -> Result<CapturedPayment, PayPalError> {
    if order.status != "COMPLETED" {
        return Err(PayPalError::NotCompleted(order.status));
    }
    let capture = order
        .purchase_units
        .into_iter()
        .filter_map(|unit| unit.payments)
        .flat_map(|payments| payments.captures)
        .find(|capture| capture.status == "COMPLETED")
        .ok_or_else(|| PayPalError::Parse("no completed capture in response".into()))?;

    Ok(CapturedPayment {
        paypal_order_id: order.id,
        capture_id: capture.id,
        amount_cents: parse_cents(&capture.amount.value)?,
        currency: capture.amount.currency_code,
    })
}

/// Format integer cents as PayPal's decimal string ("12.34").
pub fn format_cents(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("{sign}{}.{:02}", abs / 100, abs % 100)
}

/// Parse PayPal's decimal string into integer cents.
pub fn parse_cents(value: &str) -> Result<i64, PayPalError> {
    let parsed: rust_decimal::Decimal = value
        .trim()
        .parse()
        .map_err(|_| PayPalError::Parse(format!("invalid amount {value}")))?;
    let cents = (parsed * rust_decimal::Decimal::ONE_HUNDRED).round();
    i64::try_from(cents).map_err(|_| PayPalError::Parse(format!("amount out of range {value}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cents_formatting() {
        assert_eq!(format_cents(0), "0.00");
        assert_eq!(format_cents(5), "0.05");
        assert_eq!(format_cents(12_345), "123.45");
    }

    #[test]
    fn cents_parsing() {
        assert_eq!(parse_cents("123.45").expect("parse"), 12_345);
        assert_eq!(parse_cents("30").expect("parse"), 3_000);
        assert!(parse_cents("abc").is_err());
    }

    #[test]
    fn completed_capture_is_extracted() {
        let json = r#"{
            "id": "5O190127TN364715T",
            "status": "COMPLETED",
            "purchase_units": [{
                "payments": {
                    "captures": [{
                        "id": "3C679366HH908993F",
                        "status": "COMPLETED",
                        "amount": {"currency_code": "USD", "value": "89.10"}
                    }]
                }
            }]
        }"#;
        let order: OrderResponse = serde_json::from_str(json).expect("deserialize");
        let captured = captured_payment(order).expect("captured");
        assert_eq!(captured.amount_cents, 8_910);
        assert_eq!(captured.capture_id, "3C679366HH908993F");
    }

    #[test]
    fn incomplete_order_is_rejected() {
        let json = r#"{"id": "X", "status": "PAYER_ACTION_REQUIRED"}"#;
        let order: OrderResponse = serde_json::from_str(json).expect("deserialize");
        assert!(matches!(
            captured_payment(order),
            Err(PayPalError::NotCompleted(status)) if status == "PAYER_ACTION_REQUIRED"
        ));
    }
}
