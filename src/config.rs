use std::env;

use secrecy::SecretString;

const DEFAULT_LLM_MODEL: &str = "claude-sonnet-4-20250514";
const DEFAULT_LLM_API_URL: &str = "https://api.anthropic.com/v1/messages";
const DEFAULT_PAYPAL_API_URL: &str = "https://api-m.sandbox.paypal.com";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub llm: LlmConfig,
    pub paypal: PayPalConfig,
    pub rate_limits: RateLimitConfig,
}

/// Hosted language model settings. A missing key is not a startup error:
/// the assistant endpoints report themselves as misconfigured instead.
#[derive(Clone)]
pub struct LlmConfig {
    pub api_key: Option<SecretString>,
    pub model: String,
    pub api_url: String,
}

impl std::fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("model", &self.model)
            .field("api_url", &self.api_url)
            .finish()
    }
}

#[derive(Clone)]
pub struct PayPalConfig {
    pub client_id: String,
    pub client_secret: SecretString,
    pub api_url: String,
    pub currency: String,
}

impl std::fmt::Debug for PayPalConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PayPalConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("api_url", &self.api_url)
            .field("currency", &self.currency)
            .finish()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub public_chat_per_window: u32,
    pub admin_chat_per_window: u32,
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            public_chat_per_window: 15,
            admin_chat_per_window: 50,
            window_secs: 60,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = env::var("DATABASE_URL")?;
        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = parse_env("APP_PORT").unwrap_or(3000);
        Ok(Self {
            port,
            database_url,
            host,
            llm: LlmConfig::from_env(),
            paypal: PayPalConfig::from_env(),
            rate_limits: RateLimitConfig::from_env()?,
        })
    }
}

impl LlmConfig {
    pub fn from_env() -> Self {
        Self {
            api_key: env::var("LLM_API_KEY")
                .ok()
                .filter(|key| !key.trim().is_empty())
                .map(SecretString::from),
            model: env::var("LLM_MODEL").unwrap_or_else(|_| DEFAULT_LLM_MODEL.to_string()),
            api_url: env::var("LLM_API_URL").unwrap_or_else(|_| DEFAULT_LLM_API_URL.to_string()),
        }
    }
}

impl PayPalConfig {
    pub fn from_env() -> Self {
        Self {
            client_id: env::var("PAYPAL_CLIENT_ID").unwrap_or_default(),
            client_secret: SecretString::from(env::var("PAYPAL_CLIENT_SECRET").unwrap_or_default()),
            api_url: env::var("PAYPAL_API_URL")
                .unwrap_or_else(|_| DEFAULT_PAYPAL_API_URL.to_string()),
            currency: env::var("PAYPAL_CURRENCY").unwrap_or_else(|_| "USD".to_string()),
        }
    }
}

impl RateLimitConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();
        let config = Self {
            public_chat_per_window: parse_env("CHAT_RATE_LIMIT")
                .unwrap_or(defaults.public_chat_per_window),
            admin_chat_per_window: parse_env("ADMIN_CHAT_RATE_LIMIT")
                .unwrap_or(defaults.admin_chat_per_window),
            window_secs: parse_env("RATE_LIMIT_WINDOW_SECS").unwrap_or(defaults.window_secs),
        };
        config.validate()?;
        Ok(config)
    }

    /// Limits and the window must be non-zero.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.public_chat_per_window == 0 {
            anyhow::bail!("CHAT_RATE_LIMIT must be at least 1");
        }
        if self.admin_chat_per_window == 0 {
            anyhow::bail!("ADMIN_CHAT_RATE_LIMIT must be at least 1");
        }
        if self.window_secs == 0 {
            anyhow::bail!("RATE_LIMIT_WINDOW_SECS must be at least 1");
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.parse::<T>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_rate_limits_are_valid() {
        assert!(RateLimitConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_rate_limits_are_rejected() {
        let zero_window = RateLimitConfig {
            window_secs: 0,
            ..RateLimitConfig::default()
        };
        assert!(zero_window.validate().is_err());

        let zero_public = RateLimitConfig {
            public_chat_per_window: 0,
            ..RateLimitConfig::default()
        };
        assert!(zero_public.validate().is_err());

        let zero_admin = RateLimitConfig {
            admin_chat_per_window: 0,
            ..RateLimitConfig::default()
        };
        assert!(zero_admin.validate().is_err());
    }
}
