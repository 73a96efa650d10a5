//! Telegram message sink
//!
//! Sends plain-text messages through the Bot API `sendMessage` method. The
//! bot token is part of the request URL, so transport errors are stripped of
//! their URL before they reach a log line.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::config::SinkConfig;
use crate::error::{ConfigError, Result, SinkError};
use crate::platforms::MessageSink;

/// Telegram's limit for the text of a single message
pub const MAX_MESSAGE_LENGTH: usize = 4096;

pub struct TelegramSink {
    client: reqwest::Client,
    api_base: String,
    bot_token: SecretString,
}

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    error_code: Option<u16>,
    description: Option<String>,
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    retry_after: Option<u64>,
}

impl TelegramSink {
    pub fn new(client: reqwest::Client, api_base: String, bot_token: SecretString) -> Self {
        Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            bot_token,
        }
    }

    /// Build from the `[sink]` section
    pub fn from_config(config: &SinkConfig, client: reqwest::Client) -> Result<Self> {
        let token = config
            .bot_token
            .as_ref()
            .map(|t| SecretString::from(t.expose_secret().to_string()))
            .ok_or_else(|| ConfigError::MissingField("sink.bot_token".to_string()))?;

        Ok(Self::new(client, config.api_base.clone(), token))
    }

    fn method_url(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{}",
            self.api_base,
            self.bot_token.expose_secret(),
            method
        )
    }
}

#[async_trait]
impl MessageSink for TelegramSink {
    async fn deliver(&self, destination: &str, text: &str) -> Result<()> {
        let response = self
            .client
            .post(self.method_url("sendMessage"))
            .json(&SendMessage {
                chat_id: destination,
                text,
            })
            .send()
            .await
            .map_err(|e| {
                SinkError::Network(format!("Telegram request failed: {}", e.without_url()))
            })?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| {
            SinkError::Network(format!("Telegram response unreadable: {}", e.without_url()))
        })?;

        Ok(check_response(status, &body)?)
    }

    fn max_message_length(&self) -> Option<usize> {
        Some(MAX_MESSAGE_LENGTH)
    }

    fn name(&self) -> &str {
        "telegram"
    }
}

/// Interpret a `sendMessage` reply
///
/// The Bot API always answers with an `{"ok": ...}` envelope; the HTTP status
/// mirrors `error_code` on failure.
fn check_response(status: u16, body: &str) -> std::result::Result<(), SinkError> {
    let parsed: Option<ApiResponse> = serde_json::from_str(body).ok();

    if let Some(ApiResponse { ok: true, .. }) = parsed {
        return Ok(());
    }

    let (code, description, retry_after) = match parsed {
        Some(reply) => (
            reply.error_code.unwrap_or(status),
            reply.description.unwrap_or_else(|| "no description".to_string()),
            reply.parameters.and_then(|p| p.retry_after),
        ),
        None => (status, body.chars().take(200).collect(), None),
    };

    Err(match code {
        // An invalid token yields 404 on every method
        401 | 404 => SinkError::Authentication(format!(
            "Telegram rejected the bot token (HTTP {}): {}. \
                Suggestion: Check TELEGRAM_BOT_TOKEN.",
            code, description
        )),
        429 => SinkError::Rejected(format!(
            "Telegram flood control (HTTP 429): {}; retry after {}s",
            description,
            retry_after.unwrap_or(0)
        )),
        500..=599 => SinkError::Network(format!(
            "Telegram server error (HTTP {}): {}",
            code, description
        )),
        _ => SinkError::Rejected(format!("Telegram error (HTTP {}): {}", code, description)),
    })
}
