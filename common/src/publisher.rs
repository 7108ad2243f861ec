// Channel publishing

use crate::config::TelegramConfig;
use crate::errors::{ConfigurationError, PublishError, TransportError};
use crate::message::OutboundMessage;
use crate::models::{Channel, ChannelType, MarkupFormat};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

/// Telegram rejects photo captions longer than this
const TELEGRAM_CAPTION_LIMIT: usize = 1024;

#[async_trait]
pub trait ChannelPublisher: Send + Sync {
    async fn publish(&self, channel: &Channel, message: &OutboundMessage)
        -> Result<(), PublishError>;
}

/// Dispatches by channel type. Types without a registered publisher fail with
/// `PublishError::Unsupported`; they never succeed silently.
#[derive(Default)]
pub struct ChannelRouter {
    publishers: HashMap<ChannelType, Arc<dyn ChannelPublisher>>,
}

impl ChannelRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, channel_type: ChannelType, publisher: Arc<dyn ChannelPublisher>) -> Self {
        self.publishers.insert(channel_type, publisher);
        self
    }

    pub fn supports(&self, channel_type: ChannelType) -> bool {
        self.publishers.contains_key(&channel_type)
    }
}

#[async_trait]
impl ChannelPublisher for ChannelRouter {
    async fn publish(
        &self,
        channel: &Channel,
        message: &OutboundMessage,
    ) -> Result<(), PublishError> {
        match self.publishers.get(&channel.channel_type) {
            Some(publisher) => publisher.publish(channel, message).await,
            None => Err(PublishError::Unsupported(channel.channel_type.to_string())),
        }
    }
}

/// Telegram Bot API publisher (HTML parse mode)
pub struct TelegramPublisher {
    client: Client,
    api_base: String,
    bot_token: String,
}

impl TelegramPublisher {
    pub fn new(api_base: impl Into<String>, bot_token: impl Into<String>, timeout: Duration) -> Result<Self, ConfigurationError> {
        let client = Client::builder().timeout(timeout).build().map_err(|e| {
            ConfigurationError::ClientSetup(format!("Failed to create HTTP client: {}", e))
        })?;

        Ok(Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            bot_token: bot_token.into(),
        })
    }

    /// `None` when no bot token is configured
    pub fn from_config(config: &TelegramConfig, timeout: Duration) -> Result<Option<Self>, ConfigurationError> {
        match config.bot_token.as_deref().filter(|t| !t.trim().is_empty()) {
            Some(token) => Self::new(config.api_base.clone(), token, timeout).map(Some),
            None => Ok(None),
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.bot_token, method)
    }
}

#[async_trait]
impl ChannelPublisher for TelegramPublisher {
    #[instrument(skip(self, channel, message), fields(channel_id = %channel.id))]
    async fn publish(
        &self,
        channel: &Channel,
        message: &OutboundMessage,
    ) -> Result<(), PublishError> {
        if channel.address.trim().is_empty() {
            return Err(PublishError::MisconfiguredChannel(
                channel.id,
                "missing chat id".to_string(),
            ));
        }

        let parse_mode = match message.markup {
            MarkupFormat::Html => Some("HTML"),
            MarkupFormat::WhatsApp | MarkupFormat::Plain => None,
        };

        let (method, mut payload) = match &message.image_url {
            Some(image) if message.body.chars().count() <= TELEGRAM_CAPTION_LIMIT => (
                "sendPhoto",
                json!({ "chat_id": channel.address, "photo": image, "caption": message.body }),
            ),
            _ => (
                "sendMessage",
                json!({ "chat_id": channel.address, "text": message.body }),
            ),
        };
        if let Some(mode) = parse_mode {
            payload["parse_mode"] = Value::String(mode.to_string());
        }

        debug!(method, "Sending Telegram message");

        let response = self
            .client
            .post(self.method_url(method))
            .json(&payload)
            .send()
            .await
            .map_err(TransportError::from)?;

        let status = response.status();
        let body: Value = response
            .json()
            .await
            .map_err(|e| TransportError::Decode(e.to_string()))?;

        if body.get("ok").and_then(Value::as_bool) == Some(true) {
            return Ok(());
        }

        let description = body
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or("unknown error")
            .to_string();
        match body.get("error_code").and_then(Value::as_i64) {
            Some(code) => Err(TransportError::Api {
                code,
                message: description,
            }
            .into()),
            None => Err(TransportError::UnexpectedStatus {
                status: status.as_u16(),
                body: description,
            }
            .into()),
        }
    }
}
