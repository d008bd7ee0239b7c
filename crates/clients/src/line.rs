use async_trait::async_trait;
use relay_core::{CardAction, CardLayout, OutboundMessage, ReplyHandle};
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tracing::debug;

use crate::error::{clip_body, ClientError};

pub const LINE_API_BASE: &str = "https://api.line.me/v2/bot/message";

const SERVICE: &str = "line";
const MAX_ALT_TEXT: usize = 400;
const MAX_BUTTON_LABEL: usize = 40;
const MAX_TEXT_CHARS: usize = 5_000;
const ELLIPSIS: char = '…';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Sent,
    Skipped,
}

#[async_trait]
pub trait ReplyGateway: Send + Sync {
    /// Replies to one inbound event. The handle is consumed: a reply token
    /// can be used at most once.
    async fn deliver(
        &self,
        handle: ReplyHandle,
        message: OutboundMessage,
    ) -> Result<DeliveryOutcome, ClientError>;

    async fn push(
        &self,
        user_id: &str,
        message: OutboundMessage,
    ) -> Result<DeliveryOutcome, ClientError>;
}

#[derive(Clone)]
pub struct LineMessagingClient {
    http: Client,
    access_token: String,
    base_url: String,
}

impl LineMessagingClient {
    pub fn new(http: Client, access_token: impl Into<String>) -> Self {
        Self::with_base_url(http, access_token, LINE_API_BASE)
    }

    pub fn with_base_url(
        http: Client,
        access_token: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            http,
            access_token: access_token.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    async fn post(&self, endpoint: &str, payload: &Value) -> Result<(), ClientError> {
        let response = self
            .http
            .post(format!("{}/{}", self.base_url, endpoint))
            .bearer_auth(self.access_token.as_str())
            .json(payload)
            .send()
            .await
            .map_err(|err| ClientError::transport(SERVICE, err))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(classify_failure(status, body))
    }
}

#[async_trait]
impl ReplyGateway for LineMessagingClient {
    async fn deliver(
        &self,
        handle: ReplyHandle,
        message: OutboundMessage,
    ) -> Result<DeliveryOutcome, ClientError> {
        let Some(rendered) = message_to_json(&message) else {
            debug!("reply skipped, message is empty");
            return Ok(DeliveryOutcome::Skipped);
        };

        let payload = json!({
            "replyToken": handle.as_str(),
            "messages": [rendered],
        });
        self.post("reply", &payload).await?;
        Ok(DeliveryOutcome::Sent)
    }

    async fn push(
        &self,
        user_id: &str,
        message: OutboundMessage,
    ) -> Result<DeliveryOutcome, ClientError> {
        let Some(rendered) = message_to_json(&message) else {
            return Ok(DeliveryOutcome::Skipped);
        };
        if user_id.trim().is_empty() {
            return Ok(DeliveryOutcome::Skipped);
        }

        let payload = json!({
            "to": user_id,
            "messages": [rendered],
        });
        self.post("push", &payload).await?;
        Ok(DeliveryOutcome::Sent)
    }
}

fn classify_failure(status: StatusCode, body: String) -> ClientError {
    if status == StatusCode::BAD_REQUEST && body.to_lowercase().contains("invalid reply token") {
        return ClientError::InvalidHandle(clip_body(body));
    }
    ClientError::Status {
        service: SERVICE,
        status: status.as_u16(),
        body: clip_body(body),
    }
}

pub fn message_to_json(message: &OutboundMessage) -> Option<Value> {
    if message.is_empty() {
        return None;
    }

    match message {
        OutboundMessage::PlainText(text) => Some(json!({
            "type": "text",
            "text": clip_text(text.trim(), MAX_TEXT_CHARS),
        })),
        OutboundMessage::Card(layout) => Some(flex_message(layout)),
    }
}

fn flex_message(layout: &CardLayout) -> Value {
    let mut body = vec![json!({
        "type": "text",
        "text": layout.title,
        "weight": "bold",
        "wrap": true,
    })];
    if let Some(text) = layout.body.as_deref() {
        body.push(json!({
            "type": "text",
            "text": text,
            "size": "sm",
            "wrap": true,
        }));
    }

    let mut bubble = json!({
        "type": "bubble",
        "body": {
            "type": "box",
            "layout": "vertical",
            "spacing": "md",
            "contents": body,
        },
    });

    if !layout.buttons.is_empty() {
        let buttons = layout
            .buttons
            .iter()
            .map(|button| {
                let label = truncate_chars(&button.label, MAX_BUTTON_LABEL);
                let action = match &button.action {
                    CardAction::Message(text) => json!({
                        "type": "message",
                        "label": label,
                        "text": text,
                    }),
                    CardAction::Uri(uri) => json!({
                        "type": "uri",
                        "label": label,
                        "uri": uri,
                    }),
                };
                json!({
                    "type": "button",
                    "style": "primary",
                    "height": "sm",
                    "action": action,
                })
            })
            .collect::<Vec<_>>();

        bubble["footer"] = json!({
            "type": "box",
            "layout": "vertical",
            "spacing": "sm",
            "contents": buttons,
        });
    }

    json!({
        "type": "flex",
        "altText": truncate_chars(&layout.title, MAX_ALT_TEXT),
        "contents": bubble,
    })
}

fn truncate_chars(value: &str, limit: usize) -> String {
    value.chars().take(limit).collect()
}

fn clip_text(value: &str, limit: usize) -> String {
    if value.chars().count() <= limit {
        return value.to_string();
    }
    let mut clipped = truncate_chars(value, limit.saturating_sub(1));
    clipped.push(ELLIPSIS);
    clipped
}
