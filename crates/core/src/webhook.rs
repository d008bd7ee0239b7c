use serde::Deserialize;

use crate::models::{EventMode, InboundEvent, ReplyHandle};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    #[serde(default)]
    pub destination: Option<String>,
    #[serde(default)]
    pub events: Vec<WebhookEvent>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEvent {
    #[serde(rename = "type", default)]
    pub event_type: Option<String>,
    #[serde(default)]
    pub webhook_event_id: Option<String>,
    #[serde(default)]
    pub reply_token: Option<String>,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub message: Option<WebhookMessage>,
    #[serde(default)]
    pub source: Option<WebhookSource>,
    #[serde(default)]
    pub delivery_context: Option<DeliveryContext>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookMessage {
    #[serde(rename = "type", default)]
    pub message_type: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookSource {
    #[serde(default)]
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryContext {
    #[serde(default)]
    pub is_redelivery: bool,
}

impl From<WebhookEvent> for InboundEvent {
    fn from(event: WebhookEvent) -> Self {
        // Only text messages carry something the router can act on.
        let text = event
            .message
            .filter(|message| {
                message
                    .message_type
                    .as_deref()
                    .map(|kind| kind == "text")
                    .unwrap_or(true)
            })
            .and_then(|message| message.text);

        let event_id = event
            .webhook_event_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .or_else(|| event.reply_token.clone())
            .unwrap_or_default();

        InboundEvent {
            event_id,
            reply_handle: event.reply_token.and_then(ReplyHandle::new),
            user_id: event.source.and_then(|source| source.user_id),
            text,
            mode: EventMode::from_optional_str(event.mode.as_deref()),
            redelivery: event
                .delivery_context
                .map(|context| context.is_redelivery)
                .unwrap_or(false),
        }
    }
}
