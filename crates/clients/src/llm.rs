use async_trait::async_trait;
use relay_core::HistoryEntry;
use reqwest::Client;
use serde_json::{json, Value};

use crate::error::{clip_body, ClientError};

pub const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";

const SERVICE: &str = "openai";

#[async_trait]
pub trait Assistant: Send + Sync {
    async fn respond(&self, history: &[HistoryEntry], text: &str) -> Result<String, ClientError>;
}

#[derive(Debug, Clone)]
pub struct AssistantSettings {
    pub model: String,
    pub reply_language: String,
    pub max_tokens: u32,
}

#[derive(Clone)]
pub struct OpenAiChatClient {
    http: Client,
    api_key: String,
    settings: AssistantSettings,
    endpoint: String,
}

impl OpenAiChatClient {
    pub fn new(http: Client, api_key: impl Into<String>, settings: AssistantSettings) -> Self {
        Self {
            http,
            api_key: api_key.into(),
            settings,
            endpoint: OPENAI_CHAT_URL.to_string(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn settings(&self) -> &AssistantSettings {
        &self.settings
    }
}

#[async_trait]
impl Assistant for OpenAiChatClient {
    async fn respond(&self, history: &[HistoryEntry], text: &str) -> Result<String, ClientError> {
        let payload = build_chat_payload(&self.settings, history, text);

        let response = self
            .http
            .post(self.endpoint.as_str())
            .bearer_auth(self.api_key.as_str())
            .json(&payload)
            .send()
            .await
            .map_err(|err| ClientError::transport(SERVICE, err))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Status {
                service: SERVICE,
                status: status.as_u16(),
                body: clip_body(body),
            });
        }

        let body: Value = response.json().await.map_err(|err| ClientError::Decode {
            service: SERVICE,
            message: err.to_string(),
        })?;
        extract_reply_text(&body).ok_or(ClientError::Decode {
            service: SERVICE,
            message: "reply text missing".to_string(),
        })
    }
}

pub fn system_instruction(reply_language: &str) -> String {
    format!(
        "You are a friendly, supportive chatbot that helps users. Keep answers short and kind. Always reply in {}.",
        reply_language
    )
}

pub fn build_chat_payload(settings: &AssistantSettings, history: &[HistoryEntry], text: &str) -> Value {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(json!({
        "role": "system",
        "content": system_instruction(&settings.reply_language),
    }));
    for entry in history {
        messages.push(json!({
            "role": entry.role.as_str(),
            "content": entry.content,
        }));
    }
    messages.push(json!({
        "role": "user",
        "content": text,
    }));

    json!({
        "model": settings.model,
        "messages": messages,
        "max_tokens": settings.max_tokens,
    })
}

pub fn extract_reply_text(payload: &Value) -> Option<String> {
    payload
        .get("choices")?
        .as_array()?
        .first()?
        .get("message")?
        .get("content")?
        .as_str()
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(ToString::to_string)
}
