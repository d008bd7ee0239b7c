use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::script::{FormCard, Prompt};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventMode {
    #[default]
    Active,
    Standby,
}

impl EventMode {
    pub fn from_optional_str(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_lowercase()) {
            Some(v) if v == "standby" => Self::Standby,
            _ => Self::Active,
        }
    }
}

/// Single-use token authorizing one reply to one inbound event.
///
/// Not `Clone`: delivering a reply consumes the handle.
#[derive(Debug, PartialEq, Eq)]
pub struct ReplyHandle(String);

impl ReplyHandle {
    pub fn new(token: impl Into<String>) -> Option<Self> {
        let token = token.into();
        if token.trim().is_empty() {
            None
        } else {
            Some(Self(token))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug)]
pub struct InboundEvent {
    pub event_id: String,
    pub reply_handle: Option<ReplyHandle>,
    pub user_id: Option<String>,
    pub text: Option<String>,
    pub mode: EventMode,
    pub redelivery: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Standby,
    EmptyText,
    MissingReplyHandle,
    MissingSender,
}

impl SkipReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Standby => "standby",
            Self::EmptyText => "empty_text",
            Self::MissingReplyHandle => "missing_reply_handle",
            Self::MissingSender => "missing_sender",
        }
    }
}

#[derive(Debug)]
pub struct RoutableEvent {
    pub event_id: String,
    pub reply_handle: ReplyHandle,
    pub user_id: String,
    pub text: String,
    pub redelivery: bool,
}

impl InboundEvent {
    pub fn into_routable(self) -> Result<RoutableEvent, SkipReason> {
        if self.mode == EventMode::Standby {
            return Err(SkipReason::Standby);
        }

        let text = self
            .text
            .map(|text| text.trim().to_string())
            .filter(|text| !crate::intent::normalize_text(text).is_empty())
            .ok_or(SkipReason::EmptyText)?;
        let reply_handle = self.reply_handle.ok_or(SkipReason::MissingReplyHandle)?;
        let user_id = self
            .user_id
            .filter(|id| !id.trim().is_empty())
            .ok_or(SkipReason::MissingSender)?;

        Ok(RoutableEvent {
            event_id: self.event_id,
            reply_handle,
            user_id,
            text,
            redelivery: self.redelivery,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSession {
    pub user_id: String,
    pub topic: Option<String>,
    pub step: usize,
    pub history: VecDeque<HistoryEntry>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl UserSession {
    pub fn new(user_id: impl Into<String>, idle: Duration) -> Self {
        let now = Utc::now();
        Self {
            user_id: user_id.into(),
            topic: None,
            step: 0,
            history: VecDeque::new(),
            updated_at: now,
            expires_at: now + idle,
        }
    }

    pub fn active_topic(&self) -> Option<&str> {
        self.topic.as_deref()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn touch(&mut self, idle: Duration) {
        let now = Utc::now();
        self.updated_at = now;
        self.expires_at = now + idle;
    }

    pub fn push_history(&mut self, entry: HistoryEntry, limit: usize) {
        self.history.push_back(entry);
        while self.history.len() > limit {
            self.history.pop_front();
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CardAction {
    Message(String),
    Uri(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardButton {
    pub label: String,
    pub action: CardAction,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardLayout {
    pub title: String,
    pub body: Option<String>,
    pub buttons: Vec<CardButton>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMessage {
    PlainText(String),
    Card(CardLayout),
}

impl OutboundMessage {
    pub fn is_empty(&self) -> bool {
        match self {
            Self::PlainText(text) => text.trim().is_empty(),
            Self::Card(card) => card.title.trim().is_empty() && card.buttons.is_empty(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::PlainText(_) => "text",
            Self::Card(_) => "card",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LookupRecord {
    #[serde(alias = "type", alias = "tag")]
    pub category: String,
    #[serde(default, deserialize_with = "lenient_score")]
    pub score: Option<f64>,
    #[serde(default, alias = "timestamp", alias = "date")]
    pub recorded_at: Option<String>,
    #[serde(default, flatten)]
    pub fields: BTreeMap<String, Value>,
}

fn lenient_score<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(number)) => number.as_f64(),
        Some(Value::String(text)) => text.trim().parse::<f64>().ok(),
        _ => None,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    ContinueDialogue { topic: String, answer: String },
    StartTopic { topic: String, restart: bool },
    FormLinks,
    Lookup { name: String },
    Assistant { text: String },
}

impl Route {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ContinueDialogue { .. } => "continue_dialogue",
            Self::StartTopic { .. } => "start_topic",
            Self::FormLinks => "form_links",
            Self::Lookup { .. } => "lookup",
            Self::Assistant { .. } => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Prompt {
        topic: String,
        step: usize,
        prompt: Prompt,
    },
    Closing {
        topic: String,
        text: String,
    },
    FormLinks(FormCard),
    LookupReport {
        name: String,
        records: Vec<LookupRecord>,
    },
    Assistant(String),
    Help {
        triggers: Vec<String>,
    },
    Unavailable,
}
