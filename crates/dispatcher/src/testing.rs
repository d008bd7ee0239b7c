use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use relay_clients::{Assistant, ClientError, DeliveryOutcome, RecordStore, ReplyGateway};
use relay_core::{
    EventMode, HistoryEntry, InboundEvent, LookupRecord, OutboundMessage, ReplyHandle,
};

pub fn text_event(event_id: &str, user_id: &str, text: &str) -> InboundEvent {
    InboundEvent {
        event_id: event_id.to_string(),
        reply_handle: ReplyHandle::new(format!("reply-{}", event_id)),
        user_id: Some(user_id.to_string()),
        text: Some(text.to_string()),
        mode: EventMode::Active,
        redelivery: false,
    }
}

#[derive(Debug, Default)]
pub struct RecordingGateway {
    replies: Mutex<Vec<(String, OutboundMessage)>>,
    pushes: Mutex<Vec<(String, OutboundMessage)>>,
    reject_handles: AtomicBool,
}

impl RecordingGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reject_handles(&self) {
        self.reject_handles.store(true, Ordering::SeqCst);
    }

    pub fn replies(&self) -> Vec<(String, OutboundMessage)> {
        self.replies.lock().clone()
    }

    pub fn pushes(&self) -> Vec<(String, OutboundMessage)> {
        self.pushes.lock().clone()
    }

    pub fn last_reply(&self) -> Option<OutboundMessage> {
        self.replies.lock().last().map(|(_, message)| message.clone())
    }
}

#[async_trait]
impl ReplyGateway for RecordingGateway {
    async fn deliver(
        &self,
        handle: ReplyHandle,
        message: OutboundMessage,
    ) -> Result<DeliveryOutcome, ClientError> {
        if message.is_empty() {
            return Ok(DeliveryOutcome::Skipped);
        }
        if self.reject_handles.load(Ordering::SeqCst) {
            return Err(ClientError::InvalidHandle(handle.as_str().to_string()));
        }
        self.replies
            .lock()
            .push((handle.as_str().to_string(), message));
        Ok(DeliveryOutcome::Sent)
    }

    async fn push(
        &self,
        user_id: &str,
        message: OutboundMessage,
    ) -> Result<DeliveryOutcome, ClientError> {
        self.pushes.lock().push((user_id.to_string(), message));
        Ok(DeliveryOutcome::Sent)
    }
}

#[derive(Debug)]
enum AssistantBehaviour {
    Answer(String),
    Fail,
    Stall(Duration),
}

#[derive(Debug)]
pub struct ScriptedAssistant {
    behaviour: AssistantBehaviour,
    calls: Mutex<Vec<(Vec<HistoryEntry>, String)>>,
}

impl ScriptedAssistant {
    pub fn answering(text: impl Into<String>) -> Self {
        Self::with(AssistantBehaviour::Answer(text.into()))
    }

    pub fn failing() -> Self {
        Self::with(AssistantBehaviour::Fail)
    }

    pub fn stalling(delay: Duration) -> Self {
        Self::with(AssistantBehaviour::Stall(delay))
    }

    fn with(behaviour: AssistantBehaviour) -> Self {
        Self {
            behaviour,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<(Vec<HistoryEntry>, String)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl Assistant for ScriptedAssistant {
    async fn respond(&self, history: &[HistoryEntry], text: &str) -> Result<String, ClientError> {
        self.calls.lock().push((history.to_vec(), text.to_string()));
        match &self.behaviour {
            AssistantBehaviour::Answer(answer) => Ok(answer.clone()),
            AssistantBehaviour::Fail => Err(ClientError::Status {
                service: "openai",
                status: 503,
                body: "unavailable".to_string(),
            }),
            AssistantBehaviour::Stall(delay) => {
                tokio::time::sleep(*delay).await;
                Ok("too late".to_string())
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct StaticRecordStore {
    by_name: HashMap<String, Vec<LookupRecord>>,
    logged: Mutex<Vec<(String, String)>>,
    failing: bool,
}

impl StaticRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub fn with_records(mut self, name: &str, records: Vec<LookupRecord>) -> Self {
        self.by_name.insert(name.to_lowercase(), records);
        self
    }

    pub fn logged(&self) -> Vec<(String, String)> {
        self.logged.lock().clone()
    }
}

#[async_trait]
impl RecordStore for StaticRecordStore {
    async fn find_by_name(&self, name: &str) -> Result<Vec<LookupRecord>, ClientError> {
        if self.failing {
            return Err(ClientError::Transport {
                service: "record_store",
                message: "connection refused".to_string(),
            });
        }
        Ok(self
            .by_name
            .get(&name.to_lowercase())
            .cloned()
            .unwrap_or_default())
    }

    async fn log_message(&self, user_id: &str, text: &str) -> Result<(), ClientError> {
        self.logged
            .lock()
            .push((user_id.to_string(), text.to_string()));
        Ok(())
    }
}
