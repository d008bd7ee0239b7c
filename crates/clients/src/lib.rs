mod error;
pub mod line;
pub mod llm;
pub mod records;

use std::time::Duration;

use async_trait::async_trait;
use relay_core::{HistoryEntry, LookupRecord};
use reqwest::Client;

pub use error::ClientError;
pub use line::{DeliveryOutcome, LineMessagingClient, ReplyGateway};
pub use llm::{Assistant, AssistantSettings, OpenAiChatClient};
pub use records::{HttpRecordStore, RecordStore};

pub fn build_http_client(timeout: Duration) -> Result<Client, ClientError> {
    Client::builder()
        .connect_timeout(Duration::from_secs(5).min(timeout))
        .timeout(timeout)
        .build()
        .map_err(|err| ClientError::Transport {
            service: "http_client",
            message: err.to_string(),
        })
}

#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineAssistant;

#[async_trait]
impl Assistant for OfflineAssistant {
    async fn respond(&self, _history: &[HistoryEntry], _text: &str) -> Result<String, ClientError> {
        Err(ClientError::Disabled("language model"))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineRecordStore;

#[async_trait]
impl RecordStore for OfflineRecordStore {
    async fn find_by_name(&self, _name: &str) -> Result<Vec<LookupRecord>, ClientError> {
        Err(ClientError::Disabled("record store"))
    }

    async fn log_message(&self, _user_id: &str, _text: &str) -> Result<(), ClientError> {
        Ok(())
    }
}
