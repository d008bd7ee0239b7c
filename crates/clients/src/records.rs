use async_trait::async_trait;
use relay_core::LookupRecord;
use reqwest::Client;
use serde::Deserialize;
use url::Url;

use crate::error::{clip_body, ClientError};

const SERVICE: &str = "record_store";

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn find_by_name(&self, name: &str) -> Result<Vec<LookupRecord>, ClientError>;
    async fn log_message(&self, user_id: &str, text: &str) -> Result<(), ClientError>;
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RecordsEnvelope {
    Bare(Vec<LookupRecord>),
    Wrapped { records: Vec<LookupRecord> },
}

impl RecordsEnvelope {
    fn into_records(self) -> Vec<LookupRecord> {
        match self {
            Self::Bare(records) | Self::Wrapped { records } => records,
        }
    }
}

#[derive(Clone)]
pub struct HttpRecordStore {
    http: Client,
    endpoint: Url,
}

impl HttpRecordStore {
    pub fn new(http: Client, endpoint: Url) -> Self {
        Self { http, endpoint }
    }

    pub fn lookup_url(&self, name: &str) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut().append_pair("name", name);
        url
    }
}

#[async_trait]
impl RecordStore for HttpRecordStore {
    async fn find_by_name(&self, name: &str) -> Result<Vec<LookupRecord>, ClientError> {
        let response = self
            .http
            .get(self.lookup_url(name))
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

        let body = response
            .text()
            .await
            .map_err(|err| ClientError::transport(SERVICE, err))?;
        parse_records(&body)
    }

    async fn log_message(&self, user_id: &str, text: &str) -> Result<(), ClientError> {
        let response = self
            .http
            .post(self.endpoint.clone())
            .form(&[("user_id", user_id), ("message", text)])
            .send()
            .await
            .map_err(|err| ClientError::transport(SERVICE, err))?;

        let status = response.status();
        if status.is_success() || status.is_redirection() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(ClientError::Status {
                service: SERVICE,
                status: status.as_u16(),
                body: clip_body(body),
            })
        }
    }
}

pub fn parse_records(body: &str) -> Result<Vec<LookupRecord>, ClientError> {
    if body.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str::<RecordsEnvelope>(body)
        .map(RecordsEnvelope::into_records)
        .map_err(|err| ClientError::Decode {
            service: SERVICE,
            message: err.to_string(),
        })
}
