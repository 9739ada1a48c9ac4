use std::time::Duration;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

use crate::error::{BackendError, BackendResult};
use crate::types::{
    ChatReply, ChatRequest, LeadReply, LeadRequest, TrackEvent, VisitorLookupRequest,
    VisitorRecord,
};

const SUCCESS: &str = "success";

/// The four endpoints the widget talks to.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn chat(&self, request: &ChatRequest) -> BackendResult<ChatReply>;

    async fn lead(&self, request: &LeadRequest) -> BackendResult<LeadReply>;

    async fn lookup_visitor(&self, visitor_id: &str) -> BackendResult<VisitorRecord>;

    /// Fire-and-forget analytics; callers only log failures.
    async fn track(&self, event: &TrackEvent) -> BackendResult<()>;
}

#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>) -> BackendResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(BackendError::http)?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post<B, T>(&self, path: &str, body: &B) -> BackendResult<T>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        debug!(%url, "posting to backend");
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(BackendError::http)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let text = response.text().await.map_err(BackendError::http)?;
        serde_json::from_str(&text).map_err(|err| BackendError::Malformed(err.to_string()))
    }
}

fn ensure_success(status: &str) -> BackendResult<()> {
    if status == SUCCESS {
        Ok(())
    } else {
        Err(BackendError::Rejected(status.to_string()))
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn chat(&self, request: &ChatRequest) -> BackendResult<ChatReply> {
        let reply: ChatReply = self.post("/api/chat", request).await?;
        ensure_success(&reply.status)?;
        let has_text = reply
            .response
            .as_deref()
            .is_some_and(|text| !text.trim().is_empty());
        if !has_text {
            return Err(BackendError::Malformed("chat reply had no response text".into()));
        }
        Ok(reply)
    }

    async fn lead(&self, request: &LeadRequest) -> BackendResult<LeadReply> {
        let reply: LeadReply = self.post("/api/lead", request).await?;
        ensure_success(&reply.status)?;
        Ok(reply)
    }

    async fn lookup_visitor(&self, visitor_id: &str) -> BackendResult<VisitorRecord> {
        let request = VisitorLookupRequest {
            visitor_id: visitor_id.to_string(),
        };
        let record: VisitorRecord = self.post("/api/visitor/lookup", &request).await?;
        ensure_success(&record.status)?;
        Ok(record)
    }

    async fn track(&self, event: &TrackEvent) -> BackendResult<()> {
        let url = format!("{}/api/track", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(event)
            .send()
            .await
            .map_err(BackendError::http)?;
        if !response.status().is_success() {
            return Err(BackendError::Status {
                status: response.status().as_u16(),
                body: String::new(),
            });
        }
        Ok(())
    }
}
