use reqwest::Client;
use shared::{
    domain::{ChatMessage, MessageId, ParticipantRole, Session, SessionId, SessionSummary},
    protocol::{
        AckResponse, CreateSessionRequest, EditMessageRequest, JoinSessionRequest,
        MessageResponse, MessagesResponse, PostMessageRequest, SessionResponse, SessionsResponse,
    },
};

use crate::error::SyncError;

/// Request/response channel client: the polling source and the fallback path
/// for outbound actions when the push channel is down.
pub struct RestClient {
    http: Client,
    base_url: String,
}

impl RestClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            http: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub async fn list_sessions(&self) -> Result<Vec<SessionSummary>, SyncError> {
        let body: SessionsResponse = self
            .http
            .get(format!("{}/sessions", self.base_url))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        ensure_success(body.success, body.error)?;
        Ok(body.sessions)
    }

    pub async fn search_sessions(&self, query: &str) -> Result<Vec<SessionSummary>, SyncError> {
        let body: SessionsResponse = self
            .http
            .get(format!("{}/search", self.base_url))
            .query(&[("q", query)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        ensure_success(body.success, body.error)?;
        Ok(body.sessions)
    }

    pub async fn create_session(
        &self,
        request: &CreateSessionRequest,
    ) -> Result<Session, SyncError> {
        let body: SessionResponse = self
            .http
            .post(format!("{}/sessions", self.base_url))
            .json(request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        ensure_success(body.success, body.error)?;
        body.session
            .ok_or_else(|| SyncError::Api("create response missing session".to_string()))
    }

    /// Session detail, participants included.
    pub async fn fetch_session(&self, id: &SessionId) -> Result<Session, SyncError> {
        let body: SessionResponse = self
            .http
            .get(format!("{}/sessions/{id}", self.base_url))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        ensure_success(body.success, body.error)?;
        body.session
            .ok_or_else(|| SyncError::Api("detail response missing session".to_string()))
    }

    pub async fn join_session(
        &self,
        id: &SessionId,
        role: ParticipantRole,
    ) -> Result<(), SyncError> {
        let body: AckResponse = self
            .http
            .post(format!("{}/sessions/{id}/join", self.base_url))
            .json(&JoinSessionRequest { role })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        ensure_success(body.success, body.error)
    }

    pub async fn leave_session(&self, id: &SessionId) -> Result<(), SyncError> {
        let body: AckResponse = self
            .http
            .post(format!("{}/sessions/{id}/leave", self.base_url))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        ensure_success(body.success, body.error)
    }

    pub async fn fetch_messages(&self, id: &SessionId) -> Result<Vec<ChatMessage>, SyncError> {
        let body: MessagesResponse = self
            .http
            .get(format!("{}/sessions/{id}/messages", self.base_url))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        ensure_success(body.success, body.error)?;
        Ok(body.messages)
    }

    pub async fn post_message(
        &self,
        id: &SessionId,
        request: &PostMessageRequest,
    ) -> Result<Option<ChatMessage>, SyncError> {
        let body: MessageResponse = self
            .http
            .post(format!("{}/sessions/{id}/messages", self.base_url))
            .json(request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        ensure_success(body.success, body.error)?;
        Ok(body.message)
    }

    pub async fn edit_message(
        &self,
        id: &SessionId,
        message_id: &MessageId,
        content: &str,
    ) -> Result<(), SyncError> {
        let body: AckResponse = self
            .http
            .put(format!("{}/sessions/{id}/messages/{message_id}", self.base_url))
            .json(&EditMessageRequest {
                content: content.to_string(),
            })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        ensure_success(body.success, body.error)
    }

    pub async fn delete_message(
        &self,
        id: &SessionId,
        message_id: &MessageId,
    ) -> Result<(), SyncError> {
        let body: AckResponse = self
            .http
            .delete(format!("{}/sessions/{id}/messages/{message_id}", self.base_url))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        ensure_success(body.success, body.error)
    }
}

fn ensure_success(success: bool, error: Option<String>) -> Result<(), SyncError> {
    if success {
        Ok(())
    } else {
        Err(SyncError::Api(
            error.unwrap_or_else(|| "request failed".to_string()),
        ))
    }
}

#[cfg(test)]
#[path = "tests/rest_tests.rs"]
mod tests;
