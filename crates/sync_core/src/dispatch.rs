use std::sync::Arc;

use chrono::Utc;
use shared::{
    domain::{MessageId, MessageKind, ParticipantRole, SessionId},
    protocol::{ClientIntent, PostMessageRequest},
};
use tracing::warn;

use crate::{connection::ConnectionManager, error::SyncError, rest::RestClient};

/// Transient user intent, consumed immediately; never persisted.
#[derive(Debug, Clone)]
pub enum OutboundAction {
    Join {
        session_id: SessionId,
        username: String,
        role: ParticipantRole,
    },
    Leave {
        session_id: SessionId,
    },
    Send {
        session_id: SessionId,
        content: String,
    },
    Edit {
        session_id: SessionId,
        message_id: MessageId,
        content: String,
    },
    Delete {
        session_id: SessionId,
        message_id: MessageId,
    },
}

impl OutboundAction {
    /// Push-channel encoding, where one exists. Edit and delete are
    /// REST-only.
    fn push_intent(&self) -> Option<ClientIntent> {
        match self {
            OutboundAction::Join {
                session_id,
                username,
                ..
            } => Some(ClientIntent::JoinSession {
                session_id: session_id.clone(),
                username: username.clone(),
            }),
            OutboundAction::Leave { session_id } => Some(ClientIntent::LeaveSession {
                session_id: session_id.clone(),
            }),
            OutboundAction::Send {
                session_id,
                content,
            } => Some(ClientIntent::SendMessage {
                session_id: session_id.clone(),
                message: content.clone(),
            }),
            OutboundAction::Edit { .. } | OutboundAction::Delete { .. } => None,
        }
    }
}

/// Which channel carried a dispatched action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchRoute {
    Push,
    Fallback,
}

/// Routes each outbound action to the push channel when it is open,
/// otherwise to the request/response channel. Channel choice is exclusive
/// and decided at call time; a successful dispatch never touches the store —
/// the log only changes once the corresponding inbound event reconciles.
pub struct Dispatcher {
    connection: Arc<ConnectionManager>,
    rest: Arc<RestClient>,
}

impl Dispatcher {
    pub fn new(connection: Arc<ConnectionManager>, rest: Arc<RestClient>) -> Self {
        Self { connection, rest }
    }

    pub async fn dispatch(&self, action: OutboundAction) -> Result<DispatchRoute, SyncError> {
        validate(&action)?;

        if self.connection.is_connected().await {
            if let Some(intent) = action.push_intent() {
                match self.connection.send_intent(&intent).await {
                    Ok(()) => return Ok(DispatchRoute::Push),
                    Err(err) => {
                        warn!(error = %err, "push send failed; taking http fallback");
                    }
                }
            }
        }

        self.send_fallback(&action).await?;
        Ok(DispatchRoute::Fallback)
    }

    async fn send_fallback(&self, action: &OutboundAction) -> Result<(), SyncError> {
        match action {
            OutboundAction::Join {
                session_id, role, ..
            } => self.rest.join_session(session_id, *role).await,
            OutboundAction::Leave { session_id } => self.rest.leave_session(session_id).await,
            OutboundAction::Send {
                session_id,
                content,
            } => {
                self.rest
                    .post_message(
                        session_id,
                        &PostMessageRequest {
                            content: content.clone(),
                            kind: MessageKind::Text,
                            timestamp: Utc::now(),
                        },
                    )
                    .await?;
                Ok(())
            }
            OutboundAction::Edit {
                session_id,
                message_id,
                content,
            } => self.rest.edit_message(session_id, message_id, content).await,
            OutboundAction::Delete {
                session_id,
                message_id,
            } => self.rest.delete_message(session_id, message_id).await,
        }
    }
}

fn validate(action: &OutboundAction) -> Result<(), SyncError> {
    match action {
        OutboundAction::Send { content, .. } | OutboundAction::Edit { content, .. } => {
            if content.trim().is_empty() {
                return Err(SyncError::EmptyContent);
            }
        }
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
#[path = "tests/dispatch_tests.rs"]
mod tests;
