use shared::{
    domain::{ChatMessage, MessageId, Participant, SessionSummary},
    error::ApiError,
};

use crate::connection::ConnectionState;

/// Typed domain events emitted by the engine. The presentation layer
/// subscribes via [`crate::SyncEngine::subscribe`] and owns all rendering.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    MessageAdded(ChatMessage),
    MessageEdited(ChatMessage),
    MessageRemoved(MessageId),
    ParticipantJoined(Participant),
    ParticipantLeft(Participant),
    ParticipantsReplaced(Vec<Participant>),
    SessionChanged(SessionSummary),
    ConnectionStateChanged(ConnectionState),
    /// Terminal failure: the reconnect budget is spent and no further
    /// automatic retries will be made.
    ReconnectExhausted { attempts: u32 },
    ServerError(ApiError),
}

/// Optional notification capability, injected at engine construction.
/// Invoked for messages authored by someone other than the local user.
pub trait Notifier: Send + Sync {
    fn message_received(&self, message: &ChatMessage);
}

pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn message_received(&self, _message: &ChatMessage) {}
}
