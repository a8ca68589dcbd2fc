use std::sync::Arc;

use shared::{
    domain::{ChatMessage, MessageId, Participant, SessionId, SessionSummary},
    protocol::ServerEvent,
};
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{debug, warn};

use crate::{
    events::{EngineEvent, Notifier},
    store::SessionStore,
};

/// Merges inbound events from either delivery channel into the session
/// store.
///
/// Two channels can deliver the same logical event, and neither guarantees
/// ordering relative to the other, so every mutation here is idempotent.
/// This is the single chokepoint enforcing that; the store itself stays a
/// plain container.
pub struct Reconciler {
    store: Arc<Mutex<SessionStore>>,
    events: broadcast::Sender<EngineEvent>,
    notifier: Arc<dyn Notifier>,
    local_user: RwLock<Option<String>>,
}

impl Reconciler {
    pub fn new(
        store: Arc<Mutex<SessionStore>>,
        events: broadcast::Sender<EngineEvent>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            events,
            notifier,
            local_user: RwLock::new(None),
        }
    }

    pub async fn set_local_user(&self, username: Option<String>) {
        *self.local_user.write().await = username;
    }

    /// Routes one push-channel event into the store. Total over the closed
    /// event set; unknown types never reach this point (they fail to decode
    /// and are dropped by the connection reader).
    pub async fn apply(&self, event: ServerEvent) {
        match event {
            ServerEvent::NewMessage { message } => self.on_new_message(message).await,
            // Sender echo: same idempotent merge, never a notification.
            ServerEvent::MessageSent { message } => self.merge_message(message, false).await,
            ServerEvent::MessageUpdated { message } => self.on_message_edited(message).await,
            ServerEvent::MessageDeleted {
                session_id,
                message_id,
            } => self.on_message_deleted(&session_id, &message_id).await,
            ServerEvent::UserJoined {
                session_id,
                participant,
            } => self.on_participant_joined(&session_id, participant).await,
            ServerEvent::UserLeft {
                session_id,
                participant,
            } => self.on_participant_left(&session_id, &participant).await,
            ServerEvent::SessionUpdated { session } => self.on_session_updated(session).await,
            ServerEvent::ParticipantsUpdated {
                session_id,
                participants,
            } => {
                self.on_participants_snapshot(&session_id, participants)
                    .await
            }
            ServerEvent::Error { error } => {
                warn!(code = ?error.code, message = %error.message, "authority reported error");
                let _ = self.events.send(EngineEvent::ServerError(error));
            }
        }
    }

    pub async fn on_new_message(&self, message: ChatMessage) {
        self.merge_message(message, true).await;
    }

    async fn merge_message(&self, message: ChatMessage, notify: bool) {
        {
            let mut store = self.store.lock().await;
            if !session_matches(&store, &message.session_id) {
                debug!(session_id = %message.session_id, "dropping message for inactive session");
                return;
            }
            if store.contains_message(&message.id) {
                // Same event seen via the other channel already.
                return;
            }
            store.upsert_message(message.clone());
        }

        if notify && !self.is_local_user(&message.username).await {
            self.notifier.message_received(&message);
        }
        let _ = self.events.send(EngineEvent::MessageAdded(message));
    }

    /// Unknown ids are dropped silently: the message may not have arrived
    /// yet, or was already deleted. The next poll corrects either way.
    pub async fn on_message_edited(&self, message: ChatMessage) {
        let applied = {
            let mut store = self.store.lock().await;
            if !session_matches(&store, &message.session_id) {
                return;
            }
            if store.contains_message(&message.id) {
                store.upsert_message(message.clone());
                true
            } else {
                false
            }
        };
        if applied {
            let _ = self.events.send(EngineEvent::MessageEdited(message));
        }
    }

    pub async fn on_message_deleted(&self, session_id: &SessionId, message_id: &MessageId) {
        let removed = {
            let mut store = self.store.lock().await;
            session_matches(&store, session_id) && store.remove_message(message_id)
        };
        if removed {
            let _ = self
                .events
                .send(EngineEvent::MessageRemoved(message_id.clone()));
        }
    }

    pub async fn on_participant_joined(&self, session_id: &SessionId, participant: Participant) {
        let inserted = {
            let mut store = self.store.lock().await;
            if !session_matches(&store, session_id) {
                return;
            }
            match store.session_mut() {
                Some(session) if !session.participants.iter().any(|p| p.id == participant.id) => {
                    session.participants.push(participant.clone());
                    true
                }
                _ => false,
            }
        };
        if inserted {
            let _ = self
                .events
                .send(EngineEvent::ParticipantJoined(participant));
        }
    }

    pub async fn on_participant_left(&self, session_id: &SessionId, participant: &Participant) {
        let removed = {
            let mut store = self.store.lock().await;
            if !session_matches(&store, session_id) {
                return;
            }
            match store.session_mut() {
                Some(session) => {
                    let before = session.participants.len();
                    session.participants.retain(|p| p.id != participant.id);
                    session.participants.len() != before
                }
                None => false,
            }
        };
        if removed {
            let _ = self
                .events
                .send(EngineEvent::ParticipantLeft(participant.clone()));
        }
    }

    /// Authoritative roster snapshot: overrides any local drift accumulated
    /// from missed deltas.
    pub async fn on_participants_snapshot(
        &self,
        session_id: &SessionId,
        participants: Vec<Participant>,
    ) {
        {
            let mut store = self.store.lock().await;
            if !session_matches(&store, session_id) {
                return;
            }
            store.replace_participants(participants.clone());
        }
        let _ = self
            .events
            .send(EngineEvent::ParticipantsReplaced(participants));
    }

    /// Metadata only; the roster and the message log have their own events.
    pub async fn on_session_updated(&self, summary: SessionSummary) {
        let applied = {
            let mut store = self.store.lock().await;
            if !session_matches(&store, &summary.id) {
                return;
            }
            match store.session_mut() {
                Some(session) => {
                    session.apply_summary(summary.clone());
                    true
                }
                None => false,
            }
        };
        if applied {
            let _ = self.events.send(EngineEvent::SessionChanged(summary));
        }
    }

    /// Merges a polled message snapshot. Unseen messages are inserted in
    /// timestamp order so a batch of repaired deliveries lands with ties
    /// broken by timestamp ascending.
    pub async fn on_messages_snapshot(
        &self,
        session_id: &SessionId,
        messages: Vec<ChatMessage>,
    ) {
        self.merge_snapshot(session_id, messages, true).await;
    }

    /// Merges the history fetched while joining. History predates the join,
    /// so it loads silently; only messages first seen after the join notify.
    pub async fn on_messages_bootstrap(
        &self,
        session_id: &SessionId,
        messages: Vec<ChatMessage>,
    ) {
        self.merge_snapshot(session_id, messages, false).await;
    }

    async fn merge_snapshot(
        &self,
        session_id: &SessionId,
        mut messages: Vec<ChatMessage>,
        notify: bool,
    ) {
        messages.sort_by_key(|message| message.timestamp);
        for message in messages {
            if &message.session_id != session_id {
                continue;
            }
            self.merge_message(message, notify).await;
        }
    }

    async fn is_local_user(&self, username: &str) -> bool {
        self.local_user.read().await.as_deref() == Some(username)
    }
}

fn session_matches(store: &SessionStore, session_id: &SessionId) -> bool {
    store.session_id() == Some(session_id)
}

#[cfg(test)]
#[path = "tests/reconcile_tests.rs"]
mod tests;
