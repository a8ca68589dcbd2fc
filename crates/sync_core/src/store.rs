use shared::domain::{ChatMessage, MessageId, Participant, Session, SessionId};

/// In-memory source of truth for the active session, its participant roster,
/// and the ordered message log.
///
/// The store is a plain container: mutators are total and synchronous, and
/// validation (dedup, session scoping) happens upstream in the reconciler.
/// The log keeps arrival-merge order; no two messages share an id.
#[derive(Debug, Default)]
pub struct SessionStore {
    session: Option<Session>,
    messages: Vec<ChatMessage>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_session(&mut self, session: Session) {
        self.session = Some(session);
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn session_mut(&mut self) -> Option<&mut Session> {
        self.session.as_mut()
    }

    pub fn session_id(&self) -> Option<&SessionId> {
        self.session.as_ref().map(|session| &session.id)
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn contains_message(&self, id: &MessageId) -> bool {
        self.messages.iter().any(|message| &message.id == id)
    }

    /// Appends the message, or replaces the stored copy in place when the id
    /// is already present (edits keep their log position).
    pub fn upsert_message(&mut self, message: ChatMessage) {
        match self.messages.iter_mut().find(|m| m.id == message.id) {
            Some(existing) => *existing = message,
            None => self.messages.push(message),
        }
    }

    pub fn remove_message(&mut self, id: &MessageId) -> bool {
        let before = self.messages.len();
        self.messages.retain(|message| &message.id != id);
        self.messages.len() != before
    }

    pub fn replace_participants(&mut self, participants: Vec<Participant>) {
        if let Some(session) = self.session.as_mut() {
            session.participants = participants;
        }
    }

    /// Ends the session: resets everything. Must run before joining a
    /// different session so stale messages cannot leak into the new view.
    pub fn clear(&mut self) {
        self.session = None;
        self.messages.clear();
    }
}

#[cfg(test)]
#[path = "tests/store_tests.rs"]
mod tests;
