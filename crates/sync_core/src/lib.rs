//! Client-side synchronization core for shared collaboration sessions.
//!
//! Keeps a local view of a session (participants and an ordered message log)
//! consistent with a remote authority over two independent channels: a
//! websocket push channel and a polling REST fallback. Out-of-order and
//! duplicate deliveries are reconciled idempotently; a dropped push channel
//! is recovered with bounded exponential backoff; outbound actions fall back
//! to REST whenever the push channel is unavailable.

use std::sync::Arc;

use shared::{
    domain::{ChatMessage, MessageId, ParticipantRole, Session, SessionId, SessionSummary},
    protocol::CreateSessionRequest,
};
use tokio::sync::{broadcast, Mutex};

pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod poller;
pub mod reconcile;
pub mod rest;
pub mod store;
pub mod transport;

pub use config::SyncConfig;
pub use connection::{ConnectionState, PushConnector, PushFrame, PushLink, PushSession};
pub use dispatch::{DispatchRoute, OutboundAction};
pub use error::SyncError;
pub use events::{EngineEvent, NoopNotifier, Notifier};

use connection::{ConnectionManager, JoinContext};
use dispatch::Dispatcher;
use poller::PollingScheduler;
use reconcile::Reconciler;
use rest::RestClient;
use store::SessionStore;
use transport::{push_url_from_server_url, WsConnector};

/// The engine: one instance per client, constructed explicitly and disposed
/// with [`SyncEngine::shutdown`]. The presentation layer holds the `Arc`,
/// issues actions through the methods below, and observes changes through
/// [`SyncEngine::subscribe`].
pub struct SyncEngine {
    config: SyncConfig,
    rest: Arc<RestClient>,
    store: Arc<Mutex<SessionStore>>,
    reconciler: Arc<Reconciler>,
    connection: Arc<ConnectionManager>,
    dispatcher: Dispatcher,
    poller: Mutex<Option<PollingScheduler>>,
    events: broadcast::Sender<EngineEvent>,
}

impl SyncEngine {
    pub fn new(config: SyncConfig) -> Result<Arc<Self>, SyncError> {
        Self::with_dependencies(config, Arc::new(WsConnector), Arc::new(NoopNotifier))
    }

    pub fn with_notifier(
        config: SyncConfig,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Arc<Self>, SyncError> {
        Self::with_dependencies(config, Arc::new(WsConnector), notifier)
    }

    pub fn with_dependencies(
        config: SyncConfig,
        connector: Arc<dyn PushConnector>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Arc<Self>, SyncError> {
        let push_url = push_url_from_server_url(&config.server_url)?;
        let (events, _) = broadcast::channel(1024);
        let store = Arc::new(Mutex::new(SessionStore::new()));
        let reconciler = Arc::new(Reconciler::new(
            Arc::clone(&store),
            events.clone(),
            notifier,
        ));
        let connection = ConnectionManager::new(
            connector,
            push_url,
            &config,
            Arc::clone(&reconciler),
            events.clone(),
        );
        let rest = Arc::new(RestClient::new(config.server_url.clone()));
        let dispatcher = Dispatcher::new(Arc::clone(&connection), Arc::clone(&rest));
        Ok(Arc::new(Self {
            config,
            rest,
            store,
            reconciler,
            connection,
            dispatcher,
            poller: Mutex::new(None),
            events,
        }))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub async fn connection_state(&self) -> ConnectionState {
        self.connection.state().await
    }

    pub async fn session(&self) -> Option<Session> {
        self.store.lock().await.session().cloned()
    }

    pub async fn messages(&self) -> Vec<ChatMessage> {
        self.store.lock().await.messages().to_vec()
    }

    pub async fn list_sessions(&self) -> Result<Vec<SessionSummary>, SyncError> {
        self.rest.list_sessions().await
    }

    pub async fn search_sessions(&self, query: &str) -> Result<Vec<SessionSummary>, SyncError> {
        self.rest.search_sessions(query).await
    }

    /// Creates a session on the authority and joins it.
    pub async fn create_session(
        self: &Arc<Self>,
        request: CreateSessionRequest,
        username: &str,
        role: ParticipantRole,
    ) -> Result<Session, SyncError> {
        let created = self.rest.create_session(&request).await?;
        self.join_session(created.id.clone(), username, role).await?;
        Ok(created)
    }

    /// Joins a session: announces the join, bootstraps an authoritative
    /// snapshot, opens the push channel, and starts the poller. Any
    /// previously active session is torn down first so its channel, timer,
    /// and state cannot leak into the new one.
    pub async fn join_session(
        self: &Arc<Self>,
        session_id: SessionId,
        username: &str,
        role: ParticipantRole,
    ) -> Result<(), SyncError> {
        self.teardown_session().await;

        let result = self.join_session_inner(&session_id, username, role).await;
        if result.is_err() {
            self.teardown_session().await;
        }
        result
    }

    async fn join_session_inner(
        self: &Arc<Self>,
        session_id: &SessionId,
        username: &str,
        role: ParticipantRole,
    ) -> Result<(), SyncError> {
        self.reconciler
            .set_local_user(Some(username.to_string()))
            .await;
        self.connection
            .set_join_context(Some(JoinContext {
                session_id: session_id.clone(),
                username: username.to_string(),
            }))
            .await;

        self.dispatcher
            .dispatch(OutboundAction::Join {
                session_id: session_id.clone(),
                username: username.to_string(),
                role,
            })
            .await?;

        let session = self.rest.fetch_session(session_id).await?;
        let summary = session.summary();
        let participants = session.participants.clone();
        {
            let mut store = self.store.lock().await;
            store.set_session(Session {
                participants: Vec::new(),
                ..session
            });
        }
        let _ = self.events.send(EngineEvent::SessionChanged(summary));
        self.reconciler
            .on_participants_snapshot(session_id, participants)
            .await;

        let messages = self.rest.fetch_messages(session_id).await?;
        self.reconciler
            .on_messages_bootstrap(session_id, messages)
            .await;

        self.connection.connect().await;

        let poller = PollingScheduler::start(
            Arc::clone(&self.rest),
            Arc::clone(&self.reconciler),
            session_id.clone(),
            self.config.poll_interval,
        );
        if let Some(previous) = self.poller.lock().await.replace(poller) {
            previous.stop();
        }
        Ok(())
    }

    /// Announces the leave (push channel if open, REST otherwise) and tears
    /// the session down. Teardown happens even when the announcement fails.
    pub async fn leave_session(&self) -> Result<(), SyncError> {
        let session_id = { self.store.lock().await.session_id().cloned() };
        let Some(session_id) = session_id else {
            return Ok(());
        };

        let result = self
            .dispatcher
            .dispatch(OutboundAction::Leave { session_id })
            .await;
        self.teardown_session().await;
        result.map(|_| ())
    }

    pub async fn send_message(&self, content: &str) -> Result<DispatchRoute, SyncError> {
        let session_id = self.active_session_id().await?;
        self.dispatcher
            .dispatch(OutboundAction::Send {
                session_id,
                content: content.to_string(),
            })
            .await
    }

    pub async fn edit_message(
        &self,
        message_id: &MessageId,
        content: &str,
    ) -> Result<DispatchRoute, SyncError> {
        let session_id = self.active_session_id().await?;
        self.dispatcher
            .dispatch(OutboundAction::Edit {
                session_id,
                message_id: message_id.clone(),
                content: content.to_string(),
            })
            .await
    }

    pub async fn delete_message(&self, message_id: &MessageId) -> Result<DispatchRoute, SyncError> {
        let session_id = self.active_session_id().await?;
        self.dispatcher
            .dispatch(OutboundAction::Delete {
                session_id,
                message_id: message_id.clone(),
            })
            .await
    }

    /// Manual reconnect after the automatic retry budget was spent.
    pub async fn reconnect(self: &Arc<Self>) {
        self.connection.connect().await;
    }

    /// Disposes the engine: stops the poller, cancels any pending reconnect,
    /// closes the push channel with a normal-closure code, and clears the
    /// store. Idempotent.
    pub async fn shutdown(&self) {
        self.teardown_session().await;
    }

    async fn active_session_id(&self) -> Result<SessionId, SyncError> {
        self.store
            .lock()
            .await
            .session_id()
            .cloned()
            .ok_or(SyncError::NoActiveSession)
    }

    async fn teardown_session(&self) {
        if let Some(poller) = self.poller.lock().await.take() {
            poller.stop();
        }
        self.connection.set_join_context(None).await;
        self.connection.disconnect().await;
        self.reconciler.set_local_user(None).await;
        self.store.lock().await.clear();
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
