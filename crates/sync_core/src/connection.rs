use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use futures::future::BoxFuture;
use shared::{domain::SessionId, protocol::ClientIntent};
use tokio::{
    sync::{broadcast, mpsc, Mutex},
    task::JoinHandle,
};
use tracing::{info, warn};

use crate::{config::SyncConfig, error::SyncError, events::EngineEvent, reconcile::Reconciler};

pub const NORMAL_CLOSURE: u16 = 1000;
pub const ABNORMAL_CLOSURE: u16 = 1006;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// One frame received from the push channel.
#[derive(Debug)]
pub enum PushFrame {
    Text(String),
    Closed { code: u16 },
}

/// Write half of an open push channel.
#[async_trait]
pub trait PushSession: Send + Sync {
    async fn send_text(&self, text: String) -> Result<()>;
    async fn close(&self, code: u16) -> Result<()>;
}

pub struct PushLink {
    pub session: Arc<dyn PushSession>,
    pub incoming: mpsc::Receiver<PushFrame>,
}

/// Seam over the transport so tests can inject scripted channels; the
/// production impl is [`crate::transport::WsConnector`].
#[async_trait]
pub trait PushConnector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<PushLink>;
}

/// What to replay once a channel opens while a session is active.
#[derive(Debug, Clone)]
pub struct JoinContext {
    pub session_id: SessionId,
    pub username: String,
}

/// Owns the push-channel lifecycle: connect, authenticate-on-open by
/// replaying the join intent, detect closure, and drive bounded reconnection
/// with exponential backoff.
///
/// `Disconnected -> Connecting -> Connected`; an unexpected close goes
/// `Connected -> Reconnecting -> Connecting`, and spending the retry budget
/// lands in `Disconnected` until the next explicit `connect`.
pub struct ConnectionManager {
    connector: Arc<dyn PushConnector>,
    push_url: String,
    reconnect_base: Duration,
    reconnect_cap: Duration,
    max_reconnect_attempts: u32,
    join_settle_delay: Duration,
    reconciler: Arc<Reconciler>,
    events: broadcast::Sender<EngineEvent>,
    state: Mutex<ConnectionState>,
    attempts: AtomicU32,
    session: Mutex<Option<Arc<dyn PushSession>>>,
    join_context: Mutex<Option<JoinContext>>,
    reader_task: Mutex<Option<JoinHandle<()>>>,
    replay_task: Mutex<Option<JoinHandle<()>>>,
    reconnect_timer: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    pub fn new(
        connector: Arc<dyn PushConnector>,
        push_url: String,
        config: &SyncConfig,
        reconciler: Arc<Reconciler>,
        events: broadcast::Sender<EngineEvent>,
    ) -> Arc<Self> {
        Arc::new(Self {
            connector,
            push_url,
            reconnect_base: config.reconnect_base,
            reconnect_cap: config.reconnect_cap,
            max_reconnect_attempts: config.max_reconnect_attempts,
            join_settle_delay: config.join_settle_delay,
            reconciler,
            events,
            state: Mutex::new(ConnectionState::Disconnected),
            attempts: AtomicU32::new(0),
            session: Mutex::new(None),
            join_context: Mutex::new(None),
            reader_task: Mutex::new(None),
            replay_task: Mutex::new(None),
            reconnect_timer: Mutex::new(None),
        })
    }

    pub async fn state(&self) -> ConnectionState {
        *self.state.lock().await
    }

    pub async fn is_connected(&self) -> bool {
        matches!(self.state().await, ConnectionState::Connected)
    }

    pub async fn set_join_context(&self, context: Option<JoinContext>) {
        *self.join_context.lock().await = context;
    }

    /// Opens the push channel. No-op while already `Connecting` or
    /// `Connected`. A failed attempt enters the reconnect schedule.
    pub async fn connect(self: &Arc<Self>) {
        {
            let mut state = self.state.lock().await;
            match *state {
                ConnectionState::Connecting | ConnectionState::Connected => return,
                _ => *state = ConnectionState::Connecting,
            }
        }
        let _ = self
            .events
            .send(EngineEvent::ConnectionStateChanged(
                ConnectionState::Connecting,
            ));
        self.try_open().await;
    }

    /// Normal-closure teardown: cancels any pending reconnect, closes the
    /// channel with code 1000, forces `Disconnected`. Safe from any state.
    pub async fn disconnect(&self) {
        if let Some(timer) = self.reconnect_timer.lock().await.take() {
            timer.abort();
        }
        if let Some(replay) = self.replay_task.lock().await.take() {
            replay.abort();
        }
        if let Some(reader) = self.reader_task.lock().await.take() {
            reader.abort();
        }
        if let Some(session) = self.session.lock().await.take() {
            let _ = session.close(NORMAL_CLOSURE).await;
        }
        self.attempts.store(0, Ordering::SeqCst);
        self.set_state(ConnectionState::Disconnected).await;
    }

    /// Sends one intent over the open channel. Fails fast when no channel is
    /// open so the dispatcher can take the fallback path.
    pub async fn send_intent(&self, intent: &ClientIntent) -> Result<(), SyncError> {
        let session = {
            let guard = self.session.lock().await;
            guard.clone().ok_or(SyncError::ChannelUnavailable)?
        };
        let text = serde_json::to_string(intent)?;
        session
            .send_text(text)
            .await
            .map_err(|err| SyncError::ChannelSend(err.to_string()))
    }

    // Boxed: the reconnect timer awaits try_open, which awaits
    // schedule_reconnect, which spawns the timer. The dyn future is the
    // point where that recursion stops being an opaque-type cycle.
    fn try_open(self: &Arc<Self>) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            match self.connector.connect(&self.push_url).await {
                Ok(link) => self.install_link(link).await,
                Err(err) => {
                    warn!(url = %self.push_url, error = %err, "push channel connect failed");
                    self.schedule_reconnect().await;
                }
            }
        })
    }

    async fn install_link(self: &Arc<Self>, link: PushLink) {
        {
            let state = self.state.lock().await;
            if *state != ConnectionState::Connecting {
                // disconnect() won the race; drop the fresh channel.
                let _ = link.session.close(NORMAL_CLOSURE).await;
                return;
            }
        }

        *self.session.lock().await = Some(Arc::clone(&link.session));
        self.attempts.store(0, Ordering::SeqCst);

        let manager = Arc::clone(self);
        let mut incoming = link.incoming;
        let reader = tokio::spawn(async move {
            let code = loop {
                match incoming.recv().await {
                    Some(PushFrame::Text(text)) => {
                        match serde_json::from_str::<shared::protocol::ServerEvent>(&text) {
                            Ok(event) => manager.reconciler.apply(event).await,
                            Err(err) => {
                                warn!(error = %err, "dropping malformed push frame");
                            }
                        }
                    }
                    Some(PushFrame::Closed { code }) => break code,
                    None => break ABNORMAL_CLOSURE,
                }
            };
            manager.handle_close(code).await;
        });
        if let Some(previous) = self.reader_task.lock().await.replace(reader) {
            previous.abort();
        }

        self.set_state(ConnectionState::Connected).await;
        info!(url = %self.push_url, "push channel open");
        self.spawn_join_replay().await;
    }

    /// Replays the join intent shortly after open, bridging the race between
    /// channel-open and server-side session registration. Best effort: the
    /// poller repairs anything lost in that window.
    async fn spawn_join_replay(self: &Arc<Self>) {
        let Some(context) = self.join_context.lock().await.clone() else {
            return;
        };
        let manager = Arc::clone(self);
        let replay = tokio::spawn(async move {
            tokio::time::sleep(manager.join_settle_delay).await;
            let intent = ClientIntent::JoinSession {
                session_id: context.session_id.clone(),
                username: context.username,
            };
            if let Err(err) = manager.send_intent(&intent).await {
                warn!(session_id = %context.session_id, error = %err, "join replay failed");
            }
        });
        if let Some(previous) = self.replay_task.lock().await.replace(replay) {
            previous.abort();
        }
    }

    async fn handle_close(self: &Arc<Self>, code: u16) {
        *self.session.lock().await = None;
        if code == NORMAL_CLOSURE {
            info!("push channel closed normally");
            self.set_state(ConnectionState::Disconnected).await;
            return;
        }
        warn!(code, "push channel dropped");
        self.schedule_reconnect().await;
    }

    async fn schedule_reconnect(self: &Arc<Self>) {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt >= self.max_reconnect_attempts {
            warn!(attempts = attempt, "reconnect budget exhausted");
            self.set_state(ConnectionState::Disconnected).await;
            let _ = self
                .events
                .send(EngineEvent::ReconnectExhausted { attempts: attempt });
            return;
        }

        let delay = backoff_delay(self.reconnect_base, self.reconnect_cap, attempt);
        info!(
            attempt,
            delay_ms = delay.as_millis() as u64,
            "scheduling push channel reconnect"
        );
        self.set_state(ConnectionState::Reconnecting).await;

        let manager = Arc::clone(self);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut state = manager.state.lock().await;
                if *state != ConnectionState::Reconnecting {
                    return;
                }
                *state = ConnectionState::Connecting;
            }
            let _ = manager
                .events
                .send(EngineEvent::ConnectionStateChanged(
                    ConnectionState::Connecting,
                ));
            manager.try_open().await;
        });
        if let Some(previous) = self.reconnect_timer.lock().await.replace(timer) {
            previous.abort();
        }
    }

    async fn set_state(&self, next: ConnectionState) {
        let changed = {
            let mut state = self.state.lock().await;
            let changed = *state != next;
            *state = next;
            changed
        };
        if changed {
            let _ = self
                .events
                .send(EngineEvent::ConnectionStateChanged(next));
        }
    }

    #[cfg(test)]
    fn attempt_count(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

/// `min(base * 2^attempt, cap)`; non-decreasing in `attempt` until capped.
pub(crate) fn backoff_delay(base: Duration, cap: Duration, attempt: u32) -> Duration {
    let factor = 1u32.checked_shl(attempt.min(20)).unwrap_or(u32::MAX);
    base.saturating_mul(factor).min(cap)
}

#[cfg(test)]
#[path = "tests/connection_tests.rs"]
mod tests;
