use std::sync::Arc;
use std::time::Duration;

use shared::domain::SessionId;
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tracing::warn;

use crate::{reconcile::Reconciler, rest::RestClient};

/// Baseline resynchronization, independent of the push channel's health.
///
/// While a session is active this fetches the message and participant
/// snapshots on a fixed interval and routes both through the reconciler,
/// repairing whatever the push channel missed (e.g. events during a
/// reconnect window). The fetch is awaited inline and overrun ticks are
/// skipped, so a poll never runs concurrently with itself.
pub struct PollingScheduler {
    task: JoinHandle<()>,
}

impl PollingScheduler {
    pub fn start(
        rest: Arc<RestClient>,
        reconciler: Arc<Reconciler>,
        session_id: SessionId,
        interval: Duration,
    ) -> Self {
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The join bootstrap already fetched a snapshot; skip the
            // immediate first tick.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match rest.fetch_messages(&session_id).await {
                    Ok(messages) => {
                        reconciler.on_messages_snapshot(&session_id, messages).await;
                    }
                    Err(err) => {
                        warn!(session_id = %session_id, error = %err, "message poll failed");
                    }
                }
                match rest.fetch_session(&session_id).await {
                    Ok(session) => {
                        reconciler
                            .on_participants_snapshot(&session_id, session.participants.clone())
                            .await;
                        reconciler.on_session_updated(session.summary()).await;
                    }
                    Err(err) => {
                        warn!(session_id = %session_id, error = %err, "participant poll failed");
                    }
                }
            }
        });
        Self { task }
    }

    /// Stops polling immediately; no further reconciler calls after return.
    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for PollingScheduler {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
#[path = "tests/poller_tests.rs"]
mod tests;
