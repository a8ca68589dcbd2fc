use std::time::Duration;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_RECONNECT_BASE: Duration = Duration::from_secs(1);
pub const DEFAULT_RECONNECT_CAP: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 10;
/// Grace period between the push channel opening and the join replay, so the
/// server has finished registering the connection before the intent arrives.
pub const DEFAULT_JOIN_SETTLE_DELAY: Duration = Duration::from_millis(300);

/// Tuning knobs for one engine instance. Constructed by the embedding
/// application and handed to [`crate::SyncEngine`].
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Base URL of the authority, e.g. `http://127.0.0.1:8080`. The push
    /// channel URL is derived from it by swapping the scheme to `ws`/`wss`.
    pub server_url: String,
    pub poll_interval: Duration,
    pub reconnect_base: Duration,
    pub reconnect_cap: Duration,
    pub max_reconnect_attempts: u32,
    pub join_settle_delay: Duration,
}

impl SyncConfig {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            reconnect_base: DEFAULT_RECONNECT_BASE,
            reconnect_cap: DEFAULT_RECONNECT_CAP,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            join_settle_delay: DEFAULT_JOIN_SETTLE_DELAY,
        }
    }
}
