use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("no active session")]
    NoActiveSession,
    #[error("message content must not be empty")]
    EmptyContent,
    #[error("server URL must start with http:// or https://: {0}")]
    InvalidServerUrl(String),
    #[error("push channel unavailable")]
    ChannelUnavailable,
    #[error("push channel send failed: {0}")]
    ChannelSend(String),
    #[error("server rejected request: {0}")]
    Api(String),
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("encode failed: {0}")]
    Encode(#[from] serde_json::Error),
}
