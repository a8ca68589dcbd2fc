use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async,
    tungstenite::protocol::frame::{coding::CloseCode, CloseFrame},
    tungstenite::Message,
};
use tracing::warn;

use crate::{
    connection::{PushConnector, PushFrame, PushLink, PushSession, ABNORMAL_CLOSURE},
    error::SyncError,
};

/// Derives the push-channel URL from the authority base URL.
pub fn push_url_from_server_url(server_url: &str) -> Result<String, SyncError> {
    let ws_base = if let Some(rest) = server_url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = server_url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        return Err(SyncError::InvalidServerUrl(server_url.to_string()));
    };
    Ok(format!("{}/ws", ws_base.trim_end_matches('/')))
}

enum WsOutbound {
    Text(String),
    Close(u16),
}

struct WsSession {
    out: mpsc::Sender<WsOutbound>,
}

#[async_trait]
impl PushSession for WsSession {
    async fn send_text(&self, text: String) -> Result<()> {
        self.out
            .send(WsOutbound::Text(text))
            .await
            .map_err(|_| anyhow!("push channel writer closed"))
    }

    async fn close(&self, code: u16) -> Result<()> {
        self.out
            .send(WsOutbound::Close(code))
            .await
            .map_err(|_| anyhow!("push channel writer closed"))
    }
}

/// Production connector over tokio-tungstenite.
pub struct WsConnector;

#[async_trait]
impl PushConnector for WsConnector {
    async fn connect(&self, url: &str) -> Result<PushLink> {
        let (stream, _) = connect_async(url)
            .await
            .with_context(|| format!("failed to connect push channel: {url}"))?;
        let (mut writer, mut reader) = stream.split();

        let (out_tx, mut out_rx) = mpsc::channel::<WsOutbound>(64);
        tokio::spawn(async move {
            while let Some(outbound) = out_rx.recv().await {
                match outbound {
                    WsOutbound::Text(text) => {
                        if writer.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    WsOutbound::Close(code) => {
                        let frame = CloseFrame {
                            code: CloseCode::from(code),
                            reason: "".into(),
                        };
                        let _ = writer.send(Message::Close(Some(frame))).await;
                        break;
                    }
                }
            }
        });

        let (frame_tx, frame_rx) = mpsc::channel::<PushFrame>(256);
        tokio::spawn(async move {
            while let Some(frame) = reader.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        if frame_tx.send(PushFrame::Text(text)).await.is_err() {
                            return;
                        }
                    }
                    Ok(Message::Close(close)) => {
                        let code = close
                            .map(|frame| u16::from(frame.code))
                            .unwrap_or(ABNORMAL_CLOSURE);
                        let _ = frame_tx.send(PushFrame::Closed { code }).await;
                        return;
                    }
                    Ok(_) => {}
                    Err(err) => {
                        warn!(error = %err, "push channel receive failed");
                        let _ = frame_tx
                            .send(PushFrame::Closed {
                                code: ABNORMAL_CLOSURE,
                            })
                            .await;
                        return;
                    }
                }
            }
            // Stream ended without a close frame.
            let _ = frame_tx
                .send(PushFrame::Closed {
                    code: ABNORMAL_CLOSURE,
                })
                .await;
        });

        Ok(PushLink {
            session: Arc::new(WsSession { out: out_tx }),
            incoming: frame_rx,
        })
    }
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
