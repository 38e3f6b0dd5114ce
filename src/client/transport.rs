//! WebSocket signaling client
//!
//! Connects an orchestrator to a remote [`SignalServer`](crate::server::SignalServer).
//! A writer task drains the outgoing queue into the socket and a reader task
//! decodes incoming text frames into the inbox handed back by
//! [`SignalingClient::connect`].

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use crate::error::{Error, Result};
use crate::protocol::SignalingEnvelope;

use super::sink::SignalSink;

/// Sending half of a WebSocket signaling connection
#[derive(Debug)]
pub struct SignalingClient {
    outgoing: mpsc::Sender<SignalingEnvelope>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl SignalingClient {
    /// Connect to `url` (e.g. `ws://127.0.0.1:8765`)
    ///
    /// Returns the client and the stream of envelopes from the hub. The
    /// inbox closes when the socket does.
    pub async fn connect(
        url: &str,
        capacity: usize,
    ) -> Result<(Self, mpsc::Receiver<SignalingEnvelope>)> {
        let (ws_stream, _) = connect_async(url).await?;
        tracing::debug!(url = %url, "Signaling socket connected");

        let (mut ws_write, mut ws_read) = ws_stream.split();
        let (outgoing_tx, mut outgoing_rx) = mpsc::channel::<SignalingEnvelope>(capacity);
        let (inbox_tx, inbox_rx) = mpsc::channel(capacity);

        let writer = tokio::spawn(async move {
            while let Some(envelope) = outgoing_rx.recv().await {
                let text = match envelope.to_json() {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::warn!(error = %e, "Envelope not encodable");
                        continue;
                    }
                };
                if ws_write.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            let _ = ws_write.close().await;
        });

        let reader = tokio::spawn(async move {
            while let Some(message) = ws_read.next().await {
                match message {
                    Ok(Message::Text(text)) => match SignalingEnvelope::from_json(&text) {
                        Ok(envelope) => {
                            if inbox_tx.send(envelope).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => tracing::warn!(error = %e, "Undecodable envelope from hub"),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        tracing::debug!(error = %e, "Signaling socket error");
                        break;
                    }
                }
            }
            tracing::debug!("Signaling socket closed");
        });

        Ok((
            Self {
                outgoing: outgoing_tx,
                reader,
                writer,
            },
            inbox_rx,
        ))
    }

    /// Stop both socket tasks
    pub fn close(&self) {
        self.reader.abort();
        self.writer.abort();
    }
}

impl Drop for SignalingClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

#[async_trait]
impl SignalSink for SignalingClient {
    async fn send(&self, envelope: SignalingEnvelope) -> Result<()> {
        self.outgoing
            .send(envelope)
            .await
            .map_err(|_| Error::ChannelClosed("signaling client"))
    }
}
