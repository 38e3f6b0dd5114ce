//! Per-connection WebSocket task
//!
//! Upgrades the socket, registers with the hub and then pumps frames both
//! ways until either side goes away. Admin requests pass the
//! [`Authorizer`] here, before the hub ever sees them.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};

use crate::error::{Error, Result};
use crate::hub::{HubHandle, HubSender, StreamDirectory};
use crate::protocol::{ConnectionId, SessionId, Signal, SignalingEnvelope};
use crate::server::config::ServerConfig;
use crate::server::handler::{AuthResult, Authorizer};

type WsStream = WebSocketStream<TcpStream>;

/// What woke the connection loop
enum Next {
    Socket(Option<std::result::Result<Message, tokio_tungstenite::tungstenite::Error>>),
    Hub(Option<SignalingEnvelope>),
}

/// One client connection
pub struct Connection<A: Authorizer> {
    peer_addr: SocketAddr,
    config: ServerConfig,
    authorizer: Arc<A>,
    directory: Arc<dyn StreamDirectory>,
    hub: HubHandle,
    /// Session this connection took live, if any
    live_session: Option<SessionId>,
}

impl<A: Authorizer> Connection<A> {
    pub fn new(
        peer_addr: SocketAddr,
        config: ServerConfig,
        authorizer: Arc<A>,
        directory: Arc<dyn StreamDirectory>,
        hub: HubHandle,
    ) -> Self {
        Self {
            peer_addr,
            config,
            authorizer,
            directory,
            hub,
            live_session: None,
        }
    }

    /// Serve the connection until the socket or the hub closes
    pub async fn run(&mut self, socket: TcpStream) -> Result<()> {
        let ws = timeout(self.config.handshake_timeout, accept_async(socket))
            .await
            .map_err(|_| Error::Timeout("websocket handshake".into()))??;

        let (sender, inbox) = self.hub.connect()?.split();
        tracing::debug!(connection = %sender.id(), peer = %self.peer_addr, "Signaling session open");

        let result = self.pump(ws, &sender, inbox).await;

        if let Some(session) = self.live_session.take() {
            // Went away without stopping its stream. `sender` is still held,
            // so the hub has not yet processed the disconnect.
            if let Err(e) = self.mark_directory(sender.id(), &session, false).await {
                tracing::debug!(connection = %sender.id(), error = %e, "Directory left as is");
            }
        }

        result
    }

    async fn pump(
        &mut self,
        ws: WsStream,
        sender: &HubSender,
        mut inbox: tokio::sync::mpsc::Receiver<SignalingEnvelope>,
    ) -> Result<()> {
        let (mut ws_tx, mut ws_rx) = ws.split();

        loop {
            let next = tokio::select! {
                message = ws_rx.next() => Next::Socket(message),
                envelope = inbox.recv() => Next::Hub(envelope),
            };

            match next {
                Next::Socket(Some(Ok(Message::Text(text)))) => {
                    let reply = match SignalingEnvelope::from_json(&text) {
                        Ok(envelope) => self.forward(sender, envelope).await?,
                        Err(e) => {
                            tracing::warn!(connection = %sender.id(), error = %e, "Malformed envelope");
                            Some(Signal::error(format!("malformed envelope: {}", e)))
                        }
                    };
                    if let Some(reply) = reply {
                        let text = SignalingEnvelope::new(reply).to_json()?;
                        ws_tx.send(Message::Text(text)).await?;
                    }
                }
                Next::Socket(Some(Ok(Message::Ping(data)))) => {
                    ws_tx.send(Message::Pong(data)).await?;
                }
                Next::Socket(Some(Ok(Message::Close(_)))) | Next::Socket(None) => break,
                Next::Socket(Some(Ok(_))) => {}
                Next::Socket(Some(Err(e))) => {
                    tracing::debug!(connection = %sender.id(), error = %e, "Socket error");
                    break;
                }
                Next::Hub(Some(envelope)) => {
                    self.observe(envelope.signal());
                    ws_tx.send(Message::Text(envelope.to_json()?)).await?;
                }
                Next::Hub(None) => {
                    tracing::debug!(connection = %sender.id(), "Hub closed the connection");
                    break;
                }
            }
        }

        let _ = ws_tx.close().await;
        Ok(())
    }

    /// Pass an envelope to the hub, or answer it directly when refused
    async fn forward(
        &mut self,
        sender: &HubSender,
        envelope: SignalingEnvelope,
    ) -> Result<Option<Signal>> {
        let (request, active) = match envelope.signal() {
            Signal::AdminJoin(p) => (p, None),
            Signal::AdminStreamStart(p) => (p, Some(true)),
            Signal::AdminStreamStop(p) => (p, Some(false)),
            _ => {
                sender.send(envelope)?;
                return Ok(None);
            }
        };

        let session = request.session_id.clone();
        let auth = self
            .authorizer
            .authorize(&session, request.token.as_deref())
            .await;

        if let AuthResult::Reject(reason) = auth {
            tracing::warn!(
                connection = %sender.id(),
                session = %session,
                kind = envelope.kind(),
                reason = %reason,
                "Admin request rejected"
            );
            return Ok(Some(Signal::error(format!(
                "{} rejected: {}",
                envelope.kind(),
                reason
            ))));
        }

        if let Some(active) = active {
            self.mark_directory(sender.id(), &session, active).await?;
        }

        sender.send(envelope)?;
        Ok(None)
    }

    /// Forget the live session once the hub ends it for this connection
    fn observe(&mut self, signal: &Signal) {
        let ended = match signal {
            Signal::Superseded(event) | Signal::StreamStopped(event) => &event.session_id,
            _ => return,
        };
        if self.live_session.as_ref() == Some(ended) {
            self.live_session = None;
        }
    }

    /// Flip the directory flag, but only for the session's own broadcaster
    async fn mark_directory(
        &mut self,
        id: ConnectionId,
        session: &SessionId,
        active: bool,
    ) -> Result<()> {
        let snapshot = self.hub.session_snapshot(session.clone()).await?;
        if snapshot.and_then(|s| s.broadcaster) != Some(id) {
            return Ok(());
        }

        self.directory.set_active(session, active).await;
        self.live_session = active.then(|| session.clone());
        Ok(())
    }
}
