//! Viewer-side orchestrator
//!
//! One peer link to the session's broadcaster. The viewer always makes the
//! offer; the broadcaster answers through the hub.
//!
//! ```text
//!   idle ──join──> awaiting-stream ──stream-started──> negotiating ──> connected
//!    ▲                                                      │              │
//!    └──────────────── stream-stopped / hub gone ───────────┴──────────────┘
//!
//!   any ──relay config or negotiation error──> failed (until the next join)
//!   any ──leave──> closed
//! ```

use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use crate::error::{Error, Result};
use crate::peer::{
    Negotiation, PeerConnectionFactory, PeerEvent, PeerEvents, PeerState, RelayConfigSource,
    RemoteTrack, TrackKind,
};
use crate::protocol::{
    IcePayload, Role, SdpPayload, SessionId, SessionPayload, Signal, SignalingEnvelope,
};

use super::sink::SignalSink;

/// Observable phase of the viewer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewerPhase {
    Idle,
    AwaitingStream,
    Negotiating,
    Connected,
    Closed,
    /// Terminal until the caller joins again
    Failed(String),
}

/// Receives one broadcaster's stream
pub struct ViewerOrchestrator {
    session: SessionId,
    sink: Arc<dyn SignalSink>,
    factory: Arc<dyn PeerConnectionFactory>,
    relays: Arc<dyn RelayConfigSource>,
    negotiation: Option<Negotiation>,
    events: Option<PeerEvents>,
    phase: watch::Sender<ViewerPhase>,
    remote: watch::Sender<Vec<RemoteTrack>>,
    rejection: Option<String>,
}

impl ViewerOrchestrator {
    pub fn new(
        session: SessionId,
        sink: Arc<dyn SignalSink>,
        factory: Arc<dyn PeerConnectionFactory>,
        relays: Arc<dyn RelayConfigSource>,
    ) -> Self {
        let (phase, _) = watch::channel(ViewerPhase::Idle);
        let (remote, _) = watch::channel(Vec::new());

        Self {
            session,
            sink,
            factory,
            relays,
            negotiation: None,
            events: None,
            phase,
            remote,
            rejection: None,
        }
    }

    pub fn session(&self) -> &SessionId {
        &self.session
    }

    pub fn phase(&self) -> ViewerPhase {
        self.phase.borrow().clone()
    }

    pub fn watch_phase(&self) -> watch::Receiver<ViewerPhase> {
        self.phase.subscribe()
    }

    /// Remote tracks currently received; empty when not connected
    pub fn remote_media(&self) -> watch::Receiver<Vec<RemoteTrack>> {
        self.remote.subscribe()
    }

    /// Reason the hub gave for refusing the last join
    pub fn rejection(&self) -> Option<&str> {
        self.rejection.as_deref()
    }

    /// Ask the hub to join the session
    ///
    /// Also the way out of `failed`: any previous link is discarded.
    pub async fn join(&mut self) -> Result<()> {
        self.close_link().await;
        self.rejection = None;

        self.sink
            .send(
                SignalingEnvelope::new(Signal::ViewerJoin(SessionPayload::new(self.session.clone())))
                    .from_role(Role::Viewer),
            )
            .await?;

        self.set_phase(ViewerPhase::AwaitingStream);
        Ok(())
    }

    /// React to one envelope from the hub
    pub async fn handle(&mut self, envelope: SignalingEnvelope) -> Result<()> {
        if matches!(self.phase(), ViewerPhase::Failed(_) | ViewerPhase::Closed) {
            tracing::debug!(kind = envelope.kind(), "Viewer inactive, envelope ignored");
            return Ok(());
        }

        match envelope.into_signal() {
            Signal::ViewerJoinedStream(_) | Signal::StreamStarted(_) => {
                if matches!(
                    self.phase(),
                    ViewerPhase::Idle | ViewerPhase::AwaitingStream
                ) {
                    self.connect().await?;
                }
            }
            Signal::Answer(SdpPayload { sdp, .. }) => {
                let applied = match self.negotiation.as_mut() {
                    Some(negotiation) => negotiation.accept_answer(sdp).await,
                    None => Ok(()),
                };
                if let Err(e) = applied {
                    self.fail(e).await?;
                }
            }
            Signal::IceCandidate(IcePayload {
                candidate,
                from_broadcaster: true,
                ..
            }) => {
                if let Some(negotiation) = self.negotiation.as_mut() {
                    if let Err(e) = negotiation.add_remote_candidate(candidate).await {
                        tracing::warn!(session = %self.session, error = %e, "Candidate rejected");
                    }
                }
            }
            Signal::StreamStopped(_) => {
                tracing::info!(session = %self.session, "Stream stopped");
                self.close_link().await;
                self.set_phase(ViewerPhase::Idle);
            }
            Signal::SessionInactive(rejection) => {
                tracing::warn!(session = %self.session, reason = %rejection.reason, "Join refused");
                self.rejection = Some(rejection.reason);
                self.set_phase(ViewerPhase::Idle);
            }
            Signal::Error(error) => {
                tracing::warn!(session = %self.session, message = %error.message, "Hub error");
            }
            other => {
                tracing::debug!(kind = other.kind(), "Ignoring envelope");
            }
        }

        Ok(())
    }

    async fn connect(&mut self) -> Result<()> {
        if self.negotiation.is_some() {
            return Ok(());
        }

        match self.open_link().await {
            Ok(()) => {
                self.set_phase(ViewerPhase::Negotiating);
                Ok(())
            }
            Err(e) => self.fail(e).await,
        }
    }

    async fn open_link(&mut self) -> Result<()> {
        let relays = self.relays.relay_servers().await?;
        let (peer, events) = self.factory.create(&relays).await?;
        let mut negotiation = Negotiation::new(peer);

        let sdp = match receive_only_offer(&mut negotiation).await {
            Ok(sdp) => sdp,
            Err(e) => {
                let _ = negotiation.close().await;
                return Err(e);
            }
        };

        self.negotiation = Some(negotiation);
        self.events = Some(events);

        tracing::debug!(session = %self.session, "Sending offer");
        self.sink
            .send(SignalingEnvelope::new(Signal::offer(sdp)).from_role(Role::Viewer))
            .await
    }

    /// React to one event from the peer connection
    pub async fn handle_peer_event(&mut self, event: PeerEvent) -> Result<()> {
        if self.negotiation.is_none() {
            return Ok(());
        }

        match event {
            PeerEvent::LocalCandidate(candidate) => {
                self.sink
                    .send(
                        SignalingEnvelope::new(Signal::ice(candidate, None, false))
                            .from_role(Role::Viewer),
                    )
                    .await?;
            }
            PeerEvent::StateChanged(PeerState::Connected) => {
                tracing::info!(session = %self.session, "Connected to broadcaster");
                self.set_phase(ViewerPhase::Connected);
            }
            PeerEvent::StateChanged(PeerState::Failed) => {
                self.fail(Error::PeerConnection("connectivity failed".into()))
                    .await?;
            }
            PeerEvent::StateChanged(_) => {}
            PeerEvent::RemoteTrack(track) => {
                tracing::debug!(session = %self.session, kind = %track.kind, "Remote track");
                self.remote.send_modify(|tracks| tracks.push(track));
            }
        }

        Ok(())
    }

    /// Close the link and stop reacting to the hub
    pub async fn leave(&mut self) {
        self.close_link().await;
        self.set_phase(ViewerPhase::Closed);
    }

    /// Negotiation failures end in `failed`; anything else goes to the caller.
    async fn fail(&mut self, error: Error) -> Result<()> {
        self.close_link().await;

        if !error.is_negotiation_failure() {
            return Err(error);
        }

        tracing::warn!(session = %self.session, error = %error, "Viewer failed");
        self.set_phase(ViewerPhase::Failed(error.to_string()));
        Ok(())
    }

    async fn close_link(&mut self) {
        if let Some(mut negotiation) = self.negotiation.take() {
            if let Err(e) = negotiation.close().await {
                tracing::warn!(session = %self.session, error = %e, "Peer close failed");
            }
        }
        self.events = None;
        self.remote.send_replace(Vec::new());
    }

    fn set_phase(&self, phase: ViewerPhase) {
        self.phase.send_replace(phase);
    }

    /// Drive the orchestrator until the hub connection closes
    ///
    /// Losing the hub closes the link and leaves the viewer idle.
    pub async fn run(mut self, mut inbox: mpsc::Receiver<SignalingEnvelope>) -> Result<()> {
        loop {
            let next = tokio::select! {
                envelope = inbox.recv() => Next::Envelope(envelope),
                event = recv_event(&mut self.events) => Next::Event(event),
            };

            let result = match next {
                Next::Envelope(Some(envelope)) => self.handle(envelope).await,
                Next::Envelope(None) => break,
                Next::Event(Some(event)) => self.handle_peer_event(event).await,
                Next::Event(None) => {
                    self.events = None;
                    Ok(())
                }
            };

            if let Err(e) = result {
                tracing::warn!(session = %self.session, error = %e, "Viewer step failed");
            }
        }

        tracing::info!(session = %self.session, "Hub connection closed");
        self.close_link().await;
        if !matches!(self.phase(), ViewerPhase::Failed(_) | ViewerPhase::Closed) {
            self.set_phase(ViewerPhase::Idle);
        }
        Ok(())
    }
}

/// Ask for audio and video without sending any
async fn receive_only_offer(negotiation: &mut Negotiation) -> Result<String> {
    negotiation.peer().add_receiver(TrackKind::Audio).await?;
    negotiation.peer().add_receiver(TrackKind::Video).await?;
    negotiation.create_offer().await
}

enum Next {
    Envelope(Option<SignalingEnvelope>),
    Event(Option<PeerEvent>),
}

async fn recv_event(events: &mut Option<PeerEvents>) -> Option<PeerEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
