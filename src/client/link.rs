//! Broadcaster-side peer link to one viewer
//!
//! Each link runs on its own task with its own [`Negotiation`], so one
//! viewer's handshake never waits on another's. The orchestrator talks to it
//! through [`LinkCommand`]s and observes it through a `watch` channel.
//!
//! ```text
//!   created ──> negotiating ──> connected ──> closed
//!                    │               │
//!                    └──> failed <───┘
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::peer::{
    LocalTrack, Negotiation, PeerConnectionFactory, PeerEvent, PeerEvents, PeerState,
    RelayServer, SenderId, TrackKind,
};
use crate::protocol::{ConnectionId, IceCandidate, Role, SessionId, Signal, SignalingEnvelope};

use super::sink::SignalSink;

/// Observable phase of a viewer link
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkPhase {
    Created,
    Negotiating,
    Connected,
    Failed(String),
    Closed,
}

impl LinkPhase {
    /// Whether the link still carries (or is about to carry) media
    pub fn is_open(&self) -> bool {
        matches!(self, LinkPhase::Negotiating | LinkPhase::Connected)
    }
}

enum LinkCommand {
    Offer(String),
    Candidate(IceCandidate),
    ReplaceTrack {
        track: LocalTrack,
        reply: oneshot::Sender<Result<()>>,
    },
    Close {
        reply: oneshot::Sender<Result<()>>,
    },
}

/// Orchestrator-side handle of a running link
pub struct ViewerLink {
    viewer: ConnectionId,
    commands: mpsc::UnboundedSender<LinkCommand>,
    phase: watch::Receiver<LinkPhase>,
    task: JoinHandle<()>,
}

impl ViewerLink {
    /// Create the peer connection, attach `tracks` and start the link task
    pub async fn open(
        session: SessionId,
        viewer: ConnectionId,
        factory: &dyn PeerConnectionFactory,
        relays: &[RelayServer],
        tracks: &[LocalTrack],
        sink: Arc<dyn SignalSink>,
    ) -> Result<Self> {
        let (peer, events) = factory.create(relays).await?;
        let (phase_tx, phase_rx) = watch::channel(LinkPhase::Created);

        let mut senders = HashMap::new();
        for track in tracks {
            match peer.add_track(track).await {
                Ok(sender) => {
                    senders.insert(track.kind, sender);
                }
                Err(e) => {
                    let _ = peer.close().await;
                    return Err(e);
                }
            }
        }

        phase_tx.send_replace(LinkPhase::Negotiating);
        tracing::debug!(session = %session, viewer = %viewer, tracks = tracks.len(), "Link negotiating");

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let task = LinkTask {
            session,
            viewer,
            negotiation: Negotiation::new(peer),
            senders,
            events: Some(events),
            commands: commands_rx,
            phase: phase_tx,
            sink,
        };

        Ok(Self {
            viewer,
            commands: commands_tx,
            phase: phase_rx,
            task: tokio::spawn(task.run()),
        })
    }

    pub fn viewer(&self) -> ConnectionId {
        self.viewer
    }

    pub fn phase(&self) -> LinkPhase {
        self.phase.borrow().clone()
    }

    pub fn watch_phase(&self) -> watch::Receiver<LinkPhase> {
        self.phase.clone()
    }

    /// Hand the viewer's offer to the link
    pub fn offer(&self, sdp: String) {
        let _ = self.commands.send(LinkCommand::Offer(sdp));
    }

    /// Hand a viewer candidate to the link
    pub fn candidate(&self, candidate: IceCandidate) {
        let _ = self.commands.send(LinkCommand::Candidate(candidate));
    }

    /// Swap the outgoing track of `track.kind` in place
    pub async fn replace_track(&self, track: LocalTrack) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(LinkCommand::ReplaceTrack { track, reply })
            .map_err(|_| Error::ChannelClosed("viewer link"))?;
        rx.await.map_err(|_| Error::ChannelClosed("viewer link"))?
    }

    /// Close the link, giving up after `wait`
    ///
    /// A link that does not acknowledge in time is aborted. An error from
    /// the peer connection is returned, though the link is gone either way.
    pub async fn close(self, wait: Duration) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(LinkCommand::Close { reply }).is_err() {
            return Ok(());
        }

        match tokio::time::timeout(wait, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Ok(()),
            Err(_) => {
                self.task.abort();
                Err(Error::Timeout(format!("closing link to {}", self.viewer)))
            }
        }
    }
}

struct LinkTask {
    session: SessionId,
    viewer: ConnectionId,
    negotiation: Negotiation,
    senders: HashMap<TrackKind, SenderId>,
    events: Option<PeerEvents>,
    commands: mpsc::UnboundedReceiver<LinkCommand>,
    phase: watch::Sender<LinkPhase>,
    sink: Arc<dyn SignalSink>,
}

enum Next {
    Command(Option<LinkCommand>),
    Event(Option<PeerEvent>),
}

async fn recv_event(events: &mut Option<PeerEvents>) -> Option<PeerEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

impl LinkTask {
    async fn run(mut self) {
        loop {
            let next = tokio::select! {
                command = self.commands.recv() => Next::Command(command),
                event = recv_event(&mut self.events) => Next::Event(event),
            };

            match next {
                Next::Command(Some(LinkCommand::Close { reply })) => {
                    let _ = reply.send(self.shutdown().await);
                    return;
                }
                Next::Command(Some(command)) => self.handle_command(command).await,
                Next::Command(None) => {
                    if let Err(e) = self.shutdown().await {
                        tracing::warn!(viewer = %self.viewer, error = %e, "Peer close failed");
                    }
                    return;
                }
                Next::Event(Some(event)) => self.handle_event(event).await,
                Next::Event(None) => self.events = None,
            }
        }
    }

    async fn handle_command(&mut self, command: LinkCommand) {
        match command {
            LinkCommand::Offer(sdp) => {
                if !self.phase.borrow().is_open() {
                    tracing::debug!(viewer = %self.viewer, "Offer for inactive link ignored");
                    return;
                }

                match self.negotiation.answer_offer(sdp).await {
                    Ok(answer) => {
                        let envelope = SignalingEnvelope::new(Signal::answer(answer, self.viewer))
                            .from_role(Role::Broadcaster)
                            .to(self.viewer);
                        if let Err(e) = self.sink.send(envelope).await {
                            tracing::warn!(viewer = %self.viewer, error = %e, "Answer not sent");
                        }
                    }
                    Err(e) => self.fail(e).await,
                }
            }
            LinkCommand::Candidate(candidate) => {
                if let Err(e) = self.negotiation.add_remote_candidate(candidate).await {
                    tracing::warn!(viewer = %self.viewer, error = %e, "Candidate rejected");
                }
            }
            LinkCommand::ReplaceTrack { track, reply } => {
                let result = match self.senders.get(&track.kind) {
                    Some(sender) => self.negotiation.peer().replace_track(*sender, &track).await,
                    None => Err(Error::Unsupported(format!("no {} sender on link", track.kind))),
                };
                let _ = reply.send(result);
            }
            LinkCommand::Close { .. } => {}
        }
    }

    async fn handle_event(&mut self, event: PeerEvent) {
        match event {
            PeerEvent::LocalCandidate(candidate) => {
                let envelope =
                    SignalingEnvelope::new(Signal::ice(candidate, Some(self.viewer), true))
                        .from_role(Role::Broadcaster)
                        .to(self.viewer);
                if let Err(e) = self.sink.send(envelope).await {
                    tracing::warn!(viewer = %self.viewer, error = %e, "Candidate not sent");
                }
            }
            PeerEvent::StateChanged(PeerState::Connected) => {
                tracing::info!(session = %self.session, viewer = %self.viewer, "Link connected");
                self.set_phase(LinkPhase::Connected);
            }
            PeerEvent::StateChanged(PeerState::Failed) => {
                self.fail(Error::PeerConnection("connectivity failed".into()))
                    .await;
            }
            PeerEvent::StateChanged(state) => {
                tracing::debug!(viewer = %self.viewer, state = ?state, "Peer state");
            }
            PeerEvent::RemoteTrack(_) => {}
        }
    }

    async fn fail(&mut self, error: Error) {
        tracing::warn!(session = %self.session, viewer = %self.viewer, error = %error, "Link failed");

        let _ = self.negotiation.close().await;
        self.set_phase(LinkPhase::Failed(error.to_string()));
    }

    async fn shutdown(&mut self) -> Result<()> {
        let result = self.negotiation.close().await;
        self.events = None;
        self.set_phase(LinkPhase::Closed);

        tracing::debug!(session = %self.session, viewer = %self.viewer, "Link closed");
        result
    }

    fn set_phase(&self, phase: LinkPhase) {
        self.phase.send_replace(phase);
    }
}
