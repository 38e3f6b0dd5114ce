//! In-process broadcast with the loopback peer backend
//!
//! Run with: cargo run --example loopback_broadcast [VIEWERS]
//!
//! Starts a hub, one broadcaster and a few viewers in the same process,
//! waits for every viewer link to connect, switches the camera, then stops
//! the stream and prints the hub counters.

use std::sync::Arc;
use std::time::Duration;

use live_signal::client::{BroadcasterCommand, BroadcasterOrchestrator, ViewerOrchestrator, ViewerPhase};
use live_signal::hub::{MemoryDirectory, StreamDirectory};
use live_signal::peer::{LoopbackFactory, LoopbackMedia, StaticRelayConfig};
use live_signal::{spawn_hub, HubConfig, SessionId, SignalingHub};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

async fn wait_for(phase: &mut watch::Receiver<ViewerPhase>, want: ViewerPhase) -> bool {
    timeout(WAIT, phase.wait_for(|p| *p == want)).await.is_ok()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let viewers: usize = match std::env::args().nth(1) {
        Some(n) => n.parse()?,
        None => 3,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("live_signal=info".parse()?),
        )
        .init();

    let session = SessionId::new("demo");
    let directory = Arc::new(MemoryDirectory::new());
    let (hub, hub_task) = spawn_hub(SignalingHub::new(HubConfig::default(), directory.clone()));

    let factory = Arc::new(LoopbackFactory::new());
    let relays = Arc::new(StaticRelayConfig::default());

    // Broadcaster
    let (sender, inbox) = hub.connect()?.split();
    let mut broadcaster = BroadcasterOrchestrator::new(
        session.clone(),
        Arc::new(sender),
        factory.clone(),
        relays.clone(),
        Arc::new(LoopbackMedia::new()),
    );
    directory.set_active(&session, true).await;
    broadcaster.start().await?;

    let (commands, command_rx) = mpsc::channel(8);
    let broadcaster_task = tokio::spawn(broadcaster.run(inbox, command_rx));

    // Viewers
    let mut phases = Vec::with_capacity(viewers);
    for _ in 0..viewers {
        let (sender, inbox) = hub.connect()?.split();
        let mut viewer = ViewerOrchestrator::new(
            session.clone(),
            Arc::new(sender),
            factory.clone(),
            relays.clone(),
        );
        viewer.join().await?;
        phases.push(viewer.watch_phase());
        tokio::spawn(viewer.run(inbox));
    }

    for (i, phase) in phases.iter_mut().enumerate() {
        let connected = wait_for(phase, ViewerPhase::Connected).await;
        println!("viewer {}: connected={}", i, connected);
    }

    let (reply, report) = oneshot::channel();
    commands
        .send(BroadcasterCommand::SwitchVideo {
            device: "rear-camera".into(),
            reply,
        })
        .await?;
    let report = report.await??;
    println!(
        "camera switch: switched={} kept_previous={} failed={}",
        report.switched.len(),
        report.kept_previous.len(),
        report.failed.len()
    );

    commands.send(BroadcasterCommand::Stop).await?;
    for (i, phase) in phases.iter_mut().enumerate() {
        let idle = wait_for(phase, ViewerPhase::Idle).await;
        println!("viewer {}: back to idle={}", i, idle);
    }
    directory.set_active(&session, false).await;

    commands.send(BroadcasterCommand::Shutdown).await?;
    broadcaster_task.await??;

    let stats = hub.stats().await?;
    println!(
        "hub: connections={} relayed={} dropped={} uptime={:?}",
        stats.total_connections,
        stats.envelopes_relayed,
        stats.envelopes_dropped,
        stats.uptime()
    );

    hub.shutdown();
    hub_task.await?;
    Ok(())
}
