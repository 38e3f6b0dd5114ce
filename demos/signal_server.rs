//! Standalone signaling server
//!
//! Run with: cargo run --example signal_server [BIND_ADDR]
//!
//! Examples:
//!   cargo run --example signal_server                  # binds to 0.0.0.0:8765
//!   cargo run --example signal_server 127.0.0.1:9000   # binds to 127.0.0.1:9000
//!
//! Environment:
//!   LIVE_SIGNAL_ADMIN_TOKEN   token required for admin requests (default: none)
//!   LIVE_SIGNAL_RELAYS        comma separated relay list, `url` or `url|user|credential`
//!
//! Clients connect over WebSocket and exchange JSON envelopes, e.g.
//!   {"type":"admin-join","payload":{"sessionId":"demo","token":"secret"}}
//!   {"type":"viewer-join","payload":{"sessionId":"demo"}}

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use live_signal::hub::MemoryDirectory;
use live_signal::peer::RelayServer;
use live_signal::server::{AuthResult, Authorizer, StaticTokenAuthorizer};
use live_signal::{ServerConfig, SessionId, SignalServer};

/// Logs connections and optionally checks an admin token
struct DemoAuthorizer {
    token: Option<StaticTokenAuthorizer>,
}

#[async_trait]
impl Authorizer for DemoAuthorizer {
    async fn on_connection(&self, peer: SocketAddr) -> bool {
        println!("New connection from {}", peer);
        true
    }

    async fn authorize(&self, session: &SessionId, token: Option<&str>) -> AuthResult {
        let result = match &self.token {
            Some(auth) => auth.authorize(session, token).await,
            None => AuthResult::Accept,
        };
        println!("[{}] admin request: {:?}", session, result);
        result
    }
}

fn print_usage() {
    eprintln!("Usage: signal_server [BIND_ADDR]");
    eprintln!();
    eprintln!("  BIND_ADDR  address to listen on (default: 0.0.0.0:8765)");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return Ok(());
    }

    let mut config = ServerConfig::default();
    if let Some(addr) = args.get(1) {
        match addr.parse::<SocketAddr>() {
            Ok(addr) => config = config.bind(addr),
            Err(e) => {
                eprintln!("Error: invalid address '{}': {}", addr, e);
                eprintln!();
                print_usage();
                std::process::exit(1);
            }
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("live_signal=debug".parse()?)
                .add_directive("signal_server=debug".parse()?),
        )
        .init();

    if let Ok(list) = std::env::var("LIVE_SIGNAL_RELAYS") {
        config = config.relays(RelayServer::parse_list(&list)?);
    }
    for relay in &config.relays {
        println!("Relay: {}", relay.urls.join(" "));
    }

    let authorizer = DemoAuthorizer {
        token: std::env::var("LIVE_SIGNAL_ADMIN_TOKEN")
            .ok()
            .map(StaticTokenAuthorizer::new),
    };

    println!("Starting signaling server on ws://{}", config.bind_addr);

    let server = SignalServer::new(config, authorizer, Arc::new(MemoryDirectory::new()));

    server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
            println!();
            println!("Shutting down...");
        })
        .await?;

    Ok(())
}
