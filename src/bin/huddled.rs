//! Huddle Daemon - In-memory broadcast chat hub
//!
//! This binary accepts TCP clients, binds each to a display name, and fans
//! every chat line out to everyone else together with join/leave notices
//! and the live roster.
//!
//! # Usage
//!
//! ```bash
//! # Listen on the default address (127.0.0.1:8080)
//! huddled
//!
//! # Listen elsewhere, echo chat back to senders
//! huddled --listen 0.0.0.0:9000 --echo
//!
//! # Address from the environment
//! HUDDLE_LISTEN=0.0.0.0:9000 huddled
//! ```

use std::env;
use std::process;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use huddled::config::{HubConfig, DEFAULT_MAX_MEMBERS, DEFAULT_QUEUE_CAPACITY, MIN_QUEUE_CAPACITY};
use huddled::registry::spawn_registry;
use huddled::server::{HubServer, DEFAULT_LISTEN_ADDR};

/// Time given to connections to flush after shutdown is requested
const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_millis(200);

/// Huddle daemon - broadcast chat hub
#[derive(Parser, Debug)]
#[command(name = "huddled", version, about)]
struct Args {
    /// Address to listen on [env: HUDDLE_LISTEN] [default: 127.0.0.1:8080]
    #[arg(short, long)]
    listen: Option<String>,

    /// Capacity of each client's outbound queue; a client that falls this far behind is dropped
    #[arg(long, default_value_t = DEFAULT_QUEUE_CAPACITY, value_parser = parse_queue_capacity)]
    queue_capacity: usize,

    /// Maximum number of connected clients
    #[arg(long, default_value_t = DEFAULT_MAX_MEMBERS)]
    max_members: usize,

    /// Disconnect clients that send nothing for this many seconds (0 disables)
    #[arg(long, default_value_t = 0)]
    idle_timeout_secs: u64,

    /// Also deliver each chat line back to its sender
    #[arg(long)]
    echo: bool,
}

impl Args {
    fn listen_addr(&self) -> String {
        self.listen
            .clone()
            .or_else(|| env::var("HUDDLE_LISTEN").ok())
            .unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string())
    }

    fn hub_config(&self) -> HubConfig {
        HubConfig {
            queue_capacity: self.queue_capacity,
            max_members: self.max_members,
            echo_chat_to_sender: self.echo,
            idle_timeout: (self.idle_timeout_secs > 0)
                .then(|| Duration::from_secs(self.idle_timeout_secs)),
            ..Default::default()
        }
        .normalized()
    }
}

/// Parses `--queue-capacity`, refusing queues too small to hold a join burst.
fn parse_queue_capacity(value: &str) -> std::result::Result<usize, String> {
    let capacity: usize = value
        .parse()
        .map_err(|e| format!("invalid queue capacity {value:?}: {e}"))?;
    if capacity < MIN_QUEUE_CAPACITY {
        return Err(format!("queue capacity must be at least {MIN_QUEUE_CAPACITY}"));
    }
    Ok(capacity)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("huddled=info".parse()?)
                .add_directive("huddle_protocol=info".parse()?),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        "Huddle daemon starting"
    );

    let listen_addr = args.listen_addr();
    let config = args.hub_config();
    let cancel_token = CancellationToken::new();

    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    let registry = spawn_registry(&config);
    info!(
        queue_capacity = config.queue_capacity,
        max_members = config.max_members,
        echo = config.echo_chat_to_sender,
        "Connection registry started"
    );

    let server = HubServer::bind(&listen_addr, registry, config, cancel_token)
        .await
        .with_context(|| format!("Failed to start server on {listen_addr}"))?;

    if let Err(e) = server.run().await {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    tokio::time::sleep(SHUTDOWN_GRACE_PERIOD).await;
    info!("Huddle daemon stopped");
    Ok(())
}

async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
