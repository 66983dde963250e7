//! Huddle - line-oriented terminal client for the huddle chat hub
//!
//! Each line typed on stdin is sent as a chat message; everything the hub
//! sends is printed one line per envelope.
//!
//! # Usage
//!
//! ```text
//! huddle --username alice
//! huddle --server 10.0.0.5:8080 --username bob
//! ```

use std::env;
use std::io::{self, BufRead};
use std::thread;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use huddle_client::render::render;
use huddle_client::{ChatClient, ClientConfig, ClientEvent};
use huddled::server::DEFAULT_LISTEN_ADDR;

// ============================================================================
// CLI Arguments
// ============================================================================

/// Huddle - chat from the terminal
#[derive(Parser, Debug)]
#[command(name = "huddle", version, about)]
struct Args {
    /// Hub address [env: HUDDLE_SERVER] [default: 127.0.0.1:8080]
    #[arg(short, long)]
    server: Option<String>,

    /// Display name to join with
    #[arg(short, long)]
    username: String,

    /// Do not print your own messages as you send them
    #[arg(long)]
    no_echo: bool,
}

// ============================================================================
// Input Thread
// ============================================================================

/// Forwards stdin lines to the client. Dropping the sender on EOF ends the session.
///
/// Runs on a plain thread: a blocking stdin read must not hold up runtime
/// shutdown.
fn spawn_input_thread(input_tx: mpsc::UnboundedSender<String>) -> io::Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name("huddle-stdin".to_string())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                match line {
                    Ok(line) => {
                        if input_tx.send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        debug!(error = %e, "Failed to read stdin");
                        break;
                    }
                }
            }
            debug!("Input thread finished");
        })
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Logs go to stderr so they never interleave with chat output
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env().add_directive("huddle_client=warn".parse()?))
        .init();

    let config = ClientConfig {
        server_addr: args
            .server
            .or_else(|| env::var("HUDDLE_SERVER").ok())
            .unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string()),
        username: args.username,
        local_echo: !args.no_echo,
        ..Default::default()
    }
    .validated()
    .context("Invalid client configuration")?;

    let cancel_token = CancellationToken::new();
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let (input_tx, input_rx) = mpsc::unbounded_channel();

    let _input_thread = spawn_input_thread(input_tx).context("Failed to start input thread")?;

    let client = ChatClient::new(config, event_tx, input_rx, cancel_token.clone());
    let client_task = tokio::spawn(async move { client.run().await });

    let ctrl_c_token = cancel_token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c_token.cancel();
        }
    });

    while let Some(event) = event_rx.recv().await {
        match event {
            ClientEvent::Connected => eprintln!("-- connected"),
            ClientEvent::Disconnected => eprintln!("-- disconnected, reconnecting..."),
            ClientEvent::Envelope(envelope) => println!("{}", render(&envelope)),
        }
    }

    cancel_token.cancel();
    client_task
        .await
        .context("Client task panicked")?
        .context("Chat client stopped")?;

    Ok(())
}
