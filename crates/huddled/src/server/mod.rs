//! TCP listener for the huddle hub.
//!
//! The server:
//! - Accepts TCP connections and allocates a `ConnectionId` per accept
//! - Reads the one-line display name handshake
//! - Spawns a `Connection` (reader + writer pump) for each named client
//! - Supports graceful shutdown via CancellationToken
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │    HubServer    │
//! │                 │
//! │   TcpListener   │
//! └───────┬─────────┘
//!         │ accept() + name line
//!         ▼
//! ┌─────────────────┐     ┌─────────────────┐
//! │   Connection    │────▶│  RegistryHandle │
//! │ (reader/writer) │◀────│  (fan-out)      │
//! └─────────────────┘     └─────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?`, pattern matching, or `unwrap_or`
//! - Server errors are logged and allow continued operation

mod connection;
mod inbound;

pub use connection::{Connection, ConnectionError, LineTransport};
pub use inbound::{accept_frame, InboundError};

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_util::codec::{Framed, LinesCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use huddle_protocol::{is_reserved_name, normalize_display_name};

use crate::config::HubConfig;
use crate::registry::{ConnectionId, RegistryHandle};

/// Default listen address
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8080";

pub use huddle_protocol::MAX_DISPLAY_NAME_CHARS;

/// Time a new client has to send its display name
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// TCP server for the hub.
///
/// Owns the listener and hands every accepted socket to its own task.
pub struct HubServer {
    /// Bound listener
    listener: TcpListener,

    /// Handle to the connection registry
    registry: RegistryHandle,

    /// Per-connection settings
    config: HubConfig,

    /// Cancellation token for graceful shutdown
    cancel_token: CancellationToken,

    /// Connection counter for generating connection ids
    connection_counter: AtomicU64,
}

impl HubServer {
    /// Binds the listener.
    ///
    /// # Arguments
    ///
    /// * `addr` - Address to listen on, e.g. `127.0.0.1:8080` (port 0 picks one)
    /// * `registry` - Handle to the connection registry
    /// * `config` - Hub settings applied to every connection
    /// * `cancel_token` - Token for graceful shutdown
    pub async fn bind(
        addr: &str,
        registry: RegistryHandle,
        config: HubConfig,
        cancel_token: CancellationToken,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr: addr.to_string(),
                error: e.to_string(),
            })?;

        Ok(Self {
            listener,
            registry,
            config: config.normalized(),
            cancel_token,
            connection_counter: AtomicU64::new(0),
        })
    }

    /// Returns the address the listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.listener
            .local_addr()
            .map_err(|e| ServerError::LocalAddr(e.to_string()))
    }

    /// Runs the server.
    ///
    /// Accepts connections until the cancellation token is triggered.
    /// Cancelling also hangs up every connection spawned by this server.
    pub async fn run(&self) -> Result<(), ServerError> {
        let addr = self.local_addr()?;
        info!(addr = %addr, "Hub server listening");

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    info!("Server shutdown requested");
                    break;
                }

                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            let conn_num = self.connection_counter.fetch_add(1, Ordering::Relaxed) + 1;
                            debug!(conn_num, peer = %peer, "Accepted connection");
                            self.handle_connection(stream, conn_num);
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }
            }
        }

        info!("Server stopped accepting connections");
        Ok(())
    }

    /// Spawns the task that owns one accepted socket.
    fn handle_connection(&self, stream: TcpStream, connection_number: u64) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "Failed to set TCP_NODELAY");
        }

        let transport = Framed::new(stream, LinesCodec::new_with_max_length(self.config.max_frame_len));
        let registry = self.registry.clone();
        let config = self.config.clone();
        let hangup = self.cancel_token.child_token();

        tokio::spawn(async move {
            serve(transport, connection_number, registry, config, hangup).await;
        });
    }
}

/// Runs the handshake and then the connection, logging how it ended.
async fn serve<T>(
    mut transport: LineTransport<T>,
    connection_number: u64,
    registry: RegistryHandle,
    config: HubConfig,
    hangup: CancellationToken,
) where
    T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let id = ConnectionId::new(connection_number);

    let requested = tokio::select! {
        biased;
        _ = hangup.cancelled() => return,
        requested = read_display_name(&mut transport) => requested,
    };

    let name = match requested {
        Ok(requested) => display_name_or_default(&requested, connection_number),
        Err(e) => {
            debug!(conn_id = %id, error = %e, "Handshake failed");
            return;
        }
    };

    info!(conn_id = %id, username = %name, "Client connected");

    let connection = Connection::new(id, name, transport, registry, &config, hangup);
    match connection.run().await {
        Ok(()) => {}
        Err(ConnectionError::HungUp) => debug!(conn_id = %id, "Connection hung up"),
        Err(e) => warn!(conn_id = %id, error = %e, "Connection ended with error"),
    }
}

/// Reads the display name line a client sends right after connecting.
async fn read_display_name<T>(transport: &mut LineTransport<T>) -> Result<String, ConnectionError>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    match timeout(HANDSHAKE_TIMEOUT, transport.next()).await {
        Ok(Some(Ok(line))) => Ok(line),
        Ok(Some(Err(e))) => Err(ConnectionError::Handshake(e.to_string())),
        Ok(None) => Err(ConnectionError::Handshake(
            "connection closed before display name".to_string(),
        )),
        Err(_) => Err(ConnectionError::Handshake(
            "timed out waiting for display name".to_string(),
        )),
    }
}

/// Normalises a requested display name.
///
/// The request is trimmed and cut to [`MAX_DISPLAY_NAME_CHARS`]. An empty
/// request, or one that would pass for the hub's own notices, becomes
/// `User_<n>`.
pub fn display_name_or_default(requested: &str, connection_number: u64) -> String {
    let name = normalize_display_name(requested);
    if name.is_empty() || is_reserved_name(&name) {
        return format!("User_{connection_number}");
    }
    name
}

/// Errors that can occur in server operations.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {error}")]
    Bind { addr: String, error: String },

    #[error("Failed to read local address: {0}")]
    LocalAddr(String),
}
