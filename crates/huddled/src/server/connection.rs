//! Duplex pump for individual client connections.
//!
//! Each client connection gets its own `Connection` that:
//! - Registers with the registry under its bound display name
//! - Runs a reader pump that validates inbound frames and forwards chat lines
//! - Runs a writer pump that drains the outbound queue onto the transport
//! - Unregisters exactly once, whichever side fails first
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?`, pattern matching, or `unwrap_or`
//! - Connection errors are logged and result in graceful disconnect

use std::time::Duration;

use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use huddle_protocol::{codec, now_millis};

use super::inbound::accept_frame;
use crate::config::{HubConfig, MIN_QUEUE_CAPACITY};
use crate::registry::{ConnectionId, Member, Outbound, RegistryError, RegistryHandle};

/// How long the writer may keep flushing after the reader has stopped.
const WRITER_GRACE: Duration = Duration::from_secs(5);

/// Newline-delimited text transport used by every connection.
pub type LineTransport<T> = Framed<T, LinesCodec>;

/// One accepted, named client connection.
///
/// Owns the transport until [`Connection::run`] splits it between the two
/// pumps. The registry never touches the transport; it only sees the
/// [`Member`] built from this connection's queue and hangup token.
pub struct Connection<T> {
    /// Stable identity in the registry
    id: ConnectionId,

    /// Display name bound at handshake
    name: String,

    /// Framed transport (split on `run`)
    transport: LineTransport<T>,

    /// Handle to the connection registry
    registry: RegistryHandle,

    /// Forced-close signal shared with the registry
    hangup: CancellationToken,

    queue_capacity: usize,
    echo_chat_to_sender: bool,
    idle_timeout: Option<Duration>,
}

impl<T> Connection<T>
where
    T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    /// Creates a new connection.
    ///
    /// # Arguments
    ///
    /// * `id` - Identity to register under
    /// * `name` - Display name bound to this connection
    /// * `transport` - Framed transport, already past the handshake
    /// * `registry` - Handle to the connection registry
    /// * `config` - Queue capacity, echo policy and idle timeout
    /// * `hangup` - Token that force-closes both pumps when cancelled
    pub fn new(
        id: ConnectionId,
        name: impl Into<String>,
        transport: LineTransport<T>,
        registry: RegistryHandle,
        config: &HubConfig,
        hangup: CancellationToken,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            transport,
            registry,
            hangup,
            queue_capacity: config.queue_capacity.max(MIN_QUEUE_CAPACITY),
            echo_chat_to_sender: config.echo_chat_to_sender,
            idle_timeout: config.idle_timeout,
        }
    }

    /// Returns the connection's id.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Returns the bound display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runs the connection to completion.
    ///
    /// Registers, then runs the reader on this task and the writer on a
    /// spawned one. Returns after both pumps have stopped, so the transport
    /// is released only once neither side can touch it.
    ///
    /// A clean close by the peer is `Ok(())`; every other ending is reported
    /// as the error that caused it.
    pub async fn run(self) -> Result<(), ConnectionError> {
        let Self {
            id,
            name,
            transport,
            registry,
            hangup,
            queue_capacity,
            echo_chat_to_sender,
            idle_timeout,
        } = self;

        let (member, outbound) = Member::with_queue(id, name.clone(), queue_capacity, hangup.clone());
        if let Err(e) = registry.register(member).await {
            warn!(conn_id = %id, username = %name, error = %e, "Registration refused");
            return Err(e.into());
        }

        let (sink, stream) = transport.split();
        let writer = tokio::spawn(write_pump(id, sink, outbound, hangup.clone()));

        let reader = ReadPump {
            id,
            name: &name,
            registry: &registry,
            hangup: &hangup,
            exclude: (!echo_chat_to_sender).then_some(id),
            idle_timeout,
        };
        let result = reader.run(stream).await;

        // The writer drains whatever is already queued, but a peer that
        // stopped reading must not pin the task forever.
        let mut writer = writer;
        let joined = match timeout(WRITER_GRACE, &mut writer).await {
            Ok(joined) => joined,
            Err(_) => {
                hangup.cancel();
                writer.await
            }
        };

        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(conn_id = %id, error = %e, "Writer stopped"),
            Err(e) => warn!(conn_id = %id, error = %e, "Writer task failed"),
        }

        info!(conn_id = %id, username = %name, "Client disconnected");
        result
    }
}

// ============================================================================
// Reader Pump
// ============================================================================

/// Borrowed state for the reader half.
struct ReadPump<'a> {
    id: ConnectionId,
    name: &'a str,
    registry: &'a RegistryHandle,
    hangup: &'a CancellationToken,
    exclude: Option<ConnectionId>,
    idle_timeout: Option<Duration>,
}

impl ReadPump<'_> {
    /// Reads frames until the transport fails or the connection is hung up.
    ///
    /// Unregisters on the way out, on every path.
    async fn run<S>(&self, mut stream: S) -> Result<(), ConnectionError>
    where
        S: Stream<Item = Result<String, LinesCodecError>> + Unpin,
    {
        let _unregister = self.registry.unregister_on_drop(self.id);

        loop {
            let frame = tokio::select! {
                biased;
                _ = self.hangup.cancelled() => {
                    debug!(conn_id = %self.id, "Reader hung up");
                    return Err(ConnectionError::HungUp);
                }
                frame = next_frame(&mut stream, self.idle_timeout) => frame,
            };

            let line = match frame {
                Ok(line) => line,
                Err(ConnectionError::Eof) => {
                    debug!(conn_id = %self.id, "Client closed connection");
                    return Ok(());
                }
                Err(e) => {
                    debug!(conn_id = %self.id, error = %e, "Read failed");
                    return Err(e);
                }
            };

            match accept_frame(&line, self.name, now_millis()) {
                Ok(envelope) => {
                    self.registry.broadcast(envelope, self.exclude).await?;
                }
                Err(e) => {
                    debug!(
                        conn_id = %self.id,
                        username = %self.name,
                        error = %e,
                        "Dropped inbound frame"
                    );
                }
            }
        }
    }
}

/// Waits for the next frame, honouring the optional idle timeout.
async fn next_frame<S>(stream: &mut S, idle_timeout: Option<Duration>) -> Result<String, ConnectionError>
where
    S: Stream<Item = Result<String, LinesCodecError>> + Unpin,
{
    let next = match idle_timeout {
        Some(limit) => timeout(limit, stream.next())
            .await
            .map_err(|_| ConnectionError::IdleTimeout)?,
        None => stream.next().await,
    };

    match next {
        Some(Ok(line)) => Ok(line),
        Some(Err(e)) => Err(e.into()),
        None => Err(ConnectionError::Eof),
    }
}

// ============================================================================
// Writer Pump
// ============================================================================

/// Drains the outbound queue onto the transport.
///
/// Ends cleanly when the registry drops the queue (the connection was
/// unregistered), closing the transport's write side on the way out. A write
/// failure hangs up the connection so the reader stops too.
async fn write_pump<S>(
    id: ConnectionId,
    mut sink: S,
    mut outbound: mpsc::Receiver<Outbound>,
    hangup: CancellationToken,
) -> Result<(), ConnectionError>
where
    S: Sink<String, Error = LinesCodecError> + Unpin,
{
    loop {
        let next = tokio::select! {
            biased;
            _ = hangup.cancelled() => return Err(ConnectionError::HungUp),
            next = outbound.recv() => next,
        };

        let Some(envelope) = next else {
            debug!(conn_id = %id, "Outbound queue closed");
            if let Err(e) = sink.close().await {
                debug!(conn_id = %id, error = %e, "Close failed");
            }
            return Ok(());
        };

        let frame = match codec::encode(&envelope) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(conn_id = %id, error = %e, "Skipping envelope that failed to encode");
                continue;
            }
        };

        let written = tokio::select! {
            biased;
            _ = hangup.cancelled() => return Err(ConnectionError::HungUp),
            written = sink.send(frame) => written,
        };

        if let Err(e) = written {
            hangup.cancel();
            return Err(e.into());
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Errors that end a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Connection closed")]
    Eof,

    #[error("Idle timeout")]
    IdleTimeout,

    #[error("Frame exceeds maximum length")]
    FrameTooLarge,

    #[error("Connection hung up")]
    HungUp,

    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),
}

impl From<LinesCodecError> for ConnectionError {
    fn from(err: LinesCodecError) -> Self {
        match err {
            LinesCodecError::MaxLineLengthExceeded => Self::FrameTooLarge,
            LinesCodecError::Io(e) => Self::Io(e.to_string()),
        }
    }
}
