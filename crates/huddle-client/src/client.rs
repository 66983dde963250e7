//! Hub connection client for the huddle line client.
//!
//! This module provides the `ChatClient` which handles:
//! - Connection to the hub over TCP and the display name handshake
//! - Automatic reconnection with exponential backoff, up to a fixed number of attempts
//! - Forwarding hub envelopes to the UI and typed lines to the hub
//!
//! **Panic-Free Policy:** This module follows the project's panic-free guidelines.
//! No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, or `todo!()`.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::codec::{Framed, LinesCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use huddle_protocol::{codec, is_reserved_name, normalize_display_name, now_millis, Envelope};

use crate::error::{ClientError, Result};

/// Longest line accepted from the hub (1 MB).
const MAX_FRAME_LEN: usize = 1_048_576;

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for the chat client.
///
/// # Example
///
/// ```rust
/// use huddle_client::client::ClientConfig;
/// use std::time::Duration;
///
/// let config = ClientConfig {
///     username: "alice".to_string(),
///     retry_initial_delay: Duration::from_millis(500),
///     ..Default::default()
/// };
/// assert_eq!(config.max_attempts, 5);
/// ```
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Address of the hub, e.g. `127.0.0.1:8080`.
    pub server_addr: String,

    /// Display name sent at handshake and used on outgoing chat lines.
    pub username: String,

    /// Delay after the first failed attempt.
    pub retry_initial_delay: Duration,

    /// Maximum delay between attempts.
    pub retry_max_delay: Duration,

    /// Multiplier for exponential backoff (e.g., 2.0 doubles delay each retry).
    pub retry_multiplier: f64,

    /// Consecutive failed attempts after which the client gives up.
    pub max_attempts: u32,

    /// Show our own chat lines locally as they are sent.
    pub local_echo: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:8080".to_string(),
            username: String::new(),
            retry_initial_delay: Duration::from_secs(1),
            retry_max_delay: Duration::from_secs(30),
            retry_multiplier: 2.0,
            max_attempts: 5,
            local_echo: true,
        }
    }
}

impl ClientConfig {
    /// Normalises the username the way the hub does and rejects names the
    /// hub would not bind.
    ///
    /// The hub binds the normalised name, and every outgoing chat line must
    /// carry exactly that name or the hub drops it.
    pub fn validated(mut self) -> Result<Self> {
        self.username = normalize_display_name(&self.username);
        if self.username.is_empty() {
            return Err(ClientError::EmptyUsername);
        }
        if is_reserved_name(&self.username) {
            return Err(ClientError::ReservedUsername(self.username));
        }
        self.max_attempts = self.max_attempts.max(1);
        Ok(self)
    }
}

/// Computes the next backoff delay, capped at `max`.
pub fn next_delay(current: Duration, multiplier: f64, max: Duration) -> Duration {
    let next_ms = (current.as_millis() as f64 * multiplier) as u64;
    Duration::from_millis(next_ms).min(max)
}

// ============================================================================
// Events
// ============================================================================

/// What the client reports to the UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// Handshake sent; the hub will announce us next.
    Connected,

    /// An envelope from the hub, or a locally echoed chat line.
    Envelope(Envelope),

    /// The connection dropped; a reconnect follows.
    Disconnected,
}

/// How a single connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    /// Cancelled by the owner.
    Cancelled,
    /// The input channel closed; the user is done.
    InputClosed,
    /// The hub closed the connection.
    ServerClosed,
}

// ============================================================================
// Chat Client
// ============================================================================

/// Client for talking to the hub.
///
/// # Connection Lifecycle
///
/// 1. Connects to the hub, retrying with exponential backoff
/// 2. Sends the display name line
/// 3. Forwards hub envelopes to the UI and input lines to the hub
/// 4. On disconnect, notifies the UI and starts over from 1
///
/// Gives up with [`ClientError::RetriesExhausted`] after `max_attempts`
/// consecutive failed connects. A successful connect resets the count.
pub struct ChatClient {
    /// Configuration for connection behavior.
    config: ClientConfig,

    /// Channel to send events to the UI.
    event_tx: mpsc::UnboundedSender<ClientEvent>,

    /// Lines typed by the user.
    input_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>,

    /// Cancellation token for graceful shutdown.
    cancel_token: CancellationToken,
}

impl ChatClient {
    /// Creates a new chat client.
    ///
    /// # Arguments
    ///
    /// * `config` - Connection behavior and display name
    /// * `event_tx` - Channel to send events to the UI
    /// * `input_rx` - Channel of lines to send as chat
    /// * `cancel_token` - Token for signaling shutdown
    #[must_use]
    pub fn new(
        config: ClientConfig,
        event_tx: mpsc::UnboundedSender<ClientEvent>,
        input_rx: mpsc::UnboundedReceiver<String>,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            config,
            event_tx,
            input_rx: tokio::sync::Mutex::new(input_rx),
            cancel_token,
        }
    }

    /// Main loop that maintains the connection to the hub.
    ///
    /// Returns `Ok(())` when cancelled or when the input channel closes.
    pub async fn run(&self) -> Result<()> {
        info!(
            server = %self.config.server_addr,
            username = %self.config.username,
            "Chat client starting"
        );

        loop {
            let stream = match self.connect_with_retry().await {
                Ok(stream) => stream,
                Err(ClientError::Cancelled) => return Ok(()),
                Err(e) => return Err(e),
            };

            info!(server = %self.config.server_addr, "Connected to hub");

            match self.handle_connection(stream).await {
                Ok(SessionEnd::Cancelled) | Ok(SessionEnd::InputClosed) => {
                    info!("Chat client shutting down");
                    return Ok(());
                }
                Ok(SessionEnd::ServerClosed) => {
                    info!("Hub closed the connection");
                }
                Err(e) => {
                    warn!(error = %e, "Connection ended with error");
                }
            }

            // Ignore send errors - UI may be shutting down
            let _ = self.event_tx.send(ClientEvent::Disconnected);
        }
    }

    /// Attempts to connect with exponential backoff.
    ///
    /// # Returns
    ///
    /// * `Ok(TcpStream)` - Connected stream
    /// * `Err(ClientError::RetriesExhausted)` - `max_attempts` consecutive failures
    /// * `Err(ClientError::Cancelled)` - Cancelled while waiting
    async fn connect_with_retry(&self) -> Result<TcpStream> {
        let mut delay = self.config.retry_initial_delay;
        let mut attempt = 0u32;

        loop {
            attempt = attempt.saturating_add(1);

            debug!(attempt, server = %self.config.server_addr, "Attempting to connect");

            let connect = tokio::select! {
                _ = self.cancel_token.cancelled() => return Err(ClientError::Cancelled),
                result = TcpStream::connect(&self.config.server_addr) => result,
            };

            match connect {
                Ok(stream) => {
                    debug!(attempt, "Connection successful");
                    return Ok(stream);
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Connection attempt failed");
                }
            }

            if attempt >= self.config.max_attempts {
                return Err(ClientError::RetriesExhausted {
                    addr: self.config.server_addr.clone(),
                    attempts: attempt,
                });
            }

            tokio::select! {
                _ = sleep(delay) => {
                    delay = next_delay(delay, self.config.retry_multiplier, self.config.retry_max_delay);
                }
                _ = self.cancel_token.cancelled() => {
                    info!("Connection retry cancelled");
                    return Err(ClientError::Cancelled);
                }
            }
        }
    }

    /// Runs one established connection until it ends.
    async fn handle_connection(&self, stream: TcpStream) -> Result<SessionEnd> {
        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "Failed to set TCP_NODELAY");
        }

        let mut transport = Framed::new(stream, LinesCodec::new_with_max_length(MAX_FRAME_LEN));
        transport.send(self.config.username.clone()).await?;
        let _ = self.event_tx.send(ClientEvent::Connected);

        let mut input_rx = self.input_rx.lock().await;

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    debug!("Message loop cancelled");
                    return Ok(SessionEnd::Cancelled);
                }

                frame = transport.next() => match frame {
                    Some(Ok(line)) => self.forward_frame(&line),
                    Some(Err(e)) => return Err(e.into()),
                    None => return Ok(SessionEnd::ServerClosed),
                },

                line = input_rx.recv() => match line {
                    Some(text) => {
                        if let Some(envelope) = self.outgoing(&text) {
                            transport.send(codec::encode(&envelope)?).await?;
                            if self.config.local_echo {
                                let _ = self.event_tx.send(ClientEvent::Envelope(envelope));
                            }
                        }
                    }
                    None => {
                        debug!("Input closed");
                        let _ = SinkExt::<String>::close(&mut transport).await;
                        return Ok(SessionEnd::InputClosed);
                    }
                },
            }
        }
    }

    /// Decodes a frame from the hub and passes it to the UI.
    fn forward_frame(&self, line: &str) {
        match codec::decode(line) {
            Ok(envelope) => {
                let _ = self.event_tx.send(ClientEvent::Envelope(envelope));
            }
            Err(e) => {
                warn!(error = %e, "Ignoring undecodable frame from hub");
            }
        }
    }

    /// Builds the chat envelope for a typed line. Blank lines send nothing.
    fn outgoing(&self, text: &str) -> Option<Envelope> {
        let text = text.trim_end_matches(['\r', '\n']);
        if text.trim().is_empty() {
            return None;
        }
        Some(Envelope::chat(&self.config.username, text, now_millis()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use huddle_protocol::MAX_DISPLAY_NAME_CHARS;
    use tokio::net::TcpListener;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(2);

    fn test_config(addr: String) -> ClientConfig {
        ClientConfig {
            server_addr: addr,
            username: "alice".to_string(),
            retry_initial_delay: Duration::from_millis(10),
            retry_max_delay: Duration::from_millis(40),
            ..Default::default()
        }
    }

    #[test]
    fn test_exponential_backoff_calculation() {
        let max = Duration::from_secs(30);
        let d1 = next_delay(Duration::from_secs(1), 2.0, max);
        assert_eq!(d1, Duration::from_secs(2));
        let d2 = next_delay(d1, 2.0, max);
        assert_eq!(d2, Duration::from_secs(4));
    }

    #[test]
    fn test_exponential_backoff_max_cap() {
        let max = Duration::from_secs(30);
        assert_eq!(next_delay(Duration::from_secs(20), 2.0, max), max);
    }

    #[test]
    fn test_config_validation() {
        let config = ClientConfig {
            username: "  alice ".to_string(),
            ..Default::default()
        };
        assert_eq!(config.validated().unwrap().username, "alice");

        let blank = ClientConfig {
            username: "   ".to_string(),
            ..Default::default()
        };
        assert!(matches!(blank.validated(), Err(ClientError::EmptyUsername)));
    }

    #[test]
    fn test_long_username_cut_like_the_hub() {
        let config = ClientConfig {
            username: "a".repeat(80),
            ..Default::default()
        }
        .validated()
        .unwrap();
        assert_eq!(config.username, "a".repeat(MAX_DISPLAY_NAME_CHARS));
    }

    #[test]
    fn test_reserved_username_rejected() {
        let config = ClientConfig {
            username: " System ".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            config.validated(),
            Err(ClientError::ReservedUsername(name)) if name == "System"
        ));
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        // Reserve a port, then free it so connects are refused
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let (event_tx, _event_rx) = mpsc::unbounded_channel();
        let (_input_tx, input_rx) = mpsc::unbounded_channel();
        let config = ClientConfig {
            max_attempts: 2,
            ..test_config(addr.clone())
        };
        let client = ChatClient::new(config, event_tx, input_rx, CancellationToken::new());

        let result = timeout(WAIT, client.run()).await.unwrap();
        match result {
            Err(ClientError::RetriesExhausted { addr: tried, attempts }) => {
                assert_eq!(tried, addr);
                assert_eq!(attempts, 2);
            }
            other => panic!("expected RetriesExhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_handshake_forwarding_and_local_echo() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let client = ChatClient::new(test_config(addr), event_tx, input_rx, CancellationToken::new());
        let client_task = tokio::spawn(async move { client.run().await });

        let (socket, _) = listener.accept().await.unwrap();
        let mut hub = Framed::new(socket, LinesCodec::new());

        // Display name comes first
        let name = timeout(WAIT, hub.next()).await.unwrap().unwrap().unwrap();
        assert_eq!(name, "alice");
        assert_eq!(event_rx.recv().await, Some(ClientEvent::Connected));

        let roster = Envelope::roster(vec!["alice".to_string()]);
        hub.send(codec::encode(&roster).unwrap()).await.unwrap();
        assert_eq!(event_rx.recv().await, Some(ClientEvent::Envelope(roster)));

        input_tx.send("   ".to_string()).unwrap();
        input_tx.send("hello".to_string()).unwrap();
        let frame = timeout(WAIT, hub.next()).await.unwrap().unwrap().unwrap();
        let sent = codec::decode(&frame).unwrap();
        assert_eq!(sent.sender(), Some("alice"));
        assert_eq!(sent.text(), Some("hello"));

        match event_rx.recv().await {
            Some(ClientEvent::Envelope(echo)) => assert_eq!(echo, sent),
            other => panic!("expected local echo, got {other:?}"),
        }

        // Closing input ends the client cleanly
        drop(input_tx);
        let result = timeout(WAIT, client_task).await.unwrap().unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_reconnects_after_server_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let (_input_tx, input_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let client = ChatClient::new(test_config(addr), event_tx, input_rx, cancel.clone());
        let client_task = tokio::spawn(async move { client.run().await });

        let (first, _) = listener.accept().await.unwrap();
        assert_eq!(event_rx.recv().await, Some(ClientEvent::Connected));
        drop(first);
        assert_eq!(event_rx.recv().await, Some(ClientEvent::Disconnected));

        let (_second, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
        assert_eq!(event_rx.recv().await, Some(ClientEvent::Connected));

        cancel.cancel();
        let result = timeout(WAIT, client_task).await.unwrap().unwrap();
        assert!(result.is_ok());
    }
}
