//! Huddle Client - Library modules for the line-oriented chat client
//!
//! # Architecture
//!
//! The client runs two tasks joined by channels:
//!
//! 1. **Input Task**: Reads lines from stdin and sends them to the chat client
//! 2. **Chat Client Task**: Maintains the hub connection and forwards envelopes as events
//!
//! The binary's main loop renders each event with [`render::render`]. All
//! tasks respect a shared `CancellationToken` for graceful shutdown.

pub mod client;
pub mod error;
pub mod render;

// Re-export commonly used types
pub use client::{ChatClient, ClientConfig, ClientEvent};
pub use error::{ClientError, Result};
