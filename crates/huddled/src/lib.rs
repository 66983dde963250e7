//! Huddle Daemon - Connection registry and broadcast hub
//!
//! This crate provides the core infrastructure for the huddle chat hub:
//! - `registry` - Registry actor owning the live connection set and fan-out
//! - `server` - TCP listener, handshake and per-connection pumps
//! - `presence` - Join/leave notices and roster envelopes
//! - `config` - Tunables shared by the registry and connections
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       huddled daemon                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐   │
//! │  │   HubServer     │────▶│     RegistryActor           │   │
//! │  │  (TcpListener)  │     │  (membership owner)         │   │
//! │  └────────┬────────┘     └──────────────┬──────────────┘   │
//! │           │                             │                   │
//! │           │ connections                 │ try_send          │
//! │           ▼                             ▼                   │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐   │
//! │  │   Connection    │◀────│  bounded outbound queues    │   │
//! │  │ (reader/writer) │     │  (one per member)           │   │
//! │  └─────────────────┘     └─────────────────────────────┘   │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

pub mod config;
pub mod presence;
pub mod registry;
pub mod server;
