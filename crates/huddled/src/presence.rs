//! Presence notices built from registry snapshots.
//!
//! Everything here is a pure function of its arguments (plus the clock for
//! notice timestamps); the registry actor calls these while it holds the
//! only copy of the membership set, so a snapshot can never be torn.

use huddle_protocol::Envelope;

/// System notice announcing that `name` has joined.
pub fn join_notice(name: &str) -> Envelope {
    Envelope::system(format!("{name} joined the chat"))
}

/// System notice announcing that `name` has left.
pub fn leave_notice(name: &str) -> Envelope {
    Envelope::system(format!("{name} left the chat"))
}

/// Roster envelope listing every name in the snapshot, in iteration order.
pub fn roster<'a, I>(names: I) -> Envelope
where
    I: IntoIterator<Item = &'a str>,
{
    Envelope::roster(names.into_iter().map(str::to_owned).collect())
}
