//! Display name rules shared by the hub and its clients.
//!
//! The hub binds every connection to the normalised form of the name it
//! sent at the handshake and drops chat whose `username` differs, so a
//! client must send exactly the name this module produces.

use crate::envelope::SYSTEM_SENDER;

/// Longest display name kept, in characters
pub const MAX_DISPLAY_NAME_CHARS: usize = 64;

/// Trims a requested display name and cuts it to [`MAX_DISPLAY_NAME_CHARS`].
///
/// Whitespace exposed by the cut is trimmed too. The result may be empty.
pub fn normalize_display_name(requested: &str) -> String {
    requested
        .trim()
        .chars()
        .take(MAX_DISPLAY_NAME_CHARS)
        .collect::<String>()
        .trim_end()
        .to_string()
}

/// Returns true if `name` would pass for the hub's own notices.
pub fn is_reserved_name(name: &str) -> bool {
    name.eq_ignore_ascii_case(SYSTEM_SENDER)
}
