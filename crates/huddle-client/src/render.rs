//! Plain-text rendering of envelopes for a terminal.

use std::fmt::Display;

use chrono::{Local, TimeZone};

use huddle_protocol::Envelope;

/// Renders an envelope as one terminal line in local time.
///
/// - chat: `[HH:MM:SS] name: text`
/// - system: `* text`
/// - roster: `-- online (n): a, b`
pub fn render(envelope: &Envelope) -> String {
    render_in(envelope, &Local)
}

/// Renders an envelope with timestamps shown in `tz`.
pub fn render_in<Tz>(envelope: &Envelope, tz: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    match envelope {
        Envelope::Chat {
            username,
            text,
            timestamp,
        } => format!("[{}] {username}: {text}", clock(*timestamp, tz)),
        Envelope::System { text, .. } => format!("* {text}"),
        Envelope::Roster { users } => {
            format!("-- online ({}): {}", users.len(), users.join(", "))
        }
    }
}

/// Formats epoch milliseconds as `HH:MM:SS`, or `--:--:--` if out of range.
fn clock<Tz>(millis: i64, tz: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    match tz.timestamp_millis_opt(millis).single() {
        Some(at) => at.format("%H:%M:%S").to_string(),
        None => "--:--:--".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, Utc};

    // 2023-11-14T22:13:20Z
    const TS: i64 = 1_700_000_000_000;

    #[test]
    fn test_render_chat() {
        let env = Envelope::chat("alice", "hi", TS);
        assert_eq!(render_in(&env, &Utc), "[22:13:20] alice: hi");
    }

    #[test]
    fn test_render_chat_in_offset_zone() {
        let env = Envelope::chat("alice", "hi", TS);
        let plus_two = FixedOffset::east_opt(2 * 3600).unwrap();
        assert_eq!(render_in(&env, &plus_two), "[00:13:20] alice: hi");
    }

    #[test]
    fn test_render_system() {
        let env = Envelope::system("bob joined the chat");
        assert_eq!(render_in(&env, &Utc), "* bob joined the chat");
    }

    #[test]
    fn test_render_roster() {
        let env = Envelope::roster(vec!["alice".to_string(), "bob".to_string()]);
        assert_eq!(render_in(&env, &Utc), "-- online (2): alice, bob");

        let empty = Envelope::roster(Vec::new());
        assert_eq!(render_in(&empty, &Utc), "-- online (0): ");
    }

    #[test]
    fn test_out_of_range_timestamp() {
        let env = Envelope::chat("alice", "hi", i64::MAX);
        assert_eq!(render_in(&env, &Utc), "[--:--:--] alice: hi");
    }
}
