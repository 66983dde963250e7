//! The envelope exchanged between the hub and its clients.
//!
//! On the wire an envelope is a flat JSON object discriminated by its `type`
//! field (`"message"`, `"system"` or `"users"`). In memory it is a tagged union,
//! so every envelope carries exactly one discriminant and only the fields
//! that belong to it.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Sender name written into the `username` field of system notices.
pub const SYSTEM_SENDER: &str = "System";

/// Returns the current wall-clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// One unit of traffic between the hub and a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "WireEnvelope", try_from = "WireEnvelope")]
pub enum Envelope {
    /// A chat line typed by a user.
    Chat {
        username: String,
        text: String,
        /// Milliseconds since the epoch; 0 means "not stamped yet".
        timestamp: i64,
    },

    /// A notice synthesized by the hub (joins, leaves).
    System { text: String, timestamp: i64 },

    /// The full list of connected display names.
    Roster { users: Vec<String> },
}

impl Envelope {
    /// Creates a chat envelope.
    pub fn chat(username: impl Into<String>, text: impl Into<String>, timestamp: i64) -> Self {
        Self::Chat {
            username: username.into(),
            text: text.into(),
            timestamp,
        }
    }

    /// Creates a system notice stamped with the current time.
    pub fn system(text: impl Into<String>) -> Self {
        Self::System {
            text: text.into(),
            timestamp: now_millis(),
        }
    }

    /// Creates a roster envelope.
    pub fn roster(users: Vec<String>) -> Self {
        Self::Roster { users }
    }

    /// Returns the discriminant of this envelope.
    pub fn kind(&self) -> EnvelopeKind {
        match self {
            Self::Chat { .. } => EnvelopeKind::Chat,
            Self::System { .. } => EnvelopeKind::System,
            Self::Roster { .. } => EnvelopeKind::Roster,
        }
    }

    /// The username this envelope claims to come from, if it carries one.
    pub fn sender(&self) -> Option<&str> {
        match self {
            Self::Chat { username, .. } => Some(username),
            Self::System { .. } => Some(SYSTEM_SENDER),
            Self::Roster { .. } => None,
        }
    }

    /// The text body for chat and system envelopes.
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Chat { text, .. } | Self::System { text, .. } => Some(text),
            Self::Roster { .. } => None,
        }
    }

    /// The timestamp for chat and system envelopes.
    pub fn timestamp(&self) -> Option<i64> {
        match self {
            Self::Chat { timestamp, .. } | Self::System { timestamp, .. } => Some(*timestamp),
            Self::Roster { .. } => None,
        }
    }

    /// Fills in a zero timestamp with `now`. Already-stamped envelopes and
    /// rosters are returned unchanged.
    pub fn stamped(mut self, now: i64) -> Self {
        if let Self::Chat { timestamp, .. } | Self::System { timestamp, .. } = &mut self {
            if *timestamp == 0 {
                *timestamp = now;
            }
        }
        self
    }
}

/// Discriminant of an [`Envelope`], as spelled in the `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EnvelopeKind {
    #[serde(rename = "message")]
    Chat,
    #[serde(rename = "system")]
    System,
    #[serde(rename = "users")]
    Roster,
}

impl EnvelopeKind {
    /// The wire spelling of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chat => "message",
            Self::System => "system",
            Self::Roster => "users",
        }
    }
}

impl std::fmt::Display for EnvelopeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raised when a well-formed JSON object lacks a field its `type` requires.
#[derive(Debug, Clone, Error)]
#[error("{kind} envelope is missing `{field}`")]
pub struct MissingField {
    kind: EnvelopeKind,
    field: &'static str,
}

/// Flat wire shape. Unknown `type` values fail here, before any variant
/// is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timestamp: Option<i64>,
    #[serde(rename = "type")]
    kind: EnvelopeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    users: Option<Vec<String>>,
}

impl From<Envelope> for WireEnvelope {
    fn from(envelope: Envelope) -> Self {
        match envelope {
            Envelope::Chat {
                username,
                text,
                timestamp,
            } => Self {
                username: Some(username),
                text: Some(text),
                timestamp: Some(timestamp),
                kind: EnvelopeKind::Chat,
                users: None,
            },
            Envelope::System { text, timestamp } => Self {
                username: Some(SYSTEM_SENDER.to_string()),
                text: Some(text),
                timestamp: Some(timestamp),
                kind: EnvelopeKind::System,
                users: None,
            },
            Envelope::Roster { users } => Self {
                username: None,
                text: None,
                timestamp: None,
                kind: EnvelopeKind::Roster,
                users: Some(users),
            },
        }
    }
}

impl TryFrom<WireEnvelope> for Envelope {
    type Error = MissingField;

    fn try_from(wire: WireEnvelope) -> Result<Self, Self::Error> {
        let kind = wire.kind;
        let missing = |field| MissingField { kind, field };

        match kind {
            EnvelopeKind::Chat => Ok(Self::Chat {
                username: wire.username.ok_or_else(|| missing("username"))?,
                text: wire.text.ok_or_else(|| missing("text"))?,
                timestamp: wire.timestamp.unwrap_or(0),
            }),
            EnvelopeKind::System => Ok(Self::System {
                text: wire.text.ok_or_else(|| missing("text"))?,
                timestamp: wire.timestamp.unwrap_or(0),
            }),
            EnvelopeKind::Roster => Ok(Self::Roster {
                users: wire.users.ok_or_else(|| missing("users"))?,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_notice_is_sent_as_system_user() {
        let json = serde_json::to_string(&Envelope::System {
            text: "alice joined the chat".to_string(),
            timestamp: 42,
        })
        .unwrap();

        assert!(json.contains("\"type\":\"system\""));
        assert!(json.contains("\"username\":\"System\""));
        assert!(json.contains("\"timestamp\":42"));
        assert!(!json.contains("users"));
    }

    #[test]
    fn test_roster_carries_only_users() {
        let json = serde_json::to_string(&Envelope::roster(vec![
            "alice".to_string(),
            "bob".to_string(),
        ]))
        .unwrap();

        assert_eq!(json, r#"{"type":"users","users":["alice","bob"]}"#);
    }

    #[test]
    fn test_chat_without_timestamp_defaults_to_zero() {
        let env: Envelope =
            serde_json::from_str(r#"{"type":"message","username":"alice","text":"hi"}"#).unwrap();
        assert_eq!(env, Envelope::chat("alice", "hi", 0));
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let result: Result<Envelope, _> =
            serde_json::from_str(r#"{"type":"typing","username":"alice","text":"hi"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_chat_missing_username_is_rejected() {
        let err = serde_json::from_str::<Envelope>(r#"{"type":"message","text":"hi"}"#)
            .unwrap_err()
            .to_string();
        assert!(err.contains("missing `username`"), "{err}");
    }

    #[test]
    fn test_stamped_only_fills_zero() {
        let fresh = Envelope::chat("alice", "hi", 0).stamped(1_700_000_000_000);
        assert_eq!(fresh.timestamp(), Some(1_700_000_000_000));

        let kept = Envelope::chat("alice", "hi", 5).stamped(1_700_000_000_000);
        assert_eq!(kept.timestamp(), Some(5));

        let roster = Envelope::roster(vec![]).stamped(1);
        assert_eq!(roster.timestamp(), None);
    }

    #[test]
    fn test_sender() {
        assert_eq!(Envelope::chat("bob", "x", 1).sender(), Some("bob"));
        assert_eq!(Envelope::system("x").sender(), Some(SYSTEM_SENDER));
        assert_eq!(Envelope::roster(vec![]).sender(), None);
    }
}
