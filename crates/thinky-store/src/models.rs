//! Domain model structs persisted in the store.
//!
//! Every struct derives `Serialize` and `Deserialize` so it can be handed
//! directly to an app shell or serialized over the API.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use thinky_shared::types::DeviceId;

/// Reactions on a community message: emoji → reacting device ids.
/// Ordered map so serialized snapshots are deterministic.
pub type ReactionMap = BTreeMap<String, Vec<DeviceId>>;

// ---------------------------------------------------------------------------
// Ban record
// ---------------------------------------------------------------------------

/// Per-device moderation tally. One row per device; the counter only grows.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BanRecord {
    pub device_id: DeviceId,
    /// Pseudonym at the time of the last violation (for admin review).
    pub username: String,
    pub violation_count: u32,
    pub is_banned: bool,
    pub updated_at: DateTime<Utc>,
}

/// Authoritative post-increment state returned by the violation procedure.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ViolationOutcome {
    pub new_count: u32,
    pub is_now_banned: bool,
}

// ---------------------------------------------------------------------------
// Presence
// ---------------------------------------------------------------------------

/// A device's heartbeat row, keyed by device id.
///
/// Liveness is always decided by comparing `last_seen` against a staleness
/// window; row absence means nothing (the unload cleanup is best-effort).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PresenceRow {
    pub device_id: DeviceId,
    pub device_name: String,
    pub browser: String,
    pub os: String,
    pub username: String,
    pub current_page: String,
    /// Unix epoch milliseconds of the last heartbeat.
    pub last_seen: i64,
    pub is_admin: bool,
}

/// Heartbeat payload; the store stamps `last_seen` itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PresenceUpdate {
    pub device_id: DeviceId,
    pub device_name: String,
    pub browser: String,
    pub os: String,
    pub username: String,
    pub current_page: String,
    pub is_admin: bool,
}

// ---------------------------------------------------------------------------
// Community message
// ---------------------------------------------------------------------------

/// One message on the public anonymous board.
///
/// Append-only except for `reactions`, which is rewritten whole on toggle
/// (last write wins between concurrent togglers).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommunityMessage {
    pub id: Uuid,
    pub username: String,
    /// HTML-escaped before storage.
    pub message: String,
    pub avatar_url: Option<String>,
    pub is_admin: bool,
    pub mention_all: bool,
    pub reactions: ReactionMap,
    pub created_at: DateTime<Utc>,
}

/// Insert payload for the community board.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewCommunityMessage {
    pub username: String,
    pub message: String,
    pub avatar_url: Option<String>,
    pub is_admin: bool,
    pub mention_all: bool,
}

// ---------------------------------------------------------------------------
// Direct message
// ---------------------------------------------------------------------------

/// A pairwise device-to-device message.
///
/// Rows are created only through the moderated send procedure and are
/// immutable afterwards except for the `is_read` flag.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DirectMessage {
    pub id: Uuid,
    pub from_device_id: DeviceId,
    pub to_device_id: DeviceId,
    pub message: String,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Reviewer questions
// ---------------------------------------------------------------------------

/// Question type stored with each reviewer question.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QuestionKind {
    MultipleChoice,
    Text,
}

impl QuestionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionKind::MultipleChoice => "multiple_choice",
            QuestionKind::Text => "text",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "multiple_choice" => Some(Self::MultipleChoice),
            "text" => Some(Self::Text),
            _ => None,
        }
    }
}

/// One gradable question belonging to a reviewer.
///
/// `options` keeps whatever loosely-typed JSON shape the admin tools stored;
/// consumers normalize it at the boundary. `correct_answer` never leaves the
/// grading path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReviewerQuestion {
    pub reviewer_id: String,
    pub question_index: u32,
    pub kind: QuestionKind,
    pub prompt: String,
    pub options: serde_json::Value,
    pub correct_answer: String,
    pub points: u32,
}
