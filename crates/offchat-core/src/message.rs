//! # Message Model
//!
//! The chat message record exchanged between peers.
//!
//! ## Field Mutability
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           Message                                       │
//! │                                                                         │
//! │  IMMUTABLE (set once at creation)     MUTABLE (SyncEngine only)         │
//! │  ────────────────────────────────     ─────────────────────────         │
//! │  id          UUID v4 string           content     "" after delete       │
//! │  sender_name display name             is_edited   false → true          │
//! │  created_at  UTC, whole seconds       is_deleted  false → true (never   │
//! │                                                   reverts)              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Dual Equality
//! - `==` compares every field (used by tests and snapshot comparison)
//! - lookup identity is `id` alone (see [`Message::same_id`])

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

/// A single chat message.
///
/// Serialized with the wire field names peers exchange:
/// `id`, `senderName`, `content`, `timestamp`, `isEdited`, `isDeleted`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Unique identifier (UUID v4).
    id: String,

    /// Display name of the author.
    sender_name: String,

    /// Message body. Empty once deleted.
    content: String,

    /// When the message was composed.
    #[serde(rename = "timestamp", with = "wire_time")]
    #[ts(as = "String")]
    created_at: DateTime<Utc>,

    /// Set once content changes after creation.
    #[serde(default)]
    is_edited: bool,

    /// Set once the message is deleted.
    #[serde(default)]
    is_deleted: bool,
}

impl Message {
    /// Creates a fresh message with a new id and the current time.
    ///
    /// The timestamp is truncated to whole seconds so the wire form stays a
    /// plain `YYYY-MM-DDTHH:MM:SSZ` string.
    pub fn new(sender_name: impl Into<String>, content: impl Into<String>) -> Self {
        Message {
            id: Uuid::new_v4().to_string(),
            sender_name: sender_name.into(),
            content: content.into(),
            created_at: Utc::now().trunc_subsecs(0),
            is_edited: false,
            is_deleted: false,
        }
    }

    /// Reconstructs a message from all of its fields.
    ///
    /// Intended for system use: rebuilding snapshots and tests.
    pub fn from_parts(
        id: impl Into<String>,
        sender_name: impl Into<String>,
        content: impl Into<String>,
        created_at: DateTime<Utc>,
        is_edited: bool,
        is_deleted: bool,
    ) -> Self {
        Message {
            id: id.into(),
            sender_name: sender_name.into(),
            content: content.into(),
            created_at,
            is_edited,
            is_deleted,
        }
    }

    #[inline]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[inline]
    pub fn sender_name(&self) -> &str {
        &self.sender_name
    }

    #[inline]
    pub fn content(&self) -> &str {
        &self.content
    }

    #[inline]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    #[inline]
    pub fn is_edited(&self) -> bool {
        self.is_edited
    }

    #[inline]
    pub fn is_deleted(&self) -> bool {
        self.is_deleted
    }

    /// True if both records describe the same message (id equality).
    #[inline]
    pub fn same_id(&self, other: &Message) -> bool {
        self.id == other.id
    }

    /// True if `name` authored this message.
    pub fn is_from(&self, name: &str) -> bool {
        self.sender_name == name
    }

    /// Text a UI should render for this message.
    pub fn display_content(&self) -> String {
        if self.is_deleted {
            return "Message deleted".to_string();
        }
        if self.is_edited {
            format!("{} (edited)", self.content)
        } else {
            self.content.clone()
        }
    }

    // =========================================================================
    // Engine-only mutation
    // =========================================================================

    pub(crate) fn set_content(&mut self, content: String) {
        self.content = content;
        self.is_edited = true;
    }

    /// Overwrites content and edited flag from a remote snapshot.
    pub(crate) fn overwrite_edit(&mut self, content: &str, is_edited: bool) {
        self.content = content.to_string();
        self.is_edited = is_edited;
    }

    pub(crate) fn mark_deleted(&mut self) {
        self.is_deleted = true;
        self.content.clear();
    }
}

/// ISO-8601 timestamp codec.
///
/// Encodes UTC with a `Z` suffix and fractional seconds only when present;
/// decodes any RFC 3339 offset and normalizes it to UTC.
mod wire_time {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::AutoSi, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| serde::de::Error::custom(format!("invalid timestamp '{}': {}", raw, e)))
    }
}
