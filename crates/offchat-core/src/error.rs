//! # Error Types
//!
//! Domain-specific error types for offchat-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  offchat-core errors (this file)                                       │
//! │  ├── CoreError   - Local-action validation and wire decoding           │
//! │  └── ErrorKind   - Flat, serializable kind the UI is notified with     │
//! │                                                                         │
//! │  offchat-sync errors (separate crate)                                  │
//! │  └── SyncError   - Transport, invitation, config, channel failures     │
//! │                                                                         │
//! │  Flow: CoreError → SyncError → ErrorKind → ChatEventSink::on_error     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;
use ts_rs::TS;

// =============================================================================
// Error Kind
// =============================================================================

/// The kinds of failure a UI layer is notified about.
///
/// `NotFound`, `AlreadyDeleted` and `EmptyContent` only ever occur on the
/// local-action path and are returned to the caller; the others arrive through
/// the event surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The discovery medium (radio, network) could not start.
    TransportUnavailable,
    /// An invitation was not answered inside the acceptance window.
    InvitationTimeout,
    /// A peer session ended without a local disconnect.
    PeerDisconnected,
    /// An inbound payload could not be decoded.
    InvalidEnvelope,
    /// Edit/delete target is not in the local store.
    NotFound,
    /// Edit attempted on a deleted message.
    AlreadyDeleted,
    /// Compose/edit with blank content.
    EmptyContent,
    /// The transport rejected an outbound envelope.
    SendFailed,
}

impl ErrorKind {
    /// Human-readable description shown in an error alert.
    pub fn description(&self) -> &'static str {
        match self {
            ErrorKind::TransportUnavailable => "Peer discovery is not available",
            ErrorKind::InvitationTimeout => "Connection timed out",
            ErrorKind::PeerDisconnected => "Peer disconnected unexpectedly",
            ErrorKind::InvalidEnvelope => "Invalid data received",
            ErrorKind::NotFound => "Message not found",
            ErrorKind::AlreadyDeleted => "Message was deleted",
            ErrorKind::EmptyContent => "Message is empty",
            ErrorKind::SendFailed => "Failed to send message",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.description())
    }
}

// =============================================================================
// Core Error
// =============================================================================

/// Core synchronization errors.
///
/// None of these leave the message store partially modified: every operation
/// validates before it mutates.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// Edit/delete target id is not in the local store.
    #[error("Message not found: {0}")]
    NotFound(String),

    /// Edit attempted on a message that has been deleted.
    ///
    /// ## When This Occurs
    /// ```text
    /// delete(m) ──► m.is_deleted = true
    ///      │
    ///      ▼
    /// edit(m, "…") ──► AlreadyDeleted(m.id)   (store untouched)
    /// ```
    #[error("Message {0} has been deleted")]
    AlreadyDeleted(String),

    /// Compose or edit with content that is blank after trimming.
    #[error("Message content cannot be empty")]
    EmptyContent,

    /// Inbound payload could not be decoded into an envelope.
    #[error("Invalid envelope: {0}")]
    InvalidEnvelope(String),
}

impl CoreError {
    /// Returns the notification kind for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::NotFound(_) => ErrorKind::NotFound,
            CoreError::AlreadyDeleted(_) => ErrorKind::AlreadyDeleted,
            CoreError::EmptyContent => ErrorKind::EmptyContent,
            CoreError::InvalidEnvelope(_) => ErrorKind::InvalidEnvelope,
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::InvalidEnvelope(err.to_string())
    }
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================
