//! # Sync Error Types
//!
//! Error types for node and transport operations.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │   Transport     │  │     Core                │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  Unavailable    │  │  NotFound               │ │
//! │  │  ConfigLoad     │  │  InvitationTime │  │  AlreadyDeleted         │ │
//! │  │  ConfigSave     │  │  PeerDisconnect │  │  EmptyContent           │ │
//! │  │                 │  │  SendFailed     │  │  InvalidEnvelope        │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐                                                   │
//! │  │    Internal     │                                                   │
//! │  │  ChannelError   │                                                   │
//! │  │  ShuttingDown   │                                                   │
//! │  └─────────────────┘                                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use offchat_core::{CoreError, ErrorKind};
use thiserror::Error;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Sync error type covering node, transport and configuration failures.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid chat configuration.
    #[error("Invalid chat configuration: {0}")]
    InvalidConfig(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Transport Errors
    // =========================================================================
    /// The discovery medium could not start.
    #[error("Transport unavailable: {0}")]
    TransportUnavailable(String),

    /// An invitation went unanswered past the acceptance window.
    #[error("Invitation from {peer} timed out")]
    InvitationTimeout { peer: String },

    /// A session ended without a local disconnect.
    #[error("Peer disconnected: {0}")]
    PeerDisconnected(String),

    /// The transport rejected an outbound payload.
    #[error("Send failed: {0}")]
    SendFailed(String),

    // =========================================================================
    // Core Errors
    // =========================================================================
    /// Local action validation or envelope decoding failed.
    #[error(transparent)]
    Core(#[from] CoreError),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// The node has stopped.
    #[error("Chat node is shutting down")]
    ShuttingDown,

    /// Channel send/receive failed.
    #[error("Channel error: {0}")]
    ChannelError(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Core(CoreError::from(err))
    }
}

/// Read failures while loading. `ChatConfig::save` maps its own I/O errors.
impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization
// =============================================================================

impl SyncError {
    /// Notification kind for the UI, if this error maps onto one.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            SyncError::TransportUnavailable(_) => Some(ErrorKind::TransportUnavailable),
            SyncError::InvitationTimeout { .. } => Some(ErrorKind::InvitationTimeout),
            SyncError::PeerDisconnected(_) => Some(ErrorKind::PeerDisconnected),
            SyncError::SendFailed(_) => Some(ErrorKind::SendFailed),
            SyncError::Core(err) => Some(err.kind()),
            _ => None,
        }
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::ConfigLoadFailed(_)
                | SyncError::ConfigSaveFailed(_)
        )
    }
}
