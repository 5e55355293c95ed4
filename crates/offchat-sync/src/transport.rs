//! # Peer Transport
//!
//! The capability boundary between a chat node and the discovery medium.
//!
//! ## Session Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Invitation Handshake                                 │
//! │                                                                         │
//! │   HOST (advertising)                       JOINER (browsing)            │
//! │   ──────────────────                       ─────────────────            │
//! │   start_advertising()                      start_browsing()             │
//! │          │                                        │                     │
//! │          │  ◄──────── finds host, invites ────────┤                     │
//! │          ▼                                        │                     │
//! │   InvitationReceived{id, from}                    │                     │
//! │          │                                        │                     │
//! │   respond_to_invitation(id, true)                 │                     │
//! │          │                                        │                     │
//! │          ▼                                        ▼                     │
//! │   PeerJoined(joiner)                       PeerJoined(host)             │
//! │          │                                        │                     │
//! │   send(payload) ─────── EnvelopeReceived ────────►│                     │
//! │          │◄────────────  EnvelopeReceived ─────── send(payload)         │
//! │          │                                        │                     │
//! │   PeerLeft(joiner) ◄───── disconnect() ────────── ┘                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Request methods never block: outcomes arrive later on the event channel
//! returned by the transport's constructor, in the order they happened.

use std::fmt;

use offchat_core::DiscoveryMode;
use serde::{Deserialize, Serialize};

use crate::error::SyncResult;

// =============================================================================
// Invitation Id
// =============================================================================

/// Opaque token identifying an inbound invitation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InvitationId(String);

impl InvitationId {
    pub fn new(value: impl Into<String>) -> Self {
        InvitationId(value.into())
    }

    /// A fresh random id.
    pub fn generate() -> Self {
        InvitationId(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InvitationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Transport Events
// =============================================================================

/// Something that happened on the medium.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A session with `name` is established.
    PeerJoined(String),
    /// The session with `name` ended.
    PeerLeft(String),
    /// Raw bytes from a connected peer.
    EnvelopeReceived { from: String, payload: Vec<u8> },
    /// A browsing peer wants to connect. Answer with
    /// [`PeerTransport::respond_to_invitation`].
    InvitationReceived { id: InvitationId, from: String },
    /// Discovery in `mode` could not start.
    StartFailed { mode: DiscoveryMode, reason: String },
}

impl TransportEvent {
    /// Short label for logs.
    pub fn label(&self) -> &'static str {
        match self {
            TransportEvent::PeerJoined(_) => "peer_joined",
            TransportEvent::PeerLeft(_) => "peer_left",
            TransportEvent::EnvelopeReceived { .. } => "envelope_received",
            TransportEvent::InvitationReceived { .. } => "invitation_received",
            TransportEvent::StartFailed { .. } => "start_failed",
        }
    }
}

// =============================================================================
// Peer Transport
// =============================================================================

/// Discovery, session and delivery capability supplied to a
/// [`ChatNode`](crate::node::ChatNode).
///
/// Implementations own encryption and reliable in-order delivery per peer.
/// A node calls these methods from a single task.
pub trait PeerTransport: Send + 'static {
    /// Begin announcing this node. Failure arrives as
    /// [`TransportEvent::StartFailed`].
    fn start_advertising(&mut self);

    fn stop_advertising(&mut self);

    /// Begin looking for advertisers and inviting them.
    fn start_browsing(&mut self);

    fn stop_browsing(&mut self);

    /// Answer an invitation. Unknown or expired ids are ignored.
    fn respond_to_invitation(&mut self, id: &InvitationId, accept: bool);

    /// Delivers `payload` to every connected peer.
    ///
    /// With no connected peers this is a no-op returning `Ok(())`.
    fn send(&mut self, payload: &[u8]) -> SyncResult<()>;

    /// Ends every session and stops discovery.
    ///
    /// Each ended session is still reported as [`TransportEvent::PeerLeft`]
    /// on this side, after any event already queued for it.
    fn disconnect(&mut self);

    /// Display name this transport announces.
    fn local_name(&self) -> &str;

    /// Starts discovery in `mode`.
    fn start(&mut self, mode: DiscoveryMode) {
        match mode {
            DiscoveryMode::Advertising => self.start_advertising(),
            DiscoveryMode::Browsing => self.start_browsing(),
        }
    }

    /// Stops discovery in `mode`.
    fn stop(&mut self, mode: DiscoveryMode) {
        match mode {
            DiscoveryMode::Advertising => self.stop_advertising(),
            DiscoveryMode::Browsing => self.stop_browsing(),
        }
    }
}
