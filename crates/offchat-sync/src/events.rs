//! # Event Surface
//!
//! How a running node reports to the UI shell.
//!
//! ```text
//!   ChatNode task ──► ChatEventSink ──► UI
//!        ▲                  │
//!        └── NodeCommand ◄──┘  (InvitationResponder::accept / decline)
//! ```
//!
//! Sink methods run on the node task and must return quickly. A sink that
//! needs to do real work forwards into a channel, which is what
//! [`ChannelSink`] does.

use offchat_core::{ConnectionState, ErrorKind, SnapshotDelta};
use tokio::sync::mpsc;

use crate::error::{SyncError, SyncResult};
use crate::node::NodeCommand;
use crate::transport::InvitationId;

// =============================================================================
// Event Sink Trait
// =============================================================================

/// Observer for node activity.
pub trait ChatEventSink: Send + Sync {
    /// The store changed, locally or from a peer.
    fn on_envelope_applied(&self, delta: &SnapshotDelta);

    /// The set of connected peers changed. `peers` is sorted.
    fn on_peer_set_changed(&self, peers: &[String]);

    /// A peer wants to connect. Answer through `responder` before the
    /// acceptance window closes.
    fn on_invitation_received(&self, from: &str, responder: InvitationResponder);

    /// Something failed outside a direct request.
    fn on_error(&self, kind: &ErrorKind, detail: &str);

    fn on_connection_state_changed(&self, _state: ConnectionState) {}
}

/// No-op sink for tests and headless nodes.
pub struct NoOpSink;

impl ChatEventSink for NoOpSink {
    fn on_envelope_applied(&self, _delta: &SnapshotDelta) {}
    fn on_peer_set_changed(&self, _peers: &[String]) {}
    fn on_invitation_received(&self, _from: &str, _responder: InvitationResponder) {}
    fn on_error(&self, _kind: &ErrorKind, _detail: &str) {}
}

// =============================================================================
// Channel Sink
// =============================================================================

/// A sink callback as a value.
#[derive(Debug)]
pub enum ChatEvent {
    Applied(SnapshotDelta),
    PeersChanged(Vec<String>),
    Invitation {
        from: String,
        responder: InvitationResponder,
    },
    Error {
        kind: ErrorKind,
        detail: String,
    },
    StateChanged(ConnectionState),
}

/// Forwards every callback into an unbounded channel.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<ChatEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ChatEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ChannelSink { tx }, rx)
    }

    fn forward(&self, event: ChatEvent) {
        let _ = self.tx.send(event);
    }
}

impl ChatEventSink for ChannelSink {
    fn on_envelope_applied(&self, delta: &SnapshotDelta) {
        self.forward(ChatEvent::Applied(delta.clone()));
    }

    fn on_peer_set_changed(&self, peers: &[String]) {
        self.forward(ChatEvent::PeersChanged(peers.to_vec()));
    }

    fn on_invitation_received(&self, from: &str, responder: InvitationResponder) {
        self.forward(ChatEvent::Invitation {
            from: from.to_string(),
            responder,
        });
    }

    fn on_error(&self, kind: &ErrorKind, detail: &str) {
        self.forward(ChatEvent::Error {
            kind: *kind,
            detail: detail.to_string(),
        });
    }

    fn on_connection_state_changed(&self, state: ConnectionState) {
        self.forward(ChatEvent::StateChanged(state));
    }
}

// =============================================================================
// Invitation Responder
// =============================================================================

/// One-shot answer to an inbound invitation.
///
/// Answering posts a command to the node and never blocks. An answer that
/// arrives after the window closed is ignored by the node.
///
/// The responder holds only a weak reference to the node, so an unanswered
/// invitation does not keep a node alive once every handle is gone.
#[derive(Debug)]
pub struct InvitationResponder {
    id: InvitationId,
    cmd_tx: mpsc::WeakSender<NodeCommand>,
}

impl InvitationResponder {
    pub(crate) fn new(id: InvitationId, cmd_tx: mpsc::WeakSender<NodeCommand>) -> Self {
        InvitationResponder { id, cmd_tx }
    }

    pub fn id(&self) -> &InvitationId {
        &self.id
    }

    pub fn accept(self) -> SyncResult<()> {
        self.respond(true)
    }

    pub fn decline(self) -> SyncResult<()> {
        self.respond(false)
    }

    fn respond(self, accept: bool) -> SyncResult<()> {
        let cmd_tx = self.cmd_tx.upgrade().ok_or(SyncError::ShuttingDown)?;
        cmd_tx
            .try_send(NodeCommand::RespondInvitation { id: self.id, accept })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Closed(_) => SyncError::ShuttingDown,
                mpsc::error::TrySendError::Full(_) => {
                    SyncError::ChannelError("Node command channel full".into())
                }
            })
    }
}
