//! # Chat Node
//!
//! The single task that owns a node's message store, connection state and
//! transport.
//!
//! ## Task Model
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          ChatNode task                                  │
//! │                                                                         │
//! │   NodeHandle ──► mpsc<NodeCommand> ──┐                                  │
//! │   (clone per UI caller)              │      ┌──────────────────────┐    │
//! │                                      ├────► │ SyncEngine           │    │
//! │   InvitationResponder ───────────────┤      │ ConnectionStateMachine│   │
//! │   invitation timers ─────────────────┤      │ PeerTransport        │    │
//! │                                      │      │ pending invitations  │    │
//! │   PeerTransport ──► mpsc<TransportEvent>    └──────────┬───────────┘    │
//! │                                                        │                │
//! │                         watch<NodeStatus> ◄────────────┤                │
//! │                         ChatEventSink     ◄────────────┘                │
//! │                                                                         │
//! │   One command or event at a time, in the order each channel received   │
//! │   them. Nothing else touches the store.                                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Invitation Window
//! An inbound invitation is handed to the sink with an
//! [`InvitationResponder`] and a timer is spawned. If no answer arrives
//! within `invitation_timeout_secs` the node declines it and reports
//! [`ErrorKind::InvitationTimeout`].

use std::collections::HashMap;
use std::sync::Arc;

use offchat_core::{
    ActionEnvelope, AppliedLocal, ConnectionState, ConnectionStateMachine, DiscoveryMode,
    ErrorKind, LocalAction, Message, SyncEngine, Transition,
};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ChatConfig;
use crate::error::{SyncError, SyncResult};
use crate::events::{ChatEventSink, InvitationResponder, NoOpSink};
use crate::transport::{InvitationId, PeerTransport, TransportEvent};

// =============================================================================
// Node Status
// =============================================================================

/// Snapshot of a node's connection picture, published on every change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NodeStatus {
    pub state: ConnectionState,
    /// Connected peer names, sorted.
    pub peers: Vec<String>,
    pub advertising: bool,
    pub browsing: bool,
    pub message_count: usize,
}

impl NodeStatus {
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }
}

// =============================================================================
// Commands
// =============================================================================

/// Requests processed by the node task.
#[derive(Debug)]
pub enum NodeCommand {
    /// Start advertising (stops browsing first).
    Host { reply: oneshot::Sender<()> },
    /// Start browsing (stops advertising first).
    Join { reply: oneshot::Sender<()> },
    /// Stop discovery. Sessions stay up.
    StopDiscovery { reply: oneshot::Sender<()> },
    /// End every session and stop discovery.
    Disconnect { reply: oneshot::Sender<()> },
    /// Apply a UI action and broadcast it.
    Apply {
        action: LocalAction,
        reply: oneshot::Sender<SyncResult<AppliedLocal>>,
    },
    Snapshot { reply: oneshot::Sender<Vec<Message>> },
    RespondInvitation { id: InvitationId, accept: bool },
    InvitationExpired { id: InvitationId },
    Shutdown { reply: oneshot::Sender<()> },
}

// =============================================================================
// Chat Node
// =============================================================================

/// A configured node, not yet running.
pub struct ChatNode<T: PeerTransport> {
    config: ChatConfig,
    transport: T,
    events: mpsc::UnboundedReceiver<TransportEvent>,
    sink: Arc<dyn ChatEventSink>,
}

impl<T: PeerTransport> ChatNode<T> {
    /// Creates a node over `transport`, whose events arrive on `events`.
    pub fn new(
        config: ChatConfig,
        transport: T,
        events: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> SyncResult<Self> {
        config.validate()?;
        if transport.local_name() != config.display_name() {
            warn!(
                transport = %transport.local_name(),
                display_name = %config.display_name(),
                "Transport announces a different name than the configured display name"
            );
        }
        Ok(ChatNode {
            config,
            transport,
            events,
            sink: Arc::new(NoOpSink),
        })
    }

    /// Sets the event sink.
    pub fn with_sink(mut self, sink: Arc<dyn ChatEventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Spawns the node task and returns a handle to it.
    pub fn start(self) -> NodeHandle {
        let ChatNode {
            config,
            transport,
            events,
            sink,
        } = self;

        let (cmd_tx, cmd_rx) = mpsc::channel(config.session.command_buffer);
        let (status_tx, status_rx) = watch::channel(NodeStatus::default());

        let actor = NodeActor {
            engine: SyncEngine::new(config.display_name()),
            machine: ConnectionStateMachine::new(),
            transport,
            sink,
            pending: HashMap::new(),
            cmd_tx: cmd_tx.downgrade(),
            status_tx,
            disconnecting: false,
            config,
        };

        tokio::spawn(actor.run(cmd_rx, events));

        NodeHandle { cmd_tx, status_rx }
    }
}

// =============================================================================
// Node Handle
// =============================================================================

/// Cloneable front door to a running node.
#[derive(Clone)]
pub struct NodeHandle {
    cmd_tx: mpsc::Sender<NodeCommand>,
    status_rx: watch::Receiver<NodeStatus>,
}

impl NodeHandle {
    async fn request<R>(&self, make: impl FnOnce(oneshot::Sender<R>) -> NodeCommand) -> SyncResult<R> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(make(reply))
            .await
            .map_err(|_| SyncError::ShuttingDown)?;
        rx.await.map_err(|_| SyncError::ShuttingDown)
    }

    /// Starts advertising so browsing peers can invite this node.
    pub async fn host(&self) -> SyncResult<()> {
        self.request(|reply| NodeCommand::Host { reply }).await
    }

    /// Starts browsing and inviting advertisers.
    pub async fn join(&self) -> SyncResult<()> {
        self.request(|reply| NodeCommand::Join { reply }).await
    }

    /// Stops advertising and browsing.
    pub async fn stop(&self) -> SyncResult<()> {
        self.request(|reply| NodeCommand::StopDiscovery { reply }).await
    }

    /// Leaves every session.
    pub async fn disconnect(&self) -> SyncResult<()> {
        self.request(|reply| NodeCommand::Disconnect { reply }).await
    }

    pub async fn apply(&self, action: LocalAction) -> SyncResult<AppliedLocal> {
        self.request(|reply| NodeCommand::Apply { action, reply }).await?
    }

    pub async fn compose(&self, content: impl Into<String>) -> SyncResult<AppliedLocal> {
        self.apply(LocalAction::New {
            content: content.into(),
        })
        .await
    }

    pub async fn edit(
        &self,
        id: impl Into<String>,
        content: impl Into<String>,
    ) -> SyncResult<AppliedLocal> {
        self.apply(LocalAction::Edit {
            target_id: id.into(),
            content: content.into(),
        })
        .await
    }

    pub async fn delete(&self, id: impl Into<String>) -> SyncResult<AppliedLocal> {
        self.apply(LocalAction::Delete {
            target_id: id.into(),
        })
        .await
    }

    /// Copy of the message list in display order.
    pub async fn snapshot(&self) -> SyncResult<Vec<Message>> {
        self.request(|reply| NodeCommand::Snapshot { reply }).await
    }

    /// Latest published status.
    pub fn status(&self) -> NodeStatus {
        self.status_rx.borrow().clone()
    }

    /// Subscribes to status changes.
    pub fn subscribe(&self) -> watch::Receiver<NodeStatus> {
        self.status_rx.clone()
    }

    /// Disconnects the transport and ends the node task.
    pub async fn shutdown(&self) -> SyncResult<()> {
        self.request(|reply| NodeCommand::Shutdown { reply }).await
    }
}

// =============================================================================
// Node Actor
// =============================================================================

struct PendingInvitation {
    from: String,
    timer: JoinHandle<()>,
}

struct NodeActor<T: PeerTransport> {
    config: ChatConfig,
    engine: SyncEngine,
    machine: ConnectionStateMachine,
    transport: T,
    sink: Arc<dyn ChatEventSink>,
    pending: HashMap<InvitationId, PendingInvitation>,
    /// Weak so the loop ends once every handle is dropped.
    cmd_tx: mpsc::WeakSender<NodeCommand>,
    status_tx: watch::Sender<NodeStatus>,
    /// Set by a local disconnect until discovery starts again. Sessions that
    /// end meanwhile were ended by us and are not reported as errors.
    disconnecting: bool,
}

impl<T: PeerTransport> NodeActor<T> {
    async fn run(
        mut self,
        mut cmd_rx: mpsc::Receiver<NodeCommand>,
        mut events: mpsc::UnboundedReceiver<TransportEvent>,
    ) {
        info!(
            identity = %self.engine.identity(),
            service = %self.config.session.service_type,
            "Chat node started"
        );

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(NodeCommand::Shutdown { reply }) => {
                        self.shutdown();
                        let _ = reply.send(());
                        break;
                    }
                    Some(cmd) => self.handle_command(cmd),
                    None => {
                        self.shutdown();
                        break;
                    }
                },
                Some(event) = events.recv() => self.handle_event(event),
            }
        }

        info!(identity = %self.engine.identity(), "Chat node stopped");
    }

    // =========================================================================
    // Commands
    // =========================================================================

    fn handle_command(&mut self, cmd: NodeCommand) {
        match cmd {
            NodeCommand::Host { reply } => {
                self.start_discovery(DiscoveryMode::Advertising);
                let _ = reply.send(());
            }
            NodeCommand::Join { reply } => {
                self.start_discovery(DiscoveryMode::Browsing);
                let _ = reply.send(());
            }
            NodeCommand::StopDiscovery { reply } => {
                self.stop_discovery();
                let _ = reply.send(());
            }
            NodeCommand::Disconnect { reply } => {
                self.disconnect();
                let _ = reply.send(());
            }
            NodeCommand::Apply { action, reply } => {
                let _ = reply.send(self.apply_local(action));
            }
            NodeCommand::Snapshot { reply } => {
                let _ = reply.send(self.engine.snapshot());
            }
            NodeCommand::RespondInvitation { id, accept } => self.respond(id, accept),
            NodeCommand::InvitationExpired { id } => self.expire(id),
            NodeCommand::Shutdown { reply } => {
                // Handled by the run loop.
                let _ = reply.send(());
            }
        }
    }

    fn start_discovery(&mut self, mode: DiscoveryMode) {
        self.disconnecting = false;
        let (stopped, transition) = self.machine.start_discovery(mode);
        if let Some(stopped) = stopped {
            self.stop_transport_mode(stopped);
        }
        self.transport.start(mode);
        info!(%mode, "Discovery started");
        self.after(transition);
    }

    fn stop_discovery(&mut self) {
        for mode in [DiscoveryMode::Advertising, DiscoveryMode::Browsing] {
            if self.machine.is_active(mode) {
                self.stop_transport_mode(mode);
            }
        }
        let transition = self.machine.stop_discovery();
        self.decline_pending();
        debug!("Discovery stopped");
        self.after(transition);
    }

    fn stop_transport_mode(&mut self, mode: DiscoveryMode) {
        if mode == DiscoveryMode::Advertising {
            self.decline_pending();
        }
        self.transport.stop(mode);
    }

    /// Stops discovery and ends every session. Peers leave the set as the
    /// transport's `PeerLeft` events arrive, behind anything already queued.
    fn disconnect(&mut self) {
        self.decline_pending();
        let transition = self.machine.stop_discovery();
        self.transport.disconnect();
        self.disconnecting = true;
        info!(peers = self.machine.peers().len(), "Disconnecting from all peers");
        self.after(transition);
    }

    fn shutdown(&mut self) {
        self.decline_pending();
        self.transport.disconnect();
        self.machine.reset();
        self.publish();
    }

    fn apply_local(&mut self, action: LocalAction) -> SyncResult<AppliedLocal> {
        let applied = self.engine.apply_local(action)?;
        if let Some(delta) = &applied.delta {
            self.sink.on_envelope_applied(delta);
            self.publish();
        }
        self.broadcast(&applied.envelope);
        Ok(applied)
    }

    fn broadcast(&mut self, envelope: &ActionEnvelope) {
        if !self.machine.can_send() {
            debug!(
                action = %envelope.action,
                id = %envelope.message_id(),
                "No connected peers, envelope not sent"
            );
            return;
        }

        let result = envelope
            .encode()
            .map_err(SyncError::from)
            .and_then(|payload| self.transport.send(&payload));

        match result {
            Ok(()) => debug!(
                action = %envelope.action,
                id = %envelope.message_id(),
                peers = self.machine.peers().len(),
                "Envelope sent"
            ),
            Err(e) => {
                warn!(id = %envelope.message_id(), error = %e, "Failed to send envelope");
                self.sink.on_error(&ErrorKind::SendFailed, &e.to_string());
            }
        }
    }

    // =========================================================================
    // Invitations
    // =========================================================================

    fn receive_invitation(&mut self, id: InvitationId, from: String) {
        if self.config.session.auto_accept_invitations {
            info!(peer = %from, invitation = %id, "Auto-accepting invitation");
            self.transport.respond_to_invitation(&id, true);
            return;
        }

        if self.cmd_tx.upgrade().is_none() {
            self.transport.respond_to_invitation(&id, false);
            return;
        }

        let window = self.config.invitation_timeout();
        let timer = {
            let cmd_tx = self.cmd_tx.clone();
            let id = id.clone();
            tokio::spawn(async move {
                tokio::time::sleep(window).await;
                if let Some(tx) = cmd_tx.upgrade() {
                    let _ = tx.send(NodeCommand::InvitationExpired { id }).await;
                }
            })
        };

        info!(peer = %from, invitation = %id, "Invitation received");
        self.pending.insert(
            id.clone(),
            PendingInvitation {
                from: from.clone(),
                timer,
            },
        );
        self.sink
            .on_invitation_received(&from, InvitationResponder::new(id, self.cmd_tx.clone()));
    }

    fn respond(&mut self, id: InvitationId, accept: bool) {
        let Some(invitation) = self.pending.remove(&id) else {
            debug!(invitation = %id, "Response to closed invitation ignored");
            return;
        };
        invitation.timer.abort();
        info!(peer = %invitation.from, accept, "Invitation answered");
        self.transport.respond_to_invitation(&id, accept);
    }

    fn expire(&mut self, id: InvitationId) {
        let Some(invitation) = self.pending.remove(&id) else {
            return;
        };
        warn!(peer = %invitation.from, invitation = %id, "Invitation timed out");
        self.transport.respond_to_invitation(&id, false);
        let err = SyncError::InvitationTimeout {
            peer: invitation.from,
        };
        self.sink
            .on_error(&ErrorKind::InvitationTimeout, &err.to_string());
    }

    fn decline_pending(&mut self) {
        for (id, invitation) in self.pending.drain() {
            invitation.timer.abort();
            debug!(peer = %invitation.from, invitation = %id, "Declining pending invitation");
            self.transport.respond_to_invitation(&id, false);
        }
    }

    // =========================================================================
    // Transport Events
    // =========================================================================

    fn handle_event(&mut self, event: TransportEvent) {
        debug!(event = event.label(), "Transport event");
        match event {
            TransportEvent::PeerJoined(name) => {
                let (changed, transition) = self.machine.peer_joined(&name);
                if changed {
                    info!(peer = %name, "Peer connected");
                    self.sink.on_peer_set_changed(&self.machine.peers().names());
                }
                self.after(transition);
            }
            TransportEvent::PeerLeft(name) => {
                let (changed, transition) = self.machine.peer_left(&name);
                if changed {
                    self.sink.on_peer_set_changed(&self.machine.peers().names());
                    if self.disconnecting {
                        info!(peer = %name, "Session closed");
                    } else {
                        warn!(peer = %name, "Peer disconnected");
                        let err = SyncError::PeerDisconnected(name);
                        self.sink
                            .on_error(&ErrorKind::PeerDisconnected, &err.to_string());
                    }
                }
                self.after(transition);
            }
            TransportEvent::EnvelopeReceived { from, payload } => {
                self.receive_envelope(&from, &payload)
            }
            TransportEvent::InvitationReceived { id, from } => self.receive_invitation(id, from),
            TransportEvent::StartFailed { mode, reason } => {
                if !self.machine.is_active(mode) {
                    debug!(%mode, %reason, "Stale discovery failure ignored");
                    return;
                }
                if mode == DiscoveryMode::Advertising {
                    self.decline_pending();
                }
                let transition = self.machine.discovery_failed(mode);
                let err = SyncError::TransportUnavailable(reason);
                warn!(%mode, error = %err, "Discovery failed to start");
                self.sink
                    .on_error(&ErrorKind::TransportUnavailable, &err.to_string());
                self.after(transition);
            }
        }
    }

    fn receive_envelope(&mut self, from: &str, payload: &[u8]) {
        let envelope = match ActionEnvelope::decode(payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(peer = %from, bytes = payload.len(), error = %e, "Dropping malformed envelope");
                self.sink.on_error(&e.kind(), &e.to_string());
                return;
            }
        };

        let outcome = self.engine.apply_remote(&envelope);
        if let Some(delta) = outcome.into_delta() {
            debug!(
                peer = %from,
                action = %delta.action,
                id = %delta.message.id(),
                "Remote envelope applied"
            );
            self.sink.on_envelope_applied(&delta);
            self.publish();
        }
    }

    // =========================================================================
    // Status
    // =========================================================================

    fn after(&mut self, transition: Option<Transition>) {
        if let Some(Transition { from, to }) = transition {
            info!(%from, state = %to, "Connection state changed");
            self.sink.on_connection_state_changed(to);
        }
        self.publish();
    }

    fn publish(&self) {
        self.status_tx.send_replace(NodeStatus {
            state: self.machine.state(),
            peers: self.machine.peers().names(),
            advertising: self.machine.is_advertising(),
            browsing: self.machine.is_browsing(),
            message_count: self.engine.len(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ChannelSink, ChatEvent};
    use crate::memory::{MemoryMesh, MemoryTransport};
    use offchat_core::{CoreError, MessageAction};
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(60);

    fn spawn_node(
        mesh: &MemoryMesh,
        name: &str,
        auto_accept: bool,
    ) -> (NodeHandle, mpsc::UnboundedReceiver<ChatEvent>) {
        let mut config = ChatConfig::with_display_name(name);
        config.session.auto_accept_invitations = auto_accept;
        config.session.invitation_timeout_secs = 2;

        let (transport, events): (MemoryTransport, _) = mesh.join(name).unwrap();
        let (sink, rx) = ChannelSink::new();
        let handle = ChatNode::new(config, transport, events)
            .unwrap()
            .with_sink(Arc::new(sink))
            .start();
        (handle, rx)
    }

    async fn wait_status(handle: &NodeHandle, pred: impl Fn(&NodeStatus) -> bool) -> NodeStatus {
        let mut rx = handle.subscribe();
        tokio::time::timeout(WAIT, async move {
            loop {
                {
                    let status = rx.borrow_and_update();
                    if pred(&status) {
                        return (*status).clone();
                    }
                }
                rx.changed().await.expect("node stopped");
            }
        })
        .await
        .expect("timed out waiting for status")
    }

    async fn next_error(rx: &mut mpsc::UnboundedReceiver<ChatEvent>) -> (ErrorKind, String) {
        tokio::time::timeout(WAIT, async {
            loop {
                match rx.recv().await.expect("sink closed") {
                    ChatEvent::Error { kind, detail } => return (kind, detail),
                    _ => continue,
                }
            }
        })
        .await
        .expect("timed out waiting for error")
    }

    /// Delivers a fresh `new` envelope behind everything already queued for
    /// `name` and waits for it, so every earlier event has been handled.
    async fn settle(mesh: &MemoryMesh, handle: &NodeHandle, name: &str) -> NodeStatus {
        let before = handle.status().message_count;
        let marker = ActionEnvelope::wrap(MessageAction::New, Message::new("Marker", "tick"));
        assert!(mesh.inject(name, "Marker", marker.encode().unwrap()));
        wait_status(handle, |s| s.message_count == before + 1).await
    }

    async fn connected_pair(mesh: &MemoryMesh) -> (NodeHandle, NodeHandle) {
        let (alice, _) = spawn_node(mesh, "Alice", true);
        let (bob, _) = spawn_node(mesh, "Bob", true);
        alice.host().await.unwrap();
        bob.join().await.unwrap();
        wait_status(&alice, |s| s.peers == ["Bob"]).await;
        wait_status(&bob, |s| s.peers == ["Alice"]).await;
        (alice, bob)
    }

    #[tokio::test]
    async fn test_messages_converge_across_nodes() {
        let mesh = MemoryMesh::new();
        let (alice, bob) = connected_pair(&mesh).await;

        let sent = alice.compose("hello").await.unwrap();
        let id = sent.envelope.message_id().to_string();
        wait_status(&bob, |s| s.message_count == 1).await;

        bob.compose("hi alice").await.unwrap();
        wait_status(&alice, |s| s.message_count == 2).await;

        alice.edit(&id, "hello world").await.unwrap();
        alice.delete(&id).await.unwrap();

        let deadline = tokio::time::Instant::now() + WAIT;
        loop {
            let snap = bob.snapshot().await.unwrap();
            if snap.iter().any(|m| m.id() == id && m.is_deleted()) {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "delete never arrived");
            tokio::task::yield_now().await;
        }

        let a = alice.snapshot().await.unwrap();
        let b = bob.snapshot().await.unwrap();
        for m in &a {
            assert_eq!(b.iter().find(|other| other.id() == m.id()), Some(m));
        }
        assert_eq!(a.len(), 2);
        assert_eq!(b.len(), 2);
    }

    #[tokio::test]
    async fn test_manual_invitation_accept() {
        let mesh = MemoryMesh::new();
        let (host, mut host_events) = spawn_node(&mesh, "Host", false);
        let (guest, _) = spawn_node(&mesh, "Guest", false);

        host.host().await.unwrap();
        guest.join().await.unwrap();

        let responder = tokio::time::timeout(WAIT, async {
            loop {
                if let Some(ChatEvent::Invitation { from, responder }) = host_events.recv().await {
                    assert_eq!(from, "Guest");
                    return responder;
                }
            }
        })
        .await
        .unwrap();
        responder.accept().unwrap();

        let status = wait_status(&host, |s| s.is_connected()).await;
        assert_eq!(status.peers, vec!["Guest".to_string()]);
        assert!(status.advertising);
        wait_status(&guest, |s| s.is_connected()).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_unanswered_invitation_times_out() {
        let mesh = MemoryMesh::new();
        let (host, mut host_events) = spawn_node(&mesh, "Host", false);
        let (guest, _) = spawn_node(&mesh, "Guest", false);

        host.host().await.unwrap();
        guest.join().await.unwrap();

        let (kind, detail) = next_error(&mut host_events).await;
        assert_eq!(kind, ErrorKind::InvitationTimeout);
        assert!(detail.contains("Guest"));
        assert_eq!(mesh.pending_invitations("Host"), 0);
        assert!(mesh.links_of("Host").is_empty());
        assert_eq!(host.status().state, ConnectionState::Advertising);
    }

    #[tokio::test]
    async fn test_malformed_payload_is_reported_and_dropped() {
        let mesh = MemoryMesh::new();
        let (alice, mut events) = spawn_node(&mesh, "Alice", true);
        alice.compose("keep me").await.unwrap();

        assert!(mesh.inject("Alice", "Mallory", b"{\"action\":\"new\"".to_vec()));
        let (kind, _) = next_error(&mut events).await;
        assert_eq!(kind, ErrorKind::InvalidEnvelope);

        let snap = alice.snapshot().await.unwrap();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].content(), "keep me");
    }

    #[tokio::test]
    async fn test_injected_envelope_is_applied() {
        let mesh = MemoryMesh::new();
        let (alice, _) = spawn_node(&mesh, "Alice", true);

        let envelope = ActionEnvelope::wrap(MessageAction::New, Message::new("Bob", "hey"));
        mesh.inject("Alice", "Bob", envelope.encode().unwrap());

        let status = wait_status(&alice, |s| s.message_count == 1).await;
        assert_eq!(status.state, ConnectionState::Disconnected);
        assert_eq!(alice.snapshot().await.unwrap()[0].sender_name(), "Bob");
    }

    #[tokio::test]
    async fn test_lost_peer_falls_back_to_advertising() {
        let mesh = MemoryMesh::new();
        let (host, mut host_events) = spawn_node(&mesh, "Host", true);
        let (guest, _) = spawn_node(&mesh, "Guest", true);

        host.host().await.unwrap();
        guest.join().await.unwrap();
        wait_status(&host, |s| s.is_connected()).await;

        mesh.sever("Host", "Guest");
        let (kind, detail) = next_error(&mut host_events).await;
        assert_eq!(kind, ErrorKind::PeerDisconnected);
        assert!(detail.contains("Guest"));

        let status = wait_status(&host, |s| !s.is_connected()).await;
        assert_eq!(status.state, ConnectionState::Advertising);
        let status = wait_status(&guest, |s| !s.is_connected()).await;
        assert_eq!(status.state, ConnectionState::Browsing);
    }

    #[tokio::test]
    async fn test_discovery_failure_reverts() {
        let mesh = MemoryMesh::new();
        let (alice, mut events) = spawn_node(&mesh, "Alice", true);
        mesh.set_medium_available(false);

        alice.host().await.unwrap();
        let (kind, _) = next_error(&mut events).await;
        assert_eq!(kind, ErrorKind::TransportUnavailable);

        let status = wait_status(&alice, |s| !s.advertising).await;
        assert_eq!(status.state, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_host_and_join_are_exclusive() {
        let mesh = MemoryMesh::new();
        let (alice, _) = spawn_node(&mesh, "Alice", true);

        alice.host().await.unwrap();
        assert_eq!(alice.status().state, ConnectionState::Advertising);

        alice.join().await.unwrap();
        let status = alice.status();
        assert_eq!(status.state, ConnectionState::Browsing);
        assert!(status.browsing && !status.advertising);

        alice.stop().await.unwrap();
        alice.stop().await.unwrap();
        assert_eq!(alice.status().state, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_local_errors_are_returned_to_caller() {
        let mesh = MemoryMesh::new();
        let (alice, _) = spawn_node(&mesh, "Alice", true);

        let err = alice.edit("missing", "x").await.unwrap_err();
        assert!(matches!(err, SyncError::Core(CoreError::NotFound(_))));
        assert_eq!(err.kind(), Some(ErrorKind::NotFound));

        let err = alice.compose("   ").await.unwrap_err();
        assert!(matches!(err, SyncError::Core(CoreError::EmptyContent)));
        assert!(alice.snapshot().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_send_failure_is_reported_but_kept_locally() {
        let mesh = MemoryMesh::new();
        let (alice, mut alice_events) = spawn_node(&mesh, "Alice", true);
        let (bob, _) = spawn_node(&mesh, "Bob", true);
        alice.host().await.unwrap();
        bob.join().await.unwrap();
        wait_status(&alice, |s| s.is_connected()).await;

        mesh.set_send_failing("Alice", true);
        let sent = alice.compose("lost in the air").await.unwrap();
        assert!(sent.delta.is_some());

        let (kind, _) = next_error(&mut alice_events).await;
        assert_eq!(kind, ErrorKind::SendFailed);
        assert_eq!(alice.status().message_count, 1);
        assert_eq!(bob.status().message_count, 0);
    }

    #[tokio::test]
    async fn test_disconnect_then_shutdown() {
        let mesh = MemoryMesh::new();
        let (alice, bob) = connected_pair(&mesh).await;

        alice.disconnect().await.unwrap();
        let status = settle(&mesh, &alice, "Alice").await;
        assert_eq!(status.state, ConnectionState::Disconnected);
        assert!(status.peers.is_empty());
        assert!(!status.advertising && !status.browsing);
        wait_status(&bob, |s| s.peers.is_empty()).await;

        alice.shutdown().await.unwrap();
        assert!(matches!(alice.snapshot().await, Err(SyncError::ShuttingDown)));
    }

    #[tokio::test]
    async fn test_disconnect_racing_a_join_leaves_no_stale_peer() {
        for _ in 0..25 {
            let mesh = MemoryMesh::new();
            let (host, mut host_events) = spawn_node(&mesh, "Host", true);
            let (guest, _) = spawn_node(&mesh, "Guest", true);

            host.host().await.unwrap();
            guest.join().await.unwrap();
            host.disconnect().await.unwrap();

            let status = settle(&mesh, &host, "Host").await;
            assert!(mesh.links_of("Host").is_empty());
            assert!(status.peers.is_empty(), "stale peers: {:?}", status.peers);
            assert_eq!(status.state, ConnectionState::Disconnected);

            while let Ok(event) = host_events.try_recv() {
                assert!(
                    !matches!(event, ChatEvent::Error { kind: ErrorKind::PeerDisconnected, .. }),
                    "local disconnect reported as a lost peer"
                );
            }
        }
    }

    #[tokio::test]
    async fn test_stale_start_failure_is_ignored() {
        let mesh = MemoryMesh::new();
        let (transport, _mesh_events) = mesh.join("Alice").unwrap();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (sink, mut sink_events) = ChannelSink::new();
        let alice = ChatNode::new(ChatConfig::with_display_name("Alice"), transport, event_rx)
            .unwrap()
            .with_sink(Arc::new(sink))
            .start();

        alice.join().await.unwrap();
        event_tx
            .send(TransportEvent::StartFailed {
                mode: DiscoveryMode::Advertising,
                reason: "earlier attempt".into(),
            })
            .unwrap();
        let marker = ActionEnvelope::wrap(MessageAction::New, Message::new("Bob", "after"));
        event_tx
            .send(TransportEvent::EnvelopeReceived {
                from: "Bob".into(),
                payload: marker.encode().unwrap(),
            })
            .unwrap();

        let status = wait_status(&alice, |s| s.message_count == 1).await;
        assert!(status.browsing);
        assert_eq!(status.state, ConnectionState::Browsing);
        while let Ok(event) = sink_events.try_recv() {
            assert!(!matches!(event, ChatEvent::Error { .. }), "{:?}", event);
        }
    }

    #[tokio::test]
    async fn test_unanswered_invitation_does_not_keep_node_alive() {
        let mesh = MemoryMesh::new();
        let (host, mut host_events) = spawn_node(&mesh, "Host", false);
        let (guest, _) = spawn_node(&mesh, "Guest", false);

        host.host().await.unwrap();
        guest.join().await.unwrap();

        let responder = tokio::time::timeout(WAIT, async {
            loop {
                if let Some(ChatEvent::Invitation { responder, .. }) = host_events.recv().await {
                    return responder;
                }
            }
        })
        .await
        .unwrap();

        drop(host);
        // The sink is dropped with the node task, closing the channel.
        tokio::time::timeout(WAIT, async { while host_events.recv().await.is_some() {} })
            .await
            .expect("node task outlived its handles");
        assert!(matches!(responder.accept(), Err(SyncError::ShuttingDown)));
        assert!(!mesh.inject("Host", "Guest", b"{}".to_vec()));
        drop(guest);
    }
}
