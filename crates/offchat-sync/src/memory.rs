//! # In-Process Mesh
//!
//! A [`PeerTransport`] whose "radio" is a shared map inside one process.
//! Used by tests and the `simulate` binary.
//!
//! ## Model
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         MemoryMesh                                      │
//! │                                                                         │
//! │   Arc<Mutex<MeshState>>                                                │
//! │     endpoints: name → Endpoint { events tx, flags, links, pending }    │
//! │                                                                         │
//! │   browser starts ──► invites every advertiser (now and later)          │
//! │   advertiser accepts ──► link both ways, PeerJoined to each side       │
//! │   send ──► EnvelopeReceived to every linked endpoint, in call order    │
//! │   disconnect / drop ──► unlink, PeerLeft to both sides                 │
//! │                                                                         │
//! │   Controls: set_medium_available, set_send_failing, sever, inject      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use offchat_core::DiscoveryMode;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{SyncError, SyncResult};
use crate::transport::{InvitationId, PeerTransport, TransportEvent};

// =============================================================================
// Mesh State
// =============================================================================

struct Endpoint {
    events: mpsc::UnboundedSender<TransportEvent>,
    advertising: bool,
    browsing: bool,
    send_failing: bool,
    links: BTreeSet<String>,
    /// Invitations this endpoint has received, keyed by id, valued by inviter.
    pending: HashMap<InvitationId, String>,
}

impl Endpoint {
    fn notify(&self, event: TransportEvent) {
        // A closed receiver means the node has stopped; nothing to deliver to.
        let _ = self.events.send(event);
    }
}

struct MeshState {
    endpoints: BTreeMap<String, Endpoint>,
    medium_available: bool,
}

impl MeshState {
    fn invite(&mut self, browser: &str, advertiser: &str) {
        if browser == advertiser {
            return;
        }
        let Some(host) = self.endpoints.get_mut(advertiser) else {
            return;
        };
        if !host.advertising
            || host.links.contains(browser)
            || host.pending.values().any(|from| from == browser)
        {
            return;
        }
        let id = InvitationId::generate();
        debug!(from = %browser, to = %advertiser, invitation = %id, "Mesh invitation");
        host.pending.insert(id.clone(), browser.to_string());
        host.notify(TransportEvent::InvitationReceived {
            id,
            from: browser.to_string(),
        });
    }

    fn link(&mut self, a: &str, b: &str) {
        if !self.endpoints.contains_key(a) || !self.endpoints.contains_key(b) {
            return;
        }
        for (me, other) in [(a, b), (b, a)] {
            if let Some(endpoint) = self.endpoints.get_mut(me) {
                if endpoint.links.insert(other.to_string()) {
                    endpoint.notify(TransportEvent::PeerJoined(other.to_string()));
                }
            }
        }
    }

    /// Removes the a↔b link, telling each side the other left if `notify_a`
    /// / `notify_b` is set.
    fn unlink(&mut self, a: &str, b: &str, notify_a: bool, notify_b: bool) {
        for (me, other, notify) in [(a, b, notify_a), (b, a, notify_b)] {
            if let Some(endpoint) = self.endpoints.get_mut(me) {
                if endpoint.links.remove(other) && notify {
                    endpoint.notify(TransportEvent::PeerLeft(other.to_string()));
                }
            }
        }
    }

    /// Ends every session of `name` and stops its discovery. Both sides of
    /// each session get `PeerLeft`.
    fn disconnect(&mut self, name: &str) {
        let links: Vec<String> = match self.endpoints.get(name) {
            Some(endpoint) => endpoint.links.iter().cloned().collect(),
            None => return,
        };
        for other in links {
            self.unlink(name, &other, true, true);
        }
        if let Some(endpoint) = self.endpoints.get_mut(name) {
            endpoint.advertising = false;
            endpoint.browsing = false;
            endpoint.pending.clear();
        }
    }
}

// =============================================================================
// Memory Mesh
// =============================================================================

/// Shared simulated medium. Clone freely; clones observe the same mesh.
#[derive(Clone)]
pub struct MemoryMesh {
    inner: Arc<Mutex<MeshState>>,
}

impl Default for MemoryMesh {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryMesh {
    pub fn new() -> Self {
        MemoryMesh {
            inner: Arc::new(Mutex::new(MeshState {
                endpoints: BTreeMap::new(),
                medium_available: true,
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, MeshState> {
        // Every mutation leaves the state consistent, so a poisoned lock is
        // still usable.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Registers an endpoint named `name`.
    ///
    /// Returns the transport and the receiver its events arrive on.
    pub fn join(
        &self,
        name: impl Into<String>,
    ) -> SyncResult<(MemoryTransport, mpsc::UnboundedReceiver<TransportEvent>)> {
        let name = name.into();
        let mut state = self.state();
        if state.endpoints.contains_key(&name) {
            return Err(SyncError::TransportUnavailable(format!(
                "'{}' is already on the mesh",
                name
            )));
        }
        let (events, rx) = mpsc::unbounded_channel();
        state.endpoints.insert(
            name.clone(),
            Endpoint {
                events,
                advertising: false,
                browsing: false,
                send_failing: false,
                links: BTreeSet::new(),
                pending: HashMap::new(),
            },
        );
        drop(state);

        debug!(endpoint = %name, "Joined memory mesh");
        Ok((
            MemoryTransport {
                name,
                mesh: self.clone(),
            },
            rx,
        ))
    }

    // =========================================================================
    // Simulation Controls
    // =========================================================================

    /// While false, discovery starts fail with [`TransportEvent::StartFailed`].
    pub fn set_medium_available(&self, available: bool) {
        self.state().medium_available = available;
    }

    /// While set, `send` from `name` fails with a connected peer present.
    pub fn set_send_failing(&self, name: &str, failing: bool) {
        if let Some(endpoint) = self.state().endpoints.get_mut(name) {
            endpoint.send_failing = failing;
        }
    }

    /// Drops the a↔b session as if the radio link was lost.
    pub fn sever(&self, a: &str, b: &str) {
        self.state().unlink(a, b, true, true);
    }

    /// Delivers raw bytes to `to` as if `from` had sent them.
    ///
    /// Returns false if `to` is not on the mesh.
    pub fn inject(&self, to: &str, from: &str, payload: impl Into<Vec<u8>>) -> bool {
        match self.state().endpoints.get(to) {
            Some(endpoint) => {
                endpoint.notify(TransportEvent::EnvelopeReceived {
                    from: from.to_string(),
                    payload: payload.into(),
                });
                true
            }
            None => false,
        }
    }

    /// Names `name` currently has sessions with.
    pub fn links_of(&self, name: &str) -> Vec<String> {
        self.state()
            .endpoints
            .get(name)
            .map(|e| e.links.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of unanswered invitations held by `name`.
    pub fn pending_invitations(&self, name: &str) -> usize {
        self.state()
            .endpoints
            .get(name)
            .map(|e| e.pending.len())
            .unwrap_or(0)
    }
}

// =============================================================================
// Memory Transport
// =============================================================================

/// One endpoint on a [`MemoryMesh`].
pub struct MemoryTransport {
    name: String,
    mesh: MemoryMesh,
}

impl MemoryTransport {
    fn start_mode(&mut self, mode: DiscoveryMode) {
        let mut state = self.mesh.state();
        let available = state.medium_available;
        let Some(me) = state.endpoints.get_mut(&self.name) else {
            return;
        };

        if !available {
            me.notify(TransportEvent::StartFailed {
                mode,
                reason: "medium unavailable".into(),
            });
            return;
        }

        match mode {
            DiscoveryMode::Advertising => me.advertising = true,
            DiscoveryMode::Browsing => me.browsing = true,
        }

        let others: Vec<String> = state
            .endpoints
            .iter()
            .filter(|(name, endpoint)| {
                *name != &self.name
                    && match mode {
                        DiscoveryMode::Advertising => endpoint.browsing,
                        DiscoveryMode::Browsing => endpoint.advertising,
                    }
            })
            .map(|(name, _)| name.clone())
            .collect();

        for other in others {
            match mode {
                DiscoveryMode::Advertising => state.invite(&other, &self.name),
                DiscoveryMode::Browsing => state.invite(&self.name, &other),
            }
        }
    }
}

impl PeerTransport for MemoryTransport {
    fn start_advertising(&mut self) {
        self.start_mode(DiscoveryMode::Advertising);
    }

    fn stop_advertising(&mut self) {
        if let Some(me) = self.mesh.state().endpoints.get_mut(&self.name) {
            me.advertising = false;
            me.pending.clear();
        }
    }

    fn start_browsing(&mut self) {
        self.start_mode(DiscoveryMode::Browsing);
    }

    fn stop_browsing(&mut self) {
        if let Some(me) = self.mesh.state().endpoints.get_mut(&self.name) {
            me.browsing = false;
        }
    }

    fn respond_to_invitation(&mut self, id: &InvitationId, accept: bool) {
        let mut state = self.mesh.state();
        let Some(from) = state
            .endpoints
            .get_mut(&self.name)
            .and_then(|me| me.pending.remove(id))
        else {
            debug!(invitation = %id, "Response to unknown invitation ignored");
            return;
        };
        if accept {
            state.link(&self.name, &from);
        }
    }

    fn send(&mut self, payload: &[u8]) -> SyncResult<()> {
        let state = self.mesh.state();
        let Some(me) = state.endpoints.get(&self.name) else {
            return Err(SyncError::SendFailed("endpoint left the mesh".into()));
        };
        if me.links.is_empty() {
            return Ok(());
        }
        if me.send_failing {
            return Err(SyncError::SendFailed("simulated radio failure".into()));
        }
        for peer in &me.links {
            if let Some(endpoint) = state.endpoints.get(peer) {
                endpoint.notify(TransportEvent::EnvelopeReceived {
                    from: self.name.clone(),
                    payload: payload.to_vec(),
                });
            }
        }
        Ok(())
    }

    fn disconnect(&mut self) {
        self.mesh.state().disconnect(&self.name);
    }

    fn local_name(&self) -> &str {
        &self.name
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        let mut state = self.mesh.state();
        state.disconnect(&self.name);
        state.endpoints.remove(&self.name);
    }
}
