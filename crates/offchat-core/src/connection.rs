//! # Connection State Machine
//!
//! Tracks this node's discovery role and its confirmed peer sessions.
//!
//! ## State Derivation
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Connection States                                    │
//! │                                                                         │
//! │           host()             peers ≠ {}            peers = {}          │
//! │  ┌────────────┐ ───────► ┌─────────────┐ ──────► ┌───────────┐         │
//! │  │Disconnected│          │ Advertising │ ◄────── │ Connected │         │
//! │  └────────────┘ ◄─────── └─────────────┘         └───────────┘         │
//! │        ▲  │   stop/fail                              ▲   │              │
//! │        │  │ join()                                   │   │ peers = {}   │
//! │        │  ▼                                          │   │ & no         │
//! │  ┌─────────────┐          peers ≠ {}                 │   │ discovery    │
//! │  │  Browsing   │ ────────────────────────────────────┘   ▼              │
//! │  └─────────────┘                                   Disconnected        │
//! │                                                                         │
//! │  RULE (evaluated after every mutation):                                │
//! │    peers ≠ {}   → Connected                                            │
//! │    advertising  → Advertising                                          │
//! │    browsing     → Browsing                                             │
//! │    otherwise    → Disconnected                                         │
//! │                                                                         │
//! │  MUTUAL EXCLUSION: advertising && browsing is never true.              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Because the state is derived, a node that keeps advertising while its last
//! peer leaves falls back to `Advertising`, not `Disconnected`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

// =============================================================================
// Connection State
// =============================================================================

/// Observable connection state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Idle rest state.
    #[default]
    Disconnected,
    /// Announcing presence, awaiting inbound invitations.
    Advertising,
    /// Searching for advertisers.
    Browsing,
    /// One or more live peer sessions.
    Connected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Advertising => write!(f, "advertising"),
            ConnectionState::Browsing => write!(f, "browsing"),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}

/// The two mutually exclusive discovery activities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryMode {
    /// Host: announce and accept invitations.
    Advertising,
    /// Join: look for hosts and invite them.
    Browsing,
}

impl DiscoveryMode {
    /// The other discovery mode.
    pub fn opposite(self) -> Self {
        match self {
            DiscoveryMode::Advertising => DiscoveryMode::Browsing,
            DiscoveryMode::Browsing => DiscoveryMode::Advertising,
        }
    }
}

impl std::fmt::Display for DiscoveryMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiscoveryMode::Advertising => write!(f, "advertising"),
            DiscoveryMode::Browsing => write!(f, "browsing"),
        }
    }
}

/// A change of the derived state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: ConnectionState,
    pub to: ConnectionState,
}

// =============================================================================
// Peer Set
// =============================================================================

/// Transport-confirmed peer sessions keyed by display name.
///
/// Entries are only ever added from a transport join event; the set never
/// holds a peer speculatively.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerSet {
    peers: BTreeMap<String, DateTime<Utc>>,
}

impl PeerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a confirmed session. Returns false if already present.
    pub fn insert(&mut self, name: &str) -> bool {
        if self.peers.contains_key(name) {
            return false;
        }
        self.peers.insert(name.to_string(), Utc::now());
        true
    }

    /// Removes a session. Returns false if it was not present.
    pub fn remove(&mut self, name: &str) -> bool {
        self.peers.remove(name).is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.peers.contains_key(name)
    }

    /// When the session with `name` was confirmed.
    pub fn connected_since(&self, name: &str) -> Option<DateTime<Utc>> {
        self.peers.get(name).copied()
    }

    /// Peer names in sorted order.
    pub fn names(&self) -> Vec<String> {
        self.peers.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn clear(&mut self) {
        self.peers.clear();
    }
}

// =============================================================================
// Connection State Machine
// =============================================================================

/// Owns the discovery flags and peer set, and derives [`ConnectionState`].
///
/// Every mutator returns `Some(Transition)` when the derived state changed.
#[derive(Debug, Clone, Default)]
pub struct ConnectionStateMachine {
    advertising: bool,
    browsing: bool,
    peers: PeerSet,
}

impl ConnectionStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current derived state.
    pub fn state(&self) -> ConnectionState {
        if !self.peers.is_empty() {
            ConnectionState::Connected
        } else if self.advertising {
            ConnectionState::Advertising
        } else if self.browsing {
            ConnectionState::Browsing
        } else {
            ConnectionState::Disconnected
        }
    }

    pub fn is_advertising(&self) -> bool {
        self.advertising
    }

    pub fn is_browsing(&self) -> bool {
        self.browsing
    }

    /// True if `mode` is currently active.
    pub fn is_active(&self, mode: DiscoveryMode) -> bool {
        match mode {
            DiscoveryMode::Advertising => self.advertising,
            DiscoveryMode::Browsing => self.browsing,
        }
    }

    pub fn peers(&self) -> &PeerSet {
        &self.peers
    }

    /// True if an outbound envelope has anyone to go to.
    pub fn can_send(&self) -> bool {
        !self.peers.is_empty()
    }

    /// Marks `mode` active, deactivating the opposite mode first.
    ///
    /// Returns the mode that had to be stopped (the caller must stop it on the
    /// transport before starting `mode`) and the resulting transition.
    pub fn start_discovery(
        &mut self,
        mode: DiscoveryMode,
    ) -> (Option<DiscoveryMode>, Option<Transition>) {
        let before = self.state();
        let other = mode.opposite();
        let stopped = if self.is_active(other) {
            self.set_flag(other, false);
            Some(other)
        } else {
            None
        };
        self.set_flag(mode, true);
        (stopped, self.transition_from(before))
    }

    /// Deactivates a single discovery mode.
    pub fn stop_mode(&mut self, mode: DiscoveryMode) -> Option<Transition> {
        let before = self.state();
        self.set_flag(mode, false);
        self.transition_from(before)
    }

    /// Deactivates both discovery modes. Safe to call at any time.
    pub fn stop_discovery(&mut self) -> Option<Transition> {
        let before = self.state();
        self.advertising = false;
        self.browsing = false;
        self.transition_from(before)
    }

    /// The transport could not start `mode`.
    pub fn discovery_failed(&mut self, mode: DiscoveryMode) -> Option<Transition> {
        self.stop_mode(mode)
    }

    /// A peer session was confirmed.
    ///
    /// Returns `(peer_set_changed, transition)`.
    pub fn peer_joined(&mut self, name: &str) -> (bool, Option<Transition>) {
        let before = self.state();
        let changed = self.peers.insert(name);
        (changed, self.transition_from(before))
    }

    /// A peer session ended.
    ///
    /// Returns `(peer_set_changed, transition)`.
    pub fn peer_left(&mut self, name: &str) -> (bool, Option<Transition>) {
        let before = self.state();
        let changed = self.peers.remove(name);
        (changed, self.transition_from(before))
    }

    /// Drops every session and stops discovery.
    pub fn reset(&mut self) -> Option<Transition> {
        let before = self.state();
        self.peers.clear();
        self.advertising = false;
        self.browsing = false;
        self.transition_from(before)
    }

    fn set_flag(&mut self, mode: DiscoveryMode, value: bool) {
        match mode {
            DiscoveryMode::Advertising => self.advertising = value,
            DiscoveryMode::Browsing => self.browsing = value,
        }
    }

    fn transition_from(&self, before: ConnectionState) -> Option<Transition> {
        let after = self.state();
        (before != after).then_some(Transition {
            from: before,
            to: after,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_exclusive(machine: &ConnectionStateMachine) {
        assert!(!(machine.is_advertising() && machine.is_browsing()));
    }

    #[test]
    fn test_connection_state_display() {
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
        assert_eq!(ConnectionState::Advertising.to_string(), "advertising");
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_host_and_stop() {
        let mut m = ConnectionStateMachine::new();
        let (stopped, t) = m.start_discovery(DiscoveryMode::Advertising);
        assert_eq!(stopped, None);
        assert_eq!(
            t,
            Some(Transition {
                from: ConnectionState::Disconnected,
                to: ConnectionState::Advertising
            })
        );

        let t = m.stop_discovery();
        assert_eq!(t.map(|t| t.to), Some(ConnectionState::Disconnected));
        assert_eq!(m.stop_discovery(), None);
    }

    #[test]
    fn test_starting_one_mode_stops_the_other() {
        let mut m = ConnectionStateMachine::new();
        m.start_discovery(DiscoveryMode::Browsing);
        assert_eq!(m.state(), ConnectionState::Browsing);

        let (stopped, t) = m.start_discovery(DiscoveryMode::Advertising);
        assert_eq!(stopped, Some(DiscoveryMode::Browsing));
        assert_eq!(t.map(|t| t.to), Some(ConnectionState::Advertising));
        assert_exclusive(&m);

        let (stopped, _) = m.start_discovery(DiscoveryMode::Browsing);
        assert_eq!(stopped, Some(DiscoveryMode::Advertising));
        assert!(m.is_browsing());
        assert_exclusive(&m);
    }

    #[test]
    fn test_peer_churn_while_advertising_returns_to_advertising() {
        let mut m = ConnectionStateMachine::new();
        m.start_discovery(DiscoveryMode::Advertising);

        let (changed, t) = m.peer_joined("Bob");
        assert!(changed);
        assert_eq!(
            t,
            Some(Transition {
                from: ConnectionState::Advertising,
                to: ConnectionState::Connected
            })
        );

        let (changed, t) = m.peer_left("Bob");
        assert!(changed);
        assert_eq!(
            t,
            Some(Transition {
                from: ConnectionState::Connected,
                to: ConnectionState::Advertising
            })
        );
    }

    #[test]
    fn test_last_peer_leaving_without_discovery_disconnects() {
        let mut m = ConnectionStateMachine::new();
        m.start_discovery(DiscoveryMode::Browsing);
        m.peer_joined("Host");
        m.stop_discovery();
        assert_eq!(m.state(), ConnectionState::Connected);

        let (_, t) = m.peer_left("Host");
        assert_eq!(t.map(|t| t.to), Some(ConnectionState::Disconnected));
    }

    #[test]
    fn test_discovery_while_connected_stays_connected() {
        let mut m = ConnectionStateMachine::new();
        m.peer_joined("Bob");
        let (_, t) = m.start_discovery(DiscoveryMode::Advertising);
        assert_eq!(t, None);
        assert_eq!(m.state(), ConnectionState::Connected);
        assert!(m.is_advertising());
    }

    #[test]
    fn test_discovery_failure_reverts() {
        let mut m = ConnectionStateMachine::new();
        m.start_discovery(DiscoveryMode::Browsing);
        let t = m.discovery_failed(DiscoveryMode::Browsing);
        assert_eq!(t.map(|t| t.to), Some(ConnectionState::Disconnected));
        assert!(!m.is_browsing());
    }

    #[test]
    fn test_duplicate_join_and_unknown_leave_are_noops() {
        let mut m = ConnectionStateMachine::new();
        assert_eq!(m.peer_joined("Bob"), (true, Some(Transition {
            from: ConnectionState::Disconnected,
            to: ConnectionState::Connected,
        })));
        assert_eq!(m.peer_joined("Bob"), (false, None));
        assert_eq!(m.peer_left("Carol"), (false, None));
        assert_eq!(m.peers().len(), 1);
        assert!(m.can_send());
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut m = ConnectionStateMachine::new();
        m.start_discovery(DiscoveryMode::Advertising);
        m.peer_joined("Bob");
        m.peer_joined("Carol");
        assert_eq!(m.peers().names(), vec!["Bob".to_string(), "Carol".to_string()]);

        let t = m.reset();
        assert_eq!(t.map(|t| t.to), Some(ConnectionState::Disconnected));
        assert!(m.peers().is_empty());
        assert!(!m.is_advertising());
    }
}
