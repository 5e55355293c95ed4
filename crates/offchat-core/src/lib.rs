//! # offchat-core: Pure Message Synchronization for Offline Chat
//!
//! This crate is the **heart** of Offline Chat. It contains the message model,
//! the wire envelope, the connection state machine and the synchronization
//! engine as plain data structures with zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Offline Chat Architecture                        │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    UI shell (external)                          │   │
//! │  │   compose / edit / delete ──►     ◄── snapshot, peers, errors   │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ NodeHandle / ChatEventSink             │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │              offchat-sync (ChatNode actor, transports)          │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ offchat-core (THIS CRATE) ★                     │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌────────────┐  ┌───────────┐  │   │
//! │  │   │  message  │  │ envelope  │  │ connection │  │  engine   │  │   │
//! │  │   │  Message  │  │ new/edit/ │  │ PeerSet    │  │ SyncEngine│  │   │
//! │  │   │           │  │ delete    │  │ state      │  │ store     │  │   │
//! │  │   └───────────┘  └───────────┘  └────────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO TASKS • NO NETWORK • DETERMINISTIC               │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`message`] - The chat [`Message`] record
//! - [`envelope`] - [`ActionEnvelope`] and its JSON wire codec
//! - [`connection`] - [`ConnectionStateMachine`] and [`PeerSet`]
//! - [`engine`] - [`SyncEngine`], the new/edit/delete reconciler
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use offchat_core::{SyncEngine, RemoteOutcome};
//!
//! let mut alice = SyncEngine::new("Alice");
//! let mut bob = SyncEngine::new("Bob");
//!
//! let sent = alice.compose("hello").unwrap();
//! let outcome = bob.apply_remote(&sent.envelope);
//! assert!(matches!(outcome, RemoteOutcome::Inserted(_)));
//!
//! // At-least-once delivery: the duplicate is suppressed.
//! assert!(!bob.apply_remote(&sent.envelope).changed());
//! assert_eq!(bob.snapshot(), alice.snapshot());
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod connection;
pub mod engine;
pub mod envelope;
pub mod error;
pub mod message;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use connection::{ConnectionState, ConnectionStateMachine, DiscoveryMode, PeerSet, Transition};
pub use engine::{
    AppliedLocal, DeltaKind, IgnoreReason, LocalAction, RemoteOutcome, SnapshotDelta, SyncEngine,
};
pub use envelope::{ActionEnvelope, MessageAction};
pub use error::{CoreError, CoreResult, ErrorKind};
pub use message::Message;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Discovery service type announced by transports.
///
/// Proximity frameworks restrict service names to 1-15 lowercase ASCII
/// letters, digits and hyphens; peers only see each other when both sides use
/// the same value.
pub const PROTOCOL_SERVICE_TYPE: &str = "offline-chat";
