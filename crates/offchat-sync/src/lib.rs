//! # offchat-sync: Node Runtime for Offline Chat
//!
//! This crate runs the synchronization protocol from `offchat-core` against
//! a live peer mesh: it owns the tasks, channels and timers, and talks to the
//! discovery medium through the [`PeerTransport`] trait.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Offline Chat Runtime                             │
//! │                                                                         │
//! │   UI shell                                                              │
//! │     │ NodeHandle (host/join/stop/compose/edit/delete/snapshot)          │
//! │     ▼                                                                   │
//! │   ┌──────────────────────────────────────────────────────────────┐     │
//! │   │ ChatNode task                                                │     │
//! │   │   SyncEngine · ConnectionStateMachine · pending invitations  │     │
//! │   └──────┬──────────────────────────────────────────┬────────────┘     │
//! │          │ PeerTransport                            │ ChatEventSink     │
//! │          ▼                                          ▼                   │
//! │   MemoryMesh (in-process)                  deltas, peers, invitations, │
//! │   or a radio-backed transport              errors, state changes       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`node`] - `ChatNode` task and its `NodeHandle`
//! - [`transport`] - `PeerTransport` capability and `TransportEvent`
//! - [`memory`] - In-process `MemoryMesh` transport
//! - [`events`] - `ChatEventSink` observer surface
//! - [`config`] - TOML + environment configuration
//! - [`error`] - Sync error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use offchat_sync::{ChatConfig, ChatNode, MemoryMesh};
//!
//! let mesh = MemoryMesh::new();
//! let config = ChatConfig::load_or_default(None);
//! let (transport, events) = mesh.join(config.display_name())?;
//!
//! let node = ChatNode::new(config, transport, events)?.start();
//! node.host().await?;
//! node.compose("hello").await?;
//! println!("{:?}", node.status());
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod error;
pub mod events;
pub mod memory;
pub mod node;
pub mod transport;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::{ChatConfig, IdentityConfig, SessionSettings};
pub use error::{SyncError, SyncResult};
pub use events::{ChannelSink, ChatEvent, ChatEventSink, InvitationResponder, NoOpSink};
pub use memory::{MemoryMesh, MemoryTransport};
pub use node::{ChatNode, NodeCommand, NodeHandle, NodeStatus};
pub use transport::{InvitationId, PeerTransport, TransportEvent};
