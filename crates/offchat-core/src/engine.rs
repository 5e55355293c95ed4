//! # Synchronization Engine
//!
//! Applies local and remote actions to the message store.
//!
//! ## Apply Paths
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       SyncEngine                                        │
//! │                                                                         │
//! │   LOCAL (UI)                          REMOTE (peer envelope)            │
//! │   ──────────                          ──────────────────────            │
//! │   apply_local(action)                 apply_remote(&envelope)           │
//! │     │ validate (may fail)               │ never fails                   │
//! │     │ mutate store                      │ mutate store or ignore        │
//! │     ▼                                   ▼                               │
//! │   AppliedLocal { envelope, delta }    RemoteOutcome                     │
//! │     │                                   │                               │
//! │     └──► caller broadcasts envelope     └──► caller notifies UI         │
//! │                                                                         │
//! │   Store: Vec<Message> in local receipt order + id → index map          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Reconciliation Rules
//!
//! | Action | Local path                          | Remote path                       |
//! |--------|-------------------------------------|-----------------------------------|
//! | new    | append                              | append unless id known (dup)      |
//! | edit   | NotFound / AlreadyDeleted / set     | overwrite, or ignore unknown/dead |
//! | delete | NotFound / mark + clear (idempotent)| mark + clear, or ignore unknown   |
//!
//! No global ordering exists across peers. Concurrent edits resolve
//! last-applied-wins by local receipt order. An edit that arrives before its
//! `new` is dropped rather than buffered.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::envelope::{ActionEnvelope, MessageAction};
use crate::error::{CoreError, CoreResult};
use crate::message::Message;

// =============================================================================
// Actions and Outcomes
// =============================================================================

/// A UI-originated action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalAction {
    /// Compose a new message authored by the local identity.
    New { content: String },
    /// Replace the content of an existing message.
    Edit { target_id: String, content: String },
    /// Delete an existing message.
    Delete { target_id: String },
}

impl LocalAction {
    pub fn action(&self) -> MessageAction {
        match self {
            LocalAction::New { .. } => MessageAction::New,
            LocalAction::Edit { .. } => MessageAction::Edit,
            LocalAction::Delete { .. } => MessageAction::Delete,
        }
    }
}

/// Whether a delta added a row or changed one in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum DeltaKind {
    Inserted,
    Updated,
}

/// A single change to the store, shaped for incremental UI updates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotDelta {
    /// The action that produced the change.
    pub action: MessageAction,
    pub kind: DeltaKind,
    /// Position of the message in the snapshot.
    pub index: usize,
    /// The message as it is after the change.
    pub message: Message,
}

/// Result of a successful local action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedLocal {
    /// Envelope the caller hands to the transport.
    pub envelope: ActionEnvelope,
    /// `None` when the action did not change the store (repeat delete).
    pub delta: Option<SnapshotDelta>,
}

/// Why a remote envelope was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Edit/delete for an id this node has never seen.
    UnknownTarget,
    /// Edit for a message that is already deleted.
    TargetDeleted,
}

impl std::fmt::Display for IgnoreReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IgnoreReason::UnknownTarget => write!(f, "unknown target"),
            IgnoreReason::TargetDeleted => write!(f, "target deleted"),
        }
    }
}

/// What applying a remote envelope did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteOutcome {
    /// A new message was appended.
    Inserted(SnapshotDelta),
    /// An existing message was edited or deleted.
    Updated(SnapshotDelta),
    /// A `new` for an id already in the store.
    Duplicate,
    /// The envelope matched the stored state already.
    Unchanged,
    /// Dropped without touching the store.
    Ignored(IgnoreReason),
}

impl RemoteOutcome {
    /// True if the store was modified.
    pub fn changed(&self) -> bool {
        matches!(self, RemoteOutcome::Inserted(_) | RemoteOutcome::Updated(_))
    }

    pub fn delta(&self) -> Option<&SnapshotDelta> {
        match self {
            RemoteOutcome::Inserted(delta) | RemoteOutcome::Updated(delta) => Some(delta),
            _ => None,
        }
    }

    pub fn into_delta(self) -> Option<SnapshotDelta> {
        match self {
            RemoteOutcome::Inserted(delta) | RemoteOutcome::Updated(delta) => Some(delta),
            _ => None,
        }
    }
}

// =============================================================================
// Sync Engine
// =============================================================================

/// Owner of the local message store.
///
/// All mutation of [`Message`] state goes through this type. Readers get
/// borrowed slices or cloned snapshots.
#[derive(Debug, Clone)]
pub struct SyncEngine {
    identity: String,
    store: Vec<Message>,
    index: HashMap<String, usize>,
}

impl SyncEngine {
    /// Creates an empty engine authoring messages as `identity`.
    pub fn new(identity: impl Into<String>) -> Self {
        SyncEngine {
            identity: identity.into(),
            store: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Local display name used as sender of composed messages.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    // =========================================================================
    // Local path
    // =========================================================================

    /// Applies a UI action. Validation failures leave the store untouched.
    pub fn apply_local(&mut self, action: LocalAction) -> CoreResult<AppliedLocal> {
        match action {
            LocalAction::New { content } => {
                let content = normalize(&content)?;
                let message = Message::new(self.identity.clone(), content);
                let index = self.push(message.clone());
                Ok(AppliedLocal {
                    envelope: ActionEnvelope::wrap(MessageAction::New, message.clone()),
                    delta: Some(SnapshotDelta {
                        action: MessageAction::New,
                        kind: DeltaKind::Inserted,
                        index,
                        message,
                    }),
                })
            }
            LocalAction::Edit { target_id, content } => {
                let content = normalize(&content)?;
                let index = self.position(&target_id)?;
                let message = &mut self.store[index];
                if message.is_deleted() {
                    return Err(CoreError::AlreadyDeleted(target_id));
                }
                message.set_content(content);
                let message = message.clone();
                Ok(AppliedLocal {
                    envelope: ActionEnvelope::wrap(MessageAction::Edit, message.clone()),
                    delta: Some(updated(MessageAction::Edit, index, message)),
                })
            }
            LocalAction::Delete { target_id } => {
                let index = self.position(&target_id)?;
                let message = &mut self.store[index];
                if message.is_deleted() {
                    return Ok(AppliedLocal {
                        envelope: ActionEnvelope::wrap(MessageAction::Delete, message.clone()),
                        delta: None,
                    });
                }
                message.mark_deleted();
                let message = message.clone();
                Ok(AppliedLocal {
                    envelope: ActionEnvelope::wrap(MessageAction::Delete, message.clone()),
                    delta: Some(updated(MessageAction::Delete, index, message)),
                })
            }
        }
    }

    /// Composes a new message.
    pub fn compose(&mut self, content: impl Into<String>) -> CoreResult<AppliedLocal> {
        self.apply_local(LocalAction::New {
            content: content.into(),
        })
    }

    /// Edits the message with `id`.
    pub fn edit(&mut self, id: impl Into<String>, content: impl Into<String>) -> CoreResult<AppliedLocal> {
        self.apply_local(LocalAction::Edit {
            target_id: id.into(),
            content: content.into(),
        })
    }

    /// Deletes the message with `id`.
    pub fn delete(&mut self, id: impl Into<String>) -> CoreResult<AppliedLocal> {
        self.apply_local(LocalAction::Delete {
            target_id: id.into(),
        })
    }

    // =========================================================================
    // Remote path
    // =========================================================================

    /// Applies an envelope received from a peer.
    ///
    /// Never fails: envelopes that cannot apply are ignored and logged.
    pub fn apply_remote(&mut self, envelope: &ActionEnvelope) -> RemoteOutcome {
        let incoming = &envelope.message;
        let id = incoming.id();

        match envelope.action {
            MessageAction::New => {
                if self.index.contains_key(id) {
                    return RemoteOutcome::Duplicate;
                }
                let mut message = incoming.clone();
                if message.is_deleted() {
                    message.mark_deleted();
                }
                let index = self.push(message.clone());
                RemoteOutcome::Inserted(SnapshotDelta {
                    action: MessageAction::New,
                    kind: DeltaKind::Inserted,
                    index,
                    message,
                })
            }
            MessageAction::Edit => {
                let Some(&index) = self.index.get(id) else {
                    return ignored(envelope, IgnoreReason::UnknownTarget);
                };
                let message = &mut self.store[index];
                if message.is_deleted() {
                    return ignored(envelope, IgnoreReason::TargetDeleted);
                }
                if message.content() == incoming.content() && message.is_edited() == incoming.is_edited() {
                    return RemoteOutcome::Unchanged;
                }
                message.overwrite_edit(incoming.content(), incoming.is_edited());
                RemoteOutcome::Updated(updated(MessageAction::Edit, index, message.clone()))
            }
            MessageAction::Delete => {
                let Some(&index) = self.index.get(id) else {
                    return ignored(envelope, IgnoreReason::UnknownTarget);
                };
                let message = &mut self.store[index];
                if message.is_deleted() {
                    return RemoteOutcome::Unchanged;
                }
                message.mark_deleted();
                RemoteOutcome::Updated(updated(MessageAction::Delete, index, message.clone()))
            }
        }
    }

    // =========================================================================
    // Read access
    // =========================================================================

    /// Cloned copy of the store in display order.
    pub fn snapshot(&self) -> Vec<Message> {
        self.store.clone()
    }

    pub fn messages(&self) -> &[Message] {
        &self.store
    }

    pub fn get(&self, id: &str) -> Option<&Message> {
        self.index.get(id).map(|&i| &self.store[i])
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    fn push(&mut self, message: Message) -> usize {
        let index = self.store.len();
        self.index.insert(message.id().to_string(), index);
        self.store.push(message);
        index
    }

    fn position(&self, id: &str) -> CoreResult<usize> {
        self.index
            .get(id)
            .copied()
            .ok_or_else(|| CoreError::NotFound(id.to_string()))
    }
}

/// Trims content, rejecting blank input.
fn normalize(content: &str) -> CoreResult<String> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(CoreError::EmptyContent);
    }
    Ok(trimmed.to_string())
}

fn updated(action: MessageAction, index: usize, message: Message) -> SnapshotDelta {
    SnapshotDelta {
        action,
        kind: DeltaKind::Updated,
        index,
        message,
    }
}

fn ignored(envelope: &ActionEnvelope, reason: IgnoreReason) -> RemoteOutcome {
    tracing::debug!(
        action = %envelope.action,
        id = %envelope.message_id(),
        sender = %envelope.message.sender_name(),
        %reason,
        "Ignoring remote envelope"
    );
    RemoteOutcome::Ignored(reason)
}

// =============================================================================
// Unit Tests
// =============================================================================
