//! Property-based tests for the wire codec and the reconciliation rules.
//!
//! Uses proptest to check the laws every peer relies on over arbitrary
//! messages, not just hand-picked ones.

use chrono::{DateTime, TimeZone, Utc};
use offchat_core::{ActionEnvelope, CoreError, Message, MessageAction, RemoteOutcome, SyncEngine};
use proptest::prelude::*;

// ============================================================================
// Strategy Generators
// ============================================================================

/// Any UTC instant between 1970 and 2100, with nanosecond precision.
fn timestamp_strategy() -> impl Strategy<Value = DateTime<Utc>> {
    (0i64..4_102_444_800, 0u32..1_000_000_000).prop_map(|(secs, nanos)| {
        Utc.timestamp_opt(secs, nanos)
            .single()
            .expect("in-range timestamp")
    })
}

/// Ids are opaque strings; the codec only rejects blank ones.
fn id_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("\\PC{1,40}")
        .expect("valid regex")
        .prop_filter("non-blank", |s| !s.trim().is_empty())
}

fn action_strategy() -> impl Strategy<Value = MessageAction> {
    prop_oneof![
        Just(MessageAction::New),
        Just(MessageAction::Edit),
        Just(MessageAction::Delete),
    ]
}

/// Arbitrary unicode sender and content, any flags.
fn message_strategy() -> impl Strategy<Value = Message> {
    (
        id_strategy(),
        any::<String>(),
        any::<String>(),
        timestamp_strategy(),
        any::<bool>(),
        any::<bool>(),
    )
        .prop_map(|(id, sender, content, at, edited, deleted)| {
            Message::from_parts(id, sender, content, at, edited, deleted)
        })
}

fn envelope_strategy() -> impl Strategy<Value = ActionEnvelope> {
    (action_strategy(), message_strategy())
        .prop_map(|(action, message)| ActionEnvelope::wrap(action, message))
}

/// Content a UI could submit: never blank after trimming.
fn content_strategy() -> impl Strategy<Value = String> {
    any::<String>().prop_filter("non-blank", |s| !s.trim().is_empty())
}

/// Something that could follow a delete, from either side.
#[derive(Debug, Clone)]
enum LateOp {
    LocalEdit(String),
    LocalDelete,
    RemoteEdit { content: String, edited: bool },
    RemoteDelete(String),
    RemoteNew(String),
}

fn late_ops_strategy() -> impl Strategy<Value = Vec<LateOp>> {
    prop::collection::vec(
        prop_oneof![
            content_strategy().prop_map(LateOp::LocalEdit),
            Just(LateOp::LocalDelete),
            (any::<String>(), any::<bool>())
                .prop_map(|(content, edited)| LateOp::RemoteEdit { content, edited }),
            any::<String>().prop_map(LateOp::RemoteDelete),
            any::<String>().prop_map(LateOp::RemoteNew),
        ],
        0..20,
    )
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    /// decode(encode(e)) == e for every envelope
    #[test]
    fn envelope_roundtrip(envelope in envelope_strategy()) {
        let bytes = envelope.encode().unwrap();
        prop_assert_eq!(ActionEnvelope::decode(&bytes).unwrap(), envelope.clone());

        let json = envelope.to_json().unwrap();
        prop_assert_eq!(ActionEnvelope::from_json(&json).unwrap(), envelope);
    }

    /// Local new followed by any number of remote `new` envelopes with the
    /// same id leaves exactly one copy, unchanged
    #[test]
    fn local_new_survives_echoes(
        content in content_strategy(),
        echoes in prop::collection::vec((any::<String>(), any::<String>(), timestamp_strategy()), 0..20)
    ) {
        let mut engine = SyncEngine::new("Alice");
        let sent = engine.compose(content).unwrap();
        let original = engine.snapshot();

        // The exact echo first, then copies that reuse the id with other fields.
        prop_assert_eq!(engine.apply_remote(&sent.envelope), RemoteOutcome::Duplicate);
        for (sender, body, at) in echoes {
            let copy = Message::from_parts(sent.envelope.message_id(), sender, body, at, false, false);
            let outcome = engine.apply_remote(&ActionEnvelope::wrap(MessageAction::New, copy));
            prop_assert_eq!(outcome, RemoteOutcome::Duplicate);
        }

        prop_assert_eq!(engine.len(), 1);
        prop_assert_eq!(engine.snapshot(), original);
    }

    /// Once deleted, no later local or remote action brings content back
    #[test]
    fn delete_is_monotonic(
        content in content_strategy(),
        remote_delete in any::<bool>(),
        ops in late_ops_strategy()
    ) {
        let mut engine = SyncEngine::new("Alice");
        let sent = engine.compose(content).unwrap();
        let id = sent.envelope.message_id().to_string();
        let at = sent.envelope.message.created_at();

        if remote_delete {
            let tombstone = Message::from_parts(&id, "Alice", "", at, false, true);
            prop_assert!(engine.apply_remote(&ActionEnvelope::wrap(MessageAction::Delete, tombstone)).changed());
        } else {
            engine.delete(&id).unwrap();
        }

        for op in ops {
            match op {
                LateOp::LocalEdit(text) => {
                    prop_assert_eq!(engine.edit(&id, text), Err(CoreError::AlreadyDeleted(id.clone())));
                }
                LateOp::LocalDelete => {
                    prop_assert!(engine.delete(&id).unwrap().delta.is_none());
                }
                LateOp::RemoteEdit { content, edited } => {
                    let late = Message::from_parts(&id, "Bob", content, at, edited, false);
                    prop_assert!(!engine.apply_remote(&ActionEnvelope::wrap(MessageAction::Edit, late)).changed());
                }
                LateOp::RemoteDelete(content) => {
                    let late = Message::from_parts(&id, "Bob", content, at, false, true);
                    prop_assert!(!engine.apply_remote(&ActionEnvelope::wrap(MessageAction::Delete, late)).changed());
                }
                LateOp::RemoteNew(content) => {
                    let late = Message::from_parts(&id, "Bob", content, at, false, false);
                    prop_assert_eq!(
                        engine.apply_remote(&ActionEnvelope::wrap(MessageAction::New, late)),
                        RemoteOutcome::Duplicate
                    );
                }
            }

            let msg = engine.get(&id).unwrap();
            prop_assert!(msg.is_deleted());
            prop_assert_eq!(msg.content(), "");
        }
        prop_assert_eq!(engine.len(), 1);
    }

    /// A remote `new` never stores content for a deleted snapshot
    #[test]
    fn remote_new_keeps_deleted_empty(message in message_strategy()) {
        let mut engine = SyncEngine::new("Alice");
        let deleted = message.is_deleted();
        engine.apply_remote(&ActionEnvelope::wrap(MessageAction::New, message.clone()));

        let stored = engine.get(message.id()).unwrap();
        prop_assert_eq!(stored.is_deleted(), deleted);
        if deleted {
            prop_assert_eq!(stored.content(), "");
        } else {
            prop_assert_eq!(stored, &message);
        }
    }
}
