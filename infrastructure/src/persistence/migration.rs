//! Upgrades stored JSON to the current conversation shape.
//!
//! Works on raw [`serde_json::Value`]s so that shapes the current types can
//! no longer deserialize are rewritten before typed decoding.
//!
//! | Found | Rewritten to |
//! |-------|--------------|
//! | bare array of conversations | `{version, conversations}` |
//! | turn with flat `streams` and no `rounds` | one round, `legacy_single_round` |
//! | conversation without `updatedAt` | `updatedAt = createdAt` |
//! | turn without `id` / `createdAt` | fresh id / conversation's `createdAt` |

use roundtable_application::ports::conversation_store::StoreError;
use serde_json::{Map, Value, json};
use tracing::info;
use uuid::Uuid;

/// Version written by this build.
pub const CURRENT_VERSION: u32 = 2;

const LEGACY_ROUND_LABEL: &str = "Initial positions";

/// Normalize a parsed store document in place, returning how many turns were
/// rewritten from the legacy flat shape.
pub fn migrate(document: &mut Value) -> Result<usize, StoreError> {
    if document.is_array() {
        let conversations = document.take();
        *document = json!({ "version": 1, "conversations": conversations });
    }

    let Some(root) = document.as_object_mut() else {
        return Err(StoreError::Serialization(
            "store root must be an object or an array".to_string(),
        ));
    };

    let found = root
        .get("version")
        .and_then(Value::as_u64)
        .map(|v| u32::try_from(v).unwrap_or(u32::MAX))
        .unwrap_or(1);
    if found > CURRENT_VERSION {
        return Err(StoreError::UnsupportedVersion {
            found,
            supported: CURRENT_VERSION,
        });
    }

    let mut migrated = 0;
    if let Some(conversations) = root
        .get_mut("conversations")
        .and_then(Value::as_array_mut)
    {
        for conversation in conversations.iter_mut().filter_map(Value::as_object_mut) {
            migrated += migrate_conversation(conversation);
        }
    } else {
        root.insert("conversations".to_string(), json!([]));
    }

    if found < CURRENT_VERSION || migrated > 0 {
        info!(
            "Migrated conversation store from version {} ({} legacy turns)",
            found, migrated
        );
    }
    root.insert("version".to_string(), json!(CURRENT_VERSION));
    Ok(migrated)
}

fn migrate_conversation(conversation: &mut Map<String, Value>) -> usize {
    let created_at = conversation.get("createdAt").cloned();
    if !conversation.contains_key("updatedAt")
        && let Some(created_at) = &created_at
    {
        conversation.insert("updatedAt".to_string(), created_at.clone());
    }

    let Some(turns) = conversation.get_mut("turns").and_then(Value::as_array_mut) else {
        return 0;
    };

    let mut migrated = 0;
    for turn in turns.iter_mut().filter_map(Value::as_object_mut) {
        if !turn.contains_key("id") {
            turn.insert("id".to_string(), json!(Uuid::new_v4().to_string()));
        }
        if !turn.contains_key("createdAt")
            && let Some(created_at) = &created_at
        {
            turn.insert("createdAt".to_string(), created_at.clone());
        }
        if migrate_flat_turn(turn) {
            migrated += 1;
        }
    }
    migrated
}

/// Wrap a pre-round turn's `streams` into a single settled round.
fn migrate_flat_turn(turn: &mut Map<String, Value>) -> bool {
    if turn.contains_key("rounds") {
        return false;
    }
    let Some(Value::Array(mut streams)) = turn.remove("streams") else {
        return false;
    };

    let mut any_complete = false;
    for stream in streams.iter_mut().filter_map(Value::as_object_mut) {
        match stream.get("status").and_then(Value::as_str) {
            Some("complete") => any_complete = true,
            // An interrupted legacy stream can never resume.
            Some("pending") | Some("streaming") => {
                stream.insert("status".to_string(), json!("error"));
                stream
                    .entry("error")
                    .or_insert_with(|| json!("interrupted before completion"));
            }
            Some(_) => {}
            None => {
                let has_content = stream
                    .get("content")
                    .and_then(Value::as_str)
                    .is_some_and(|c| !c.trim().is_empty());
                let status = if has_content { "complete" } else { "error" };
                any_complete |= has_content;
                stream.insert("status".to_string(), json!(status));
            }
        }
    }

    let status = if any_complete { "complete" } else { "error" };
    turn.insert(
        "rounds".to_string(),
        json!([{
            "roundNumber": 1,
            "label": LEGACY_ROUND_LABEL,
            "status": status,
            "streams": streams,
        }]),
    );
    turn.insert(
        "debateMetadata".to_string(),
        json!({
            "totalRounds": 1,
            "converged": false,
            "terminationReason": "legacy_single_round",
        }),
    );
    true
}
