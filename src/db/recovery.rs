//! Startup replay: reconstruct the in-memory state from collection logs.
//!
//! Replay runs in three ordered phases so that metadata is in place before
//! the data that depends on it: `_indexes` first (registered fields),
//! `_schemas` second (validation rules), then every remaining collection
//! including `_auth`. Rerunning recovery on the same files produces the
//! same state.

use std::collections::HashMap;

use serde_json::Value;

use crate::aol::Engine;
use crate::auth::Role;
use crate::db::collection::Collection;
use crate::db::DbInner;

/// Reserved collection holding index metadata snapshots.
pub const INDEXES: &str = "_indexes";
/// Reserved collection holding schema records.
pub const SCHEMAS: &str = "_schemas";
/// Reserved collection holding credential records.
pub const AUTH: &str = "_auth";

/// Replayed state plus the on-disk frame count per data collection, which
/// feeds the auto-compaction heuristic.
pub(crate) struct Recovered {
    pub(crate) inner: DbInner,
    pub(crate) frame_counts: HashMap<String, usize>,
}

pub(crate) fn recover(engine: &Engine) -> Recovered {
    tracing::debug!("replaying collection logs");
    let names = engine.list_collections();
    let mut inner = DbInner::default();
    let mut frame_counts = HashMap::new();

    // Phase 1: index metadata. Each frame is a full snapshot array of
    // {collection, field} entries; the last frame wins by overwriting.
    for frame in engine.load_log(INDEXES) {
        let Ok(Value::Array(entries)) = serde_json::from_str(&frame) else {
            tracing::warn!(collection = INDEXES, "skipping corrupt index frame");
            continue;
        };
        for entry in entries {
            let collection = entry.get("collection").and_then(Value::as_str);
            let field = entry.get("field").and_then(Value::as_str);
            if let (Some(collection), Some(field)) = (collection, field) {
                inner.indexes.register(collection, field);
            }
        }
    }

    // Phase 2: schema records, keyed on their embedded collection name.
    for frame in engine.load_log(SCHEMAS) {
        let Ok(Value::Object(mut record)) = serde_json::from_str(&frame) else {
            tracing::warn!(collection = SCHEMAS, "skipping corrupt schema frame");
            continue;
        };
        let Some(target) = record
            .remove("collection")
            .as_ref()
            .and_then(Value::as_str)
            .map(String::from)
        else {
            tracing::warn!(collection = SCHEMAS, "skipping schema frame without collection");
            continue;
        };
        inner.schemas.insert(target, Value::Object(record));
    }

    // Phase 3: document replay with upsert and tombstone semantics.
    for name in names {
        if name == INDEXES || name == SCHEMAS {
            continue;
        }

        let frames = engine.load_log(&name);
        frame_counts.insert(name.clone(), frames.len());

        let mut collection = Collection::new();
        for frame in &frames {
            let Ok(doc) = serde_json::from_str::<Value>(frame) else {
                tracing::warn!(collection = %name, "skipping corrupt frame");
                continue;
            };
            let Some(id) = doc.get("_id").and_then(Value::as_str).map(String::from) else {
                tracing::warn!(collection = %name, "skipping frame without _id");
                continue;
            };
            if doc.get("_deleted").and_then(Value::as_bool) == Some(true) {
                collection.remove(&id);
            } else {
                collection.insert(id, doc);
            }
        }

        inner.indexes.rebuild(&name, collection.iter());

        if name == AUTH {
            for doc in collection.iter() {
                let key_hash = doc.get("key_hash").and_then(Value::as_str);
                let role = doc.get("role").and_then(Value::as_str);
                if let (Some(key_hash), Some(role)) = (key_hash, role) {
                    inner.auth.cache_user(key_hash.to_string(), Role::parse(role));
                }
            }
            tracing::info!(users = collection.len(), "auth records loaded");
        }

        tracing::debug!(
            collection = %name,
            frames = frames.len(),
            live = collection.len(),
            "collection replayed"
        );
        inner.collections.insert(name, collection);
    }

    Recovered {
        inner,
        frame_counts,
    }
}
