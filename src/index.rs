//! Secondary equality indexes and the registered-field set.
//!
//! Registration is flat per collection: declaring a field indexes every
//! current and future document of that collection, so a declare backfills
//! by scanning and any full-collection rewrite must rebuild. Index entries
//! hold document ids rather than document references; the controller's
//! primary map stays the single owner and an entry is invalidated by
//! removing the id before the document is freed.

use std::collections::{BTreeSet, HashMap};

use serde_json::{json, Value};

/// Renders an indexable value as its index key: strings as themselves,
/// numbers in decimal. Other types are not indexable.
pub fn stringify(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Per-collection secondary indexes: field → stringified value → doc ids.
type FieldIndexes = HashMap<String, HashMap<String, Vec<String>>>;

#[derive(Debug, Default)]
pub struct IndexManager {
    /// Registered fields per collection.
    fields: HashMap<String, BTreeSet<String>>,
    /// Index entries per collection.
    entries: HashMap<String, FieldIndexes>,
}

impl IndexManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_registered(&self, collection: &str, field: &str) -> bool {
        self.fields
            .get(collection)
            .is_some_and(|fields| fields.contains(field))
    }

    /// Registers a field without backfilling. Returns false if it was
    /// already registered. Recovery uses this while replaying `_indexes`
    /// snapshots; live declarations go through [`IndexManager::declare`].
    pub fn register(&mut self, collection: &str, field: &str) -> bool {
        self.fields
            .entry(collection.to_string())
            .or_default()
            .insert(field.to_string())
    }

    /// Idempotent index declaration with backfill over the current
    /// documents. Returns true when the field was newly registered.
    pub fn declare<'a>(
        &mut self,
        collection: &str,
        field: &str,
        docs: impl Iterator<Item = &'a Value>,
    ) -> bool {
        if !self.register(collection, field) {
            return false;
        }
        tracing::info!(collection, field, "building secondary index");
        for doc in docs {
            self.add_entry(collection, field, doc);
        }
        true
    }

    /// Document ids currently indexed under `collection.field == key`.
    pub fn lookup(&self, collection: &str, field: &str, key: &str) -> Option<&Vec<String>> {
        self.entries.get(collection)?.get(field)?.get(key)
    }

    /// Drops and repopulates every secondary index of a collection.
    pub fn rebuild<'a>(&mut self, collection: &str, docs: impl Iterator<Item = &'a Value>) {
        self.entries.remove(collection);
        let Some(fields) = self.fields.get(collection).cloned() else {
            return;
        };
        tracing::trace!(collection, "rebuilding secondary indexes");
        for doc in docs {
            for field in &fields {
                self.add_entry(collection, field, doc);
            }
        }
    }

    /// Adds a freshly inserted document to every registered index of its
    /// collection. The caller updates the primary map itself.
    pub fn on_insert(&mut self, collection: &str, doc: &Value) {
        let Some(fields) = self.fields.get(collection).cloned() else {
            return;
        };
        for field in &fields {
            self.add_entry(collection, field, doc);
        }
    }

    /// Removes a document from every registered index of its collection.
    /// Must run before the document leaves the primary map.
    pub fn on_delete(&mut self, collection: &str, doc: &Value) {
        let Some(fields) = self.fields.get(collection) else {
            return;
        };
        let Some(id) = doc.get("_id").and_then(Value::as_str) else {
            return;
        };
        let Some(indexes) = self.entries.get_mut(collection) else {
            return;
        };

        for field in fields {
            let Some(key) = doc.get(field).and_then(stringify) else {
                continue;
            };
            if let Some(by_value) = indexes.get_mut(field) {
                if let Some(ids) = by_value.get_mut(&key) {
                    ids.retain(|entry| entry != id);
                    if ids.is_empty() {
                        by_value.remove(&key);
                    }
                }
            }
        }
    }

    /// Serializes the full registered-field set as one `_indexes` frame:
    /// a JSON array of `{collection, field}` objects. Index frames are
    /// whole snapshots, so replay takes the last one wholesale.
    pub fn snapshot(&self) -> String {
        let mut list = Vec::new();
        let mut collections: Vec<&String> = self.fields.keys().collect();
        collections.sort();
        for collection in collections {
            for field in &self.fields[collection] {
                list.push(json!({"collection": collection, "field": field}));
            }
        }
        Value::Array(list).to_string()
    }

    fn add_entry(&mut self, collection: &str, field: &str, doc: &Value) {
        let Some(id) = doc.get("_id").and_then(Value::as_str) else {
            return;
        };
        let Some(key) = doc.get(field).and_then(stringify) else {
            return;
        };
        self.entries
            .entry(collection.to_string())
            .or_default()
            .entry(field.to_string())
            .or_default()
            .entry(key)
            .or_default()
            .push(id.to_string());
    }
}
