use std::collections::HashMap;

use serde_json::Value;

/// In-memory documents of one collection.
///
/// The `_id`-keyed map is the primary index and the single owner of every
/// document; `order` materializes the array view in insertion order.
/// Secondary indexes reference documents by id only, so removing an id
/// here after the index entries are cleared leaves nothing dangling.
#[derive(Debug, Default)]
pub struct Collection {
    docs: HashMap<String, Value>,
    order: Vec<String>,
}

impl Collection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.docs.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&Value> {
        self.docs.get(id)
    }

    /// Inserts a document, replacing any previous version under the same
    /// id. Replacement keeps the original insertion position.
    pub fn insert(&mut self, id: String, doc: Value) {
        if self.docs.insert(id.clone(), doc).is_none() {
            self.order.push(id);
        }
    }

    /// Removes a document by id.
    pub fn remove(&mut self, id: &str) -> Option<Value> {
        let doc = self.docs.remove(id)?;
        self.order.retain(|entry| entry != id);
        Some(doc)
    }

    /// Documents in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Value> {
        self.order.iter().filter_map(|id| self.docs.get(id))
    }

    /// The array view as an owned JSON value.
    pub fn to_array(&self) -> Value {
        Value::Array(self.iter().cloned().collect())
    }

    /// The array view serialized for the predicate engine.
    pub fn to_json(&self) -> String {
        self.to_array().to_string()
    }

    /// Swaps in a full replacement document set, as produced by an update
    /// rewrite. Entries without a string `_id` cannot be indexed and are
    /// dropped with a warning.
    pub fn replace_all(&mut self, docs: Vec<Value>) {
        self.docs.clear();
        self.order.clear();
        for doc in docs {
            let Some(id) = doc.get("_id").and_then(Value::as_str).map(String::from) else {
                tracing::warn!("dropping rewritten document without _id");
                continue;
            };
            self.insert(id, doc);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_insert_preserves_order() {
        let mut collection = Collection::new();
        collection.insert("b".into(), json!({"_id": "b"}));
        collection.insert("a".into(), json!({"_id": "a"}));

        let ids: Vec<&str> = collection
            .iter()
            .map(|d| d["_id"].as_str().unwrap())
            .collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[test]
    fn test_replace_keeps_position() {
        let mut collection = Collection::new();
        collection.insert("a".into(), json!({"_id": "a", "v": 1}));
        collection.insert("b".into(), json!({"_id": "b"}));
        collection.insert("a".into(), json!({"_id": "a", "v": 2}));

        assert_eq!(collection.len(), 2);
        assert_eq!(collection.iter().next().unwrap()["v"], 2);
    }

    #[test]
    fn test_remove() {
        let mut collection = Collection::new();
        collection.insert("a".into(), json!({"_id": "a"}));
        assert!(collection.remove("a").is_some());
        assert!(collection.remove("a").is_none());
        assert!(collection.is_empty());
        assert_eq!(collection.iter().count(), 0);
    }

    #[test]
    fn test_replace_all() {
        let mut collection = Collection::new();
        collection.insert("a".into(), json!({"_id": "a"}));

        collection.replace_all(vec![
            json!({"_id": "x", "v": 1}),
            json!({"v": 2}), // no _id, dropped
        ]);

        assert_eq!(collection.len(), 1);
        assert!(collection.contains("x"));
        assert!(!collection.contains("a"));
    }
}
