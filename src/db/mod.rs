//! The database controller: in-memory collections, the query planner, and
//! the CRUD pipelines that tie validation, persistence, and index
//! maintenance together.
//!
//! All state sits behind one reader-writer lock. Mutating operations hold
//! the writer lock across their whole pipeline, including log appends and
//! compactions, so every write to a collection is totally ordered and a log
//! append happens-before any reader can observe the index change. Reads
//! take the shared lock. Upsert performs its count and its mutation inside
//! a single writer critical section via the non-locking `*_with` variants.

pub mod collection;
pub mod recovery;

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::{json, Value};

use crate::aol::Engine;
use crate::auth::{self, AuthStore, Role};
use crate::config::Config;
use crate::error::Result;
use crate::flock::FileLock;
use crate::id;
use crate::index::{stringify, IndexManager};
use crate::query;
use collection::Collection;
use recovery::{AUTH, INDEXES, SCHEMAS};

const LOCK_FILE: &str = "emberdb.lock";

/// State guarded by the global reader-writer lock.
#[derive(Default)]
pub(crate) struct DbInner {
    pub(crate) collections: HashMap<String, Collection>,
    pub(crate) schemas: HashMap<String, Value>,
    pub(crate) indexes: IndexManager,
    pub(crate) auth: AuthStore,
}

/// A single-node document database over append-only log files.
pub struct Database {
    engine: Engine,
    inner: RwLock<DbInner>,
    _lock: FileLock,
}

impl Database {
    /// Opens the database in `dir` with default configuration.
    pub fn open(dir: &str) -> Result<Self> {
        Self::open_with_config(&Config::new(dir))
    }

    /// Opens the database: init storage, lock the directory, replay logs,
    /// compact fragmented collections, and bootstrap the root user on a
    /// fresh auth store.
    pub fn open_with_config(config: &Config) -> Result<Self> {
        tracing::info!(dir = %config.dir.display(), "opening database");
        let engine = Engine::new(&config.dir);
        engine.init()?;
        let lock = FileLock::lock(config.dir.join(LOCK_FILE))?;

        let recovered = recovery::recover(&engine);
        let mut inner = recovered.inner;

        // A log holding more than twice as many frames as live documents is
        // mostly obsolete versions and tombstones; rewrite it. Small
        // collections are not worth the churn.
        for (name, frames) in &recovered.frame_counts {
            let Some(collection) = inner.collections.get(name) else {
                continue;
            };
            let live = collection.len();
            if *frames > live * 2 && live > 100 {
                tracing::info!(collection = %name, frames, live, "auto-compacting fragmented log");
                Self::compact_with(&engine, collection, name);
            }
        }

        if inner.auth.is_empty() {
            tracing::warn!("auth store empty, bootstrapping default root admin");
            Self::create_user_with(&engine, &mut inner, "root", "admin");
        }

        tracing::info!("database online");
        Ok(Self {
            engine,
            inner: RwLock::new(inner),
            _lock: lock,
        })
    }

    /// Inserts a document, assigning a fresh `_id` when the caller did not
    /// provide a string one. Returns false on schema violation or when the
    /// log append failed; in the latter case the in-memory state has
    /// already advanced and the caller must treat the document as not yet
    /// durable.
    pub fn insert(&self, name: &str, data: Value) -> bool {
        let mut guard = self.inner.write().unwrap();
        self.insert_with(&mut guard, name, data)
    }

    /// Updates matching documents if any exist, inserts otherwise. Count
    /// and mutation share one writer critical section, so concurrent
    /// upserts of the same key cannot both take the insert path.
    pub fn upsert(&self, name: &str, query: &Value, data: Value) -> bool {
        let mut guard = self.inner.write().unwrap();
        if Self::count_of(&guard, name, Some(query)) > 0 {
            self.update_with(&mut guard, name, query, &data)
        } else {
            self.insert_with(&mut guard, name, data)
        }
    }

    /// Applies an update to every document matching `query`.
    pub fn update(&self, name: &str, query: &Value, update: &Value) -> bool {
        let mut guard = self.inner.write().unwrap();
        self.update_with(&mut guard, name, query, update)
    }

    /// Removes matching documents by appending tombstones.
    ///
    /// Target ids resolve through the same tiers as `find`: a primary-key
    /// query, a registered secondary index, and only then a full scan. The
    /// log is left fragmented on purpose; compaction reclaims the space
    /// later.
    pub fn delete(&self, name: &str, query: &Value) -> bool {
        let mut guard = self.inner.write().unwrap();
        let inner = &mut *guard;
        let Some(collection) = inner.collections.get(name) else {
            return false;
        };

        let mut targets: Vec<String> = Vec::new();
        if let Some(clauses) = query.as_object() {
            if clauses.len() == 1 {
                if let Some((field, value)) = clauses.iter().next() {
                    if field == "_id" {
                        if let Some(id) = value.as_str() {
                            if collection.contains(id) {
                                targets.push(id.to_string());
                            }
                        }
                    } else if inner.indexes.is_registered(name, field) {
                        if let Some(key) = stringify(value).filter(|k| !k.is_empty()) {
                            if let Some(ids) = inner.indexes.lookup(name, field, &key) {
                                targets.extend(ids.iter().cloned());
                            }
                        }
                    }
                }
            }
        }

        if targets.is_empty() {
            tracing::warn!(collection = %name, "full scan required for delete");
            let matched = query::find(
                &collection.to_json(),
                &query.to_string(),
                "{}",
                "{}",
                0,
                0,
            );
            if let Ok(Value::Array(docs)) = serde_json::from_str(&matched) {
                targets.extend(
                    docs.iter()
                        .filter_map(|doc| doc.get("_id").and_then(Value::as_str))
                        .map(String::from),
                );
            }
        }

        if targets.is_empty() {
            return false;
        }

        tracing::debug!(collection = %name, count = targets.len(), "removing documents");
        let Some(collection) = inner.collections.get_mut(name) else {
            return false;
        };
        for target in &targets {
            let Some(doc) = collection.get(target).cloned() else {
                continue;
            };
            self.engine
                .append(name, &json!({"_id": target, "_deleted": true}).to_string());
            inner.indexes.on_delete(name, &doc);
            collection.remove(target);
        }
        true
    }

    /// Counts documents matching `query`; an absent or empty query counts
    /// the whole collection.
    pub fn count(&self, name: &str, query: Option<&Value>) -> usize {
        let guard = self.inner.read().unwrap();
        Self::count_of(&guard, name, query)
    }

    /// Executes a find through the three-tier planner.
    ///
    /// Tier 1 answers `{"_id": "<str>"}` from the primary map; tier 2
    /// answers single-clause queries on a registered field from the
    /// secondary index in insertion order; everything else, and any query
    /// carrying a sort or projection, goes through a full scan. `limit == 0`
    /// means unbounded.
    pub fn find(
        &self,
        name: &str,
        query: Option<&Value>,
        sort: Option<&Value>,
        projection: Option<&Value>,
        limit: usize,
        skip: usize,
    ) -> Vec<Value> {
        let guard = self.inner.read().unwrap();
        let Some(collection) = guard.collections.get(name) else {
            return Vec::new();
        };

        let simple = is_empty_clause(sort) && is_empty_clause(projection);
        if simple {
            if let Some(clauses) = query.and_then(Value::as_object) {
                if clauses.len() == 1 {
                    // Tier 1: primary key.
                    if let Some(id) = clauses.get("_id").and_then(Value::as_str) {
                        tracing::trace!(collection = %name, id, "primary key lookup");
                        return collection.get(id).cloned().into_iter().collect();
                    }

                    // Tier 2: secondary index. A registered field whose
                    // value is missing from the index means no matches;
                    // falling through to a scan would only re-prove that.
                    if let Some((field, value)) = clauses.iter().next() {
                        if guard.indexes.is_registered(name, field) {
                            if let Some(key) = stringify(value).filter(|k| !k.is_empty()) {
                                tracing::trace!(collection = %name, field = %field, "secondary index lookup");
                                return match guard.indexes.lookup(name, field, &key) {
                                    Some(ids) => slice_ids(ids, limit, skip)
                                        .iter()
                                        .filter_map(|id| collection.get(id).cloned())
                                        .collect(),
                                    None => Vec::new(),
                                };
                            }
                        }
                    }
                }
            }
        }

        // Tier 3: full scan through the predicate engine.
        tracing::debug!(collection = %name, "full scan");
        let result = query::find(
            &collection.to_json(),
            &clause_text(query),
            &clause_text(sort),
            &clause_text(projection),
            limit,
            skip,
        );
        match serde_json::from_str(&result) {
            Ok(Value::Array(docs)) => docs,
            _ => Vec::new(),
        }
    }

    /// Registers (or replaces) a collection schema and persists it.
    pub fn set_schema(&self, name: &str, schema: &Value) -> bool {
        if !schema.is_object() {
            return false;
        }
        let mut guard = self.inner.write().unwrap();
        guard.schemas.insert(name.to_string(), schema.clone());

        // The persisted record carries the collection name so replay can
        // re-associate it.
        let mut record = schema.clone();
        if let Some(obj) = record.as_object_mut() {
            obj.insert("collection".to_string(), json!(name));
        }
        let ok = self.engine.append(SCHEMAS, &record.to_string());
        tracing::info!(collection = %name, "schema updated");
        ok
    }

    /// Declares a secondary equality index, backfills it from the current
    /// documents, and persists the full index set as one `_indexes`
    /// snapshot. Re-declaring an existing index is a no-op success.
    pub fn create_index(&self, name: &str, field: &str) -> bool {
        let mut guard = self.inner.write().unwrap();
        let inner = &mut *guard;

        let newly_added = match inner.collections.get(name) {
            Some(collection) => inner.indexes.declare(name, field, collection.iter()),
            None => inner.indexes.declare(name, field, std::iter::empty::<&Value>()),
        };
        if !newly_added {
            return true;
        }

        self.engine.compact(INDEXES, &[inner.indexes.snapshot()])
    }

    /// Rewrites a collection log down to its live documents.
    pub fn trigger_compaction(&self, name: &str) -> bool {
        let guard = self.inner.write().unwrap();
        match guard.collections.get(name) {
            Some(collection) => Self::compact_with(&self.engine, collection, name),
            None => false,
        }
    }

    /// Provisions a credential with the given role.
    pub fn create_user(&self, key: &str, role: &str) -> bool {
        let mut guard = self.inner.write().unwrap();
        Self::create_user_with(&self.engine, &mut guard, key, role)
    }

    /// Resolves a credential to its role.
    pub fn authenticate(&self, key: &str) -> Role {
        self.inner.read().unwrap().auth.authenticate(key)
    }

    /// True when `role` may perform the named protocol action.
    pub fn has_permission(role: Role, action: &str) -> bool {
        role.permits(action)
    }

    fn insert_with(&self, inner: &mut DbInner, name: &str, mut data: Value) -> bool {
        if !data.is_object() {
            tracing::warn!(collection = %name, "insert payload is not an object");
            return false;
        }

        if let Some(schema) = inner.schemas.get(name) {
            if !query::validate(&data.to_string(), &schema.to_string()) {
                tracing::warn!(collection = %name, "schema violation rejected insert");
                return false;
            }
        }

        let id = match data.get("_id").and_then(Value::as_str) {
            Some(id) => id.to_string(),
            None => {
                let id = id::generate();
                if let Some(obj) = data.as_object_mut() {
                    obj.insert("_id".to_string(), json!(id));
                }
                id
            }
        };

        let collection = inner.collections.entry(name.to_string()).or_default();
        collection.insert(id.clone(), data.clone());
        inner.indexes.on_insert(name, &data);

        let ok = self.engine.append(name, &data.to_string());
        tracing::trace!(collection = %name, id = %id, "document inserted");
        ok
    }

    fn update_with(&self, inner: &mut DbInner, name: &str, query: &Value, update: &Value) -> bool {
        let Some(collection) = inner.collections.get(name) else {
            return false;
        };
        tracing::debug!(collection = %name, "executing update rewrite");

        let rewritten = query::update(
            &collection.to_json(),
            &query.to_string(),
            &update.to_string(),
        );
        let Ok(Value::Array(docs)) = serde_json::from_str(&rewritten) else {
            tracing::error!(collection = %name, "update rewrite produced invalid JSON");
            return false;
        };

        let Some(collection) = inner.collections.get_mut(name) else {
            return false;
        };
        collection.replace_all(docs);
        inner.indexes.rebuild(name, collection.iter());

        // The replacement set has no per-document delta frames; rewriting
        // the log to the new state keeps replay equivalent.
        Self::compact_with(&self.engine, collection, name);
        true
    }

    fn count_of(inner: &DbInner, name: &str, query: Option<&Value>) -> usize {
        let Some(collection) = inner.collections.get(name) else {
            return 0;
        };
        match query {
            Some(q) if q.as_object().is_some_and(|o| !o.is_empty()) => {
                query::count(&collection.to_json(), &q.to_string())
            }
            _ => collection.len(),
        }
    }

    fn create_user_with(engine: &Engine, inner: &mut DbInner, key: &str, role: &str) -> bool {
        let hashed = auth::hash_key(key);
        inner.auth.cache_user(hashed.clone(), Role::parse(role));

        let id = id::generate();
        let doc = json!({
            "_id": id,
            "key_hash": hashed,
            "role": role,
            "created_at": unix_seconds(),
        });
        let ok = engine.append(AUTH, &doc.to_string());

        let collection = inner.collections.entry(AUTH.to_string()).or_default();
        collection.insert(id, doc);

        tracing::info!(role, "user provisioned");
        ok
    }

    fn compact_with(engine: &Engine, collection: &Collection, name: &str) -> bool {
        let active: Vec<String> = collection.iter().map(Value::to_string).collect();
        let ok = engine.compact(name, &active);
        if ok {
            tracing::debug!(collection = %name, frames = active.len(), "compaction complete");
        } else {
            tracing::error!(collection = %name, "compaction failed");
        }
        ok
    }
}

/// True when an optional sort/projection clause is absent or carries no
/// keys; only then may the planner skip the full scan.
fn is_empty_clause(clause: Option<&Value>) -> bool {
    clause.map_or(true, |v| v.as_object().map_or(true, |o| o.is_empty()))
}

fn clause_text(clause: Option<&Value>) -> String {
    clause.map_or_else(|| "{}".to_string(), Value::to_string)
}

fn slice_ids(ids: &[String], limit: usize, skip: usize) -> &[String] {
    if skip >= ids.len() {
        return &[];
    }
    let end = if limit > 0 {
        (skip + limit).min(ids.len())
    } else {
        ids.len()
    };
    &ids[skip..end]
}

fn unix_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
