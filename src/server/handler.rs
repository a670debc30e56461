//! Request processing: parse, authenticate, authorize, dispatch, respond.
//!
//! One request in, one response out. Responses always carry a `status` of
//! `ok`, `error`, or `goodbye`, with `message`, `data`, or `count` filled
//! in per action.

use serde_json::{json, Map, Value};

use crate::auth::Role;
use crate::db::Database;

/// Processes one raw client request against the database and returns the
/// serialized response.
pub fn process(db: &Database, raw: &str) -> String {
    if raw.is_empty() {
        return error("Empty request payload");
    }
    let Ok(req) = serde_json::from_str::<Value>(raw) else {
        return error("Invalid JSON syntax");
    };

    let action = req["action"].as_str().unwrap_or("");
    let key = req["auth"].as_str().unwrap_or("");

    let role = db.authenticate(key);
    if role == Role::None {
        return error("Unauthorized: invalid or missing API key");
    }

    // Graceful disconnect is available to every authenticated role.
    if action == "exit" {
        return json!({"status": "goodbye", "message": "Closing connection"}).to_string();
    }

    if !Database::has_permission(role, action) {
        return error("Forbidden: insufficient privileges");
    }

    dispatch(db, &req, role, action)
}

fn dispatch(db: &Database, req: &Value, role: Role, action: &str) -> String {
    if action == "create_user" {
        // has_permission admits only admins here; keep the explicit check
        // anyway so a matrix change cannot silently open provisioning.
        if role != Role::Admin {
            return error("Forbidden: user provisioning requires admin role");
        }
        let (Some(key), Some(user_role)) = (req["key"].as_str(), req["role"].as_str()) else {
            return error("Missing required arguments: 'key' or 'role'");
        };
        return if db.create_user(key, user_role) {
            ok("User created")
        } else {
            error("Failed to persist user")
        };
    }

    let collection = req["collection"].as_str().unwrap_or("");
    if !valid_collection_name(collection) {
        return error("Invalid collection name");
    }

    match action {
        "insert" => match req.get("data") {
            Some(data) => {
                if db.insert(collection, data.clone()) {
                    ok("Document inserted")
                } else {
                    error("Insert failed (schema violation or I/O error)")
                }
            }
            None => error("Missing payload: 'data'"),
        },
        "upsert" => match (req.get("query"), req.get("data")) {
            (Some(query), Some(data)) => {
                if db.upsert(collection, query, data.clone()) {
                    ok("Document upserted")
                } else {
                    error("Upsert failed")
                }
            }
            _ => error("Missing arguments: 'query' or 'data'"),
        },
        "find" => {
            let limit = req["limit"].as_u64().unwrap_or(0) as usize;
            let skip = req["skip"].as_u64().unwrap_or(0) as usize;
            let docs = db.find(
                collection,
                req.get("query"),
                req.get("sort"),
                req.get("projection"),
                limit,
                skip,
            );
            let mut resp = Map::new();
            resp.insert("status".to_string(), json!("ok"));
            resp.insert("data".to_string(), Value::Array(docs));
            Value::Object(resp).to_string()
        }
        "count" => {
            let count = db.count(collection, req.get("query"));
            json!({"status": "ok", "count": count}).to_string()
        }
        "update" => match (req.get("query"), req.get("update")) {
            (Some(query), Some(update)) => {
                if db.update(collection, query, update) {
                    ok("Update committed")
                } else {
                    error("Update failed (collection not found or I/O error)")
                }
            }
            _ => error("Missing arguments: 'query' or 'update'"),
        },
        "delete" => match req.get("query") {
            Some(query) => {
                if db.delete(collection, query) {
                    ok("Documents deleted")
                } else {
                    error("No documents matched or collection not found")
                }
            }
            None => error("Missing argument: 'query'"),
        },
        "set_schema" => match req.get("schema") {
            Some(schema) => {
                if db.set_schema(collection, schema) {
                    ok("Schema applied")
                } else {
                    error("Failed to persist schema")
                }
            }
            None => error("Missing argument: 'schema'"),
        },
        "create_index" => match req["field"].as_str() {
            Some(field) => {
                if db.create_index(collection, field) {
                    ok("Index created and backfilled")
                } else {
                    error("Index creation failed")
                }
            }
            None => error("Missing argument: 'field'"),
        },
        "compact" => {
            if db.trigger_compaction(collection) {
                ok("Compaction completed")
            } else {
                error("Compaction failed")
            }
        }
        _ => error(&format!("Unknown action: {action}")),
    }
}

/// Collection names are path components; restrict them to word characters.
fn valid_collection_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

fn ok(message: &str) -> String {
    json!({"status": "ok", "message": message}).to_string()
}

fn error(message: &str) -> String {
    json!({"status": "error", "message": message}).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn open_db() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().to_str().unwrap()).unwrap();
        (dir, db)
    }

    fn call(db: &Database, req: Value) -> Value {
        serde_json::from_str(&process(db, &req.to_string())).unwrap()
    }

    #[test]
    fn test_rejects_garbage() {
        let (_dir, db) = open_db();
        assert_eq!(
            serde_json::from_str::<Value>(&process(&db, "")).unwrap()["status"],
            "error"
        );
        assert_eq!(
            serde_json::from_str::<Value>(&process(&db, "{not json")).unwrap()["status"],
            "error"
        );
    }

    #[test]
    fn test_rejects_unknown_key() {
        let (_dir, db) = open_db();
        let resp = call(&db, json!({"action": "find", "auth": "wrong", "collection": "c"}));
        assert_eq!(resp["status"], "error");
        let resp = call(&db, json!({"action": "find", "collection": "c"}));
        assert_eq!(resp["status"], "error");
    }

    #[test]
    fn test_insert_and_find_roundtrip() {
        let (_dir, db) = open_db();
        let resp = call(
            &db,
            json!({
                "action": "insert",
                "auth": "root",
                "collection": "c",
                "data": {"name": "x"}
            }),
        );
        assert_eq!(resp["status"], "ok");

        let resp = call(
            &db,
            json!({
                "action": "find",
                "auth": "root",
                "collection": "c",
                "query": {"name": "x"}
            }),
        );
        assert_eq!(resp["status"], "ok");
        assert_eq!(resp["data"].as_array().unwrap().len(), 1);
        assert_eq!(resp["data"][0]["name"], "x");
    }

    #[test]
    fn test_count_response() {
        let (_dir, db) = open_db();
        db.insert("c", json!({"v": 1}));
        db.insert("c", json!({"v": 2}));

        let resp = call(&db, json!({"action": "count", "auth": "root", "collection": "c"}));
        assert_eq!(resp["count"], 2);
    }

    #[test]
    fn test_read_only_denied_writes() {
        let (_dir, db) = open_db();
        db.create_user("reader", "read_only");

        let resp = call(
            &db,
            json!({
                "action": "insert",
                "auth": "reader",
                "collection": "c",
                "data": {"v": 1}
            }),
        );
        assert_eq!(resp["status"], "error");

        let resp = call(&db, json!({"action": "find", "auth": "reader", "collection": "c"}));
        assert_eq!(resp["status"], "ok");
    }

    #[test]
    fn test_admin_actions_denied_for_read_write() {
        let (_dir, db) = open_db();
        db.create_user("writer", "read_write");

        for action in ["set_schema", "create_index", "compact", "create_user"] {
            let resp = call(
                &db,
                json!({"action": action, "auth": "writer", "collection": "c"}),
            );
            assert_eq!(resp["status"], "error", "action {action} should be denied");
        }
    }

    #[test]
    fn test_exit_for_any_role() {
        let (_dir, db) = open_db();
        db.create_user("reader", "read_only");

        let resp = call(&db, json!({"action": "exit", "auth": "reader"}));
        assert_eq!(resp["status"], "goodbye");
    }

    #[test]
    fn test_missing_arguments() {
        let (_dir, db) = open_db();
        let resp = call(&db, json!({"action": "insert", "auth": "root", "collection": "c"}));
        assert_eq!(resp["status"], "error");

        let resp = call(&db, json!({"action": "delete", "auth": "root", "collection": "c"}));
        assert_eq!(resp["status"], "error");
    }

    #[test]
    fn test_invalid_collection_name() {
        let (_dir, db) = open_db();
        let resp = call(
            &db,
            json!({
                "action": "insert",
                "auth": "root",
                "collection": "../escape",
                "data": {"v": 1}
            }),
        );
        assert_eq!(resp["status"], "error");
    }

    #[test]
    fn test_unknown_action() {
        let (_dir, db) = open_db();
        let resp = call(&db, json!({"action": "explode", "auth": "root", "collection": "c"}));
        assert_eq!(resp["status"], "error");
    }
}
