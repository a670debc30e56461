//! Credential hashing and role-based access control.
//!
//! Credentials are hashed with a DJB2 variant. This is deliberately
//! non-cryptographic: API keys are transport-level secrets looked up at
//! request rate, not passwords at rest.

use std::collections::HashMap;

/// Permission level attached to a credential.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// Unknown or missing credential. Never persisted.
    None,
    ReadOnly,
    ReadWrite,
    Admin,
}

impl Role {
    /// Parses a persisted role string. Unrecognized strings degrade to
    /// read-only rather than failing the record.
    pub fn parse(role: &str) -> Role {
        match role {
            "admin" => Role::Admin,
            "read_write" => Role::ReadWrite,
            _ => Role::ReadOnly,
        }
    }

    /// True when the role may perform the named protocol action.
    pub fn permits(self, action: &str) -> bool {
        match self {
            Role::Admin => true,
            Role::ReadWrite => matches!(
                action,
                "find" | "count" | "insert" | "update" | "delete" | "upsert"
            ),
            Role::ReadOnly => matches!(action, "find" | "count"),
            Role::None => false,
        }
    }
}

/// DJB2 hash of a credential key: seed 5381, `hash = hash * 33 + byte`,
/// wrapping 64-bit arithmetic, rendered in decimal.
pub fn hash_key(key: &str) -> String {
    let mut hash: u64 = 5381;
    for byte in key.bytes() {
        hash = hash
            .wrapping_shl(5)
            .wrapping_add(hash)
            .wrapping_add(byte as u64);
    }
    hash.to_string()
}

/// In-memory credential cache: key hash → role.
///
/// The backing records live in the `_auth` collection; recovery repopulates
/// the cache from there and `create_user` keeps both in step.
#[derive(Debug, Default)]
pub struct AuthStore {
    cache: HashMap<String, Role>,
}

impl AuthStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub fn cache_user(&mut self, key_hash: String, role: Role) {
        self.cache.insert(key_hash, role);
    }

    /// Resolves a raw credential to its role. Empty and unknown keys
    /// resolve to [`Role::None`].
    pub fn authenticate(&self, key: &str) -> Role {
        if key.is_empty() {
            return Role::None;
        }
        self.cache
            .get(&hash_key(key))
            .copied()
            .unwrap_or(Role::None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_key_known_vectors() {
        assert_eq!(hash_key(""), "5381");
        assert_eq!(hash_key("root"), "6385662377");
    }

    #[test]
    fn test_hash_key_wraps() {
        // Long input overflows 64 bits many times over; the point is that
        // it neither panics nor loses determinism.
        let long = "k".repeat(4096);
        assert_eq!(hash_key(&long), hash_key(&long));
    }

    #[test]
    fn test_role_parse() {
        assert_eq!(Role::parse("admin"), Role::Admin);
        assert_eq!(Role::parse("read_write"), Role::ReadWrite);
        assert_eq!(Role::parse("read_only"), Role::ReadOnly);
        assert_eq!(Role::parse("banana"), Role::ReadOnly);
    }

    #[test]
    fn test_permission_matrix() {
        for action in ["find", "count", "insert", "update", "delete", "upsert"] {
            assert!(Role::Admin.permits(action));
            assert!(Role::ReadWrite.permits(action));
            assert!(!Role::None.permits(action));
        }
        for action in ["create_user", "set_schema", "create_index", "compact"] {
            assert!(Role::Admin.permits(action));
            assert!(!Role::ReadWrite.permits(action));
            assert!(!Role::ReadOnly.permits(action));
        }
        assert!(Role::ReadOnly.permits("find"));
        assert!(Role::ReadOnly.permits("count"));
        assert!(!Role::ReadOnly.permits("insert"));
        assert!(!Role::None.permits("find"));
    }

    #[test]
    fn test_authenticate() {
        let mut store = AuthStore::new();
        store.cache_user(hash_key("root"), Role::Admin);

        assert_eq!(store.authenticate("root"), Role::Admin);
        assert_eq!(store.authenticate("wrong"), Role::None);
        assert_eq!(store.authenticate(""), Role::None);
    }
}
