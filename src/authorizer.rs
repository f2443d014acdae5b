//! Pluggable authorization predicate.
//!
//! The host supplies an implementation; this crate only calls it. Modeled
//! as a trait rather than a closure so hosts can hold state (a role
//! hierarchy, a policy cache) behind it.

use serde_json::Value;

use crate::models::PublicData;

/// A single-method interface taking the session's public data and an
/// opaque argument list, returning whether the session is authorized.
pub trait Authorizer: Send + Sync {
    fn is_authorized(&self, public_data: &PublicData, args: &[Value]) -> bool;
}

/// Denies everything. Useful as a default when a host has not wired a real
/// policy yet, and in tests that only exercise anonymous-always-denied
/// paths.
pub struct DenyAll;

impl Authorizer for DenyAll {
    fn is_authorized(&self, _public_data: &PublicData, _args: &[Value]) -> bool {
        false
    }
}

/// Authorizes based on a `role` or `roles` field in public data matching one
/// of `allowed`. A straightforward reference implementation of the
/// `role`/`roles` invariant.
pub struct RoleAuthorizer {
    pub allowed: Vec<String>,
}

impl Authorizer for RoleAuthorizer {
    fn is_authorized(&self, public_data: &PublicData, _args: &[Value]) -> bool {
        if let Some(Value::String(role)) = public_data.get("role") {
            return self.allowed.iter().any(|a| a == role);
        }
        if let Some(Value::Array(roles)) = public_data.get("roles") {
            return roles
                .iter()
                .filter_map(|v| v.as_str())
                .any(|r| self.allowed.iter().any(|a| a == r));
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    #[test]
    fn deny_all_always_false() {
        let pd = PublicData::authenticated(serde_json::json!(1), Map::new()).unwrap();
        assert!(!DenyAll.is_authorized(&pd, &[]));
    }

    #[test]
    fn role_authorizer_matches_single_role() {
        let mut fields = Map::new();
        fields.insert("role".to_string(), Value::String("admin".into()));
        let pd = PublicData::authenticated(serde_json::json!(1), fields).unwrap();
        let authz = RoleAuthorizer {
            allowed: vec!["admin".into()],
        };
        assert!(authz.is_authorized(&pd, &[]));
    }

    #[test]
    fn role_authorizer_matches_roles_array() {
        let mut fields = Map::new();
        fields.insert(
            "roles".to_string(),
            Value::Array(vec![Value::String("editor".into())]),
        );
        let pd = PublicData::authenticated(serde_json::json!(1), fields).unwrap();
        let authz = RoleAuthorizer {
            allowed: vec!["admin".into(), "editor".into()],
        };
        assert!(authz.is_authorized(&pd, &[]));
    }

    #[test]
    fn role_authorizer_denies_unmatched() {
        let mut fields = Map::new();
        fields.insert("role".to_string(), Value::String("viewer".into()));
        let pd = PublicData::authenticated(serde_json::json!(1), fields).unwrap();
        let authz = RoleAuthorizer {
            allowed: vec!["admin".into()],
        };
        assert!(!authz.is_authorized(&pd, &[]));
    }
}
