//! Role extraction from verified token claims.
//!
//! Providers carry role claims in different places. Keycloak uses
//! `realm_access.roles` for realm-level roles and
//! `resource_access.{client_id}.roles` for client-level roles; other
//! providers put a plain `roles` array at the top level. The
//! [`RoleExtractor`] trait abstracts over the claim location so the
//! validator and claims mapper stay provider-agnostic.

/// Extracts role strings from a verified claims document.
pub trait RoleExtractor: Send + Sync {
    fn extract_roles(&self, claims: &serde_json::Value) -> Vec<String>;
}

/// Reads the top-level `roles` claim.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardRoleExtractor;

impl RoleExtractor for StandardRoleExtractor {
    fn extract_roles(&self, claims: &serde_json::Value) -> Vec<String> {
        extract_string_array(claims, &["roles"])
    }
}

/// Reads Keycloak realm-level roles from `realm_access.roles`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealmRoleExtractor;

impl RoleExtractor for RealmRoleExtractor {
    fn extract_roles(&self, claims: &serde_json::Value) -> Vec<String> {
        extract_string_array(claims, &["realm_access", "roles"])
    }
}

/// Reads Keycloak client-level roles from `resource_access.{client_id}.roles`.
#[derive(Debug)]
pub struct ClientRoleExtractor {
    client_id: String,
}

impl ClientRoleExtractor {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
        }
    }
}

impl RoleExtractor for ClientRoleExtractor {
    fn extract_roles(&self, claims: &serde_json::Value) -> Vec<String> {
        claims
            .get("resource_access")
            .and_then(|v| v.get(self.client_id.as_str()))
            .and_then(|v| v.get("roles"))
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|r| r.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Tries two extractors in order and returns the first non-empty result.
///
/// Nest instances for more than two fallbacks.
#[derive(Debug, Clone, Copy)]
pub struct Composite<A, B>(pub A, pub B);

impl<A: RoleExtractor, B: RoleExtractor> RoleExtractor for Composite<A, B> {
    fn extract_roles(&self, claims: &serde_json::Value) -> Vec<String> {
        let roles = self.0.extract_roles(claims);
        if !roles.is_empty() {
            roles
        } else {
            self.1.extract_roles(claims)
        }
    }
}

/// Default extraction order: top-level `roles`, then Keycloak realm roles.
pub type DefaultRoleExtractor = Composite<StandardRoleExtractor, RealmRoleExtractor>;

/// Construct the default extractor.
pub fn default_role_extractor() -> DefaultRoleExtractor {
    Composite(StandardRoleExtractor, RealmRoleExtractor)
}

/// Walk `path` into `value` and collect the string array found there.
pub(crate) fn extract_string_array(value: &serde_json::Value, path: &[&str]) -> Vec<String> {
    let mut current = value;
    for key in path {
        match current.get(*key) {
            Some(v) => current = v,
            None => return Vec::new(),
        }
    }
    current
        .as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default()
}
