//! Provider endpoint derivation.
//!
//! Keycloak-style providers expose their OAuth2/OIDC endpoints under a fixed
//! suffix of the realm issuer URL (`/protocol/openid-connect/*`). Each
//! endpoint can also be overridden explicitly; overrides are used verbatim
//! and are never recomputed from the issuer.

use serde::{Deserialize, Serialize};

use crate::error::AuthError;

const AUTHORIZATION_SUFFIX: &str = "/protocol/openid-connect/auth";
const TOKEN_SUFFIX: &str = "/protocol/openid-connect/token";
const USERINFO_SUFFIX: &str = "/protocol/openid-connect/userinfo";
const JWKS_SUFFIX: &str = "/protocol/openid-connect/certs";
const LOGOUT_SUFFIX: &str = "/protocol/openid-connect/logout";

/// The full set of provider endpoints used by the authorization flow.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderEndpoints {
    pub authorization: String,
    pub token: String,
    pub userinfo: String,
    pub jwks: String,
    pub logout: String,
}

/// Explicit endpoint overrides, each taking precedence over derivation
/// from the issuer when present and non-empty.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointOverrides {
    #[serde(default)]
    pub authorization: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub userinfo: Option<String>,
    #[serde(default)]
    pub jwks: Option<String>,
    #[serde(default)]
    pub logout: Option<String>,
}

impl EndpointOverrides {
    /// Merge another override set on top of this one. Values present in
    /// `other` win; values absent in `other` keep their current setting.
    pub fn merged_with(&self, other: &EndpointOverrides) -> EndpointOverrides {
        fn pick(new: &Option<String>, old: &Option<String>) -> Option<String> {
            new.clone().or_else(|| old.clone())
        }
        EndpointOverrides {
            authorization: pick(&other.authorization, &self.authorization),
            token: pick(&other.token, &self.token),
            userinfo: pick(&other.userinfo, &self.userinfo),
            jwks: pick(&other.jwks, &self.jwks),
            logout: pick(&other.logout, &self.logout),
        }
    }
}

/// Derive the full endpoint set from an issuer URL and explicit overrides.
///
/// Pure string composition, no network calls. For each endpoint, a
/// non-empty override is used verbatim; otherwise the issuer is extended
/// with the fixed path suffix for that endpoint.
///
/// # Errors
///
/// Returns [`AuthError::Configuration`] when the issuer is empty and no
/// override exists for some endpoint.
pub fn resolve(
    issuer: &str,
    overrides: &EndpointOverrides,
) -> Result<ProviderEndpoints, AuthError> {
    Ok(ProviderEndpoints {
        authorization: resolve_one(issuer, &overrides.authorization, AUTHORIZATION_SUFFIX, "authorization")?,
        token: resolve_one(issuer, &overrides.token, TOKEN_SUFFIX, "token")?,
        userinfo: resolve_one(issuer, &overrides.userinfo, USERINFO_SUFFIX, "userinfo")?,
        jwks: resolve_one(issuer, &overrides.jwks, JWKS_SUFFIX, "jwks")?,
        logout: resolve_one(issuer, &overrides.logout, LOGOUT_SUFFIX, "logout")?,
    })
}

fn resolve_one(
    issuer: &str,
    explicit: &Option<String>,
    suffix: &str,
    name: &str,
) -> Result<String, AuthError> {
    if let Some(url) = explicit {
        if !url.trim().is_empty() {
            return Ok(url.clone());
        }
    }
    let issuer = issuer.trim().trim_end_matches('/');
    if issuer.is_empty() {
        return Err(AuthError::Configuration(format!(
            "cannot derive {name} endpoint: issuer is empty and no override is set"
        )));
    }
    Ok(format!("{issuer}{suffix}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_all_five_endpoints_from_issuer() {
        let endpoints = resolve(
            "https://idp.example.com/realms/x",
            &EndpointOverrides::default(),
        )
        .unwrap();

        assert_eq!(
            endpoints.authorization,
            "https://idp.example.com/realms/x/protocol/openid-connect/auth"
        );
        assert_eq!(
            endpoints.token,
            "https://idp.example.com/realms/x/protocol/openid-connect/token"
        );
        assert_eq!(
            endpoints.userinfo,
            "https://idp.example.com/realms/x/protocol/openid-connect/userinfo"
        );
        assert_eq!(
            endpoints.jwks,
            "https://idp.example.com/realms/x/protocol/openid-connect/certs"
        );
        assert_eq!(
            endpoints.logout,
            "https://idp.example.com/realms/x/protocol/openid-connect/logout"
        );
    }

    #[test]
    fn trailing_slash_on_issuer_is_ignored() {
        let endpoints = resolve("https://idp.example.com/realms/x/", &EndpointOverrides::default())
            .unwrap();
        assert_eq!(
            endpoints.jwks,
            "https://idp.example.com/realms/x/protocol/openid-connect/certs"
        );
    }

    #[test]
    fn override_is_preserved_verbatim() {
        let overrides = EndpointOverrides {
            token: Some("https://proxy.internal/custom-token".into()),
            ..Default::default()
        };
        let endpoints = resolve("https://idp.example.com/realms/x", &overrides).unwrap();
        assert_eq!(endpoints.token, "https://proxy.internal/custom-token");
        // The other endpoints still derive from the issuer.
        assert_eq!(
            endpoints.authorization,
            "https://idp.example.com/realms/x/protocol/openid-connect/auth"
        );
    }

    #[test]
    fn empty_override_falls_back_to_derivation() {
        let overrides = EndpointOverrides {
            token: Some("   ".into()),
            ..Default::default()
        };
        let endpoints = resolve("https://idp.example.com/realms/x", &overrides).unwrap();
        assert_eq!(
            endpoints.token,
            "https://idp.example.com/realms/x/protocol/openid-connect/token"
        );
    }

    #[test]
    fn empty_issuer_without_override_fails() {
        let err = resolve("", &EndpointOverrides::default()).unwrap_err();
        assert!(matches!(err, AuthError::Configuration(_)));
    }

    #[test]
    fn empty_issuer_with_full_overrides_succeeds() {
        let overrides = EndpointOverrides {
            authorization: Some("https://a.example/auth".into()),
            token: Some("https://a.example/token".into()),
            userinfo: Some("https://a.example/userinfo".into()),
            jwks: Some("https://a.example/certs".into()),
            logout: Some("https://a.example/logout".into()),
        };
        let endpoints = resolve("", &overrides).unwrap();
        assert_eq!(endpoints.authorization, "https://a.example/auth");
        assert_eq!(endpoints.logout, "https://a.example/logout");
    }

    #[test]
    fn merged_overrides_prefer_newer_values() {
        let old = EndpointOverrides {
            token: Some("https://old.example/token".into()),
            jwks: Some("https://old.example/certs".into()),
            ..Default::default()
        };
        let new = EndpointOverrides {
            token: Some("https://new.example/token".into()),
            ..Default::default()
        };
        let merged = old.merged_with(&new);
        assert_eq!(merged.token.as_deref(), Some("https://new.example/token"));
        assert_eq!(merged.jwks.as_deref(), Some("https://old.example/certs"));
    }
}
