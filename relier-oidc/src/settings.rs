//! Live provider settings.
//!
//! The identity-provider connection parameters are runtime-mutable:
//! administrators can repoint the application at a different issuer (or
//! override individual endpoints) without a restart, and every in-flight
//! and future authentication attempt reads the new values. Readers get an
//! immutable [`Arc`] snapshot; writers build a complete replacement
//! configuration, persist it, then publish it with a single swap so no
//! reader ever observes a mix of old and new endpoints.

use std::sync::Arc;

use jsonwebtoken::Algorithm;
use tokio::sync::{Mutex, RwLock};

use crate::endpoints::{self, EndpointOverrides, ProviderEndpoints};
use crate::error::AuthError;
use crate::store::{SettingsStore, SettingsStoreErased};

const KEY_ENABLED: &str = "OIDC_ENABLED";
const KEY_ISSUER: &str = "OIDC_ISSUER";
const KEY_CLIENT_ID: &str = "OIDC_CLIENT_ID";
const KEY_CLIENT_SECRET: &str = "OIDC_CLIENT_SECRET";
const KEY_SCOPES: &str = "OIDC_SCOPES";
const KEY_SIGNING_ALGORITHMS: &str = "OIDC_SIGNING_ALGORITHMS";
const KEY_AUTO_CREATE_USERS: &str = "OIDC_AUTO_CREATE_USERS";
const KEY_AUTHORIZATION_ENDPOINT: &str = "OIDC_AUTHORIZATION_ENDPOINT";
const KEY_TOKEN_ENDPOINT: &str = "OIDC_TOKEN_ENDPOINT";
const KEY_USERINFO_ENDPOINT: &str = "OIDC_USERINFO_ENDPOINT";
const KEY_JWKS_ENDPOINT: &str = "OIDC_JWKS_ENDPOINT";
const KEY_LOGOUT_ENDPOINT: &str = "OIDC_LOGOUT_ENDPOINT";

/// The authoritative description of the current identity provider.
///
/// Constructed from persisted/environment defaults at startup and replaced
/// wholesale by administrative updates. Endpoints are resolved once at
/// construction time ([`crate::endpoints::resolve`]): explicit overrides
/// are kept verbatim, everything else derives from the issuer.
#[derive(Clone)]
pub struct IdpSettings {
    pub enabled: bool,
    pub issuer: String,
    pub client_id: String,
    pub client_secret: String,
    pub scopes: Vec<String>,
    pub signing_algorithms: Vec<Algorithm>,
    pub auto_create_users: bool,
    /// Explicitly overridden endpoints, remembered so later issuer changes
    /// never silently recompute them.
    pub overrides: EndpointOverrides,
    /// The resolved endpoint set in effect.
    pub endpoints: ProviderEndpoints,
}

impl std::fmt::Debug for IdpSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdpSettings")
            .field("enabled", &self.enabled)
            .field("issuer", &self.issuer)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[redacted]")
            .field("scopes", &self.scopes)
            .field("signing_algorithms", &self.signing_algorithms)
            .field("auto_create_users", &self.auto_create_users)
            .field("overrides", &self.overrides)
            .field("endpoints", &self.endpoints)
            .finish()
    }
}

impl IdpSettings {
    /// A disabled provider with standard defaults. The starting point for
    /// [`IdpSettings::from_pairs`] and administrative patches.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            issuer: String::new(),
            client_id: String::new(),
            client_secret: String::new(),
            scopes: vec!["openid".into(), "email".into(), "profile".into()],
            signing_algorithms: vec![Algorithm::RS256],
            auto_create_users: true,
            overrides: EndpointOverrides::default(),
            endpoints: ProviderEndpoints::default(),
        }
    }

    /// Build settings from flat `KEY=value` pairs (the persistence and
    /// environment format). Unknown keys are ignored; missing keys keep
    /// their defaults.
    pub fn from_pairs<'a, I>(pairs: I) -> Result<Self, AuthError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut settings = Self::disabled();
        for (key, value) in pairs {
            match key {
                KEY_ENABLED => settings.enabled = parse_bool(value),
                KEY_ISSUER => settings.issuer = value.trim().to_string(),
                KEY_CLIENT_ID => settings.client_id = value.trim().to_string(),
                KEY_CLIENT_SECRET => settings.client_secret = value.to_string(),
                KEY_SCOPES => {
                    settings.scopes = value.split_whitespace().map(String::from).collect()
                }
                KEY_SIGNING_ALGORITHMS => {
                    settings.signing_algorithms = parse_algorithms(value)?
                }
                KEY_AUTO_CREATE_USERS => settings.auto_create_users = parse_bool(value),
                KEY_AUTHORIZATION_ENDPOINT => {
                    settings.overrides.authorization = non_empty(value)
                }
                KEY_TOKEN_ENDPOINT => settings.overrides.token = non_empty(value),
                KEY_USERINFO_ENDPOINT => settings.overrides.userinfo = non_empty(value),
                KEY_JWKS_ENDPOINT => settings.overrides.jwks = non_empty(value),
                KEY_LOGOUT_ENDPOINT => settings.overrides.logout = non_empty(value),
                _ => {}
            }
        }
        settings.finish()
    }

    /// Bootstrap settings from process environment variables (a `.env`
    /// file is loaded first when present, without overriding already-set
    /// variables).
    pub fn from_env() -> Result<Self, AuthError> {
        let _ = dotenvy::dotenv();
        let keys = [
            KEY_ENABLED,
            KEY_ISSUER,
            KEY_CLIENT_ID,
            KEY_CLIENT_SECRET,
            KEY_SCOPES,
            KEY_SIGNING_ALGORITHMS,
            KEY_AUTO_CREATE_USERS,
            KEY_AUTHORIZATION_ENDPOINT,
            KEY_TOKEN_ENDPOINT,
            KEY_USERINFO_ENDPOINT,
            KEY_JWKS_ENDPOINT,
            KEY_LOGOUT_ENDPOINT,
        ];
        let pairs: Vec<(String, String)> = keys
            .iter()
            .filter_map(|key| std::env::var(key).ok().map(|v| (key.to_string(), v)))
            .collect();
        Self::from_pairs(pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
    }

    /// Serialize to the flat `KEY=value` pair format. Only explicitly
    /// overridden endpoints are written; derived endpoints are recomputed
    /// from the issuer on load.
    pub fn to_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = vec![
            (KEY_ENABLED.into(), self.enabled.to_string()),
            (KEY_ISSUER.into(), self.issuer.clone()),
            (KEY_CLIENT_ID.into(), self.client_id.clone()),
            (KEY_CLIENT_SECRET.into(), self.client_secret.clone()),
            (KEY_SCOPES.into(), self.scopes.join(" ")),
            (
                KEY_SIGNING_ALGORITHMS.into(),
                self.signing_algorithms
                    .iter()
                    .map(|alg| format!("{alg:?}"))
                    .collect::<Vec<_>>()
                    .join(" "),
            ),
            (
                KEY_AUTO_CREATE_USERS.into(),
                self.auto_create_users.to_string(),
            ),
        ];
        let overrides = [
            (KEY_AUTHORIZATION_ENDPOINT, &self.overrides.authorization),
            (KEY_TOKEN_ENDPOINT, &self.overrides.token),
            (KEY_USERINFO_ENDPOINT, &self.overrides.userinfo),
            (KEY_JWKS_ENDPOINT, &self.overrides.jwks),
            (KEY_LOGOUT_ENDPOINT, &self.overrides.logout),
        ];
        for (key, value) in overrides {
            if let Some(url) = value {
                pairs.push((key.into(), url.clone()));
            }
        }
        pairs
    }

    /// Apply an administrative patch, producing the replacement settings.
    ///
    /// Endpoints not explicitly overridden are re-derived from the *new*
    /// issuer; previously-set overrides are kept verbatim.
    pub fn apply(&self, patch: SettingsUpdate) -> Result<Self, AuthError> {
        let mut next = self.clone();
        if let Some(enabled) = patch.enabled {
            next.enabled = enabled;
        }
        if let Some(issuer) = patch.issuer {
            next.issuer = issuer.trim().to_string();
        }
        if let Some(client_id) = patch.client_id {
            next.client_id = client_id.trim().to_string();
        }
        if let Some(client_secret) = patch.client_secret {
            next.client_secret = client_secret;
        }
        if let Some(scopes) = patch.scopes {
            next.scopes = scopes;
        }
        if let Some(algorithms) = patch.signing_algorithms {
            next.signing_algorithms = parse_algorithms(&algorithms.join(" "))?;
        }
        if let Some(auto_create) = patch.auto_create_users {
            next.auto_create_users = auto_create;
        }
        next.overrides = self.overrides.merged_with(&patch.endpoints);
        next.finish()
    }

    /// Resolve endpoints and enforce the enabled-provider invariants.
    fn finish(mut self) -> Result<Self, AuthError> {
        if self.enabled {
            if self.issuer.is_empty() && !self.overrides_cover_all() {
                return Err(AuthError::Configuration(
                    "issuer is required when the provider is enabled".into(),
                ));
            }
            if self.client_id.is_empty() {
                return Err(AuthError::Configuration(
                    "client_id is required when the provider is enabled".into(),
                ));
            }
            if self.client_secret.is_empty() {
                return Err(AuthError::Configuration(
                    "client_secret is required when the provider is enabled".into(),
                ));
            }
            if self.signing_algorithms.is_empty() {
                return Err(AuthError::Configuration(
                    "at least one signing algorithm is required".into(),
                ));
            }
            self.endpoints = endpoints::resolve(&self.issuer, &self.overrides)?;
        } else {
            // A disabled provider may be partially configured; keep whatever
            // resolves and leave the rest blank until it is enabled.
            self.endpoints =
                endpoints::resolve(&self.issuer, &self.overrides).unwrap_or_default();
        }
        Ok(self)
    }

    fn overrides_cover_all(&self) -> bool {
        let set = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());
        set(&self.overrides.authorization)
            && set(&self.overrides.token)
            && set(&self.overrides.userinfo)
            && set(&self.overrides.jwks)
            && set(&self.overrides.logout)
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(value.trim(), "true" | "True" | "1" | "yes")
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn parse_algorithms(value: &str) -> Result<Vec<Algorithm>, AuthError> {
    value
        .split_whitespace()
        .map(|name| {
            parse_algorithm(name).ok_or_else(|| {
                AuthError::Configuration(format!("unknown signing algorithm: {name}"))
            })
        })
        .collect()
}

/// Algorithm names are accepted case-insensitively (administrative UIs
/// historically offered lowercase variants).
fn parse_algorithm(name: &str) -> Option<Algorithm> {
    let name = name.to_ascii_uppercase();
    Some(match name.as_str() {
        "HS256" => Algorithm::HS256,
        "HS384" => Algorithm::HS384,
        "HS512" => Algorithm::HS512,
        "RS256" => Algorithm::RS256,
        "RS384" => Algorithm::RS384,
        "RS512" => Algorithm::RS512,
        "ES256" => Algorithm::ES256,
        "ES384" => Algorithm::ES384,
        "PS256" => Algorithm::PS256,
        "PS384" => Algorithm::PS384,
        "PS512" => Algorithm::PS512,
        "EDDSA" => Algorithm::EdDSA,
        _ => return None,
    })
}

/// Partial administrative update. Absent fields keep their current value;
/// endpoint overrides given here are merged on top of the existing ones.
#[derive(Clone, Debug, Default, serde::Deserialize)]
pub struct SettingsUpdate {
    pub enabled: Option<bool>,
    pub issuer: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub scopes: Option<Vec<String>>,
    pub signing_algorithms: Option<Vec<String>>,
    pub auto_create_users: Option<bool>,
    #[serde(default)]
    pub endpoints: EndpointOverrides,
}

/// Process-wide mutable settings store with atomic snapshot publication.
///
/// Readers call [`LiveSettings::snapshot`] and work against an immutable
/// `Arc<IdpSettings>` for the rest of their operation. Administrative
/// updates are serialized, persisted through the [`SettingsStore`] first,
/// and only then published with a single swap; a persistence failure
/// leaves the previous configuration in effect.
pub struct LiveSettings {
    current: RwLock<Arc<IdpSettings>>,
    store: Box<dyn SettingsStoreErased>,
    update_lock: Mutex<()>,
}

impl LiveSettings {
    pub fn new(initial: IdpSettings, store: impl SettingsStore) -> Self {
        Self {
            current: RwLock::new(Arc::new(initial)),
            store: Box::new(store),
            update_lock: Mutex::new(()),
        }
    }

    /// Load initial settings from the persistent store, falling back to
    /// environment variables when nothing was persisted yet.
    pub async fn bootstrap(store: impl SettingsStore) -> Result<Self, AuthError> {
        let initial = match store.load().await? {
            Some(settings) => settings,
            None => IdpSettings::from_env()?,
        };
        Ok(Self::new(initial, store))
    }

    /// A consistent snapshot of the current configuration.
    pub async fn snapshot(&self) -> Arc<IdpSettings> {
        self.current.read().await.clone()
    }

    /// Apply an administrative update.
    ///
    /// The replacement configuration is validated and persisted before the
    /// in-memory swap; on persistence failure the caller gets
    /// [`AuthError::Persistence`] and readers keep seeing the old
    /// configuration. No retries — the caller decides.
    pub async fn update(&self, patch: SettingsUpdate) -> Result<Arc<IdpSettings>, AuthError> {
        let _serialized = self.update_lock.lock().await;

        let current = self.snapshot().await;
        let next = Arc::new(current.apply(patch)?);

        self.store.persist(&next).await?;

        let mut guard = self.current.write().await;
        *guard = next.clone();
        drop(guard);

        tracing::info!(issuer = %next.issuer, enabled = next.enabled, "provider settings updated");
        Ok(next)
    }
}
