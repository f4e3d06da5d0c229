use std::collections::HashMap;
use std::time::{Duration, Instant};

use jsonwebtoken::DecodingKey;
use serde::Deserialize;
use tokio::sync::{Mutex, RwLock};

use crate::error::AuthError;

/// Raw JWK as published by the provider's JWKS endpoint. Only the fields
/// needed for RSA signature verification are captured.
#[derive(Debug, Clone, Deserialize)]
struct Jwk {
    kid: Option<String>,
    kty: String,
    #[serde(default)]
    n: Option<String>,
    #[serde(default)]
    e: Option<String>,
}

/// JWKS response envelope.
#[derive(Debug, Deserialize)]
struct JwksDocument {
    keys: Vec<Jwk>,
}

/// Cached key material. Raw components are kept so a `DecodingKey` can be
/// rebuilt on demand (`DecodingKey` is not `Clone`-friendly across key types).
#[derive(Debug, Clone)]
struct CachedJwk {
    kty: String,
    n: Option<String>,
    e: Option<String>,
}

impl CachedJwk {
    fn to_decoding_key(&self) -> Result<DecodingKey, AuthError> {
        match self.kty.as_str() {
            "RSA" => {
                let n = self.n.as_deref().ok_or_else(|| {
                    AuthError::JwksFetch("RSA key missing 'n' component".into())
                })?;
                let e = self.e.as_deref().ok_or_else(|| {
                    AuthError::JwksFetch("RSA key missing 'e' component".into())
                })?;
                DecodingKey::from_rsa_components(n, e).map_err(|err| {
                    AuthError::JwksFetch(format!("failed to build RSA decoding key: {err}"))
                })
            }
            other => Err(AuthError::JwksFetch(format!(
                "unsupported key type in JWKS: {other}"
            ))),
        }
    }
}

struct CacheInner {
    /// URL the cached keys were fetched from. The JWKS endpoint is part of
    /// the live provider settings, so a settings change must invalidate
    /// everything cached for the previous endpoint.
    url: String,
    keys: HashMap<String, CachedJwk>,
    last_refresh: Option<Instant>,
    last_refresh_attempt: Option<Instant>,
}

/// Cache of provider signing keys, indexed by `kid`.
///
/// Unlike a cache bound to a fixed endpoint, the JWKS URL is supplied on
/// every lookup: it comes from the current settings snapshot, and the
/// cache refetches whenever the URL differs from the one it last fetched.
/// A lookup for an unknown `kid` also triggers a refresh (key rotation)
/// before failing, throttled by a minimum refresh interval.
pub struct JwksCache {
    inner: RwLock<CacheInner>,
    client: reqwest::Client,
    ttl: Duration,
    min_refresh_interval: Duration,
    refresh_lock: Mutex<()>,
}

const DEFAULT_TTL_SECS: u64 = 3600;
const DEFAULT_MIN_REFRESH_INTERVAL_SECS: u64 = 10;
const FETCH_TIMEOUT_SECS: u64 = 10;

impl JwksCache {
    /// Create an empty cache. No fetch happens until the first lookup,
    /// since the endpoint is only known from a settings snapshot.
    pub fn new() -> Self {
        Self::with_ttl(
            Duration::from_secs(DEFAULT_TTL_SECS),
            Duration::from_secs(DEFAULT_MIN_REFRESH_INTERVAL_SECS),
        )
    }

    pub fn with_ttl(ttl: Duration, min_refresh_interval: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(FETCH_TIMEOUT_SECS))
            .build()
            .expect("failed to build JWKS HTTP client");
        Self {
            inner: RwLock::new(CacheInner {
                url: String::new(),
                keys: HashMap::new(),
                last_refresh: None,
                last_refresh_attempt: None,
            }),
            client,
            ttl,
            min_refresh_interval,
            refresh_lock: Mutex::new(()),
        }
    }

    /// Retrieve the decoding key for `kid` from the JWKS at `jwks_url`.
    ///
    /// Refreshes when the URL changed, the cache is stale, or the `kid` is
    /// unknown. Returns [`AuthError::SigningKeyNotFound`] when the key is
    /// still absent after a refresh.
    pub async fn get_key(&self, jwks_url: &str, kid: &str) -> Result<DecodingKey, AuthError> {
        if jwks_url.trim().is_empty() {
            return Err(AuthError::Configuration(
                "JWKS endpoint is not configured".into(),
            ));
        }

        let mut force = false;
        {
            let cache = self.inner.read().await;
            if cache.url == jwks_url {
                if let Some(jwk) = cache.keys.get(kid) {
                    if !is_stale(cache.last_refresh, self.ttl) {
                        return jwk.to_decoding_key();
                    }
                } else {
                    // Unknown kid on the current endpoint: likely key rotation.
                    force = true;
                }
            } else {
                // Endpoint changed under us via a live settings update.
                force = true;
            }
        }

        self.try_refresh(jwks_url, force).await?;

        let cache = self.inner.read().await;
        cache
            .keys
            .get(kid)
            .ok_or_else(|| AuthError::SigningKeyNotFound(kid.to_string()))?
            .to_decoding_key()
    }

    async fn try_refresh(&self, jwks_url: &str, force: bool) -> Result<(), AuthError> {
        let _guard = self.refresh_lock.lock().await;

        // Re-check under the lock: another task may have refreshed already.
        {
            let cache = self.inner.read().await;
            let same_url = cache.url == jwks_url;
            if same_url && !force && !is_stale(cache.last_refresh, self.ttl) {
                return Ok(());
            }
            // Throttle repeated refreshes against the same endpoint; an
            // endpoint change always goes through.
            if same_url && !can_attempt(cache.last_refresh_attempt, self.min_refresh_interval) {
                return Ok(());
            }
        }

        {
            let mut cache = self.inner.write().await;
            cache.last_refresh_attempt = Some(Instant::now());
        }

        self.refresh(jwks_url).await
    }

    async fn refresh(&self, jwks_url: &str) -> Result<(), AuthError> {
        tracing::debug!(url = %jwks_url, "refreshing JWKS");

        let response = self
            .client
            .get(jwks_url)
            .send()
            .await
            .map_err(|e| AuthError::JwksFetch(e.to_string()))?
            .error_for_status()
            .map_err(|e| AuthError::JwksFetch(e.to_string()))?;

        let document: JwksDocument = response
            .json()
            .await
            .map_err(|e| AuthError::JwksFetch(format!("failed to parse JWKS: {e}")))?;

        let mut keys = HashMap::new();
        for jwk in document.keys {
            if let Some(kid) = &jwk.kid {
                keys.insert(
                    kid.clone(),
                    CachedJwk {
                        kty: jwk.kty.clone(),
                        n: jwk.n.clone(),
                        e: jwk.e.clone(),
                    },
                );
            }
        }

        let now = Instant::now();
        let mut cache = self.inner.write().await;
        cache.url = jwks_url.to_string();
        cache.keys = keys;
        cache.last_refresh = Some(now);
        cache.last_refresh_attempt = Some(now);

        Ok(())
    }
}

impl Default for JwksCache {
    fn default() -> Self {
        Self::new()
    }
}

fn is_stale(last_refresh: Option<Instant>, ttl: Duration) -> bool {
    match last_refresh {
        None => true,
        Some(ts) => ts.elapsed() >= ttl,
    }
}

fn can_attempt(last_attempt: Option<Instant>, min_interval: Duration) -> bool {
    match last_attempt {
        None => true,
        Some(ts) => ts.elapsed() >= min_interval,
    }
}
