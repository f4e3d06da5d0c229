//! Authorization-code flow controller.
//!
//! Drives the two legs of the OAuth2 authorization-code exchange against
//! the currently configured provider: [`AuthorizationFlow::initiate`]
//! builds the redirect to the provider and stashes an anti-forgery
//! attempt in the caller's session; [`AuthorizationFlow::complete`]
//! consumes the callback, exchanges the code for tokens, and hands the ID
//! token to the validator. Each attempt is single-use — the attempt record
//! is removed from the session before any network I/O, so a replayed
//! callback fails the precondition check.

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::AuthError;
use crate::session::SessionStore;
use crate::settings::{IdpSettings, LiveSettings};
use crate::validator::{unix_now, IdTokenValidator, ValidatedIdentity};

/// Session key under which the pending attempt is stored.
const ATTEMPT_KEY: &str = "oidc.attempt";

/// Pending attempts older than this are treated as expired/not found.
const DEFAULT_ATTEMPT_TTL_SECS: u64 = 600;

const HTTP_TIMEOUT_SECS: u64 = 30;

/// Ephemeral per-login state, stored in the owning session between the
/// redirect to the provider and the callback.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthorizationAttempt {
    pub state: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    /// Seconds since the Unix epoch.
    pub created_at: u64,
}

/// Query parameters received on the callback route.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// Token endpoint response (RFC 6749 §5.1 plus the OIDC `id_token`).
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    id_token: Option<String>,
    #[serde(default)]
    #[allow(dead_code)]
    token_type: Option<String>,
    #[serde(default)]
    #[allow(dead_code)]
    expires_in: Option<u64>,
}

/// The authorization-code flow state machine.
///
/// Reads a fresh settings snapshot on every transition, so an
/// administrative settings change applies to in-flight logins immediately:
/// an attempt initiated against one issuer and completed after a
/// reconfiguration is validated against the new issuer (and fails, as it
/// should).
pub struct AuthorizationFlow {
    settings: Arc<LiveSettings>,
    validator: IdTokenValidator,
    http: reqwest::Client,
    attempt_ttl: Duration,
}

impl AuthorizationFlow {
    pub fn new(settings: Arc<LiveSettings>, validator: IdTokenValidator) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()
            .expect("failed to build HTTP client");
        Self {
            settings,
            validator,
            http,
            attempt_ttl: Duration::from_secs(DEFAULT_ATTEMPT_TTL_SECS),
        }
    }

    /// Override how long a pending attempt stays valid.
    pub fn with_attempt_ttl(mut self, ttl: Duration) -> Self {
        self.attempt_ttl = ttl;
        self
    }

    pub fn settings(&self) -> &Arc<LiveSettings> {
        &self.settings
    }

    /// Start a login: build the provider authorization URL and store the
    /// matching attempt in the caller's session.
    ///
    /// The web layer is expected to skip this entirely for sessions that
    /// are already authenticated (redirect home instead).
    pub async fn initiate(
        &self,
        session: &dyn SessionStore,
        redirect_uri: &str,
    ) -> Result<String, AuthError> {
        let cfg = self.settings.snapshot().await;
        if !cfg.enabled {
            return Err(AuthError::Configuration(
                "OpenID Connect login is disabled".into(),
            ));
        }

        let mut url = Url::parse(&cfg.endpoints.authorization).map_err(|e| {
            AuthError::Configuration(format!("invalid authorization endpoint: {e}"))
        })?;

        let attempt = AuthorizationAttempt {
            state: generate_state_token(),
            redirect_uri: redirect_uri.to_string(),
            scopes: cfg.scopes.clone(),
            created_at: unix_now()?,
        };

        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &cfg.client_id)
            .append_pair("redirect_uri", &attempt.redirect_uri)
            .append_pair("scope", &attempt.scopes.join(" "))
            .append_pair("state", &attempt.state);

        let record =
            serde_json::to_string(&attempt).expect("attempt record serialization cannot fail");
        session.set(ATTEMPT_KEY, record);

        debug!(issuer = %cfg.issuer, "authorization redirect issued");
        Ok(url.to_string())
    }

    /// Complete a login from the provider callback.
    ///
    /// The pending attempt is consumed up front — before the error check
    /// and before any network call — so every failure path discards it and
    /// a repeated callback with the same `state` fails as "no pending
    /// attempt". On success the validated identity is returned; the web
    /// layer decides what session state to establish from it.
    pub async fn complete(
        &self,
        session: &dyn SessionStore,
        params: CallbackParams,
    ) -> Result<ValidatedIdentity, AuthError> {
        let record = session.remove(ATTEMPT_KEY).ok_or_else(|| {
            AuthError::InvalidCallback("no pending authorization attempt".into())
        })?;
        let attempt: AuthorizationAttempt = serde_json::from_str(&record)
            .map_err(|e| AuthError::InvalidCallback(format!("corrupt attempt record: {e}")))?;

        let age = unix_now()?.saturating_sub(attempt.created_at);
        if age > self.attempt_ttl.as_secs() {
            warn!(age, "discarding expired authorization attempt");
            return Err(AuthError::InvalidCallback(
                "authorization attempt expired".into(),
            ));
        }

        if let Some(error) = params.error {
            warn!(%error, "provider returned an error on the callback");
            return Err(AuthError::ProviderDenied {
                error,
                description: params.error_description,
            });
        }

        if params.state.as_deref() != Some(attempt.state.as_str()) {
            warn!("callback state does not match the pending attempt");
            return Err(AuthError::InvalidCallback("state mismatch".into()));
        }

        let code = params
            .code
            .as_deref()
            .ok_or_else(|| AuthError::InvalidCallback("missing authorization code".into()))?;

        let cfg = self.settings.snapshot().await;
        let tokens = self.exchange_code(&cfg, code, &attempt.redirect_uri).await?;
        let id_token = tokens.id_token.as_deref().ok_or_else(|| {
            AuthError::TokenExchange("token response did not include an ID token".into())
        })?;

        let mut identity = self
            .validator
            .validate(id_token, &tokens.access_token, &cfg)
            .await?;

        // The ID token may omit profile claims depending on provider
        // configuration; fill the gaps from the userinfo endpoint. Claims
        // from the verified ID token always win.
        if (identity.email.is_none() || identity.preferred_username.is_none())
            && !cfg.endpoints.userinfo.is_empty()
        {
            let userinfo = self.fetch_userinfo(&cfg, &tokens.access_token).await?;
            if identity.email.is_none() {
                identity.email = userinfo
                    .get("email")
                    .and_then(|v| v.as_str())
                    .map(String::from);
            }
            if identity.preferred_username.is_none() {
                identity.preferred_username = userinfo
                    .get("preferred_username")
                    .and_then(|v| v.as_str())
                    .map(String::from);
            }
        }

        info!(sub = %identity.subject, "login completed");
        Ok(identity)
    }

    /// Build the provider-initiated logout URL:
    /// `logout_endpoint?post_logout_redirect_uri=<url>&client_id=<id>`.
    pub async fn provider_logout_url(
        &self,
        post_logout_redirect_uri: &str,
    ) -> Result<String, AuthError> {
        let cfg = self.settings.snapshot().await;
        if cfg.endpoints.logout.is_empty() {
            return Err(AuthError::Configuration(
                "logout endpoint is not configured".into(),
            ));
        }
        let mut url = Url::parse(&cfg.endpoints.logout)
            .map_err(|e| AuthError::Configuration(format!("invalid logout endpoint: {e}")))?;
        url.query_pairs_mut()
            .append_pair("post_logout_redirect_uri", post_logout_redirect_uri)
            .append_pair("client_id", &cfg.client_id);
        Ok(url.to_string())
    }

    /// Exchange the authorization code at the token endpoint using the
    /// confidential-client credentials. Failures are terminal for the
    /// attempt; the user must re-initiate.
    async fn exchange_code(
        &self,
        cfg: &IdpSettings,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenResponse, AuthError> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("client_id", cfg.client_id.as_str()),
        ];

        let response = self
            .http
            .post(&cfg.endpoints.token)
            .basic_auth(&cfg.client_id, Some(&cfg.client_secret))
            .form(&params)
            .send()
            .await
            .map_err(|e| AuthError::TokenExchange(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(%status, "token endpoint rejected the code exchange");
            return Err(AuthError::TokenExchange(format!(
                "token endpoint returned {status}: {body}"
            )));
        }

        response
            .json()
            .await
            .map_err(|e| AuthError::TokenExchange(format!("malformed token response: {e}")))
    }

    async fn fetch_userinfo(
        &self,
        cfg: &IdpSettings,
        access_token: &str,
    ) -> Result<serde_json::Value, AuthError> {
        let response = self
            .http
            .get(&cfg.endpoints.userinfo)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| AuthError::Userinfo(e.to_string()))?
            .error_for_status()
            .map_err(|e| AuthError::Userinfo(e.to_string()))?;

        response
            .json()
            .await
            .map_err(|e| AuthError::Userinfo(format!("malformed userinfo response: {e}")))
    }
}

/// Cryptographically random anti-forgery token: 32 bytes of OS entropy,
/// base64url-encoded.
fn generate_state_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
