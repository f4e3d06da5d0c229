//! Shared test harness: an in-process identity provider speaking just
//! enough of the Keycloak endpoint layout for the relying-party core.
//!
//! The provider serves `/realms/test/protocol/openid-connect/{certs,token,
//! userinfo}` on an ephemeral port, so the issuer URL feeds straight into
//! the endpoint derivation under test.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use rand::rngs::OsRng;
use rsa::pkcs8::EncodePrivateKey;
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use relier_oidc::settings::IdpSettings;

/// RSA signing key for minting test ID tokens, published via the mock JWKS.
pub struct TestKey {
    pub kid: String,
    encoding_key: EncodingKey,
    n: String,
    e: String,
}

impl TestKey {
    pub fn generate(kid: &str) -> Self {
        let private_key =
            RsaPrivateKey::new(&mut OsRng, 2048).expect("failed to generate RSA-2048 key");
        let public_key = RsaPublicKey::from(&private_key);

        let pkcs8_pem = private_key
            .to_pkcs8_pem(rsa::pkcs8::LineEnding::LF)
            .expect("failed to export RSA key as PKCS8 PEM");
        let encoding_key = EncodingKey::from_rsa_pem(pkcs8_pem.as_bytes())
            .expect("failed to create EncodingKey from RSA PEM");

        let n = URL_SAFE_NO_PAD.encode(public_key.n().to_bytes_be());
        let e = URL_SAFE_NO_PAD.encode(public_key.e().to_bytes_be());

        Self {
            kid: kid.to_string(),
            encoding_key,
            n,
            e,
        }
    }

    /// Sign claims as an RS256 JWT carrying this key's kid.
    pub fn sign(&self, claims: &serde_json::Value) -> String {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(self.kid.clone());
        encode(&header, claims, &self.encoding_key).expect("failed to sign test JWT")
    }

    pub fn jwk(&self) -> serde_json::Value {
        serde_json::json!({
            "kty": "RSA",
            "alg": "RS256",
            "use": "sig",
            "kid": self.kid,
            "n": self.n,
            "e": self.e,
        })
    }
}

struct IdpState {
    jwks: serde_json::Value,
    token_response: Mutex<Option<serde_json::Value>>,
    userinfo_response: Mutex<Option<serde_json::Value>>,
    token_hits: AtomicUsize,
}

/// In-process mock identity provider.
pub struct TestIdp {
    pub issuer: String,
    pub key: TestKey,
    state: Arc<IdpState>,
}

impl TestIdp {
    /// Generate a signing key and serve the provider on an ephemeral port.
    pub async fn spawn() -> Self {
        let key = TestKey::generate("test-key-1");
        Self::spawn_with_key(key).await
    }

    pub async fn spawn_with_key(key: TestKey) -> Self {
        let state = Arc::new(IdpState {
            jwks: serde_json::json!({ "keys": [key.jwk()] }),
            token_response: Mutex::new(None),
            userinfo_response: Mutex::new(None),
            token_hits: AtomicUsize::new(0),
        });

        let app = Router::new()
            .route(
                "/realms/test/protocol/openid-connect/certs",
                get(jwks_handler),
            )
            .route(
                "/realms/test/protocol/openid-connect/token",
                post(token_handler),
            )
            .route(
                "/realms/test/protocol/openid-connect/userinfo",
                get(userinfo_handler),
            )
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind mock IdP listener");
        let addr = listener.local_addr().expect("mock IdP has no local addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("mock IdP crashed");
        });

        Self {
            issuer: format!("http://{addr}/realms/test"),
            key,
            state,
        }
    }

    /// Set the response the token endpoint returns on the next exchanges.
    pub async fn set_token_response(&self, response: serde_json::Value) {
        *self.state.token_response.lock().await = Some(response);
    }

    pub async fn set_userinfo_response(&self, response: serde_json::Value) {
        *self.state.userinfo_response.lock().await = Some(response);
    }

    /// How many code exchanges the token endpoint has served.
    pub fn token_hits(&self) -> usize {
        self.state.token_hits.load(Ordering::SeqCst)
    }

    /// Relying-party settings pointing at this provider.
    pub fn settings(&self, client_id: &str, client_secret: &str) -> IdpSettings {
        IdpSettings::from_pairs(vec![
            ("OIDC_ENABLED", "true"),
            ("OIDC_ISSUER", self.issuer.as_str()),
            ("OIDC_CLIENT_ID", client_id),
            ("OIDC_CLIENT_SECRET", client_secret),
            ("OIDC_SCOPES", "openid email"),
            ("OIDC_SIGNING_ALGORITHMS", "RS256"),
        ])
        .expect("test settings must be valid")
    }
}

async fn jwks_handler(State(state): State<Arc<IdpState>>) -> Json<serde_json::Value> {
    Json(state.jwks.clone())
}

async fn token_handler(State(state): State<Arc<IdpState>>) -> impl IntoResponse {
    state.token_hits.fetch_add(1, Ordering::SeqCst);
    match state.token_response.lock().await.clone() {
        Some(response) => (StatusCode::OK, Json(response)),
        None => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "invalid_grant" })),
        ),
    }
}

async fn userinfo_handler(State(state): State<Arc<IdpState>>) -> impl IntoResponse {
    match state.userinfo_response.lock().await.clone() {
        Some(response) => (StatusCode::OK, Json(response)),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "no userinfo configured" })),
        ),
    }
}

pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock before epoch")
        .as_secs()
}

/// Baseline ID-token claims accepted by the validator for `settings`.
pub fn id_claims(issuer: &str, client_id: &str) -> serde_json::Value {
    let now = unix_now();
    serde_json::json!({
        "sub": "user-1",
        "iss": issuer,
        "aud": client_id,
        "iat": now,
        "exp": now + 3600,
        "email": "alice@example.com",
        "preferred_username": "alice",
    })
}

/// Independent at_hash computation (SHA-256 family): left half of the
/// digest, base64url without padding.
pub fn expected_at_hash(access_token: &str) -> String {
    let digest = Sha256::digest(access_token.as_bytes());
    URL_SAFE_NO_PAD.encode(&digest[..digest.len() / 2])
}
