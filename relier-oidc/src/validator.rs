//! ID token validation.
//!
//! Implements the relying-party side of OpenID Connect ID token
//! verification: signing-key selection from the provider's JWKS, signature
//! verification under an explicit algorithm allow-list, standard claim
//! checks (iss, aud, exp, iat), and binding of the companion access token
//! through the `at_hash` claim. Only this module constructs
//! [`ValidatedIdentity`] values.

use std::time::{SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha384, Sha512};
use tracing::{debug, warn};

use crate::error::AuthError;
use crate::jwks::JwksCache;
use crate::roles::{default_role_extractor, RoleExtractor};
use crate::settings::IdpSettings;

/// Clock skew tolerated when checking that `iat` is not in the future.
const IAT_LEEWAY_SECS: u64 = 300;

/// The outcome of successful ID-token validation.
///
/// Only produced after signature, standard-claim, and access-token-binding
/// verification all succeed.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ValidatedIdentity {
    pub subject: String,
    pub issuer: String,
    pub audience: String,
    /// Expiry of the ID token, seconds since the Unix epoch.
    pub expires_at: u64,
    pub email: Option<String>,
    pub preferred_username: Option<String>,
    pub roles: Vec<String>,
}

/// Validates provider-issued ID tokens against the current settings
/// snapshot.
///
/// The validator is long-lived and holds the JWKS cache; the settings are
/// passed per call so a live settings update takes effect on the next
/// validation without rebuilding anything.
pub struct IdTokenValidator {
    jwks: JwksCache,
    role_extractor: Box<dyn RoleExtractor>,
    require_at_hash: bool,
}

impl IdTokenValidator {
    pub fn new() -> Self {
        Self {
            jwks: JwksCache::new(),
            role_extractor: Box::new(default_role_extractor()),
            require_at_hash: false,
        }
    }

    /// Replace the role extractor (default: top-level `roles`, then
    /// Keycloak realm roles).
    pub fn with_role_extractor(mut self, extractor: impl RoleExtractor + 'static) -> Self {
        self.role_extractor = Box::new(extractor);
        self
    }

    /// Treat a missing `at_hash` claim as a hard failure. Enable this for
    /// providers known to emit the claim on the authorization-code flow.
    pub fn require_at_hash(mut self, require: bool) -> Self {
        self.require_at_hash = require;
        self
    }

    pub fn with_jwks_cache(mut self, cache: JwksCache) -> Self {
        self.jwks = cache;
        self
    }

    /// Validate `id_token`, binding `access_token` to it, and build the
    /// resulting identity.
    ///
    /// Every verification failure is terminal for the authentication
    /// attempt; there are no retries at this level.
    pub async fn validate(
        &self,
        id_token: &str,
        access_token: &str,
        settings: &IdpSettings,
    ) -> Result<ValidatedIdentity, AuthError> {
        // Structural decode of the header only: nothing read here is
        // trusted until the signature check below passes.
        let header = decode_header(id_token)
            .map_err(|e| AuthError::ClaimValidation(format!("malformed ID token header: {e}")))?;

        if settings.signing_algorithms.is_empty() {
            return Err(AuthError::Configuration(
                "no signing algorithms configured".into(),
            ));
        }

        // The header's algorithm tag is attacker-controlled; only proceed
        // when it is in the configured allow-list.
        if !settings.signing_algorithms.contains(&header.alg) {
            warn!(alg = ?header.alg, "rejected ID token with disallowed algorithm");
            return Err(AuthError::ClaimValidation(format!(
                "token algorithm {:?} is not allowed",
                header.alg
            )));
        }

        let decoding_key = self.decoding_key_for(&header, settings).await?;

        let mut validation = Validation::new(header.alg);
        validation.algorithms = settings.signing_algorithms.clone();
        validation.set_issuer(&[&settings.issuer]);
        validation.set_audience(&[&settings.client_id]);
        validation.validate_exp = true;
        validation.validate_nbf = false;

        let token_data =
            decode::<serde_json::Value>(id_token, &decoding_key, &validation).map_err(|e| {
                let err = match e.kind() {
                    jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                        AuthError::ClaimValidation("token expired".into())
                    }
                    jsonwebtoken::errors::ErrorKind::InvalidIssuer => {
                        AuthError::ClaimValidation("issuer mismatch".into())
                    }
                    jsonwebtoken::errors::ErrorKind::InvalidAudience => {
                        AuthError::ClaimValidation("audience mismatch".into())
                    }
                    jsonwebtoken::errors::ErrorKind::InvalidSignature => {
                        AuthError::ClaimValidation("signature verification failed".into())
                    }
                    _ => AuthError::ClaimValidation(e.to_string()),
                };
                warn!(error = %err, "ID token rejected");
                err
            })?;
        let claims = token_data.claims;

        self.check_iat(&claims)?;
        let at_hash_verified = self.check_at_hash(&claims, access_token, header.alg)?;

        let mut roles = self.role_extractor.extract_roles(&claims);
        if roles.is_empty() && at_hash_verified {
            // Some providers carry roles only in the access token. Reading
            // its payload without a second signature check is acceptable
            // here solely because the at_hash check above already bound
            // this exact access token to the verified ID token. Opaque
            // (non-JWT) access tokens simply contribute no roles.
            if let Ok(payload) = decode_unverified_payload(access_token) {
                roles = self.role_extractor.extract_roles(&payload);
            }
        }

        let subject = require_str(&claims, "sub")?.to_string();
        let issuer = require_str(&claims, "iss")?.to_string();
        let expires_at = claims
            .get("exp")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| AuthError::ClaimValidation("missing 'exp' claim".into()))?;
        let email = claims
            .get("email")
            .and_then(|v| v.as_str())
            .map(String::from);
        let preferred_username = claims
            .get("preferred_username")
            .and_then(|v| v.as_str())
            .map(String::from);

        debug!(sub = %subject, roles = roles.len(), "ID token validated");

        Ok(ValidatedIdentity {
            subject,
            issuer,
            audience: settings.client_id.clone(),
            expires_at,
            email,
            preferred_username,
            roles,
        })
    }

    /// Select the verification key for the token header.
    ///
    /// HMAC algorithms verify against the shared client secret; asymmetric
    /// algorithms resolve the header's `kid` through the provider's JWKS.
    async fn decoding_key_for(
        &self,
        header: &jsonwebtoken::Header,
        settings: &IdpSettings,
    ) -> Result<DecodingKey, AuthError> {
        match header.alg {
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => {
                Ok(DecodingKey::from_secret(settings.client_secret.as_bytes()))
            }
            _ => {
                let kid = header.kid.as_deref().ok_or_else(|| {
                    AuthError::SigningKeyNotFound("ID token header missing 'kid'".into())
                })?;
                self.jwks.get_key(&settings.endpoints.jwks, kid).await
            }
        }
    }

    fn check_iat(&self, claims: &serde_json::Value) -> Result<(), AuthError> {
        let iat = claims
            .get("iat")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| AuthError::ClaimValidation("missing 'iat' claim".into()))?;
        let now = unix_now()?;
        if iat > now + IAT_LEEWAY_SECS {
            return Err(AuthError::ClaimValidation("'iat' is in the future".into()));
        }
        Ok(())
    }

    /// Returns whether the access token was actually bound via `at_hash`.
    fn check_at_hash(
        &self,
        claims: &serde_json::Value,
        access_token: &str,
        alg: Algorithm,
    ) -> Result<bool, AuthError> {
        match claims.get("at_hash").and_then(|v| v.as_str()) {
            Some(expected) => {
                let computed = at_hash(access_token, alg)?;
                if computed != expected {
                    warn!("at_hash does not match the returned access token");
                    return Err(AuthError::AccessTokenBinding(
                        "at_hash does not match the access token".into(),
                    ));
                }
                Ok(true)
            }
            None if self.require_at_hash => Err(AuthError::AccessTokenBinding(
                "at_hash claim is absent but required".into(),
            )),
            None => Ok(false),
        }
    }
}

impl Default for IdTokenValidator {
    fn default() -> Self {
        Self::new()
    }
}

fn require_str<'a>(claims: &'a serde_json::Value, name: &str) -> Result<&'a str, AuthError> {
    claims
        .get(name)
        .and_then(|v| v.as_str())
        .ok_or_else(|| AuthError::ClaimValidation(format!("missing '{name}' claim")))
}

pub(crate) fn unix_now() -> Result<u64, AuthError> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .map_err(|e| AuthError::ClaimValidation(format!("system clock error: {e}")))
}

/// Compute the expected `at_hash`: base64url of the left half of the
/// access token hashed with the hash function of the token's signing
/// algorithm.
pub fn at_hash(access_token: &str, alg: Algorithm) -> Result<String, AuthError> {
    let digest: Vec<u8> = match alg {
        Algorithm::HS256 | Algorithm::RS256 | Algorithm::ES256 | Algorithm::PS256 => {
            Sha256::digest(access_token.as_bytes()).to_vec()
        }
        Algorithm::HS384 | Algorithm::RS384 | Algorithm::ES384 | Algorithm::PS384 => {
            Sha384::digest(access_token.as_bytes()).to_vec()
        }
        Algorithm::HS512 | Algorithm::RS512 | Algorithm::PS512 => {
            Sha512::digest(access_token.as_bytes()).to_vec()
        }
        other => {
            return Err(AuthError::ClaimValidation(format!(
                "no at_hash digest defined for {other:?}"
            )))
        }
    };
    Ok(URL_SAFE_NO_PAD.encode(&digest[..digest.len() / 2]))
}

/// Structural decode of a JWT payload segment: base64url + JSON, no
/// signature verification whatsoever. Callers must not trust the result
/// unless the token was independently bound to verified material.
pub fn decode_unverified_payload(token: &str) -> Result<serde_json::Value, AuthError> {
    let segment = token
        .split('.')
        .nth(1)
        .ok_or_else(|| AuthError::ClaimValidation("token is not in JWT format".into()))?;
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| AuthError::ClaimValidation(format!("undecodable token payload: {e}")))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| AuthError::ClaimValidation(format!("token payload is not JSON: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn at_hash_is_deterministic_and_half_length() {
        let a = at_hash("some-access-token", Algorithm::RS256).unwrap();
        let b = at_hash("some-access-token", Algorithm::RS256).unwrap();
        assert_eq!(a, b);
        // SHA-256 left half = 16 bytes = 22 base64url chars without padding.
        assert_eq!(a.len(), 22);
    }

    #[test]
    fn at_hash_depends_on_the_algorithm_family() {
        let sha256 = at_hash("token", Algorithm::RS256).unwrap();
        let sha384 = at_hash("token", Algorithm::RS384).unwrap();
        let sha512 = at_hash("token", Algorithm::RS512).unwrap();
        assert_ne!(sha256, sha384);
        assert_ne!(sha384, sha512);
        // SHA-384 left half = 24 bytes = 32 chars; SHA-512 = 32 bytes = 43 chars.
        assert_eq!(sha384.len(), 32);
        assert_eq!(sha512.len(), 43);
    }

    #[test]
    fn at_hash_matches_between_hmac_and_rsa_of_same_width() {
        assert_eq!(
            at_hash("token", Algorithm::HS256).unwrap(),
            at_hash("token", Algorithm::RS256).unwrap()
        );
    }

    #[test]
    fn unverified_decode_reads_the_payload_segment() {
        let payload = URL_SAFE_NO_PAD.encode(br#"{"realm_access":{"roles":["viewer"]}}"#);
        let token = format!("eyJhbGciOiJSUzI1NiJ9.{payload}.c2ln");
        let value = decode_unverified_payload(&token).unwrap();
        assert_eq!(value["realm_access"]["roles"][0], "viewer");
    }

    #[test]
    fn unverified_decode_rejects_non_jwt_input() {
        assert!(decode_unverified_payload("opaque-token").is_err());
    }
}
