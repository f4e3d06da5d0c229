mod common;

use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde_json::json;

use common::{expected_at_hash, id_claims, unix_now, TestIdp, TestKey};
use relier_oidc::error::AuthError;
use relier_oidc::validator::IdTokenValidator;

const CLIENT_ID: &str = "notes-app";
const CLIENT_SECRET: &str = "s3cr3t";

#[tokio::test]
async fn accepts_a_well_formed_token_and_extracts_roles() {
    let idp = TestIdp::spawn().await;
    let settings = idp.settings(CLIENT_ID, CLIENT_SECRET);

    let access_token = "the-access-token";
    let mut claims = id_claims(&idp.issuer, CLIENT_ID);
    claims["at_hash"] = json!(expected_at_hash(access_token));
    claims["realm_access"] = json!({ "roles": ["team-admin", "viewer"] });
    let id_token = idp.key.sign(&claims);

    let identity = IdTokenValidator::new()
        .validate(&id_token, access_token, &settings)
        .await
        .unwrap();

    assert_eq!(identity.subject, "user-1");
    assert_eq!(identity.issuer, idp.issuer);
    assert_eq!(identity.audience, CLIENT_ID);
    assert_eq!(identity.email.as_deref(), Some("alice@example.com"));
    assert_eq!(identity.preferred_username.as_deref(), Some("alice"));
    assert_eq!(identity.roles, vec!["team-admin", "viewer"]);
    assert!(identity.expires_at > unix_now());
}

#[tokio::test]
async fn rejects_a_token_signed_with_a_key_not_in_the_jwks() {
    let idp = TestIdp::spawn().await;
    let settings = idp.settings(CLIENT_ID, CLIENT_SECRET);

    // Signed with a key the provider never published.
    let rogue = TestKey::generate("rogue-key");
    let id_token = rogue.sign(&id_claims(&idp.issuer, CLIENT_ID));

    let err = IdTokenValidator::new()
        .validate(&id_token, "access", &settings)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::SigningKeyNotFound(_)), "got {err}");
}

#[tokio::test]
async fn rejects_a_token_whose_algorithm_is_not_allowed() {
    let idp = TestIdp::spawn().await;
    // Settings allow RS256 only; the token claims HS256.
    let settings = idp.settings(CLIENT_ID, CLIENT_SECRET);

    let id_token = encode(
        &Header::new(Algorithm::HS256),
        &id_claims(&idp.issuer, CLIENT_ID),
        &EncodingKey::from_secret(CLIENT_SECRET.as_bytes()),
    )
    .unwrap();

    let err = IdTokenValidator::new()
        .validate(&id_token, "access", &settings)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::ClaimValidation(_)), "got {err}");
}

#[tokio::test]
async fn rejects_an_issuer_mismatch() {
    let idp = TestIdp::spawn().await;
    let settings = idp.settings(CLIENT_ID, CLIENT_SECRET);

    let id_token = idp
        .key
        .sign(&id_claims("https://evil.example.org/realms/test", CLIENT_ID));

    let err = IdTokenValidator::new()
        .validate(&id_token, "access", &settings)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::ClaimValidation(_)), "got {err}");
}

#[tokio::test]
async fn rejects_an_audience_that_does_not_contain_the_client() {
    let idp = TestIdp::spawn().await;
    let settings = idp.settings(CLIENT_ID, CLIENT_SECRET);

    let id_token = idp.key.sign(&id_claims(&idp.issuer, "some-other-client"));

    let err = IdTokenValidator::new()
        .validate(&id_token, "access", &settings)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::ClaimValidation(_)), "got {err}");
}

#[tokio::test]
async fn rejects_an_expired_token() {
    let idp = TestIdp::spawn().await;
    let settings = idp.settings(CLIENT_ID, CLIENT_SECRET);

    let mut claims = id_claims(&idp.issuer, CLIENT_ID);
    let now = unix_now();
    claims["iat"] = json!(now - 7200);
    claims["exp"] = json!(now - 3600);
    let id_token = idp.key.sign(&claims);

    let err = IdTokenValidator::new()
        .validate(&id_token, "access", &settings)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::ClaimValidation(_)), "got {err}");
}

#[tokio::test]
async fn rejects_an_at_hash_that_does_not_match_the_access_token() {
    let idp = TestIdp::spawn().await;
    let settings = idp.settings(CLIENT_ID, CLIENT_SECRET);

    let mut claims = id_claims(&idp.issuer, CLIENT_ID);
    claims["at_hash"] = json!(expected_at_hash("the-token-that-was-promised"));
    let id_token = idp.key.sign(&claims);

    let err = IdTokenValidator::new()
        .validate(&id_token, "a-different-token", &settings)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::AccessTokenBinding(_)), "got {err}");
}

#[tokio::test]
async fn missing_at_hash_fails_only_when_required() {
    let idp = TestIdp::spawn().await;
    let settings = idp.settings(CLIENT_ID, CLIENT_SECRET);
    let id_token = idp.key.sign(&id_claims(&idp.issuer, CLIENT_ID));

    // Tolerated by default: some providers omit the claim.
    IdTokenValidator::new()
        .validate(&id_token, "access", &settings)
        .await
        .unwrap();

    // Fatal when the provider is known to emit it.
    let err = IdTokenValidator::new()
        .require_at_hash(true)
        .validate(&id_token, "access", &settings)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::AccessTokenBinding(_)), "got {err}");
}

#[tokio::test]
async fn roles_fall_back_to_the_bound_access_token() {
    let idp = TestIdp::spawn().await;
    let settings = idp.settings(CLIENT_ID, CLIENT_SECRET);

    // Roles live only in the access token, itself a JWT.
    let mut access_claims = id_claims(&idp.issuer, CLIENT_ID);
    access_claims["realm_access"] = json!({ "roles": ["viewer"] });
    let access_token = idp.key.sign(&access_claims);

    let mut claims = id_claims(&idp.issuer, CLIENT_ID);
    claims["at_hash"] = json!(expected_at_hash(&access_token));
    let id_token = idp.key.sign(&claims);

    let identity = IdTokenValidator::new()
        .validate(&id_token, &access_token, &settings)
        .await
        .unwrap();
    assert_eq!(identity.roles, vec!["viewer"]);
}

#[tokio::test]
async fn access_token_roles_are_ignored_without_the_at_hash_binding() {
    let idp = TestIdp::spawn().await;
    let settings = idp.settings(CLIENT_ID, CLIENT_SECRET);

    let mut access_claims = id_claims(&idp.issuer, CLIENT_ID);
    access_claims["realm_access"] = json!({ "roles": ["team-admin"] });
    let access_token = idp.key.sign(&access_claims);

    // No at_hash claim: the access token was never bound, so nothing in
    // it may influence authorization.
    let id_token = idp.key.sign(&id_claims(&idp.issuer, CLIENT_ID));

    let identity = IdTokenValidator::new()
        .validate(&id_token, &access_token, &settings)
        .await
        .unwrap();
    assert!(identity.roles.is_empty());
}

#[tokio::test]
async fn hmac_tokens_verify_against_the_client_secret_when_allowed() {
    let idp = TestIdp::spawn().await;
    let mut settings = idp.settings(CLIENT_ID, CLIENT_SECRET);
    settings.signing_algorithms = vec![Algorithm::HS256];

    let access_token = "hmac-access-token";
    let mut claims = id_claims(&idp.issuer, CLIENT_ID);
    claims["at_hash"] = json!(expected_at_hash(access_token));
    let id_token = encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(CLIENT_SECRET.as_bytes()),
    )
    .unwrap();

    let identity = IdTokenValidator::new()
        .validate(&id_token, access_token, &settings)
        .await
        .unwrap();
    assert_eq!(identity.subject, "user-1");

    // The same token is rejected when the secret differs.
    settings.client_secret = "rotated".into();
    let err = IdTokenValidator::new()
        .validate(&id_token, access_token, &settings)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::ClaimValidation(_)), "got {err}");
}

#[tokio::test]
async fn iat_from_the_future_is_rejected() {
    let idp = TestIdp::spawn().await;
    let settings = idp.settings(CLIENT_ID, CLIENT_SECRET);

    let mut claims = id_claims(&idp.issuer, CLIENT_ID);
    claims["iat"] = json!(unix_now() + 3600);
    let id_token = idp.key.sign(&claims);

    let err = IdTokenValidator::new()
        .validate(&id_token, "access", &settings)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::ClaimValidation(_)), "got {err}");
}
