/// Errors raised by the relying-party authentication core.
///
/// Operator-facing detail lives in the variant payloads and in `Display`.
/// End users only ever see [`AuthError::public_message`] — validation
/// detail must not leak into HTTP bodies shown to the browser.
#[derive(Debug)]
pub enum AuthError {
    /// Missing or invalid provider settings. Fatal to the operation, not the process.
    Configuration(String),

    /// A settings update could not be durably saved. The previous
    /// configuration stays in effect.
    Persistence(String),

    /// The provider returned an `error` parameter on the callback
    /// (e.g. `access_denied`).
    ProviderDenied {
        error: String,
        description: Option<String>,
    },

    /// The callback did not match the pending authorization attempt
    /// (missing/stale attempt, `state` mismatch, or missing `code`).
    InvalidCallback(String),

    /// The authorization code could not be exchanged for tokens.
    TokenExchange(String),

    /// The JWKS document could not be fetched or parsed.
    JwksFetch(String),

    /// No key in the JWKS matches the token's key identifier.
    SigningKeyNotFound(String),

    /// Signature or standard-claim verification failed (alg, iss, aud, exp, iat).
    ClaimValidation(String),

    /// The `at_hash` claim does not bind the access token to the ID token.
    AccessTokenBinding(String),

    /// The userinfo document could not be fetched or parsed.
    Userinfo(String),

    /// No local principal exists for the validated identity and automatic
    /// creation is disabled.
    PrincipalNotFound(String),

    /// A role claim named no local group while strict role mapping is on.
    UnknownRole(String),
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::Configuration(msg) => write!(f, "configuration error: {msg}"),
            AuthError::Persistence(msg) => write!(f, "settings persistence failed: {msg}"),
            AuthError::ProviderDenied { error, description } => match description {
                Some(desc) => write!(f, "provider denied the request: {error}: {desc}"),
                None => write!(f, "provider denied the request: {error}"),
            },
            AuthError::InvalidCallback(msg) => write!(f, "invalid callback: {msg}"),
            AuthError::TokenExchange(msg) => write!(f, "token exchange failed: {msg}"),
            AuthError::JwksFetch(msg) => write!(f, "JWKS fetch failed: {msg}"),
            AuthError::SigningKeyNotFound(kid) => write!(f, "unknown signing key: {kid}"),
            AuthError::ClaimValidation(msg) => write!(f, "token validation failed: {msg}"),
            AuthError::AccessTokenBinding(msg) => {
                write!(f, "access token binding failed: {msg}")
            }
            AuthError::Userinfo(msg) => write!(f, "userinfo fetch failed: {msg}"),
            AuthError::PrincipalNotFound(email) => {
                write!(f, "no local principal for {email} and auto-creation is disabled")
            }
            AuthError::UnknownRole(role) => write!(f, "role '{role}' names no local group"),
        }
    }
}

impl std::error::Error for AuthError {}

impl AuthError {
    /// The generic message safe to show to an end user.
    ///
    /// Configuration and persistence errors are only ever surfaced to
    /// administrative callers, which are trusted with the full `Display`
    /// output instead.
    pub fn public_message(&self) -> &'static str {
        "Authentication failed"
    }

    /// Whether this error terminates a single authentication attempt
    /// (as opposed to an administrative settings operation).
    pub fn is_attempt_error(&self) -> bool {
        !matches!(self, AuthError::Configuration(_) | AuthError::Persistence(_))
    }
}

/// Non-fatal report produced when a role claim names no local group.
///
/// Login still succeeds without that group assignment; the warning is
/// surfaced to the caller and logged for operators.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnknownRoleWarning {
    pub role: String,
}

impl std::fmt::Display for UnknownRoleWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "role '{}' names no local group, skipped", self.role)
    }
}
