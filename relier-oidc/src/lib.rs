//! OpenID Connect relying-party core for Relier.
//!
//! Drives the OAuth2/OIDC authorization-code flow against a configurable
//! identity provider, validates the returned ID token (JWKS signature,
//! standard claims, `at_hash` access-token binding), and reconciles the
//! verified claims into a local principal with group membership and an
//! elevated-privilege flag. Provider connection parameters are
//! runtime-mutable: [`LiveSettings`] publishes atomic configuration
//! snapshots, so administrators can repoint the issuer or individual
//! endpoints without a restart and every in-flight login immediately sees
//! the new values.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use relier_oidc::prelude::*;
//!
//! let settings = Arc::new(LiveSettings::bootstrap(
//!     EnvFileSettingsStore::new(".oidc-settings"),
//! ).await?);
//! let flow = AuthorizationFlow::new(settings.clone(), IdTokenValidator::new());
//!
//! // Login route: redirect the browser to the provider.
//! let redirect = flow.initiate(&session, "https://app.example.com/callback").await?;
//!
//! // Callback route: validate and map into a local principal.
//! let identity = flow.complete(&session, callback_params).await?;
//! let outcome = ClaimsMapper::new()
//!     .reconcile(&principal_store, &identity)
//!     .await?;
//! ```

pub mod endpoints;
pub mod error;
pub mod flow;
pub mod jwks;
pub mod mapper;
pub mod roles;
pub mod session;
pub mod settings;
pub mod store;
pub mod validator;

// Re-export primary public types for convenience.
pub use endpoints::{EndpointOverrides, ProviderEndpoints};
pub use error::{AuthError, UnknownRoleWarning};
pub use flow::{AuthorizationAttempt, AuthorizationFlow, CallbackParams};
pub use jwks::JwksCache;
pub use mapper::{
    ClaimsMapper, GroupRef, LocalPrincipal, MemoryPrincipalStore, PrincipalStore,
    ReconcileOutcome,
};
pub use session::{MemorySession, SessionStore};
pub use settings::{IdpSettings, LiveSettings, SettingsUpdate};
pub use store::{EnvFileSettingsStore, InMemorySettingsStore, SettingsStore};
pub use validator::{IdTokenValidator, ValidatedIdentity};

// Re-export the role extraction trait at crate root for convenience.
pub use roles::RoleExtractor;

pub mod prelude {
    //! Re-exports of the most commonly used relying-party types.
    pub use crate::{
        AuthError, AuthorizationFlow, CallbackParams, ClaimsMapper, EnvFileSettingsStore,
        IdTokenValidator, IdpSettings, LiveSettings, SettingsUpdate, ValidatedIdentity,
    };
}
