//! Claims-to-principal reconciliation.
//!
//! Maps a [`ValidatedIdentity`] onto the application's own user record:
//! look up (or create) the principal by email, then reconcile group
//! membership and the elevated-privilege flag against the roles carried in
//! the current login. Reconciliation is total, not additive: groups and
//! elevation are recomputed on every login so revoked provider roles do
//! not linger as stale local privilege.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{AuthError, UnknownRoleWarning};
use crate::validator::ValidatedIdentity;

/// Reference to a local group.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRef {
    pub id: String,
    pub name: String,
}

/// The application-side identity record.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LocalPrincipal {
    pub id: String,
    pub username: String,
    pub email: String,
    pub groups: Vec<GroupRef>,
    pub is_elevated: bool,
}

/// Storage boundary for principals and groups. The embedding application
/// owns persistence; the mapper only drives lookups and saves through it.
pub trait PrincipalStore: Send + Sync {
    fn find_by_email(
        &self,
        email: &str,
    ) -> impl Future<Output = Result<Option<LocalPrincipal>, AuthError>> + Send;

    /// Persist a new principal and return it with its assigned id.
    fn create(
        &self,
        principal: LocalPrincipal,
    ) -> impl Future<Output = Result<LocalPrincipal, AuthError>> + Send;

    fn save(
        &self,
        principal: &LocalPrincipal,
    ) -> impl Future<Output = Result<(), AuthError>> + Send;

    fn find_group_by_name(
        &self,
        name: &str,
    ) -> impl Future<Output = Result<Option<GroupRef>, AuthError>> + Send;
}

/// The result of a reconciliation: the saved principal plus any roles that
/// named no local group (non-fatal unless strict mode is on).
#[derive(Clone, Debug)]
pub struct ReconcileOutcome {
    pub principal: LocalPrincipal,
    pub warnings: Vec<UnknownRoleWarning>,
    /// Whether the principal was created by this login.
    pub created: bool,
}

/// Reconciles validated identities into local principals.
#[derive(Clone, Debug)]
pub struct ClaimsMapper {
    auto_create_users: bool,
    strict_roles: bool,
}

impl ClaimsMapper {
    pub fn new() -> Self {
        Self {
            auto_create_users: true,
            strict_roles: false,
        }
    }

    /// Whether a missing principal is created on first login (default) or
    /// rejected with [`AuthError::PrincipalNotFound`].
    pub fn with_auto_create(mut self, auto_create: bool) -> Self {
        self.auto_create_users = auto_create;
        self
    }

    /// Fail the login when a role names no local group, instead of
    /// reporting a warning and continuing. For deployments that prefer to
    /// fail closed.
    pub fn with_strict_roles(mut self, strict: bool) -> Self {
        self.strict_roles = strict;
        self
    }

    /// Look up or create the principal for `identity` and reconcile its
    /// group membership and elevation against the identity's roles.
    pub async fn reconcile<S: PrincipalStore>(
        &self,
        store: &S,
        identity: &ValidatedIdentity,
    ) -> Result<ReconcileOutcome, AuthError> {
        let email = identity.email.as_deref().ok_or_else(|| {
            AuthError::ClaimValidation(
                "validated identity carries no email to map to a principal".into(),
            )
        })?;

        let (mut principal, created) = match store.find_by_email(email).await? {
            Some(existing) => (existing, false),
            None if self.auto_create_users => {
                let username = identity
                    .preferred_username
                    .clone()
                    .unwrap_or_else(|| identity.subject.clone());
                let fresh = store
                    .create(LocalPrincipal {
                        id: String::new(),
                        username,
                        email: email.to_string(),
                        groups: Vec::new(),
                        is_elevated: false,
                    })
                    .await?;
                debug!(email, "created principal on first login");
                (fresh, true)
            }
            None => return Err(AuthError::PrincipalNotFound(email.to_string())),
        };

        let mut groups = Vec::new();
        let mut warnings = Vec::new();
        let mut elevated = false;

        for role in &identity.roles {
            match store.find_group_by_name(role).await? {
                Some(group) => groups.push(group),
                None if self.strict_roles => {
                    return Err(AuthError::UnknownRole(role.clone()));
                }
                None => {
                    warn!(%role, "role names no local group, skipping");
                    warnings.push(UnknownRoleWarning { role: role.clone() });
                }
            }
            if role.split('-').next_back() == Some("admin") {
                elevated = true;
            }
        }

        // Full reconciliation: membership and elevation mirror the roles of
        // this login exactly. Grants from previous logins do not accumulate.
        principal.groups = groups;
        principal.is_elevated = elevated;
        store.save(&principal).await?;

        debug!(
            email,
            groups = principal.groups.len(),
            elevated = principal.is_elevated,
            "principal reconciled"
        );

        Ok(ReconcileOutcome {
            principal,
            warnings,
            created,
        })
    }
}

impl Default for ClaimsMapper {
    fn default() -> Self {
        Self::new()
    }
}

/// In-memory principal store for demos and tests.
#[derive(Debug, Default)]
pub struct MemoryPrincipalStore {
    principals: Mutex<HashMap<String, LocalPrincipal>>,
    groups: Mutex<HashMap<String, GroupRef>>,
    next_id: AtomicU64,
}

impl MemoryPrincipalStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a local group.
    pub fn add_group(self, name: impl Into<String>) -> Self {
        let name = name.into();
        let id = format!("g{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.groups
            .lock()
            .expect("group map lock poisoned")
            .insert(name.clone(), GroupRef { id, name });
        self
    }

    /// Insert an existing principal (keyed by email).
    pub fn add_principal(self, principal: LocalPrincipal) -> Self {
        self.principals
            .lock()
            .expect("principal map lock poisoned")
            .insert(principal.email.clone(), principal);
        self
    }
}

impl PrincipalStore for MemoryPrincipalStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<LocalPrincipal>, AuthError> {
        Ok(self
            .principals
            .lock()
            .expect("principal map lock poisoned")
            .get(email)
            .cloned())
    }

    async fn create(&self, mut principal: LocalPrincipal) -> Result<LocalPrincipal, AuthError> {
        principal.id = format!("u{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.principals
            .lock()
            .expect("principal map lock poisoned")
            .insert(principal.email.clone(), principal.clone());
        Ok(principal)
    }

    async fn save(&self, principal: &LocalPrincipal) -> Result<(), AuthError> {
        self.principals
            .lock()
            .expect("principal map lock poisoned")
            .insert(principal.email.clone(), principal.clone());
        Ok(())
    }

    async fn find_group_by_name(&self, name: &str) -> Result<Option<GroupRef>, AuthError> {
        Ok(self
            .groups
            .lock()
            .expect("group map lock poisoned")
            .get(name)
            .cloned())
    }
}
