//! Cookie-keyed in-process sessions.

use std::sync::Arc;

use axum_extra::extract::cookie::{Cookie, CookieJar};
use dashmap::DashMap;
use uuid::Uuid;

use relier_oidc::mapper::LocalPrincipal;
use relier_oidc::session::{MemorySession, SessionStore};

const SESSION_COOKIE: &str = "relier_session";
const PRINCIPAL_KEY: &str = "principal";

/// Maps the session cookie to its in-process session values.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<MemorySession>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve the request's session, creating a new one (and setting the
    /// cookie) when the browser has none yet.
    pub fn attach(&self, jar: CookieJar) -> (CookieJar, Arc<MemorySession>) {
        if let Some(cookie) = jar.get(SESSION_COOKIE) {
            if let Some(session) = self.sessions.get(cookie.value()) {
                return (jar, session.clone());
            }
        }

        let id = Uuid::new_v4().to_string();
        let session = Arc::new(MemorySession::new());
        self.sessions.insert(id.clone(), session.clone());

        let cookie = Cookie::build((SESSION_COOKIE, id))
            .path("/")
            .http_only(true)
            .build();
        (jar.add(cookie), session)
    }
}

pub fn current_principal(session: &MemorySession) -> Option<LocalPrincipal> {
    session
        .get(PRINCIPAL_KEY)
        .and_then(|raw| serde_json::from_str(&raw).ok())
}

pub fn store_principal(session: &MemorySession, principal: &LocalPrincipal) {
    let raw = serde_json::to_string(principal).expect("principal serialization cannot fail");
    session.set(PRINCIPAL_KEY, raw);
}

pub fn clear_principal(session: &MemorySession) {
    session.remove(PRINCIPAL_KEY);
}
