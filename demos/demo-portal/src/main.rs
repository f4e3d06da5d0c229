//! Portal demo: the smallest useful embedding of the relying-party core.
//!
//! Settings come from `OIDC_*` environment variables only, principals live
//! in memory, and the whole application fits in one file.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::Router;
use axum_extra::extract::cookie::{Cookie, CookieJar};
use dashmap::DashMap;
use uuid::Uuid;

use relier_oidc::flow::{AuthorizationFlow, CallbackParams};
use relier_oidc::mapper::{ClaimsMapper, MemoryPrincipalStore};
use relier_oidc::session::{MemorySession, SessionStore};
use relier_oidc::settings::{IdpSettings, LiveSettings};
use relier_oidc::store::InMemorySettingsStore;
use relier_oidc::validator::IdTokenValidator;

const LISTEN_ADDR: &str = "0.0.0.0:8000";
const BASE_URL: &str = "http://localhost:8000";

const SESSION_COOKIE: &str = "portal_session";
const EMAIL_KEY: &str = "email";

#[derive(Clone)]
struct Portal {
    flow: Arc<AuthorizationFlow>,
    principals: Arc<MemoryPrincipalStore>,
    sessions: Arc<DashMap<String, Arc<MemorySession>>>,
}

impl Portal {
    fn attach(&self, jar: CookieJar) -> (CookieJar, Arc<MemorySession>) {
        if let Some(cookie) = jar.get(SESSION_COOKIE) {
            if let Some(session) = self.sessions.get(cookie.value()) {
                return (jar, session.clone());
            }
        }
        let id = Uuid::new_v4().to_string();
        let session = Arc::new(MemorySession::new());
        self.sessions.insert(id.clone(), session.clone());
        let cookie = Cookie::build((SESSION_COOKIE, id)).path("/").http_only(true).build();
        (jar.add(cookie), session)
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let settings = Arc::new(LiveSettings::new(
        IdpSettings::from_env().expect("invalid OIDC_* environment"),
        InMemorySettingsStore::new(),
    ));
    let flow = Arc::new(AuthorizationFlow::new(
        settings,
        IdTokenValidator::new(),
    ));

    let portal = Portal {
        flow,
        principals: Arc::new(MemoryPrincipalStore::new().add_group("staff")),
        sessions: Arc::new(DashMap::new()),
    };

    let app = Router::new()
        .route("/", get(menu))
        .route("/login", get(login))
        .route("/callback", get(callback))
        .route("/provider_logout", get(provider_logout))
        .route("/local_logout", get(local_logout))
        .with_state(portal);

    let listener = tokio::net::TcpListener::bind(LISTEN_ADDR)
        .await
        .expect("failed to bind");
    tracing::info!(addr = LISTEN_ADDR, "demo-portal listening");
    axum::serve(listener, app).await.expect("server error");
}

async fn menu(State(portal): State<Portal>, jar: CookieJar) -> Response {
    let (jar, session) = portal.attach(jar);
    let body = match session.get(EMAIL_KEY) {
        Some(email) => format!(
            "<p>Logged in as {email}</p><p><a href=\"/provider_logout\">Log out</a></p>"
        ),
        None => "<p><a href=\"/login\">Log in</a></p>".to_string(),
    };
    (jar, Html(body)).into_response()
}

async fn login(State(portal): State<Portal>, jar: CookieJar) -> Response {
    let (jar, session) = portal.attach(jar);
    if session.get(EMAIL_KEY).is_some() {
        return (jar, Redirect::to("/")).into_response();
    }
    match portal
        .flow
        .initiate(session.as_ref(), &format!("{BASE_URL}/callback"))
        .await
    {
        Ok(url) => (jar, Redirect::to(&url)).into_response(),
        Err(err) => {
            tracing::warn!(error = %err, "cannot start login");
            (jar, Html(err.public_message().to_string())).into_response()
        }
    }
}

async fn callback(
    State(portal): State<Portal>,
    Query(params): Query<CallbackParams>,
    jar: CookieJar,
) -> Response {
    let (jar, session) = portal.attach(jar);

    let result = async {
        let identity = portal.flow.complete(session.as_ref(), params).await?;
        ClaimsMapper::new()
            .reconcile(portal.principals.as_ref(), &identity)
            .await
    }
    .await;

    match result {
        Ok(outcome) => {
            session.set(EMAIL_KEY, outcome.principal.email.clone());
            (jar, Redirect::to("/")).into_response()
        }
        Err(err) => {
            tracing::warn!(error = %err, "login failed");
            (jar, Html(err.public_message().to_string())).into_response()
        }
    }
}

async fn provider_logout(State(portal): State<Portal>, jar: CookieJar) -> Response {
    let (jar, _session) = portal.attach(jar);
    match portal
        .flow
        .provider_logout_url(&format!("{BASE_URL}/local_logout"))
        .await
    {
        Ok(url) => (jar, Redirect::to(&url)).into_response(),
        Err(err) => {
            tracing::warn!(error = %err, "provider logout unavailable");
            (jar, Redirect::to("/local_logout")).into_response()
        }
    }
}

async fn local_logout(State(portal): State<Portal>, jar: CookieJar) -> Response {
    let (jar, session) = portal.attach(jar);
    session.remove(EMAIL_KEY);
    (jar, Redirect::to("/")).into_response()
}
