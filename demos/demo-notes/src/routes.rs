use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::Form;
use axum_extra::extract::cookie::CookieJar;
use serde::Deserialize;

use relier_oidc::error::AuthError;
use relier_oidc::flow::CallbackParams;
use relier_oidc::mapper::ClaimsMapper;
use relier_oidc::settings::SettingsUpdate;

use crate::sessions::{clear_principal, current_principal, store_principal};
use crate::{AppState, BASE_URL};

pub async fn index(State(state): State<AppState>, jar: CookieJar) -> Response {
    let (jar, session) = state.sessions.attach(jar);
    let login_enabled = state.settings.snapshot().await.enabled;
    let body = match current_principal(&session) {
        Some(principal) => format!(
            "<h1>Notes</h1><p>Signed in as <b>{}</b> ({})</p>\
             <p><a href=\"/provider_logout\">Log out</a></p>",
            principal.username, principal.email
        ),
        None if login_enabled => {
            "<h1>Notes</h1><p><a href=\"/authorize\">Log in with OpenID Connect</a></p>"
                .to_string()
        }
        None => "<h1>Notes</h1><p>Login is currently disabled.</p>".to_string(),
    };
    (jar, Html(body)).into_response()
}

/// Start a login. Already-authenticated sessions are sent home untouched.
pub async fn authorize(State(state): State<AppState>, jar: CookieJar) -> Response {
    let (jar, session) = state.sessions.attach(jar);
    if current_principal(&session).is_some() {
        return (jar, Redirect::to("/")).into_response();
    }

    match state
        .flow
        .initiate(session.as_ref(), &format!("{BASE_URL}/callback"))
        .await
    {
        Ok(url) => (jar, Redirect::to(&url)).into_response(),
        Err(err) => (jar, auth_failure(err)).into_response(),
    }
}

pub async fn callback(
    State(state): State<AppState>,
    Query(params): Query<CallbackParams>,
    jar: CookieJar,
) -> Response {
    let (jar, session) = state.sessions.attach(jar);
    if current_principal(&session).is_some() {
        return (jar, Redirect::to("/")).into_response();
    }

    let identity = match state.flow.complete(session.as_ref(), params).await {
        Ok(identity) => identity,
        Err(err) => return (jar, auth_failure(err)).into_response(),
    };

    let auto_create = state.settings.snapshot().await.auto_create_users;
    let outcome = match ClaimsMapper::new()
        .with_auto_create(auto_create)
        .reconcile(&state.principals, &identity)
        .await
    {
        Ok(outcome) => outcome,
        Err(err) => return (jar, auth_failure(err)).into_response(),
    };

    for warning in &outcome.warnings {
        tracing::warn!(%warning, "role skipped during reconciliation");
    }

    store_principal(&session, &outcome.principal);
    (jar, Redirect::to("/login_success")).into_response()
}

/// Ask the provider to end its session, then come back to the local logout.
pub async fn provider_logout(State(state): State<AppState>, jar: CookieJar) -> Response {
    let (jar, _session) = state.sessions.attach(jar);
    match state
        .flow
        .provider_logout_url(&format!("{BASE_URL}/local_logout"))
        .await
    {
        Ok(url) => (jar, Redirect::to(&url)).into_response(),
        Err(err) => {
            tracing::warn!(error = %err, "provider logout unavailable, clearing locally");
            (jar, Redirect::to("/local_logout")).into_response()
        }
    }
}

pub async fn local_logout(State(state): State<AppState>, jar: CookieJar) -> Response {
    let (jar, session) = state.sessions.attach(jar);
    clear_principal(&session);
    (jar, Redirect::to("/logout_success")).into_response()
}

pub async fn login_success() -> Html<&'static str> {
    Html("<p>You are logged in!</p><p><a href=\"/\">Home</a></p>")
}

pub async fn login_failure() -> Html<&'static str> {
    Html("<p>Login has failed.</p><p><a href=\"/\">Home</a></p>")
}

pub async fn logout_success() -> Html<&'static str> {
    Html("<p>You have been logged out.</p><p><a href=\"/\">Home</a></p>")
}

/// Form fields of the settings editor, mirroring the administrative UI.
#[derive(Debug, Deserialize)]
pub struct SettingsForm {
    pub enabled: Option<String>,
    pub issuer: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub scopes: Option<String>,
    pub signing_algorithms: Option<String>,
}

pub async fn settings_page(State(state): State<AppState>, jar: CookieJar) -> Response {
    let (jar, session) = state.sessions.attach(jar);
    let Some(_admin) = elevated_principal(&session) else {
        return (jar, StatusCode::FORBIDDEN).into_response();
    };

    let cfg = state.settings.snapshot().await;
    let body = format!(
        "<h1>OpenID Connect settings</h1>\
         <form method=\"post\" action=\"/admin/oidc-settings\">\
         <label>Enabled <input name=\"enabled\" value=\"{}\"></label><br>\
         <label>Issuer <input name=\"issuer\" value=\"{}\"></label><br>\
         <label>Client id <input name=\"client_id\" value=\"{}\"></label><br>\
         <label>Client secret <input name=\"client_secret\" type=\"password\"></label><br>\
         <label>Scopes <input name=\"scopes\" value=\"{}\"></label><br>\
         <label>Signing algorithms <input name=\"signing_algorithms\" value=\"{}\"></label><br>\
         <button>Save</button></form>",
        cfg.enabled,
        cfg.issuer,
        cfg.client_id,
        cfg.scopes.join(" "),
        cfg.signing_algorithms
            .iter()
            .map(|alg| format!("{alg:?}"))
            .collect::<Vec<_>>()
            .join(" "),
    );
    (jar, Html(body)).into_response()
}

pub async fn settings_update(
    State(state): State<AppState>,
    jar: CookieJar,
    Form(form): Form<SettingsForm>,
) -> Response {
    let (jar, session) = state.sessions.attach(jar);
    let Some(admin) = elevated_principal(&session) else {
        return (jar, StatusCode::FORBIDDEN).into_response();
    };

    let patch = SettingsUpdate {
        enabled: form.enabled.as_deref().map(|v| matches!(v, "true" | "on" | "1")),
        issuer: non_empty(form.issuer),
        client_id: non_empty(form.client_id),
        // An empty secret field means "keep the current one".
        client_secret: non_empty(form.client_secret),
        scopes: form
            .scopes
            .map(|s| s.split_whitespace().map(String::from).collect()),
        signing_algorithms: form
            .signing_algorithms
            .map(|s| s.split_whitespace().map(String::from).collect()),
        ..Default::default()
    };

    match state.settings.update(patch).await {
        Ok(_) => {
            tracing::info!(admin = %admin.username, "provider settings changed");
            (jar, Redirect::to("/admin/oidc-settings")).into_response()
        }
        // The administrative caller is trusted with the full detail.
        Err(err) => (jar, (StatusCode::BAD_REQUEST, err.to_string())).into_response(),
    }
}

fn elevated_principal(
    session: &relier_oidc::session::MemorySession,
) -> Option<relier_oidc::mapper::LocalPrincipal> {
    current_principal(session).filter(|p| p.is_elevated)
}

/// Authentication-attempt failures show the user a generic page; detail
/// goes to the operator log only.
fn auth_failure(err: AuthError) -> Redirect {
    tracing::warn!(error = %err, "authentication attempt failed");
    Redirect::to("/login_failure")
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
