//! Notes demo: a small axum application with OpenID Connect login.
//!
//! Principals live in SQLite, provider settings are hot-editable through
//! `/admin/oidc-settings` (elevated principals only) and persist to a flat
//! settings file so they survive restarts.

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use sqlx::SqlitePool;

use relier_oidc::flow::AuthorizationFlow;
use relier_oidc::settings::LiveSettings;
use relier_oidc::store::EnvFileSettingsStore;
use relier_oidc::validator::IdTokenValidator;

mod routes;
mod sessions;
mod store;

use sessions::SessionRegistry;
use store::SqlPrincipalStore;

const LISTEN_ADDR: &str = "0.0.0.0:5000";
const BASE_URL: &str = "http://localhost:5000";
const SETTINGS_FILE: &str = ".oidc-settings.env";

#[derive(Clone)]
pub struct AppState {
    pub flow: Arc<AuthorizationFlow>,
    pub settings: Arc<LiveSettings>,
    pub sessions: Arc<SessionRegistry>,
    pub principals: SqlPrincipalStore,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,demo_notes=debug".into()),
        )
        .init();

    let pool = SqlitePool::connect("sqlite::memory:")
        .await
        .expect("failed to open SQLite");
    store::init_schema(&pool).await.expect("failed to initialise schema");

    // Settings come from the persisted file when one exists, otherwise
    // from OIDC_* environment variables; admin edits write back to the file.
    let settings = Arc::new(
        LiveSettings::bootstrap(EnvFileSettingsStore::new(SETTINGS_FILE))
            .await
            .expect("invalid provider settings"),
    );
    let flow = Arc::new(AuthorizationFlow::new(
        settings.clone(),
        IdTokenValidator::new(),
    ));

    let state = AppState {
        flow,
        settings,
        sessions: Arc::new(SessionRegistry::new()),
        principals: SqlPrincipalStore::new(pool),
    };

    let app = Router::new()
        .route("/", get(routes::index))
        .route("/authorize", get(routes::authorize))
        .route("/callback", get(routes::callback))
        .route("/provider_logout", get(routes::provider_logout))
        .route("/local_logout", get(routes::local_logout))
        .route("/login_success", get(routes::login_success))
        .route("/login_failure", get(routes::login_failure))
        .route("/logout_success", get(routes::logout_success))
        .route("/admin/oidc-settings", get(routes::settings_page))
        .route("/admin/oidc-settings", post(routes::settings_update))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(LISTEN_ADDR)
        .await
        .expect("failed to bind");
    tracing::info!(addr = LISTEN_ADDR, "demo-notes listening");
    axum::serve(listener, app).await.expect("server error");
}
