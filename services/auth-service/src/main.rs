use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use auth_service::config::load_auth_config;
use auth_service::handlers::{
    authorize, delete_session, health, jwks, list_sessions, login, logout, metrics, refresh,
};
use auth_service::metrics::AuthMetrics;
use auth_service::orchestrator::LoginLogoutOrchestrator;
use auth_service::permission_repo::PgPermissionRepository;
use auth_service::rotation::RotationEngine;
use auth_service::user::PgUserRepository;
use auth_service::AppState;
use axum::http::{
    header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, COOKIE},
    HeaderValue, Method,
};
use axum::routing::{delete, get, post};
use axum::Router;
use common_audit::{AuditProducer, PgAuditLog};
use common_auth::{TokenConfig, TokenService};
use common_keys::{KeyManager, KeyManagerConfig};
use common_policy::PermissionEngine;
use common_session::PgSessionStore;
use sqlx::PgPool;
use tokio::net::TcpListener;
use tokio::time::{interval, MissedTickBehavior};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let config = Arc::new(load_auth_config()?);
    info!(addr = %config.bind_addr(), "loaded auth-service configuration");

    let db = PgPool::connect(&config.database_url)
        .await
        .context("failed to connect to Postgres")?;

    let keys = KeyManager::spawn(KeyManagerConfig {
        key_store_dir: config.key_store_dir.clone(),
        grace_window: config.key_grace_window(),
    });
    keys.wait_until_ready().await;
    spawn_key_cleanup_sweep(keys.clone());

    let tokens = Arc::new(TokenService::new(keys.clone(), TokenConfig::from_env()));

    let sessions: Arc<dyn common_session::SessionRepository> =
        Arc::new(PgSessionStore::new(db.clone()));
    spawn_session_cleanup_sweep(sessions.clone());

    let users = Arc::new(PgUserRepository::new(db.clone()));

    let permission_repo = PgPermissionRepository::new(db.clone());
    let permissions = Arc::new(
        PermissionEngine::load(&permission_repo)
            .await
            .context("failed to load permission rules")?,
    );

    let audit = AuditProducer::new(Arc::new(PgAuditLog::new(db.clone(), true)));

    let orchestrator = Arc::new(LoginLogoutOrchestrator::new(
        tokens.clone(),
        sessions.clone(),
        users.clone(),
        audit.clone(),
    ));
    let rotation = Arc::new(RotationEngine::new(
        tokens.clone(),
        sessions.clone(),
        users.clone(),
        audit.clone(),
    ));

    let state = AppState {
        db,
        config: config.clone(),
        keys,
        tokens,
        sessions,
        users,
        permissions,
        audit,
        orchestrator,
        rotation,
        metrics: Arc::new(AuthMetrics::new()?),
    };

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list([
            HeaderValue::from_static("http://localhost:3000"),
            HeaderValue::from_static("http://localhost:5173"),
        ]))
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([ACCEPT, CONTENT_TYPE, AUTHORIZATION, COOKIE])
        .allow_credentials(true);

    let app = Router::new()
        .route("/healthz", get(health))
        .route("/metrics", get(metrics))
        .route("/jwks", get(jwks))
        .route("/.well-known/jwks.json", get(jwks))
        .route("/login", post(login))
        .route("/refresh", post(refresh))
        .route("/logout", post(logout))
        .route("/sessions", get(list_sessions))
        .route("/sessions/:id", delete(delete_session))
        .route("/authorize", post(authorize))
        .with_state(state)
        .layer(cors);

    let addr: SocketAddr = config.bind_addr().parse().context("invalid HOST/PORT")?;
    info!(%addr, "starting auth-service");
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn spawn_key_cleanup_sweep(keys: Arc<KeyManager>) {
    tokio::spawn(async move {
        let mut ticker = interval(std::time::Duration::from_secs(3600));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let purged = keys.cleanup_sweep().await;
            if purged > 0 {
                info!(purged, "purged expired signing keys");
            }
        }
    });
}

fn spawn_session_cleanup_sweep(sessions: Arc<dyn common_session::SessionRepository>) {
    tokio::spawn(async move {
        let mut ticker = interval(std::time::Duration::from_secs(900));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match sessions.cleanup_expired_sessions().await {
                Ok(removed) if removed > 0 => info!(removed, "cleaned up expired sessions"),
                Ok(_) => {}
                Err(err) => warn!(error = %err, "failed to clean up expired sessions"),
            }
        }
    });
}
