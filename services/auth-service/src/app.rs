use std::sync::Arc;

use common_audit::AuditProducer;
use common_auth::TokenService;
use common_keys::KeyManager;
use common_policy::PermissionEngine;
use common_session::SessionRepository;
use sqlx::PgPool;

use crate::config::AuthConfig;
use crate::metrics::AuthMetrics;
use crate::orchestrator::LoginLogoutOrchestrator;
use crate::rotation::RotationEngine;
use crate::user::UserRepository;

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub config: Arc<AuthConfig>,
    pub keys: Arc<KeyManager>,
    pub tokens: Arc<TokenService>,
    pub sessions: Arc<dyn SessionRepository>,
    pub users: Arc<dyn UserRepository>,
    pub permissions: Arc<PermissionEngine>,
    pub audit: AuditProducer,
    pub orchestrator: Arc<LoginLogoutOrchestrator>,
    pub rotation: Arc<RotationEngine>,
    pub metrics: Arc<AuthMetrics>,
}
