use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::SessionResult;
use crate::model::{NewSession, Session};

/// Storage contract for C3, independent of the backing database so the
/// rotation engine and orchestrator can be exercised against an in-memory
/// fake in unit tests.
#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn create(&self, new_session: NewSession) -> SessionResult<Session>;

    async fn find_by_id(&self, id: Uuid) -> SessionResult<Option<Session>>;

    async fn find_by_access_token_jti(&self, jti: Uuid) -> SessionResult<Option<Session>>;

    /// Returns the session regardless of active state; the rotation engine's
    /// reuse check depends on seeing already-rotated (inactive) sessions too.
    async fn find_by_refresh_token_jti(&self, jti: Uuid) -> SessionResult<Option<Session>>;

    async fn find_active_by_user_id(&self, user_id: Uuid) -> SessionResult<Vec<Session>>;

    async fn update_last_activity(&self, id: Uuid, at: DateTime<Utc>) -> SessionResult<()>;

    async fn update_risk_score(&self, id: Uuid, risk_score: i16) -> SessionResult<()>;

    async fn update_jtis(
        &self,
        id: Uuid,
        access_token_jti: Uuid,
        refresh_token_jti: Uuid,
    ) -> SessionResult<()>;

    /// Idempotent: revoking an already-revoked session is a no-op success.
    async fn revoke_session(&self, id: Uuid, reason: &str) -> SessionResult<()>;

    async fn revoke_all_user_sessions(&self, user_id: Uuid, reason: &str) -> SessionResult<u64>;

    async fn cleanup_expired_sessions(&self) -> SessionResult<u64>;

    /// The single conditional update used as the serialization point for
    /// refresh rotation: flips `is_active` to false only if it was true,
    /// reporting whether this caller won the race.
    async fn try_deactivate(&self, id: Uuid, reason: &str) -> SessionResult<bool>;
}
