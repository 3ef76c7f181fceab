use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::SessionResult;
use crate::model::{normalize_ip, truncated_hash, NewSession, Session};
use crate::repository::SessionRepository;

/// Postgres-backed session store. Columns mirror [`Session`] field-for-field.
#[derive(Clone)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionRepository for PgSessionStore {
    async fn create(&self, new_session: NewSession) -> SessionResult<Session> {
        let ip_address = new_session.ip_address.as_deref().and_then(normalize_ip);
        let ip_hash = ip_address.as_deref().map(truncated_hash);
        let ua_hash = new_session.user_agent.as_deref().map(truncated_hash);
        let now = Utc::now();

        let session = sqlx::query_as::<_, Session>(
            r#"INSERT INTO sessions (
                id, user_id, access_token_jti, refresh_token_jti,
                ip_address, ip_hash, user_agent, user_agent_hash,
                device_fingerprint, geolocation, risk_score, is_active,
                last_activity_at, expires_at, revoked_at, revoked_reason,
                created_at, updated_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, TRUE,
                $12, $13, NULL, NULL, $12, $12
            ) RETURNING *"#,
        )
        .bind(Uuid::new_v4())
        .bind(new_session.user_id)
        .bind(new_session.access_token_jti)
        .bind(new_session.refresh_token_jti)
        .bind(&ip_address)
        .bind(&ip_hash)
        .bind(&new_session.user_agent)
        .bind(&ua_hash)
        .bind(&new_session.device_fingerprint)
        .bind(&new_session.geolocation)
        .bind(new_session.risk_score)
        .bind(now)
        .bind(new_session.expires_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(session)
    }

    async fn find_by_id(&self, id: Uuid) -> SessionResult<Option<Session>> {
        let session = sqlx::query_as::<_, Session>("SELECT * FROM sessions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(session)
    }

    async fn find_by_access_token_jti(&self, jti: Uuid) -> SessionResult<Option<Session>> {
        let session = sqlx::query_as::<_, Session>(
            "SELECT * FROM sessions WHERE access_token_jti = $1 AND is_active = TRUE",
        )
        .bind(jti)
        .fetch_optional(&self.pool)
        .await?;
        Ok(session)
    }

    async fn find_by_refresh_token_jti(&self, jti: Uuid) -> SessionResult<Option<Session>> {
        let session = sqlx::query_as::<_, Session>("SELECT * FROM sessions WHERE refresh_token_jti = $1")
            .bind(jti)
            .fetch_optional(&self.pool)
            .await?;
        Ok(session)
    }

    async fn find_active_by_user_id(&self, user_id: Uuid) -> SessionResult<Vec<Session>> {
        let sessions = sqlx::query_as::<_, Session>(
            "SELECT * FROM sessions WHERE user_id = $1 AND is_active = TRUE ORDER BY last_activity_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(sessions)
    }

    async fn update_last_activity(&self, id: Uuid, at: DateTime<Utc>) -> SessionResult<()> {
        sqlx::query("UPDATE sessions SET last_activity_at = $1, updated_at = $1 WHERE id = $2")
            .bind(at)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_risk_score(&self, id: Uuid, risk_score: i16) -> SessionResult<()> {
        sqlx::query("UPDATE sessions SET risk_score = $1, updated_at = $2 WHERE id = $3")
            .bind(risk_score)
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_jtis(
        &self,
        id: Uuid,
        access_token_jti: Uuid,
        refresh_token_jti: Uuid,
    ) -> SessionResult<()> {
        sqlx::query(
            "UPDATE sessions SET access_token_jti = $1, refresh_token_jti = $2, updated_at = $3 WHERE id = $4",
        )
        .bind(access_token_jti)
        .bind(refresh_token_jti)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn revoke_session(&self, id: Uuid, reason: &str) -> SessionResult<()> {
        sqlx::query(
            r#"UPDATE sessions SET is_active = FALSE, revoked_at = $1, revoked_reason = $2, updated_at = $1
               WHERE id = $3 AND is_active = TRUE"#,
        )
        .bind(Utc::now())
        .bind(reason)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn revoke_all_user_sessions(&self, user_id: Uuid, reason: &str) -> SessionResult<u64> {
        let result = sqlx::query(
            r#"UPDATE sessions SET is_active = FALSE, revoked_at = $1, revoked_reason = $2, updated_at = $1
               WHERE user_id = $3 AND is_active = TRUE"#,
        )
        .bind(Utc::now())
        .bind(reason)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn cleanup_expired_sessions(&self) -> SessionResult<u64> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at < $1")
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn try_deactivate(&self, id: Uuid, reason: &str) -> SessionResult<bool> {
        let result = sqlx::query(
            r#"UPDATE sessions SET is_active = FALSE, revoked_at = $1, revoked_reason = $2, updated_at = $1
               WHERE id = $3 AND is_active = TRUE"#,
        )
        .bind(Utc::now())
        .bind(reason)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}
