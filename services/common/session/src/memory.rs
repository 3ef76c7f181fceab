use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::SessionResult;
use crate::model::{normalize_ip, truncated_hash, NewSession, Session};
use crate::repository::SessionRepository;

/// In-memory session store for unit tests and local development; not backed
/// by any transaction log so `try_deactivate` relies on the write lock rather
/// than a database-level conditional update.
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<Uuid, Session>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionRepository for InMemorySessionStore {
    async fn create(&self, new_session: NewSession) -> SessionResult<Session> {
        let now = Utc::now();
        let ip_address = new_session.ip_address.as_deref().and_then(normalize_ip);
        let session = Session {
            id: Uuid::new_v4(),
            user_id: new_session.user_id,
            access_token_jti: new_session.access_token_jti,
            refresh_token_jti: new_session.refresh_token_jti,
            ip_hash: ip_address.as_deref().map(truncated_hash),
            user_agent_hash: new_session.user_agent.as_deref().map(truncated_hash),
            ip_address,
            user_agent: new_session.user_agent,
            device_fingerprint: new_session.device_fingerprint,
            geolocation: new_session.geolocation,
            risk_score: new_session.risk_score,
            is_active: true,
            last_activity_at: now,
            expires_at: new_session.expires_at,
            revoked_at: None,
            revoked_reason: None,
            created_at: now,
            updated_at: now,
        };
        self.sessions.write().await.insert(session.id, session.clone());
        Ok(session)
    }

    async fn find_by_id(&self, id: Uuid) -> SessionResult<Option<Session>> {
        Ok(self.sessions.read().await.get(&id).cloned())
    }

    async fn find_by_access_token_jti(&self, jti: Uuid) -> SessionResult<Option<Session>> {
        Ok(self
            .sessions
            .read()
            .await
            .values()
            .find(|s| s.access_token_jti == jti && s.is_active)
            .cloned())
    }

    async fn find_by_refresh_token_jti(&self, jti: Uuid) -> SessionResult<Option<Session>> {
        Ok(self
            .sessions
            .read()
            .await
            .values()
            .find(|s| s.refresh_token_jti == jti)
            .cloned())
    }

    async fn find_active_by_user_id(&self, user_id: Uuid) -> SessionResult<Vec<Session>> {
        let mut sessions: Vec<Session> = self
            .sessions
            .read()
            .await
            .values()
            .filter(|s| s.user_id == user_id && s.is_active)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.last_activity_at.cmp(&a.last_activity_at));
        Ok(sessions)
    }

    async fn update_last_activity(&self, id: Uuid, at: DateTime<Utc>) -> SessionResult<()> {
        if let Some(session) = self.sessions.write().await.get_mut(&id) {
            session.last_activity_at = at;
            session.updated_at = at;
        }
        Ok(())
    }

    async fn update_risk_score(&self, id: Uuid, risk_score: i16) -> SessionResult<()> {
        if let Some(session) = self.sessions.write().await.get_mut(&id) {
            session.risk_score = risk_score;
            session.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn update_jtis(
        &self,
        id: Uuid,
        access_token_jti: Uuid,
        refresh_token_jti: Uuid,
    ) -> SessionResult<()> {
        if let Some(session) = self.sessions.write().await.get_mut(&id) {
            session.access_token_jti = access_token_jti;
            session.refresh_token_jti = refresh_token_jti;
            session.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn revoke_session(&self, id: Uuid, reason: &str) -> SessionResult<()> {
        if let Some(session) = self.sessions.write().await.get_mut(&id) {
            if session.is_active {
                session.is_active = false;
                session.revoked_at = Some(Utc::now());
                session.revoked_reason = Some(reason.to_string());
                session.updated_at = Utc::now();
            }
        }
        Ok(())
    }

    async fn revoke_all_user_sessions(&self, user_id: Uuid, reason: &str) -> SessionResult<u64> {
        let mut count = 0;
        let mut sessions = self.sessions.write().await;
        let now = Utc::now();
        for session in sessions.values_mut() {
            if session.user_id == user_id && session.is_active {
                session.is_active = false;
                session.revoked_at = Some(now);
                session.revoked_reason = Some(reason.to_string());
                session.updated_at = now;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn cleanup_expired_sessions(&self) -> SessionResult<u64> {
        let now = Utc::now();
        let mut sessions = self.sessions.write().await;
        let expired: Vec<Uuid> = sessions
            .values()
            .filter(|s| s.expires_at < now)
            .map(|s| s.id)
            .collect();
        for id in &expired {
            sessions.remove(id);
        }
        Ok(expired.len() as u64)
    }

    async fn try_deactivate(&self, id: Uuid, reason: &str) -> SessionResult<bool> {
        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get_mut(&id) {
            if session.is_active {
                session.is_active = false;
                session.revoked_at = Some(Utc::now());
                session.revoked_reason = Some(reason.to_string());
                session.updated_at = Utc::now();
                return Ok(true);
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample(user_id: Uuid) -> NewSession {
        NewSession {
            user_id,
            access_token_jti: Uuid::new_v4(),
            refresh_token_jti: Uuid::new_v4(),
            ip_address: Some("203.0.113.7".to_string()),
            user_agent: Some("test-agent".to_string()),
            device_fingerprint: None,
            geolocation: None,
            risk_score: 0,
            expires_at: Utc::now() + Duration::hours(24),
        }
    }

    #[tokio::test]
    async fn revoke_is_idempotent() {
        let store = InMemorySessionStore::new();
        let user_id = Uuid::new_v4();
        let session = store.create(sample(user_id)).await.unwrap();

        store.revoke_session(session.id, "logout").await.unwrap();
        store.revoke_session(session.id, "logout").await.unwrap();

        let reloaded = store.find_by_id(session.id).await.unwrap().unwrap();
        assert!(!reloaded.is_active);
        assert_eq!(reloaded.revoked_reason.as_deref(), Some("logout"));
    }

    #[tokio::test]
    async fn try_deactivate_only_succeeds_once() {
        let store = InMemorySessionStore::new();
        let session = store.create(sample(Uuid::new_v4())).await.unwrap();

        assert!(store.try_deactivate(session.id, "token_rotation").await.unwrap());
        assert!(!store.try_deactivate(session.id, "token_rotation").await.unwrap());
    }

    #[tokio::test]
    async fn cleanup_removes_only_expired_sessions() {
        let store = InMemorySessionStore::new();
        let user_id = Uuid::new_v4();
        let mut expired = sample(user_id);
        expired.expires_at = Utc::now() - Duration::minutes(1);
        let expired_session = store.create(expired).await.unwrap();
        let live_session = store.create(sample(user_id)).await.unwrap();

        let removed = store.cleanup_expired_sessions().await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.find_by_id(expired_session.id).await.unwrap().is_none());
        assert!(store.find_by_id(live_session.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn structurally_invalid_ip_is_normalized_to_null() {
        let store = InMemorySessionStore::new();
        let mut new_session = sample(Uuid::new_v4());
        new_session.ip_address = Some("not-an-ip".to_string());

        let session = store.create(new_session).await.unwrap();
        assert!(session.ip_address.is_none());
        assert!(session.ip_hash.is_none());
    }

    #[tokio::test]
    async fn valid_ip_is_stored_and_hashed() {
        let store = InMemorySessionStore::new();
        let session = store.create(sample(Uuid::new_v4())).await.unwrap();
        assert_eq!(session.ip_address.as_deref(), Some("203.0.113.7"));
        assert!(session.ip_hash.is_some());
    }
}
