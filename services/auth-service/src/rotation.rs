use std::sync::Arc;

use chrono::{Duration, Utc};
use common_auth::{AccessTokenSubject, BindingContext, TokenError, TokenService};
use common_audit::{AuditProducer, EventResult, EventSeverity, EventType, NewAuditEvent};
use common_http_errors::AuthCoreError;
use common_session::{NewSession, Session, SessionRepository};
use serde_json::json;
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::user::UserRepository;

const REFRESH_SESSION_TTL_SECONDS: i64 = 7 * 24 * 60 * 60;

pub struct RotationResult {
    pub session: Session,
    pub access_token: String,
    pub access_expires_at: chrono::DateTime<Utc>,
    pub refresh_token: String,
    pub refresh_expires_at: chrono::DateTime<Utc>,
}

/// Implements the single-use refresh contract: a refresh token rotates into
/// exactly one new pair, and any second use of an already-rotated token is
/// treated as token-family compromise.
pub struct RotationEngine {
    tokens: Arc<TokenService>,
    sessions: Arc<dyn SessionRepository>,
    users: Arc<dyn UserRepository>,
    audit: AuditProducer,
}

impl RotationEngine {
    pub fn new(
        tokens: Arc<TokenService>,
        sessions: Arc<dyn SessionRepository>,
        users: Arc<dyn UserRepository>,
        audit: AuditProducer,
    ) -> Self {
        Self {
            tokens,
            sessions,
            users,
            audit,
        }
    }

    #[instrument(skip(self, refresh_token, ip, user_agent))]
    pub async fn refresh(
        &self,
        refresh_token: &str,
        ip: Option<&str>,
        user_agent: Option<&str>,
    ) -> Result<RotationResult, AuthCoreError> {
        let claims = self.tokens.verify_refresh(refresh_token).map_err(|err| match err {
            // The key that signed this refresh token has aged out of the
            // manager entirely (past its hard grace). No amount of retrying
            // will recover it: the caller must log out and back in.
            TokenError::UnknownKeyId(_) | TokenError::NoActiveKey => AuthCoreError::UnknownKey,
            _ => AuthCoreError::InvalidRefresh,
        })?;

        let found = self
            .sessions
            .find_by_refresh_token_jti(claims.jti)
            .await
            .map_err(|err| AuthCoreError::InternalError(err.to_string()))?;

        let session = match found {
            None => {
                self.audit_critical(
                    EventType::SuspiciousActivity,
                    Some(claims.user_id),
                    None,
                    "refresh token not associated with any session",
                )
                .await;
                return Err(AuthCoreError::InvalidRefresh);
            }
            Some(session) if !session.is_active => {
                self.handle_reuse(&session, claims.user_id, claims.token_family)
                    .await;
                return Err(AuthCoreError::TokenReuse);
            }
            Some(session) => session,
        };

        if session.expires_at <= Utc::now() {
            return Err(AuthCoreError::SessionExpired);
        }

        let user = self
            .users
            .find_by_id(claims.user_id)
            .await
            .map_err(|err| AuthCoreError::InternalError(err.to_string()))?
            .ok_or(AuthCoreError::UserNotFound)?;
        if !user.is_active {
            return Err(AuthCoreError::AccountDeactivated);
        }

        self.sessions
            .update_last_activity(session.id, Utc::now())
            .await
            .map_err(|err| AuthCoreError::InternalError(err.to_string()))?;

        let new_sid = Uuid::new_v4();
        let binding = BindingContext { ip, user_agent };
        let access = self
            .tokens
            .issue_access(
                AccessTokenSubject {
                    user_id: user.id,
                    email: user.email.clone(),
                    name: user.name.clone(),
                    sid: new_sid,
                },
                Some(&binding),
            )
            .map_err(|err| AuthCoreError::InternalError(err.to_string()))?;
        let refresh = self
            .tokens
            .issue_refresh(user.id, new_sid, Some(claims.token_family))
            .map_err(|err| AuthCoreError::InternalError(err.to_string()))?;

        // Step 8: the old session is the serialization point. Losing this race
        // means someone else already rotated this refresh token concurrently.
        let won_race = self
            .sessions
            .try_deactivate(session.id, "token_rotation")
            .await
            .map_err(|err| AuthCoreError::InternalError(err.to_string()))?;
        if !won_race {
            self.handle_reuse(&session, claims.user_id, claims.token_family)
                .await;
            return Err(AuthCoreError::TokenReuse);
        }

        let new_session = self
            .sessions
            .create(NewSession {
                user_id: user.id,
                access_token_jti: access.jti,
                refresh_token_jti: refresh.jti,
                ip_address: ip.map(str::to_string),
                user_agent: user_agent.map(str::to_string),
                device_fingerprint: session.device_fingerprint.clone(),
                geolocation: session.geolocation.clone(),
                risk_score: session.risk_score,
                expires_at: Utc::now() + Duration::seconds(REFRESH_SESSION_TTL_SECONDS),
            })
            .await
            .map_err(|err| AuthCoreError::InternalError(err.to_string()))?;

        self.audit
            .emit(
                NewAuditEvent::new(EventType::TokenRefresh, EventSeverity::Info, EventResult::Success)
                    .user(user.id)
                    .session(new_session.id)
                    .metadata(json!({
                        "previousSessionId": session.id,
                        "tokenFamily": claims.token_family,
                    })),
            )
            .await;
        self.audit
            .emit(
                NewAuditEvent::new(EventType::SessionCreated, EventSeverity::Info, EventResult::Success)
                    .user(user.id)
                    .session(new_session.id),
            )
            .await;

        Ok(RotationResult {
            session: new_session,
            access_token: access.token,
            access_expires_at: access.expires_at,
            refresh_token: refresh.token,
            refresh_expires_at: refresh.expires_at,
        })
    }

    /// Revokes every session sharing `token_family`; since the session store
    /// does not track family linkage itself, this always falls back to
    /// revoking every active session of the user, an acceptable degradation
    /// for a confirmed token-reuse event.
    async fn handle_reuse(&self, session: &Session, user_id: Uuid, token_family: Uuid) {
        let revoked = match self
            .sessions
            .revoke_all_user_sessions(user_id, "token_reuse_detected")
            .await
        {
            Ok(count) => count,
            Err(err) => {
                warn!(error = %err, "failed to revoke sessions after detected token reuse");
                0
            }
        };

        self.audit
            .emit(
                NewAuditEvent::new(
                    EventType::SuspiciousActivity,
                    EventSeverity::Critical,
                    EventResult::Denied,
                )
                .user(user_id)
                .session(session.id)
                .metadata(json!({
                    "reason": "refresh_token_reuse",
                    "tokenFamily": token_family,
                    "sessionsRevoked": revoked,
                })),
            )
            .await;
    }

    async fn audit_critical(
        &self,
        event_type: EventType,
        user_id: Option<Uuid>,
        session_id: Option<Uuid>,
        detail: &str,
    ) {
        let mut event = NewAuditEvent::new(event_type, EventSeverity::Critical, EventResult::Denied)
            .metadata(json!({ "detail": detail }));
        if let Some(user_id) = user_id {
            event = event.user(user_id);
        }
        if let Some(session_id) = session_id {
            event = event.session(session_id);
        }
        self.audit.emit(event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::user::test_support::InMemoryUserRepository;
    use crate::user::User;
    use common_audit::InMemoryAuditLog;
    use common_auth::TokenConfig;
    use common_keys::{KeyManager, KeyManagerConfig};
    use common_session::InMemorySessionStore;

    struct Harness {
        engine: RotationEngine,
        sessions: Arc<dyn SessionRepository>,
        user: User,
        refresh_token: String,
    }

    async fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let keys = KeyManager::spawn(KeyManagerConfig {
            key_store_dir: dir.path().to_path_buf(),
            grace_window: Duration::hours(1),
        });
        keys.wait_until_ready().await;
        std::mem::forget(dir);
        let tokens = Arc::new(TokenService::new(keys, TokenConfig::default()));

        let sessions: Arc<dyn SessionRepository> = Arc::new(InMemorySessionStore::new());
        let users = Arc::new(InMemoryUserRepository::new());
        let audit = AuditProducer::new(Arc::new(InMemoryAuditLog::new(false)));

        let user = User {
            id: Uuid::new_v4(),
            email: "rotator@example.com".to_string(),
            name: "Rotator".to_string(),
            password_hash: String::new(),
            is_active: true,
            security_level: 0,
            created_at: Utc::now() - Duration::days(400),
            password_set_at: Utc::now() - Duration::days(10),
            failed_attempts: 0,
            locked_until: None,
        };
        users.insert(user.clone()).await;

        let engine = RotationEngine::new(tokens.clone(), sessions.clone(), users.clone(), audit);

        let sid = Uuid::new_v4();
        let access = tokens
            .issue_access(
                AccessTokenSubject {
                    user_id: user.id,
                    email: user.email.clone(),
                    name: user.name.clone(),
                    sid,
                },
                None,
            )
            .unwrap();
        let refresh = tokens.issue_refresh(user.id, sid, None).unwrap();
        sessions
            .create(NewSession {
                user_id: user.id,
                access_token_jti: access.jti,
                refresh_token_jti: refresh.jti,
                ip_address: None,
                user_agent: None,
                device_fingerprint: None,
                geolocation: None,
                risk_score: 0,
                expires_at: Utc::now() + Duration::hours(1),
            })
            .await
            .unwrap();

        Harness {
            engine,
            sessions,
            user,
            refresh_token: refresh.token,
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn rotates_a_valid_refresh_token_exactly_once() {
        let h = harness().await;

        let rotated = h.engine.refresh(&h.refresh_token, None, None).await.unwrap();
        assert_eq!(rotated.session.user_id, h.user.id);

        // The same refresh token must not rotate twice.
        let second = h.engine.refresh(&h.refresh_token, None, None).await;
        assert!(matches!(second, Err(AuthCoreError::TokenReuse)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn reused_refresh_token_revokes_every_active_session() {
        let h = harness().await;

        h.engine.refresh(&h.refresh_token, None, None).await.unwrap();
        // Reusing the already-rotated token must cascade into revoking
        // every active session for the user, not just the stale one.
        let reuse_result = h.engine.refresh(&h.refresh_token, None, None).await;
        assert!(matches!(reuse_result, Err(AuthCoreError::TokenReuse)));

        let remaining = h.sessions.find_active_by_user_id(h.user.id).await.unwrap();
        assert!(remaining.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn garbage_refresh_token_is_rejected() {
        let h = harness().await;
        let result = h.engine.refresh("not-a-real-token", None, None).await;
        assert!(matches!(result, Err(AuthCoreError::InvalidRefresh)));
    }
}
