use std::sync::Arc;

use chrono::{Duration, Utc};
use common_auth::{verify_password, AccessTokenSubject, BindingContext, TokenService};
use common_audit::{AuditProducer, EventResult, EventSeverity, EventType, NewAuditEvent};
use common_http_errors::AuthCoreError;
use common_policy::RiskInput;
use common_session::{NewSession, Session, SessionRepository};
use serde_json::json;
use tracing::instrument;
use uuid::Uuid;

use crate::user::{User, UserRepository};

const DEFAULT_SESSION_TTL_SECONDS: i64 = 24 * 60 * 60;
const REMEMBER_ME_SESSION_TTL_SECONDS: i64 = 7 * 24 * 60 * 60;
const MAX_FAILED_ATTEMPTS: i32 = 5;
const LOCKOUT_MINUTES: i64 = 15;

pub struct LoginRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
    pub remember_me: bool,
    pub ip: Option<&'a str>,
    pub user_agent: Option<&'a str>,
    pub device_fingerprint: Option<String>,
}

pub struct LoginResult {
    pub user: User,
    pub session: Session,
    pub access_token: String,
    pub access_expires_at: chrono::DateTime<Utc>,
    pub refresh_token: String,
    pub refresh_expires_at: chrono::DateTime<Utc>,
}

pub enum LogoutScope {
    Session(Uuid),
    AllSessions,
}

/// Verifies credentials and opens or closes sessions. The risk engine runs
/// here too (an initial score is part of the session record) but the
/// per-request PDP evaluation for resource access is a separate call the
/// authorization middleware makes, not this orchestrator.
pub struct LoginLogoutOrchestrator {
    tokens: Arc<TokenService>,
    sessions: Arc<dyn SessionRepository>,
    users: Arc<dyn UserRepository>,
    audit: AuditProducer,
}

impl LoginLogoutOrchestrator {
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

    #[instrument(skip(self, request), fields(email = %request.email))]
    pub async fn login(&self, request: LoginRequest<'_>) -> Result<LoginResult, AuthCoreError> {
        if !looks_like_email(request.email) {
            return Err(AuthCoreError::ValidationError("a valid email is required".into()));
        }

        // Uniform failure path: unknown user, inactive account, a wrong
        // password, and a locked account all return the same
        // InvalidCredentials error so a caller can't use the response to
        // enumerate valid accounts or distinguish why a login failed.
        let user = self
            .users
            .find_by_email(request.email)
            .await
            .map_err(|err| AuthCoreError::InternalError(err.to_string()))?;

        let mut user = match user {
            Some(user) => user,
            None => {
                self.audit
                    .emit(
                        NewAuditEvent::new(
                            EventType::UserLogin,
                            EventSeverity::Warning,
                            EventResult::Failure,
                        )
                        .metadata(json!({ "email": request.email })),
                    )
                    .await;
                return Err(AuthCoreError::InvalidCredentials);
            }
        };

        if let Some(locked_until) = user.locked_until {
            if locked_until > Utc::now() {
                self.audit
                    .emit(
                        NewAuditEvent::new(
                            EventType::AccountLocked,
                            EventSeverity::Warning,
                            EventResult::Denied,
                        )
                        .user(user.id)
                        .metadata(json!({ "lockedUntil": locked_until })),
                    )
                    .await;
                return Err(AuthCoreError::InvalidCredentials);
            }
            // Lockout window has elapsed: clear it and let this attempt
            // through the normal password check below.
            self.users
                .clear_failed_login(user.id)
                .await
                .map_err(|err| AuthCoreError::InternalError(err.to_string()))?;
            user.failed_attempts = 0;
            user.locked_until = None;
            self.audit
                .emit(
                    NewAuditEvent::new(
                        EventType::AccountUnlocked,
                        EventSeverity::Info,
                        EventResult::Success,
                    )
                    .user(user.id),
                )
                .await;
        }

        if !user.is_active || !verify_password(request.password, &user.password_hash) {
            if user.is_active {
                let attempts = user.failed_attempts.saturating_add(1);
                let lock_until = if attempts >= MAX_FAILED_ATTEMPTS {
                    Some(Utc::now() + Duration::minutes(LOCKOUT_MINUTES))
                } else {
                    None
                };
                self.users
                    .record_failed_login(user.id, lock_until)
                    .await
                    .map_err(|err| AuthCoreError::InternalError(err.to_string()))?;
                if let Some(until) = lock_until {
                    self.audit
                        .emit(
                            NewAuditEvent::new(
                                EventType::AccountLocked,
                                EventSeverity::Critical,
                                EventResult::Denied,
                            )
                            .user(user.id)
                            .metadata(json!({ "lockedUntil": until, "failedAttempts": attempts })),
                        )
                        .await;
                }
            }
            self.audit
                .emit(
                    NewAuditEvent::new(
                        EventType::UserLogin,
                        EventSeverity::Warning,
                        EventResult::Failure,
                    )
                    .metadata(json!({ "email": request.email })),
                )
                .await;
            return Err(AuthCoreError::InvalidCredentials);
        }

        self.users
            .clear_failed_login(user.id)
            .await
            .map_err(|err| AuthCoreError::InternalError(err.to_string()))?;

        let risk = common_policy::RiskEngine::score(&RiskInput {
            account_created_at: Some(user.created_at),
            password_set_at: Some(user.password_set_at),
            ..Default::default()
        })
        .await;

        let ttl_seconds = if request.remember_me {
            REMEMBER_ME_SESSION_TTL_SECONDS
        } else {
            DEFAULT_SESSION_TTL_SECONDS
        };

        let sid = Uuid::new_v4();
        let binding = BindingContext {
            ip: request.ip,
            user_agent: request.user_agent,
        };
        let access = self
            .tokens
            .issue_access(
                AccessTokenSubject {
                    user_id: user.id,
                    email: user.email.clone(),
                    name: user.name.clone(),
                    sid,
                },
                Some(&binding),
            )
            .map_err(|err| AuthCoreError::InternalError(err.to_string()))?;
        let refresh = self
            .tokens
            .issue_refresh(user.id, sid, None)
            .map_err(|err| AuthCoreError::InternalError(err.to_string()))?;

        let session = self
            .sessions
            .create(NewSession {
                user_id: user.id,
                access_token_jti: access.jti,
                refresh_token_jti: refresh.jti,
                ip_address: request.ip.map(str::to_string),
                user_agent: request.user_agent.map(str::to_string),
                device_fingerprint: request.device_fingerprint,
                geolocation: None,
                risk_score: risk.value.min(i16::MAX as u32) as i16,
                expires_at: Utc::now() + Duration::seconds(ttl_seconds),
            })
            .await
            .map_err(|err| AuthCoreError::InternalError(err.to_string()))?;

        self.audit
            .emit(
                NewAuditEvent::new(EventType::UserLogin, EventSeverity::Info, EventResult::Success)
                    .user(user.id)
                    .session(session.id)
                    .risk_indicators(json!({ "score": risk.value })),
            )
            .await;

        Ok(LoginResult {
            user,
            session,
            access_token: access.token,
            access_expires_at: access.expires_at,
            refresh_token: refresh.token,
            refresh_expires_at: refresh.expires_at,
        })
    }

    #[instrument(skip(self))]
    pub async fn logout(&self, user_id: Uuid, scope: LogoutScope) -> Result<(), AuthCoreError> {
        match scope {
            LogoutScope::Session(session_id) => {
                let session = self
                    .sessions
                    .find_by_id(session_id)
                    .await
                    .map_err(|err| AuthCoreError::InternalError(err.to_string()))?;
                let Some(session) = session else {
                    return Err(AuthCoreError::SessionExpired);
                };
                if session.user_id != user_id {
                    return Err(AuthCoreError::PermissionDenied);
                }
                self.sessions
                    .revoke_session(session_id, "user_logout")
                    .await
                    .map_err(|err| AuthCoreError::InternalError(err.to_string()))?;
                self.audit
                    .emit(
                        NewAuditEvent::new(EventType::UserLogout, EventSeverity::Info, EventResult::Success)
                            .user(user_id)
                            .session(session_id),
                    )
                    .await;
            }
            LogoutScope::AllSessions => {
                let revoked = self
                    .sessions
                    .revoke_all_user_sessions(user_id, "user_logout_all")
                    .await
                    .map_err(|err| AuthCoreError::InternalError(err.to_string()))?;
                self.audit
                    .emit(
                        NewAuditEvent::new(EventType::UserLogout, EventSeverity::Info, EventResult::Success)
                            .user(user_id)
                            .metadata(json!({ "sessionsRevoked": revoked })),
                    )
                    .await;
            }
        }
        Ok(())
    }
}

fn looks_like_email(value: &str) -> bool {
    let Some((local, domain)) = value.split_once('@') else {
        return false;
    };
    !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::user::test_support::InMemoryUserRepository;
    use common_audit::InMemoryAuditLog;
    use common_auth::{hash_password, TokenConfig};
    use common_keys::{KeyManager, KeyManagerConfig};
    use common_session::InMemorySessionStore;

    async fn harness() -> (LoginLogoutOrchestrator, Arc<InMemoryUserRepository>, Uuid) {
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

        let user_id = Uuid::new_v4();
        users
            .insert(User {
                id: user_id,
                email: "login-test@example.com".to_string(),
                name: "Login Test".to_string(),
                password_hash: hash_password("correct horse battery staple").unwrap(),
                is_active: true,
                security_level: 0,
                created_at: Utc::now() - Duration::days(400),
                password_set_at: Utc::now() - Duration::days(10),
                failed_attempts: 0,
                locked_until: None,
            })
            .await;

        let orchestrator = LoginLogoutOrchestrator::new(tokens, sessions, users.clone(), audit);
        (orchestrator, users, user_id)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn login_succeeds_with_correct_credentials() {
        let (orchestrator, _users, _user_id) = harness().await;
        let result = orchestrator
            .login(LoginRequest {
                email: "login-test@example.com",
                password: "correct horse battery staple",
                remember_me: false,
                ip: Some("203.0.113.9"),
                user_agent: Some("test-agent"),
                device_fingerprint: None,
            })
            .await
            .unwrap();
        assert_eq!(result.user.email, "login-test@example.com");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn login_with_wrong_password_is_rejected() {
        let (orchestrator, _users, _user_id) = harness().await;
        let result = orchestrator
            .login(LoginRequest {
                email: "login-test@example.com",
                password: "wrong password",
                remember_me: false,
                ip: None,
                user_agent: None,
                device_fingerprint: None,
            })
            .await;
        assert!(matches!(result, Err(AuthCoreError::InvalidCredentials)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn login_for_unknown_email_fails_identically_to_wrong_password() {
        let (orchestrator, _users, _user_id) = harness().await;
        let result = orchestrator
            .login(LoginRequest {
                email: "nobody@example.com",
                password: "whatever",
                remember_me: false,
                ip: None,
                user_agent: None,
                device_fingerprint: None,
            })
            .await;
        assert!(matches!(result, Err(AuthCoreError::InvalidCredentials)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn logout_all_sessions_revokes_every_active_session() {
        let (orchestrator, _users, user_id) = harness().await;
        orchestrator
            .login(LoginRequest {
                email: "login-test@example.com",
                password: "correct horse battery staple",
                remember_me: false,
                ip: None,
                user_agent: None,
                device_fingerprint: None,
            })
            .await
            .unwrap();
        orchestrator
            .login(LoginRequest {
                email: "login-test@example.com",
                password: "correct horse battery staple",
                remember_me: true,
                ip: None,
                user_agent: None,
                device_fingerprint: None,
            })
            .await
            .unwrap();

        orchestrator.logout(user_id, LogoutScope::AllSessions).await.unwrap();
    }

    #[test]
    fn rejects_malformed_email_addresses() {
        assert!(looks_like_email("a@b.com"));
        assert!(!looks_like_email("not-an-email"));
        assert!(!looks_like_email("a@.com"));
        assert!(!looks_like_email("a@b."));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn account_locks_after_max_failed_attempts_then_rejects_the_correct_password_too() {
        let (orchestrator, _users, _user_id) = harness().await;
        let attempt = |password: &'static str| {
            orchestrator.login(LoginRequest {
                email: "login-test@example.com",
                password,
                remember_me: false,
                ip: None,
                user_agent: None,
                device_fingerprint: None,
            })
        };

        for _ in 0..MAX_FAILED_ATTEMPTS {
            assert!(matches!(
                attempt("wrong password").await,
                Err(AuthCoreError::InvalidCredentials)
            ));
        }

        // The account is now locked: even the correct password is rejected
        // identically, so a client can't tell lockout apart from a typo.
        assert!(matches!(
            attempt("correct horse battery staple").await,
            Err(AuthCoreError::InvalidCredentials)
        ));
    }
}
