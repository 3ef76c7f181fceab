use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

/// A user account as seen by the authentication core. Registration,
/// profile edits and role administration live outside this crate; this is
/// the read-mostly projection login, refresh and risk scoring need.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub password_hash: String,
    pub is_active: bool,
    pub security_level: i32,
    pub created_at: DateTime<Utc>,
    pub password_set_at: DateTime<Utc>,
    pub failed_attempts: i32,
    pub locked_until: Option<DateTime<Utc>>,
}

#[derive(Debug, Error)]
pub enum UserError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type UserResult<T> = Result<T, UserError>;

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_email(&self, email: &str) -> UserResult<Option<User>>;
    async fn find_by_id(&self, id: Uuid) -> UserResult<Option<User>>;

    /// Records a failed password check, setting `locked_until` when it's
    /// supplied. Returns the resulting failed-attempt count.
    async fn record_failed_login(
        &self,
        user_id: Uuid,
        lock_until: Option<DateTime<Utc>>,
    ) -> UserResult<i32>;

    /// Clears both the failed-attempt counter and any lockout, called on a
    /// successful login and when an expired lockout is discovered.
    async fn clear_failed_login(&self, user_id: Uuid) -> UserResult<()>;
}

#[derive(Clone)]
pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn find_by_email(&self, email: &str) -> UserResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"SELECT id, email, name, password_hash, is_active, security_level, created_at,
                      password_set_at, failed_attempts, locked_until
               FROM users WHERE lower(email) = lower($1)"#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn find_by_id(&self, id: Uuid) -> UserResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"SELECT id, email, name, password_hash, is_active, security_level, created_at,
                      password_set_at, failed_attempts, locked_until
               FROM users WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn record_failed_login(
        &self,
        user_id: Uuid,
        lock_until: Option<DateTime<Utc>>,
    ) -> UserResult<i32> {
        let row: (i32,) = sqlx::query_as(
            r#"UPDATE users SET failed_attempts = failed_attempts + 1, locked_until = $2
               WHERE id = $1 RETURNING failed_attempts"#,
        )
        .bind(user_id)
        .bind(lock_until)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0)
    }

    async fn clear_failed_login(&self, user_id: Uuid) -> UserResult<()> {
        sqlx::query("UPDATE users SET failed_attempts = 0, locked_until = NULL WHERE id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
pub mod test_support {
    use std::collections::HashMap;
    use tokio::sync::RwLock;

    use super::*;

    /// In-memory user directory for unit tests.
    #[derive(Default)]
    pub struct InMemoryUserRepository {
        users: RwLock<HashMap<Uuid, User>>,
    }

    impl InMemoryUserRepository {
        pub fn new() -> Self {
            Self::default()
        }

        pub async fn insert(&self, user: User) {
            self.users.write().await.insert(user.id, user);
        }
    }

    #[async_trait]
    impl UserRepository for InMemoryUserRepository {
        async fn find_by_email(&self, email: &str) -> UserResult<Option<User>> {
            Ok(self
                .users
                .read()
                .await
                .values()
                .find(|u| u.email.eq_ignore_ascii_case(email))
                .cloned())
        }

        async fn find_by_id(&self, id: Uuid) -> UserResult<Option<User>> {
            Ok(self.users.read().await.get(&id).cloned())
        }

        async fn record_failed_login(
            &self,
            user_id: Uuid,
            lock_until: Option<DateTime<Utc>>,
        ) -> UserResult<i32> {
            let mut users = self.users.write().await;
            let Some(user) = users.get_mut(&user_id) else {
                return Ok(0);
            };
            user.failed_attempts += 1;
            user.locked_until = lock_until;
            Ok(user.failed_attempts)
        }

        async fn clear_failed_login(&self, user_id: Uuid) -> UserResult<()> {
            if let Some(user) = self.users.write().await.get_mut(&user_id) {
                user.failed_attempts = 0;
                user.locked_until = None;
            }
            Ok(())
        }
    }
}
