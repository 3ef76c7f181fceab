use async_trait::async_trait;
use common_policy::{PermissionRepository, PermissionRule};
use sqlx::PgPool;
use tracing::instrument;

/// Loads ABAC permission rules from Postgres. Conditions are stored as a
/// single JSONB array column rather than a join table: they're read far
/// more often than written and never queried individually.
pub struct PgPermissionRepository {
    pool: PgPool,
}

impl PgPermissionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct PermissionRuleRow {
    id: uuid::Uuid,
    resource: String,
    action: String,
    conditions: serde_json::Value,
    priority: i32,
    effect: String,
}

#[async_trait]
impl PermissionRepository for PgPermissionRepository {
    #[instrument(skip(self))]
    async fn load_rules(&self) -> common_policy::PolicyResult<Vec<PermissionRule>> {
        let rows = sqlx::query_as::<_, PermissionRuleRow>(
            "SELECT id, resource, action, conditions, priority, effect FROM permission_rules",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|err| common_policy::PolicyError::RuleLoad(err.to_string()))?;

        rows.into_iter()
            .map(|row| {
                let conditions = serde_json::from_value(row.conditions)
                    .map_err(|err| common_policy::PolicyError::RuleLoad(err.to_string()))?;
                let effect = match row.effect.as_str() {
                    "allow" => common_policy::Effect::Allow,
                    "deny" => common_policy::Effect::Deny,
                    other => {
                        return Err(common_policy::PolicyError::RuleLoad(format!(
                            "unknown permission effect '{other}'"
                        )))
                    }
                };
                Ok(PermissionRule {
                    id: row.id,
                    resource: row.resource,
                    action: row.action,
                    conditions,
                    priority: row.priority,
                    effect,
                })
            })
            .collect()
    }
}
