use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::model::{compute_event_hash, AuditEvent, EventSeverity, EventType, NewAuditEvent};
use crate::repository::AuditRepository;
use crate::AuditResult;

/// Postgres-backed audit log. `append` runs inside a transaction so the
/// "read latest hash, compute, insert" sequence that builds the chain is
/// itself serialized per writer — concurrent appends still produce a total
/// order, just not a globally predictable one.
#[derive(Clone)]
pub struct PgAuditLog {
    pool: PgPool,
    chain_hashes: bool,
}

impl PgAuditLog {
    pub fn new(pool: PgPool, chain_hashes: bool) -> Self {
        Self { pool, chain_hashes }
    }
}

#[async_trait]
impl AuditRepository for PgAuditLog {
    async fn append(&self, new_event: NewAuditEvent) -> AuditResult<AuditEvent> {
        let mut tx = self.pool.begin().await?;

        let previous_event_hash = if self.chain_hashes {
            sqlx::query("SELECT event_hash FROM audit_events ORDER BY created_at DESC LIMIT 1")
                .fetch_optional(&mut *tx)
                .await?
                .map(|row| row.get::<String, _>("event_hash"))
        } else {
            None
        };

        let mut event = AuditEvent {
            id: Uuid::new_v4(),
            user_id: new_event.user_id,
            session_id: new_event.session_id,
            event_type: new_event.event_type,
            event_severity: new_event.event_severity,
            ip_address: new_event.ip_address,
            user_agent: new_event.user_agent,
            resource: new_event.resource,
            action: new_event.action,
            result: new_event.result,
            metadata: new_event.metadata,
            risk_indicators: new_event.risk_indicators,
            event_hash: String::new(),
            previous_event_hash: previous_event_hash.clone(),
            created_at: Utc::now(),
        };
        event.event_hash = compute_event_hash(&event, previous_event_hash.as_deref());

        sqlx::query(
            r#"INSERT INTO audit_events (
                id, user_id, session_id, event_type, event_severity,
                ip_address, user_agent, resource, action, result,
                metadata, risk_indicators, event_hash, previous_event_hash, created_at
            ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15)"#,
        )
        .bind(event.id)
        .bind(event.user_id)
        .bind(event.session_id)
        .bind(serde_json::to_string(&event.event_type).unwrap())
        .bind(serde_json::to_string(&event.event_severity).unwrap())
        .bind(&event.ip_address)
        .bind(&event.user_agent)
        .bind(&event.resource)
        .bind(&event.action)
        .bind(serde_json::to_string(&event.result).unwrap())
        .bind(&event.metadata)
        .bind(&event.risk_indicators)
        .bind(&event.event_hash)
        .bind(&event.previous_event_hash)
        .bind(event.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(event)
    }

    async fn by_user(&self, user_id: Uuid, limit: i64) -> AuditResult<Vec<AuditEvent>> {
        let rows = sqlx::query_as::<_, AuditEventRow>(
            "SELECT * FROM audit_events WHERE user_id = $1 ORDER BY created_at DESC LIMIT $2",
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(AuditEvent::from).collect())
    }

    async fn by_session(&self, session_id: Uuid, limit: i64) -> AuditResult<Vec<AuditEvent>> {
        let rows = sqlx::query_as::<_, AuditEventRow>(
            "SELECT * FROM audit_events WHERE session_id = $1 ORDER BY created_at DESC LIMIT $2",
        )
        .bind(session_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(AuditEvent::from).collect())
    }

    async fn by_type(&self, event_type: EventType, limit: i64) -> AuditResult<Vec<AuditEvent>> {
        let rows = sqlx::query_as::<_, AuditEventRow>(
            "SELECT * FROM audit_events WHERE event_type = $1 ORDER BY created_at DESC LIMIT $2",
        )
        .bind(serde_json::to_string(&event_type).unwrap())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(AuditEvent::from).collect())
    }

    async fn by_severity_window(
        &self,
        min_severity: EventSeverity,
        since: DateTime<Utc>,
        limit: i64,
    ) -> AuditResult<Vec<AuditEvent>> {
        // Severity has no natural SQL ordering without a custom type, so the
        // ordinal comparison is applied in-process after a time-bounded fetch.
        let rows = sqlx::query_as::<_, AuditEventRow>(
            "SELECT * FROM audit_events WHERE created_at >= $1 ORDER BY created_at DESC LIMIT $2",
        )
        .bind(since)
        .bind(limit.saturating_mul(4).max(limit))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(AuditEvent::from)
            .filter(|e| e.event_severity >= min_severity)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn recent(&self, limit: i64) -> AuditResult<Vec<AuditEvent>> {
        let rows = sqlx::query_as::<_, AuditEventRow>(
            "SELECT * FROM audit_events ORDER BY created_at DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(AuditEvent::from).collect())
    }
}

/// Row shape matching the `audit_events` table; `event_type`/`event_severity`/
/// `result` are stored as their serde-serialized strings (quoted JSON, e.g.
/// `"user_login"`) rather than a Postgres enum, so adding a variant never
/// needs a migration.
#[derive(sqlx::FromRow)]
struct AuditEventRow {
    id: Uuid,
    user_id: Option<Uuid>,
    session_id: Option<Uuid>,
    event_type: String,
    event_severity: String,
    ip_address: Option<String>,
    user_agent: Option<String>,
    resource: Option<String>,
    action: Option<String>,
    result: String,
    metadata: serde_json::Value,
    risk_indicators: serde_json::Value,
    event_hash: String,
    previous_event_hash: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<AuditEventRow> for AuditEvent {
    fn from(row: AuditEventRow) -> Self {
        AuditEvent {
            id: row.id,
            user_id: row.user_id,
            session_id: row.session_id,
            event_type: serde_json::from_str(&row.event_type).expect("valid event_type column"),
            event_severity: serde_json::from_str(&row.event_severity)
                .expect("valid event_severity column"),
            ip_address: row.ip_address,
            user_agent: row.user_agent,
            resource: row.resource,
            action: row.action,
            result: serde_json::from_str(&row.result).expect("valid result column"),
            metadata: row.metadata,
            risk_indicators: row.risk_indicators,
            event_hash: row.event_hash,
            previous_event_hash: row.previous_event_hash,
            created_at: row.created_at,
        }
    }
}
