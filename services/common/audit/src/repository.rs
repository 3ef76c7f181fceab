use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::model::{AuditEvent, EventSeverity, EventType, NewAuditEvent};
use crate::AuditResult;

/// Storage contract for the append-only audit log. Implementations must
/// never mutate a persisted event; `append` is the only write operation.
#[async_trait]
pub trait AuditRepository: Send + Sync {
    /// Persists `event`, computing `event_hash`/`previous_event_hash` from
    /// the latest stored event when hash chaining is enabled. Returns the
    /// fully populated event as written.
    async fn append(&self, event: NewAuditEvent) -> AuditResult<AuditEvent>;

    async fn by_user(&self, user_id: Uuid, limit: i64) -> AuditResult<Vec<AuditEvent>>;

    async fn by_session(&self, session_id: Uuid, limit: i64) -> AuditResult<Vec<AuditEvent>>;

    async fn by_type(&self, event_type: EventType, limit: i64) -> AuditResult<Vec<AuditEvent>>;

    /// Events at or above `min_severity` created within the last `since`..now window.
    async fn by_severity_window(
        &self,
        min_severity: EventSeverity,
        since: DateTime<Utc>,
        limit: i64,
    ) -> AuditResult<Vec<AuditEvent>>;

    async fn recent(&self, limit: i64) -> AuditResult<Vec<AuditEvent>>;
}
