use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::model::{compute_event_hash, AuditEvent, EventSeverity, EventType, NewAuditEvent};
use crate::repository::AuditRepository;
use crate::AuditResult;

/// In-memory audit log for unit tests; chains hashes the same way
/// [`crate::pg::PgAuditLog`] does.
pub struct InMemoryAuditLog {
    chain_hashes: bool,
    events: RwLock<Vec<AuditEvent>>,
}

impl InMemoryAuditLog {
    pub fn new(chain_hashes: bool) -> Self {
        Self {
            chain_hashes,
            events: RwLock::new(Vec::new()),
        }
    }
}

impl Default for InMemoryAuditLog {
    fn default() -> Self {
        Self::new(true)
    }
}

#[async_trait]
impl AuditRepository for InMemoryAuditLog {
    async fn append(&self, new_event: NewAuditEvent) -> AuditResult<AuditEvent> {
        let mut events = self.events.write().await;
        let previous_event_hash = if self.chain_hashes {
            events.last().map(|e| e.event_hash.clone())
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

        events.push(event.clone());
        Ok(event)
    }

    async fn by_user(&self, user_id: Uuid, limit: i64) -> AuditResult<Vec<AuditEvent>> {
        let events = self.events.read().await;
        Ok(events
            .iter()
            .rev()
            .filter(|e| e.user_id == Some(user_id))
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn by_session(&self, session_id: Uuid, limit: i64) -> AuditResult<Vec<AuditEvent>> {
        let events = self.events.read().await;
        Ok(events
            .iter()
            .rev()
            .filter(|e| e.session_id == Some(session_id))
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn by_type(&self, event_type: EventType, limit: i64) -> AuditResult<Vec<AuditEvent>> {
        let events = self.events.read().await;
        Ok(events
            .iter()
            .rev()
            .filter(|e| e.event_type == event_type)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn by_severity_window(
        &self,
        min_severity: EventSeverity,
        since: DateTime<Utc>,
        limit: i64,
    ) -> AuditResult<Vec<AuditEvent>> {
        let events = self.events.read().await;
        Ok(events
            .iter()
            .rev()
            .filter(|e| e.event_severity >= min_severity && e.created_at >= since)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn recent(&self, limit: i64) -> AuditResult<Vec<AuditEvent>> {
        let events = self.events.read().await;
        Ok(events
            .iter()
            .rev()
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EventResult;

    #[tokio::test]
    async fn chains_hashes_across_appends() {
        let log = InMemoryAuditLog::new(true);
        let first = log
            .append(NewAuditEvent::new(
                EventType::UserLogin,
                EventSeverity::Info,
                EventResult::Success,
            ))
            .await
            .unwrap();
        assert!(first.previous_event_hash.is_none());

        let second = log
            .append(NewAuditEvent::new(
                EventType::TokenRefresh,
                EventSeverity::Info,
                EventResult::Success,
            ))
            .await
            .unwrap();
        assert_eq!(second.previous_event_hash.as_deref(), Some(first.event_hash.as_str()));
    }

    #[tokio::test]
    async fn filters_by_severity_window() {
        let log = InMemoryAuditLog::default();
        log.append(NewAuditEvent::new(
            EventType::SuspiciousActivity,
            EventSeverity::Critical,
            EventResult::Denied,
        ))
        .await
        .unwrap();
        log.append(NewAuditEvent::new(
            EventType::UserLogin,
            EventSeverity::Info,
            EventResult::Success,
        ))
        .await
        .unwrap();

        let since = Utc::now() - chrono::Duration::hours(1);
        let critical = log
            .by_severity_window(EventSeverity::Warning, since, 10)
            .await
            .unwrap();
        assert_eq!(critical.len(), 1);
        assert_eq!(critical[0].event_type, EventType::SuspiciousActivity);
    }
}
