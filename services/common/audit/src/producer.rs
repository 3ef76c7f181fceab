use std::sync::Arc;

use tracing::{instrument, warn};

use crate::model::{EventResult, EventSeverity, EventType, NewAuditEvent};
use crate::repository::AuditRepository;

/// Wraps an [`AuditRepository`] so that callers never have to reason about
/// audit persistence failing — an audit write that fails is logged and
/// swallowed rather than propagated, because the action being audited must
/// still complete regardless of whether its audit trail could be recorded.
#[derive(Clone)]
pub struct AuditProducer {
    repository: Arc<dyn AuditRepository>,
}

impl AuditProducer {
    pub fn new(repository: Arc<dyn AuditRepository>) -> Self {
        Self { repository }
    }

    /// Emits `event`, logging and discarding any storage error. Returns
    /// `true` on success so callers that care (rate-limiting suspicious
    /// activity, say) can observe it without having to match on a `Result`.
    #[instrument(skip(self, event), fields(event_type = ?event.event_type, event_severity = ?event.event_severity))]
    pub async fn emit(&self, event: NewAuditEvent) -> bool {
        match self.repository.append(event).await {
            Ok(_) => true,
            Err(err) => {
                warn!(error = %err, "failed to persist audit event");
                false
            }
        }
    }

    /// Convenience for the common case of a type/severity/result triple with
    /// no further detail attached.
    pub async fn emit_simple(
        &self,
        event_type: EventType,
        severity: EventSeverity,
        result: EventResult,
    ) -> bool {
        self.emit(NewAuditEvent::new(event_type, severity, result)).await
    }
}
