pub mod memory;
pub mod model;
pub mod pg;
pub mod producer;
pub mod repository;

pub use memory::InMemoryAuditLog;
pub use model::{
    compute_event_hash, AuditError, AuditEvent, AuditResult, EventResult, EventSeverity,
    EventType, NewAuditEvent,
};
pub use pg::PgAuditLog;
pub use producer::AuditProducer;
pub use repository::AuditRepository;
