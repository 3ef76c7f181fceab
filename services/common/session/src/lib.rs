pub mod error;
pub mod memory;
pub mod model;
pub mod pg;
pub mod repository;

pub use error::{SessionError, SessionResult};
pub use memory::InMemorySessionStore;
pub use model::{normalize_ip, truncated_hash, NewSession, Session};
pub use pg::PgSessionStore;
pub use repository::SessionRepository;
