pub mod error;
pub mod model;
pub mod pdp;
pub mod permission;
pub mod risk;

pub use error::{PolicyError, PolicyResult};
pub use model::{Condition, ConditionType, ConditionValue, Effect, Operator, PermissionRule, RequestContext};
pub use pdp::{Advice, Decision, Obligation, PolicyDecisionPoint};
pub use permission::{PermissionDecision, PermissionEngine, PermissionRepository};
pub use risk::{RiskEngine, RiskInput, RiskLevel, RiskScore};
