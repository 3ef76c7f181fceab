use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

/// The closed set of security-relevant event types the audit log records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    UserLogin,
    UserLogout,
    UserRegister,
    PasswordChange,
    TokenRefresh,
    TokenRevoked,
    SessionCreated,
    SessionRevoked,
    PermissionDenied,
    StepUpRequired,
    StepUpCompleted,
    SuspiciousActivity,
    AccountLocked,
    AccountUnlocked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventResult {
    Success,
    Failure,
    Denied,
}

/// An append-only security event. Never mutated once written; `event_hash`
/// (and, when chaining is enabled, `previous_event_hash`) makes tampering
/// with the persisted log detectable, though verifying the chain on read is
/// left to an operator tool rather than the hot write/query path — the chain
/// is an optional tamper-evidence overlay, not the authoritative record
/// (see DESIGN.md).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub session_id: Option<Uuid>,
    pub event_type: EventType,
    pub event_severity: EventSeverity,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub resource: Option<String>,
    pub action: Option<String>,
    pub result: EventResult,
    pub metadata: serde_json::Value,
    pub risk_indicators: serde_json::Value,
    pub event_hash: String,
    pub previous_event_hash: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// The fields a caller supplies; the store fills in `id`, `created_at`, and
/// the hash-chain fields.
#[derive(Debug, Clone)]
pub struct NewAuditEvent {
    pub user_id: Option<Uuid>,
    pub session_id: Option<Uuid>,
    pub event_type: EventType,
    pub event_severity: EventSeverity,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub resource: Option<String>,
    pub action: Option<String>,
    pub result: EventResult,
    pub metadata: serde_json::Value,
    pub risk_indicators: serde_json::Value,
}

impl NewAuditEvent {
    pub fn new(event_type: EventType, severity: EventSeverity, result: EventResult) -> Self {
        Self {
            user_id: None,
            session_id: None,
            event_type,
            event_severity: severity,
            ip_address: None,
            user_agent: None,
            resource: None,
            action: None,
            result,
            metadata: serde_json::Value::Null,
            risk_indicators: serde_json::Value::Null,
        }
    }

    pub fn user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn session(mut self, session_id: Uuid) -> Self {
        self.session_id = Some(session_id);
        self
    }

    pub fn ip(mut self, ip: impl Into<String>) -> Self {
        self.ip_address = Some(sanitize_ip(&ip.into()));
        self
    }

    pub fn metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn risk_indicators(mut self, indicators: serde_json::Value) -> Self {
        self.risk_indicators = indicators;
        self
    }
}

/// Drops anything after the first whitespace (a caller accidentally
/// forwarding "ip, ua" or similar); the audit log stores a best-effort
/// client IP, not a validated session-binding value (see
/// `common_session::normalize_ip` for that stricter check).
fn sanitize_ip(raw: &str) -> String {
    raw.split_whitespace().next().unwrap_or("").to_string()
}

/// `H(serialize(fields \ hash fields) || previous_event_hash)`. Fields are
/// re-serialized through a `BTreeMap` so key order never affects the hash.
pub fn compute_event_hash(event: &AuditEvent, previous_event_hash: Option<&str>) -> String {
    let mut fields = BTreeMap::new();
    fields.insert("id", serde_json::to_value(event.id).unwrap());
    fields.insert("userId", serde_json::to_value(event.user_id).unwrap());
    fields.insert("sessionId", serde_json::to_value(event.session_id).unwrap());
    fields.insert("eventType", serde_json::to_value(event.event_type).unwrap());
    fields.insert(
        "eventSeverity",
        serde_json::to_value(event.event_severity).unwrap(),
    );
    fields.insert("ipAddress", serde_json::to_value(&event.ip_address).unwrap());
    fields.insert("userAgent", serde_json::to_value(&event.user_agent).unwrap());
    fields.insert("resource", serde_json::to_value(&event.resource).unwrap());
    fields.insert("action", serde_json::to_value(&event.action).unwrap());
    fields.insert("result", serde_json::to_value(event.result).unwrap());
    fields.insert("metadata", event.metadata.clone());
    fields.insert("riskIndicators", event.risk_indicators.clone());
    fields.insert("createdAt", serde_json::to_value(event.created_at).unwrap());

    let canonical = serde_json::to_vec(&fields).expect("BTreeMap of json values always serializes");

    let mut hasher = Sha256::new();
    hasher.update(&canonical);
    if let Some(previous) = previous_event_hash {
        hasher.update(previous.as_bytes());
    }
    hex::encode(hasher.finalize())
}

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type AuditResult<T> = Result<T, AuditError>;
