use std::net::IpAddr;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// A logged-in session, keyed by its own id and cross-indexed by the JTIs of
/// the tokens currently bound to it.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    pub access_token_jti: Uuid,
    pub refresh_token_jti: Uuid,
    pub ip_address: Option<String>,
    pub ip_hash: Option<String>,
    pub user_agent: Option<String>,
    pub user_agent_hash: Option<String>,
    pub device_fingerprint: Option<String>,
    pub geolocation: Option<String>,
    pub risk_score: i16,
    pub is_active: bool,
    pub last_activity_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revoked_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields needed to open a brand new session; everything else is derived or defaulted.
#[derive(Debug, Clone)]
pub struct NewSession {
    pub user_id: Uuid,
    pub access_token_jti: Uuid,
    pub refresh_token_jti: Uuid,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub device_fingerprint: Option<String>,
    pub geolocation: Option<String>,
    pub risk_score: i16,
    pub expires_at: DateTime<Utc>,
}

/// Rejects structurally invalid IP addresses: anything that is not a bare IPv4/IPv6
/// address or a valid CIDR notation is normalized to `None` rather than stored.
pub fn normalize_ip(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if IpAddr::from_str(trimmed).is_ok() {
        return Some(trimmed.to_string());
    }
    if IpNet::from_str(trimmed).is_ok() {
        return Some(trimmed.to_string());
    }
    None
}

/// First 16 hex chars of SHA-256, matching the truncated binding hash used by the token service.
pub fn truncated_hash(value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..8])
}
