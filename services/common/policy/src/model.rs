use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionType {
    TimeWindow,
    IpRange,
    RiskScore,
    UserAttribute,
    Geolocation,
    DeviceFingerprint,
    SecurityLevel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Lt,
    Gte,
    Lte,
    In,
    NotIn,
    Contains,
    NotContains,
    Between,
    RegexMatch,
}

/// A condition's operand, kept as its native type rather than a string that
/// gets reparsed on every evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConditionValue {
    Text(String),
    Number(f64),
    Json(serde_json::Value),
}

impl ConditionValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ConditionValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            ConditionValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_string_list(&self) -> Vec<String> {
        match self {
            ConditionValue::Json(serde_json::Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            ConditionValue::Text(s) => s.split(',').map(|v| v.trim().to_string()).collect(),
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    pub condition_type: ConditionType,
    pub condition_key: Option<String>,
    pub operator: Operator,
    pub value: ConditionValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Effect {
    Allow,
    Deny,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionRule {
    pub id: Uuid,
    pub resource: String,
    pub action: String,
    pub conditions: Vec<Condition>,
    pub priority: i32,
    pub effect: Effect,
}

/// Everything the permission and risk engines need about the requester and
/// the current request to evaluate rules and score risk.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub user_id: Uuid,
    pub resource: String,
    pub action: String,
    pub client_ip: Option<String>,
    pub country: Option<String>,
    pub security_level: i32,
    pub device_fingerprint: Option<String>,
    pub known_device_fingerprints: Vec<String>,
    pub user_attributes: HashMap<String, String>,
    pub risk_score: Option<i32>,
}
