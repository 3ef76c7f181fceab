use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
    Privileged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindingLevel {
    Strict,
    Soft,
    Disabled,
}

/// Access and privileged tokens share this shape; privileged tokens add
/// `scopes`/`ttl` and always bind strictly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    #[serde(rename = "userId")]
    pub user_id: Uuid,
    pub email: String,
    pub name: String,
    pub sid: Uuid,
    pub jti: Uuid,
    #[serde(rename = "ipHash", skip_serializing_if = "Option::is_none")]
    pub ip_hash: Option<String>,
    #[serde(rename = "uaHash", skip_serializing_if = "Option::is_none")]
    pub ua_hash: Option<String>,
    #[serde(rename = "bindingLevel")]
    pub binding_level: BindingLevel,
    #[serde(rename = "type")]
    pub token_type: TokenType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scopes: Option<BTreeSet<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl: Option<i64>,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
    pub aud: String,
}

/// Carries only the `type` discriminant, present on every token variant;
/// decoding this first lets a verifier reject a wrong-typed token before
/// attempting to deserialize fields that variant doesn't have.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenTypeTag {
    #[serde(rename = "type")]
    pub token_type: TokenType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshClaims {
    #[serde(rename = "userId")]
    pub user_id: Uuid,
    pub sid: Uuid,
    pub jti: Uuid,
    #[serde(rename = "tokenFamily")]
    pub token_family: Uuid,
    #[serde(rename = "type")]
    pub token_type: TokenType,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
    pub aud: String,
}
