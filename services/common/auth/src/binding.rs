use sha2::{Digest, Sha256};

/// First 16 hex chars of SHA-256, used to bind an access/privileged token to
/// the IP and user-agent it was issued under without storing either in
/// plaintext in the token itself.
pub fn truncated_hash(value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..8])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingOutcome {
    Ok,
    /// Soft binding mismatched; caller should count this as a risk signal
    /// but must not reject the token.
    SoftMismatch,
    /// Strict binding mismatched; caller must reject with `BindingMismatch`.
    StrictMismatch,
}

pub struct BindingContext<'a> {
    pub ip: Option<&'a str>,
    pub user_agent: Option<&'a str>,
}

pub fn check_binding(
    level: crate::claims::BindingLevel,
    token_ip_hash: Option<&str>,
    token_ua_hash: Option<&str>,
    context: Option<&BindingContext<'_>>,
) -> BindingOutcome {
    use crate::claims::BindingLevel;

    if level == BindingLevel::Disabled {
        return BindingOutcome::Ok;
    }
    let Some(context) = context else {
        return BindingOutcome::Ok;
    };

    let ip_matches = match (token_ip_hash, context.ip) {
        (Some(expected), Some(actual)) => expected == truncated_hash(actual),
        _ => true,
    };
    let ua_matches = match (token_ua_hash, context.user_agent) {
        (Some(expected), Some(actual)) => expected == truncated_hash(actual),
        _ => true,
    };

    if ip_matches && ua_matches {
        return BindingOutcome::Ok;
    }

    match level {
        BindingLevel::Strict => BindingOutcome::StrictMismatch,
        BindingLevel::Soft => BindingOutcome::SoftMismatch,
        BindingLevel::Disabled => BindingOutcome::Ok,
    }
}
