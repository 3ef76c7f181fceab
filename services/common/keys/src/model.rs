use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Signing algorithm for an RSA key pair. PS256 is preferred for newly minted keys;
/// the others are accepted for verification so rotated-out or imported keys still work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyAlgorithm {
    Ps256,
    Ps384,
    Ps512,
    Rs256,
    Rs384,
    Rs512,
}

impl KeyAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyAlgorithm::Ps256 => "PS256",
            KeyAlgorithm::Ps384 => "PS384",
            KeyAlgorithm::Ps512 => "PS512",
            KeyAlgorithm::Rs256 => "RS256",
            KeyAlgorithm::Rs384 => "RS384",
            KeyAlgorithm::Rs512 => "RS512",
        }
    }
}

/// A single RSA key pair under management, with the lifecycle metadata the spec requires.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyPair {
    pub key_id: String,
    pub algorithm: KeyAlgorithm,
    pub public_key_pem: String,
    pub private_key_pem: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub grace_period_until: Option<DateTime<Utc>>,
}

/// Summary row persisted in `index.json`, one per key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyIndexEntry {
    pub key_id: String,
    pub algorithm: KeyAlgorithm,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub last_used: Option<DateTime<Utc>>,
}

/// The four lifecycle states a key pair can be observed in at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyLifecycleState {
    Active,
    Grace,
    RestartTolerant,
    Expired,
}

/// The hard grace window after `expires_at` during which a key is still retained
/// on disk (but refused for signing/verification) before the cleanup sweep purges it.
pub const HARD_GRACE: Duration = Duration::days(7);

impl KeyPair {
    pub fn lifecycle_state(&self, now: DateTime<Utc>) -> KeyLifecycleState {
        if let Some(expires_at) = self.expires_at {
            if expires_at <= now {
                return KeyLifecycleState::Expired;
            }
        }
        if self.is_active {
            return KeyLifecycleState::Active;
        }
        if let Some(grace_until) = self.grace_period_until {
            if grace_until > now {
                return KeyLifecycleState::Grace;
            }
        }
        KeyLifecycleState::RestartTolerant
    }

    pub fn is_verifiable(&self, now: DateTime<Utc>) -> bool {
        !matches!(self.lifecycle_state(now), KeyLifecycleState::Expired)
    }

    pub fn eligible_for_purge(&self, now: DateTime<Utc>) -> bool {
        if self.is_active {
            return false;
        }
        let grace_elapsed = self
            .grace_period_until
            .map(|until| until <= now)
            .unwrap_or(true);
        if !grace_elapsed {
            return false;
        }
        match self.expires_at {
            Some(expires_at) => expires_at + HARD_GRACE < now,
            None => false,
        }
    }
}
