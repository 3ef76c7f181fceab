use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::{DateTime, Duration, Utc};
use rand_core::OsRng;
use rsa::pkcs1::EncodeRsaPublicKey;
use rsa::pkcs8::EncodePrivateKey;
use rsa::RsaPrivateKey;
use tokio::sync::watch;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::error::{KeyManagerError, KeyManagerResult};
use crate::jwks::{jwk_from_key_pair, JwkSet};
use crate::model::{KeyAlgorithm, KeyLifecycleState, KeyPair};
use crate::store::FileKeyStore;

const FRESH_KEY_TTL_DAYS: i64 = 90;
const FALLBACK_KEY_TTL_DAYS: i64 = 30;
const DEFAULT_GRACE_HOURS: i64 = 24;
const RSA_KEY_BITS: usize = 2048;

#[derive(Debug, Clone)]
pub struct KeyManagerConfig {
    pub key_store_dir: PathBuf,
    pub grace_window: Duration,
}

impl KeyManagerConfig {
    pub fn from_env() -> Self {
        let key_store_dir = std::env::var("KEY_STORE_DIR")
            .unwrap_or_else(|_| "./data/keys".to_string())
            .into();
        let grace_hours = std::env::var("KEY_GRACE_HOURS")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(DEFAULT_GRACE_HOURS);
        Self {
            key_store_dir,
            grace_window: Duration::hours(grace_hours),
        }
    }
}

/// Signals key-manager readiness: callers can await readiness instead of
/// racing the background disk load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyManagerState {
    Loading,
    Ready,
    Degraded(String),
}

#[derive(Debug, Clone, Default)]
struct KeyIndex {
    keys: HashMap<String, KeyPair>,
    active_kid: Option<String>,
}

pub struct SigningKey {
    pub key_id: String,
    pub algorithm: KeyAlgorithm,
    pub private_key_pem: String,
}

pub struct VerificationKey {
    pub algorithm: KeyAlgorithm,
    pub public_key_pem: String,
}

pub struct KeyManager {
    store: FileKeyStore,
    config: KeyManagerConfig,
    index: ArcSwap<KeyIndex>,
    state_tx: watch::Sender<KeyManagerState>,
}

impl KeyManager {
    /// Starts the manager with a minimal in-memory state immediately, then loads
    /// keys from disk in the background. Callers may start serving requests right
    /// away and use [`KeyManager::ready`] to observe when loading has completed.
    pub fn spawn(config: KeyManagerConfig) -> Arc<Self> {
        let (state_tx, _) = watch::channel(KeyManagerState::Loading);
        let manager = Arc::new(Self {
            store: FileKeyStore::new(config.key_store_dir.clone()),
            config,
            index: ArcSwap::from_pointee(KeyIndex::default()),
            state_tx,
        });

        let background = manager.clone();
        tokio::spawn(async move {
            background.initial_load().await;
        });

        manager
    }

    pub fn ready(&self) -> watch::Receiver<KeyManagerState> {
        self.state_tx.subscribe()
    }

    pub async fn wait_until_ready(&self) {
        let mut rx = self.ready();
        loop {
            if !matches!(*rx.borrow(), KeyManagerState::Loading) {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    #[instrument(skip(self))]
    async fn initial_load(&self) {
        let store = self.store.clone();
        let loaded = tokio::task::spawn_blocking(move || store.load_all())
            .await
            .unwrap_or_else(|err| Err(KeyManagerError::Load(err.to_string())));

        let mut keys: HashMap<String, KeyPair> = match loaded {
            Ok(list) => list.into_iter().map(|k| (k.key_id.clone(), k)).collect(),
            Err(err) => {
                warn!(?err, "failed to load key store from disk, starting empty");
                HashMap::new()
            }
        };

        let now = Utc::now();
        let active_kid = self.select_active_key(&mut keys, now);

        match &active_kid {
            Some(kid) => info!(kid = %kid, "key manager ready with active signing key"),
            None => error!("key manager has no active signing key after initialization"),
        }

        if let Err(err) = self.store.write_index(&keys) {
            warn!(?err, "failed to write key index after initial load");
        }

        self.index.store(Arc::new(KeyIndex { keys, active_kid }));

        let state = if self.index.load().active_kid.is_some() {
            KeyManagerState::Ready
        } else {
            KeyManagerState::Degraded("no active signing key".to_string())
        };
        let _ = self.state_tx.send(state);
    }

    /// Prefer an existing active key, then reactivate the newest eligible
    /// key, then generate a fresh one, then fall back to a degraded fresh
    /// key as a last resort.
    fn select_active_key(&self, keys: &mut HashMap<String, KeyPair>, now: DateTime<Utc>) -> Option<String> {
        let mut active_candidates: Vec<&KeyPair> = keys
            .values()
            .filter(|k| k.is_active && k.lifecycle_state(now) != KeyLifecycleState::Expired)
            .collect();
        active_candidates.sort_by(|a, b| {
            let a_ps256 = a.algorithm == KeyAlgorithm::Ps256;
            let b_ps256 = b.algorithm == KeyAlgorithm::Ps256;
            b_ps256.cmp(&a_ps256).then(b.created_at.cmp(&a.created_at))
        });
        if let Some(key) = active_candidates.first() {
            return Some(key.key_id.clone());
        }

        let mut reactivation_candidates: Vec<&KeyPair> = keys
            .values()
            .filter(|k| {
                !k.is_active
                    && k.grace_period_until.is_none()
                    && matches!(
                        k.lifecycle_state(now),
                        KeyLifecycleState::RestartTolerant
                    )
            })
            .collect();
        reactivation_candidates.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(key) = reactivation_candidates.first() {
            let kid = key.key_id.clone();
            if let Some(key) = keys.get_mut(&kid) {
                key.is_active = true;
                if let Err(err) = self.store.persist(key) {
                    warn!(?err, kid = %kid, "failed to persist reactivated key");
                }
            }
            return Some(kid);
        }

        match self.generate_key_pair(KeyAlgorithm::Ps256, Duration::days(FRESH_KEY_TTL_DAYS)) {
            Ok(key) => {
                let kid = key.key_id.clone();
                if let Err(err) = self.store.persist(&key) {
                    error!(?err, "failed to persist freshly generated key");
                    return None;
                }
                keys.insert(kid.clone(), key);
                Some(kid)
            }
            Err(err) => {
                error!(?err, "failed to generate fresh signing key, attempting degraded fallback");
                match self.generate_key_pair(KeyAlgorithm::Ps256, Duration::days(FALLBACK_KEY_TTL_DAYS)) {
                    Ok(key) => {
                        warn!(kid = %key.key_id, "operating with a degraded fallback signing key");
                        let kid = key.key_id.clone();
                        if self.store.persist(&key).is_err() {
                            return None;
                        }
                        keys.insert(kid.clone(), key);
                        Some(kid)
                    }
                    Err(err) => {
                        error!(?err, "fallback key generation also failed; no active signing key");
                        None
                    }
                }
            }
        }
    }

    fn generate_key_pair(&self, algorithm: KeyAlgorithm, ttl: Duration) -> KeyManagerResult<KeyPair> {
        let mut rng = OsRng;
        let private = RsaPrivateKey::new(&mut rng, RSA_KEY_BITS)
            .map_err(|err| KeyManagerError::Generate(err.to_string()))?;
        let public = private.to_public_key();

        let private_pem = private
            .to_pkcs8_pem(rsa::pkcs8::LineEnding::LF)
            .map_err(|err| KeyManagerError::Generate(err.to_string()))?
            .to_string();
        let public_pem = public
            .to_pkcs1_pem(rsa::pkcs1::LineEnding::LF)
            .map_err(|err| KeyManagerError::Generate(err.to_string()))?;

        let now = Utc::now();
        Ok(KeyPair {
            key_id: format!("key_{}", Uuid::new_v4().simple()),
            algorithm,
            public_key_pem: public_pem,
            private_key_pem: private_pem,
            created_at: now,
            expires_at: Some(now + ttl),
            is_active: true,
            grace_period_until: None,
        })
    }

    pub fn active_key(&self) -> KeyManagerResult<SigningKey> {
        let index = self.index.load();
        let kid = index.active_kid.as_ref().ok_or(KeyManagerError::NoActiveKey)?;
        let key = index.keys.get(kid).ok_or(KeyManagerError::NoActiveKey)?;
        Ok(SigningKey {
            key_id: key.key_id.clone(),
            algorithm: key.algorithm,
            private_key_pem: key.private_key_pem.clone(),
        })
    }

    pub fn verification_key(&self, key_id: &str) -> KeyManagerResult<VerificationKey> {
        let index = self.index.load();
        let key = index
            .keys
            .get(key_id)
            .ok_or_else(|| KeyManagerError::UnknownKey(key_id.to_string()))?;
        if !key.is_verifiable(Utc::now()) {
            return Err(KeyManagerError::UnknownKey(key_id.to_string()));
        }
        Ok(VerificationKey {
            algorithm: key.algorithm,
            public_key_pem: key.public_key_pem.clone(),
        })
    }

    pub fn jwks(&self) -> JwkSet {
        let index = self.index.load();
        let now = Utc::now();
        let mut keys = Vec::new();
        for key in index.keys.values() {
            if key.is_verifiable(now) {
                match jwk_from_key_pair(key) {
                    Ok(jwk) => keys.push(jwk),
                    Err(err) => warn!(?err, kid = %key.key_id, "failed to build JWK for key"),
                }
            }
        }
        JwkSet { keys }
    }

    /// Generates a new active key, demotes the previous active key into its
    /// grace window, and persists both. No in-flight verification fails because
    /// the old key keeps verifying until `grace_period_until`.
    #[instrument(skip(self))]
    pub async fn rotate(&self) -> KeyManagerResult<String> {
        let new_key = self.generate_key_pair(KeyAlgorithm::Ps256, Duration::days(FRESH_KEY_TTL_DAYS))?;
        let new_kid = new_key.key_id.clone();

        let mut keys = (*self.index.load_full()).keys.clone();
        let prior_active_kid = (*self.index.load_full()).active_kid.clone();

        self.store.persist(&new_key)?;
        keys.insert(new_kid.clone(), new_key);

        if let Some(prior_kid) = &prior_active_kid {
            if let Some(prior) = keys.get_mut(prior_kid) {
                prior.is_active = false;
                prior.grace_period_until = Some(Utc::now() + self.config.grace_window);
                self.store.persist(prior)?;
            }
        }

        if let Err(err) = self.store.write_index(&keys) {
            warn!(?err, "failed to refresh key index after rotation");
        }

        self.index.store(Arc::new(KeyIndex {
            keys,
            active_kid: Some(new_kid.clone()),
        }));

        info!(new_kid = %new_kid, prior_kid = ?prior_active_kid, "rotated signing key");
        Ok(new_kid)
    }

    /// Periodic sweep: purges keys past their hard grace and clears elapsed
    /// grace windows.
    #[instrument(skip(self))]
    pub async fn cleanup_sweep(&self) -> usize {
        let now = Utc::now();
        let mut keys = (*self.index.load_full()).keys.clone();
        let active_kid = (*self.index.load_full()).active_kid.clone();

        let purge_ids: Vec<String> = keys
            .values()
            .filter(|k| k.eligible_for_purge(now))
            .map(|k| k.key_id.clone())
            .collect();

        for kid in &purge_ids {
            keys.remove(kid);
            if let Err(err) = self.store.remove(kid) {
                warn!(?err, kid = %kid, "failed to remove expired key file");
            }
        }

        let mut grace_cleared = 0;
        for key in keys.values_mut() {
            if !key.is_active {
                if let Some(until) = key.grace_period_until {
                    if until <= now {
                        key.grace_period_until = None;
                        grace_cleared += 1;
                        if let Err(err) = self.store.persist(key) {
                            warn!(?err, kid = %key.key_id, "failed to persist cleared grace state");
                        }
                    }
                }
            }
        }

        if let Err(err) = self.store.write_index(&keys) {
            warn!(?err, "failed to refresh key index after cleanup sweep");
        }

        let purged = purge_ids.len();
        self.index.store(Arc::new(KeyIndex { keys, active_kid }));

        if purged > 0 || grace_cleared > 0 {
            info!(purged, grace_cleared, "key cleanup sweep completed");
        }
        purged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(dir: &tempfile::TempDir) -> KeyManagerConfig {
        KeyManagerConfig {
            key_store_dir: dir.path().to_path_buf(),
            grace_window: Duration::hours(1),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn spawns_with_no_keys_and_generates_one() {
        let dir = tempfile::tempdir().unwrap();
        let manager = KeyManager::spawn(test_config(&dir));
        manager.wait_until_ready().await;

        let signing = manager.active_key().expect("should have generated an active key");
        assert_eq!(signing.algorithm, KeyAlgorithm::Ps256);

        let verification = manager
            .verification_key(&signing.key_id)
            .expect("active key must verify");
        assert_eq!(verification.algorithm, KeyAlgorithm::Ps256);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn rotate_demotes_prior_key_into_grace() {
        let dir = tempfile::tempdir().unwrap();
        let manager = KeyManager::spawn(test_config(&dir));
        manager.wait_until_ready().await;

        let first = manager.active_key().unwrap().key_id;
        let second = manager.rotate().await.unwrap();
        assert_ne!(first, second);

        assert_eq!(manager.active_key().unwrap().key_id, second);
        manager
            .verification_key(&first)
            .expect("prior active key must still verify during its grace window");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unknown_key_id_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let manager = KeyManager::spawn(test_config(&dir));
        manager.wait_until_ready().await;

        let err = manager.verification_key("key_does_not_exist").unwrap_err();
        assert!(matches!(err, KeyManagerError::UnknownKey(_)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cleanup_sweep_purges_only_past_hard_grace() {
        let dir = tempfile::tempdir().unwrap();
        let manager = KeyManager::spawn(test_config(&dir));
        manager.wait_until_ready().await;

        let first = manager.active_key().unwrap().key_id;
        manager.rotate().await.unwrap();

        // Grace window (1h) has not elapsed yet, so nothing is purge-eligible.
        let purged = manager.cleanup_sweep().await;
        assert_eq!(purged, 0);
        manager.verification_key(&first).expect("still within grace");
    }
}
