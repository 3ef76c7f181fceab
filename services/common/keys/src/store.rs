use std::collections::HashMap;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::{KeyManagerError, KeyManagerResult};
use crate::model::{KeyIndexEntry, KeyPair};

/// Filesystem-backed persistence for key pairs: one file per key (0600) plus a
/// summary `index.json` (0644).
#[derive(Debug, Clone)]
pub struct FileKeyStore {
    dir: PathBuf,
}

impl FileKeyStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn key_path(&self, key_id: &str) -> PathBuf {
        self.dir.join(format!("{key_id}.json"))
    }

    fn index_path(&self) -> PathBuf {
        self.dir.join("index.json")
    }

    pub fn ensure_dir(&self) -> KeyManagerResult<()> {
        fs::create_dir_all(&self.dir)
            .map_err(|err| KeyManagerError::Load(format!("create {:?}: {err}", self.dir)))
    }

    /// Load every key file found in the directory. Corrupt individual files are
    /// skipped with a warning rather than failing the whole load.
    pub fn load_all(&self) -> KeyManagerResult<Vec<KeyPair>> {
        self.ensure_dir()?;
        let mut keys = Vec::new();
        let entries = fs::read_dir(&self.dir)
            .map_err(|err| KeyManagerError::Load(format!("read_dir {:?}: {err}", self.dir)))?;

        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!(?err, "failed to read key-store directory entry");
                    continue;
                }
            };
            let path = entry.path();
            if path.file_name().and_then(|n| n.to_str()) == Some("index.json") {
                continue;
            }
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match fs::read_to_string(&path) {
                Ok(contents) => match serde_json::from_str::<KeyPair>(&contents) {
                    Ok(key) => keys.push(key),
                    Err(err) => warn!(?path, ?err, "skipping unparseable key file"),
                },
                Err(err) => warn!(?path, ?err, "failed to read key file"),
            }
        }

        Ok(keys)
    }

    pub fn persist(&self, key: &KeyPair) -> KeyManagerResult<()> {
        self.ensure_dir()?;
        let path = self.key_path(&key.key_id);
        let contents = serde_json::to_vec_pretty(key)
            .map_err(|err| KeyManagerError::Persist(key.key_id.clone(), err.to_string()))?;
        fs::write(&path, contents)
            .map_err(|err| KeyManagerError::Persist(key.key_id.clone(), err.to_string()))?;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o600))
            .map_err(|err| KeyManagerError::Persist(key.key_id.clone(), err.to_string()))?;
        Ok(())
    }

    pub fn remove(&self, key_id: &str) -> KeyManagerResult<()> {
        let path = self.key_path(key_id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(KeyManagerError::Persist(key_id.to_string(), err.to_string())),
        }
    }

    pub fn write_index(&self, keys: &HashMap<String, KeyPair>) -> KeyManagerResult<()> {
        self.ensure_dir()?;
        let entries: Vec<KeyIndexEntry> = keys
            .values()
            .map(|key| KeyIndexEntry {
                key_id: key.key_id.clone(),
                algorithm: key.algorithm,
                created_at: key.created_at,
                expires_at: key.expires_at,
                is_active: key.is_active,
                last_used: None,
            })
            .collect();
        let contents = serde_json::to_vec_pretty(&entries)
            .map_err(|err| KeyManagerError::Load(format!("serialize index: {err}")))?;
        let path = self.index_path();
        fs::write(&path, contents)
            .map_err(|err| KeyManagerError::Load(format!("write index: {err}")))?;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644))
            .map_err(|err| KeyManagerError::Load(format!("chmod index: {err}")))?;
        Ok(())
    }
}
