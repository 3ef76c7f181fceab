use thiserror::Error;

pub type KeyManagerResult<T> = Result<T, KeyManagerError>;

#[derive(Debug, Error)]
pub enum KeyManagerError {
    #[error("no active signing key is available")]
    NoActiveKey,
    #[error("no decoding key registered for kid '{0}'")]
    UnknownKey(String),
    #[error("failed to generate RSA key pair: {0}")]
    Generate(String),
    #[error("failed to persist key pair '{0}': {1}")]
    Persist(String, String),
    #[error("failed to load key store from disk: {0}")]
    Load(String),
}
