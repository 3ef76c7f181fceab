use thiserror::Error;

pub type TokenResult<T> = Result<T, TokenError>;

/// Failure modes specific to signing/verifying tokens. Kept narrow and
/// internal: the wire-facing error kinds these collapse into live in
/// `common-http-errors`, which never reveals which of these actually fired.
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token missing kid header")]
    MissingKeyId,
    #[error("failed to decode token header: {0}")]
    InvalidHeader(String),
    #[error("no active signing key available")]
    NoActiveKey,
    #[error("no decoding key registered for kid '{0}'")]
    UnknownKeyId(String),
    #[error("token signature or claim verification failed: {0}")]
    Verification(String),
    #[error("token has expired")]
    Expired,
    #[error("token type mismatch: expected {expected}, found {found}")]
    WrongType { expected: &'static str, found: String },
    #[error("ip/user-agent binding mismatch")]
    BindingMismatch,
    #[error("failed to parse signing key: {0}")]
    KeyParse(String),
}

impl From<common_keys::KeyManagerError> for TokenError {
    fn from(value: common_keys::KeyManagerError) -> Self {
        match value {
            common_keys::KeyManagerError::NoActiveKey => TokenError::NoActiveKey,
            common_keys::KeyManagerError::UnknownKey(kid) => TokenError::UnknownKeyId(kid),
            other => TokenError::KeyParse(other.to_string()),
        }
    }
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(value: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;
        match value.kind() {
            ErrorKind::ExpiredSignature => TokenError::Expired,
            _ => TokenError::Verification(value.to_string()),
        }
    }
}
