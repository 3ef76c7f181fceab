use thiserror::Error;

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("failed to load permission rules: {0}")]
    RuleLoad(String),
    #[error("internal policy evaluation error: {0}")]
    Internal(String),
}

pub type PolicyResult<T> = Result<T, PolicyError>;
