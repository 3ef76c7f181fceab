pub mod binding;
pub mod claims;
pub mod config;
pub mod error;
pub mod password;
pub mod token_service;

pub use binding::{check_binding, truncated_hash, BindingContext, BindingOutcome};
pub use claims::{AccessClaims, BindingLevel, RefreshClaims, TokenType};
pub use config::TokenConfig;
pub use error::{TokenError, TokenResult};
pub use password::{hash_password, verify_password, PASSWORD_HASH_COST};
pub use token_service::{
    AccessTokenSubject, IssuedAccessToken, IssuedRefreshToken, TokenService,
};
