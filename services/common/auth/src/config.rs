/// Runtime configuration for signing and verifying tokens. Mirrors the
/// closed set of `JWT_*` environment variables the core recognizes.
#[derive(Debug, Clone)]
pub struct TokenConfig {
    pub issuer: String,
    pub audience: String,
    pub access_ttl_seconds: i64,
    pub refresh_ttl_seconds: i64,
    pub privileged_ttl_seconds: i64,
    pub clock_skew_seconds: i64,
    /// Shared secret accepted for legacy HS256 verification during a
    /// documented transition window. Never used for signing new tokens.
    pub legacy_hs256_secret: Option<String>,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            issuer: "auth-core".to_string(),
            audience: "auth-core-clients".to_string(),
            access_ttl_seconds: 15 * 60,
            refresh_ttl_seconds: 7 * 24 * 60 * 60,
            privileged_ttl_seconds: 5 * 60,
            clock_skew_seconds: 60,
            legacy_hs256_secret: None,
        }
    }
}

impl TokenConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            issuer: std::env::var("JWT_ISSUER").unwrap_or(defaults.issuer),
            audience: std::env::var("JWT_AUDIENCE").unwrap_or(defaults.audience),
            access_ttl_seconds: env_i64("JWT_ACCESS_TTL_SECONDS", defaults.access_ttl_seconds),
            refresh_ttl_seconds: env_i64("JWT_REFRESH_TTL_SECONDS", defaults.refresh_ttl_seconds),
            privileged_ttl_seconds: defaults.privileged_ttl_seconds,
            clock_skew_seconds: env_i64("JWT_CLOCK_SKEW_SECONDS", defaults.clock_skew_seconds),
            legacy_hs256_secret: std::env::var("JWT_SECRET").ok(),
        }
    }
}

fn env_i64(key: &str, default: i64) -> i64 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}
