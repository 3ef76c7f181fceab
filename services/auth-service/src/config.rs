use std::env;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use chrono::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CookieSameSite {
    Lax,
    Strict,
    None,
}

impl CookieSameSite {
    pub fn as_str(&self) -> &'static str {
        match self {
            CookieSameSite::Lax => "Lax",
            CookieSameSite::Strict => "Strict",
            CookieSameSite::None => "None",
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub key_store_dir: PathBuf,
    pub key_grace_hours: i64,
    pub refresh_cookie_name: String,
    pub refresh_cookie_domain: Option<String>,
    pub refresh_cookie_secure: bool,
    pub refresh_cookie_same_site: CookieSameSite,
}

impl AuthConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn key_grace_window(&self) -> Duration {
        Duration::hours(self.key_grace_hours)
    }
}

pub fn load_auth_config() -> Result<AuthConfig> {
    let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port = env::var("PORT")
        .ok()
        .map(|value| value.parse::<u16>())
        .transpose()
        .context("Failed to parse PORT")?
        .unwrap_or(8080);

    let database_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;

    let key_store_dir = env::var("KEY_STORE_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./keys"));
    let key_grace_hours = env::var("KEY_GRACE_HOURS")
        .ok()
        .map(|value| value.parse::<i64>())
        .transpose()
        .context("Failed to parse KEY_GRACE_HOURS")?
        .unwrap_or(24);

    let refresh_cookie_name =
        env::var("AUTH_REFRESH_COOKIE_NAME").unwrap_or_else(|_| "auth_refresh".to_string());
    let refresh_cookie_domain = env::var("AUTH_REFRESH_COOKIE_DOMAIN")
        .ok()
        .and_then(|value| normalize_optional(&value));
    let refresh_cookie_secure = bool_from_env("AUTH_REFRESH_COOKIE_SECURE").unwrap_or(false);
    let refresh_cookie_same_site = env::var("AUTH_REFRESH_COOKIE_SAMESITE")
        .ok()
        .map(|value| parse_same_site(&value))
        .transpose()
        .context("Failed to parse AUTH_REFRESH_COOKIE_SAMESITE")?
        .unwrap_or(CookieSameSite::Lax);

    Ok(AuthConfig {
        host,
        port,
        database_url,
        key_store_dir,
        key_grace_hours,
        refresh_cookie_name,
        refresh_cookie_domain,
        refresh_cookie_secure,
        refresh_cookie_same_site,
    })
}

fn bool_from_env(key: &str) -> Option<bool> {
    env::var(key).ok().map(|value| {
        matches!(
            value.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}

fn normalize_optional(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn parse_same_site(value: &str) -> Result<CookieSameSite> {
    match value.trim().to_ascii_lowercase().as_str() {
        "lax" => Ok(CookieSameSite::Lax),
        "strict" => Ok(CookieSameSite::Strict),
        "none" => Ok(CookieSameSite::None),
        other => Err(anyhow!(
            "Unsupported cookie same-site policy '{other}'. Use Lax, Strict, or None."
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bool_from_env_parses() {
        std::env::set_var("TEST_BOOL_TRUE", "true");
        std::env::set_var("TEST_BOOL_ONE", "1");
        std::env::set_var("TEST_BOOL_FALSE", "no");
        assert_eq!(bool_from_env("TEST_BOOL_TRUE"), Some(true));
        assert_eq!(bool_from_env("TEST_BOOL_ONE"), Some(true));
        assert_eq!(bool_from_env("TEST_BOOL_FALSE"), Some(false));
    }

    #[test]
    fn parse_same_site_rejects_unknown_values() {
        assert!(parse_same_site("teapot").is_err());
        assert!(matches!(parse_same_site("Strict"), Ok(CookieSameSite::Strict)));
    }
}
