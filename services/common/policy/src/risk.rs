use chrono::{DateTime, Local, Timelike, Utc};

/// Raw inputs the nine risk factors need. Populating this is the caller's
/// responsibility (it typically means a handful of repository lookups run
/// before scoring); the engine itself performs no I/O.
#[derive(Debug, Clone, Default)]
pub struct RiskInput {
    pub client_ip: Option<String>,
    pub client_country: Option<String>,
    pub user_recent_countries: Vec<String>,
    pub high_risk_countries: Vec<String>,
    pub recent_failed_logins: u32,
    pub recent_warning_events: u32,
    pub recent_critical_events: u32,
    pub device_fingerprint: Option<String>,
    pub known_device_fingerprints: Vec<String>,
    pub is_first_device_registration: bool,
    pub session_ip: Option<String>,
    pub session_user_agent: Option<String>,
    pub current_user_agent: Option<String>,
    pub session_age: Option<chrono::Duration>,
    pub failed_attempts_this_request: u32,
    pub account_created_at: Option<DateTime<Utc>>,
    pub password_set_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy)]
pub struct RiskScore {
    pub value: u32,
    pub level: RiskLevel,
}

impl RiskScore {
    fn from_value(value: u32) -> Self {
        let level = match value {
            0..=39 => RiskLevel::Low,
            40..=59 => RiskLevel::Medium,
            60..=79 => RiskLevel::High,
            _ => RiskLevel::Critical,
        };
        Self { value, level }
    }

    /// Fail-safe score used whenever scoring cannot complete normally.
    pub fn fail_safe() -> Self {
        Self {
            value: 100,
            level: RiskLevel::Critical,
        }
    }
}

const WEIGHT_IP_REPUTATION: f64 = 0.20;
const WEIGHT_GEO_ANOMALY: f64 = 0.15;
const WEIGHT_TIME_OF_DAY: f64 = 0.10;
const WEIGHT_USER_HISTORY: f64 = 0.20;
const WEIGHT_DEVICE_FINGERPRINT: f64 = 0.10;
const WEIGHT_SESSION_ANOMALY: f64 = 0.15;
const WEIGHT_FAILED_ATTEMPTS: f64 = 0.05;
const WEIGHT_ACCOUNT_AGE: f64 = 0.025;
const WEIGHT_PASSWORD_AGE: f64 = 0.025;

/// Nine-factor weighted request risk scorer. Each factor is scored 0-100
/// independently and fanned out concurrently since none depend on another.
pub struct RiskEngine;

impl RiskEngine {
    /// Scores a request from already-gathered inputs. Scoring itself cannot
    /// fail; callers that fail to gather `RiskInput` (a repository lookup
    /// erroring, say) should fall back to [`RiskScore::fail_safe`] rather
    /// than call this at all.
    pub async fn score(input: &RiskInput) -> RiskScore {
        Self::score_inner(input).await
    }

    async fn score_inner(input: &RiskInput) -> RiskScore {
        let (
            ip_reputation,
            geo_anomaly,
            time_of_day,
            user_history,
            device_fingerprint,
            session_anomaly,
            failed_attempts,
            account_age,
            password_age,
        ) = tokio::join!(
            score_ip_reputation(input),
            score_geolocation_anomaly(input),
            score_time_of_day(),
            score_user_history(input),
            score_device_fingerprint(input),
            score_session_anomaly(input),
            score_failed_attempts(input),
            score_account_age(input),
            score_password_age(input),
        );

        let weighted = ip_reputation as f64 * WEIGHT_IP_REPUTATION
            + geo_anomaly as f64 * WEIGHT_GEO_ANOMALY
            + time_of_day as f64 * WEIGHT_TIME_OF_DAY
            + user_history as f64 * WEIGHT_USER_HISTORY
            + device_fingerprint as f64 * WEIGHT_DEVICE_FINGERPRINT
            + session_anomaly as f64 * WEIGHT_SESSION_ANOMALY
            + failed_attempts as f64 * WEIGHT_FAILED_ATTEMPTS
            + account_age as f64 * WEIGHT_ACCOUNT_AGE
            + password_age as f64 * WEIGHT_PASSWORD_AGE;

        RiskScore::from_value(weighted.round().clamp(0.0, 100.0) as u32)
    }
}

fn is_private_or_loopback(ip: &str) -> bool {
    use std::net::IpAddr;
    match ip.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => v4.is_private() || v4.is_loopback(),
        Ok(IpAddr::V6(v6)) => v6.is_loopback(),
        Err(_) => false,
    }
}

async fn score_ip_reputation(input: &RiskInput) -> u32 {
    match &input.client_ip {
        None => 40,
        Some(ip) if is_private_or_loopback(ip) => 5,
        Some(_) => 25,
    }
}

async fn score_geolocation_anomaly(input: &RiskInput) -> u32 {
    let Some(country) = input.client_country.as_deref() else {
        return 35;
    };
    if input.high_risk_countries.iter().any(|c| c == country) {
        return 95;
    }
    if !input.user_recent_countries.is_empty() && !input.user_recent_countries.iter().any(|c| c == country) {
        return 65;
    }
    15
}

async fn score_time_of_day() -> u32 {
    let hour = Local::now().hour();
    match hour {
        3..=4 => 85,
        18..=23 | 0..=2 => 50,
        _ => 10,
    }
}

async fn score_user_history(input: &RiskInput) -> u32 {
    let failed = (input.recent_failed_logins.min(5) as f64 / 5.0) * 50.0;
    let severe = (input.recent_warning_events + input.recent_critical_events).min(15) as f64 / 15.0 * 50.0;
    (failed + severe).round() as u32
}

async fn score_device_fingerprint(input: &RiskInput) -> u32 {
    let Some(fingerprint) = input.device_fingerprint.as_deref() else {
        return 60;
    };
    if input.is_first_device_registration {
        return 50;
    }
    if input.known_device_fingerprints.iter().any(|known| known == fingerprint) {
        10
    } else {
        70
    }
}

async fn score_session_anomaly(input: &RiskInput) -> u32 {
    let mut score = 0u32;
    if let (Some(session_ip), Some(client_ip)) = (&input.session_ip, &input.client_ip) {
        if session_ip != client_ip {
            score += 40;
        }
    }
    if let (Some(session_ua), Some(current_ua)) = (&input.session_user_agent, &input.current_user_agent) {
        if session_ua != current_ua {
            score += 30;
        }
    }
    if let Some(age) = input.session_age {
        if age > chrono::Duration::days(30) {
            score += 20;
        }
    }
    score.min(100)
}

async fn score_failed_attempts(input: &RiskInput) -> u32 {
    match input.failed_attempts_this_request {
        0 => 0,
        1 | 2 => 50,
        3 | 4 => 80,
        _ => 100,
    }
}

async fn score_account_age(input: &RiskInput) -> u32 {
    let Some(created_at) = input.account_created_at else {
        return 50;
    };
    let age = Utc::now() - created_at;
    if age < chrono::Duration::days(1) {
        80
    } else if age < chrono::Duration::weeks(1) {
        60
    } else if age < chrono::Duration::days(30) {
        40
    } else if age < chrono::Duration::days(90) {
        20
    } else {
        5
    }
}

async fn score_password_age(input: &RiskInput) -> u32 {
    let Some(set_at) = input.password_set_at else {
        return 40;
    };
    let age = Utc::now() - set_at;
    if age < chrono::Duration::days(1) {
        5
    } else if age < chrono::Duration::weeks(1) {
        10
    } else if age < chrono::Duration::days(30) {
        20
    } else if age < chrono::Duration::days(90) {
        40
    } else {
        70
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn clean_signals_score_low() {
        let input = RiskInput {
            client_ip: Some("10.0.0.5".to_string()),
            client_country: Some("US".to_string()),
            user_recent_countries: vec!["US".to_string()],
            device_fingerprint: Some("known-device".to_string()),
            known_device_fingerprints: vec!["known-device".to_string()],
            account_created_at: Some(Utc::now() - chrono::Duration::days(400)),
            password_set_at: Some(Utc::now() - chrono::Duration::days(10)),
            ..Default::default()
        };
        let score = RiskEngine::score(&input).await;
        assert!(score.value < 40, "expected low risk, got {}", score.value);
        assert_eq!(score.level, RiskLevel::Low);
    }

    #[tokio::test]
    async fn repeated_failures_and_unknown_device_push_toward_high_risk() {
        let input = RiskInput {
            client_ip: Some("203.0.113.9".to_string()),
            client_country: Some("RU".to_string()),
            high_risk_countries: vec!["RU".to_string()],
            recent_failed_logins: 5,
            recent_warning_events: 10,
            device_fingerprint: Some("unseen".to_string()),
            known_device_fingerprints: vec!["other-device".to_string()],
            failed_attempts_this_request: 4,
            account_created_at: Some(Utc::now() - chrono::Duration::hours(2)),
            password_set_at: Some(Utc::now() - chrono::Duration::hours(2)),
            ..Default::default()
        };
        let score = RiskEngine::score(&input).await;
        assert!(score.value >= 60, "expected high/critical risk, got {}", score.value);
    }

    #[test]
    fn level_boundaries_match_documented_thresholds() {
        assert_eq!(RiskScore::from_value(0).level, RiskLevel::Low);
        assert_eq!(RiskScore::from_value(39).level, RiskLevel::Low);
        assert_eq!(RiskScore::from_value(40).level, RiskLevel::Medium);
        assert_eq!(RiskScore::from_value(59).level, RiskLevel::Medium);
        assert_eq!(RiskScore::from_value(60).level, RiskLevel::High);
        assert_eq!(RiskScore::from_value(79).level, RiskLevel::High);
        assert_eq!(RiskScore::from_value(80).level, RiskLevel::Critical);
        assert_eq!(RiskScore::from_value(100).level, RiskLevel::Critical);
    }
}
