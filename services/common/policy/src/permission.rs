use std::net::IpAddr;
use std::str::FromStr;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use chrono::Timelike;
use globset::Glob;
use ipnet::IpNet;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::PolicyResult;
use crate::model::{Condition, ConditionType, Effect, Operator, PermissionRule, RequestContext};

/// Source of permission rules, backed by a database in production and an
/// in-memory fixture in tests.
#[async_trait]
pub trait PermissionRepository: Send + Sync {
    async fn load_rules(&self) -> PolicyResult<Vec<PermissionRule>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionDecision {
    Allow,
    Deny,
    NoMatch,
}

/// Priority-sorted, atomically-swappable rule cache evaluated against a
/// request's resource/action and attached conditions.
pub struct PermissionEngine {
    rules: ArcSwap<Vec<PermissionRule>>,
}

impl PermissionEngine {
    pub async fn load(repository: &dyn PermissionRepository) -> PolicyResult<Self> {
        let mut rules = repository.load_rules().await?;
        if rules.is_empty() {
            info!("no permission rules in store, seeding defaults");
            rules = default_rules();
        }
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));
        info!(count = rules.len(), "permission rules loaded");
        Ok(Self {
            rules: ArcSwap::from_pointee(rules),
        })
    }

    pub async fn reload(&self, repository: &dyn PermissionRepository) -> PolicyResult<()> {
        let mut rules = repository.load_rules().await?;
        if rules.is_empty() {
            rules = default_rules();
        }
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));
        self.rules.store(std::sync::Arc::new(rules));
        Ok(())
    }

    /// Pure evaluation against the current snapshot: no mutation, same inputs
    /// always yield the same result within a load epoch.
    pub fn evaluate(&self, context: &RequestContext) -> PermissionDecision {
        let rules = self.rules.load();
        let matching = rules.iter().find(|rule| {
            resource_matches(&rule.resource, &context.resource)
                && (rule.action == "*" || rule.action == context.action)
        });

        let Some(rule) = matching else {
            return PermissionDecision::NoMatch;
        };

        let all_conditions_pass = rule
            .conditions
            .iter()
            .all(|condition| evaluate_condition(condition, context));

        if !all_conditions_pass {
            return PermissionDecision::NoMatch;
        }

        match rule.effect {
            Effect::Allow => PermissionDecision::Allow,
            Effect::Deny => PermissionDecision::Deny,
        }
    }
}

fn resource_matches(pattern: &str, resource: &str) -> bool {
    match Glob::new(pattern) {
        Ok(glob) => glob.compile_matcher().is_match(resource),
        Err(err) => {
            warn!(?err, pattern, "invalid resource glob pattern, treating as no-match");
            false
        }
    }
}

fn evaluate_condition(condition: &Condition, context: &RequestContext) -> bool {
    match condition.condition_type {
        ConditionType::TimeWindow => evaluate_time_window(condition),
        ConditionType::IpRange => evaluate_ip_range(condition, context),
        ConditionType::RiskScore => evaluate_risk_score(condition, context),
        ConditionType::UserAttribute => evaluate_user_attribute(condition, context),
        ConditionType::Geolocation => evaluate_geolocation(condition, context),
        ConditionType::DeviceFingerprint => evaluate_device_fingerprint(condition, context),
        ConditionType::SecurityLevel => evaluate_security_level(condition, context),
    }
}

fn evaluate_time_window(condition: &Condition) -> bool {
    let Some(obj) = as_json_object(condition) else {
        return false;
    };
    let (Some(start), Some(end)) = (
        obj.get("start").and_then(|v| v.as_str()),
        obj.get("end").and_then(|v| v.as_str()),
    ) else {
        return false;
    };
    let (Some(start), Some(end)) = (parse_hhmm(start), parse_hhmm(end)) else {
        return false;
    };
    let now = chrono::Local::now();
    let minutes = now.hour() * 60 + now.minute();
    start <= minutes && minutes <= end
}

fn parse_hhmm(value: &str) -> Option<u32> {
    let mut parts = value.split(':');
    let hours: u32 = parts.next()?.parse().ok()?;
    let minutes: u32 = parts.next()?.parse().ok()?;
    Some(hours * 60 + minutes)
}

fn evaluate_ip_range(condition: &Condition, context: &RequestContext) -> bool {
    let Some(client_ip) = context.client_ip.as_deref().and_then(|ip| IpAddr::from_str(ip).ok()) else {
        return false;
    };
    let Some(obj) = as_json_object(condition) else {
        return false;
    };
    let whitelist = obj.get("whitelist").and_then(|v| v.as_array()).cloned().unwrap_or_default();
    let blacklist = obj.get("blacklist").and_then(|v| v.as_array()).cloned().unwrap_or_default();

    let in_list = |list: &[serde_json::Value]| {
        list.iter()
            .filter_map(|v| v.as_str())
            .filter_map(|cidr| IpNet::from_str(cidr).ok())
            .any(|net| net.contains(&client_ip))
    };

    let allowed = whitelist.is_empty() || in_list(&whitelist);
    let blocked = in_list(&blacklist);
    allowed && !blocked
}

fn evaluate_risk_score(condition: &Condition, context: &RequestContext) -> bool {
    let Some(max_score) = condition.value.as_number() else {
        return false;
    };
    let Some(score) = context.risk_score else {
        return false;
    };
    (score as f64) <= max_score
}

fn evaluate_user_attribute(condition: &Condition, context: &RequestContext) -> bool {
    let Some(key) = condition.condition_key.as_deref() else {
        return false;
    };
    let Some(expected) = condition.value.as_text() else {
        return false;
    };
    let Some(actual) = context.user_attributes.get(key) else {
        return false;
    };
    match condition.operator {
        Operator::Ne => actual != expected,
        Operator::Contains => actual.contains(expected),
        Operator::NotContains => !actual.contains(expected),
        _ => actual == expected,
    }
}

fn evaluate_geolocation(condition: &Condition, context: &RequestContext) -> bool {
    let Some(country) = context.country.as_deref() else {
        return false;
    };
    let allowed = condition.value.as_string_list();
    allowed.iter().any(|c| c == country)
}

fn evaluate_device_fingerprint(condition: &Condition, context: &RequestContext) -> bool {
    let Some(fingerprint) = context.device_fingerprint.as_deref() else {
        return false;
    };
    match condition.value.as_text() {
        Some(expected) => expected == fingerprint,
        None => context
            .known_device_fingerprints
            .iter()
            .any(|known| known == fingerprint),
    }
}

fn evaluate_security_level(condition: &Condition, context: &RequestContext) -> bool {
    let Some(required) = condition.value.as_number() else {
        return false;
    };
    (context.security_level as f64) >= required
}

fn as_json_object(condition: &Condition) -> Option<&serde_json::Map<String, serde_json::Value>> {
    match &condition.value {
        crate::model::ConditionValue::Json(serde_json::Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Minimal rule set seeded when the store has never been populated: deny
/// everything, then carve out self-service allowances.
fn default_rules() -> Vec<PermissionRule> {
    vec![
        PermissionRule {
            id: Uuid::new_v4(),
            resource: "profile:self".to_string(),
            action: "*".to_string(),
            conditions: Vec::new(),
            priority: 100,
            effect: Effect::Allow,
        },
        PermissionRule {
            id: Uuid::new_v4(),
            resource: "*".to_string(),
            action: "*".to_string(),
            conditions: Vec::new(),
            priority: i32::MIN,
            effect: Effect::Deny,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ConditionValue;

    struct FixedRules(Vec<PermissionRule>);

    #[async_trait]
    impl PermissionRepository for FixedRules {
        async fn load_rules(&self) -> PolicyResult<Vec<PermissionRule>> {
            Ok(self.0.clone())
        }
    }

    fn ctx(resource: &str, action: &str) -> RequestContext {
        RequestContext {
            resource: resource.to_string(),
            action: action.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn empty_store_seeds_defaults_and_denies_by_default() {
        let engine = PermissionEngine::load(&FixedRules(Vec::new())).await.unwrap();
        assert_eq!(
            engine.evaluate(&ctx("billing:invoices", "read")),
            PermissionDecision::Deny
        );
        assert_eq!(
            engine.evaluate(&ctx("profile:self", "update")),
            PermissionDecision::Allow
        );
    }

    #[tokio::test]
    async fn higher_priority_rule_wins_and_glob_matches_resource() {
        let rules = vec![
            PermissionRule {
                id: Uuid::new_v4(),
                resource: "reports:*".to_string(),
                action: "read".to_string(),
                conditions: Vec::new(),
                priority: 10,
                effect: Effect::Allow,
            },
            PermissionRule {
                id: Uuid::new_v4(),
                resource: "reports:financial".to_string(),
                action: "read".to_string(),
                conditions: Vec::new(),
                priority: 50,
                effect: Effect::Deny,
            },
        ];
        let engine = PermissionEngine::load(&FixedRules(rules)).await.unwrap();
        assert_eq!(
            engine.evaluate(&ctx("reports:financial", "read")),
            PermissionDecision::Deny
        );
        assert_eq!(
            engine.evaluate(&ctx("reports:ops", "read")),
            PermissionDecision::Allow
        );
    }

    #[tokio::test]
    async fn unmet_condition_falls_through_to_no_match() {
        let rules = vec![PermissionRule {
            id: Uuid::new_v4(),
            resource: "admin:*".to_string(),
            action: "*".to_string(),
            conditions: vec![Condition {
                condition_type: ConditionType::SecurityLevel,
                condition_key: None,
                operator: Operator::Gte,
                value: ConditionValue::Number(3.0),
            }],
            priority: 10,
            effect: Effect::Allow,
        }];
        let engine = PermissionEngine::load(&FixedRules(rules)).await.unwrap();

        let mut low_clearance = ctx("admin:users", "write");
        low_clearance.security_level = 1;
        assert_eq!(engine.evaluate(&low_clearance), PermissionDecision::NoMatch);

        let mut high_clearance = ctx("admin:users", "write");
        high_clearance.security_level = 5;
        assert_eq!(engine.evaluate(&high_clearance), PermissionDecision::Allow);
    }
}
