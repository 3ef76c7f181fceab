use tracing::warn;

use crate::model::RequestContext;
use crate::permission::{PermissionDecision, PermissionEngine};
use crate::risk::{RiskInput, RiskLevel, RiskScore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Obligation {
    StepUpAuthentication,
    AdditionalVerification,
    EnhancedAudit,
}

#[derive(Debug, Clone)]
pub enum Advice {
    ApproachingRiskCap { score: u32, cap: u32 },
    RuleDeniedExplicitly,
}

#[derive(Debug, Clone)]
pub enum Decision {
    Allow {
        risk_score: u32,
        obligations: Vec<Obligation>,
        advice: Vec<Advice>,
    },
    Deny {
        reason: &'static str,
        risk_score: u32,
        obligations: Vec<Obligation>,
        advice: Vec<Advice>,
    },
}

/// Sensitive operation classes always get enhanced audit regardless of score.
fn is_sensitive_action(action: &str) -> bool {
    matches!(action, "delete" | "export" | "impersonate" | "grant" | "revoke")
}

/// Action-specific risk cap: exceeding it denies even when the permission
/// engine would otherwise allow.
fn risk_cap_for(resource: &str, action: &str) -> u32 {
    if resource == "user" && action == "delete" {
        20
    } else if resource.starts_with("admin") {
        30
    } else if resource.starts_with("license") {
        70
    } else {
        80
    }
}

/// Combines the permission engine and risk engine into a single, stateless
/// decision. Runs both concurrently since neither depends on the other.
pub struct PolicyDecisionPoint<'a> {
    permissions: &'a PermissionEngine,
}

impl<'a> PolicyDecisionPoint<'a> {
    pub fn new(permissions: &'a PermissionEngine) -> Self {
        Self { permissions }
    }

    pub async fn evaluate(&self, context: &RequestContext, risk_input: &RiskInput) -> Decision {
        let (permission_decision, risk_score) =
            tokio::join!(self.evaluate_permission(context), self.evaluate_risk(risk_input));

        self.combine(context, permission_decision, risk_score)
    }

    async fn evaluate_permission(&self, context: &RequestContext) -> PermissionDecision {
        self.permissions.evaluate(context)
    }

    async fn evaluate_risk(&self, input: &RiskInput) -> RiskScore {
        crate::risk::RiskEngine::score(input).await
    }

    fn combine(
        &self,
        context: &RequestContext,
        permission_decision: PermissionDecision,
        risk: RiskScore,
    ) -> Decision {
        let mut obligations = Vec::new();
        let mut advice = Vec::new();

        if is_sensitive_action(&context.action) {
            obligations.push(Obligation::EnhancedAudit);
        }

        if permission_decision == PermissionDecision::Deny {
            advice.push(Advice::RuleDeniedExplicitly);
            return Decision::Deny {
                reason: "permission_denied",
                risk_score: risk.value,
                obligations,
                advice,
            };
        }
        if permission_decision == PermissionDecision::NoMatch {
            // Default-deny: absent a matching rule (or a matching rule whose
            // conditions didn't all pass), the request is denied exactly as
            // if a rule had denied it explicitly.
            advice.push(Advice::RuleDeniedExplicitly);
            return Decision::Deny {
                reason: "no_matching_rule",
                risk_score: risk.value,
                obligations,
                advice,
            };
        }

        let cap = risk_cap_for(&context.resource, &context.action);
        if risk.value > cap {
            advice.push(Advice::ApproachingRiskCap { score: risk.value, cap });
            warn!(resource = %context.resource, action = %context.action, score = risk.value, cap, "denying due to risk cap");
            return Decision::Deny {
                reason: "risk_blocked",
                risk_score: risk.value,
                obligations,
                advice,
            };
        }

        if matches!(risk.level, RiskLevel::High | RiskLevel::Critical) && risk.value > 60 {
            obligations.push(Obligation::StepUpAuthentication);
        }
        if risk.value > 80 {
            obligations.push(Obligation::AdditionalVerification);
        }
        if (cap as f64 - risk.value as f64) <= 10.0 {
            advice.push(Advice::ApproachingRiskCap { score: risk.value, cap });
        }

        Decision::Allow {
            risk_score: risk.value,
            obligations,
            advice,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Effect, PermissionRule};
    use crate::permission::PermissionRepository;
    use async_trait::async_trait;
    use uuid::Uuid;

    struct AllowAll;

    #[async_trait]
    impl PermissionRepository for AllowAll {
        async fn load_rules(&self) -> crate::error::PolicyResult<Vec<PermissionRule>> {
            Ok(vec![PermissionRule {
                id: Uuid::new_v4(),
                resource: "*".to_string(),
                action: "*".to_string(),
                conditions: Vec::new(),
                priority: 1,
                effect: Effect::Allow,
            }])
        }
    }

    fn clean_risk_input() -> RiskInput {
        RiskInput {
            client_ip: Some("10.0.0.1".to_string()),
            client_country: Some("US".to_string()),
            account_created_at: Some(chrono::Utc::now() - chrono::Duration::days(400)),
            password_set_at: Some(chrono::Utc::now() - chrono::Duration::days(10)),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn allows_low_risk_permitted_request() {
        let engine = PermissionEngine::load(&AllowAll).await.unwrap();
        let pdp = PolicyDecisionPoint::new(&engine);
        let context = RequestContext {
            resource: "reports".to_string(),
            action: "read".to_string(),
            ..Default::default()
        };
        let decision = pdp.evaluate(&context, &clean_risk_input()).await;
        assert!(matches!(decision, Decision::Allow { .. }));
    }

    #[tokio::test]
    async fn caps_user_delete_at_twenty() {
        let engine = PermissionEngine::load(&AllowAll).await.unwrap();
        let pdp = PolicyDecisionPoint::new(&engine);
        let context = RequestContext {
            resource: "user".to_string(),
            action: "delete".to_string(),
            ..Default::default()
        };
        let mut risky_input = clean_risk_input();
        risky_input.recent_failed_logins = 5;
        risky_input.failed_attempts_this_request = 5;
        risky_input.device_fingerprint = Some("brand-new".to_string());

        let decision = pdp.evaluate(&context, &risky_input).await;
        match decision {
            Decision::Deny { reason, .. } => assert_eq!(reason, "risk_blocked"),
            Decision::Allow { risk_score, .. } => {
                panic!("expected risk_blocked deny, got allow with score {risk_score}")
            }
        }
    }

    #[tokio::test]
    async fn no_matching_rule_denies_by_default() {
        struct Empty;
        #[async_trait]
        impl PermissionRepository for Empty {
            async fn load_rules(&self) -> crate::error::PolicyResult<Vec<PermissionRule>> {
                Ok(Vec::new())
            }
        }
        let engine = PermissionEngine::load(&Empty).await.unwrap();
        let pdp = PolicyDecisionPoint::new(&engine);
        let context = RequestContext {
            resource: "reports".to_string(),
            action: "read".to_string(),
            ..Default::default()
        };
        let decision = pdp.evaluate(&context, &clean_risk_input()).await;
        match decision {
            Decision::Deny { reason, .. } => assert_eq!(reason, "no_matching_rule"),
            Decision::Allow { .. } => panic!("absence of a matching rule must deny, not allow"),
        }
    }

    #[tokio::test]
    async fn permission_deny_wins_even_with_low_risk() {
        struct DenyAll;
        #[async_trait]
        impl PermissionRepository for DenyAll {
            async fn load_rules(&self) -> crate::error::PolicyResult<Vec<PermissionRule>> {
                Ok(vec![PermissionRule {
                    id: Uuid::new_v4(),
                    resource: "*".to_string(),
                    action: "*".to_string(),
                    conditions: Vec::new(),
                    priority: 1,
                    effect: Effect::Deny,
                }])
            }
        }
        let engine = PermissionEngine::load(&DenyAll).await.unwrap();
        let pdp = PolicyDecisionPoint::new(&engine);
        let context = RequestContext {
            resource: "reports".to_string(),
            action: "read".to_string(),
            ..Default::default()
        };
        let decision = pdp.evaluate(&context, &clean_risk_input()).await;
        match decision {
            Decision::Deny { reason, .. } => assert_eq!(reason, "permission_denied"),
            Decision::Allow { .. } => panic!("expected deny"),
        }
    }
}
