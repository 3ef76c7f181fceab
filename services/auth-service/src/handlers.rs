use axum::extract::{FromRequestParts, Path, State};
use axum::http::request::Parts;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{async_trait, Json};
use chrono::{DateTime, Utc};
use common_audit::{EventResult, EventSeverity, EventType, NewAuditEvent};
use common_auth::BindingContext;
use common_http_errors::AuthCoreError;
use common_policy::{PolicyDecisionPoint, RequestContext, RiskInput};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::instrument;
use uuid::Uuid;

use crate::app::AppState;
use crate::orchestrator::{LoginRequest, LogoutScope};

fn client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .or_else(|| headers.get("x-real-ip"))
        .and_then(|value| value.to_str().ok())
        .and_then(|raw| raw.split(',').next().map(str::trim))
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn user_agent(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn refresh_cookie(state: &AppState, token: &str, max_age_seconds: i64) -> String {
    let mut parts = vec![
        format!("{}={}", state.config.refresh_cookie_name, token),
        "Path=/".to_string(),
        "HttpOnly".to_string(),
        format!("Max-Age={}", max_age_seconds.max(0)),
        format!("SameSite={}", state.config.refresh_cookie_same_site.as_str()),
    ];
    if let Some(domain) = &state.config.refresh_cookie_domain {
        if !domain.is_empty() {
            parts.push(format!("Domain={}", domain));
        }
    }
    if state.config.refresh_cookie_secure {
        parts.push("Secure".to_string());
    }
    parts.join("; ")
}

fn extract_refresh_cookie(headers: &HeaderMap, state: &AppState) -> Option<String> {
    let raw = headers.get(header::COOKIE)?.to_str().ok()?;
    let prefix = format!("{}=", state.config.refresh_cookie_name);
    raw.split(';')
        .map(str::trim)
        .find_map(|segment| segment.strip_prefix(&prefix))
        .map(str::to_string)
}

/// Extracted from a validated `Authorization: Bearer` access token: who is
/// calling and through which session.
pub struct AuthenticatedUser {
    pub user_id: Uuid,
    pub session_id: Uuid,
}

#[async_trait]
impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = AuthCoreError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or(AuthCoreError::InvalidToken)?;
        let token = header.strip_prefix("Bearer ").ok_or(AuthCoreError::InvalidToken)?;

        let binding = BindingContext {
            ip: client_ip(&parts.headers).as_deref(),
            user_agent: user_agent(&parts.headers).as_deref(),
        };
        let (claims, _) = state
            .tokens
            .verify_access(token, Some(&binding))
            .map_err(|_| AuthCoreError::InvalidToken)?;

        let session = state
            .sessions
            .find_by_access_token_jti(claims.jti)
            .await
            .map_err(|err| AuthCoreError::InternalError(err.to_string()))?
            .ok_or(AuthCoreError::SessionRevoked)?;

        Ok(AuthenticatedUser {
            user_id: claims.user_id,
            session_id: session.id,
        })
    }
}

#[derive(Deserialize)]
pub struct LoginBody {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub remember_me: bool,
    #[serde(default)]
    pub device_fingerprint: Option<String>,
}

#[derive(Serialize)]
struct UserSummary {
    id: Uuid,
    email: String,
    name: String,
}

#[derive(Serialize)]
struct LoginResponseBody {
    user: UserSummary,
    #[serde(rename = "accessToken")]
    access_token: String,
    #[serde(rename = "refreshToken")]
    refresh_token: String,
    #[serde(rename = "accessTokenExpiresAt")]
    access_token_expires_at: DateTime<Utc>,
    #[serde(rename = "refreshTokenExpiresAt")]
    refresh_token_expires_at: DateTime<Utc>,
    #[serde(rename = "sessionId")]
    session_id: Uuid,
}

#[instrument(skip(state, headers, body), fields(email = %body.email))]
pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<LoginBody>,
) -> Result<Response, AuthCoreError> {
    let ip = client_ip(&headers);
    let ua = user_agent(&headers);

    let result = state
        .orchestrator
        .login(LoginRequest {
            email: &body.email,
            password: &body.password,
            remember_me: body.remember_me,
            ip: ip.as_deref(),
            user_agent: ua.as_deref(),
            device_fingerprint: body.device_fingerprint,
        })
        .await;

    let result = match result {
        Ok(result) => {
            state.metrics.login_attempt("success");
            result
        }
        Err(err) => {
            state.metrics.login_attempt("failure");
            return Err(err);
        }
    };

    let refresh_ttl = (result.refresh_token_expires_at - Utc::now()).num_seconds();
    let body = LoginResponseBody {
        user: UserSummary {
            id: result.user.id,
            email: result.user.email,
            name: result.user.name,
        },
        access_token: result.access_token,
        refresh_token: result.refresh_token.clone(),
        access_token_expires_at: result.access_token_expires_at,
        refresh_token_expires_at: result.refresh_token_expires_at,
        session_id: result.session.id,
    };

    let mut response = (StatusCode::OK, Json(body)).into_response();
    if let Ok(cookie) = HeaderValue::from_str(&refresh_cookie(&state, &result.refresh_token, refresh_ttl)) {
        response.headers_mut().append(header::SET_COOKIE, cookie);
    }
    Ok(response)
}

#[derive(Deserialize, Default)]
pub struct RefreshBody {
    #[serde(default)]
    pub refresh_token: Option<String>,
}

#[derive(Serialize)]
struct RefreshResponseBody {
    #[serde(rename = "accessToken")]
    access_token: String,
    #[serde(rename = "refreshToken")]
    refresh_token: String,
    #[serde(rename = "accessTokenExpiresAt")]
    access_token_expires_at: DateTime<Utc>,
    #[serde(rename = "refreshTokenExpiresAt")]
    refresh_token_expires_at: DateTime<Utc>,
}

#[instrument(skip(state, headers, body))]
pub async fn refresh(State(state): State<AppState>, headers: HeaderMap, Json(body): Json<RefreshBody>) -> Response {
    let token = match body.refresh_token.or_else(|| extract_refresh_cookie(&headers, &state)) {
        Some(token) => token,
        None => {
            state.metrics.refresh_attempt("failure");
            return AuthCoreError::refresh_response(false);
        }
    };

    let ip = client_ip(&headers);
    let ua = user_agent(&headers);

    let result = state.rotation.refresh(&token, ip.as_deref(), ua.as_deref()).await;
    let result = match result {
        Ok(result) => {
            state.metrics.refresh_attempt("success");
            result
        }
        Err(err) => {
            state.metrics.refresh_attempt("failure");
            // InvalidRefresh, TokenReuse and an aged-out signing key all
            // render as the identical `invalid_refresh` body on the wire;
            // only `requiresReauth` distinguishes the last of those, so a
            // client knows retrying the same refresh token is pointless.
            return match err {
                AuthCoreError::InvalidRefresh | AuthCoreError::TokenReuse => {
                    AuthCoreError::refresh_response(false)
                }
                AuthCoreError::UnknownKey | AuthCoreError::NoActiveKey => {
                    AuthCoreError::refresh_response(true)
                }
                other => other.into_response(),
            };
        }
    };

    let refresh_ttl = (result.refresh_expires_at - Utc::now()).num_seconds();
    let body = RefreshResponseBody {
        access_token: result.access_token,
        refresh_token: result.refresh_token.clone(),
        access_token_expires_at: result.access_expires_at,
        refresh_token_expires_at: result.refresh_expires_at,
    };

    let mut response = (StatusCode::OK, Json(body)).into_response();
    if let Ok(cookie) = HeaderValue::from_str(&refresh_cookie(&state, &result.refresh_token, refresh_ttl)) {
        response.headers_mut().append(header::SET_COOKIE, cookie);
    }
    response
}

#[derive(Deserialize, Default)]
pub struct LogoutBody {
    #[serde(default)]
    pub session_id: Option<Uuid>,
    #[serde(default)]
    pub revoke_all_sessions: bool,
}

#[derive(Serialize)]
struct LogoutResponseBody {
    success: bool,
    #[serde(rename = "sessionsRevoked")]
    sessions_revoked: u32,
    message: &'static str,
}

#[instrument(skip(state, user, body))]
pub async fn logout(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(body): Json<LogoutBody>,
) -> Result<Response, AuthCoreError> {
    let scope = if body.revoke_all_sessions {
        LogoutScope::AllSessions
    } else {
        LogoutScope::Session(body.session_id.unwrap_or(user.session_id))
    };
    let sessions_revoked = matches!(scope, LogoutScope::AllSessions) as u32;

    state.orchestrator.logout(user.user_id, scope).await?;

    let mut response = (
        StatusCode::OK,
        Json(LogoutResponseBody {
            success: true,
            sessions_revoked,
            message: "logged out",
        }),
    )
        .into_response();
    if let Ok(cookie) = HeaderValue::from_str(&refresh_cookie(&state, "", 0)) {
        response.headers_mut().append(header::SET_COOKIE, cookie);
    }
    Ok(response)
}

#[derive(Serialize)]
struct SessionSummary {
    id: Uuid,
    device: Option<String>,
    location: Option<String>,
    #[serde(rename = "lastActivity")]
    last_activity: DateTime<Utc>,
    current: bool,
    #[serde(rename = "ipAddress", skip_serializing_if = "Option::is_none")]
    ip_address: Option<String>,
    #[serde(rename = "userAgent", skip_serializing_if = "Option::is_none")]
    user_agent: Option<String>,
    #[serde(rename = "riskScore")]
    risk_score: i16,
}

#[instrument(skip(state, user))]
pub async fn list_sessions(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<Vec<SessionSummary>>, AuthCoreError> {
    let sessions = state
        .sessions
        .find_active_by_user_id(user.user_id)
        .await
        .map_err(|err| AuthCoreError::InternalError(err.to_string()))?;

    Ok(Json(
        sessions
            .into_iter()
            .map(|s| SessionSummary {
                current: s.id == user.session_id,
                device: s.device_fingerprint.clone(),
                location: s.geolocation.clone(),
                last_activity: s.last_activity_at,
                ip_address: s.ip_address,
                user_agent: s.user_agent,
                risk_score: s.risk_score,
                id: s.id,
            })
            .collect(),
    ))
}

#[derive(Serialize)]
struct DeleteSessionResponse {
    success: bool,
}

#[instrument(skip(state, user))]
pub async fn delete_session(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(session_id): Path<Uuid>,
) -> Response {
    let session = match state.sessions.find_by_id(session_id).await {
        Ok(session) => session,
        Err(err) => return AuthCoreError::InternalError(err.to_string()).into_response(),
    };

    // A session owned by someone else renders identically to one that
    // doesn't exist at all: both are a plain 404, not the 401 the rest of
    // this crate's errors collapse into.
    match session {
        Some(session) if session.user_id == user.user_id => {
            if let Err(err) = state
                .sessions
                .revoke_session(session_id, "user_revoked")
                .await
            {
                return AuthCoreError::InternalError(err.to_string()).into_response();
            }
            Json(DeleteSessionResponse { success: true }).into_response()
        }
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

#[derive(Deserialize)]
pub struct AuthorizeBody {
    pub resource: String,
    pub action: String,
    #[serde(default)]
    pub context: AuthorizeContext,
}

#[derive(Deserialize, Default)]
pub struct AuthorizeContext {
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub security_level: i32,
    #[serde(default)]
    pub device_fingerprint: Option<String>,
    #[serde(default)]
    pub known_device_fingerprints: Vec<String>,
}

#[instrument(skip(state, user, headers, body), fields(resource = %body.resource, action = %body.action))]
pub async fn authorize(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    headers: HeaderMap,
    Json(body): Json<AuthorizeBody>,
) -> Json<serde_json::Value> {
    let request_context = RequestContext {
        user_id: user.user_id,
        resource: body.resource.clone(),
        action: body.action.clone(),
        client_ip: client_ip(&headers),
        country: body.context.country,
        security_level: body.context.security_level,
        device_fingerprint: body.context.device_fingerprint,
        known_device_fingerprints: body.context.known_device_fingerprints,
        user_attributes: Default::default(),
        risk_score: None,
    };

    let risk_input = RiskInput {
        client_ip: request_context.client_ip.clone(),
        client_country: request_context.country.clone(),
        ..Default::default()
    };

    let pdp = PolicyDecisionPoint::new(&state.permissions);
    let decision = pdp.evaluate(&request_context, &risk_input).await;

    let risk_score = match &decision {
        common_policy::Decision::Allow { risk_score, .. } => *risk_score,
        common_policy::Decision::Deny { risk_score, .. } => *risk_score,
    };
    if let Some(severity) = suspicious_activity_severity(risk_score) {
        let result = match &decision {
            common_policy::Decision::Allow { .. } => EventResult::Success,
            common_policy::Decision::Deny { .. } => EventResult::Denied,
        };
        state
            .audit
            .emit(
                NewAuditEvent::new(EventType::SuspiciousActivity, severity, result)
                    .user(user.user_id)
                    .session(user.session_id)
                    .metadata(json!({
                        "resource": request_context.resource,
                        "action": request_context.action,
                        "riskScore": risk_score,
                    })),
            )
            .await;
    }

    let response = match &decision {
        common_policy::Decision::Allow { risk_score, obligations, advice } => {
            state.metrics.pdp_decision("allow");
            json!({
                "decision": "allow",
                "riskScore": risk_score,
                "obligations": obligations.iter().map(obligation_name).collect::<Vec<_>>(),
                "advice": advice.iter().map(advice_description).collect::<Vec<_>>(),
            })
        }
        common_policy::Decision::Deny { reason, risk_score, obligations, advice } => {
            state.metrics.pdp_decision("deny");
            json!({
                "decision": "deny",
                "reason": reason,
                "riskScore": risk_score,
                "obligations": obligations.iter().map(obligation_name).collect::<Vec<_>>(),
                "advice": advice.iter().map(advice_description).collect::<Vec<_>>(),
            })
        }
    };

    Json(response)
}

/// Scores above 70 are flagged as suspicious; above 90 they're critical.
/// A score of exactly 70 does not trigger anything.
fn suspicious_activity_severity(risk_score: u32) -> Option<EventSeverity> {
    if risk_score > 90 {
        Some(EventSeverity::Critical)
    } else if risk_score > 70 {
        Some(EventSeverity::Warning)
    } else {
        None
    }
}

fn obligation_name(obligation: &common_policy::Obligation) -> &'static str {
    match obligation {
        common_policy::Obligation::StepUpAuthentication => "step_up_authentication",
        common_policy::Obligation::AdditionalVerification => "additional_verification",
        common_policy::Obligation::EnhancedAudit => "enhanced_audit",
    }
}

fn advice_description(advice: &common_policy::Advice) -> String {
    match advice {
        common_policy::Advice::ApproachingRiskCap { score, cap } => {
            format!("risk score {score} is approaching the cap of {cap}")
        }
        common_policy::Advice::RuleDeniedExplicitly => "a permission rule denied this request".to_string(),
    }
}

#[instrument(skip(state))]
pub async fn jwks(State(state): State<AppState>) -> Json<common_keys::JwkSet> {
    Json(state.keys.jwks())
}

pub async fn health() -> &'static str {
    "ok"
}

pub async fn metrics(State(state): State<AppState>) -> Response {
    match state.metrics.render() {
        Ok(response) => response,
        Err(_) => (StatusCode::INTERNAL_SERVER_ERROR, "failed to render metrics").into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_ip_prefers_x_forwarded_for_and_takes_first_hop() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.7, 10.0.0.1"));
        headers.insert("x-real-ip", HeaderValue::from_static("192.0.2.9"));
        assert_eq!(client_ip(&headers).as_deref(), Some("203.0.113.7"));
    }

    #[test]
    fn client_ip_falls_back_to_x_real_ip() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("192.0.2.9"));
        assert_eq!(client_ip(&headers).as_deref(), Some("192.0.2.9"));
    }

    #[test]
    fn client_ip_absent_without_either_header() {
        assert_eq!(client_ip(&HeaderMap::new()), None);
    }

    #[test]
    fn user_agent_trims_and_reads_the_header() {
        let mut headers = HeaderMap::new();
        headers.insert(header::USER_AGENT, HeaderValue::from_static("  test-agent/1.0  "));
        assert_eq!(user_agent(&headers).as_deref(), Some("test-agent/1.0"));
    }

    #[test]
    fn obligation_and_advice_render_stable_wire_names() {
        assert_eq!(
            obligation_name(&common_policy::Obligation::StepUpAuthentication),
            "step_up_authentication"
        );
        let advice = advice_description(&common_policy::Advice::ApproachingRiskCap { score: 75, cap: 80 });
        assert!(advice.contains("75") && advice.contains("80"));
    }

    #[test]
    fn suspicious_activity_boundary_is_exclusive_at_seventy() {
        assert_eq!(suspicious_activity_severity(70), None);
        assert_eq!(suspicious_activity_severity(71), Some(EventSeverity::Warning));
    }

    #[test]
    fn suspicious_activity_escalates_to_critical_above_ninety() {
        assert_eq!(suspicious_activity_severity(90), Some(EventSeverity::Warning));
        assert_eq!(suspicious_activity_severity(91), Some(EventSeverity::Critical));
    }
}

