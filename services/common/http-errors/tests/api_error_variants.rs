use axum::http::StatusCode;
use axum::response::IntoResponse;
use common_http_errors::AuthCoreError;

#[tokio::test]
async fn permission_denied_is_forbidden() {
    let resp = AuthCoreError::PermissionDenied.into_response();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    assert_eq!(resp.headers().get("X-Error-Code").unwrap(), "permission_denied");
}

#[tokio::test]
async fn risk_blocked_is_forbidden() {
    let resp = AuthCoreError::RiskBlocked.into_response();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    assert_eq!(resp.headers().get("X-Error-Code").unwrap(), "risk_blocked");
}

#[tokio::test]
async fn account_deactivated_is_forbidden() {
    let resp = AuthCoreError::AccountDeactivated.into_response();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    assert_eq!(resp.headers().get("X-Error-Code").unwrap(), "account_deactivated");
}

#[tokio::test]
async fn user_not_found_reads_as_invalid_credentials() {
    let resp = AuthCoreError::UserNotFound.into_response();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(resp.headers().get("X-Error-Code").unwrap(), "invalid_credentials");
}

#[tokio::test]
async fn session_expired_and_session_revoked_have_distinct_codes() {
    let expired = AuthCoreError::SessionExpired.into_response();
    let revoked = AuthCoreError::SessionRevoked.into_response();
    assert_eq!(expired.headers().get("X-Error-Code").unwrap(), "session_expired");
    assert_eq!(revoked.headers().get("X-Error-Code").unwrap(), "session_revoked");
}

#[tokio::test]
async fn step_up_required_is_unauthorized() {
    let resp = AuthCoreError::StepUpRequired.into_response();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(resp.headers().get("X-Error-Code").unwrap(), "step_up_required");
}

#[tokio::test]
async fn internal_error_hides_its_message_behind_a_flat_code() {
    let resp = AuthCoreError::InternalError("db pool exhausted".into()).into_response();
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(resp.headers().get("X-Error-Code").unwrap(), "internal_error");
}
