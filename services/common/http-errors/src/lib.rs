use axum::{
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// The closed set of error kinds the auth core can raise. Every fallible
/// operation across the key manager, token service, session store and
/// policy decision point ultimately collapses into one of these.
///
/// A handful of these kinds are deliberately indistinguishable once they
/// reach the wire: a verifier should never leak *which* check on a token
/// failed, and a refresh caller should never be able to tell a stolen,
/// reused token from one that simply expired. `into_response` enforces
/// that collapsing; the variant itself is kept distinct so audit logging
/// upstream can still record the real reason.
#[derive(Debug, Clone)]
pub enum AuthCoreError {
    ValidationError(String),
    InvalidCredentials,
    AccountDeactivated,
    InvalidToken,
    TokenExpired,
    UnknownKey,
    BindingMismatch,
    InvalidRefresh,
    TokenReuse,
    SessionExpired,
    SessionRevoked,
    UserNotFound,
    PermissionDenied,
    RiskBlocked,
    StepUpRequired,
    NoActiveKey,
    InternalError(String),
}

impl AuthCoreError {
    /// The code reported in the `X-Error-Code` header and the response
    /// body. Several kinds intentionally share a code so that distinct
    /// internal failure reasons can't be told apart by a caller.
    pub fn code(&self) -> &'static str {
        match self {
            AuthCoreError::ValidationError(_) => "validation_error",
            AuthCoreError::InvalidCredentials => "invalid_credentials",
            AuthCoreError::AccountDeactivated => "account_deactivated",
            // Signature failure, unknown kid, expiry, wrong token type and a
            // strict binding mismatch all read as the same code: none of
            // them should tell a caller which check actually failed.
            AuthCoreError::InvalidToken
            | AuthCoreError::TokenExpired
            | AuthCoreError::UnknownKey
            | AuthCoreError::BindingMismatch => "invalid_token",
            // A stolen refresh token and one that's simply unknown/expired
            // must be indistinguishable on the wire.
            AuthCoreError::InvalidRefresh | AuthCoreError::TokenReuse => "invalid_refresh",
            AuthCoreError::SessionExpired => "session_expired",
            AuthCoreError::SessionRevoked => "session_revoked",
            AuthCoreError::UserNotFound => "invalid_credentials",
            AuthCoreError::PermissionDenied => "permission_denied",
            AuthCoreError::RiskBlocked => "risk_blocked",
            AuthCoreError::StepUpRequired => "step_up_required",
            AuthCoreError::NoActiveKey => "service_unavailable",
            AuthCoreError::InternalError(_) => "internal_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AuthCoreError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AuthCoreError::InvalidCredentials
            | AuthCoreError::InvalidToken
            | AuthCoreError::TokenExpired
            | AuthCoreError::UnknownKey
            | AuthCoreError::BindingMismatch
            | AuthCoreError::InvalidRefresh
            | AuthCoreError::TokenReuse
            | AuthCoreError::SessionExpired
            | AuthCoreError::SessionRevoked
            | AuthCoreError::StepUpRequired
            | AuthCoreError::UserNotFound => StatusCode::UNAUTHORIZED,
            AuthCoreError::AccountDeactivated
            | AuthCoreError::PermissionDenied
            | AuthCoreError::RiskBlocked => StatusCode::FORBIDDEN,
            AuthCoreError::NoActiveKey => StatusCode::SERVICE_UNAVAILABLE,
            AuthCoreError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> String {
        match self {
            AuthCoreError::ValidationError(msg) => msg.clone(),
            AuthCoreError::InvalidCredentials | AuthCoreError::UserNotFound => {
                "invalid email or password".into()
            }
            AuthCoreError::AccountDeactivated => "this account is deactivated".into(),
            AuthCoreError::InvalidToken
            | AuthCoreError::TokenExpired
            | AuthCoreError::UnknownKey
            | AuthCoreError::BindingMismatch => "the token could not be verified".into(),
            AuthCoreError::InvalidRefresh | AuthCoreError::TokenReuse => {
                "the refresh token is not valid".into()
            }
            AuthCoreError::SessionExpired => "the session has expired".into(),
            AuthCoreError::SessionRevoked => "the session has been revoked".into(),
            AuthCoreError::PermissionDenied => "you do not have permission to do that".into(),
            AuthCoreError::RiskBlocked => "this request was blocked as too risky".into(),
            AuthCoreError::StepUpRequired => "this action requires re-authentication".into(),
            AuthCoreError::NoActiveKey => "signing is temporarily unavailable".into(),
            AuthCoreError::InternalError(_) => "an internal error occurred".into(),
        }
    }

    /// Builds the response the refresh endpoint hands back for any failure
    /// along the rotation path. Every caller of this helper renders the
    /// exact same status, code and body shape regardless of which of
    /// `InvalidRefresh`/`TokenReuse`/a missing signing key caused it; only
    /// `requires_reauth` varies, and only to tell the client whether
    /// retrying the same refresh token is ever worth it.
    pub fn refresh_response(requires_reauth: bool) -> Response {
        let body = ErrorBody {
            code: "invalid_refresh",
            message: "the refresh token is not valid".to_string(),
            requires_reauth,
        };
        let mut response = (StatusCode::UNAUTHORIZED, Json(body)).into_response();
        if let Ok(value) = HeaderValue::from_str("invalid_refresh") {
            response.headers_mut().insert("X-Error-Code", value);
        }
        response
    }
}

impl std::fmt::Display for AuthCoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl std::error::Error for AuthCoreError {}

#[derive(Serialize, Debug)]
struct ErrorBody {
    code: &'static str,
    message: String,
    #[serde(rename = "requiresReauth")]
    requires_reauth: bool,
}

impl IntoResponse for AuthCoreError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();
        let body = ErrorBody {
            code,
            message: self.message(),
            requires_reauth: matches!(
                self,
                AuthCoreError::UnknownKey | AuthCoreError::NoActiveKey
            ),
        };
        let mut response = (status, Json(body)).into_response();
        if let Ok(value) = HeaderValue::from_str(code) {
            response.headers_mut().insert("X-Error-Code", value);
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn token_reuse_and_invalid_refresh_render_identically() {
        let reuse = AuthCoreError::refresh_response(false);
        let invalid = AuthCoreError::refresh_response(false);
        assert_eq!(reuse.status(), invalid.status());

        let reuse_header = reuse.headers().get("X-Error-Code").cloned();
        let invalid_header = invalid.headers().get("X-Error-Code").cloned();
        assert_eq!(reuse_header, invalid_header);

        let reuse_body = body_json(reuse).await;
        let invalid_body = body_json(invalid).await;
        assert_eq!(reuse_body, invalid_body);
    }

    #[tokio::test]
    async fn verification_failures_share_one_wire_code() {
        for err in [
            AuthCoreError::InvalidToken,
            AuthCoreError::TokenExpired,
            AuthCoreError::UnknownKey,
            AuthCoreError::BindingMismatch,
        ] {
            let response = err.into_response();
            assert_eq!(
                response.headers().get("X-Error-Code").unwrap(),
                "invalid_token"
            );
        }
    }

    #[tokio::test]
    async fn validation_error_reports_bad_request() {
        let response = AuthCoreError::ValidationError("email is required".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["code"], "validation_error");
        assert_eq!(body["message"], "email is required");
    }

    #[tokio::test]
    async fn no_active_key_is_service_unavailable_and_flags_reauth() {
        let response = AuthCoreError::NoActiveKey.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = body_json(response).await;
        assert_eq!(body["requiresReauth"], true);
    }
}
