use anyhow::Result;
use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::Response;
use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};

#[derive(Clone)]
pub struct AuthMetrics {
    registry: Registry,
    login_attempts: IntCounterVec,
    refresh_attempts: IntCounterVec,
    pdp_decisions: IntCounterVec,
}

impl AuthMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let login_attempts = IntCounterVec::new(
            Opts::new(
                "auth_login_attempts_total",
                "Count of login attempts grouped by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(login_attempts.clone()))?;

        let refresh_attempts = IntCounterVec::new(
            Opts::new(
                "auth_refresh_attempts_total",
                "Count of refresh-rotation attempts grouped by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(refresh_attempts.clone()))?;

        let pdp_decisions = IntCounterVec::new(
            Opts::new(
                "auth_pdp_decisions_total",
                "Count of policy decision point outcomes",
            ),
            &["decision"],
        )?;
        registry.register(Box::new(pdp_decisions.clone()))?;

        Ok(Self {
            registry,
            login_attempts,
            refresh_attempts,
            pdp_decisions,
        })
    }

    pub fn login_attempt(&self, outcome: &str) {
        self.login_attempts.with_label_values(&[outcome]).inc();
    }

    pub fn refresh_attempt(&self, outcome: &str) {
        self.refresh_attempts.with_label_values(&[outcome]).inc();
    }

    pub fn pdp_decision(&self, decision: &str) {
        self.pdp_decisions.with_label_values(&[decision]).inc();
    }

    pub fn render(&self) -> Result<Response> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        let response = Response::builder()
            .status(StatusCode::OK)
            .header(
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4"),
            )
            .body(Body::from(buffer))?;
        Ok(response)
    }
}
