use axum::{extract::State, Json};
use serde::Serialize;
use std::sync::Arc;

use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_secs: u64,
    pub email_configured: bool,
    pub active_sessions: usize,
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let email_configured = state.mailer.is_some();

    Json(HealthResponse {
        status: if email_configured { "ok" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.started_at.elapsed().as_secs(),
        email_configured,
        active_sessions: state.sessions.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{app, send, state, unreachable_mailer};
    use axum::http::{Method, StatusCode};

    #[tokio::test]
    async fn test_health_reports_missing_email_config() {
        let (status, body) = send(app(state(None)), Method::GET, "/api/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "degraded");
        assert_eq!(body["email_configured"], false);
        assert_eq!(body["active_sessions"], 0);
    }

    #[tokio::test]
    async fn test_health_ok_with_mailer() {
        let (_, body) = send(
            app(state(Some(unreachable_mailer()))),
            Method::GET,
            "/api/health",
            None,
        )
        .await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["email_configured"], true);
    }
}
