mod alert_layer;
mod catalog;
mod config;
mod email;
mod handlers;
mod mailer;
mod models;
mod pricing;
mod rate_limit;
mod session;
mod validation;

use axum::{
    http::{HeaderValue, StatusCode},
    middleware::from_fn_with_state,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use catalog::Catalog;
use config::{Config, StudioClock, SANDBOX_FROM_EMAIL};
use mailer::Mailer;
use models::SubmitBookingResponse;
use pricing::DepositPolicy;
use rate_limit::{rate_limit_booking, rate_limit_public, RateLimitConfig, RateLimiter, Tier};
use session::SessionStore;

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub catalog: Arc<Catalog>,
    /// `None` when email credentials are missing; submissions then answer 503.
    pub mailer: Option<Mailer>,
    pub clock: StudioClock,
    pub deposit_policy: DepositPolicy,
    pub studio_whatsapp: String,
    pub sessions: SessionStore,
    pub started_at: Instant,
}

/// Rate limit and session cleanup interval (seconds).
const CLEANUP_INTERVAL_SECS: u64 = 300;

/// Last-resort answer when a handler panics.
fn handle_panic(err: Box<dyn std::any::Any + Send + 'static>) -> Response {
    let detail = err
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| err.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    tracing::error!("Request handler panicked: {detail}");

    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(SubmitBookingResponse::failed(
            "Something went wrong on our side. Please try again or contact us on WhatsApp.",
        )),
    )
        .into_response()
}

/// All API routes, grouped by rate limit tier.
pub fn build_router(state: Arc<AppState>, limiter: RateLimiter) -> Router {
    // 1. No-limit: health checks
    let no_limit_routes = Router::new().route("/api/health", get(handlers::health::health));

    // 2. Public: catalog, quotes and wizard sessions
    let public_routes = Router::new()
        .route("/api/catalog", get(handlers::catalog::get_catalog))
        .route("/api/quote", post(handlers::catalog::quote))
        .route("/api/sessions", post(handlers::session::create_session))
        .route(
            "/api/sessions/{id}",
            get(handlers::session::get_session)
                .patch(handlers::session::update_session)
                .delete(handlers::session::delete_session),
        )
        .route(
            "/api/sessions/{id}/advance",
            post(handlers::session::advance_session),
        )
        .route(
            "/api/sessions/{id}/retreat",
            post(handlers::session::retreat_session),
        )
        .layer(from_fn_with_state(limiter.clone(), rate_limit_public));

    // 3. Submissions: each one sends an email, strictest limit
    let booking_routes = Router::new()
        .route("/api/bookings", post(handlers::booking::submit_booking))
        .route(
            "/api/sessions/{id}/submit",
            post(handlers::session::submit_session),
        )
        .layer(from_fn_with_state(limiter, rate_limit_booking));

    Router::new()
        .merge(no_limit_routes)
        .merge(public_routes)
        .merge(booking_routes)
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Whitelist `WEBAPP_URL` (plus the Vite dev server) when configured, otherwise allow any.
fn cors_layer(webapp_url: Option<&str>) -> anyhow::Result<CorsLayer> {
    let Some(url) = webapp_url else {
        return Ok(CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any));
    };

    let origin = url::Url::parse(url)
        .map_err(|e| anyhow::anyhow!("WEBAPP_URL must be a valid URL: {e}"))?
        .origin()
        .ascii_serialization();
    let origins = vec![
        HeaderValue::from_str(&origin)?,
        HeaderValue::from_static("http://localhost:5173"),
    ];
    Ok(CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // ── Configuration (read before tracing so AlertLayer can use the mailer) ──
    let config = Config::from_env()?;
    let mailer = Mailer::from_config(&config.email)?;

    // ── Tracing: console + optional email alerts for errors ──
    let env_filter = EnvFilter::from_default_env().add_directive("info".parse()?);
    let fmt_layer = tracing_subscriber::fmt::layer();
    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer);

    match (&mailer, config.email.alert_recipient.as_deref()) {
        (Some(mailer), Some(to)) => {
            registry
                .with(alert_layer::AlertLayer::new(mailer.with_recipient(to)))
                .init();
        }
        _ => registry.init(),
    }

    if mailer.is_none() {
        tracing::warn!(
            "RESEND_API_KEY or BOOKING_RECIPIENT_EMAIL not set, bookings will answer \"not configured\""
        );
    }
    if config.email.from == SANDBOX_FROM_EMAIL {
        tracing::info!("Sending from the email provider's sandbox address");
    }

    // ── Catalog ──
    let catalog = Catalog::load(config.catalog_path.as_deref())?;
    tracing::info!(
        services = catalog.services.len(),
        add_ons = catalog.add_ons.len(),
        deposit = %config.deposit_policy,
        "Catalog loaded"
    );

    let state = Arc::new(AppState {
        catalog: Arc::new(catalog),
        mailer,
        clock: config.clock,
        deposit_policy: config.deposit_policy,
        studio_whatsapp: config.studio_whatsapp.clone(),
        sessions: SessionStore::new(Duration::from_secs(config.session_ttl_secs)),
        started_at: Instant::now(),
    });

    // ── Rate limiter ──
    let rate_limiter = RateLimiter::new();
    rate_limiter.add_tier(
        Tier::Public,
        RateLimitConfig {
            max_requests: 60,
            window: Duration::from_secs(60),
        },
    );
    rate_limiter.add_tier(
        Tier::Booking,
        RateLimitConfig {
            max_requests: 5,
            window: Duration::from_secs(300),
        },
    );

    // ── Background task: drop stale rate limit entries and idle sessions ──
    let cleanup_limiter = rate_limiter.clone();
    let cleanup_sessions = state.sessions.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(CLEANUP_INTERVAL_SECS));
        loop {
            interval.tick().await;
            cleanup_limiter.cleanup();
            cleanup_sessions.cleanup();
        }
    });

    let app = build_router(state, rate_limiter).layer(cors_layer(config.webapp_url.as_deref())?);

    let addr = format!("{}:{}", config.host, config.port);
    tracing::info!("Braid studio booking server starting on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_support::{app, send, state};
    use axum::http::Method;

    #[test]
    fn test_cors_rejects_invalid_webapp_url() {
        assert!(cors_layer(None).is_ok());
        assert!(cors_layer(Some("https://book.studio.test/app")).is_ok());
        assert!(cors_layer(Some("not a url")).is_err());
    }

    #[test]
    fn test_panic_becomes_apology() {
        let resp = handle_panic(Box::new("boom"));
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let (status, _) = send(app(state(None)), Method::GET, "/api/nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
