use axum::{Router, middleware::from_fn_with_state, routing::get};
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;
mod error;
mod handlers;
mod identity;
mod load_balancer;
mod metrics;
mod middleware;
mod models;
mod policy;
mod rate_limit;
mod state;
mod store;

use config::Args;
use error::AppError;
use handlers::{health_handler, metrics_handler, proxy_handler};
use load_balancer::{LoadBalancer, health_checker};
use policy::RouteTable;
use rate_limit::{Throttle, sweeper};
use state::AppState;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let policies = args.policies()?;
    let routes = RouteTable::marketplace();
    routes.validate(&policies)?;
    let sweep_interval = args.sweep_interval()?;

    let load_balancer = Arc::new(LoadBalancer::new(&args.backends)?);
    let throttle = Arc::new(Throttle::in_memory());

    let mut state = AppState::new(Arc::clone(&load_balancer), Arc::clone(&throttle), policies, routes);
    state.trust_principal_headers = args.trust_principal_headers;
    state.max_body_bytes = args.max_body_bytes;
    let state = Arc::new(state);

    for policy in state.policies.iter() {
        info!(
            policy = %policy.name,
            limit = policy.limit,
            window_secs = policy.window.as_secs(),
            admin_limit = ?policy.admin_limit,
            "throttle policy loaded"
        );
    }

    // background tasks
    tokio::spawn(health_checker(
        Arc::clone(&load_balancer),
        state.client.clone(),
        args.health_interval(),
    ));
    tokio::spawn(sweeper(throttle, sweep_interval));

    let app = router(state);

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(port = args.port, "gateway running");
    if args.trust_principal_headers {
        info!("trusting principal headers from the front proxy");
    }

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
    Ok(())
}

// Throttle sits inside principal resolution so it sees the principal
fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .fallback(proxy_handler)
        .layer(from_fn_with_state(Arc::clone(&state), middleware::throttle))
        .layer(from_fn_with_state(Arc::clone(&state), middleware::resolve_principal))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::StatusCode};
    use std::time::Duration;
    use tower::ServiceExt;

    use crate::middleware::{RATE_LIMIT_LIMIT, RATE_LIMIT_REMAINING};
    use crate::policy::{API, LOGIN, Policy, PolicySet, SENSITIVE_VIEW, SYSTEM_ACTION, UPLOAD};

    fn state(limit: u32) -> Arc<AppState> {
        let mut policies = PolicySet::new();
        policies
            .insert(Policy::new(API, limit, Duration::from_secs(60)))
            .unwrap();
        for name in [LOGIN, UPLOAD, SYSTEM_ACTION, SENSITIVE_VIEW] {
            policies
                .insert(Policy::new(name, limit, Duration::from_secs(60)))
                .unwrap();
        }

        Arc::new(AppState::new(
            Arc::new(LoadBalancer::new("localhost:9").unwrap()),
            Arc::new(Throttle::in_memory()),
            policies,
            RouteTable::marketplace(),
        ))
    }

    fn request(path: &str) -> axum::http::Request<Body> {
        axum::http::Request::builder().uri(path).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn health_is_never_throttled() {
        let app = router(state(0));

        let response = app.oneshot(request("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(RATE_LIMIT_LIMIT).is_none());
    }

    #[tokio::test]
    async fn throttled_api_call_never_reaches_upstream() {
        let app = router(state(0));

        let response = app.oneshot(request("/api/products")).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn no_healthy_backend_is_503_with_quota_headers() {
        let state = state(10);
        state.load_balancer.all_backends()[0].set_healthy(false);
        let app = router(state);

        let response = app.oneshot(request("/api/products")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers()[RATE_LIMIT_REMAINING], "9");
    }

    #[tokio::test]
    async fn metrics_endpoint_exposes_throttle_counters() {
        let app = router(state(0));
        app.clone().oneshot(request("/api/orders")).await.unwrap();

        let response = app.oneshot(request("/metrics")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("throttle_rejected_total"));
    }
}
