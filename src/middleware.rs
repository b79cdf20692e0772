use axum::{
    Json,
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::warn;

use crate::identity::{Principal, client_key, principal_from_headers};
use crate::metrics::{THROTTLE_ADMITTED, THROTTLE_ENTRIES, THROTTLE_REJECTED};
use crate::models::RejectionBody;
use crate::policy::Policy;
use crate::rate_limit::Decision;
use crate::state::AppState;

pub const RATE_LIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const RATE_LIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const RATE_LIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

// Attaches the upstream-authenticated principal, when its headers are trusted
pub async fn resolve_principal(State(state): State<Arc<AppState>>, mut req: Request, next: Next) -> Response {
    if state.trust_principal_headers {
        if let Some(principal) = principal_from_headers(req.headers()) {
            req.extensions_mut().insert(principal);
        }
    }

    next.run(req).await
}

/// Applies the policy bound to the request's route class.
///
/// Unclassified routes pass through untouched. Classified ones always carry
/// the three rate-limit headers; rejected ones get a 429 with a JSON body
/// and never reach the inner service.
pub async fn throttle(State(state): State<Arc<AppState>>, req: Request, next: Next) -> Response {
    let Some(policy) = state
        .routes
        .classify(req.method(), req.uri().path())
        .and_then(|name| state.policies.get(name))
    else {
        return next.run(req).await;
    };

    let principal = req.extensions().get::<Principal>();
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let key = client_key(principal, req.headers(), peer);
    let privileged = (state.is_privileged)(principal);

    let decision = state.throttle.check(policy, &key, privileged);
    THROTTLE_ENTRIES.set(state.throttle.tracked() as f64);

    let mut response = match decision {
        Decision::Admitted { .. } => {
            THROTTLE_ADMITTED.with_label_values(&[policy.name.as_str()]).inc();
            next.run(req).await
        }
        Decision::Rejected { retry_after_secs, .. } => {
            THROTTLE_REJECTED.with_label_values(&[policy.name.as_str()]).inc();
            warn!(
                policy = %policy.name,
                client = %key,
                retry_after = retry_after_secs,
                "request throttled"
            );
            rejection(policy, retry_after_secs)
        }
    };

    decorate(response.headers_mut(), &decision);
    response
}

fn rejection(policy: &Policy, retry_after_secs: u64) -> Response {
    (
        StatusCode::TOO_MANY_REQUESTS,
        [(header::RETRY_AFTER, HeaderValue::from(retry_after_secs))],
        Json(RejectionBody::new(policy.message.clone(), retry_after_secs)),
    )
        .into_response()
}

fn decorate(headers: &mut HeaderMap, decision: &Decision) {
    headers.insert(RATE_LIMIT_LIMIT, HeaderValue::from(decision.limit()));
    headers.insert(RATE_LIMIT_REMAINING, HeaderValue::from(decision.remaining()));
    headers.insert(RATE_LIMIT_RESET, HeaderValue::from(decision.reset_at_secs()));
}
