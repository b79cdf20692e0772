use axum::{
    body::{Body, Bytes, to_bytes},
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderValue, header},
    response::Response,
};
use http_body_util::LengthLimitError;
use std::error::Error as StdError;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use crate::error::AppError;
use crate::identity::FORWARDED_FOR;
use crate::metrics::{REQUEST_TOTAL, UPSTREAM_LATENCY};
use crate::state::AppState;

// Connection-scoped headers, never forwarded in either direction
const HOP_BY_HOP: [header::HeaderName; 8] = [
    header::CONNECTION,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
    header::CONTENT_LENGTH,
];

// Forwards whatever the throttle admitted to the next healthy backend
pub async fn proxy_handler(State(state): State<Arc<AppState>>, req: Request) -> Result<Response, AppError> {
    REQUEST_TOTAL.inc();

    let backend = state
        .load_balancer
        .get_backend()
        .ok_or(AppError::NoHealthyBackend)?;

    let (parts, body) = req.into_parts();
    let body = read_body(body, state.max_body_bytes).await?;

    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let url = format!("{}{}", backend.url, path_and_query);

    let peer = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let mut headers = strip_hop_by_hop(parts.headers);
    headers.remove(header::HOST);
    if let Some(peer) = peer {
        append_forwarded_for(&mut headers, peer);
    }

    debug!(method = %parts.method, %url, "forwarding request");

    let start = Instant::now();
    let result = state
        .client
        .request(parts.method, &url)
        .headers(headers)
        .body(body)
        .send()
        .await;

    let upstream = match result {
        Ok(res) => res,
        // Marking backend as unhealthy on transport error
        Err(e) => {
            backend.set_healthy(false);
            warn!(backend = %backend.url, error = %e, "backend failed, marked unhealthy");
            return Err(AppError::Upstream(e.to_string()));
        }
    };

    let status = upstream.status();
    let upstream_headers = strip_hop_by_hop(upstream.headers().clone());
    let bytes = upstream
        .bytes()
        .await
        .map_err(|e| AppError::Upstream(e.to_string()))?;

    UPSTREAM_LATENCY.observe(start.elapsed().as_secs_f64());

    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = status;
    *response.headers_mut() = upstream_headers;
    Ok(response)
}

// Only an oversized body is a 413, anything else is the client's broken stream
async fn read_body(body: Body, limit: usize) -> Result<Bytes, AppError> {
    to_bytes(body, limit).await.map_err(|e| {
        if exceeds_limit(&e) {
            AppError::BodyTooLarge { limit }
        } else {
            AppError::Body(e.to_string())
        }
    })
}

fn exceeds_limit(err: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if e.is::<LengthLimitError>() {
            return true;
        }
        current = e.source();
    }
    false
}

fn strip_hop_by_hop(mut headers: HeaderMap) -> HeaderMap {
    for name in &HOP_BY_HOP {
        headers.remove(name);
    }
    headers.remove("keep-alive");
    headers
}

fn append_forwarded_for(headers: &mut HeaderMap, peer: SocketAddr) {
    let ip = peer.ip().to_string();
    let chain = match headers.get(FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
        Some(existing) if !existing.trim().is_empty() => format!("{existing}, {ip}"),
        _ => ip,
    };

    if let Ok(value) = HeaderValue::from_str(&chain) {
        headers.insert(FORWARDED_FOR, value);
    }
}
