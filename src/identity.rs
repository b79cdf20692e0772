use axum::http::HeaderMap;
use std::net::SocketAddr;

// Client key used when nothing identifies the caller
pub const UNKNOWN_CLIENT: &str = "unknown";

pub const FORWARDED_FOR: &str = "x-forwarded-for";
pub const PRINCIPAL_ID: &str = "x-principal-id";
pub const PRINCIPAL_ROLE: &str = "x-principal-role";

const PRIVILEGED_ROLES: [&str; 2] = ["admin", "superadmin"];

/// Caller identity established upstream of the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub id: String,
    pub privileged: bool,
}

impl Principal {
    pub fn new(id: impl Into<String>, privileged: bool) -> Self {
        Self {
            id: id.into(),
            privileged,
        }
    }
}

// Principal id, else first forwarded-for hop, else peer address, else "unknown"
pub fn client_key(principal: Option<&Principal>, headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    if let Some(principal) = principal {
        let id = principal.id.trim();
        if !id.is_empty() {
            return id.to_string();
        }
    }

    if let Some(origin) = forwarded_origin(headers) {
        return origin;
    }

    match peer {
        Some(addr) => addr.ip().to_string(),
        None => UNKNOWN_CLIENT.to_string(),
    }
}

fn forwarded_origin(headers: &HeaderMap) -> Option<String> {
    let chain = headers.get(FORWARDED_FOR)?.to_str().ok()?;
    let first = chain.split(',').next()?.trim();
    if first.is_empty() {
        None
    } else {
        Some(first.to_string())
    }
}

// Reads the principal a trusted front proxy attached to the request
pub fn principal_from_headers(headers: &HeaderMap) -> Option<Principal> {
    let id = headers.get(PRINCIPAL_ID)?.to_str().ok()?.trim();
    if id.is_empty() {
        return None;
    }

    let privileged = headers
        .get(PRINCIPAL_ROLE)
        .and_then(|role| role.to_str().ok())
        .map(|role| {
            PRIVILEGED_ROLES
                .iter()
                .any(|privileged| role.trim().eq_ignore_ascii_case(privileged))
        })
        .unwrap_or(false);

    Some(Principal::new(id, privileged))
}

// Default privilege predicate
pub fn is_admin(principal: Option<&Principal>) -> bool {
    principal.is_some_and(|p| p.privileged)
}
