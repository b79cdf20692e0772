use axum::http::Method;
use std::collections::HashMap;
use std::time::Duration;

use crate::error::AppError;

// Built-in endpoint classes
pub const LOGIN: &str = "login";
pub const API: &str = "api";
pub const UPLOAD: &str = "upload";
pub const SYSTEM_ACTION: &str = "system-action";
pub const SENSITIVE_VIEW: &str = "sensitive-view";

// Privileged ceiling when a bypass policy names no admin limit
pub const PRACTICALLY_UNLIMITED: u32 = u32::MAX;

const DEFAULT_MESSAGE: &str = "Too many requests, please try again later.";

/// Window and quota for one endpoint class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Policy {
    pub name: String,
    pub window: Duration,
    pub limit: u32,
    pub key_prefix: String,
    pub admin_bypass: bool,
    pub admin_limit: Option<u32>,
    // Human readable text for the rejection payload
    pub message: String,
}

impl Policy {
    pub fn new(name: impl Into<String>, limit: u32, window: Duration) -> Self {
        let name = name.into();
        Self {
            key_prefix: name.clone(),
            name,
            window,
            limit,
            admin_bypass: false,
            admin_limit: None,
            message: DEFAULT_MESSAGE.to_string(),
        }
    }

    pub fn with_key_prefix(mut self, key_prefix: impl Into<String>) -> Self {
        self.key_prefix = key_prefix.into();
        self
    }

    pub fn with_admin_bypass(mut self, admin_limit: Option<u32>) -> Self {
        self.admin_bypass = true;
        self.admin_limit = admin_limit;
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    // Privileged callers only get a bigger number, never a different path
    pub fn effective_limit(&self, privileged: bool) -> u32 {
        if privileged && self.admin_bypass {
            self.admin_limit.unwrap_or(PRACTICALLY_UNLIMITED)
        } else {
            self.limit
        }
    }

    pub fn window_ms(&self) -> u64 {
        u64::try_from(self.window.as_millis()).unwrap_or(u64::MAX)
    }

    pub fn store_key(&self, client_key: &str) -> String {
        format!("{}:{}", self.key_prefix, client_key)
    }
}

/// Named set of policies.
#[derive(Debug, Clone, Default)]
pub struct PolicySet {
    policies: HashMap<String, Policy>,
}

impl PolicySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, policy: Policy) -> Result<(), AppError> {
        if policy.window.is_zero() {
            return Err(AppError::Config(format!(
                "policy '{}' has a zero-length window",
                policy.name
            )));
        }
        if policy.key_prefix.is_empty() {
            return Err(AppError::Config(format!(
                "policy '{}' has an empty key prefix",
                policy.name
            )));
        }
        self.policies.insert(policy.name.clone(), policy);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Policy> {
        self.policies.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.policies.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Policy> {
        self.policies.values()
    }
}

// One row of the route table. `method: None` matches any method.
#[derive(Debug, Clone)]
pub struct RouteRule {
    pub method: Option<Method>,
    pub prefix: String,
    pub policy: String,
}

impl RouteRule {
    pub fn new(method: Option<Method>, prefix: impl Into<String>, policy: impl Into<String>) -> Self {
        Self {
            method,
            prefix: prefix.into(),
            policy: policy.into(),
        }
    }

    fn matches(&self, method: &Method, path: &str) -> bool {
        if let Some(expected) = &self.method {
            if expected != method {
                return false;
            }
        }

        // Prefix only matches on a segment boundary: /api/uploads never catches /api/uploadsx
        let prefix = self.prefix.trim_end_matches('/');
        match path.strip_prefix(prefix) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }
}

/// Maps inbound requests to a policy name, first matching rule wins.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    rules: Vec<RouteRule>,
}

impl RouteTable {
    pub fn new(rules: Vec<RouteRule>) -> Self {
        Self { rules }
    }

    // Endpoint classes of the marketplace API
    pub fn marketplace() -> Self {
        Self::new(vec![
            RouteRule::new(Some(Method::POST), "/api/auth/login", LOGIN),
            RouteRule::new(Some(Method::POST), "/api/uploads", UPLOAD),
            RouteRule::new(None, "/api/system", SYSTEM_ACTION),
            RouteRule::new(Some(Method::GET), "/api/credentials", SENSITIVE_VIEW),
            RouteRule::new(None, "/api", API),
        ])
    }

    pub fn classify(&self, method: &Method, path: &str) -> Option<&str> {
        self.rules
            .iter()
            .find(|rule| rule.matches(method, path))
            .map(|rule| rule.policy.as_str())
    }

    // Every rule must point at a policy that exists
    pub fn validate(&self, policies: &PolicySet) -> Result<(), AppError> {
        for rule in &self.rules {
            if !policies.contains(&rule.policy) {
                return Err(AppError::Config(format!(
                    "route '{}' references unknown policy '{}'",
                    rule.prefix, rule.policy
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_limit_substitutes_admin_limit() {
        let sensitive = Policy::new(SENSITIVE_VIEW, 1, Duration::from_secs(120))
            .with_admin_bypass(Some(1000));

        assert_eq!(sensitive.effective_limit(false), 1);
        assert_eq!(sensitive.effective_limit(true), 1000);
    }

    #[test]
    fn bypass_without_admin_limit_is_practically_unlimited() {
        let policy = Policy::new("reports", 3, Duration::from_secs(60)).with_admin_bypass(None);
        assert_eq!(policy.effective_limit(true), PRACTICALLY_UNLIMITED);
    }

    #[test]
    fn privilege_is_ignored_without_bypass() {
        let login = Policy::new(LOGIN, 5, Duration::from_secs(900));
        assert_eq!(login.effective_limit(true), 5);
    }

    #[test]
    fn store_key_uses_prefix() {
        let policy = Policy::new(LOGIN, 5, Duration::from_secs(900)).with_key_prefix("rl:login");
        assert_eq!(policy.store_key("1.2.3.4"), "rl:login:1.2.3.4");
    }

    #[test]
    fn huge_window_saturates_instead_of_truncating() {
        let policy = Policy::new(API, 10, Duration::from_secs(u64::MAX));
        assert_eq!(policy.window_ms(), u64::MAX);
    }

    #[test]
    fn zero_window_is_rejected() {
        let mut set = PolicySet::new();
        let err = set.insert(Policy::new(API, 10, Duration::ZERO)).unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
        assert!(set.is_empty());
    }

    #[test]
    fn marketplace_routes_classify_by_method_and_prefix() {
        let routes = RouteTable::marketplace();

        assert_eq!(routes.classify(&Method::POST, "/api/auth/login"), Some(LOGIN));
        assert_eq!(routes.classify(&Method::GET, "/api/auth/login"), Some(API));
        assert_eq!(routes.classify(&Method::POST, "/api/uploads/images"), Some(UPLOAD));
        assert_eq!(routes.classify(&Method::POST, "/api/system/reindex"), Some(SYSTEM_ACTION));
        assert_eq!(routes.classify(&Method::GET, "/api/credentials/42"), Some(SENSITIVE_VIEW));
        assert_eq!(routes.classify(&Method::DELETE, "/api/credentials/42"), Some(API));
        assert_eq!(routes.classify(&Method::GET, "/api/products"), Some(API));
        assert_eq!(routes.classify(&Method::GET, "/api"), Some(API));
    }

    #[test]
    fn unrelated_paths_are_not_classified() {
        let routes = RouteTable::marketplace();

        assert_eq!(routes.classify(&Method::GET, "/health"), None);
        assert_eq!(routes.classify(&Method::GET, "/metrics"), None);
        assert_eq!(routes.classify(&Method::GET, "/apix"), None);
    }

    #[test]
    fn validate_catches_unknown_policy() {
        let mut policies = PolicySet::new();
        policies
            .insert(Policy::new(API, 100, Duration::from_secs(60)))
            .unwrap();

        assert!(RouteTable::new(vec![RouteRule::new(None, "/api", API)])
            .validate(&policies)
            .is_ok());
        assert!(RouteTable::marketplace().validate(&policies).is_err());
    }
}
