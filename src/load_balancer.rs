use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::time::{Duration, interval};
use tracing::{info, warn};

use crate::error::AppError;

// Single marketplace backend

pub struct Backend {
    pub url: String,
    healthy: AtomicBool,
}

impl Backend {
    pub fn new(url: String) -> Self {
        Self {
            url,
            healthy: AtomicBool::new(true),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::Relaxed);
    }
}

// Round-robin over multiple backends

pub struct LoadBalancer {
    backends: Vec<Arc<Backend>>,
    current: AtomicUsize,
}

impl LoadBalancer {
    // Create from comma-separated urls "localhost:5000, localhost:5001"
    pub fn new(backends_str: &str) -> Result<Self, AppError> {
        let backends: Vec<Arc<Backend>> = backends_str
            .split(',')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|url| {
                // add http:// if not present
                let full_url = if url.starts_with("http") {
                    url.trim_end_matches('/').to_string()
                } else {
                    format!("http://{}", url.trim_end_matches('/'))
                };
                Arc::new(Backend::new(full_url))
            })
            .collect();

        if backends.is_empty() {
            return Err(AppError::Config("at least one backend required".to_string()));
        }

        info!(count = backends.len(), "load balancer initialized");
        for (i, b) in backends.iter().enumerate() {
            info!("  [{}] {}", i + 1, b.url);
        }

        Ok(Self {
            backends,
            current: AtomicUsize::new(0),
        })
    }

    // Next healthy backend (round-robin)
    pub fn get_backend(&self) -> Option<Arc<Backend>> {
        let len = self.backends.len();
        let start = self.current.fetch_add(1, Ordering::Relaxed) % len;

        (0..len)
            .map(|i| &self.backends[(start + i) % len])
            .find(|backend| backend.is_healthy())
            .map(Arc::clone)
    }

    pub fn all_backends(&self) -> &[Arc<Backend>] {
        &self.backends
    }

    pub fn healthy_count(&self) -> usize {
        self.backends.iter().filter(|b| b.is_healthy()).count()
    }
}

// Health check loop, probes every backend's /health

pub async fn health_checker(
    load_balancer: Arc<LoadBalancer>,
    client: reqwest::Client,
    check_interval: Duration,
) {
    let mut interval = interval(check_interval);

    info!(interval = ?check_interval, "health checker started");

    loop {
        interval.tick().await;

        for backend in load_balancer.all_backends() {
            let url = format!("{}/health", backend.url);

            let was_healthy = backend.is_healthy();

            let is_healthy = match client.get(&url).timeout(Duration::from_secs(5)).send().await {
                Ok(res) => res.status().is_success(),
                Err(_) => false,
            };
            backend.set_healthy(is_healthy);

            // Log status changes
            if was_healthy != is_healthy {
                if is_healthy {
                    info!(backend = %backend.url, "backend is now healthy");
                } else {
                    warn!(backend = %backend.url, "backend is now unhealthy");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_normalizes_urls() {
        let lb = LoadBalancer::new(" localhost:5000, https://api.internal/ ,").unwrap();
        let urls: Vec<&str> = lb.all_backends().iter().map(|b| b.url.as_str()).collect();
        assert_eq!(urls, vec!["http://localhost:5000", "https://api.internal"]);
    }

    #[test]
    fn empty_backend_list_is_a_config_error() {
        assert!(matches!(LoadBalancer::new(" , "), Err(AppError::Config(_))));
    }

    #[test]
    fn round_robin_skips_unhealthy() {
        let lb = LoadBalancer::new("a:1,b:2,c:3").unwrap();
        lb.all_backends()[1].set_healthy(false);

        let picked: Vec<String> = (0..4)
            .map(|_| lb.get_backend().unwrap().url.clone())
            .collect();
        assert_eq!(picked, vec!["http://a:1", "http://c:3", "http://c:3", "http://a:1"]);
        assert_eq!(lb.healthy_count(), 2);
    }

    #[test]
    fn none_when_all_unhealthy() {
        let lb = LoadBalancer::new("a:1").unwrap();
        lb.all_backends()[0].set_healthy(false);
        assert!(lb.get_backend().is_none());
    }
}
