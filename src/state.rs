use std::sync::Arc;

use crate::identity::{Principal, is_admin};
use crate::load_balancer::LoadBalancer;
use crate::policy::{PolicySet, RouteTable};
use crate::rate_limit::Throttle;

// Decides whether a principal gets a policy's admin limit
pub type PrivilegePredicate = Arc<dyn Fn(Option<&Principal>) -> bool + Send + Sync>;

// app's shared state

pub struct AppState {
    pub client: reqwest::Client,
    pub load_balancer: Arc<LoadBalancer>,
    pub throttle: Arc<Throttle>,
    pub policies: PolicySet,
    pub routes: RouteTable,
    pub is_privileged: PrivilegePredicate,
    pub trust_principal_headers: bool,
    pub max_body_bytes: usize,
}

impl AppState {
    pub fn new(
        load_balancer: Arc<LoadBalancer>,
        throttle: Arc<Throttle>,
        policies: PolicySet,
        routes: RouteTable,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            load_balancer,
            throttle,
            policies,
            routes,
            is_privileged: Arc::new(is_admin),
            trust_principal_headers: false,
            max_body_bytes: 50 * 1024 * 1024,
        }
    }
}
