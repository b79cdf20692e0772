use clap::Parser;
use std::time::Duration;

use crate::error::AppError;
use crate::policy::{API, LOGIN, Policy, PolicySet, SENSITIVE_VIEW, SYSTEM_ACTION, UPLOAD};

// CLI argument structure, every flag can also come from the environment
#[derive(Parser, Debug, Clone)]
#[command(name = "marketplace-throttle")]
#[command(about = "Rate-limiting gateway in front of the vendor marketplace API")]
pub struct Args {
    // Port to run the server on
    #[arg(short, long, env = "GATEWAY_PORT", default_value_t = 8080)]
    pub port: u16,

    // Backend servers (comma-separated)
    // Example: "localhost:5000,localhost:5001"
    #[arg(short, long, env = "GATEWAY_BACKENDS", default_value = "localhost:5000")]
    pub backends: String,

    // Health check interval in seconds
    #[arg(long, env = "GATEWAY_HEALTH_INTERVAL_SECS", default_value_t = 30)]
    pub health_interval: u64,

    // Largest request body forwarded upstream
    #[arg(long, env = "GATEWAY_MAX_BODY_BYTES", default_value_t = 50 * 1024 * 1024)]
    pub max_body_bytes: usize,

    // Honour X-Principal-Id / X-Principal-Role set by a trusted auth proxy
    #[arg(long, env = "GATEWAY_TRUST_PRINCIPAL_HEADERS")]
    pub trust_principal_headers: bool,

    // Seconds between sweeps of elapsed throttle entries
    #[arg(long, env = "THROTTLE_SWEEP_INTERVAL_SECS", default_value_t = 300)]
    pub sweep_interval: u64,

    #[arg(long, env = "THROTTLE_LOGIN_LIMIT", default_value_t = 5)]
    pub login_limit: u32,

    #[arg(long, env = "THROTTLE_LOGIN_WINDOW_SECS", default_value_t = 900)]
    pub login_window: u64,

    #[arg(long, env = "THROTTLE_API_LIMIT", default_value_t = 100)]
    pub api_limit: u32,

    #[arg(long, env = "THROTTLE_API_WINDOW_SECS", default_value_t = 60)]
    pub api_window: u64,

    #[arg(long, env = "THROTTLE_UPLOAD_LIMIT", default_value_t = 10)]
    pub upload_limit: u32,

    #[arg(long, env = "THROTTLE_UPLOAD_WINDOW_SECS", default_value_t = 900)]
    pub upload_window: u64,

    #[arg(long, env = "THROTTLE_SYSTEM_LIMIT", default_value_t = 10)]
    pub system_limit: u32,

    #[arg(long, env = "THROTTLE_SYSTEM_WINDOW_SECS", default_value_t = 60)]
    pub system_window: u64,

    #[arg(long, env = "THROTTLE_SENSITIVE_LIMIT", default_value_t = 1)]
    pub sensitive_limit: u32,

    #[arg(long, env = "THROTTLE_SENSITIVE_WINDOW_SECS", default_value_t = 120)]
    pub sensitive_window: u64,

    // Ceiling for admins on the sensitive-view policy
    #[arg(long, env = "THROTTLE_SENSITIVE_ADMIN_LIMIT", default_value_t = 1000)]
    pub sensitive_admin_limit: u32,
}

impl Args {
    pub fn policies(&self) -> Result<PolicySet, AppError> {
        let mut set = PolicySet::new();

        set.insert(
            Policy::new(LOGIN, self.login_limit, Duration::from_secs(self.login_window))
                .with_message("Too many login attempts, please try again later."),
        )?;
        set.insert(
            Policy::new(API, self.api_limit, Duration::from_secs(self.api_window))
                .with_message("Too many requests, please slow down."),
        )?;
        set.insert(
            Policy::new(UPLOAD, self.upload_limit, Duration::from_secs(self.upload_window))
                .with_message("Too many uploads, please try again later."),
        )?;
        set.insert(
            Policy::new(SYSTEM_ACTION, self.system_limit, Duration::from_secs(self.system_window))
                .with_message("Too many system actions, please wait before retrying."),
        )?;
        set.insert(
            Policy::new(SENSITIVE_VIEW, self.sensitive_limit, Duration::from_secs(self.sensitive_window))
                .with_admin_bypass(Some(self.sensitive_admin_limit))
                .with_message("Sensitive data can only be viewed once per window."),
        )?;

        Ok(set)
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health_interval)
    }

    pub fn sweep_interval(&self) -> Result<Duration, AppError> {
        if self.sweep_interval == 0 {
            return Err(AppError::Config("sweep interval must be positive".to_string()));
        }
        Ok(Duration::from_secs(self.sweep_interval))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_build_five_policies() {
        let args = Args::try_parse_from(["marketplace-throttle"]).unwrap();
        let policies = args.policies().unwrap();

        assert_eq!(policies.len(), 5);

        let login = policies.get(LOGIN).unwrap();
        assert_eq!(login.limit, 5);
        assert_eq!(login.window_ms(), 900_000);
        assert!(!login.admin_bypass);

        let sensitive = policies.get(SENSITIVE_VIEW).unwrap();
        assert_eq!(sensitive.limit, 1);
        assert_eq!(sensitive.window_ms(), 120_000);
        assert_eq!(sensitive.effective_limit(true), 1000);

        assert_eq!(policies.get(API).unwrap().window_ms(), 60_000);
    }

    #[test]
    fn flags_override_policy_constants() {
        let args = Args::try_parse_from([
            "marketplace-throttle",
            "--login-limit",
            "3",
            "--api-window",
            "30",
            "--trust-principal-headers",
        ])
        .unwrap();
        let policies = args.policies().unwrap();

        assert_eq!(policies.get(LOGIN).unwrap().limit, 3);
        assert_eq!(policies.get(API).unwrap().window_ms(), 30_000);
        assert!(args.trust_principal_headers);
    }

    #[test]
    fn zero_windows_are_rejected() {
        let args = Args::try_parse_from(["marketplace-throttle", "--upload-window", "0"]).unwrap();
        assert!(args.policies().is_err());

        let args = Args::try_parse_from(["marketplace-throttle", "--sweep-interval", "0"]).unwrap();
        assert!(args.sweep_interval().is_err());
    }
}
