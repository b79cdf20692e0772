use std::sync::Arc;
use tokio::time::{Duration, interval};
use tracing::{debug, info};

use crate::identity::UNKNOWN_CLIENT;
use crate::metrics::{THROTTLE_ENTRIES, THROTTLE_EVICTED};
use crate::policy::Policy;
use crate::store::{MemoryStore, ThrottleStore};

// Rate limit entry - tracks requests per (policy, client) key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleEntry {
    pub window_start_ms: u64,
    pub window_ms: u64,
    pub count: u32,
    pub limit: u32,
}

impl ThrottleEntry {
    pub fn expires_at_ms(&self) -> u64 {
        self.window_start_ms.saturating_add(self.window_ms)
    }

    pub fn is_elapsed(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at_ms()
    }
}

/// Outcome of a single `check`.
///
/// A rejection is the quota-exceeded signal; it is a value for the caller
/// to turn into a response, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Admitted {
        limit: u32,
        remaining: u32,
        reset_at_secs: u64,
    },
    Rejected {
        limit: u32,
        retry_after_secs: u64,
        reset_at_secs: u64,
    },
}

impl Decision {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Decision::Admitted { .. })
    }

    pub fn limit(&self) -> u32 {
        match self {
            Decision::Admitted { limit, .. } | Decision::Rejected { limit, .. } => *limit,
        }
    }

    pub fn remaining(&self) -> u32 {
        match self {
            Decision::Admitted { remaining, .. } => *remaining,
            Decision::Rejected { .. } => 0,
        }
    }

    pub fn reset_at_secs(&self) -> u64 {
        match self {
            Decision::Admitted { reset_at_secs, .. } | Decision::Rejected { reset_at_secs, .. } => {
                *reset_at_secs
            }
        }
    }

    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Decision::Admitted { .. } => None,
            Decision::Rejected { retry_after_secs, .. } => Some(*retry_after_secs),
        }
    }
}

// Fixed-window throttle shared by every policy
pub struct Throttle {
    store: Arc<dyn ThrottleStore>,
}

impl Throttle {
    pub fn new(store: Arc<dyn ThrottleStore>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    pub fn check(&self, policy: &Policy, client_key: &str, privileged: bool) -> Decision {
        self.check_at(policy, client_key, privileged, now_ms())
    }

    pub fn check_at(&self, policy: &Policy, client_key: &str, privileged: bool, now_ms: u64) -> Decision {
        let client_key = match client_key.trim() {
            "" => UNKNOWN_CLIENT,
            key => key,
        };
        let key = policy.store_key(client_key);
        let limit = policy.effective_limit(privileged);
        let window_ms = policy.window_ms();

        let entry = self.store.update(&key, &mut |current| {
            let mut entry = match current {
                Some(entry) if !entry.is_elapsed(now_ms) => entry,
                _ => ThrottleEntry {
                    window_start_ms: now_ms,
                    window_ms,
                    count: 0,
                    limit,
                },
            };
            entry.limit = limit;
            // a key checked under a bigger limit earlier may carry a larger count
            entry.count = entry.count.min(limit.saturating_add(1));
            // stop counting once the first over-limit request is recorded
            if entry.count <= limit {
                entry.count = entry.count.saturating_add(1);
            }
            entry
        });

        let expires_at_ms = entry.expires_at_ms();
        let reset_at_secs = expires_at_ms.div_ceil(1000);

        if entry.count > limit {
            Decision::Rejected {
                limit,
                // bounded by the window even if the wall clock stepped back
                retry_after_secs: expires_at_ms
                    .saturating_sub(now_ms)
                    .div_ceil(1000)
                    .min(entry.window_ms.div_ceil(1000)),
                reset_at_secs,
            }
        } else {
            Decision::Admitted {
                limit,
                remaining: limit - entry.count,
                reset_at_secs,
            }
        }
    }

    // Evicts entries whose window ended before `now_ms`
    pub fn sweep(&self, now_ms: u64) -> usize {
        let mut evicted = 0;
        self.store.retain(&mut |_, entry| {
            let keep = entry.expires_at_ms() >= now_ms;
            if !keep {
                evicted += 1;
            }
            keep
        });
        evicted
    }

    pub fn entry(&self, policy: &Policy, client_key: &str) -> Option<ThrottleEntry> {
        self.store.get(&policy.store_key(client_key))
    }

    pub fn tracked(&self) -> usize {
        self.store.len()
    }
}

pub fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

// Sweeper - runs every `every` until the process exits
pub async fn sweeper(throttle: Arc<Throttle>, every: Duration) {
    let mut interval = interval(every);
    // first tick fires immediately, nothing to sweep yet
    interval.tick().await;

    info!(interval = ?every, "throttle sweeper started");

    loop {
        interval.tick().await;

        let evicted = throttle.sweep(now_ms());
        THROTTLE_EVICTED.inc_by(evicted as f64);
        THROTTLE_ENTRIES.set(throttle.tracked() as f64);

        if evicted > 0 {
            debug!(evicted, remaining = throttle.tracked(), "swept elapsed throttle entries");
        }
    }
}
