//! Process-wide kernel configuration, read from the environment.

use std::time::Duration;

use tracing::warn;

/// Environment variable names (stable operational contract).
pub const ENV_RECLAIM_AFTER_SECONDS: &str = "PROXY_RECLAIM_AFTER_SECONDS";
pub const ENV_OUTBOX_MAX_ATTEMPTS: &str = "PROXY_OUTBOX_MAX_ATTEMPTS";
pub const ENV_WORKER_STATEMENT_TIMEOUT_MS: &str = "PROXY_PG_WORKER_STATEMENT_TIMEOUT_MS";
pub const ENV_PLATFORM_MAX_PENDING_DELIVERIES: &str = "PROXY_QUOTA_PLATFORM_MAX_PENDING_DELIVERIES";

const STATEMENT_TIMEOUT_MAX_MS: u64 = 60_000;

/// Kernel configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Outbox/delivery leases older than this are reclaimable.
    pub reclaim_after: Duration,
    /// Outbox messages whose attempts reach this count go to the DLQ.
    pub outbox_max_attempts: u32,
    /// Per-worker statement timeout; zero disables it.
    pub worker_statement_timeout: Duration,
    /// Platform-wide cap on a tenant's pending deliveries; zero means no cap.
    pub platform_max_pending_deliveries: u64,
    /// Key id of the server bootstrap signer (exempt from signer-key checks).
    pub bootstrap_key_id: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            reclaim_after: Duration::from_secs(60),
            outbox_max_attempts: 25,
            worker_statement_timeout: Duration::ZERO,
            platform_max_pending_deliveries: 0,
            bootstrap_key_id: "server-bootstrap".to_string(),
        }
    }
}

impl StoreConfig {
    /// Read configuration from the process environment. Invalid values fall
    /// back to the default with a warning.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(secs) = read_u64(ENV_RECLAIM_AFTER_SECONDS) {
            if secs > 0 {
                config.reclaim_after = Duration::from_secs(secs);
            } else {
                warn!(var = ENV_RECLAIM_AFTER_SECONDS, "must be positive, using default");
            }
        }

        if let Some(attempts) = read_u64(ENV_OUTBOX_MAX_ATTEMPTS) {
            if attempts > 0 && attempts <= u32::MAX as u64 {
                config.outbox_max_attempts = attempts as u32;
            } else {
                warn!(var = ENV_OUTBOX_MAX_ATTEMPTS, "must be positive, using default");
            }
        }

        if let Some(ms) = read_u64(ENV_WORKER_STATEMENT_TIMEOUT_MS) {
            if ms <= STATEMENT_TIMEOUT_MAX_MS {
                config.worker_statement_timeout = Duration::from_millis(ms);
            } else {
                warn!(
                    var = ENV_WORKER_STATEMENT_TIMEOUT_MS,
                    max = STATEMENT_TIMEOUT_MAX_MS,
                    "out of range, using default"
                );
            }
        }

        if let Some(max) = read_u64(ENV_PLATFORM_MAX_PENDING_DELIVERIES) {
            config.platform_max_pending_deliveries = max;
        }

        config
    }

    /// Effective pending-delivery cap for a tenant limit, applying the
    /// platform clamp. Zero means uncapped.
    pub fn effective_delivery_cap(&self, tenant_limit: u64) -> u64 {
        match (tenant_limit, self.platform_max_pending_deliveries) {
            (0, platform) => platform,
            (tenant, 0) => tenant,
            (tenant, platform) => tenant.min(platform),
        }
    }
}

fn read_u64(var: &str) -> Option<u64> {
    let raw = std::env::var(var).ok()?;
    match raw.trim().parse::<u64>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(var, value = %raw, "not a non-negative integer, using default");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_operational_contract() {
        let config = StoreConfig::default();
        assert_eq!(config.reclaim_after, Duration::from_secs(60));
        assert_eq!(config.outbox_max_attempts, 25);
        assert_eq!(config.worker_statement_timeout, Duration::ZERO);
        assert_eq!(config.platform_max_pending_deliveries, 0);
    }

    #[test]
    fn platform_cap_clamps_tenant_limit() {
        let mut config = StoreConfig::default();
        config.platform_max_pending_deliveries = 100;
        assert_eq!(config.effective_delivery_cap(0), 100);
        assert_eq!(config.effective_delivery_cap(50), 50);
        assert_eq!(config.effective_delivery_cap(500), 100);

        config.platform_max_pending_deliveries = 0;
        assert_eq!(config.effective_delivery_cap(0), 0);
        assert_eq!(config.effective_delivery_cap(7), 7);
    }
}
