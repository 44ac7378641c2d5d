//! Configuration for the replication coordinator
//!
//! Defaults are compiled in and can be overridden via `REPLISTORE_*`
//! environment variables for different deployments.

use std::env;
use std::time::Duration;

/// Parse an environment variable as a typed value with a default fallback
fn env_var_or_default<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

/// Replication coordinator configuration
#[derive(Debug, Clone)]
pub struct ReplicatorConfig {
    /// Upper bound for a single replicated operation, in milliseconds.
    /// Every save/load/membership change runs under
    /// `min(caller deadline, now + replication_timeout)`.
    pub replication_timeout_ms: u64,
    /// TCP connect timeout for the add-member preflight, in milliseconds
    pub preflight_timeout_ms: u64,
}

impl ReplicatorConfig {
    pub fn replication_timeout(&self) -> Duration {
        Duration::from_millis(self.replication_timeout_ms)
    }

    pub fn preflight_timeout(&self) -> Duration {
        Duration::from_millis(self.preflight_timeout_ms)
    }
}

impl Default for ReplicatorConfig {
    fn default() -> Self {
        Self {
            replication_timeout_ms: env_var_or_default("REPLISTORE_REPL_TIMEOUT_MS", 5000),
            preflight_timeout_ms: env_var_or_default("REPLISTORE_PREFLIGHT_TIMEOUT_MS", 2000),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timeouts() {
        let config = ReplicatorConfig::default();
        assert_eq!(config.replication_timeout(), Duration::from_millis(5000));
        assert_eq!(config.preflight_timeout(), Duration::from_millis(2000));
    }

    #[test]
    fn test_timeout_accessors_track_fields() {
        let config = ReplicatorConfig {
            replication_timeout_ms: 100,
            preflight_timeout_ms: 50,
        };
        assert_eq!(config.replication_timeout(), Duration::from_millis(100));
        assert_eq!(config.preflight_timeout(), Duration::from_millis(50));
    }
}
