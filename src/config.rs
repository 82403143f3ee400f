//! Controller runtime configuration
//!
//! Read once at startup from environment variables:
//! - `STRATUM_HEALTH_PORT` - port for `/healthz`, `/readyz`, `/metrics` (default: 8080)
//! - `STRATUM_REQUEUE_SECS` - tick interval while an upgrade is in flight (default: 30)
//! - `STRATUM_IDLE_REQUEUE_SECS` - tick interval otherwise (default: 300)
//! - `STRATUM_RETRY_SECS` - delay after a transient failure (default: 10)
//! - `STRATUM_WATCH_NAMESPACE` - restrict the controller to one namespace (default: all)

use std::time::Duration;
use tracing::warn;

pub const DEFAULT_HEALTH_PORT: u16 = 8080;

#[derive(Debug, Clone, PartialEq)]
pub struct ControllerConfig {
    pub health_port: u16,
    pub requeue_interval: Duration,
    pub idle_requeue_interval: Duration,
    pub retry_interval: Duration,
    pub watch_namespace: Option<String>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        ControllerConfig {
            health_port: DEFAULT_HEALTH_PORT,
            requeue_interval: Duration::from_secs(30),
            idle_requeue_interval: Duration::from_secs(300),
            retry_interval: Duration::from_secs(10),
            watch_namespace: None,
        }
    }
}

impl ControllerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source; unset or invalid values keep the default
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let secs = |key: &str, default: Duration| {
            parse_or(key, lookup(key), default.as_secs()).map_or(default, Duration::from_secs)
        };

        ControllerConfig {
            health_port: parse_or("STRATUM_HEALTH_PORT", lookup("STRATUM_HEALTH_PORT"), defaults.health_port)
                .unwrap_or(defaults.health_port),
            requeue_interval: secs("STRATUM_REQUEUE_SECS", defaults.requeue_interval),
            idle_requeue_interval: secs("STRATUM_IDLE_REQUEUE_SECS", defaults.idle_requeue_interval),
            retry_interval: secs("STRATUM_RETRY_SECS", defaults.retry_interval),
            watch_namespace: lookup("STRATUM_WATCH_NAMESPACE").filter(|ns| !ns.is_empty()),
        }
    }
}

fn parse_or<T: std::str::FromStr>(key: &str, value: Option<String>, default: T) -> Option<T> {
    let Some(raw) = value else {
        return Some(default);
    };

    match raw.trim().parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            warn!(key = key, value = %raw, "Invalid value, using default");
            None
        }
    }
}
