//! HTTP server for health and metrics endpoints
//!
//! Provides Kubernetes health probes and Prometheus scraping:
//! - `/healthz` - Liveness probe (process is running)
//! - `/readyz` - Readiness probe (controller is watching clusters)
//! - `/metrics` - Controller metrics

mod health;
pub mod metrics;

pub use health::{router, run_health_server, ReadinessState};
pub use metrics::{create_metrics, ControllerMetrics, SharedMetrics};

#[cfg(test)]
#[path = "health_test.rs"]
mod tests;
