//! kube-runtime entry point
//!
//! Each reconcile refreshes the `PodsReady` condition from the tier
//! workloads, runs one version sync tick and picks the next requeue delay.

use crate::config::ControllerConfig;
use crate::controller::builder::{workload_name, ConfigBuilder};
use crate::controller::platform::{Platform, PlatformError};
use crate::controller::sync::{SyncOutcome, VersionSynchronizer};
use crate::controller::tier::TIER_ORDER;
use crate::crd::cluster::StreamCluster;
use crate::server::metrics::SharedMetrics;
use chrono::{DateTime, Utc};
use kube::runtime::controller::Action;
use kube::ResourceExt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("StreamCluster missing namespace")]
    MissingNamespace,

    #[error("failed to persist cluster status: {0}")]
    StatusPersist(PlatformError),
}

pub struct Context {
    pub platform: Arc<dyn Platform>,
    pub builder: Arc<dyn ConfigBuilder>,
    pub metrics: SharedMetrics,
    pub config: ControllerConfig,
}

impl Context {
    pub fn new(
        platform: Arc<dyn Platform>,
        builder: Arc<dyn ConfigBuilder>,
        metrics: SharedMetrics,
        config: ControllerConfig,
    ) -> Self {
        Context {
            platform,
            builder,
            metrics,
            config,
        }
    }
}

/// Recompute the `PodsReady` condition from the three tier workloads
///
/// True only when every workload exists and all of its desired replicas are
/// ready. A failed lookup marks the cluster not ready with the error as message.
pub async fn refresh_pods_ready(
    platform: &dyn Platform,
    cluster: &mut StreamCluster,
    now: DateTime<Utc>,
) {
    let name = cluster.name_any();
    let namespace = cluster.namespace().unwrap_or_default();

    let mut ready = 0;
    let mut desired = 0;
    let mut lookup_error: Option<PlatformError> = None;

    for tier in TIER_ORDER {
        let workload = workload_name(&name, tier);
        match platform
            .get_workload(tier.shape(), &namespace, &workload)
            .await
        {
            Ok(w) => {
                ready += w.ready_replicas.min(w.desired_replicas);
                desired += w.desired_replicas;
            }
            Err(e) => {
                lookup_error = Some(e);
                break;
            }
        }
    }

    let status = cluster.status.take().unwrap_or_default();
    let status = match lookup_error {
        Some(e) => {
            debug!(cluster = %name, error = %e, "Could not determine pod readiness");
            status.pods_ready(false, &e.to_string(), now)
        }
        None => {
            let message = format!("{}/{} pods ready", ready, desired);
            status.pods_ready(ready >= desired, &message, now)
        }
    };
    cluster.status = Some(status);
}

/// Requeue delay after a successful reconcile
pub fn requeue_after(outcome: &SyncOutcome, config: &ControllerConfig) -> Duration {
    match outcome {
        SyncOutcome::Retry { .. } => config.retry_interval,
        o if o.is_active() => config.requeue_interval,
        _ => config.idle_requeue_interval,
    }
}

/// Reconcile a StreamCluster resource
///
/// # Returns
/// * `Ok(Action)` - requeue, sooner while an upgrade is in flight
/// * `Err(ReconcileError)` - the tick's status could not be written back
pub async fn reconcile(
    cluster: Arc<StreamCluster>,
    ctx: Arc<Context>,
) -> Result<Action, ReconcileError> {
    let started = Instant::now();
    let name = cluster.name_any();
    let namespace = cluster
        .namespace()
        .ok_or(ReconcileError::MissingNamespace)?;

    info!(cluster = %name, namespace = %namespace, "Reconciling StreamCluster");

    let mut cluster = (*cluster).clone();
    let now = Utc::now();

    refresh_pods_ready(ctx.platform.as_ref(), &mut cluster, now).await;

    let synchronizer = VersionSynchronizer::new(ctx.platform.clone(), ctx.builder.clone());
    let result = synchronizer.sync(&mut cluster, now).await;
    let elapsed = started.elapsed().as_secs_f64();

    match result {
        Ok(outcome) => {
            ctx.metrics
                .record_reconciliation_success(outcome.as_str(), elapsed);
            if let SyncOutcome::Retry { reason } = &outcome {
                warn!(cluster = %name, reason = %reason, "Sync will be retried");
            }
            let delay = requeue_after(&outcome, &ctx.config);
            debug!(
                cluster = %name,
                outcome = outcome.as_str(),
                requeue_secs = delay.as_secs(),
                "Sync tick finished"
            );
            Ok(Action::requeue(delay))
        }
        Err(e) => {
            ctx.metrics.record_reconciliation_error(elapsed);
            Err(e)
        }
    }
}

#[cfg(test)]
#[path = "reconcile_test.rs"]
mod tests;
