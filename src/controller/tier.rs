//! Per-tier upgrade driver
//!
//! One algorithm serves all three tiers. Each tick a driver runs, in order:
//! 1. Trigger: push the new configuration and pod template if the workload
//!    still runs another image, then stop for this tick.
//! 2. Completion: every replica updated and ready means the tier is synced.
//! 3. Stall/fault detection, selected by [`WorkloadShape`].
//! 4. Health gate over pods already on the target version.
//! 5. Pacing: StatefulSet tiers get exactly one outdated pod deleted.

use crate::controller::builder::{workload_name, ConfigBuilder};
use crate::controller::inspector::{is_pod_ready, pod_fault};
use crate::controller::observer::WorkloadObserver;
use crate::controller::platform::{Platform, PlatformError, Workload, WorkloadShape};
use crate::controller::watchdog::{check_progress, Progress, PROGRESS_DEADLINE};
use crate::crd::cluster::{ConditionType, StreamCluster, Tier};
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Tiers are upgraded strictly in this order, never concurrently
pub const TIER_ORDER: [Tier; 3] = [Tier::Log, Tier::Storage, Tier::Frontend];

#[derive(Debug, Error)]
pub enum UpgradeError {
    #[error(transparent)]
    Platform(#[from] PlatformError),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("updating {workload} failed: progress deadline exceeded")]
    Stalled { workload: String },

    #[error("updating deployment {workload} failed due to ProgressDeadlineExceeded")]
    DeadlineExceeded { workload: String },

    #[error("pod {pod} update failed because of {reason}")]
    FaultyPod { pod: String, reason: String },

    #[error("could not obtain outdated pod of {workload}")]
    NoOutdatedPod { workload: String },

    #[error("failed to sync {tier} version: {source}")]
    Tier {
        tier: Tier,
        #[source]
        source: Box<UpgradeError>,
    },
}

impl UpgradeError {
    /// Whether the upgrade must be aborted rather than retried next tick
    pub fn is_abort(&self) -> bool {
        match self {
            // A deleted workload will not come back on its own
            UpgradeError::Platform(PlatformError::WorkloadNotFound { .. }) => true,
            UpgradeError::Platform(_) | UpgradeError::MissingField(_) => false,
            UpgradeError::Stalled { .. }
            | UpgradeError::DeadlineExceeded { .. }
            | UpgradeError::FaultyPod { .. }
            | UpgradeError::NoOutdatedPod { .. } => true,
            UpgradeError::Tier { source, .. } => source.is_abort(),
        }
    }
}

impl Tier {
    pub fn shape(&self) -> WorkloadShape {
        match self {
            Tier::Log | Tier::Storage => WorkloadShape::StatefulSet,
            Tier::Frontend => WorkloadShape::Deployment,
        }
    }
}

/// Outcome of inspecting the pods already on the target version
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthGate {
    /// Every updated pod is ready
    Open,
    /// Some updated pod is still coming up
    Wait { pod: String },
    /// Some updated pod will not come up on its own
    Faulty { pod: String, reason: String },
}

/// A faulty pod anywhere in the set wins over a merely slow one
pub fn health_gate(updated: &[Pod]) -> HealthGate {
    let unready: Vec<&Pod> = updated.iter().filter(|p| !is_pod_ready(p)).collect();

    if let Some((pod, reason)) = unready
        .iter()
        .find_map(|p| pod_fault(p).map(|reason| (p.name_any(), reason)))
    {
        return HealthGate::Faulty { pod, reason };
    }

    match unready.first() {
        Some(pod) => HealthGate::Wait {
            pod: pod.name_any(),
        },
        None => HealthGate::Open,
    }
}

pub struct TierDriver<'a> {
    tier: Tier,
    platform: &'a dyn Platform,
    builder: &'a dyn ConfigBuilder,
    window: Duration,
}

impl<'a> TierDriver<'a> {
    pub fn new(tier: Tier, platform: &'a dyn Platform, builder: &'a dyn ConfigBuilder) -> Self {
        TierDriver {
            tier,
            platform,
            builder,
            window: PROGRESS_DEADLINE,
        }
    }

    pub fn with_progress_deadline(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Advance this tier by one tick
    ///
    /// # Returns
    /// * `Ok(true)` - every replica runs the target version and is ready
    /// * `Ok(false)` - rollout triggered or still in progress
    /// * `Err(UpgradeError)` - transient platform failure, or a stall/fault
    ///   that must abort the upgrade (see [`UpgradeError::is_abort`])
    pub async fn step(
        &self,
        cluster: &mut StreamCluster,
        now: DateTime<Utc>,
    ) -> Result<bool, UpgradeError> {
        let target_version = cluster
            .status
            .as_ref()
            .map(|s| s.target_version.clone())
            .unwrap_or_default();

        let workload = self.fetch_workload(cluster).await?;
        let target_image = self.builder.target_image(cluster, self.tier, &target_version);

        if workload.image.as_deref() != Some(target_image.as_str()) {
            self.trigger_update(cluster, &workload, &target_version, &target_image)
                .await?;
            self.record_marker(cluster, "0", now);
            return Ok(false);
        }

        info!(
            tier = %self.tier,
            workload = %workload.name,
            updated = workload.updated_replicas,
            ready = workload.ready_replicas,
            replicas = workload.replicas,
            desired = workload.desired_replicas,
            "Workload rollout status"
        );

        if workload.is_converged() {
            return Ok(true);
        }

        self.detect_stall(cluster, &workload, now)?;

        let observer = WorkloadObserver::new(self.platform);
        let updated = observer.pods_with_version(&workload, &target_version).await?;
        match health_gate(&updated) {
            HealthGate::Faulty { pod, reason } => {
                warn!(tier = %self.tier, pod = %pod, reason = %reason, "Updated pod is faulty");
                return Err(UpgradeError::FaultyPod { pod, reason });
            }
            HealthGate::Wait { pod } => {
                debug!(tier = %self.tier, pod = %pod, "Waiting for updated pod to become ready");
                return Ok(false);
            }
            HealthGate::Open => {}
        }

        self.pace(&observer, &workload, &target_version).await?;
        Ok(false)
    }

    async fn fetch_workload(&self, cluster: &StreamCluster) -> Result<Workload, UpgradeError> {
        let namespace = cluster
            .namespace()
            .ok_or_else(|| UpgradeError::MissingField("namespace".to_string()))?;
        let name = workload_name(&cluster.name_any(), self.tier);

        WorkloadObserver::new(self.platform)
            .workload(self.tier.shape(), &namespace, &name)
            .await
            .map_err(UpgradeError::from)
    }

    /// Push the configuration object and pod template for `version`
    ///
    /// The platform starts replacing pods once the template changes; the
    /// driver only observes from here on.
    async fn trigger_update(
        &self,
        cluster: &StreamCluster,
        workload: &Workload,
        version: &str,
        image: &str,
    ) -> Result<(), UpgradeError> {
        info!(
            tier = %self.tier,
            workload = %workload.name,
            shape = %workload.shape,
            image = %image,
            "Updating pod template image"
        );

        let config_map = self.builder.config_map(cluster, self.tier, version);
        self.platform.apply_config(&config_map).await?;

        let template = self.builder.pod_template(cluster, self.tier, version);
        self.platform
            .update_workload_template(workload.shape, &workload.namespace, &workload.name, &template)
            .await?;

        Ok(())
    }

    fn detect_stall(
        &self,
        cluster: &mut StreamCluster,
        workload: &Workload,
        now: DateTime<Utc>,
    ) -> Result<(), UpgradeError> {
        match workload.shape {
            WorkloadShape::Deployment => {
                if workload.progress_deadline_exceeded {
                    return Err(UpgradeError::DeadlineExceeded {
                        workload: workload.name.clone(),
                    });
                }
                Ok(())
            }
            WorkloadShape::StatefulSet => {
                let message = workload.updated_replicas.to_string();
                let last = cluster
                    .status
                    .as_ref()
                    .and_then(|s| s.condition(ConditionType::Upgrading));

                match check_progress(last, self.tier.upgrade_reason(), &message, now, self.window) {
                    Progress::Stalled { since } => {
                        warn!(
                            tier = %self.tier,
                            workload = %workload.name,
                            updated = workload.updated_replicas,
                            since = %since,
                            "No rollout progress within deadline"
                        );
                        Err(UpgradeError::Stalled {
                            workload: workload.name.clone(),
                        })
                    }
                    Progress::Waiting => Ok(()),
                    Progress::Advanced => {
                        self.record_marker(cluster, &message, now);
                        Ok(())
                    }
                }
            }
        }
    }

    /// Replace one outdated pod; the platform recreates it from the new template
    async fn pace(
        &self,
        observer: &WorkloadObserver<'_>,
        workload: &Workload,
        version: &str,
    ) -> Result<(), UpgradeError> {
        if workload.shape == WorkloadShape::Deployment {
            return Ok(());
        }

        let pod = observer
            .first_outdated_pod(workload, version)
            .await?
            .ok_or_else(|| UpgradeError::NoOutdatedPod {
                workload: workload.name.clone(),
            })?;
        let pod_name = pod.name_any();

        info!(tier = %self.tier, workload = %workload.name, pod = %pod_name, "Upgrading pod");
        self.platform
            .delete_pod(&workload.namespace, &pod_name)
            .await?;

        Ok(())
    }

    fn record_marker(&self, cluster: &mut StreamCluster, message: &str, now: DateTime<Utc>) {
        let status = cluster.status.take().unwrap_or_default();
        cluster.status = Some(status.upgrading(self.tier.upgrade_reason(), message, now));
    }
}

#[cfg(test)]
#[path = "tier_test.rs"]
mod tests;
