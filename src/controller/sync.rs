//! Cluster version synchronizer
//!
//! Entry point of the upgrade core. Each tick it decides whether to start,
//! continue or cancel an upgrade and then persists the cluster status, on
//! every path.

use crate::controller::builder::ConfigBuilder;
use crate::controller::orchestrator::UpgradeOrchestrator;
use crate::controller::platform::{Platform, PlatformError};
use crate::controller::reconcile::ReconcileError;
use crate::crd::cluster::{ConditionType, StreamCluster};
use chrono::{DateTime, Utc};
use kube::ResourceExt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Reason recorded in the Error condition when an upgrade is aborted
pub const UPGRADE_FAILED_REASON: &str = "UpgradeFailed";

/// What a sync tick did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// First observation: current version taken from the spec
    Initialized,
    /// Declared and current versions agree
    Idle,
    /// Upgrade to `version` begins next tick
    Started { version: String },
    /// Upgrade in flight, some tier still rolling out
    Progressing,
    /// Every tier synced this tick; markers are cleared next tick
    Converged { version: String },
    /// Upgrade finished and markers cleared
    Completed { version: String },
    /// Upgrading without a target version; markers cleared
    Cancelled,
    /// Pods not ready; upgrade request dropped
    Refused,
    /// Stall or fault; Error condition set and markers cleared
    Aborted { reason: String },
    /// Transient failure; the same step is retried next tick
    Retry { reason: String },
}

impl SyncOutcome {
    /// Label used for metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncOutcome::Initialized => "initialized",
            SyncOutcome::Idle => "idle",
            SyncOutcome::Started { .. } => "started",
            SyncOutcome::Progressing => "progressing",
            SyncOutcome::Converged { .. } => "converged",
            SyncOutcome::Completed { .. } => "completed",
            SyncOutcome::Cancelled => "cancelled",
            SyncOutcome::Refused => "refused",
            SyncOutcome::Aborted { .. } => "aborted",
            SyncOutcome::Retry { .. } => "retry",
        }
    }

    /// Whether an upgrade is still in flight after this tick
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SyncOutcome::Started { .. }
                | SyncOutcome::Progressing
                | SyncOutcome::Converged { .. }
                | SyncOutcome::Retry { .. }
        )
    }
}

pub struct VersionSynchronizer {
    platform: Arc<dyn Platform>,
    orchestrator: UpgradeOrchestrator,
}

impl VersionSynchronizer {
    pub fn new(platform: Arc<dyn Platform>, builder: Arc<dyn ConfigBuilder>) -> Self {
        VersionSynchronizer {
            orchestrator: UpgradeOrchestrator::new(platform.clone(), builder),
            platform,
        }
    }

    pub fn with_progress_deadline(mut self, window: Duration) -> Self {
        self.orchestrator = self.orchestrator.with_progress_deadline(window);
        self
    }

    /// Run one tick and persist the resulting status
    ///
    /// Whatever the tick did, including failing halfway, the status it left
    /// behind is written back. Only a failed status write is an error.
    pub async fn sync(
        &self,
        cluster: &mut StreamCluster,
        now: DateTime<Utc>,
    ) -> Result<SyncOutcome, ReconcileError> {
        let namespace = cluster
            .namespace()
            .ok_or(ReconcileError::MissingNamespace)?;
        let name = cluster.name_any();

        let outcome = self.sync_version(cluster, &namespace, &name, now).await;

        let status = cluster.status.clone().unwrap_or_default();
        self.platform
            .persist_status(&namespace, &name, &status)
            .await
            .map_err(|e| {
                error!(cluster = %name, namespace = %namespace, error = %e, "Failed to persist status");
                ReconcileError::StatusPersist(e)
            })?;

        Ok(outcome)
    }

    async fn sync_version(
        &self,
        cluster: &mut StreamCluster,
        namespace: &str,
        name: &str,
        now: DateTime<Utc>,
    ) -> SyncOutcome {
        let status = cluster.status.clone().unwrap_or_default();

        if status.condition(ConditionType::Upgrading).is_none() {
            // Trust the initially deployed version
            let mut status = status.not_upgrading(now);
            status.current_version = cluster.spec.version.clone();
            info!(cluster = %name, version = %status.current_version, "Initialized cluster version");
            cluster.status = Some(status);
            return SyncOutcome::Initialized;
        }

        if status.is_upgrading() {
            return self.continue_upgrade(cluster, namespace, name, now).await;
        }

        if cluster.spec.version == status.current_version {
            return SyncOutcome::Idle;
        }

        if !status.is_condition_true(ConditionType::PodsReady) {
            warn!(
                cluster = %name,
                current = %status.current_version,
                declared = %cluster.spec.version,
                "Cannot trigger upgrade while there are unready pods"
            );
            return match self.clear_upgrade(cluster, namespace, name, now).await {
                Ok(()) => SyncOutcome::Refused,
                Err(e) => SyncOutcome::Retry {
                    reason: e.to_string(),
                },
            };
        }

        let version = cluster.spec.version.clone();
        info!(
            cluster = %name,
            from = %status.current_version,
            to = %version,
            "Syncing cluster version"
        );

        // Rollout starts on the next tick
        let mut status = status.upgrading("", "", now).without_error(now);
        status.target_version = version.clone();
        cluster.status = Some(status);
        SyncOutcome::Started { version }
    }

    async fn continue_upgrade(
        &self,
        cluster: &mut StreamCluster,
        namespace: &str,
        name: &str,
        now: DateTime<Utc>,
    ) -> SyncOutcome {
        let status = cluster.status.clone().unwrap_or_default();

        if status.target_version.is_empty() {
            warn!(cluster = %name, "Syncing to an unknown version, cancelling upgrade");
            return match self.clear_upgrade(cluster, namespace, name, now).await {
                Ok(()) => SyncOutcome::Cancelled,
                Err(e) => SyncOutcome::Retry {
                    reason: e.to_string(),
                },
            };
        }

        if status.target_version == status.current_version {
            let version = status.target_version.clone();
            info!(cluster = %name, version = %version, "Syncing to version completed");
            return match self.clear_upgrade(cluster, namespace, name, now).await {
                Ok(()) => SyncOutcome::Completed { version },
                Err(e) => SyncOutcome::Retry {
                    reason: e.to_string(),
                },
            };
        }

        match self.orchestrator.advance(cluster, now).await {
            Ok(true) => SyncOutcome::Converged {
                version: status.target_version,
            },
            Ok(false) => SyncOutcome::Progressing,
            Err(e) if e.is_abort() => {
                // No rollback: replaced pods stay on the new version
                error!(
                    cluster = %name,
                    target = %status.target_version,
                    error = %e,
                    "Error syncing cluster version, need manual intervention"
                );
                let reason = e.to_string();
                let status = cluster.status.take().unwrap_or_default();
                cluster.status = Some(status.with_error(UPGRADE_FAILED_REASON, &reason, now));

                // Markers stay set until the declared version is reset
                match self.clear_upgrade(cluster, namespace, name, now).await {
                    Ok(()) => SyncOutcome::Aborted { reason },
                    Err(clear_err) => {
                        warn!(cluster = %name, error = %clear_err, "Failed to reset declared version");
                        SyncOutcome::Retry {
                            reason: clear_err.to_string(),
                        }
                    }
                }
            }
            Err(e) => {
                warn!(cluster = %name, error = %e, "Transient error syncing cluster version, will retry");
                SyncOutcome::Retry {
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Point the declared version back at the current one, then drop the upgrade markers
    ///
    /// The status is left untouched when the declared version cannot be reset.
    async fn clear_upgrade(
        &self,
        cluster: &mut StreamCluster,
        namespace: &str,
        name: &str,
        now: DateTime<Utc>,
    ) -> Result<(), PlatformError> {
        let current = cluster
            .status
            .as_ref()
            .map(|s| s.current_version.clone())
            .unwrap_or_default();

        if cluster.spec.version != current {
            info!(
                cluster = %name,
                declared = %cluster.spec.version,
                current = %current,
                "Resetting declared version"
            );
            self.platform
                .set_declared_version(namespace, name, &current)
                .await?;
            cluster.spec.version = current;
        }

        let status = cluster.status.take().unwrap_or_default().cleared(now);
        cluster.status = Some(status);
        Ok(())
    }
}

#[cfg(test)]
#[path = "sync_test.rs"]
mod tests;
