//! Sequencing of tier upgrades

use crate::controller::builder::ConfigBuilder;
use crate::controller::platform::Platform;
use crate::controller::tier::{TierDriver, UpgradeError, TIER_ORDER};
use crate::controller::watchdog::PROGRESS_DEADLINE;
use crate::crd::cluster::StreamCluster;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

pub struct UpgradeOrchestrator {
    platform: Arc<dyn Platform>,
    builder: Arc<dyn ConfigBuilder>,
    window: Duration,
}

impl UpgradeOrchestrator {
    pub fn new(platform: Arc<dyn Platform>, builder: Arc<dyn ConfigBuilder>) -> Self {
        UpgradeOrchestrator {
            platform,
            builder,
            window: PROGRESS_DEADLINE,
        }
    }

    pub fn with_progress_deadline(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Drive the tiers in order, stopping at the first one still rolling out
    ///
    /// Sets `currentVersion` to `targetVersion` only when every tier reports
    /// synced in this pass. Returns whether that happened.
    pub async fn advance(
        &self,
        cluster: &mut StreamCluster,
        now: DateTime<Utc>,
    ) -> Result<bool, UpgradeError> {
        for tier in TIER_ORDER {
            let driver = TierDriver::new(tier, self.platform.as_ref(), self.builder.as_ref())
                .with_progress_deadline(self.window);

            let synced = driver
                .step(cluster, now)
                .await
                .map_err(|e| UpgradeError::Tier {
                    tier,
                    source: Box::new(e),
                })?;

            if !synced {
                debug!(tier = %tier, "Tier version sync in progress");
                return Ok(false);
            }

            info!(tier = %tier, "Tier version sync has been completed");
        }

        let status = cluster.status.get_or_insert_with(Default::default);
        status.current_version = status.target_version.clone();
        Ok(true)
    }
}
