use chrono::{DateTime, SecondsFormat, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// StreamCluster is a Custom Resource describing a three-tier streaming-storage cluster
///
/// The operator converges the running cluster to `spec.version`, upgrading
/// the log, storage and frontend tiers one after the other.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "stratum.io",
    version = "v1alpha1",
    kind = "StreamCluster",
    namespaced,
    status = "StreamClusterStatus",
    shortname = "sc",
    printcolumn = r#"{"name":"Version", "type":"string", "jsonPath":".spec.version"}"#,
    printcolumn = r#"{"name":"Current", "type":"string", "jsonPath":".status.currentVersion"}"#,
    printcolumn = r#"{"name":"Target", "type":"string", "jsonPath":".status.targetVersion"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
pub struct StreamClusterSpec {
    /// Version the cluster should converge to
    pub version: String,

    /// Metadata-log tier (StatefulSet)
    #[serde(default = "default_stateful_tier")]
    pub log: TierSpec,

    /// Storage-serving tier (StatefulSet)
    #[serde(default = "default_stateful_tier")]
    pub storage: TierSpec,

    /// Front-end tier (Deployment)
    #[serde(default = "default_frontend_tier")]
    pub frontend: TierSpec,
}

/// Per-tier settings
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct TierSpec {
    /// Image repository without tag; the tag is the cluster version
    #[serde(default)]
    pub image: String,

    /// Number of desired pods
    #[serde(default = "default_replicas")]
    pub replicas: i32,

    /// Extra entries for the tier's configuration object
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub config: BTreeMap<String, String>,
}

fn default_replicas() -> i32 {
    3
}

fn default_stateful_tier() -> TierSpec {
    TierSpec {
        replicas: 3,
        ..Default::default()
    }
}

fn default_frontend_tier() -> TierSpec {
    TierSpec {
        replicas: 1,
        ..Default::default()
    }
}

/// One of the three independently-versioned components of a cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    Log,
    Storage,
    Frontend,
}

impl Tier {
    /// Short name used in workload names and labels
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Log => "log",
            Tier::Storage => "storage",
            Tier::Frontend => "frontend",
        }
    }

    /// Reason recorded in the Upgrading condition while this tier rolls out
    pub fn upgrade_reason(&self) -> &'static str {
        match self {
            Tier::Log => "UpgradingLogTier",
            Tier::Storage => "UpgradingStorageTier",
            Tier::Frontend => "UpgradingFrontendTier",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl StreamClusterSpec {
    pub fn tier(&self, tier: Tier) -> &TierSpec {
        match tier {
            Tier::Log => &self.log,
            Tier::Storage => &self.storage,
            Tier::Frontend => &self.frontend,
        }
    }
}

/// Status of the StreamCluster
///
/// This is the durable contract dashboards and CLIs read to follow an upgrade.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct StreamClusterStatus {
    /// Version the cluster is running
    #[serde(rename = "currentVersion", default)]
    pub current_version: String,

    /// Version being upgraded to; empty unless an upgrade is in flight
    #[serde(rename = "targetVersion", default)]
    pub target_version: String,

    #[serde(default)]
    pub conditions: Vec<ClusterCondition>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
pub enum ConditionType {
    Upgrading,
    PodsReady,
    Error,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
pub struct ClusterCondition {
    #[serde(rename = "type")]
    pub type_: ConditionType,

    pub status: ConditionStatus,

    #[serde(default)]
    pub reason: String,

    #[serde(default)]
    pub message: String,

    /// RFC3339 timestamp of the last status flip
    #[serde(rename = "lastTransitionTime", default)]
    pub last_transition_time: String,

    /// RFC3339 timestamp of the last status, reason or message change
    #[serde(rename = "lastUpdateTime", default)]
    pub last_update_time: String,
}

pub fn format_time(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Secs, true)
}

impl StreamClusterStatus {
    pub fn condition(&self, type_: ConditionType) -> Option<&ClusterCondition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }

    pub fn is_condition_true(&self, type_: ConditionType) -> bool {
        matches!(
            self.condition(type_),
            Some(ClusterCondition {
                status: ConditionStatus::True,
                ..
            })
        )
    }

    pub fn is_upgrading(&self) -> bool {
        self.is_condition_true(ConditionType::Upgrading)
    }

    /// Return a status with the given condition applied
    ///
    /// A status flip refreshes both timestamps; a reason or message change
    /// refreshes `lastUpdateTime` only. Writing an identical condition keeps
    /// both timestamps.
    pub fn with_condition(
        mut self,
        type_: ConditionType,
        status: ConditionStatus,
        reason: &str,
        message: &str,
        now: DateTime<Utc>,
    ) -> Self {
        let now = format_time(now);

        let Some(index) = self.conditions.iter().position(|c| c.type_ == type_) else {
            self.conditions.push(ClusterCondition {
                type_,
                status,
                reason: reason.to_string(),
                message: message.to_string(),
                last_transition_time: now.clone(),
                last_update_time: now,
            });
            return self;
        };

        let existing = &mut self.conditions[index];
        if existing.status != status {
            existing.status = status;
            existing.last_transition_time = now.clone();
            existing.last_update_time = now.clone();
        }

        if existing.reason != reason || existing.message != message {
            existing.reason = reason.to_string();
            existing.message = message.to_string();
            existing.last_update_time = now;
        }

        self
    }

    pub fn upgrading(self, reason: &str, message: &str, now: DateTime<Utc>) -> Self {
        self.with_condition(ConditionType::Upgrading, ConditionStatus::True, reason, message, now)
    }

    pub fn not_upgrading(self, now: DateTime<Utc>) -> Self {
        self.with_condition(ConditionType::Upgrading, ConditionStatus::False, "", "", now)
    }

    pub fn with_error(self, reason: &str, message: &str, now: DateTime<Utc>) -> Self {
        self.with_condition(ConditionType::Error, ConditionStatus::True, reason, message, now)
    }

    pub fn without_error(self, now: DateTime<Utc>) -> Self {
        self.with_condition(ConditionType::Error, ConditionStatus::False, "", "", now)
    }

    pub fn pods_ready(self, ready: bool, message: &str, now: DateTime<Utc>) -> Self {
        let status = if ready {
            ConditionStatus::True
        } else {
            ConditionStatus::False
        };
        self.with_condition(ConditionType::PodsReady, status, "", message, now)
    }

    /// Reset the upgrade markers: Upgrading=False and no target version
    pub fn cleared(self, now: DateTime<Utc>) -> Self {
        let mut status = self.not_upgrading(now);
        status.target_version.clear();
        status
    }
}

#[cfg(test)]
#[path = "cluster_test.rs"]
mod tests;
