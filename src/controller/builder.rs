//! Desired configuration for a tier at a given version
//!
//! The upgrade drivers only need two artifacts per tier: the configuration
//! object and the pod template. Both are pure functions of the cluster spec
//! and the version, kept behind [`ConfigBuilder`] so deployments can plug in
//! their own rendering.

use crate::controller::observer::VERSION_LABEL;
use crate::crd::cluster::{StreamCluster, StreamClusterSpec, Tier};
use k8s_openapi::api::core::v1::{ConfigMap, Container, EnvVar, PodSpec, PodTemplateSpec};
use kube::api::ObjectMeta;
use kube::ResourceExt;
use std::collections::BTreeMap;

/// Repository used when a tier does not name an image
pub const DEFAULT_IMAGE_REPOSITORY: &str = "stratum";

pub const CLUSTER_LABEL: &str = "stratum.io/cluster";
pub const TIER_LABEL: &str = "stratum.io/tier";
pub const CONFIG_ANNOTATION: &str = "stratum.io/config";

/// Name of the managed workload for a tier, e.g. `demo-storage`
pub fn workload_name(cluster_name: &str, tier: Tier) -> String {
    format!("{}-{}", cluster_name, tier)
}

/// Name of the configuration object for a tier, e.g. `demo-storage-config`
pub fn config_map_name(cluster_name: &str, tier: Tier) -> String {
    format!("{}-config", workload_name(cluster_name, tier))
}

/// Container image for a tier at `version`
pub fn target_image(spec: &StreamClusterSpec, tier: Tier, version: &str) -> String {
    let repository = &spec.tier(tier).image;
    if repository.is_empty() {
        format!("{}/{}:{}", DEFAULT_IMAGE_REPOSITORY, tier, version)
    } else {
        format!("{}:{}", repository, version)
    }
}

pub trait ConfigBuilder: Send + Sync {
    fn target_image(&self, cluster: &StreamCluster, tier: Tier, version: &str) -> String {
        target_image(&cluster.spec, tier, version)
    }

    fn config_map(&self, cluster: &StreamCluster, tier: Tier, version: &str) -> ConfigMap;

    fn pod_template(&self, cluster: &StreamCluster, tier: Tier, version: &str) -> PodTemplateSpec;
}

/// Minimal renderer: one container per tier, configuration passed as env
#[derive(Debug, Clone, Default)]
pub struct DefaultConfigBuilder;

impl DefaultConfigBuilder {
    fn labels(cluster: &StreamCluster, tier: Tier) -> BTreeMap<String, String> {
        let mut labels = BTreeMap::new();
        labels.insert("app".to_string(), "stratum".to_string());
        labels.insert(CLUSTER_LABEL.to_string(), cluster.name_any());
        labels.insert(TIER_LABEL.to_string(), tier.to_string());
        labels
    }

    fn config_data(cluster: &StreamCluster, tier: Tier, version: &str) -> BTreeMap<String, String> {
        let mut data = cluster.spec.tier(tier).config.clone();
        data.insert("STRATUM_CLUSTER".to_string(), cluster.name_any());
        data.insert("STRATUM_TIER".to_string(), tier.to_string());
        data.insert("STRATUM_VERSION".to_string(), version.to_string());
        data
    }
}

impl ConfigBuilder for DefaultConfigBuilder {
    fn config_map(&self, cluster: &StreamCluster, tier: Tier, version: &str) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(config_map_name(&cluster.name_any(), tier)),
                namespace: cluster.namespace(),
                labels: Some(Self::labels(cluster, tier)),
                ..Default::default()
            },
            data: Some(Self::config_data(cluster, tier, version)),
            ..Default::default()
        }
    }

    fn pod_template(&self, cluster: &StreamCluster, tier: Tier, version: &str) -> PodTemplateSpec {
        let mut labels = Self::labels(cluster, tier);
        labels.insert(VERSION_LABEL.to_string(), version.to_string());

        let annotations: BTreeMap<String, String> = vec![(
            CONFIG_ANNOTATION.to_string(),
            config_map_name(&cluster.name_any(), tier),
        )]
        .into_iter()
        .collect();

        let env = Self::config_data(cluster, tier, version)
            .into_iter()
            .map(|(name, value)| EnvVar {
                name,
                value: Some(value),
                ..Default::default()
            })
            .collect();

        PodTemplateSpec {
            metadata: Some(ObjectMeta {
                labels: Some(labels),
                annotations: Some(annotations),
                ..Default::default()
            }),
            spec: Some(PodSpec {
                containers: vec![Container {
                    name: tier.to_string(),
                    image: Some(self.target_image(cluster, tier, version)),
                    env: Some(env),
                    ..Default::default()
                }],
                ..Default::default()
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::cluster::{StreamClusterSpec, TierSpec};

    fn cluster() -> StreamCluster {
        let mut cluster = StreamCluster::new(
            "demo",
            StreamClusterSpec {
                version: "1.0".to_string(),
                log: TierSpec {
                    image: "registry.local/stratum/log".to_string(),
                    replicas: 3,
                    config: vec![("journalDirectories".to_string(), "/data/j".to_string())]
                        .into_iter()
                        .collect(),
                },
                storage: TierSpec::default(),
                frontend: TierSpec::default(),
            },
        );
        cluster.metadata.namespace = Some("streaming".to_string());
        cluster
    }

    #[test]
    fn test_workload_and_config_names() {
        assert_eq!(workload_name("demo", Tier::Storage), "demo-storage");
        assert_eq!(config_map_name("demo", Tier::Frontend), "demo-frontend-config");
    }

    #[test]
    fn test_target_image_uses_repository_and_version() {
        let cluster = cluster();

        assert_eq!(
            target_image(&cluster.spec, Tier::Log, "2.0"),
            "registry.local/stratum/log:2.0"
        );
        // No repository configured falls back to the default one
        assert_eq!(target_image(&cluster.spec, Tier::Storage, "2.0"), "stratum/storage:2.0");
    }

    #[test]
    fn test_pod_template_carries_version_label_and_image() {
        let cluster = cluster();

        let template = DefaultConfigBuilder.pod_template(&cluster, Tier::Log, "2.0");

        let labels = template.metadata.as_ref().unwrap().labels.as_ref().unwrap();
        assert_eq!(labels.get(VERSION_LABEL).map(String::as_str), Some("2.0"));
        assert_eq!(labels.get(TIER_LABEL).map(String::as_str), Some("log"));
        let container = &template.spec.as_ref().unwrap().containers[0];
        assert_eq!(container.image.as_deref(), Some("registry.local/stratum/log:2.0"));
        let env = container.env.as_ref().unwrap();
        assert!(env
            .iter()
            .any(|e| e.name == "journalDirectories" && e.value.as_deref() == Some("/data/j")));
    }

    #[test]
    fn test_config_map_includes_version_and_tier_entries() {
        let cluster = cluster();

        let config_map = DefaultConfigBuilder.config_map(&cluster, Tier::Log, "2.0");

        assert_eq!(config_map.metadata.name.as_deref(), Some("demo-log-config"));
        assert_eq!(config_map.metadata.namespace.as_deref(), Some("streaming"));
        let data = config_map.data.unwrap();
        assert_eq!(data.get("STRATUM_VERSION").map(String::as_str), Some("2.0"));
        assert_eq!(data.get("STRATUM_TIER").map(String::as_str), Some("log"));
        assert_eq!(data.get("journalDirectories").map(String::as_str), Some("/data/j"));
    }
}
