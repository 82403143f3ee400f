//! Read-only view of a tier's workload and its pods
//!
//! Pods belong to a workload when they carry all of the workload's template
//! labels except the version label, so old and new pods are listed together
//! and then split by version.

use crate::controller::platform::{Platform, PlatformError, Workload, WorkloadShape};
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use std::collections::BTreeMap;
use tracing::warn;

/// Label carrying the version a pod runs
pub const VERSION_LABEL: &str = "stratum.io/version";

pub fn pod_version(pod: &Pod) -> Option<&str> {
    pod.labels().get(VERSION_LABEL).map(String::as_str)
}

/// Labels selecting every pod of the workload regardless of version
pub fn instance_selector(workload: &Workload) -> BTreeMap<String, String> {
    let mut labels = workload.template_labels.clone();
    labels.remove(VERSION_LABEL);
    labels
}

/// Split pods into (running `version`, outdated), keeping listing order
pub fn partition_by_version(pods: Vec<Pod>, version: &str) -> (Vec<Pod>, Vec<Pod>) {
    pods.into_iter()
        .partition(|p| pod_version(p) == Some(version))
}

pub struct WorkloadObserver<'a> {
    platform: &'a dyn Platform,
}

impl<'a> WorkloadObserver<'a> {
    pub fn new(platform: &'a dyn Platform) -> Self {
        WorkloadObserver { platform }
    }

    pub async fn workload(
        &self,
        shape: WorkloadShape,
        namespace: &str,
        name: &str,
    ) -> Result<Workload, PlatformError> {
        self.platform.get_workload(shape, namespace, name).await
    }

    /// All pods of the workload, in platform listing order
    pub async fn instances(&self, workload: &Workload) -> Result<Vec<Pod>, PlatformError> {
        let selector = instance_selector(workload);
        if selector.is_empty() {
            // An empty selector would match every pod in the namespace
            warn!(
                workload = %workload.name,
                "Workload template has no labels, no pods can be attributed to it"
            );
            return Ok(Vec::new());
        }

        self.platform.list_pods(&workload.namespace, &selector).await
    }

    pub async fn pods_with_version(
        &self,
        workload: &Workload,
        version: &str,
    ) -> Result<Vec<Pod>, PlatformError> {
        let (current, _) = partition_by_version(self.instances(workload).await?, version);
        Ok(current)
    }

    /// First pod, in listing order, not running `version`
    pub async fn first_outdated_pod(
        &self,
        workload: &Workload,
        version: &str,
    ) -> Result<Option<Pod>, PlatformError> {
        let (_, outdated) = partition_by_version(self.instances(workload).await?, version);
        Ok(outdated.into_iter().next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::fake::{pod, FakePlatform};

    fn labels(tier: &str) -> BTreeMap<String, String> {
        vec![
            ("app".to_string(), "stratum".to_string()),
            ("stratum.io/tier".to_string(), tier.to_string()),
        ]
        .into_iter()
        .collect()
    }

    fn workload(template_version: &str) -> Workload {
        let mut template_labels = labels("storage");
        template_labels.insert(VERSION_LABEL.to_string(), template_version.to_string());
        Workload {
            name: "demo-storage".to_string(),
            namespace: "streaming".to_string(),
            shape: WorkloadShape::StatefulSet,
            desired_replicas: 3,
            replicas: 3,
            updated_replicas: 1,
            ready_replicas: 3,
            image: Some(format!("stratum/storage:{}", template_version)),
            template_labels,
            progress_deadline_exceeded: false,
        }
    }

    fn platform() -> FakePlatform {
        let platform = FakePlatform::new();
        platform.add_pod(pod("demo-storage-0", "streaming", &labels("storage"), "1.0", true));
        platform.add_pod(pod("demo-storage-1", "streaming", &labels("storage"), "1.0", true));
        platform.add_pod(pod("demo-storage-2", "streaming", &labels("storage"), "2.0", true));
        // Same labels, other tier
        platform.add_pod(pod("demo-log-0", "streaming", &labels("log"), "1.0", true));
        // Same labels, other namespace
        platform.add_pod(pod("demo-storage-0", "other", &labels("storage"), "1.0", true));
        platform
    }

    #[test]
    fn test_instance_selector_drops_version_label() {
        let selector = instance_selector(&workload("2.0"));

        assert!(!selector.contains_key(VERSION_LABEL));
        assert_eq!(selector, labels("storage"));
    }

    #[tokio::test]
    async fn test_pods_with_version_lists_only_target_version() {
        let platform = platform();
        let observer = WorkloadObserver::new(&platform);

        let pods = observer.pods_with_version(&workload("2.0"), "2.0").await.unwrap();

        let names: Vec<String> = pods.iter().map(|p| p.name_any()).collect();
        assert_eq!(names, vec!["demo-storage-2"]);
    }

    #[tokio::test]
    async fn test_first_outdated_pod_follows_listing_order() {
        let platform = platform();
        let observer = WorkloadObserver::new(&platform);

        let outdated = observer.first_outdated_pod(&workload("2.0"), "2.0").await.unwrap();

        assert_eq!(outdated.map(|p| p.name_any()).as_deref(), Some("demo-storage-0"));
    }

    #[tokio::test]
    async fn test_no_outdated_pod_when_all_updated() {
        let platform = FakePlatform::new();
        platform.add_pod(pod("demo-storage-0", "streaming", &labels("storage"), "2.0", true));
        let observer = WorkloadObserver::new(&platform);

        let outdated = observer.first_outdated_pod(&workload("2.0"), "2.0").await.unwrap();

        assert!(outdated.is_none());
    }

    #[tokio::test]
    async fn test_empty_listing_is_tolerated() {
        let platform = FakePlatform::new();
        let observer = WorkloadObserver::new(&platform);

        let pods = observer.pods_with_version(&workload("2.0"), "2.0").await.unwrap();

        assert!(pods.is_empty());
    }

    #[tokio::test]
    async fn test_workload_without_labels_has_no_instances() {
        let platform = platform();
        let observer = WorkloadObserver::new(&platform);
        let mut w = workload("2.0");
        w.template_labels.clear();

        let pods = observer.instances(&w).await.unwrap();

        assert!(pods.is_empty());
    }
}
