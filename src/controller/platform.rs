//! Platform seam for the upgrade core
//!
//! The drivers never talk to the Kubernetes API directly. Everything they
//! read or write goes through [`Platform`], injected at construction, so the
//! state machine can be exercised against an in-memory implementation.

use crate::crd::cluster::{StreamCluster, StreamClusterStatus};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{ConfigMap, Pod, PodTemplateSpec};
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams};
use kube::{Client, ResourceExt};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use tracing::{debug, info};

/// Field manager used for server-side apply
pub const FIELD_MANAGER: &str = "stratum-operator";

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("{shape} {namespace}/{name} not found")]
    WorkloadNotFound {
        shape: WorkloadShape,
        namespace: String,
        name: String,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Platform unavailable: {0}")]
    Unavailable(String),
}

/// How a tier's pods are managed by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkloadShape {
    /// Ordered, stable identities; the operator paces pod replacement itself
    StatefulSet,
    /// Stateless; the platform's rolling update paces replacement
    Deployment,
}

impl fmt::Display for WorkloadShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkloadShape::StatefulSet => f.write_str("statefulset"),
            WorkloadShape::Deployment => f.write_str("deployment"),
        }
    }
}

/// Version-relevant snapshot of a tier's managed workload
#[derive(Debug, Clone, PartialEq)]
pub struct Workload {
    pub name: String,
    pub namespace: String,
    pub shape: WorkloadShape,
    /// Replicas requested in the workload spec
    pub desired_replicas: i32,
    /// Replicas currently reported in the workload status
    pub replicas: i32,
    pub updated_replicas: i32,
    pub ready_replicas: i32,
    /// Image of the first container in the pod template
    pub image: Option<String>,
    pub template_labels: BTreeMap<String, String>,
    /// Deployment reported `ProgressDeadlineExceeded`
    pub progress_deadline_exceeded: bool,
}

impl Workload {
    pub fn from_stateful_set(sts: &StatefulSet) -> Self {
        let spec = sts.spec.as_ref();
        let status = sts.status.as_ref();

        Workload {
            name: sts.name_any(),
            namespace: sts.namespace().unwrap_or_default(),
            shape: WorkloadShape::StatefulSet,
            desired_replicas: spec.and_then(|s| s.replicas).unwrap_or(1),
            replicas: status.map(|s| s.replicas).unwrap_or(0),
            updated_replicas: status.and_then(|s| s.updated_replicas).unwrap_or(0),
            ready_replicas: status.and_then(|s| s.ready_replicas).unwrap_or(0),
            image: spec.and_then(|s| template_image(&s.template)),
            template_labels: spec.map(|s| template_labels(&s.template)).unwrap_or_default(),
            progress_deadline_exceeded: false,
        }
    }

    pub fn from_deployment(deploy: &Deployment) -> Self {
        let spec = deploy.spec.as_ref();
        let status = deploy.status.as_ref();

        let progress_deadline_exceeded = status
            .and_then(|s| s.conditions.as_ref())
            .map(|conditions| {
                conditions.iter().any(|c| {
                    c.type_ == "Progressing"
                        && c.status == "False"
                        && c.reason.as_deref() == Some("ProgressDeadlineExceeded")
                })
            })
            .unwrap_or(false);

        Workload {
            name: deploy.name_any(),
            namespace: deploy.namespace().unwrap_or_default(),
            shape: WorkloadShape::Deployment,
            desired_replicas: spec.and_then(|s| s.replicas).unwrap_or(1),
            replicas: status.and_then(|s| s.replicas).unwrap_or(0),
            updated_replicas: status.and_then(|s| s.updated_replicas).unwrap_or(0),
            ready_replicas: status.and_then(|s| s.ready_replicas).unwrap_or(0),
            image: spec.and_then(|s| template_image(&s.template)),
            template_labels: spec.map(|s| template_labels(&s.template)).unwrap_or_default(),
            progress_deadline_exceeded,
        }
    }

    /// Every replica runs the current template and is ready
    pub fn is_converged(&self) -> bool {
        self.updated_replicas == self.desired_replicas
            && self.updated_replicas == self.replicas
            && self.updated_replicas == self.ready_replicas
    }
}

fn template_image(template: &PodTemplateSpec) -> Option<String> {
    template
        .spec
        .as_ref()
        .and_then(|s| s.containers.first())
        .and_then(|c| c.image.clone())
}

fn template_labels(template: &PodTemplateSpec) -> BTreeMap<String, String> {
    template
        .metadata
        .as_ref()
        .and_then(|m| m.labels.clone())
        .unwrap_or_default()
}

/// Render a label map as a Kubernetes equality selector (`k1=v1,k2=v2`)
pub fn label_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

/// Read/write access to the orchestration platform
///
/// Every write is idempotent on retry: re-applying the same template is a
/// no-op and deleting a pod that is already gone succeeds.
#[async_trait]
pub trait Platform: Send + Sync {
    /// Fetch the version-relevant state of a managed workload
    async fn get_workload(
        &self,
        shape: WorkloadShape,
        namespace: &str,
        name: &str,
    ) -> Result<Workload, PlatformError>;

    /// Create or update a tier configuration object
    async fn apply_config(&self, config_map: &ConfigMap) -> Result<(), PlatformError>;

    /// Replace the pod template of a managed workload
    async fn update_workload_template(
        &self,
        shape: WorkloadShape,
        namespace: &str,
        name: &str,
        template: &PodTemplateSpec,
    ) -> Result<(), PlatformError>;

    /// List pods matching all given labels, in platform listing order
    async fn list_pods(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<Pod>, PlatformError>;

    /// Request deletion of a pod
    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), PlatformError>;

    /// Overwrite the declared version in the cluster spec
    async fn set_declared_version(
        &self,
        namespace: &str,
        name: &str,
        version: &str,
    ) -> Result<(), PlatformError>;

    /// Write the cluster status subresource
    async fn persist_status(
        &self,
        namespace: &str,
        name: &str,
        status: &StreamClusterStatus,
    ) -> Result<(), PlatformError>;
}

/// [`Platform`] backed by the Kubernetes API
#[derive(Clone)]
pub struct KubePlatform {
    client: Client,
}

impl KubePlatform {
    pub fn new(client: Client) -> Self {
        KubePlatform { client }
    }
}

#[async_trait]
impl Platform for KubePlatform {
    async fn get_workload(
        &self,
        shape: WorkloadShape,
        namespace: &str,
        name: &str,
    ) -> Result<Workload, PlatformError> {
        let not_found = || PlatformError::WorkloadNotFound {
            shape,
            namespace: namespace.to_string(),
            name: name.to_string(),
        };

        match shape {
            WorkloadShape::StatefulSet => {
                let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), namespace);
                let sts = api.get_opt(name).await?.ok_or_else(not_found)?;
                Ok(Workload::from_stateful_set(&sts))
            }
            WorkloadShape::Deployment => {
                let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
                let deploy = api.get_opt(name).await?.ok_or_else(not_found)?;
                Ok(Workload::from_deployment(&deploy))
            }
        }
    }

    async fn apply_config(&self, config_map: &ConfigMap) -> Result<(), PlatformError> {
        let namespace = config_map.namespace().unwrap_or_default();
        let name = config_map.name_any();
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), &namespace);

        api.patch(
            &name,
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(config_map),
        )
        .await?;

        debug!(configmap = %name, namespace = %namespace, "Configuration object applied");
        Ok(())
    }

    async fn update_workload_template(
        &self,
        shape: WorkloadShape,
        namespace: &str,
        name: &str,
        template: &PodTemplateSpec,
    ) -> Result<(), PlatformError> {
        let patch_json = serde_json::json!({
            "spec": {
                "template": serde_json::to_value(template)?
            }
        });

        match shape {
            WorkloadShape::StatefulSet => {
                let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), namespace);
                api.patch(name, &PatchParams::default(), &Patch::Merge(&patch_json))
                    .await?;
            }
            WorkloadShape::Deployment => {
                let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
                api.patch(name, &PatchParams::default(), &Patch::Merge(&patch_json))
                    .await?;
            }
        }

        Ok(())
    }

    async fn list_pods(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<Pod>, PlatformError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = ListParams::default().labels(&label_selector(labels));
        Ok(api.list(&params).await?.items)
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), PlatformError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);

        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(err)) if err.code == 404 => {
                info!(pod = %name, namespace = %namespace, "Pod already gone");
                Ok(())
            }
            Err(e) => Err(PlatformError::KubeError(e)),
        }
    }

    async fn set_declared_version(
        &self,
        namespace: &str,
        name: &str,
        version: &str,
    ) -> Result<(), PlatformError> {
        let api: Api<StreamCluster> = Api::namespaced(self.client.clone(), namespace);
        let patch_json = serde_json::json!({
            "spec": {
                "version": version
            }
        });

        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch_json))
            .await?;
        Ok(())
    }

    async fn persist_status(
        &self,
        namespace: &str,
        name: &str,
        status: &StreamClusterStatus,
    ) -> Result<(), PlatformError> {
        let api: Api<StreamCluster> = Api::namespaced(self.client.clone(), namespace);
        let patch_json = serde_json::json!({
            "status": serde_json::to_value(status)?
        });

        api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch_json))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "platform_test.rs"]
mod tests;
