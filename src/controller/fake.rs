//! In-memory [`Platform`] for exercising the upgrade core without a cluster
//!
//! Records every call so tests can assert on the exact writes a tick issued.
//! Template updates move the workload to the new image and reset its updated
//! replica count, pod deletions remove the pod from the listing; everything
//! else about the rollout is driven explicitly by the test.

use crate::controller::observer::VERSION_LABEL;
use crate::controller::platform::{Platform, PlatformError, Workload, WorkloadShape};
use crate::crd::cluster::StreamClusterStatus;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    ConfigMap, ContainerState, ContainerStateWaiting, ContainerStatus, Pod, PodCondition,
    PodStatus, PodTemplateSpec,
};
use kube::api::ObjectMeta;
use kube::ResourceExt;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, PartialEq)]
pub enum PlatformCall {
    ApplyConfig(String),
    UpdateTemplate { workload: String, image: Option<String> },
    DeletePod(String),
    SetDeclaredVersion(String),
    PersistStatus,
}

#[derive(Default)]
struct FakeState {
    workloads: BTreeMap<String, Workload>,
    pods: Vec<Pod>,
    calls: Vec<PlatformCall>,
    persisted: Vec<StreamClusterStatus>,
    fail_reads: bool,
    fail_status_writes: bool,
    fail_version_writes: bool,
}

#[derive(Clone, Default)]
pub struct FakePlatform {
    state: Arc<Mutex<FakeState>>,
}

impl FakePlatform {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn insert_workload(&self, workload: Workload) {
        self.state()
            .workloads
            .insert(workload.name.clone(), workload);
    }

    pub fn workload(&self, name: &str) -> Option<Workload> {
        self.state().workloads.get(name).cloned()
    }

    /// Mutate a stored workload, e.g. to advance its replica counts
    pub fn update_workload(&self, name: &str, f: impl FnOnce(&mut Workload)) {
        if let Some(workload) = self.state().workloads.get_mut(name) {
            f(workload);
        }
    }

    pub fn add_pod(&self, pod: Pod) {
        self.state().pods.push(pod);
    }

    /// Replace the pod with the same name, or append it
    pub fn upsert_pod(&self, pod: Pod) {
        let mut state = self.state();
        let name = pod.name_any();
        match state.pods.iter_mut().find(|p| p.name_any() == name) {
            Some(existing) => *existing = pod,
            None => state.pods.push(pod),
        }
    }

    pub fn pods(&self) -> Vec<Pod> {
        self.state().pods.clone()
    }

    pub fn calls(&self) -> Vec<PlatformCall> {
        self.state().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    pub fn deleted_pods(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                PlatformCall::DeletePod(name) => Some(name),
                _ => None,
            })
            .collect()
    }

    pub fn template_updates(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                PlatformCall::UpdateTemplate { workload, .. } => Some(workload),
                _ => None,
            })
            .collect()
    }

    /// Calls other than status persistence
    pub fn writes(&self) -> Vec<PlatformCall> {
        self.calls()
            .into_iter()
            .filter(|c| *c != PlatformCall::PersistStatus)
            .collect()
    }

    pub fn persisted_statuses(&self) -> Vec<StreamClusterStatus> {
        self.state().persisted.clone()
    }

    pub fn fail_reads(&self, fail: bool) {
        self.state().fail_reads = fail;
    }

    pub fn fail_status_writes(&self, fail: bool) {
        self.state().fail_status_writes = fail;
    }

    pub fn fail_version_writes(&self, fail: bool) {
        self.state().fail_version_writes = fail;
    }
}

#[async_trait]
impl Platform for FakePlatform {
    async fn get_workload(
        &self,
        shape: WorkloadShape,
        namespace: &str,
        name: &str,
    ) -> Result<Workload, PlatformError> {
        let state = self.state();
        if state.fail_reads {
            return Err(PlatformError::Unavailable(format!("get {}", name)));
        }

        state
            .workloads
            .get(name)
            .filter(|w| w.shape == shape && w.namespace == namespace)
            .cloned()
            .ok_or_else(|| PlatformError::WorkloadNotFound {
                shape,
                namespace: namespace.to_string(),
                name: name.to_string(),
            })
    }

    async fn apply_config(&self, config_map: &ConfigMap) -> Result<(), PlatformError> {
        self.state()
            .calls
            .push(PlatformCall::ApplyConfig(config_map.name_any()));
        Ok(())
    }

    async fn update_workload_template(
        &self,
        _shape: WorkloadShape,
        _namespace: &str,
        name: &str,
        template: &PodTemplateSpec,
    ) -> Result<(), PlatformError> {
        let image = template
            .spec
            .as_ref()
            .and_then(|s| s.containers.first())
            .and_then(|c| c.image.clone());
        let labels = template
            .metadata
            .as_ref()
            .and_then(|m| m.labels.clone())
            .unwrap_or_default();

        let mut state = self.state();
        if let Some(workload) = state.workloads.get_mut(name) {
            workload.image = image.clone();
            workload.template_labels = labels;
            workload.updated_replicas = 0;
        }
        state.calls.push(PlatformCall::UpdateTemplate {
            workload: name.to_string(),
            image,
        });
        Ok(())
    }

    async fn list_pods(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<Pod>, PlatformError> {
        let state = self.state();
        if state.fail_reads {
            return Err(PlatformError::Unavailable("list pods".to_string()));
        }

        Ok(state
            .pods
            .iter()
            .filter(|p| p.namespace().as_deref() == Some(namespace))
            .filter(|p| {
                let pod_labels = p.labels();
                labels.iter().all(|(k, v)| pod_labels.get(k) == Some(v))
            })
            .cloned()
            .collect())
    }

    async fn delete_pod(&self, _namespace: &str, name: &str) -> Result<(), PlatformError> {
        let mut state = self.state();
        state.pods.retain(|p| p.name_any() != name);
        state.calls.push(PlatformCall::DeletePod(name.to_string()));
        Ok(())
    }

    async fn set_declared_version(
        &self,
        _namespace: &str,
        _name: &str,
        version: &str,
    ) -> Result<(), PlatformError> {
        let mut state = self.state();
        state
            .calls
            .push(PlatformCall::SetDeclaredVersion(version.to_string()));
        if state.fail_version_writes {
            return Err(PlatformError::Unavailable("declared version write".to_string()));
        }
        Ok(())
    }

    async fn persist_status(
        &self,
        _namespace: &str,
        _name: &str,
        status: &StreamClusterStatus,
    ) -> Result<(), PlatformError> {
        let mut state = self.state();
        state.calls.push(PlatformCall::PersistStatus);
        if state.fail_status_writes {
            return Err(PlatformError::Unavailable("status write".to_string()));
        }
        state.persisted.push(status.clone());
        Ok(())
    }
}

/// Build a pod carrying `labels` plus the version label
pub fn pod(
    name: &str,
    namespace: &str,
    labels: &BTreeMap<String, String>,
    version: &str,
    ready: bool,
) -> Pod {
    let mut labels = labels.clone();
    labels.insert(VERSION_LABEL.to_string(), version.to_string());

    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(labels),
            ..Default::default()
        },
        spec: None,
        status: Some(PodStatus {
            conditions: Some(vec![PodCondition {
                type_: "Ready".to_string(),
                status: if ready { "True" } else { "False" }.to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        }),
    }
}

/// Mark the pod's main container as waiting with `reason`
pub fn waiting(mut pod: Pod, reason: &str) -> Pod {
    let status = pod.status.get_or_insert_with(PodStatus::default);
    status.container_statuses = Some(vec![ContainerStatus {
        name: "main".to_string(),
        ready: false,
        state: Some(ContainerState {
            waiting: Some(ContainerStateWaiting {
                reason: Some(reason.to_string()),
                message: None,
            }),
            ..Default::default()
        }),
        ..Default::default()
    }]);
    pod
}
