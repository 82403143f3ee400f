//! Pod health predicates
//!
//! Distinguishes a pod that is merely not ready yet from one that is faulty,
//! i.e. stuck in a state that will not resolve on its own.

use k8s_openapi::api::core::v1::{ContainerStatus, Pod};

/// Container waiting reasons that indicate the new version cannot come up
pub const FAULT_REASONS: &[&str] = &[
    "CrashLoopBackOff",
    "ImagePullBackOff",
    "ErrImagePull",
    "CreateContainerConfigError",
    "InvalidImageName",
];

/// True iff the platform reports the pod Ready
pub fn is_pod_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
        .unwrap_or(false)
}

/// Reason the pod is considered faulty, if any
pub fn pod_fault(pod: &Pod) -> Option<String> {
    let status = pod.status.as_ref()?;

    let containers = status
        .init_container_statuses
        .iter()
        .flatten()
        .chain(status.container_statuses.iter().flatten());

    containers.filter_map(waiting_reason).find_map(|reason| {
        FAULT_REASONS
            .contains(&reason)
            .then(|| reason.to_string())
    })
}

fn waiting_reason(status: &ContainerStatus) -> Option<&str> {
    status
        .state
        .as_ref()
        .and_then(|s| s.waiting.as_ref())
        .and_then(|w| w.reason.as_deref())
}

#[cfg(test)]
#[path = "inspector_test.rs"]
mod tests;
