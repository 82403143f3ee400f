use super::*;
use crate::controller::fake::{pod, waiting};
use k8s_openapi::api::core::v1::PodStatus;
use std::collections::BTreeMap;

fn labels() -> BTreeMap<String, String> {
    vec![("app".to_string(), "stratum".to_string())]
        .into_iter()
        .collect()
}

#[test]
fn test_ready_pod_is_healthy() {
    let p = pod("demo-log-0", "streaming", &labels(), "2.0", true);

    assert!(is_pod_ready(&p));
    assert_eq!(pod_fault(&p), None);
}

#[test]
fn test_pod_without_status_is_not_ready_and_not_faulty() {
    let mut p = pod("demo-log-0", "streaming", &labels(), "2.0", true);
    p.status = None;

    assert!(!is_pod_ready(&p));
    assert_eq!(pod_fault(&p), None);
}

#[test]
fn test_starting_pod_is_slow_not_faulty() {
    let p = waiting(
        pod("demo-log-0", "streaming", &labels(), "2.0", false),
        "ContainerCreating",
    );

    assert!(!is_pod_ready(&p));
    assert_eq!(pod_fault(&p), None);
}

#[test]
fn test_crash_looping_pod_is_faulty() {
    let p = waiting(
        pod("demo-log-0", "streaming", &labels(), "2.0", false),
        "CrashLoopBackOff",
    );

    assert_eq!(pod_fault(&p).as_deref(), Some("CrashLoopBackOff"));
}

#[test]
fn test_image_pull_failure_is_faulty() {
    let p = waiting(
        pod("demo-log-0", "streaming", &labels(), "2.0", false),
        "ImagePullBackOff",
    );

    assert_eq!(pod_fault(&p).as_deref(), Some("ImagePullBackOff"));
}

#[test]
fn test_faulty_init_container_is_detected() {
    let mut p = waiting(
        pod("demo-log-0", "streaming", &labels(), "2.0", false),
        "ErrImagePull",
    );
    let status: &mut PodStatus = p.status.as_mut().unwrap();
    status.init_container_statuses = status.container_statuses.take();

    assert_eq!(pod_fault(&p).as_deref(), Some("ErrImagePull"));
}
