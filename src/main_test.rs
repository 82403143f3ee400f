use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use kube::runtime::controller::Action;
use std::sync::Arc;
use stratum::config::ControllerConfig;
use stratum::controller::builder::DefaultConfigBuilder;
use stratum::controller::fake::FakePlatform;
use stratum::controller::platform::PlatformError;
use stratum::controller::{Context, ReconcileError};
use stratum::crd::cluster::{StreamCluster, StreamClusterSpec, TierSpec};
use stratum::server::create_metrics;
use std::time::Duration;

fn context(retry: Duration) -> Arc<Context> {
    let config = ControllerConfig {
        retry_interval: retry,
        ..ControllerConfig::default()
    };
    Arc::new(Context::new(
        Arc::new(FakePlatform::new()),
        Arc::new(DefaultConfigBuilder),
        create_metrics().expect("create metrics"),
        config,
    ))
}

#[tokio::test]
async fn test_error_policy_requeues_after_retry_interval() {
    let mut cluster = StreamCluster::new(
        "demo",
        StreamClusterSpec {
            version: "1.0".to_string(),
            log: TierSpec::default(),
            storage: TierSpec::default(),
            frontend: TierSpec::default(),
        },
    );
    cluster.metadata.namespace = Some("default".to_string());

    let error =
        ReconcileError::StatusPersist(PlatformError::Unavailable("status write".to_string()));

    let action = crate::error_policy(Arc::new(cluster), &error, context(Duration::from_secs(7)));

    assert_eq!(action, Action::requeue(Duration::from_secs(7)));
}

fn offline_client() -> kube::Client {
    let config = kube::Config::new("http://127.0.0.1:6443".parse().expect("valid url"));
    kube::Client::try_from(config).expect("client from config")
}

#[tokio::test]
async fn test_workload_watches_follow_watched_namespace() {
    let client = offline_client();

    let stateful_sets = crate::scoped_api::<StatefulSet>(client.clone(), Some("streaming"));
    let deployments = crate::scoped_api::<Deployment>(client.clone(), Some("streaming"));
    let clusters = crate::scoped_api::<StreamCluster>(client, Some("streaming"));

    assert_eq!(
        stateful_sets.resource_url(),
        "/apis/apps/v1/namespaces/streaming/statefulsets"
    );
    assert_eq!(
        deployments.resource_url(),
        "/apis/apps/v1/namespaces/streaming/deployments"
    );
    assert_eq!(
        clusters.resource_url(),
        "/apis/stratum.io/v1alpha1/namespaces/streaming/streamclusters"
    );
}

#[tokio::test]
async fn test_workload_watches_span_cluster_without_namespace() {
    let client = offline_client();

    let stateful_sets = crate::scoped_api::<StatefulSet>(client, None);

    assert_eq!(stateful_sets.resource_url(), "/apis/apps/v1/statefulsets");
}
