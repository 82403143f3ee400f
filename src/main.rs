use futures::StreamExt;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::NamespaceResourceScope;
use kube::runtime::controller::Action;
use kube::runtime::{watcher, Controller};
use kube::{Api, Client, Resource};
use std::sync::Arc;
use stratum::config::ControllerConfig;
use stratum::controller::builder::DefaultConfigBuilder;
use stratum::controller::platform::KubePlatform;
use stratum::controller::{reconcile, Context, ReconcileError};
use stratum::crd::cluster::StreamCluster;
use stratum::server::{create_metrics, run_health_server, ReadinessState};
use tracing::{error, info, warn};

/// Error policy for the controller
///
/// Reconcile only fails when the tick's status could not be written back,
/// so the cluster is retried after the short retry interval.
pub fn error_policy(
    cluster: Arc<StreamCluster>,
    error: &ReconcileError,
    ctx: Arc<Context>,
) -> Action {
    warn!(
        cluster = %kube::ResourceExt::name_any(cluster.as_ref()),
        error = %error,
        "Reconcile error (will retry)"
    );
    Action::requeue(ctx.config.retry_interval)
}

/// Api over the watched namespace, or the whole cluster when none is set
pub fn scoped_api<K>(client: Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
{
    match namespace {
        Some(namespace) => Api::namespaced(client, namespace),
        None => Api::all(client),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("Starting stratum upgrade controller");

    let config = ControllerConfig::from_env();
    let metrics = create_metrics()?;
    let readiness = ReadinessState::new();

    let health_readiness = readiness.clone();
    let health_metrics = metrics.clone();
    let health_port = config.health_port;
    tokio::spawn(async move {
        if let Err(e) = run_health_server(health_port, health_readiness, health_metrics).await {
            warn!(error = %e, "Health server failed");
        }
    });

    let client = match Client::try_default().await {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "Failed to create Kubernetes client");
            return Err(e.into());
        }
    };
    info!("Connected to Kubernetes cluster");

    let namespace = config.watch_namespace.clone();
    if let Some(namespace) = &namespace {
        info!(namespace = %namespace, "Watching a single namespace");
    }
    let clusters = scoped_api::<StreamCluster>(client.clone(), namespace.as_deref());
    let stateful_sets = scoped_api::<StatefulSet>(client.clone(), namespace.as_deref());
    let deployments = scoped_api::<Deployment>(client.clone(), namespace.as_deref());

    let ctx = Arc::new(Context::new(
        Arc::new(KubePlatform::new(client)),
        Arc::new(DefaultConfigBuilder),
        metrics,
        config,
    ));

    readiness.set_ready();
    info!("Controller ready, starting reconciliation loop");

    // Tier workloads carry an owner reference to their StreamCluster, so a
    // rollout step on any of them triggers a reconcile. error_policy logs failures
    Controller::new(clusters, watcher::Config::default())
        .owns(stateful_sets, watcher::Config::default())
        .owns(deployments, watcher::Config::default())
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            if let Ok((obj, _)) = res {
                info!(cluster = %obj.name, namespace = ?obj.namespace, "Reconciled");
            }
        })
        .await;

    Ok(())
}

#[cfg(test)]
#[path = "main_test.rs"]
mod tests;
