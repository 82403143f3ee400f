use kube::CustomResourceExt;
use stratum::crd::cluster::StreamCluster;

fn main() -> anyhow::Result<()> {
    // kubectl accepts JSON manifests
    let crd = serde_json::to_string_pretty(&StreamCluster::crd())?;
    println!("{}", crd);
    Ok(())
}
