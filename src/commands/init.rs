//! Bootstrap a cluster from its Clusterfile

use std::net::IpAddr;
use std::path::Path;

use anyhow::{Result, bail};

use crate::commands::utils::ClusterContext;

/// Initialize master0, then join every other master and node
pub async fn handle_init(cluster: &str, clusterfile: Option<&Path>) -> Result<()> {
    let ctx = ClusterContext::load(cluster, clusterfile, None)?;
    let state = ctx.runtime.state().await;

    let Some(&master0) = state.masters.first() else {
        bail!("Clusterfile for '{}' lists no masters", state.name);
    };
    let masters: Vec<IpAddr> = state.masters.iter().skip(1).copied().collect();
    let nodes: Vec<IpAddr> = state.nodes.iter().copied().collect();

    println!("Initializing cluster '{}' ({})", state.name, state.kube_version);
    ctx.runtime.init().await?;
    println!("✓ Initialized master0 {}", master0);

    ctx.runtime.join_masters(&masters).await?;
    if !masters.is_empty() {
        println!("✓ Joined {} master(s)", masters.len());
    }
    ctx.runtime.join_nodes(&nodes).await?;
    if !nodes.is_empty() {
        println!("✓ Joined {} node(s)", nodes.len());
    }

    ctx.persist().await?;
    println!("✓ Cluster '{}' is ready", state.name);
    Ok(())
}
