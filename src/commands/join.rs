//! Join masters and nodes to an existing cluster

use std::path::Path;

use anyhow::{Result, bail};

use crate::commands::utils::{ClusterContext, ensure_disjoint, parse_hosts};

pub async fn handle_join(
    cluster: &str,
    clusterfile: Option<&Path>,
    masters: &[String],
    nodes: &[String],
    kube_version: Option<String>,
) -> Result<()> {
    let masters = parse_hosts(masters)?;
    let nodes = parse_hosts(nodes)?;
    if masters.is_empty() && nodes.is_empty() {
        bail!("Nothing to join: pass --masters and/or --nodes");
    }
    ensure_disjoint(&masters, &nodes)?;

    let ctx = ClusterContext::load(cluster, clusterfile, kube_version)?;
    let state = ctx.runtime.state().await;
    if let Some(ip) = masters
        .iter()
        .chain(nodes.iter())
        .find(|ip| state.masters.contains(*ip) || state.nodes.contains(*ip))
    {
        bail!("{} is already part of cluster '{}'", ip, state.name);
    }

    ctx.runtime.join_masters(&masters).await?;
    if !masters.is_empty() {
        println!("✓ Joined {} master(s)", masters.len());
    }
    ctx.runtime.join_nodes(&nodes).await?;
    if !nodes.is_empty() {
        println!("✓ Joined {} node(s)", nodes.len());
    }

    ctx.persist().await?;
    Ok(())
}
