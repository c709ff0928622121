//! Remove masters and nodes from a cluster

use std::path::Path;

use anyhow::{Result, bail};

use crate::commands::utils::{ClusterContext, ensure_disjoint, parse_hosts};

pub async fn handle_delete(
    cluster: &str,
    clusterfile: Option<&Path>,
    masters: &[String],
    nodes: &[String],
) -> Result<()> {
    let masters = parse_hosts(masters)?;
    let nodes = parse_hosts(nodes)?;
    if masters.is_empty() && nodes.is_empty() {
        bail!("Nothing to delete: pass --masters and/or --nodes");
    }
    ensure_disjoint(&masters, &nodes)?;

    let ctx = ClusterContext::load(cluster, clusterfile, None)?;
    let state = ctx.runtime.state().await;
    for ip in &masters {
        if !state.masters.contains(ip) {
            bail!("{} is not a master of cluster '{}'", ip, state.name);
        }
    }
    for ip in &nodes {
        if !state.nodes.contains(ip) {
            bail!("{} is not a node of cluster '{}'", ip, state.name);
        }
    }

    // Nodes go first so kubectl still has a control plane to talk to
    ctx.runtime.delete_nodes(&nodes).await?;
    if !nodes.is_empty() {
        println!("✓ Deleted {} node(s)", nodes.len());
    }
    ctx.runtime.delete_masters(&masters).await?;
    if !masters.is_empty() {
        println!("✓ Deleted {} master(s)", masters.len());
    }

    ctx.persist().await?;
    Ok(())
}
