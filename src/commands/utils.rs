//! Shared helpers for command handlers

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use kubeforge::config::{ClusterFile, Settings};
use kubeforge::utils::ssh::SshExecutor;
use kubeforge::{Runtime, RuntimeOptions};

/// Everything a command needs to drive one cluster
pub struct ClusterContext {
    pub runtime: Runtime,
    pub clusterfile_path: PathBuf,
    /// `kubeVersion` as read from disk; a `--kube-version` override is not saved
    recorded_version: String,
}

impl ClusterContext {
    /// Load settings and the Clusterfile, then build a runtime over SSH
    pub fn load(
        cluster: &str,
        clusterfile: Option<&Path>,
        kube_version: Option<String>,
    ) -> Result<Self> {
        let settings = Settings::load().context("Failed to load settings")?;
        let clusterfile_path = clusterfile
            .map(Path::to_path_buf)
            .unwrap_or_else(|| settings.clusterfile_path(cluster));

        let mut cluster_file = ClusterFile::load(&clusterfile_path)
            .with_context(|| format!("Failed to load {}", clusterfile_path.display()))?;
        let recorded_version = cluster_file.kube_version.clone();
        if let Some(version) = kube_version {
            cluster_file.kube_version = version;
        }

        let executor = SshExecutor::new(cluster_file.ssh.clone())?;
        let options = RuntimeOptions::from_settings(&settings, &cluster_file.name);
        let runtime = Runtime::new(&cluster_file, Arc::new(executor), options)?;

        Ok(Self {
            runtime,
            clusterfile_path,
            recorded_version,
        })
    }

    /// Write the runtime's inventory back to the Clusterfile
    pub async fn persist(&self) -> Result<()> {
        let cluster_file = persisted(self.runtime.clusterfile().await, &self.recorded_version);
        cluster_file
            .save(&self.clusterfile_path)
            .with_context(|| format!("Failed to save {}", self.clusterfile_path.display()))?;
        Ok(())
    }
}

/// Inventory as written back to disk, keeping the recorded version
fn persisted(mut cluster_file: ClusterFile, recorded_version: &str) -> ClusterFile {
    cluster_file.kube_version = recorded_version.to_string();
    cluster_file
}

/// Parse host addresses given on the command line, dropping duplicates
pub fn parse_hosts(values: &[String]) -> Result<Vec<IpAddr>> {
    let mut hosts = Vec::new();
    for value in values.iter().map(|v| v.trim()).filter(|v| !v.is_empty()) {
        let ip: IpAddr = value
            .parse()
            .with_context(|| format!("Invalid host address '{}'", value))?;
        if !hosts.contains(&ip) {
            hosts.push(ip);
        }
    }
    Ok(hosts)
}

/// Fail when the same address is requested as both master and node
pub fn ensure_disjoint(masters: &[IpAddr], nodes: &[IpAddr]) -> Result<()> {
    if let Some(ip) = masters.iter().find(|ip| nodes.contains(*ip)) {
        bail!("{} cannot be both a master and a node", ip);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_comma_split_values() {
        let values = vec!["10.0.0.1".to_string(), " 10.0.0.2 ".into(), "".into(), "10.0.0.1".into()];
        let hosts = parse_hosts(&values).unwrap();
        assert_eq!(hosts.len(), 2);
        assert_eq!(hosts[1], "10.0.0.2".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn rejects_hostnames() {
        assert!(parse_hosts(&["master-1".to_string()]).is_err());
    }

    #[test]
    fn version_override_is_not_persisted() {
        let mut cluster_file = ClusterFile::new("prod", "v1.20.4");
        cluster_file.masters.insert("10.0.0.1".parse().unwrap());

        let saved = persisted(cluster_file.clone(), "v1.19.8");
        assert_eq!(saved.kube_version, "v1.19.8");
        assert_eq!(saved.masters, cluster_file.masters);
    }

    #[test]
    fn master_and_node_must_differ() {
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        assert!(ensure_disjoint(&[ip], &[ip]).is_err());
        assert!(ensure_disjoint(&[ip], &[]).is_ok());
    }
}
