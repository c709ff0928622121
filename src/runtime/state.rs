//! Mutable cluster state shared by the join and delete workers

use std::net::{IpAddr, SocketAddr};

use indexmap::IndexSet;

use crate::config::clusterfile::{ClusterFile, RegistryConfig};
use crate::config::kubeadm::{CgroupDriver, KubeadmConfig, api_server_endpoint};
use crate::error::{Error, Result};
use crate::runtime::credentials::JoinCredentials;
use crate::utils::ssh::SshConfig;

/// Authoritative inventory plus the shared kubeadm template.
///
/// Lives behind the runtime's lock; every mutation happens while it is held.
#[derive(Debug, Clone)]
pub struct ClusterState {
    pub name: String,
    pub kube_version: String,
    pub masters: IndexSet<IpAddr>,
    pub nodes: IndexSet<IpAddr>,
    pub api_server_domain: String,
    pub vip: IpAddr,
    pub svc_cidr: String,
    pub dns_domain: String,
    pub extra_cert_sans: Vec<String>,
    pub registry: RegistryConfig,
    pub ssh: SshConfig,
    pub cgroup_driver: CgroupDriver,
    pub credentials: JoinCredentials,
    pub kubeadm: KubeadmConfig,
    /// Clusterfile documents, applied over rootfs defaults on first load
    pub kubeadm_overrides: Vec<serde_yaml::Value>,
    pub kubeadm_loaded: bool,
}

impl ClusterState {
    pub fn from_clusterfile(cluster: &ClusterFile) -> Result<Self> {
        cluster.validate()?;
        Ok(Self {
            name: cluster.name.clone(),
            kube_version: cluster.kube_version.clone(),
            masters: cluster.masters.clone(),
            nodes: cluster.nodes.clone(),
            api_server_domain: cluster.api_server_domain.clone(),
            vip: cluster.vip,
            svc_cidr: cluster.svc_cidr.clone(),
            dns_domain: cluster.dns_domain.clone(),
            extra_cert_sans: cluster.cert_sans.clone(),
            registry: cluster.registry.clone(),
            ssh: cluster.ssh.clone(),
            cgroup_driver: CgroupDriver::default(),
            credentials: JoinCredentials::default(),
            kubeadm: KubeadmConfig::default(),
            kubeadm_overrides: cluster.kubeadm.clone(),
            kubeadm_loaded: false,
        })
    }

    /// Inventory back in persisted form; credentials are never written out
    pub fn to_clusterfile(&self) -> ClusterFile {
        ClusterFile {
            name: self.name.clone(),
            kube_version: self.kube_version.clone(),
            masters: self.masters.clone(),
            nodes: self.nodes.clone(),
            api_server_domain: self.api_server_domain.clone(),
            vip: self.vip,
            svc_cidr: self.svc_cidr.clone(),
            dns_domain: self.dns_domain.clone(),
            cert_sans: self.extra_cert_sans.clone(),
            registry: self.registry.clone(),
            ssh: self.ssh.clone(),
            kubeadm: self.kubeadm_overrides.clone(),
        }
    }

    /// First master; the bootstrap host and source of join credentials
    pub fn master0(&self) -> Result<IpAddr> {
        self.masters
            .first()
            .copied()
            .ok_or_else(|| Error::validation(format!("cluster '{}' has no masters", self.name)))
    }

    /// Registry host, master0 unless configured
    pub fn registry_ip(&self) -> Result<IpAddr> {
        match self.registry.ip {
            Some(ip) => Ok(ip),
            None => self.master0(),
        }
    }

    /// `master0:6443`, where joining hosts discover the control plane
    pub fn master0_endpoint(&self) -> Result<SocketAddr> {
        Ok(api_server_endpoint(self.master0()?))
    }

    /// Alternative names for the API server certificate
    pub fn cert_sans(&self) -> Vec<String> {
        let mut sans: IndexSet<String> = IndexSet::new();
        sans.insert("127.0.0.1".to_string());
        sans.insert(self.api_server_domain.clone());
        sans.insert(self.vip.to_string());
        sans.extend(self.masters.iter().map(IpAddr::to_string));
        sans.extend(self.extra_cert_sans.iter().cloned());
        sans.into_iter().collect()
    }

    pub fn add_masters(&mut self, masters: &[IpAddr]) {
        self.masters.extend(masters.iter().copied());
    }

    pub fn add_nodes(&mut self, nodes: &[IpAddr]) {
        self.nodes.extend(nodes.iter().copied());
    }

    /// Remove masters keeping the order of the rest
    pub fn remove_masters(&mut self, masters: &[IpAddr]) {
        self.masters.retain(|ip| !masters.contains(ip));
    }

    pub fn remove_nodes(&mut self, nodes: &[IpAddr]) {
        self.nodes.retain(|ip| !nodes.contains(ip));
    }
}
