//! Persisted cluster configuration (`Clusterfile`)

use std::fs;
use std::net::IpAddr;
use std::path::Path;

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::utils::ssh::SshConfig;

pub const DEFAULT_API_SERVER_DOMAIN: &str = "apiserver.cluster.local";
pub const DEFAULT_REGISTRY_DOMAIN: &str = "sea.hub";
pub const DEFAULT_REGISTRY_PORT: u16 = 5000;

fn default_api_server_domain() -> String {
    DEFAULT_API_SERVER_DOMAIN.to_string()
}

fn default_vip() -> IpAddr {
    IpAddr::from([10, 103, 97, 2])
}

fn default_svc_cidr() -> String {
    "10.96.0.0/22".to_string()
}

fn default_dns_domain() -> String {
    "cluster.local".to_string()
}

fn default_registry_domain() -> String {
    DEFAULT_REGISTRY_DOMAIN.to_string()
}

fn default_registry_port() -> u16 {
    DEFAULT_REGISTRY_PORT
}

/// Private image registry every host pulls from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryConfig {
    #[serde(default = "default_registry_domain")]
    pub domain: String,
    /// Registry host; master0 when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<IpAddr>,
    #[serde(default = "default_registry_port")]
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            domain: default_registry_domain(),
            ip: None,
            port: default_registry_port(),
            username: None,
            password: None,
        }
    }
}

impl RegistryConfig {
    /// `domain:port`, the prefix of every image pulled from this registry
    pub fn repo(&self) -> String {
        format!("{}:{}", self.domain, self.port)
    }

    /// Username and password, when both are configured and non-empty
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.username.as_deref(), self.password.as_deref()) {
            (Some(user), Some(pass)) if !user.is_empty() && !pass.is_empty() => Some((user, pass)),
            _ => None,
        }
    }
}

/// Cluster description read at startup and rewritten after a successful
/// join or delete
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterFile {
    pub name: String,
    pub kube_version: String,
    #[serde(default)]
    pub masters: IndexSet<IpAddr>,
    #[serde(default)]
    pub nodes: IndexSet<IpAddr>,
    #[serde(default = "default_api_server_domain")]
    pub api_server_domain: String,
    #[serde(default = "default_vip")]
    pub vip: IpAddr,
    #[serde(default = "default_svc_cidr")]
    pub svc_cidr: String,
    #[serde(default = "default_dns_domain")]
    pub dns_domain: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cert_sans: Vec<String>,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub ssh: SshConfig,
    /// Embedded kubeadm documents; they win over rootfs defaults
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub kubeadm: Vec<serde_yaml::Value>,
}

impl ClusterFile {
    pub fn new(name: impl Into<String>, kube_version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kube_version: kube_version.into(),
            masters: IndexSet::new(),
            nodes: IndexSet::new(),
            api_server_domain: default_api_server_domain(),
            vip: default_vip(),
            svc_cidr: default_svc_cidr(),
            dns_domain: default_dns_domain(),
            cert_sans: Vec::new(),
            registry: RegistryConfig::default(),
            ssh: SshConfig::default(),
            kubeadm: Vec::new(),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            Error::config(format!("failed to read Clusterfile {}: {}", path.display(), e))
        })?;
        let cluster: ClusterFile = serde_yaml::from_str(&content)?;
        cluster.validate()?;
        Ok(cluster)
    }

    /// Write the Clusterfile, replacing any previous copy atomically
    pub fn save(&self, path: &Path) -> Result<()> {
        self.validate()?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, serde_yaml::to_string(self)?)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::config("cluster name must not be empty"));
        }
        if let Some(ip) = self.masters.iter().find(|ip| self.nodes.contains(*ip)) {
            return Err(Error::config(format!(
                "{} is listed as both master and node",
                ip
            )));
        }
        Ok(())
    }
}
