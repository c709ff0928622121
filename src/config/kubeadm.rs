//! Typed kubeadm and kubelet configuration documents
//!
//! Only the fields the orchestrator reads or stamps are typed; everything
//! else round-trips through the flattened `extra` maps untouched.

use std::collections::BTreeMap;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_yaml::Value;

use crate::error::{Error, Result};

pub const KUBEADM_V1BETA1: &str = "kubeadm.k8s.io/v1beta1";
pub const KUBEADM_V1BETA2: &str = "kubeadm.k8s.io/v1beta2";
pub const KUBEADM_V1BETA3: &str = "kubeadm.k8s.io/v1beta3";
pub const KUBELET_V1BETA1: &str = "kubelet.config.k8s.io/v1beta1";

pub const DEFAULT_CA_CERT_PATH: &str = "/etc/kubernetes/pki/ca.crt";
pub const API_SERVER_PORT: u16 = 6443;

/// API server address on `host`; IPv6 hosts come out bracketed
pub fn api_server_endpoint(host: IpAddr) -> SocketAddr {
    SocketAddr::new(host, API_SERVER_PORT)
}

type Extra = BTreeMap<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CgroupDriver {
    Systemd,
    #[default]
    Cgroupfs,
}

impl CgroupDriver {
    pub fn as_str(&self) -> &'static str {
        match self {
            CgroupDriver::Systemd => "systemd",
            CgroupDriver::Cgroupfs => "cgroupfs",
        }
    }
}

impl fmt::Display for CgroupDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CgroupDriver {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "systemd" => Ok(CgroupDriver::Systemd),
            "cgroupfs" => Ok(CgroupDriver::Cgroupfs),
            other => Err(Error::validation(format!("unknown cgroup driver '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiEndpoint {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub advertise_address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind_port: Option<u16>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRegistration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cri_socket: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootstrapTokenDiscovery {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_server_endpoint: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub token: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ca_cert_hashes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unsafe_skip_ca_verification: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Discovery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bootstrap_token: Option<BootstrapTokenDiscovery>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinControlPlane {
    #[serde(rename = "localAPIEndpoint", default)]
    pub local_api_endpoint: ApiEndpoint,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub certificate_key: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinConfiguration {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_cert_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discovery: Option<Discovery>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_registration: Option<NodeRegistration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_plane: Option<JoinControlPlane>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitConfiguration {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    #[serde(rename = "localAPIEndpoint", default, skip_serializing_if = "Option::is_none")]
    pub local_api_endpoint: Option<ApiEndpoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_registration: Option<NodeRegistration>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Networking {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns_domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_subnet: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_subnet: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiServer {
    #[serde(rename = "certSANs", default, skip_serializing_if = "Vec::is_empty")]
    pub cert_sans: Vec<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterConfiguration {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kubernetes_version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub control_plane_endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_repository: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub networking: Option<Networking>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_server: Option<ApiServer>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KubeletConfiguration {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cgroup_driver: Option<CgroupDriver>,
    #[serde(flatten)]
    pub extra: Extra,
}

/// The four documents kubeadm consumes, as one shared template
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KubeadmConfig {
    pub init: InitConfiguration,
    pub cluster: ClusterConfiguration,
    pub join: JoinConfiguration,
    pub kubelet: KubeletConfiguration,
}

impl KubeadmConfig {
    /// Build a config from already parsed documents, dispatching on `kind`
    pub fn from_documents(docs: &[Value]) -> Result<Self> {
        let mut config = Self::default();
        config.overlay(docs, true)?;
        Ok(config)
    }

    /// Fill fields missing from this config with values from `defaults`.
    ///
    /// Values already present win over the defaults.
    pub fn merge_defaults(&mut self, defaults: &[Value]) -> Result<()> {
        self.overlay(defaults, false)
    }

    fn overlay(&mut self, docs: &[Value], docs_win: bool) -> Result<()> {
        for doc in docs {
            let kind = doc.get("kind").and_then(Value::as_str).unwrap_or_default();
            match kind {
                "InitConfiguration" => self.init = merged(&self.init, doc, docs_win)?,
                "ClusterConfiguration" => self.cluster = merged(&self.cluster, doc, docs_win)?,
                "JoinConfiguration" => self.join = merged(&self.join, doc, docs_win)?,
                "KubeletConfiguration" => self.kubelet = merged(&self.kubelet, doc, docs_win)?,
                other => {
                    tracing::debug!(kind = %other, "Ignoring unknown kubeadm document");
                }
            }
        }
        Ok(())
    }

    /// Set the apiVersion and kind of every document
    pub fn set_api_version(&mut self, kubeadm_api: &str) {
        self.init.api_version = kubeadm_api.to_string();
        self.init.kind = "InitConfiguration".to_string();
        self.cluster.api_version = kubeadm_api.to_string();
        self.cluster.kind = "ClusterConfiguration".to_string();
        self.join.api_version = kubeadm_api.to_string();
        self.join.kind = "JoinConfiguration".to_string();
        self.kubelet.api_version = KUBELET_V1BETA1.to_string();
        self.kubelet.kind = "KubeletConfiguration".to_string();
    }

    pub fn set_cgroup_driver(&mut self, driver: CgroupDriver) {
        self.kubelet.cgroup_driver = Some(driver);
    }

    /// Point discovery at `endpoint` using the given bootstrap token
    pub fn set_join_discovery(&mut self, endpoint: &str, token: &str, ca_cert_hash: &str) {
        let discovery = self.join.discovery.get_or_insert_with(Default::default);
        let bootstrap = discovery.bootstrap_token.get_or_insert_with(Default::default);
        bootstrap.api_server_endpoint = endpoint.to_string();
        bootstrap.token = token.to_string();
        bootstrap.ca_cert_hashes = if ca_cert_hash.is_empty() {
            Vec::new()
        } else {
            vec![ca_cert_hash.to_string()]
        };
        if self.join.ca_cert_path.is_none() {
            self.join.ca_cert_path = Some(DEFAULT_CA_CERT_PATH.to_string());
        }
    }

    /// Make the join document a control-plane join advertising `address`
    pub fn set_join_control_plane(&mut self, address: IpAddr, certificate_key: &str) {
        let control_plane = self.join.control_plane.get_or_insert_with(Default::default);
        control_plane.local_api_endpoint.advertise_address = address.to_string();
        control_plane.local_api_endpoint.bind_port = Some(API_SERVER_PORT);
        control_plane.certificate_key = certificate_key.to_string();
    }

    pub fn set_init_advertise_address(&mut self, address: IpAddr) {
        let endpoint = self.init.local_api_endpoint.get_or_insert_with(Default::default);
        endpoint.advertise_address = address.to_string();
        endpoint.bind_port = Some(API_SERVER_PORT);
    }

    /// `JoinConfiguration` + `KubeletConfiguration` for a control-plane join
    pub fn join_master_documents(&self) -> Result<String> {
        marshal_with_delimiter(&[to_value(&self.join)?, to_value(&self.kubelet)?])
    }

    /// Same as [`Self::join_master_documents`] without the controlPlane section
    pub fn join_node_documents(&self) -> Result<String> {
        let mut join = self.join.clone();
        join.control_plane = None;
        marshal_with_delimiter(&[to_value(&join)?, to_value(&self.kubelet)?])
    }

    pub fn init_documents(&self) -> Result<String> {
        marshal_with_delimiter(&[
            to_value(&self.init)?,
            to_value(&self.cluster)?,
            to_value(&self.kubelet)?,
        ])
    }
}

fn to_value<T: Serialize>(doc: &T) -> Result<Value> {
    Ok(serde_yaml::to_value(doc)?)
}

fn merged<T>(current: &T, doc: &Value, doc_wins: bool) -> Result<T>
where
    T: Serialize + for<'de> Deserialize<'de>,
{
    let current = to_value(current)?;
    let value = if doc_wins {
        let mut base = current;
        merge_values(&mut base, doc.clone());
        base
    } else {
        let mut base = doc.clone();
        merge_values(&mut base, current);
        base
    };
    Ok(serde_yaml::from_value(value)?)
}

/// Deep-merge `overlay` into `base`; mappings merge key by key, anything
/// else in `overlay` replaces the base value.
pub fn merge_values(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Mapping(base_map), Value::Mapping(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (_, Value::Null) => {}
        (base, overlay) => *base = overlay,
    }
}

/// Parse a `---` separated YAML stream, skipping empty documents
pub fn parse_documents(content: &str) -> Result<Vec<Value>> {
    let mut docs = Vec::new();
    for document in serde_yaml::Deserializer::from_str(content) {
        let value = Value::deserialize(document)?;
        if !value.is_null() {
            docs.push(value);
        }
    }
    Ok(docs)
}

/// Render documents as one `---` separated YAML stream
pub fn marshal_with_delimiter(docs: &[Value]) -> Result<String> {
    let rendered = docs
        .iter()
        .map(serde_yaml::to_string)
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rendered.join("---\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEFAULTS: &str = r#"
apiVersion: kubeadm.k8s.io/v1beta2
kind: ClusterConfiguration
kubernetesVersion: v1.19.8
controlPlaneEndpoint: "apiserver.cluster.local:6443"
imageRepository: sea.hub:5000
networking:
  podSubnet: 100.64.0.0/10
  serviceSubnet: 10.96.0.0/22
apiServer:
  certSANs:
    - 127.0.0.1
  extraArgs:
    feature-gates: TTLAfterFinished=true
---
apiVersion: kubeadm.k8s.io/v1beta2
kind: JoinConfiguration
caCertPath: /etc/kubernetes/pki/ca.crt
discovery:
  timeout: 5m0s
nodeRegistration:
  criSocket: /var/run/dockershim.sock
---
apiVersion: kubelet.config.k8s.io/v1beta1
kind: KubeletConfiguration
cgroupDriver: systemd
maxPods: 110
"#;

    #[test]
    fn parses_every_known_document() {
        let docs = parse_documents(DEFAULTS).unwrap();
        assert_eq!(docs.len(), 3);

        let config = KubeadmConfig::from_documents(&docs).unwrap();
        assert_eq!(config.cluster.kubernetes_version, "v1.19.8");
        assert_eq!(
            config.cluster.api_server.as_ref().unwrap().cert_sans,
            vec!["127.0.0.1"]
        );
        assert_eq!(config.kubelet.cgroup_driver, Some(CgroupDriver::Systemd));
        assert_eq!(config.kubelet.extra.get("maxPods"), Some(&Value::from(110u64)));
        assert_eq!(
            config.join.discovery.as_ref().unwrap().timeout.as_deref(),
            Some("5m0s")
        );
    }

    #[test]
    fn merge_keeps_existing_values_over_defaults() {
        let overrides = parse_documents(
            "kind: ClusterConfiguration\nkubernetesVersion: v1.23.0\nnetworking:\n  podSubnet: 10.244.0.0/16\n",
        )
        .unwrap();
        let mut config = KubeadmConfig::from_documents(&overrides).unwrap();
        config.merge_defaults(&parse_documents(DEFAULTS).unwrap()).unwrap();

        assert_eq!(config.cluster.kubernetes_version, "v1.23.0");
        let networking = config.cluster.networking.as_ref().unwrap();
        assert_eq!(networking.pod_subnet.as_deref(), Some("10.244.0.0/16"));
        assert_eq!(networking.service_subnet.as_deref(), Some("10.96.0.0/22"));
        assert!(config.cluster.api_server.as_ref().unwrap().extra.contains_key("extraArgs"));
    }

    #[test]
    fn join_master_documents_carry_stamped_fields() {
        let mut config = KubeadmConfig::from_documents(&parse_documents(DEFAULTS).unwrap()).unwrap();
        config.set_api_version(KUBEADM_V1BETA3);
        config.set_join_discovery("10.0.0.1:6443", "abcdef.0123456789abcdef", "sha256:deadbeef");
        config.set_join_control_plane("10.0.0.2".parse().unwrap(), "c0ffee");
        config.set_cgroup_driver(CgroupDriver::Cgroupfs);

        let rendered = config.join_master_documents().unwrap();
        let docs = parse_documents(&rendered).unwrap();
        assert_eq!(docs.len(), 2);
        assert!(rendered.contains("---\n"));

        let join: JoinConfiguration = serde_yaml::from_value(docs[0].clone()).unwrap();
        assert_eq!(join.api_version, KUBEADM_V1BETA3);
        let control_plane = join.control_plane.unwrap();
        assert_eq!(control_plane.local_api_endpoint.advertise_address, "10.0.0.2");
        assert_eq!(control_plane.certificate_key, "c0ffee");
        let bootstrap = join.discovery.unwrap().bootstrap_token.unwrap();
        assert_eq!(bootstrap.api_server_endpoint, "10.0.0.1:6443");
        assert_eq!(bootstrap.ca_cert_hashes, vec!["sha256:deadbeef"]);

        let kubelet: KubeletConfiguration = serde_yaml::from_value(docs[1].clone()).unwrap();
        assert_eq!(kubelet.cgroup_driver, Some(CgroupDriver::Cgroupfs));
    }

    #[test]
    fn join_node_documents_drop_control_plane() {
        let mut config = KubeadmConfig::default();
        config.set_api_version(KUBEADM_V1BETA2);
        config.set_join_control_plane("10.0.0.2".parse().unwrap(), "c0ffee");

        let rendered = config.join_node_documents().unwrap();
        assert!(!rendered.contains("controlPlane"));
        assert!(config.join.control_plane.is_some());
    }

    #[test]
    fn cgroup_driver_parses_probe_output() {
        assert_eq!(" systemd\n".parse::<CgroupDriver>().unwrap(), CgroupDriver::Systemd);
        assert_eq!("cgroupfs".parse::<CgroupDriver>().unwrap(), CgroupDriver::Cgroupfs);
        assert!("cgroupv3".parse::<CgroupDriver>().is_err());
    }
}
