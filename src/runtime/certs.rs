//! Per-host certificate issuance
//!
//! Key material is produced on the host itself by a certificate tool from
//! the rootfs; the orchestrator only decides which host gets which names.

use std::net::IpAddr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertRequest {
    pub alt_names: Vec<String>,
    pub node_ip: IpAddr,
    pub node_name: String,
    pub service_cidr: String,
    pub dns_domain: String,
}

/// Renders the remote command that issues a host's serving certificates
pub trait CertAuthority: Send + Sync {
    fn issue_command(&self, request: &CertRequest) -> String;
}

/// Certificate tool shipped in the rootfs (`seautil` by default)
#[derive(Debug, Clone)]
pub struct RootfsCertTool {
    binary: String,
}

impl RootfsCertTool {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl CertAuthority for RootfsCertTool {
    fn issue_command(&self, request: &CertRequest) -> String {
        let alt_names = request.alt_names.join(",");
        let mut cmd = format!("{} cert", self.binary);
        if !alt_names.is_empty() {
            cmd.push_str(&format!(" --alt-names {}", alt_names));
        }
        cmd.push_str(&format!(
            " --node-ip {} --node-name {} --service-cidr {} --dns-domain {}",
            request.node_ip, request.node_name, request.service_cidr, request.dns_domain
        ));
        cmd
    }
}
