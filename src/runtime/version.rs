//! Kubernetes version policy
//!
//! Maps a cluster version to the kubeadm command family, the kubeadm API
//! group and any per-version quirks that need patching after the fact.

use semver::Version;
use tracing::warn;

use crate::config::kubeadm::{KUBEADM_V1BETA1, KUBEADM_V1BETA2, KUBEADM_V1BETA3};

/// Versions at or above this use `--upload-certs` and config-file joins
pub const COMMAND_THRESHOLD: Version = Version::new(1, 15, 0);
const V1BETA3_FROM: Version = Version::new(1, 23, 0);

/// Releases where controller-manager and scheduler kubeconfigs keep the
/// load balancer placeholder instead of the local API endpoint
const CONTROL_PLANE_ENDPOINT_QUIRK: [Version; 2] = [Version::new(1, 19, 1), Version::new(1, 19, 2)];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandFamily {
    /// `kubeadm join <ep> --token ... --discovery-token-ca-cert-hash ...`
    ExplicitFlags,
    /// `kubeadm join --config=<rootfs>/etc/kubeadm.yml`
    ConfigFile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Quirk {
    ControlPlaneKubeconfigEndpoint,
}

/// Version-dependent behaviour, resolved once per runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionPolicy {
    raw: String,
    version: Option<Version>,
    family: CommandFamily,
    quirks: Vec<Quirk>,
}

impl VersionPolicy {
    /// Resolve the policy for `raw` (`v1.23.0` or `1.23.0`).
    ///
    /// Unparseable versions fall back to the oldest supported behaviour:
    /// explicit-flag commands and the `v1beta1` API group.
    pub fn resolve(raw: &str) -> Self {
        let version = parse_kube_version(raw);
        if version.is_none() {
            warn!(
                version = %raw,
                "Could not parse Kubernetes version, using pre-1.15 commands"
            );
        }

        let family = match &version {
            Some(v) if *v >= COMMAND_THRESHOLD => CommandFamily::ConfigFile,
            _ => CommandFamily::ExplicitFlags,
        };

        let mut quirks = Vec::new();
        if let Some(v) = &version {
            if CONTROL_PLANE_ENDPOINT_QUIRK.contains(v) {
                quirks.push(Quirk::ControlPlaneKubeconfigEndpoint);
            }
        }

        Self {
            raw: raw.to_string(),
            version,
            family,
            quirks,
        }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn version(&self) -> Option<&Version> {
        self.version.as_ref()
    }

    pub fn family(&self) -> CommandFamily {
        self.family
    }

    pub fn has_quirk(&self, quirk: Quirk) -> bool {
        self.quirks.contains(&quirk)
    }

    /// kubeadm configuration API group for this version
    pub fn kubeadm_api_version(&self) -> &'static str {
        match &self.version {
            Some(v) if *v >= V1BETA3_FROM => KUBEADM_V1BETA3,
            Some(v) if *v >= COMMAND_THRESHOLD => KUBEADM_V1BETA2,
            _ => KUBEADM_V1BETA1,
        }
    }
}

/// Parse a Kubernetes version with or without the leading `v`.
///
/// `1.14` is read as `1.14.0`.
pub fn parse_kube_version(raw: &str) -> Option<Version> {
    let trimmed = raw.trim();
    let trimmed = trimmed.strip_prefix('v').unwrap_or(trimmed);
    Version::parse(trimmed)
        .or_else(|_| Version::parse(&format!("{}.0", trimmed)))
        .ok()
}
