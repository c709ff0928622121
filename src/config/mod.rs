//! Tool settings and persisted cluster configuration

pub mod clusterfile;
pub mod kubeadm;

pub use clusterfile::{ClusterFile, RegistryConfig};

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const CONFIG_DIR_NAME: &str = "kubeforge";
const CONFIG_FILE_NAME: &str = "config.toml";
const CLUSTERFILE_NAME: &str = "Clusterfile";

pub const DEFAULT_DATA_DIR: &str = "/var/lib/kubeforge/data";

/// Tool-wide settings, read from `~/.config/kubeforge/config.toml`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Root directory holding one subdirectory per cluster
    pub data_dir: PathBuf,
    /// kubeadm log verbosity (`-v N`)
    pub vlog: u8,
    /// Force container mode on or off instead of detecting it
    pub in_container: Option<bool>,
    pub ssh_wait_attempts: u32,
    pub ssh_wait_delay_secs: u64,
    /// Load balancer image, relative to the cluster registry
    pub lvscare_image: String,
    /// Certificate tool shipped in the rootfs and run on each master
    pub cert_tool: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            vlog: 0,
            in_container: None,
            ssh_wait_attempts: 6,
            ssh_wait_delay_secs: 5,
            lvscare_image: "fanux/lvscare:latest".to_string(),
            cert_tool: "seautil".to_string(),
        }
    }
}

impl Settings {
    /// Load settings from the default location, then apply environment overrides
    pub fn load() -> Result<Self> {
        let mut settings = Self::load_from(&get_config_file_path()?)?;
        settings.apply_env_overrides(|key| std::env::var(key).ok())?;
        Ok(settings)
    }

    /// Load settings from a file; a missing file yields defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|e| {
            Error::config(format!("failed to read {}: {}", path.display(), e))
        })?;
        toml::from_str(&content)
            .map_err(|e| Error::config(format!("failed to parse {}: {}", path.display(), e)))
    }

    /// Apply `KUBEFORGE_*` overrides using the given variable lookup
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("KUBEFORGE_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(vlog) = lookup("KUBEFORGE_VLOG") {
            self.vlog = vlog
                .trim()
                .parse()
                .map_err(|_| Error::config(format!("KUBEFORGE_VLOG must be 0-255, got '{}'", vlog)))?;
        }
        if let Some(flag) = lookup("KUBEFORGE_IN_CONTAINER") {
            self.in_container = Some(matches!(
                flag.trim().to_lowercase().as_str(),
                "1" | "true" | "yes"
            ));
        }
        Ok(())
    }

    /// Directory holding kubeconfigs, pki, certs and rootfs for a cluster
    pub fn cluster_dir(&self, cluster: &str) -> PathBuf {
        self.data_dir.join(cluster)
    }

    pub fn clusterfile_path(&self, cluster: &str) -> PathBuf {
        self.cluster_dir(cluster).join(CLUSTERFILE_NAME)
    }
}

pub fn get_config_dir() -> Result<PathBuf> {
    Ok(get_home_dir()?.join(".config").join(CONFIG_DIR_NAME))
}

pub fn get_config_file_path() -> Result<PathBuf> {
    Ok(get_config_dir()?.join(CONFIG_FILE_NAME))
}

pub fn get_home_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").map(PathBuf::from).unwrap_or_else(|_| {
        // Fallback to using whoami crate
        let username = whoami::username();
        if username == "root" {
            PathBuf::from("/root")
        } else {
            PathBuf::from(format!("/home/{}", username))
        }
    });
    Ok(home)
}
