//! Static pod that forwards the VIP to the API servers of every master

use std::net::IpAddr;

use serde::Serialize;

use crate::config::kubeadm::api_server_endpoint;
use crate::error::Result;
use crate::runtime::remote::STATIC_POD_DIR;

pub const POD_NAME: &str = "kube-lvscare";
pub const MANIFEST_FILE: &str = "kube-lvscare.yaml";

pub fn manifest_path() -> String {
    format!("{}/{}", STATIC_POD_DIR, MANIFEST_FILE)
}

/// Remove any lvscare manifest, including ones written under older names
pub fn remove_manifest_command() -> String {
    format!("rm -rf {}/kube-*lvscare*", STATIC_POD_DIR)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Pod {
    api_version: &'static str,
    kind: &'static str,
    metadata: Metadata,
    spec: PodSpec,
}

#[derive(Debug, Serialize)]
struct Metadata {
    name: &'static str,
    namespace: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PodSpec {
    host_network: bool,
    priority_class_name: &'static str,
    containers: Vec<Container>,
    volumes: Vec<Volume>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Container {
    name: &'static str,
    image: String,
    image_pull_policy: &'static str,
    command: Vec<&'static str>,
    args: Vec<String>,
    security_context: SecurityContext,
    volume_mounts: Vec<VolumeMount>,
}

#[derive(Debug, Serialize)]
struct SecurityContext {
    privileged: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VolumeMount {
    name: &'static str,
    mount_path: &'static str,
    read_only: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Volume {
    name: &'static str,
    host_path: HostPath,
}

#[derive(Debug, Serialize)]
struct HostPath {
    path: &'static str,
}

/// `care` arguments: the virtual server plus one real server per master
pub fn lvscare_args(vip: IpAddr, masters: &[IpAddr]) -> Vec<String> {
    let mut args = vec![
        "care".to_string(),
        "--vs".to_string(),
        api_server_endpoint(vip).to_string(),
        "--health-path".to_string(),
        "/healthz".to_string(),
        "--health-schem".to_string(),
        "https".to_string(),
    ];
    for master in masters {
        args.push("--rs".to_string());
        args.push(api_server_endpoint(*master).to_string());
    }
    args
}

/// Render the static pod manifest balancing `vip` over `masters`
pub fn static_pod_manifest(vip: IpAddr, masters: &[IpAddr], image: &str) -> Result<String> {
    let pod = Pod {
        api_version: "v1",
        kind: "Pod",
        metadata: Metadata {
            name: POD_NAME,
            namespace: "kube-system",
        },
        spec: PodSpec {
            host_network: true,
            priority_class_name: "system-node-critical",
            containers: vec![Container {
                name: POD_NAME,
                image: image.to_string(),
                image_pull_policy: "IfNotPresent",
                command: vec!["/usr/bin/lvscare"],
                args: lvscare_args(vip, masters),
                security_context: SecurityContext { privileged: true },
                volume_mounts: vec![VolumeMount {
                    name: "lib-modules",
                    mount_path: "/lib/modules",
                    read_only: true,
                }],
            }],
            volumes: vec![Volume {
                name: "lib-modules",
                host_path: HostPath {
                    path: "/lib/modules",
                },
            }],
        },
    };
    Ok(serde_yaml::to_string(&pod)?)
}
