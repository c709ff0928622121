//! Shell snippets run on cluster hosts

use std::net::IpAddr;

pub const REGISTRY_ALIAS: &str = "sea.hub";
pub const DOCKER_CERT_DIR: &str = "/etc/docker/certs.d";
pub const KUBERNETES_DIR: &str = "/etc/kubernetes";
pub const KUBERNETES_PKI_DIR: &str = "/etc/kubernetes/pki";
pub const STATIC_POD_DIR: &str = "/etc/kubernetes/manifests";
pub const CONTROLLER_MANAGER_CONF_PATH: &str = "/etc/kubernetes/controller-manager.conf";
pub const SCHEDULER_CONF_PATH: &str = "/etc/kubernetes/scheduler.conf";

pub const ADMIN_CONF: &str = "admin.conf";
pub const CONTROLLER_MANAGER_CONF: &str = "controller-manager.conf";
pub const SCHEDULER_CONF: &str = "scheduler.conf";

pub const COPY_KUBECONFIG: &str =
    "rm -rf .kube/config && mkdir -p /root/.kube && cp /etc/kubernetes/admin.conf /root/.kube/config";
pub const NON_ROOT_COPY_KUBECONFIG: &str = "rm -rf ${HOME}/.kube/config && mkdir -p ${HOME}/.kube && cp /etc/kubernetes/admin.conf ${HOME}/.kube/config && chown $(id -u):$(id -g) ${HOME}/.kube/config";
pub const REMOVE_KUBECONFIG: &str = "rm -rf /usr/bin/kube* && rm -rf ~/.kube/";

pub const HOSTNAME: &str = "hostname";
pub const GET_NODE_NAMES: &str = "kubectl get nodes --no-headers | awk '{print $1}'";
pub const GET_NODES_WIDE: &str = "kubectl get nodes -o wide --no-headers";

/// Print the container runtime's cgroup driver
pub const CGROUP_DRIVER_PROBE: &str = "docker info -f '{{.CgroupDriver}}' 2>/dev/null || \
(grep -q 'SystemdCgroup = true' /etc/containerd/config.toml 2>/dev/null && echo systemd) || echo cgroupfs";

/// `/etc/hosts` line mapping `domain` to `ip`
pub fn hosts_entry(ip: IpAddr, domain: &str) -> String {
    format!("{} {}", ip, domain)
}

pub fn add_hosts_entry(ip: IpAddr, domain: &str) -> String {
    let entry = hosts_entry(ip, domain);
    format!("cat /etc/hosts |grep '{0}' || echo '{0}' >> /etc/hosts", entry)
}

/// Repoint an existing `domain` entry from `from` to `to`
pub fn update_hosts_entry(from: IpAddr, to: IpAddr, domain: &str) -> String {
    format!(
        "sed \"s/{}/{}/g\" < /etc/hosts > hosts && cp -f hosts /etc/hosts",
        hosts_entry(from, domain),
        hosts_entry(to, domain)
    )
}

pub fn remove_hosts_entry(domain: &str) -> String {
    format!("sed -i \"/{}/d\" /etc/hosts", domain)
}

pub fn remove_registry_certs(domain: &str) -> String {
    format!("rm -rf {}/{}*", DOCKER_CERT_DIR, domain)
}

/// Remote path of a registry CA certificate for `domain:port`
pub fn registry_cert_path(domain: &str, port: u16, cert_name: &str) -> String {
    format!("{}/{}:{}/{}.crt", DOCKER_CERT_DIR, domain, port, cert_name)
}

/// Reset kubeadm and remove everything a join leaves behind
pub fn clean_master_or_node(vlog: u8) -> String {
    [
        format!("if which kubeadm;then kubeadm reset -f -v {};fi", vlog),
        "modprobe -r ipip ; lsmod".to_string(),
        "rm -rf /etc/kubernetes/".to_string(),
        "rm -rf /etc/systemd/system/kubelet.service.d && rm -rf /etc/systemd/system/kubelet.service"
            .to_string(),
        "rm -rf /usr/bin/kubeadm && rm -rf /usr/bin/kubelet-pre-start.sh".to_string(),
        "rm -rf /usr/bin/kubelet && rm -rf /usr/bin/crictl".to_string(),
        "rm -rf /etc/cni && rm -rf /opt/cni".to_string(),
        "rm -rf /var/lib/etcd && rm -rf /var/etcd".to_string(),
    ]
    .join(" && ")
}

pub fn kube_delete_node(name: &str) -> String {
    format!("kubectl delete node {}", name)
}

/// Replace the load balancer placeholder in the scheduler and
/// controller-manager kubeconfigs with `master`
pub fn replace_kubeconfig_endpoint(placeholder: &str, master: IpAddr) -> String {
    format!(
        "grep -qF \"{placeholder}\" {sched} && sed -i 's/{placeholder}/{master}/' {cm} && sed -i 's/{placeholder}/{master}/' {sched}",
        placeholder = placeholder,
        master = master,
        sched = SCHEDULER_CONF_PATH,
        cm = CONTROLLER_MANAGER_CONF_PATH,
    )
}

/// Log in to the registry and hand the credentials to the kubelet
pub fn registry_login(repo: &str, username: &str, password: &str) -> String {
    format!(
        "docker login {} -u {} -p {} && mkdir -p /var/lib/kubelet && cp /root/.docker/config.json /var/lib/kubelet/config.json",
        repo,
        crate::utils::ssh::shell_escape(username),
        crate::utils::ssh::shell_escape(password)
    )
}

const HEREDOC_MARKER: &str = "KUBEFORGE_EOF";

/// Write `content` to `path` verbatim, creating the parent directory
pub fn write_file_command(path: &str, content: &str) -> String {
    let parent = path.rsplit_once('/').map(|(dir, _)| dir).filter(|d| !d.is_empty());
    let mkdir = parent.map(|dir| format!("mkdir -p {} && ", dir)).unwrap_or_default();
    let body = if content.ends_with('\n') {
        content.to_string()
    } else {
        format!("{}\n", content)
    };
    format!(
        "{}cat > {} <<'{marker}'\n{}{marker}",
        mkdir,
        path,
        body,
        marker = HEREDOC_MARKER
    )
}

/// Pick the node name for a host.
///
/// Matches the host's own `hostname` against cluster node names,
/// ignoring case, and returns the name as the cluster spells it.
pub fn match_node_name(node_names: &str, hostname: &str) -> Option<String> {
    let wanted = hostname.trim().to_lowercase();
    if wanted.is_empty() {
        return None;
    }
    node_names
        .split(|c: char| c == ',' || c.is_whitespace())
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .find(|name| name.to_lowercase() == wanted)
        .map(str::to_string)
}

/// Find the node whose INTERNAL-IP column equals `ip` in
/// `kubectl get nodes -o wide --no-headers` output
pub fn match_node_by_ip(wide_output: &str, ip: IpAddr) -> Option<String> {
    let ip = ip.to_string();
    wide_output.lines().find_map(|line| {
        let columns: Vec<&str> = line.split_whitespace().collect();
        // NAME STATUS ROLES AGE VERSION INTERNAL-IP ...
        match columns.get(5) {
            Some(internal) if *internal == ip => columns.first().map(|name| name.to_string()),
            _ => None,
        }
    })
}
