mod common;

use std::sync::Arc;

use common::*;
use kubeforge::{Error, Stage};

#[tokio::test]
async fn nodes_join_through_the_vip() {
    let dir = tempfile::tempdir().unwrap();
    let exec = Arc::new(RecordingExecutor::new());
    let runtime = runtime(
        &cluster("v1.23.0", &["10.0.0.1", "10.0.0.2"], &[]),
        exec.clone(),
        dir.path(),
    );

    runtime
        .join_nodes(&[ip("10.0.0.9"), ip("10.0.0.10")])
        .await
        .unwrap();

    assert_eq!(exec.count_commands("kubeadm token create"), 1);
    assert_eq!(exec.count_commands("upload-certs"), 0);

    for host in ["10.0.0.9", "10.0.0.10"] {
        let commands = exec.commands(ip(host));
        let config = commands
            .iter()
            .find(|cmd| cmd.contains("etc/kubeadm.yml <<'KUBEFORGE_EOF'"))
            .unwrap();
        assert!(config.contains("apiServerEndpoint: 10.103.97.2:6443"));
        assert!(!config.contains("controlPlane"));

        let manifest = position(&commands, "kube-lvscare.yaml <<'KUBEFORGE_EOF'").unwrap();
        assert!(commands[manifest].contains("10.0.0.1:6443"));
        assert!(commands[manifest].contains("10.0.0.2:6443"));
        assert!(commands[manifest].contains("sea.hub:5000/fanux/lvscare:latest"));

        let join = position(&commands, "kubeadm join --config=").unwrap();
        assert!(manifest < join);
        assert!(!commands[join].contains("--ignore-preflight-errors"));
        assert!(position(&commands, "echo '10.103.97.2 apiserver.cluster.local'").is_some());
    }

    let state = runtime.state().await;
    assert_eq!(state.nodes.len(), 2);
    assert!(state.nodes.contains(&ip("10.0.0.10")));
}

#[tokio::test]
async fn node_join_without_masters_fails_fetching_credentials() {
    let dir = tempfile::tempdir().unwrap();
    let exec = Arc::new(RecordingExecutor::new());
    let runtime = runtime(&cluster("v1.23.0", &[], &[]), exec.clone(), dir.path());

    let err = runtime.join_nodes(&[ip("10.0.0.9")]).await.unwrap_err();
    assert_eq!(err.stage(), Some(Stage::FetchJoinCredentials));
    assert!(matches!(err.root(), Error::Validation(_)));
}

#[tokio::test]
async fn failing_node_fails_the_batch() {
    let dir = tempfile::tempdir().unwrap();
    let exec = Arc::new(RecordingExecutor::new().fail_on(ip("10.0.0.10"), "kubeadm join"));
    let runtime = runtime(&cluster("v1.23.0", &["10.0.0.1"], &[]), exec.clone(), dir.path());

    let err = runtime
        .join_nodes(&[ip("10.0.0.9"), ip("10.0.0.10")])
        .await
        .unwrap_err();

    assert_eq!(err.stage(), Some(Stage::ExecuteJoin));
    assert!(err.to_string().contains("10.0.0.10"));
    assert!(!runtime.state().await.nodes.contains(&ip("10.0.0.10")));
}
