//! Concurrent per-host dispatch with an explicit failure policy

use std::future::Future;
use std::net::IpAddr;

use futures::stream::{self, StreamExt};
use tracing::{debug, warn};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Return the first error; hosts not yet started are never dispatched
    FailFast,
    /// Run every host to completion and log failures
    BestEffort,
}

/// A named batch of per-host operations.
///
/// The batch completes before `run_on_each` returns, so stages built on it
/// never overlap. Dropping in-flight futures on a fail-fast error stops
/// waiting for them; commands already running remotely may still finish.
#[derive(Debug, Clone)]
pub struct TaskGroup {
    name: String,
    policy: FailurePolicy,
    limit: Option<usize>,
}

impl TaskGroup {
    pub fn fail_fast(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            policy: FailurePolicy::FailFast,
            limit: None,
        }
    }

    pub fn best_effort(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            policy: FailurePolicy::BestEffort,
            limit: None,
        }
    }

    /// Cap concurrent hosts; unbounded by default
    #[cfg(test)]
    pub(crate) fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit.max(1));
        self
    }

    /// Run `operation` once per host.
    ///
    /// Each invocation receives its own copy of the host address.
    /// Best-effort batches always return `Ok`; the number of failed hosts
    /// is logged.
    pub async fn run_on_each<F, Fut>(&self, hosts: &[IpAddr], operation: F) -> Result<()>
    where
        F: Fn(IpAddr) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        if hosts.is_empty() {
            return Ok(());
        }

        let limit = self.limit.unwrap_or(hosts.len());
        let operation = &operation;
        let mut results = stream::iter(hosts.iter().copied())
            .map(|host| async move { (host, operation(host).await) })
            .buffer_unordered(limit);

        let mut failed = 0usize;
        while let Some((host, result)) = results.next().await {
            match (result, self.policy) {
                (Ok(()), _) => debug!(batch = %self.name, host = %host, "Host finished"),
                (Err(e), FailurePolicy::FailFast) => {
                    debug!(batch = %self.name, host = %host, "Aborting batch on first failure");
                    return Err(e);
                }
                (Err(e), FailurePolicy::BestEffort) => {
                    failed += 1;
                    warn!(batch = %self.name, host = %host, error = %e, "Host failed, continuing");
                }
            }
        }

        if failed > 0 {
            warn!(
                batch = %self.name,
                failed = failed,
                total = hosts.len(),
                "Batch finished with failures"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn hosts(n: u8) -> Vec<IpAddr> {
        (1..=n).map(|i| IpAddr::from([10, 0, 0, i])).collect()
    }

    #[tokio::test]
    async fn fail_fast_stops_dispatching_after_first_error() {
        let started = AtomicUsize::new(0);
        let hosts = hosts(5);
        let bad = hosts[1];

        let err = TaskGroup::fail_fast("copy")
            .with_limit(1)
            .run_on_each(&hosts, |host| {
                let started = &started;
                async move {
                    started.fetch_add(1, Ordering::SeqCst);
                    if host == bad {
                        return Err(Error::distribution(host, "disk full"));
                    }
                    Ok(())
                }
            })
            .await
            .unwrap_err();

        assert!(err.to_string().contains("10.0.0.2"));
        assert_eq!(started.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn best_effort_runs_every_host() {
        let finished = AtomicUsize::new(0);
        let hosts = hosts(5);
        let bad = hosts[2];

        TaskGroup::best_effort("cleanup")
            .run_on_each(&hosts, |host| {
                let finished = &finished;
                async move {
                    tokio::task::yield_now().await;
                    finished.fetch_add(1, Ordering::SeqCst);
                    if host == bad {
                        return Err(Error::command(host, "kubeadm reset", "exit status 1"));
                    }
                    Ok(())
                }
            })
            .await
            .unwrap();

        assert_eq!(finished.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn each_worker_sees_its_own_host() {
        let seen = std::sync::Mutex::new(Vec::new());
        let hosts = hosts(4);

        TaskGroup::fail_fast("render")
            .run_on_each(&hosts, |host| {
                let seen = &seen;
                async move {
                    seen.lock().unwrap().push(host);
                    Ok(())
                }
            })
            .await
            .unwrap();

        let mut seen = seen.into_inner().unwrap();
        seen.sort();
        assert_eq!(seen, hosts);
    }

    #[tokio::test]
    async fn empty_batch_is_a_no_op() {
        TaskGroup::fail_fast("noop")
            .run_on_each(&[], |_| async { Err(Error::validation("never called")) })
            .await
            .unwrap();
    }
}
