//! Readiness of a service is the reachability of the dependencies it cannot serve without.
//!
//! A check is a single attempt: borrow one connection, run a no-op statement, give the
//! connection back. Whatever goes wrong on the way is reported as [`Readiness::NotReady`]
//! with the cause attached, never as an error of the check itself.

pub mod metrics;
pub mod pool;

pub use pool::{DatastorePool, PoolConfig, PoolError, SafeUrl};

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum ProbeFailure {
    #[error("failed to acquire a pooled connection")]
    Acquire(#[source] sqlx::Error),
    #[error("probe statement failed")]
    Query(#[source] sqlx::Error),
    #[error("probe did not finish within {0:?}")]
    TimedOut(Duration),
}

impl ProbeFailure {
    /// Label used for the `outcome` dimension of the readiness metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Acquire(_) => "acquire",
            Self::Query(_) => "query",
            Self::TimedOut(_) => "timeout",
        }
    }
}

#[derive(Debug)]
pub enum Readiness {
    Ready,
    NotReady(ProbeFailure),
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }

    pub fn failure(&self) -> Option<&ProbeFailure> {
        match self {
            Self::Ready => None,
            Self::NotReady(failure) => Some(failure),
        }
    }
}

/// A dependency that can be asked whether it is reachable right now.
#[async_trait]
pub trait Probe: Send + Sync {
    fn name(&self) -> &'static str;

    async fn ping(&self) -> Result<(), ProbeFailure>;
}

pub struct ReadinessProbe {
    dependency: Arc<dyn Probe>,
    timeout: Duration,
}

impl ReadinessProbe {
    pub fn new(dependency: Arc<dyn Probe>, timeout: Duration) -> Self {
        Self {
            dependency,
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Runs one check. Never retries; `timeout` bounds acquisition and query together.
    pub async fn check(&self) -> Readiness {
        let name = self.dependency.name();
        let readiness = match tokio::time::timeout(self.timeout, self.dependency.ping()).await {
            Ok(Ok(())) => Readiness::Ready,
            Ok(Err(failure)) => Readiness::NotReady(failure),
            Err(_) => Readiness::NotReady(ProbeFailure::TimedOut(self.timeout)),
        };

        metrics::record(&readiness);
        match &readiness {
            Readiness::Ready => debug!(dependency = name, "readiness check passed"),
            Readiness::NotReady(failure) => warn!(
                dependency = name,
                outcome = failure.kind(),
                error = failure as &(dyn std::error::Error + 'static),
                "readiness check failed"
            ),
        }
        readiness
    }
}

#[cfg(test)]
mod tests {
    use super::{Probe, ProbeFailure, Readiness, ReadinessProbe};
    use anyhow::{Result, bail, ensure};
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Up;

    #[async_trait]
    impl Probe for Up {
        fn name(&self) -> &'static str {
            "up"
        }

        async fn ping(&self) -> Result<(), ProbeFailure> {
            Ok(())
        }
    }

    struct Refusing;

    #[async_trait]
    impl Probe for Refusing {
        fn name(&self) -> &'static str {
            "refusing"
        }

        async fn ping(&self) -> Result<(), ProbeFailure> {
            let refused = std::io::Error::from(std::io::ErrorKind::ConnectionRefused);
            Err(ProbeFailure::Acquire(sqlx::Error::Io(refused)))
        }
    }

    /// Counts pings and never answers within a reasonable time.
    #[derive(Default)]
    struct Hanging {
        pings: AtomicUsize,
    }

    #[async_trait]
    impl Probe for Hanging {
        fn name(&self) -> &'static str {
            "hanging"
        }

        async fn ping(&self) -> Result<(), ProbeFailure> {
            self.pings.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn reachable_dependency_is_ready() {
        let probe = ReadinessProbe::new(Arc::new(Up), Duration::from_secs(1));
        let readiness = probe.check().await;
        assert!(readiness.is_ready());
        assert!(readiness.failure().is_none());
    }

    #[tokio::test]
    async fn refused_dependency_is_not_ready() -> Result<()> {
        let probe = ReadinessProbe::new(Arc::new(Refusing), Duration::from_secs(1));
        match probe.check().await {
            Readiness::NotReady(ProbeFailure::Acquire(_)) => Ok(()),
            other => bail!("unexpected readiness: {other:?}"),
        }
    }

    #[tokio::test]
    async fn slow_dependency_times_out_after_a_single_attempt() -> Result<()> {
        let hanging = Arc::new(Hanging::default());
        let probe = ReadinessProbe::new(hanging.clone(), Duration::from_millis(50));

        let readiness = probe.check().await;
        match readiness.failure() {
            Some(ProbeFailure::TimedOut(limit)) => ensure!(*limit == Duration::from_millis(50)),
            other => bail!("unexpected failure: {other:?}"),
        }
        ensure!(hanging.pings.load(Ordering::SeqCst) == 1, "probe retried");
        Ok(())
    }

    #[test]
    fn failure_kinds_are_distinct() {
        let kinds = [
            ProbeFailure::Acquire(sqlx::Error::PoolTimedOut).kind(),
            ProbeFailure::Query(sqlx::Error::RowNotFound).kind(),
            ProbeFailure::TimedOut(Duration::from_secs(1)).kind(),
        ];
        assert_eq!(kinds, ["acquire", "query", "timeout"]);
    }

    #[test]
    fn failure_message_leaves_the_cause_to_its_source() {
        let failure = ProbeFailure::Query(sqlx::Error::RowNotFound);
        assert_eq!(failure.to_string(), "probe statement failed");
        let source = std::error::Error::source(&failure).map(ToString::to_string);
        assert_eq!(source.as_deref(), Some(sqlx::Error::RowNotFound.to_string().as_str()));
    }
}
