//! Bounded pool for slow-path key searches
//!
//! Searches are CPU-bound, so each one runs on the blocking thread pool. A
//! semaphore caps how many run at once; a job that cannot get a permit before
//! its own deadline fails with [`ResolveError::PoolUnavailable`].
//!
//! The completion callback runs inside the tracked task, so
//! [`SlowResolverPool::drain`] waits for final responses as well as searches.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{oneshot, Notify, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::ResolveError;
use crate::resolver::{Identity, KeyResolver, Resolution};

/// Outcome of a slow-path job
pub type SlowResult = Result<Resolution, ResolveError>;

/// One unit of slow-path work
#[derive(Debug, Clone)]
pub struct SlowJob {
    pub payload: Bytes,
    pub identity: Identity,
    pub budget: Duration,
}

struct InFlight {
    count: AtomicUsize,
    idle: Notify,
}

/// Decrements the in-flight count when the job task ends, however it ends
struct InFlightGuard(Arc<InFlight>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.0.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

/// Worker pool for slow-path resolution
pub struct SlowResolverPool {
    resolver: Arc<KeyResolver>,
    permits: Arc<Semaphore>,
    max_concurrent: usize,
    in_flight: Arc<InFlight>,
}

impl SlowResolverPool {
    pub fn new(resolver: Arc<KeyResolver>, max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            resolver,
            permits: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            in_flight: Arc::new(InFlight {
                count: AtomicUsize::new(0),
                idle: Notify::new(),
            }),
        }
    }

    pub fn resolver(&self) -> &Arc<KeyResolver> {
        &self.resolver
    }

    /// Jobs submitted and not yet completed, queued ones included
    pub fn in_flight(&self) -> usize {
        self.in_flight.count.load(Ordering::Acquire)
    }

    /// Searches currently holding a worker slot
    pub fn active(&self) -> usize {
        self.max_concurrent - self.permits.available_permits()
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    pub fn is_closed(&self) -> bool {
        self.permits.is_closed()
    }

    /// Submit a job and run `finish` with its outcome on the same task
    pub fn submit_with<F, Fut>(&self, job: SlowJob, finish: F) -> JoinHandle<()>
    where
        F: FnOnce(SlowResult) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.in_flight.count.fetch_add(1, Ordering::AcqRel);
        let guard = InFlightGuard(self.in_flight.clone());
        let permits = self.permits.clone();
        let resolver = self.resolver.clone();

        tokio::spawn(async move {
            let _guard = guard;
            let result = run_job(resolver, permits, job).await;
            finish(result).await;
        })
    }

    /// Submit a job and receive its outcome on a channel
    pub fn submit(&self, job: SlowJob) -> oneshot::Receiver<SlowResult> {
        let (tx, rx) = oneshot::channel();
        self.submit_with(job, move |result| async move {
            let _ = tx.send(result);
        });
        rx
    }

    /// Stop accepting work. Queued jobs fail with `PoolUnavailable`; running
    /// searches finish within their own deadline.
    pub fn close(&self) {
        if !self.permits.is_closed() {
            info!(in_flight = self.in_flight(), "Closing slow resolver pool");
            self.permits.close();
        }
    }

    /// Wait up to `grace` for in-flight jobs. Returns true if the pool drained.
    pub async fn drain(&self, grace: Duration) -> bool {
        let deadline = Instant::now() + grace;
        loop {
            let idle = self.in_flight.idle.notified();
            tokio::pin!(idle);
            idle.as_mut().enable();

            let remaining = self.in_flight();
            if remaining == 0 {
                return true;
            }
            if tokio::time::timeout_at(deadline, idle).await.is_err() {
                warn!(remaining = self.in_flight(), "Slow resolver pool did not drain in time");
                return false;
            }
        }
    }

    /// Close and drain
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.close();
        self.drain(grace).await
    }
}

async fn run_job(resolver: Arc<KeyResolver>, permits: Arc<Semaphore>, job: SlowJob) -> SlowResult {
    let deadline = Instant::now() + job.budget;

    let permit = match tokio::time::timeout_at(deadline, permits.acquire_owned()).await {
        Ok(Ok(permit)) => permit,
        Ok(Err(_)) => {
            debug!(identity = %job.identity, "Slow resolver pool closed");
            return Err(ResolveError::PoolUnavailable);
        }
        Err(_) => {
            warn!(identity = %job.identity, "No search slot before deadline");
            return Err(ResolveError::PoolUnavailable);
        }
    };

    let identity = job.identity.clone();
    let std_deadline = deadline.into_std();
    let handle = tokio::task::spawn_blocking(move || {
        let _permit = permit;
        resolver.resolve_slow(&job.payload, &job.identity, std_deadline)
    });

    match handle.await {
        Ok(result) => result,
        Err(e) => {
            error!(identity = %identity, error = %e, "Slow resolver task failed");
            Err(ResolveError::PoolUnavailable)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::XorKey;
    use crate::protocol::login::build_login_payload;
    use crate::resolver::{AttemptTracker, BreakerSettings, KeyCache};
    use pretty_assertions::assert_eq;

    fn pool(max_concurrent: usize) -> SlowResolverPool {
        let resolver = KeyResolver::new(
            Arc::new(KeyCache::new()),
            Arc::new(AttemptTracker::new(BreakerSettings {
                global_limit: 0,
                ..BreakerSettings::default()
            })),
            vec![],
            2_000_000,
        );
        SlowResolverPool::new(Arc::new(resolver), max_concurrent)
    }

    fn job(payload: Vec<u8>, last: u8) -> SlowJob {
        SlowJob {
            payload: Bytes::from(payload),
            identity: Identity::Address(std::net::IpAddr::from([10, 9, 0, last])),
            budget: Duration::from_secs(10),
        }
    }

    #[tokio::test]
    async fn test_submit_resolves_and_drains() {
        let pool = pool(2);
        let key: XorKey = "3C4B5A69788796A5B4C3D2E1F00F1E2D".parse().unwrap();
        let payload = key.encrypt(&build_login_payload(
            "pooled",
            "E10ADC3949BA59ABBE56E057F20F883E",
            &[7; 150],
        ));

        let rx = pool.submit(job(payload, 1));
        let resolution = rx.await.unwrap().unwrap();
        assert_eq!(resolution.key, key);
        assert_eq!(resolution.credentials.username, "pooled");

        assert!(pool.drain(Duration::from_secs(1)).await);
        assert_eq!(pool.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_wait_for_a_slot_counts_against_the_budget() {
        let pool = pool(1);
        let held = pool.permits.clone().acquire_owned().await.unwrap();

        let mut queued = job(vec![0; 100], 3);
        queued.budget = Duration::from_millis(200);
        let started = Instant::now();
        let rx = pool.submit(queued);

        assert_eq!(rx.await.unwrap(), Err(ResolveError::PoolUnavailable));
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(200));
        assert!(elapsed < Duration::from_secs(2));

        drop(held);
        assert!(pool.drain(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_closed_pool_rejects_jobs() {
        let pool = pool(1);
        pool.close();
        assert!(pool.is_closed());

        let rx = pool.submit(job(vec![0; 100], 2));
        assert_eq!(rx.await.unwrap(), Err(ResolveError::PoolUnavailable));
        assert!(pool.shutdown(Duration::from_secs(1)).await);
    }
}
