//! Per-run dispatch budget: bounded in-flight requests and per-lane politeness delay.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::{sleep_until, Instant};

/// Rate state for one crawl run. Dropped with the run; never persisted.
pub struct RateBudget {
    permits: Arc<Semaphore>,
    delay: Duration,
    lanes: Vec<Mutex<Option<Instant>>>,
}

/// Proof that a lane may issue one request. Releases its in-flight slot on drop.
#[derive(Debug)]
pub struct DispatchPermit {
    lane: usize,
    _permit: OwnedSemaphorePermit,
}

impl DispatchPermit {
    /// Lane the permit was granted to.
    pub fn lane(&self) -> usize {
        self.lane
    }
}

impl RateBudget {
    /// Creates a budget with `parallelism` lanes (at least one) separated by `delay`.
    pub fn new(parallelism: usize, delay: Duration) -> Self {
        let parallelism = parallelism.max(1);
        Self {
            permits: Arc::new(Semaphore::new(parallelism)),
            delay,
            lanes: (0..parallelism).map(|_| Mutex::new(None)).collect(),
        }
    }

    /// Number of lanes (the in-flight cap).
    pub fn parallelism(&self) -> usize {
        self.lanes.len()
    }

    /// Requests currently holding a permit.
    pub fn in_flight(&self) -> usize {
        self.parallelism() - self.permits.available_permits()
    }

    /// Waits until `lane` may dispatch again and an in-flight slot is free.
    ///
    /// Lane indices wrap around the configured parallelism.
    pub async fn acquire(&self, lane: usize) -> DispatchPermit {
        let lane = lane % self.lanes.len();
        let mut last = self.lanes[lane].lock().await;
        if let Some(previous) = *last {
            sleep_until(previous + self.delay).await;
        }
        let permit = loop {
            match Arc::clone(&self.permits).acquire_owned().await {
                Ok(permit) => break permit,
                // Never closed.
                Err(_) => tokio::task::yield_now().await,
            }
        };
        *last = Some(Instant::now());
        DispatchPermit {
            lane,
            _permit: permit,
        }
    }
}
