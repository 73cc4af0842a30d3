//! Bounded pool of rendering capacity.
//!
//! Each slot represents one isolated browser session worth of work. The pool
//! is the single concurrency gate shared by synchronous requests and async
//! jobs: acquisitions queue FIFO behind a counting semaphore, so bursts shed
//! load by latency instead of by error. Slots release on drop, which covers
//! every exit path of a render attempt.

use std::{
    num::NonZeroUsize,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use metrics::gauge;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::application::backend::{BackendError, RenderBackend, RenderedImage};
use crate::domain::RenderSpec;

pub const SLOTS_IN_USE_GAUGE: &str = "pagelens_pool_slots_in_use";

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("no render slot became available within {0:?}")]
    AcquireTimeout(Duration),
    #[error("render pool is shut down")]
    Closed,
}

/// Fixed-capacity pool over a shared render backend.
pub struct RenderPool {
    backend: Arc<dyn RenderBackend>,
    semaphore: Arc<Semaphore>,
    capacity: usize,
    acquire_timeout: Duration,
    checked_out: Arc<AtomicUsize>,
}

impl RenderPool {
    pub fn new(
        backend: Arc<dyn RenderBackend>,
        capacity: NonZeroUsize,
        acquire_timeout: Duration,
    ) -> Self {
        Self {
            backend,
            semaphore: Arc::new(Semaphore::new(capacity.get())),
            capacity: capacity.get(),
            acquire_timeout,
            checked_out: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Wait for a free slot, up to the configured acquisition timeout.
    pub async fn acquire(&self) -> Result<RenderSlot, PoolError> {
        let permit = tokio::time::timeout(
            self.acquire_timeout,
            self.semaphore.clone().acquire_owned(),
        )
        .await
        .map_err(|_| PoolError::AcquireTimeout(self.acquire_timeout))?
        .map_err(|_| PoolError::Closed)?;

        let in_use = self.checked_out.fetch_add(1, Ordering::SeqCst) + 1;
        gauge!(SLOTS_IN_USE_GAUGE).set(in_use as f64);
        debug!(
            target = "pagelens::pool",
            in_use,
            capacity = self.capacity,
            "render slot acquired"
        );

        Ok(RenderSlot {
            backend: self.backend.clone(),
            checked_out: self.checked_out.clone(),
            _permit: permit,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of slots currently checked out.
    pub fn checked_out(&self) -> usize {
        self.checked_out.load(Ordering::SeqCst)
    }
}

/// One unit of rendering capacity, held for the duration of a render attempt.
/// Dropping the slot returns capacity to the pool unconditionally.
pub struct RenderSlot {
    backend: Arc<dyn RenderBackend>,
    checked_out: Arc<AtomicUsize>,
    _permit: OwnedSemaphorePermit,
}

impl std::fmt::Debug for RenderSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderSlot").finish_non_exhaustive()
    }
}

impl RenderSlot {
    pub async fn render(&self, spec: &RenderSpec) -> Result<RenderedImage, BackendError> {
        self.backend.render(spec).await
    }
}

impl Drop for RenderSlot {
    fn drop(&mut self) {
        let in_use = self.checked_out.fetch_sub(1, Ordering::SeqCst) - 1;
        gauge!(SLOTS_IN_USE_GAUGE).set(in_use as f64);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use bytes::Bytes;

    use super::*;
    use crate::domain::{ImageFormat, RenderSource, RenderSpec, Viewport};

    fn spec() -> RenderSpec {
        RenderSpec::new(
            RenderSource::Html("<p>x</p>".into()),
            Viewport {
                width: 100,
                height: 100,
            },
            ImageFormat::Png,
            Duration::ZERO,
        )
    }

    /// Backend that records the highest number of concurrently running
    /// renders it has observed.
    struct ConcurrencyMeter {
        running: AtomicUsize,
        high_water: AtomicUsize,
        hold: Duration,
    }

    impl ConcurrencyMeter {
        fn new(hold: Duration) -> Self {
            Self {
                running: AtomicUsize::new(0),
                high_water: AtomicUsize::new(0),
                hold,
            }
        }
    }

    #[async_trait]
    impl RenderBackend for ConcurrencyMeter {
        async fn render(&self, spec: &RenderSpec) -> Result<RenderedImage, BackendError> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.high_water.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.hold).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            Ok(RenderedImage {
                bytes: Bytes::from_static(b"img"),
                format: spec.format,
                width: spec.viewport.width,
                height: spec.viewport.height,
            })
        }
    }

    struct AlwaysFails;

    #[async_trait]
    impl RenderBackend for AlwaysFails {
        async fn render(&self, _spec: &RenderSpec) -> Result<RenderedImage, BackendError> {
            Err(BackendError::Render("simulated engine failure".into()))
        }
    }

    #[tokio::test]
    async fn concurrency_never_exceeds_pool_size() {
        let meter = Arc::new(ConcurrencyMeter::new(Duration::from_millis(10)));
        let pool = Arc::new(RenderPool::new(
            meter.clone(),
            NonZeroUsize::new(3).unwrap(),
            Duration::from_secs(10),
        ));

        let mut handles = Vec::new();
        for _ in 0..15 {
            let pool = pool.clone();
            handles.push(tokio::spawn(async move {
                let slot = pool.acquire().await.expect("acquire slot");
                slot.render(&spec()).await.expect("render");
            }));
        }
        for handle in handles {
            handle.await.expect("task completes");
        }

        assert!(meter.high_water.load(Ordering::SeqCst) <= 3);
        assert_eq!(pool.checked_out(), 0);
    }

    #[tokio::test]
    async fn slots_are_released_after_repeated_failures() {
        let pool = RenderPool::new(
            Arc::new(AlwaysFails),
            NonZeroUsize::new(1).unwrap(),
            Duration::from_secs(1),
        );

        for _ in 0..1000 {
            let slot = pool.acquire().await.expect("acquire slot");
            let result = slot.render(&spec()).await;
            assert!(result.is_err());
        }

        assert_eq!(pool.checked_out(), 0);
        // A fresh acquisition still succeeds after every failure path.
        let _slot = pool.acquire().await.expect("pool not leaked");
        assert_eq!(pool.checked_out(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn acquisition_times_out_when_saturated() {
        let meter = Arc::new(ConcurrencyMeter::new(Duration::from_secs(60)));
        let pool = Arc::new(RenderPool::new(
            meter,
            NonZeroUsize::new(1).unwrap(),
            Duration::from_millis(200),
        ));

        let held = pool.acquire().await.expect("first slot");
        let err = pool.acquire().await.expect_err("second acquire times out");
        assert!(matches!(err, PoolError::AcquireTimeout(_)));

        drop(held);
        let _slot = pool.acquire().await.expect("slot available after release");
    }

    #[tokio::test]
    async fn slot_released_when_dropped_without_render() {
        let pool = RenderPool::new(
            Arc::new(AlwaysFails),
            NonZeroUsize::new(2).unwrap(),
            Duration::from_secs(1),
        );
        {
            let _a = pool.acquire().await.expect("a");
            let _b = pool.acquire().await.expect("b");
            assert_eq!(pool.checked_out(), 2);
        }
        assert_eq!(pool.checked_out(), 0);
    }
}
