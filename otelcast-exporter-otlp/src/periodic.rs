//! Fixed-interval export scheduling on dedicated background workers.
//!
//! Each registered exporter gets its own worker looping at its own
//! cadence, so a push blocked on network I/O never stalls another reader.
//! Workers run until process exit; there is no stop path.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{Error, Result};

/// One export cycle of an opaque metrics exporter or pipeline.
pub trait PushMetrics: Send + Sync + 'static {
    fn push(&self) -> Result<()>;
}

/// Produces named background workers for the scheduler.
///
/// Which strategy is in use is the caller's concern; the scheduler only
/// needs something that runs a job off the current thread.
pub trait WorkerFactory: Send + Sync {
    fn spawn_worker(&self, name: &str, job: Box<dyn FnOnce() + Send>) -> Result<()>;
}

/// Spawns a dedicated platform thread per worker.
#[derive(Debug, Default)]
pub struct ThreadWorkerFactory;

impl WorkerFactory for ThreadWorkerFactory {
    fn spawn_worker(&self, name: &str, job: Box<dyn FnOnce() + Send>) -> Result<()> {
        std::thread::Builder::new()
            .name(name.to_string())
            .spawn(job)
            .map(|_| ())
            .map_err(|e| Error::Worker {
                name: name.to_string(),
                source: e,
            })
    }
}

/// Runs workers on the tokio blocking pool.
///
/// The pool does not carry thread names, so the worker name is kept as a
/// logging field instead.
#[derive(Debug)]
pub struct TokioWorkerFactory {
    handle: tokio::runtime::Handle,
}

impl TokioWorkerFactory {
    /// Create a factory bound to the current runtime.
    ///
    /// Panics outside a tokio runtime context, like
    /// `tokio::runtime::Handle::current`.
    pub fn current() -> Self {
        Self {
            handle: tokio::runtime::Handle::current(),
        }
    }

    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }
}

impl WorkerFactory for TokioWorkerFactory {
    fn spawn_worker(&self, name: &str, job: Box<dyn FnOnce() + Send>) -> Result<()> {
        let worker = name.to_string();
        self.handle.spawn_blocking(move || {
            debug!(worker = %worker, "Export worker started");
            job();
        });
        Ok(())
    }
}

/// Handle to a scheduled periodic reader.
///
/// Carries the worker name and cheap counters; it does not control the
/// worker, which runs until process exit.
#[derive(Debug, Clone)]
pub struct ReaderHandle {
    worker_name: String,
    interval: Duration,
    pushes: Arc<AtomicU64>,
    failures: Arc<AtomicU64>,
}

impl ReaderHandle {
    /// Name of the worker driving this reader.
    pub fn worker_name(&self) -> &str {
        &self.worker_name
    }

    /// The export interval this reader was scheduled with.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Completed pushes so far.
    pub fn pushes(&self) -> u64 {
        self.pushes.load(Ordering::Relaxed)
    }

    /// Failed pushes so far.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

/// Schedules periodic exports, one dedicated worker per exporter.
///
/// Worker names are deterministic: the first worker gets the bare prefix,
/// later ones a `-2`, `-3`, … suffix.
#[derive(Debug)]
pub struct PeriodicExportScheduler {
    prefix: String,
    sequence: AtomicUsize,
}

impl PeriodicExportScheduler {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            sequence: AtomicUsize::new(1),
        }
    }

    fn next_worker_name(&self) -> String {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        if seq > 1 {
            format!("{}-{}", self.prefix, seq)
        } else {
            self.prefix.clone()
        }
    }

    /// Start pushing `exporter` once per `interval` on a worker from
    /// `factory`, indefinitely.
    pub fn schedule<E: PushMetrics>(
        &self,
        exporter: E,
        interval: Duration,
        factory: &dyn WorkerFactory,
    ) -> Result<ReaderHandle> {
        let worker_name = self.next_worker_name();
        let pushes = Arc::new(AtomicU64::new(0));
        let failures = Arc::new(AtomicU64::new(0));

        let handle = ReaderHandle {
            worker_name: worker_name.clone(),
            interval,
            pushes: pushes.clone(),
            failures: failures.clone(),
        };

        let loop_name = worker_name.clone();
        factory.spawn_worker(
            &worker_name,
            Box::new(move || {
                loop {
                    std::thread::sleep(interval);
                    match exporter.push() {
                        Ok(()) => {
                            pushes.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => {
                            failures.fetch_add(1, Ordering::Relaxed);
                            warn!(worker = %loop_name, error = %e, "Metrics export failed");
                        }
                    }
                }
            }),
        )?;

        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingExporter {
        count: Arc<AtomicU64>,
        fail: bool,
    }

    impl PushMetrics for CountingExporter {
        fn push(&self) -> Result<()> {
            self.count.fetch_add(1, Ordering::Relaxed);
            if self.fail {
                Err(Error::Export("boom".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn counting(fail: bool) -> (CountingExporter, Arc<AtomicU64>) {
        let count = Arc::new(AtomicU64::new(0));
        (
            CountingExporter {
                count: count.clone(),
                fail,
            },
            count,
        )
    }

    #[test]
    fn test_worker_names_get_sequence_suffix() {
        let scheduler = PeriodicExportScheduler::new("otel-metrics");

        assert_eq!(scheduler.next_worker_name(), "otel-metrics");
        assert_eq!(scheduler.next_worker_name(), "otel-metrics-2");
        assert_eq!(scheduler.next_worker_name(), "otel-metrics-3");
    }

    #[test]
    fn test_readers_run_independently_at_their_own_cadence() {
        let scheduler = PeriodicExportScheduler::new("test-metrics");
        let factory = ThreadWorkerFactory;

        let (fast, fast_count) = counting(false);
        let (slow, slow_count) = counting(false);

        let fast_handle = scheduler
            .schedule(fast, Duration::from_millis(5), &factory)
            .unwrap();
        let slow_handle = scheduler
            .schedule(slow, Duration::from_millis(40), &factory)
            .unwrap();

        std::thread::sleep(Duration::from_millis(200));

        let fast_pushes = fast_count.load(Ordering::Relaxed);
        let slow_pushes = slow_count.load(Ordering::Relaxed);

        // Both cadences make progress, the faster one strictly more often.
        assert!(fast_pushes > 0, "fast reader never pushed");
        assert!(slow_pushes > 0, "slow reader never pushed");
        assert!(
            fast_pushes > slow_pushes,
            "fast reader ({fast_pushes}) not ahead of slow reader ({slow_pushes})"
        );
        assert_eq!(fast_handle.pushes(), fast_pushes);
        assert_eq!(slow_handle.pushes(), slow_pushes);
    }

    #[test]
    fn test_slow_push_does_not_stall_other_readers() {
        let scheduler = PeriodicExportScheduler::new("test-metrics");
        let factory = ThreadWorkerFactory;

        struct BlockingExporter;
        impl PushMetrics for BlockingExporter {
            fn push(&self) -> Result<()> {
                std::thread::sleep(Duration::from_secs(60));
                Ok(())
            }
        }

        let (fast, fast_count) = counting(false);

        scheduler
            .schedule(BlockingExporter, Duration::from_millis(1), &factory)
            .unwrap();
        scheduler
            .schedule(fast, Duration::from_millis(5), &factory)
            .unwrap();

        std::thread::sleep(Duration::from_millis(100));

        assert!(fast_count.load(Ordering::Relaxed) > 0);
    }

    #[test]
    fn test_failures_are_counted_and_do_not_stop_the_loop() {
        let scheduler = PeriodicExportScheduler::new("test-metrics");
        let factory = ThreadWorkerFactory;

        let (failing, count) = counting(true);

        let handle = scheduler
            .schedule(failing, Duration::from_millis(5), &factory)
            .unwrap();

        std::thread::sleep(Duration::from_millis(100));

        assert!(count.load(Ordering::Relaxed) > 1);
        assert!(handle.failures() > 1);
        assert_eq!(handle.pushes(), 0);
    }

    #[tokio::test]
    async fn test_tokio_worker_factory_runs_jobs() {
        let scheduler = PeriodicExportScheduler::new("test-metrics");
        let factory = TokioWorkerFactory::current();

        let (exporter, count) = counting(false);

        scheduler
            .schedule(exporter, Duration::from_millis(5), &factory)
            .unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(count.load(Ordering::Relaxed) > 0);
    }
}
