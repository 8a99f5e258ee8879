//! Periodic sampling on a dedicated thread.
//!
//! Ticks are scheduled against absolute deadlines (`next += interval`) so
//! timing error does not accumulate. A tick that overruns its period is
//! logged and counted; missed periods are skipped rather than replayed in a
//! burst. An interval change takes effect at the next scheduled period.
//!
//! Shutdown is cooperative: `stop` raises the cancel flag, wakes the thread
//! and waits up to the stop timeout for the in-flight tick to finish. If it
//! does not, the thread is detached and left to observe the flag.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use rf_controls::SampleConfig;
use rf_core::{LatencyStats, LatencyTracker};
use tracing::{debug, error, warn};

use crate::error::{AppError, AppResult};

/// Shared cancellation flag observed by a running tick.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One scheduled sampling period.
#[derive(Debug, Clone)]
pub struct Tick {
    pub index: u64,
    /// Time since the scheduler started.
    pub elapsed: Duration,
    /// Period this tick was scheduled with.
    pub interval: Duration,
    cancel: CancelToken,
}

impl Tick {
    /// A tick driven by the caller rather than the scheduler thread.
    pub fn new(index: u64, elapsed: Duration, interval: Duration) -> Self {
        Self {
            index,
            elapsed,
            interval,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn elapsed_s(&self) -> f64 {
        self.elapsed.as_secs_f64()
    }

    /// Set once `stop` has been requested; work with side effects should be
    /// skipped from then on.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// How a `stop` call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    NotRunning,
    /// The thread finished its tick and exited.
    Joined,
    /// The in-flight tick outlived the stop timeout and was abandoned.
    Cancelled,
}

struct Running {
    stop_tx: Sender<()>,
    done_rx: Receiver<()>,
    handle: JoinHandle<()>,
    cancel: CancelToken,
}

/// Runs a callback once per sampling interval on its own thread.
pub struct SamplingScheduler {
    interval_ms: Arc<AtomicU64>,
    stop_timeout: Duration,
    stats: Arc<LatencyTracker>,
    running: Mutex<Option<Running>>,
}

impl std::fmt::Debug for SamplingScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SamplingScheduler")
            .field("interval", &self.interval())
            .field("stop_timeout", &self.stop_timeout)
            .field("running", &self.is_running())
            .finish()
    }
}

impl SamplingScheduler {
    pub fn new(sampling: SampleConfig, stop_timeout: Duration) -> Self {
        Self {
            interval_ms: Arc::new(AtomicU64::new(sampling.normalized().interval_ms)),
            stop_timeout,
            stats: Arc::new(LatencyTracker::new()),
            running: Mutex::new(None),
        }
    }

    fn lock_running(&self) -> MutexGuard<'_, Option<Running>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.load(Ordering::SeqCst))
    }

    /// Change the sampling interval. Applies from the next scheduled period.
    pub fn set_interval(&self, sampling: SampleConfig) {
        self.interval_ms
            .store(sampling.normalized().interval_ms, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.lock_running()
            .as_ref()
            .is_some_and(|running| !running.handle.is_finished())
    }

    pub fn stats(&self) -> LatencyStats {
        self.stats.snapshot()
    }

    /// Start ticking. Returns `false` without side effects when a sampling
    /// thread is already running.
    ///
    /// The first tick fires immediately; later ticks follow the interval.
    pub fn start<F>(&self, on_sample: F) -> AppResult<bool>
    where
        F: FnMut(&Tick) + Send + 'static,
    {
        let mut running = self.lock_running();
        if running
            .as_ref()
            .is_some_and(|current| !current.handle.is_finished())
        {
            return Ok(false);
        }

        let (stop_tx, stop_rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel();
        let cancel = CancelToken::new();
        let worker = Worker {
            interval_ms: Arc::clone(&self.interval_ms),
            stats: Arc::clone(&self.stats),
            cancel: cancel.clone(),
            stop_rx,
            done_tx,
        };
        self.stats.reset();

        let handle = thread::Builder::new()
            .name("rf-sampler".to_string())
            .spawn(move || worker.run(on_sample))
            .map_err(|e| AppError::Scheduler(format!("failed to spawn sampling thread: {}", e)))?;

        *running = Some(Running {
            stop_tx,
            done_rx,
            handle,
            cancel,
        });
        debug!(interval = ?self.interval(), "sampling started");
        Ok(true)
    }

    /// Stop ticking. After this returns no new tick starts, and a tick still
    /// in flight sees its cancel flag set.
    pub fn stop(&self) -> StopOutcome {
        let Some(running) = self.lock_running().take() else {
            return StopOutcome::NotRunning;
        };
        running.cancel.cancel();
        // The thread may already have exited; a closed channel is fine.
        let _ = running.stop_tx.send(());

        match running.done_rx.recv_timeout(self.stop_timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if running.handle.join().is_err() {
                    error!("sampling thread panicked during shutdown");
                }
                debug!("sampling stopped");
                StopOutcome::Joined
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    timeout = ?self.stop_timeout,
                    "in-flight tick did not finish, sampling thread detached"
                );
                StopOutcome::Cancelled
            }
        }
    }
}

impl Drop for SamplingScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Worker {
    interval_ms: Arc<AtomicU64>,
    stats: Arc<LatencyTracker>,
    cancel: CancelToken,
    stop_rx: Receiver<()>,
    done_tx: Sender<()>,
}

impl Worker {
    fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.load(Ordering::SeqCst))
    }

    fn run<F>(self, mut on_sample: F)
    where
        F: FnMut(&Tick),
    {
        let start = Instant::now();
        let mut next = start;
        let mut index = 0u64;

        loop {
            let wait = next.saturating_duration_since(Instant::now());
            match self.stop_rx.recv_timeout(wait) {
                Err(RecvTimeoutError::Timeout) => {}
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
            if self.cancel.is_cancelled() {
                break;
            }

            let interval = self.interval();
            let began = Instant::now();
            let tick = Tick {
                index,
                elapsed: began.duration_since(start),
                interval,
                cancel: self.cancel.clone(),
            };

            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| on_sample(&tick))) {
                error!(tick = index, "sample callback panicked: {}", panic_message(&*payload));
            }

            let took = began.elapsed();
            if self.stats.record(took, interval) {
                warn!(tick = index, ?took, ?interval, "tick overran its sampling interval");
            }

            index += 1;
            next += self.interval();
            let now = Instant::now();
            if next < now {
                // Skip missed periods instead of catching up in a burst
                next = now;
            }
        }

        let _ = self.done_tx.send(());
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn fast() -> SampleConfig {
        SampleConfig::new(rf_controls::sampled::MIN_INTERVAL_MS)
    }

    #[test]
    fn ticks_until_stopped() {
        let scheduler = SamplingScheduler::new(fast(), Duration::from_secs(2));
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        assert!(scheduler.start(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap());
        thread::sleep(Duration::from_millis(350));
        assert_eq!(scheduler.stop(), StopOutcome::Joined);

        let ticks = count.load(Ordering::SeqCst);
        assert!(ticks >= 2, "only {ticks} ticks");
        thread::sleep(Duration::from_millis(250));
        assert_eq!(count.load(Ordering::SeqCst), ticks);
        assert!(!scheduler.is_running());
    }

    #[test]
    fn start_is_idempotent() {
        let scheduler = SamplingScheduler::new(fast(), Duration::from_secs(2));
        assert!(scheduler.start(|_| {}).unwrap());
        assert!(!scheduler.start(|_| {}).unwrap());
        assert_eq!(scheduler.stop(), StopOutcome::Joined);
        assert_eq!(scheduler.stop(), StopOutcome::NotRunning);
    }

    #[test]
    fn panicking_callback_keeps_ticking() {
        let scheduler = SamplingScheduler::new(fast(), Duration::from_secs(2));
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        scheduler
            .start(move |tick| {
                seen.fetch_add(1, Ordering::SeqCst);
                if tick.index == 0 {
                    panic!("probe exploded");
                }
            })
            .unwrap();
        thread::sleep(Duration::from_millis(350));
        scheduler.stop();
        assert!(count.load(Ordering::SeqCst) >= 2);
    }

    #[test]
    fn slow_tick_is_cancelled_on_stop() {
        let scheduler = SamplingScheduler::new(fast(), Duration::from_millis(100));
        let (entered_tx, entered_rx) = mpsc::channel();
        let (saw_cancel_tx, saw_cancel_rx) = mpsc::channel();
        scheduler
            .start(move |tick| {
                let _ = entered_tx.send(());
                thread::sleep(Duration::from_millis(400));
                let _ = saw_cancel_tx.send(tick.is_cancelled());
            })
            .unwrap();
        entered_rx.recv_timeout(Duration::from_secs(2)).unwrap();

        assert_eq!(scheduler.stop(), StopOutcome::Cancelled);
        let cancelled = saw_cancel_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(cancelled);
        // No further ticks after the abandoned one
        assert!(saw_cancel_rx.recv_timeout(Duration::from_millis(300)).is_err());
    }

    #[test]
    fn overruns_are_counted() {
        let scheduler = SamplingScheduler::new(fast(), Duration::from_secs(2));
        scheduler
            .start(|tick| {
                if tick.index == 0 {
                    thread::sleep(Duration::from_millis(150));
                }
            })
            .unwrap();
        thread::sleep(Duration::from_millis(400));
        scheduler.stop();
        let stats = scheduler.stats();
        assert!(stats.count >= 2);
        assert_eq!(stats.overruns, 1);
        assert!(stats.max >= Duration::from_millis(150));
    }

    #[test]
    fn interval_is_floored() {
        let scheduler = SamplingScheduler::new(SampleConfig::new(5), Duration::from_secs(1));
        assert_eq!(scheduler.interval(), Duration::from_millis(100));
        scheduler.set_interval(SampleConfig::new(3000));
        assert_eq!(scheduler.interval(), Duration::from_secs(3));
    }
}
