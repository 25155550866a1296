//! Pending-request callbacks and per-subject reply-time history.
//!
//! Every client connection owns one [`CallbackTable`]. The sender registers
//! a callback before writing the request; the inbound dispatcher, the write
//! error path, the timeout sweep and `close()` all race to remove it.
//! Removal from the map is the arbiter: whoever takes the entry owns the
//! oneshot sender and completes it exactly once.

use crate::error::MessagingError;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

/// Period of the timeout sweep.
pub(crate) const SWEEP_INTERVAL: Duration = Duration::from_millis(50);

/// Floor below which the adaptive detector never fires.
const MIN_TIMEOUT: Duration = Duration::from_millis(100);
/// Hard cap for requests with no explicit timeout.
const MAX_TIMEOUT: Duration = Duration::from_millis(5000);

const WINDOW_SIZE: usize = 10;
const WINDOW_UPDATE_SAMPLE_SIZE: u32 = 100;
const WINDOW_UPDATE_INTERVAL: Duration = Duration::from_secs(60);
const MIN_SAMPLES: usize = 25;
const PHI_FACTOR: f64 = 1.0 / std::f64::consts::LN_10;
const PHI_FAILURE_THRESHOLD: f64 = 12.0;
/// Monitors unused for this long are dropped.
const HISTORY_EXPIRE: Duration = Duration::from_secs(60);

/// Completion sink for one pending request.
pub(crate) type ReplySink = oneshot::Sender<Result<Bytes, MessagingError>>;

/// A pending request awaiting its reply.
pub(crate) struct Callback {
    subject: String,
    timeout: Option<Duration>,
    created_at: Instant,
    sink: ReplySink,
}

impl Callback {
    pub fn complete(self, payload: Bytes) {
        let _ = self.sink.send(Ok(payload));
    }

    pub fn fail(self, error: MessagingError) {
        let _ = self.sink.send(Err(error));
    }
}

/// Concurrent table of pending callbacks plus the reply-time histories
/// driving the adaptive timeout.
pub(crate) struct CallbackTable {
    callbacks: Mutex<HashMap<u64, Callback>>,
    monitors: Mutex<HashMap<String, MonitorEntry>>,
    closed: AtomicBool,
}

struct MonitorEntry {
    monitor: RequestMonitor,
    last_access: Instant,
}

impl CallbackTable {
    pub fn new() -> Self {
        Self {
            callbacks: Mutex::new(HashMap::new()),
            monitors: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn register(&self, id: u64, subject: &str, timeout: Option<Duration>, sink: ReplySink) {
        self.callbacks.lock().insert(
            id,
            Callback {
                subject: subject.to_string(),
                timeout,
                created_at: Instant::now(),
                sink,
            },
        );
    }

    #[cfg(test)]
    fn register_backdated(
        &self,
        id: u64,
        subject: &str,
        timeout: Option<Duration>,
        age: Duration,
        sink: ReplySink,
    ) {
        self.callbacks.lock().insert(
            id,
            Callback {
                subject: subject.to_string(),
                timeout,
                created_at: Instant::now() - age,
                sink,
            },
        );
    }

    /// Removes the callback for a reply that arrived, recording its round
    /// trip time in the subject's history.
    pub fn complete(&self, id: u64) -> Option<Callback> {
        let callback = self.callbacks.lock().remove(&id)?;
        let elapsed = callback.created_at.elapsed();
        self.with_monitor(&callback.subject, |monitor| monitor.add_reply_time(elapsed));
        Some(callback)
    }

    /// Removes the callback without recording a reply time (write failures).
    pub fn fail(&self, id: u64) -> Option<Callback> {
        self.callbacks.lock().remove(&id)
    }

    /// Fails every outstanding callback with `ConnectionClosed`. Idempotent.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let drained: Vec<Callback> = self
                .callbacks
                .lock()
                .drain()
                .map(|(_, callback)| callback)
                .collect();
            for callback in drained {
                callback.fail(MessagingError::ConnectionClosed);
            }
        }
    }

    /// One pass of the timeout sweep.
    ///
    /// Decisions are made on a snapshot; a callback completed by the
    /// dispatcher between the decision and the removal simply wins the
    /// remove race and is not failed.
    pub fn sweep(&self) {
        let now = Instant::now();
        let mut expired: Vec<(u64, Duration)> = Vec::new();
        let mut candidates: Vec<(u64, String, Duration)> = Vec::new();
        {
            let callbacks = self.callbacks.lock();
            for (id, callback) in callbacks.iter() {
                let elapsed = now.saturating_duration_since(callback.created_at);
                match callback.timeout {
                    Some(timeout) => {
                        if elapsed > timeout {
                            expired.push((*id, elapsed));
                        }
                    }
                    None => {
                        if elapsed > MIN_TIMEOUT {
                            candidates.push((*id, callback.subject.clone(), elapsed));
                        }
                    }
                }
            }
        }

        for (id, elapsed) in expired {
            if let Some(callback) = self.fail(id) {
                callback.fail(MessagingError::Timeout(elapsed));
            }
        }

        for (id, subject, elapsed) in candidates {
            let timed_out = elapsed > MAX_TIMEOUT
                || self.with_monitor(&subject, |monitor| monitor.is_timed_out(elapsed));
            if !timed_out {
                continue;
            }
            if let Some(callback) = self.fail(id) {
                self.with_monitor(&subject, |monitor| monitor.add_reply_time(elapsed));
                callback.fail(MessagingError::Timeout(elapsed));
            }
        }

        self.prune_monitors(now);
    }

    /// Number of pending callbacks.
    #[allow(dead_code)]
    pub fn pending(&self) -> usize {
        self.callbacks.lock().len()
    }

    fn with_monitor<R>(&self, subject: &str, f: impl FnOnce(&RequestMonitor) -> R) -> R {
        let mut monitors = self.monitors.lock();
        let entry = monitors
            .entry(subject.to_string())
            .or_insert_with(|| MonitorEntry {
                monitor: RequestMonitor::new(),
                last_access: Instant::now(),
            });
        entry.last_access = Instant::now();
        f(&entry.monitor)
    }

    fn prune_monitors(&self, now: Instant) {
        self.monitors
            .lock()
            .retain(|_, entry| now.saturating_duration_since(entry.last_access) <= HISTORY_EXPIRE);
    }
}

/// Reply-time history for one subject, feeding the φ-accrual timeout
/// detector.
///
/// Replies accumulate into a running maximum; once enough replies have been
/// seen and enough time has passed, the maximum rolls into a bounded sample
/// window and the accumulator resets. The φ value compares a request's
/// elapsed time against the window mean.
pub(crate) struct RequestMonitor {
    window: Mutex<Window>,
    max: AtomicU64,
    reply_count: AtomicU32,
}

struct Window {
    samples: VecDeque<u64>,
    last_update: Instant,
}

impl RequestMonitor {
    fn new() -> Self {
        Self {
            window: Mutex::new(Window {
                samples: VecDeque::with_capacity(WINDOW_SIZE),
                last_update: Instant::now(),
            }),
            max: AtomicU64::new(0),
            reply_count: AtomicU32::new(0),
        }
    }

    pub fn add_reply_time(&self, reply_time: Duration) {
        let millis = reply_time.as_millis() as u64;
        self.max.fetch_max(millis, Ordering::Relaxed);
        let count = self.reply_count.fetch_add(1, Ordering::Relaxed) + 1;

        if count < WINDOW_UPDATE_SAMPLE_SIZE {
            return;
        }
        let mut window = self.window.lock();
        // Re-check under the lock; another thread may have rolled the window.
        if self.reply_count.load(Ordering::Relaxed) >= WINDOW_UPDATE_SAMPLE_SIZE
            && window.last_update.elapsed() > WINDOW_UPDATE_INTERVAL
        {
            let last_max = self.max.load(Ordering::Relaxed);
            if last_max > 0 {
                if window.samples.len() == WINDOW_SIZE {
                    window.samples.pop_front();
                }
                window.samples.push_back(last_max);
                window.last_update = Instant::now();
                self.reply_count.store(0, Ordering::Relaxed);
                self.max.store(0, Ordering::Relaxed);
            }
        }
    }

    /// Whether a request alive for `elapsed` should be declared timed out.
    pub fn is_timed_out(&self, elapsed: Duration) -> bool {
        let window = self.window.lock();
        window.samples.len() == WINDOW_SIZE
            && Self::phi(&window.samples, elapsed.as_millis() as f64) >= PHI_FAILURE_THRESHOLD
    }

    fn phi(samples: &VecDeque<u64>, elapsed_millis: f64) -> f64 {
        if samples.len() < MIN_SAMPLES {
            return 0.0;
        }
        let mean = samples.iter().sum::<u64>() as f64 / samples.len() as f64;
        if mean == 0.0 {
            return 100.0;
        }
        PHI_FACTOR * elapsed_millis / mean
    }

    #[cfg(test)]
    fn push_sample(&self, millis: u64) {
        let mut window = self.window.lock();
        if window.samples.len() == WINDOW_SIZE {
            window.samples.pop_front();
        }
        window.samples.push_back(millis);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sink() -> (
        ReplySink,
        oneshot::Receiver<Result<Bytes, MessagingError>>,
    ) {
        oneshot::channel()
    }

    #[test]
    fn test_complete_removes_and_delivers() {
        let table = CallbackTable::new();
        let (tx, mut rx) = sink();
        table.register(1, "echo", None, tx);
        assert_eq!(table.pending(), 1);

        let callback = table.complete(1).unwrap();
        callback.complete(Bytes::from_static(b"pong"));
        assert_eq!(rx.try_recv().unwrap().unwrap(), Bytes::from_static(b"pong"));
        assert_eq!(table.pending(), 0);
        assert!(table.complete(1).is_none());
    }

    #[test]
    fn test_fail_removes_without_delivering() {
        let table = CallbackTable::new();
        let (tx, mut rx) = sink();
        table.register(2, "echo", None, tx);

        let callback = table.fail(2).unwrap();
        drop(callback);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_close_fails_everything_once() {
        let table = CallbackTable::new();
        let (tx1, mut rx1) = sink();
        let (tx2, mut rx2) = sink();
        table.register(1, "a", None, tx1);
        table.register(2, "b", None, tx2);

        table.close();
        table.close(); // idempotent

        for rx in [&mut rx1, &mut rx2] {
            match rx.try_recv().unwrap() {
                Err(MessagingError::ConnectionClosed) => {}
                other => panic!("expected ConnectionClosed, got {:?}", other.map(|_| ())),
            }
        }
    }

    #[test]
    fn test_sweep_static_timeout() {
        let table = CallbackTable::new();
        let (tx, mut rx) = sink();
        table.register_backdated(
            1,
            "slow",
            Some(Duration::from_millis(100)),
            Duration::from_millis(150),
            tx,
        );

        table.sweep();
        match rx.try_recv().unwrap() {
            Err(MessagingError::Timeout(elapsed)) => {
                assert!(elapsed >= Duration::from_millis(150));
            }
            other => panic!("expected Timeout, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_sweep_leaves_fresh_callbacks() {
        let table = CallbackTable::new();
        let (tx, mut rx) = sink();
        table.register(1, "fast", Some(Duration::from_secs(30)), tx);

        table.sweep();
        assert_eq!(table.pending(), 1);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_sweep_adaptive_hard_cap() {
        let table = CallbackTable::new();
        let (tx, mut rx) = sink();
        table.register_backdated(1, "slow", None, Duration::from_millis(5100), tx);

        table.sweep();
        assert!(matches!(
            rx.try_recv().unwrap(),
            Err(MessagingError::Timeout(_))
        ));
    }

    #[test]
    fn test_sweep_adaptive_below_floor() {
        // Under the 100 ms floor nothing fires, explicit timeout or not.
        let table = CallbackTable::new();
        let (tx, _rx) = sink();
        table.register_backdated(1, "quick", None, Duration::from_millis(50), tx);

        table.sweep();
        assert_eq!(table.pending(), 1);
    }

    #[test]
    fn test_monitor_window_never_reaches_phi_min_samples() {
        // The window holds 10 samples but φ requires 25, so the φ branch is
        // inert: a full window alone never times a request out below the
        // hard cap. This pins the shipped behavior.
        let monitor = RequestMonitor::new();
        for _ in 0..WINDOW_SIZE {
            monitor.push_sample(10);
        }
        assert!(!monitor.is_timed_out(Duration::from_millis(4_900)));
        assert!(!monitor.is_timed_out(Duration::from_secs(3600)));
    }

    #[test]
    fn test_monitor_partial_window_never_times_out() {
        let monitor = RequestMonitor::new();
        monitor.push_sample(10);
        assert!(!monitor.is_timed_out(Duration::from_secs(3600)));
    }

    #[test]
    fn test_monitor_window_roll_needs_volume_and_time() {
        let monitor = RequestMonitor::new();
        // Plenty of replies, but the 60 s window-update interval has not
        // elapsed, so nothing rolls into the sample window.
        for _ in 0..500 {
            monitor.add_reply_time(Duration::from_millis(20));
        }
        assert_eq!(monitor.window.lock().samples.len(), 0);
        assert!(monitor.reply_count.load(Ordering::Relaxed) >= WINDOW_UPDATE_SAMPLE_SIZE);
    }

    #[test]
    fn test_monitor_phi_arithmetic() {
        // Exercised directly because the 10-slot window cannot satisfy the
        // 25-sample gate through the public path.
        let samples: VecDeque<u64> = std::iter::repeat(100).take(MIN_SAMPLES).collect();
        let phi = RequestMonitor::phi(&samples, 100.0);
        assert!((phi - PHI_FACTOR).abs() < 1e-9);
        // elapsed = 12·ln(10)·mean crosses the threshold exactly.
        let crossing = 12.0 * std::f64::consts::LN_10 * 100.0;
        assert!(RequestMonitor::phi(&samples, crossing) >= PHI_FAILURE_THRESHOLD);
        assert!(RequestMonitor::phi(&samples, 0.5 * 100.0) < PHI_FAILURE_THRESHOLD);
    }

    #[test]
    fn test_monitor_cache_expires_after_inactivity() {
        let table = CallbackTable::new();
        table.with_monitor("sleepy", |_| ());
        assert_eq!(table.monitors.lock().len(), 1);

        table.prune_monitors(Instant::now() + HISTORY_EXPIRE + Duration::from_secs(1));
        assert!(table.monitors.lock().is_empty());
    }

    #[test]
    fn test_completed_then_swept_resolves_to_first_writer() {
        let table = CallbackTable::new();
        let (tx, mut rx) = sink();
        table.register_backdated(
            1,
            "racy",
            Some(Duration::from_millis(10)),
            Duration::from_millis(50),
            tx,
        );

        // Dispatcher wins the removal race...
        let callback = table.complete(1).unwrap();
        callback.complete(Bytes::from_static(b"late but fine"));
        // ...so the sweep finds nothing to fail.
        table.sweep();
        assert!(rx.try_recv().unwrap().is_ok());
    }
}
