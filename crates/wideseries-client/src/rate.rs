//! Self-resetting rate counter.
//!
//! `RateCounter` keeps one `{start, count}` window. `mark(n)` adds to the
//! count and `rate_per_second()` divides by the time since the window started.
//! A resetter task owned by the counter checks the window at a short interval
//! and starts a fresh one once it is older than the configured length, so the
//! reported rate is a sawtooth approximation of the trailing throughput with
//! O(1) state.
//!
//! ## Lifecycle
//!
//! ```ignore
//! let rate = Arc::new(RateCounter::new(Duration::from_secs(30)));
//! rate.start_resetter(Duration::from_millis(100));
//! rate.mark(1000);
//! println!("{:.0}/s", rate.rate_per_second());
//! rate.stop(); // also happens on drop
//! ```

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::trace;

#[derive(Debug)]
struct Window {
    start: Instant,
    count: u64,
}

/// Point-in-time view of the current window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateSnapshot {
    pub count: u64,
    pub elapsed: Duration,
    pub per_second: f64,
}

#[derive(Debug)]
pub struct RateCounter {
    window: Arc<Mutex<Window>>,
    length: Duration,
    resetter: Mutex<Option<JoinHandle<()>>>,
}

impl RateCounter {
    /// Counter whose window resets once it is older than `length`.
    pub fn new(length: Duration) -> Self {
        Self {
            window: Arc::new(Mutex::new(Window {
                start: Instant::now(),
                count: 0,
            })),
            length,
            resetter: Mutex::new(None),
        }
    }

    pub fn mark(&self, n: u64) {
        let mut window = lock(&self.window);
        window.count = window.count.saturating_add(n);
    }

    /// Count divided by seconds since the window started, 0 when no time has passed.
    pub fn rate_per_second(&self) -> f64 {
        self.snapshot().per_second
    }

    pub fn snapshot(&self) -> RateSnapshot {
        let window = lock(&self.window);
        let elapsed = window.start.elapsed();
        let secs = elapsed.as_secs_f64();
        let per_second = if secs > 0.0 {
            window.count as f64 / secs
        } else {
            0.0
        };
        RateSnapshot {
            count: window.count,
            elapsed,
            per_second,
        }
    }

    /// Start a fresh window if the current one has expired. Returns `true` on reset.
    pub fn reset_if_expired(&self) -> bool {
        reset_if_expired(&self.window, self.length)
    }

    /// Spawn the periodic resetter. A second call replaces the first task.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start_resetter(&self, check_interval: Duration) {
        let window = Arc::clone(&self.window);
        let length = self.length;

        let handle = tokio::spawn(async move {
            let mut ticker = interval(check_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if reset_if_expired(&window, length) {
                    trace!(window_ms = length.as_millis() as u64, "Rate window reset");
                }
            }
        });

        if let Some(previous) = lock(&self.resetter).replace(handle) {
            previous.abort();
        }
    }

    /// Stop the resetter task. The counter keeps working but no longer resets.
    pub fn stop(&self) {
        if let Some(handle) = lock(&self.resetter).take() {
            handle.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        lock(&self.resetter)
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for RateCounter {
    fn drop(&mut self) {
        self.stop();
    }
}

fn reset_if_expired(window: &Mutex<Window>, length: Duration) -> bool {
    let mut window = lock(window);
    if window.start.elapsed() < length {
        return false;
    }
    window.start = Instant::now();
    window.count = 0;
    true
}

// A panic while holding the lock cannot leave the window half-updated
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_rate_is_zero_without_elapsed_time() {
        let rate = RateCounter::new(Duration::from_secs(30));
        rate.mark(100);

        let value = rate.rate_per_second();
        assert_eq!(value, 0.0);
        assert!(value.is_finite());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_divides_by_elapsed() {
        let rate = RateCounter::new(Duration::from_secs(30));
        rate.mark(6);
        rate.mark(4);

        tokio::time::advance(Duration::from_secs(2)).await;

        let snap = rate.snapshot();
        assert_eq!(snap.count, 10);
        assert_eq!(snap.elapsed, Duration::from_secs(2));
        assert!((snap.per_second - 5.0).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_if_expired() {
        let rate = RateCounter::new(Duration::from_secs(1));
        rate.mark(5);

        assert!(!rate.reset_if_expired());
        tokio::time::advance(Duration::from_millis(1000)).await;
        assert!(rate.reset_if_expired());
        assert_eq!(rate.snapshot().count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resetter_task_resets_window() {
        let rate = RateCounter::new(Duration::from_secs(1));
        rate.start_resetter(Duration::from_millis(100));
        assert!(rate.is_running());
        rate.mark(5);

        tokio::time::sleep(Duration::from_millis(1150)).await;

        let snap = rate.snapshot();
        assert_eq!(snap.count, 0);
        assert!(snap.elapsed < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_halts_resets() {
        let rate = RateCounter::new(Duration::from_secs(1));
        rate.start_resetter(Duration::from_millis(100));
        rate.stop();
        assert!(!rate.is_running());
        rate.mark(5);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(rate.snapshot().count, 5);
    }
}
