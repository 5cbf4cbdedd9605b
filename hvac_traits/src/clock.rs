use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Wall-clock abstraction for control timing and cache timestamps.
///
/// - now_ms(): milliseconds since the UNIX epoch
/// - sleep(): sleeps for the provided duration (implementations may simulate)
/// - ms_since(): helper to compute elapsed milliseconds from an earlier `now_ms()`
pub trait Clock {
    fn now_ms(&self) -> u64;
    fn sleep(&self, d: Duration);

    /// Milliseconds elapsed since `earlier_ms`, saturating at 0 when the clock went backwards.
    fn ms_since(&self, earlier_ms: u64) -> u64 {
        self.now_ms().saturating_sub(earlier_ms)
    }
}

/// Default clock backed by `SystemTime`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl SystemClock {
    #[inline]
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    #[inline]
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis().min(u128::from(u64::MAX)) as u64)
            .unwrap_or(0)
    }

    #[inline]
    fn sleep(&self, d: Duration) {
        if d.is_zero() {
            return;
        }
        thread::sleep(d);
    }
}

/// Deterministic clock whose time only moves when told to.
///
/// Clones share the same underlying time, so a test can keep a handle and
/// advance the clock the engine owns.
///
/// sleep(d) advances internal time by d without actually sleeping.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl Default for ManualClock {
    fn default() -> Self {
        // 2025-06-01T00:00:00Z, far enough from zero that subtraction never saturates in tests.
        Self::at(1_748_736_000_000)
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the clock at an absolute epoch-millisecond timestamp.
    pub fn at(epoch_ms: u64) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(epoch_ms)),
        }
    }

    /// Advance the clock by the given duration.
    pub fn advance(&self, d: Duration) {
        let ms = d.as_millis().min(u128::from(u64::MAX)) as u64;
        let _ = self
            .now
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |t| {
                Some(t.saturating_add(ms))
            });
    }

    /// Set the absolute time.
    pub fn set_ms(&self, epoch_ms: u64) {
        self.now.store(epoch_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }

    fn sleep(&self, d: Duration) {
        self.advance(d);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_clones_share_time() {
        let a = ManualClock::at(1_000);
        let b = a.clone();
        a.advance(Duration::from_secs(2));
        assert_eq!(b.now_ms(), 3_000);
        assert_eq!(b.ms_since(1_500), 1_500);
    }

    #[test]
    fn ms_since_saturates_when_earlier_is_in_future() {
        let c = ManualClock::at(10);
        assert_eq!(c.ms_since(50), 0);
    }
}
