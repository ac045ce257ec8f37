// Clock abstraction so reconnect timing works under real or simulated time
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Source of "current time" as an offset from an arbitrary, fixed origin.
pub trait Clock: Send + Sync {
    fn now(&self) -> Duration;
}

/// Wall-clock time backed by `Instant`.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        MonotonicClock { origin: Instant::now() }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Simulated time advanced explicitly by the driver; clones share one timeline.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    nanos: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        self.nanos.fetch_add(by.as_nanos() as u64, Ordering::Relaxed);
    }

    pub fn set(&self, at: Duration) {
        self.nanos.store(at.as_nanos() as u64, Ordering::Relaxed);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::Relaxed))
    }
}

pub type SharedClock = Arc<dyn Clock>;

/// Default clock used by transports that were not handed one.
pub fn monotonic() -> SharedClock {
    Arc::new(MonotonicClock::new())
}

// Countdown timer measured against a shared clock
#[derive(Clone)]
pub struct Timer {
    clock: SharedClock,
    duration: Duration,
    start: Duration,
}

impl Timer {
    pub fn new(clock: SharedClock, duration: Duration) -> Self {
        let start = clock.now();
        Timer { clock, duration, start }
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn elapsed(&self) -> Duration {
        self.clock.now().saturating_sub(self.start)
    }

    /// Time left before the timer expires, zero once expired.
    pub fn remaining(&self) -> Duration {
        self.duration.saturating_sub(self.elapsed())
    }

    pub fn expired(&self) -> bool {
        self.elapsed() >= self.duration
    }

    pub fn restart(&mut self) {
        self.start = self.clock.now();
    }

    pub fn restart_with(&mut self, duration: Duration) {
        self.duration = duration;
        self.restart();
    }
}

impl std::fmt::Debug for Timer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Timer")
            .field("duration", &self.duration)
            .field("remaining", &self.remaining())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_drives_timer() {
        let clock = ManualClock::new();
        let mut timer = Timer::new(Arc::new(clock.clone()), Duration::from_secs(1));
        assert!(!timer.expired());
        assert_eq!(timer.remaining(), Duration::from_secs(1));

        clock.advance(Duration::from_millis(400));
        assert!(!timer.expired());
        assert_eq!(timer.remaining(), Duration::from_millis(600));

        clock.advance(Duration::from_millis(600));
        assert!(timer.expired());
        assert_eq!(timer.remaining(), Duration::ZERO);

        timer.restart();
        assert!(!timer.expired());
        clock.advance(Duration::from_secs(2));
        assert!(timer.expired());
    }

    #[test]
    fn restart_with_changes_duration() {
        let clock = ManualClock::new();
        let mut timer = Timer::new(Arc::new(clock.clone()), Duration::from_secs(1));
        timer.restart_with(Duration::from_millis(50));
        clock.advance(Duration::from_millis(50));
        assert!(timer.expired());
    }
}
