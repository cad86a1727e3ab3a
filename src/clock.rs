//! Injectable monotonic clock: production code calls [`Monotonic::now`] through [`SystemClock`],
//! tests drive a [`FakeClock`] by hand so scheduling logic can be exercised without real sleeps.
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bma_ts::Monotonic;

/// A source of monotonic time the scheduler can be driven by.
pub trait Clock: Send + Sync {
    /// The current monotonic instant.
    fn now(&self) -> Monotonic;
    /// Block the calling thread until at least `until`. No-op if `until` is already past.
    fn sleep_until(&self, until: Monotonic);
}

/// Wall-clock [`Clock`] backed by [`Monotonic::now`] and [`std::thread::sleep`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Monotonic {
        Monotonic::now()
    }

    fn sleep_until(&self, until: Monotonic) {
        let now = Monotonic::now();
        if until > now {
            std::thread::sleep(until - now);
        }
    }
}

/// A [`Clock`] that only advances when told to, for deterministic scheduler tests. Tracks an
/// offset from a fixed base instant so it can live in an atomic without an inner mutex.
pub struct FakeClock {
    base: Monotonic,
    offset_nanos: AtomicU64,
}

impl FakeClock {
    /// A fake clock starting "now"; advance it explicitly from there.
    pub fn new() -> Self {
        Self { base: Monotonic::now(), offset_nanos: AtomicU64::new(0) }
    }

    /// Move the clock forward by `d`. `sleep_until` calls made by another thread observe this
    /// once it returns.
    pub fn advance(&self, d: Duration) {
        self.offset_nanos.fetch_add(d.as_nanos() as u64, Ordering::SeqCst);
    }

    fn current(&self) -> Monotonic {
        self.base + Duration::from_nanos(self.offset_nanos.load(Ordering::SeqCst))
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Monotonic {
        self.current()
    }

    /// Fake time never blocks: a test drives it forward explicitly via [`FakeClock::advance`].
    fn sleep_until(&self, until: Monotonic) {
        let mut current = self.current();
        while current < until {
            std::thread::yield_now();
            current = self.current();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_clock_advances_on_command() {
        let clock = FakeClock::new();
        let start = clock.now();
        clock.advance(Duration::from_millis(50));
        assert_eq!(clock.now() - start, Duration::from_millis(50));
    }
}
