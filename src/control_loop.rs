//! Fixed-cadence scheduler driving the three per-cycle steps (control, command, throttled
//! update), with duty-cycle accounting and overrun detection. Grounded on the teacher's
//! [`crate::clock`]-free `Interval` (monotonic tick with a missed-tick policy), restructured so
//! the runner takes its clock by injection instead of calling `Monotonic::now()` directly.
use std::time::Duration;

use bma_ts::Monotonic;

use crate::clock::Clock;

/// Drives `controlStep -> commandStep -> (throttled) updateStep` on a fixed `loopInterval`
/// cadence, catching up missed update ticks without re-invoking `updateStep`, and logging an
/// average duty cycle once a second plus any loop overrun.
pub struct ControlLoopRunner {
    loop_interval: Duration,
    update_interval: Duration,
    clock: Box<dyn Clock>,
    next_loop_at: Option<Monotonic>,
    next_update_at: Option<Monotonic>,
    next_duty_log_at: Option<Monotonic>,
    duty_cycle_sum: f64,
    duty_cycle_samples: u64,
}

impl ControlLoopRunner {
    /// `loop_interval` is the nominal control-loop cadence; `update_interval` throttles how often
    /// `updateStep` runs, and must be a multiple of `loop_interval` in practice though this isn't
    /// enforced.
    pub fn new(loop_interval: Duration, update_interval: Duration, clock: Box<dyn Clock>) -> Self {
        Self {
            loop_interval,
            update_interval,
            clock,
            next_loop_at: None,
            next_update_at: None,
            next_duty_log_at: None,
            duty_cycle_sum: 0.0,
            duty_cycle_samples: 0,
        }
    }

    /// Run one scheduler cycle: sleep until due, then invoke `control_step`, `command_step` and,
    /// at most once, `update_step` when its interval has elapsed.
    pub fn run_cycle(
        &mut self,
        mut control_step: impl FnMut(),
        mut command_step: impl FnMut(),
        mut update_step: impl FnMut(),
    ) {
        let now = self.clock.now();
        let next_loop_at = *self.next_loop_at.get_or_insert(now);
        let next_update_at = *self.next_update_at.get_or_insert(now);
        let next_duty_log_at = *self.next_duty_log_at.get_or_insert(now + Duration::from_secs(1));

        if now < next_loop_at {
            self.clock.sleep_until(next_loop_at);
        }
        let loop_start = self.clock.now();

        control_step();
        command_step();

        let after_steps = self.clock.now();
        if after_steps >= next_update_at {
            update_step();
            let mut next = next_update_at + self.update_interval;
            while next <= after_steps {
                next += self.update_interval;
            }
            self.next_update_at = Some(next);
        }

        let end = self.clock.now();
        let duty_cycle = (end - loop_start).as_secs_f64() / self.loop_interval.as_secs_f64();
        self.duty_cycle_sum += duty_cycle;
        self.duty_cycle_samples += 1;
        if end >= next_duty_log_at {
            let average = self.duty_cycle_sum / self.duty_cycle_samples as f64;
            log::info!("Machine control loop duty cycle: {:.1}%", average * 100.0);
            self.duty_cycle_sum = 0.0;
            self.duty_cycle_samples = 0;
            self.next_duty_log_at = Some(next_duty_log_at + Duration::from_secs(1));
        }

        let mut next = next_loop_at + self.loop_interval;
        if next <= end {
            let overrun = end - next;
            log::warn!("Machine loop overrun by {} ms", overrun.as_millis());
            while next <= end {
                next += self.loop_interval;
            }
        }
        self.next_loop_at = Some(next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;
    use std::cell::Cell;
    use std::rc::Rc;
    use std::sync::Arc;

    struct TickingClock(Arc<FakeClock>);
    impl Clock for TickingClock {
        fn now(&self) -> Monotonic {
            self.0.now()
        }
        fn sleep_until(&self, until: Monotonic) {
            // advance the fake clock as if time had actually passed, instead of blocking
            let now = self.0.now();
            if until > now {
                self.0.advance(until - now);
            }
        }
    }

    #[test]
    fn update_step_runs_at_most_once_per_due_cycle() {
        let fake = Arc::new(FakeClock::new());
        let mut runner = ControlLoopRunner::new(
            Duration::from_millis(10),
            Duration::from_millis(100),
            Box::new(TickingClock(Arc::clone(&fake))),
        );
        let update_calls = Rc::new(Cell::new(0));
        for _ in 0..3 {
            let update_calls = Rc::clone(&update_calls);
            runner.run_cycle(|| {}, || {}, move || update_calls.set(update_calls.get() + 1));
        }
        assert_eq!(update_calls.get(), 0);
    }

    #[test]
    fn update_step_fires_once_interval_elapses() {
        let fake = Arc::new(FakeClock::new());
        let mut runner = ControlLoopRunner::new(
            Duration::from_millis(10),
            Duration::from_millis(20),
            Box::new(TickingClock(Arc::clone(&fake))),
        );
        let update_calls = Rc::new(Cell::new(0));
        for _ in 0..5 {
            let update_calls = Rc::clone(&update_calls);
            runner.run_cycle(|| {}, || {}, move || update_calls.set(update_calls.get() + 1));
        }
        assert!(update_calls.get() >= 2);
    }

    #[test]
    fn control_and_command_steps_run_every_cycle() {
        let fake = Arc::new(FakeClock::new());
        let mut runner = ControlLoopRunner::new(
            Duration::from_millis(10),
            Duration::from_millis(50),
            Box::new(TickingClock(Arc::clone(&fake))),
        );
        let control_calls = Rc::new(Cell::new(0));
        let command_calls = Rc::new(Cell::new(0));
        for _ in 0..4 {
            let control_calls = Rc::clone(&control_calls);
            let command_calls = Rc::clone(&command_calls);
            runner.run_cycle(
                move || control_calls.set(control_calls.get() + 1),
                move || command_calls.set(command_calls.get() + 1),
                || {},
            );
        }
        assert_eq!(control_calls.get(), 4);
        assert_eq!(command_calls.get(), 4);
    }
}
