use quanta::Instant;

/// A series that records durations, in seconds.
pub(crate) trait Observe {
    fn observe_seconds(&self, seconds: f64);
}

/// Observes the time elapsed since its creation when dropped.
///
/// Use [`Timer::observe_duration`] to record early and read the measured value, or
/// [`Timer::discard`] to drop the timer without recording.
#[must_use = "a timer records when dropped, binding it to `_` records immediately"]
pub struct Timer<'a> {
    target: &'a dyn Observe,
    start: Instant,
    recorded: bool,
}

impl<'a> Timer<'a> {
    pub(crate) fn start(target: &'a dyn Observe) -> Self {
        Self { target, start: Instant::now(), recorded: false }
    }

    /// Records the elapsed time and returns it, in seconds.
    pub fn observe_duration(mut self) -> f64 {
        self.record()
    }

    /// Stops the timer without recording anything.
    pub fn discard(mut self) {
        self.recorded = true;
    }

    fn record(&mut self) -> f64 {
        let seconds = Instant::now().duration_since(self.start).as_secs_f64();
        self.target.observe_seconds(seconds);
        self.recorded = true;
        seconds
    }
}

impl Drop for Timer<'_> {
    fn drop(&mut self) {
        if !self.recorded {
            self.record();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::thread;
    use std::time::Duration;

    use super::*;

    #[derive(Default)]
    struct Recorded(Mutex<Vec<f64>>);

    impl Observe for Recorded {
        fn observe_seconds(&self, seconds: f64) {
            self.0.lock().unwrap().push(seconds);
        }
    }

    #[test]
    fn test_timer_records_once() {
        let recorded = Recorded::default();
        let elapsed = {
            let timer = Timer::start(&recorded);
            thread::sleep(Duration::from_millis(5));
            timer.observe_duration()
        };
        assert!(elapsed >= 0.004);
        assert_eq!(*recorded.0.lock().unwrap(), vec![elapsed]);

        drop(Timer::start(&recorded));
        assert_eq!(recorded.0.lock().unwrap().len(), 2);

        Timer::start(&recorded).discard();
        assert_eq!(recorded.0.lock().unwrap().len(), 2);
    }
}
