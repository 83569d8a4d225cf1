//! Time-windowed quantile estimation.
use std::sync::Arc;
use std::time::Duration;

use crate::ckms::{Ckms, QuantileTarget};
use crate::clock::Clock;
use crate::error::{ArgumentError, QuantileError};

/// Default span of observations covered by a summary's quantiles.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(5 * 60);

/// Default number of buckets the window is split into.
pub const DEFAULT_AGE_BUCKETS: usize = 5;

/// A ring of [`Ckms`] estimators covering the last `max_age` of observations.
///
/// Every observation goes into all buckets. Every `max_age / age_buckets` the bucket that has
/// been alive the longest is reset and the next one becomes current, so each query only sees
/// observations younger than roughly `max_age`.
pub struct TimeWindowQuantiles {
    ring: Vec<Ckms>,
    current: usize,
    last_rotation_millis: i64,
    rotation_interval_millis: i64,
    clock: Arc<dyn Clock>,
}

impl TimeWindowQuantiles {
    /// Creates a window of `age_buckets` estimators covering `max_age`.
    ///
    /// Fails if there are no targets, no buckets, or if `max_age` is shorter than one
    /// millisecond per bucket.
    pub fn new(
        targets: &[QuantileTarget],
        max_age: Duration,
        age_buckets: usize,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ArgumentError> {
        if age_buckets == 0 {
            return Err(ArgumentError::InvalidWindow("age buckets must be at least 1".into()));
        }
        let rotation_interval_millis =
            i64::try_from(max_age.as_millis() / age_buckets as u128).unwrap_or(i64::MAX);
        if rotation_interval_millis == 0 {
            return Err(ArgumentError::InvalidWindow(format!(
                "max age of {max_age:?} is too short for {age_buckets} buckets"
            )));
        }
        let template = Ckms::new(targets).ok_or_else(|| {
            ArgumentError::InvalidWindow("at least one quantile target is required".into())
        })?;

        Ok(Self {
            ring: vec![template; age_buckets],
            current: 0,
            last_rotation_millis: clock.now_millis(),
            rotation_interval_millis,
            clock,
        })
    }

    /// The tracked targets.
    pub fn targets(&self) -> &[QuantileTarget] {
        self.ring[self.current].targets()
    }

    /// An empty window with the same configuration, starting now.
    pub fn restarted(&self) -> Self {
        let mut ring = self.ring.clone();
        for bucket in &mut ring {
            bucket.reset();
        }
        Self {
            ring,
            current: 0,
            last_rotation_millis: self.clock.now_millis(),
            rotation_interval_millis: self.rotation_interval_millis,
            clock: Arc::clone(&self.clock),
        }
    }

    /// Records an observation in every bucket.
    pub fn insert(&mut self, value: f64) {
        self.rotate();
        for bucket in &mut self.ring {
            bucket.insert(value);
        }
    }

    /// Estimates `quantile` over the current window.
    pub fn get(&mut self, quantile: f64) -> Result<f64, QuantileError> {
        self.rotate();
        self.ring[self.current].get(quantile)
    }

    fn rotate(&mut self) {
        let mut elapsed = self.clock.now_millis() - self.last_rotation_millis;
        while elapsed > self.rotation_interval_millis {
            self.ring[self.current].reset();
            self.current = (self.current + 1) % self.ring.len();
            elapsed -= self.rotation_interval_millis;
            self.last_rotation_millis += self.rotation_interval_millis;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::clock::MockClock;

    #[test]
    fn test_rejects_invalid_window() {
        let targets = [QuantileTarget::new(0.5, 0.01).unwrap()];
        let clock = Arc::new(MockClock::new(0));
        assert!(TimeWindowQuantiles::new(&targets, DEFAULT_MAX_AGE, 0, clock.clone()).is_err());
        assert!(
            TimeWindowQuantiles::new(&targets, Duration::from_millis(3), 5, clock.clone()).is_err()
        );
        assert!(TimeWindowQuantiles::new(&[], DEFAULT_MAX_AGE, 5, clock).is_err());
    }

    #[test]
    fn test_restarted_window_is_empty() {
        let targets = [QuantileTarget::new(0.5, 0.01).unwrap()];
        let clock = MockClock::new(0);
        let mut window =
            TimeWindowQuantiles::new(&targets, DEFAULT_MAX_AGE, 5, Arc::new(clock.clone()))
                .unwrap();
        window.insert(1.0);

        clock.advance(Duration::from_secs(1));
        let mut fresh = window.restarted();
        assert_eq!(fresh.targets(), &targets);
        assert_eq!(fresh.get(0.5), Err(QuantileError::NoData));
        assert_eq!(fresh.last_rotation_millis, 1_000);
        assert_eq!(window.get(0.5), Ok(1.0));
    }

    #[test]
    fn test_observations_expire() {
        let targets = [QuantileTarget::new(0.5, 0.01).unwrap()];
        let clock = MockClock::new(0);
        let mut window = TimeWindowQuantiles::new(
            &targets,
            Duration::from_secs(10),
            2,
            Arc::new(clock.clone()),
        )
        .unwrap();

        window.insert(1.0);
        assert_eq!(window.get(0.5), Ok(1.0));

        // One rotation: the current bucket was reset, the next one still has the value.
        clock.advance(Duration::from_millis(5_001));
        assert_eq!(window.get(0.5), Ok(1.0));

        window.insert(2.0);
        // Second rotation drops the bucket that saw the first value.
        clock.advance(Duration::from_millis(5_000));
        assert_eq!(window.get(0.5), Ok(2.0));

        clock.advance(Duration::from_secs(20));
        assert_eq!(window.get(0.5), Err(QuantileError::NoData));
    }
}
