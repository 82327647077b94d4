//! C/N0 Estimation
//!
//! Sliding window estimator over reported C/N0 samples.

use common::types::CnoEstimationMode;
use std::collections::VecDeque;
use std::time::Duration;
use tracing::trace;

/// C/N0 estimator of one link
#[derive(Debug, Clone)]
pub struct CnoEstimator {
    mode: CnoEstimationMode,
    window: Duration,
    samples: VecDeque<(Duration, f64)>,
}

impl CnoEstimator {
    pub fn new(mode: CnoEstimationMode, window: Duration) -> Self {
        Self {
            mode,
            window,
            samples: VecDeque::new(),
        }
    }

    pub fn mode(&self) -> CnoEstimationMode {
        self.mode
    }

    /// Record a sample in dB taken at `now`
    pub fn add_sample(&mut self, now: Duration, cno_db: f64) {
        match self.mode {
            CnoEstimationMode::Last => self.samples.clear(),
            _ => self.remove_outdated(now),
        }
        trace!("C/N0 sample {:.2} dB at {:?}", cno_db, now);
        self.samples.push_back((now, cno_db));
    }

    /// Current estimate in dB, NaN when nothing usable is known
    pub fn estimate(&mut self, now: Duration) -> f64 {
        if self.mode != CnoEstimationMode::Last {
            self.remove_outdated(now);
        }

        match self.mode {
            CnoEstimationMode::Last => self.samples.back().map_or(f64::NAN, |&(_, cno)| cno),
            CnoEstimationMode::Minimum => self.samples
                .iter()
                .map(|&(_, cno)| cno)
                .filter(|cno| !cno.is_nan())
                .fold(f64::NAN, f64::min),
            CnoEstimationMode::Average => {
                if self.samples.is_empty() {
                    f64::NAN
                } else {
                    let sum: f64 = self.samples.iter().map(|&(_, cno)| cno).sum();
                    sum / self.samples.len() as f64
                }
            }
        }
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    fn remove_outdated(&mut self, now: Duration) {
        while let Some(&(time, _)) = self.samples.front() {
            if now.saturating_sub(time) > self.window {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    #[test]
    fn test_empty_estimator_is_nan() {
        let mut estimator = CnoEstimator::new(CnoEstimationMode::Average, ms(1000));
        assert!(estimator.estimate(ms(0)).is_nan());
    }

    #[test]
    fn test_last_sample() {
        let mut estimator = CnoEstimator::new(CnoEstimationMode::Last, ms(100));
        estimator.add_sample(ms(0), 60.0);
        estimator.add_sample(ms(10), 62.5);
        assert_eq!(estimator.sample_count(), 1);
        // Last mode ignores the window
        assert_eq!(estimator.estimate(ms(10_000)), 62.5);
    }

    #[test]
    fn test_minimum_over_window() {
        let mut estimator = CnoEstimator::new(CnoEstimationMode::Minimum, ms(100));
        estimator.add_sample(ms(0), 55.0);
        estimator.add_sample(ms(50), 60.0);
        estimator.add_sample(ms(80), f64::NAN);
        estimator.add_sample(ms(90), 58.0);
        assert_eq!(estimator.estimate(ms(90)), 55.0);
        // First sample leaves the window
        assert_eq!(estimator.estimate(ms(120)), 58.0);
    }

    #[test]
    fn test_average_over_window() {
        let mut estimator = CnoEstimator::new(CnoEstimationMode::Average, ms(100));
        estimator.add_sample(ms(0), 50.0);
        estimator.add_sample(ms(60), 60.0);
        estimator.add_sample(ms(120), 64.0);
        assert!((estimator.estimate(ms(120)) - 62.0).abs() < 1e-9);
        assert!(estimator.estimate(ms(500)).is_nan());
    }
}
