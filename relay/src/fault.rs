//! Injectable chaos for exercising the retry path against real endpoints.

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::errors::{RelayError, Result};

pub trait FaultInjector: Send + Sync {
    /// Called at the start of every attempt; an `Err` replaces the remote call.
    fn before_attempt(&self, attempt: u32) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoFaults;

impl FaultInjector for NoFaults {
    fn before_attempt(&self, _attempt: u32) -> Result<()> {
        Ok(())
    }
}

/// Fails a fraction of attempts with either a throttling signal (retried) or
/// a validation failure (not retried).
#[derive(Debug)]
pub struct RandomFaults {
    rate: f64,
    rng: Mutex<StdRng>,
}

impl RandomFaults {
    pub fn new(rate: f64) -> Self {
        Self::with_rng(rate, StdRng::from_entropy())
    }

    pub fn seeded(rate: f64, seed: u64) -> Self {
        Self::with_rng(rate, StdRng::seed_from_u64(seed))
    }

    fn with_rng(rate: f64, rng: StdRng) -> Self {
        Self {
            // NaN disables injection.
            rate: if rate.is_nan() { 0.0 } else { rate.clamp(0.0, 1.0) },
            rng: Mutex::new(rng),
        }
    }
}

impl FaultInjector for RandomFaults {
    fn before_attempt(&self, _attempt: u32) -> Result<()> {
        let mut rng = self.rng.lock();
        if !rng.gen_bool(self.rate) {
            return Ok(());
        }
        if rng.gen_bool(0.5) {
            let retry_after = rng.gen_range(5..=15);
            Err(RelayError::Throttled(format!(
                "injected: too many requests, retry after {retry_after}s"
            )))
        } else {
            Err(RelayError::InvalidRequest(
                "injected: invalid query format".to_string(),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_rate_never_fails() {
        let faults = RandomFaults::seeded(0.0, 7);
        assert!((0..200).all(|attempt| faults.before_attempt(attempt).is_ok()));
    }

    #[test]
    fn full_rate_always_fails_with_known_kinds() {
        let faults = RandomFaults::seeded(1.0, 7);
        for attempt in 0..50 {
            match faults.before_attempt(attempt) {
                Err(RelayError::Throttled(_)) | Err(RelayError::InvalidRequest(_)) => {}
                other => panic!("unexpected fault outcome: {other:?}"),
            }
        }
    }

    #[test]
    fn rate_is_clamped() {
        let faults = RandomFaults::seeded(3.5, 1);
        assert!(faults.before_attempt(0).is_err());
    }

    #[test]
    fn nan_rate_never_fails() {
        let faults = RandomFaults::seeded(f64::NAN, 1);
        assert!((0..50).all(|attempt| faults.before_attempt(attempt).is_ok()));
    }
}
