use std::time::Duration;

use rand::Rng;

use crate::error::ConfigError;

#[derive(Clone, Debug, PartialEq)]
pub struct BackoffConfig {
    /// First retry delay, and the delay after any session that streamed
    pub floor: Duration,
    /// Upper bound on the doubled delay
    pub ceiling: Duration,
    /// Maximum random extra added to every sleep
    pub jitter: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            floor: Duration::from_secs(1),
            ceiling: Duration::from_secs(60),
            jitter: Duration::from_millis(500),
        }
    }
}

impl BackoffConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.floor.is_zero() {
            return Err(ConfigError::NonPositivePeriod("backoff floor".to_string()));
        }
        if self.floor > self.ceiling {
            return Err(ConfigError::InvalidParameters(format!(
                "backoff floor {:.1}s exceeds ceiling {:.1}s",
                self.floor.as_secs_f64(),
                self.ceiling.as_secs_f64()
            )));
        }
        Ok(())
    }
}

/// Exponential reconnect delay: floor, 2 floor, 4 floor, ... capped at the ceiling.
#[derive(Clone, Debug)]
pub struct Backoff {
    config: BackoffConfig,
    current: Duration,
    attempts: u32,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            current: config.floor,
            config,
            attempts: 0,
        }
    }

    /// Delay the next sleep starts from, before jitter
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Consecutive failed attempts since the last reset
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Delay to sleep now, jitter included. Doubles the base for the next call.
    pub fn next_delay(&mut self) -> Duration {
        let base = self.current;
        self.attempts += 1;
        self.current = base.saturating_mul(2).min(self.config.ceiling);
        base + self.jitter()
    }

    pub fn reset(&mut self) {
        self.current = self.config.floor;
        self.attempts = 0;
    }

    fn jitter(&self) -> Duration {
        let max = self.config.jitter.as_secs_f64();
        if max <= 0.0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(rand::thread_rng().gen_range(0.0..=max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter(floor: u64, ceiling: u64) -> Backoff {
        Backoff::new(BackoffConfig {
            floor: Duration::from_secs(floor),
            ceiling: Duration::from_secs(ceiling),
            jitter: Duration::ZERO,
        })
    }

    #[test]
    fn test_doubles_until_ceiling() {
        let mut backoff = no_jitter(1, 60);
        let delays: Vec<u64> = (0..9).map(|_| backoff.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 32, 60, 60, 60]);
        assert_eq!(backoff.attempts(), 9);
    }

    #[test]
    fn test_reset_returns_to_floor() {
        let mut backoff = no_jitter(2, 30);
        backoff.next_delay();
        backoff.next_delay();
        assert_eq!(backoff.current(), Duration::from_secs(8));

        backoff.reset();
        assert_eq!(backoff.current(), Duration::from_secs(2));
        assert_eq!(backoff.attempts(), 0);
        assert_eq!(backoff.next_delay(), Duration::from_secs(2));
    }

    #[test]
    fn test_jitter_is_bounded_and_positive() {
        let mut backoff = Backoff::new(BackoffConfig::default());
        for _ in 0..50 {
            backoff.reset();
            let delay = backoff.next_delay();
            assert!(delay >= Duration::from_secs(1));
            assert!(delay <= Duration::from_millis(1500));
        }
    }

    #[test]
    fn test_invalid_config_rejected() {
        let zero = BackoffConfig {
            floor: Duration::ZERO,
            ..BackoffConfig::default()
        };
        assert!(zero.validate().is_err());

        let inverted = BackoffConfig {
            floor: Duration::from_secs(10),
            ceiling: Duration::from_secs(5),
            jitter: Duration::ZERO,
        };
        assert!(inverted.validate().is_err());
        assert!(BackoffConfig::default().validate().is_ok());
    }
}
