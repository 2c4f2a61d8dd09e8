use std::time::Duration;

use crate::types::Round;

/// Round timer durations. The base timeout covers round 0; each later round
/// doubles a backoff on top of it, capped by `max_backoff_exponent`.
#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    pub base: Duration,
    pub backoff: Duration,
    pub max_backoff_exponent: u32,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(10),
            backoff: Duration::from_secs(1),
            max_backoff_exponent: 8,
        }
    }
}

impl TimeoutConfig {
    /// The round timer duration for the given round.
    pub fn round_timeout(&self, round: Round) -> Duration {
        if round.0 == 0 {
            return self.base;
        }
        let exponent = (round.0 as u32).min(self.max_backoff_exponent);
        self.base + self.backoff * 2u32.pow(exponent)
    }
}

/// Engine tunables.
#[derive(Debug, Clone)]
pub struct Config {
    pub timeouts: TimeoutConfig,
    /// Per-author cap on backlogged future messages.
    pub backlog_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timeouts: TimeoutConfig::default(),
            backlog_capacity: 128,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_timeout_grows_and_caps() {
        let config = TimeoutConfig {
            base: Duration::from_millis(100),
            backoff: Duration::from_millis(10),
            max_backoff_exponent: 3,
        };

        assert_eq!(config.round_timeout(Round(0)), Duration::from_millis(100));
        assert_eq!(config.round_timeout(Round(1)), Duration::from_millis(120));
        assert_eq!(config.round_timeout(Round(2)), Duration::from_millis(140));
        assert_eq!(config.round_timeout(Round(3)), Duration::from_millis(180));
        // Capped: round 10 pays the same backoff as round 3.
        assert_eq!(config.round_timeout(Round(10)), Duration::from_millis(180));
    }
}
