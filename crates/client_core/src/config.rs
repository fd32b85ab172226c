use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalTimings {
    /// Pause before the AI answers a player move.
    pub ai_delay: Duration,
    /// How long a finished local game stays on screen before a new one starts.
    pub restart_delay: Duration,
}

impl Default for LocalTimings {
    fn default() -> Self {
        Self {
            ai_delay: Duration::from_millis(400),
            restart_delay: Duration::from_secs(3),
        }
    }
}

/// Exponential backoff for store calls that fail as unavailable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total tries, including the first.
    pub attempts: u32,
    pub initial_delay: Duration,
    pub factor: u32,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay_before(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1);
        self.initial_delay
            .saturating_mul(self.factor.saturating_pow(exponent))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 4,
            initial_delay: Duration::from_millis(250),
            factor: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub local: LocalTimings,
    pub retry: RetryPolicy,
    /// Waiting matches considered per matchmaking attempt.
    pub waiting_query_limit: u32,
    /// Fixed seed for the AI's random choices; entropy when `None`.
    pub ai_seed: Option<u64>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            local: LocalTimings::default(),
            retry: RetryPolicy::default(),
            waiting_query_limit: 5,
            ai_seed: None,
        }
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
