//! Circuit configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tuning for a proxied circuit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitConfig {
    /// How many injected packet ids each direction remembers.
    ///
    /// Acks for real packets older than the oldest remembered injection
    /// can no longer be translated and are withheld.
    pub injection_window: usize,

    /// How many dropped packet ids each direction remembers, so resends
    /// of them can be recognized.
    pub dropped_window: usize,

    /// How long an injected reliable packet waits for its ack before it
    /// is sent again.
    pub resend_interval: Duration,

    /// Resends per injected packet before giving up on it.
    pub max_resends: u32,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            injection_window: 2048,
            dropped_window: 2048,
            resend_interval: Duration::from_secs(1),
            max_resends: 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = CircuitConfig::default();
        assert_eq!(config.injection_window, 2048);
        assert_eq!(config.resend_interval, Duration::from_secs(1));
        assert_eq!(config.max_resends, 3);
    }
}
