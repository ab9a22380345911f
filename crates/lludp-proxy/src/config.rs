//! Proxy configuration.

use std::time::Duration;

use lludp_circuit::CircuitConfig;
use serde::{Deserialize, Serialize};

/// Where the proxy listens, where it relays to, and how its circuit
/// behaves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Client-facing address the viewer sends to.
    pub listen_addr: String,

    /// The simulator the proxy relays to.
    pub upstream_addr: String,

    pub circuit: CircuitConfig,

    /// How often unacked injections are checked for resending.
    pub housekeeping_interval: Duration,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:0".to_string(),
            upstream_addr: "127.0.0.1:13000".to_string(),
            circuit: CircuitConfig::default(),
            housekeeping_interval: Duration::from_millis(250),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_listens_on_loopback() {
        let config = ProxyConfig::default();
        assert_eq!(config.listen_addr, "127.0.0.1:0");
        assert_eq!(config.housekeeping_interval, Duration::from_millis(250));
        assert_eq!(config.circuit, CircuitConfig::default());
    }
}
