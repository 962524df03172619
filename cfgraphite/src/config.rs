//! This module controls configuration validation for the end user, providing
//! a convenience mechanism for the rest of the program. Refusals to start are
//! most likely to originate from this code, intentionally.

use std::time::Duration;

/// Default seconds between the end of one poll cycle and the start of the
/// next.
pub const DEFAULT_POLL_INTERVAL_SECONDS: u64 = 120;
/// Default analytics lookback window, in minutes.
pub const DEFAULT_LOOKBACK_MINUTES: u32 = 30;

/// Errors produced by [`Config`]
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A required setting was left empty.
    #[error("missing required setting: {0}")]
    Missing(&'static str),
    /// The Graphite port was left zero.
    #[error("graphite port must be non-zero")]
    ZeroPort,
    /// The poll interval was left zero.
    #[error("poll interval must be non-zero")]
    ZeroInterval,
}

/// Endpoint of the Graphite sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphiteConfig {
    /// Graphite host.
    pub host: String,
    /// Graphite plaintext-protocol port.
    pub port: u16,
}

/// Main configuration struct for this program
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// X-Auth-Email credential for Cloudflare's API.
    pub auth_email: String,
    /// X-Auth-Key credential for Cloudflare's API.
    pub auth_key: String,
    /// Cloudflare zone identifier.
    pub zone: String,
    /// Domain of the zone, used in metric keys after normalization.
    pub zone_domain: String,
    /// Where emitted samples go.
    pub graphite: GraphiteConfig,
    /// Seconds between the end of one poll cycle and the start of the next.
    pub poll_interval_seconds: u64,
    /// Analytics lookback window, in minutes.
    pub lookback_minutes: u32,
}

impl Config {
    /// Check that every required setting is present, refusing to start
    /// otherwise.
    ///
    /// # Errors
    ///
    /// Returns the first missing or zero required setting found.
    pub fn validate(&self) -> Result<(), Error> {
        if self.auth_email.is_empty() {
            return Err(Error::Missing("email"));
        }
        if self.auth_key.is_empty() {
            return Err(Error::Missing("auth-key"));
        }
        if self.zone.is_empty() {
            return Err(Error::Missing("zone"));
        }
        if self.zone_domain.is_empty() {
            return Err(Error::Missing("zone-domain"));
        }
        if self.graphite.host.is_empty() {
            return Err(Error::Missing("graphite-host"));
        }
        if self.graphite.port == 0 {
            return Err(Error::ZeroPort);
        }
        if self.poll_interval_seconds == 0 {
            return Err(Error::ZeroInterval);
        }
        Ok(())
    }

    /// The fixed interval between poll cycles.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        Config {
            auth_email: "ops@example.com".to_string(),
            auth_key: "c2f1a3".to_string(),
            zone: "0a1b2c3d".to_string(),
            zone_domain: "example.com".to_string(),
            graphite: GraphiteConfig {
                host: "graphite.internal".to_string(),
                port: 2003,
            },
            poll_interval_seconds: DEFAULT_POLL_INTERVAL_SECONDS,
            lookback_minutes: DEFAULT_LOOKBACK_MINUTES,
        }
    }

    #[test]
    fn complete_config_validates() {
        assert_eq!(valid_config().validate(), Ok(()));
    }

    #[test]
    fn empty_settings_are_refused() {
        let mut config = valid_config();
        config.auth_email = String::new();
        assert_eq!(config.validate(), Err(Error::Missing("email")));

        let mut config = valid_config();
        config.auth_key = String::new();
        assert_eq!(config.validate(), Err(Error::Missing("auth-key")));

        let mut config = valid_config();
        config.zone = String::new();
        assert_eq!(config.validate(), Err(Error::Missing("zone")));

        let mut config = valid_config();
        config.zone_domain = String::new();
        assert_eq!(config.validate(), Err(Error::Missing("zone-domain")));

        let mut config = valid_config();
        config.graphite.host = String::new();
        assert_eq!(config.validate(), Err(Error::Missing("graphite-host")));
    }

    #[test]
    fn zero_port_is_refused() {
        let mut config = valid_config();
        config.graphite.port = 0;
        assert_eq!(config.validate(), Err(Error::ZeroPort));
    }

    #[test]
    fn zero_interval_is_refused() {
        let mut config = valid_config();
        config.poll_interval_seconds = 0;
        assert_eq!(config.validate(), Err(Error::ZeroInterval));
    }
}
