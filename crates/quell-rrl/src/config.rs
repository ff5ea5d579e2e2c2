//! Rate limiter configuration.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration error raised at limiter construction.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A field holds a value outside its permitted range.
    #[error("invalid value for {field}: {message}")]
    InvalidValue {
        /// The offending field.
        field: &'static str,
        /// What was wrong with it.
        message: String,
    },
}

/// Result type for configuration validation.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Response Rate Limiting configuration.
///
/// This is a construction-time snapshot; the limiter never re-reads it.
/// Rates are responses per second and `0` disables limiting for that
/// response kind entirely.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RrlConfig {
    /// Initial number of preallocated table entries.
    pub min_table_size: usize,

    /// Hard cap on table entries; past it the LRU entry is recycled.
    pub max_table_size: usize,

    /// Budget for ordinary (NOERROR) responses, per second.
    pub responses_per_second: u32,

    /// Budget for NXDOMAIN responses, per second.
    pub nxdomains_per_second: u32,

    /// Budget for error responses, per second.
    pub errors_per_second: u32,

    /// Maximum seconds of debt a bucket may accumulate.
    pub window: u32,

    /// Slip cadence: every `slip`-th limited response is sent truncated
    /// instead of dropped. `0` disables slipping, `1` slips every limited
    /// response.
    pub slip: u32,

    /// Prefix length used to aggregate IPv4 clients.
    pub ipv4_prefix_len: u8,

    /// Prefix length used to aggregate IPv6 clients.
    pub ipv6_prefix_len: u8,

    /// Dry-run mode: report every decision as Allow but still log what
    /// would have been limited.
    pub log_only: bool,

    /// Double the per-response debit for buckets already in the red,
    /// accelerating suppression of sustained floods.
    pub aggressive_penalty: bool,

    /// Mixed with the construction clock to seed the key hash. Pin it
    /// (together with the clock) for reproducible behavior in tests.
    pub salt: u64,
}

impl Default for RrlConfig {
    fn default() -> Self {
        Self {
            min_table_size: 512,
            max_table_size: 100_000,
            responses_per_second: 5,
            nxdomains_per_second: 5,
            errors_per_second: 5,
            window: 15,
            slip: 2,
            ipv4_prefix_len: 24,
            ipv6_prefix_len: 56,
            log_only: false,
            aggressive_penalty: false,
            salt: 0,
        }
    }
}

impl RrlConfig {
    /// Validates the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.ipv4_prefix_len > 32 {
            return Err(ConfigError::InvalidValue {
                field: "ipv4_prefix_len",
                message: format!("{} exceeds 32", self.ipv4_prefix_len),
            });
        }
        if self.ipv6_prefix_len > 128 {
            return Err(ConfigError::InvalidValue {
                field: "ipv6_prefix_len",
                message: format!("{} exceeds 128", self.ipv6_prefix_len),
            });
        }
        if self.min_table_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "min_table_size",
                message: "must be positive".to_string(),
            });
        }
        if self.min_table_size > self.max_table_size {
            return Err(ConfigError::InvalidValue {
                field: "max_table_size",
                message: format!(
                    "{} is smaller than min_table_size {}",
                    self.max_table_size, self.min_table_size
                ),
            });
        }
        if self.window == 0 {
            return Err(ConfigError::InvalidValue {
                field: "window",
                message: "must be positive".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(RrlConfig::default().validate().is_ok());
    }

    #[test]
    fn test_prefix_bounds() {
        let config = RrlConfig {
            ipv4_prefix_len: 33,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue {
                field: "ipv4_prefix_len",
                ..
            })
        ));

        let config = RrlConfig {
            ipv6_prefix_len: 129,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_table_size_ordering() {
        let config = RrlConfig {
            min_table_size: 2048,
            max_table_size: 1024,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = RrlConfig {
            min_table_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_window_rejected() {
        let config = RrlConfig {
            window: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
