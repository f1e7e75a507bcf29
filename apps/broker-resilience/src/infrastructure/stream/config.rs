//! Stream manager configuration.

use std::time::Duration;

use crate::error::ValidationError;
use crate::resilience::BackoffPolicy;

/// Stream connection manager configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamConfig {
    /// How long `start` waits for the first connection, and the bound on
    /// each individual connection handshake.
    pub connect_timeout: Duration,
    /// How long `stop` waits for the connection tasks to finish.
    pub stop_timeout: Duration,
    /// Reconnection backoff; `max_attempts` caps reconnects per outage.
    pub reconnect: BackoffPolicy,
    /// Capacity of the channel between the read loop and the consumer.
    pub channel_capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(15),
            stop_timeout: Duration::from_secs(5),
            reconnect: BackoffPolicy::new(
                Duration::from_millis(500),
                Duration::from_secs(30),
                2.0,
                0.1,
                10,
            ),
            channel_capacity: 1024,
        }
    }
}

impl StreamConfig {
    /// Check that every bound is usable.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.connect_timeout.is_zero() {
            return Err(ValidationError::new("connect_timeout", "must be greater than zero"));
        }
        if self.stop_timeout.is_zero() {
            return Err(ValidationError::new("stop_timeout", "must be greater than zero"));
        }
        if self.channel_capacity == 0 {
            return Err(ValidationError::new("channel_capacity", "must be at least 1"));
        }
        self.reconnect.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        assert!(StreamConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_zero_capacity() {
        let config = StreamConfig {
            channel_capacity: 0,
            ..StreamConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert_eq!(err.field, "channel_capacity");
    }

    #[test]
    fn rejects_zero_timeouts() {
        let config = StreamConfig {
            stop_timeout: Duration::ZERO,
            ..StreamConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
