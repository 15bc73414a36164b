//! Sender configuration.
//!
//! [`SenderConfig`] holds every tunable of a [`DataSender`](crate::DataSender).
//! It can be filled in through the [`SenderBuilder`](crate::SenderBuilder)
//! setters or loaded from JSON:
//!
//! ```
//! use streamsend::SenderConfig;
//!
//! let config = SenderConfig::from_json(r#"{ "message_size": 1024, "message_buffer": 0 }"#).unwrap();
//! assert_eq!(config.message_size, 1024);
//! assert!(!config.confirmations_enabled());
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backpressure::DEFAULT_MAX_IN_FLIGHT;
use crate::error::{Result, SenderError};
use crate::protocol::DeliveryMode;

/// Default nominal frame size in bytes.
pub const DEFAULT_MESSAGE_SIZE: usize = 65536;

/// Largest accepted nominal frame size.
pub const MAX_MESSAGE_SIZE: usize = i32::MAX as usize;

/// Default delay between drain checks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Consecutive empty-queue observations needed to treat a best-effort
/// queue as drained.
pub const DRAIN_CONFIRMATIONS: u32 = 5;

/// Configuration of a sender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SenderConfig {
    /// Nominal frame size. Frames may grow up to twice this value.
    pub message_size: usize,
    /// Frames allowed in flight awaiting a confirm. 0 disables confirms.
    pub message_buffer: usize,
    /// Delivery mode stamped on every frame.
    pub delivery_mode: DeliveryMode,
    /// Delay between drain checks in `finish`.
    #[serde(rename = "poll_interval_ms", with = "duration_ms")]
    pub poll_interval: Duration,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            message_size: DEFAULT_MESSAGE_SIZE,
            message_buffer: DEFAULT_MAX_IN_FLIGHT,
            delivery_mode: DeliveryMode::Persistent,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl SenderConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| SenderError::Config(format!("invalid sender config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for values the sender cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.message_size == 0 {
            return Err(SenderError::Config(
                "message size must be greater than 0".into(),
            ));
        }
        if self.message_size > MAX_MESSAGE_SIZE {
            return Err(SenderError::Config(format!(
                "message size {} exceeds the maximum of {MAX_MESSAGE_SIZE}",
                self.message_size
            )));
        }
        Ok(())
    }

    /// Largest frame payload the sender can emit.
    #[inline]
    pub fn max_message_size(&self) -> usize {
        self.message_size.saturating_mul(2)
    }

    /// Whether publisher confirms will be requested.
    #[inline]
    pub fn confirmations_enabled(&self) -> bool {
        self.message_buffer > 0
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = SenderConfig::default();
        assert_eq!(config.message_size, 65536);
        assert_eq!(config.message_buffer, 100);
        assert_eq!(config.delivery_mode, DeliveryMode::Persistent);
        assert_eq!(config.poll_interval, Duration::from_millis(200));
        assert_eq!(config.max_message_size(), 131072);
        assert!(config.confirmations_enabled());
    }

    #[test]
    fn test_config_from_json_partial() {
        let config = SenderConfig::from_json(
            r#"{ "message_buffer": 0, "delivery_mode": "transient", "poll_interval_ms": 5 }"#,
        )
        .unwrap();

        assert_eq!(config.message_size, DEFAULT_MESSAGE_SIZE);
        assert!(!config.confirmations_enabled());
        assert_eq!(config.delivery_mode, DeliveryMode::Transient);
        assert_eq!(config.poll_interval, Duration::from_millis(5));
    }

    #[test]
    fn test_config_from_json_rejects_zero_size() {
        let result = SenderConfig::from_json(r#"{ "message_size": 0 }"#);
        assert!(matches!(result, Err(SenderError::Config(_))));
    }

    #[test]
    fn test_config_rejects_oversized_message_size() {
        let config = SenderConfig {
            message_size: MAX_MESSAGE_SIZE + 1,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(SenderError::Config(_))));

        let config = SenderConfig {
            message_size: usize::MAX / 2 + 1,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(SenderError::Config(_))));

        let config = SenderConfig {
            message_size: MAX_MESSAGE_SIZE,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_json_rejects_garbage() {
        let result = SenderConfig::from_json(r#"{ "message_size": "big" }"#);
        assert!(matches!(result, Err(SenderError::Config(_))));
    }

    #[test]
    fn test_config_serializes_interval_in_ms() {
        let json = serde_json::to_value(SenderConfig::default()).unwrap();
        assert_eq!(json["poll_interval_ms"], 200);
        assert_eq!(json["delivery_mode"], "persistent");
    }
}
