//! Reader configuration.

use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::protocol::Protocol;

/// Settings for one read of a BMS.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    pub protocol: Protocol,
    /// BLE advertised name of the BMS.
    pub device_name: String,
    /// Upper bound for one complete read.
    #[serde(with = "secs")]
    pub timeout: Duration,
    /// How long to scan for the device.
    #[serde(with = "secs")]
    pub scan_timeout: Duration,
    /// How long a Daly cell or temperature poll may take.
    #[serde(with = "secs")]
    pub segment_timeout: Duration,
    /// Pause between consecutive Daly requests.
    #[serde(with = "secs")]
    pub request_spacing: Duration,
    /// How often unanswered JK requests are repeated.
    #[serde(with = "secs")]
    pub retry_interval: Duration,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            protocol: Protocol::Daly,
            device_name: "DL-BMS".to_string(),
            timeout: Duration::from_secs(20),
            scan_timeout: Duration::from_secs(10),
            segment_timeout: Duration::from_millis(2500),
            request_spacing: Duration::from_millis(120),
            retry_interval: Duration::from_secs(2),
        }
    }
}

impl ReaderConfig {
    /// Defaults overridden by `BMSREAD_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(protocol) = lookup("BMSREAD_PROTOCOL") {
            config.protocol = protocol.parse()?;
        }
        if let Some(name) = lookup("BMSREAD_DEVICE_NAME") {
            config.device_name = name;
        }
        if let Some(secs) = lookup("BMSREAD_TIMEOUT_SECS") {
            config.timeout = parse_secs("BMSREAD_TIMEOUT_SECS", &secs)?;
        }
        if let Some(secs) = lookup("BMSREAD_SCAN_TIMEOUT_SECS") {
            config.scan_timeout = parse_secs("BMSREAD_SCAN_TIMEOUT_SECS", &secs)?;
        }
        if let Some(secs) = lookup("BMSREAD_SEGMENT_TIMEOUT_SECS") {
            config.segment_timeout = parse_secs("BMSREAD_SEGMENT_TIMEOUT_SECS", &secs)?;
        }

        Ok(config)
    }
}

fn parse_secs(key: &'static str, value: &str) -> Result<Duration> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
        .ok_or_else(|| Error::Config { key, value: value.to_string() })
}

mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        if !secs.is_finite() || secs < 0.0 {
            return Err(serde::de::Error::custom(format!("invalid duration {secs}")));
        }
        Ok(Duration::from_secs_f64(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn env_overrides_defaults() {
        let env: HashMap<&str, &str> = [
            ("BMSREAD_PROTOCOL", "jk"),
            ("BMSREAD_TIMEOUT_SECS", "7.5"),
            ("BMSREAD_DEVICE_NAME", "JK-B2A24S"),
        ]
        .into_iter()
        .collect();
        let config = ReaderConfig::from_lookup(|key| env.get(key).map(|v| v.to_string())).unwrap();
        assert_eq!(config.protocol, Protocol::Jk);
        assert_eq!(config.timeout, Duration::from_millis(7500));
        assert_eq!(config.device_name, "JK-B2A24S");
        assert_eq!(config.segment_timeout, Duration::from_millis(2500));
    }

    #[test]
    fn rejects_bad_values() {
        let result = ReaderConfig::from_lookup(|key| {
            (key == "BMSREAD_TIMEOUT_SECS").then(|| "-1".to_string())
        });
        assert!(matches!(result, Err(Error::Config { key: "BMSREAD_TIMEOUT_SECS", .. })));
    }

    #[test]
    fn deserializes_partial_json() {
        let json = r#"{"protocol": "jk", "retry_interval": 0.5}"#;
        let config: ReaderConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.protocol, Protocol::Jk);
        assert_eq!(config.retry_interval, Duration::from_millis(500));
        assert_eq!(config.device_name, "DL-BMS");
    }
}
