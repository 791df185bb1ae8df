use quoteline_core::DataError;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::contract::MarketDataType;

/// Top-level settings, usually read from a TOML file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IbkrConfig {
    pub bridge: BridgeConfig,
    pub market_data: MarketDataConfig,
}

impl IbkrConfig {
    pub fn load(path: &Path) -> Result<Self, DataError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
            .map_err(|e| DataError::ParseError(format!("{}: {}", path.display(), e)))
    }

    pub fn from_toml(text: &str) -> Result<Self, DataError> {
        toml::from_str(text).map_err(|e| DataError::ParseError(e.to_string()))
    }
}

/// Connection to the gateway bridge process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Host address (e.g. "127.0.0.1").
    pub host: String,
    pub port: u16,
    /// Client id presented to TWS / IB Gateway.
    pub client_id: i32,
    pub connect_timeout_secs: u64,
    /// How long to wait for a reply to any single request.
    pub request_timeout_secs: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5557,
            client_id: 1,
            connect_timeout_secs: 10,
            request_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketDataConfig {
    /// Switch the data type as soon as the provider is created.
    pub request_type_on_connect: bool,
    pub default_type: MarketDataType,
}

impl Default for MarketDataConfig {
    fn default() -> Self {
        Self {
            request_type_on_connect: true,
            default_type: MarketDataType::DelayedFrozen,
        }
    }
}

impl MarketDataConfig {
    /// The data type to request when the provider starts, if any.
    pub fn initial_type(&self) -> Option<MarketDataType> {
        self.request_type_on_connect.then_some(self.default_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = IbkrConfig::from_toml("").unwrap();
        assert_eq!(config, IbkrConfig::default());
        assert_eq!(config.bridge.port, 5557);
        assert_eq!(config.market_data.initial_type(), Some(MarketDataType::DelayedFrozen));
    }

    #[test]
    fn test_partial_config() {
        let config = IbkrConfig::from_toml(
            r#"
            [bridge]
            host = "10.0.0.5"
            request_timeout_secs = 5

            [market_data]
            default_type = "live"
            "#,
        )
        .unwrap();

        assert_eq!(config.bridge.host, "10.0.0.5");
        assert_eq!(config.bridge.port, 5557);
        assert_eq!(config.bridge.request_timeout_secs, 5);
        assert_eq!(config.market_data.initial_type(), Some(MarketDataType::Live));
    }

    #[test]
    fn test_data_type_request_can_be_disabled() {
        let config = IbkrConfig::from_toml("[market_data]\nrequest_type_on_connect = false\n").unwrap();
        assert_eq!(config.market_data.initial_type(), None);
    }

    #[test]
    fn test_invalid_config_is_a_parse_error() {
        let result = IbkrConfig::from_toml("[market_data]\ndefault_type = \"sometimes\"\n");
        assert!(matches!(result, Err(DataError::ParseError(_))));
    }

    #[test]
    fn test_load_missing_file() {
        let result = IbkrConfig::load(Path::new("/nonexistent/quoteline.toml"));
        assert!(matches!(result, Err(DataError::IoError(_))));
    }
}
