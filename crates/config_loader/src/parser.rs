//! Configuration parsing
//!
//! TOML is the primary format, JSON is accepted as well.

use contracts::{BrokerConfig, ContractError};

/// Configuration file format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// TOML (preferred)
    Toml,
    /// JSON
    Json,
}

impl ConfigFormat {
    /// Infer format from a file extension
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "toml" => Some(Self::Toml),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Parse TOML configuration
pub fn parse_toml(content: &str) -> Result<BrokerConfig, ContractError> {
    toml::from_str(content).map_err(|e| ContractError::ConfigParse {
        message: format!("TOML parse error: {e}"),
        source: Some(Box::new(e)),
    })
}

/// Parse JSON configuration
pub fn parse_json(content: &str) -> Result<BrokerConfig, ContractError> {
    serde_json::from_str(content).map_err(|e| ContractError::ConfigParse {
        message: format!("JSON parse error: {e}"),
        source: Some(Box::new(e)),
    })
}

/// Parse configuration in the given format
pub fn parse(content: &str, format: ConfigFormat) -> Result<BrokerConfig, ContractError> {
    match format {
        ConfigFormat::Toml => parse_toml(content),
        ConfigFormat::Json => parse_json(content),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_toml_minimal() {
        let content = r#"
[subscription]
topic = "persistent://public/default/orders"
name = "workers"
"#;
        let config = parse_toml(content).unwrap();
        assert_eq!(config.subscription.name, "workers");
        assert_eq!(config.dispatcher.max_read_batch_size, 100);
        assert!(config.rate_limit.is_none());
        assert!(config.simulation.consumers.is_empty());
    }

    #[test]
    fn test_parse_json_nested_sections() {
        let content = r#"{
            "subscription": { "topic": "persistent://public/default/orders", "name": "workers" },
            "dispatcher": { "virtual_nodes": 32 },
            "rate_limit": { "messages_per_period": 500 },
            "simulation": { "consumers": [{ "name": "c1" }, { "name": "c2", "permits": 50 }] },
            "observability": { "format": "compact", "metrics_port": 9100 }
        }"#;
        let config = parse_json(content).unwrap();
        assert_eq!(config.dispatcher.virtual_nodes, 32);
        let limit = config.rate_limit.unwrap();
        assert_eq!(limit.messages_per_period, Some(500));
        assert_eq!(limit.period_ms, 1000);
        assert_eq!(config.simulation.consumers[0].permits, 1000);
        assert_eq!(config.simulation.consumers[1].permits, 50);
        assert_eq!(config.observability.format, contracts::LogFormat::Compact);
        assert_eq!(config.observability.metrics_port, Some(9100));
    }

    #[test]
    fn test_parse_toml_syntax_error() {
        let result = parse_toml("invalid toml [[[");
        assert!(matches!(result, Err(ContractError::ConfigParse { .. })));
    }

    #[test]
    fn test_missing_subscription_is_parse_error() {
        let result = parse_toml("[dispatcher]\nvirtual_nodes = 10\n");
        assert!(matches!(result, Err(ContractError::ConfigParse { .. })));
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(
            ConfigFormat::from_extension("toml"),
            Some(ConfigFormat::Toml)
        );
        assert_eq!(
            ConfigFormat::from_extension("TOML"),
            Some(ConfigFormat::Toml)
        );
        assert_eq!(
            ConfigFormat::from_extension("json"),
            Some(ConfigFormat::Json)
        );
        assert_eq!(ConfigFormat::from_extension("yaml"), None);
    }
}
