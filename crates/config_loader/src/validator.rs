//! Configuration validation
//!
//! Rules:
//! - field ranges declared on the config types (`validator` derives)
//! - topic is a persistent topic name
//! - a configured rate limit bounds messages or bytes
//! - simulated consumer names are unique

use std::collections::HashSet;

use contracts::{BrokerConfig, ContractError};
use ::validator::{Validate, ValidationErrors, ValidationErrorsKind};

const PERSISTENT_SCHEME: &str = "persistent://";

/// Validate a parsed BrokerConfig
///
/// Returns the first error encountered, or Ok(()).
pub fn validate(config: &BrokerConfig) -> Result<(), ContractError> {
    validate_ranges(config)?;
    validate_topic(config)?;
    validate_rate_limit(config)?;
    validate_consumer_names(config)?;
    Ok(())
}

fn validate_ranges(config: &BrokerConfig) -> Result<(), ContractError> {
    config.validate().map_err(|errors| {
        let (field, message) = first_error(&errors, "")
            .unwrap_or_else(|| ("config".to_string(), errors.to_string()));
        ContractError::config_validation(field, message)
    })
}

/// Dotted path and message of the first failing field, keys visited in order
fn first_error(errors: &ValidationErrors, prefix: &str) -> Option<(String, String)> {
    let mut fields: Vec<_> = errors.errors().iter().collect();
    fields.sort_by(|a, b| a.0.cmp(b.0));

    fields.into_iter().find_map(|(name, kind)| {
        let path = if prefix.is_empty() {
            name.to_string()
        } else {
            format!("{prefix}.{name}")
        };
        match kind {
            ValidationErrorsKind::Field(list) => list.first().map(|error| {
                let message = error
                    .message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| format!("failed '{}' check", error.code));
                (path, message)
            }),
            ValidationErrorsKind::Struct(inner) => first_error(inner, &path),
            ValidationErrorsKind::List(items) => items
                .iter()
                .find_map(|(index, inner)| first_error(inner, &format!("{path}[{index}]"))),
        }
    })
}

fn validate_topic(config: &BrokerConfig) -> Result<(), ContractError> {
    let topic = &config.subscription.topic;
    let Some(rest) = topic.strip_prefix(PERSISTENT_SCHEME) else {
        return Err(ContractError::config_validation(
            "subscription.topic",
            format!("topic '{topic}' must start with '{PERSISTENT_SCHEME}'"),
        ));
    };
    if rest.is_empty() {
        return Err(ContractError::config_validation(
            "subscription.topic",
            "topic name is empty",
        ));
    }
    Ok(())
}

fn validate_rate_limit(config: &BrokerConfig) -> Result<(), ContractError> {
    if let Some(limit) = &config.rate_limit {
        if limit.messages_per_period.is_none() && limit.bytes_per_period.is_none() {
            return Err(ContractError::config_validation(
                "rate_limit",
                "set messages_per_period or bytes_per_period, or remove the section",
            ));
        }
    }
    Ok(())
}

fn validate_consumer_names(config: &BrokerConfig) -> Result<(), ContractError> {
    let mut seen = HashSet::new();
    for consumer in &config.simulation.consumers {
        if !seen.insert(consumer.name.as_str()) {
            return Err(ContractError::config_validation(
                format!("simulation.consumers[name={}]", consumer.name),
                "duplicate consumer name",
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_toml;

    fn config(extra: &str) -> BrokerConfig {
        let content = format!(
            "[subscription]\ntopic = \"persistent://public/default/orders\"\nname = \"workers\"\n{extra}"
        );
        parse_toml(&content).unwrap()
    }

    fn field_of(err: ContractError) -> String {
        match err {
            ContractError::ConfigValidation { field, .. } => field,
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_valid_config() {
        let config = config(
            r#"
[[simulation.consumers]]
name = "c1"

[[simulation.consumers]]
name = "c2"
"#,
        );
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_range_violation_reports_nested_path() {
        let config = config("[dispatcher]\nmax_read_batch_size = 0\n");
        let field = field_of(validate(&config).unwrap_err());
        assert_eq!(field, "dispatcher.max_read_batch_size");
    }

    #[test]
    fn test_list_violation_reports_index() {
        let config = config(
            r#"
[[simulation.consumers]]
name = "c1"
permits = 0
"#,
        );
        let field = field_of(validate(&config).unwrap_err());
        assert_eq!(field, "simulation.consumers[0].permits");
    }

    #[test]
    fn test_non_persistent_topic_rejected() {
        let mut config = config("");
        config.subscription.topic = "non-persistent://public/default/orders".to_string();
        assert_eq!(field_of(validate(&config).unwrap_err()), "subscription.topic");

        config.subscription.topic = PERSISTENT_SCHEME.to_string();
        assert_eq!(field_of(validate(&config).unwrap_err()), "subscription.topic");
    }

    #[test]
    fn test_empty_rate_limit_rejected() {
        let config = config("[rate_limit]\nperiod_ms = 500\n");
        assert_eq!(field_of(validate(&config).unwrap_err()), "rate_limit");
    }

    #[test]
    fn test_duplicate_consumer_rejected() {
        let config = config(
            r#"
[[simulation.consumers]]
name = "c1"

[[simulation.consumers]]
name = "c1"
"#,
        );
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("duplicate consumer name"));
    }
}
