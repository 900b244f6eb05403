//! `validate` command implementation.

use anyhow::{Context, Result};
use contracts::BrokerConfig;
use serde::Serialize;
use tracing::info;

use crate::cli::ValidateArgs;

/// Validation result for JSON output
#[derive(Serialize)]
struct ValidationResult {
    valid: bool,
    config_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warnings: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<ConfigSummary>,
}

#[derive(Serialize)]
struct ConfigSummary {
    version: String,
    topic: String,
    subscription: String,
    virtual_nodes: u32,
    max_read_batch_size: usize,
    rate_limited: bool,
    consumer_count: usize,
}

/// Execute the `validate` command
pub fn run_validate(args: &ValidateArgs) -> Result<()> {
    info!(config = %args.config.display(), "Validating configuration");

    let result = validate_config(args);

    if args.json {
        let json = serde_json::to_string_pretty(&result)
            .context("Failed to serialize validation result")?;
        println!("{}", json);
    } else {
        print_validation_result(&result);
    }

    if result.valid {
        Ok(())
    } else {
        anyhow::bail!("Configuration validation failed")
    }
}

fn validate_config(args: &ValidateArgs) -> ValidationResult {
    let config_path = args.config.display().to_string();

    if !args.config.exists() {
        return ValidationResult {
            valid: false,
            config_path,
            error: Some(format!("File not found: {}", args.config.display())),
            warnings: None,
            summary: None,
        };
    }

    match config_loader::ConfigLoader::load_from_path(&args.config) {
        Ok(config) => {
            let warnings = collect_warnings(&config);
            ValidationResult {
                valid: true,
                config_path,
                error: None,
                warnings: if warnings.is_empty() {
                    None
                } else {
                    Some(warnings)
                },
                summary: Some(ConfigSummary {
                    version: format!("{:?}", config.version),
                    topic: config.subscription.topic.clone(),
                    subscription: config.subscription.name.clone(),
                    virtual_nodes: config.dispatcher.virtual_nodes,
                    max_read_batch_size: config.dispatcher.max_read_batch_size,
                    rate_limited: config.rate_limit.is_some(),
                    consumer_count: config.simulation.consumers.len(),
                }),
            }
        }
        Err(e) => ValidationResult {
            valid: false,
            config_path,
            error: Some(e.to_string()),
            warnings: None,
            summary: None,
        },
    }
}

/// Collect configuration warnings (non-fatal issues)
fn collect_warnings(config: &BrokerConfig) -> Vec<String> {
    let mut warnings = Vec::new();
    let simulation = &config.simulation;

    if simulation.consumers.is_empty() {
        warnings.push("No simulated consumers configured - simulate will refuse to run".to_string());
    }

    for consumer in &simulation.consumers {
        if consumer.permits < simulation.batch_size {
            warnings.push(format!(
                "Consumer '{}' has {} permits, below the batch size of {} - its entries can never be sent",
                consumer.name, consumer.permits, simulation.batch_size
            ));
        }
    }

    if simulation.keys < simulation.consumers.len() as u32 {
        warnings.push(format!(
            "{} keys for {} consumers - some consumers will stay idle",
            simulation.keys,
            simulation.consumers.len()
        ));
    }

    if config.dispatcher.virtual_nodes < 10 && simulation.consumers.len() > 1 {
        warnings.push(format!(
            "dispatcher.virtual_nodes = {} - key distribution will be uneven",
            config.dispatcher.virtual_nodes
        ));
    }

    warnings
}

fn print_validation_result(result: &ValidationResult) {
    if result.valid {
        println!("✓ Configuration is valid: {}", result.config_path);

        if let Some(ref summary) = result.summary {
            println!("\n  Version: {}", summary.version);
            println!("  Topic: {}", summary.topic);
            println!("  Subscription: {}", summary.subscription);
            println!("  Virtual nodes: {}", summary.virtual_nodes);
            println!("  Max read batch: {}", summary.max_read_batch_size);
            println!("  Rate limited: {}", summary.rate_limited);
            println!("  Consumers: {}", summary.consumer_count);
        }

        if let Some(ref warnings) = result.warnings {
            println!("\n⚠ Warnings:");
            for warning in warnings {
                println!("  - {}", warning);
            }
        }
    } else {
        println!("✗ Configuration is invalid: {}", result.config_path);
        if let Some(ref error) = result.error {
            println!("\n  Error: {}", error);
        }
    }
}
