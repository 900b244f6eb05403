//! `simulate` command implementation.

use anyhow::{Context, Result};
use contracts::BrokerConfig;
use std::time::Duration;
use tracing::{info, warn};

use crate::cli::SimulateArgs;
use crate::simulation::{Simulation, SimulationSettings};

/// Execute the `simulate` command
pub async fn run_simulate(args: &SimulateArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration");

    if !args.config.exists() {
        anyhow::bail!("Configuration file not found: {}", args.config.display());
    }

    let mut config = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    apply_overrides(&mut config, args);
    config_loader::ConfigLoader::validate(&config).context("Invalid command-line override")?;

    if config.simulation.consumers.is_empty() {
        anyhow::bail!("No simulated consumers configured (simulation.consumers)");
    }

    info!(
        subscription = %config.subscription.name,
        consumers = config.simulation.consumers.len(),
        messages = config.simulation.messages,
        keys = config.simulation.keys,
        rate_limited = config.rate_limit.is_some(),
        "Configuration loaded"
    );

    if args.dry_run {
        info!("Dry run mode - configuration is valid, exiting");
        print_config_summary(&config);
        return Ok(());
    }

    let metrics_port = args.metrics_port.or(config.observability.metrics_port);
    if let Some(port) = metrics_port.filter(|port| *port != 0) {
        observability::init_metrics_only(port)?;
        info!("Metrics endpoint available on port {}", port);
    }

    let simulation = Simulation::new(SimulationSettings {
        timeout: Duration::from_secs(config.simulation.timeout_secs),
        config,
    });

    info!("Starting simulation...");

    let report = tokio::select! {
        result = simulation.run() => result.context("Simulation failed")?,
        _ = tokio::signal::ctrl_c() => {
            warn!("Received Ctrl+C, stopping simulation...");
            return Ok(());
        }
    };

    if args.json {
        println!(
            "{}",
            report.to_json().context("Failed to serialize report")?
        );
    } else {
        report.print_summary();
    }

    if report.is_ok() {
        info!(
            messages = report.summary.total_messages,
            sends = report.summary.total_sends,
            "Simulation completed successfully"
        );
        Ok(())
    } else {
        Err(crate::error::CliError::VerificationFailed {
            violations: report.violations.len(),
        }
        .into())
    }
}

fn apply_overrides(config: &mut BrokerConfig, args: &SimulateArgs) {
    if let Some(messages) = args.messages {
        info!(messages, "Overriding message count from CLI");
        config.simulation.messages = messages;
    }
    if let Some(keys) = args.keys {
        info!(keys, "Overriding key count from CLI");
        config.simulation.keys = keys;
    }
    if let Some(timeout) = args.timeout {
        info!(timeout, "Overriding timeout from CLI");
        config.simulation.timeout_secs = timeout;
    }
}

/// Print configuration summary for dry-run mode
fn print_config_summary(config: &BrokerConfig) {
    println!("\n=== Configuration Summary ===\n");
    println!("Subscription:");
    println!("  Topic: {}", config.subscription.topic);
    println!("  Name: {}", config.subscription.name);

    println!("\nDispatcher:");
    println!("  Max read batch: {}", config.dispatcher.max_read_batch_size);
    println!("  Virtual nodes: {}", config.dispatcher.virtual_nodes);
    println!(
        "  Redelivery counting: {}",
        config.dispatcher.redelivery_tracker_enabled
    );

    if let Some(limit) = &config.rate_limit {
        println!("\nRate limit (per {} ms):", limit.period_ms);
        if let Some(messages) = limit.messages_per_period {
            println!("  Messages: {}", messages);
        }
        if let Some(bytes) = limit.bytes_per_period {
            println!("  Bytes: {}", bytes);
        }
    }

    let simulation = &config.simulation;
    println!("\nWorkload:");
    println!(
        "  {} entries x {} messages over {} keys",
        simulation.messages, simulation.batch_size, simulation.keys
    );
    if simulation.marker_interval > 0 {
        println!("  Marker every {} entries", simulation.marker_interval);
    }

    println!("\nConsumers ({}):", simulation.consumers.len());
    for consumer in &simulation.consumers {
        println!("  - {} ({} permits)", consumer.name, consumer.permits);
    }

    println!();
}
