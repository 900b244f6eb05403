//! `info` command implementation.

use std::collections::BTreeMap;
use std::ops::RangeInclusive;

use anyhow::{Context, Result};
use contracts::{BrokerConfig, ConsumerName};
use selector::{ConsistentHashingSelector, StickyKeyConsumerSelector};
use serde::Serialize;
use tracing::info;

use crate::cli::InfoArgs;

/// Size of the ring's hash space
const HASH_SPACE: f64 = 4_294_967_296.0;

/// Configuration info for JSON output
#[derive(Serialize)]
struct ConfigInfo {
    version: String,
    topic: String,
    subscription: String,
    max_read_batch_size: usize,
    virtual_nodes: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    rate_limit: Option<RateLimitInfo>,
    consumers: Vec<ConsumerShare>,
}

#[derive(Serialize)]
struct RateLimitInfo {
    messages_per_period: Option<u64>,
    bytes_per_period: Option<u64>,
    period_ms: u64,
}

/// Ring ownership of one consumer
#[derive(Serialize)]
struct ConsumerShare {
    name: String,
    permits: u32,
    /// Percentage of the hash space owned
    share: f64,
    range_count: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    ranges: Vec<(u32, u32)>,
}

/// Execute the `info` command
pub fn run_info(args: &InfoArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration info");

    if !args.config.exists() {
        anyhow::bail!("Configuration file not found: {}", args.config.display());
    }

    let config = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    let info = build_config_info(&config, args.ranges);
    if args.json {
        let json =
            serde_json::to_string_pretty(&info).context("Failed to serialize config info")?;
        println!("{}", json);
    } else {
        print_config_info(&info, args.ranges);
    }

    Ok(())
}

/// Place the configured consumers on a ring, ids following config order
fn consumer_shares(config: &BrokerConfig, with_ranges: bool) -> Vec<ConsumerShare> {
    let mut selector = ConsistentHashingSelector::new(config.dispatcher.virtual_nodes);
    for (index, consumer) in config.simulation.consumers.iter().enumerate() {
        selector.add_consumer(index as u64 + 1, &ConsumerName::from(consumer.name.as_str()));
    }
    let mut ranges = selector.consumer_key_hash_ranges();

    config
        .simulation
        .consumers
        .iter()
        .enumerate()
        .map(|(index, consumer)| {
            let owned = ranges.remove(&(index as u64 + 1)).unwrap_or_default();
            ConsumerShare {
                name: consumer.name.clone(),
                permits: consumer.permits,
                share: share_of(&owned),
                range_count: owned.len(),
                ranges: if with_ranges {
                    owned.iter().map(|r| (*r.start(), *r.end())).collect()
                } else {
                    Vec::new()
                },
            }
        })
        .collect()
}

fn share_of(ranges: &[RangeInclusive<u32>]) -> f64 {
    let covered: u64 = ranges
        .iter()
        .map(|r| u64::from(*r.end()) - u64::from(*r.start()) + 1)
        .sum();
    covered as f64 / HASH_SPACE * 100.0
}

fn build_config_info(config: &BrokerConfig, with_ranges: bool) -> ConfigInfo {
    ConfigInfo {
        version: format!("{:?}", config.version),
        topic: config.subscription.topic.clone(),
        subscription: config.subscription.name.clone(),
        max_read_batch_size: config.dispatcher.max_read_batch_size,
        virtual_nodes: config.dispatcher.virtual_nodes,
        rate_limit: config.rate_limit.as_ref().map(|limit| RateLimitInfo {
            messages_per_period: limit.messages_per_period,
            bytes_per_period: limit.bytes_per_period,
            period_ms: limit.period_ms,
        }),
        consumers: consumer_shares(config, with_ranges),
    }
}

fn print_config_info(info: &ConfigInfo, with_ranges: bool) {
    println!("=== Sticky Dispatch Configuration ===\n");

    println!("Subscription");
    println!("   ├─ Version: {}", info.version);
    println!("   ├─ Topic: {}", info.topic);
    println!("   └─ Name: {}", info.subscription);

    println!("\nDispatcher");
    println!("   ├─ Max read batch: {}", info.max_read_batch_size);
    println!("   ├─ Virtual nodes: {}", info.virtual_nodes);
    match &info.rate_limit {
        Some(limit) => println!(
            "   └─ Rate limit: {} msgs / {} bytes per {} ms",
            fmt_limit(limit.messages_per_period),
            fmt_limit(limit.bytes_per_period),
            limit.period_ms
        ),
        None => println!("   └─ Rate limit: unlimited"),
    }

    println!("\nHash ring ({} consumers)", info.consumers.len());
    let mut by_name: BTreeMap<&str, &ConsumerShare> = BTreeMap::new();
    for consumer in &info.consumers {
        by_name.insert(&consumer.name, consumer);
    }
    for (i, consumer) in by_name.values().enumerate() {
        let is_last = i == by_name.len() - 1;
        let prefix = if is_last { "└─" } else { "├─" };
        let child_prefix = if is_last { "   " } else { "│  " };
        println!(
            "   {} {}: {:.2}% of keys over {} ranges ({} permits)",
            prefix, consumer.name, consumer.share, consumer.range_count, consumer.permits
        );
        if with_ranges {
            for (start, end) in &consumer.ranges {
                println!("   {}     [{:#010x}, {:#010x}]", child_prefix, start, end);
            }
        }
    }

    println!();
}

fn fmt_limit(limit: Option<u64>) -> String {
    limit.map_or_else(|| "unlimited".to_string(), |value| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(consumers: &[&str]) -> BrokerConfig {
        let mut content = String::from(
            "[subscription]\ntopic = \"persistent://public/default/t\"\nname = \"s\"\n",
        );
        for name in consumers {
            content.push_str(&format!("[[simulation.consumers]]\nname = \"{name}\"\n"));
        }
        config_loader::ConfigLoader::load_from_str(&content, config_loader::ConfigFormat::Toml)
            .unwrap()
    }

    #[test]
    fn test_shares_cover_hash_space() {
        let shares = consumer_shares(&config(&["c1", "c2", "c3"]), false);
        let total: f64 = shares.iter().map(|s| s.share).sum();
        assert!((total - 100.0).abs() < 1e-6, "total share {total}");
        assert!(shares.iter().all(|s| s.ranges.is_empty()));
    }

    #[test]
    fn test_single_consumer_owns_everything() {
        let shares = consumer_shares(&config(&["only"]), true);
        assert!((shares[0].share - 100.0).abs() < 1e-6);
        assert_eq!(shares[0].ranges.len(), shares[0].range_count);
    }

    #[test]
    fn test_no_consumers() {
        assert!(consumer_shares(&config(&[]), false).is_empty());
    }
}
