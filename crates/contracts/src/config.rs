//! BrokerConfig - Config Loader output
//!
//! Describes one subscription's dispatcher: selector sizing, read batching,
//! optional rate limit, and the simulated workload used by the CLI.

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Configuration version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConfigVersion {
    #[default]
    V1,
}

/// Complete dispatcher configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct BrokerConfig {
    /// Configuration version
    #[serde(default)]
    pub version: ConfigVersion,

    /// Subscription being dispatched
    #[validate(nested)]
    pub subscription: SubscriptionConfig,

    /// Dispatcher tuning
    #[serde(default)]
    #[validate(nested)]
    pub dispatcher: DispatcherConfig,

    /// Dispatch rate limit (absent = unlimited)
    #[serde(default)]
    #[validate(nested)]
    pub rate_limit: Option<RateLimitConfig>,

    /// Simulated workload
    #[serde(default)]
    #[validate(nested)]
    pub simulation: SimulationConfig,

    /// Logging and metrics exporter
    #[serde(default)]
    pub observability: LoggingConfig,
}

/// Subscription identity
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SubscriptionConfig {
    /// Topic name (e.g., "persistent://public/default/orders")
    #[validate(length(min = 1))]
    pub topic: String,

    /// Subscription name
    #[validate(length(min = 1))]
    pub name: String,
}

/// Dispatcher configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DispatcherConfig {
    /// Upper bound on entries requested per read
    #[serde(default = "default_max_read_batch_size")]
    #[validate(range(min = 1, max = 10_000))]
    pub max_read_batch_size: usize,

    /// Virtual nodes per consumer on the hash ring
    #[serde(default = "default_virtual_nodes")]
    #[validate(range(min = 1, max = 10_000))]
    pub virtual_nodes: u32,

    /// Count redeliveries per message
    #[serde(default = "default_true")]
    pub redelivery_tracker_enabled: bool,

    /// Capacity of the dispatcher task's event queue
    #[serde(default = "default_event_queue_capacity")]
    #[validate(range(min = 1))]
    pub event_queue_capacity: usize,
}

fn default_max_read_batch_size() -> usize {
    100
}

fn default_virtual_nodes() -> u32 {
    100
}

fn default_true() -> bool {
    true
}

fn default_event_queue_capacity() -> usize {
    1024
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_read_batch_size: default_max_read_batch_size(),
            virtual_nodes: default_virtual_nodes(),
            redelivery_tracker_enabled: true,
            event_queue_capacity: default_event_queue_capacity(),
        }
    }
}

/// Fixed-window dispatch rate
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RateLimitConfig {
    /// Messages allowed per period (None = no message limit)
    #[serde(default)]
    #[validate(range(min = 1))]
    pub messages_per_period: Option<u64>,

    /// Bytes allowed per period (None = no byte limit)
    #[serde(default)]
    #[validate(range(min = 1))]
    pub bytes_per_period: Option<u64>,

    /// Period length in milliseconds
    #[serde(default = "default_period_ms")]
    #[validate(range(min = 1))]
    pub period_ms: u64,
}

fn default_period_ms() -> u64 {
    1000
}

/// Simulated workload for the `simulate` command
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SimulationConfig {
    /// Attached consumers
    #[serde(default)]
    #[validate(nested)]
    pub consumers: Vec<SimulatedConsumerConfig>,

    /// Payload entries to publish
    #[serde(default = "default_messages")]
    pub messages: u64,

    /// Distinct sticky keys
    #[serde(default = "default_keys")]
    #[validate(range(min = 1))]
    pub keys: u32,

    /// Insert a marker every N payload entries (0 = no markers)
    #[serde(default)]
    pub marker_interval: u64,

    /// Logical messages per entry
    #[serde(default = "default_batch_size")]
    #[validate(range(min = 1))]
    pub batch_size: u32,

    /// Give up after this many seconds
    #[serde(default = "default_timeout_secs")]
    #[validate(range(min = 1))]
    pub timeout_secs: u64,
}

fn default_messages() -> u64 {
    1000
}

fn default_keys() -> u32 {
    100
}

fn default_batch_size() -> u32 {
    1
}

fn default_timeout_secs() -> u64 {
    10
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            consumers: Vec::new(),
            messages: default_messages(),
            keys: default_keys(),
            marker_interval: 0,
            batch_size: default_batch_size(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON structured logs
    #[default]
    Json,
    /// Human-readable multi-line
    Pretty,
    /// Single line
    Compact,
}

/// Logging and metrics exporter settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,

    /// Filter used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Prometheus listener port (None = disabled)
    #[serde(default)]
    pub metrics_port: Option<u16>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Json,
            level: default_log_level(),
            metrics_port: None,
        }
    }
}

/// One simulated consumer
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SimulatedConsumerConfig {
    /// Consumer name (ring identity)
    #[validate(length(min = 1))]
    pub name: String,

    /// Receiver queue size, granted as permits
    #[serde(default = "default_permits")]
    #[validate(range(min = 1))]
    pub permits: u32,
}

fn default_permits() -> u32 {
    1000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatcher_defaults() {
        let config = DispatcherConfig::default();
        assert_eq!(config.max_read_batch_size, 100);
        assert_eq!(config.virtual_nodes, 100);
        assert!(config.redelivery_tracker_enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_range_validation() {
        let config = DispatcherConfig {
            max_read_batch_size: 0,
            ..Default::default()
        };
        let errors = config.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("max_read_batch_size"));
    }

    #[test]
    fn test_nested_validation() {
        let config = BrokerConfig {
            version: ConfigVersion::V1,
            subscription: SubscriptionConfig {
                topic: "persistent://public/default/t".to_string(),
                name: String::new(),
            },
            dispatcher: DispatcherConfig::default(),
            rate_limit: None,
            simulation: SimulationConfig::default(),
            observability: LoggingConfig::default(),
        };
        assert!(config.validate().is_err());
    }
}
