//! Error types for CLI operations.

use dispatcher::DispatcherError;
use protocol::ProtocolError;
use thiserror::Error;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    /// Simulated workload could not be published
    #[error("Failed to build workload: {0}")]
    Workload(#[from] ProtocolError),

    /// Dispatcher rejected an operation
    #[error("Dispatcher error: {0}")]
    Dispatcher(#[from] DispatcherError),

    /// Not every entry was acknowledged in time
    #[error("Simulation timed out after {secs}s with {unacknowledged} unacknowledged entries")]
    SimulationTimeout { secs: u64, unacknowledged: usize },

    /// Consumer task ended abnormally
    #[error("Consumer task '{consumer}' failed: {message}")]
    ConsumerTask { consumer: String, message: String },

    /// Delivery broke a dispatch guarantee
    #[error("Verification failed: {violations} violation(s)")]
    VerificationFailed { violations: usize },
}

impl CliError {
    pub fn consumer_task(consumer: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConsumerTask {
            consumer: consumer.into(),
            message: message.into(),
        }
    }
}

/// Result type alias for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;
