//! Layered error definitions
//!
//! Categorized by source: consumer / log / config

use thiserror::Error;

/// Unified collaborator error type
#[derive(Debug, Error)]
pub enum ContractError {
    // ===== Consumer Errors =====
    /// Consumer channel rejected a write (closed, reset, write error)
    #[error("consumer '{consumer}' send error: {message}")]
    ConsumerSend { consumer: String, message: String },

    // ===== Log Errors =====
    /// Log/cursor read failure
    #[error("log read error on cursor '{cursor}': {message}")]
    LogRead { cursor: String, message: String },

    // ===== Configuration Errors =====
    /// Configuration parse error
    #[error("config parse error: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration validation error
    #[error("config validation error at '{field}': {message}")]
    ConfigValidation { field: String, message: String },

    // ===== General Errors =====
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl ContractError {
    /// Create consumer send error
    pub fn consumer_send(consumer: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConsumerSend {
            consumer: consumer.into(),
            message: message.into(),
        }
    }

    /// Create log read error
    pub fn log_read(cursor: impl Into<String>, message: impl Into<String>) -> Self {
        Self::LogRead {
            cursor: cursor.into(),
            message: message.into(),
        }
    }

    /// Create configuration parse error
    pub fn config_parse(message: impl Into<String>) -> Self {
        Self::ConfigParse {
            message: message.into(),
            source: None,
        }
    }

    /// Create configuration validation error
    pub fn config_validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            field: field.into(),
            message: message.into(),
        }
    }
}
