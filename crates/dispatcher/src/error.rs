//! Dispatcher error types

use contracts::{ConsumerId, ContractError, Position};
use selector::SelectorError;
use thiserror::Error;

/// Dispatcher-specific errors
#[derive(Debug, Error)]
pub enum DispatcherError {
    /// Selector has no consumer for a key
    #[error("no consumer available")]
    NoConsumerAvailable,

    /// Consumer channel rejected a send
    #[error("send to consumer {consumer_id} failed: {source}")]
    ConsumerSendFailure {
        consumer_id: ConsumerId,
        #[source]
        source: ContractError,
    },

    /// Entry metadata could not be decoded
    #[error("malformed entry at {position}: {message}")]
    MalformedEntry { position: Position, message: String },

    #[error("unknown consumer {0}")]
    UnknownConsumer(ConsumerId),

    /// A consumer with the same name is attached
    #[error("consumer '{0}' is already attached")]
    ConsumerAlreadyAttached(String),

    #[error("dispatcher is closed")]
    Closed,

    /// Dispatcher task is gone
    #[error("dispatcher event channel closed")]
    ChannelClosed,
}

impl From<SelectorError> for DispatcherError {
    fn from(err: SelectorError) -> Self {
        match err {
            SelectorError::NoConsumerAvailable => Self::NoConsumerAvailable,
        }
    }
}
