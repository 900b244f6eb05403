//! Protocol error types

use thiserror::Error;

/// Entry decode/encode errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Buffer ended before the declared length
    #[error("truncated entry: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    /// Leading magic number did not match
    #[error("bad magic number {0:#06x}")]
    BadMagic(u16),

    /// Metadata could not be (de)serialized
    #[error("metadata codec error: {0}")]
    Metadata(#[from] bincode::Error),
}
