//! # Contracts
//!
//! Frozen interface contracts shared by every crate of the dispatch core:
//! log positions and entries, message metadata, the collaborator traits the
//! dispatcher is constructed with, and configuration types.
//! Business crates depend on this crate only; reverse dependencies are prohibited.
//!
//! ## Ordering Model
//! - Log entries are addressed by `Position` (ledger id, entry id) and are
//!   always handled in ascending position order
//! - Routing is keyed by the sticky key carried in `MessageMetadata`

mod config;
mod consumer;
mod cursor;
mod error;
mod message;
mod position;
mod rate_limit;
mod redelivery;

pub use config::*;
pub use consumer::*;
pub use cursor::{LocalLogReader, LogReader, ManagedCursor, ReadType};
pub use error::*;
pub use message::*;
pub use position::*;
pub use rate_limit::*;
pub use redelivery::*;
