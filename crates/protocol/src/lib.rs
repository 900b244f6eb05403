//! # Protocol
//!
//! Entry layout shared by producers and the dispatcher.
//!
//! An entry is `magic (u16) | metadata length (u32) | metadata | payload`,
//! big-endian, with the metadata encoded by bincode. Control markers are
//! regular entries whose metadata carries a `marker_type`.
//!
//! ```
//! use contracts::{LogEntry, MessageMetadata, ParsedEntry};
//! use protocol::{parse_entry, serialize_metadata_and_payload};
//!
//! let meta = MessageMetadata::new("producer", 1).with_partition_key("k");
//! let data = serialize_metadata_and_payload(&meta, b"hello").unwrap();
//! let parsed = parse_entry(&LogEntry::new(1, 1, data)).unwrap();
//! assert!(matches!(parsed, ParsedEntry::Payload { .. }));
//! ```

mod codec;
mod error;
pub mod markers;
mod sticky_key;

pub use codec::{parse_entry, parse_message_metadata, serialize_metadata_and_payload, MAGIC};
pub use error::ProtocolError;
pub use sticky_key::{sticky_key, NONE_KEY};
