//! Sticky key extraction

use contracts::MessageMetadata;

/// Key used for entries that carry neither ordering nor partition key
pub const NONE_KEY: &[u8] = b"NONE_KEY";

/// Routing key of an entry
///
/// Ordering key first, then partition key, then [`NONE_KEY`].
pub fn sticky_key(metadata: &MessageMetadata) -> &[u8] {
    if let Some(key) = metadata.ordering_key.as_deref().filter(|k| !k.is_empty()) {
        return key;
    }
    if let Some(key) = metadata.partition_key.as_deref().filter(|k| !k.is_empty()) {
        return key.as_bytes();
    }
    NONE_KEY
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering_key_wins() {
        let meta = MessageMetadata::new("p", 1)
            .with_partition_key("partition")
            .with_ordering_key(b"ordering".to_vec());
        assert_eq!(sticky_key(&meta), b"ordering");
    }

    #[test]
    fn test_partition_key_fallback() {
        let meta = MessageMetadata::new("p", 1).with_partition_key("partition");
        assert_eq!(sticky_key(&meta), b"partition");
    }

    #[test]
    fn test_missing_or_empty_key_uses_none_key() {
        assert_eq!(sticky_key(&MessageMetadata::new("p", 1)), NONE_KEY);
        let meta = MessageMetadata::new("p", 1).with_partition_key("");
        assert_eq!(sticky_key(&meta), NONE_KEY);
    }
}
