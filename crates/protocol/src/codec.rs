//! Metadata + payload framing

use bytes::{Buf, BufMut, Bytes, BytesMut};
use contracts::{LogEntry, MessageMetadata, ParsedEntry};

use crate::ProtocolError;

/// Leading magic number of every entry
pub const MAGIC: u16 = 0x0e01;

const HEADER_LEN: usize = 2 + 4;

/// Frame metadata and payload into one entry buffer
pub fn serialize_metadata_and_payload(
    metadata: &MessageMetadata,
    payload: &[u8],
) -> Result<Bytes, ProtocolError> {
    let encoded = bincode::serialize(metadata)?;
    let mut buf = BytesMut::with_capacity(HEADER_LEN + encoded.len() + payload.len());
    buf.put_u16(MAGIC);
    buf.put_u32(encoded.len() as u32);
    buf.put_slice(&encoded);
    buf.put_slice(payload);
    Ok(buf.freeze())
}

/// Split an entry buffer into metadata and payload
///
/// The payload shares the entry's buffer.
pub fn parse_message_metadata(data: &Bytes) -> Result<(MessageMetadata, Bytes), ProtocolError> {
    if data.len() < HEADER_LEN {
        return Err(ProtocolError::Truncated {
            needed: HEADER_LEN,
            available: data.len(),
        });
    }

    let mut buf = data.clone();
    let magic = buf.get_u16();
    if magic != MAGIC {
        return Err(ProtocolError::BadMagic(magic));
    }

    let metadata_len = buf.get_u32() as usize;
    if buf.remaining() < metadata_len {
        return Err(ProtocolError::Truncated {
            needed: HEADER_LEN + metadata_len,
            available: data.len(),
        });
    }

    let metadata_bytes = buf.split_to(metadata_len);
    let metadata: MessageMetadata = bincode::deserialize(&metadata_bytes)?;
    Ok((metadata, buf))
}

/// Decode an entry into payload or marker
pub fn parse_entry(entry: &LogEntry) -> Result<ParsedEntry, ProtocolError> {
    let (metadata, payload) = parse_message_metadata(&entry.data)?;
    Ok(match metadata.marker_type {
        Some(kind) => ParsedEntry::Marker {
            kind,
            body: payload,
        },
        None => ParsedEntry::Payload { metadata, payload },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::MarkerType;

    fn metadata() -> MessageMetadata {
        MessageMetadata::new("testProducer", 7)
            .with_partition_key("testKey")
            .with_publish_time(1_700_000_000_000)
    }

    #[test]
    fn test_payload_shares_entry_buffer() {
        let data = serialize_metadata_and_payload(&metadata(), b"message1").unwrap();
        let (meta, payload) = parse_message_metadata(&data).unwrap();
        assert_eq!(meta.sequence_id, 7);
        assert_eq!(meta.partition_key.as_deref(), Some("testKey"));
        assert_eq!(&payload[..], b"message1");
        assert_eq!(
            payload.as_ptr(),
            data[data.len() - payload.len()..].as_ptr()
        );
    }

    #[test]
    fn test_marker_metadata_yields_marker_variant() {
        let mut meta = metadata();
        meta.marker_type = Some(MarkerType::TxnAbort);
        let data = serialize_metadata_and_payload(&meta, b"").unwrap();
        let parsed = parse_entry(&LogEntry::new(1, 1, data)).unwrap();
        assert!(matches!(
            parsed,
            ParsedEntry::Marker {
                kind: MarkerType::TxnAbort,
                ..
            }
        ));
    }

    #[test]
    fn test_short_buffer_is_truncated() {
        let err = parse_message_metadata(&Bytes::from_static(&[0x0e])).unwrap_err();
        assert!(matches!(err, ProtocolError::Truncated { needed: 6, .. }));
    }

    #[test]
    fn test_wrong_magic() {
        let err = parse_message_metadata(&Bytes::from_static(&[0xca, 0xfe, 0, 0, 0, 0]))
            .unwrap_err();
        assert!(matches!(err, ProtocolError::BadMagic(0xcafe)));
    }

    #[test]
    fn test_declared_length_past_end() {
        let data = Bytes::from_static(&[0x0e, 0x01, 0, 0, 0, 64, 1, 2, 3]);
        let err = parse_message_metadata(&data).unwrap_err();
        assert!(matches!(err, ProtocolError::Truncated { needed: 70, .. }));
    }

    #[test]
    fn test_garbage_metadata_is_codec_error() {
        let data = Bytes::from_static(&[0x0e, 0x01, 0, 0, 0, 2, 0xff, 0xff]);
        let err = parse_message_metadata(&data).unwrap_err();
        assert!(matches!(err, ProtocolError::Metadata(_)));
    }
}
