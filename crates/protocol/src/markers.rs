//! Control marker entries
//!
//! Markers share the entry layout with payloads; the metadata carries the
//! marker type and the payload region carries a bincode-encoded body.

use bytes::Bytes;
use contracts::{MarkerType, MessageMetadata, Position};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::{serialize_metadata_and_payload, ProtocolError};

/// Producer name stamped on every marker
pub const MARKER_PRODUCER_NAME: &str = "marker";

/// Position of a subscription in one cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterPosition {
    pub cluster: String,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicatedSubscriptionsSnapshotRequest {
    pub snapshot_id: String,
    pub source_cluster: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicatedSubscriptionsSnapshotResponse {
    pub snapshot_id: String,
    pub cluster: ClusterPosition,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicatedSubscriptionsSnapshot {
    pub snapshot_id: String,
    pub local_position: Position,
    pub clusters: Vec<ClusterPosition>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicatedSubscriptionsUpdate {
    pub subscription_name: String,
    pub clusters: Vec<ClusterPosition>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxnMarker {
    pub txn_id_most_bits: u64,
    pub txn_id_least_bits: u64,
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

fn new_marker<T: Serialize>(
    kind: MarkerType,
    replicated_from: Option<&str>,
    sequence_id: u64,
    body: &T,
) -> Result<Bytes, ProtocolError> {
    let mut metadata =
        MessageMetadata::new(MARKER_PRODUCER_NAME, sequence_id).with_publish_time(now_millis());
    metadata.marker_type = Some(kind);
    metadata.replicated_from = replicated_from.map(str::to_string);
    let body = bincode::serialize(body)?;
    serialize_metadata_and_payload(&metadata, &body)
}

pub fn new_replicated_subscriptions_snapshot_request(
    snapshot_id: &str,
    source_cluster: &str,
) -> Result<Bytes, ProtocolError> {
    let body = ReplicatedSubscriptionsSnapshotRequest {
        snapshot_id: snapshot_id.to_string(),
        source_cluster: source_cluster.to_string(),
    };
    new_marker(
        MarkerType::ReplicatedSubscriptionSnapshotRequest,
        Some(source_cluster),
        0,
        &body,
    )
}

pub fn new_replicated_subscriptions_snapshot_response(
    snapshot_id: &str,
    replier_cluster: &str,
    position: Position,
) -> Result<Bytes, ProtocolError> {
    let body = ReplicatedSubscriptionsSnapshotResponse {
        snapshot_id: snapshot_id.to_string(),
        cluster: ClusterPosition {
            cluster: replier_cluster.to_string(),
            position,
        },
    };
    new_marker(
        MarkerType::ReplicatedSubscriptionSnapshotResponse,
        Some(replier_cluster),
        0,
        &body,
    )
}

pub fn new_replicated_subscriptions_snapshot(
    snapshot_id: &str,
    local_position: Position,
    clusters: Vec<ClusterPosition>,
) -> Result<Bytes, ProtocolError> {
    let body = ReplicatedSubscriptionsSnapshot {
        snapshot_id: snapshot_id.to_string(),
        local_position,
        clusters,
    };
    new_marker(MarkerType::ReplicatedSubscriptionSnapshot, None, 0, &body)
}

pub fn new_replicated_subscriptions_update(
    subscription_name: &str,
    clusters: Vec<ClusterPosition>,
) -> Result<Bytes, ProtocolError> {
    let body = ReplicatedSubscriptionsUpdate {
        subscription_name: subscription_name.to_string(),
        clusters,
    };
    new_marker(MarkerType::ReplicatedSubscriptionUpdate, None, 0, &body)
}

pub fn new_txn_commit_marker(sequence_id: u64, txn: TxnMarker) -> Result<Bytes, ProtocolError> {
    new_marker(MarkerType::TxnCommit, None, sequence_id, &txn)
}

pub fn new_txn_abort_marker(sequence_id: u64, txn: TxnMarker) -> Result<Bytes, ProtocolError> {
    new_marker(MarkerType::TxnAbort, None, sequence_id, &txn)
}

/// Decode a marker body
pub fn parse_marker_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, ProtocolError> {
    Ok(bincode::deserialize(body)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse_entry;
    use contracts::{LogEntry, ParsedEntry};

    #[test]
    fn test_snapshot_request_marker() {
        let data =
            new_replicated_subscriptions_snapshot_request("testSnapshotId", "testSourceCluster")
                .unwrap();
        let parsed = parse_entry(&LogEntry::new(1, 1, data)).unwrap();
        let ParsedEntry::Marker { kind, body } = parsed else {
            panic!("expected marker");
        };
        assert_eq!(kind, MarkerType::ReplicatedSubscriptionSnapshotRequest);

        let request: ReplicatedSubscriptionsSnapshotRequest = parse_marker_body(&body).unwrap();
        assert_eq!(request.snapshot_id, "testSnapshotId");
        assert_eq!(request.source_cluster, "testSourceCluster");
    }

    #[test]
    fn test_marker_records_source_cluster() {
        let data = new_replicated_subscriptions_snapshot_response(
            "s1",
            "us-west",
            Position::new(4, 2),
        )
        .unwrap();
        let (meta, body) = crate::parse_message_metadata(&data).unwrap();
        assert_eq!(meta.replicated_from.as_deref(), Some("us-west"));
        assert_eq!(meta.producer_name, MARKER_PRODUCER_NAME);

        let response: ReplicatedSubscriptionsSnapshotResponse = parse_marker_body(&body).unwrap();
        assert_eq!(response.cluster.position, Position::new(4, 2));
    }

    #[test]
    fn test_txn_markers() {
        let txn = TxnMarker {
            txn_id_most_bits: 1,
            txn_id_least_bits: 9,
        };
        for (data, expected) in [
            (new_txn_commit_marker(3, txn).unwrap(), MarkerType::TxnCommit),
            (new_txn_abort_marker(3, txn).unwrap(), MarkerType::TxnAbort),
        ] {
            match parse_entry(&LogEntry::new(1, 1, data)).unwrap() {
                ParsedEntry::Marker { kind, body } => {
                    assert_eq!(kind, expected);
                    assert_eq!(parse_marker_body::<TxnMarker>(&body).unwrap(), txn);
                }
                other => panic!("expected marker, got {other:?}"),
            }
        }
    }
}
