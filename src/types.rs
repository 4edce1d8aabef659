use std::time::SystemTime;

/// Opaque broker-side stream name. Only equality and suffix-matching are
/// meaningful to the core; project/environment parsing lives with the
/// processor provider, outside this crate.
pub type StreamName = String;

/// Partition id, unique within a stream.
pub type PartitionId = i32;

/// 64-bit signed position within a partition.
pub type Offset = i64;

/// Sentinel meaning "resume from the broker's stored commit, or earliest if
/// none" — never a real position.
pub const INVALID_OFFSET: Offset = -1001;

/// A record pulled off the broker and handed to a processor host.
#[derive(Debug, Clone)]
pub struct Record {
    pub stream: StreamName,
    pub partition: PartitionId,
    pub offset: Offset,
    pub timestamp: SystemTime,
    pub key: Option<Vec<u8>>,
    pub value: Vec<u8>,
}

/// The unit of assignment: a stream/partition pair with the offset to
/// resume from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignedPartition {
    pub stream: StreamName,
    pub partition: PartitionId,
    pub offset: Offset,
}
