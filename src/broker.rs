use std::time::{Duration, SystemTime};

use crate::error::Result;
use crate::types::{AssignedPartition, Offset, PartitionId, Record, StreamName};

/// Stand-in for "no timeout" when calling `offsets_for_times` during
/// assignment (§4.D.4 step 3: "with an infinite timeout"). `Duration`
/// has no literal infinity, so this is simply very large.
pub const INFINITE_TIMEOUT: Duration = Duration::from_secs(60 * 60 * 24 * 365);

/// Full cluster metadata as needed by subscription refresh: just the set
/// of stream names the broker currently knows about.
#[derive(Debug, Clone, Default)]
pub struct Metadata {
    pub streams: Vec<StreamName>,
}

/// The narrow broker actions that are safe to call back into from inside
/// a rebalance callback (§4.D.3, §4.D.4). Kept separate from
/// [`BrokerClient`] because the implementation that drives `poll` is the
/// same value that ends up handed back to the event sink for the duration
/// of one rebalance — mirroring how real Kafka client libraries pass the
/// consumer handle into their rebalance hooks rather than letting the hook
/// reach for a second reference to the same client.
pub trait BrokerControl {
    fn assign(&mut self, assignment: &[AssignedPartition]) -> Result<()>;
    fn unassign(&mut self) -> Result<()>;

    /// Resolve `(stream, partition, wall_time)` triples to offsets, with
    /// an (implementation-defined, possibly infinite) timeout. One entry
    /// per request, in the same order; each resolves independently to an
    /// offset or an error string — a failure for one partition must not
    /// fail its siblings.
    fn offsets_for_times(
        &mut self,
        requests: &[(StreamName, PartitionId, SystemTime)],
        timeout: Duration,
    ) -> Vec<(StreamName, PartitionId, std::result::Result<Offset, String>)>;
}

/// Component §6's event sink. The consumer group host implements this
/// once and drives it from inside [`BrokerClient::poll`]; every event
/// table row in §4.D.6 is one method here.
pub trait BrokerEvents {
    fn on_message(&mut self, record: Record);
    fn on_partitions_revoked(
        &mut self,
        partitions: Vec<(StreamName, PartitionId)>,
        control: &mut dyn BrokerControl,
    );

    /// `incoming`, already grouped by stream (§4.D.4) — a stream present
    /// with an empty partition vec is the "assignment with zero
    /// partitions" edge case, not a malformed call.
    fn on_partitions_assigned(
        &mut self,
        incoming: Vec<(StreamName, Vec<PartitionId>)>,
        control: &mut dyn BrokerControl,
    );
    fn on_error(&mut self, message: String);
    fn on_consume_error(&mut self, message: String);
    fn on_log(&mut self, level_code: i32, text: String);
    fn on_stats(&mut self, json: String);
    fn on_partition_eof(&mut self, stream: StreamName, partition: PartitionId);
    fn on_offsets_committed(&mut self, result: std::result::Result<(), String>);
}

/// §6's broker client capability set. A concrete adapter (e.g. over
/// `rdkafka`, see `streamhost-host::kafka`) implements this; the core
/// never depends on a wire-protocol crate directly.
pub trait BrokerClient: BrokerControl + Send {
    fn get_metadata(&mut self, all_streams: bool) -> Result<Metadata>;
    fn subscribe(&mut self, streams: &[StreamName]) -> Result<()>;

    /// Block for up to `timeout`, dispatching any events received during
    /// that window onto `events` synchronously, on the caller's thread.
    fn poll(&mut self, timeout: Duration, events: &mut dyn BrokerEvents) -> Result<()>;
}

#[cfg(any(test, feature = "test-support"))]
pub mod fake {
    use super::*;
    use std::collections::VecDeque;

    /// One scripted thing for [`FakeBroker`] to do on its next `poll`
    /// call, or to answer a metadata/offsets-for-times request with.
    pub enum Script {
        Metadata(Vec<StreamName>),
        Revoke(Vec<(StreamName, PartitionId)>),
        Assign(Vec<(StreamName, Vec<PartitionId>)>),
        Message(Record),
        Error(String),
    }

    /// In-memory [`BrokerClient`] test double driven by a scripted event
    /// queue, standing in for a live broker in integration tests (§8's
    /// end-to-end scenarios).
    #[derive(Default)]
    pub struct FakeBroker {
        pub metadata: Metadata,
        pub script: VecDeque<Script>,
        pub offset_answers: std::collections::HashMap<(StreamName, PartitionId), std::result::Result<Offset, String>>,
        pub assigned: Vec<AssignedPartition>,
        pub subscribed: Vec<StreamName>,
        pub unassign_calls: usize,
        pub assign_calls: usize,
    }

    impl FakeBroker {
        pub fn new() -> Self {
            Self::default()
        }
    }

    impl BrokerControl for FakeBroker {
        fn assign(&mut self, assignment: &[AssignedPartition]) -> Result<()> {
            self.assign_calls += 1;
            self.assigned = assignment.to_vec();
            Ok(())
        }

        fn unassign(&mut self) -> Result<()> {
            self.unassign_calls += 1;
            Ok(())
        }

        fn offsets_for_times(
            &mut self,
            requests: &[(StreamName, PartitionId, SystemTime)],
            _timeout: Duration,
        ) -> Vec<(StreamName, PartitionId, std::result::Result<Offset, String>)> {
            requests
                .iter()
                .map(|(s, p, _)| {
                    let answer = self
                        .offset_answers
                        .get(&(s.clone(), *p))
                        .cloned()
                        .unwrap_or(Err("no scripted answer".to_string()));
                    (s.clone(), *p, answer)
                })
                .collect()
        }
    }

    impl BrokerClient for FakeBroker {
        fn get_metadata(&mut self, _all_streams: bool) -> Result<Metadata> {
            Ok(self.metadata.clone())
        }

        fn subscribe(&mut self, streams: &[StreamName]) -> Result<()> {
            self.subscribed = streams.to_vec();
            Ok(())
        }

        fn poll(&mut self, _timeout: Duration, events: &mut dyn BrokerEvents) -> Result<()> {
            if let Some(item) = self.script.pop_front() {
                match item {
                    Script::Metadata(streams) => self.metadata = Metadata { streams },
                    Script::Revoke(partitions) => events.on_partitions_revoked(partitions, self),
                    Script::Assign(partitions) => events.on_partitions_assigned(partitions, self),
                    Script::Message(record) => events.on_message(record),
                    Script::Error(message) => events.on_error(message),
                }
            }
            Ok(())
        }
    }
}
