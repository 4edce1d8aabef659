//! §10.4's default runtime backend: a thin adapter from `rdkafka`'s
//! `BaseConsumer` onto `streamhost_core::broker::{BrokerClient, BrokerEvents}`.
//!
//! All `rdkafka` types stop at the edge of this module — nothing above it
//! (the group host, the processors) ever names an `rdkafka` type.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rdkafka::client::ClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{
    BaseConsumer, Consumer, ConsumerContext, Rebalance,
};
use rdkafka::error::KafkaResult;
use rdkafka::message::Message;
use rdkafka::statistics::Statistics;
use rdkafka::topic_partition_list::TopicPartitionList;
use rdkafka::util::Timeout;
use rdkafka::Offset as RdOffset;

use streamhost_core::broker::{BrokerClient, BrokerControl, BrokerEvents, Metadata};
use streamhost_core::error::{HostError, Result};
use streamhost_core::types::{AssignedPartition, Offset, PartitionId, Record, StreamName};

/// One thing the client-level `ConsumerContext`/`ClientContext` callbacks
/// observed, queued for the poll thread to translate into a
/// [`BrokerEvents`] call once `poll()` returns control to it. librdkafka
/// invokes these callbacks synchronously from inside `poll()`, but only
/// with `&self` (not `&mut`), so they cannot call `BrokerEvents` directly —
/// the queue bridges that gap without a lock held across the `poll` call.
enum RelayEvent {
    Revoked(Vec<(StreamName, PartitionId)>),
    Assigned(Vec<(StreamName, Vec<PartitionId>)>),
    Error(String),
    Log(i32, String),
    Stats(String),
    OffsetsCommitted(std::result::Result<(), String>),
}

#[derive(Clone, Default)]
struct RelayQueue(Arc<Mutex<VecDeque<RelayEvent>>>);

impl RelayQueue {
    fn push(&self, event: RelayEvent) {
        self.0.lock().unwrap().push_back(event);
    }

    fn drain(&self) -> Vec<RelayEvent> {
        self.0.lock().unwrap().drain(..).collect()
    }
}

/// librdkafka syslog-style level codes, matched against §4.D.6's table by
/// `streamhost_core::log::level_from_broker_code`.
fn rdkafka_log_level_code(level: rdkafka::config::RDKafkaLogLevel) -> i32 {
    level as i32
}

struct RelayContext {
    queue: RelayQueue,
}

impl ClientContext for RelayContext {
    fn log(&self, level: rdkafka::config::RDKafkaLogLevel, _fac: &str, log_message: &str) {
        self.queue.push(RelayEvent::Log(
            rdkafka_log_level_code(level),
            log_message.to_string(),
        ));
    }

    fn stats(&self, statistics: Statistics) {
        self.queue.push(RelayEvent::Stats(format!("{statistics:?}")));
    }

    fn error(&self, error: rdkafka::error::KafkaError, reason: &str) {
        self.queue.push(RelayEvent::Error(format!("{error}: {reason}")));
    }
}

impl ConsumerContext for RelayContext {
    fn pre_rebalance(&self, base_consumer: &BaseConsumer<Self>, rebalance: &Rebalance) {
        match rebalance {
            Rebalance::Revoke(tpl) => {
                let pairs = tpl_to_pairs(tpl);
                self.queue.push(RelayEvent::Revoked(pairs));
                let _ = base_consumer.unassign();
            }
            Rebalance::Assign(tpl) => {
                let grouped = group_by_stream(tpl);
                self.queue.push(RelayEvent::Assigned(grouped));
                let _ = base_consumer.assign(tpl);
            }
            Rebalance::Error(e) => {
                self.queue.push(RelayEvent::Error(format!("rebalance error: {e}")));
            }
        }
    }

    fn commit_callback(
        &self,
        result: KafkaResult<()>,
        _offsets: &TopicPartitionList,
    ) {
        self.queue.push(RelayEvent::OffsetsCommitted(
            result.map_err(|e| e.to_string()),
        ));
    }
}

fn tpl_to_pairs(tpl: &TopicPartitionList) -> Vec<(StreamName, PartitionId)> {
    tpl.elements()
        .iter()
        .map(|el| (el.topic().to_string(), el.partition()))
        .collect()
}

fn group_by_stream(tpl: &TopicPartitionList) -> Vec<(StreamName, Vec<PartitionId>)> {
    let mut grouped: HashMap<StreamName, Vec<PartitionId>> = HashMap::new();
    for el in tpl.elements() {
        grouped
            .entry(el.topic().to_string())
            .or_default()
            .push(el.partition());
    }
    grouped.into_iter().collect()
}

/// §6's `BrokerClient`, backed by a synchronous `rdkafka::BaseConsumer`.
/// Owned exclusively by the consumer group host's poll thread; never
/// `Clone`, never shared.
pub struct KafkaBrokerClient {
    consumer: BaseConsumer<RelayContext>,
    queue: RelayQueue,
}

impl KafkaBrokerClient {
    /// Build a consumer from `KafkaBootstrapEndpoints` and
    /// `ConsumerGroupId` (§6). `enable.partition.eof` is turned on so the
    /// host can forward EOF notifications per §4.D.6; offsets are
    /// committed asynchronously by librdkafka on its own background
    /// thread, surfaced to us via `commit_callback`.
    pub fn new(bootstrap_endpoints: &str, consumer_group_id: &str) -> Result<Self> {
        let queue = RelayQueue::default();
        let context = RelayContext {
            queue: queue.clone(),
        };

        let consumer: BaseConsumer<RelayContext> = ClientConfig::new()
            .set("bootstrap.servers", bootstrap_endpoints)
            .set("group.id", consumer_group_id)
            .set("enable.partition.eof", "true")
            .set("enable.auto.commit", "true")
            .set("auto.offset.reset", "earliest")
            .create_with_context(context)
            .map_err(|e| HostError::Broker(format!("failed to create consumer: {e}")))?;

        Ok(Self { consumer, queue })
    }

    fn drain_relay(&mut self, events: &mut dyn BrokerEvents) {
        for event in self.queue.drain() {
            match event {
                RelayEvent::Revoked(pairs) => events.on_partitions_revoked(pairs, self),
                RelayEvent::Assigned(grouped) => events.on_partitions_assigned(grouped, self),
                RelayEvent::Error(message) => events.on_error(message),
                RelayEvent::Log(code, text) => events.on_log(code, text),
                RelayEvent::Stats(json) => events.on_stats(json),
                RelayEvent::OffsetsCommitted(result) => events.on_offsets_committed(result),
            }
        }
    }
}

impl BrokerControl for KafkaBrokerClient {
    fn assign(&mut self, assignment: &[AssignedPartition]) -> Result<()> {
        let mut tpl = TopicPartitionList::new();
        for a in assignment {
            let offset = if a.offset == streamhost_core::types::INVALID_OFFSET {
                RdOffset::Invalid
            } else {
                RdOffset::Offset(a.offset)
            };
            tpl.add_partition_offset(&a.stream, a.partition, offset)
                .map_err(|e| HostError::Broker(format!("assign {}/{}: {e}", a.stream, a.partition)))?;
        }
        self.consumer
            .assign(&tpl)
            .map_err(|e| HostError::Broker(format!("assign failed: {e}")))
    }

    fn unassign(&mut self) -> Result<()> {
        self.consumer
            .unassign()
            .map_err(|e| HostError::Broker(format!("unassign failed: {e}")))
    }

    fn offsets_for_times(
        &mut self,
        requests: &[(StreamName, PartitionId, SystemTime)],
        timeout: Duration,
    ) -> Vec<(StreamName, PartitionId, std::result::Result<Offset, String>)> {
        let mut tpl = TopicPartitionList::new();
        for (stream, partition, ts) in requests {
            let millis = ts
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as i64)
                .unwrap_or(0);
            let _ = tpl.add_partition_offset(stream, *partition, RdOffset::Offset(millis));
        }

        let resolved = self
            .consumer
            .offsets_for_times(tpl, Timeout::After(timeout));

        match resolved {
            Ok(result_tpl) => result_tpl
                .elements()
                .iter()
                .map(|el| {
                    let outcome = match el.offset() {
                        RdOffset::Offset(o) => Ok(o),
                        other => Err(format!("no resolvable offset ({other:?})")),
                    };
                    (el.topic().to_string(), el.partition(), outcome)
                })
                .collect(),
            Err(e) => requests
                .iter()
                .map(|(s, p, _)| (s.clone(), *p, Err(format!("offsets_for_times failed: {e}"))))
                .collect(),
        }
    }
}

impl BrokerClient for KafkaBrokerClient {
    fn get_metadata(&mut self, _all_streams: bool) -> Result<Metadata> {
        // Subscription refresh (§4.D.2) always asks for full cluster
        // metadata; there is no single-topic caller to honor `false` for.
        let metadata = self
            .consumer
            .fetch_metadata(None, Timeout::After(Duration::from_secs(30)))
            .map_err(|e| HostError::Broker(format!("fetch_metadata failed: {e}")))?;

        Ok(Metadata {
            streams: metadata
                .topics()
                .iter()
                .map(|t| t.name().to_string())
                .collect(),
        })
    }

    fn subscribe(&mut self, streams: &[StreamName]) -> Result<()> {
        let refs: Vec<&str> = streams.iter().map(String::as_str).collect();
        self.consumer
            .subscribe(&refs)
            .map_err(|e| HostError::Broker(format!("subscribe failed: {e}")))
    }

    fn poll(&mut self, timeout: Duration, events: &mut dyn BrokerEvents) -> Result<()> {
        if let Some(message) = self.consumer.poll(timeout) {
            match message {
                Ok(borrowed) => {
                    let record = Record {
                        stream: borrowed.topic().to_string(),
                        partition: borrowed.partition(),
                        offset: borrowed.offset(),
                        timestamp: borrowed
                            .timestamp()
                            .to_millis()
                            .map(|ms| UNIX_EPOCH + Duration::from_millis(ms.max(0) as u64))
                            .unwrap_or_else(SystemTime::now),
                        key: borrowed.key().map(|k| k.to_vec()),
                        value: borrowed.payload().map(|v| v.to_vec()).unwrap_or_default(),
                    };
                    events.on_message(record);
                }
                Err(e) => events.on_consume_error(e.to_string()),
            }
        }

        self.drain_relay(events);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_by_stream_collects_partitions_per_topic() {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition("traces-T", 0);
        tpl.add_partition("traces-T", 1);
        tpl.add_partition("metrics-T", 0);

        let mut grouped = group_by_stream(&tpl);
        grouped.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped[0].0, "metrics-T");
        assert_eq!(grouped[1].0, "traces-T");
    }
}
