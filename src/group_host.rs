use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::broker::{BrokerClient, BrokerControl, BrokerEvents, INFINITE_TIMEOUT};
use crate::cancel::CancelToken;
use crate::config::HostConfig;
use crate::error::{HostError, Result};
use crate::filter::StreamFilter;
use crate::log::LogSink;
use crate::processor::{Processor, ProcessorProvider};
use crate::processor_host::ProcessorHost;
use crate::types::{AssignedPartition, PartitionId, Record, StreamName, INVALID_OFFSET};

/// §3's `ProcessorEntry`: one stream's live worker plus the partition set
/// most recently accepted from the broker for it.
struct ProcessorEntry<P: Processor> {
    processor: Arc<P>,
    host: Arc<ProcessorHost<P>>,
    assigned_partitions: HashSet<PartitionId>,
}

/// Everything [`BrokerEvents`] needs, separated from the broker client
/// itself so the poll loop can call `self.broker.poll(timeout,
/// &mut self.inner)` without the event sink holding a second handle to
/// the same client. See §9 "Per-stream dictionary mutated on one thread":
/// `entries` is a plain `HashMap` that never crosses a thread boundary.
struct Inner<PP: ProcessorProvider> {
    provider: PP,
    config: HostConfig,
    cancel: CancelToken,
    log: Arc<dyn LogSink>,
    entries: HashMap<StreamName, ProcessorEntry<PP::P>>,
    fatal: Option<HostError>,
}

impl<PP: ProcessorProvider> Inner<PP> {
    /// Scan processor hosts for a dead worker (§4.C exit condition 3) and
    /// latch it as the fatal error that terminates the poll loop.
    fn check_worker_failures(&mut self) {
        if self.fatal.is_some() {
            return;
        }
        if let Some(stream) = self
            .entries
            .values()
            .find(|e| e.host.has_failed())
            .map(|e| e.host.stream().to_string())
        {
            self.fatal = Some(HostError::ProcessorFailed {
                stream,
                reason: "worker thread exited after a process() failure".into(),
            });
        }
    }

    fn start_host_for(&mut self, stream: &StreamName) -> Option<Arc<ProcessorHost<PP::P>>> {
        let processor = self.provider.get_processor(stream);
        let host = Arc::new(ProcessorHost::new(stream.clone()));
        if let Err(e) = host.start(
            Arc::clone(&processor),
            self.cancel.clone(),
            self.config.max_processor_queue_size,
            self.config.max_batch_size,
            Arc::clone(&self.log),
        ) {
            self.log
                .fatal(&format!("failed to start processor host for '{stream}': {e}"));
            self.fatal = Some(e);
            return None;
        }
        self.entries.insert(
            stream.clone(),
            ProcessorEntry {
                processor,
                host: Arc::clone(&host),
                assigned_partitions: HashSet::new(),
            },
        );
        Some(host)
    }
}

impl<PP: ProcessorProvider> BrokerEvents for Inner<PP> {
    fn on_message(&mut self, record: Record) {
        match self.entries.get(&record.stream) {
            Some(entry) => {
                if let Err(e) = entry.host.enqueue(record) {
                    self.log.error(&format!("enqueue failed: {e}"));
                }
            }
            None => {
                // §4.D.5: the broker handed us a stream we never
                // subscribed to. Structural corruption — fatal.
                self.fatal = Some(HostError::UnknownStream(record.stream));
            }
        }
    }

    fn on_partitions_revoked(
        &mut self,
        _partitions: Vec<(StreamName, PartitionId)>,
        control: &mut dyn BrokerControl,
    ) {
        // §4.D.3: unconditional unassign, no teardown. Keeping queues
        // live survives the common revoke-then-reassign pattern without
        // replay.
        if let Err(e) = control.unassign() {
            self.log.error(&format!("unassign failed: {e}"));
        }
    }

    fn on_partitions_assigned(
        &mut self,
        incoming: Vec<(StreamName, Vec<PartitionId>)>,
        control: &mut dyn BrokerControl,
    ) {
        let mut all_emitted: Vec<AssignedPartition> = Vec::new();
        let mut touched: HashSet<StreamName> = HashSet::new();

        for (stream, partitions) in incoming {
            touched.insert(stream.clone());
            let partitions_to_assign: HashSet<PartitionId> = partitions.into_iter().collect();

            if partitions_to_assign.is_empty() {
                // Edge case: assignment with zero partitions for a
                // stream. Keep the entry (if any) but hold nothing.
                if let Some(entry) = self.entries.get_mut(&stream) {
                    entry.assigned_partitions = HashSet::new();
                }
                continue;
            }

            if !self.entries.contains_key(&stream) {
                if self.start_host_for(&stream).is_none() {
                    continue;
                }
            }

            let new_partitions: Vec<PartitionId> = {
                let entry = self.entries.get(&stream).unwrap();
                partitions_to_assign
                    .difference(&entry.assigned_partitions)
                    .copied()
                    .collect()
            };

            let mut emitted: HashSet<PartitionId> = HashSet::new();

            if !new_partitions.is_empty() {
                let start_ts = {
                    let entry = self.entries.get(&stream).unwrap();
                    entry.processor.start_timestamp_on_rebalance(&stream)
                };

                match start_ts {
                    None => {
                        for p in &new_partitions {
                            all_emitted.push(AssignedPartition {
                                stream: stream.clone(),
                                partition: *p,
                                offset: INVALID_OFFSET,
                            });
                            emitted.insert(*p);
                        }
                    }
                    Some(ts) => {
                        let requests: Vec<_> = new_partitions
                            .iter()
                            .map(|p| (stream.clone(), *p, ts))
                            .collect();
                        let results = control.offsets_for_times(&requests, INFINITE_TIMEOUT);
                        for (s, p, result) in results {
                            let offset = match result {
                                Ok(offset) => offset,
                                Err(reason) => {
                                    self.log.error(&format!(
                                        "offset lookup failed for {s}/{p}: {reason}"
                                    ));
                                    INVALID_OFFSET
                                }
                            };
                            all_emitted.push(AssignedPartition {
                                stream: s,
                                partition: p,
                                offset,
                            });
                            emitted.insert(p);
                        }
                    }
                }
            }

            for p in &partitions_to_assign {
                if !emitted.contains(p) {
                    all_emitted.push(AssignedPartition {
                        stream: stream.clone(),
                        partition: *p,
                        offset: INVALID_OFFSET,
                    });
                }
            }

            self.entries.get_mut(&stream).unwrap().assigned_partitions = partitions_to_assign;
        }

        let orphaned: Vec<StreamName> = self
            .entries
            .keys()
            .filter(|s| !touched.contains(*s))
            .cloned()
            .collect();
        for stream in orphaned {
            if let Some(entry) = self.entries.remove(&stream) {
                entry.host.complete_adding();
                entry.host.join();
            }
        }

        if let Err(e) = control.assign(&all_emitted) {
            self.log.error(&format!("assign failed: {e}"));
        }
    }

    fn on_error(&mut self, message: String) {
        self.log.error(&format!("broker error: {message}"));
    }

    fn on_consume_error(&mut self, message: String) {
        self.log.error(&format!("consume error, dropping record: {message}"));
    }

    fn on_log(&mut self, level_code: i32, text: String) {
        let level = crate::log::level_from_broker_code(level_code);
        self.log.log(level, &text);
    }

    fn on_stats(&mut self, json: String) {
        self.log.info(&format!("broker stats: {json}"));
    }

    fn on_partition_eof(&mut self, stream: StreamName, partition: PartitionId) {
        self.log.info(&format!("partition EOF: {stream}/{partition}"));
    }

    fn on_offsets_committed(&mut self, result: std::result::Result<(), String>) {
        match result {
            Ok(()) => self.log.info("offsets committed"),
            Err(e) => self.log.error(&format!("offset commit failed: {e}")),
        }
    }
}

/// Component D. The single-threaded poll loop's owner: the only piece of
/// this crate that calls the broker client.
pub struct ConsumerGroupHost<B: BrokerClient, PP: ProcessorProvider> {
    broker: B,
    filter: Box<dyn StreamFilter>,
    config: HostConfig,
    stop: Arc<AtomicBool>,
    inner: Inner<PP>,
}

impl<B: BrokerClient, PP: ProcessorProvider> ConsumerGroupHost<B, PP> {
    pub fn new(
        broker: B,
        provider: PP,
        filter: Box<dyn StreamFilter>,
        config: HostConfig,
        log: Arc<dyn LogSink>,
        stop: Arc<AtomicBool>,
    ) -> Self {
        Self {
            broker,
            filter,
            config: config.clone(),
            stop,
            inner: Inner {
                provider,
                config,
                cancel: CancelToken::new(),
                log,
                entries: HashMap::new(),
                fatal: None,
            },
        }
    }

    /// A clone of the cancel token handed to every processor host. The
    /// application host fires this as a last resort if graceful shutdown
    /// doesn't finish promptly.
    pub fn cancel_token(&self) -> CancelToken {
        self.inner.cancel.clone()
    }

    fn refresh_subscription(&mut self) -> Result<bool> {
        let metadata = self.broker.get_metadata(true)?;
        let matches: Vec<StreamName> = metadata
            .streams
            .into_iter()
            .filter(|s| self.filter.matches(s))
            .collect();
        let any = !matches.is_empty();
        if any {
            self.broker.subscribe(&matches)?;
        }
        Ok(any)
    }

    /// §4.D.1's poll loop. Runs until the stop flag is set or a
    /// structural failure occurs, then drains and joins every processor
    /// host before returning.
    pub fn run(mut self) -> Result<()> {
        let mut subscribed = self.refresh_subscription()?;
        let mut last_refresh = Instant::now();

        loop {
            if self.stop.load(Ordering::SeqCst) {
                break;
            }

            if subscribed {
                self.broker.poll(self.config.polling_interval, &mut self.inner)?;
            } else {
                std::thread::sleep(self.config.polling_interval);
            }

            self.inner.check_worker_failures();
            if let Some(err) = self.inner.fatal.take() {
                self.shutdown();
                return Err(err);
            }

            if last_refresh.elapsed() >= self.config.update_subscription_interval {
                subscribed = self.refresh_subscription()?;
                last_refresh = Instant::now();
            }
        }

        self.shutdown();
        Ok(())
    }

    fn shutdown(&mut self) {
        for entry in self.inner.entries.values() {
            entry.host.complete_adding();
        }
        for entry in self.inner.entries.values() {
            entry.host.join();
        }
        self.inner.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::fake::FakeBroker;
    use std::sync::Mutex;
    use std::time::SystemTime;

    struct NoopProcessor {
        start_ts: Option<SystemTime>,
    }

    impl Processor for NoopProcessor {
        type Event = Vec<u8>;

        fn start_timestamp_on_rebalance(&self, _stream: &str) -> Option<SystemTime> {
            self.start_ts
        }

        fn decode(&self, value: &[u8]) -> std::result::Result<Self::Event, String> {
            Ok(value.to_vec())
        }

        fn process(&self, _batch: Vec<Self::Event>, _cancel: &CancelToken) -> Result<()> {
            Ok(())
        }
    }

    struct FixedProvider {
        start_ts: Option<SystemTime>,
        calls: Mutex<usize>,
    }

    impl ProcessorProvider for FixedProvider {
        type P = NoopProcessor;

        fn get_processor(&self, _stream: &StreamName) -> Arc<Self::P> {
            *self.calls.lock().unwrap() += 1;
            Arc::new(NoopProcessor {
                start_ts: self.start_ts,
            })
        }
    }

    fn make_inner(start_ts: Option<SystemTime>) -> Inner<FixedProvider> {
        Inner {
            provider: FixedProvider {
                start_ts,
                calls: Mutex::new(0),
            },
            config: HostConfig::default(),
            cancel: CancelToken::new(),
            log: Arc::new(crate::log::EprintlnLog),
            entries: HashMap::new(),
            fatal: None,
        }
    }

    #[test]
    fn fresh_assignment_emits_invalid_offsets_when_no_seek() {
        let mut inner = make_inner(None);
        let mut broker = FakeBroker::new();

        inner.on_partitions_assigned(
            vec![("traces-T".to_string(), vec![0, 1])],
            &mut broker,
        );

        assert_eq!(broker.assign_calls, 1);
        let mut assigned = broker.assigned.clone();
        assigned.sort_by_key(|a| a.partition);
        assert_eq!(
            assigned,
            vec![
                AssignedPartition {
                    stream: "traces-T".into(),
                    partition: 0,
                    offset: INVALID_OFFSET
                },
                AssignedPartition {
                    stream: "traces-T".into(),
                    partition: 1,
                    offset: INVALID_OFFSET
                },
            ]
        );
        assert_eq!(
            inner.entries["traces-T"].assigned_partitions,
            [0, 1].into_iter().collect()
        );
    }

    #[test]
    fn partition_expansion_only_seeks_new_partitions() {
        let mut inner = make_inner(Some(SystemTime::now()));
        let mut broker = FakeBroker::new();
        broker
            .offset_answers
            .insert(("traces-T".to_string(), 2), Ok(500));

        inner.on_partitions_assigned(vec![("traces-T".to_string(), vec![0, 1])], &mut broker);
        inner.on_partitions_assigned(
            vec![("traces-T".to_string(), vec![0, 1, 2])],
            &mut broker,
        );

        let mut assigned = broker.assigned.clone();
        assigned.sort_by_key(|a| a.partition);
        assert_eq!(assigned[0].offset, INVALID_OFFSET);
        assert_eq!(assigned[1].offset, INVALID_OFFSET);
        assert_eq!(assigned[2].offset, 500);
        assert_eq!(
            inner.entries["traces-T"].assigned_partitions,
            [0, 1, 2].into_iter().collect()
        );
        // Only one processor instance is ever created for this stream.
        assert_eq!(*inner.provider.calls.lock().unwrap(), 1);
    }

    #[test]
    fn offset_lookup_error_falls_back_to_invalid_for_that_partition_only() {
        let mut inner = make_inner(Some(SystemTime::now()));
        let mut broker = FakeBroker::new();
        broker
            .offset_answers
            .insert(("traces-T".to_string(), 0), Ok(500));
        // No entry for partition 1 -> FakeBroker answers with an error.

        inner.on_partitions_assigned(vec![("traces-T".to_string(), vec![0, 1])], &mut broker);

        let mut assigned = broker.assigned.clone();
        assigned.sort_by_key(|a| a.partition);
        assert_eq!(assigned[0].offset, 500);
        assert_eq!(assigned[1].offset, INVALID_OFFSET);
    }

    #[test]
    fn zero_partition_assignment_keeps_entry_empty() {
        let mut inner = make_inner(None);
        let mut broker = FakeBroker::new();

        inner.on_partitions_assigned(vec![("traces-T".to_string(), vec![0])], &mut broker);
        inner.on_partitions_assigned(vec![("traces-T".to_string(), vec![])], &mut broker);

        assert!(inner.entries.contains_key("traces-T"));
        assert!(inner.entries["traces-T"].assigned_partitions.is_empty());
    }

    #[test]
    fn stream_absent_from_new_assignment_is_torn_down() {
        let mut inner = make_inner(None);
        let mut broker = FakeBroker::new();

        inner.on_partitions_assigned(
            vec![
                ("traces-T".to_string(), vec![0]),
                ("metrics-T".to_string(), vec![0]),
            ],
            &mut broker,
        );
        assert_eq!(inner.entries.len(), 2);

        inner.on_partitions_assigned(vec![("traces-T".to_string(), vec![0])], &mut broker);

        assert_eq!(inner.entries.len(), 1);
        assert!(inner.entries.contains_key("traces-T"));
        assert!(!inner.entries.contains_key("metrics-T"));
    }

    #[test]
    fn revoke_unassigns_but_does_not_tear_down_entries() {
        let mut inner = make_inner(None);
        let mut broker = FakeBroker::new();

        inner.on_partitions_assigned(vec![("traces-T".to_string(), vec![0])], &mut broker);
        inner.on_partitions_revoked(vec![("traces-T".to_string(), 0)], &mut broker);

        assert_eq!(broker.unassign_calls, 1);
        assert!(inner.entries.contains_key("traces-T"));
    }

    #[test]
    fn unknown_stream_dispatch_is_fatal() {
        let mut inner = make_inner(None);
        inner.on_message(Record {
            stream: "ghost-T".to_string(),
            partition: 0,
            offset: 0,
            timestamp: SystemTime::now(),
            key: None,
            value: vec![],
        });
        assert!(matches!(inner.fatal, Some(HostError::UnknownStream(_))));
    }
}
