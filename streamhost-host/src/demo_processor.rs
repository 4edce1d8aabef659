//! §10.6's reference deployment: the smallest `Processor`/`ProcessorProvider`
//! pair that makes `streamhost-host`'s binary runnable out of the box,
//! demonstrating the wiring pattern the examples in §1 (span ingestion,
//! metric aggregation, error forwarding) would each follow.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use streamhost_core::cancel::CancelToken;
use streamhost_core::error::Result;
use streamhost_core::log::LogSink;
use streamhost_core::processor::{Processor, ProcessorProvider};
use streamhost_core::types::StreamName;

/// One decoded event: just enough to log something meaningful per batch.
#[derive(Debug)]
pub struct DemoEvent {
    pub len: usize,
}

/// Logs each batch's record count; never seeks to a particular timestamp,
/// so every stream it owns resumes from the broker's last commit.
pub struct DemoProcessor {
    stream: StreamName,
    log: Arc<dyn LogSink>,
}

impl Processor for DemoProcessor {
    type Event = DemoEvent;

    fn start_timestamp_on_rebalance(&self, _stream: &str) -> Option<SystemTime> {
        None
    }

    fn decode(&self, value: &[u8]) -> std::result::Result<Self::Event, String> {
        Ok(DemoEvent { len: value.len() })
    }

    fn process(&self, batch: Vec<Self::Event>, cancel: &CancelToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Ok(());
        }
        let total_bytes: usize = batch.iter().map(|e| e.len).sum();
        self.log.info(&format!(
            "{}: processed {} record(s), {} bytes",
            self.stream,
            batch.len(),
            total_bytes
        ));
        Ok(())
    }
}

/// Caches one [`DemoProcessor`] per stream name — the simplest possible
/// derived key, since this reference deployment has no project/environment
/// concept to fold streams under.
pub struct DemoProcessorProvider {
    log: Arc<dyn LogSink>,
    processors: Mutex<HashMap<StreamName, Arc<DemoProcessor>>>,
}

impl DemoProcessorProvider {
    pub fn new(log: Arc<dyn LogSink>) -> Self {
        Self {
            log,
            processors: Mutex::new(HashMap::new()),
        }
    }
}

impl ProcessorProvider for DemoProcessorProvider {
    type P = DemoProcessor;

    fn get_processor(&self, stream: &StreamName) -> Arc<Self::P> {
        let mut processors = self.processors.lock().unwrap();
        processors
            .entry(stream.clone())
            .or_insert_with(|| {
                Arc::new(DemoProcessor {
                    stream: stream.clone(),
                    log: Arc::clone(&self.log),
                })
            })
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use streamhost_core::log::EprintlnLog;

    #[test]
    fn provider_caches_by_stream_name() {
        let provider = DemoProcessorProvider::new(Arc::new(EprintlnLog));
        let a = provider.get_processor(&"traces-T".to_string());
        let b = provider.get_processor(&"traces-T".to_string());
        assert!(Arc::ptr_eq(&a, &b));

        let c = provider.get_processor(&"metrics-T".to_string());
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[test]
    fn decode_never_fails_and_process_logs_without_panicking() {
        let provider = DemoProcessorProvider::new(Arc::new(EprintlnLog));
        let processor = provider.get_processor(&"traces-T".to_string());
        let events = vec![
            processor.decode(b"abc").unwrap(),
            processor.decode(b"defgh").unwrap(),
        ];
        assert_eq!(events[0].len, 3);
        assert_eq!(events[1].len, 5);
        processor.process(events, &CancelToken::new()).unwrap();
    }
}
