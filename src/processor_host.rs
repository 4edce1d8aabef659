use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, SyncSender, TryRecvError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::cancel::CancelToken;
use crate::error::{HostError, Result};
use crate::log::LogSink;
use crate::processor::Processor;
use crate::types::{Record, StreamName};

/// How often the worker wakes from an empty queue to re-check the cancel
/// token. Not a config knob — it only bounds shutdown latency, it never
/// governs throughput.
const WORKER_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Component C. Owns one stream's bounded queue and its single worker
/// thread. Lives entirely on the poll thread's side of the world — every
/// method here is called only from [`crate::group_host::ConsumerGroupHost`],
/// never concurrently, so interior mutability is plain [`RefCell`] rather
/// than a lock.
pub struct ProcessorHost<P: Processor> {
    stream: StreamName,
    sender: RefCell<Option<SyncSender<Record>>>,
    worker: RefCell<Option<JoinHandle<()>>>,
    failed: Arc<AtomicBool>,
    _processor: std::marker::PhantomData<P>,
}

impl<P: Processor> ProcessorHost<P> {
    pub fn new(stream: StreamName) -> Self {
        Self {
            stream,
            sender: RefCell::new(None),
            worker: RefCell::new(None),
            failed: Arc::new(AtomicBool::new(false)),
            _processor: std::marker::PhantomData,
        }
    }

    /// Spawn the single worker thread. Fails if called twice.
    pub fn start(
        &self,
        processor: Arc<P>,
        cancel: CancelToken,
        queue_size: usize,
        max_batch_size: usize,
        log: Arc<dyn LogSink>,
    ) -> Result<()> {
        if self.sender.borrow().is_some() {
            return Err(HostError::DoubleStart(self.stream.clone()));
        }

        let (tx, rx) = mpsc::sync_channel::<Record>(queue_size.max(1));
        let stream = self.stream.clone();
        let failed = Arc::clone(&self.failed);

        let handle = std::thread::Builder::new()
            .name(format!("processor-{stream}"))
            .spawn(move || {
                worker_loop(&stream, rx, processor, cancel, max_batch_size, &log, &failed)
            })
            .map_err(HostError::Io)?;

        *self.sender.borrow_mut() = Some(tx);
        *self.worker.borrow_mut() = Some(handle);
        Ok(())
    }

    /// Non-blocking if the queue has room; blocks the caller (the poll
    /// thread) once it is full, which is the host's only backpressure
    /// mechanism.
    pub fn enqueue(&self, record: Record) -> Result<()> {
        let guard = self.sender.borrow();
        match guard.as_ref() {
            Some(tx) => tx
                .send(record)
                .map_err(|_| HostError::ProcessorFailed {
                    stream: self.stream.clone(),
                    reason: "worker thread exited while queue still open".into(),
                }),
            None => Err(HostError::ProcessorFailed {
                stream: self.stream.clone(),
                reason: "enqueue before start".into(),
            }),
        }
    }

    /// Seals the queue: drops the sender so the worker observes
    /// disconnection once it drains what is already queued. No further
    /// enqueues are accepted after this call.
    pub fn complete_adding(&self) {
        self.sender.borrow_mut().take();
    }

    /// Waits for the worker thread to exit. Safe to call after
    /// `complete_adding`, or to force a hard stop after cancelling.
    pub fn join(&self) {
        if let Some(handle) = self.worker.borrow_mut().take() {
            let _ = handle.join();
        }
    }

    /// True once the worker has exited due to a `process` failure. The
    /// owning group host treats this as fatal for the whole process.
    pub fn has_failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }
}

fn worker_loop<P: Processor>(
    stream: &str,
    rx: std::sync::mpsc::Receiver<Record>,
    processor: Arc<P>,
    cancel: CancelToken,
    max_batch_size: usize,
    log: &Arc<dyn LogSink>,
    failed: &Arc<AtomicBool>,
) {
    loop {
        if cancel.is_cancelled() {
            return;
        }

        let first = match rx.recv_timeout(WORKER_POLL_INTERVAL) {
            Ok(record) => record,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => return,
        };

        let mut raw = vec![first];
        while raw.len() < max_batch_size {
            match rx.try_recv() {
                Ok(record) => raw.push(record),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => break,
            }
        }

        if cancel.is_cancelled() {
            return;
        }

        let mut batch = Vec::with_capacity(raw.len());
        for record in raw {
            match processor.decode(&record.value) {
                Ok(event) => batch.push(event),
                Err(reason) => log.error(&format!(
                    "dropping malformed record on {}/{}@{}: {reason}",
                    record.stream, record.partition, record.offset
                )),
            }
        }

        if batch.is_empty() {
            continue;
        }

        if let Err(err) = processor.process(batch, &cancel) {
            log.fatal(&format!("processor for '{stream}' failed: {err}"));
            failed.store(true, Ordering::SeqCst);
            return;
        }
    }
}
