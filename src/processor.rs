use std::sync::Arc;
use std::time::SystemTime;

use crate::cancel::CancelToken;
use crate::error::Result;
use crate::types::StreamName;

/// Component B's target contract. A domain processor owns one deserialized
/// event type and is invoked sequentially, on its stream's own worker
/// thread, never concurrently with itself.
///
/// The host is generic over `Processor` (and transitively over its
/// `Event`), not per-stream: one deployment plugs in one processor type for
/// every stream it owns. [`ProcessorProvider::get_processor`] may still
/// return distinct *instances* per stream (or a shared instance cached by
/// a derived key) — only the type is fixed.
pub trait Processor: Send + Sync + 'static {
    /// The domain event type this processor consumes, after payload
    /// decoding.
    type Event: Send;

    /// Called at most once per stream per rebalance, before the host
    /// accepts the new assignment. `None` means "resume from the broker's
    /// last commit"; `Some(t)` means "resume from the earliest offset
    /// whose record timestamp is >= t". Must be idempotent within one
    /// rebalance.
    fn start_timestamp_on_rebalance(&self, stream: &str) -> Option<SystemTime>;

    /// Decode one record's raw value bytes into this processor's event
    /// type. A decode failure is logged and the record is dropped by the
    /// processor host — it is not a fatal error and does not reach
    /// `process`.
    fn decode(&self, value: &[u8]) -> std::result::Result<Self::Event, String>;

    /// Consume a batch of already-decoded events. May block. Must check
    /// `cancel` and return promptly once it fires; work already flushed to
    /// the downstream sink does not need to be undone, but nothing further
    /// should be attempted.
    fn process(&self, batch: Vec<Self::Event>, cancel: &CancelToken) -> Result<()>;
}

/// Component B. A pure function from stream name to processor instance,
/// never called concurrently by the core (it is only ever invoked from the
/// poll thread, during rebalance handling).
pub trait ProcessorProvider: Send + Sync + 'static {
    type P: Processor;

    fn get_processor(&self, stream: &StreamName) -> Arc<Self::P>;
}
