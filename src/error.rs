use thiserror::Error;

use crate::types::StreamName;

/// Errors surfaced by the consumer-group host core.
///
/// Malformed payloads and offset-lookup failures are not represented here:
/// both are logged and absorbed inline at their call site
/// ([`crate::processor_host`], [`crate::group_host`]) and never propagate,
/// so they carry no corresponding variant. The variants below are the ones
/// that either propagate out of [`crate::group_host::ConsumerGroupHost::run`]
/// or mark a programmer-error condition.
#[derive(Error, Debug)]
pub enum HostError {
    #[error("broker error: {0}")]
    Broker(String),

    #[error("processor for stream '{stream}' failed: {reason}")]
    ProcessorFailed { stream: StreamName, reason: String },

    #[error("record dispatched for unsubscribed stream '{0}'")]
    UnknownStream(StreamName),

    #[error("processor host for '{0}' was started twice")]
    DoubleStart(StreamName),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, HostError>;
