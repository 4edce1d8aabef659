//! Generic consumer-group host core: a broker-agnostic, thread-based
//! engine that discovers partitioned streams, dispatches their records to
//! per-stream processor hosts, and keeps each processor's partition set in
//! sync with the broker's rebalances.
//!
//! Concrete deployments plug in a [`processor::ProcessorProvider`] and a
//! [`broker::BrokerClient`] adapter; this crate owns none of either.

pub mod broker;
pub mod cancel;
pub mod config;
pub mod error;
pub mod filter;
pub mod group_host;
pub mod log;
pub mod processor;
pub mod processor_host;
pub mod types;

pub use broker::{BrokerClient, BrokerControl, BrokerEvents};
pub use cancel::CancelToken;
pub use config::HostConfig;
pub use error::{HostError, Result};
pub use filter::{ExactFilter, StreamFilter, SuffixFilter};
pub use group_host::ConsumerGroupHost;
pub use processor::{Processor, ProcessorProvider};
pub use processor_host::ProcessorHost;
pub use types::{AssignedPartition, Offset, PartitionId, Record, StreamName, INVALID_OFFSET};
