use crate::types::StreamName;

/// Component A. A pure, side-effect-free predicate deciding whether a
/// discovered stream belongs to this host. Called once per discovered
/// stream on every subscription refresh, so implementations must stay
/// cheap — no I/O, no allocation beyond what string comparison needs.
pub trait StreamFilter: Send + Sync {
    fn matches(&self, stream: &str) -> bool;
}

/// Default filter: a stream belongs to this host iff its name ends in a
/// configured suffix (e.g. `-T` for traces, `-M` for metrics).
pub struct SuffixFilter {
    suffix: String,
}

impl SuffixFilter {
    pub fn new(suffix: impl Into<String>) -> Self {
        Self {
            suffix: suffix.into(),
        }
    }
}

impl StreamFilter for SuffixFilter {
    fn matches(&self, stream: &str) -> bool {
        stream.ends_with(&self.suffix)
    }
}

/// Convenience filter for tests and small deployments: matches an explicit
/// set of stream names.
pub struct ExactFilter {
    streams: std::collections::HashSet<StreamName>,
}

impl ExactFilter {
    pub fn new(streams: impl IntoIterator<Item = StreamName>) -> Self {
        Self {
            streams: streams.into_iter().collect(),
        }
    }
}

impl StreamFilter for ExactFilter {
    fn matches(&self, stream: &str) -> bool {
        self.streams.contains(stream)
    }
}
