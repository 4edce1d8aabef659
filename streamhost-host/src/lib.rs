//! Runnable pieces the bare `streamhost-core` library leaves to a
//! deployment: a real broker adapter, a log sink, and a reference
//! processor, wired together by `main.rs`.

pub mod demo_processor;
pub mod gelf;
pub mod kafka;
