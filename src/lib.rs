// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod ingest;
pub mod preview;
pub mod render;
pub mod storage;

// ---- Re-exports for stable public API ----
pub use crate::ingest::config::ArchiverConfig;
pub use crate::ingest::types::{Attachment, Entry, Feed, FeedSource};
pub use crate::ingest::{Archiver, RunError, RunReport, RunState, SourceReport};
