//! Core types: the post record, backend descriptors and operation reports.

mod descriptor;
mod post;
mod report;

pub use descriptor::BackendDescriptor;
pub use post::{COLLECTOR_TIMESTAMP_FORMAT, NewPost, Post, ViewCount, parse_created_at};
pub use report::{BackendStatus, EngineStatus, InsertReport, RecordFailure, SearchResult};

pub(crate) use report::capacity_percent;
