//! Full-text search: BM25 scoring and live Top-K maintenance.

pub mod bm25;
pub mod live;

pub use bm25::{Bm25Config, Bm25Index, SearchHit, SearchOptions};
pub use live::{FtsChange, FtsDelta, LiveFtsIndex, LiveFtsOptions};
