//! Chunked pagination.
//!
//! - [`ChunkPolicy`]: per-endpoint limits
//! - [`ChunkPlanner`]: splits a request into endpoint-legal chunks
//! - [`ChunkExecutor`]: fetches, deduplicates and stitches the chunks
//! - [`HistoricalFetcher`]: both of the above over the router

mod executor;
mod historical;
mod planner;
mod policy;

pub use executor::{ChunkExecutor, ChunkOutcome, ChunkPage, ChunkResult, DedupeKey};
pub use historical::HistoricalFetcher;
pub use planner::{
    ChunkPlan, ChunkPlanner, ChunkWindow, Coverage, PlanMode, DEFAULT_OPEN_ENDED_MAX_CHUNKS,
};
pub use policy::{
    ChunkHint, ChunkPolicy, OnThrottle, OverflowPolicy, PaginationKind, WeightPolicy, WeightTier,
};
