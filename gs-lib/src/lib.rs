//! Client library for the seismic chunk store: day manifests, fetch
//! planning, batch scheduling, and cached retrieval.

pub mod batch;
pub mod cache;
pub mod client;
pub mod error;
pub mod manifest;
pub mod paths;
pub mod plan;
pub mod types;

pub use cache::DiskCache;
pub use client::{ChunkFetcher, RetryPolicy, StoreClient, DEFAULT_FETCH_TIMEOUT};
pub use error::{PlanError, StoreError};
pub use manifest::Catalog;
pub use types::{
    Batch, ChunkMeta, DayManifest, FetchPlan, Granularity, PlanSource, PlannedChunk,
};
