// THEORY:
// This file is the main entry point for the `blobtree` library crate. It exports
// the `BlobPipeline` and its configuration and report types as the high-level
// interface: one call per grayscale frame gives back a forest of nested blobs, a
// filtered view of it, and the tracks that follow those blobs over time.
//
// The algorithmic layers live in `core_modules`, one file per layer, and stay
// public for callers that want to drive them by hand (e.g. build a forest
// without tracking, or run a filter pass with a custom predicate).

pub mod core_modules;
pub mod error;
pub mod logging;
pub mod pipeline;

pub use error::{BlobError, BlobResult};
pub use pipeline::{BlobPipeline, FrameReport, PipelineConfig};
