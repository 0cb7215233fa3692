//! # Dose Tally
//!
//! Per-detector radiation dose scoring for multi-threaded Monte Carlo
//! transport runs.
//!
//! ## Features
//! - Thread-local accumulators with no shared mutable state
//! - Per-event squaring for correct variance estimates
//! - Periodic, non-destructive CSV checkpoints replaced atomically
//! - Offline merger that pools raw sums and recomputes statistics
//! - Tolerant parsing of partially written checkpoints
//!
//! ## Architecture
//!
//! ```text
//! EventSource ─► DoseAccumulator (per worker) ─► checkpoint CSV (per worker)
//!                                                     │
//!                                  ResultMerger ◄─────┘ ─► merged CSV
//! ```
//!
//! The accumulator and the merger share nothing but the file format in
//! [`checkpoint`].

// Core modules
pub mod accumulator;
pub mod checkpoint;
pub mod error;
pub mod merger;
pub mod statistics;

// Run infrastructure
pub mod config;
pub mod geometry;
pub mod runner;
pub mod source;

// Cross-module tests
#[cfg(test)]
mod tests;

pub use accumulator::{DetectorRecord, DoseAccumulator, FlushOutcome, FlushStats};
pub use checkpoint::{CheckpointRow, CheckpointTable, CHECKPOINT_HEADER};
pub use config::ScoringConfig;
pub use error::DoseError;
pub use geometry::{
    DetectorGrid, DetectorId, DetectorShape, FixedMass, MassSource, Material, Position,
};
pub use merger::{
    EventNormalization, MergeSummary, MergeTable, MergedRecord, ResultMerger, MERGED_HEADER,
};
pub use runner::{RunSummary, ScoringRun, WorkerSummary};
pub use source::{BeamConfig, Deposit, EventSource, SyntheticBeam, VecSource};
pub use statistics::{derived_statistics, DoseStatistics};

/// Result type for dose scoring operations
pub type DoseResult<T> = Result<T, DoseError>;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        derived_statistics, Deposit, DetectorId, DoseAccumulator, DoseError, DoseResult,
        DoseStatistics, EventSource, FlushOutcome, MassSource, ResultMerger, ScoringConfig,
        ScoringRun,
    };
}
