//! # Multi-Worker Scoring Run
//!
//! Drives one accumulator per event source on the rayon pool, then merges
//! the per-worker checkpoints once every worker has written its final
//! flush.
//!
//! ```text
//!   source 0 ──► DoseAccumulator 0 ──► <base>_seed_S_t0.csv ─┐
//!   source 1 ──► DoseAccumulator 1 ──► <base>_seed_S_t1.csv ─┼─► ResultMerger ─► <base>_merged.csv
//!   source N ──► DoseAccumulator N ──► <base>_seed_S_tN.csv ─┘
//! ```
//!
//! Accumulators are created inside their worker and never leave it; only
//! the configuration and the mass source are shared, read-only.

use rayon::prelude::*;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::accumulator::{DoseAccumulator, FlushOutcome, FlushStats};
use crate::config::ScoringConfig;
use crate::geometry::MassSource;
use crate::merger::{MergeSummary, ResultMerger};
use crate::source::EventSource;
use crate::DoseResult;

/// What one worker did
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerSummary {
    pub thread_index: usize,
    pub events: u64,
    pub deposits: u64,
    pub detectors: usize,
    pub flushes: FlushStats,
    pub checkpoint_path: PathBuf,
    /// The last flush (at exhaustion) reached disk
    pub final_checkpoint_written: bool,
}

/// What the whole run did
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub seed: u64,
    pub workers: Vec<WorkerSummary>,
    pub merge: Option<MergeSummary>,
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn total_events(&self) -> u64 {
        self.workers.iter().map(|w| w.events).sum()
    }

    pub fn total_deposits(&self) -> u64 {
        self.workers.iter().map(|w| w.deposits).sum()
    }
}

/// A configured multi-worker scoring job
pub struct ScoringRun {
    config: Arc<ScoringConfig>,
    mass_source: Arc<dyn MassSource>,
    seed: u64,
}

impl ScoringRun {
    /// Validate the configuration and fix the run seed.
    pub fn new(config: ScoringConfig, mass_source: Arc<dyn MassSource>) -> DoseResult<Self> {
        config.validate()?;
        let seed = config.resolved_seed();
        if config.seed.is_none() {
            log::info!("No seed configured, using automatic seed {}", seed);
        }
        Ok(Self {
            config: Arc::new(config),
            mass_source,
            seed,
        })
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Run every source to exhaustion, one worker each, then merge.
    ///
    /// The first fatal worker error (mass resolution) aborts the run and
    /// skips the merge.
    pub fn execute<S>(&self, sources: Vec<S>) -> DoseResult<RunSummary>
    where
        S: EventSource + Send,
    {
        let start = Instant::now();
        fs::create_dir_all(&self.config.output_dir)?;

        log::info!(
            "Starting scoring run: {} workers, save interval {}, seed {}",
            sources.len(),
            self.config.save_interval,
            self.seed
        );

        let workers = sources
            .into_par_iter()
            .enumerate()
            .map(|(thread_index, source)| self.run_worker(thread_index, source))
            .collect::<DoseResult<Vec<_>>>()
            .map_err(|e| {
                if e.is_fatal() {
                    log::error!("Scoring run aborted: {}", e);
                }
                e
            })?;

        let merge = if self.config.merge_enabled {
            ResultMerger::new()
                .with_output_name(self.config.merged_file_name())
                .with_file_prefix(self.config.checkpoint_prefix(self.seed))
                .merge_directory(&self.config.output_dir)?
        } else {
            log::info!("Checkpoint merge disabled");
            None
        };

        let summary = RunSummary {
            seed: self.seed,
            workers,
            merge,
            elapsed: start.elapsed(),
        };
        log::info!(
            "Scoring run finished: {} events, {} deposits in {:.2?}",
            summary.total_events(),
            summary.total_deposits(),
            summary.elapsed
        );
        Ok(summary)
    }

    fn run_worker<S: EventSource>(
        &self,
        thread_index: usize,
        mut source: S,
    ) -> DoseResult<WorkerSummary> {
        let mut accumulator = DoseAccumulator::new(
            thread_index,
            self.seed,
            Arc::clone(&self.config),
            Arc::clone(&self.mass_source),
        )?;
        let mut deposits = 0u64;

        while let Some(event) = source.next_event() {
            accumulator.begin_event();
            for deposit in &event {
                accumulator.record_deposit(
                    deposit.detector_id,
                    deposit.energy_mev,
                    deposit.position,
                )?;
            }
            deposits += event.len() as u64;
            accumulator.end_event();
            accumulator.maybe_flush_scheduled();
        }

        let final_checkpoint_written = accumulator.flush() == FlushOutcome::Written;
        if !final_checkpoint_written {
            log::warn!(
                "Worker {}: final checkpoint missing; merge will use the last successful flush",
                thread_index
            );
        }

        Ok(WorkerSummary {
            thread_index,
            events: accumulator.event_count(),
            deposits,
            detectors: accumulator.num_detectors(),
            flushes: accumulator.flush_stats(),
            checkpoint_path: accumulator.checkpoint_path().to_path_buf(),
            final_checkpoint_written,
        })
    }
}
