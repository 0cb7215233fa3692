//! # Thread-Local Dose Accumulator
//!
//! Turns a stream of energy deposits into per-detector dose sums for one
//! worker. The accumulator is owned by its worker, so nothing here locks.
//!
//! ## Event Protocol
//!
//! ```text
//! begin_event ──► record_deposit* ──► end_event ──► maybe_flush
//!      │                 │                 │
//!  clear scratch   total += d          Σd² += (Σ_event d)²
//!                  scratch += d        n_events += 1
//! ```
//!
//! Squaring happens on the per-event total of each detector, never per
//! step, so `dose_squared_sum` is the sum of squared event doses that the
//! variance estimate needs.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::checkpoint::{write_checkpoint, CheckpointRow, CheckpointTable};
use crate::config::ScoringConfig;
use crate::geometry::{energy_to_dose, DetectorId, MassSource, Position};
use crate::statistics::{derived_statistics, DoseStatistics};
use crate::DoseResult;

/// Running sums for one detector
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorRecord {
    pub id: DetectorId,
    /// Fixed at the first non-zero deposit
    pub position: Position,
    /// Σ dose over all events (Gy)
    pub total_dose: f64,
    /// Σ (per-event dose)² (Gy²)
    pub dose_squared_sum: f64,
}

impl DetectorRecord {
    fn new(id: DetectorId, position: Position) -> Self {
        Self {
            id,
            position,
            total_dose: 0.0,
            dose_squared_sum: 0.0,
        }
    }
}

/// What a flush attempt did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Not on a save boundary
    Skipped,
    /// Checkpoint replaced
    Written,
    /// Write failed; in-memory sums are intact and the next boundary retries
    Failed,
}

/// Flush counters for one accumulator
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushStats {
    pub written: u64,
    pub failed: u64,
}

/// Per-worker dose accumulator
pub struct DoseAccumulator {
    thread_index: usize,
    config: Arc<ScoringConfig>,
    mass_source: Arc<dyn MassSource>,
    /// Resolved on the first deposit
    mass_kg: Option<f64>,
    records: HashMap<DetectorId, DetectorRecord>,
    /// Dose per detector within the current event
    event_scratch: HashMap<DetectorId, f64>,
    event_count: u64,
    checkpoint_path: PathBuf,
    flush_stats: FlushStats,
}

impl DoseAccumulator {
    /// Create the accumulator for worker `thread_index`.
    ///
    /// Fails if the configuration is invalid.
    pub fn new(
        thread_index: usize,
        seed: u64,
        config: Arc<ScoringConfig>,
        mass_source: Arc<dyn MassSource>,
    ) -> DoseResult<Self> {
        config.validate()?;
        let checkpoint_path = config.checkpoint_path(seed, thread_index);
        Ok(Self {
            thread_index,
            config,
            mass_source,
            mass_kg: None,
            records: HashMap::new(),
            event_scratch: HashMap::new(),
            event_count: 0,
            checkpoint_path,
            flush_stats: FlushStats::default(),
        })
    }

    /// Start a new event.
    pub fn begin_event(&mut self) {
        self.event_scratch.clear();
    }

    /// Add one step's energy deposit (MeV) in detector `id`.
    ///
    /// Non-positive and non-finite energies are ignored. The only error is
    /// a failure to resolve the detector mass, which is fatal.
    pub fn record_deposit(
        &mut self,
        id: DetectorId,
        energy_mev: f64,
        position: Position,
    ) -> DoseResult<()> {
        if !(energy_mev.is_finite() && energy_mev > 0.0) {
            return Ok(());
        }

        let dose = energy_to_dose(energy_mev, self.mass_kg()?);

        let record = self
            .records
            .entry(id)
            .or_insert_with(|| DetectorRecord::new(id, position));
        record.total_dose += dose;
        *self.event_scratch.entry(id).or_insert(0.0) += dose;
        Ok(())
    }

    /// Close the current event.
    pub fn end_event(&mut self) {
        for (id, event_dose) in self.event_scratch.drain() {
            if let Some(record) = self.records.get_mut(&id) {
                record.dose_squared_sum += event_dose * event_dose;
            }
        }
        self.event_count += 1;
    }

    fn mass_kg(&mut self) -> DoseResult<f64> {
        if let Some(mass) = self.mass_kg {
            return Ok(mass);
        }
        let mass = self.mass_source.detector_mass_kg()?;
        log::debug!(
            "Worker {}: detector mass resolved to {:e} kg",
            self.thread_index,
            mass
        );
        self.mass_kg = Some(mass);
        Ok(mass)
    }

    /// Flush if `event_count` is a positive multiple of `save_interval`.
    ///
    /// A zero interval never flushes.
    pub fn maybe_flush(&mut self, save_interval: u64) -> FlushOutcome {
        if !is_save_boundary(self.event_count, save_interval) {
            return FlushOutcome::Skipped;
        }
        self.flush()
    }

    /// [`maybe_flush`](Self::maybe_flush) with the configured interval
    pub fn maybe_flush_scheduled(&mut self) -> FlushOutcome {
        let interval = self.config.save_interval;
        self.maybe_flush(interval)
    }

    /// Write the full lifetime table to this worker's checkpoint now.
    ///
    /// State is not reset. A write error is logged and reported as
    /// [`FlushOutcome::Failed`]; the sums stay in memory for the next try.
    pub fn flush(&mut self) -> FlushOutcome {
        let table = self.snapshot();
        if table.is_empty() {
            log::debug!(
                "Worker {}: no detector hit yet, writing header-only checkpoint",
                self.thread_index
            );
        }
        match write_checkpoint(&self.checkpoint_path, &table) {
            Ok(()) => {
                self.flush_stats.written += 1;
                log::info!(
                    "Worker {}: checkpoint at {} events ({} detectors) -> {:?}",
                    self.thread_index,
                    table.n_events,
                    table.len(),
                    self.checkpoint_path
                );
                FlushOutcome::Written
            }
            Err(e) => {
                self.flush_stats.failed += 1;
                log::warn!(
                    "Worker {}: checkpoint write to {:?} failed at {} events: {}",
                    self.thread_index,
                    self.checkpoint_path,
                    table.n_events,
                    e
                );
                FlushOutcome::Failed
            }
        }
    }

    /// Owned copy of the current table, sorted by detector id.
    pub fn snapshot(&self) -> CheckpointTable {
        let mut rows: Vec<CheckpointRow> = self
            .records
            .values()
            .map(|r| CheckpointRow {
                id: r.id,
                position: r.position,
                total_dose: r.total_dose,
                dose_squared_sum: r.dose_squared_sum,
                n_events: self.event_count,
            })
            .collect();
        rows.sort_by_key(|r| r.id);

        CheckpointTable {
            thread_index: self.thread_index,
            n_events: self.event_count,
            rows,
        }
    }

    /// Statistics of one detector against this accumulator's event count
    pub fn statistics(&self, id: DetectorId) -> Option<DoseStatistics> {
        self.records
            .get(&id)
            .map(|r| derived_statistics(r.total_dose, r.dose_squared_sum, self.event_count))
    }

    pub fn record(&self, id: DetectorId) -> Option<&DetectorRecord> {
        self.records.get(&id)
    }

    pub fn records(&self) -> impl Iterator<Item = &DetectorRecord> {
        self.records.values()
    }

    pub fn num_detectors(&self) -> usize {
        self.records.len()
    }

    pub fn event_count(&self) -> u64 {
        self.event_count
    }

    pub fn thread_index(&self) -> usize {
        self.thread_index
    }

    pub fn checkpoint_path(&self) -> &Path {
        &self.checkpoint_path
    }

    pub fn flush_stats(&self) -> FlushStats {
        self.flush_stats
    }
}

/// `event_count` lands on a save boundary for `save_interval`
pub fn is_save_boundary(event_count: u64, save_interval: u64) -> bool {
    save_interval > 0 && event_count > 0 && event_count % save_interval == 0
}
