//! # Checkpoint Merger
//!
//! Offline combination of per-thread checkpoints into one pooled result.
//!
//! Threads are independent samples of the same detectors, so the merge
//! adds raw sums (`Σd`, `Σd²`, event counts) and recomputes statistics
//! from the pooled sums. Per-thread uncertainties are never averaged.
//!
//! ```text
//! discover(dir) ──► accumulate(files) ──► export(table, dir)
//!   sorted *.csv       BTreeMap<id, MergedRecord>   <name>_merged.csv
//! ```
//!
//! Run it only after every worker has written its final checkpoint.

use csv::WriterBuilder;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::checkpoint::{read_checkpoint, CheckpointRow};
use crate::config::is_checkpoint_file_name;
use crate::error::DoseError;
use crate::geometry::{DetectorId, Position};
use crate::statistics::{derived_statistics, DoseStatistics};
use crate::DoseResult;

/// Default merged file name
pub const DEFAULT_MERGED_FILE_NAME: &str = "dose_merged.csv";

/// Every merged file name ends with this
pub const MERGED_SUFFIX: &str = "_merged.csv";

/// Column header of the merged output
pub const MERGED_HEADER: [&str; 8] = [
    "Detector_Number",
    "x_cm",
    "y_cm",
    "z_cm",
    "Total_Dose_Gy",
    "Dose_Per_Particle_Gy",
    "Uncertainty_3sigma_Gy",
    "nEvents",
];

/// Which event count normalizes a merged detector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EventNormalization {
    /// Sum of `nEvents` over the files that list the detector
    #[default]
    ContributingThreads,
    /// Sum of every file's event count, whether or not it lists the detector
    AllThreads,
}

/// Pooled sums for one detector across threads
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MergedRecord {
    pub id: DetectorId,
    /// From the first file (in merge order) that lists the detector
    pub position: Position,
    pub total_dose: f64,
    pub dose_squared_sum: f64,
    /// Σ nEvents over contributing rows
    pub n_events: u64,
    /// Number of files that listed this detector
    pub contributions: usize,
}

impl MergedRecord {
    fn from_row(row: &CheckpointRow) -> Self {
        Self {
            id: row.id,
            position: row.position,
            total_dose: 0.0,
            dose_squared_sum: 0.0,
            n_events: 0,
            contributions: 0,
        }
    }

    fn add(&mut self, row: &CheckpointRow) {
        self.total_dose += row.total_dose;
        self.dose_squared_sum += row.dose_squared_sum;
        self.n_events += row.n_events;
        self.contributions += 1;
    }

    pub fn statistics(&self) -> DoseStatistics {
        derived_statistics(self.total_dose, self.dose_squared_sum, self.n_events)
    }
}

/// Merged records plus bookkeeping for one merge run
#[derive(Debug, Clone, Default)]
pub struct MergeTable {
    pub records: BTreeMap<DetectorId, MergedRecord>,
    /// Σ of each file's event count
    pub total_events: u64,
    pub files_read: usize,
    pub files_skipped: usize,
    pub rows_merged: usize,
    pub rows_skipped: usize,
}

impl MergeTable {
    /// Fold one file's rows into the table.
    ///
    /// A row whose event count would overflow the detector's or the run's
    /// pooled count is dropped and counted in `rows_skipped`. Returns the
    /// number of rows dropped.
    pub fn add_rows(&mut self, rows: &[CheckpointRow]) -> usize {
        let mut file_events = 0u64;
        let mut rejected = 0;
        for row in rows {
            let detector_events = self.records.get(&row.id).map_or(0, |r| r.n_events);
            let fits = detector_events.checked_add(row.n_events).is_some()
                && self
                    .total_events
                    .checked_add(file_events.max(row.n_events))
                    .is_some();
            if !fits {
                log::warn!(
                    "Dropping row for detector {}: nEvents {} overflows the pooled count",
                    row.id,
                    row.n_events
                );
                rejected += 1;
                continue;
            }

            self.records
                .entry(row.id)
                .or_insert_with(|| MergedRecord::from_row(row))
                .add(row);
            file_events = file_events.max(row.n_events);
            self.rows_merged += 1;
        }
        // Every accepted row was checked against this sum
        self.total_events += file_events;
        self.rows_skipped += rejected;
        rejected
    }

    /// Largest relative 3σ uncertainty over detectors with non-zero dose
    pub fn max_relative_uncertainty(&self) -> Option<f64> {
        self.records
            .values()
            .filter_map(|r| r.statistics().relative_uncertainty())
            .reduce(f64::max)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, id: DetectorId) -> Option<&MergedRecord> {
        self.records.get(&id)
    }
}

/// Outcome of [`ResultMerger::merge_directory`]
#[derive(Debug, Clone, PartialEq)]
pub struct MergeSummary {
    pub output_path: PathBuf,
    pub files_read: usize,
    pub files_skipped: usize,
    pub detectors: usize,
    pub rows_merged: usize,
    pub rows_skipped: usize,
    pub total_events: u64,
    /// Worst relative 3σ uncertainty among detectors with dose
    pub max_relative_uncertainty: Option<f64>,
}

/// Combines per-thread checkpoints into one merged CSV
#[derive(Debug, Clone)]
pub struct ResultMerger {
    output_file_name: String,
    normalization: EventNormalization,
    /// Only checkpoints whose name starts with this are merged
    file_prefix: Option<String>,
}

impl Default for ResultMerger {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultMerger {
    pub fn new() -> Self {
        Self {
            output_file_name: DEFAULT_MERGED_FILE_NAME.to_string(),
            normalization: EventNormalization::default(),
            file_prefix: None,
        }
    }

    /// Set the merged file name (placed in the merged directory)
    pub fn with_output_name(mut self, name: impl Into<String>) -> Self {
        self.output_file_name = name.into();
        self
    }

    pub fn with_normalization(mut self, normalization: EventNormalization) -> Self {
        self.normalization = normalization;
        self
    }

    /// Restrict discovery to checkpoints whose file name starts with `prefix`
    pub fn with_file_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.file_prefix = Some(prefix.into());
        self
    }

    /// The merged name must end in `_merged.csv` and name a plain file, so
    /// it can never be rediscovered as a checkpoint.
    pub fn check_output_name(&self) -> DoseResult<()> {
        let name = self.output_file_name.as_str();
        let plain = !name.contains('/') && !name.contains('\\');
        if plain && name.len() > MERGED_SUFFIX.len() && name.ends_with(MERGED_SUFFIX) {
            return Ok(());
        }
        Err(DoseError::config(format!(
            "merged file name '{}' must be a plain file name ending in '{}'",
            name, MERGED_SUFFIX
        )))
    }

    /// Checkpoint files in `dir`, sorted lexicographically.
    pub fn discover(&self, dir: impl AsRef<Path>) -> DoseResult<Vec<PathBuf>> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(DoseError::MissingDirectory(dir.to_path_buf()));
        }

        let mut files = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            let matches = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|name| self.accepts(name))
                .unwrap_or(false);
            if matches {
                files.push(path);
            }
        }

        files.sort();
        log::debug!("Found {} checkpoint files in {:?}", files.len(), dir);
        Ok(files)
    }

    fn accepts(&self, name: &str) -> bool {
        let prefixed = match &self.file_prefix {
            Some(prefix) => name.starts_with(prefix.as_str()),
            None => true,
        };
        prefixed && is_checkpoint_file_name(name)
    }

    /// Parse and combine `files` in the order given.
    ///
    /// Unreadable files are skipped with a warning, malformed rows are
    /// counted and dropped.
    pub fn accumulate<P: AsRef<Path>>(&self, files: &[P]) -> MergeTable {
        let mut table = MergeTable::default();

        for file in files {
            let file = file.as_ref();
            match read_checkpoint(file) {
                Ok(parsed) => {
                    log::debug!(
                        "{:?}: {} rows, {} skipped",
                        file,
                        parsed.rows.len(),
                        parsed.skipped_rows
                    );
                    if parsed.skipped_rows > 0 {
                        log::warn!(
                            "Skipped {} malformed rows in {:?}",
                            parsed.skipped_rows,
                            file
                        );
                    }
                    table.add_rows(&parsed.rows);
                    table.rows_skipped += parsed.skipped_rows;
                    table.files_read += 1;
                }
                Err(e) => {
                    log::warn!("Skipping unreadable checkpoint {:?}: {}", file, e);
                    table.files_skipped += 1;
                }
            }
        }

        table
    }

    /// Write the merged CSV into `dir`, one row per detector by ascending id.
    pub fn export(&self, table: &MergeTable, dir: impl AsRef<Path>) -> DoseResult<PathBuf> {
        let output_path = dir.as_ref().join(&self.output_file_name);
        let mut writer = WriterBuilder::new().from_path(&output_path)?;
        writer.write_record(MERGED_HEADER)?;

        for record in table.records.values() {
            let n_events = match self.normalization {
                EventNormalization::ContributingThreads => record.n_events,
                EventNormalization::AllThreads => table.total_events,
            };
            let stats = derived_statistics(record.total_dose, record.dose_squared_sum, n_events);
            writer.write_record([
                record.id.to_string(),
                record.position[0].to_string(),
                record.position[1].to_string(),
                record.position[2].to_string(),
                format!("{:e}", record.total_dose),
                format!("{:e}", stats.dose_per_event),
                format!("{:e}", stats.uncertainty_3sigma),
                n_events.to_string(),
            ])?;
        }
        writer.flush()?;

        log::info!("Merged {} detectors into {:?}", table.len(), output_path);
        Ok(output_path)
    }

    /// Discover, accumulate and export in one go.
    ///
    /// Returns `Ok(None)` without writing anything when `dir` is missing
    /// or holds no checkpoints. An output name that could be mistaken for
    /// a checkpoint is a configuration error.
    pub fn merge_directory(&self, dir: impl AsRef<Path>) -> DoseResult<Option<MergeSummary>> {
        self.check_output_name()?;
        let dir = dir.as_ref();
        let files = match self.discover(dir) {
            Ok(files) => files,
            Err(DoseError::MissingDirectory(path)) => {
                log::warn!("Merge directory {:?} does not exist; nothing merged", path);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        if files.is_empty() {
            log::warn!("No checkpoint files in {:?}; nothing merged", dir);
            return Ok(None);
        }

        log::info!("Merging {} checkpoint files from {:?}", files.len(), dir);
        let table = self.accumulate(&files);
        if table.files_read == 0 {
            log::warn!("None of the checkpoint files in {:?} could be read", dir);
            return Ok(None);
        }

        let output_path = self.export(&table, dir)?;
        Ok(Some(MergeSummary {
            output_path,
            files_read: table.files_read,
            files_skipped: table.files_skipped,
            detectors: table.len(),
            rows_merged: table.rows_merged,
            rows_skipped: table.rows_skipped,
            total_events: table.total_events,
            max_relative_uncertainty: table.max_relative_uncertainty(),
        }))
    }
}
