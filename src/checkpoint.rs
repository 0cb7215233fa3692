//! # Dose Checkpoints
//!
//! Read and write the per-thread checkpoint CSV.
//!
//! ## File Format
//!
//! ```text
//! Detector_Number,x_cm,y_cm,z_cm,Total_Dose_Gy,Dose_Per_Particle_Gy,Dose_Squared_Sum,Mean_Dose_Squared_Gy2,Uncertainty_3sigma_Gy,nEvents
//! 7,0.4,-0.4,15,6e0,2e0,2e1,6.666666666666667e0,2.8284271247461903e0,3
//! ```
//!
//! Each flush replaces the whole file with the thread's lifetime totals,
//! so only the most recent checkpoint of a thread carries information.
//! The replacement goes through a sibling temp file and a rename, so
//! readers see either the previous or the new checkpoint.
//!
//! Dose columns are written in shortest round-trip exponent form so the
//! merger reads back exactly the sums that were accumulated. The derived
//! columns are informational; the merger ignores them.

use csv::{ReaderBuilder, StringRecord, Trim, WriterBuilder};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::DoseError;
use crate::geometry::{DetectorId, Position};
use crate::statistics::{derived_statistics, DoseStatistics};
use crate::DoseResult;

/// Column header of a per-thread checkpoint
pub const CHECKPOINT_HEADER: [&str; 10] = [
    "Detector_Number",
    "x_cm",
    "y_cm",
    "z_cm",
    "Total_Dose_Gy",
    "Dose_Per_Particle_Gy",
    "Dose_Squared_Sum",
    "Mean_Dose_Squared_Gy2",
    "Uncertainty_3sigma_Gy",
    "nEvents",
];

/// One detector line of a checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRow {
    pub id: DetectorId,
    pub position: Position,
    pub total_dose: f64,
    pub dose_squared_sum: f64,
    pub n_events: u64,
}

impl CheckpointRow {
    pub fn statistics(&self) -> DoseStatistics {
        derived_statistics(self.total_dose, self.dose_squared_sum, self.n_events)
    }

    fn to_record(&self) -> [String; 10] {
        let stats = self.statistics();
        [
            self.id.to_string(),
            self.position[0].to_string(),
            self.position[1].to_string(),
            self.position[2].to_string(),
            format!("{:e}", self.total_dose),
            format!("{:e}", stats.dose_per_event),
            format!("{:e}", self.dose_squared_sum),
            format!("{:e}", stats.mean_dose_squared),
            format!("{:e}", stats.uncertainty_3sigma),
            self.n_events.to_string(),
        ]
    }
}

/// Point-in-time copy of one accumulator's table, sorted by id
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CheckpointTable {
    /// Worker that produced the table
    pub thread_index: usize,
    /// Completed events at snapshot time
    pub n_events: u64,
    /// One row per detector seen so far
    pub rows: Vec<CheckpointRow>,
}

impl CheckpointTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Rows recovered from a checkpoint file
#[derive(Debug, Clone, Default)]
pub struct ParsedCheckpoint {
    pub rows: Vec<CheckpointRow>,
    /// Lines that were neither header, comment, nor a valid row
    pub skipped_rows: usize,
}

/// Replace the checkpoint at `path` with `table`.
pub fn write_checkpoint(path: impl AsRef<Path>, table: &CheckpointTable) -> DoseResult<()> {
    let path = path.as_ref();
    let tmp_path = temp_path_for(path);

    let result = write_rows(&tmp_path, table).and_then(|()| {
        fs::rename(&tmp_path, path)?;
        Ok(())
    });
    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    result
}

fn write_rows(path: &Path, table: &CheckpointTable) -> DoseResult<()> {
    let mut writer = WriterBuilder::new().from_path(path)?;
    writer.write_record(CHECKPOINT_HEADER)?;
    for row in &table.rows {
        writer.write_record(row.to_record())?;
    }
    let file = writer
        .into_inner()
        .map_err(|e| DoseError::Io(e.into_error()))?;
    file.sync_all()?;
    Ok(())
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Read every valid row of a checkpoint file.
///
/// Blank lines, `#` comments and the header are ignored. Rows with the
/// wrong column count, non-numeric fields, or negative sums are counted
/// in `skipped_rows` and otherwise dropped. Only failing to read the file
/// itself is an error.
pub fn read_checkpoint(path: impl AsRef<Path>) -> DoseResult<ParsedCheckpoint> {
    let path = path.as_ref();
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .comment(Some(b'#'))
        .trim(Trim::All)
        .from_path(path)?;

    let mut parsed = ParsedCheckpoint::default();
    for result in reader.records() {
        let record = match result {
            Ok(record) => record,
            Err(e) if e.is_io_error() => return Err(e.into()),
            Err(e) => {
                log::debug!("{:?}: unreadable row skipped: {}", path, e);
                parsed.skipped_rows += 1;
                continue;
            }
        };

        if is_blank(&record) || is_header(&record) {
            continue;
        }
        match parse_checkpoint_row(&record) {
            Ok(row) => parsed.rows.push(row),
            Err(e) => {
                log::debug!("{:?}: {}", path, e);
                parsed.skipped_rows += 1;
            }
        }
    }

    Ok(parsed)
}

fn is_blank(record: &StringRecord) -> bool {
    record.iter().all(|field| field.is_empty())
}

fn is_header(record: &StringRecord) -> bool {
    record
        .get(0)
        .map(|field| field.contains("Detector") || field.contains("x_cm"))
        .unwrap_or(false)
}

/// Parse one data row of the checkpoint format.
pub fn parse_checkpoint_row(record: &StringRecord) -> DoseResult<CheckpointRow> {
    if record.len() != CHECKPOINT_HEADER.len() {
        return Err(DoseError::MalformedRow(format!(
            "expected {} columns, found {}",
            CHECKPOINT_HEADER.len(),
            record.len()
        )));
    }

    let mut values = [0.0f64; 10];
    for (i, field) in record.iter().enumerate() {
        values[i] = parse_float(field, CHECKPOINT_HEADER[i])?;
    }

    let id: DetectorId = parse_integral(&record[0], CHECKPOINT_HEADER[0])?;
    let n_events: u64 = parse_integral(&record[9], CHECKPOINT_HEADER[9])?;
    let total_dose = values[4];
    let dose_squared_sum = values[6];

    if total_dose < 0.0 || dose_squared_sum < 0.0 {
        return Err(DoseError::MalformedRow(format!(
            "negative sums for detector {}",
            id
        )));
    }

    Ok(CheckpointRow {
        id,
        position: [values[1], values[2], values[3]],
        total_dose,
        dose_squared_sum,
        n_events,
    })
}

fn parse_float(field: &str, column: &str) -> DoseResult<f64> {
    match field.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(DoseError::MalformedRow(format!(
            "column {} is not a finite number: '{}'",
            column, field
        ))),
    }
}

/// Integer column, tolerating writers that print integers as `7.0`
fn parse_integral<T>(field: &str, column: &str) -> DoseResult<T>
where
    T: FromStr + TryFrom<i64>,
{
    if let Ok(v) = field.parse::<T>() {
        return Ok(v);
    }
    let bad = || {
        DoseError::MalformedRow(format!("column {} is not an integer: '{}'", column, field))
    };
    let v = field.parse::<f64>().map_err(|_| bad())?;
    if v.fract() != 0.0 || v.abs() > i64::MAX as f64 {
        return Err(bad());
    }
    T::try_from(v as i64).map_err(|_| bad())
}
