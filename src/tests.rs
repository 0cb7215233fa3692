//! Integration Tests for Dose Tally
//!
//! End-to-end checks across accumulator, checkpoint files and merger.

use crate::accumulator::DoseAccumulator;
use crate::checkpoint::read_checkpoint;
use crate::config::ScoringConfig;
use crate::geometry::{DetectorGrid, DetectorId, FixedMass, MassSource, MEV_TO_JOULE};
use crate::merger::ResultMerger;
use crate::source::{BeamConfig, Deposit, EventSource, SyntheticBeam};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

/// Deterministic event list: every detector in `ids` is hit in every
/// event, with a varying number of steps.
fn scripted_events(n_events: usize, ids: &[DetectorId]) -> Vec<Vec<Deposit>> {
    (0..n_events)
        .map(|e| {
            let mut deposits = Vec::new();
            for (k, &id) in ids.iter().enumerate() {
                let steps = 1 + (e + k) % 3;
                for s in 0..steps {
                    let energy = 0.05 * (1 + (e * 7 + k * 3 + s) % 11) as f64;
                    deposits.push(Deposit::new(id, energy, [k as f64, 0.0, 1.0]));
                }
            }
            deposits
        })
        .collect()
}

fn accumulator(dir: &Path, thread_index: usize) -> DoseAccumulator {
    let config = ScoringConfig::default()
        .with_output(dir, "part")
        .with_save_interval(1_000)
        .with_seed(11);
    let mass: Arc<dyn MassSource> = Arc::new(FixedMass(MEV_TO_JOULE));
    DoseAccumulator::new(thread_index, 11, Arc::new(config), mass).unwrap()
}

fn feed(acc: &mut DoseAccumulator, events: &[Vec<Deposit>]) {
    for event in events {
        acc.begin_event();
        for d in event {
            acc.record_deposit(d.detector_id, d.energy_mev, d.position).unwrap();
        }
        acc.end_event();
    }
}

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-9 * a.abs().max(b.abs()).max(1.0)
}

// ═══════════════════════════════════════════════════════════════════════════
// MERGE ADDITIVITY
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod additivity_tests {
    use super::*;

    #[test]
    fn test_partition_merge_matches_single_accumulator() {
        let ids = [2, 5, 9];
        let events = scripted_events(60, &ids);

        // Reference: one accumulator over all events
        let reference_dir = TempDir::new().unwrap();
        let mut reference = accumulator(reference_dir.path(), 0);
        feed(&mut reference, &events);

        // Same events split unevenly over three workers
        let parts_dir = TempDir::new().unwrap();
        let bounds = [0, 7, 38, 60];
        for t in 0..3 {
            let mut acc = accumulator(parts_dir.path(), t);
            feed(&mut acc, &events[bounds[t]..bounds[t + 1]]);
            acc.flush();
        }

        let merger = ResultMerger::new();
        let table = merger.accumulate(&merger.discover(parts_dir.path()).unwrap());

        assert_eq!(table.len(), ids.len());
        for id in ids {
            let merged = table.get(id).unwrap();
            let single = reference.record(id).unwrap();
            assert!(close(merged.total_dose, single.total_dose));
            assert!(close(merged.dose_squared_sum, single.dose_squared_sum));
            assert_eq!(merged.n_events, reference.event_count());

            let a = merged.statistics();
            let b = reference.statistics(id).unwrap();
            assert!(close(a.dose_per_event, b.dose_per_event));
            assert!(close(a.uncertainty_3sigma, b.uncertainty_3sigma));
        }
    }

    #[test]
    fn test_merge_order_does_not_change_sums() {
        let ids = [1, 4];
        let events = scripted_events(30, &ids);
        let dir = TempDir::new().unwrap();
        for t in 0..3 {
            let mut acc = accumulator(dir.path(), t);
            feed(&mut acc, &events[t * 10..(t + 1) * 10]);
            acc.flush();
        }

        let merger = ResultMerger::new();
        let files = merger.discover(dir.path()).unwrap();
        let mut reversed = files.clone();
        reversed.reverse();

        let forward = merger.accumulate(&files);
        let backward = merger.accumulate(&reversed);
        for id in ids {
            let f = forward.get(id).unwrap();
            let b = backward.get(id).unwrap();
            assert!(close(f.total_dose, b.total_dose));
            assert!(close(f.dose_squared_sum, b.dose_squared_sum));
            assert_eq!(f.n_events, b.n_events);
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// CHECKPOINT LIFECYCLE
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod lifecycle_tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_only_latest_checkpoint_counts() {
        let dir = TempDir::new().unwrap();
        let events = scripted_events(20, &[3]);
        let mut acc = accumulator(dir.path(), 0);

        feed(&mut acc, &events[..10]);
        acc.flush();
        feed(&mut acc, &events[10..]);
        acc.flush();

        let merger = ResultMerger::new();
        let table = merger.accumulate(&merger.discover(dir.path()).unwrap());
        let merged = table.get(3).unwrap();
        assert_eq!(merged.n_events, 20);
        assert!(close(merged.total_dose, acc.record(3).unwrap().total_dose));
    }

    #[test]
    fn test_truncated_checkpoint_still_merges() {
        let dir = TempDir::new().unwrap();
        let mut acc = accumulator(dir.path(), 0);
        feed(&mut acc, &scripted_events(5, &[1, 2, 3]));
        acc.flush();

        // Cut the last row in half, as a crash mid-write would
        let content = fs::read_to_string(acc.checkpoint_path()).unwrap();
        let cut = content.trim_end().len() - 6;
        fs::write(acc.checkpoint_path(), &content[..cut]).unwrap();

        let parsed = read_checkpoint(acc.checkpoint_path()).unwrap();
        assert_eq!(parsed.rows.len(), 2);

        let merger = ResultMerger::new();
        let summary = merger.merge_directory(dir.path()).unwrap().unwrap();
        assert_eq!(summary.detectors, 2);
        assert_eq!(summary.rows_skipped, 1);
    }

    #[test]
    fn test_synthetic_workers_merge_consistently() {
        let dir = TempDir::new().unwrap();
        let grid = DetectorGrid {
            grid_n: 3,
            num_layers: 1,
            ..DetectorGrid::default()
        };
        let beam = BeamConfig {
            events: 200,
            hit_probability: 1.0,
            ..BeamConfig::default()
        };

        let mut total_per_detector = std::collections::HashMap::new();
        for t in 0..2 {
            let mut acc = accumulator(dir.path(), t);
            let mut source = SyntheticBeam::new(grid, beam, 11, t);
            while let Some(event) = source.next_event() {
                acc.begin_event();
                for d in &event {
                    acc.record_deposit(d.detector_id, d.energy_mev, d.position).unwrap();
                }
                acc.end_event();
            }
            acc.flush();
            for record in acc.records() {
                *total_per_detector.entry(record.id).or_insert(0.0) += record.total_dose;
            }
        }

        let merger = ResultMerger::new();
        let table = merger.accumulate(&merger.discover(dir.path()).unwrap());
        assert_eq!(table.len(), total_per_detector.len());
        for (id, total) in total_per_detector {
            assert!(close(table.get(id).unwrap().total_dose, total));
        }
        assert_eq!(table.total_events, 400);
    }
}
