//! # Scoring Configuration
//!
//! Run-wide settings shared read-only by every accumulator. A single
//! `ScoringConfig` is built once (defaults, optional JSON file, CLI
//! overrides), validated, and handed to each worker behind an `Arc`.
//!
//! ## File Naming
//!
//! ```text
//! <output_dir>/<base>_seed_<seed>_t<thread>.csv   per-thread checkpoint
//! <output_dir>/<base>_merged.csv                  merged result
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::DoseError;
use crate::DoseResult;

/// Events between checkpoint flushes when nothing else is configured
pub const DEFAULT_SAVE_INTERVAL: u64 = 1_000_000;

/// Automatic seeds are limited to nine digits
const AUTO_SEED_MODULUS: u128 = 1_000_000_000;

/// Configuration for dose scoring and checkpointing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Number of completed events between checkpoint flushes
    pub save_interval: u64,
    /// Base name for checkpoint and merged files (no extension)
    pub output_base_name: String,
    /// Directory receiving checkpoint and merged files
    pub output_dir: PathBuf,
    /// Random seed; `None` derives one from the wall clock
    pub seed: Option<u64>,
    /// Merge thread checkpoints when the run finishes
    pub merge_enabled: bool,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            save_interval: DEFAULT_SAVE_INTERVAL,
            output_base_name: "output".to_string(),
            output_dir: PathBuf::from("."),
            seed: None,
            merge_enabled: true,
        }
    }
}

impl ScoringConfig {
    /// Load a configuration from a JSON file. Missing fields take defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> DoseResult<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        let config: ScoringConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Builder-style save interval override
    pub fn with_save_interval(mut self, save_interval: u64) -> Self {
        self.save_interval = save_interval;
        self
    }

    /// Builder-style output location override
    pub fn with_output(mut self, dir: impl Into<PathBuf>, base_name: impl Into<String>) -> Self {
        self.output_dir = dir.into();
        self.output_base_name = base_name.into();
        self
    }

    /// Builder-style seed override
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Builder-style merge toggle
    pub fn with_merge(mut self, enabled: bool) -> Self {
        self.merge_enabled = enabled;
        self
    }

    /// Check preconditions that would make a run meaningless.
    pub fn validate(&self) -> DoseResult<()> {
        if self.save_interval == 0 {
            return Err(DoseError::config("save_interval must be greater than zero"));
        }
        let base = self.output_base_name.trim();
        if base.is_empty() {
            return Err(DoseError::config("output_base_name must not be empty"));
        }
        if base.contains('/') || base.contains('\\') {
            return Err(DoseError::config(format!(
                "output_base_name '{}' must not contain a path separator",
                self.output_base_name
            )));
        }
        Ok(())
    }

    /// The configured seed, or one derived from the current time.
    ///
    /// Call once per run and pass the result to every worker.
    pub fn resolved_seed(&self) -> u64 {
        match self.seed {
            Some(seed) => seed,
            None => {
                let millis = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_millis())
                    .unwrap_or(0);
                (millis % AUTO_SEED_MODULUS) as u64
            }
        }
    }

    /// Common start of every checkpoint name of one run
    pub fn checkpoint_prefix(&self, seed: u64) -> String {
        format!("{}_seed_{}_t", self.output_base_name, seed)
    }

    /// File name of a worker's checkpoint
    pub fn checkpoint_file_name(&self, seed: u64, thread_index: usize) -> String {
        format!("{}{}.csv", self.checkpoint_prefix(seed), thread_index)
    }

    /// Full path of a worker's checkpoint
    pub fn checkpoint_path(&self, seed: u64, thread_index: usize) -> PathBuf {
        self.output_dir.join(self.checkpoint_file_name(seed, thread_index))
    }

    /// File name of the merged result
    pub fn merged_file_name(&self) -> String {
        format!("{}_merged.csv", self.output_base_name)
    }
}

/// Whether a file name follows the checkpoint convention
/// `<base>_seed_<seed>_t<thread>.csv`.
pub fn is_checkpoint_file_name(name: &str) -> bool {
    let Some(stem) = name.strip_suffix(".csv") else {
        return false;
    };
    let Some((head, thread)) = stem.rsplit_once("_t") else {
        return false;
    };
    if thread.is_empty() || !thread.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    match head.rsplit_once("_seed_") {
        Some((base, seed)) => {
            !base.is_empty() && !seed.is_empty() && seed.bytes().all(|b| b.is_ascii_digit())
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_is_valid() {
        let config = ScoringConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.save_interval, DEFAULT_SAVE_INTERVAL);
        assert!(config.merge_enabled);
    }

    #[test]
    fn test_zero_save_interval_rejected() {
        let config = ScoringConfig::default().with_save_interval(0);
        let err = config.validate().unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("save_interval"));
    }

    #[test]
    fn test_bad_base_name_rejected() {
        assert!(ScoringConfig::default().with_output(".", "  ").validate().is_err());
        assert!(ScoringConfig::default().with_output(".", "a/b").validate().is_err());
    }

    #[test]
    fn test_file_names() {
        let config = ScoringConfig::default().with_output("/tmp/run", "phantom");
        assert_eq!(config.checkpoint_file_name(42, 3), "phantom_seed_42_t3.csv");
        assert_eq!(
            config.checkpoint_path(42, 3),
            PathBuf::from("/tmp/run/phantom_seed_42_t3.csv")
        );
        assert_eq!(config.merged_file_name(), "phantom_merged.csv");
        assert!(config
            .checkpoint_file_name(42, 3)
            .starts_with(&config.checkpoint_prefix(42)));
        assert!(!config
            .checkpoint_file_name(421, 3)
            .starts_with(&config.checkpoint_prefix(42)));
    }

    #[test]
    fn test_checkpoint_name_matching() {
        assert!(is_checkpoint_file_name("output_seed_12345_t0.csv"));
        assert!(is_checkpoint_file_name("my_run_t_seed_7_t12.csv"));

        assert!(!is_checkpoint_file_name("output_merged.csv"));
        assert!(!is_checkpoint_file_name("output_seed_12345_t0.txt"));
        assert!(!is_checkpoint_file_name("output_seed_12345_t.csv"));
        assert!(!is_checkpoint_file_name("output_seed_x_t1.csv"));
        assert!(!is_checkpoint_file_name("_seed_1_t1.csv"));
        assert!(!is_checkpoint_file_name("output_t1.csv"));
    }

    #[test]
    fn test_merged_name_never_matches_convention() {
        let config = ScoringConfig::default().with_output(".", "run_seed_1_t2");
        assert!(!is_checkpoint_file_name(&config.merged_file_name()));
    }

    #[test]
    fn test_resolved_seed() {
        assert_eq!(ScoringConfig::default().with_seed(99).resolved_seed(), 99);
        assert!(ScoringConfig::default().resolved_seed() < 1_000_000_000);
    }

    #[test]
    fn test_json_roundtrip_with_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("scoring.json");
        fs::write(&path, r#"{ "save_interval": 500, "seed": 7 }"#).unwrap();

        let config = ScoringConfig::from_json_file(&path).unwrap();
        assert_eq!(config.save_interval, 500);
        assert_eq!(config.seed, Some(7));
        assert_eq!(config.output_base_name, "output");

        fs::write(&path, r#"{ "save_interval": 0 }"#).unwrap();
        assert!(ScoringConfig::from_json_file(&path).is_err());
    }
}
