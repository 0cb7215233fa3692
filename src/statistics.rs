//! # Dose Statistics
//!
//! Derived per-detector statistics computed from raw running sums.
//!
//! Both the live accumulator and the offline merger go through
//! [`derived_statistics`], so a merged file is numerically identical to
//! what a single accumulator would have reported for the pooled events.
//!
//! ```text
//! dose_per_event     = Σd / n
//! mean_dose_squared  = Σd² / n
//! variance           = max(0, Σd²/n − (Σd/n)²)
//! uncertainty_3sigma = 3 · sqrt(variance / n)
//! ```

use serde::{Deserialize, Serialize};

/// Statistics derived from `(total_dose, dose_squared_sum, n_events)`
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DoseStatistics {
    /// Mean dose per source event (Gy)
    pub dose_per_event: f64,
    /// Mean of the squared per-event dose (Gy²)
    pub mean_dose_squared: f64,
    /// Per-event dose variance, clamped at zero (Gy²)
    pub variance: f64,
    /// Three standard errors of `dose_per_event` (Gy)
    pub uncertainty_3sigma: f64,
}

impl DoseStatistics {
    /// Relative 3σ uncertainty, or `None` when the mean is zero
    pub fn relative_uncertainty(&self) -> Option<f64> {
        if self.dose_per_event > 0.0 {
            Some(self.uncertainty_3sigma / self.dose_per_event)
        } else {
            None
        }
    }
}

/// Compute dose statistics from raw sums.
///
/// Never returns NaN or a negative variance: zero events yields all
/// zeros and floating-point cancellation is clamped.
pub fn derived_statistics(total_dose: f64, dose_squared_sum: f64, n_events: u64) -> DoseStatistics {
    if n_events == 0 {
        return DoseStatistics::default();
    }

    let n = n_events as f64;
    let dose_per_event = total_dose / n;
    let mean_dose_squared = dose_squared_sum / n;

    let raw_variance = mean_dose_squared - dose_per_event * dose_per_event;
    let variance = if raw_variance.is_finite() && raw_variance > 0.0 {
        raw_variance
    } else {
        0.0
    };

    DoseStatistics {
        dose_per_event,
        mean_dose_squared,
        variance,
        uncertainty_3sigma: 3.0 * (variance / n).sqrt(),
    }
}
