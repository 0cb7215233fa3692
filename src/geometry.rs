//! Detector geometry and mass resolution
//!
//! Detectors are identical boxes placed on a layered square grid. All
//! instances share one shape and material, so a single mass value
//! converts every deposit to dose.

use serde::{Deserialize, Serialize};

use crate::error::DoseError;
use crate::DoseResult;

/// Joules per MeV
pub const MEV_TO_JOULE: f64 = 1.602_176_634e-13;

/// Integer copy number identifying a detector instance
pub type DetectorId = i32;

/// Detector center in centimeters
pub type Position = [f64; 3];

/// Source of the (uniform) detector mass.
///
/// Shared read-only by every accumulator, hence `Send + Sync`.
pub trait MassSource: Send + Sync {
    /// Mass of one detector volume in kilograms
    fn detector_mass_kg(&self) -> DoseResult<f64>;
}

/// A mass supplied directly, bypassing geometry
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixedMass(pub f64);

impl MassSource for FixedMass {
    fn detector_mass_kg(&self) -> DoseResult<f64> {
        check_mass(self.0)
    }
}

fn check_mass(mass_kg: f64) -> DoseResult<f64> {
    if mass_kg.is_finite() && mass_kg > 0.0 {
        Ok(mass_kg)
    } else {
        Err(DoseError::mass(format!(
            "detector mass must be positive and finite, got {} kg",
            mass_kg
        )))
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// MATERIALS
// ═══════════════════════════════════════════════════════════════════════════

/// Detector material
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Material {
    Silicon,
    Water,
    Air,
    Pmma,
    Lead,
    /// Arbitrary material given by density
    Custom { density_g_cm3: f64 },
}

impl Material {
    /// Density in g/cm³
    pub fn density_g_cm3(&self) -> f64 {
        match self {
            Self::Silicon => 2.33,
            Self::Water => 1.0,
            Self::Air => 1.204_79e-3,
            Self::Pmma => 1.19,
            Self::Lead => 11.35,
            Self::Custom { density_g_cm3 } => *density_g_cm3,
        }
    }

    /// Look up a material by NIST-style name (`G4_Si`, `G4_WATER`, ...)
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_uppercase().as_str() {
            "G4_SI" | "SI" | "SILICON" => Some(Self::Silicon),
            "G4_WATER" | "WATER" => Some(Self::Water),
            "G4_AIR" | "AIR" => Some(Self::Air),
            "G4_PLEXIGLASS" | "G4_PMMA" | "PMMA" => Some(Self::Pmma),
            "G4_PB" | "PB" | "LEAD" => Some(Self::Lead),
            _ => None,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// DETECTOR SHAPE
// ═══════════════════════════════════════════════════════════════════════════

/// Box-shaped detector volume
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectorShape {
    /// Half-extents along x, y, z in cm
    pub half_size_cm: [f64; 3],
    /// Detector material
    pub material: Material,
}

impl Default for DetectorShape {
    fn default() -> Self {
        Self {
            half_size_cm: [0.1325, 0.1325, 0.03],
            material: Material::Silicon,
        }
    }
}

impl DetectorShape {
    pub fn new(half_size_cm: [f64; 3], material: Material) -> Self {
        Self { half_size_cm, material }
    }

    /// Volume in cm³
    pub fn volume_cm3(&self) -> f64 {
        let [hx, hy, hz] = self.half_size_cm;
        8.0 * hx * hy * hz
    }
}

impl MassSource for DetectorShape {
    fn detector_mass_kg(&self) -> DoseResult<f64> {
        if self.half_size_cm.iter().any(|h| !(h.is_finite() && *h > 0.0)) {
            return Err(DoseError::mass(format!(
                "degenerate detector box with half-extents {:?} cm",
                self.half_size_cm
            )));
        }
        // g -> kg
        check_mass(self.material.density_g_cm3() * self.volume_cm3() / 1000.0)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// DETECTOR GRID
// ═══════════════════════════════════════════════════════════════════════════

/// Square detector grids stacked in z.
///
/// Copy numbers start at 1 and run over layers, then rows (x), then
/// columns (y). Layers step towards negative z from the first layer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectorGrid {
    /// Detectors per side
    pub grid_n: usize,
    /// Center-to-center spacing in cm
    pub spacing_cm: f64,
    /// Number of layers
    pub num_layers: usize,
    /// Distance between layers in cm
    pub layer_spacing_cm: f64,
    /// z of the first layer in cm
    pub first_layer_z_cm: f64,
}

impl Default for DetectorGrid {
    fn default() -> Self {
        Self {
            grid_n: 40,
            spacing_cm: 0.8,
            num_layers: 5,
            layer_spacing_cm: 2.0,
            first_layer_z_cm: 15.0,
        }
    }
}

impl DetectorGrid {
    /// Total number of detectors
    pub fn len(&self) -> usize {
        self.grid_n * self.grid_n * self.num_layers
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Center of detector `id`, or `None` if it is not on the grid
    pub fn position(&self, id: DetectorId) -> Option<Position> {
        if id < 1 || id as usize > self.len() {
            return None;
        }
        let index = (id - 1) as usize;
        let per_layer = self.grid_n * self.grid_n;
        let layer = index / per_layer;
        let i = (index % per_layer) / self.grid_n;
        let j = index % self.grid_n;

        let offset = -0.5 * (self.grid_n as f64 - 1.0) * self.spacing_cm;
        Some([
            offset + i as f64 * self.spacing_cm,
            offset + j as f64 * self.spacing_cm,
            self.first_layer_z_cm - layer as f64 * self.layer_spacing_cm,
        ])
    }
}

/// Convert an energy deposit to absorbed dose in Gy
#[inline]
pub fn energy_to_dose(energy_mev: f64, mass_kg: f64) -> f64 {
    energy_mev * MEV_TO_JOULE / mass_kg
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_silicon_mass() {
        let shape = DetectorShape::default();
        // 0.265 x 0.265 x 0.06 cm of silicon
        let expected = 2.33 * 0.265 * 0.265 * 0.06 / 1000.0;
        let mass = shape.detector_mass_kg().unwrap();
        assert!((mass - expected).abs() < 1e-15);
    }

    #[test]
    fn test_degenerate_box_fails() {
        let shape = DetectorShape::new([0.1, 0.0, 0.1], Material::Water);
        let err = shape.detector_mass_kg().unwrap_err();
        assert!(err.is_fatal());

        let shape = DetectorShape::new([0.1, 0.1, 0.1], Material::Custom { density_g_cm3: -1.0 });
        assert!(shape.detector_mass_kg().is_err());
    }

    #[test]
    fn test_fixed_mass() {
        assert_eq!(FixedMass(2.0).detector_mass_kg().unwrap(), 2.0);
        assert!(FixedMass(f64::NAN).detector_mass_kg().is_err());
        assert!(FixedMass(0.0).detector_mass_kg().is_err());
    }

    #[test]
    fn test_material_lookup() {
        assert_eq!(Material::from_name("G4_Si"), Some(Material::Silicon));
        assert_eq!(Material::from_name("g4_water"), Some(Material::Water));
        assert_eq!(Material::from_name("unobtainium"), None);
    }

    #[test]
    fn test_grid_positions() {
        let grid = DetectorGrid {
            grid_n: 2,
            spacing_cm: 1.0,
            num_layers: 2,
            layer_spacing_cm: 2.0,
            first_layer_z_cm: 10.0,
        };
        assert_eq!(grid.len(), 8);
        assert_eq!(grid.position(1), Some([-0.5, -0.5, 10.0]));
        assert_eq!(grid.position(2), Some([-0.5, 0.5, 10.0]));
        assert_eq!(grid.position(3), Some([0.5, -0.5, 10.0]));
        assert_eq!(grid.position(5), Some([-0.5, -0.5, 8.0]));
        assert_eq!(grid.position(0), None);
        assert_eq!(grid.position(9), None);
    }

    #[test]
    fn test_energy_to_dose() {
        // 1 MeV into 1 kg
        assert!((energy_to_dose(1.0, 1.0) - MEV_TO_JOULE).abs() < 1e-25);
    }
}
