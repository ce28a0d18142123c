//! Free spectral range of a Fabry-Perot or ring cavity.
//!
//! Lengths are in micrometres and the FSR comes out in GHz. The `1e3` factors in the
//! finesse formulas rely on exactly this unit pairing.

use serde::{Deserialize, Serialize};

/// Speed of light in vacuum, m/s
pub const SPEED_OF_LIGHT: f64 = 299_792_458.0;

/// Cavity geometry
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CavityParameters {
    /// Mirror spacing (linear) or round-trip length (ring), µm
    pub length_um: f64,
    /// Uncertainty of the length, µm
    pub length_error_um: f64,
    /// Ring cavity: FSR is `c/L` instead of `c/2L`
    pub is_ring_cavity: bool,
}

impl Default for CavityParameters {
    fn default() -> Self {
        Self {
            length_um: 460.0,
            length_error_um: 0.02,
            is_ring_cavity: false,
        }
    }
}

impl CavityParameters {
    /// FSR of this geometry
    pub fn fsr(&self) -> FreeSpectralRange {
        compute_fsr(self.length_um, self.length_error_um, self.is_ring_cavity)
    }
}

/// FSR and its propagated uncertainty, both in GHz
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FreeSpectralRange {
    /// FSR in GHz
    pub value_ghz: f64,
    /// Uncertainty in GHz
    pub error_ghz: f64,
}

/// FSR of a cavity of length `length_um` (± `length_error_um`).
///
/// Linear: `c / 2L`, error `c·δL / (2L)²`. Ring: `c / L`, error `c·δL / L²`.
pub fn compute_fsr(length_um: f64, length_error_um: f64, is_ring_cavity: bool) -> FreeSpectralRange {
    let optical_length = if is_ring_cavity {
        length_um
    } else {
        2.0 * length_um
    };
    FreeSpectralRange {
        value_ghz: SPEED_OF_LIGHT / (optical_length * 1e3),
        error_ghz: SPEED_OF_LIGHT * length_error_um / (optical_length.powi(2) * 1e3),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_cavity_460um() {
        let fsr = compute_fsr(460.0, 0.02, false);
        assert!((fsr.value_ghz - 325.8613).abs() < 1e-3);
        assert!((fsr.error_ghz - 0.0070838).abs() < 1e-6);
    }

    #[test]
    fn ring_cavity_is_twice_linear() {
        let linear = compute_fsr(460.0, 0.02, false);
        let ring = compute_fsr(460.0, 0.02, true);
        assert!((ring.value_ghz - 2.0 * linear.value_ghz).abs() < 1e-9);
        assert!((ring.value_ghz - SPEED_OF_LIGHT / 460e3).abs() < 1e-9);
        assert!((ring.error_ghz - SPEED_OF_LIGHT * 0.02 / (460.0_f64.powi(2) * 1e3)).abs() < 1e-12);
    }

    #[test]
    fn error_scales_linearly_with_length_error() {
        for length in [10.0, 460.0, 12_345.0] {
            let base = compute_fsr(length, 0.01, false);
            let triple = compute_fsr(length, 0.03, false);
            assert!((triple.error_ghz - 3.0 * base.error_ghz).abs() < 1e-12 * base.value_ghz);
            assert_eq!(triple.value_ghz, base.value_ghz);
            assert_eq!(compute_fsr(length, 0.0, true).error_ghz, 0.0);
        }
    }
}
