//! Two-step calibration for unequal modulation sidebands.
//!
//! Step 1 fits carrier and sidebands at the first wavelength and stores the frequency
//! conversion factor. Step 2 fits a single line at the second wavelength and rescales
//! that factor by `(λ1/λ2)²`. Step 2 needs a [`Step1Calibration`]; holding one is the
//! only way to call [`crate::measurement::step2_finesse`].

use serde::{Deserialize, Serialize};

use crate::error::{AppResult, DaqError};

/// Wavelengths of the two calibration passes (any common unit)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationWavelengths {
    /// Wavelength of the step 1 pass
    pub lambda1: f64,
    /// Wavelength of the step 2 pass
    pub lambda2: f64,
}

impl Default for CalibrationWavelengths {
    fn default() -> Self {
        Self {
            lambda1: 1.0,
            lambda2: 1.0,
        }
    }
}

impl CalibrationWavelengths {
    /// `(λ1/λ2)²`
    pub fn ratio_squared(&self) -> f64 {
        (self.lambda1 / self.lambda2).powi(2)
    }
}

/// Output of step 1
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Step1Calibration {
    /// EOM frequency over mean sideband splitting, MHz per time unit
    pub converted_splitting: f64,
    /// Fitted left sideband splitting
    pub splitting_left: f64,
    /// Fitted right sideband splitting
    pub splitting_right: f64,
}

/// Calibration state accumulated across fits
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CalibrationSession {
    step1: Option<Step1Calibration>,
    wavelengths: CalibrationWavelengths,
}

impl CalibrationSession {
    /// Session without step 1 and with unit wavelengths
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a step 1 result, replacing any earlier one
    pub fn record_step1(&mut self, step1: Step1Calibration) {
        self.step1 = Some(step1);
    }

    /// Step 1 result, or a missing-field error if step 1 has not run
    pub fn step1(&self) -> AppResult<&Step1Calibration> {
        self.step1
            .as_ref()
            .ok_or_else(|| DaqError::MissingFitField("step1 converted splitting".to_string()))
    }

    /// Whether step 1 has run
    pub fn has_step1(&self) -> bool {
        self.step1.is_some()
    }

    /// Current λ1/λ2
    pub fn wavelengths(&self) -> CalibrationWavelengths {
        self.wavelengths
    }

    /// Update λ1/λ2; the finesse is not recomputed until step 2 runs again
    pub fn set_wavelengths(&mut self, wavelengths: CalibrationWavelengths) {
        self.wavelengths = wavelengths;
    }

    /// Forget step 1
    pub fn reset(&mut self) {
        self.step1 = None;
    }
}
