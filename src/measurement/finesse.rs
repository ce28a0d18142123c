//! Finesse and its propagated error from fitted line parameters.
//!
//! Errors are summed linearly (worst case), and the spread of two splittings is their
//! population standard deviation. The formulas are kept exactly as used on the bench so
//! that numbers stay comparable with earlier measurement runs.

use serde::{Deserialize, Serialize};

use super::calibration::{CalibrationSession, CalibrationWavelengths, Step1Calibration};
use super::fsr::FreeSpectralRange;
use crate::error::AppResult;
use crate::fitting::{FitModel, FitResult};

/// Finesse and its uncertainty
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FinesseResult {
    /// Finesse (dimensionless)
    pub finesse: f64,
    /// Propagated uncertainty
    pub error: f64,
}

impl FinesseResult {
    /// No finesse available (inconclusive fit or a model without one)
    pub const NONE: FinesseResult = FinesseResult {
        finesse: 0.0,
        error: 0.0,
    };

    /// Finesse with its error
    pub fn new(finesse: f64, error: f64) -> Self {
        Self { finesse, error }
    }

    /// Whether this is exactly [`FinesseResult::NONE`]
    pub fn is_none(&self) -> bool {
        *self == Self::NONE
    }
}

/// Outcome of [`derive_finesse`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Derivation {
    /// Finesse and error
    pub finesse: FinesseResult,
    /// MHz per time unit, for the sideband-calibrated models
    pub conversion: Option<f64>,
}

impl Derivation {
    fn none() -> Self {
        Self {
            finesse: FinesseResult::NONE,
            conversion: None,
        }
    }
}

/// Sideband-calibrated finesse plus the calibration it used
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SidebandFinesse {
    /// Finesse and error
    pub finesse: FinesseResult,
    /// Splittings and conversion factor of this fit
    pub calibration: Step1Calibration,
}

fn mean2(a: f64, b: f64) -> f64 {
    (a + b) / 2.0
}

fn pstd2(a: f64, b: f64) -> f64 {
    (a - b).abs() / 2.0
}

/// Two peaks one FSR apart: `Splitting / FWHM` of each line, averaged
pub fn two_peak_finesse(result: &FitResult) -> AppResult<FinesseResult> {
    let splitting = result.value("Splitting")?;
    let r0 = splitting / result.value("FWHM 0")?;
    let r1 = splitting / result.value("FWHM 1")?;
    Ok(FinesseResult::new(mean2(r0, r1), pstd2(r0, r1)))
}

/// Carrier with two modulation sidebands at `±eom_mhz`
///
/// The sideband splitting calibrates the time axis; the carrier (`FWHM 1`) gives the
/// linewidth.
pub fn sideband_finesse(
    result: &FitResult,
    fsr: FreeSpectralRange,
    eom_mhz: f64,
) -> AppResult<SidebandFinesse> {
    let left = result.value("Splitting left")?;
    let right = result.value("Splitting right")?;
    let fwhm = result.get("FWHM 1")?;

    let conversion = eom_mhz / mean2(left, right);
    let linewidth = fwhm.value * conversion;
    let finesse = fsr.value_ghz * 1e3 / linewidth;
    let error = fsr.value_ghz / (fwhm.value * eom_mhz) * pstd2(left, right)
        + fsr.error_ghz * 1e3 / linewidth
        + fsr.value_ghz * 1e3 / (fwhm.value.powi(2) * conversion) * fwhm.error;

    Ok(SidebandFinesse {
        finesse: FinesseResult::new(finesse, error),
        calibration: Step1Calibration {
            converted_splitting: conversion,
            splitting_left: left,
            splitting_right: right,
        },
    })
}

/// Single line at the second wavelength, calibrated by a stored step 1
pub fn step2_finesse(
    result: &FitResult,
    fsr: FreeSpectralRange,
    eom_mhz: f64,
    step1: &Step1Calibration,
    wavelengths: CalibrationWavelengths,
) -> AppResult<FinesseResult> {
    let fwhm = result.get("FWHM")?;

    let adjusted = wavelengths.ratio_squared() * step1.converted_splitting;
    let linewidth = fwhm.value * adjusted;
    let finesse = fsr.value_ghz * 1e3 / linewidth;
    let error = fsr.value_ghz / (fwhm.value * eom_mhz)
        * pstd2(step1.splitting_left, step1.splitting_right)
        + fsr.error_ghz * 1e3 / linewidth
        + fsr.value_ghz * 1e3 / (fwhm.value.powi(2) * adjusted) * fwhm.error;

    Ok(FinesseResult::new(finesse, error))
}

/// Dispatch on the fit model. A step 1 fit records its calibration in `session`.
pub fn derive_finesse(
    model: FitModel,
    result: &FitResult,
    fsr: FreeSpectralRange,
    eom_mhz: f64,
    session: &mut CalibrationSession,
) -> AppResult<Derivation> {
    match model {
        FitModel::TwoLorentzianPeaks => Ok(Derivation {
            finesse: two_peak_finesse(result)?,
            conversion: None,
        }),
        FitModel::PeakWithSidebands | FitModel::SidebandsStep1 => {
            let derived = sideband_finesse(result, fsr, eom_mhz)?;
            if model == FitModel::SidebandsStep1 {
                session.record_step1(derived.calibration);
            }
            Ok(Derivation {
                finesse: derived.finesse,
                conversion: Some(derived.calibration.converted_splitting),
            })
        }
        FitModel::SidebandsStep2 => {
            let step1 = *session.step1()?;
            Ok(Derivation {
                finesse: step2_finesse(result, fsr, eom_mhz, &step1, session.wavelengths())?,
                conversion: None,
            })
        }
        FitModel::NoFit | FitModel::LorentzianPeak | FitModel::ThreeLorentzianPeaks => {
            Ok(Derivation::none())
        }
    }
}
