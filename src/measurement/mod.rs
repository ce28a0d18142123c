//! Finesse measurement: FSR from cavity geometry, finesse from fitted lines, and the
//! two-step calibration for unequal sidebands.

pub mod averaging;
pub mod calculator;
pub mod calibration;
pub mod finesse;
pub mod fsr;

pub use averaging::{FinesseAverager, FinesseStatistics};
pub use calculator::{FinesseCalculator, FitOutcome, FrequencyAxis};
pub use calibration::{CalibrationSession, CalibrationWavelengths, Step1Calibration};
pub use finesse::{
    derive_finesse, sideband_finesse, step2_finesse, two_peak_finesse, Derivation,
    FinesseResult, SidebandFinesse,
};
pub use fsr::{compute_fsr, CavityParameters, FreeSpectralRange, SPEED_OF_LIGHT};
