//! Fit models, fit results and the fit engine seam.
//!
//! The finesse derivation only reads named quantities out of a [`FitResult`]. The
//! engine that produced them is a black box behind [`FitEngine`];
//! [`estimator::LorentzianEstimator`] is the reference implementation used by the CLI
//! and the integration tests.

pub mod estimator;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{AppResult, DaqError};

pub use estimator::LorentzianEstimator;

/// Evenly spaced values from `start` to `stop` inclusive.
pub fn linspace(start: f64, stop: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (stop - start) / (n - 1) as f64;
            let mut values: Vec<f64> = (0..n).map(|i| start + step * i as f64).collect();
            values[n - 1] = stop;
            values
        }
    }
}

/// Lorentzian line of full width `fwhm` and peak height `amplitude` centred at `center`.
pub fn lorentzian(x: f64, center: f64, fwhm: f64, amplitude: f64) -> f64 {
    let half = fwhm / 2.0;
    amplitude * half * half / ((x - center).powi(2) + half * half)
}

/// Line shape selected for a fit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FitModel {
    /// Do not fit
    NoFit,
    /// Single line
    LorentzianPeak,
    /// Two lines, finesse from their spacing
    TwoLorentzianPeaks,
    /// Three independent lines
    ThreeLorentzianPeaks,
    /// Carrier with two EOM sidebands
    PeakWithSidebands,
    /// First pass of the unequal sidebands calibration
    SidebandsStep1,
    /// Second pass, single peak at the second wavelength
    SidebandsStep2,
}

impl FitModel {
    /// Every model, in the order offered to the operator
    pub const ALL: [FitModel; 7] = [
        FitModel::NoFit,
        FitModel::LorentzianPeak,
        FitModel::TwoLorentzianPeaks,
        FitModel::ThreeLorentzianPeaks,
        FitModel::PeakWithSidebands,
        FitModel::SidebandsStep1,
        FitModel::SidebandsStep2,
    ];

    /// Display name, also accepted by [`FromStr`]
    pub fn name(self) -> &'static str {
        match self {
            FitModel::NoFit => "No Fit",
            FitModel::LorentzianPeak => "Lorentzian peak",
            FitModel::TwoLorentzianPeaks => "Two Lorentzian peaks",
            FitModel::ThreeLorentzianPeaks => "Three Lorentzian peaks",
            FitModel::PeakWithSidebands => "Lorentzian peak with sidebands",
            FitModel::SidebandsStep1 => "unmatching sidbands step1",
            FitModel::SidebandsStep2 => "unmatching sidbands step2",
        }
    }

    /// Number of Lorentzian lines in the model
    pub fn peak_count(self) -> usize {
        match self {
            FitModel::NoFit => 0,
            FitModel::LorentzianPeak | FitModel::SidebandsStep2 => 1,
            FitModel::TwoLorentzianPeaks => 2,
            FitModel::ThreeLorentzianPeaks
            | FitModel::PeakWithSidebands
            | FitModel::SidebandsStep1 => 3,
        }
    }

    /// Result fields a fit with this model produces
    pub fn result_fields(self) -> Vec<String> {
        let n = self.peak_count();
        let mut fields = Vec::new();
        match n {
            0 => return fields,
            1 => fields.extend(["Position", "Amplitude", "FWHM"].map(String::from)),
            _ => {
                for i in 0..n {
                    fields.push(format!("Position {i}"));
                    fields.push(format!("Amplitude {i}"));
                    fields.push(format!("FWHM {i}"));
                }
                if n == 2 {
                    fields.push("Splitting".to_string());
                } else {
                    fields.push("Splitting left".to_string());
                    fields.push("Splitting right".to_string());
                }
            }
        }
        fields.push("Offset".to_string());
        fields.push("chi_sqr".to_string());
        fields
    }
}

impl fmt::Display for FitModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FitModel {
    type Err = DaqError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FitModel::ALL
            .into_iter()
            .find(|model| model.name() == s)
            .ok_or_else(|| DaqError::UnknownFitModel(s.to_string()))
    }
}

/// A fitted quantity and its standard error
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FitParameter {
    /// Best-fit value
    pub value: f64,
    /// Standard error
    pub error: f64,
}

impl FitParameter {
    /// Parameter from value and error
    pub fn new(value: f64, error: f64) -> Self {
        Self { value, error }
    }
}

/// Named fit quantities
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FitResult {
    params: BTreeMap<String, FitParameter>,
}

impl FitResult {
    /// Empty result
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, name: impl Into<String>, value: f64, error: f64) -> Self {
        self.insert(name, FitParameter::new(value, error));
        self
    }

    /// Add or replace a quantity
    pub fn insert(&mut self, name: impl Into<String>, param: FitParameter) {
        self.params.insert(name.into(), param);
    }

    /// Look up a quantity; absence is an error, never a zero
    pub fn get(&self, name: &str) -> AppResult<FitParameter> {
        self.params
            .get(name)
            .copied()
            .ok_or_else(|| DaqError::MissingFitField(name.to_string()))
    }

    /// Shorthand for `get(name)?.value`
    pub fn value(&self, name: &str) -> AppResult<f64> {
        self.get(name).map(|p| p.value)
    }

    /// Whether `name` was fitted
    pub fn contains(&self, name: &str) -> bool {
        self.params.contains_key(name)
    }

    /// No quantities at all
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Quantities in name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &FitParameter)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// One `name: value ± error` line per quantity
    pub fn formatted(&self) -> String {
        self.params
            .iter()
            .map(|(name, p)| format!("{name}: {:.6e} ± {:.2e}", p.value, p.error))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// What a fit engine hands back: the fitted curve and the quantities, if it converged
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FitOutput {
    /// Abscissa of the fitted curve
    pub fit_x: Vec<f64>,
    /// Fitted curve
    pub fit_y: Vec<f64>,
    /// Fitted quantities; `None` when the fit did not converge
    pub result: Option<FitResult>,
}

/// Curve-fitting collaborator
///
/// # Contract
/// - `x` and `y` have equal length (checked by the caller)
/// - a fit that does not converge returns `Ok` with `result: None`
/// - `Err` is reserved for engine faults
#[async_trait]
pub trait FitEngine: Send + Sync {
    async fn fit(&self, model: FitModel, x: &[f64], y: &[f64]) -> anyhow::Result<FitOutput>;
}
