//! Fit dispatch and finesse bookkeeping.
//!
//! [`FinesseCalculator`] owns everything a fit reads or writes: the current trace, the
//! cavity geometry and its cached FSR, the modulation frequency, the last fit and the
//! two-step [`CalibrationSession`]. Fits are serialized by an async mutex, so at most
//! one is in flight and every fit sees the session left by the previous one.

use std::cmp::Ordering;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, info, instrument, warn};

use super::calibration::{CalibrationSession, CalibrationWavelengths};
use super::finesse::{derive_finesse, Derivation, FinesseResult};
use super::fsr::{CavityParameters, FreeSpectralRange};
use crate::error::{AppResult, DaqError};
use crate::events::{EventDistributor, FinesseEvent, FitSnapshot};
use crate::fitting::{linspace, FitEngine, FitModel, FitResult};
use crate::measurement_types::Trace;

const EVENT_CAPACITY: usize = 64;

/// Span of the fallback frequency axis, MHz
const ARBITRARY_AXIS_SPAN_MHZ: f64 = 120.0;

/// Result of [`FinesseCalculator::run_fit`]
#[derive(Debug, Clone, PartialEq)]
pub enum FitOutcome {
    /// Nothing was fitted (`"No Fit"` or an unknown model name)
    NoFit,
    /// The fit ran and its snapshot was published
    Completed(FitSnapshot),
}

impl FitOutcome {
    /// Finesse of a completed fit, `NONE` otherwise
    pub fn finesse(&self) -> FinesseResult {
        match self {
            FitOutcome::NoFit => FinesseResult::NONE,
            FitOutcome::Completed(snapshot) => snapshot.finesse,
        }
    }
}

/// Frequency axis for a trace
#[derive(Debug, Clone, PartialEq)]
pub struct FrequencyAxis {
    /// MHz relative to the carrier
    pub values_mhz: Vec<f64>,
    /// True when no calibration was available and the axis is a fixed span
    pub arbitrary: bool,
}

#[derive(Debug)]
struct CalculatorState {
    cavity: CavityParameters,
    fsr: FreeSpectralRange,
    eom_frequency_mhz: f64,
    model: FitModel,
    finesse: FinesseResult,
    result: FitResult,
    fit_x: Arc<Vec<f64>>,
    fit_y: Arc<Vec<f64>>,
    conversion: Option<f64>,
    session: CalibrationSession,
}

impl CalculatorState {
    fn snapshot(&self) -> FitSnapshot {
        FitSnapshot {
            model: self.model,
            finesse: self.finesse,
            result: self.result.clone(),
            fit_x: Arc::clone(&self.fit_x),
            fit_y: Arc::clone(&self.fit_y),
            step1_conversion: self
                .session
                .step1()
                .ok()
                .map(|step1| step1.converted_splitting),
        }
    }
}

/// Converts fits of cavity transmission traces into finesse values
pub struct FinesseCalculator {
    engine: Arc<dyn FitEngine>,
    fit_guard: Mutex<()>,
    state: RwLock<CalculatorState>,
    trace: RwLock<Option<Arc<Trace>>>,
    events: EventDistributor<FinesseEvent>,
}

impl FinesseCalculator {
    /// Calculator with no trace and no fit yet
    pub fn new(engine: Arc<dyn FitEngine>, cavity: CavityParameters, eom_frequency_mhz: f64) -> Self {
        Self {
            engine,
            fit_guard: Mutex::new(()),
            state: RwLock::new(CalculatorState {
                cavity,
                fsr: cavity.fsr(),
                eom_frequency_mhz,
                model: FitModel::NoFit,
                finesse: FinesseResult::NONE,
                result: FitResult::new(),
                fit_x: Arc::new(Vec::new()),
                fit_y: Arc::new(Vec::new()),
                conversion: None,
                session: CalibrationSession::new(),
            }),
            trace: RwLock::new(None),
            events: EventDistributor::new(EVENT_CAPACITY),
        }
    }

    /// Subscribe to trace, fit and parameter notifications
    pub async fn subscribe(&self) -> mpsc::Receiver<FinesseEvent> {
        self.events.subscribe().await
    }

    /// Make `trace` the current one
    pub async fn set_trace(&self, trace: Arc<Trace>) {
        *self.trace.write().await = Some(Arc::clone(&trace));
        self.events.publish(FinesseEvent::TraceUpdated(trace)).await;
    }

    /// Current trace, if any
    pub async fn trace(&self) -> Option<Arc<Trace>> {
        self.trace.read().await.clone()
    }

    /// Store new cavity geometry and recompute the FSR
    #[instrument(skip(self))]
    pub async fn set_cavity(&self, cavity: CavityParameters) -> AppResult<FreeSpectralRange> {
        if !(cavity.length_um.is_finite() && cavity.length_um > 0.0) {
            return Err(DaqError::Configuration(format!(
                "cavity length must be positive, got {} um",
                cavity.length_um
            )));
        }

        let fsr = cavity.fsr();
        {
            let mut state = self.state.write().await;
            state.cavity = cavity;
            state.fsr = fsr;
        }
        debug!(fsr_ghz = fsr.value_ghz, "FSR updated");

        self.events
            .publish(FinesseEvent::ParameterUpdated {
                cavity_length_um: cavity.length_um,
            })
            .await;
        Ok(fsr)
    }

    /// Current cavity geometry
    pub async fn cavity(&self) -> CavityParameters {
        self.state.read().await.cavity
    }

    /// Cached FSR of the current cavity
    pub async fn fsr(&self) -> FreeSpectralRange {
        self.state.read().await.fsr
    }

    /// Modulation frequency of the EOM, MHz
    pub async fn set_eom_frequency(&self, mhz: f64) {
        self.state.write().await.eom_frequency_mhz = mhz;
    }

    /// Modulation frequency of the EOM, MHz
    pub async fn eom_frequency(&self) -> f64 {
        self.state.read().await.eom_frequency_mhz
    }

    /// Takes effect at the next step 2 fit
    pub async fn set_calibration_wavelengths(&self, lambda1: f64, lambda2: f64) {
        self.state
            .write()
            .await
            .session
            .set_wavelengths(CalibrationWavelengths { lambda1, lambda2 });
    }

    /// Copy of the calibration session
    pub async fn calibration(&self) -> CalibrationSession {
        self.state.read().await.session.clone()
    }

    /// Forget the stored step 1
    pub async fn reset_calibration(&self) {
        let _guard = self.fit_guard.lock().await;
        self.state.write().await.session.reset();
    }

    /// Last derived finesse
    pub async fn finesse(&self) -> FinesseResult {
        self.state.read().await.finesse
    }

    /// Model of the last fit
    pub async fn current_model(&self) -> FitModel {
        self.state.read().await.model
    }

    /// Quantities of the last fit
    pub async fn fit_result(&self) -> FitResult {
        self.state.read().await.result.clone()
    }

    /// Last sideband calibration, MHz per time unit
    pub async fn conversion(&self) -> Option<f64> {
        self.state.read().await.conversion
    }

    /// State of the last fit
    pub async fn snapshot(&self) -> FitSnapshot {
        self.state.read().await.snapshot()
    }

    /// Fit `data` (or the current trace) with the model called `model_name`.
    ///
    /// For the sidebands model the finesse is only derived when `chi_sqr` is below
    /// `chi_threshold`; otherwise it is set to [`FinesseResult::NONE`]. When the
    /// derivation fails the previous finesse stays in place and the error is returned.
    #[instrument(skip(self, data))]
    pub async fn run_fit(
        &self,
        model_name: &str,
        data: Option<(Vec<f64>, Vec<f64>)>,
        chi_threshold: f64,
    ) -> AppResult<FitOutcome> {
        let _guard = self.fit_guard.lock().await;

        let model = match model_name.parse::<FitModel>() {
            Ok(model) => model,
            Err(err) => {
                warn!(error = %err, "Falling back to No Fit");
                self.state.write().await.model = FitModel::NoFit;
                return Ok(FitOutcome::NoFit);
            }
        };
        if model == FitModel::NoFit {
            self.state.write().await.model = FitModel::NoFit;
            return Ok(FitOutcome::NoFit);
        }

        let (x, y) = match data {
            Some(data) => data,
            None => {
                let trace = self.trace.read().await.clone().ok_or(DaqError::NoTrace)?;
                (trace.time_axis().to_vec(), trace.samples().to_vec())
            }
        };
        if x.len() != y.len() {
            return Err(DaqError::LengthMismatch {
                x_len: x.len(),
                y_len: y.len(),
            });
        }

        let output = self
            .engine
            .fit(model, &x, &y)
            .await
            .map_err(|err| DaqError::FitFailed(format!("{err:#}")))?;
        if output.result.is_none() {
            debug!("Fit engine returned no result");
        }
        let result = output.result.unwrap_or_default();

        let snapshot = {
            let mut state = self.state.write().await;
            state.model = model;
            state.result = result;
            state.fit_x = Arc::new(output.fit_x);
            state.fit_y = Arc::new(output.fit_y);

            let derivation = Self::derive(&mut state, model, chi_threshold)?;
            state.finesse = derivation.finesse;
            if let Some(conversion) = derivation.conversion {
                state.conversion = Some(conversion);
            }
            state.snapshot()
        };

        info!(
            finesse = snapshot.finesse.finesse,
            error = snapshot.finesse.error,
            "Fit finished"
        );
        self.events
            .publish(FinesseEvent::FitUpdated(snapshot.clone()))
            .await;
        Ok(FitOutcome::Completed(snapshot))
    }

    fn derive(
        state: &mut CalculatorState,
        model: FitModel,
        chi_threshold: f64,
    ) -> AppResult<Derivation> {
        if model == FitModel::PeakWithSidebands {
            let chi_sqr = state.result.value("chi_sqr")?;
            // NaN on either side is inconclusive
            if chi_sqr.partial_cmp(&chi_threshold) != Some(Ordering::Less) {
                info!(chi_sqr, chi_threshold, "Fit not conclusive");
                return Ok(Derivation {
                    finesse: FinesseResult::NONE,
                    conversion: None,
                });
            }
        }

        let CalculatorState {
            result,
            fsr,
            eom_frequency_mhz,
            session,
            ..
        } = state;
        derive_finesse(model, result, *fsr, *eom_frequency_mhz, session)
    }

    /// Frequency axis for the current trace.
    ///
    /// Calibrated as `(t - Position 1) * conversion` when a sideband fit has run;
    /// otherwise a fixed ±120 MHz span flagged as arbitrary.
    pub async fn frequency_axis(&self) -> AppResult<FrequencyAxis> {
        let trace = self.trace.read().await.clone().ok_or(DaqError::NoTrace)?;
        let state = self.state.read().await;

        let center = state.result.value("Position 1").ok();
        match (center, state.conversion) {
            (Some(center), Some(conversion)) => Ok(FrequencyAxis {
                values_mhz: trace
                    .time_axis()
                    .iter()
                    .map(|t| (t - center) * conversion)
                    .collect(),
                arbitrary: false,
            }),
            _ => {
                warn!("No sideband calibration, using an arbitrary frequency axis");
                Ok(FrequencyAxis {
                    values_mhz: linspace(
                        -ARBITRARY_AXIS_SPAN_MHZ,
                        ARBITRARY_AXIS_SPAN_MHZ,
                        trace.len(),
                    ),
                    arbitrary: true,
                })
            }
        }
    }
}
