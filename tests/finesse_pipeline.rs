//! Integration tests for the finesse calculator
//!
//! A scripted fit engine hands back prepared results so the derivation, the chi-squared
//! gate, the calibration session and the event ordering can be checked without a real
//! fit.

use async_trait::async_trait;
use finesse_daq::error::DaqError;
use finesse_daq::events::FinesseEvent;
use finesse_daq::fitting::{linspace, FitEngine, FitModel, FitOutput, FitResult};
use finesse_daq::measurement::{
    CavityParameters, FinesseCalculator, FinesseResult, FitOutcome,
};
use finesse_daq::measurement_types::Trace;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_test::traced_test;

/// Returns a fixed result per model, optionally after a delay
struct ScriptedEngine {
    results: HashMap<FitModel, FitResult>,
    delay: Duration,
    calls: AtomicUsize,
}

impl ScriptedEngine {
    fn new() -> Self {
        Self {
            results: HashMap::new(),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    fn with(mut self, model: FitModel, result: FitResult) -> Self {
        self.results.insert(model, result);
        self
    }

    fn with_delay(self, delay: Duration) -> Self {
        Self { delay, ..self }
    }
}

#[async_trait]
impl FitEngine for ScriptedEngine {
    async fn fit(&self, model: FitModel, x: &[f64], _y: &[f64]) -> anyhow::Result<FitOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(FitOutput {
            fit_x: x.to_vec(),
            fit_y: vec![0.0; x.len()],
            result: self.results.get(&model).cloned(),
        })
    }
}

fn sidebands(left: f64, right: f64, chi_sqr: f64) -> FitResult {
    FitResult::new()
        .with("Position 1", 0.0, 1e-7)
        .with("Splitting left", left, 1e-7)
        .with("Splitting right", right, 1e-7)
        .with("FWHM 1", 25e-6, 1e-7)
        .with("chi_sqr", chi_sqr, 0.0)
}

fn single_peak(fwhm: f64) -> FitResult {
    FitResult::new()
        .with("Position", 0.0, 1e-7)
        .with("FWHM", fwhm, 1e-7)
        .with("chi_sqr", 0.001, 0.0)
}

fn data() -> Option<(Vec<f64>, Vec<f64>)> {
    Some((linspace(-1e-3, 1e-3, 11), vec![0.0; 11]))
}

fn calculator(engine: ScriptedEngine) -> FinesseCalculator {
    FinesseCalculator::new(Arc::new(engine), CavityParameters::default(), 1004.0)
}

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-9 * b.abs().max(1.0)
}

#[tokio::test]
async fn test_sidebands_finesse_from_fit() {
    let engine = ScriptedEngine::new().with(
        FitModel::PeakWithSidebands,
        sidebands(500e-6, 500e-6, 0.01),
    );
    let calc = calculator(engine);

    let outcome = calc
        .run_fit("Lorentzian peak with sidebands", data(), 0.1)
        .await
        .unwrap();

    // conversion 1004 / 500e-6 MHz/s, linewidth 50.2 MHz
    let fsr = CavityParameters::default().fsr();
    let expected = fsr.value_ghz * 1e3 / (25e-6 * 1004.0 / 500e-6);
    assert!(close(outcome.finesse().finesse, expected));
    assert!(outcome.finesse().error > 0.0);
    assert_eq!(calc.finesse().await, outcome.finesse());
}

#[tokio::test]
async fn test_chi_over_threshold_is_exactly_zero() {
    let engine = ScriptedEngine::new().with(
        FitModel::PeakWithSidebands,
        sidebands(500e-6, 500e-6, 0.1),
    );
    let calc = calculator(engine);

    // equal to the threshold is not below it
    let outcome = calc
        .run_fit("Lorentzian peak with sidebands", data(), 0.1)
        .await
        .unwrap();
    assert_eq!(outcome.finesse(), FinesseResult::NONE);
    assert!(matches!(outcome, FitOutcome::Completed(_)));
}

#[tokio::test]
async fn test_chi_gate_only_applies_to_sidebands_model() {
    let engine = ScriptedEngine::new().with(
        FitModel::SidebandsStep1,
        sidebands(500e-6, 500e-6, 10.0),
    );
    let calc = calculator(engine);

    let outcome = calc
        .run_fit("unmatching sidbands step1", data(), 0.1)
        .await
        .unwrap();
    assert!(outcome.finesse().finesse > 0.0);
}

#[tokio::test]
#[traced_test]
async fn test_unknown_model_warns_and_falls_back() {
    let engine = ScriptedEngine::new();
    let calc = calculator(engine);

    let outcome = calc.run_fit("Gaussian peak", data(), 0.1).await.unwrap();
    assert_eq!(outcome, FitOutcome::NoFit);
    assert_eq!(outcome.finesse(), FinesseResult::NONE);
    assert_eq!(calc.current_model().await, FitModel::NoFit);
    assert!(logs_contain("Gaussian peak"));
}

#[tokio::test]
async fn test_no_fit_runs_nothing() {
    let engine = Arc::new(ScriptedEngine::new());
    let calc = FinesseCalculator::new(engine.clone(), CavityParameters::default(), 1004.0);

    let outcome = calc.run_fit("No Fit", data(), 0.1).await.unwrap();
    assert_eq!(outcome, FitOutcome::NoFit);
    assert_eq!(engine.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_run_fit_is_idempotent() {
    let engine = ScriptedEngine::new().with(
        FitModel::PeakWithSidebands,
        sidebands(490e-6, 510e-6, 0.01),
    );
    let calc = calculator(engine);

    let first = calc
        .run_fit("Lorentzian peak with sidebands", data(), 0.1)
        .await
        .unwrap();
    let second = calc
        .run_fit("Lorentzian peak with sidebands", data(), 0.1)
        .await
        .unwrap();
    assert_eq!(first.finesse(), second.finesse());
}

#[tokio::test]
async fn test_missing_field_keeps_last_finesse() {
    let engine = ScriptedEngine::new()
        .with(FitModel::PeakWithSidebands, sidebands(500e-6, 500e-6, 0.01))
        .with(
            FitModel::TwoLorentzianPeaks,
            FitResult::new().with("FWHM 0", 1e-5, 0.0),
        );
    let calc = calculator(engine);

    let good = calc
        .run_fit("Lorentzian peak with sidebands", data(), 0.1)
        .await
        .unwrap()
        .finesse();

    let err = calc
        .run_fit("Two Lorentzian peaks", data(), 0.1)
        .await
        .unwrap_err();
    assert!(matches!(err, DaqError::MissingFitField(ref name) if name == "Splitting"));
    assert_eq!(calc.finesse().await, good);
}

#[tokio::test]
async fn test_failed_fit_is_a_missing_field() {
    // no scripted result: the engine reports a non-converged fit
    let calc = calculator(ScriptedEngine::new());
    let err = calc
        .run_fit("Lorentzian peak with sidebands", data(), 0.1)
        .await
        .unwrap_err();
    assert!(matches!(err, DaqError::MissingFitField(ref name) if name == "chi_sqr"));
}

#[tokio::test]
async fn test_step2_requires_step1() {
    let engine = ScriptedEngine::new().with(FitModel::SidebandsStep2, single_peak(30e-6));
    let calc = calculator(engine);

    let err = calc
        .run_fit("unmatching sidbands step2", data(), 0.1)
        .await
        .unwrap_err();
    assert!(
        matches!(err, DaqError::MissingFitField(ref name) if name == "step1 converted splitting")
    );
    assert_eq!(calc.finesse().await, FinesseResult::NONE);
}

#[tokio::test]
async fn test_two_step_calibration() {
    let engine = ScriptedEngine::new()
        .with(FitModel::SidebandsStep1, sidebands(500e-6, 500e-6, 0.01))
        .with(FitModel::SidebandsStep2, single_peak(25e-6));
    let calc = calculator(engine);

    let step1 = calc
        .run_fit("unmatching sidbands step1", data(), 0.1)
        .await
        .unwrap()
        .finesse();
    let conversion = calc.calibration().await.step1().unwrap().converted_splitting;
    assert!(close(conversion, 1004.0 / 500e-6));

    // same wavelength and width: step 2 reproduces step 1
    let step2 = calc
        .run_fit("unmatching sidbands step2", data(), 0.1)
        .await
        .unwrap()
        .finesse();
    assert!(close(step2.finesse, step1.finesse));

    // twice the wavelength ratio: linewidth x4, finesse / 4
    calc.set_calibration_wavelengths(1560.0, 780.0).await;
    assert_eq!(calc.finesse().await, step2);
    let rescaled = calc
        .run_fit("unmatching sidbands step2", data(), 0.1)
        .await
        .unwrap()
        .finesse();
    assert!(close(rescaled.finesse, step1.finesse / 4.0));
}

#[tokio::test]
async fn test_concurrent_fits_are_serialized() {
    let engine = ScriptedEngine::new()
        .with(FitModel::SidebandsStep1, sidebands(500e-6, 500e-6, 0.01))
        .with(FitModel::SidebandsStep2, single_peak(25e-6))
        .with_delay(Duration::from_millis(5));
    let calc = Arc::new(calculator(engine));

    let step1 = {
        let calc = Arc::clone(&calc);
        tokio::spawn(async move {
            calc.run_fit("unmatching sidbands step1", data(), 0.1).await
        })
    };
    tokio::task::yield_now().await;
    let step2 = {
        let calc = Arc::clone(&calc);
        tokio::spawn(async move {
            calc.run_fit("unmatching sidbands step2", data(), 0.1).await
        })
    };

    let step1 = step1.await.unwrap().unwrap();
    let step2 = step2.await.unwrap().unwrap();
    assert!(close(step2.finesse().finesse, step1.finesse().finesse));
    assert!(calc.calibration().await.has_step1());
}

#[tokio::test]
async fn test_fit_uses_current_trace_and_events_follow_state() {
    let engine = ScriptedEngine::new().with(
        FitModel::PeakWithSidebands,
        sidebands(500e-6, 500e-6, 0.01),
    );
    let calc = calculator(engine);
    let mut events = calc.subscribe().await;

    let trace = Arc::new(Trace::new(linspace(-1e-3, 1e-3, 11), vec![0.0; 11]).unwrap());
    calc.set_trace(Arc::clone(&trace)).await;
    calc.run_fit("Lorentzian peak with sidebands", None, 0.1)
        .await
        .unwrap();

    assert_eq!(events.recv().await, Some(FinesseEvent::TraceUpdated(trace)));
    match events.recv().await {
        Some(FinesseEvent::FitUpdated(snapshot)) => {
            assert_eq!(snapshot.finesse, calc.finesse().await);
            assert_eq!(snapshot.model, FitModel::PeakWithSidebands);
            assert_eq!(snapshot.fit_x.len(), 11);
        }
        other => panic!("expected FitUpdated, got {other:?}"),
    }
}

#[tokio::test]
async fn test_set_cavity_updates_fsr_and_notifies() {
    let calc = calculator(ScriptedEngine::new());
    let mut events = calc.subscribe().await;

    let ring = CavityParameters {
        length_um: 460.0,
        length_error_um: 0.02,
        is_ring_cavity: true,
    };
    let fsr = calc.set_cavity(ring).await.unwrap();
    assert!(close(fsr.value_ghz, 2.0 * CavityParameters::default().fsr().value_ghz));
    assert_eq!(calc.fsr().await, fsr);
    assert_eq!(
        events.recv().await,
        Some(FinesseEvent::ParameterUpdated {
            cavity_length_um: 460.0
        })
    );
}
