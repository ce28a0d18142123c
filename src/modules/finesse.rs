//! Finesse measurement module.
//!
//! Wires the [`AcquisitionScheduler`] to the [`FinesseCalculator`]: every new trace
//! becomes the calculator's current trace, and with `fit_on_acquire` set it is fitted
//! right away and the finesse is fed into a rolling average.
//!
//! Recognised [`ModuleConfig`] keys: `channel`, `refresh_interval_ms`, `fit_model`,
//! `chi_threshold`, `fit_on_acquire`, `average_window`.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Local;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::{Module, ModuleConfig, ModuleStatus};
use crate::acquisition::{AcquisitionScheduler, ScopeSettings};
use crate::config::FinesseConfig;
use crate::error::{AppResult, DaqError};
use crate::fitting::{FitEngine, FitModel};
use crate::hardware::TraceSource;
use crate::measurement::{FinesseAverager, FinesseCalculator, FinesseStatistics, FitOutcome};
use crate::storage::{trace_label, ExportData, TraceExporter};

/// Runtime settings of the finesse module
#[derive(Debug, Clone, PartialEq)]
pub struct FinesseSettings {
    /// Oscilloscope channel carrying the transmission signal
    pub channel: u32,
    /// Period of the continuous acquisition loop
    pub refresh_interval_ms: u64,
    /// Display name of the fit model
    pub fit_model: String,
    /// Sideband fits at or above this chi² are inconclusive
    pub chi_threshold: f64,
    /// Fit every acquired trace
    pub fit_on_acquire: bool,
    /// Number of finesse values in the rolling average
    pub average_window: usize,
    /// Timebase and record length pushed to the scope
    pub scope: ScopeSettings,
    /// Directory for saved traces
    pub output_dir: PathBuf,
}

/// Fit choice read by the acquisition forwarder on every trace
#[derive(Debug, Clone, PartialEq)]
struct FitSelection {
    model: String,
    chi_threshold: f64,
    fit_on_acquire: bool,
}

impl From<&FinesseSettings> for FitSelection {
    fn from(settings: &FinesseSettings) -> Self {
        Self {
            model: settings.fit_model.clone(),
            chi_threshold: settings.chi_threshold,
            fit_on_acquire: settings.fit_on_acquire,
        }
    }
}

impl From<&FinesseConfig> for FinesseSettings {
    fn from(config: &FinesseConfig) -> Self {
        Self {
            channel: config.acquisition.channel,
            refresh_interval_ms: config.acquisition.refresh_interval_ms,
            fit_model: config.fit.model.clone(),
            chi_threshold: config.fit.chi_threshold,
            fit_on_acquire: config.fit.fit_on_acquire,
            average_window: config.fit.average_window,
            scope: ScopeSettings::from(&config.scope),
            output_dir: config.storage.output_dir.clone(),
        }
    }
}

/// Acquisition, fit and finesse of cavity transmission scans
pub struct FinesseModule {
    name: String,
    settings: FinesseSettings,
    scheduler: AcquisitionScheduler,
    calculator: Arc<FinesseCalculator>,
    exporter: Arc<dyn TraceExporter>,
    averager: Arc<Mutex<FinesseAverager>>,
    selection: watch::Sender<FitSelection>,
    forwarder: Option<JoinHandle<()>>,
    status: ModuleStatus,
}

impl FinesseModule {
    /// Build the module around a trace source, a fit engine and an exporter
    pub fn new(
        name: impl Into<String>,
        config: &FinesseConfig,
        source: Arc<dyn TraceSource>,
        engine: Arc<dyn FitEngine>,
        exporter: Arc<dyn TraceExporter>,
    ) -> Self {
        let settings = FinesseSettings::from(config);
        Self {
            name: name.into(),
            scheduler: AcquisitionScheduler::new(source, settings.scope.record_length),
            calculator: Arc::new(FinesseCalculator::new(
                engine,
                config.cavity_parameters(),
                config.modulation.eom_frequency_mhz,
            )),
            exporter,
            averager: Arc::new(Mutex::new(FinesseAverager::new(settings.average_window))),
            selection: watch::Sender::new(FitSelection::from(&settings)),
            forwarder: None,
            status: ModuleStatus::Idle,
            settings,
        }
    }

    /// Current settings
    pub fn settings(&self) -> &FinesseSettings {
        &self.settings
    }

    /// Acquisition scheduler driving the scope
    pub fn scheduler(&self) -> &AcquisitionScheduler {
        &self.scheduler
    }

    /// Shared finesse calculator
    pub fn calculator(&self) -> &Arc<FinesseCalculator> {
        &self.calculator
    }

    /// Select the fit model by display name; unknown names are rejected here.
    ///
    /// Takes effect on the next acquired trace when the module is running.
    pub fn set_fit_model(&mut self, name: &str) -> AppResult<()> {
        let model: FitModel = name.parse()?;
        self.settings.fit_model = model.name().to_string();
        self.publish_selection();
        Ok(())
    }

    /// Change the chi² threshold of sideband fits; applies to running acquisition too
    pub fn set_chi_threshold(&mut self, chi_threshold: f64) -> AppResult<()> {
        if chi_threshold.is_nan() || chi_threshold <= 0.0 {
            return Err(DaqError::Configuration(format!(
                "chi_threshold must be positive, got {chi_threshold}"
            )));
        }
        self.settings.chi_threshold = chi_threshold;
        self.publish_selection();
        Ok(())
    }

    fn publish_selection(&self) {
        self.selection.send_replace(FitSelection::from(&self.settings));
    }

    /// Mean and spread of the recent finesse values
    pub async fn average(&self) -> Option<FinesseStatistics> {
        self.averager.lock().await.statistics()
    }

    /// Drop all values from the rolling average
    pub async fn reset_average(&self) {
        self.averager.lock().await.reset();
    }

    /// Acquire one trace on the configured channel and fit it
    pub async fn measure_once(&self) -> AppResult<FitOutcome> {
        let trace = self.scheduler.get_single_trace(self.settings.channel).await?;
        self.calculator.set_trace(trace).await;
        let outcome = self
            .calculator
            .run_fit(&self.settings.fit_model, None, self.settings.chi_threshold)
            .await?;
        self.averager
            .lock()
            .await
            .push(outcome.finesse().finesse);
        Ok(outcome)
    }

    /// Save the current trace with the modulation frequency and cavity length
    pub async fn save_trace(&self, tag: Option<&str>) -> AppResult<PathBuf> {
        let trace = self.calculator.trace().await.ok_or(DaqError::NoTrace)?;
        let parameters = vec![
            (
                "modulation frequency (MHz)".to_string(),
                self.calculator.eom_frequency().await,
            ),
            (
                "cavity length (um)".to_string(),
                self.calculator.cavity().await.length_um,
            ),
        ];
        self.exporter
            .save(
                &ExportData::from_trace(&trace),
                &self.settings.output_dir,
                &trace_label(tag),
                &parameters,
                Local::now(),
            )
            .await
    }

    fn apply(&mut self, config: &ModuleConfig) -> AppResult<()> {
        if let Some(channel) = config.get_u64("channel")? {
            self.settings.channel = u32::try_from(channel)
                .ok()
                .filter(|ch| *ch > 0)
                .ok_or_else(|| {
                    DaqError::Configuration(format!("invalid acquisition channel {channel}"))
                })?;
        }
        if let Some(interval) = config.get_u64("refresh_interval_ms")? {
            if interval == 0 {
                return Err(DaqError::Configuration(
                    "refresh_interval_ms must be positive".to_string(),
                ));
            }
            self.settings.refresh_interval_ms = interval;
        }
        if let Some(model) = config.get_str("fit_model")? {
            self.set_fit_model(model)?;
        }
        if let Some(chi) = config.get_f64("chi_threshold")? {
            self.set_chi_threshold(chi)?;
        }
        if let Some(fit_on_acquire) = config.get_bool("fit_on_acquire")? {
            self.settings.fit_on_acquire = fit_on_acquire;
            self.publish_selection();
        }
        if let Some(window) = config.get_u64("average_window")? {
            let window = usize::try_from(window).unwrap_or(usize::MAX);
            self.settings.average_window = window;
            self.averager = Arc::new(Mutex::new(FinesseAverager::new(window)));
        }
        Ok(())
    }

    async fn activate(&mut self) -> AppResult<()> {
        let mut traces = self.scheduler.subscribe().await;
        let calculator = Arc::clone(&self.calculator);
        let averager = Arc::clone(&self.averager);
        let selection = self.selection.subscribe();

        self.forwarder = Some(tokio::spawn(async move {
            while let Some(trace) = traces.recv().await {
                calculator.set_trace(trace).await;
                let current = selection.borrow().clone();
                if !current.fit_on_acquire {
                    continue;
                }
                match calculator
                    .run_fit(&current.model, None, current.chi_threshold)
                    .await
                {
                    Ok(outcome) => {
                        averager.lock().await.push(outcome.finesse().finesse);
                    }
                    Err(err) => warn!(error = %err, "Fit of acquired trace failed"),
                }
            }
        }));

        self.scheduler
            .update_scope_settings(self.settings.scope)
            .await?;
        self.scheduler
            .start_acquisition(self.settings.channel, self.settings.refresh_interval_ms)
            .await
    }
}

#[async_trait]
impl Module for FinesseModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn init(&mut self, config: ModuleConfig) -> Result<()> {
        if self.status == ModuleStatus::Running {
            return Err(DaqError::Configuration(format!(
                "module '{}' is running, stop it before reconfiguring",
                self.name
            ))
            .into());
        }
        self.apply(&config)?;
        self.status = ModuleStatus::Initialized;
        info!(module = %self.name, "Finesse module initialized");
        Ok(())
    }

    fn status(&self) -> ModuleStatus {
        self.status
    }

    async fn start(&mut self) -> Result<()> {
        if self.status == ModuleStatus::Running {
            return Ok(());
        }
        match self.activate().await {
            Ok(()) => {
                self.status = ModuleStatus::Running;
                info!(module = %self.name, channel = self.settings.channel, "Finesse module started");
                Ok(())
            }
            Err(err) => {
                if let Some(task) = self.forwarder.take() {
                    task.abort();
                }
                self.status = ModuleStatus::Error;
                Err(err.into())
            }
        }
    }

    async fn stop(&mut self) -> Result<()> {
        let result = self.scheduler.shutdown().await;
        if let Some(task) = self.forwarder.take() {
            task.abort();
        }
        self.status = ModuleStatus::Stopped;
        info!(module = %self.name, "Finesse module stopped");
        result.map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fitting::LorentzianEstimator;
    use crate::hardware::mock::MockOscilloscope;
    use crate::storage::TsvExporter;
    use serde_json::json;

    fn module() -> FinesseModule {
        let mut config = FinesseConfig::default();
        config.scope.record_length = 2_000;
        FinesseModule::new(
            "finesse",
            &config,
            Arc::new(MockOscilloscope::with_settings(5e-3, 2_000)),
            Arc::new(LorentzianEstimator::default()),
            Arc::new(TsvExporter::new()),
        )
    }

    #[test]
    fn init_applies_overrides() {
        let mut m = module();
        m.init(
            ModuleConfig::new()
                .with("fit_model", json!("Two Lorentzian peaks"))
                .with("refresh_interval_ms", json!(500))
                .with("fit_on_acquire", json!(true)),
        )
        .unwrap();

        assert_eq!(m.status(), ModuleStatus::Initialized);
        assert_eq!(m.settings().fit_model, "Two Lorentzian peaks");
        assert_eq!(m.settings().refresh_interval_ms, 500);
        assert!(m.settings().fit_on_acquire);
    }

    #[test]
    fn init_rejects_unknown_model() {
        let mut m = module();
        assert!(m
            .init(ModuleConfig::new().with("fit_model", json!("Voigt")))
            .is_err());
        assert_eq!(m.status(), ModuleStatus::Idle);
    }

    #[tokio::test]
    async fn measure_once_fits_the_scan() {
        let m = module();
        let outcome = m.measure_once().await.unwrap();
        assert!(matches!(outcome, FitOutcome::Completed(_)));
        assert!(m.calculator().conversion().await.is_some());
    }

    #[test]
    fn chi_threshold_must_be_positive() {
        let mut m = module();
        assert!(m.set_chi_threshold(0.0).is_err());
        assert!(m.set_chi_threshold(f64::NAN).is_err());
        m.set_chi_threshold(0.5).unwrap();
        assert_eq!(m.settings().chi_threshold, 0.5);
        assert_eq!(m.selection.borrow().chi_threshold, 0.5);
    }

    #[tokio::test]
    async fn save_without_trace_fails() {
        let m = module();
        assert!(matches!(m.save_trace(None).await, Err(DaqError::NoTrace)));
    }
}
