//! Configuration loading using Figment
//!
//! Configuration is loaded from:
//! 1. a TOML file (`config/finesse.toml` by default)
//! 2. environment variables prefixed with `FINESSE_DAQ_`
//!
//! Every section has serde defaults matching the values the measurement setup ships
//! with, so a partial file (or none at all) still yields a usable configuration.
//!
//! # Example
//! ```no_run
//! use finesse_daq::config::FinesseConfig;
//!
//! let config = FinesseConfig::load()?;
//! println!("Cavity length: {} um", config.cavity.length_um);
//! # Ok::<(), finesse_daq::error::DaqError>(())
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{AppResult, DaqError};
use crate::fitting::FitModel;
use crate::measurement::CavityParameters;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FinesseConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Cavity geometry
    pub cavity: CavityConfig,
    /// EOM modulation
    pub modulation: ModulationConfig,
    /// Acquisition timing
    pub acquisition: AcquisitionConfig,
    /// Oscilloscope settings pushed at start-up
    pub scope: ScopeConfig,
    /// Fit defaults
    pub fit: FitConfig,
    /// RF synthesizer driving the EOM
    pub synthesizer: SynthesizerConfig,
    /// Export settings
    pub storage: StorageConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "Finesse DAQ".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Cavity geometry, lengths in micrometres
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CavityConfig {
    /// Mirror spacing or ring round-trip length
    pub length_um: f64,
    /// Uncertainty of the length
    pub length_error_um: f64,
    /// Ring cavity: FSR is `c/L` instead of `c/2L`
    pub is_ring_cavity: bool,
}

impl Default for CavityConfig {
    fn default() -> Self {
        Self {
            length_um: 460.0,
            length_error_um: 0.02,
            is_ring_cavity: false,
        }
    }
}

impl From<&CavityConfig> for CavityParameters {
    fn from(value: &CavityConfig) -> Self {
        CavityParameters {
            length_um: value.length_um,
            length_error_um: value.length_error_um,
            is_ring_cavity: value.is_ring_cavity,
        }
    }
}

/// Phase modulation of the probe beam
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModulationConfig {
    /// EOM modulation frequency in MHz
    pub eom_frequency_mhz: f64,
}

impl Default for ModulationConfig {
    fn default() -> Self {
        Self {
            eom_frequency_mhz: 1004.0,
        }
    }
}

/// Continuous acquisition loop
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Oscilloscope channel (1-based)
    pub channel: u32,
    /// Continuous acquisition refresh interval in milliseconds
    pub refresh_interval_ms: u64,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            channel: 1,
            refresh_interval_ms: 200,
        }
    }
}

/// Oscilloscope setup
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScopeConfig {
    /// Horizontal range in seconds
    pub timebase_s: f64,
    /// Samples per trace
    pub record_length: usize,
    /// Vertical scale in volts per division
    pub vertical_scale_v: f64,
}

impl Default for ScopeConfig {
    fn default() -> Self {
        Self {
            timebase_s: 5e-3,
            record_length: 10_000,
            vertical_scale_v: 20e-3,
        }
    }
}

/// Fit model and finesse gating
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FitConfig {
    /// Fit model display name
    pub model: String,
    /// Chi-squared gate for the sidebands model
    pub chi_threshold: f64,
    /// Number of finesse values in the rolling average
    pub average_window: usize,
    /// Run a fit on every newly acquired trace
    pub fit_on_acquire: bool,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            model: FitModel::PeakWithSidebands.name().to_string(),
            chi_threshold: 0.1,
            average_window: 10,
            fit_on_acquire: false,
        }
    }
}

/// Settings applied to one synthesizer channel on activation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SynthChannelConfig {
    /// Output frequency in Hz
    pub frequency_hz: f64,
    /// Output power in dBm
    pub power_dbm: f64,
    /// Output phase in degrees
    pub phase_deg: f64,
}

impl Default for SynthChannelConfig {
    fn default() -> Self {
        Self {
            frequency_hz: 53e6,
            power_dbm: -5.0,
            phase_deg: 0.0,
        }
    }
}

/// RF synthesizer driving the EOM
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesizerConfig {
    /// Temperature query interval in milliseconds
    pub query_interval_ms: u64,
    /// Per-channel start-up settings, index = channel
    pub channels: Vec<SynthChannelConfig>,
}

impl Default for SynthesizerConfig {
    fn default() -> Self {
        Self {
            query_interval_ms: 1000,
            channels: vec![SynthChannelConfig::default(); 2],
        }
    }
}

/// Trace export
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Output directory for exported traces
    pub output_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("data"),
        }
    }
}

impl FinesseConfig {
    /// Load configuration from `config/finesse.toml` and environment variables
    ///
    /// Environment variables override the file with prefix `FINESSE_DAQ_`, sections
    /// separated by a double underscore.
    /// Example: `FINESSE_DAQ_CAVITY__LENGTH_UM=520`
    pub fn load() -> AppResult<Self> {
        Self::load_from("config/finesse.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config: Self = Figment::from(Serialized::defaults(FinesseConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("FINESSE_DAQ_").split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(DaqError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.cavity.length_um.is_nan() || self.cavity.length_um <= 0.0 {
            return Err(DaqError::Configuration(format!(
                "Cavity length must be positive, got {} um",
                self.cavity.length_um
            )));
        }
        if self.cavity.length_error_um < 0.0 {
            return Err(DaqError::Configuration(format!(
                "Cavity length error must not be negative, got {} um",
                self.cavity.length_error_um
            )));
        }
        if self.modulation.eom_frequency_mhz.is_nan() || self.modulation.eom_frequency_mhz <= 0.0 {
            return Err(DaqError::Configuration(format!(
                "EOM frequency must be positive, got {} MHz",
                self.modulation.eom_frequency_mhz
            )));
        }
        if self.acquisition.refresh_interval_ms == 0 {
            return Err(DaqError::Configuration(
                "refresh_interval_ms must be at least 1".into(),
            ));
        }
        if self.scope.record_length == 0 {
            return Err(DaqError::Configuration(
                "record_length must be at least 1".into(),
            ));
        }
        if self.fit.model.parse::<FitModel>().is_err() {
            return Err(DaqError::Configuration(format!(
                "Unknown fit model '{}'",
                self.fit.model
            )));
        }
        if self.synthesizer.query_interval_ms == 0 {
            return Err(DaqError::Configuration(
                "query_interval_ms must be at least 1".into(),
            ));
        }

        Ok(())
    }

    /// Cavity parameters as used by the finesse calculator
    pub fn cavity_parameters(&self) -> CavityParameters {
        CavityParameters::from(&self.cavity)
    }
}
