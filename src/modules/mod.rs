//! Module system for measurement logic.
//!
//! A module wraps one or more instruments and implements a piece of measurement logic
//! on top of them. The host creates the module with its collaborators injected as
//! `Arc<dyn Trait>`, calls [`Module::init`] with the module's configuration, then
//! [`Module::start`] and eventually [`Module::stop`].
//!
//! # Lifecycle
//!
//! ```text
//! Idle ──init()──> Initialized ──start()──> Running ──stop()──> Stopped
//!                       ↑                                          │
//!                       └────────────────── start() ───────────────┘
//! ```
//!
//! Any failure during `start()` leaves the module in [`ModuleStatus::Error`].
//!
//! # Modules
//!
//! - [`finesse::FinesseModule`]: acquisition, fitting and finesse of cavity scans
//! - [`synthesizer::SynthesizerModule`]: RF synthesizer driving the EOM

pub mod finesse;
pub mod synthesizer;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::DaqError;

pub use finesse::FinesseModule;
pub use synthesizer::{SynthesizerEvent, SynthesizerModule};

/// Configuration for a module instance.
///
/// Module configuration overrides the defaults a module was built with. Keys are
/// module specific.
///
/// # Examples
///
/// ```toml
/// [modules.finesse]
/// fit_model = "Two Lorentzian peaks"
/// refresh_interval_ms = 500
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ModuleConfig {
    /// Module-specific configuration parameters
    #[serde(flatten)]
    pub params: HashMap<String, serde_json::Value>,
}

impl ModuleConfig {
    /// Creates a new empty module configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets a configuration parameter by key
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.params.get(key)
    }

    /// Sets a configuration parameter
    pub fn set(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.params.insert(key.into(), value);
    }

    /// Builder-style [`ModuleConfig::set`]
    pub fn with(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.set(key, value);
        self
    }

    /// Numeric parameter; `Ok(None)` if absent, an error if present with another type
    pub fn get_f64(&self, key: &str) -> Result<Option<f64>, DaqError> {
        self.get(key)
            .map(|v| {
                v.as_f64().ok_or_else(|| {
                    DaqError::Configuration(format!("module parameter '{key}' must be a number"))
                })
            })
            .transpose()
    }

    /// Non-negative integer parameter
    pub fn get_u64(&self, key: &str) -> Result<Option<u64>, DaqError> {
        self.get(key)
            .map(|v| {
                v.as_u64().ok_or_else(|| {
                    DaqError::Configuration(format!(
                        "module parameter '{key}' must be a non-negative integer"
                    ))
                })
            })
            .transpose()
    }

    /// Boolean value of `key`, if set
    pub fn get_bool(&self, key: &str) -> Result<Option<bool>, DaqError> {
        self.get(key)
            .map(|v| {
                v.as_bool().ok_or_else(|| {
                    DaqError::Configuration(format!("module parameter '{key}' must be a boolean"))
                })
            })
            .transpose()
    }

    /// String value of `key`, if set
    pub fn get_str(&self, key: &str) -> Result<Option<&str>, DaqError> {
        self.get(key)
            .map(|v| {
                v.as_str().ok_or_else(|| {
                    DaqError::Configuration(format!("module parameter '{key}' must be a string"))
                })
            })
            .transpose()
    }
}

/// The current status of a module.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModuleStatus {
    /// Module created but not initialized
    Idle,
    /// Module initialized and ready to start
    Initialized,
    /// Module is actively running its logic
    Running,
    /// Module has been stopped (can be started again)
    Stopped,
    /// Module encountered an error during start-up
    Error,
}

/// Base trait for all measurement modules.
///
/// Modules must be `Send + Sync` so the host can keep them behind an `Arc` and drive
/// them from any task.
#[async_trait]
pub trait Module: Send + Sync {
    /// Returns the unique name/identifier for this module.
    fn name(&self) -> &str;

    /// Applies configuration overrides.
    ///
    /// # Errors
    ///
    /// Returns `Err` if a parameter has the wrong type or an invalid value, or if the
    /// module is running.
    ///
    /// # State Transition
    ///
    /// On success: Idle → Initialized
    fn init(&mut self, config: ModuleConfig) -> Result<()>;

    /// Returns the current status of the module.
    fn status(&self) -> ModuleStatus;

    /// Activates the module: pushes settings to the hardware and starts its loops.
    async fn start(&mut self) -> Result<()>;

    /// Deactivates the module and stops its loops.
    async fn stop(&mut self) -> Result<()>;
}
