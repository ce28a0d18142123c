//! # Finesse DAQ Library
//!
//! Measurement logic for the finesse of an optical cavity. A photodiode trace of the
//! cavity transmission is acquired from an oscilloscope, fitted with Lorentzian line
//! shapes, and the fitted widths and sideband splittings are converted into the
//! finesse and its propagated error. The RF synthesizer that drives the phase
//! modulator (EOM) is managed alongside.
//!
//! ## Crate Structure
//!
//! - **`acquisition`**: `AcquisitionScheduler`, single-shot and periodic trace retrieval
//!   from a `TraceSource`.
//! - **`config`**: Figment-based configuration (`FinesseConfig`) loaded from TOML and
//!   `FINESSE_DAQ_` environment variables.
//! - **`error`**: The `DaqError` enum shared by all logic.
//! - **`events`**: Fan-out event distribution and the `FinesseEvent` notifications.
//! - **`fitting`**: Fit models, fit results and the `FitEngine` seam, plus the
//!   `LorentzianEstimator` reference engine.
//! - **`hardware`**: Capability traits for the oscilloscope and the synthesizer, and
//!   their mock implementations.
//! - **`measurement`**: FSR, finesse derivation, two-step calibration and the
//!   `FinesseCalculator` that ties them to fits.
//! - **`measurement_types`**: The `Trace` type.
//! - **`modules`**: The `Module` lifecycle trait and the finesse and synthesizer modules.
//! - **`storage`**: Tab-delimited trace export.
//! - **`tracing_init`**: `tracing-subscriber` set-up.

pub mod acquisition;
pub mod config;
pub mod error;
pub mod events;
pub mod fitting;
pub mod hardware;
pub mod measurement;
pub mod measurement_types;
pub mod modules;
pub mod storage;
pub mod tracing_init;
