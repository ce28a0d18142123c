//! Custom error types for the finesse measurement logic.
//!
//! `DaqError` is the primary error type of the crate. Built with `thiserror`, it separates
//! configuration problems, hardware failures surfaced by the capability traits, and the
//! lookup failures of the finesse derivation.
//!
//! ## Error Hierarchy
//!
//! - **`Config`**: Wraps errors from `figment` while loading the configuration file.
//! - **`Configuration`**: Semantic errors in a configuration that parsed fine (e.g. a
//!   negative cavity length). Raised by the validation step.
//! - **`Io`**: Wraps `std::io::Error`, mostly from the exporter.
//! - **`Instrument`**: A hardware call (oscilloscope, synthesizer) failed. Hardware
//!   traits return `anyhow::Result`; the message keeps the whole context chain.
//! - **`UnknownFitModel`**: A fit model name that is not in the model list.
//! - **`MissingFitField`**: A value the finesse formula needs is absent from the fit
//!   result (or from the calibration session, for step 2 before step 1).
//! - **`FitFailed`**: The fit engine itself returned an error.
//! - **`NoTrace`**: A fit was requested before any trace was acquired.
//!
//! `From` conversions let `?` lift `figment` and I/O errors directly.

use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

/// Errors raised by the finesse pipeline
#[derive(Error, Debug)]
pub enum DaqError {
    /// Configuration could not be extracted
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// A configuration value is out of range
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Filesystem failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Hardware call failed
    #[error("Instrument error: {0}")]
    Instrument(String),

    /// Fit model name not in the container
    #[error("Fit function \"{0}\" not available in finesse fit container")]
    UnknownFitModel(String),

    /// A fit quantity needed by the derivation is absent
    #[error("Fit result is missing field \"{0}\"")]
    MissingFitField(String),

    /// The fit engine returned an error
    #[error("Fit engine failed: {0}")]
    FitFailed(String),

    /// x and y data differ in length
    #[error("Data length mismatch: x has {x_len} points, y has {y_len}")]
    LengthMismatch { x_len: usize, y_len: usize },

    /// Nothing acquired yet
    #[error("No trace acquired yet")]
    NoTrace,

    /// Export could not be written
    #[error("Data export error: {0}")]
    Storage(String),

    /// Cargo feature missing from the build
    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),

    /// Value not among the allowed choices
    #[error("Invalid choice for parameter: {0}")]
    ParameterInvalidChoice(String),
}

impl DaqError {
    /// Wrap a hardware-layer error, keeping its context chain in the message.
    pub fn instrument(err: anyhow::Error) -> Self {
        DaqError::Instrument(format!("{err:#}"))
    }

    /// Whether the measurement can continue after this error.
    ///
    /// Lookup and fit failures leave the last good finesse in place; configuration and
    /// I/O problems need operator action.
    pub fn can_recover(&self) -> bool {
        match self {
            DaqError::Config(_)
            | DaqError::Configuration(_)
            | DaqError::Io(_)
            | DaqError::FeatureNotEnabled(_) => false,
            DaqError::Instrument(_)
            | DaqError::UnknownFitModel(_)
            | DaqError::MissingFitField(_)
            | DaqError::FitFailed(_)
            | DaqError::LengthMismatch { .. }
            | DaqError::NoTrace
            | DaqError::Storage(_)
            | DaqError::ParameterInvalidChoice(_) => true,
        }
    }
}

impl From<figment::Error> for DaqError {
    fn from(value: figment::Error) -> Self {
        DaqError::Config(Box::new(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instrument_error_keeps_context_chain() {
        let err = anyhow::anyhow!("VISA timeout").context("reading channel 1");
        let app_err = DaqError::instrument(err);
        let msg = app_err.to_string();
        assert!(msg.contains("reading channel 1"));
        assert!(msg.contains("VISA timeout"));
        assert!(app_err.can_recover());
    }

    #[test]
    fn missing_field_names_the_field() {
        let err = DaqError::MissingFitField("FWHM 1".into());
        assert_eq!(err.to_string(), "Fit result is missing field \"FWHM 1\"");
    }

    #[test]
    fn configuration_errors_are_not_recoverable() {
        assert!(!DaqError::Configuration("length must be positive".into()).can_recover());
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing dir");
        assert!(!DaqError::from(io).can_recover());
    }
}
