//! Trace data shared between the acquisition scheduler, the finesse calculator and the
//! exporter.

use serde::{Deserialize, Serialize};

use crate::error::{AppResult, DaqError};
use crate::fitting::linspace;

/// One oscilloscope trace: a time axis and a voltage per point.
///
/// Immutable once captured; the scheduler replaces it wholesale and shares it as
/// `Arc<Trace>`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    time_axis: Vec<f64>,
    samples: Vec<f64>,
}

impl Trace {
    /// Build a trace; both vectors must have the same length
    pub fn new(time_axis: Vec<f64>, samples: Vec<f64>) -> AppResult<Self> {
        if time_axis.len() != samples.len() {
            return Err(DaqError::LengthMismatch {
                x_len: time_axis.len(),
                y_len: samples.len(),
            });
        }
        Ok(Self { time_axis, samples })
    }

    /// Flat trace shown in place of a zero-length acquisition
    pub fn placeholder(record_length: usize) -> Self {
        Self {
            time_axis: linspace(0.0, 1.0, record_length),
            samples: vec![0.0; record_length],
        }
    }

    /// Time axis in seconds
    pub fn time_axis(&self) -> &[f64] {
        &self.time_axis
    }

    /// Samples in volts
    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    /// Number of samples
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// No samples
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Whether every sample is exactly zero (placeholder or dead input)
    pub fn is_flat_zero(&self) -> bool {
        self.samples.iter().all(|v| *v == 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_mismatched_lengths() {
        let err = Trace::new(vec![0.0, 1.0], vec![0.5]).unwrap_err();
        assert!(matches!(err, DaqError::LengthMismatch { x_len: 2, y_len: 1 }));
    }

    #[test]
    fn placeholder_spans_unit_interval() {
        let trace = Trace::placeholder(11);
        assert_eq!(trace.len(), 11);
        assert_eq!(trace.time_axis()[0], 0.0);
        assert_eq!(trace.time_axis()[10], 1.0);
        assert!(trace.is_flat_zero());
    }

    #[test]
    fn test_trace_serialization() {
        let trace = Trace::new(vec![0.0, 1e-6], vec![0.01, 0.02]).unwrap();
        let json = serde_json::to_string(&trace).unwrap();
        let back: Trace = serde_json::from_str(&json).unwrap();
        assert_eq!(trace, back);
    }
}
