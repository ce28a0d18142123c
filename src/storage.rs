//! Export of traces to tab-delimited text files.
//!
//! File layout:
//!
//! ```text
//! # modulation frequency (MHz): 1004
//! # cavity length (um): 460
//! measurement time (s)	photodiode signal (V)
//! -2.500000e-03	1.023400e-03
//! ...
//! ```
use async_trait::async_trait;
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};

use crate::error::{AppResult, DaqError};
use crate::measurement_types::Trace;

/// Base label of exported cavity transmission traces
pub const TRACE_LABEL: &str = "cavity_trans";

/// Named columns of equal length
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExportData {
    columns: Vec<(String, Vec<f64>)>,
}

impl ExportData {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a named column
    pub fn with_column(mut self, name: impl Into<String>, values: Vec<f64>) -> Self {
        self.columns.push((name.into(), values));
        self
    }

    /// Time and photodiode columns of a trace
    pub fn from_trace(trace: &Trace) -> Self {
        Self::new()
            .with_column("measurement time (s)", trace.time_axis().to_vec())
            .with_column("photodiode signal (V)", trace.samples().to_vec())
    }

    /// Columns in insertion order
    pub fn columns(&self) -> &[(String, Vec<f64>)] {
        &self.columns
    }

    fn row_count(&self) -> AppResult<usize> {
        let mut lengths = self.columns.iter().map(|(_, v)| v.len());
        let first = lengths.next().unwrap_or(0);
        match lengths.find(|len| *len != first) {
            Some(other) => Err(DaqError::LengthMismatch {
                x_len: first,
                y_len: other,
            }),
            None => Ok(first),
        }
    }
}

/// `cavity_trans` or `cavity_trans_<tag>`
pub fn trace_label(tag: Option<&str>) -> String {
    match tag {
        Some(tag) if !tag.is_empty() => format!("{TRACE_LABEL}_{tag}"),
        _ => TRACE_LABEL.to_string(),
    }
}

/// `<YYYYMMDD-HHMM-SS>_<label>.dat`
pub fn export_file_name(label: &str, timestamp: &DateTime<Local>) -> String {
    format!("{}_{label}.dat", timestamp.format("%Y%m%d-%H%M-%S"))
}

/// `%.6e` formatting: six decimals, signed two-digit exponent
pub fn format_scientific(value: f64) -> String {
    let formatted = format!("{value:.6e}");
    match formatted.split_once('e') {
        Some((mantissa, exponent)) => match exponent.parse::<i32>() {
            Ok(exp) => {
                let sign = if exp < 0 { '-' } else { '+' };
                format!("{mantissa}e{sign}{:02}", exp.abs())
            }
            Err(_) => formatted,
        },
        None => formatted,
    }
}

/// Destination for saved traces
#[async_trait]
pub trait TraceExporter: Send + Sync {
    /// Write `data` with a parameter header; returns the path of the new file
    async fn save(
        &self,
        data: &ExportData,
        dir: &Path,
        label: &str,
        parameters: &[(String, f64)],
        timestamp: DateTime<Local>,
    ) -> AppResult<PathBuf>;
}

/// Tab-delimited `.dat` writer
#[derive(Debug, Clone, Copy, Default)]
pub struct TsvExporter;

impl TsvExporter {
    /// Exporter writing tab-delimited `.dat` files
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TraceExporter for TsvExporter {
    async fn save(
        &self,
        data: &ExportData,
        dir: &Path,
        label: &str,
        parameters: &[(String, f64)],
        timestamp: DateTime<Local>,
    ) -> AppResult<PathBuf> {
        #[cfg(not(feature = "storage_csv"))]
        {
            let _ = (data, dir, label, parameters, timestamp);
            Err(DaqError::FeatureNotEnabled("storage_csv".to_string()))
        }

        #[cfg(feature = "storage_csv")]
        {
            use std::io::Write;

            let rows = data.row_count()?;
            if !dir.exists() {
                std::fs::create_dir_all(dir)?;
            }
            let path = dir.join(export_file_name(label, &timestamp));

            let mut file = std::fs::File::create(&path)
                .map_err(|e| DaqError::Storage(format!("Failed to create {}: {e}", path.display())))?;
            for (key, value) in parameters {
                writeln!(file, "# {key}: {value}").map_err(|e| DaqError::Storage(e.to_string()))?;
            }

            let mut writer = csv::WriterBuilder::new()
                .delimiter(b'\t')
                .from_writer(file);
            writer
                .write_record(data.columns().iter().map(|(name, _)| name.as_str()))
                .map_err(|e| DaqError::Storage(e.to_string()))?;
            for row in 0..rows {
                writer
                    .write_record(
                        data.columns()
                            .iter()
                            .map(|(_, values)| format_scientific(values[row])),
                    )
                    .map_err(|e| DaqError::Storage(e.to_string()))?;
            }
            writer.flush().map_err(|e| DaqError::Storage(e.to_string()))?;

            tracing::info!(path = %path.display(), rows, "Trace saved");
            Ok(path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn scientific_matches_printf() {
        assert_eq!(format_scientific(0.0), "0.000000e+00");
        assert_eq!(format_scientific(1234.5), "1.234500e+03");
        assert_eq!(format_scientific(-2.5e-3), "-2.500000e-03");
        assert_eq!(format_scientific(1e100), "1.000000e+100");
    }

    #[test]
    fn labels_and_file_names() {
        assert_eq!(trace_label(None), "cavity_trans");
        assert_eq!(trace_label(Some("")), "cavity_trans");
        assert_eq!(trace_label(Some("run2")), "cavity_trans_run2");

        let ts = Local.with_ymd_and_hms(2024, 3, 7, 14, 5, 9).unwrap();
        assert_eq!(
            export_file_name("cavity_trans", &ts),
            "20240307-1405-09_cavity_trans.dat"
        );
    }

    #[test]
    fn unequal_columns_are_rejected() {
        let data = ExportData::new()
            .with_column("a", vec![1.0, 2.0])
            .with_column("b", vec![1.0]);
        assert!(matches!(
            data.row_count(),
            Err(DaqError::LengthMismatch { x_len: 2, y_len: 1 })
        ));
    }
}
