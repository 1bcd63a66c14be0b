//! Custom error types for the application.
//!
//! This module defines the primary error type, `LpmError`, for the whole crate.
//! Using the `thiserror` crate, it provides a centralized and consistent way to handle
//! the different kinds of errors that can occur, from malformed acquisition plans to
//! calibration rejections and file I/O.
//!
//! ## Error Hierarchy
//!
//! - **`InvalidPlan`**: The acquisition plan cannot produce a signature (empty lists,
//!   zero duration or readout interval, and similar). Callers recover locally by
//!   keeping the previous state and disabling downstream processing.
//! - **`Calibration`**: Wraps a [`CalibrationError`]. No partial calibration table is
//!   ever committed when this is returned.
//! - **`Signature`** / **`SignatureOrderMismatch`**: A signature string could not be
//!   parsed, or it disagrees with the pulse order the caller asked for.
//! - **`PlanFile`** / **`Series`**: Strict parsing failures for process files and raw
//!   power series, with enough context to locate the offending line.
//! - **`Config`** / **`Configuration`**: Figment extraction errors and semantic
//!   validation errors in the application settings.
//! - **`Io`**, **`Csv`**, **`Serialization`**: Propagated unchanged from the file layer.
//!   There is no automatic retry.
//! - **`Instrument`**: Failures reported by a power sensor.
//!
//! By using `#[from]`, `LpmError` can be created from the underlying error types,
//! simplifying error handling with the `?` operator.

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, LpmError>;

#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum LpmError {
    #[error("Invalid acquisition plan: {0}")]
    InvalidPlan(String),

    #[error("Calibration error: {0}")]
    Calibration(#[from] CalibrationError),

    #[error("Invalid signature string '{signature}': {reason}")]
    Signature { signature: String, reason: String },

    #[error("Signature '{signature}' encodes order {encoded} but {requested} was requested")]
    SignatureOrderMismatch {
        signature: String,
        encoded: String,
        requested: String,
    },

    #[error("No usable signature; supply a valid acquisition plan first")]
    NoActiveSignature,

    #[error("Process file error at line {line}: {message}")]
    PlanFile { line: usize, message: String },

    #[error("Raw series error: {0}")]
    Series(String),

    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Instrument error: {0}")]
    Instrument(String),

    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),
}

/// Reasons a calibration run is rejected.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CalibrationError {
    /// The reference wavelength is not one of the candidate wavelengths.
    #[error("reference not in series: {reference} nm is not among {candidates:?}")]
    ReferenceNotInSeries {
        /// Requested reference wavelength (nm)
        reference: u32,
        /// Candidate wavelengths (nm)
        candidates: Vec<u32>,
    },

    /// At least one wavelength produced a series noisier than the tolerance.
    #[error("too noisy: {wavelength} nm has std {std_dev:.4} above tolerance {tolerance}")]
    TooNoisy {
        /// First offending wavelength (nm)
        wavelength: u32,
        /// Measured standard deviation
        std_dev: f64,
        /// Configured tolerance
        tolerance: f64,
    },

    /// The reference wavelength averaged to zero, so no ratio can be formed.
    #[error("reference reading at {0} nm is zero")]
    ZeroReference(u32),

    /// The number of measured series does not match the number of wavelengths.
    #[error("inconsistent input: {series} series for {wavelengths} wavelengths")]
    LengthMismatch {
        /// Number of series measured
        series: usize,
        /// Number of wavelengths requested
        wavelengths: usize,
    },

    /// A wavelength produced no averaged readings at all.
    #[error("no readings collected at {0} nm")]
    EmptySeries(u32),
}

impl From<anyhow::Error> for LpmError {
    fn from(value: anyhow::Error) -> Self {
        LpmError::Instrument(format!("{value:#}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calibration_messages_name_the_failure() {
        let err = LpmError::from(CalibrationError::ReferenceNotInSeries {
            reference: 532,
            candidates: vec![405, 488],
        });
        assert!(err.to_string().contains("reference not in series"));

        let noisy = CalibrationError::TooNoisy {
            wavelength: 561,
            std_dev: 0.05,
            tolerance: 0.01,
        };
        assert!(noisy.to_string().starts_with("too noisy"));
    }

    #[test]
    fn converts_anyhow_error_to_instrument() {
        let err: LpmError = anyhow::anyhow!("meter timeout").into();
        assert!(matches!(err, LpmError::Instrument(ref msg) if msg == "meter timeout"));
    }
}
