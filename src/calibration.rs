//! Per-wavelength calibration.
//!
//! A calibration run measures a short, fixed-power series at every candidate
//! wavelength and expresses each wavelength's mean reading relative to a
//! reference wavelength:
//!
//! ```text
//! factor[i] = mean[i] / mean[reference]      factor[reference] = 1
//! ```
//!
//! The run is rejected as a whole when the reference is not a candidate or when
//! any series is noisier than the tolerance; no partial table is produced.

use crate::acquisition::{AcquisitionTiming, MeasurementJob, MeasurementManager};
use crate::config::CalibrationSettings;
use crate::error::{AppResult, CalibrationError};
use crate::hardware::PowerSensor;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Mean and population standard deviation of a series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeriesStats {
    /// Arithmetic mean
    pub mean: f64,
    /// Population standard deviation
    pub std_dev: f64,
}

impl SeriesStats {
    /// Statistics of `values`, `None` when empty.
    pub fn from_values(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        Some(Self {
            mean,
            std_dev: variance.sqrt(),
        })
    }
}

/// Multiplicative correction factors, aligned with the wavelength list they were
/// derived from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationTable {
    wavelengths: Vec<u32>,
    reference: u32,
    factors: Vec<f64>,
    stats: Vec<SeriesStats>,
}

impl CalibrationTable {
    /// Wavelengths the table was measured at.
    pub fn wavelengths(&self) -> &[u32] {
        &self.wavelengths
    }

    /// Reference wavelength (factor 1).
    pub fn reference(&self) -> u32 {
        self.reference
    }

    /// Factors aligned with [`wavelengths`](Self::wavelengths).
    pub fn factors(&self) -> &[f64] {
        &self.factors
    }

    /// Per-wavelength statistics the factors were computed from.
    pub fn stats(&self) -> &[SeriesStats] {
        &self.stats
    }

    /// Factor of one wavelength.
    pub fn factor_for(&self, wavelength: u32) -> Option<f64> {
        self.wavelengths
            .iter()
            .position(|&w| w == wavelength)
            .and_then(|i| self.factors.get(i).copied())
    }

    /// Whether the table applies to a plan with these wavelengths.
    ///
    /// Only an identical list (same wavelengths, same order) matches.
    pub fn matches(&self, wavelengths: &[u32]) -> bool {
        self.wavelengths == wavelengths
    }

    /// Factors indexed like `wavelengths`, when the table applies to them.
    pub fn factors_for_plan(&self, wavelengths: &[u32]) -> Option<&[f64]> {
        self.matches(wavelengths).then_some(self.factors.as_slice())
    }

    /// Write the table as JSON.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> AppResult<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Read a table written by [`save`](Self::save).
    ///
    /// # Errors
    /// [`CalibrationError::LengthMismatch`] when the factors do not line up with
    /// the wavelengths, [`CalibrationError::ReferenceNotInSeries`] when the
    /// reference is not listed.
    pub fn load<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let json = std::fs::read_to_string(path)?;
        let table: Self = serde_json::from_str(&json)?;
        table.check_shape()?;
        Ok(table)
    }

    fn check_shape(&self) -> Result<(), CalibrationError> {
        if self.factors.len() != self.wavelengths.len() {
            return Err(CalibrationError::LengthMismatch {
                series: self.factors.len(),
                wavelengths: self.wavelengths.len(),
            });
        }
        if !self.wavelengths.contains(&self.reference) {
            return Err(CalibrationError::ReferenceNotInSeries {
                reference: self.reference,
                candidates: self.wavelengths.clone(),
            });
        }
        Ok(())
    }
}

/// Build a table from one measured series per wavelength.
///
/// # Errors
/// - [`CalibrationError::ReferenceNotInSeries`] when `reference` is not listed
/// - [`CalibrationError::LengthMismatch`] when `series` and `wavelengths` differ in length
/// - [`CalibrationError::EmptySeries`] when a wavelength has no readings
/// - [`CalibrationError::TooNoisy`] when any standard deviation exceeds `tolerance`
/// - [`CalibrationError::ZeroReference`] when the reference mean is zero
pub fn compute_table(
    wavelengths: &[u32],
    reference: u32,
    series: &[Vec<f64>],
    tolerance: f64,
) -> Result<CalibrationTable, CalibrationError> {
    let reference_index = wavelengths
        .iter()
        .position(|&w| w == reference)
        .ok_or_else(|| CalibrationError::ReferenceNotInSeries {
            reference,
            candidates: wavelengths.to_vec(),
        })?;
    if series.len() != wavelengths.len() {
        return Err(CalibrationError::LengthMismatch {
            series: series.len(),
            wavelengths: wavelengths.len(),
        });
    }

    let stats = wavelengths
        .iter()
        .zip(series)
        .map(|(&wavelength, values)| {
            SeriesStats::from_values(values).ok_or(CalibrationError::EmptySeries(wavelength))
        })
        .collect::<Result<Vec<_>, _>>()?;

    if let Some((&wavelength, s)) = wavelengths
        .iter()
        .zip(&stats)
        .find(|(_, s)| s.std_dev > tolerance)
    {
        return Err(CalibrationError::TooNoisy {
            wavelength,
            std_dev: s.std_dev,
            tolerance,
        });
    }

    let reference_mean = stats[reference_index].mean;
    if reference_mean == 0.0 {
        return Err(CalibrationError::ZeroReference(reference));
    }

    let factors = stats
        .iter()
        .enumerate()
        .map(|(i, s)| {
            if i == reference_index {
                1.0
            } else {
                s.mean / reference_mean
            }
        })
        .collect();

    Ok(CalibrationTable {
        wavelengths: wavelengths.to_vec(),
        reference,
        factors,
        stats,
    })
}

/// Runs calibration measurements on a sensor.
#[derive(Debug, Clone)]
pub struct CalibrationEngine {
    settings: CalibrationSettings,
    timing: AcquisitionTiming,
}

impl CalibrationEngine {
    /// Engine with the given run parameters.
    pub fn new(settings: CalibrationSettings, timing: AcquisitionTiming) -> Self {
        Self { settings, timing }
    }

    /// Measure every candidate and compute the table.
    ///
    /// The reference is checked before the sensor is touched.
    pub async fn run(
        &self,
        sensor: Arc<dyn PowerSensor>,
        candidates: &[u32],
        reference: u32,
    ) -> AppResult<CalibrationTable> {
        if !candidates.contains(&reference) {
            return Err(CalibrationError::ReferenceNotInSeries {
                reference,
                candidates: candidates.to_vec(),
            }
            .into());
        }

        let mut manager = MeasurementManager::new(sensor, self.timing);
        for &wavelength in candidates {
            manager.add_measurement(MeasurementJob::new(
                wavelength,
                self.settings.nominal_power_pct,
                self.settings.duration_s,
                self.settings.average_window_s,
            )?);
        }
        info!(
            candidates = ?candidates,
            reference,
            duration_s = self.settings.duration_s,
            "Calibration started"
        );

        let measured = manager.run_to_completion().await?;
        let series: Vec<Vec<f64>> = measured.iter().map(|m| m.powers()).collect();
        for (wavelength, values) in candidates.iter().zip(&series) {
            if let Some(stats) = SeriesStats::from_values(values) {
                info!(
                    wavelength,
                    mean = stats.mean,
                    std_dev = stats.std_dev,
                    "Calibration series"
                );
            }
        }

        match compute_table(candidates, reference, &series, self.settings.noise_tolerance) {
            Ok(table) => {
                info!(factors = ?table.factors(), "Calibration table ready");
                Ok(table)
            }
            Err(e) => {
                warn!(error = %e, "Calibration rejected");
                Err(e.into())
            }
        }
    }
}
