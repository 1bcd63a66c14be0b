//! Acquisition plan value object.
//!
//! An [`AcquisitionPlan`] lists the wavelengths and power settings an acquisition
//! cycles through, together with the timing that shapes the expected signature.
//! It is a plain value: the session controller owns one and re-synthesizes the
//! signature whenever any field changes.

use crate::error::{AppResult, LpmError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// Nesting of the two acquisition loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PulseOrder {
    /// Wavelengths outer, powers inner: every power is pulsed at one wavelength
    /// before moving to the next wavelength.
    #[serde(rename = "LP")]
    Lp,
    /// Powers outer, wavelengths inner: every wavelength is pulsed at one power
    /// before moving to the next power.
    #[serde(rename = "PL")]
    Pl,
}

impl PulseOrder {
    /// Short label used in process files and on the command line.
    pub fn as_str(&self) -> &'static str {
        match self {
            PulseOrder::Lp => "LP",
            PulseOrder::Pl => "PL",
        }
    }
}

impl fmt::Display for PulseOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PulseOrder {
    type Err = LpmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "LP" | "lp" => Ok(PulseOrder::Lp),
            "PL" | "pl" => Ok(PulseOrder::Pl),
            other => Err(LpmError::InvalidPlan(format!(
                "unknown order '{other}', expected LP or PL"
            ))),
        }
    }
}

/// Parameters of one acquisition.
///
/// All times are in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionPlan {
    /// Wavelengths in nm, in acquisition order. Must be unique.
    pub wavelengths: Vec<u32>,
    /// Power settings in percent, in acquisition order.
    pub set_powers: Vec<u32>,
    /// Total acquisition time.
    pub duration: f64,
    /// Time to cycle once through every (wavelength, power) combination.
    pub measurement_interval: f64,
    /// Averaging window of the sensor. Defaults to `readout_interval`.
    pub average_interval: f64,
    /// Interval between consecutive readouts.
    pub readout_interval: f64,
    /// Idle time inserted before each pulse.
    pub signature_pause: f64,
    /// Loop nesting.
    pub order: PulseOrder,
}

impl Default for AcquisitionPlan {
    fn default() -> Self {
        Self {
            wavelengths: Vec::new(),
            set_powers: Vec::new(),
            duration: 0.0,
            measurement_interval: 0.0,
            average_interval: 1.0,
            readout_interval: 1.0,
            signature_pause: 0.0,
            order: PulseOrder::Lp,
        }
    }
}

impl AcquisitionPlan {
    /// Number of wavelengths.
    pub fn wavelength_count(&self) -> usize {
        self.wavelengths.len()
    }

    /// Number of power settings.
    pub fn power_count(&self) -> usize {
        self.set_powers.len()
    }

    /// Pulses needed to visit every (wavelength, power) combination once.
    pub fn pulses_per_block(&self) -> usize {
        self.wavelength_count() * self.power_count()
    }

    /// Index of a wavelength in the plan, if present.
    pub fn wavelength_index(&self, wavelength: u32) -> Option<usize> {
        self.wavelengths.iter().position(|&w| w == wavelength)
    }

    /// Check that a signature can be synthesized from this plan.
    ///
    /// # Errors
    /// Returns [`LpmError::InvalidPlan`] naming the first violated constraint.
    pub fn validate(&self) -> AppResult<()> {
        if self.wavelengths.is_empty() || self.wavelengths == [0] {
            return Err(invalid("no wavelengths"));
        }
        if self.set_powers.is_empty() || self.set_powers == [0] {
            return Err(invalid("no power settings"));
        }
        let mut seen = HashSet::new();
        if let Some(dup) = self.wavelengths.iter().find(|w| !seen.insert(**w)) {
            return Err(invalid(&format!("wavelength {dup} nm listed twice")));
        }
        if !(self.duration > 0.0) {
            return Err(invalid("duration must be positive"));
        }
        if !(self.readout_interval > 0.0) {
            return Err(invalid("readout interval must be positive"));
        }
        if !(self.measurement_interval > 0.0) {
            return Err(invalid("measurement interval must be positive"));
        }
        if !(self.signature_pause >= 0.0) {
            return Err(invalid("signature pause cannot be negative"));
        }
        if self.duration < self.measurement_interval {
            return Err(invalid(&format!(
                "duration {}s is shorter than one measurement interval ({}s)",
                self.duration, self.measurement_interval
            )));
        }
        if self.duration < self.signature_pause {
            return Err(invalid("signature pause exceeds the duration"));
        }
        Ok(())
    }
}

fn invalid(reason: &str) -> LpmError {
    LpmError::InvalidPlan(reason.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan() -> AcquisitionPlan {
        AcquisitionPlan {
            wavelengths: vec![405, 488],
            set_powers: vec![50],
            duration: 20.0,
            measurement_interval: 10.0,
            average_interval: 1.0,
            readout_interval: 1.0,
            signature_pause: 1.0,
            order: PulseOrder::Lp,
        }
    }

    #[test]
    fn accepts_valid_plan() {
        assert!(plan().validate().is_ok());
        assert_eq!(plan().pulses_per_block(), 2);
    }

    #[test]
    fn rejects_missing_fields() {
        let mut p = plan();
        p.wavelengths.clear();
        assert!(matches!(p.validate(), Err(LpmError::InvalidPlan(_))));

        let mut p = plan();
        p.set_powers = vec![0];
        assert!(p.validate().is_err());

        let mut p = plan();
        p.duration = 0.0;
        assert!(p.validate().is_err());

        let mut p = plan();
        p.readout_interval = 0.0;
        assert!(p.validate().is_err());
    }

    #[test]
    fn rejects_duplicate_wavelengths() {
        let mut p = plan();
        p.wavelengths = vec![405, 405];
        let err = p.validate().unwrap_err();
        assert!(err.to_string().contains("listed twice"));
    }

    #[test]
    fn rejects_duration_below_interval() {
        let mut p = plan();
        p.duration = 5.0;
        assert!(p.validate().is_err());
    }

    #[test]
    fn parses_order_labels() {
        assert_eq!("LP".parse::<PulseOrder>().unwrap(), PulseOrder::Lp);
        assert_eq!(" PL ".parse::<PulseOrder>().unwrap(), PulseOrder::Pl);
        assert!("LL".parse::<PulseOrder>().is_err());
    }
}
