//! Signature synthesis.
//!
//! The signature is the on/off/power pattern an acquisition plan is expected to
//! produce: one row per wavelength, one column per readout, each cell holding the
//! commanded power setting (zero during pauses). It is built from a single block
//! that visits every (wavelength, power) combination once, tiled as many whole
//! times as the duration allows after one leading idle gap.
//!
//! ```text
//! LP, 2 wavelengths x 2 powers, 3 readouts + 1 idle per pulse
//!
//! 405 nm  . a a a . b b b . . . . . . . . .
//! 488 nm  . . . . . . . . . a a a . b b b .
//!
//! PL, same plan
//!
//! 405 nm  . a a a . . . . . b b b . . . . .
//! 488 nm  . . . . . a a a . . . . . b b b .
//! ```

pub mod color;
pub mod descriptor;

pub use color::{wavelength_to_rgb, Rgb};
pub use descriptor::{FieldLabel, SignatureDescriptor};

use crate::error::{AppResult, LpmError};
use crate::plan::{AcquisitionPlan, PulseOrder};
use ndarray::{s, Array1, Array2, Axis};
use tracing::debug;

/// Slack absorbed by interval divisions so that e.g. `0.3 / 0.1` floors to 3.
const RATIO_EPSILON: f64 = 1e-9;

/// Truncating division of two intervals.
pub(crate) fn floor_ratio(numerator: f64, denominator: f64) -> usize {
    let ratio = numerator / denominator + RATIO_EPSILON;
    if ratio.is_finite() && ratio > 0.0 {
        ratio.floor() as usize
    } else {
        0
    }
}

/// Synthesized signature of an acquisition plan.
#[derive(Debug, Clone, PartialEq)]
pub struct Signature {
    profile: Array2<f64>,
    descriptor: SignatureDescriptor,
    idle_points_per_pulse: usize,
    blocks: usize,
    colors: Vec<Rgb>,
    wavelengths: Vec<u32>,
    set_powers: Vec<u32>,
}

impl Signature {
    /// Synthesize the expected pattern for `plan`.
    ///
    /// # Errors
    /// [`LpmError::InvalidPlan`] when the plan cannot describe any pulse.
    pub fn synthesize(plan: &AcquisitionPlan) -> AppResult<Self> {
        plan.validate()?;

        let wavelength_count = plan.wavelength_count();
        let power_count = plan.power_count();
        let pulses_per_block = plan.pulses_per_block();

        let effective_duration = plan.duration - plan.signature_pause;
        let readout_count = floor_ratio(effective_duration, plan.readout_interval) + 1;

        let running_time_per_pulse =
            floor_ratio(plan.measurement_interval, pulses_per_block as f64) as f64;
        let points_per_pulse = floor_ratio(
            running_time_per_pulse - plan.signature_pause,
            plan.readout_interval,
        );
        if points_per_pulse == 0 {
            return Err(LpmError::InvalidPlan(format!(
                "{}s per pulse leaves no readouts after a {}s pause",
                running_time_per_pulse, plan.signature_pause
            )));
        }
        let idle_points_per_pulse = floor_ratio(plan.signature_pause, plan.readout_interval);
        let blocks = floor_ratio(effective_duration, plan.measurement_interval);

        let block = build_block(plan, points_per_pulse, idle_points_per_pulse);
        let block_len = block.ncols();

        let mut profile = Array2::<f64>::zeros((wavelength_count, readout_count));
        for index in 0..blocks {
            let start = index * block_len + idle_points_per_pulse;
            if start >= readout_count {
                break;
            }
            let end = (start + block_len).min(readout_count);
            profile
                .slice_mut(s![.., start..end])
                .assign(&block.slice(s![.., ..end - start]));
        }

        let descriptor =
            SignatureDescriptor::new(plan.order, points_per_pulse, wavelength_count, power_count);
        debug!(
            signature = %descriptor,
            readout_count,
            blocks,
            idle_points_per_pulse,
            "Synthesized signature"
        );

        Ok(Self {
            profile,
            descriptor,
            idle_points_per_pulse,
            blocks,
            colors: plan
                .wavelengths
                .iter()
                .map(|&w| wavelength_to_rgb(f64::from(w)))
                .collect(),
            wavelengths: plan.wavelengths.clone(),
            set_powers: plan.set_powers.clone(),
        })
    }

    /// Commanded power per wavelength (rows) and readout (columns).
    pub fn profile(&self) -> &Array2<f64> {
        &self.profile
    }

    /// Parsed form of the signature string.
    pub fn descriptor(&self) -> &SignatureDescriptor {
        &self.descriptor
    }

    /// Compact textual form, e.g. `4T1P2L`.
    pub fn signature_string(&self) -> String {
        self.descriptor.to_string()
    }

    /// Number of readouts (columns).
    pub fn readout_count(&self) -> usize {
        self.profile.ncols()
    }

    /// Readouts per pulse.
    pub fn points_per_pulse(&self) -> usize {
        self.descriptor.points_per_pulse()
    }

    /// Idle readouts before each pulse.
    pub fn idle_points_per_pulse(&self) -> usize {
        self.idle_points_per_pulse
    }

    /// Number of whole blocks written into the profile.
    pub fn blocks(&self) -> usize {
        self.blocks
    }

    /// Loop nesting encoded in the signature string.
    pub fn order(&self) -> PulseOrder {
        self.descriptor.order()
    }

    /// Display colour per wavelength row.
    pub fn colors(&self) -> &[Rgb] {
        &self.colors
    }

    /// Wavelengths (nm), aligned with the profile rows.
    pub fn wavelengths(&self) -> &[u32] {
        &self.wavelengths
    }

    /// Power settings (%), in acquisition order.
    pub fn set_powers(&self) -> &[u32] {
        &self.set_powers
    }

    /// Number of wavelengths.
    pub fn wavelength_count(&self) -> usize {
        self.wavelengths.len()
    }

    /// Number of power settings.
    pub fn power_count(&self) -> usize {
        self.set_powers.len()
    }

    /// Wavelength row that is on at `column`, if any.
    pub fn active_wavelength_at(&self, column: usize) -> Option<usize> {
        if column >= self.readout_count() {
            return None;
        }
        self.profile.column(column).iter().position(|&v| v > 0.0)
    }

    /// Commanded power summed over wavelengths, one value per readout.
    ///
    /// Since pulses never overlap this is the pattern a single detector sees.
    pub fn combined_profile(&self) -> Array1<f64> {
        self.profile.sum_axis(Axis(0))
    }
}

/// One block covering every (wavelength, power) pulse once.
fn build_block(plan: &AcquisitionPlan, points_per_pulse: usize, idle: usize) -> Array2<f64> {
    let pulse_len = points_per_pulse + idle;
    let wavelength_count = plan.wavelength_count();
    let power_count = plan.power_count();
    let mut block = Array2::<f64>::zeros((wavelength_count, pulse_len * plan.pulses_per_block()));

    for wl in 0..wavelength_count {
        for (p, &power) in plan.set_powers.iter().enumerate() {
            let pulse = match plan.order {
                PulseOrder::Lp => wl * power_count + p,
                PulseOrder::Pl => p * wavelength_count + wl,
            };
            let start = pulse * pulse_len;
            block
                .slice_mut(s![wl, start..start + points_per_pulse])
                .fill(f64::from(power));
        }
    }
    block
}
