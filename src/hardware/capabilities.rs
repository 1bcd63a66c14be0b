//! Power Sensor Capability
//!
//! The acquisition pipeline talks to a light power meter only through the
//! [`PowerSensor`] trait. A simulated sensor and the serial Newport 1830-C
//! implement it, so acquisition and calibration run unchanged against either.
//!
//! # Design Philosophy
//!
//! The capability:
//! - Is async (uses #[async_trait])
//! - Is thread-safe (requires Send + Sync)
//! - Uses anyhow::Result for errors
//! - Keeps optional features (temperature probe, first-reading quirks) behind
//!   default methods so minimal sensors only implement the core calls
//!
//! # Example
//!
//! ```rust,ignore
//! async fn single_reading<S>(sensor: &S, wavelength: u32) -> Result<f64>
//! where
//!     S: PowerSensor + ?Sized,
//! {
//!     sensor.connect().await?;
//!     sensor.set_wavelength(wavelength).await?;
//!     let reading = sensor.measure_once().await?;
//!     sensor.disconnect().await?;
//!     Ok(reading)
//! }
//! ```

use anyhow::Result;
use async_trait::async_trait;

/// Capability: Optical Power Measurement
///
/// Devices that report the optical power arriving at a detector head.
///
/// # Contract
/// - `measure_once` returns a single instantaneous reading in milliwatts
/// - `set_wavelength` selects the detector's responsivity correction (nm)
/// - Calls other than `connect` may fail while disconnected
/// - `connect` and `disconnect` are idempotent
///
/// # Thread Safety
/// - All methods take `&self`; implementations use interior mutability
#[async_trait]
pub trait PowerSensor: Send + Sync {
    /// Human-readable identifier used in logs.
    fn name(&self) -> &str;

    /// Open the connection to the device.
    async fn connect(&self) -> Result<()>;

    /// Release the device.
    async fn disconnect(&self) -> Result<()>;

    /// Select the calibration wavelength of the detector head.
    ///
    /// # Arguments
    /// * `wavelength` - Wavelength in nm
    async fn set_wavelength(&self, wavelength: u32) -> Result<()>;

    /// Take one reading.
    ///
    /// # Returns
    /// - Ok(milliwatts) on success
    /// - Err on hardware error or timeout
    async fn measure_once(&self) -> Result<f64>;

    /// Read the external temperature probe, if one is attached.
    ///
    /// # Default Implementation
    /// Reports no probe.
    async fn read_temperature(&self) -> Result<Option<f64>> {
        Ok(None)
    }

    /// Whether the first averaged window after a wavelength change is biased
    /// and should be dropped.
    fn first_reading_unreliable(&self) -> bool {
        false
    }
}
