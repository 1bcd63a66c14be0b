//! Simulated power sensor.
//!
//! Produces gaussian readings around a configurable mean so the whole pipeline
//! (acquisition, calibration, reassignment) can run without hardware. Readings
//! are reproducible when a seed is given.
//!
//! A sensor built with [`SimulatedSensor::with_playback`] replays a commanded
//! power profile (typically a signature's combined profile) so that simulated
//! acquisitions contain real pulses:
//!
//! ```rust,ignore
//! let signature = Signature::synthesize(&plan)?;
//! let sensor = SimulatedSensor::new(3.5, 0.05, Some(7))
//!     .with_playback(signature.combined_profile().to_vec(), Duration::from_secs_f64(plan.readout_interval));
//! ```

use super::capabilities::PowerSensor;
use crate::config::SimulationSettings;
use anyhow::{bail, Result};
use async_trait::async_trait;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::debug;

/// Commanded power profile replayed against the sensor clock.
#[derive(Debug, Clone)]
struct Playback {
    /// Commanded power in percent per readout slot
    profile: Vec<f64>,
    readout_interval: Duration,
}

/// Random-number power meter.
pub struct SimulatedSensor {
    name: String,
    mean: f64,
    spread: f64,
    rng: Mutex<ChaCha8Rng>,
    response: HashMap<u32, f64>,
    wavelength: RwLock<Option<u32>>,
    connected: AtomicBool,
    playback: Option<Playback>,
    playback_start: Mutex<Option<Instant>>,
    temperature: Option<f64>,
    unreliable_first_reading: bool,
}

impl SimulatedSensor {
    /// Sensor reading `mean` mW with gaussian noise of `spread` mW.
    ///
    /// # Arguments
    /// * `seed` - Fixed seed for reproducible readings; `None` seeds from the OS
    pub fn new(mean: f64, spread: f64, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => ChaCha8Rng::seed_from_u64(s),
            None => ChaCha8Rng::from_entropy(),
        };
        Self {
            name: "simulated".to_string(),
            mean,
            spread: spread.abs(),
            rng: Mutex::new(rng),
            response: HashMap::new(),
            wavelength: RwLock::new(None),
            connected: AtomicBool::new(false),
            playback: None,
            playback_start: Mutex::new(None),
            temperature: None,
            unreliable_first_reading: false,
        }
    }

    /// Sensor configured from the `[simulation]` settings.
    pub fn from_settings(settings: &SimulationSettings) -> Self {
        let mut sensor = Self::new(settings.mean_mw, settings.spread_mw, settings.seed);
        for response in &settings.response {
            sensor = sensor.with_response(response.wavelength, response.mean_mw);
        }
        sensor
    }

    /// Mean reading at a specific wavelength, overriding the default mean.
    pub fn with_response(mut self, wavelength: u32, mean: f64) -> Self {
        self.response.insert(wavelength, mean);
        self
    }

    /// Replay a commanded power profile (percent per readout slot).
    ///
    /// The clock starts at the first reading; slots past the end of the profile
    /// read as dark.
    pub fn with_playback(mut self, profile: Vec<f64>, readout_interval: Duration) -> Self {
        self.playback = Some(Playback {
            profile,
            readout_interval,
        });
        self
    }

    /// Attach a simulated temperature probe.
    pub fn with_temperature(mut self, celsius: f64) -> Self {
        self.temperature = Some(celsius);
        self
    }

    /// Report the first averaged window as unreliable.
    pub fn with_unreliable_first_reading(mut self, unreliable: bool) -> Self {
        self.unreliable_first_reading = unreliable;
        self
    }

    /// Currently selected wavelength.
    pub async fn wavelength(&self) -> Option<u32> {
        *self.wavelength.read().await
    }

    /// Whether `connect` has been called without a matching `disconnect`.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn level(&self) -> f64 {
        let mean = match *self.wavelength.read().await {
            Some(wl) => self.response.get(&wl).copied().unwrap_or(self.mean),
            None => self.mean,
        };
        let Some(playback) = &self.playback else {
            return mean;
        };

        let mut start = self.playback_start.lock().await;
        let start = *start.get_or_insert_with(Instant::now);
        let slot = if playback.readout_interval.is_zero() {
            0
        } else {
            (start.elapsed().as_secs_f64() / playback.readout_interval.as_secs_f64()) as usize
        };
        let percent = playback.profile.get(slot).copied().unwrap_or(0.0);
        mean * percent / 100.0
    }

    async fn gaussian(&self) -> f64 {
        let mut rng = self.rng.lock().await;
        // Box-Muller; u1 in (0, 1] keeps the logarithm finite.
        let u1: f64 = 1.0 - rng.gen::<f64>();
        let u2: f64 = rng.gen();
        (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
    }
}

impl Default for SimulatedSensor {
    fn default() -> Self {
        Self::from_settings(&SimulationSettings::default())
    }
}

impl std::fmt::Debug for SimulatedSensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedSensor")
            .field("mean", &self.mean)
            .field("spread", &self.spread)
            .field("playback", &self.playback.is_some())
            .finish()
    }
}

#[async_trait]
impl PowerSensor for SimulatedSensor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> Result<()> {
        if !self.connected.swap(true, Ordering::SeqCst) {
            debug!(sensor = %self.name, "Virtual power meter connected");
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        if self.connected.swap(false, Ordering::SeqCst) {
            debug!(sensor = %self.name, "Virtual power meter disconnected");
        }
        Ok(())
    }

    async fn set_wavelength(&self, wavelength: u32) -> Result<()> {
        if wavelength == 0 {
            bail!("Wavelength must be positive");
        }
        *self.wavelength.write().await = Some(wavelength);
        Ok(())
    }

    async fn measure_once(&self) -> Result<f64> {
        if !self.is_connected() {
            bail!("Simulated sensor is not connected");
        }
        let level = self.level().await;
        let noise = if self.spread > 0.0 {
            self.spread * self.gaussian().await
        } else {
            0.0
        };
        Ok(level + noise)
    }

    async fn read_temperature(&self) -> Result<Option<f64>> {
        Ok(self.temperature)
    }

    fn first_reading_unreliable(&self) -> bool {
        self.unreliable_first_reading
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_requires_connection() {
        let sensor = SimulatedSensor::new(3.5, 0.2, Some(1));
        assert!(sensor.measure_once().await.is_err());
        sensor.connect().await.unwrap();
        assert!(sensor.measure_once().await.is_ok());
        sensor.disconnect().await.unwrap();
        assert!(!sensor.is_connected());
    }

    #[tokio::test]
    async fn test_seeded_readings_are_reproducible() {
        let a = SimulatedSensor::new(3.5, 0.2, Some(42));
        let b = SimulatedSensor::new(3.5, 0.2, Some(42));
        a.connect().await.unwrap();
        b.connect().await.unwrap();
        for _ in 0..10 {
            assert_eq!(a.measure_once().await.unwrap(), b.measure_once().await.unwrap());
        }
    }

    #[tokio::test]
    async fn test_readings_center_on_mean() {
        let sensor = SimulatedSensor::new(3.5, 0.2, Some(3));
        sensor.connect().await.unwrap();
        let mut total = 0.0;
        for _ in 0..2000 {
            total += sensor.measure_once().await.unwrap();
        }
        let mean = total / 2000.0;
        assert!((mean - 3.5).abs() < 0.05, "mean was {mean}");
    }

    #[tokio::test]
    async fn test_per_wavelength_response() {
        let sensor = SimulatedSensor::new(1.0, 0.0, Some(0)).with_response(561, 7.5);
        sensor.connect().await.unwrap();
        sensor.set_wavelength(561).await.unwrap();
        assert_eq!(sensor.measure_once().await.unwrap(), 7.5);
        sensor.set_wavelength(405).await.unwrap();
        assert_eq!(sensor.measure_once().await.unwrap(), 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_playback_follows_profile() {
        let sensor = SimulatedSensor::new(4.0, 0.0, Some(0))
            .with_playback(vec![0.0, 50.0, 100.0], Duration::from_secs(1));
        sensor.connect().await.unwrap();

        assert_eq!(sensor.measure_once().await.unwrap(), 0.0);
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(sensor.measure_once().await.unwrap(), 2.0);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(sensor.measure_once().await.unwrap(), 4.0);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(sensor.measure_once().await.unwrap(), 0.0);
    }
}
