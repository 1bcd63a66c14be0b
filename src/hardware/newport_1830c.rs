//! Serial driver for the Newport 1830-C optical power meter.
//!
//! The meter speaks plain line-terminated ASCII at 9600 baud 8N1 (not SCPI).
//! Only two commands matter for pulse acquisition: `Wnnnn` selects the
//! detector wavelength and `D?` returns one reading in watts, e.g. `+.75E-9`.
//! Setting commands are silent; the meter needs a short pause before the next
//! line. Readings are scaled to milliwatts for [`PowerSensor`].
//!
//! ```no_run
//! use smart_lpm::hardware::{Newport1830C, PowerSensor};
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let meter = Newport1830C::new("/dev/ttyUSB0");
//! meter.connect().await?;
//! meter.set_wavelength(561).await?;
//! let mw = meter.measure_once().await?;
//! # Ok(())
//! # }
//! ```

use super::capabilities::PowerSensor;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, info};

const WATTS_TO_MILLIWATTS: f64 = 1000.0;
const BAUD_RATE: u32 = 9600;
const SETTLE_AFTER_SET: Duration = Duration::from_millis(50);

/// Driver for the Newport 1830-C optical power meter.
pub struct Newport1830C {
    port_path: String,
    /// Serial port, `None` while disconnected
    port: Mutex<Option<BufReader<SerialStream>>>,
    /// Reply timeout
    timeout: Duration,
}

impl Newport1830C {
    /// Driver for the meter on `port_path` (e.g., "/dev/ttyS0", "COM3").
    ///
    /// The port is opened by [`PowerSensor::connect`].
    pub fn new(port_path: &str) -> Self {
        Self {
            port_path: port_path.to_string(),
            port: Mutex::new(None),
            timeout: Duration::from_millis(500),
        }
    }

    /// Override the reply timeout (500 ms by default).
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Write one command line; read one reply line when `reply` is set.
    async fn transact(&self, command: &str, reply: bool) -> Result<Option<String>> {
        let mut guard = self.port.lock().await;
        let port = guard
            .as_mut()
            .ok_or_else(|| anyhow!("power meter on {} is not connected", self.port_path))?;

        port.get_mut()
            .write_all(format!("{command}\n").as_bytes())
            .await
            .with_context(|| format!("sending '{command}' to {}", self.port_path))?;

        if !reply {
            tokio::time::sleep(SETTLE_AFTER_SET).await;
            return Ok(None);
        }

        let mut line = String::new();
        tokio::time::timeout(self.timeout, port.read_line(&mut line))
            .await
            .with_context(|| format!("no reply to '{command}' within {:?}", self.timeout))??;
        Ok(Some(line))
    }
}

/// Watts from a `D?` reply. Over/under-range and error replies are rejected.
fn parse_reading(reply: &str) -> Result<f64> {
    let reading = reply.trim();
    match reading {
        "" => Err(anyhow!("empty reading")),
        r if ["ERR", "OVER", "UNDER"].iter().any(|flag| r.contains(flag)) => {
            Err(anyhow!("meter reported '{r}'"))
        }
        r => r
            .parse::<f64>()
            .with_context(|| format!("unreadable power value '{r}'")),
    }
}

#[async_trait]
impl PowerSensor for Newport1830C {
    fn name(&self) -> &str {
        "newport_1830c"
    }

    async fn connect(&self) -> Result<()> {
        let mut guard = self.port.lock().await;
        if guard.is_some() {
            return Ok(());
        }
        let port = tokio_serial::new(&self.port_path, BAUD_RATE)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .with_context(|| format!("opening power meter on {}", self.port_path))?;
        *guard = Some(BufReader::new(port));
        info!(port = %self.port_path, "Power meter connected");
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        if self.port.lock().await.take().is_some() {
            info!(port = %self.port_path, "Power meter disconnected");
        }
        Ok(())
    }

    async fn set_wavelength(&self, wavelength: u32) -> Result<()> {
        debug!(wavelength, "Setting detector wavelength");
        self.transact(&format!("W{wavelength}"), false).await.map(|_| ())
    }

    async fn measure_once(&self) -> Result<f64> {
        let reply = self
            .transact("D?", true)
            .await?
            .ok_or_else(|| anyhow!("no reading returned"))?;
        Ok(parse_reading(&reply)? * WATTS_TO_MILLIWATTS)
    }

    fn first_reading_unreliable(&self) -> bool {
        true
    }
}
