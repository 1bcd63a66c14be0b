//! Power sensors.
//!
//! [`capabilities::PowerSensor`] is the only interface the acquisition layer
//! sees. The serial Newport driver is compiled with the
//! `instrument_newport_power_meter` feature.

pub mod capabilities;
pub mod mock;
#[cfg(feature = "instrument_newport_power_meter")]
pub mod newport_1830c;

pub use capabilities::PowerSensor;
pub use mock::SimulatedSensor;
#[cfg(feature = "instrument_newport_power_meter")]
pub use newport_1830c::Newport1830C;
