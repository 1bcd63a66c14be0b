//! # Smart LPM Core Library
//!
//! This crate is the core of the `smart_lpm` light-power-meter tool. A light
//! source steps through a set of wavelengths and power settings while a single
//! detector records the averaged optical power. The library predicts the pulse
//! pattern ("signature") such an acquisition produces, recovers which
//! `(wavelength, power)` combination each recorded sample belongs to, and applies
//! per-wavelength calibration factors to the result.
//!
//! ## Crate Structure
//!
//! - **`plan`**: The `AcquisitionPlan` value object and the `PulseOrder` loop nesting.
//! - **`plan_file`**: Strict reading and writing of tab-separated process files.
//! - **`signature`**: Synthesis of the expected signature matrix, the compact
//!   signature string (e.g. `12T3P4L`) and per-wavelength display colours.
//! - **`classifier`**: Threshold-based pulse detection, in an offline pass over a
//!   complete series and incrementally one sample at a time.
//! - **`store`**: The `StructuredDataStore` tensors holding classified values.
//! - **`calibration`**: Per-wavelength correction factors relative to a reference.
//! - **`hardware`**: The `PowerSensor` capability trait with simulated and serial
//!   implementations.
//! - **`acquisition`**: Timed sensor polling, job queues and live acquisition.
//! - **`data`**: Raw series loading and tab-separated export.
//! - **`session`**: `LpmSession`, the single owner of plan, signature, store,
//!   threshold and calibration, plus session persistence.
//! - **`config`**, **`logging`**, **`error`**: Settings, tracing setup and the
//!   crate-wide `LpmError`.

pub mod acquisition;
pub mod calibration;
pub mod classifier;
pub mod config;
pub mod data;
pub mod error;
pub mod hardware;
pub mod logging;
pub mod plan;
pub mod plan_file;
pub mod session;
pub mod signature;
pub mod store;

pub use error::{AppResult, CalibrationError, LpmError};
pub use plan::{AcquisitionPlan, PulseOrder};
pub use session::LpmSession;
pub use signature::{Signature, SignatureDescriptor};
