//! Raw data files.

pub mod series;
pub mod storage;

pub use series::{RawSample, RawSeries};
pub use storage::{DataExporter, ExportInput, ExportReport, RawTsvWriter};
