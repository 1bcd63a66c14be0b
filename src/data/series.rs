//! Raw power series.
//!
//! A raw series is the ordered list of averaged readings produced by one
//! acquisition, as written to the raw tab-separated file:
//!
//! ```text
//! timestamp                wavelength[nm]  setting[%]  power[mW]  temperature[C]
//! 2024-03-01 10:15:02.125  488             80          3.51       24.8
//! ```
//!
//! Columns are located by header name, so their order does not matter and unit
//! suffixes are ignored. The temperature column is optional.

use crate::error::{AppResult, LpmError};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::Path;

/// Timestamp layout of the raw files (microsecond or millisecond fraction).
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Timestamp layout used when writing (millisecond fraction).
pub const OUTPUT_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Parse a raw-file timestamp.
pub fn parse_timestamp(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    NaiveDateTime::parse_from_str(text, TIMESTAMP_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S"))
        .ok()
}

/// One averaged reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSample {
    /// Start of the averaging window
    pub timestamp: NaiveDateTime,
    /// Detector wavelength in nm
    pub wavelength: u32,
    /// Commanded power setting in percent
    pub setting: u32,
    /// Averaged power in mW
    pub power: f64,
    /// Averaged probe temperature in °C
    pub temperature: Option<f64>,
}

/// Arrival-ordered samples with strictly increasing timestamps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawSeries {
    samples: Vec<RawSample>,
}

impl RawSeries {
    /// Empty series.
    pub fn new() -> Self {
        Self::default()
    }

    /// Series from already collected samples.
    ///
    /// # Errors
    /// [`LpmError::Series`] when a timestamp does not increase.
    pub fn from_samples(samples: Vec<RawSample>) -> AppResult<Self> {
        let mut series = Self::new();
        for sample in samples {
            series.push(sample)?;
        }
        Ok(series)
    }

    /// Append one sample.
    ///
    /// # Errors
    /// [`LpmError::Series`] when the timestamp is not later than the last one.
    pub fn push(&mut self, sample: RawSample) -> AppResult<()> {
        self.check_order(&sample).map_err(LpmError::Series)?;
        self.samples.push(sample);
        Ok(())
    }

    fn check_order(&self, sample: &RawSample) -> Result<(), String> {
        match self.samples.last() {
            Some(last) if sample.timestamp <= last.timestamp => Err(format!(
                "timestamp {} does not follow {}",
                sample.timestamp.format(OUTPUT_TIMESTAMP_FORMAT),
                last.timestamp.format(OUTPUT_TIMESTAMP_FORMAT)
            )),
            _ => Ok(()),
        }
    }

    /// Drop every sample.
    pub fn clear(&mut self) {
        self.samples.clear();
    }

    /// Samples in arrival order.
    pub fn samples(&self) -> &[RawSample] {
        &self.samples
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the series holds no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Power column.
    pub fn powers(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.power).collect()
    }

    /// Seconds since the first sample.
    pub fn elapsed_seconds(&self) -> Vec<f64> {
        let Some(first) = self.samples.first() else {
            return Vec::new();
        };
        self.samples
            .iter()
            .map(|s| {
                (s.timestamp - first.timestamp)
                    .num_microseconds()
                    .map_or(f64::NAN, |us| us as f64 / 1e6)
            })
            .collect()
    }

    /// `(min, max)` of the power column.
    pub fn power_range(&self) -> Option<(f64, f64)> {
        self.samples.iter().map(|s| s.power).fold(None, |acc, p| {
            Some(match acc {
                None => (p, p),
                Some((lo, hi)) => (lo.min(p), hi.max(p)),
            })
        })
    }

    /// Whether any sample carries a temperature.
    pub fn has_temperature(&self) -> bool {
        self.samples.iter().any(|s| s.temperature.is_some())
    }

    /// Load a raw tab-separated file.
    pub fn load<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let file = std::fs::File::open(path.as_ref())?;
        Self::from_reader(file)
    }

    /// Parse raw tab-separated data with a header row.
    pub fn from_reader<R: Read>(reader: R) -> AppResult<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let columns = Columns::locate(reader.headers()?)?;
        let mut series = Self::new();
        for record in reader.records() {
            let record = record?;
            let line = record.position().map_or(0, |p| p.line());
            if record.iter().all(|field| field.is_empty()) {
                continue;
            }
            let sample = columns
                .parse(&record)
                .and_then(|sample| series.check_order(&sample).map(|_| sample))
                .map_err(|message| LpmError::Series(format!("line {line}: {message}")))?;
            series.samples.push(sample);
        }
        Ok(series)
    }
}

/// Column positions resolved from the header row.
struct Columns {
    timestamp: usize,
    wavelength: usize,
    setting: usize,
    power: usize,
    temperature: Option<usize>,
}

impl Columns {
    fn locate(headers: &csv::StringRecord) -> AppResult<Self> {
        let names: Vec<String> = headers.iter().map(column_name).collect();
        let find = |name: &str| names.iter().position(|n| n == name);
        let require = |name: &str| {
            find(name).ok_or_else(|| LpmError::Series(format!("missing '{name}' column")))
        };
        Ok(Self {
            timestamp: require("timestamp")?,
            wavelength: require("wavelength")?,
            setting: require("setting")?,
            power: require("power")?,
            temperature: find("temperature"),
        })
    }

    fn parse(&self, record: &csv::StringRecord) -> Result<RawSample, String> {
        let field = |index: usize, name: &str| {
            record
                .get(index)
                .ok_or_else(|| format!("missing {name} value"))
        };

        let timestamp_text = field(self.timestamp, "timestamp")?;
        let timestamp = parse_timestamp(timestamp_text)
            .ok_or_else(|| format!("invalid timestamp '{timestamp_text}'"))?;
        let wavelength = parse_integer(field(self.wavelength, "wavelength")?, "wavelength")?;
        let setting = parse_integer(field(self.setting, "setting")?, "setting")?;
        let power = parse_power(field(self.power, "power")?)?;
        let temperature = match self.temperature.and_then(|index| record.get(index)) {
            Some(text) if !text.is_empty() => Some(
                text.parse::<f64>()
                    .map_err(|_| format!("invalid temperature '{text}'"))?,
            ),
            _ => None,
        };

        Ok(RawSample {
            timestamp,
            wavelength,
            setting,
            power,
            temperature,
        })
    }
}

/// Header name without unit suffix, e.g. `power[mW]` → `power`.
fn column_name(header: &str) -> String {
    header
        .split(['[', '('])
        .next()
        .unwrap_or_default()
        .trim()
        .to_lowercase()
}

fn parse_integer(text: &str, name: &str) -> Result<u32, String> {
    text.parse::<u32>()
        .map_err(|_| format!("invalid {name} '{text}'"))
}

/// Power values are sometimes written as one-element lists (`[3.51]`).
fn parse_power(text: &str) -> Result<f64, String> {
    text.trim_matches(|c| c == '[' || c == ']')
        .trim()
        .parse::<f64>()
        .map_err(|_| format!("invalid power '{text}'"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const RAW: &str = "timestamp\twavelength[nm]\tsetting[%]\tpower[mW]\n\
        2024-03-01 10:15:00.000\t488\t80\t0.01\n\
        2024-03-01 10:15:01.000\t488\t80\t[3.5]\n\
        2024-03-01 10:15:02.500\t488\t80\t3.6\n";

    #[test]
    fn loads_by_header_name() {
        let series = RawSeries::from_reader(RAW.as_bytes()).unwrap();
        assert_eq!(series.len(), 3);
        assert_eq!(series.powers(), vec![0.01, 3.5, 3.6]);
        assert_eq!(series.elapsed_seconds(), vec![0.0, 1.0, 2.5]);
        assert_eq!(series.samples()[0].wavelength, 488);
        assert!(!series.has_temperature());
        assert_eq!(series.power_range(), Some((0.01, 3.6)));
    }

    #[test]
    fn column_order_does_not_matter() {
        let data = "power\ttemperature\ttimestamp\tsetting\twavelength\n\
            1.5\t24.5\t2024-03-01 10:15:00.123456\t20\t561\n";
        let series = RawSeries::from_reader(data.as_bytes()).unwrap();
        let sample = &series.samples()[0];
        assert_eq!(sample.power, 1.5);
        assert_eq!(sample.temperature, Some(24.5));
        assert_eq!(sample.setting, 20);
        assert_eq!(sample.wavelength, 561);
    }

    #[test]
    fn rejects_repeated_timestamps() {
        let data = "timestamp\twavelength\tsetting\tpower\n\
            2024-03-01 10:15:00.000\t488\t80\t1.0\n\
            2024-03-01 10:15:00.000\t488\t80\t1.0\n";
        let err = RawSeries::from_reader(data.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("line 3"));
    }

    #[test]
    fn rejects_missing_columns() {
        let data = "timestamp\twavelength\tpower\n2024-03-01 10:15:00.000\t488\t1.0\n";
        let err = RawSeries::from_reader(data.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("setting"));
    }

    #[test]
    fn empty_series_has_no_range() {
        let series = RawSeries::new();
        assert!(series.elapsed_seconds().is_empty());
        assert_eq!(series.power_range(), None);
    }
}
