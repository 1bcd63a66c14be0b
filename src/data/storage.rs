//! Tab-separated data writers.
//!
//! - [`RawTsvWriter`] streams raw samples to disk as they arrive.
//! - [`DataExporter`] writes the raw file of a finished acquisition plus one
//!   filtered file per wavelength (or per wavelength and power) holding only the
//!   samples classified into that bucket.
//!
//! File names follow `<base><YYYYmmdd-HHMM_>raw.tsv` and
//! `<base><YYYYmmdd-HHMM_><wl>nm[_<power>pct][_Corr-<factor>].tsv`.

use crate::config::ExportSettings;
use crate::data::series::{RawSample, RawSeries, OUTPUT_TIMESTAMP_FORMAT};
use crate::error::AppResult;
use crate::store::{Bucket, StructuredDataStore};
use chrono::{Local, NaiveDateTime};
use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Writer for raw sample files.
pub struct RawTsvWriter {
    path: PathBuf,
    writer: csv::Writer<File>,
    with_temperature: bool,
    rows: usize,
}

impl RawTsvWriter {
    /// Create `path` (truncating it) and write the header row.
    pub fn create<P: AsRef<Path>>(path: P, with_temperature: bool) -> AppResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut writer = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .from_path(&path)?;
        writer.write_record(header(with_temperature))?;
        debug!(path = %path.display(), "Raw writer created");
        Ok(Self {
            path,
            writer,
            with_temperature,
            rows: 0,
        })
    }

    /// Append one sample as recorded.
    pub fn write_sample(&mut self, sample: &RawSample) -> AppResult<()> {
        self.write_row(
            &sample.timestamp,
            sample.wavelength,
            sample.setting,
            sample.power,
            sample.temperature,
        )
    }

    fn write_row(
        &mut self,
        timestamp: &NaiveDateTime,
        wavelength: u32,
        setting: u32,
        power: f64,
        temperature: Option<f64>,
    ) -> AppResult<()> {
        let mut record = vec![
            timestamp.format(OUTPUT_TIMESTAMP_FORMAT).to_string(),
            wavelength.to_string(),
            setting.to_string(),
            power.to_string(),
        ];
        if self.with_temperature {
            record.push(temperature.map(|t| t.to_string()).unwrap_or_default());
        }
        self.writer.write_record(&record)?;
        self.rows += 1;
        Ok(())
    }

    /// Flush buffered rows to disk.
    pub fn flush(&mut self) -> AppResult<()> {
        self.writer.flush()?;
        Ok(())
    }

    /// File being written.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Data rows written so far.
    pub fn rows(&self) -> usize {
        self.rows
    }
}

fn header(with_temperature: bool) -> Vec<&'static str> {
    let mut header = vec!["timestamp", "wavelength[nm]", "setting[%]", "power[mW]"];
    if with_temperature {
        header.push("temperature[C]");
    }
    header
}

/// Files written by one export.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExportReport {
    /// Raw file
    pub raw: PathBuf,
    /// Filtered files, ordered by wavelength row then power row
    pub split: Vec<PathBuf>,
    /// Rows written across the filtered files
    pub rows_written: usize,
    /// Classified samples left out as pulse-edge transitions
    pub transitions_skipped: usize,
}

/// Everything the exporter needs from a session.
#[derive(Debug, Clone, Copy)]
pub struct ExportInput<'a> {
    /// Raw samples in arrival order
    pub series: &'a RawSeries,
    /// Classification of `series`
    pub store: &'a StructuredDataStore,
    /// Plan wavelengths, aligned with the store's wavelength axis
    pub wavelengths: &'a [u32],
    /// Plan power settings, aligned with the store's power axis
    pub set_powers: &'a [u32],
    /// Calibration factors folded into the stored values
    pub correction: Option<&'a [f64]>,
}

/// Writer for the files of a finished acquisition.
#[derive(Debug, Clone)]
pub struct DataExporter {
    dir: PathBuf,
    base_name: String,
    stamp: String,
    options: ExportSettings,
}

impl DataExporter {
    /// Exporter writing into `dir`, stamped with the current local time.
    pub fn new<P: AsRef<Path>>(dir: P, base_name: &str, options: ExportSettings) -> Self {
        Self::with_time(dir, base_name, options, Local::now().naive_local())
    }

    /// Exporter with an explicit file-name time.
    pub fn with_time<P: AsRef<Path>>(
        dir: P,
        base_name: &str,
        options: ExportSettings,
        time: NaiveDateTime,
    ) -> Self {
        let stamp = if options.timestamp_prefix {
            time.format("%Y%m%d-%H%M_").to_string()
        } else {
            String::new()
        };
        Self {
            dir: dir.as_ref().to_path_buf(),
            base_name: base_name.to_string(),
            stamp,
            options,
        }
    }

    /// Path of the raw file.
    pub fn raw_path(&self) -> PathBuf {
        self.dir
            .join(format!("{}{}raw.tsv", self.base_name, self.stamp))
    }

    /// Path of the filtered file for one wavelength (and power, when splitting by power).
    pub fn split_path(&self, wavelength: u32, power: Option<u32>, factor: Option<f64>) -> PathBuf {
        let mut name = format!("{}{}{}nm", self.base_name, self.stamp, wavelength);
        if let Some(power) = power {
            name.push_str(&format!("_{power}pct"));
        }
        if let Some(factor) = factor {
            name.push_str(&format!("_Corr-{}", format_factor(factor)));
        }
        name.push_str(".tsv");
        self.dir.join(name)
    }

    /// Write the raw file and, when any sample was classified, the filtered files.
    pub fn export(&self, input: ExportInput<'_>) -> AppResult<ExportReport> {
        std::fs::create_dir_all(&self.dir)?;
        let with_temperature = input.series.has_temperature();

        let mut raw = RawTsvWriter::create(self.raw_path(), with_temperature)?;
        for sample in input.series.samples() {
            raw.write_sample(sample)?;
        }
        raw.flush()?;

        let mut report = ExportReport {
            raw: raw.path().to_path_buf(),
            ..Default::default()
        };
        if input.store.assigned_count() == 0 {
            info!(raw = %report.raw.display(), "No reassigned data; raw file only");
            return Ok(report);
        }

        let buckets = input.store.buckets();
        let mut writers: BTreeMap<(usize, Option<usize>), RawTsvWriter> = BTreeMap::new();
        for (row, sample) in input.series.samples().iter().enumerate() {
            let Some(bucket) = buckets.get(row).copied().flatten() else {
                continue;
            };
            if self.options.exclude_transitions && is_transition(&buckets, row) {
                report.transitions_skipped += 1;
                continue;
            }
            let (Some(&wavelength), Some(&setting)) = (
                input.wavelengths.get(bucket.wavelength),
                input.set_powers.get(bucket.power),
            ) else {
                continue;
            };
            let Some(value) = input.store.value(row) else {
                continue;
            };

            let key = (
                bucket.wavelength,
                self.options.split_by_power.then_some(bucket.power),
            );
            if !writers.contains_key(&key) {
                let factor = input
                    .correction
                    .and_then(|factors| factors.get(bucket.wavelength).copied());
                let power_label = self.options.split_by_power.then_some(setting);
                let path = self.split_path(wavelength, power_label, factor);
                writers.insert(key, RawTsvWriter::create(path, with_temperature)?);
            }
            if let Some(writer) = writers.get_mut(&key) {
                writer.write_row(
                    &sample.timestamp,
                    wavelength,
                    setting,
                    value,
                    sample.temperature,
                )?;
                report.rows_written += 1;
            }
        }

        for writer in writers.values_mut() {
            writer.flush()?;
            report.split.push(writer.path().to_path_buf());
        }
        info!(
            raw = %report.raw.display(),
            files = report.split.len(),
            rows = report.rows_written,
            transitions = report.transitions_skipped,
            "Export complete"
        );
        Ok(report)
    }
}

/// Whether a classified sample borders a sample in a different (or no) bucket.
pub fn is_transition(buckets: &[Option<Bucket>], row: usize) -> bool {
    let current = buckets.get(row).copied().flatten();
    let differs = |neighbour: Option<usize>| {
        neighbour
            .and_then(|i| buckets.get(i).copied())
            .is_some_and(|other| other != current)
    };
    differs(row.checked_sub(1)) || differs(row.checked_add(1))
}

/// Factor rounded to four decimals, without trailing zeros.
fn format_factor(factor: f64) -> String {
    let rounded = (factor * 1e4).round() / 1e4;
    format!("{rounded}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn time() -> NaiveDateTime {
        crate::data::series::parse_timestamp("2024-03-01 10:15:00.000").unwrap()
    }

    #[test]
    fn file_names_follow_the_pattern() {
        let exporter =
            DataExporter::with_time("/out", "run1_", ExportSettings::default(), time());
        assert_eq!(
            exporter.raw_path(),
            PathBuf::from("/out/run1_20240301-1015_raw.tsv")
        );
        assert_eq!(
            exporter.split_path(488, None, Some(0.833333)),
            PathBuf::from("/out/run1_20240301-1015_488nm_Corr-0.8333.tsv")
        );
        assert_eq!(
            exporter.split_path(405, Some(80), None),
            PathBuf::from("/out/run1_20240301-1015_405nm_80pct.tsv")
        );
    }

    #[test]
    fn stamp_can_be_disabled() {
        let options = ExportSettings {
            timestamp_prefix: false,
            ..Default::default()
        };
        let exporter = DataExporter::with_time("/out", "", options, time());
        assert_eq!(exporter.raw_path(), PathBuf::from("/out/raw.tsv"));
    }

    #[test]
    fn transitions_are_pulse_edges() {
        let a = Some(Bucket::FIRST);
        let b = Some(Bucket {
            wavelength: 1,
            power: 0,
        });
        let buckets = [None, a, a, a, None, b, b];
        assert!(is_transition(&buckets, 1));
        assert!(!is_transition(&buckets, 2));
        assert!(is_transition(&buckets, 3));
        assert!(is_transition(&buckets, 5));
        assert!(!is_transition(&buckets, 6));
    }

    #[test]
    fn factors_are_rounded() {
        assert_eq!(format_factor(1.0), "1");
        assert_eq!(format_factor(1.25), "1.25");
        assert_eq!(format_factor(0.833333), "0.8333");
    }
}
