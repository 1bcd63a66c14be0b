//! Session controller.
//!
//! [`LpmSession`] is the single owner of the acquisition plan, its synthesized
//! signature, the structured data store, the detection threshold, the calibration
//! table and the buffered raw series. Every mutation goes through a method here so
//! that dependent state is rebuilt in one place:
//!
//! - **Plan setters** re-synthesize the signature and reallocate the store. An
//!   invalid plan leaves the previous plan, signature and store untouched and
//!   disables processing until a valid plan is applied.
//! - **Threshold changes** recompute the classification: a live session replays the
//!   buffered samples incrementally, an offline session reruns reassignment.
//! - **Calibration** is applied only while its wavelength list equals the plan's;
//!   otherwise the session is flagged inconsistent and values stay uncorrected.
//!
//! A [`Session`] is the persisted subset (plan, threshold, calibration and toggles),
//! written with [`save_session`] and read back with [`load_session`].

use crate::calibration::CalibrationTable;
use crate::classifier::{Cursor, PulseClassifier, ReassignOutcome};
use crate::config::{ExportSettings, Settings};
use crate::data::{DataExporter, ExportInput, ExportReport, RawSample, RawSeries};
use crate::error::{AppResult, LpmError};
use crate::plan::{AcquisitionPlan, PulseOrder};
use crate::signature::Signature;
use crate::store::{Bucket, StructuredDataStore};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

/// Persisted session state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Acquisition plan
    pub plan: AcquisitionPlan,
    /// Detection threshold in mW
    pub threshold: f64,
    /// Installed calibration table
    #[serde(default)]
    pub calibration: Option<CalibrationTable>,
    /// Apply calibration factors while classifying
    #[serde(default)]
    pub correction_enabled: bool,
    /// Classify live samples as they arrive
    #[serde(default = "default_dynamic_reassignment")]
    pub dynamic_reassignment: bool,
}

fn default_dynamic_reassignment() -> bool {
    true
}

/// Saves the session to a JSON file.
pub fn save_session(session: &Session, path: &Path) -> AppResult<()> {
    let json = serde_json::to_string_pretty(session)?;
    fs::write(path, json)?;
    Ok(())
}

/// Loads a session from a JSON file.
pub fn load_session(path: &Path) -> AppResult<Session> {
    let json = fs::read_to_string(path)?;
    let session = serde_json::from_str(&json)?;
    Ok(session)
}

/// Owner of everything a reassignment depends on.
#[derive(Debug, Clone)]
pub struct LpmSession {
    plan: AcquisitionPlan,
    signature: Option<Signature>,
    processing_enabled: bool,
    store: StructuredDataStore,
    threshold: f64,
    calibration: Option<CalibrationTable>,
    correction_enabled: bool,
    calibration_consistent: bool,
    /// Factors baked into the stored values by the last classification.
    store_correction: Option<Vec<f64>>,
    raw: RawSeries,
    cursor: Cursor,
    live: bool,
    overflow_warned: bool,
    dynamic_reassignment: bool,
    last_outcome: Option<ReassignOutcome>,
}

impl Default for LpmSession {
    fn default() -> Self {
        Self {
            plan: AcquisitionPlan::default(),
            signature: None,
            processing_enabled: false,
            store: StructuredDataStore::default(),
            threshold: 0.0,
            calibration: None,
            correction_enabled: false,
            calibration_consistent: false,
            store_correction: None,
            raw: RawSeries::new(),
            cursor: Cursor::default(),
            live: false,
            overflow_warned: false,
            dynamic_reassignment: true,
            last_outcome: None,
        }
    }
}

impl LpmSession {
    /// Session for `plan`.
    ///
    /// # Errors
    /// [`LpmError::InvalidPlan`] when no signature can be synthesized.
    pub fn new(plan: AcquisitionPlan) -> AppResult<Self> {
        let mut session = Self::default();
        session.set_plan(plan)?;
        Ok(session)
    }

    /// Session for `plan` with the threshold and toggles of `[acquisition]`.
    pub fn with_settings(plan: AcquisitionPlan, settings: &Settings) -> AppResult<Self> {
        let mut session = Self::new(plan)?;
        session.threshold = settings.acquisition.threshold;
        session.dynamic_reassignment = settings.acquisition.dynamic_reassignment;
        session.correction_enabled = settings.acquisition.dynamic_correction;
        Ok(session)
    }

    /// Rebuild a session from its persisted form.
    pub fn from_snapshot(snapshot: Session) -> AppResult<Self> {
        let mut session = Self::new(snapshot.plan)?;
        session.threshold = snapshot.threshold;
        session.dynamic_reassignment = snapshot.dynamic_reassignment;
        session.correction_enabled = snapshot.correction_enabled;
        if let Some(table) = snapshot.calibration {
            session.apply_calibration(table)?;
        }
        Ok(session)
    }

    /// Persisted form of this session.
    pub fn snapshot(&self) -> Session {
        Session {
            plan: self.plan.clone(),
            threshold: self.threshold,
            calibration: self.calibration.clone(),
            correction_enabled: self.correction_enabled,
            dynamic_reassignment: self.dynamic_reassignment,
        }
    }

    // ----- plan ---------------------------------------------------------------

    /// Replace the whole plan.
    ///
    /// # Errors
    /// [`LpmError::InvalidPlan`]; the previous plan, signature and store are kept
    /// and processing is disabled.
    pub fn set_plan(&mut self, plan: AcquisitionPlan) -> AppResult<()> {
        let signature = match Signature::synthesize(&plan) {
            Ok(signature) => signature,
            Err(e) => {
                warn!(error = %e, "Signature synthesis skipped; processing disabled");
                self.processing_enabled = false;
                return Err(e);
            }
        };

        self.store.reallocate(
            signature.readout_count(),
            signature.wavelength_count(),
            signature.power_count(),
        );
        info!(
            signature = %signature.signature_string(),
            readouts = signature.readout_count(),
            blocks = signature.blocks(),
            "Signature synthesized"
        );
        self.plan = plan;
        self.signature = Some(signature);
        self.processing_enabled = true;
        self.store_correction = None;
        self.cursor = Cursor::default();
        self.overflow_warned = false;
        self.last_outcome = None;
        self.check_calibration();
        self.recompute()
    }

    fn update_plan(&mut self, edit: impl FnOnce(&mut AcquisitionPlan)) -> AppResult<()> {
        let mut plan = self.plan.clone();
        edit(&mut plan);
        self.set_plan(plan)
    }

    /// Replace the wavelength list.
    pub fn set_wavelengths(&mut self, wavelengths: Vec<u32>) -> AppResult<()> {
        self.update_plan(|p| p.wavelengths = wavelengths)
    }

    /// Replace the power settings.
    pub fn set_set_powers(&mut self, set_powers: Vec<u32>) -> AppResult<()> {
        self.update_plan(|p| p.set_powers = set_powers)
    }

    /// Total acquisition time in seconds.
    pub fn set_duration(&mut self, seconds: f64) -> AppResult<()> {
        self.update_plan(|p| p.duration = seconds)
    }

    /// Time of one pass through every combination.
    pub fn set_measurement_interval(&mut self, seconds: f64) -> AppResult<()> {
        self.update_plan(|p| p.measurement_interval = seconds)
    }

    /// Interval between readouts.
    pub fn set_readout_interval(&mut self, seconds: f64) -> AppResult<()> {
        self.update_plan(|p| p.readout_interval = seconds)
    }

    /// Idle time before each pulse.
    pub fn set_signature_pause(&mut self, seconds: f64) -> AppResult<()> {
        self.update_plan(|p| p.signature_pause = seconds)
    }

    /// Loop nesting.
    pub fn set_order(&mut self, order: PulseOrder) -> AppResult<()> {
        self.update_plan(|p| p.order = order)
    }

    /// Averaging window; does not shape the signature.
    pub fn set_average_interval(&mut self, seconds: f64) -> AppResult<()> {
        if !(seconds > 0.0 && seconds.is_finite()) {
            return Err(LpmError::InvalidPlan(
                "average interval must be positive".to_string(),
            ));
        }
        self.plan.average_interval = seconds;
        Ok(())
    }

    /// Current plan.
    pub fn plan(&self) -> &AcquisitionPlan {
        &self.plan
    }

    /// Current signature, `None` until a valid plan is applied.
    pub fn signature(&self) -> Option<&Signature> {
        self.signature.as_ref()
    }

    /// Whether the last plan change produced a usable signature.
    pub fn is_processing_enabled(&self) -> bool {
        self.processing_enabled && self.signature.is_some()
    }

    /// Classification of the buffered series.
    pub fn store(&self) -> &StructuredDataStore {
        &self.store
    }

    /// Buffered raw samples.
    pub fn raw(&self) -> &RawSeries {
        &self.raw
    }

    /// Outcome of the last offline reassignment.
    pub fn last_outcome(&self) -> Option<ReassignOutcome> {
        self.last_outcome
    }

    // ----- threshold ----------------------------------------------------------

    /// Detection threshold in mW.
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Set an absolute threshold (mW) and recompute the classification.
    pub fn set_threshold(&mut self, threshold: f64) -> AppResult<()> {
        if !threshold.is_finite() {
            return Err(LpmError::Configuration(format!(
                "threshold must be finite, got {threshold}"
            )));
        }
        self.threshold = threshold;
        debug!(threshold, "Threshold set");
        self.recompute()
    }

    /// Set the threshold at `percent` of the buffered power range.
    ///
    /// Without buffered data the range is `0..1`. Returns the absolute threshold.
    pub fn set_threshold_percent(&mut self, percent: f64) -> AppResult<f64> {
        let (min, max) = self.raw.power_range().unwrap_or((0.0, 1.0));
        let threshold = percent.clamp(0.0, 100.0) / 100.0 * (max - min) + min;
        self.set_threshold(threshold)?;
        Ok(threshold)
    }

    fn recompute(&mut self) -> AppResult<()> {
        if !self.is_processing_enabled() || self.raw.is_empty() {
            return Ok(());
        }
        if self.live {
            if self.dynamic_reassignment {
                self.replay_live()?;
            }
            Ok(())
        } else {
            self.reassign().map(|_| ())
        }
    }

    // ----- calibration --------------------------------------------------------

    /// Install a calibration table and recompute the classification.
    ///
    /// A table computed for a different wavelength list is kept but not applied.
    pub fn apply_calibration(&mut self, table: CalibrationTable) -> AppResult<()> {
        info!(
            wavelengths = ?table.wavelengths(),
            reference = table.reference(),
            factors = ?table.factors(),
            "Calibration table installed"
        );
        self.calibration = Some(table);
        self.check_calibration();
        self.recompute()
    }

    /// Drop the calibration table and recompute the classification.
    pub fn clear_calibration(&mut self) -> AppResult<()> {
        self.calibration = None;
        self.calibration_consistent = false;
        self.recompute()
    }

    /// Installed calibration table.
    pub fn calibration(&self) -> Option<&CalibrationTable> {
        self.calibration.as_ref()
    }

    /// Whether the installed table matches the plan's wavelengths.
    pub fn is_calibration_consistent(&self) -> bool {
        self.calibration_consistent
    }

    /// Enable or disable correction of classified values and recompute.
    pub fn set_correction_enabled(&mut self, enabled: bool) -> AppResult<()> {
        if self.correction_enabled == enabled {
            return Ok(());
        }
        self.correction_enabled = enabled;
        self.recompute()
    }

    /// Whether correction was requested.
    pub fn is_correction_enabled(&self) -> bool {
        self.correction_enabled
    }

    /// Classify live samples as they arrive.
    pub fn set_dynamic_reassignment(&mut self, enabled: bool) {
        self.dynamic_reassignment = enabled;
    }

    fn check_calibration(&mut self) {
        let Some(table) = &self.calibration else {
            self.calibration_consistent = false;
            return;
        };
        self.calibration_consistent = table.matches(&self.plan.wavelengths);
        if !self.calibration_consistent {
            warn!(
                calibrated = ?table.wavelengths(),
                planned = ?self.plan.wavelengths,
                "Calibration wavelengths differ from the plan; correction disabled"
            );
        }
    }

    /// Factors the stored values were multiplied by, if any.
    pub fn store_correction(&self) -> Option<&[f64]> {
        self.store_correction.as_deref()
    }

    /// Factors applied on the next classification, if any.
    pub fn active_correction(&self) -> Option<&[f64]> {
        if !self.correction_enabled {
            return None;
        }
        self.calibration
            .as_ref()
            .and_then(|table| table.factors_for_plan(&self.plan.wavelengths))
    }

    fn classifier(&self) -> AppResult<PulseClassifier> {
        let signature = self
            .signature
            .as_ref()
            .filter(|_| self.processing_enabled)
            .ok_or(LpmError::NoActiveSignature)?;
        let classifier = PulseClassifier::from_signature(
            &signature.signature_string(),
            self.plan.order,
            self.threshold,
        )?;
        Ok(classifier.with_correction(self.active_correction().map(<[f64]>::to_vec)))
    }

    // ----- offline ------------------------------------------------------------

    /// Replace the buffered series and reassign it.
    pub fn load_series(&mut self, series: RawSeries) -> AppResult<ReassignOutcome> {
        self.live = false;
        self.raw = series;
        info!(samples = self.raw.len(), "Raw series loaded");
        self.reassign()
    }

    /// Load a raw file written by an acquisition and reassign it.
    pub fn load_raw_file<P: AsRef<Path>>(&mut self, path: P) -> AppResult<ReassignOutcome> {
        let series = RawSeries::load(path)?;
        self.load_series(series)
    }

    /// Offline reassignment of the buffered series.
    ///
    /// # Errors
    /// [`LpmError::NoActiveSignature`] when no valid plan is applied.
    pub fn reassign(&mut self) -> AppResult<ReassignOutcome> {
        let classifier = self.classifier()?;
        if self.correction_enabled && !self.calibration_consistent {
            warn!("Correction requested without a matching calibration; values left uncorrected");
        }
        let outcome = classifier.reassign(&self.raw.powers(), &mut self.store);
        self.store_correction = self.active_correction().map(<[f64]>::to_vec);
        self.last_outcome = Some(outcome);
        Ok(outcome)
    }

    // ----- live ---------------------------------------------------------------

    /// Start a live acquisition: clear buffered samples and size the store to the
    /// signature's readout count.
    pub fn begin_live(&mut self) -> AppResult<()> {
        let signature = self
            .signature
            .as_ref()
            .filter(|_| self.processing_enabled)
            .ok_or(LpmError::NoActiveSignature)?;
        self.store.reallocate(
            signature.readout_count(),
            signature.wavelength_count(),
            signature.power_count(),
        );
        self.raw.clear();
        self.store_correction = self.active_correction().map(<[f64]>::to_vec);
        self.cursor = Cursor::default();
        self.overflow_warned = false;
        self.last_outcome = None;
        self.live = true;
        info!(rows = signature.readout_count(), "Live acquisition started");
        Ok(())
    }

    /// Finish a live acquisition. Returns the number of buffered samples.
    pub fn end_live(&mut self) -> usize {
        self.live = false;
        info!(
            samples = self.raw.len(),
            assigned = self.store.assigned_count(),
            "Live acquisition finished"
        );
        self.raw.len()
    }

    /// Whether a live acquisition is running.
    pub fn is_live(&self) -> bool {
        self.live
    }

    /// Position of the incremental classification.
    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    /// Buffer one live sample and, with dynamic reassignment, classify it.
    ///
    /// Returns the bucket the sample landed in.
    pub fn ingest(&mut self, sample: RawSample) -> AppResult<Option<Bucket>> {
        let value = sample.power;
        self.raw.push(sample)?;
        if !(self.live && self.dynamic_reassignment) {
            return Ok(None);
        }
        let classifier = self.classifier()?;

        let row = self.cursor.next_row;
        if row >= self.store.rows() && !self.overflow_warned {
            warn!(
                row,
                rows = self.store.rows(),
                "Acquisition ran past the signature; further samples are not classified"
            );
            self.overflow_warned = true;
        }
        self.cursor = classifier.assign_next(&mut self.store, self.cursor, value);
        self.store_correction = self.active_correction().map(<[f64]>::to_vec);
        Ok(self.store.bucket(row))
    }

    fn replay_live(&mut self) -> AppResult<()> {
        let classifier = self.classifier()?;
        self.cursor = classifier.replay(&self.raw.powers(), &mut self.store);
        self.store_correction = self.active_correction().map(<[f64]>::to_vec);
        debug!(
            samples = self.raw.len(),
            assigned = self.store.assigned_count(),
            "Live classification replayed"
        );
        Ok(())
    }

    // ----- export -------------------------------------------------------------

    /// Write the raw file and the per-wavelength files into `dir`.
    pub fn export<P: AsRef<Path>>(
        &self,
        dir: P,
        base_name: &str,
        options: ExportSettings,
    ) -> AppResult<ExportReport> {
        self.export_with(&DataExporter::new(dir, base_name, options))
    }

    /// Export through a preconfigured exporter.
    ///
    /// Split files are labelled with the factors the stored values carry.
    pub fn export_with(&self, exporter: &DataExporter) -> AppResult<ExportReport> {
        let correction = if self.store.assigned_count() > 0 {
            self.store_correction()
        } else {
            None
        };
        exporter.export(ExportInput {
            series: &self.raw,
            store: &self.store,
            wavelengths: &self.plan.wavelengths,
            set_powers: &self.plan.set_powers,
            correction,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::compute_table;
    use chrono::{Duration, NaiveDate, NaiveDateTime};
    use tempfile::tempdir;
    use tracing_test::traced_test;

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

    fn start() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .and_then(|d| d.and_hms_opt(10, 0, 0))
            .unwrap()
    }

    fn series(values: &[f64]) -> RawSeries {
        let samples = values
            .iter()
            .enumerate()
            .map(|(i, &power)| RawSample {
                timestamp: start() + Duration::seconds(i as i64),
                wavelength: 405,
                setting: 50,
                power,
                temperature: None,
            })
            .collect();
        RawSeries::from_samples(samples).unwrap()
    }

    const VALUES: [f64; 10] = [0.0, 5.0, 5.0, 0.0, 7.0, 7.0, 0.0, 4.0, 4.0, 0.0];

    #[test]
    fn plan_change_reallocates_store() {
        let mut session = LpmSession::new(plan()).unwrap();
        assert_eq!(session.store().shape(), (20, 2, 1));
        assert_eq!(session.signature().unwrap().signature_string(), "4T1P2L");

        session.set_set_powers(vec![20, 80]).unwrap();
        assert_eq!(session.store().shape(), (20, 2, 2));
    }

    #[test]
    fn invalid_plan_keeps_previous_state() {
        let mut session = LpmSession::new(plan()).unwrap();
        let err = session.set_readout_interval(0.0).unwrap_err();
        assert!(matches!(err, LpmError::InvalidPlan(_)));
        assert_eq!(session.plan(), &plan());
        assert_eq!(session.store().shape(), (20, 2, 1));
        assert!(!session.is_processing_enabled());
        assert!(matches!(
            session.reassign(),
            Err(LpmError::NoActiveSignature)
        ));

        session.set_readout_interval(1.0).unwrap();
        assert!(session.is_processing_enabled());
    }

    #[test]
    fn threshold_change_reassigns() {
        let mut session = LpmSession::new(plan()).unwrap();
        let outcome = session.load_series(series(&VALUES)).unwrap();
        assert!(outcome.has_data());
        assert_eq!(session.store().assigned_count(), 6);

        session.set_threshold(6.0).unwrap();
        assert_eq!(session.store().assigned_count(), 2);
        assert_eq!(session.store().bucket(4), Some(Bucket::FIRST));

        session.set_threshold(10.0).unwrap();
        assert!(!session.last_outcome().unwrap().has_data());
    }

    #[test]
    fn threshold_percent_maps_onto_power_range() {
        let mut session = LpmSession::new(plan()).unwrap();
        assert_eq!(session.set_threshold_percent(50.0).unwrap(), 0.5);
        session.load_series(series(&VALUES)).unwrap();
        assert_eq!(session.set_threshold_percent(50.0).unwrap(), 3.5);
    }

    #[test]
    fn live_ingest_matches_offline() {
        let mut offline = LpmSession::new(plan()).unwrap();
        offline.load_series(series(&VALUES)).unwrap();

        let mut live = LpmSession::new(plan()).unwrap();
        live.begin_live().unwrap();
        for sample in series(&VALUES).samples() {
            live.ingest(sample.clone()).unwrap();
        }
        live.end_live();

        for row in 0..VALUES.len() {
            assert_eq!(live.store().bucket(row), offline.store().bucket(row));
        }
        assert_eq!(live.cursor().next_row, VALUES.len());
    }

    #[test]
    fn live_threshold_change_replays_buffer() {
        let mut session = LpmSession::new(plan()).unwrap();
        session.begin_live().unwrap();
        for sample in series(&VALUES).samples() {
            session.ingest(sample.clone()).unwrap();
        }
        session.set_threshold(6.0).unwrap();
        assert_eq!(session.store().rows(), 20);
        assert_eq!(session.store().assigned_count(), 2);
        assert_eq!(session.cursor().pulse_index, 0);
    }

    #[test]
    #[traced_test]
    fn live_overflow_is_reported_once() {
        let mut session = LpmSession::new(plan()).unwrap();
        session.begin_live().unwrap();
        let values = vec![1.0; 22];
        for sample in series(&values).samples() {
            session.ingest(sample.clone()).unwrap();
        }
        assert_eq!(session.raw().len(), 22);
        assert_eq!(session.store().assigned_count(), 20);
        assert!(logs_contain("ran past the signature"));
    }

    #[test]
    fn calibration_corrects_matching_plan() {
        let mut session = LpmSession::new(plan()).unwrap();
        let table =
            compute_table(&[405, 488], 405, &[vec![2.0; 3], vec![4.0; 3]], 0.01).unwrap();
        session.apply_calibration(table).unwrap();
        session.set_correction_enabled(true).unwrap();
        assert!(session.is_calibration_consistent());

        session.load_series(series(&VALUES)).unwrap();
        // second pulse lands on 488 nm, factor 2
        assert_eq!(session.store().value(4), Some(14.0));
        assert_eq!(session.store().value(1), Some(5.0));
    }

    #[test]
    #[traced_test]
    fn diverging_calibration_is_flagged() {
        let mut session = LpmSession::new(plan()).unwrap();
        let table =
            compute_table(&[405, 561], 405, &[vec![2.0; 3], vec![4.0; 3]], 0.01).unwrap();
        session.apply_calibration(table).unwrap();
        session.set_correction_enabled(true).unwrap();
        assert!(!session.is_calibration_consistent());
        assert!(session.active_correction().is_none());
        assert!(logs_contain("correction disabled"));

        session.load_series(series(&VALUES)).unwrap();
        assert_eq!(session.store().value(4), Some(7.0));
    }

    #[test]
    fn snapshot_survives_a_file_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("session.json");

        let mut session = LpmSession::new(plan()).unwrap();
        session.set_threshold(2.5).unwrap();
        session.set_correction_enabled(true).unwrap();
        save_session(&session.snapshot(), &path).unwrap();

        let restored = LpmSession::from_snapshot(load_session(&path).unwrap()).unwrap();
        assert_eq!(restored.snapshot(), session.snapshot());
        assert_eq!(restored.store().shape(), (20, 2, 1));
    }

    #[test]
    fn export_writes_split_files() {
        let dir = tempdir().unwrap();
        let mut session = LpmSession::new(plan()).unwrap();
        session.load_series(series(&VALUES)).unwrap();

        let options = ExportSettings {
            timestamp_prefix: false,
            exclude_transitions: false,
            ..Default::default()
        };
        let report = session.export(dir.path(), "run_", options).unwrap();
        assert_eq!(report.split.len(), 2);
        assert_eq!(report.rows_written, 6);
        assert!(dir.path().join("run_405nm.tsv").exists());
        assert!(dir.path().join("run_488nm.tsv").exists());
    }

    fn split_powers(path: &std::path::Path) -> Vec<f64> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .skip(1)
            .map(|line| line.split('\t').nth(3).unwrap().parse().unwrap())
            .collect()
    }

    #[test]
    fn calibrating_after_reassignment_relabels_and_corrects() {
        let dir = tempdir().unwrap();
        let options = ExportSettings {
            timestamp_prefix: false,
            exclude_transitions: false,
            ..Default::default()
        };
        let mut session = LpmSession::new(plan()).unwrap();
        session.load_series(series(&VALUES)).unwrap();
        assert!(session.store_correction().is_none());

        let table =
            compute_table(&[405, 488], 405, &[vec![2.0; 3], vec![4.0; 3]], 0.01).unwrap();
        session.apply_calibration(table).unwrap();
        session.set_correction_enabled(true).unwrap();
        assert_eq!(session.store().value(4), Some(14.0));
        assert_eq!(session.store_correction(), Some(&[1.0, 2.0][..]));

        session.export(dir.path(), "cal_", options.clone()).unwrap();
        assert_eq!(split_powers(&dir.path().join("cal_488nm_Corr-2.tsv")), vec![14.0, 14.0]);

        session.set_correction_enabled(false).unwrap();
        assert_eq!(session.store().value(4), Some(7.0));
        assert!(session.store_correction().is_none());

        session.export(dir.path(), "raw_", options).unwrap();
        assert!(!dir.path().join("raw_488nm_Corr-2.tsv").exists());
        assert_eq!(split_powers(&dir.path().join("raw_488nm.tsv")), vec![7.0, 7.0]);
    }
}
