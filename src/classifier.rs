//! Pulse classification.
//!
//! Maps every above-threshold sample of a power series to the
//! `(wavelength, power)` bucket it was acquired under. A single state machine,
//! [`PulseTracker`], drives both modes:
//!
//! - **Offline** ([`PulseClassifier::reassign`]): one left-to-right pass over a
//!   complete series; a pulse starts where the thresholded predecessor is zero.
//! - **Incremental** ([`PulseClassifier::assign_next`]): one call per arriving
//!   sample; a pulse starts where the predecessor's *written* row in the store is
//!   empty, so values corrected in place are judged the same way they were stored.
//!   [`PulseClassifier::replay`] recomputes a buffered series from scratch.
//!
//! ```text
//! value     0  5  6  0  0  7  7  0  4
//! active    .  x  x  .  .  x  x  .  x
//! pulse        0  0        1  1     2
//! LP 1Lx2P    (0,0)       (0,1)    (0,0)
//! ```

use crate::error::{AppResult, LpmError};
use crate::plan::PulseOrder;
use crate::signature::SignatureDescriptor;
use crate::store::{Bucket, StructuredDataStore};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Zero values below the detection threshold.
pub fn apply_threshold(value: f64, threshold: f64) -> f64 {
    if value < threshold {
        0.0
    } else {
        value
    }
}

/// Whether a sample belongs to a pulse.
pub fn is_active(value: f64, threshold: f64) -> bool {
    apply_threshold(value, threshold) > 0.0
}

/// Pulse counter and bucket indices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PulseTracker {
    order: PulseOrder,
    wavelength_count: usize,
    power_count: usize,
    pulse_index: i64,
    bucket: Bucket,
}

impl PulseTracker {
    /// Tracker positioned before the first pulse.
    pub fn new(descriptor: &SignatureDescriptor) -> Self {
        Self::resume(descriptor, -1, Bucket::FIRST)
    }

    /// Tracker continuing from a saved position.
    pub fn resume(descriptor: &SignatureDescriptor, pulse_index: i64, bucket: Bucket) -> Self {
        Self {
            order: descriptor.order(),
            wavelength_count: descriptor.wavelength_count().max(1),
            power_count: descriptor.power_count().max(1),
            pulse_index,
            bucket,
        }
    }

    /// Register the start of a new pulse.
    ///
    /// The first pulse keeps bucket `(0, 0)`; later pulses advance the inner
    /// index with wraparound, carrying into the outer index.
    pub fn start_pulse(&mut self) {
        self.pulse_index += 1;
        if self.pulse_index == 0 {
            self.bucket = Bucket::FIRST;
            return;
        }
        let Bucket { wavelength, power } = &mut self.bucket;
        let (inner, inner_len, outer, outer_len) = match self.order {
            PulseOrder::Pl => (wavelength, self.wavelength_count, power, self.power_count),
            PulseOrder::Lp => (power, self.power_count, wavelength, self.wavelength_count),
        };
        *inner += 1;
        if *inner >= inner_len {
            *inner = 0;
            *outer = (*outer + 1) % outer_len;
        }
    }

    /// Index of the current pulse, `-1` before the first one.
    pub fn pulse_index(&self) -> i64 {
        self.pulse_index
    }

    /// Bucket of the current pulse.
    pub fn bucket(&self) -> Bucket {
        self.bucket
    }
}

/// Position of an incremental classification.
///
/// Mirrors the `(nextSampleIndex, pulseIndex, wavelengthIndex, powerIndex)`
/// tuple handed from one incremental step to the next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    /// Row the next sample will be written to
    pub next_row: usize,
    /// Pulse counter, `-1` before the first pulse
    pub pulse_index: i64,
    /// Bucket of the current pulse
    pub bucket: Bucket,
}

impl Default for Cursor {
    fn default() -> Self {
        Self {
            next_row: 0,
            pulse_index: -1,
            bucket: Bucket::FIRST,
        }
    }
}

/// Counts reported by a completed reassignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReassignmentSummary {
    /// Samples scanned
    pub samples: usize,
    /// Samples that received a bucket
    pub assigned: usize,
    /// Pulses detected
    pub pulses: usize,
    /// Whether calibration factors were applied
    pub corrected: bool,
}

/// Result of an offline reassignment pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReassignOutcome {
    /// The series was empty or never crossed the threshold.
    NoData {
        /// Samples scanned
        samples: usize,
    },
    /// At least one pulse was assigned.
    Completed(ReassignmentSummary),
}

impl ReassignOutcome {
    /// Whether any sample was assigned.
    pub fn has_data(&self) -> bool {
        matches!(self, ReassignOutcome::Completed(_))
    }
}

/// Threshold-based pulse classifier for one signature.
#[derive(Debug, Clone, PartialEq)]
pub struct PulseClassifier {
    descriptor: SignatureDescriptor,
    threshold: f64,
    correction: Option<Vec<f64>>,
}

impl PulseClassifier {
    /// Classifier for a parsed signature.
    pub fn new(descriptor: SignatureDescriptor, threshold: f64) -> Self {
        Self {
            descriptor,
            threshold,
            correction: None,
        }
    }

    /// Classifier for a signature string, checked against the expected order.
    ///
    /// # Errors
    /// [`LpmError::Signature`] when the string is malformed, and
    /// [`LpmError::SignatureOrderMismatch`] when it encodes a different order.
    pub fn from_signature(signature: &str, order: PulseOrder, threshold: f64) -> AppResult<Self> {
        let descriptor: SignatureDescriptor = signature.parse()?;
        if descriptor.order() != order {
            return Err(LpmError::SignatureOrderMismatch {
                signature: signature.to_string(),
                encoded: descriptor.order().to_string(),
                requested: order.to_string(),
            });
        }
        Ok(Self::new(descriptor, threshold))
    }

    /// Multiply each stored value by the factor of its wavelength row.
    pub fn with_correction(mut self, factors: Option<Vec<f64>>) -> Self {
        self.correction = factors;
        self
    }

    /// Signature this classifier follows.
    pub fn descriptor(&self) -> &SignatureDescriptor {
        &self.descriptor
    }

    /// Detection threshold.
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Whether values are corrected on write.
    pub fn is_correcting(&self) -> bool {
        self.correction.is_some()
    }

    /// Classify one sample at `row`; `previous_inactive` decides pulse starts.
    fn classify(
        &self,
        tracker: &mut PulseTracker,
        store: &mut StructuredDataStore,
        row: usize,
        value: f64,
        previous_inactive: bool,
    ) -> Option<Bucket> {
        if !is_active(value, self.threshold) {
            return None;
        }
        if previous_inactive {
            tracker.start_pulse();
        }
        let bucket = tracker.bucket();
        let factor = self
            .correction
            .as_ref()
            .and_then(|factors| factors.get(bucket.wavelength))
            .copied()
            .unwrap_or(1.0);
        store.write(row, bucket, value * factor).then_some(bucket)
    }

    /// Offline reassignment of a complete series.
    ///
    /// The store is reallocated to one row per sample before the pass, so the
    /// result depends only on `values` and the classifier.
    pub fn reassign(&self, values: &[f64], store: &mut StructuredDataStore) -> ReassignOutcome {
        if values.is_empty() {
            info!("No data available for reassignment");
            return ReassignOutcome::NoData { samples: 0 };
        }

        store.reallocate(
            values.len(),
            self.descriptor.wavelength_count(),
            self.descriptor.power_count(),
        );

        let mut tracker = PulseTracker::new(&self.descriptor);
        let mut previous_active = false;
        let mut assigned = 0;
        for (row, &value) in values.iter().enumerate() {
            if self
                .classify(&mut tracker, store, row, value, !previous_active)
                .is_some()
            {
                assigned += 1;
            }
            previous_active = is_active(value, self.threshold);
        }

        if assigned == 0 {
            info!(
                samples = values.len(),
                threshold = self.threshold,
                "No data above threshold"
            );
            return ReassignOutcome::NoData {
                samples: values.len(),
            };
        }

        let summary = ReassignmentSummary {
            samples: values.len(),
            assigned,
            pulses: (tracker.pulse_index() + 1) as usize,
            corrected: self.is_correcting(),
        };
        debug!(
            signature = %self.descriptor,
            samples = summary.samples,
            assigned = summary.assigned,
            pulses = summary.pulses,
            "Reassignment complete"
        );
        ReassignOutcome::Completed(summary)
    }

    /// Incremental step: classify `value` as the sample at `cursor.next_row`.
    ///
    /// Samples beyond the store's rows are skipped without touching the store or
    /// the pulse state.
    pub fn assign_next(
        &self,
        store: &mut StructuredDataStore,
        cursor: Cursor,
        value: f64,
    ) -> Cursor {
        let row = cursor.next_row;
        if row >= store.rows() {
            return Cursor {
                next_row: row + 1,
                ..cursor
            };
        }

        let mut tracker = PulseTracker::resume(&self.descriptor, cursor.pulse_index, cursor.bucket);
        let previous_inactive = row == 0 || store.row_is_empty(row - 1);
        self.classify(&mut tracker, store, row, value, previous_inactive);

        Cursor {
            next_row: row + 1,
            pulse_index: tracker.pulse_index(),
            bucket: tracker.bucket(),
        }
    }

    /// Clear the store (keeping its shape) and classify `values` from the start.
    pub fn replay(&self, values: &[f64], store: &mut StructuredDataStore) -> Cursor {
        store.clear();
        values
            .iter()
            .fold(Cursor::default(), |cursor, &value| {
                self.assign_next(store, cursor, value)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier(signature: &str, threshold: f64) -> PulseClassifier {
        PulseClassifier::new(signature.parse().unwrap(), threshold)
    }

    fn buckets(store: &StructuredDataStore) -> Vec<Option<(usize, usize)>> {
        store
            .buckets()
            .into_iter()
            .map(|b| b.map(|b| (b.wavelength, b.power)))
            .collect()
    }

    #[test]
    fn lp_advances_power_first() {
        let c = classifier("2T2P2L", 1.0);
        let values = [0., 5., 5., 0., 6., 6., 0., 7., 7., 0., 8., 8., 0., 9.];
        let mut store = StructuredDataStore::default();
        let outcome = c.reassign(&values, &mut store);

        let ReassignOutcome::Completed(summary) = outcome else {
            panic!("expected data");
        };
        assert_eq!(summary.pulses, 5);
        assert_eq!(summary.assigned, 9);
        assert_eq!(
            buckets(&store),
            vec![
                None,
                Some((0, 0)),
                Some((0, 0)),
                None,
                Some((0, 1)),
                Some((0, 1)),
                None,
                Some((1, 0)),
                Some((1, 0)),
                None,
                Some((1, 1)),
                Some((1, 1)),
                None,
                Some((0, 0)),
            ]
        );
        assert_eq!(store.structured()[[7, 1, 0]], 7.0);
        assert_eq!(store.reassigned()[[10, 1]], 8.0);
    }

    #[test]
    fn pl_advances_wavelength_first() {
        let c = classifier("1T2L2P", 0.5);
        let values = [1., 0., 2., 0., 3., 0., 4., 0., 5.];
        let mut store = StructuredDataStore::default();
        c.reassign(&values, &mut store);
        assert_eq!(
            buckets(&store),
            vec![
                Some((0, 0)),
                None,
                Some((1, 0)),
                None,
                Some((0, 1)),
                None,
                Some((1, 1)),
                None,
                Some((0, 0)),
            ]
        );
    }

    #[test]
    fn values_at_threshold_are_active() {
        let c = classifier("1T1P2L", 2.0);
        let values = [1.9, 2.0, 1.0, 3.0];
        let mut store = StructuredDataStore::default();
        c.reassign(&values, &mut store);
        assert_eq!(buckets(&store), vec![None, Some((0, 0)), None, Some((1, 0))]);
    }

    #[test]
    fn empty_series_is_a_no_op() {
        let c = classifier("1T1P1L", 0.0);
        let mut store = StructuredDataStore::new(3, 1, 1);
        assert_eq!(
            c.reassign(&[], &mut store),
            ReassignOutcome::NoData { samples: 0 }
        );
        assert_eq!(store.rows(), 3);
    }

    #[test]
    fn all_below_threshold_leaves_pointers_unassigned() {
        let c = classifier("1T1P2L", 10.0);
        let mut store = StructuredDataStore::default();
        let outcome = c.reassign(&[1.0, 2.0, 3.0], &mut store);
        assert_eq!(outcome, ReassignOutcome::NoData { samples: 3 });
        assert_eq!(store.rows(), 3);
        assert!(store.pointers().iter().all(|v| v.is_nan()));
    }

    #[test]
    fn correction_scales_stored_values() {
        let c = classifier("1T1P2L", 0.5).with_correction(Some(vec![2.0, 0.5]));
        let mut store = StructuredDataStore::default();
        c.reassign(&[1.0, 0.0, 4.0], &mut store);
        assert_eq!(store.value(0), Some(2.0));
        assert_eq!(store.value(2), Some(2.0));
    }

    #[test]
    fn incremental_matches_offline() {
        let c = classifier("2T2L3P", 1.0);
        let values = [
            3., 3., 0., 4., 4., 0.5, 5., 5., 0., 6., 0., 7., 7., 0., 8., 8., 0., 9.,
        ];
        let mut offline = StructuredDataStore::default();
        c.reassign(&values, &mut offline);

        let mut live = StructuredDataStore::new(values.len(), 2, 3);
        let mut cursor = Cursor::default();
        for &v in &values {
            cursor = c.assign_next(&mut live, cursor, v);
        }
        assert_eq!(cursor.next_row, values.len());
        assert_eq!(buckets(&live), buckets(&offline));
        assert_eq!(live.reassigned(), offline.reassigned());
        assert_eq!(live.structured(), offline.structured());
    }

    #[test]
    fn replay_recomputes_after_threshold_change() {
        let values = [2., 2., 5., 5., 2., 5.];
        let mut store = StructuredDataStore::new(values.len(), 2, 1);

        let low = classifier("1T1P2L", 1.0);
        let cursor = low.replay(&values, &mut store);
        assert_eq!(cursor.pulse_index, 0);
        assert_eq!(store.assigned_count(), 6);

        let high = classifier("1T1P2L", 4.0);
        let cursor = high.replay(&values, &mut store);
        assert_eq!(cursor.pulse_index, 1);
        assert_eq!(buckets(&store)[5], Some((1, 0)));
        assert_eq!(buckets(&store)[0], None);
    }

    #[test]
    fn overflowing_samples_keep_state() {
        let c = classifier("1T1P2L", 0.5);
        let mut store = StructuredDataStore::new(1, 2, 1);
        let cursor = c.assign_next(&mut store, Cursor::default(), 1.0);
        let after = c.assign_next(&mut store, cursor, 1.0);
        assert_eq!(after.next_row, 2);
        assert_eq!(after.pulse_index, cursor.pulse_index);
        assert_eq!(after.bucket, cursor.bucket);
    }

    #[test]
    fn rejects_order_mismatch() {
        let err = PulseClassifier::from_signature("4T1P2L", PulseOrder::Pl, 0.0).unwrap_err();
        assert!(matches!(err, LpmError::SignatureOrderMismatch { .. }));
        assert!(PulseClassifier::from_signature("4T1P2L", PulseOrder::Lp, 0.0).is_ok());
    }
}
