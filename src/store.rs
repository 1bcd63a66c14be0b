//! Structured data store.
//!
//! Three co-allocated tensors sharing the same leading (sample) dimension:
//!
//! - `structured[sample, wavelength, power]`: value at its bucket, zero elsewhere
//! - `reassigned[sample, wavelength]`: value at its wavelength row
//! - `pointers[sample, 2]`: `(wavelength, power)` index pair, NaN when unassigned
//!
//! The only resize operation is [`StructuredDataStore::reallocate`], which always
//! discards prior contents.

use ndarray::{s, Array2, Array3, ArrayView1};
use serde::{Deserialize, Serialize};

/// A `(wavelength index, power index)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Bucket {
    /// Row in the plan's wavelength list
    pub wavelength: usize,
    /// Row in the plan's power-setting list
    pub power: usize,
}

impl Bucket {
    /// Bucket of the very first pulse.
    pub const FIRST: Bucket = Bucket {
        wavelength: 0,
        power: 0,
    };
}

/// Owner of the reassignment tensors.
#[derive(Debug, Clone, PartialEq)]
pub struct StructuredDataStore {
    structured: Array3<f64>,
    reassigned: Array2<f64>,
    pointers: Array2<f64>,
}

impl Default for StructuredDataStore {
    fn default() -> Self {
        Self::new(0, 0, 0)
    }
}

impl StructuredDataStore {
    /// Zero-filled store of the given shape.
    pub fn new(rows: usize, wavelength_count: usize, power_count: usize) -> Self {
        Self {
            structured: Array3::zeros((rows, wavelength_count, power_count)),
            reassigned: Array2::zeros((rows, wavelength_count)),
            pointers: Array2::from_elem((rows, 2), f64::NAN),
        }
    }

    /// Replace all tensors with freshly initialised ones of the new shape.
    pub fn reallocate(&mut self, rows: usize, wavelength_count: usize, power_count: usize) {
        *self = Self::new(rows, wavelength_count, power_count);
    }

    /// Reset contents, keeping the current shape.
    pub fn clear(&mut self) {
        let (rows, wavelengths, powers) = self.shape();
        self.reallocate(rows, wavelengths, powers);
    }

    /// `(rows, wavelengths, powers)`.
    pub fn shape(&self) -> (usize, usize, usize) {
        self.structured.dim()
    }

    /// Number of sample rows.
    pub fn rows(&self) -> usize {
        self.structured.dim().0
    }

    /// Whether `row` fits the store and `bucket` fits its bucket dimensions.
    pub fn accepts(&self, row: usize, bucket: Bucket) -> bool {
        let (rows, wavelengths, powers) = self.shape();
        row < rows && bucket.wavelength < wavelengths && bucket.power < powers
    }

    /// Write one classified sample.
    ///
    /// Returns `false` without touching any tensor when the row or bucket is out
    /// of range, so a rejected write never leaves the three tensors disagreeing.
    pub fn write(&mut self, row: usize, bucket: Bucket, value: f64) -> bool {
        if !self.accepts(row, bucket) {
            return false;
        }
        self.structured[[row, bucket.wavelength, bucket.power]] = value;
        self.reassigned[[row, bucket.wavelength]] = value;
        self.pointers[[row, 0]] = bucket.wavelength as f64;
        self.pointers[[row, 1]] = bucket.power as f64;
        true
    }

    /// Bucket assigned to `row`, if any.
    pub fn bucket(&self, row: usize) -> Option<Bucket> {
        if row >= self.rows() {
            return None;
        }
        let wavelength = self.pointers[[row, 0]];
        let power = self.pointers[[row, 1]];
        if wavelength.is_nan() || power.is_nan() {
            return None;
        }
        Some(Bucket {
            wavelength: wavelength as usize,
            power: power as usize,
        })
    }

    /// Per-sample buckets, `None` where unassigned.
    pub fn buckets(&self) -> Vec<Option<Bucket>> {
        (0..self.rows()).map(|row| self.bucket(row)).collect()
    }

    /// Whether the reassigned row holds only zeros (or lies past the end).
    pub fn row_is_empty(&self, row: usize) -> bool {
        if row >= self.rows() {
            return true;
        }
        self.reassigned.row(row).iter().all(|&v| v == 0.0)
    }

    /// Number of rows with a bucket.
    pub fn assigned_count(&self) -> usize {
        self.pointers
            .column(0)
            .iter()
            .filter(|v| !v.is_nan())
            .count()
    }

    /// Stored value of `row` in its wavelength row.
    pub fn value(&self, row: usize) -> Option<f64> {
        self.bucket(row)
            .map(|bucket| self.reassigned[[row, bucket.wavelength]])
    }

    /// `[rows, wavelengths, powers]` tensor.
    pub fn structured(&self) -> &Array3<f64> {
        &self.structured
    }

    /// `[rows, wavelengths]` tensor.
    pub fn reassigned(&self) -> &Array2<f64> {
        &self.reassigned
    }

    /// `[rows, 2]` pointer tensor (NaN = unassigned).
    pub fn pointers(&self) -> &Array2<f64> {
        &self.pointers
    }

    /// Per-wavelength series, for plotting.
    pub fn wavelength_series(&self, wavelength: usize) -> ArrayView1<'_, f64> {
        self.reassigned.slice(s![.., wavelength])
    }
}
