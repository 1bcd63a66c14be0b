//! Compact signature strings such as `12T3P4L`.
//!
//! A signature string lists three counted fields, innermost first:
//! `T` (readouts per pulse), `P` (power settings) and `L` (wavelengths). The
//! relative position of `P` and `L` encodes the loop nesting, so the classifier can
//! recover the acquisition order without re-deriving it from the plan.

use crate::error::{AppResult, LpmError};
use crate::plan::PulseOrder;
use std::fmt;
use std::str::FromStr;

/// One counted field of a signature string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldLabel {
    /// Readouts per pulse
    Time,
    /// Power settings
    Power,
    /// Wavelengths
    Wavelength,
}

impl FieldLabel {
    fn from_char(c: char) -> Option<Self> {
        match c {
            'T' => Some(FieldLabel::Time),
            'P' => Some(FieldLabel::Power),
            'L' => Some(FieldLabel::Wavelength),
            _ => None,
        }
    }

    fn as_char(&self) -> char {
        match self {
            FieldLabel::Time => 'T',
            FieldLabel::Power => 'P',
            FieldLabel::Wavelength => 'L',
        }
    }
}

/// Parsed signature string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureDescriptor {
    fields: [(FieldLabel, usize); 3],
}

impl SignatureDescriptor {
    /// Descriptor produced by the synthesizer for a given order.
    pub fn new(
        order: PulseOrder,
        points_per_pulse: usize,
        wavelength_count: usize,
        power_count: usize,
    ) -> Self {
        let fields = match order {
            PulseOrder::Lp => [
                (FieldLabel::Time, points_per_pulse),
                (FieldLabel::Power, power_count),
                (FieldLabel::Wavelength, wavelength_count),
            ],
            PulseOrder::Pl => [
                (FieldLabel::Time, points_per_pulse),
                (FieldLabel::Wavelength, wavelength_count),
                (FieldLabel::Power, power_count),
            ],
        };
        Self { fields }
    }

    /// Field labels, innermost first.
    pub fn labels(&self) -> [FieldLabel; 3] {
        self.fields.map(|(label, _)| label)
    }

    /// Element counts aligned with [`labels`](Self::labels).
    pub fn counts(&self) -> [usize; 3] {
        self.fields.map(|(_, count)| count)
    }

    fn count_of(&self, label: FieldLabel) -> usize {
        self.fields
            .iter()
            .find(|(l, _)| *l == label)
            .map_or(0, |(_, count)| *count)
    }

    fn position_of(&self, label: FieldLabel) -> usize {
        self.fields
            .iter()
            .position(|(l, _)| *l == label)
            .unwrap_or(usize::MAX)
    }

    /// Readouts per pulse (`T` field).
    pub fn points_per_pulse(&self) -> usize {
        self.count_of(FieldLabel::Time)
    }

    /// Number of wavelengths (`L` field).
    pub fn wavelength_count(&self) -> usize {
        self.count_of(FieldLabel::Wavelength)
    }

    /// Number of power settings (`P` field).
    pub fn power_count(&self) -> usize {
        self.count_of(FieldLabel::Power)
    }

    /// Loop nesting: the field listed first varies fastest.
    pub fn order(&self) -> PulseOrder {
        if self.position_of(FieldLabel::Power) < self.position_of(FieldLabel::Wavelength) {
            PulseOrder::Lp
        } else {
            PulseOrder::Pl
        }
    }
}

impl fmt::Display for SignatureDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (label, count) in &self.fields {
            write!(f, "{count}{}", label.as_char())?;
        }
        Ok(())
    }
}

impl FromStr for SignatureDescriptor {
    type Err = LpmError;

    fn from_str(s: &str) -> AppResult<Self> {
        let signature = s.trim();
        let fail = |reason: &str| LpmError::Signature {
            signature: signature.to_string(),
            reason: reason.to_string(),
        };

        let mut fields = Vec::with_capacity(3);
        let mut digits = String::new();
        for c in signature.chars() {
            if c.is_ascii_digit() {
                digits.push(c);
                continue;
            }
            let label = FieldLabel::from_char(c)
                .ok_or_else(|| fail(&format!("unexpected character '{c}'")))?;
            if digits.is_empty() {
                return Err(fail(&format!("field '{c}' has no count")));
            }
            let count: usize = digits
                .parse()
                .map_err(|_| fail(&format!("count '{digits}' is out of range")))?;
            if fields.iter().any(|(l, _)| *l == label) {
                return Err(fail(&format!("field '{c}' appears twice")));
            }
            fields.push((label, count));
            digits.clear();
        }

        if !digits.is_empty() {
            return Err(fail("trailing count without a field label"));
        }
        let fields: [(FieldLabel, usize); 3] = fields
            .try_into()
            .map_err(|_| fail("expected exactly the fields T, P and L"))?;
        if fields
            .iter()
            .any(|(label, count)| *count == 0 && *label != FieldLabel::Time)
        {
            return Err(fail("wavelength and power counts must be positive"));
        }
        Ok(Self { fields })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_lp_signature() {
        let d: SignatureDescriptor = "12T3P4L".parse().unwrap();
        assert_eq!(d.points_per_pulse(), 12);
        assert_eq!(d.power_count(), 3);
        assert_eq!(d.wavelength_count(), 4);
        assert_eq!(d.order(), PulseOrder::Lp);
        assert_eq!(
            d.labels(),
            [FieldLabel::Time, FieldLabel::Power, FieldLabel::Wavelength]
        );
    }

    #[test]
    fn parses_other_permutations() {
        let d: SignatureDescriptor = "3T4L20P".parse().unwrap();
        assert_eq!(d.order(), PulseOrder::Pl);
        assert_eq!(d.counts(), [3, 4, 20]);

        let d: SignatureDescriptor = "4L180T1P".parse().unwrap();
        assert_eq!(d.points_per_pulse(), 180);
        assert_eq!(d.order(), PulseOrder::Pl);
    }

    #[test]
    fn display_matches_input() {
        for s in ["4T1P2L", "7T2L3P", "1P60T8L"] {
            let d: SignatureDescriptor = s.parse().unwrap();
            assert_eq!(d.to_string(), s);
        }
    }

    #[test]
    fn rejects_malformed_strings() {
        for s in ["", "12T3P", "12T3P4L5L", "T3P4L", "12T3P4L9", "12X3P4L", "4T0P2L"] {
            assert!(
                s.parse::<SignatureDescriptor>().is_err(),
                "'{s}' should be rejected"
            );
        }
    }
}
