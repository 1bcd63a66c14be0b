//! Process files.
//!
//! A process file stores an [`AcquisitionPlan`] as tab-separated `name value`
//! lines under a `Process:` heading:
//!
//! ```text
//! Process:
//! wavelengths	[405, 488, 561]
//! setPowers	[20, 80]
//! duration	60
//! measurementInterval	12
//! averageInterval	1
//! readoutInterval	1
//! signaturePause	1
//! order	LP
//! ```
//!
//! Values are typed: a list field must hold a bracketed list of integers, a time
//! field a number, and `order` one of `LP`/`PL`. Any mismatch fails the whole
//! file with the offending line number.

use crate::error::{AppResult, LpmError};
use crate::plan::{AcquisitionPlan, PulseOrder};
use std::fmt::Write as _;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, warn};

const HEADING: &str = "Process:";

const WAVELENGTHS: &str = "wavelengths";
const SET_POWERS: &str = "setPowers";
const DURATION: &str = "duration";
const MEASUREMENT_INTERVAL: &str = "measurementInterval";
const AVERAGE_INTERVAL: &str = "averageInterval";
const READOUT_INTERVAL: &str = "readoutInterval";
const SIGNATURE_PAUSE: &str = "signaturePause";
const ORDER: &str = "order";

#[derive(Default)]
struct Fields {
    wavelengths: Option<Vec<u32>>,
    set_powers: Option<Vec<u32>>,
    duration: Option<f64>,
    measurement_interval: Option<f64>,
    average_interval: Option<f64>,
    readout_interval: Option<f64>,
    signature_pause: Option<f64>,
    order: Option<PulseOrder>,
}

/// Parse a process file from text.
///
/// # Errors
/// [`LpmError::PlanFile`] for a malformed line, a value of the wrong type, or a
/// missing field (reported against the last line).
pub fn parse(text: &str) -> AppResult<AcquisitionPlan> {
    let mut fields = Fields::default();
    let mut last_line = 0;

    for (index, raw) in text.lines().enumerate() {
        let line = index + 1;
        last_line = line;
        let trimmed = raw.trim();
        if trimmed.is_empty() || (line == 1 && trimmed == HEADING) {
            continue;
        }

        let (name, value) = trimmed
            .split_once('\t')
            .map(|(n, v)| (n.trim(), v.trim()))
            .ok_or_else(|| plan_error(line, format!("expected 'name<TAB>value', got '{trimmed}'")))?;

        match name {
            WAVELENGTHS => fields.wavelengths = Some(parse_list(line, name, value)?),
            SET_POWERS => fields.set_powers = Some(parse_list(line, name, value)?),
            DURATION => fields.duration = Some(parse_number(line, name, value)?),
            MEASUREMENT_INTERVAL => {
                fields.measurement_interval = Some(parse_number(line, name, value)?)
            }
            AVERAGE_INTERVAL => fields.average_interval = Some(parse_number(line, name, value)?),
            READOUT_INTERVAL => fields.readout_interval = Some(parse_number(line, name, value)?),
            SIGNATURE_PAUSE => fields.signature_pause = Some(parse_number(line, name, value)?),
            ORDER => {
                fields.order = Some(
                    PulseOrder::from_str(unquote(value))
                        .map_err(|e| plan_error(line, e.to_string()))?,
                )
            }
            other => warn!(line, field = other, "Ignoring unknown process field"),
        }
    }

    let missing = |name: &str| plan_error(last_line, format!("missing field '{name}'"));
    let readout_interval = fields.readout_interval.ok_or_else(|| missing(READOUT_INTERVAL))?;
    let plan = AcquisitionPlan {
        wavelengths: fields.wavelengths.ok_or_else(|| missing(WAVELENGTHS))?,
        set_powers: fields.set_powers.ok_or_else(|| missing(SET_POWERS))?,
        duration: fields.duration.ok_or_else(|| missing(DURATION))?,
        measurement_interval: fields
            .measurement_interval
            .ok_or_else(|| missing(MEASUREMENT_INTERVAL))?,
        average_interval: fields.average_interval.unwrap_or(readout_interval),
        readout_interval,
        signature_pause: fields.signature_pause.ok_or_else(|| missing(SIGNATURE_PAUSE))?,
        order: fields.order.ok_or_else(|| missing(ORDER))?,
    };
    debug!(?plan, "Process file parsed");
    Ok(plan)
}

/// Read and parse a process file.
pub fn load<P: AsRef<Path>>(path: P) -> AppResult<AcquisitionPlan> {
    let text = std::fs::read_to_string(path.as_ref())?;
    parse(&text)
}

/// Render a plan in process-file form.
pub fn render(plan: &AcquisitionPlan) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{HEADING}");
    let _ = writeln!(out, "{WAVELENGTHS}\t{}", format_list(&plan.wavelengths));
    let _ = writeln!(out, "{SET_POWERS}\t{}", format_list(&plan.set_powers));
    let _ = writeln!(out, "{DURATION}\t{}", plan.duration);
    let _ = writeln!(out, "{MEASUREMENT_INTERVAL}\t{}", plan.measurement_interval);
    let _ = writeln!(out, "{AVERAGE_INTERVAL}\t{}", plan.average_interval);
    let _ = writeln!(out, "{READOUT_INTERVAL}\t{}", plan.readout_interval);
    let _ = writeln!(out, "{SIGNATURE_PAUSE}\t{}", plan.signature_pause);
    let _ = writeln!(out, "{ORDER}\t{}", plan.order);
    out
}

/// Write a plan to `path`, creating parent directories.
pub fn save<P: AsRef<Path>>(plan: &AcquisitionPlan, path: P) -> AppResult<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, render(plan))?;
    Ok(())
}

fn plan_error(line: usize, message: String) -> LpmError {
    LpmError::PlanFile { line, message }
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('\'')
        .and_then(|v| v.strip_suffix('\''))
        .or_else(|| value.strip_prefix('"').and_then(|v| v.strip_suffix('"')))
        .unwrap_or(value)
}

fn parse_number(line: usize, name: &str, value: &str) -> AppResult<f64> {
    value
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| plan_error(line, format!("'{name}' expects a number, got '{value}'")))
}

fn parse_list(line: usize, name: &str, value: &str) -> AppResult<Vec<u32>> {
    let inner = value
        .strip_prefix('[')
        .and_then(|v| v.strip_suffix(']'))
        .ok_or_else(|| plan_error(line, format!("'{name}' expects a list like [1, 2], got '{value}'")))?;
    if inner.trim().is_empty() {
        return Ok(Vec::new());
    }
    inner
        .split(',')
        .map(|item| {
            let item = item.trim();
            item.parse::<u32>().map_err(|_| {
                plan_error(line, format!("'{name}' expects whole numbers, got '{item}'"))
            })
        })
        .collect()
}

fn format_list(values: &[u32]) -> String {
    let items: Vec<String> = values.iter().map(u32::to_string).collect();
    format!("[{}]", items.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "Process:\n\
        wavelengths\t[405, 488, 561]\n\
        setPowers\t[20, 80]\n\
        duration\t60\n\
        measurementInterval\t12\n\
        readoutInterval\t0.5\n\
        signaturePause\t1\n\
        order\t'PL'\n";

    #[test]
    fn parses_a_process_file() {
        let plan = parse(SAMPLE).unwrap();
        assert_eq!(plan.wavelengths, vec![405, 488, 561]);
        assert_eq!(plan.set_powers, vec![20, 80]);
        assert_eq!(plan.duration, 60.0);
        assert_eq!(plan.readout_interval, 0.5);
        assert_eq!(plan.average_interval, 0.5);
        assert_eq!(plan.order, PulseOrder::Pl);
    }

    #[test]
    fn render_then_parse_keeps_the_plan() {
        let mut plan = parse(SAMPLE).unwrap();
        plan.average_interval = 2.0;
        let text = render(&plan);
        assert!(text.starts_with("Process:\nwavelengths\t[405, 488, 561]\n"));
        assert_eq!(parse(&text).unwrap(), plan);
    }

    #[test]
    fn type_mismatch_names_the_line() {
        let text = SAMPLE.replace("duration\t60", "duration\tsixty");
        match parse(&text).unwrap_err() {
            LpmError::PlanFile { line, message } => {
                assert_eq!(line, 4);
                assert!(message.contains("duration"));
            }
            other => panic!("unexpected {other:?}"),
        }

        let text = SAMPLE.replace("[20, 80]", "20, 80");
        assert!(matches!(
            parse(&text),
            Err(LpmError::PlanFile { line: 3, .. })
        ));
    }

    #[test]
    fn missing_field_is_an_error() {
        let text = SAMPLE.replace("order\t'PL'\n", "");
        let err = parse(&text).unwrap_err();
        assert!(err.to_string().contains("missing field 'order'"));
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let text = format!("{SAMPLE}operator\tjane\n");
        assert!(parse(&text).is_ok());
    }
}
