//! Calibration frame resolution
//!
//! Targets are the distinct combinations of the required attributes among
//! masked frames that need this calibration type. Candidates are every
//! frame of the calibration type, masked or not. A target combination with
//! a matching candidate is `Available` (one entry per candidate file); one
//! without is `Missing`. Candidates that match no target are left out.

use crate::config::{image_type_label, CalibrationRequirement};
use crate::state::data::attr;
use crate::state::index::Index;
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CalibrationStatus {
    Available,
    Missing,
}

impl fmt::Display for CalibrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CalibrationStatus::Available => write!(f, "Available"),
            CalibrationStatus::Missing => write!(f, "Missing"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationEntry {
    /// Values of the required attributes, in requirement order
    pub values: Vec<Option<String>>,
    pub status: CalibrationStatus,
    /// The matching calibration frame; `None` for missing combinations
    pub file: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationReport {
    pub kind: String,
    pub attrs: Vec<String>,
    pub entries: Vec<CalibrationEntry>,
}

/// One line of the aggregate view: a combination, its status and how many frames back it
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationCount {
    pub values: Vec<Option<String>>,
    pub status: CalibrationStatus,
    pub files: usize,
}

impl CalibrationReport {
    /// Frame counts per distinct combination and status, in first-occurrence order
    pub fn counts(&self) -> Vec<CalibrationCount> {
        let mut counts: Vec<CalibrationCount> = Vec::new();
        for entry in &self.entries {
            let files = usize::from(entry.file.is_some());
            match counts
                .iter_mut()
                .find(|c| c.values == entry.values && c.status == entry.status)
            {
                Some(count) => count.files += files,
                None => counts.push(CalibrationCount {
                    values: entry.values.clone(),
                    status: entry.status,
                    files,
                }),
            }
        }
        counts
    }

    /// Calibration frames matching at least one target
    pub fn available_files(&self) -> Vec<PathBuf> {
        let mut seen = HashSet::new();
        self.entries
            .iter()
            .filter(|e| e.status == CalibrationStatus::Available)
            .filter_map(|e| e.file.clone())
            .filter(|f| seen.insert(f.clone()))
            .collect()
    }
}

/// Rounding applied to the tolerant attributes before a fuzzy join.
///
/// Digits follow decimal places: 1 rounds to 0.1, 0 to whole numbers,
/// -1 to tens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tolerance {
    pub exposure_digits: i32,
    pub temperature_digits: i32,
}

impl Default for Tolerance {
    fn default() -> Self {
        Tolerance {
            exposure_digits: 2,
            temperature_digits: 0,
        }
    }
}

/// Round to `digits` decimal places; negative digits round to powers of ten
pub fn round_to_digits(value: f64, digits: i32) -> f64 {
    let scale = 10f64.powi(digits.abs());
    if digits >= 0 {
        (value * scale).round() / scale
    } else {
        (value / scale).round() * scale
    }
}

/// Exact outer join on the required attributes
pub fn resolve_exact(index: &Index, kind: &str, requirement: &CalibrationRequirement) -> CalibrationReport {
    resolve(index, kind, requirement, |_, value| value.map(str::to_string))
}

/// Outer join after rounding EXPTIME and `_CCDTEMP` on both sides
///
/// `_CCDTEMP` is already snapped to whole degrees, so only zero or negative
/// temperature digits change which frames match.
pub fn resolve_fuzzy(
    index: &Index,
    kind: &str,
    requirement: &CalibrationRequirement,
    tolerance: Tolerance,
) -> CalibrationReport {
    resolve(index, kind, requirement, |name, value| {
        let value = value?;
        let rounded = match name {
            attr::EXPTIME => value
                .trim()
                .parse::<f64>()
                .ok()
                .map(|v| format!("{}", round_to_digits(v, tolerance.exposure_digits))),
            attr::D_CCDTEMP => value
                .trim()
                .trim_end_matches('C')
                .parse::<f64>()
                .ok()
                .map(|v| format!("{}C", round_to_digits(v, tolerance.temperature_digits))),
            _ => None,
        };
        Some(rounded.unwrap_or_else(|| value.to_string()))
    })
}

fn resolve<F>(index: &Index, kind: &str, requirement: &CalibrationRequirement, key: F) -> CalibrationReport
where
    F: Fn(&str, Option<&str>) -> Option<String>,
{
    let kind = image_type_label(kind);
    let table = index.table();
    let project = |row: usize| -> Vec<Option<String>> {
        requirement
            .attrs
            .iter()
            .map(|name| key(name.as_str(), table.get(row, name)))
            .collect()
    };

    // Distinct, fully populated target combinations
    let mut seen = HashSet::new();
    let targets: Vec<Vec<Option<String>>> = index
        .masked_rows()
        .into_iter()
        .filter(|&row| {
            table
                .get(row, attr::D_IMAGETYP)
                .is_some_and(|t| requirement.targets.iter().any(|g| g == t))
        })
        .map(|row| project(row))
        .filter(|combo| combo.iter().all(Option::is_some))
        .filter(|combo| seen.insert(combo.clone()))
        .collect();

    let candidates: Vec<(Vec<Option<String>>, PathBuf)> = (0..table.len())
        .filter(|&row| table.get(row, attr::D_IMAGETYP) == Some(kind.as_str()))
        .map(|row| (project(row), table.key(row).to_path_buf()))
        .collect();

    let mut entries = Vec::new();
    for combo in targets {
        let matches: Vec<&PathBuf> = candidates
            .iter()
            .filter(|(values, _)| *values == combo)
            .map(|(_, file)| file)
            .collect();
        if matches.is_empty() {
            entries.push(CalibrationEntry {
                values: combo,
                status: CalibrationStatus::Missing,
                file: None,
            });
        } else {
            for file in matches {
                entries.push(CalibrationEntry {
                    values: combo.clone(),
                    status: CalibrationStatus::Available,
                    file: Some(file.clone()),
                });
            }
        }
    }

    tracing::info!(
        "{} frames: {} available, {} missing combinations",
        kind,
        entries.iter().filter(|e| e.status == CalibrationStatus::Available).count(),
        entries.iter().filter(|e| e.status == CalibrationStatus::Missing).count()
    );

    CalibrationReport {
        kind,
        attrs: requirement.attrs.clone(),
        entries,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::index::testing::index;

    fn requirement(attrs: &[&str], targets: &[&str]) -> CalibrationRequirement {
        CalibrationRequirement {
            attrs: attrs.iter().map(|s| s.to_string()).collect(),
            targets: targets.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn frames() -> Index {
        index(&[
            (
                "/data/light.fits",
                &[("IMAGETYP", "Light Frame"), ("CCD-TEMP", "-0.3"), ("XBINNING", "1"), ("YBINNING", "1"), ("EXPTIME", "300")],
            ),
            (
                "/data/dark_a.fits",
                &[("IMAGETYP", "Dark Frame"), ("CCD-TEMP", "0.2"), ("XBINNING", "1"), ("YBINNING", "1"), ("EXPTIME", "300")],
            ),
            (
                "/data/dark_b.fits",
                &[("IMAGETYP", "Dark Frame"), ("CCD-TEMP", "-10.1"), ("XBINNING", "2"), ("YBINNING", "2"), ("EXPTIME", "300.004")],
            ),
        ])
    }

    fn missing(report: &CalibrationReport) -> usize {
        report
            .entries
            .iter()
            .filter(|e| e.status == CalibrationStatus::Missing)
            .count()
    }

    #[test]
    fn test_exact_match_excludes_unmatched_candidates() {
        let idx = frames();
        let req = requirement(&["_CCDTEMP", "_BINNING"], &["light"]);
        let report = resolve_exact(&idx, "Dark Frame", &req);

        assert_eq!(report.kind, "dark");
        assert_eq!(report.entries.len(), 1);
        let entry = &report.entries[0];
        assert_eq!(entry.status, CalibrationStatus::Available);
        assert_eq!(entry.values, vec![Some("0C".to_string()), Some("1x1".to_string())]);
        assert_eq!(entry.file, Some(PathBuf::from("/data/dark_a.fits")));
        assert_eq!(missing(&report), 0);
        assert_eq!(report.available_files(), vec![PathBuf::from("/data/dark_a.fits")]);
    }

    #[test]
    fn test_missing_target_combination() {
        let mut idx = frames();
        idx.set_mask(vec![true, false, false]).unwrap();
        let req = requirement(&["_BINNING", "EXPTIME"], &["light"]);
        let report = resolve_exact(&idx, "bias", &req);
        assert_eq!(report.entries.len(), 1);
        assert_eq!(report.entries[0].status, CalibrationStatus::Missing);
        assert_eq!(report.counts()[0].files, 0);
        assert!(report.available_files().is_empty());
    }

    #[test]
    fn test_exact_is_idempotent() {
        let idx = frames();
        let req = requirement(&["_CCDTEMP", "_BINNING"], &["light"]);
        assert_eq!(resolve_exact(&idx, "dark", &req), resolve_exact(&idx, "dark", &req));
    }

    #[test]
    fn test_fuzzy_zero_digits_agrees_with_exact_on_integers() {
        let idx = index(&[
            ("/data/l.fits", &[("IMAGETYP", "Light Frame"), ("EXPTIME", "120"), ("CCD-TEMP", "-10")]),
            ("/data/d1.fits", &[("IMAGETYP", "Dark Frame"), ("EXPTIME", "120"), ("CCD-TEMP", "-10")]),
            ("/data/d2.fits", &[("IMAGETYP", "Dark Frame"), ("EXPTIME", "60"), ("CCD-TEMP", "-10")]),
        ]);
        let req = requirement(&["EXPTIME", "_CCDTEMP"], &["light"]);
        let tolerance = Tolerance {
            exposure_digits: 0,
            temperature_digits: 0,
        };
        let exact = resolve_exact(&idx, "dark", &req);
        let fuzzy = resolve_fuzzy(&idx, "dark", &req, tolerance);
        assert_eq!(exact.entries, fuzzy.entries);
    }

    #[test]
    fn test_fuzzy_matches_within_tolerance() {
        let idx = index(&[
            ("/data/l.fits", &[("IMAGETYP", "Light Frame"), ("EXPTIME", "2.003")]),
            ("/data/d.fits", &[("IMAGETYP", "Dark Frame"), ("EXPTIME", "2.001")]),
        ]);
        let req = requirement(&["EXPTIME"], &["light"]);
        assert_eq!(missing(&resolve_exact(&idx, "dark", &req)), 1);

        let tolerance = Tolerance {
            exposure_digits: 2,
            temperature_digits: 0,
        };
        let report = resolve_fuzzy(&idx, "dark", &req, tolerance);
        assert_eq!(missing(&report), 0);
        assert_eq!(report.entries[0].values, vec![Some("2".to_string())]);
    }

    #[test]
    fn test_fuzzy_temperature_widens_only_below_whole_degrees() {
        let idx = index(&[
            ("/data/l.fits", &[("IMAGETYP", "Light Frame"), ("CCD-TEMP", "-10")]),
            ("/data/d.fits", &[("IMAGETYP", "Dark Frame"), ("CCD-TEMP", "-5")]),
        ]);
        let req = requirement(&["_CCDTEMP"], &["light"]);
        let fine = Tolerance {
            exposure_digits: 2,
            temperature_digits: 1,
        };
        assert_eq!(missing(&resolve_fuzzy(&idx, "dark", &req, fine)), 1);

        let coarse = Tolerance {
            exposure_digits: 2,
            temperature_digits: -1,
        };
        let report = resolve_fuzzy(&idx, "dark", &req, coarse);
        assert_eq!(missing(&report), 0);
        assert_eq!(report.entries[0].values, vec![Some("-10C".to_string())]);
    }

    #[test]
    fn test_no_targets_yields_empty_report() {
        let idx = frames();
        let req = requirement(&["_BINNING"], &["flat"]);
        let report = resolve_exact(&idx, "bias", &req);
        assert!(report.entries.is_empty());
        assert!(report.counts().is_empty());
    }

    #[test]
    fn test_round_to_digits() {
        assert_eq!(round_to_digits(2.003, 2), 2.0);
        assert_eq!(round_to_digits(2.56, 1), 2.6);
        assert_eq!(round_to_digits(300.4, 0), 300.0);
        assert_eq!(round_to_digits(347.0, -1), 350.0);
        assert_eq!(round_to_digits(347.0, -2), 300.0);
    }
}
