//! Derived attributes computed once per row at load time

use super::data::attr;
use crate::config::image_type_label;
use crate::error::{Error, Result};
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use chrono_tz::Tz;
use std::collections::BTreeMap;
use std::path::Path;

/// Cooler setpoints a measured CCD temperature snaps to when within 1 degree
const NORMAL_TEMPS: [i64; 4] = [0, -10, -15, -20];

/// Round a CCD temperature, snapping to a neighbouring normal setpoint.
///
/// The rounded value moves up one degree if that lands on a setpoint,
/// otherwise down one degree, otherwise stays. Halfway values round away
/// from zero before snapping.
pub fn normalize_temperature(t: f64) -> i64 {
    let r = t.round() as i64;
    if NORMAL_TEMPS.contains(&(r + 1)) {
        r + 1
    } else if NORMAL_TEMPS.contains(&(r - 1)) {
        r - 1
    } else {
        r
    }
}

/// Parse a DATE-OBS value as UTC.
///
/// Accepts RFC 3339 and the zone-less ISO forms FITS writers emit
/// (`2024-01-05T21:13:23.123`, `2024-01-05T21:13:23`, `2024-01-05`).
pub fn parse_observation_time(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// The observing night: the local timestamp rounded to the nearest day
pub fn night_of(local: &DateTime<Tz>) -> NaiveDate {
    (local.naive_local() + Duration::hours(12)).date()
}

fn parse_number(raw: Option<&String>) -> Option<f64> {
    raw.and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
}

/// Compute the derived attributes for one file from its raw header fields.
///
/// Only present values are returned. An unparseable DATE-OBS fails the row.
pub fn derive(file: &str, raw: &BTreeMap<String, String>, tz: Tz) -> Result<BTreeMap<&'static str, String>> {
    let mut out = BTreeMap::new();

    if let Some(t) = parse_number(raw.get(attr::CCD_TEMP)) {
        out.insert(attr::D_CCDTEMP, format!("{}C", normalize_temperature(t)));
    }
    if let Some(g) = parse_number(raw.get(attr::GAIN)) {
        out.insert(attr::D_GAIN, format!("{:.0}", g));
    }
    if let Some(o) = parse_number(raw.get(attr::OFFSET)) {
        out.insert(attr::D_OFFSET, format!("{:.0}", o));
    }
    if let Some(ra) = parse_number(raw.get(attr::RA)) {
        out.insert(attr::D_RA, format!("{:.2}", ra));
    }
    if let Some(dec) = parse_number(raw.get(attr::DEC)) {
        out.insert(attr::D_DEC, format!("{:.2}", dec));
    }

    if let Some(date_obs) = raw.get(attr::DATE_OBS) {
        let utc = parse_observation_time(date_obs).ok_or_else(|| Error::Timestamp {
            file: file.to_string(),
            value: date_obs.clone(),
        })?;
        let local = utc.with_timezone(&tz);
        out.insert(attr::D_LOCALDT, local.format("%Y-%m-%dT%H:%M:%S%:z").to_string());
        out.insert(attr::D_LOCALDATE, local.format("%Y-%m-%d").to_string());
        out.insert(attr::D_LOCALTIME, local.format("%H:%M:%S").to_string());
        out.insert(attr::D_NIGHT, night_of(&local).format("%Y-%m-%d").to_string());
    }

    if let (Some(x), Some(y)) = (raw.get(attr::XBINNING), raw.get(attr::YBINNING)) {
        out.insert(attr::D_BINNING, format!("{}x{}", x.trim(), y.trim()));
    }
    if let Some(kind) = raw.get(attr::IMAGETYP) {
        out.insert(attr::D_IMAGETYP, image_type_label(kind));
    }

    let path = Path::new(file);
    if let Some(name) = path.file_name() {
        out.insert(attr::D_NAME, name.to_string_lossy().to_string());
    }
    if let Some(parent) = path.parent() {
        out.insert(attr::D_PATH, parent.to_string_lossy().to_string());
    }

    Ok(out)
}
