//! Plain-text tables for the terminal

use crate::catalog::calibration::{CalibrationReport, CalibrationStatus};
use crate::state::index::{Index, ProblemGroup, Summary, SUMMARY_MISSING};

/// Marker for absent values in problem listings
const PROBLEM_MARKER: &str = "<!>";

/// Left-aligned columns padded to the widest cell, with a rule under the header
pub fn render_table(headers: &[String], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            if i < widths.len() {
                widths[i] = widths[i].max(cell.chars().count());
            }
        }
    }

    let line = |cells: &[String]| -> String {
        cells
            .iter()
            .zip(&widths)
            .map(|(cell, &w)| format!("{:<w$}", cell, w = w))
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };

    let mut out = line(headers);
    out.push('\n');
    out.push_str(&widths.iter().map(|&w| "-".repeat(w)).collect::<Vec<_>>().join("  "));
    for row in rows {
        out.push('\n');
        out.push_str(&line(row));
    }
    out
}

/// Seconds with thousands separators, e.g. `3,600s`
pub fn format_exposure(seconds: f64) -> String {
    if seconds.fract() != 0.0 {
        return format!("{:.1}s", seconds);
    }
    let digits = format!("{}", seconds.abs() as u64);
    let mut grouped = String::new();
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    if seconds < 0.0 {
        grouped.insert(0, '-');
    }
    format!("{}s", grouped)
}

pub fn summary_table(summary: &Summary) -> String {
    let mut headers = summary.keys.clone();
    headers.push("Files".to_string());
    let with_exposure = summary.rows.iter().any(|r| r.exposure.is_some());
    if with_exposure {
        headers.push("Σ Exp. Time".to_string());
    }

    let rows: Vec<Vec<String>> = summary
        .rows
        .iter()
        .map(|r| {
            let mut cells = r.values.clone();
            cells.push(r.files.to_string());
            if let Some(exposure) = r.exposure {
                cells.push(format_exposure(exposure));
            }
            cells
        })
        .collect();
    render_table(&headers, &rows)
}

/// Aggregate view of a calibration report; missing combinations show no file count
pub fn calibration_table(report: &CalibrationReport) -> String {
    let mut headers = report.attrs.clone();
    headers.push("Status".to_string());
    headers.push("Files".to_string());

    let rows: Vec<Vec<String>> = report
        .counts()
        .into_iter()
        .map(|count| {
            let mut cells: Vec<String> = count
                .values
                .iter()
                .map(|v| v.clone().unwrap_or_else(|| SUMMARY_MISSING.to_string()))
                .collect();
            cells.push(count.status.to_string());
            cells.push(match count.status {
                CalibrationStatus::Available => count.files.to_string(),
                CalibrationStatus::Missing => SUMMARY_MISSING.to_string(),
            });
            cells
        })
        .collect();
    render_table(&headers, &rows)
}

/// Problem rows of one image type, counted per distinct combination
pub fn problem_table(index: &Index, group: &ProblemGroup) -> String {
    let mut columns = group.attrs.clone();
    columns.push("_PATH".to_string());

    let mut combos: Vec<(Vec<String>, usize)> = Vec::new();
    for &row in &group.rows {
        let values: Vec<String> = columns
            .iter()
            .map(|c| index.table().get(row, c).unwrap_or(PROBLEM_MARKER).to_string())
            .collect();
        match combos.iter_mut().find(|(v, _)| *v == values) {
            Some((_, n)) => *n += 1,
            None => combos.push((values, 1)),
        }
    }
    combos.sort_by(|a, b| b.1.cmp(&a.1));

    let mut headers = columns;
    headers.push("Files".to_string());
    let rows: Vec<Vec<String>> = combos
        .into_iter()
        .map(|(mut values, n)| {
            values.push(n.to_string());
            values
        })
        .collect();
    render_table(&headers, &rows)
}
