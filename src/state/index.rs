//! The in-memory catalog session
//!
//! Owns the one-row-per-file table, the active row mask, the selected
//! attribute list and a bounded stack of earlier masks. Every catalog
//! operation takes the index by reference; nothing here touches the disk.

use super::data::{attr, Table};
use super::derive::derive;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::fits::scan::HeaderEntry;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};

/// Derived and workflow columns every table carries
const BUILTIN_COLUMNS: [&str; 15] = [
    attr::D_CCDTEMP,
    attr::D_GAIN,
    attr::D_OFFSET,
    attr::D_RA,
    attr::D_DEC,
    attr::D_LOCALDT,
    attr::D_LOCALDATE,
    attr::D_LOCALTIME,
    attr::D_NIGHT,
    attr::D_BINNING,
    attr::D_IMAGETYP,
    attr::D_NAME,
    attr::D_PATH,
    attr::NEW_NAME,
    attr::NEW_PATH,
];

/// One distinct value of an attribute over the masked rows
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueCount {
    /// `None` stands for rows where the attribute is absent
    pub value: Option<String>,
    pub nfiles: usize,
    /// Distinct combinations of the other selected attributes among those files
    pub ncombos: usize,
}

/// Grouped file counts over the masked rows
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub keys: Vec<String>,
    pub rows: Vec<SummaryRow>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SummaryRow {
    pub values: Vec<String>,
    pub files: usize,
    /// Summed exposure in seconds; only when EXPTIME is not a grouping key
    pub exposure: Option<f64>,
}

/// Masked rows of one image type that lack a core attribute
#[derive(Debug, Clone, PartialEq)]
pub struct ProblemGroup {
    pub image_type: String,
    pub attrs: Vec<String>,
    pub rows: Vec<usize>,
}

/// Placeholder for absent values in summaries
pub const SUMMARY_MISSING: &str = "~";

const PROBLEM_EXCEPTIONS: [&str; 4] = ["_GAIN_OFFSET", attr::IMAGETYP, attr::D_IMAGETYP, attr::DATE_OBS];

#[derive(Debug, Clone)]
pub struct Index {
    table: Table,
    mask: Vec<bool>,
    selected: Vec<String>,
    mask_stack: Vec<Vec<bool>>,
    stack_limit: usize,
    root_dir: PathBuf,
    missing_label: String,
}

impl Index {
    /// Build the table from parsed header triples.
    ///
    /// Rows whose derived attributes cannot be computed are left out and
    /// their errors returned alongside the index; they never abort the load.
    pub fn build(entries: &[HeaderEntry], root_dir: &Path, config: &Config) -> (Index, Vec<Error>) {
        let mut order: Vec<&str> = Vec::new();
        let mut raw: HashMap<&str, BTreeMap<String, String>> = HashMap::new();
        for entry in entries {
            let key = entry.key.trim();
            if key.is_empty() || attr::FREE_TEXT.contains(&key) {
                continue;
            }
            let fields = raw.entry(entry.file.as_str()).or_insert_with(|| {
                order.push(entry.file.as_str());
                BTreeMap::new()
            });
            fields.insert(key.to_string(), entry.value.clone());
        }

        let mut table = Table::new();
        let mut failures = Vec::new();
        for file in order {
            let Some(fields) = raw.remove(file) else { continue };
            match derive(file, &fields, config.timezone) {
                Ok(derived) => {
                    let cells = fields
                        .into_iter()
                        .map(|(k, v)| (k, Some(v)))
                        .chain(derived.into_iter().map(|(k, v)| (k.to_string(), Some(v))));
                    table.push_row(PathBuf::from(file), cells);
                }
                Err(e) => {
                    tracing::warn!("Skipping {}: {}", file, e);
                    failures.push(e);
                }
            }
        }

        for name in config.required.iter().chain(&config.mutable) {
            table.ensure_column(name);
        }
        for name in BUILTIN_COLUMNS {
            table.ensure_column(name);
        }

        let mut index = Index {
            mask: vec![true; table.len()],
            table,
            selected: Vec::new(),
            mask_stack: Vec::new(),
            stack_limit: config.mask_history,
            root_dir: root_dir.to_path_buf(),
            missing_label: config.missing_label.clone(),
        };

        let filled = index.fill_sessions(false);
        if filled > 0 {
            tracing::info!("Filled SESSION from the observing night for {} files", filled);
        }
        index.set_selected_attrs(&config.defaults);
        tracing::info!("Indexed {} files ({} failed)", index.len(), failures.len());

        (index, failures)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    pub(crate) fn table_mut(&mut self) -> &mut Table {
        &mut self.table
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    pub fn missing_label(&self) -> &str {
        &self.missing_label
    }

    /// Display text for a cell, using the missing label for absent values
    pub fn display_value<'a>(&'a self, value: Option<&'a str>) -> &'a str {
        value.unwrap_or(&self.missing_label)
    }

    // ---- Row mask

    pub fn mask(&self) -> &[bool] {
        &self.mask
    }

    /// Replace the row mask. A wrong-length mask is rejected and the current one kept.
    pub fn set_mask(&mut self, mask: Vec<bool>) -> Result<()> {
        if mask.len() != self.table.len() {
            return Err(Error::LengthMismatch {
                expected: self.table.len(),
                actual: mask.len(),
            });
        }
        if !mask.iter().any(|&m| m) {
            tracing::warn!("No rows selected");
        }
        self.mask = mask;
        Ok(())
    }

    pub fn reset_mask(&mut self) {
        self.mask = vec![true; self.table.len()];
    }

    pub fn invert_mask(&mut self) {
        for m in self.mask.iter_mut() {
            *m = !*m;
        }
        if !self.mask.iter().any(|&m| m) {
            tracing::warn!("No rows selected");
        }
    }

    pub fn is_fully_selected(&self) -> bool {
        self.mask.iter().all(|&m| m)
    }

    pub fn masked_rows(&self) -> Vec<usize> {
        (0..self.mask.len()).filter(|&row| self.mask[row]).collect()
    }

    pub fn masked_count(&self) -> usize {
        self.mask.iter().filter(|&&m| m).count()
    }

    /// Paths of the masked rows
    pub fn files(&self) -> Vec<&Path> {
        self.masked_rows().into_iter().map(|row| self.table.key(row)).collect()
    }

    /// A mask selecting exactly the rows keyed by `files`
    pub fn mask_from_files(&self, files: &[PathBuf]) -> Vec<bool> {
        let wanted: HashSet<&Path> = files.iter().map(PathBuf::as_path).collect();
        self.table.keys().iter().map(|k| wanted.contains(k.as_path())).collect()
    }

    /// Push the current mask; the oldest entry is dropped once the stack is full
    pub fn stash_mask(&mut self) {
        self.mask_stack.push(self.mask.clone());
        if self.mask_stack.len() > self.stack_limit {
            self.mask_stack.remove(0);
        }
    }

    /// Restore the most recently stashed mask
    pub fn pop_mask(&mut self) -> Result<()> {
        let mask = self.mask_stack.pop().ok_or(Error::EmptyStack)?;
        self.mask = mask;
        Ok(())
    }

    /// Number of rows the most recent stashed mask selects
    pub fn prior_selection_size(&self) -> Option<usize> {
        self.mask_stack.last().map(|m| m.iter().filter(|&&v| v).count())
    }

    // ---- Selected attributes

    pub fn selected_attrs(&self) -> &[String] {
        &self.selected
    }

    /// Replace the selected attributes, de-duplicated in first-occurrence order.
    ///
    /// Names that are not columns are dropped with a warning.
    pub fn set_selected_attrs(&mut self, names: &[String]) {
        let mut seen = HashSet::new();
        let mut selected = Vec::new();
        let mut dropped = Vec::new();
        for name in names {
            if !seen.insert(name.as_str()) {
                continue;
            }
            if self.table.has_column(name) {
                selected.push(name.clone());
            } else {
                dropped.push(name.as_str());
            }
        }
        if !dropped.is_empty() {
            tracing::warn!("Some attrs skipped as they were not present in any headers: {:?}", dropped);
        }
        if selected.is_empty() {
            tracing::warn!("No attrs selected");
        }
        self.selected = selected;
    }

    /// Append attributes to the selection, keeping the existing order
    pub fn add_selected_attrs(&mut self, names: &[&str]) {
        let mut all = self.selected.clone();
        all.extend(names.iter().map(|n| n.to_string()));
        self.set_selected_attrs(&all);
    }

    /// Every column, `defaults` first in their given order, then the rest sorted
    pub fn all_attrs(&self, defaults: &[String]) -> Vec<String> {
        let mut attrs: Vec<String> = defaults
            .iter()
            .filter(|d| self.table.has_column(d))
            .cloned()
            .collect();
        let mut seen: HashSet<String> = attrs.iter().cloned().collect();
        for name in self.table.column_names() {
            if seen.insert(name.to_string()) {
                attrs.push(name.to_string());
            }
        }
        attrs
    }

    // ---- Facets

    /// Distinct values of `attr` over the masked rows, in first-occurrence order.
    ///
    /// File counts across the returned values always sum to the masked row count.
    pub fn values_for_attr(&self, name: &str) -> Result<Vec<ValueCount>> {
        if !self.table.has_column(name) {
            return Err(Error::UnknownAttribute(name.to_string()));
        }
        let others: Vec<String> = self.selected.iter().filter(|s| *s != name).cloned().collect();

        let mut order: Vec<Option<String>> = Vec::new();
        let mut groups: HashMap<Option<String>, (usize, HashSet<Vec<Option<String>>>)> = HashMap::new();
        for row in self.masked_rows() {
            let value = self.table.get(row, name).map(str::to_string);
            let group = groups.entry(value.clone()).or_insert_with(|| {
                order.push(value);
                (0, HashSet::new())
            });
            group.0 += 1;
            group.1.insert(self.table.project(row, &others));
        }

        Ok(order
            .into_iter()
            .filter_map(|value| {
                let (nfiles, combos) = groups.remove(&value)?;
                Some(ValueCount {
                    value,
                    nfiles,
                    ncombos: combos.len(),
                })
            })
            .collect())
    }

    // ---- Edits

    /// Set `attr` on every masked row whose value differs, marking those rows dirty.
    ///
    /// `None` clears the attribute. Returns the number of rows changed.
    pub fn change_attr(&mut self, name: &str, value: Option<String>) -> usize {
        self.table.ensure_column(name);
        let mut changed = 0;
        for row in self.masked_rows() {
            if self.table.get(row, name) != value.as_deref() {
                self.table.set(row, name, value.clone());
                self.table.set_dirty(row, true);
                changed += 1;
            }
        }
        if !self.selected.iter().any(|s| s == name) {
            self.add_selected_attrs(&[name]);
        }
        tracing::debug!("Changed {} on {} files", name, changed);
        changed
    }

    /// Rows with unsaved changes
    pub fn changed_rows(&self) -> Vec<usize> {
        self.table.dirty_rows()
    }

    pub fn has_missing_sessions(&self) -> bool {
        (0..self.table.len()).any(|row| self.table.get(row, attr::SESSION).is_none())
    }

    /// Set SESSION from the observing night where it is missing; returns the rows filled
    pub fn fill_missing_sessions(&mut self) -> usize {
        self.fill_sessions(true)
    }

    fn fill_sessions(&mut self, log: bool) -> usize {
        let mut filled = 0;
        for row in 0..self.table.len() {
            if self.table.get(row, attr::SESSION).is_some() {
                continue;
            }
            if let Some(night) = self.table.get(row, attr::D_NIGHT).map(str::to_string) {
                self.table.set(row, attr::SESSION, Some(night));
                self.table.set_dirty(row, true);
                filled += 1;
            }
        }
        if log {
            tracing::debug!("Filled SESSION for {} files", filled);
        }
        filled
    }

    /// True when a relocation or rename is staged but not yet synced
    pub fn has_staged_relocation(&self) -> bool {
        (0..self.table.len()).any(|row| {
            self.table.get(row, attr::NEW_PATH).is_some() || self.table.get(row, attr::NEW_NAME).is_some()
        })
    }

    // ---- Reporting

    /// File counts over the masked rows grouped by the selected attributes.
    ///
    /// Bias and dark frames blank OBJECT and FILTER; flats blank CCD-TEMP and
    /// OBJECT. With no selection, `defaults` minus `_PATH` and `EXPTIME` group.
    pub fn summary(&self, defaults: &[String]) -> Summary {
        let keys: Vec<String> = if self.selected.is_empty() {
            defaults
                .iter()
                .filter(|d| d.as_str() != attr::D_PATH && d.as_str() != attr::EXPTIME)
                .cloned()
                .collect()
        } else {
            self.selected.clone()
        };
        let sum_exposure = !keys.iter().any(|k| k == attr::EXPTIME);

        let mut order: Vec<Vec<String>> = Vec::new();
        let mut groups: HashMap<Vec<String>, (usize, f64)> = HashMap::new();
        for row in self.masked_rows() {
            let blanked: &[&str] = match self.table.get(row, attr::D_IMAGETYP) {
                Some("bias") | Some("dark") => &[attr::OBJECT, attr::FILTER],
                Some("flat") => &[attr::CCD_TEMP, attr::OBJECT],
                _ => &[],
            };
            let values: Vec<String> = keys
                .iter()
                .map(|k| match self.table.get(row, k) {
                    Some(v) if !blanked.contains(&k.as_str()) => v.to_string(),
                    _ => SUMMARY_MISSING.to_string(),
                })
                .collect();
            let exposure = self
                .table
                .get(row, attr::EXPTIME)
                .and_then(|v| v.trim().parse::<f64>().ok())
                .unwrap_or(0.0);
            let group = groups.entry(values.clone()).or_insert_with(|| {
                order.push(values);
                (0, 0.0)
            });
            group.0 += 1;
            group.1 += exposure;
        }

        let mut rows: Vec<SummaryRow> = order
            .into_iter()
            .filter_map(|values| {
                let (files, exposure) = groups.remove(&values)?;
                Some(SummaryRow {
                    values,
                    files,
                    exposure: sum_exposure.then_some(exposure),
                })
            })
            .collect();
        rows.sort_by(|a, b| {
            b.files.cmp(&a.files).then_with(|| {
                let (a, b) = (a.exposure.unwrap_or(0.0), b.exposure.unwrap_or(0.0));
                b.total_cmp(&a)
            })
        });

        Summary { keys, rows }
    }

    /// Masked rows missing any attribute their image type needs for calibration or cataloging
    pub fn problem_files(&self, config: &Config) -> Vec<ProblemGroup> {
        let mut order: Vec<Option<String>> = Vec::new();
        let mut by_type: HashMap<Option<String>, Vec<usize>> = HashMap::new();
        for row in self.masked_rows() {
            let kind = self.table.get(row, attr::D_IMAGETYP).map(str::to_string);
            by_type
                .entry(kind.clone())
                .or_insert_with(|| {
                    order.push(kind);
                    Vec::new()
                })
                .push(row);
        }

        let mut groups = Vec::new();
        for kind in order {
            let Some(rows) = by_type.remove(&kind) else { continue };
            let (image_type, attrs) = match &kind {
                Some(kind) => (kind.clone(), core_attrs(config, kind)),
                None => (self.missing_label.clone(), vec![attr::IMAGETYP.to_string()]),
            };
            let problems: Vec<usize> = rows
                .into_iter()
                .filter(|&row| attrs.iter().any(|a| self.table.get(row, a).is_none()))
                .collect();
            if !problems.is_empty() {
                groups.push(ProblemGroup {
                    image_type,
                    attrs,
                    rows: problems,
                });
            }
        }
        groups
    }
}

/// Attributes an image type needs: its calibration attrs, then its catalog path and name
fn core_attrs(config: &Config, kind: &str) -> Vec<String> {
    let mut attrs: Vec<String> = Vec::new();
    if let Some(req) = config.calibration.get(kind) {
        attrs.extend(req.attrs.iter().cloned());
    }
    if let Some(template) = config.catalog.resolve(kind) {
        attrs.extend(template.path);
        attrs.extend(template.name);
    }
    let mut seen = HashSet::new();
    attrs.retain(|a| !PROBLEM_EXCEPTIONS.contains(&a.as_str()) && seen.insert(a.clone()));
    attrs
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    pub(crate) fn entries(rows: &[(&str, &[(&str, &str)])]) -> Vec<HeaderEntry> {
        rows.iter()
            .flat_map(|(file, fields)| fields.iter().map(move |(k, v)| HeaderEntry::new(*file, *k, *v)))
            .collect()
    }

    /// An index over the given rows with the built-in configuration
    pub(crate) fn index(rows: &[(&str, &[(&str, &str)])]) -> Index {
        let config = Config::builtin().unwrap();
        let (index, failures) = Index::build(&entries(rows), Path::new("/data"), &config);
        assert!(failures.is_empty());
        index
    }
}
