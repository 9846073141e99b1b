//! Schema-less row store for the catalog
//!
//! One row per FITS file, keyed by its path. Columns are created on demand
//! and every cell is `Option<String>`: `None` is the explicit "absent" marker,
//! distinct from any header value including the empty string.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Column names with meaning to the catalog
pub mod attr {
    pub const IMAGETYP: &str = "IMAGETYP";
    pub const DATE_OBS: &str = "DATE-OBS";
    pub const CCD_TEMP: &str = "CCD-TEMP";
    pub const EXPTIME: &str = "EXPTIME";
    pub const GAIN: &str = "GAIN";
    pub const OFFSET: &str = "OFFSET";
    pub const XBINNING: &str = "XBINNING";
    pub const YBINNING: &str = "YBINNING";
    pub const RA: &str = "RA";
    pub const DEC: &str = "DEC";
    pub const OBJECT: &str = "OBJECT";
    pub const FILTER: &str = "FILTER";
    pub const SESSION: &str = "SESSION";

    // Derived at load time
    pub const D_CCDTEMP: &str = "_CCDTEMP";
    pub const D_GAIN: &str = "_GAIN";
    pub const D_OFFSET: &str = "_OFFSET";
    pub const D_RA: &str = "_RA";
    pub const D_DEC: &str = "_DEC";
    pub const D_LOCALDT: &str = "_LOCALDT";
    pub const D_LOCALDATE: &str = "_LOCALDATE";
    pub const D_LOCALTIME: &str = "_LOCALTIME";
    pub const D_NIGHT: &str = "_NIGHT";
    pub const D_BINNING: &str = "_BINNING";
    pub const D_IMAGETYP: &str = "_IMAGETYP";
    pub const D_NAME: &str = "_NAME";
    pub const D_PATH: &str = "_PATH";

    // Staged by the reorganize planner, consumed by sync
    pub const NEW_NAME: &str = "_NEWNAME";
    pub const NEW_PATH: &str = "_NEWPATH";

    /// Free-text keys never pivoted into columns
    pub const FREE_TEXT: [&str; 3] = ["COMMENT", "HISTORY", "NOTE"];
}

/// Column-oriented table of header attributes
#[derive(Debug, Clone, Default)]
pub struct Table {
    keys: Vec<PathBuf>,
    columns: BTreeMap<String, Vec<Option<String>>>,
    dirty: Vec<bool>,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Append a row; unknown attributes become new columns
    pub fn push_row<I, K>(&mut self, key: PathBuf, fields: I) -> usize
    where
        I: IntoIterator<Item = (K, Option<String>)>,
        K: Into<String>,
    {
        let row = self.keys.len();
        self.keys.push(key);
        self.dirty.push(false);
        for column in self.columns.values_mut() {
            column.push(None);
        }
        for (name, value) in fields {
            let name: String = name.into();
            self.set(row, &name, value);
        }
        row
    }

    pub fn keys(&self) -> &[PathBuf] {
        &self.keys
    }

    pub fn key(&self, row: usize) -> &Path {
        &self.keys[row]
    }

    pub fn set_key(&mut self, row: usize, key: PathBuf) {
        self.keys[row] = key;
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    /// Column names in sorted order
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    /// Create an all-absent column if it does not exist yet
    pub fn ensure_column(&mut self, name: &str) {
        if !self.columns.contains_key(name) {
            self.columns.insert(name.to_string(), vec![None; self.keys.len()]);
        }
    }

    /// Cell value; `None` when absent or when the column does not exist
    pub fn get(&self, row: usize, name: &str) -> Option<&str> {
        self.columns.get(name)?.get(row)?.as_deref()
    }

    pub fn set(&mut self, row: usize, name: &str, value: Option<String>) {
        self.ensure_column(name);
        if let Some(column) = self.columns.get_mut(name) {
            column[row] = value;
        }
    }

    /// Values of `names` for one row, in order
    pub fn project(&self, row: usize, names: &[String]) -> Vec<Option<String>> {
        names
            .iter()
            .map(|name| self.get(row, name).map(str::to_string))
            .collect()
    }

    pub fn is_dirty(&self, row: usize) -> bool {
        self.dirty[row]
    }

    pub fn set_dirty(&mut self, row: usize, dirty: bool) {
        self.dirty[row] = dirty;
    }

    pub fn dirty_rows(&self) -> Vec<usize> {
        (0..self.len()).filter(|&row| self.dirty[row]).collect()
    }
}
