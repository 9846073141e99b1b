//! Commit staged renames and attribute edits to disk
//!
//! Rows are processed one at a time in table order. Within a row the file
//! operation happens before the header write, which happens before the
//! dirty flag is cleared. A failing row is reported and skipped; the rest
//! of the batch still runs.

use crate::error::{Error, Result};
use crate::fits::header::{check_value, parse_header, HeaderFile};
use crate::state::data::attr;
use crate::state::index::Index;
use crate::state::library::CacheInvalidation;
use chrono::NaiveDate;
use std::fs;
use std::path::{Path, PathBuf};

/// How a staged rename is materialized
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOp {
    /// Copy to the new location and edit the copy; the index keeps the original
    Copy,
    /// Move and edit; the index follows the file
    Move,
    /// Link the new location to the original; headers are never touched
    Symlink,
}

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub op: SyncOp,
    /// Replace files already at a destination
    pub overwrite: bool,
    /// Record renames as a HISTORY line
    pub record_rename: bool,
    /// Attributes written back to headers
    pub mutable: Vec<String>,
}

#[derive(Debug)]
pub struct SyncFailure {
    pub file: PathBuf,
    pub error: Error,
}

#[derive(Debug, Default)]
pub struct SyncReport {
    pub synced: usize,
    pub failures: Vec<SyncFailure>,
    pub cache_invalidated: bool,
}

/// Rows with unsaved edits or a staged rename, in table order
pub fn pending_rows(index: &Index) -> Vec<usize> {
    let table = index.table();
    (0..table.len())
        .filter(|&row| {
            table.is_dirty(row) || table.get(row, attr::NEW_PATH).is_some() || table.get(row, attr::NEW_NAME).is_some()
        })
        .collect()
}

/// Commit every pending row. `today` stamps the HISTORY lines.
pub fn sync(
    index: &mut Index,
    options: &SyncOptions,
    cache: &mut dyn CacheInvalidation,
    today: NaiveDate,
) -> SyncReport {
    let mut report = SyncReport::default();
    let mut stale_cache = false;

    for row in pending_rows(index) {
        let file = index.table().key(row).to_path_buf();
        match sync_row(index, row, options, today) {
            Ok(outcome) => {
                tracing::debug!("Synced {} ({:?})", file.display(), outcome);
                stale_cache |= outcome == RowOutcome::EditedInPlace;
                report.synced += 1;
            }
            Err(error) => {
                tracing::warn!("Failed to sync {}: {}", file.display(), error);
                report.failures.push(SyncFailure { file, error });
            }
        }
    }

    // Headers changed under unchanged paths: the cache cannot notice that on its own
    if stale_cache {
        match cache.invalidate_cache() {
            Ok(()) => report.cache_invalidated = true,
            Err(e) => tracing::warn!("Could not invalidate header cache: {}", e),
        }
    }

    tracing::info!("Synced {} files, {} failures", report.synced, report.failures.len());
    report
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RowOutcome {
    Relocated,
    EditedInPlace,
    Unchanged,
}

fn sync_row(index: &mut Index, row: usize, options: &SyncOptions, today: NaiveDate) -> Result<RowOutcome> {
    let table = index.table();
    let source = table.key(row).to_path_buf();
    let fallback_dir = source.parent().map(Path::to_path_buf).unwrap_or_default();
    let old_dir = table.get(row, attr::D_PATH).map(PathBuf::from).unwrap_or(fallback_dir);
    let old_name = match table.get(row, attr::D_NAME) {
        Some(name) => name.to_string(),
        None => source
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default(),
    };
    let new_dir = table.get(row, attr::NEW_PATH).map(PathBuf::from).unwrap_or_else(|| old_dir.clone());
    let new_name = table.get(row, attr::NEW_NAME).map(str::to_string).unwrap_or_else(|| old_name.clone());
    let edited = table.is_dirty(row);
    if edited && options.op != SyncOp::Symlink {
        for key in &options.mutable {
            if let Some(value) = table.get(row, key) {
                check_value(value)?;
            }
        }
    }

    let renamed = new_dir != old_dir || new_name != old_name;
    let destination = if renamed { new_dir.join(&new_name) } else { source.clone() };

    if renamed {
        if destination.symlink_metadata().is_ok() && !options.overwrite {
            return Err(Error::DestinationExists(destination));
        }
        transfer(options.op, &source, &destination)?;

        let table = index.table_mut();
        table.set(row, attr::NEW_PATH, None);
        table.set(row, attr::NEW_NAME, None);
        if options.op == SyncOp::Move {
            // rows are keyed by location
            table.set_key(row, destination.clone());
            table.set(row, attr::D_PATH, Some(new_dir.to_string_lossy().to_string()));
            table.set(row, attr::D_NAME, Some(new_name.clone()));
        }
    }

    if options.op == SyncOp::Symlink {
        // the link shares the original's header, so edits stay pending
        // until they are saved in place
        if edited {
            let on_disk = parse_header(&source)?;
            if field_changes(index, row, &options.mutable, &on_disk).is_empty() {
                index.table_mut().set_dirty(row, false);
            }
        }
        return Ok(if renamed { RowOutcome::Relocated } else { RowOutcome::Unchanged });
    }

    let note_rename = renamed && options.record_rename && new_name != old_name;
    let mut wrote_edits = false;
    if note_rename || edited {
        let mut header = HeaderFile::open(&destination)?;
        let changes = if edited {
            field_changes(index, row, &options.mutable, &header.entries()?)
        } else {
            Vec::new()
        };
        if note_rename {
            header.add_history_line(&format!("({}) filename: {} -> {}", today, old_name, new_name))?;
        }
        for change in &changes {
            write_change(&mut header, change, index.missing_label(), today)?;
        }
        wrote_edits = !changes.is_empty();
        header.flush()?;
    }

    index.table_mut().set_dirty(row, false);

    Ok(if renamed {
        RowOutcome::Relocated
    } else if wrote_edits {
        RowOutcome::EditedInPlace
    } else {
        RowOutcome::Unchanged
    })
}

/// A mutable attribute whose table value differs from the file
#[derive(Debug, Clone, PartialEq)]
struct FieldChange {
    key: String,
    old: Option<String>,
    new: Option<String>,
}

fn field_changes(index: &Index, row: usize, mutable: &[String], on_disk: &[(String, String)]) -> Vec<FieldChange> {
    let table = index.table();
    mutable
        .iter()
        .filter_map(|key| {
            let old = on_disk.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone());
            let new = table.get(row, key).map(str::to_string);
            (old != new).then(|| FieldChange {
                key: key.clone(),
                old,
                new,
            })
        })
        .collect()
}

/// Record one change as a HISTORY line, then apply it
fn write_change(header: &mut HeaderFile, change: &FieldChange, missing: &str, today: NaiveDate) -> Result<()> {
    let shown = |v: &Option<String>| v.clone().unwrap_or_else(|| missing.to_string());
    header.add_history_line(&format!(
        "({}) {}: {} -> {}",
        today,
        change.key,
        shown(&change.old),
        shown(&change.new)
    ))?;
    match &change.new {
        Some(value) => header.set_fields([(change.key.as_str(), value.as_str())]),
        None => header.remove_field(&change.key).map(|_| ()),
    }
}

fn transfer(op: SyncOp, source: &Path, destination: &Path) -> Result<()> {
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent)?;
    }
    match op {
        SyncOp::Copy => {
            fs::copy(source, destination)?;
        }
        SyncOp::Move => {
            if let Err(e) = fs::rename(source, destination) {
                // rename cannot cross filesystems
                tracing::debug!("rename failed ({}), copying {} instead", e, source.display());
                fs::copy(source, destination)?;
                fs::remove_file(source)?;
            }
        }
        SyncOp::Symlink => {
            if destination.symlink_metadata().is_ok() {
                fs::remove_file(destination)?;
            }
            symlink(source, destination)?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn symlink(source: &Path, destination: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(source, destination)
}

#[cfg(windows)]
fn symlink(source: &Path, destination: &Path) -> std::io::Result<()> {
    std::os::windows::fs::symlink_file(source, destination)
}
