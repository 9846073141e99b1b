//! Reorganize planning
//!
//! Computes a new directory and file name for each masked row from the
//! template of its image type and stages them in `_NEWPATH` / `_NEWNAME`.
//! Nothing here touches the filesystem; `sync` commits the plan.

use crate::config::TemplateSet;
use crate::error::{Error, Result};
use crate::state::data::attr;
use crate::state::index::Index;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

/// Extension of every planned file name
pub const FITS_EXTENSION: &str = "fits";

/// Name attributes that never split sequence groups
const UNGROUPED: [&str; 2] = [attr::DATE_OBS, "_SEQNO"];

/// Path attributes rendered as `<key>-<value>`
const KEYED_DIRS: [&str; 3] = ["binning", "gain", "offset"];

/// Short key of an attribute: lowercase without leading/trailing underscores
fn attr_key(name: &str) -> String {
    name.to_lowercase().trim_matches('_').to_string()
}

/// Display form of a raw value; exposure times carry a unit
fn render_value(name: &str, value: &str) -> String {
    if name == attr::EXPTIME {
        if let Ok(seconds) = value.trim().parse::<f64>() {
            return format!("{}s", seconds);
        }
    }
    value.to_string()
}

/// One component of a file name: separators become hyphens, gain/offset values are prefixed
fn name_part(name: &str, value: Option<&str>) -> String {
    let part = match value {
        Some(value) => render_value(name, value),
        None => format!("unknown-{}", attr_key(name)),
    };
    let part: String = part
        .trim()
        .chars()
        .map(|c| if c.is_whitespace() || matches!(c, ':' | '_' | '/' | '\\') { '-' } else { c })
        .collect();
    if value.is_some() && (name == attr::D_GAIN || name == attr::D_OFFSET) {
        format!("{}{}", attr_key(name), part)
    } else {
        part
    }
}

/// One directory component; absent values become an explicit placeholder
fn dir_part(name: &str, value: Option<&str>, missing_label: &str) -> String {
    let key = attr_key(name);
    let value = match value {
        Some(v) if !v.trim().is_empty() && v != missing_label => render_value(name, v),
        _ => return format!("unknown {}", key),
    };
    let value = value.replace(['/', '\\'], "-");
    if KEYED_DIRS.contains(&key.as_str()) {
        format!("{}-{}", key, value.replace(' ', ""))
    } else {
        value
    }
}

/// Dense rank of each date among `dates`: equal dates share a rank, no gaps.
///
/// Absent dates rank after every present one.
pub fn dense_rank(dates: &[Option<&str>]) -> Vec<usize> {
    let distinct: BTreeSet<(bool, Option<&str>)> = dates.iter().map(|d| (d.is_none(), *d)).collect();
    let ranks: HashMap<(bool, Option<&str>), usize> =
        distinct.into_iter().enumerate().map(|(i, key)| (key, i + 1)).collect();
    dates.iter().map(|d| ranks[&(d.is_none(), *d)]).collect()
}

/// Stage new paths and names for the masked rows under `root`.
///
/// Fails with `PendingRelocation` when an earlier plan has not been synced.
/// Returns the number of rows staged.
pub fn plan(index: &mut Index, templates: &TemplateSet, root: &Path) -> Result<usize> {
    if index.has_staged_relocation() {
        return Err(Error::PendingRelocation);
    }

    let mut order: Vec<String> = Vec::new();
    let mut by_type: HashMap<String, Vec<usize>> = HashMap::new();
    for row in index.masked_rows() {
        let Some(kind) = index.table().get(row, attr::D_IMAGETYP).map(str::to_string) else {
            tracing::warn!("Skipping {}: no image type", index.table().key(row).display());
            continue;
        };
        by_type
            .entry(kind.clone())
            .or_insert_with(|| {
                order.push(kind);
                Vec::new()
            })
            .push(row);
    }

    let missing_label = index.missing_label().to_string();
    let mut staged = 0;
    for kind in order {
        let rows = by_type.remove(&kind).unwrap_or_default();
        let Some(template) = templates.resolve(&kind) else {
            tracing::warn!("No template for image type '{}', {} files left in place", kind, rows.len());
            continue;
        };

        let seqno = sequence_numbers(index, &rows, &template.name);

        for (i, &row) in rows.iter().enumerate() {
            let table = index.table();
            let new_name = (!template.name.is_empty()).then(|| {
                let parts: Vec<String> = template
                    .name
                    .iter()
                    .map(|name| name_part(name, table.get(row, name)))
                    .chain(std::iter::once(format!("{:03}", seqno[i])))
                    .collect();
                format!("{}.{}", parts.join("_"), FITS_EXTENSION)
            });
            let new_path: PathBuf = template
                .path
                .iter()
                .fold(root.to_path_buf(), |path, name| path.join(dir_part(name, table.get(row, name), &missing_label)));

            let table = index.table_mut();
            table.set(row, attr::NEW_NAME, new_name);
            table.set(row, attr::NEW_PATH, Some(new_path.to_string_lossy().to_string()));
            table.set_dirty(row, true);
            staged += 1;
        }
    }

    tracing::info!("Planned new locations for {} files under {}", staged, root.display());
    Ok(staged)
}

/// Sequence numbers for `rows`: grouped by the name attributes, dense-ranked by DATE-OBS
fn sequence_numbers(index: &Index, rows: &[usize], name_attrs: &[String]) -> Vec<usize> {
    let table = index.table();
    let group_attrs: Vec<String> = name_attrs
        .iter()
        .filter(|a| !UNGROUPED.contains(&a.as_str()))
        .cloned()
        .collect();

    let mut groups: HashMap<Vec<Option<String>>, Vec<usize>> = HashMap::new();
    for (i, &row) in rows.iter().enumerate() {
        groups.entry(table.project(row, &group_attrs)).or_default().push(i);
    }

    let mut seqno = vec![0; rows.len()];
    for members in groups.values() {
        let dates: Vec<Option<&str>> = members.iter().map(|&i| table.get(rows[i], attr::DATE_OBS)).collect();
        for (&i, rank) in members.iter().zip(dense_rank(&dates)) {
            seqno[i] = rank;
        }
    }
    seqno
}

/// Stage a move of the masked rows under `destination`, keeping each file's
/// directory relative to the index root.
///
/// Files outside the root are skipped with a warning. Returns the rows staged.
pub fn relocate(index: &mut Index, destination: &Path) -> Result<usize> {
    if index.has_staged_relocation() {
        return Err(Error::PendingRelocation);
    }

    let root = index.root_dir().to_path_buf();
    let mut staged = 0;
    for row in index.masked_rows() {
        let key = index.table().key(row).to_path_buf();
        let relative = match key.strip_prefix(&root) {
            Ok(relative) => relative.parent().unwrap_or(Path::new("")).to_path_buf(),
            Err(_) => {
                tracing::warn!("Skipping {} as it is not in original target directory", key.display());
                continue;
            }
        };
        let new_path = destination.join(relative);
        let table = index.table_mut();
        table.set(row, attr::NEW_PATH, Some(new_path.to_string_lossy().to_string()));
        table.set_dirty(row, true);
        staged += 1;
    }

    tracing::info!("Staged {} files to move under {}", staged, destination.display());
    Ok(staged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::state::index::testing::index;

    fn light(date: &str, filter: &str) -> Vec<(&'static str, String)> {
        vec![
            ("IMAGETYP", "Light Frame".to_string()),
            ("INSTRUME", "ASI2600".to_string()),
            ("OBJECT", "M 31".to_string()),
            ("FILTER", filter.to_string()),
            ("EXPTIME", "300".to_string()),
            ("GAIN", "100".to_string()),
            ("OFFSET", "30".to_string()),
            ("CCD-TEMP", "-9.8".to_string()),
            ("SESSION", "2024-01-06".to_string()),
            ("DATE-OBS", date.to_string()),
        ]
    }

    fn lights(rows: &[(&str, &str, &str)]) -> Index {
        let owned: Vec<(String, Vec<(&str, String)>)> = rows
            .iter()
            .map(|(file, date, filter)| (file.to_string(), light(date, filter)))
            .collect();
        let borrowed: Vec<(&str, Vec<(&str, &str)>)> = owned
            .iter()
            .map(|(file, fields)| (file.as_str(), fields.iter().map(|(k, v)| (*k, v.as_str())).collect()))
            .collect();
        let rows: Vec<(&str, &[(&str, &str)])> = borrowed.iter().map(|(f, v)| (*f, v.as_slice())).collect();
        index(&rows)
    }

    #[test]
    fn test_dense_rank() {
        assert_eq!(dense_rank(&[Some("b"), Some("a"), Some("c")]), vec![2, 1, 3]);
        assert_eq!(dense_rank(&[Some("a"), Some("a"), Some("b")]), vec![1, 1, 2]);
        assert_eq!(dense_rank(&[None, Some("a")]), vec![2, 1]);
    }

    #[test]
    fn test_plan_names_and_paths() {
        let mut idx = lights(&[("/data/x.fits", "2024-01-06T01:00:00", "Ha")]);
        let config = Config::builtin().unwrap();
        let staged = plan(&mut idx, &config.catalog, Path::new("/archive")).unwrap();
        assert_eq!(staged, 1);

        let table = idx.table();
        assert_eq!(
            table.get(0, attr::NEW_NAME),
            Some("light_M-31_Ha_300s_gain100_offset30_-10C_2024-01-06_001.fits")
        );
        assert_eq!(
            table.get(0, attr::NEW_PATH),
            Some("/archive/ASI2600/light/M 31/2024-01-06/Ha")
        );
        assert!(table.is_dirty(0));
    }

    #[test]
    fn test_sequence_numbers_dense_within_groups() {
        let mut idx = lights(&[
            ("/data/a.fits", "2024-01-06T01:00:00", "Ha"),
            ("/data/b.fits", "2024-01-06T01:05:00", "Ha"),
            ("/data/c.fits", "2024-01-06T01:05:00", "Ha"),
            ("/data/d.fits", "2024-01-06T01:10:00", "Ha"),
            ("/data/e.fits", "2024-01-06T01:20:00", "OIII"),
        ]);
        let config = Config::builtin().unwrap();
        plan(&mut idx, &config.catalog, Path::new("/archive")).unwrap();

        let suffixes: Vec<String> = (0..5)
            .map(|row| {
                let name = idx.table().get(row, attr::NEW_NAME).unwrap();
                name.trim_end_matches(".fits").rsplit('_').next().unwrap().to_string()
            })
            .collect();
        assert_eq!(suffixes, vec!["001", "002", "002", "003", "001"]);
    }

    #[test]
    fn test_missing_values_and_empty_name_template() {
        let mut idx = index(&[("/data/dark.fits", &[("IMAGETYP", "Dark Frame"), ("EXPTIME", "60")])]);
        let config = Config::builtin().unwrap();

        plan(&mut idx, &config.siril, Path::new("/siril")).unwrap();
        assert_eq!(idx.table().get(0, attr::NEW_NAME), None);
        assert_eq!(idx.table().get(0, attr::NEW_PATH), Some("/siril/60s/dark"));

        let mut idx = index(&[("/data/dark.fits", &[("IMAGETYP", "Dark Frame"), ("EXPTIME", "60")])]);
        plan(&mut idx, &config.catalog, Path::new("/archive")).unwrap();
        let path = idx.table().get(0, attr::NEW_PATH).unwrap();
        assert_eq!(
            path,
            "/archive/unknown instrume/dark/unknown ccdtemp/unknown binning/unknown gain/unknown offset"
        );
        let name = idx.table().get(0, attr::NEW_NAME).unwrap();
        assert_eq!(name, "dark_60s_unknown-ccdtemp_unknown-gain_unknown-offset_001.fits");
    }

    #[test]
    fn test_pending_plan_blocks_new_plan() {
        let mut idx = lights(&[("/data/x.fits", "2024-01-06T01:00:00", "Ha")]);
        let config = Config::builtin().unwrap();
        plan(&mut idx, &config.catalog, Path::new("/archive")).unwrap();
        assert!(matches!(
            plan(&mut idx, &config.catalog, Path::new("/archive")),
            Err(Error::PendingRelocation)
        ));
        assert!(matches!(relocate(&mut idx, Path::new("/x")), Err(Error::PendingRelocation)));
    }

    #[test]
    fn test_unknown_image_type_left_in_place() {
        let mut idx = index(&[("/data/moon.fits", &[("IMAGETYP", "Lunar")])]);
        let config = Config::builtin().unwrap();
        assert_eq!(plan(&mut idx, &config.catalog, Path::new("/archive")).unwrap(), 0);
        assert!(!idx.has_staged_relocation());
    }

    #[test]
    fn test_relocate_keeps_subtree() {
        let mut idx = index(&[
            ("/data/m31/a.fits", &[("OBJECT", "M 31")]),
            ("/elsewhere/b.fits", &[("OBJECT", "M 42")]),
        ]);
        assert_eq!(relocate(&mut idx, Path::new("/backup")).unwrap(), 1);
        assert_eq!(idx.table().get(0, attr::NEW_PATH), Some("/backup/m31"));
        assert_eq!(idx.table().get(1, attr::NEW_PATH), None);
        assert_eq!(idx.changed_rows(), vec![0]);
    }
}
