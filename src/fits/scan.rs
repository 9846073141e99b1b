//! FITS file discovery and header extraction

use super::header::parse_header;
use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use walkdir::{DirEntry, WalkDir};

/// Name prefixes of Siril preprocessing outputs
const SIRIL_PREFIXES: [&str; 2] = ["r_", "pp_"];

/// One parsed header field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderEntry {
    pub file: String,
    pub key: String,
    pub value: String,
}

impl HeaderEntry {
    pub fn new(file: impl Into<String>, key: impl Into<String>, value: impl Into<String>) -> Self {
        HeaderEntry {
            file: file.into(),
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Header fields of every readable file, plus the files that could not be read
#[derive(Debug, Clone, Default)]
pub struct ParsedHeaders {
    pub entries: Vec<HeaderEntry>,
    pub skipped: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    /// Only keep files modified within this many days
    pub days_old: Option<u64>,
    /// Keep Siril preprocessing outputs (r_*, pp_*)
    pub allow_siril: bool,
}

/// Recursively find `*.fit*` files under `root`.
///
/// Symlinks are never followed or returned.
pub fn find_fits(root: &Path, options: &ScanOptions) -> Result<Vec<PathBuf>> {
    if !root.is_dir() {
        return Err(Error::Validation(format!("Not a directory: {}", root.display())));
    }

    let cutoff = options
        .days_old
        .map(|days| SystemTime::now() - Duration::from_secs(days * 24 * 60 * 60));

    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("Error accessing entry: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_file() || !is_candidate(&entry, options.allow_siril) {
            continue;
        }
        if let Some(cutoff) = cutoff {
            let modified = entry.metadata().ok().and_then(|m| m.modified().ok());
            if !modified.is_some_and(|m| m >= cutoff) {
                continue;
            }
        }
        files.push(entry.into_path());
    }

    files.sort();
    tracing::info!("Found {} FITS files under {}", files.len(), root.display());
    Ok(files)
}

fn is_candidate(entry: &DirEntry, allow_siril: bool) -> bool {
    let name = entry.file_name().to_string_lossy();
    let is_fits = entry
        .path()
        .extension()
        .map(|ext| ext.to_string_lossy().to_lowercase().starts_with("fit"))
        .unwrap_or(false);
    is_fits && (allow_siril || !SIRIL_PREFIXES.iter().any(|p| name.starts_with(p)))
}

/// Parse the primary header of every file.
///
/// Unreadable files are logged and collected in `skipped`; they never abort the batch.
pub fn parse_files(files: &[PathBuf]) -> ParsedHeaders {
    let mut parsed = ParsedHeaders::default();
    for path in files {
        let file = path.to_string_lossy().to_string();
        match parse_header(path) {
            Ok(pairs) => parsed
                .entries
                .extend(pairs.into_iter().map(|(k, v)| HeaderEntry::new(file.clone(), k, v))),
            Err(e) => {
                tracing::info!("Could not parse header for {}: {}", file, e);
                parsed.skipped.push(file);
            }
        }
    }
    tracing::info!(
        "Parsed {} headers, skipped {} files",
        files.len() - parsed.skipped.len(),
        parsed.skipped.len()
    );
    parsed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fits::header::testing::write_fixture;
    use std::fs;

    #[test]
    fn test_find_fits_filters_names() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write_fixture(&root.join("a/light_001.fits"), &[]);
        write_fixture(&root.join("a/b/dark.FIT"), &[]);
        write_fixture(&root.join("r_light.fits"), &[]);
        write_fixture(&root.join("pp_light.fits"), &[]);
        fs::write(root.join("notes.txt"), "x").unwrap();

        let files = find_fits(root, &ScanOptions::default()).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|f| f.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names.len(), 2);
        assert!(names.contains(&"light_001.fits".to_string()));
        assert!(names.contains(&"dark.FIT".to_string()));

        let options = ScanOptions {
            allow_siril: true,
            ..Default::default()
        };
        assert_eq!(find_fits(root, &options).unwrap().len(), 4);
    }

    #[cfg(unix)]
    #[test]
    fn test_find_fits_skips_symlinks() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write_fixture(&root.join("light.fits"), &[]);
        std::os::unix::fs::symlink(root.join("light.fits"), root.join("link.fits")).unwrap();

        let files = find_fits(root, &ScanOptions::default()).unwrap();
        assert_eq!(files, vec![root.join("light.fits")]);
    }

    #[test]
    fn test_find_fits_rejects_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(find_fits(&dir.path().join("nope"), &ScanOptions::default()).is_err());
    }

    #[test]
    fn test_parse_files_collects_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.fits");
        let bad = dir.path().join("bad.fits");
        write_fixture(&good, &[("OBJECT", "M 31")]);
        fs::write(&bad, b"garbage").unwrap();

        let parsed = parse_files(&[good.clone(), bad.clone()]);
        assert_eq!(parsed.skipped, vec![bad.to_string_lossy().to_string()]);
        assert!(parsed
            .entries
            .contains(&HeaderEntry::new(good.to_string_lossy(), "OBJECT", "M 31")));
        assert!(parsed.entries.iter().all(|e| e.file == good.to_string_lossy()));
    }
}
