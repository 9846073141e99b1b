//! FITS primary header access through cfitsio
//!
//! Reads yield `(keyword, value)` pairs with strings unquoted, logicals as
//! `True`/`False` and numbers in a canonical form. Updates go through
//! cfitsio's keyword routines, which rewrite the header unit and leave the
//! data unit alone.

use crate::error::{Error, Result};
use fitsio::sys;
use fitsio::FitsFile;
use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int};
use std::path::{Path, PathBuf};
use std::ptr;

// cfitsio exports ffc2s (fitsio2.h) but fitsio-sys does not bind it
extern "C" {
    fn ffc2s(instr: *const c_char, outstr: *mut c_char, status: *mut c_int) -> c_int;
}

/// Longest string value one card holds, counted after `'` is doubled
pub const MAX_STRING_LEN: usize = 68;

/// Room for a whole card plus the terminating NUL
const FLEN_CARD: usize = 81;

/// cfitsio status for a keyword that does not exist
const KEY_NO_EXIST: c_int = 202;

/// Keywords whose text lives in the comment field
const COMMENTARY: [&str; 2] = ["COMMENT", "HISTORY"];

/// Check that `value` fits a single string card as-is.
///
/// cfitsio would silently cut anything longer, so it is rejected here.
pub fn check_value(value: &str) -> Result<()> {
    if value.chars().any(|c| !c.is_ascii() || c.is_ascii_control()) {
        return Err(Error::Validation(format!(
            "'{}' has characters a FITS header cannot hold",
            value
        )));
    }
    let escaped = value.len() + value.matches('\'').count();
    if escaped > MAX_STRING_LEN {
        return Err(Error::Validation(format!(
            "value takes {} characters in a header card, at most {} fit",
            escaped, MAX_STRING_LEN
        )));
    }
    Ok(())
}

/// Keyword/value pairs of a file's primary header, HISTORY and COMMENT text included
pub fn parse_header(path: &Path) -> Result<Vec<(String, String)>> {
    let mut fptr = FitsFile::open(path).map_err(|e| fits_error(path, e))?;
    read_entries(&mut fptr, path)
}

/// A primary header opened for update
pub struct HeaderFile {
    path: PathBuf,
    fptr: FitsFile,
}

impl HeaderFile {
    pub fn open(path: &Path) -> Result<Self> {
        let fptr = FitsFile::edit(path).map_err(|e| fits_error(path, e))?;
        Ok(HeaderFile {
            path: path.to_path_buf(),
            fptr,
        })
    }

    pub fn entries(&mut self) -> Result<Vec<(String, String)>> {
        read_entries(&mut self.fptr, &self.path)
    }

    /// Append HISTORY text; cfitsio continues long text on further cards
    pub fn add_history_line(&mut self, text: &str) -> Result<()> {
        let text = c_string(text)?;
        let mut status = 0;
        unsafe {
            sys::ffphis(self.fptr.as_raw(), text.as_ptr(), &mut status);
        }
        check_status(&self.path, status)
    }

    /// Set string keywords, replacing existing cards in place
    pub fn set_fields<'a>(&mut self, fields: impl IntoIterator<Item = (&'a str, &'a str)>) -> Result<()> {
        for (key, value) in fields {
            check_value(value)?;
            let key = c_string(key)?;
            let value = c_string(value)?;
            let mut status = 0;
            unsafe {
                sys::ffukys(
                    self.fptr.as_raw(),
                    key.as_ptr(),
                    value.as_ptr(),
                    ptr::null_mut(),
                    &mut status,
                );
            }
            check_status(&self.path, status)?;
        }
        Ok(())
    }

    /// Delete a keyword; false when it was not there
    pub fn remove_field(&mut self, keyword: &str) -> Result<bool> {
        let key = c_string(keyword)?;
        let mut status = 0;
        unsafe {
            sys::ffdkey(self.fptr.as_raw(), key.as_ptr(), &mut status);
        }
        if status == KEY_NO_EXIST {
            return Ok(false);
        }
        check_status(&self.path, status).map(|_| true)
    }

    /// Write pending changes to disk and close the file
    pub fn flush(mut self) -> Result<()> {
        let mut status = 0;
        unsafe {
            sys::ffflus(self.fptr.as_raw(), &mut status);
        }
        check_status(&self.path, status)
    }
}

fn read_entries(fptr: &mut FitsFile, path: &Path) -> Result<Vec<(String, String)>> {
    let raw = unsafe { fptr.as_raw() };
    let mut status = 0;
    let mut nkeys: c_int = 0;
    let mut more: c_int = 0;
    unsafe {
        sys::ffghsp(raw, &mut nkeys, &mut more, &mut status);
    }
    check_status(path, status)?;

    let mut entries = Vec::with_capacity(nkeys.max(0) as usize);
    for n in 1..=nkeys {
        let mut name = [0 as c_char; FLEN_CARD];
        let mut value = [0 as c_char; FLEN_CARD];
        let mut comment = [0 as c_char; FLEN_CARD];
        unsafe {
            sys::ffgkyn(
                raw,
                n,
                name.as_mut_ptr(),
                value.as_mut_ptr(),
                comment.as_mut_ptr(),
                &mut status,
            );
        }
        check_status(path, status)?;

        let name = c_text(&name).trim().to_string();
        if name.is_empty() {
            continue;
        }
        if COMMENTARY.contains(&name.as_str()) {
            let text = c_text(&comment).trim_end().to_string();
            if !text.is_empty() {
                entries.push((name, text));
            }
            continue;
        }
        if let Some(value) = decode_value(path, &value)? {
            entries.push((name, value));
        }
    }
    Ok(entries)
}

/// Catalog text for a raw value field; None for undefined values
fn decode_value(path: &Path, raw: &[c_char]) -> Result<Option<String>> {
    let text = c_text(raw).trim().to_string();
    if text.is_empty() {
        return Ok(None);
    }

    let mut status = 0;
    let mut kind: c_char = 0;
    unsafe {
        sys::ffdtyp(raw.as_ptr(), &mut kind, &mut status);
    }
    check_status(path, status)?;

    let value = match kind as u8 {
        b'C' => {
            let mut out = [0 as c_char; FLEN_CARD];
            unsafe {
                ffc2s(raw.as_ptr(), out.as_mut_ptr(), &mut status);
            }
            check_status(path, status)?;
            // trailing blanks in a string value are not significant
            c_text(&out).trim_end().to_string()
        }
        b'L' if text == "T" => "True".to_string(),
        b'L' => "False".to_string(),
        _ => normalize_number(&text),
    };
    Ok(Some(value))
}

/// Canonical text for a numeric value ("+300." -> "300", "1.5D2" -> "150")
fn normalize_number(raw: &str) -> String {
    let raw = raw.trim_start_matches('+');
    if let Ok(i) = raw.parse::<i64>() {
        return i.to_string();
    }
    match raw.replace(['D', 'd'], "E").parse::<f64>() {
        Ok(f) => f.to_string(),
        Err(_) => raw.to_string(),
    }
}

fn c_text(buf: &[c_char]) -> String {
    unsafe { CStr::from_ptr(buf.as_ptr()) }.to_string_lossy().to_string()
}

fn c_string(text: &str) -> Result<CString> {
    CString::new(text).map_err(|_| Error::Validation(format!("'{}' contains a NUL byte", text.escape_debug())))
}

fn check_status(path: &Path, status: c_int) -> Result<()> {
    if status == 0 {
        return Ok(());
    }
    let mut text = [0 as c_char; FLEN_CARD];
    unsafe {
        sys::ffgerr(status, text.as_mut_ptr());
    }
    Err(Error::header(path, format!("{} (cfitsio status {})", c_text(&text), status)))
}

fn fits_error(path: &Path, e: fitsio::errors::Error) -> Error {
    Error::header(path, e.to_string())
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use std::fs;

    #[test]
    fn test_read_fixture_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("light.fits");
        write_fixture(
            &path,
            &[("OBJECT", "M 42"), ("EXPTIME", "120"), ("CCD-TEMP", "-9.8"), ("DATE-OBS", "2024-01-05T21:00:00")],
        );

        let entries = parse_header(&path).unwrap();
        assert!(entries.contains(&("OBJECT".to_string(), "M 42".to_string())));
        assert!(entries.contains(&("EXPTIME".to_string(), "120".to_string())));
        assert!(entries.contains(&("CCD-TEMP".to_string(), "-9.8".to_string())));
        assert!(entries.contains(&("SIMPLE".to_string(), "True".to_string())));
    }

    #[test]
    fn test_normalize_number() {
        assert_eq!(normalize_number("300."), "300");
        assert_eq!(normalize_number("+120"), "120");
        assert_eq!(normalize_number("1.5D2"), "150");
        assert_eq!(normalize_number("-9.800000000E+00"), "-9.8");
    }

    #[test]
    fn test_read_rejects_non_fits() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.fits");
        fs::write(&path, vec![b'x'; 2880]).unwrap();
        assert!(matches!(parse_header(&path), Err(Error::Header { .. })));

        let short = dir.path().join("short.fits");
        fs::write(&short, b"SIMPLE  =                    T").unwrap();
        assert!(parse_header(&short).is_err());
    }

    #[test]
    fn test_update_preserves_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dark.fits");
        write_fixture(&path, &[("OBJECT", "dark"), ("FILTER", "L")]);

        let mut file = HeaderFile::open(&path).unwrap();
        file.add_history_line("(2024-02-01) OBJECT: dark -> none").unwrap();
        file.set_fields([("OBJECT", "none"), ("SESSION", "2024-02-01")]).unwrap();
        assert!(file.remove_field("FILTER").unwrap());
        assert!(!file.remove_field("FILTER").unwrap());
        // enough cards to spill into a second header block
        for i in 0..40 {
            file.add_history_line(&format!("line {}", i)).unwrap();
        }
        file.flush().unwrap();

        assert_eq!(read_pixels(&path), fixture_pixels());
        assert_eq!(header_value(&path, "OBJECT").as_deref(), Some("none"));
        assert_eq!(header_value(&path, "SESSION").as_deref(), Some("2024-02-01"));
        assert_eq!(header_value(&path, "FILTER"), None);
        let history = history(&path);
        assert_eq!(history[0], "(2024-02-01) OBJECT: dark -> none");
        assert_eq!(history.len(), 41);
    }

    #[test]
    fn test_set_replaces_existing_card() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flat.fits");
        write_fixture(&path, &[("OBJECT", "flat")]);

        let mut file = HeaderFile::open(&path).unwrap();
        file.set_fields([("OBJECT", "sky flat")]).unwrap();
        assert!(file.entries().unwrap().contains(&("OBJECT".to_string(), "sky flat".to_string())));
        file.flush().unwrap();

        let objects = parse_header(&path).unwrap().into_iter().filter(|(k, _)| k == "OBJECT").count();
        assert_eq!(objects, 1);
    }

    #[test]
    fn test_quoted_value_at_card_limit_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("light.fits");
        write_fixture(&path, &[("OBJECT", "M 31")]);

        // 66 characters, 68 once both quotes are doubled
        let value = format!("O'Brien's {}", "x".repeat(56));
        let mut file = HeaderFile::open(&path).unwrap();
        file.set_fields([("OBSERVER", value.as_str())]).unwrap();
        file.flush().unwrap();

        assert_eq!(header_value(&path, "OBSERVER"), Some(value));
    }

    #[test]
    fn test_oversized_values_rejected_not_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("light.fits");
        write_fixture(&path, &[("OBJECT", "M 31")]);

        let quoted = format!("O'Brien's {}", "x".repeat(57));
        let long = "y".repeat(MAX_STRING_LEN + 2);
        let mut file = HeaderFile::open(&path).unwrap();
        for value in [quoted.as_str(), long.as_str()] {
            assert!(matches!(file.set_fields([("OBJECT", value)]), Err(Error::Validation(_))));
        }
        file.flush().unwrap();

        assert_eq!(header_value(&path, "OBJECT").as_deref(), Some("M 31"));
        assert!(check_value(&"y".repeat(MAX_STRING_LEN)).is_ok());
        assert!(check_value("caf\u{e9}").is_err());
    }
}
