//! Error types for fitsdex

use std::path::PathBuf;
use thiserror::Error;

/// Result type for catalog operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the catalog core and its collaborators
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid input to an operation (empty mandatory selection, bad value)
    #[error("Invalid input: {0}")]
    Validation(String),

    /// A row mask whose length does not match the table
    #[error("Mask length mismatch: expected {expected} rows, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    /// Undo requested with no stashed selection
    #[error("No prior selection to restore")]
    EmptyStack,

    /// Sync target already exists and overwrite was not authorized
    #[error("Destination already exists: {}", .0.display())]
    DestinationExists(PathBuf),

    /// A relocation plan is staged but has not been saved yet
    #[error("A previous move/copy was requested but not synced. Save changes and try again")]
    PendingRelocation,

    /// Attribute is not a column of the table
    #[error("Unknown attribute: {0}")]
    UnknownAttribute(String),

    /// Calibration type has no configured requirement
    #[error("No calibration requirement configured for '{0}'")]
    UnknownCalibrationType(String),

    /// FITS header could not be read or written
    #[error("Header error in {}: {reason}", .path.display())]
    Header { path: PathBuf, reason: String },

    /// A row's observation timestamp could not be parsed
    #[error("Unparseable DATE-OBS '{value}' in {file}")]
    Timestamp { file: String, value: String },

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Header cache database error
    #[error("Cache error: {0}")]
    Cache(#[from] rusqlite::Error),

    /// I/O operation error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed TOML configuration
    #[error("Config parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// True for errors that reject the caller's input outright
    pub fn is_validation(&self) -> bool {
        matches!(self, Error::Validation(_) | Error::LengthMismatch { .. })
    }

    pub(crate) fn header(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::Header {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_class() {
        assert!(Error::Validation("x".into()).is_validation());
        assert!(Error::LengthMismatch { expected: 2, actual: 3 }.is_validation());
        assert!(!Error::EmptyStack.is_validation());
        assert!(!Error::DestinationExists(PathBuf::from("/a")).is_validation());
    }

    #[test]
    fn test_messages() {
        let err = Error::LengthMismatch { expected: 2, actual: 3 };
        assert_eq!(err.to_string(), "Mask length mismatch: expected 2 rows, got 3");
        let err = Error::DestinationExists(PathBuf::from("/tmp/a.fits"));
        assert_eq!(err.to_string(), "Destination already exists: /tmp/a.fits");
    }
}
