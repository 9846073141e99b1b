/// FITS file access
///
/// This module handles:
/// - Discovering FITS files under a directory (scan.rs)
/// - Reading primary headers into key/value pairs (header.rs)
/// - Updating headers in place with HISTORY audit lines (header.rs)

pub mod header;
pub mod scan;
