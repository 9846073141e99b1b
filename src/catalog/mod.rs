/// Catalog operations over an index
///
/// This module handles:
/// - Interactive narrowing of the selection (selection.rs)
/// - Matching calibration frames to targets (calibration.rs)
/// - Planning new names and directories (organize.rs)
/// - Writing staged changes back to disk (sync.rs)

pub mod calibration;
pub mod organize;
pub mod selection;
pub mod sync;
