/// Catalog state
///
/// This module handles:
/// - The on-disk header cache (library.rs)
/// - The schema-less row store (data.rs)
/// - Derived attributes computed at load time (derive.rs)
/// - The catalog session: mask, selection, mask stack (index.rs)

pub mod data;
pub mod derive;
pub mod index;
pub mod library;
