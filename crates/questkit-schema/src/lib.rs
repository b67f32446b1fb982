//! Shared types and wire formats for questkit: versions, the qmod manifest,
//! the core-mod manifest and the download mirror table.

pub mod index;
pub mod types;
pub mod version;

// Re-exports
pub use index::{CoreModEntry, CoreModIndex, CoreModSet, MirrorEntry, MirrorTable};
pub use types::*;
pub use version::{ModVersion, VersionParseError};
