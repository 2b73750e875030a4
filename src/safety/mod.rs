//! Safety and cleanup
//!
//! Session workspaces and the symlink-safe teardown that removes them.

pub mod safe_cleanup;
pub mod workspace;

pub use workspace::{ExtractedPaths, Workspace};
