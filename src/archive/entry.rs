/// Archive entry model and path validation
use crate::config::types::{LaunchError, Result};
use std::path::{Component, Path, PathBuf};

/// What an archive entry materializes as
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    File,
    Symlink { target: PathBuf },
}

/// One record of the dependency archive tape
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Path as recorded in the archive, relative to the extraction root
    pub path: PathBuf,
    /// Permission bits (`0o777` mask)
    pub mode: u32,
    pub kind: EntryKind,
    /// File contents; empty for directories and symlinks
    pub payload: Vec<u8>,
}

impl ArchiveEntry {
    pub fn directory(path: impl Into<PathBuf>, mode: u32) -> Self {
        Self {
            path: path.into(),
            mode,
            kind: EntryKind::Directory,
            payload: Vec::new(),
        }
    }

    pub fn file(path: impl Into<PathBuf>, mode: u32, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            mode,
            kind: EntryKind::File,
            payload: payload.into(),
        }
    }

    pub fn symlink(path: impl Into<PathBuf>, target: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            mode: 0o777,
            kind: EntryKind::Symlink {
                target: target.into(),
            },
            payload: Vec::new(),
        }
    }
}

pub const MODE_MASK: u32 = 0o777;

/// Normalize an entry path to plain relative components.
///
/// `.` segments are dropped; `..`, a root, or a drive prefix is an
/// `UnsafePath`. The empty result means the extraction root itself.
pub fn normalize_entry_path(path: &Path) -> Result<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                return Err(LaunchError::UnsafePath {
                    path: path.to_path_buf(),
                    reason: "contains a parent-directory segment".to_string(),
                })
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(LaunchError::UnsafePath {
                    path: path.to_path_buf(),
                    reason: "is absolute".to_string(),
                })
            }
        }
    }
    Ok(out)
}

/// Check that a symlink target stays under the extraction root.
///
/// A target may climb (`..`) and then descend, never climb after
/// descending. Climbing then only passes through the link's own ancestors,
/// which are real directories, so the result holds no matter which other
/// links exist or are extracted later. A descent through another link
/// lands inside the root because that link was held to the same rule.
pub fn validate_link_target(link: &Path, target: &Path) -> Result<()> {
    let unsafe_link = |reason: &str| LaunchError::UnsafePath {
        path: link.to_path_buf(),
        reason: format!("symlink target {} {}", target.display(), reason),
    };

    let mut depth = link
        .parent()
        .map(|p| {
            p.components()
                .filter(|c| matches!(c, Component::Normal(_)))
                .count()
        })
        .unwrap_or(0);
    let mut descended = false;

    for component in target.components() {
        match component {
            Component::Normal(_) => descended = true,
            Component::CurDir => {}
            Component::ParentDir => {
                if descended {
                    return Err(unsafe_link("climbs back out of a descended path"));
                }
                if depth == 0 {
                    return Err(unsafe_link("escapes the extraction root"));
                }
                depth -= 1;
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(unsafe_link("is absolute"));
            }
        }
    }
    Ok(())
}
