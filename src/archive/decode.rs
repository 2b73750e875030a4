/// Dependency archive decoding and extraction
use crate::archive::entry::{normalize_entry_path, validate_link_target, ArchiveEntry, EntryKind, MODE_MASK};
use crate::config::types::{LaunchError, Result};
use flate2::read::GzDecoder;
use std::fs::{self, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

/// Upper bound on buffer space reserved from a header's declared size
const MAX_PREALLOC: u64 = 64 * 1024;

/// Streaming decoder over a gzip-compressed tar tape.
///
/// Entries are produced lazily, one payload in memory at a time. A decoder
/// is consumed by iterating it once; to restart, build a new decoder over
/// the same blob.
pub struct ArchiveDecoder<R: Read> {
    archive: tar::Archive<GzDecoder<R>>,
}

impl<R: Read> ArchiveDecoder<R> {
    pub fn new(reader: R) -> Self {
        Self {
            archive: tar::Archive::new(GzDecoder::new(reader)),
        }
    }

    /// Iterate the archive's entries in tape order
    pub fn entries(&mut self) -> Result<impl Iterator<Item = Result<ArchiveEntry>> + '_> {
        let entries = self.archive.entries().map_err(corrupt)?;
        Ok(entries.filter_map(|entry| match entry {
            Ok(entry) => read_entry(entry).transpose(),
            Err(e) => Some(Err(corrupt(e))),
        }))
    }
}

fn corrupt(err: io::Error) -> LaunchError {
    LaunchError::CorruptArchive(err.to_string())
}

/// Convert one tar entry; `None` for metadata-only records
fn read_entry<R: Read>(mut entry: tar::Entry<'_, R>) -> Result<Option<ArchiveEntry>> {
    let path = entry.path().map_err(corrupt)?.into_owned();
    let header = entry.header();
    let mode = header.mode().map_err(corrupt)? & MODE_MASK;
    let entry_type = header.entry_type();

    let kind = match entry_type {
        tar::EntryType::Directory => EntryKind::Directory,
        tar::EntryType::Regular | tar::EntryType::Continuous => EntryKind::File,
        tar::EntryType::Symlink => {
            let target = entry
                .link_name()
                .map_err(corrupt)?
                .ok_or_else(|| {
                    LaunchError::CorruptArchive(format!(
                        "symlink {} has no target",
                        path.display()
                    ))
                })?
                .into_owned();
            EntryKind::Symlink { target }
        }
        tar::EntryType::XGlobalHeader => return Ok(None),
        other => {
            return Err(LaunchError::CorruptArchive(format!(
                "unsupported entry type {:?} at {}",
                other,
                path.display()
            )))
        }
    };

    let mut payload = Vec::new();
    if kind == EntryKind::File {
        let declared = entry.header().size().map_err(corrupt)?;
        // The header is untrusted; a lying size is caught by the length
        // check below, not by the allocator.
        payload.reserve(declared.min(MAX_PREALLOC) as usize);
        entry.read_to_end(&mut payload).map_err(corrupt)?;
        if payload.len() as u64 != declared {
            return Err(LaunchError::CorruptArchive(format!(
                "{} declares {} bytes but carries {}",
                path.display(),
                declared,
                payload.len()
            )));
        }
    }

    Ok(Some(ArchiveEntry {
        path,
        mode,
        kind,
        payload,
    }))
}

/// Counts of what an extraction produced
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ExtractStats {
    pub directories: usize,
    pub files: usize,
    pub symlinks: usize,
    pub bytes: u64,
}

/// Materialize `entries` under `dest`.
///
/// Every entry is validated before anything is written for it: parent
/// segments, absolute paths, symlink targets leaving `dest`, and writes
/// through an already-extracted symlink are all `UnsafePath`. Directories
/// may arrive in any order and are created on demand.
pub fn extract_to<I>(entries: I, dest: &Path) -> Result<ExtractStats>
where
    I: IntoIterator<Item = Result<ArchiveEntry>>,
{
    fs::create_dir_all(dest)?;
    let mut stats = ExtractStats::default();
    let mut dir_modes: Vec<(PathBuf, u32)> = Vec::new();

    for entry in entries {
        let entry = entry?;
        let rel = normalize_entry_path(&entry.path)?;
        if rel.as_os_str().is_empty() {
            // The archive root itself.
            continue;
        }
        reject_symlinked_ancestors(dest, &rel)?;
        let target = dest.join(&rel);

        match &entry.kind {
            EntryKind::Directory => {
                if let Ok(meta) = fs::symlink_metadata(&target) {
                    if !meta.is_dir() {
                        return Err(LaunchError::UnsafePath {
                            path: rel,
                            reason: "directory entry collides with an existing non-directory"
                                .to_string(),
                        });
                    }
                }
                fs::create_dir_all(&target)?;
                dir_modes.push((target, entry.mode));
                stats.directories += 1;
            }
            EntryKind::File => {
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)?;
                }
                remove_existing_link(&target)?;
                let mut file = OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(&target)?;
                file.write_all(&entry.payload)?;
                set_mode(&target, entry.mode)?;
                stats.files += 1;
                stats.bytes += entry.payload.len() as u64;
            }
            EntryKind::Symlink { target: link_target } => {
                validate_link_target(&rel, link_target)?;
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)?;
                }
                remove_existing_link(&target)?;
                create_symlink(link_target, &target)?;
                stats.symlinks += 1;
            }
        }
    }

    // Deepest first, so a read-only parent never blocks a child chmod.
    dir_modes.sort_by_key(|(path, _)| std::cmp::Reverse(path.components().count()));
    for (path, mode) in dir_modes {
        set_mode(&path, mode)?;
    }

    log::debug!(
        "Extracted {} files, {} directories, {} symlinks ({} bytes) into {}",
        stats.files,
        stats.directories,
        stats.symlinks,
        stats.bytes,
        dest.display()
    );
    Ok(stats)
}

/// Refuse to write beneath a path component that is a symlink
fn reject_symlinked_ancestors(dest: &Path, rel: &Path) -> Result<()> {
    let mut current = dest.to_path_buf();
    let parent_components = rel.parent().map(|p| p.components().count()).unwrap_or(0);
    for component in rel.components().take(parent_components) {
        current.push(component);
        match fs::symlink_metadata(&current) {
            Ok(meta) if meta.file_type().is_symlink() => {
                return Err(LaunchError::UnsafePath {
                    path: rel.to_path_buf(),
                    reason: format!("passes through symlink {}", current.display()),
                });
            }
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => break,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

fn remove_existing_link(path: &Path) -> Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_symlink() => Ok(fs::remove_file(path)?),
        _ => Ok(()),
    }
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode & MODE_MASK))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}

#[cfg(unix)]
fn create_symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(not(unix))]
fn create_symlink(target: &Path, link: &Path) -> io::Result<()> {
    log::warn!(
        "Symlink {} -> {} not materialized on this platform",
        link.display(),
        target.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;

    fn gzip(bytes: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(bytes).unwrap();
        encoder.finish().unwrap()
    }

    /// Build a tar whose header name is written verbatim, bypassing the
    /// builder's own path checks.
    fn raw_tar(name: &[u8], data: &[u8]) -> Vec<u8> {
        let mut header = tar::Header::new_old();
        header.as_old_mut().name[..name.len()].copy_from_slice(name);
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_entry_type(tar::EntryType::Regular);
        header.set_cksum();
        let mut builder = tar::Builder::new(Vec::new());
        builder.append(&header, data).unwrap();
        builder.into_inner().unwrap()
    }

    #[test]
    fn test_traversal_entry_rejected_without_writes() {
        let outer = tempfile::tempdir().unwrap();
        let dest = outer.path().join("deps");
        let blob = gzip(&raw_tar(b"../evil.txt", b"pwned"));

        let mut decoder = ArchiveDecoder::new(&blob[..]);
        let err = extract_to(decoder.entries().unwrap(), &dest).unwrap_err();

        assert!(matches!(err, LaunchError::UnsafePath { .. }));
        assert!(!outer.path().join("evil.txt").exists());
        assert_eq!(fs::read_dir(&dest).unwrap().count(), 0);
    }

    #[test]
    fn test_out_of_order_directories_created_on_demand() {
        let dir = tempfile::tempdir().unwrap();
        let entries = vec![
            Ok(ArchiveEntry::file("pkg/lib/index.js", 0o644, b"module.exports = 1".to_vec())),
            Ok(ArchiveEntry::directory("pkg/lib", 0o755)),
            Ok(ArchiveEntry::directory("pkg", 0o755)),
            Ok(ArchiveEntry::directory("pkg", 0o755)),
        ];

        let stats = extract_to(entries, dir.path()).unwrap();
        assert_eq!(stats.files, 1);
        assert_eq!(stats.directories, 3);
        assert_eq!(
            fs::read(dir.path().join("pkg/lib/index.js")).unwrap(),
            b"module.exports = 1"
        );
    }

    #[test]
    fn test_short_payload_is_corrupt() {
        let tape = raw_tar(b"file.txt", b"0123456789");
        // Cut the tape in the middle of the payload block.
        let truncated = gzip(&tape[..512 + 4]);

        let mut decoder = ArchiveDecoder::new(&truncated[..]);
        let result: Result<Vec<_>> = decoder.entries().unwrap().collect();
        assert!(matches!(result, Err(LaunchError::CorruptArchive(_))));
    }

    #[test]
    fn test_oversized_declared_length_is_corrupt() {
        let mut header = tar::Header::new_gnu();
        header.set_path("huge.bin").unwrap();
        header.set_size(u64::MAX / 2);
        header.set_mode(0o644);
        header.set_entry_type(tar::EntryType::Regular);
        header.set_cksum();
        let mut tape = header.as_bytes().to_vec();
        tape.extend_from_slice(&[0u8; 512]);
        let blob = gzip(&tape);

        let mut decoder = ArchiveDecoder::new(&blob[..]);
        let result: Result<Vec<_>> = decoder.entries().unwrap().collect();
        assert!(matches!(result, Err(LaunchError::CorruptArchive(_))));
    }

    #[test]
    fn test_garbage_blob_is_corrupt() {
        let mut decoder = ArchiveDecoder::new(&b"definitely not gzip"[..]);
        let outcome = decoder
            .entries()
            .and_then(|entries| entries.collect::<Result<Vec<_>>>());
        assert!(matches!(outcome, Err(LaunchError::CorruptArchive(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_write_through_symlink_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let entries = vec![
            Ok(ArchiveEntry::directory("real", 0o755)),
            Ok(ArchiveEntry::symlink("alias", "real")),
            Ok(ArchiveEntry::file("alias/evil.txt", 0o644, b"x".to_vec())),
        ];
        let err = extract_to(entries, dir.path()).unwrap_err();
        assert!(matches!(err, LaunchError::UnsafePath { .. }));
        assert!(!dir.path().join("real/evil.txt").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_chain_cannot_climb_out() {
        let outer = tempfile::tempdir().unwrap();
        let dest = outer.path().join("deps");
        let entries = vec![
            Ok(ArchiveEntry::directory("t", 0o755)),
            Ok(ArchiveEntry::directory("a/b", 0o755)),
            Ok(ArchiveEntry::symlink("a/b/s", "../../t")),
            // Lexically `a`, but on disk `s` resolves first: `t/../..`.
            Ok(ArchiveEntry::symlink("a/b/l", "s/../..")),
        ];
        let err = extract_to(entries, &dest).unwrap_err();
        assert!(matches!(err, LaunchError::UnsafePath { .. }));
        assert!(fs::symlink_metadata(dest.join("a/b/l")).is_err());

        let dest = outer.path().join("deps-reordered");
        let entries = vec![
            Ok(ArchiveEntry::directory("t", 0o755)),
            Ok(ArchiveEntry::symlink("a/b/l", "s/../..")),
            Ok(ArchiveEntry::symlink("a/b/s", "../../t")),
        ];
        assert!(extract_to(entries, &dest).is_err());
        assert!(fs::symlink_metadata(dest.join("a/b/l")).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_escaping_symlink_target_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let entries = vec![Ok(ArchiveEntry::symlink(".bin/tool", "../../../usr/bin/env"))];
        let err = extract_to(entries, dir.path()).unwrap_err();
        assert!(matches!(err, LaunchError::UnsafePath { .. }));
        assert!(fs::symlink_metadata(dir.path().join(".bin/tool")).is_err());
    }
}
