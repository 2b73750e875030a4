/// Dependency archive encoding
use crate::archive::entry::MODE_MASK;
use crate::config::types::{LaunchError, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File};
use std::io;
use std::path::Path;
use walkdir::WalkDir;

/// Encode the tree under `root` as a gzip-compressed tar tape.
///
/// Depth-first, name-sorted walk; one entry per directory, file, and
/// symlink (links are recorded, never followed). Timestamps and ownership
/// are zeroed so identical trees encode identically.
pub fn encode(root: &Path) -> Result<Vec<u8>> {
    if !root.is_dir() {
        return Err(LaunchError::Io(io::Error::new(
            io::ErrorKind::NotFound,
            format!("{} is not a directory", root.display()),
        )));
    }

    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    builder.follow_symlinks(false);

    for entry in WalkDir::new(root)
        .follow_links(false)
        .min_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.map_err(io::Error::from)?;
        let path = entry.path();
        let rel = path.strip_prefix(root).map_err(|_| {
            LaunchError::Io(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{} escaped the walk root", path.display()),
            ))
        })?;
        let metadata = fs::symlink_metadata(path)?;
        let file_type = metadata.file_type();

        let mut header = tar::Header::new_gnu();
        header.set_mtime(0);
        header.set_uid(0);
        header.set_gid(0);

        if file_type.is_dir() {
            header.set_entry_type(tar::EntryType::Directory);
            header.set_mode(mode_of(&metadata, 0o755));
            header.set_size(0);
            builder.append_data(&mut header, rel, io::empty())?;
        } else if file_type.is_file() {
            header.set_entry_type(tar::EntryType::Regular);
            header.set_mode(mode_of(&metadata, 0o644));
            header.set_size(metadata.len());
            builder.append_data(&mut header, rel, File::open(path)?)?;
        } else if file_type.is_symlink() {
            let target = fs::read_link(path)?;
            header.set_entry_type(tar::EntryType::Symlink);
            header.set_mode(0o777);
            header.set_size(0);
            builder.append_link(&mut header, rel, &target)?;
        } else {
            log::warn!("Skipping special file {} while encoding", path.display());
        }
    }

    let encoder = builder.into_inner()?;
    Ok(encoder.finish()?)
}

#[cfg(unix)]
fn mode_of(metadata: &fs::Metadata, _default: u32) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & MODE_MASK
}

#[cfg(not(unix))]
fn mode_of(metadata: &fs::Metadata, default: u32) -> u32 {
    if metadata.permissions().readonly() {
        default & !0o222 & MODE_MASK
    } else {
        default
    }
}
