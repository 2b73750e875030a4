/// Symlink-safe recursive removal for workspace teardown
use crate::config::types::{LaunchError, Result};
use std::fs;
use std::io;
use std::path::Path;

#[cfg(unix)]
fn device_of(meta: &fs::Metadata) -> Option<u64> {
    use std::os::unix::fs::MetadataExt;
    Some(meta.dev())
}

#[cfg(not(unix))]
fn device_of(_meta: &fs::Metadata) -> Option<u64> {
    None
}

fn filesystem_error(path: &Path, op: &str, err: io::Error) -> LaunchError {
    LaunchError::Io(io::Error::new(
        err.kind(),
        format!("{} failed for {}: {}", op, path.display(), err),
    ))
}

fn remove_dir_contents(dir: &Path, root_dev: Option<u64>) -> Result<()> {
    let entries = fs::read_dir(dir).map_err(|e| filesystem_error(dir, "read_dir", e))?;
    for entry in entries {
        let entry = entry.map_err(|e| filesystem_error(dir, "readdir", e))?;
        let path = entry.path();
        let meta = fs::symlink_metadata(&path)
            .map_err(|e| filesystem_error(&path, "lstat", e))?;

        if meta.file_type().is_symlink() || !meta.is_dir() {
            remove_leaf(&path)?;
            continue;
        }

        if root_dev.is_some() && device_of(&meta) != root_dev {
            return Err(filesystem_error(
                &path,
                "remove",
                io::Error::new(
                    io::ErrorKind::Other,
                    "refusing to cross filesystem boundary",
                ),
            ));
        }
        remove_dir_contents(&path, root_dev)?;
        fs::remove_dir(&path).map_err(|e| filesystem_error(&path, "rmdir", e))?;
    }
    Ok(())
}

fn remove_leaf(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        #[cfg(windows)]
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
            // Read-only files cannot be unlinked on Windows.
            let mut perms = fs::symlink_metadata(path)?.permissions();
            #[allow(clippy::permissions_set_readonly_false)]
            perms.set_readonly(false);
            fs::set_permissions(path, perms)?;
            fs::remove_file(path).map_err(|e| filesystem_error(path, "unlink", e))
        }
        Err(e) => Err(filesystem_error(path, "unlink", e)),
    }
}

/// Restore owner write/search permission on every directory below `dir`
/// so read-only trees extracted from an archive can be removed.
#[cfg(unix)]
fn make_tree_writable(dir: &Path) {
    use std::os::unix::fs::PermissionsExt;
    for entry in walkdir::WalkDir::new(dir).follow_links(false).into_iter().flatten() {
        if entry.file_type().is_dir() {
            if let Ok(meta) = entry.metadata() {
                let mode = meta.permissions().mode();
                if mode & 0o700 != 0o700 {
                    if let Err(e) = fs::set_permissions(entry.path(), fs::Permissions::from_mode(mode | 0o700)) {
                        log::debug!("Could not open up {}: {}", entry.path().display(), e);
                    }
                }
            }
        }
    }
}

#[cfg(not(unix))]
fn make_tree_writable(_dir: &Path) {}

/// Remove a tree without following symlinks.
/// Missing paths are success; crossing onto another filesystem is refused.
pub fn remove_tree_secure(path: &Path) -> Result<()> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(filesystem_error(path, "lstat", e)),
    };

    if meta.file_type().is_symlink() || !meta.is_dir() {
        return remove_leaf(path);
    }

    make_tree_writable(path);
    remove_dir_contents(path, device_of(&meta))?;
    fs::remove_dir(path).map_err(|e| filesystem_error(path, "rmdir", e))
}
