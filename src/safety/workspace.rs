/// Session-scoped workspace
/// One uniquely named directory per launch; nothing is ever extracted
/// into a path that existed before the session started.
use crate::archive::{extract_to, ArchiveDecoder};
use crate::config::types::{LaunchError, Platform, ResourceKind, Result};
use crate::resources::{Resource, ResourceTable};
use crate::safety::safe_cleanup;
use std::fs::{self, OpenOptions};
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};
use uuid::Uuid;

const RUNTIME_DIR: &str = "bin";

/// Where each extracted resource landed
#[derive(Clone, Debug)]
pub struct ExtractedPaths {
    pub runtime_binary: PathBuf,
    pub server_script: PathBuf,
    pub project_store: PathBuf,
    pub dependency_dir: PathBuf,
}

/// Exclusively owned session directory
pub struct Workspace {
    session_id: String,
    root: PathBuf,
    extracted: Option<ExtractedPaths>,
    /// Cleared once the directory has been removed or handed off
    armed: bool,
}

impl Workspace {
    /// Create `devcapsule-<uuid>` under `parent`.
    /// The directory is created with `create_dir`, so an existing path is
    /// never reused.
    pub fn create(parent: &Path) -> Result<Self> {
        let session_id = Uuid::new_v4().to_string();
        let root = parent.join(format!("devcapsule-{}", session_id));

        let mut builder = fs::DirBuilder::new();
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(0o700);
        }
        builder
            .create(&root)
            .map_err(|source| LaunchError::ResourceExhausted {
                path: root.clone(),
                source,
            })?;

        log::debug!("Created workspace {}", root.display());
        Ok(Self {
            session_id,
            root,
            extracted: None,
            armed: true,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Paths of the extracted resources, once `extract` has succeeded
    pub fn extracted(&self) -> Option<&ExtractedPaths> {
        self.extracted.as_ref()
    }

    /// Materialize the runtime for `platform` and the shared resources.
    ///
    /// Every entry is looked up before the first write, so an unsupported
    /// platform or an incomplete table leaves the workspace untouched.
    pub fn extract(&mut self, table: &ResourceTable, platform: Platform) -> Result<ExtractedPaths> {
        let runtime = table.runtime_for(platform)?;
        let script = table.get(ResourceKind::ServerScript)?;
        let store = table.get(ResourceKind::ProjectStore)?;
        let deps = table.get(ResourceKind::DependencyArchive)?;
        let profile = table.profile();
        profile.validate()?;

        let paths = ExtractedPaths {
            runtime_binary: self
                .root
                .join(RUNTIME_DIR)
                .join(format!("{}{}", profile.runtime_name, platform.exe_suffix())),
            server_script: self.root.join(&profile.server_script_name),
            project_store: self.root.join(&profile.store_file_name),
            dependency_dir: self.root.join(&profile.dependency_dir_name),
        };

        self.create_subdir(&self.root.join(RUNTIME_DIR))?;
        self.write_resource(runtime, ResourceKind::RuntimeBinary, &paths.runtime_binary, 0o755)?;
        self.write_resource(script, ResourceKind::ServerScript, &paths.server_script, 0o644)?;
        self.write_resource(store, ResourceKind::ProjectStore, &paths.project_store, 0o644)?;

        // The archive is checked as a whole before any of it is unpacked.
        deps.verify(ResourceKind::DependencyArchive)?;
        self.create_subdir(&paths.dependency_dir)?;
        let mut decoder = ArchiveDecoder::new(BufReader::new(deps.blob.reader()?));
        let stats = extract_to(decoder.entries()?, &paths.dependency_dir)?;

        log::info!(
            "Extracted {} runtime and {} dependency files ({} bytes) into {}",
            platform,
            stats.files,
            stats.bytes,
            self.root.display()
        );

        self.extracted = Some(paths.clone());
        Ok(paths)
    }

    fn create_subdir(&self, dir: &Path) -> Result<()> {
        match fs::create_dir(dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists && dir.is_dir() => Ok(()),
            Err(source) => Err(self.write_error(dir, source)),
        }
    }

    fn write_resource(&self, resource: &Resource, kind: ResourceKind, dest: &Path, mode: u32) -> Result<()> {
        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(mode);
        }
        let file = options
            .open(dest)
            .map_err(|source| self.write_error(dest, source))?;

        let mut out = BufWriter::new(file);
        resource.copy_verified(kind, &mut out)?;
        let file = out
            .into_inner()
            .map_err(|e| self.write_error(dest, e.into_error()))?;
        file.sync_all()
            .map_err(|source| self.write_error(dest, source))?;
        drop(file);

        // The open mode is filtered by the umask; the runtime must end up
        // executable regardless.
        set_mode(dest, mode)?;
        Ok(())
    }

    /// Space and quota failures are reported with the path that failed
    fn write_error(&self, path: &Path, source: io::Error) -> LaunchError {
        LaunchError::ResourceExhausted {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Remove the workspace. Failures are logged, never returned.
    pub fn destroy(mut self) {
        self.remove();
    }

    /// Keep the directory on disk and return its path
    pub fn retain(mut self) -> PathBuf {
        self.armed = false;
        log::warn!("Retaining workspace {}", self.root.display());
        self.root.clone()
    }

    fn remove(&mut self) {
        if !self.armed {
            return;
        }
        self.armed = false;
        match safe_cleanup::remove_tree_secure(&self.root) {
            Ok(()) => log::debug!("Removed workspace {}", self.root.display()),
            Err(e) => log::warn!("Failed to remove workspace {}: {}", self.root.display(), e),
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        self.remove();
    }
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::encode;
    use crate::resources::Blob;

    fn sample_table(platforms: &[Platform]) -> ResourceTable {
        let deps = tempfile::tempdir().unwrap();
        fs::create_dir_all(deps.path().join("left-pad")).unwrap();
        fs::write(deps.path().join("left-pad/index.js"), b"module.exports = 1;").unwrap();
        let archive = encode(deps.path()).unwrap();

        let mut builder = ResourceTable::builder();
        for platform in platforms {
            builder = builder.runtime(*platform, Blob::from_bytes(format!("runtime-{}", platform)));
        }
        builder
            .claim(platforms)
            .dependency_archive(Blob::from_bytes(archive))
            .server_script(Blob::from_bytes(b"serve()".to_vec()))
            .project_store(Blob::from_bytes(b"store-v0".to_vec()))
            .build()
            .unwrap()
    }

    #[test]
    fn test_workspace_is_unique_and_removed() {
        let parent = tempfile::tempdir().unwrap();
        let a = Workspace::create(parent.path()).unwrap();
        let b = Workspace::create(parent.path()).unwrap();
        assert_ne!(a.root(), b.root());
        assert!(a.root().is_dir());

        let root = a.root().to_path_buf();
        a.destroy();
        assert!(!root.exists());

        let root = b.root().to_path_buf();
        drop(b);
        assert!(!root.exists());
    }

    #[test]
    fn test_create_reports_resource_exhausted() {
        let parent = tempfile::tempdir().unwrap();
        let missing = parent.path().join("no-such-dir");
        let err = Workspace::create(&missing).err().unwrap();
        assert!(matches!(err, LaunchError::ResourceExhausted { .. }));
    }

    #[test]
    fn test_extract_selects_runtime_for_each_platform() {
        let table = sample_table(&Platform::SUPPORTED);
        for platform in Platform::SUPPORTED {
            let parent = tempfile::tempdir().unwrap();
            let mut ws = Workspace::create(parent.path()).unwrap();
            let paths = ws.extract(&table, platform).unwrap();

            let runtime = fs::read(&paths.runtime_binary).unwrap();
            assert_eq!(runtime, format!("runtime-{}", platform).into_bytes());
            assert!(paths
                .runtime_binary
                .to_string_lossy()
                .ends_with(&format!("node{}", platform.exe_suffix())));
            assert_eq!(fs::read(&paths.project_store).unwrap(), b"store-v0");
            assert_eq!(
                fs::read(paths.dependency_dir.join("left-pad/index.js")).unwrap(),
                b"module.exports = 1;"
            );
            assert!(paths.runtime_binary.starts_with(ws.root()));
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_runtime_is_executable() {
        use std::os::unix::fs::PermissionsExt;
        let table = sample_table(&Platform::SUPPORTED);
        let parent = tempfile::tempdir().unwrap();
        let mut ws = Workspace::create(parent.path()).unwrap();
        let paths = ws.extract(&table, Platform::SUPPORTED[0]).unwrap();
        let mode = fs::metadata(&paths.runtime_binary).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
        let root_mode = fs::metadata(ws.root()).unwrap().permissions().mode();
        assert_eq!(root_mode & 0o777, 0o700);
    }

    #[test]
    fn test_unsupported_platform_writes_nothing() {
        let claimed = &Platform::SUPPORTED[..2];
        let table = sample_table(claimed);
        let parent = tempfile::tempdir().unwrap();
        let mut ws = Workspace::create(parent.path()).unwrap();

        let err = ws.extract(&table, Platform::SUPPORTED[5]).unwrap_err();
        assert!(matches!(err, LaunchError::UnsupportedPlatform { .. }));
        assert_eq!(fs::read_dir(ws.root()).unwrap().count(), 0);
        assert!(ws.extracted().is_none());
    }

    #[test]
    fn test_retain_keeps_directory() {
        let parent = tempfile::tempdir().unwrap();
        let ws = Workspace::create(parent.path()).unwrap();
        let kept = ws.retain();
        assert!(kept.is_dir());
    }
}
