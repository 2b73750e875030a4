//! Artifact fixture shared by the lifecycle integration tests
//!
//! A POSIX shell script stands in for the runtime binary. It is invoked the
//! way a real runtime is (`<script> <store> <port>`, cwd = workspace).
#![allow(dead_code)]

use devcapsule::archive::encode;
use devcapsule::config::launcher::LauncherConfig;
use devcapsule::config::types::{Platform, ResourceKind};
use devcapsule::observability::journal::{SessionEvent, SessionJournal};
use devcapsule::session::Launcher;
use devcapsule::{ArtifactImage, Blob, ResourceTable};
use std::fs;
use std::path::{Path, PathBuf};

pub const LINUX_X64: Platform = Platform::SUPPORTED[0];

/// Store contents every fixture artifact starts with
pub const INITIAL_STORE: &[u8] = b"store-v0";

pub struct Fixture {
    pub dir: tempfile::TempDir,
    pub artifact: PathBuf,
    pub workspace_root: PathBuf,
}

impl Fixture {
    pub fn new(runtime: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let launcher = dir.path().join("launcher");
        fs::write(&launcher, b"\x7fELF pretend launcher image").unwrap();

        let deps = dir.path().join("deps");
        fs::create_dir_all(deps.join("left-pad")).unwrap();
        fs::write(deps.join("left-pad/index.js"), b"module.exports = 1;").unwrap();

        let table = ResourceTable::builder()
            .claim(&[LINUX_X64])
            .runtime(LINUX_X64, Blob::from_bytes(runtime.as_bytes().to_vec()))
            .dependency_archive(Blob::from_bytes(encode(&deps).unwrap()))
            .server_script(Blob::from_bytes(b"// dev server".to_vec()))
            .project_store(Blob::from_bytes(INITIAL_STORE.to_vec()))
            .build()
            .unwrap();

        let artifact = dir.path().join("app");
        ArtifactImage::launcher(&launcher)
            .unwrap()
            .write_file(&table, &artifact)
            .unwrap();

        let workspace_root = dir.path().join("workspaces");
        fs::create_dir(&workspace_root).unwrap();
        Fixture {
            dir,
            artifact,
            workspace_root,
        }
    }

    pub fn config(&self) -> LauncherConfig {
        LauncherConfig {
            port: 4321,
            poll_interval_ms: 50,
            grace_period_ms: 2000,
            output: None,
            workspace_root: Some(self.workspace_root.clone()),
        }
    }

    pub fn launcher(&self, config: LauncherConfig) -> Launcher {
        let (image, table) = ArtifactImage::open(&self.artifact).unwrap();
        Launcher::new(image, table, config).with_platform(LINUX_X64)
    }

    pub fn workspaces(&self) -> Vec<PathBuf> {
        fs::read_dir(&self.workspace_root)
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .collect()
    }

    pub fn workspaces_left(&self) -> usize {
        self.workspaces().len()
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }
}

/// Project store carried by the artifact at `path`
pub fn store_of(path: &Path) -> Vec<u8> {
    let (_, table) = ArtifactImage::open(path).unwrap();
    table
        .get(ResourceKind::ProjectStore)
        .unwrap()
        .blob
        .read_all()
        .unwrap()
}

/// Index of the first `event` in the journal
pub fn position(journal: &SessionJournal, event: SessionEvent) -> Option<usize> {
    journal.entries().iter().position(|entry| entry.event == event)
}
