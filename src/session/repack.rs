/// Repack coordination
/// Turns an edited project store back into a self-contained artifact. The
/// running artifact is only ever read; the result is always a new file.
use crate::config::types::{LaunchError, ResourceKind, Result};
use crate::resources::{ArtifactImage, Blob, ResourceTable};
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// What happened to the edited store at shutdown
#[derive(Debug)]
pub enum RepackOutcome {
    /// No mutation was observed; nothing was written
    Unchanged,
    /// A new artifact carrying the edited store was written here
    Written(PathBuf),
    /// Repack failed; the raw store can be recovered from `store_at`
    Failed {
        error: LaunchError,
        store_at: PathBuf,
        workspace_retained: bool,
    },
}

impl RepackOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, RepackOutcome::Failed { .. })
    }
}

/// `<stem>.updated[.ext]` next to `artifact`
pub fn default_output(artifact: &Path) -> PathBuf {
    let stem = artifact
        .file_stem()
        .map(|s| s.to_os_string())
        .unwrap_or_else(|| OsString::from("artifact"));
    let mut name = stem;
    name.push(".updated");
    if let Some(ext) = artifact.extension() {
        name.push(".");
        name.push(ext);
    }
    artifact.with_file_name(name)
}

/// Places a raw store copy is attempted, in order
pub fn rescue_candidates(artifact: &Path) -> Vec<PathBuf> {
    let mut beside = artifact.as_os_str().to_os_string();
    beside.push(".updated.db");

    let stem = artifact
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "devcapsule".to_string());
    let in_temp = std::env::temp_dir().join(format!("{}-{}.updated.db", stem, Uuid::new_v4()));

    vec![PathBuf::from(beside), in_temp]
}

pub struct RepackCoordinator {
    image: ArtifactImage,
    output: PathBuf,
}

impl RepackCoordinator {
    /// `output` defaults to `default_output` of the image's path
    pub fn new(image: ArtifactImage, output: Option<PathBuf>) -> Self {
        let output = output.unwrap_or_else(|| default_output(image.path()));
        Self { image, output }
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Write a new artifact whose project store is the file at `store_path`.
    /// All other entries are streamed byte-identical from `table`.
    pub fn repack(&self, table: &ResourceTable, store_path: &Path) -> Result<PathBuf> {
        let failed = |source: io::Error| LaunchError::RepackFailed {
            path: self.output.clone(),
            source,
        };

        let store = Blob::from_path(store_path).map_err(|e| match e {
            LaunchError::Io(source) => failed(source),
            other => other,
        })?;
        let updated = table.with_replaced(ResourceKind::ProjectStore, store)?;

        self.image
            .write_file(&updated, &self.output)
            .map_err(|e| match e {
                LaunchError::Io(source) => failed(source),
                LaunchError::RepackFailed { .. } => e,
                other => failed(io::Error::new(io::ErrorKind::Other, other.to_string())),
            })
    }

    /// Copy the raw store to the first rescue location that accepts it
    pub fn rescue_store(&self, store_path: &Path) -> Option<PathBuf> {
        for candidate in rescue_candidates(self.image.path()) {
            match fs::copy(store_path, &candidate) {
                Ok(_) => {
                    log::warn!("Saved edited project store to {}", candidate.display());
                    return Some(candidate);
                }
                Err(e) => log::warn!("Could not save store to {}: {}", candidate.display(), e),
            }
        }
        None
    }
}
