/// Self-contained artifact layout
///
/// An artifact is the launcher's own executable image with the resource
/// table appended:
///
/// ```text
/// [launcher image][blob 0]..[blob n][index JSON][trailer]
/// trailer = MAGIC (8 bytes) | index length (u64 LE) | payload offset (u64 LE)
/// ```
///
/// Blob offsets in the index are relative to the payload offset. Reading an
/// artifact never loads blobs eagerly; they stay as file regions until
/// extraction or repack streams them. Writing always targets a new file.
use crate::config::launcher::LaunchProfile;
use crate::config::types::{LaunchError, Platform, ResourceKind, Result};
use crate::resources::table::{Blob, Resource, ResourceKey, ResourceTable};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

pub const MAGIC: &[u8; 8] = b"DVCAPS01";
pub const TRAILER_LEN: u64 = 24;
pub const FORMAT_VERSION: u32 = 1;

/// Upper bound on the index size; a larger value means a damaged trailer
const MAX_INDEX_LEN: u64 = 16 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexEntry {
    kind: ResourceKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    platform: Option<Platform>,
    offset: u64,
    len: u64,
    sha256: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ArtifactIndex {
    format_version: u32,
    created_at: DateTime<Utc>,
    claimed: Vec<Platform>,
    profile: LaunchProfile,
    entries: Vec<IndexEntry>,
}

/// The executable image an artifact is built on: the launcher bytes that
/// precede any embedded payload.
#[derive(Debug, Clone)]
pub struct ArtifactImage {
    path: PathBuf,
    image_len: u64,
}

impl ArtifactImage {
    /// Path of the file this image was read from
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Length of the launcher image in bytes
    pub fn image_len(&self) -> u64 {
        self.image_len
    }

    /// Open the running executable as an artifact
    pub fn open_current() -> Result<(ArtifactImage, ResourceTable)> {
        let exe = std::env::current_exe()?;
        Self::open(&exe)
    }

    /// Open an artifact and decode its resource table
    pub fn open(path: &Path) -> Result<(ArtifactImage, ResourceTable)> {
        let mut file = File::open(path)?;
        let trailer = read_trailer(&mut file, path)?.ok_or_else(|| LaunchError::MissingPayload {
            path: path.to_path_buf(),
        })?;

        let corrupt = |details: String| LaunchError::CorruptArtifact {
            path: path.to_path_buf(),
            details,
        };

        file.seek(SeekFrom::Start(trailer.index_start))?;
        let mut raw = vec![0u8; trailer.index_len as usize];
        file.read_exact(&mut raw)
            .map_err(|e| corrupt(format!("index unreadable: {}", e)))?;
        let index: ArtifactIndex = serde_json::from_slice(&raw)
            .map_err(|e| corrupt(format!("index is not valid JSON: {}", e)))?;
        if index.format_version != FORMAT_VERSION {
            return Err(corrupt(format!(
                "unsupported format version {}",
                index.format_version
            )));
        }

        let payload_len = trailer.index_start - trailer.payload_offset;
        let shared_path = Arc::new(path.to_path_buf());
        let mut entries = BTreeMap::new();
        for entry in index.entries {
            let end = entry.offset.checked_add(entry.len);
            if end.map_or(true, |end| end > payload_len) {
                return Err(corrupt(format!(
                    "{} spans past the payload ({}+{} > {})",
                    entry.kind, entry.offset, entry.len, payload_len
                )));
            }
            let key = ResourceKey {
                kind: entry.kind,
                platform: entry.platform,
            };
            let resource = Resource {
                blob: Blob::Region {
                    path: Arc::clone(&shared_path),
                    offset: trailer.payload_offset + entry.offset,
                    len: entry.len,
                },
                sha256: Some(entry.sha256),
            };
            if entries.insert(key, resource).is_some() {
                return Err(corrupt(format!("duplicate entry for {}", key)));
            }
        }

        log::debug!(
            "Opened artifact {} ({} resources, image {} bytes)",
            path.display(),
            entries.len(),
            trailer.payload_offset
        );

        let image = ArtifactImage {
            path: path.to_path_buf(),
            image_len: trailer.payload_offset,
        };
        Ok((
            image,
            ResourceTable::from_parts(entries, index.claimed, index.profile),
        ))
    }

    /// Use a launcher executable as the image for a new artifact.
    /// An existing payload on it is ignored, so packing from an already
    /// packed artifact does not nest payloads.
    pub fn launcher(path: &Path) -> Result<ArtifactImage> {
        let mut file = File::open(path)?;
        let image_len = match read_trailer(&mut file, path)? {
            Some(trailer) => trailer.payload_offset,
            None => file.metadata()?.len(),
        };
        Ok(ArtifactImage {
            path: path.to_path_buf(),
            image_len,
        })
    }

    /// Serialize `table` on top of this image into `out`.
    /// Returns the number of bytes written.
    pub fn write_to<W: Write>(&self, table: &ResourceTable, out: W) -> Result<u64> {
        let mut out = CountingWriter::new(out);

        let mut image = File::open(&self.path)?.take(self.image_len);
        let copied = io::copy(&mut image, &mut out)?;
        if copied != self.image_len {
            return Err(LaunchError::CorruptArtifact {
                path: self.path.clone(),
                details: format!(
                    "launcher image truncated: expected {} bytes, read {}",
                    self.image_len, copied
                ),
            });
        }

        let payload_offset = out.written;
        let mut entries = Vec::with_capacity(table.len());
        for (key, resource) in table.entries() {
            let offset = out.written - payload_offset;
            let (len, digest) = resource.copy_verified(key.kind, &mut out)?;
            entries.push(IndexEntry {
                kind: key.kind,
                platform: key.platform,
                offset,
                len,
                sha256: digest,
            });
        }

        let index = ArtifactIndex {
            format_version: FORMAT_VERSION,
            created_at: Utc::now(),
            claimed: table.claimed_platforms().to_vec(),
            profile: table.profile().clone(),
            entries,
        };
        let raw = serde_json::to_vec(&index)
            .map_err(|e| LaunchError::Config(format!("cannot encode artifact index: {}", e)))?;
        out.write_all(&raw)?;
        out.write_all(MAGIC)?;
        out.write_all(&(raw.len() as u64).to_le_bytes())?;
        out.write_all(&payload_offset.to_le_bytes())?;
        out.flush()?;

        Ok(out.written)
    }

    /// Write a new artifact file at `dest`.
    ///
    /// The bytes go to a uniquely named sibling temp file that is synced,
    /// marked executable, and renamed over `dest`, so a failure never leaves
    /// a half-written artifact at `dest`. `dest` may not be this image's
    /// own file.
    pub fn write_file(&self, table: &ResourceTable, dest: &Path) -> Result<PathBuf> {
        if same_file(&self.path, dest) {
            return Err(LaunchError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "refusing to overwrite the source artifact {}",
                    self.path.display()
                ),
            )));
        }

        let dir = match dest.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let name = dest
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "artifact".to_string());
        let tmp = dir.join(format!(".{}.{}.tmp", name, Uuid::new_v4()));

        let result = (|| -> Result<()> {
            let file = OpenOptions::new().write(true).create_new(true).open(&tmp)?;
            let mut writer = BufWriter::new(file);
            self.write_to(table, &mut writer)?;
            let file = writer.into_inner().map_err(|e| e.into_error())?;
            file.sync_all()?;
            set_executable(&tmp)?;
            fs::rename(&tmp, dest)?;
            Ok(())
        })();

        if let Err(e) = result {
            if tmp.exists() {
                if let Err(rm) = fs::remove_file(&tmp) {
                    log::warn!("Failed to remove partial artifact {}: {}", tmp.display(), rm);
                }
            }
            return Err(e);
        }

        Ok(dest.to_path_buf())
    }
}

struct Trailer {
    index_len: u64,
    index_start: u64,
    payload_offset: u64,
}

/// Read and bounds-check the trailer; `None` when the file has no payload
fn read_trailer(file: &mut File, path: &Path) -> Result<Option<Trailer>> {
    let file_len = file.metadata()?.len();
    if file_len < TRAILER_LEN {
        return Ok(None);
    }
    file.seek(SeekFrom::Start(file_len - TRAILER_LEN))?;
    let mut buf = [0u8; TRAILER_LEN as usize];
    file.read_exact(&mut buf)?;
    if &buf[..8] != MAGIC {
        return Ok(None);
    }

    let mut word = [0u8; 8];
    word.copy_from_slice(&buf[8..16]);
    let index_len = u64::from_le_bytes(word);
    word.copy_from_slice(&buf[16..24]);
    let payload_offset = u64::from_le_bytes(word);

    let body_end = file_len - TRAILER_LEN;
    let index_start = body_end.checked_sub(index_len);
    match index_start {
        Some(index_start) if index_len <= MAX_INDEX_LEN && payload_offset <= index_start => {
            Ok(Some(Trailer {
                index_len,
                index_start,
                payload_offset,
            }))
        }
        _ => Err(LaunchError::CorruptArtifact {
            path: path.to_path_buf(),
            details: format!(
                "trailer out of bounds (index {} bytes, payload at {}, file {} bytes)",
                index_len, payload_offset, file_len
            ),
        }),
    }
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

#[cfg(unix)]
fn set_executable(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
fn set_executable(_path: &Path) -> io::Result<()> {
    Ok(())
}

struct CountingWriter<W> {
    inner: W,
    written: u64,
}

impl<W: Write> CountingWriter<W> {
    fn new(inner: W) -> Self {
        Self { inner, written: 0 }
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
