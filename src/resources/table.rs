/// Embedded resource table
/// Immutable set of named blobs keyed by kind and, for runtime binaries,
/// by platform triple. Built explicitly and handed to the launcher; there
/// is no process-global table.
use crate::config::launcher::LaunchProfile;
use crate::config::types::{LaunchError, Platform, ResourceKind, Result};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Immutable byte blob, either owned in memory or a byte range of a file
/// (typically the running artifact) that is streamed on demand.
#[derive(Clone, Debug)]
pub enum Blob {
    Memory(Arc<[u8]>),
    Region {
        path: Arc<PathBuf>,
        offset: u64,
        len: u64,
    },
}

impl Blob {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Blob::Memory(Arc::from(bytes.into().into_boxed_slice()))
    }

    /// Read a whole file into an in-memory blob
    pub fn from_file(path: &Path) -> Result<Self> {
        Ok(Self::from_bytes(std::fs::read(path)?))
    }

    /// Reference a whole file without reading it; bytes are streamed when
    /// the blob is written out
    pub fn from_path(path: &Path) -> Result<Self> {
        let len = std::fs::metadata(path)?.len();
        Ok(Blob::Region {
            path: Arc::new(path.to_path_buf()),
            offset: 0,
            len,
        })
    }

    pub fn len(&self) -> u64 {
        match self {
            Blob::Memory(bytes) => bytes.len() as u64,
            Blob::Region { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Open a reader over exactly this blob's bytes
    pub fn reader(&self) -> io::Result<Box<dyn Read + '_>> {
        match self {
            Blob::Memory(bytes) => Ok(Box::new(Cursor::new(&bytes[..]))),
            Blob::Region { path, offset, len } => {
                let mut file = File::open(path.as_path())?;
                file.seek(SeekFrom::Start(*offset))?;
                Ok(Box::new(file.take(*len)))
            }
        }
    }

    pub fn read_all(&self) -> io::Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.len() as usize);
        self.reader()?.read_to_end(&mut out)?;
        if out.len() as u64 != self.len() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("blob truncated: expected {} bytes, read {}", self.len(), out.len()),
            ));
        }
        Ok(out)
    }

    /// Lowercase hex SHA-256 of the blob contents
    pub fn sha256(&self) -> io::Result<String> {
        let mut hasher = Sha256::new();
        let copied = io::copy(&mut self.reader()?, &mut hasher)?;
        if copied != self.len() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("blob truncated: expected {} bytes, read {}", self.len(), copied),
            ));
        }
        Ok(format!("{:x}", hasher.finalize()))
    }
}

/// Table key: a kind, plus the platform for runtime binaries
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey {
    pub kind: ResourceKind,
    pub platform: Option<Platform>,
}

impl ResourceKey {
    pub fn runtime(platform: Platform) -> Self {
        Self {
            kind: ResourceKind::RuntimeBinary,
            platform: Some(platform),
        }
    }

    pub fn shared(kind: ResourceKind) -> Self {
        Self {
            kind,
            platform: None,
        }
    }
}

impl std::fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.platform {
            Some(platform) => write!(f, "{} ({})", self.kind, platform),
            None => write!(f, "{}", self.kind),
        }
    }
}

/// A table entry: the blob plus the digest recorded when it was packed
#[derive(Clone, Debug)]
pub struct Resource {
    pub blob: Blob,
    pub sha256: Option<String>,
}

impl Resource {
    pub fn new(blob: Blob) -> Self {
        Self { blob, sha256: None }
    }

    /// Stream the blob into `out`, checking its length and, when one was
    /// recorded, its digest. Returns the byte count and the computed digest.
    pub fn copy_verified<W: Write>(&self, kind: ResourceKind, out: W) -> Result<(u64, String)> {
        let mut hashing = HashingWriter::new(out);
        let len = io::copy(&mut self.blob.reader()?, &mut hashing)?;
        let digest = hashing.finish();
        self.check(kind, len, &digest)?;
        Ok((len, digest))
    }

    /// Hash the blob without copying it anywhere
    pub fn verify(&self, kind: ResourceKind) -> Result<()> {
        self.copy_verified(kind, io::sink()).map(|_| ())
    }

    fn check(&self, kind: ResourceKind, len: u64, digest: &str) -> Result<()> {
        if len != self.blob.len() {
            return Err(LaunchError::CorruptResource {
                kind,
                details: format!("expected {} bytes, read {}", self.blob.len(), len),
            });
        }
        if let Some(expected) = &self.sha256 {
            if expected != digest {
                return Err(LaunchError::CorruptResource {
                    kind,
                    details: format!("digest {} does not match recorded {}", digest, expected),
                });
            }
        }
        Ok(())
    }
}

struct HashingWriter<W> {
    inner: W,
    hasher: Sha256,
}

impl<W: Write> HashingWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
        }
    }

    fn finish(self) -> String {
        format!("{:x}", self.hasher.finalize())
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Immutable resource table
#[derive(Clone, Debug)]
pub struct ResourceTable {
    entries: BTreeMap<ResourceKey, Resource>,
    claimed: Vec<Platform>,
    profile: LaunchProfile,
}

impl ResourceTable {
    /// Assemble a table from already-validated parts (artifact decoding)
    pub(crate) fn from_parts(
        entries: BTreeMap<ResourceKey, Resource>,
        claimed: Vec<Platform>,
        profile: LaunchProfile,
    ) -> Self {
        Self {
            entries,
            claimed,
            profile,
        }
    }

    pub fn builder() -> ResourceTableBuilder {
        ResourceTableBuilder::default()
    }

    pub fn profile(&self) -> &LaunchProfile {
        &self.profile
    }

    /// Platforms this table promises a runtime for
    pub fn claimed_platforms(&self) -> &[Platform] {
        &self.claimed
    }

    /// Select the runtime binary for `platform`
    pub fn runtime_for(&self, platform: Platform) -> Result<&Resource> {
        if !self.claimed.contains(&platform) {
            return Err(LaunchError::UnsupportedPlatform {
                platform: platform.to_string(),
            });
        }
        self.entries
            .get(&ResourceKey::runtime(platform))
            .ok_or_else(|| LaunchError::UnsupportedPlatform {
                platform: platform.to_string(),
            })
    }

    /// Look up a platform-independent entry
    pub fn get(&self, kind: ResourceKind) -> Result<&Resource> {
        self.entries
            .get(&ResourceKey::shared(kind))
            .ok_or(LaunchError::MissingResource(kind))
    }

    /// Entries in deterministic key order
    pub fn entries(&self) -> impl Iterator<Item = (&ResourceKey, &Resource)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copy of this table with one platform-independent entry replaced.
    /// Every other entry keeps its blob (and so its bytes) unchanged.
    pub fn with_replaced(&self, kind: ResourceKind, blob: Blob) -> Result<Self> {
        let key = ResourceKey::shared(kind);
        if !self.entries.contains_key(&key) {
            return Err(LaunchError::MissingResource(kind));
        }
        let mut copy = self.clone();
        copy.entries.insert(key, Resource::new(blob));
        Ok(copy)
    }
}

/// Builder that enforces the table invariants at pack time
#[derive(Default)]
pub struct ResourceTableBuilder {
    entries: BTreeMap<ResourceKey, Resource>,
    claimed: Option<Vec<Platform>>,
    profile: LaunchProfile,
}

impl ResourceTableBuilder {
    pub fn runtime(mut self, platform: Platform, blob: Blob) -> Self {
        self.entries
            .insert(ResourceKey::runtime(platform), Resource::new(blob));
        self
    }

    pub fn dependency_archive(self, blob: Blob) -> Self {
        self.shared(ResourceKind::DependencyArchive, blob)
    }

    pub fn server_script(self, blob: Blob) -> Self {
        self.shared(ResourceKind::ServerScript, blob)
    }

    pub fn project_store(self, blob: Blob) -> Self {
        self.shared(ResourceKind::ProjectStore, blob)
    }

    fn shared(mut self, kind: ResourceKind, blob: Blob) -> Self {
        self.entries
            .insert(ResourceKey::shared(kind), Resource::new(blob));
        self
    }

    /// Restrict the platforms the artifact claims (default: all supported)
    pub fn claim(mut self, platforms: &[Platform]) -> Self {
        self.claimed = Some(platforms.to_vec());
        self
    }

    pub fn profile(mut self, profile: LaunchProfile) -> Self {
        self.profile = profile;
        self
    }

    /// Validate and freeze the table
    pub fn build(self) -> Result<ResourceTable> {
        self.profile.validate()?;

        let mut claimed = self
            .claimed
            .unwrap_or_else(|| Platform::SUPPORTED.to_vec());
        claimed.sort();
        claimed.dedup();
        if claimed.is_empty() {
            return Err(LaunchError::Config(
                "artifact must claim at least one platform".to_string(),
            ));
        }

        let missing: Vec<String> = claimed
            .iter()
            .filter(|p| !self.entries.contains_key(&ResourceKey::runtime(**p)))
            .map(|p| p.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(LaunchError::Config(format!(
                "no runtime binary for claimed platform(s): {}",
                missing.join(", ")
            )));
        }

        for kind in [
            ResourceKind::DependencyArchive,
            ResourceKind::ServerScript,
            ResourceKind::ProjectStore,
        ] {
            if !self.entries.contains_key(&ResourceKey::shared(kind)) {
                return Err(LaunchError::MissingResource(kind));
            }
        }

        Ok(ResourceTable {
            entries: self.entries,
            claimed,
            profile: self.profile,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::{Arch, Os};

    fn full_builder() -> ResourceTableBuilder {
        let mut builder = ResourceTable::builder();
        for platform in Platform::SUPPORTED {
            builder = builder.runtime(platform, Blob::from_bytes(platform.to_string()));
        }
        builder
            .dependency_archive(Blob::from_bytes(b"deps".to_vec()))
            .server_script(Blob::from_bytes(b"server".to_vec()))
            .project_store(Blob::from_bytes(b"store".to_vec()))
    }

    #[test]
    fn test_every_supported_platform_selects_its_own_runtime() {
        let table = full_builder().build().unwrap();
        for platform in Platform::SUPPORTED {
            let entry = table.runtime_for(platform).unwrap();
            assert_eq!(entry.blob.read_all().unwrap(), platform.to_string().into_bytes());
        }
    }

    #[test]
    fn test_missing_runtime_is_a_build_error() {
        let builder = ResourceTable::builder()
            .runtime(Platform::new(Os::Linux, Arch::X64), Blob::from_bytes(b"x".to_vec()))
            .dependency_archive(Blob::from_bytes(b"d".to_vec()))
            .server_script(Blob::from_bytes(b"s".to_vec()))
            .project_store(Blob::from_bytes(b"p".to_vec()));
        let err = builder.build().unwrap_err();
        assert!(err.to_string().contains("darwin-arm64"));
    }

    #[test]
    fn test_unclaimed_platform_is_unsupported() {
        let linux = Platform::new(Os::Linux, Arch::X64);
        let table = ResourceTable::builder()
            .runtime(linux, Blob::from_bytes(b"x".to_vec()))
            .dependency_archive(Blob::from_bytes(b"d".to_vec()))
            .server_script(Blob::from_bytes(b"s".to_vec()))
            .project_store(Blob::from_bytes(b"p".to_vec()))
            .claim(&[linux])
            .build()
            .unwrap();

        assert!(table.runtime_for(linux).is_ok());
        let err = table
            .runtime_for(Platform::new(Os::Windows, Arch::Arm64))
            .unwrap_err();
        assert!(matches!(err, LaunchError::UnsupportedPlatform { platform } if platform == "windows-arm64"));
    }

    #[test]
    fn test_with_replaced_keeps_other_entries() {
        let table = full_builder().build().unwrap();
        let updated = table
            .with_replaced(ResourceKind::ProjectStore, Blob::from_bytes(b"edited".to_vec()))
            .unwrap();

        assert_eq!(
            updated.get(ResourceKind::ProjectStore).unwrap().blob.read_all().unwrap(),
            b"edited"
        );
        assert_eq!(
            table.get(ResourceKind::ProjectStore).unwrap().blob.read_all().unwrap(),
            b"store"
        );
        assert_eq!(
            updated.get(ResourceKind::ServerScript).unwrap().blob.read_all().unwrap(),
            b"server"
        );
        assert_eq!(updated.len(), table.len());
    }

    #[test]
    fn test_region_blob_reads_exact_range() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("image");
        std::fs::write(&path, b"0123456789").unwrap();
        let blob = Blob::Region {
            path: Arc::new(path),
            offset: 3,
            len: 4,
        };
        assert_eq!(blob.read_all().unwrap(), b"3456");
        assert_eq!(blob.sha256().unwrap(), Blob::from_bytes(b"3456".to_vec()).sha256().unwrap());
    }

    #[test]
    fn test_copy_verified_rejects_digest_mismatch() {
        let resource = Resource {
            blob: Blob::from_bytes(b"payload".to_vec()),
            sha256: Some("00".repeat(32)),
        };
        let mut out = Vec::new();
        let err = resource
            .copy_verified(ResourceKind::ServerScript, &mut out)
            .unwrap_err();
        assert!(matches!(err, LaunchError::CorruptResource { kind: ResourceKind::ServerScript, .. }));
    }
}
