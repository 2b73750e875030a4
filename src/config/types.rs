/// Shared type definitions and closed enums for devcapsule
/// Platform triples, resource kinds, and the launcher error taxonomy
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

/// Operating system half of a platform triple
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Os {
    Linux,
    Darwin,
    Windows,
}

/// CPU architecture half of a platform triple
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Arch {
    X64,
    Arm64,
}

/// Platform triple (`os-arch`) that selects a runtime binary
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Platform {
    pub os: Os,
    pub arch: Arch,
}

impl Platform {
    /// Every platform an artifact must carry a runtime binary for
    pub const SUPPORTED: [Platform; 6] = [
        Platform::new(Os::Linux, Arch::X64),
        Platform::new(Os::Linux, Arch::Arm64),
        Platform::new(Os::Darwin, Arch::X64),
        Platform::new(Os::Darwin, Arch::Arm64),
        Platform::new(Os::Windows, Arch::X64),
        Platform::new(Os::Windows, Arch::Arm64),
    ];

    pub const fn new(os: Os, arch: Arch) -> Self {
        Self { os, arch }
    }

    /// Platform of the running launcher.
    ///
    /// Hosts outside the supported matrix are reported as an error carrying
    /// the raw `std::env::consts` names so the message is diagnosable.
    pub fn host() -> Result<Self> {
        let os = match std::env::consts::OS {
            "linux" => Os::Linux,
            "macos" => Os::Darwin,
            "windows" => Os::Windows,
            other => {
                return Err(LaunchError::UnsupportedPlatform {
                    platform: format!("{}-{}", other, std::env::consts::ARCH),
                })
            }
        };
        let arch = match std::env::consts::ARCH {
            "x86_64" => Arch::X64,
            "aarch64" => Arch::Arm64,
            other => {
                return Err(LaunchError::UnsupportedPlatform {
                    platform: format!("{}-{}", std::env::consts::OS, other),
                })
            }
        };
        Ok(Self { os, arch })
    }

    /// Suffix the extracted runtime binary needs to be executable
    pub fn exe_suffix(&self) -> &'static str {
        match self.os {
            Os::Windows => ".exe",
            Os::Linux | Os::Darwin => "",
        }
    }

    pub fn is_supported(&self) -> bool {
        Self::SUPPORTED.contains(self)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let os = match self.os {
            Os::Linux => "linux",
            Os::Darwin => "darwin",
            Os::Windows => "windows",
        };
        let arch = match self.arch {
            Arch::X64 => "x64",
            Arch::Arm64 => "arm64",
        };
        write!(f, "{}-{}", os, arch)
    }
}

impl FromStr for Platform {
    type Err = LaunchError;

    fn from_str(s: &str) -> Result<Self> {
        let (os, arch) = s.split_once('-').ok_or_else(|| LaunchError::UnsupportedPlatform {
            platform: s.to_string(),
        })?;
        let os = match os {
            "linux" => Os::Linux,
            "darwin" | "macos" => Os::Darwin,
            "windows" => Os::Windows,
            _ => {
                return Err(LaunchError::UnsupportedPlatform {
                    platform: s.to_string(),
                })
            }
        };
        let arch = match arch {
            "x64" | "x86_64" | "amd64" => Arch::X64,
            "arm64" | "aarch64" => Arch::Arm64,
            _ => {
                return Err(LaunchError::UnsupportedPlatform {
                    platform: s.to_string(),
                })
            }
        };
        Ok(Self { os, arch })
    }
}

impl TryFrom<String> for Platform {
    type Error = LaunchError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Platform> for String {
    fn from(platform: Platform) -> Self {
        platform.to_string()
    }
}

/// Kinds of embedded resources
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    RuntimeBinary,
    DependencyArchive,
    ServerScript,
    ProjectStore,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceKind::RuntimeBinary => "runtime binary",
            ResourceKind::DependencyArchive => "dependency archive",
            ResourceKind::ServerScript => "server script",
            ResourceKind::ProjectStore => "project store",
        };
        f.write_str(name)
    }
}

/// Custom error types for devcapsule
#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("unsupported platform {platform}: no embedded runtime binary")]
    UnsupportedPlatform { platform: String },

    #[error("cannot allocate workspace at {}: {source}", path.display())]
    ResourceExhausted {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt dependency archive: {0}")]
    CorruptArchive(String),

    #[error("unsafe archive path {}: {reason}", path.display())]
    UnsafePath { path: PathBuf, reason: String },

    #[error("failed to launch {}: {source}", path.display())]
    LaunchFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("repack to {} failed: {source}", path.display())]
    RepackFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{} carries no embedded resource payload", path.display())]
    MissingPayload { path: PathBuf },

    #[error("artifact {} is corrupt: {details}", path.display())]
    CorruptArtifact { path: PathBuf, details: String },

    #[error("embedded {kind} is corrupt: {details}")]
    CorruptResource { kind: ResourceKind, details: String },

    #[error("resource table has no {0}")]
    MissingResource(ResourceKind),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convert launcher errors to process exit codes
impl From<&LaunchError> for i32 {
    fn from(err: &LaunchError) -> i32 {
        match err {
            LaunchError::UnsupportedPlatform { .. } => 3,
            LaunchError::ResourceExhausted { .. } => 4,
            LaunchError::CorruptArchive(_)
            | LaunchError::CorruptResource { .. }
            | LaunchError::CorruptArtifact { .. } => 5,
            LaunchError::UnsafePath { .. } => 6,
            LaunchError::LaunchFailed { .. } => 7,
            LaunchError::RepackFailed { .. } => 8,
            LaunchError::MissingPayload { .. } | LaunchError::MissingResource(_) => 9,
            LaunchError::Config(_) => 2,
            LaunchError::Io(_) => 74,
        }
    }
}

/// Result type alias for devcapsule operations
pub type Result<T> = std::result::Result<T, LaunchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_display_roundtrip() {
        for platform in Platform::SUPPORTED {
            let parsed: Platform = platform.to_string().parse().unwrap();
            assert_eq!(parsed, platform);
        }
    }

    #[test]
    fn test_platform_aliases() {
        let p: Platform = "macos-aarch64".parse().unwrap();
        assert_eq!(p, Platform::new(Os::Darwin, Arch::Arm64));
        assert!("freebsd-x64".parse::<Platform>().is_err());
        assert!("linux".parse::<Platform>().is_err());
    }

    #[test]
    fn test_windows_exe_suffix() {
        assert_eq!(Platform::new(Os::Windows, Arch::X64).exe_suffix(), ".exe");
        assert_eq!(Platform::new(Os::Linux, Arch::X64).exe_suffix(), "");
    }

    #[test]
    fn test_exit_codes_are_distinct_for_fatal_setup_errors() {
        let unsupported = LaunchError::UnsupportedPlatform {
            platform: "plan9-x64".into(),
        };
        let launch = LaunchError::LaunchFailed {
            path: "/nope".into(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert_ne!(i32::from(&unsupported), i32::from(&launch));
        assert_ne!(i32::from(&unsupported), 0);
    }
}
