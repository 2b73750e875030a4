/// Child environment overlay
/// The child inherits the launcher's environment with two changes: the
/// dependency variable points at the extracted dependency directory and the
/// runtime directory is prepended to `PATH`. The launcher's own environment
/// is never modified.
use crate::config::types::{LaunchError, Result};
use std::collections::BTreeMap;
use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Variables to set on top of the inherited environment
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvOverlay {
    vars: BTreeMap<OsString, OsString>,
}

impl EnvOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overlay for a launched runtime.
    ///
    /// `inherited_path` is the current `PATH` (if any); it is passed in so
    /// callers and tests do not depend on the process environment.
    pub fn for_runtime(
        runtime_binary: &Path,
        dependency_var: &str,
        dependency_dir: &Path,
        inherited_path: Option<OsString>,
    ) -> Result<Self> {
        let mut overlay = Self::new();
        overlay.set(dependency_var, dependency_dir.as_os_str());

        let runtime_dir = runtime_binary.parent().unwrap_or_else(|| Path::new("."));
        let path = prepend_search_path(runtime_dir, inherited_path)?;
        overlay.set("PATH", path);
        Ok(overlay)
    }

    pub fn set(&mut self, key: impl Into<OsString>, value: impl Into<OsString>) {
        self.vars.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&OsString> {
        self.vars.get(&OsString::from(key))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&OsString, &OsString)> {
        self.vars.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

/// `dir` followed by the entries of `inherited`, joined with the platform's
/// path-list separator.
pub fn prepend_search_path(dir: &Path, inherited: Option<OsString>) -> Result<OsString> {
    let mut entries: Vec<PathBuf> = vec![dir.to_path_buf()];
    if let Some(inherited) = inherited {
        entries.extend(env::split_paths(&inherited).filter(|p| p.as_path() != dir));
    }
    env::join_paths(entries).map_err(|e| {
        LaunchError::Config(format!(
            "cannot add {} to PATH: {}",
            dir.display(),
            e
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn test_runtime_dir_is_prepended() {
        let overlay = EnvOverlay::for_runtime(
            Path::new("/ws/bin/node"),
            "NODE_PATH",
            Path::new("/ws/node_modules"),
            Some(OsString::from("/usr/bin:/bin")),
        )
        .unwrap();

        assert_eq!(overlay.get("PATH").unwrap(), "/ws/bin:/usr/bin:/bin");
        assert_eq!(overlay.get("NODE_PATH").unwrap(), "/ws/node_modules");
    }

    #[test]
    fn test_missing_path_yields_runtime_dir_only() {
        let dir = Path::new("bin");
        let joined = prepend_search_path(dir, None).unwrap();
        assert_eq!(joined, OsString::from("bin"));
    }

    #[cfg(unix)]
    #[test]
    fn test_runtime_dir_not_duplicated() {
        let joined = prepend_search_path(Path::new("/ws/bin"), Some(OsString::from("/ws/bin:/bin"))).unwrap();
        assert_eq!(joined, OsString::from("/ws/bin:/bin"));
    }

    #[cfg(unix)]
    #[test]
    fn test_separator_in_dir_is_rejected() {
        let err = prepend_search_path(Path::new("/odd:dir"), None).unwrap_err();
        assert!(matches!(err, LaunchError::Config(_)));
    }
}
