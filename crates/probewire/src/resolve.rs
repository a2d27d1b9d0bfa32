//! Worker executable resolution.
//!
//! An identifier is either absolute (`/usr/libexec/probes/probe_file`) or a
//! bare/relative name looked up along a colon-separated search path. The
//! search path is an explicit input so lookups never depend on ambient
//! process state unless the caller asks for it with [`Resolver::from_env`].
//!
//! Execute permission is checked at lookup time only; the file can change
//! before it is exec'd.

use std::ffi::{OsStr, OsString};
use std::fmt;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

#[cfg(not(any(target_os = "linux", target_os = "freebsd", target_os = "dragonfly")))]
use nix::unistd::access as check_access;
#[cfg(any(target_os = "linux", target_os = "freebsd", target_os = "dragonfly"))]
use nix::unistd::eaccess as check_access;
use nix::unistd::AccessFlags;
use thiserror::Error;

/// Leading spaces skipped before an identifier; one more is an error.
pub const MAX_LEADING_SPACES: usize = 64;

/// Joined candidates at or beyond this length are skipped, never truncated.
pub const MAX_PATH_LEN: usize = 4096;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("invalid worker identifier: {0}")]
    InvalidIdentifier(String),

    #[error("no executable found for {0:?}")]
    NotFound(String),
}

/// Path to a file the effective user could execute when it was resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath(PathBuf);

impl ResolvedPath {
    pub fn as_path(&self) -> &Path {
        &self.0
    }

    pub fn into_path_buf(self) -> PathBuf {
        self.0
    }
}

impl AsRef<Path> for ResolvedPath {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

impl fmt::Display for ResolvedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.display().fmt(f)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Resolver {
    search_path: Option<OsString>,
}

impl Resolver {
    /// Snapshot `PATH` from the process environment.
    pub fn from_env() -> Self {
        Self {
            search_path: std::env::var_os("PATH"),
        }
    }

    pub fn with_search_path(search_path: impl Into<OsString>) -> Self {
        Self {
            search_path: Some(search_path.into()),
        }
    }

    /// Only absolute identifiers can resolve.
    pub fn without_search_path() -> Self {
        Self { search_path: None }
    }

    pub fn search_path(&self) -> Option<&OsStr> {
        self.search_path.as_deref()
    }

    pub fn resolve(&self, identifier: &str) -> Result<ResolvedPath, ResolveError> {
        let name = identifier.trim_start_matches(' ');
        let skipped = identifier.len() - name.len();
        if skipped > MAX_LEADING_SPACES {
            tracing::debug!(skipped, "Too much leading whitespace in worker identifier");
            return Err(ResolveError::InvalidIdentifier(format!(
                "more than {MAX_LEADING_SPACES} leading spaces"
            )));
        }
        if name.is_empty() {
            return Err(ResolveError::InvalidIdentifier("empty".to_string()));
        }
        if name.contains('\0') {
            return Err(ResolveError::InvalidIdentifier(
                "contains a NUL byte".to_string(),
            ));
        }

        if name.starts_with('/') {
            let path = Path::new(name);
            return if is_executable(path) {
                Ok(ResolvedPath(path.to_path_buf()))
            } else {
                Err(ResolveError::NotFound(name.to_string()))
            };
        }

        let Some(search_path) = self.search_path.as_deref() else {
            return Err(ResolveError::NotFound(name.to_string()));
        };

        for dir in search_path
            .as_bytes()
            .split(|b| *b == b':')
            .filter(|dir| !dir.is_empty())
        {
            let mut candidate = Vec::with_capacity(dir.len() + 1 + name.len());
            candidate.extend_from_slice(dir);
            candidate.push(b'/');
            candidate.extend_from_slice(name.as_bytes());
            if candidate.len() >= MAX_PATH_LEN {
                tracing::trace!(len = candidate.len(), "Skipping overlong candidate");
                continue;
            }

            let path = Path::new(OsStr::from_bytes(&candidate));
            if is_executable(path) {
                tracing::trace!(path = %path.display(), "Resolved worker executable");
                return Ok(ResolvedPath(path.to_path_buf()));
            }
        }

        Err(ResolveError::NotFound(name.to_string()))
    }
}

/// Resolve against the current `PATH`.
pub fn resolve(identifier: &str) -> Result<ResolvedPath, ResolveError> {
    Resolver::from_env().resolve(identifier)
}

fn is_executable(path: &Path) -> bool {
    match std::fs::metadata(path) {
        Ok(meta) if !meta.is_dir() => check_access(path, AccessFlags::X_OK).is_ok(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_and_blank() {
        let r = Resolver::with_search_path("/bin:/usr/bin");
        assert!(matches!(r.resolve(""), Err(ResolveError::InvalidIdentifier(_))));
        assert!(matches!(
            r.resolve("      "),
            Err(ResolveError::InvalidIdentifier(_))
        ));
    }

    #[test]
    fn rejects_nul() {
        let r = Resolver::with_search_path("/bin");
        assert!(matches!(
            r.resolve("sh\0evil"),
            Err(ResolveError::InvalidIdentifier(_))
        ));
    }

    #[test]
    fn missing_search_path_is_not_found() {
        let r = Resolver::without_search_path();
        assert_eq!(r.resolve("sh"), Err(ResolveError::NotFound("sh".into())));
    }

    #[test]
    fn empty_entries_are_skipped() {
        let r = Resolver::with_search_path("::");
        assert_eq!(r.resolve("sh"), Err(ResolveError::NotFound("sh".into())));
    }

    #[test]
    fn directories_do_not_resolve() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("probe_dir")).unwrap();
        let r = Resolver::with_search_path(dir.path().as_os_str());
        assert!(matches!(r.resolve("probe_dir"), Err(ResolveError::NotFound(_))));
        let abs = dir.path().join("probe_dir");
        assert!(matches!(
            r.resolve(abs.to_str().unwrap()),
            Err(ResolveError::NotFound(_))
        ));
    }
}
