//! Resolving namespace references to namespace files

use std::path::{Path, PathBuf};

use netscope_core::{Error, NamespaceId, NamespaceRef, Result};

use crate::config::NETNS_RUN_DIR;

/// Namespace file of the calling thread
pub const THREAD_SELF_NETNS: &str = "/proc/thread-self/ns/net";

/// Maps [`NamespaceRef`]s to namespace files and back
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceLocator {
    run_dir: PathBuf,
}

impl Default for NamespaceLocator {
    fn default() -> Self {
        Self::new(NETNS_RUN_DIR)
    }
}

impl NamespaceLocator {
    /// Create a locator over a named-namespace directory
    #[must_use]
    pub fn new(run_dir: impl Into<PathBuf>) -> Self {
        Self {
            run_dir: run_dir.into(),
        }
    }

    /// Named-namespace directory
    #[must_use]
    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    /// Path a reference points at, without checking it exists
    ///
    /// # Errors
    /// Returns [`Error::InvalidConfig`] if a name would escape the
    /// named-namespace directory
    pub fn path_of(&self, ns: &NamespaceRef) -> Result<PathBuf> {
        ns.validate()?;
        Ok(match ns {
            NamespaceRef::ByName(name) => self.run_dir.join(name),
            NamespaceRef::ByPid(pid) => PathBuf::from(format!("/proc/{pid}/ns/net")),
            NamespaceRef::ByPath(path) => path.clone(),
        })
    }

    /// Resolve a reference to an existing namespace file
    ///
    /// # Errors
    /// Returns [`Error::InvalidConfig`] for a malformed name and
    /// [`Error::NotFound`] with the attempted path if it does not exist
    pub fn resolve(&self, ns: &NamespaceRef) -> Result<PathBuf> {
        let path = self.path_of(ns)?;
        if !path.exists() {
            tracing::debug!(path = %path.display(), "Namespace path does not exist");
            return Err(Error::not_found(path));
        }
        Ok(path)
    }

    /// Namespace file of the calling thread
    #[must_use]
    pub fn current_thread() -> PathBuf {
        PathBuf::from(THREAD_SELF_NETNS)
    }

    /// Find the registered name of the namespace at `path`
    ///
    /// Matches on device and inode, so any path to the same namespace
    /// (including `/proc/<pid>/ns/net`) resolves to its name.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if `path` is missing or not registered
    pub fn name_from_path(&self, path: &Path) -> Result<String> {
        let wanted = NamespaceId::of_path(path)?;

        for name in self.list_namespaces()? {
            let candidate = self.run_dir.join(&name);
            match NamespaceId::of_path(&candidate) {
                Ok(id) if id == wanted => {
                    tracing::debug!(
                        path = %path.display(),
                        name = %name,
                        "Matched namespace name"
                    );
                    return Ok(name);
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(
                        path = %candidate.display(),
                        error = %e,
                        "Skipping unreadable namespace entry"
                    );
                }
            }
        }

        Err(Error::not_found(path))
    }

    /// Registered name for a reference
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if the reference does not resolve or the
    /// namespace has no name
    pub fn name_for(&self, ns: &NamespaceRef) -> Result<String> {
        let path = self.resolve(ns)?;
        match ns.as_name() {
            Some(name) => Ok(name.to_string()),
            None => self.name_from_path(&path),
        }
    }

    /// Names registered in the named-namespace directory, sorted
    ///
    /// # Errors
    /// Returns error if the directory exists but cannot be read
    pub fn list_namespaces(&self) -> Result<Vec<String>> {
        let entries = match std::fs::read_dir(&self.run_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();

        Ok(names)
    }
}

/// Resolve a name, pid or path against the default directories
///
/// # Errors
/// Returns error if the argument is malformed or does not exist
pub fn resolve_namespace_path(name_or_pid_or_path: &str) -> Result<PathBuf> {
    let ns: NamespaceRef = name_or_pid_or_path.parse()?;
    NamespaceLocator::default().resolve(&ns)
}
