//! Core type definitions with strong typing and validation

use serde::{Deserialize, Serialize};
use std::fmt;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::{Error, Result};

/// Process identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct ProcessId(i32);

impl ProcessId {
    /// Create from raw PID
    #[must_use]
    pub const fn from_raw(pid: i32) -> Self {
        Self(pid)
    }

    /// Get the current process ID
    #[must_use]
    pub fn current() -> Self {
        Self(nix::unistd::getpid().as_raw())
    }

    /// Get raw PID value
    #[must_use]
    pub const fn as_raw(self) -> i32 {
        self.0
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<nix::unistd::Pid> for ProcessId {
    fn from(pid: nix::unistd::Pid) -> Self {
        Self(pid.as_raw())
    }
}

/// Identifies a network namespace by registered name, owning process, or
/// namespace file path.
///
/// Deserialized names go through the same validation as [`NamespaceRef::name`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "WireNamespaceRef")]
pub enum NamespaceRef {
    /// Name registered under the named-namespace directory
    #[serde(rename = "name")]
    ByName(String),
    /// Process whose network namespace is targeted
    #[serde(rename = "pid")]
    ByPid(ProcessId),
    /// Namespace file path, used unchanged
    #[serde(rename = "path")]
    ByPath(PathBuf),
}

/// Unchecked serde form of [`NamespaceRef`]
#[derive(Deserialize)]
enum WireNamespaceRef {
    #[serde(rename = "name")]
    ByName(String),
    #[serde(rename = "pid")]
    ByPid(ProcessId),
    #[serde(rename = "path")]
    ByPath(PathBuf),
}

impl TryFrom<WireNamespaceRef> for NamespaceRef {
    type Error = Error;

    fn try_from(wire: WireNamespaceRef) -> Result<Self> {
        match wire {
            WireNamespaceRef::ByName(name) => Self::name(name),
            WireNamespaceRef::ByPid(pid) => Ok(Self::ByPid(pid)),
            WireNamespaceRef::ByPath(path) => Ok(Self::ByPath(path)),
        }
    }
}

impl NamespaceRef {
    /// Maximum length of a namespace name (`NAME_MAX`)
    pub const MAX_NAME_LENGTH: usize = 255;

    /// Reference a named namespace, validating the name
    ///
    /// # Errors
    /// Returns error if the name cannot be a single directory entry
    pub fn name(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        Self::validate_name(&name)?;
        Ok(Self::ByName(name))
    }

    /// Reference the namespace of a process
    #[must_use]
    pub const fn pid(pid: i32) -> Self {
        Self::ByPid(ProcessId::from_raw(pid))
    }

    /// Reference a namespace file directly
    #[must_use]
    pub fn path(path: impl Into<PathBuf>) -> Self {
        Self::ByPath(path.into())
    }

    /// The namespace of the current process
    #[must_use]
    pub fn current_process() -> Self {
        Self::ByPid(ProcessId::current())
    }

    /// Explicit name, if this reference carries one
    #[must_use]
    pub fn as_name(&self) -> Option<&str> {
        match self {
            Self::ByName(name) => Some(name),
            _ => None,
        }
    }

    /// Check a reference built directly from its variants
    ///
    /// # Errors
    /// Returns [`Error::InvalidConfig`] if a `ByName` name cannot be a single
    /// directory entry
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::ByName(name) => Self::validate_name(name),
            Self::ByPid(_) | Self::ByPath(_) => Ok(()),
        }
    }

    fn validate_name(name: &str) -> Result<()> {
        if name.is_empty() || name == "." || name == ".." {
            return Err(Error::InvalidConfig {
                message: format!("Invalid namespace name {name:?}"),
            });
        }

        if name.len() > Self::MAX_NAME_LENGTH {
            return Err(Error::InvalidConfig {
                message: format!(
                    "Namespace name too long (max {} bytes)",
                    Self::MAX_NAME_LENGTH
                ),
            });
        }

        if name.contains(['/', '\0']) {
            return Err(Error::InvalidConfig {
                message: format!("Namespace name {name:?} contains '/' or NUL"),
            });
        }

        Ok(())
    }
}

impl fmt::Display for NamespaceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ByName(name) => write!(f, "{name}"),
            Self::ByPid(pid) => write!(f, "pid {pid}"),
            Self::ByPath(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Parses the single-argument form: digits are a pid, anything containing
/// `/` is a path, everything else is a name.
impl FromStr for NamespaceRef {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) {
            let pid = s.parse::<i32>().map_err(|e| Error::InvalidConfig {
                message: format!("Invalid pid {s:?}: {e}"),
            })?;
            return Ok(Self::pid(pid));
        }

        if s.contains('/') {
            return Ok(Self::path(s));
        }

        Self::name(s)
    }
}

/// Identity of a namespace file: the device and inode it resolves to.
///
/// Two paths refer to the same namespace exactly when their ids are equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NamespaceId {
    /// Device number
    pub dev: u64,
    /// Inode number
    pub ino: u64,
}

impl NamespaceId {
    /// Stat `path` (following links) and take its identity
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if the path does not exist
    pub fn of_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let meta = std::fs::metadata(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::not_found(path),
            _ => Error::Io(e),
        })?;
        Ok(Self::from(&meta))
    }
}

impl From<&std::fs::Metadata> for NamespaceId {
    fn from(meta: &std::fs::Metadata) -> Self {
        Self {
            dev: meta.dev(),
            ino: meta.ino(),
        }
    }
}

impl fmt::Display for NamespaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "net:[{}] (dev {})", self.ino, self.dev)
    }
}
