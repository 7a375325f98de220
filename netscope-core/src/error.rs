//! Error types for netscope

use std::path::PathBuf;

use nix::errno::Errno;
use thiserror::Error;

/// Netscope error types
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A namespace identifier did not resolve to an existing path
    #[error("Namespace not found: {}", path.display())]
    NotFound {
        /// Path that was probed
        path: PathBuf,
    },

    /// A wrapped kernel primitive returned failure
    #[error("{operation}({args}) failed: {code}")]
    Syscall {
        /// OS error code read at the point of failure
        code: Errno,
        /// Name of the primitive
        operation: &'static str,
        /// Rendered arguments, for diagnostics
        args: String,
    },

    /// The API was used out of order
    #[error("Usage error: {message}")]
    Usage {
        /// Error message
        message: String,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {message}")]
    InvalidConfig {
        /// Error message
        message: String,
    },

    /// Switching back to the saved namespace failed.
    ///
    /// The calling thread is left in an unknown network namespace.
    #[error("Failed to restore network namespace {}: {code}", path.display())]
    Restore {
        /// OS error code of the failed `setns`
        code: Errno,
        /// Path the restore handle was opened from
        path: PathBuf,
    },

    /// The worker thread running a session went away without a result
    #[error("Namespace worker thread terminated without a result")]
    WorkerLost,
}

impl Error {
    /// Build a [`Error::Usage`]
    pub fn usage(message: impl Into<String>) -> Self {
        Self::Usage {
            message: message.into(),
        }
    }

    /// Build a [`Error::NotFound`]
    pub fn not_found(path: impl Into<PathBuf>) -> Self {
        Self::NotFound { path: path.into() }
    }

    /// OS error code carried by syscall-derived errors
    #[must_use]
    pub fn errno(&self) -> Option<Errno> {
        match self {
            Self::Syscall { code, .. } | Self::Restore { code, .. } => Some(*code),
            Self::Io(e) => e.raw_os_error().map(Errno::from_raw),
            _ => None,
        }
    }

    /// Whether the thread may be stranded in a foreign namespace
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Restore { .. })
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for Error {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        Self::WorkerLost
    }
}

/// Result type alias for netscope operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_syscall_display() {
        let err = Error::Syscall {
            code: Errno::EPERM,
            operation: "setns",
            args: "fd=3, nstype=0x40000000".to_string(),
        };

        let msg = err.to_string();
        assert!(msg.starts_with("setns(fd=3, nstype=0x40000000) failed"));
        assert_eq!(err.errno(), Some(Errno::EPERM));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_restore_is_fatal() {
        let err = Error::Restore {
            code: Errno::EINVAL,
            path: PathBuf::from("/proc/thread-self/ns/net"),
        };

        assert!(err.is_fatal());
        assert_eq!(err.errno(), Some(Errno::EINVAL));
        assert!(err.to_string().contains("/proc/thread-self/ns/net"));
    }

    #[test]
    fn test_not_found_carries_path() {
        let err = Error::not_found("/var/run/netns/missing");

        assert!(matches!(err, Error::NotFound { ref path } if path.ends_with("missing")));
        assert_eq!(err.errno(), None);
    }

    #[test]
    fn test_io_errno() {
        let err = Error::from(std::io::Error::from_raw_os_error(Errno::ENOENT as i32));
        assert_eq!(err.errno(), Some(Errno::ENOENT));
    }
}
