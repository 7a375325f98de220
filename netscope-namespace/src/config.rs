//! Session configuration

use std::path::PathBuf;

use netscope_core::NamespaceRef;
use serde::{Deserialize, Serialize};

/// Directory holding named network namespace files
pub const NETNS_RUN_DIR: &str = "/var/run/netns";

/// Directory holding per-namespace configuration overlays
pub const NETNS_ETC_DIR: &str = "/etc/netns";

/// System configuration directory the overlays are mounted over
pub const SYSTEM_ETC_DIR: &str = "/etc";

/// Well-known directories used to locate namespaces and their overlays
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetnsPaths {
    /// Named namespace files (`/var/run/netns`)
    pub run_dir: PathBuf,

    /// Per-namespace overlay sources (`/etc/netns`)
    pub etc_dir: PathBuf,

    /// Overlay destination (`/etc`)
    pub system_etc: PathBuf,
}

impl Default for NetnsPaths {
    fn default() -> Self {
        Self {
            run_dir: PathBuf::from(NETNS_RUN_DIR),
            etc_dir: PathBuf::from(NETNS_ETC_DIR),
            system_etc: PathBuf::from(SYSTEM_ETC_DIR),
        }
    }
}

impl NetnsPaths {
    /// Overlay source directory for a namespace name
    #[must_use]
    pub fn overlay_dir(&self, name: &str) -> PathBuf {
        self.etc_dir.join(name)
    }
}

/// Configuration for one namespace session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Namespace to enter
    pub target: NamespaceRef,

    /// Bind-mount `/etc/netns/<name>/*` over `/etc` while inside
    #[serde(default)]
    pub bind_mount_etc: bool,

    /// Unshare the mount namespace before mounting the overlay.
    ///
    /// Only consulted when `bind_mount_etc` is set. Turning this off is
    /// useful when the thread already runs in a private mount namespace.
    #[serde(default = "default_isolate_mounts")]
    pub isolate_mounts: bool,

    /// Well-known directories
    #[serde(default)]
    pub paths: NetnsPaths,
}

const fn default_isolate_mounts() -> bool {
    true
}

impl SessionConfig {
    /// Create a plain network switch into `target`
    #[must_use]
    pub fn new(target: NamespaceRef) -> Self {
        Self {
            target,
            bind_mount_etc: false,
            isolate_mounts: true,
            paths: NetnsPaths::default(),
        }
    }

    /// Enable the `/etc` overlay
    #[must_use]
    pub fn with_bind_mount_etc(mut self, enable: bool) -> Self {
        self.bind_mount_etc = enable;
        self
    }

    /// Enable mount namespace isolation
    #[must_use]
    pub fn with_isolate_mounts(mut self, enable: bool) -> Self {
        self.isolate_mounts = enable;
        self
    }

    /// Skip unsharing the mount namespace (inverse of `with_isolate_mounts`)
    #[must_use]
    pub fn with_prevent_unshare(self, prevent: bool) -> Self {
        self.with_isolate_mounts(!prevent)
    }

    /// Override the well-known directories
    #[must_use]
    pub fn with_paths(mut self, paths: NetnsPaths) -> Self {
        self.paths = paths;
        self
    }

    /// Whether acquiring this session unshares the mount namespace
    #[must_use]
    pub const fn unshares_mounts(&self) -> bool {
        self.bind_mount_etc && self.isolate_mounts
    }
}
