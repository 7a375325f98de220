//! Per-namespace `/etc` overlay
//!
//! Each entry of `/etc/netns/<name>/` is bind-mounted over the file or
//! directory of the same name under `/etc`, the way `ip netns exec` does.

use std::path::PathBuf;

use nix::mount::{MntFlags, MsFlags};
use netscope_core::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::config::NetnsPaths;
use crate::syscall::Kernel;

/// One bind mount performed for a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountOverlayEntry {
    /// Entry name inside the overlay directory
    pub name: String,
    /// `/etc/netns/<ns>/<name>`
    pub source: PathBuf,
    /// `/etc/<name>`
    pub destination: PathBuf,
}

/// An overlay entry that could not be unmounted
#[derive(Debug)]
pub struct UnmountFailure {
    /// Entry that stayed mounted
    pub entry: MountOverlayEntry,
    /// Why
    pub error: Error,
}

/// Entries to mount for namespace `name`, sorted by entry name.
///
/// A missing overlay directory yields no entries.
pub(crate) fn plan(paths: &NetnsPaths, name: &str) -> Result<Vec<MountOverlayEntry>> {
    let dir = paths.overlay_dir(name);
    let entries = match std::fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(dir = %dir.display(), "No overlay directory");
            return Ok(Vec::new());
        }
        Err(e) => return Err(e.into()),
    };

    let mut plan = Vec::new();
    for entry in entries {
        let entry = entry?;
        let file_name = entry.file_name();
        plan.push(MountOverlayEntry {
            name: file_name.to_string_lossy().into_owned(),
            source: entry.path(),
            destination: paths.system_etc.join(&file_name),
        });
    }
    plan.sort_by(|a, b| a.name.cmp(&b.name));

    Ok(plan)
}

/// Bind-mount every planned entry, appending successes to `mounted`.
///
/// A failing entry does not stop the remaining ones; the first failure is
/// returned once all entries were attempted.
pub(crate) fn mount_all<K: Kernel + ?Sized>(
    kernel: &K,
    plan: Vec<MountOverlayEntry>,
    mounted: &mut Vec<MountOverlayEntry>,
) -> Result<()> {
    let mut first_error = None;

    for entry in plan {
        match kernel.mount(
            Some(entry.source.as_path()),
            &entry.destination,
            None,
            MsFlags::MS_BIND,
        ) {
            Ok(()) => {
                tracing::debug!(
                    source = %entry.source.display(),
                    destination = %entry.destination.display(),
                    "Overlay entry mounted"
                );
                mounted.push(entry);
            }
            Err(e) => {
                tracing::warn!(
                    source = %entry.source.display(),
                    destination = %entry.destination.display(),
                    error = %e,
                    "Failed to mount overlay entry"
                );
                first_error.get_or_insert(e);
            }
        }
    }

    first_error.map_or(Ok(()), Err)
}

/// Detach every mounted entry, newest first. Failures are collected, not
/// returned early.
pub(crate) fn unmount_all<K: Kernel + ?Sized>(
    kernel: &K,
    mounted: Vec<MountOverlayEntry>,
) -> (usize, Vec<UnmountFailure>) {
    let mut unmounted = 0;
    let mut failures = Vec::new();

    for entry in mounted.into_iter().rev() {
        match kernel.umount(&entry.destination, MntFlags::MNT_DETACH) {
            Ok(()) => unmounted += 1,
            Err(error) => {
                tracing::warn!(
                    destination = %entry.destination.display(),
                    error = %error,
                    "Failed to unmount overlay entry"
                );
                failures.push(UnmountFailure { entry, error });
            }
        }
    }

    (unmounted, failures)
}
