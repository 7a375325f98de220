//! Scoped network namespace switching
//!
//! This crate lets a thread step into an existing Linux network namespace,
//! do some work there, and step back out:
//! - Locator - resolve a name, pid or path to a namespace file
//! - Session - switch in, optionally overlay `/etc/netns/<name>` on `/etc`,
//!   and switch back on release or drop
//! - Sockets - open a socket that lives in another namespace
//!
//! All raw `setns`/`unshare`/`mount`/`umount2` calls are private to this
//! crate and reachable only through a session.

#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]

pub mod config;
pub mod locator;
pub mod mounts;
pub mod overlay;
pub mod session;
pub mod socket;
pub mod spawn;
mod syscall;

pub use config::{NetnsPaths, SessionConfig, NETNS_ETC_DIR, NETNS_RUN_DIR};
pub use locator::{resolve_namespace_path, NamespaceLocator};
pub use mounts::{dump_mounts, mounted_targets};
pub use overlay::{MountOverlayEntry, UnmountFailure};
pub use session::{
    current_namespace, with_namespace, NamespaceHandle, NetnsSession, ReleaseReport,
    SessionState,
};
pub use socket::{open_socket_in_namespace, open_socket_with};
pub use spawn::spawn_in_namespace;

pub use netscope_core::{Error, NamespaceId, NamespaceRef, ProcessId, Result};
