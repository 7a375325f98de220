//! Sockets created inside another network namespace

use std::os::fd::OwnedFd;

use nix::sys::socket::{AddressFamily, SockFlag, SockProtocol, SockType};
use netscope_core::{NamespaceRef, Result};

use crate::config::SessionConfig;
use crate::session::with_namespace;
use crate::syscall::syscall_error;

/// Open a socket that belongs to `ns`.
///
/// The socket stays bound to that namespace after the calling thread has
/// switched back.
///
/// # Errors
/// Returns error if the namespace cannot be entered or `socket(2)` fails
pub fn open_socket_in_namespace(
    ns: &NamespaceRef,
    family: AddressFamily,
    ty: SockType,
) -> Result<OwnedFd> {
    open_socket_with(
        &SessionConfig::new(ns.clone()),
        family,
        ty,
        SockFlag::SOCK_CLOEXEC,
        None,
    )
}

/// Open a socket inside a fully configured session
///
/// # Errors
/// Returns error if the namespace cannot be entered or `socket(2)` fails
pub fn open_socket_with(
    config: &SessionConfig,
    family: AddressFamily,
    ty: SockType,
    flags: SockFlag,
    protocol: Option<SockProtocol>,
) -> Result<OwnedFd> {
    with_namespace(config, || {
        nix::sys::socket::socket(family, ty, flags, protocol)
    })?
    .map_err(|code| {
        syscall_error(
            code,
            "socket",
            format!("family={family:?}, type={ty:?}, flags={:#x}", flags.bits()),
        )
    })
}
