//! Checked wrappers over the namespace and mount syscalls
//!
//! Every raw kernel interaction of this crate goes through [`Kernel`]. The
//! trait is crate-private: the only way for callers to switch namespaces is
//! a [`NetnsSession`](crate::NetnsSession).

use std::os::fd::{AsRawFd, BorrowedFd};
use std::path::Path;

use nix::errno::Errno;
use nix::mount::{MntFlags, MsFlags};
use nix::sched::CloneFlags;
use netscope_core::{Error, Result};

/// Flags for freshly mounted pseudo filesystems
pub(crate) const PSEUDO_FS_FLAGS: MsFlags = MsFlags::MS_NODEV
    .union(MsFlags::MS_NOEXEC)
    .union(MsFlags::MS_NOSUID)
    .union(MsFlags::MS_RELATIME);

/// The four primitives a session needs
pub(crate) trait Kernel {
    /// Reassociate the calling thread with the namespace behind `fd`
    fn setns(&self, fd: BorrowedFd<'_>, nstype: CloneFlags) -> Result<()>;

    /// Detach the calling thread from shared namespaces
    fn unshare(&self, flags: CloneFlags) -> Result<()>;

    /// Mount `source` on `target`
    fn mount(
        &self,
        source: Option<&Path>,
        target: &Path,
        fstype: Option<&str>,
        flags: MsFlags,
    ) -> Result<()>;

    /// Unmount `target`
    fn umount(&self, target: &Path, flags: MntFlags) -> Result<()>;
}

/// Build the error for a failed primitive
pub(crate) fn syscall_error(code: Errno, operation: &'static str, args: String) -> Error {
    tracing::debug!(
        operation,
        args = %args,
        error = %code,
        "Syscall failed"
    );
    Error::Syscall {
        code,
        operation,
        args,
    }
}

fn describe_mount(
    source: Option<&Path>,
    target: &Path,
    fstype: Option<&str>,
    flags: MsFlags,
) -> String {
    format!(
        "source={}, target={}, fstype={}, flags={:#x}",
        source.map_or_else(|| "none".into(), |s| s.display().to_string()),
        target.display(),
        fstype.unwrap_or("none"),
        flags.bits()
    )
}

/// Production kernel backed by `nix`
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct LinuxKernel;

impl Kernel for LinuxKernel {
    fn setns(&self, fd: BorrowedFd<'_>, nstype: CloneFlags) -> Result<()> {
        tracing::debug!(fd = fd.as_raw_fd(), nstype = nstype.bits(), "setns");
        nix::sched::setns(fd, nstype).map_err(|code| {
            syscall_error(
                code,
                "setns",
                format!("fd={}, nstype={:#x}", fd.as_raw_fd(), nstype.bits()),
            )
        })
    }

    fn unshare(&self, flags: CloneFlags) -> Result<()> {
        tracing::debug!(flags = flags.bits(), "unshare");
        nix::sched::unshare(flags)
            .map_err(|code| syscall_error(code, "unshare", format!("flags={:#x}", flags.bits())))
    }

    fn mount(
        &self,
        source: Option<&Path>,
        target: &Path,
        fstype: Option<&str>,
        flags: MsFlags,
    ) -> Result<()> {
        tracing::debug!(
            source = ?source,
            mountpoint = %target.display(),
            fstype = ?fstype,
            flags = flags.bits(),
            "mount"
        );
        nix::mount::mount(source, target, fstype, flags, None::<&str>).map_err(|code| {
            syscall_error(code, "mount", describe_mount(source, target, fstype, flags))
        })
    }

    fn umount(&self, target: &Path, flags: MntFlags) -> Result<()> {
        tracing::debug!(mountpoint = %target.display(), flags = flags.bits(), "umount2");
        nix::mount::umount2(target, flags).map_err(|code| {
            syscall_error(
                code,
                "umount2",
                format!("target={}, flags={:#x}", target.display(), flags.bits()),
            )
        })
    }
}

/// Move the calling thread into a private mount namespace with fresh
/// `/proc` and `/sys` views.
///
/// Sequence: `unshare(CLONE_NEWNS)`, make `/` a recursive slave, then
/// detach and remount `/proc` and `/sys` (with `bpf` and `cgroup2`).
pub(crate) fn isolate_mount_namespace<K: Kernel + ?Sized>(kernel: &K) -> Result<()> {
    tracing::debug!("Isolating mount namespace");

    kernel.unshare(CloneFlags::CLONE_NEWNS)?;
    kernel.mount(
        Some(Path::new("none")),
        Path::new("/"),
        None,
        MsFlags::MS_REC | MsFlags::MS_SLAVE,
    )?;

    remount_proc(kernel)?;
    remount_sys(kernel)
}

fn detach_quietly<K: Kernel + ?Sized>(kernel: &K, target: &str) {
    // may not be mounted
    if let Err(e) = kernel.umount(Path::new(target), MntFlags::MNT_DETACH) {
        tracing::debug!(mountpoint = target, error = %e, "Nothing to detach");
    }
}

fn remount_proc<K: Kernel + ?Sized>(kernel: &K) -> Result<()> {
    detach_quietly(kernel, "/proc");
    kernel.mount(
        Some(Path::new("proc")),
        Path::new("/proc"),
        Some("proc"),
        PSEUDO_FS_FLAGS,
    )
}

fn remount_sys<K: Kernel + ?Sized>(kernel: &K) -> Result<()> {
    detach_quietly(kernel, "/sys/fs/cgroup");
    detach_quietly(kernel, "/sys/fs/bpf");
    detach_quietly(kernel, "/sys");

    kernel.mount(
        Some(Path::new("sysfs")),
        Path::new("/sys"),
        Some("sysfs"),
        PSEUDO_FS_FLAGS,
    )?;

    for (source, target) in [("bpf", "/sys/fs/bpf"), ("cgroup2", "/sys/fs/cgroup")] {
        if let Err(e) = kernel.mount(
            Some(Path::new(source)),
            Path::new(target),
            Some(source),
            PSEUDO_FS_FLAGS,
        ) {
            tracing::warn!(
                fstype = source,
                mountpoint = target,
                error = %e,
                "Skipping optional filesystem"
            );
        }
    }

    Ok(())
}

#[cfg(test)]
pub(crate) mod mock {
    //! Recording kernel for tests

    use std::cell::RefCell;
    use std::collections::HashSet;
    use std::fs::File;
    use std::path::PathBuf;
    use std::rc::Rc;

    use netscope_core::NamespaceId;

    use super::*;

    /// One recorded primitive
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub(crate) enum Call {
        Setns {
            ns: NamespaceId,
            nstype: CloneFlags,
        },
        Unshare(CloneFlags),
        Mount {
            source: Option<PathBuf>,
            target: PathBuf,
            fstype: Option<String>,
            flags: MsFlags,
        },
        Umount {
            target: PathBuf,
            flags: MntFlags,
        },
    }

    #[derive(Default)]
    struct MockState {
        calls: Vec<Call>,
        setns_count: usize,
        fail_setns: HashSet<usize>,
        fail_unshare: bool,
        fail_mounts: HashSet<PathBuf>,
        fail_umounts: HashSet<PathBuf>,
    }

    /// Kernel that records calls instead of performing them
    #[derive(Clone, Default)]
    pub(crate) struct MockKernel {
        state: Rc<RefCell<MockState>>,
    }

    impl MockKernel {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        /// Fail the `n`th `setns` call (0-based)
        pub(crate) fn fail_setns_call(&self, n: usize) {
            self.state.borrow_mut().fail_setns.insert(n);
        }

        pub(crate) fn fail_unshare(&self) {
            self.state.borrow_mut().fail_unshare = true;
        }

        pub(crate) fn fail_mount_on(&self, target: impl Into<PathBuf>) {
            self.state.borrow_mut().fail_mounts.insert(target.into());
        }

        pub(crate) fn fail_umount_on(&self, target: impl Into<PathBuf>) {
            self.state.borrow_mut().fail_umounts.insert(target.into());
        }

        pub(crate) fn calls(&self) -> Vec<Call> {
            self.state.borrow().calls.clone()
        }

        pub(crate) fn setns_targets(&self) -> Vec<NamespaceId> {
            self.calls()
                .into_iter()
                .filter_map(|call| match call {
                    Call::Setns { ns, .. } => Some(ns),
                    _ => None,
                })
                .collect()
        }

        pub(crate) fn mount_targets(&self) -> Vec<PathBuf> {
            self.calls()
                .into_iter()
                .filter_map(|call| match call {
                    Call::Mount { target, .. } => Some(target),
                    _ => None,
                })
                .collect()
        }

        pub(crate) fn umount_targets(&self) -> Vec<PathBuf> {
            self.calls()
                .into_iter()
                .filter_map(|call| match call {
                    Call::Umount { target, .. } => Some(target),
                    _ => None,
                })
                .collect()
        }
    }

    impl std::fmt::Debug for MockKernel {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("MockKernel")
                .field("calls", &self.state.borrow().calls.len())
                .finish_non_exhaustive()
        }
    }

    impl Kernel for MockKernel {
        fn setns(&self, fd: BorrowedFd<'_>, nstype: CloneFlags) -> Result<()> {
            let meta = File::from(fd.try_clone_to_owned()?).metadata()?;
            let mut state = self.state.borrow_mut();
            let n = state.setns_count;
            state.setns_count += 1;
            if state.fail_setns.contains(&n) {
                return Err(syscall_error(Errno::EPERM, "setns", format!("call={n}")));
            }
            state.calls.push(Call::Setns {
                ns: NamespaceId::from(&meta),
                nstype,
            });
            Ok(())
        }

        fn unshare(&self, flags: CloneFlags) -> Result<()> {
            let mut state = self.state.borrow_mut();
            if state.fail_unshare {
                return Err(syscall_error(Errno::EPERM, "unshare", String::new()));
            }
            state.calls.push(Call::Unshare(flags));
            Ok(())
        }

        fn mount(
            &self,
            source: Option<&Path>,
            target: &Path,
            fstype: Option<&str>,
            flags: MsFlags,
        ) -> Result<()> {
            let mut state = self.state.borrow_mut();
            if state.fail_mounts.contains(target) {
                return Err(syscall_error(
                    Errno::ENOENT,
                    "mount",
                    describe_mount(source, target, fstype, flags),
                ));
            }
            state.calls.push(Call::Mount {
                source: source.map(Path::to_path_buf),
                target: target.to_path_buf(),
                fstype: fstype.map(str::to_string),
                flags,
            });
            Ok(())
        }

        fn umount(&self, target: &Path, flags: MntFlags) -> Result<()> {
            let mut state = self.state.borrow_mut();
            if state.fail_umounts.contains(target) {
                return Err(syscall_error(
                    Errno::EBUSY,
                    "umount2",
                    target.display().to_string(),
                ));
            }
            state.calls.push(Call::Umount {
                target: target.to_path_buf(),
                flags,
            });
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::{Call, MockKernel};
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_flag_constants_match_uapi() {
        assert_eq!(CloneFlags::CLONE_NEWNET.bits(), 0x4000_0000);
        assert_eq!(CloneFlags::CLONE_NEWNS.bits(), 0x0002_0000);
        assert_eq!(MsFlags::MS_BIND.bits(), 4096);
        assert_eq!(MsFlags::MS_REC.bits(), 16384);
        assert_eq!(MsFlags::MS_SLAVE.bits(), 1 << 19);
        assert_eq!(MntFlags::MNT_DETACH.bits(), 2);
        assert_eq!(PSEUDO_FS_FLAGS.bits(), 2 | 4 | 8 | (1 << 21));
    }

    #[test]
    fn test_isolate_sequence() {
        let kernel = MockKernel::new();
        isolate_mount_namespace(&kernel).unwrap();

        let calls = kernel.calls();
        assert_eq!(calls[0], Call::Unshare(CloneFlags::CLONE_NEWNS));
        assert_eq!(
            calls[1],
            Call::Mount {
                source: Some(PathBuf::from("none")),
                target: PathBuf::from("/"),
                fstype: None,
                flags: MsFlags::MS_REC | MsFlags::MS_SLAVE,
            }
        );
        assert_eq!(
            kernel.mount_targets(),
            vec![
                PathBuf::from("/"),
                PathBuf::from("/proc"),
                PathBuf::from("/sys"),
                PathBuf::from("/sys/fs/bpf"),
                PathBuf::from("/sys/fs/cgroup"),
            ]
        );
        assert_eq!(
            kernel.umount_targets(),
            vec![
                PathBuf::from("/proc"),
                PathBuf::from("/sys/fs/cgroup"),
                PathBuf::from("/sys/fs/bpf"),
                PathBuf::from("/sys"),
            ]
        );
    }

    #[test]
    fn test_isolate_tolerates_missing_optional_filesystems() {
        let kernel = MockKernel::new();
        kernel.fail_umount_on("/sys/fs/bpf");
        kernel.fail_mount_on("/sys/fs/bpf");
        kernel.fail_mount_on("/sys/fs/cgroup");

        assert!(isolate_mount_namespace(&kernel).is_ok());
    }

    #[test]
    fn test_isolate_requires_sysfs() {
        let kernel = MockKernel::new();
        kernel.fail_mount_on("/sys");

        let err = isolate_mount_namespace(&kernel).unwrap_err();
        assert!(matches!(err, Error::Syscall { operation: "mount", .. }));
    }

    #[test]
    fn test_unshare_failure_stops_isolation() {
        let kernel = MockKernel::new();
        kernel.fail_unshare();

        let err = isolate_mount_namespace(&kernel).unwrap_err();
        assert_eq!(err.errno(), Some(Errno::EPERM));
        assert!(kernel.calls().is_empty());
    }

    #[test]
    fn test_linux_umount_reports_errno() {
        let err = LinuxKernel
            .umount(Path::new("/definitely/not/mounted"), MntFlags::MNT_DETACH)
            .unwrap_err();

        match err {
            Error::Syscall { operation, args, .. } => {
                assert_eq!(operation, "umount2");
                assert!(args.contains("/definitely/not/mounted"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
