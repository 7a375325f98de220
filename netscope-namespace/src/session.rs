//! Scoped network namespace sessions
//!
//! A session captures the calling thread's network namespace, switches to a
//! target namespace, optionally mounts the per-namespace `/etc` overlay, and
//! undoes all of it on release or drop.

use std::cell::Cell;
use std::fs::File;
use std::marker::PhantomData;
use std::os::fd::{AsFd, BorrowedFd};
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::sched::CloneFlags;
use netscope_core::{Error, NamespaceId, Result};

use crate::config::SessionConfig;
use crate::locator::NamespaceLocator;
use crate::overlay::{self, MountOverlayEntry, UnmountFailure};
use crate::syscall::{self, Kernel, LinuxKernel};

/// Lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Not switched
    Idle,
    /// Switching in
    Entering,
    /// Inside the target namespace
    Active,
    /// Switching back
    Exiting,
    /// Acquire or release failed
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Free,
    Held,
    Poisoned,
}

thread_local! {
    static THREAD_SLOT: Cell<Slot> = const { Cell::new(Slot::Free) };
}

/// Claim on this thread's single session slot
#[derive(Debug)]
struct SlotGuard {
    _thread: PhantomData<*const ()>,
}

impl SlotGuard {
    fn claim() -> Result<Self> {
        THREAD_SLOT.with(|slot| match slot.get() {
            Slot::Free => {
                slot.set(Slot::Held);
                Ok(Self {
                    _thread: PhantomData,
                })
            }
            Slot::Held => Err(Error::usage(
                "a namespace session is already active on this thread",
            )),
            Slot::Poisoned => Err(Error::usage(
                "this thread failed to restore its network namespace",
            )),
        })
    }

    /// Keep the slot taken forever: the thread's namespace is unknown
    fn poison(self) {
        THREAD_SLOT.with(|slot| slot.set(Slot::Poisoned));
        std::mem::forget(self);
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        THREAD_SLOT.with(|slot| slot.set(Slot::Free));
    }
}

/// An open namespace file
#[derive(Debug)]
pub struct NamespaceHandle {
    file: File,
    path: PathBuf,
    id: NamespaceId,
}

impl NamespaceHandle {
    /// Open a namespace file
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if the path does not exist
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = File::open(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::not_found(&path),
            _ => Error::Io(e),
        })?;
        let id = NamespaceId::from(&file.metadata()?);
        Ok(Self { file, path, id })
    }

    /// Path the handle was opened from
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Namespace identity
    #[must_use]
    pub const fn id(&self) -> NamespaceId {
        self.id
    }
}

impl AsFd for NamespaceHandle {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.file.as_fd()
    }
}

/// Outcome of a successful release
#[derive(Debug, Default)]
pub struct ReleaseReport {
    /// Overlay entries unmounted
    pub unmounted: usize,
    /// Overlay entries left mounted
    pub failures: Vec<UnmountFailure>,
}

impl ReleaseReport {
    /// Whether every overlay entry was unmounted
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Session state machine, generic over the kernel it drives
#[derive(Debug)]
pub(crate) struct SessionCore<K: Kernel> {
    kernel: K,
    state: SessionState,
    restore: Option<NamespaceHandle>,
    target_path: PathBuf,
    namespace_name: Option<String>,
    overlay: Vec<MountOverlayEntry>,
    slot: Option<SlotGuard>,
}

impl<K: Kernel> SessionCore<K> {
    pub(crate) fn acquire(kernel: K, config: &SessionConfig) -> Result<Self> {
        let slot = SlotGuard::claim()?;

        let restore = NamespaceHandle::open(NamespaceLocator::current_thread())?;
        let locator = NamespaceLocator::new(&config.paths.run_dir);
        let target_path = locator.resolve(&config.target)?;

        tracing::info!(
            namespace = %config.target,
            path = %target_path.display(),
            bind_mount_etc = config.bind_mount_etc,
            "Entering network namespace"
        );

        let mut core = Self {
            kernel,
            state: SessionState::Entering,
            restore: Some(restore),
            target_path,
            namespace_name: None,
            overlay: Vec::new(),
            slot: Some(slot),
        };

        if let Err(e) = core.switch_in() {
            tracing::error!(
                path = %core.target_path.display(),
                error = %e,
                "Failed to enter network namespace"
            );
            core.state = SessionState::Failed;
            return Err(e);
        }

        if config.bind_mount_etc
            && let Err(e) = core.mount_overlay(&locator, config)
        {
            return Err(core.unwind(e));
        }

        core.state = SessionState::Active;
        Ok(core)
    }

    fn switch_in(&self) -> Result<()> {
        let target = NamespaceHandle::open(&self.target_path)?;
        self.kernel.setns(target.as_fd(), CloneFlags::CLONE_NEWNET)
    }

    fn mount_overlay(&mut self, locator: &NamespaceLocator, config: &SessionConfig) -> Result<()> {
        let name = locator.name_for(&config.target)?;
        self.namespace_name = Some(name.clone());

        if config.isolate_mounts {
            syscall::isolate_mount_namespace(&self.kernel)?;
        }

        let plan = overlay::plan(&config.paths, &name)?;
        tracing::debug!(namespace = %name, entries = plan.len(), "Mounting /etc overlay");
        overlay::mount_all(&self.kernel, plan, &mut self.overlay)
    }

    /// Undo a half-finished acquire and hand back the error to report
    fn unwind(&mut self, cause: Error) -> Error {
        tracing::warn!(error = %cause, "Acquire failed, switching back");
        match self.teardown() {
            Ok(report) => {
                if !report.is_clean() {
                    tracing::warn!(
                        failures = report.failures.len(),
                        "Overlay entries left mounted after failed acquire"
                    );
                }
                self.state = SessionState::Failed;
                cause
            }
            Err(fatal) => fatal,
        }
    }

    pub(crate) fn release(&mut self) -> Result<ReleaseReport> {
        if self.state != SessionState::Active {
            return Err(Error::usage(format!(
                "cannot release a session in state {:?}",
                self.state
            )));
        }
        self.teardown()
    }

    fn teardown(&mut self) -> Result<ReleaseReport> {
        self.state = SessionState::Exiting;

        let (unmounted, failures) =
            overlay::unmount_all(&self.kernel, std::mem::take(&mut self.overlay));

        let Some(handle) = self.restore.take() else {
            self.state = SessionState::Failed;
            return Err(Error::usage("session has no restore handle"));
        };

        if let Err(e) = self.kernel.setns(handle.as_fd(), CloneFlags::CLONE_NEWNET) {
            self.state = SessionState::Failed;
            if let Some(slot) = self.slot.take() {
                slot.poison();
            }
            tracing::error!(
                path = %handle.path().display(),
                error = %e,
                "Failed to restore network namespace; thread is in an unknown namespace"
            );
            return Err(Error::Restore {
                code: e.errno().unwrap_or(Errno::UnknownErrno),
                path: handle.path,
            });
        }
        drop(handle);

        self.state = SessionState::Idle;
        self.slot = None;

        tracing::info!(
            path = %self.target_path.display(),
            unmounted,
            failures = failures.len(),
            "Left network namespace"
        );

        Ok(ReleaseReport {
            unmounted,
            failures,
        })
    }

    pub(crate) const fn state(&self) -> SessionState {
        self.state
    }

    pub(crate) fn target_path(&self) -> &Path {
        &self.target_path
    }

    pub(crate) fn namespace_name(&self) -> Option<&str> {
        self.namespace_name.as_deref()
    }

    pub(crate) fn overlay_entries(&self) -> &[MountOverlayEntry] {
        &self.overlay
    }

    pub(crate) fn restore_id(&self) -> Option<NamespaceId> {
        self.restore.as_ref().map(NamespaceHandle::id)
    }
}

impl<K: Kernel> Drop for SessionCore<K> {
    fn drop(&mut self) {
        if self.state != SessionState::Active {
            return;
        }

        if let Err(e) = self.teardown() {
            if std::thread::panicking() {
                tracing::error!(error = %e, "Namespace restore failed while unwinding, aborting");
                std::process::abort();
            }
            panic!("network namespace restore failed: {e}");
        }
    }
}

pub(crate) fn with_session<K, F, R>(kernel: K, config: &SessionConfig, body: F) -> Result<R>
where
    K: Kernel,
    F: FnOnce() -> R,
{
    let mut core = SessionCore::acquire(kernel, config)?;
    let out = body();
    core.release()?;
    Ok(out)
}

/// Network namespace switch held by the current thread.
///
/// Created by [`NetnsSession::acquire`]; switched back by
/// [`NetnsSession::release`] or when dropped. Not `Send`: the switch only
/// applies to the thread that made it.
///
/// # Example
/// ```no_run
/// use netscope_core::NamespaceRef;
/// use netscope_namespace::{NetnsSession, SessionConfig};
///
/// let config = SessionConfig::new(NamespaceRef::name("sandbox")?).with_bind_mount_etc(true);
/// let session = NetnsSession::acquire(&config)?;
/// let resolv = std::fs::read_to_string("/etc/resolv.conf")?;
/// session.release()?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug)]
pub struct NetnsSession {
    core: SessionCore<LinuxKernel>,
}

impl NetnsSession {
    /// Switch the calling thread into the configured namespace
    ///
    /// # Errors
    /// - [`Error::Usage`] if this thread already holds a session
    /// - [`Error::NotFound`] if the target (or its name, when bind-mounting)
    ///   cannot be resolved
    /// - [`Error::Syscall`] if a kernel call fails
    /// - [`Error::Restore`] if a failed acquire could not switch back
    pub fn acquire(config: &SessionConfig) -> Result<Self> {
        Ok(Self {
            core: SessionCore::acquire(LinuxKernel, config)?,
        })
    }

    /// Unmount the overlay and switch back
    ///
    /// # Errors
    /// Returns [`Error::Restore`] if the original namespace could not be
    /// re-entered. Overlay unmount failures are listed in the report.
    pub fn release(mut self) -> Result<ReleaseReport> {
        self.core.release()
    }

    /// Current lifecycle state
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.core.state()
    }

    /// Resolved namespace file of the target
    #[must_use]
    pub fn target_path(&self) -> &Path {
        self.core.target_path()
    }

    /// Namespace name, when the overlay was requested
    #[must_use]
    pub fn namespace_name(&self) -> Option<&str> {
        self.core.namespace_name()
    }

    /// Overlay entries currently mounted
    #[must_use]
    pub fn overlay_entries(&self) -> &[MountOverlayEntry] {
        self.core.overlay_entries()
    }

    /// Identity of the namespace that release returns to
    #[must_use]
    pub fn restore_id(&self) -> Option<NamespaceId> {
        self.core.restore_id()
    }
}

/// Run `body` inside a namespace.
///
/// The session is released exactly once, whether `body` returns or panics.
///
/// # Errors
/// Returns the acquire or release error; `body`'s value is returned
/// only when both succeed
pub fn with_namespace<F, R>(config: &SessionConfig, body: F) -> Result<R>
where
    F: FnOnce() -> R,
{
    with_session(LinuxKernel, config, body)
}

/// Identity of the calling thread's network namespace
///
/// # Errors
/// Returns error if `/proc/thread-self/ns/net` cannot be read
pub fn current_namespace() -> Result<NamespaceId> {
    NamespaceId::of_path(NamespaceLocator::current_thread())
}
