//! Crate-wide error type.
//!
//! Mirrors the observable error codes from `spec.md` §6.4. The data path
//! itself never returns an arbitrary `io::Error`; every failure it can
//! produce is one of these variants.

use nix::errno::Errno;
use std::io;
use thiserror::Error;

/// Errors observable by callers of `xipc-core`.
#[derive(Debug, Error)]
pub enum XipcError {
    /// A non-blocking operation could not make progress right now.
    #[error("operation would block")]
    WouldBlock,

    /// The session has already been closed.
    #[error("session is closed")]
    Closed,

    /// The peer is gone; the direction is permanently unusable.
    #[error("broken pipe: peer is gone")]
    BrokenPipe,

    /// A blocking wait was interrupted by a signal and did not complete.
    #[error("operation interrupted")]
    Interrupted,

    /// The named session does not exist (Attacher with no Creator).
    #[error("session {0:?} not found")]
    NotFound(String),

    /// A Creator tried to create a session name that already exists.
    #[error("session {0:?} already exists")]
    AlreadyExists(String),

    /// The shared-memory header failed validation (bad magic/version).
    #[error("malformed session header: {0}")]
    Malformed(&'static str),

    /// A caller-supplied argument violates a precondition (bad name,
    /// non-power-of-two capacity, zero capacity, ...).
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// The OS denied access to a required resource.
    #[error("permission denied")]
    PermissionDenied(#[source] io::Error),

    /// The OS could not provide a required resource (fd/memory exhaustion).
    #[error("resource exhausted")]
    ResourceExhausted(#[source] io::Error),

    /// Any other OS-level failure that does not map to a specific variant
    /// above, preserved for diagnostics.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl XipcError {
    /// Classifies a raw `io::Error` from a syscall into a session error,
    /// per the mapping implied by `spec.md` §6.4/§7.
    pub(crate) fn from_io(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::WouldBlock => Self::WouldBlock,
            io::ErrorKind::NotFound => Self::NotFound(String::new()),
            io::ErrorKind::AlreadyExists => Self::AlreadyExists(String::new()),
            io::ErrorKind::PermissionDenied => Self::PermissionDenied(err),
            io::ErrorKind::BrokenPipe => Self::BrokenPipe,
            io::ErrorKind::Interrupted => Self::Interrupted,
            // `io::ErrorKind` has no stable variant for these (tracked
            // upstream as `ErrorKind::{StorageFull,OutOfMemory}` but not
            // reachable from an arbitrary raw errno), so classify by the
            // underlying errno instead — `ftruncate`/`mmap`/`shm_open`/
            // `mkfifo` failing with `ENOSPC`/`ENOMEM`/`EMFILE`/`ENFILE` is
            // `spec.md` §6.4's `ResourceExhausted`, not a generic `Io`.
            _ => match err.raw_os_error().map(Errno::from_raw) {
                Some(Errno::ENOSPC | Errno::ENOMEM | Errno::EMFILE | Errno::ENFILE) => {
                    Self::ResourceExhausted(err)
                }
                _ => Self::Io(err),
            },
        }
    }

    /// `true` for errors the caller is expected to retry (`spec.md` §7:
    /// "Recoverable at the call site").
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::WouldBlock | Self::Interrupted)
    }

    /// `true` for errors that make the session permanently unusable
    /// (`spec.md` §7: "Surfaced, session terminal").
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::BrokenPipe | Self::Closed | Self::Malformed(_))
    }
}
