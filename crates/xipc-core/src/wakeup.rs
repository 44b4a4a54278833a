//! Unidirectional wakeup channel (`spec.md` §4.C), a named-pipe instance of
//! the self-pipe pattern: the pipe carries no payload, only the fact that
//! "something changed" — the data itself always lives in the ring.
//!
//! Grounded in the self-pipe implementation vendored under
//! `nvidia_gpu_stats`'s `signal-hook` (non-blocking notify swallows
//! `EAGAIN`; the blocking side drains everything available before
//! returning, collapsing any number of pending wakeups into one) and in
//! `shmempipe`'s use of a named, file-system-visible handle for readiness
//! that ordinary multiplexers (`poll`/`epoll`) can select on.
//!
//! # Avoiding the open-time block without giving up `BrokenPipe`
//!
//! A naive fix for "opening a FIFO read-only blocks until a writer
//! exists" is to open every FIFO `O_RDWR` on both ends — but a process
//! that holds its own read end open can never observe `EPIPE` on write,
//! since it is always its own reader. That would silently defeat
//! `spec.md` §7's "peer is gone" detection (§8.3 scenario 5).
//!
//! Instead each session holds exactly two *single-direction* handles: one
//! dedicated [`WakeupPipe`] opened write-only ([`WakeupPipe::open_writer`])
//! and one opened read-only ([`WakeupPipe::open_reader`]), matching the
//! literal "S2C (creator writes, attacher reads)" wording of `spec.md` §2.
//! The writer side still has to dodge the write-only open blocking until a
//! reader shows up: it briefly opens its own transient read-only "guard"
//! fd first (an `O_RDONLY|O_NONBLOCK` open never blocks, with or without a
//! peer), uses that guard to satisfy its own write-only open, then drops
//! the guard — leaving a genuine write-only fd with no self-held reader.
//! Once both peers have done this, each pipe has exactly one real reader
//! and one real writer, so `EPIPE`/`POLLHUP` correctly reflect the other
//! process's fate.

use crate::error::XipcError;
use nix::fcntl::{open, OFlag};
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::stat::Mode;
use nix::unistd::{mkfifo, read, write};
use std::os::fd::{AsFd, BorrowedFd, OwnedFd, RawFd};
use std::os::unix::io::{AsRawFd, FromRawFd};
use std::path::Path;
use std::time::{Duration, Instant};

/// Outcome of a successful [`WakeupPipe::wait`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeupEvent {
    /// One or more notifications were drained.
    Ready,
    /// The peer's end was closed — `spec.md` §6.2's peer-death signal.
    HangUp,
}

enum Direction {
    Writer,
    Reader,
}

/// One end of a named FIFO used purely as a wakeup signal.
pub struct WakeupPipe {
    fd: OwnedFd,
    direction: Direction,
}

impl WakeupPipe {
    /// Creates the backing FIFO at `path`. Called once by the Creator
    /// (`spec.md` §4.D.1); an Attacher only opens existing FIFOs.
    pub fn create_fifo(path: &Path) -> Result<(), XipcError> {
        mkfifo(path, Mode::S_IRUSR | Mode::S_IWUSR).map_err(|e| XipcError::from_io(e.into()))
    }

    /// Opens `path` as the sole long-lived writer, per the rationale
    /// above: a transient read-only guard satisfies the write-only open,
    /// then is dropped.
    pub fn open_writer(path: &Path) -> Result<Self, XipcError> {
        let guard = open(path, OFlag::O_RDONLY | OFlag::O_NONBLOCK, Mode::empty())
            .map_err(|e| XipcError::from_io(e.into()))?;
        let fd = open(path, OFlag::O_WRONLY | OFlag::O_NONBLOCK, Mode::empty());
        // SAFETY: both fds are freshly returned by `open` and owned here.
        let guard = unsafe { OwnedFd::from_raw_fd(guard) };
        let fd = fd.map_err(|e| XipcError::from_io(e.into()))?;
        drop(guard);
        Ok(Self {
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
            direction: Direction::Writer,
        })
    }

    /// Opens `path` as the sole long-lived reader. `O_RDONLY|O_NONBLOCK`
    /// never blocks on a FIFO regardless of whether a writer exists yet.
    pub fn open_reader(path: &Path) -> Result<Self, XipcError> {
        let fd = open(path, OFlag::O_RDONLY | OFlag::O_NONBLOCK, Mode::empty())
            .map_err(|e| XipcError::from_io(e.into()))?;
        Ok(Self {
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
            direction: Direction::Reader,
        })
    }

    /// Wakes up whoever is waiting on the other end. Non-blocking and
    /// idempotent: if the pipe already carries an undrained notification
    /// byte, `EAGAIN` is swallowed — the waiter is already going to wake
    /// up, a second byte would add nothing. `EPIPE` (no reader left —
    /// `spec.md` §7 "peer is gone") surfaces to the caller, who is
    /// expected to latch it.
    pub fn notify(&self) -> Result<(), XipcError> {
        debug_assert!(matches!(self.direction, Direction::Writer));
        match write(self.fd.as_fd(), &[0u8]) {
            Ok(_) => Ok(()),
            Err(nix::errno::Errno::EAGAIN) => Ok(()),
            Err(nix::errno::Errno::EPIPE) => Err(XipcError::BrokenPipe),
            Err(e) => Err(XipcError::from_io(e.into())),
        }
    }

    /// Blocks (optionally up to `timeout`) until at least one notification
    /// is available, then drains every byte currently queued — collapsing
    /// any number of pending `notify` calls into a single wakeup, per the
    /// self-pipe pattern. Returns `Ok(None)` on timeout, and is retried
    /// transparently on `EINTR` (`spec.md` §5 cancellation: a blocking
    /// wait only returns early on an asynchronous signal the caller's
    /// handler asked for, which this layer cannot distinguish from a
    /// spurious one, so it just retries).
    pub fn wait(&self, timeout: Option<Duration>) -> Result<Option<WakeupEvent>, XipcError> {
        debug_assert!(matches!(self.direction, Direction::Reader));
        let deadline = timeout.map(|d| Instant::now() + d);

        loop {
            let remaining = match deadline {
                Some(dl) => match dl.checked_duration_since(Instant::now()) {
                    // Clamped per-iteration; a timeout longer than ~65s
                    // just costs an extra loop iteration re-checking the
                    // real deadline, never a correctness problem.
                    Some(d) => PollTimeout::from(d.as_millis().min(u128::from(u16::MAX)) as u16),
                    None => return Ok(None),
                },
                None => PollTimeout::NONE,
            };

            let mut fds = [PollFd::new(self.fd.as_fd(), PollFlags::POLLIN)];
            match poll(&mut fds, remaining) {
                Ok(0) => return Ok(None),
                Ok(_) => {}
                Err(nix::errno::Errno::EINTR) => continue,
                Err(e) => return Err(XipcError::from_io(e.into())),
            }

            let revents = fds[0].revents().unwrap_or(PollFlags::empty());
            let hung_up = revents.contains(PollFlags::POLLHUP);

            match self.drain() {
                Ok(0) if hung_up => return Ok(Some(WakeupEvent::HangUp)),
                Ok(0) => continue, // spurious wakeup, poll again
                Ok(_) => return Ok(Some(WakeupEvent::Ready)),
                Err(e) => return Err(e),
            }
        }
    }

    /// Drains every byte currently buffered in the pipe, returning the
    /// count drained (0 meaning "currently empty").
    fn drain(&self) -> Result<usize, XipcError> {
        let mut buf = [0u8; 64];
        let mut total = 0;
        loop {
            match read(self.fd.as_fd(), &mut buf) {
                Ok(0) => return Ok(total),
                Ok(n) => total += n,
                Err(nix::errno::Errno::EAGAIN) => return Ok(total),
                Err(nix::errno::Errno::EINTR) => continue,
                Err(e) => return Err(XipcError::from_io(e.into())),
            }
        }
    }

    /// The raw fd backing this end, for external multiplexers
    /// (`spec.md` §6.1 `event_fd`). For a reader, readable exactly when
    /// `wait` would not block.
    #[must_use]
    pub fn as_raw_fd(&self) -> RawFd {
        AsRawFd::as_raw_fd(&self.fd)
    }

    #[must_use]
    pub fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}
