//! Stream API & blocking loop (`spec.md` §4.E), as inherent methods on
//! [`SendHalf`]/[`RecvHalf`] — the two directions of a [`crate::session::Session`].
//!
//! Each half shares its owning [`crate::session::Session`]'s single
//! outgoing `notify_pipe` and single incoming `wait_pipe` (see
//! `wakeup.rs`): a process has exactly one FIFO it writes to wake its
//! peer and one it reads to be woken, reused by both the producer and
//! consumer role that process plays across its two ring directions.

use crate::ring::ByteRing;
use crate::session::NotifyPolicy;
use crate::wakeup::{WakeupEvent, WakeupPipe};
use crate::XipcError;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// The producer side of one ring direction.
pub struct SendHalf {
    ring: ByteRing,
    notify_pipe: Arc<WakeupPipe>,
    wait_pipe: Arc<WakeupPipe>,
    nonblock: AtomicBool,
    notify_policy: std::sync::atomic::AtomicU8,
    broken: AtomicBool,
}

/// The consumer side of one ring direction.
pub struct RecvHalf {
    ring: ByteRing,
    notify_pipe: Arc<WakeupPipe>,
    wait_pipe: Arc<WakeupPipe>,
    nonblock: AtomicBool,
    notify_policy: std::sync::atomic::AtomicU8,
    broken: AtomicBool,
}

const POLICY_ALWAYS: u8 = 0;
const POLICY_ON_TRANSITION: u8 = 1;

fn policy_to_u8(policy: NotifyPolicy) -> u8 {
    match policy {
        NotifyPolicy::Always => POLICY_ALWAYS,
        NotifyPolicy::OnTransition => POLICY_ON_TRANSITION,
    }
}

impl SendHalf {
    pub(crate) fn new(
        ring: ByteRing,
        notify_pipe: Arc<WakeupPipe>,
        wait_pipe: Arc<WakeupPipe>,
        nonblock: bool,
    ) -> Self {
        Self {
            ring,
            notify_pipe,
            wait_pipe,
            nonblock: AtomicBool::new(nonblock),
            notify_policy: std::sync::atomic::AtomicU8::new(POLICY_ALWAYS),
            broken: AtomicBool::new(false),
        }
    }

    pub fn set_nonblock(&self, nonblock: bool) {
        self.nonblock.store(nonblock, Ordering::Relaxed);
    }

    pub fn set_notify_policy(&self, policy: NotifyPolicy) {
        self.notify_policy
            .store(policy_to_u8(policy), Ordering::Relaxed);
    }

    /// Snapshot; a hint, not authoritative after any concurrent operation
    /// (`spec.md` §4.E).
    #[must_use]
    pub fn writable_bytes(&self) -> usize {
        self.ring.writable_bytes()
    }

    /// The fd that becomes readable once the peer has freed space in this
    /// direction's ring, for external readiness multiplexing
    /// (`spec.md` §4.E.4 / §6.1 `event_fd`).
    #[must_use]
    pub fn event_fd(&self) -> RawFd {
        self.wait_pipe.as_raw_fd()
    }

    /// Writes `buf` to the ring, per `spec.md` §4.E.1.
    ///
    /// Non-blocking mode: returns as soon as any amount (possibly zero via
    /// `WouldBlock`, possibly partial) has been pushed. Blocking mode:
    /// loops until the *entire* buffer has been transferred, matching
    /// standard stream-socket semantics for blocking writes.
    pub fn write(&self, buf: &[u8]) -> Result<usize, XipcError> {
        self.check_broken()?;
        if buf.is_empty() {
            return Ok(0);
        }

        if self.nonblock.load(Ordering::Relaxed) {
            let was_empty = self.ring.readable_bytes() == 0;
            let n = self.ring.push(buf);
            if n == 0 {
                return Err(XipcError::WouldBlock);
            }
            self.maybe_notify(was_empty, n)?;
            return Ok(n);
        }

        let mut total = 0;
        while total < buf.len() {
            let was_empty = self.ring.readable_bytes() == 0;
            let n = self.ring.push(&buf[total..]);
            if n > 0 {
                self.maybe_notify(was_empty, n)?;
                total += n;
                continue;
            }
            self.wait_for_peer()?;
        }
        Ok(total)
    }

    fn maybe_notify(&self, was_empty: bool, n: usize) -> Result<(), XipcError> {
        let should_notify = match self.notify_policy.load(Ordering::Relaxed) {
            POLICY_ON_TRANSITION => was_empty && n > 0,
            _ => n > 0,
        };
        if should_notify {
            self.notify()?;
        }
        Ok(())
    }

    fn notify(&self) -> Result<(), XipcError> {
        match self.notify_pipe.notify() {
            Ok(()) => Ok(()),
            Err(XipcError::BrokenPipe) => {
                self.broken.store(true, Ordering::Release);
                Err(XipcError::BrokenPipe)
            }
            Err(e) => Err(e),
        }
    }

    fn wait_for_peer(&self) -> Result<(), XipcError> {
        match self.wait_pipe.wait(None) {
            Ok(Some(WakeupEvent::HangUp)) => {
                self.broken.store(true, Ordering::Release);
                Err(XipcError::BrokenPipe)
            }
            Ok(_) => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn check_broken(&self) -> Result<(), XipcError> {
        if self.broken.load(Ordering::Acquire) {
            Err(XipcError::BrokenPipe)
        } else {
            Ok(())
        }
    }
}

impl RecvHalf {
    pub(crate) fn new(
        ring: ByteRing,
        notify_pipe: Arc<WakeupPipe>,
        wait_pipe: Arc<WakeupPipe>,
        nonblock: bool,
    ) -> Self {
        Self {
            ring,
            notify_pipe,
            wait_pipe,
            nonblock: AtomicBool::new(nonblock),
            notify_policy: std::sync::atomic::AtomicU8::new(POLICY_ALWAYS),
            broken: AtomicBool::new(false),
        }
    }

    pub fn set_nonblock(&self, nonblock: bool) {
        self.nonblock.store(nonblock, Ordering::Relaxed);
    }

    pub fn set_notify_policy(&self, policy: NotifyPolicy) {
        self.notify_policy
            .store(policy_to_u8(policy), Ordering::Relaxed);
    }

    #[must_use]
    pub fn readable_bytes(&self) -> usize {
        self.ring.readable_bytes()
    }

    /// The fd that becomes readable once the peer has pushed new data into
    /// this direction's ring (`spec.md` §4.E.4).
    #[must_use]
    pub fn event_fd(&self) -> RawFd {
        self.wait_pipe.as_raw_fd()
    }

    /// Reads into `buf`, per `spec.md` §4.E.2.
    ///
    /// Non-blocking mode: `WouldBlock` if nothing is available. Blocking
    /// mode: returns as soon as at least one byte is available — no
    /// minimum-read guarantee beyond 1, matching stream-socket semantics.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize, XipcError> {
        self.check_broken()?;
        if buf.is_empty() {
            return Ok(0);
        }

        if self.nonblock.load(Ordering::Relaxed) {
            let was_full = self.ring.writable_bytes() == 0;
            let n = self.ring.pop(buf);
            if n == 0 {
                return Err(XipcError::WouldBlock);
            }
            self.maybe_notify(was_full, n)?;
            return Ok(n);
        }

        loop {
            let was_full = self.ring.writable_bytes() == 0;
            let n = self.ring.pop(buf);
            if n > 0 {
                self.maybe_notify(was_full, n)?;
                return Ok(n);
            }
            self.wait_for_peer()?;
        }
    }

    fn maybe_notify(&self, was_full: bool, n: usize) -> Result<(), XipcError> {
        let should_notify = match self.notify_policy.load(Ordering::Relaxed) {
            POLICY_ON_TRANSITION => was_full && n > 0,
            _ => n > 0,
        };
        if should_notify {
            self.notify()?;
        }
        Ok(())
    }

    fn notify(&self) -> Result<(), XipcError> {
        match self.notify_pipe.notify() {
            Ok(()) => Ok(()),
            Err(XipcError::BrokenPipe) => {
                self.broken.store(true, Ordering::Release);
                Err(XipcError::BrokenPipe)
            }
            Err(e) => Err(e),
        }
    }

    fn wait_for_peer(&self) -> Result<(), XipcError> {
        match self.wait_pipe.wait(None) {
            Ok(Some(WakeupEvent::HangUp)) => {
                self.broken.store(true, Ordering::Release);
                Err(XipcError::BrokenPipe)
            }
            Ok(_) => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn check_broken(&self) -> Result<(), XipcError> {
        if self.broken.load(Ordering::Acquire) {
            Err(XipcError::BrokenPipe)
        } else {
            Ok(())
        }
    }
}
