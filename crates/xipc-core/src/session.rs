//! Session lifecycle (`spec.md` §3.1, §3.4, §4.D): resource acquisition,
//! mapping, teardown, unlink policy.
//!
//! Grounded in the `shmempipe` reference's `create`/`open_existing` split
//! (exclusive `shm_open` + `ftruncate` + `mmap` for the Creator, plain
//! `shm_open` + `mmap` for the Attacher) and in its `path.is_absolute()`
//! discipline for path construction.

use crate::error::XipcError;
use crate::header::RingHeader;
use crate::ring::ByteRing;
use crate::stream::{RecvHalf, SendHalf};
use crate::wakeup::WakeupPipe;

use nix::fcntl::OFlag;
use nix::sys::mman::{self, MapFlags, ProtFlags};
use nix::sys::stat::Mode;
use nix::unistd::ftruncate;
use std::ffi::CString;
use std::num::NonZeroUsize;
use std::os::fd::{AsFd, OwnedFd};
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Default directory the two wakeup FIFOs are created under when the
/// caller does not override it (`spec.md` §6.1 "`<dir>` defaults to a
/// configurable runtime directory").
pub const DEFAULT_RUNTIME_DIR: &str = "/tmp/xipc";

/// How many times an Attacher polls for the Creator's header publication
/// before giving up (`spec.md` §9 open question).
const PUBLISH_POLL_ATTEMPTS: u32 = 2000;
const PUBLISH_POLL_INTERVAL: Duration = Duration::from_micros(500);

/// Validated session name (`spec.md` §4.D.1): non-empty, at most 63 bytes,
/// printable ASCII, no path separator.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionName(String);

impl SessionName {
    /// Validates `name` against `spec.md`'s naming rules.
    pub fn new(name: impl Into<String>) -> Result<Self, XipcError> {
        let name = name.into();
        if name.is_empty() || name.len() > 63 {
            return Err(XipcError::InvalidArgument(
                "session name must be 1..=63 bytes",
            ));
        }
        if name.contains('/') || !name.bytes().all(|b| b.is_ascii_graphic()) {
            return Err(XipcError::InvalidArgument(
                "session name must be printable ASCII with no '/'",
            ));
        }
        Ok(Self(name))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn shm_path(&self) -> CString {
        CString::new(format!("/ipc_{}", self.0)).expect("validated name has no interior NUL")
    }

    fn s2c_path(&self, dir: &Path) -> PathBuf {
        dir.join(format!("ipc_{}_s2c", self.0))
    }

    fn c2s_path(&self, dir: &Path) -> PathBuf {
        dir.join(format!("ipc_{}_c2s", self.0))
    }
}

/// The session's role, fixed at `open` time (`spec.md` §3.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Provisions and owns the OS resources.
    Creator,
    /// Maps an existing session provisioned by a Creator.
    Attacher,
}

/// Flags accepted by [`Session::open`] (`spec.md` §4.D.1).
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenFlags {
    /// Provision the session's OS resources (Creator role) instead of
    /// attaching to an existing one.
    pub creat: bool,
    /// Start the session in non-blocking mode.
    pub nonblock: bool,
}

/// How `notify` decides whether a transfer warrants waking the peer
/// (`spec.md` §4.E.3). `Always` is the conservative default the spec
/// recommends; `OnTransition` is the unproven optimization left as an
/// open question in §9 and is opt-in only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NotifyPolicy {
    #[default]
    Always,
    OnTransition,
}

/// What to do with the backing OS objects on [`Session::close`]
/// (`spec.md` §4.D.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnlinkPolicy {
    /// Unlink the SHM object and both FIFOs if this session is the
    /// Creator; a no-op for an Attacher.
    UnlinkIfCreator,
    /// Never unlink; leave the backing objects for the peer or a future
    /// re-attach.
    Keep,
}

/// A mapped, owned shared-memory region plus the two FIFOs, split into a
/// producer half (`send`) and a consumer half (`recv`).
///
/// Dropping a `Session` without calling [`Session::close`] still unmaps
/// and closes descriptors (the `Drop` impl performs the same teardown as
/// an emergency fallback so a panic never leaks resources), but does not
/// unlink — unlinking is an explicit, opt-in act.
pub struct Session {
    name: SessionName,
    role: Role,
    shm_len: usize,
    shm_base: NonNull<u8>,
    runtime_dir: PathBuf,
    unlink_on_drop: bool,
    pub send: SendHalf,
    pub recv: RecvHalf,
}

// SAFETY: the mapping and both fds are valid for the Session's lifetime;
// no two threads are expected to share a `Session` without external
// synchronization (`spec.md` §5 — single-producer/single-consumer per
// ring, undefined behavior to use one side from multiple threads without
// the caller serializing).
unsafe impl Send for Session {}

// SAFETY: `send` and `recv` are independent SPSC directions; a caller
// that keeps each half to its own thread (the common "one reader thread,
// one writer thread" split, e.g. `xipc-cli`'s echo loop) never has two
// threads touch the same `Cell`-backed cached index concurrently, even
// though both threads hold a shared `&Session`. Handing one ring to two
// threads at once remains the caller's undefined-behavior-inducing
// mistake per `spec.md` §5, same as it already is for `&SendHalf`/
// `&RecvHalf` directly.
unsafe impl Sync for Session {}

impl Session {
    /// Implements `spec.md` §4.D.1 in full: Creator provisions, Attacher
    /// maps an existing session. `capacity` is required (and must be a
    /// power of two) when `flags.creat` is set; otherwise it is adopted
    /// from the header the Creator already published.
    #[instrument(skip(capacity), fields(name = name, role = if flags.creat { "creator" } else { "attacher" }))]
    pub fn open(name: &str, capacity: Option<u32>, flags: OpenFlags) -> Result<Self, XipcError> {
        Self::open_in(name, capacity, flags, Path::new(DEFAULT_RUNTIME_DIR))
    }

    /// As [`Session::open`], but lets the caller override the runtime
    /// directory the FIFOs live under (used by `xipc-cli`'s configuration
    /// layer and by tests that want an isolated temp directory).
    pub fn open_in(
        name: &str,
        capacity: Option<u32>,
        flags: OpenFlags,
        runtime_dir: &Path,
    ) -> Result<Self, XipcError> {
        let name = SessionName::new(name)?;
        let result = if flags.creat {
            Self::create(&name, capacity, flags, runtime_dir)
        } else {
            Self::attach(&name, capacity, flags, runtime_dir)
        };
        match &result {
            Ok(_) => info!(session = name.as_str(), "session opened"),
            Err(err) => debug!(session = name.as_str(), %err, "session open failed"),
        }
        result
    }

    fn create(
        name: &SessionName,
        capacity: Option<u32>,
        flags: OpenFlags,
        runtime_dir: &Path,
    ) -> Result<Self, XipcError> {
        let capacity = capacity.ok_or(XipcError::InvalidArgument(
            "capacity is required when CREAT is set",
        ))?;
        if capacity == 0 || !capacity.is_power_of_two() {
            return Err(XipcError::InvalidArgument(
                "capacity must be a non-zero power of two",
            ));
        }

        std::fs::create_dir_all(runtime_dir).map_err(XipcError::from_io)?;

        let shm_path = name.shm_path();
        let oflag = OFlag::O_CREAT | OFlag::O_EXCL | OFlag::O_RDWR;
        let mode = Mode::S_IRUSR | Mode::S_IWUSR;
        let shm_fd: OwnedFd = mman::shm_open(shm_path.as_c_str(), oflag, mode)
            .map_err(|e| XipcError::from_io(e.into()))?;

        let ring_len = RingHeader::total_len(capacity);
        let shm_len = ring_len * 2;
        ftruncate(&shm_fd, shm_len as i64).map_err(|e| XipcError::from_io(e.into()))?;

        let shm_base = map_shared(&shm_fd, shm_len)?;
        // The mapping keeps its own reference via mmap; the descriptor
        // itself is no longer needed once mapped.
        drop(shm_fd);

        // SAFETY: freshly mapped, exclusively created region; no other
        // process can have touched it yet because O_EXCL guaranteed we
        // were first.
        unsafe {
            RingHeader::init_at(s2c_header_ptr(shm_base, capacity), capacity);
            RingHeader::init_at(c2s_header_ptr(shm_base, capacity), capacity);
        }

        let s2c_fifo = name.s2c_path(runtime_dir);
        let c2s_fifo = name.c2s_path(runtime_dir);
        if let Err(err) = WakeupPipe::create_fifo(&s2c_fifo) {
            let _ = mman::shm_unlink(shm_path.as_c_str());
            return Err(err);
        }
        if let Err(err) = WakeupPipe::create_fifo(&c2s_fifo) {
            let _ = std::fs::remove_file(&s2c_fifo);
            let _ = mman::shm_unlink(shm_path.as_c_str());
            return Err(err);
        }

        // Creator writes S2C (its one outgoing channel) and reads C2S
        // (its one incoming channel) — see `wakeup.rs` for why each is a
        // genuine single-direction fd rather than a shared `O_RDWR` pair.
        let notify_pipe = Arc::new(WakeupPipe::open_writer(&s2c_fifo)?);
        let wait_pipe = Arc::new(WakeupPipe::open_reader(&c2s_fifo)?);

        // SAFETY: headers/data point into `shm_base`'s mapping, which this
        // `Session` keeps alive for as long as the rings are in use.
        let s2c_ring = unsafe {
            ByteRing::new(
                s2c_header_ptr_nn(shm_base, capacity),
                s2c_data_ptr(shm_base, capacity),
                capacity as usize,
            )
        };
        let c2s_ring = unsafe {
            ByteRing::new(
                c2s_header_ptr_nn(shm_base, capacity),
                c2s_data_ptr(shm_base, capacity),
                capacity as usize,
            )
        };

        debug!(session = name.as_str(), capacity, "creator provisioned session resources");

        Ok(Self {
            name: name.clone(),
            role: Role::Creator,
            shm_len,
            shm_base,
            runtime_dir: runtime_dir.to_path_buf(),
            unlink_on_drop: false,
            send: SendHalf::new(s2c_ring, Arc::clone(&notify_pipe), Arc::clone(&wait_pipe), flags.nonblock),
            recv: RecvHalf::new(c2s_ring, notify_pipe, wait_pipe, flags.nonblock),
        })
    }

    fn attach(
        name: &SessionName,
        expected_capacity: Option<u32>,
        flags: OpenFlags,
        runtime_dir: &Path,
    ) -> Result<Self, XipcError> {
        let shm_path = name.shm_path();
        let oflag = OFlag::O_RDWR;
        let shm_fd: OwnedFd = mman::shm_open(shm_path.as_c_str(), oflag, Mode::empty())
            .map_err(|e| XipcError::from_io(e.into()))?;

        // The Creator truncates to its final size before either FIFO
        // exists, so the fstat'd size already tells us `capacity`.
        let stat = nix::sys::stat::fstat(shm_fd.as_fd()).map_err(|e| XipcError::from_io(e.into()))?;
        let shm_len = stat.st_size as usize;
        let header_len = std::mem::size_of::<RingHeader>();
        if shm_len < header_len * 2 || (shm_len - header_len * 2) % 2 != 0 {
            return Err(XipcError::Malformed("unexpected shared-memory segment size"));
        }
        let capacity = ((shm_len / 2) - header_len) as u32;

        let shm_base = map_shared(&shm_fd, shm_len)?;
        drop(shm_fd);

        let s2c_header = unsafe { s2c_header_ptr(shm_base, capacity).as_ref() }
            .ok_or(XipcError::Malformed("null header"))?;
        if !s2c_header.wait_published(PUBLISH_POLL_ATTEMPTS, PUBLISH_POLL_INTERVAL) {
            unsafe { unmap(shm_base, shm_len) };
            return Err(XipcError::Malformed("creator never published header"));
        }
        s2c_header.validate(expected_capacity)?;

        let c2s_header = unsafe { c2s_header_ptr(shm_base, capacity).as_ref() }
            .ok_or(XipcError::Malformed("null header"))?;
        if !c2s_header.wait_published(PUBLISH_POLL_ATTEMPTS, PUBLISH_POLL_INTERVAL) {
            unsafe { unmap(shm_base, shm_len) };
            return Err(XipcError::Malformed("creator never published header"));
        }
        c2s_header.validate(expected_capacity)?;

        let s2c_fifo = name.s2c_path(runtime_dir);
        let c2s_fifo = name.c2s_path(runtime_dir);
        // Attacher writes C2S (its one outgoing channel) and reads S2C
        // (its one incoming channel) — the mirror image of the Creator's
        // pipe ownership above.
        let notify_pipe = Arc::new(WakeupPipe::open_writer(&c2s_fifo)?);
        let wait_pipe = Arc::new(WakeupPipe::open_reader(&s2c_fifo)?);

        let s2c_ring = unsafe {
            ByteRing::new(
                s2c_header_ptr_nn(shm_base, capacity),
                s2c_data_ptr(shm_base, capacity),
                capacity as usize,
            )
        };
        let c2s_ring = unsafe {
            ByteRing::new(
                c2s_header_ptr_nn(shm_base, capacity),
                c2s_data_ptr(shm_base, capacity),
                capacity as usize,
            )
        };

        debug!(session = name.as_str(), capacity, "attacher mapped session resources");

        // Attacher is the producer of C2S, the consumer of S2C.
        Ok(Self {
            name: name.clone(),
            role: Role::Attacher,
            shm_len,
            shm_base,
            runtime_dir: runtime_dir.to_path_buf(),
            unlink_on_drop: false,
            send: SendHalf::new(c2s_ring, Arc::clone(&notify_pipe), Arc::clone(&wait_pipe), flags.nonblock),
            recv: RecvHalf::new(s2c_ring, notify_pipe, wait_pipe, flags.nonblock),
        })
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    #[must_use]
    pub fn name(&self) -> &SessionName {
        &self.name
    }

    /// Toggles the non-blocking flag on both halves (`spec.md` §4.D.3).
    /// Takes effect on the next operation; the caller is responsible for
    /// not racing this against an outstanding blocking call.
    pub fn set_nonblock(&self, nonblock: bool) {
        self.send.set_nonblock(nonblock);
        self.recv.set_nonblock(nonblock);
    }

    /// Changes how aggressively `write`/`read` notify the peer
    /// (`spec.md` §4.E.3 / §9 open question).
    pub fn set_notify_policy(&self, policy: NotifyPolicy) {
        self.send.set_notify_policy(policy);
        self.recv.set_notify_policy(policy);
    }

    /// Closes the session per `spec.md` §4.D.2: unmaps, closes
    /// descriptors, and — only for `Role::Creator` with
    /// `UnlinkPolicy::UnlinkIfCreator` — unlinks the SHM object and both
    /// FIFOs. Consuming `self` makes a double-close a type error rather
    /// than a runtime one; `spec.md` §8.1's "idempotent close" requirement
    /// is satisfied by construction.
    #[instrument(skip(self), fields(session = self.name.as_str()))]
    pub fn close(mut self, unlink: UnlinkPolicy) {
        self.unlink_on_drop = unlink == UnlinkPolicy::UnlinkIfCreator && self.role == Role::Creator;
        info!(session = self.name.as_str(), unlink = self.unlink_on_drop, "session closed");
        // Drop performs the actual teardown.
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        unsafe { unmap(self.shm_base, self.shm_len) };
        if self.unlink_on_drop {
            let _ = mman::shm_unlink(self.name.shm_path().as_c_str());
            let _ = std::fs::remove_file(self.name.s2c_path(&self.runtime_dir));
            let _ = std::fs::remove_file(self.name.c2s_path(&self.runtime_dir));
        }
    }
}

fn map_shared(fd: &OwnedFd, len: usize) -> Result<NonNull<u8>, XipcError> {
    let len = NonZeroUsize::new(len).ok_or(XipcError::InvalidArgument("zero-length mapping"))?;
    // SAFETY: `fd` refers to a SHM object sized to at least `len` bytes by
    // the caller (via `ftruncate` for a Creator, or verified via `fstat`
    // for an Attacher).
    let ptr = unsafe {
        mman::mmap(
            None,
            len,
            ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
            MapFlags::MAP_SHARED,
            fd,
            0,
        )
    }
    .map_err(|e| XipcError::from_io(e.into()))?;
    Ok(ptr.cast::<u8>())
}

/// # Safety
/// `base` and `len` must be the exact pointer/length pair returned from a
/// prior successful `map_shared` call that has not already been unmapped.
unsafe fn unmap(base: NonNull<u8>, len: usize) {
    let len = NonZeroUsize::new(len).expect("sessions are never mapped with zero length");
    let _ = mman::munmap(base.cast(), len.get());
}

fn s2c_header_ptr(base: NonNull<u8>, _capacity: u32) -> *mut RingHeader {
    base.as_ptr().cast::<RingHeader>()
}

fn s2c_header_ptr_nn(base: NonNull<u8>, capacity: u32) -> NonNull<RingHeader> {
    NonNull::new(s2c_header_ptr(base, capacity)).expect("base is non-null")
}

fn s2c_data_ptr(base: NonNull<u8>, _capacity: u32) -> NonNull<u8> {
    let header_len = std::mem::size_of::<RingHeader>();
    unsafe { NonNull::new_unchecked(base.as_ptr().add(header_len)) }
}

fn c2s_header_ptr(base: NonNull<u8>, capacity: u32) -> *mut RingHeader {
    let offset = RingHeader::total_len(capacity);
    unsafe { base.as_ptr().add(offset).cast::<RingHeader>() }
}

fn c2s_header_ptr_nn(base: NonNull<u8>, capacity: u32) -> NonNull<RingHeader> {
    NonNull::new(c2s_header_ptr(base, capacity)).expect("base is non-null")
}

fn c2s_data_ptr(base: NonNull<u8>, capacity: u32) -> NonNull<u8> {
    let header_len = std::mem::size_of::<RingHeader>();
    let offset = RingHeader::total_len(capacity) + header_len;
    unsafe { NonNull::new_unchecked(base.as_ptr().add(offset)) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_name() {
        assert!(matches!(
            SessionName::new(""),
            Err(XipcError::InvalidArgument(_))
        ));
    }

    #[test]
    fn rejects_path_separator() {
        assert!(matches!(
            SessionName::new("a/b"),
            Err(XipcError::InvalidArgument(_))
        ));
    }

    #[test]
    fn rejects_overlong_name() {
        let name = "a".repeat(64);
        assert!(matches!(
            SessionName::new(name),
            Err(XipcError::InvalidArgument(_))
        ));
    }

    #[test]
    fn accepts_reasonable_name() {
        assert!(SessionName::new("session-1").is_ok());
    }

    #[test]
    fn create_rejects_non_power_of_two_capacity() {
        let dir = std::env::temp_dir().join(format!("xipc-test-{}", std::process::id()));
        let name = format!("npot-{}", std::process::id());
        let result = Session::open_in(
            &name,
            Some(100),
            OpenFlags { creat: true, nonblock: false },
            &dir,
        );
        assert!(matches!(result, Err(XipcError::InvalidArgument(_))));
    }

    #[test]
    fn attach_without_creator_is_not_found() {
        let dir = std::env::temp_dir().join(format!("xipc-test-{}", std::process::id()));
        let name = format!("missing-{}", std::process::id());
        let result = Session::open_in(&name, None, OpenFlags::default(), &dir);
        assert!(result.is_err());
    }

    #[test]
    fn create_then_attach_roundtrips_small_echo() {
        // spec.md §8.3 scenario 1.
        let dir = std::env::temp_dir().join(format!("xipc-echo-{}", std::process::id()));
        let name = format!("echo-{}", std::process::id());

        let creator = Session::open_in(
            &name,
            Some(4096),
            OpenFlags { creat: true, nonblock: false },
            &dir,
        )
        .unwrap();
        let attacher = Session::open_in(&name, None, OpenFlags::default(), &dir).unwrap();

        attacher.send.write(b"hello").unwrap();
        let mut buf = [0u8; 16];
        let n = creator.recv.read(&mut buf).unwrap();
        assert_eq!(n, 5);
        assert_eq!(&buf[..5], b"hello");

        creator.close(UnlinkPolicy::UnlinkIfCreator);
        attacher.close(UnlinkPolicy::Keep);
    }

    #[test]
    fn concurrent_creators_one_wins() {
        let dir = std::env::temp_dir().join(format!("xipc-race-{}", std::process::id()));
        let name = format!("race-{}", std::process::id());
        let flags = OpenFlags { creat: true, nonblock: false };

        let first = Session::open_in(&name, Some(4096), flags, &dir);
        let second = Session::open_in(&name, Some(4096), flags, &dir);
        assert!(first.is_ok());
        assert!(matches!(second, Err(XipcError::AlreadyExists(_))));
        first.unwrap().close(UnlinkPolicy::UnlinkIfCreator);
    }
}
