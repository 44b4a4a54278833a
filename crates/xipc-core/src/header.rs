//! Shared header layout (`spec.md` §3.2) and the release/acquire contract
//! that governs every access to it (`spec.md` §4.A).
//!
//! # Memory ordering protocol
//!
//! **Producer side of one ring:**
//! 1. Write bytes into the ring at `[write_idx, write_idx + n)`.
//! 2. Publish by storing `write_idx += n` with `Release`.
//!
//! **Consumer side:**
//! 1. Observe `write_idx` with `Acquire`.
//! 2. Read bytes at `[read_idx, observed_write_idx)`.
//! 3. Publish freed space by storing `read_idx += n` with `Release`.
//!
//! The producer observes `read_idx` with `Acquire`; this pairs with the
//! consumer's release and makes freshly freed bytes safe to overwrite. No
//! other ordering is required anywhere in this crate — `magic`/`version`/
//! `capacity` are plain loads performed only after the acquire/release
//! handshake below has established that the header is fully initialized.

use crate::error::XipcError;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Constant `0x58495043` ("XIPC"), little-endian.
pub const MAGIC: u32 = 0x5849_5043;

/// Current header version.
pub const VERSION: u32 = 1;

/// Bit-exact shared header, `spec.md` §3.2.
///
/// | Offset | Field         | Size |
/// |-------:|---------------|------|
/// |      0 | `magic`       | 4    |
/// |      4 | `version`     | 4    |
/// |      8 | `capacity`    | 4    |
/// |     12 | `data_offset` | 4    |
/// |     64 | `read_idx`    | 8    |
/// |    128 | `write_idx`   | 8    |
/// |    192 | ring data     | `C`  |
///
/// `read_idx` and `write_idx` are pinned to distinct cache lines so the
/// producer and consumer never false-share a line (`spec.md` §3.2).
#[repr(C)]
pub struct RingHeader {
    /// Set once by the Creator, published last under `Release`; Attachers
    /// poll it with `Acquire` to detect a fully-initialized header
    /// (`spec.md` §9 open question on the publication race).
    magic: AtomicU32,
    version: u32,
    capacity: u32,
    data_offset: u32,
    _pad0: [u8; 64 - 16],
    read_idx: AtomicU64,
    _pad1: [u8; 128 - 64 - 8],
    write_idx: AtomicU64,
    _pad2: [u8; 192 - 128 - 8],
}

const _: () = assert!(std::mem::size_of::<RingHeader>() == 192);
const HEADER_LEN: usize = std::mem::size_of::<RingHeader>();

impl RingHeader {
    /// Total bytes required for a header plus `capacity` bytes of ring data.
    #[must_use]
    pub const fn total_len(capacity: u32) -> usize {
        HEADER_LEN + capacity as usize
    }

    /// Initializes a freshly mapped, zeroed header for the Creator.
    ///
    /// `magic` is written **last**, under `Release`, after every other
    /// field is in place — this is the two-phase publish that lets an
    /// Attacher detect completion by acquire-polling `magic` alone.
    ///
    /// # Safety
    /// `place` must point at a writable, correctly aligned region of at
    /// least `total_len(capacity)` bytes that no other thread is
    /// concurrently accessing (true for a freshly `mmap`-ed, exclusively
    /// `shm_open`-created segment).
    pub unsafe fn init_at(place: *mut RingHeader, capacity: u32) {
        let header = &*place;
        header.read_idx.store(0, Ordering::Relaxed);
        header.write_idx.store(0, Ordering::Relaxed);
        std::ptr::write(
            std::ptr::addr_of_mut!((*place).version),
            VERSION,
        );
        std::ptr::write(
            std::ptr::addr_of_mut!((*place).capacity),
            capacity,
        );
        std::ptr::write(
            std::ptr::addr_of_mut!((*place).data_offset),
            HEADER_LEN as u32,
        );
        header.magic.store(MAGIC, Ordering::Release);
    }

    /// Polls `magic` until it becomes readable, per the Attacher steps in
    /// `spec.md` §4.D.1 and the publication-race note in §9. Returns once
    /// the header is either valid or definitively wrong; never hangs
    /// forever — a stuck Creator is a control-plane problem this crate
    /// cannot fix, so the caller's control plane is expected to guarantee
    /// the Creator ran first (§6.3).
    pub fn wait_published(&self, attempts: u32, backoff: std::time::Duration) -> bool {
        for _ in 0..attempts {
            if self.magic.load(Ordering::Acquire) != 0 {
                return true;
            }
            std::thread::sleep(backoff);
        }
        self.magic.load(Ordering::Acquire) != 0
    }

    /// Validates magic/version/capacity for an Attacher, per §4.D.1 step 3.
    pub fn validate(&self, expected_capacity: Option<u32>) -> Result<(), XipcError> {
        let magic = self.magic.load(Ordering::Acquire);
        if magic != MAGIC {
            return Err(XipcError::Malformed("bad magic"));
        }
        if self.version != VERSION {
            return Err(XipcError::Malformed("unsupported version"));
        }
        if !self.capacity.is_power_of_two() || self.capacity == 0 {
            return Err(XipcError::Malformed("capacity is not a power of two"));
        }
        if let Some(expected) = expected_capacity {
            if expected != self.capacity {
                return Err(XipcError::Malformed("capacity does not match negotiated value"));
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    #[must_use]
    pub fn data_offset(&self) -> u32 {
        self.data_offset
    }

    #[inline]
    pub(crate) fn read_idx(&self) -> &AtomicU64 {
        &self.read_idx
    }

    #[inline]
    pub(crate) fn write_idx(&self) -> &AtomicU64 {
        &self.write_idx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_layout_is_192_bytes() {
        assert_eq!(std::mem::size_of::<RingHeader>(), 192);
    }

    #[test]
    fn init_then_validate_roundtrips() {
        let mut buf = vec![0u8; HEADER_LEN];
        let place = buf.as_mut_ptr().cast::<RingHeader>();
        unsafe {
            RingHeader::init_at(place, 4096);
        }
        let header = unsafe { &*place };
        header.validate(Some(4096)).unwrap();
        assert_eq!(header.capacity(), 4096);
        assert_eq!(header.data_offset() as usize, HEADER_LEN);
    }

    #[test]
    fn validate_rejects_bad_magic() {
        let buf = vec![0u8; HEADER_LEN];
        let header = unsafe { &*buf.as_ptr().cast::<RingHeader>() };
        assert!(matches!(header.validate(None), Err(XipcError::Malformed(_))));
    }
}
