//! Lock-free SPSC byte ring (`spec.md` §4.B), operating directly on a
//! shared-memory header and data region.
//!
//! Adapted from the teacher's slot-based `Ring<T>`: instead of committing
//! whole `T` items through a `Reservation`, `push`/`pop` copy raw bytes and
//! split the copy at the wraparound boundary. The cached-peer-index
//! optimization ("avoid a cross-core atomic load when the cache already
//! proves there's enough room") is kept verbatim from the teacher, except
//! the cache now lives in a plain `Cell` owned by this process's handle
//! rather than an `UnsafeCell` field of a struct shared across processes —
//! two processes mapping the same header necessarily have their own,
//! separate `ByteRing` instances, so there is no cross-process aliasing to
//! worry about.

use crate::header::RingHeader;
use crate::invariants::{debug_assert_bounded_count, debug_assert_monotonic, debug_assert_no_wrap};
use std::cell::Cell;
use std::ptr::NonNull;
use std::sync::atomic::Ordering;

/// One direction of a duplex session: a byte-stream SPSC ring bound to a
/// shared header and a `capacity`-byte data region.
///
/// A single `ByteRing` is used exclusively by either the producer or the
/// consumer of its direction — never both. Which role a given instance
/// plays is fixed by which half of `Session` constructs it (`SendHalf` vs
/// `RecvHalf`); both roles share the same push/pop algorithm because the
/// protocol in `spec.md` §4.B is symmetric under "producer"/"consumer"
/// relabeling.
pub struct ByteRing {
    header: NonNull<RingHeader>,
    data: NonNull<u8>,
    capacity: usize,
    mask: usize,
    /// This handle's cached view of the *other* side's index. Written only
    /// by this handle, read only by this handle — single-writer, so a
    /// plain `Cell` suffices (`spec.md` §4.A: "plain loads after a
    /// synchronizing acquire").
    cached_peer: Cell<u64>,
}

// SAFETY: ByteRing's fields are either `NonNull` pointers into a shared
// memory mapping that outlives the handle, or process-local caches. All
// cross-process synchronization goes through the atomics in `RingHeader`.
unsafe impl Send for ByteRing {}

impl ByteRing {
    /// # Safety
    /// `header` and `data` must point into the same mapped region, `data`
    /// must be valid for `capacity` bytes, and `capacity` must equal
    /// `header.capacity()` and be a power of two.
    pub unsafe fn new(header: NonNull<RingHeader>, data: NonNull<u8>, capacity: usize) -> Self {
        debug_assert!(capacity.is_power_of_two());
        Self {
            header,
            data,
            capacity,
            mask: capacity - 1,
            cached_peer: Cell::new(0),
        }
    }

    #[inline]
    fn header(&self) -> &RingHeader {
        // SAFETY: valid for the lifetime of the owning Session.
        unsafe { self.header.as_ref() }
    }

    #[inline]
    fn slice_at(&self, pos: u64, len: usize) -> &mut [u8] {
        let idx = (pos as usize) & self.mask;
        // SAFETY: idx < capacity, len bounded by the caller to stay within
        // the contiguous run starting at idx (see `push`/`pop`).
        unsafe { std::slice::from_raw_parts_mut(self.data.as_ptr().add(idx), len) }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Snapshot of currently readable bytes (`spec.md` §4.E, "hints, not
    /// authoritative after any concurrent operation").
    #[must_use]
    pub fn readable_bytes(&self) -> usize {
        let w = self.header().write_idx().load(Ordering::Acquire);
        let r = self.header().read_idx().load(Ordering::Acquire);
        w.wrapping_sub(r) as usize
    }

    /// Snapshot of currently writable bytes.
    #[must_use]
    pub fn writable_bytes(&self) -> usize {
        self.capacity - self.readable_bytes()
    }

    /// Producer-side operation. Copies up to `src.len()` bytes into the
    /// ring, returning the number actually copied (`spec.md` §4.B `push`).
    /// Never blocks; zero-length input is a documented no-op.
    pub fn push(&self, src: &[u8]) -> usize {
        if src.is_empty() {
            return 0;
        }
        let header = self.header();
        let w = header.write_idx().load(Ordering::Relaxed);

        let mut r = self.cached_peer.get();
        let mut free = self.capacity - w.wrapping_sub(r) as usize;
        if free == 0 {
            r = header.read_idx().load(Ordering::Acquire);
            self.cached_peer.set(r);
            free = self.capacity - w.wrapping_sub(r) as usize;
            if free == 0 {
                return 0;
            }
        }

        let n = src.len().min(free);
        debug_assert_bounded_count!(n, free);
        self.copy_in(w, &src[..n]);
        let new_w = w.wrapping_add(n as u64);
        debug_assert_monotonic!("write_idx", w, new_w);
        debug_assert_no_wrap!("write_idx", w, new_w);
        header.write_idx().store(new_w, Ordering::Release);
        n
    }

    /// Consumer-side operation. Copies up to `dst.len()` bytes out of the
    /// ring, returning the number actually copied (`spec.md` §4.B `pop`).
    /// Never blocks; zero-length output is a documented no-op.
    pub fn pop(&self, dst: &mut [u8]) -> usize {
        if dst.is_empty() {
            return 0;
        }
        let header = self.header();
        let r = header.read_idx().load(Ordering::Relaxed);

        let mut w = self.cached_peer.get();
        let mut avail = w.wrapping_sub(r) as usize;
        if avail == 0 {
            w = header.write_idx().load(Ordering::Acquire);
            self.cached_peer.set(w);
            avail = w.wrapping_sub(r) as usize;
            if avail == 0 {
                return 0;
            }
        }

        let n = dst.len().min(avail);
        debug_assert_bounded_count!(n, avail);
        self.copy_out(r, &mut dst[..n]);
        let new_r = r.wrapping_add(n as u64);
        debug_assert_monotonic!("read_idx", r, new_r);
        debug_assert_no_wrap!("read_idx", r, new_r);
        header.read_idx().store(new_r, Ordering::Release);
        n
    }

    /// Copies `src` into the ring starting at sequence `pos`, splitting at
    /// the wraparound boundary when the run does not fit contiguously.
    fn copy_in(&self, pos: u64, src: &[u8]) {
        let idx = (pos as usize) & self.mask;
        let first = src.len().min(self.capacity - idx);
        self.slice_at(pos, first).copy_from_slice(&src[..first]);
        if first < src.len() {
            self.slice_at(pos.wrapping_add(first as u64), src.len() - first)
                .copy_from_slice(&src[first..]);
        }
    }

    /// Symmetric to `copy_in`, for reads.
    fn copy_out(&self, pos: u64, dst: &mut [u8]) {
        let idx = (pos as usize) & self.mask;
        let first = dst.len().min(self.capacity - idx);
        dst[..first].copy_from_slice(self.slice_at(pos, first));
        if first < dst.len() {
            let rest = dst.len() - first;
            dst[first..].copy_from_slice(self.slice_at(pos.wrapping_add(first as u64), rest));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::RingHeader;

    /// Builds an in-process `ByteRing` over a private buffer — no SHM or
    /// pipes involved — for testing the push/pop algorithm in isolation,
    /// matching the teacher's approach of unit-testing `Ring<T>` directly.
    struct TestRing {
        _storage: Box<[u8]>,
        ring: ByteRing,
    }

    fn make_ring(capacity: u32) -> TestRing {
        let total = RingHeader::total_len(capacity);
        let mut storage = vec![0u8; total].into_boxed_slice();
        let header_ptr = storage.as_mut_ptr().cast::<RingHeader>();
        unsafe { RingHeader::init_at(header_ptr, capacity) };
        let header = NonNull::new(header_ptr).unwrap();
        let data = unsafe { NonNull::new(storage.as_mut_ptr().add(RingHeader::total_len(0))).unwrap() };
        let ring = unsafe { ByteRing::new(header, data, capacity as usize) };
        TestRing { _storage: storage, ring }
    }

    #[test]
    fn push_pop_roundtrip() {
        let t = make_ring(16);
        assert_eq!(t.ring.push(b"hello"), 5);
        let mut buf = [0u8; 16];
        assert_eq!(t.ring.pop(&mut buf), 5);
        assert_eq!(&buf[..5], b"hello");
    }

    #[test]
    fn zero_length_is_noop() {
        let t = make_ring(16);
        assert_eq!(t.ring.push(&[]), 0);
        assert_eq!(t.ring.pop(&mut []), 0);
        assert_eq!(t.ring.readable_bytes(), 0);
    }

    #[test]
    fn fill_and_drain_scenario() {
        // spec.md §8.3 scenario 2, capacity=8
        let t = make_ring(8);
        let data: Vec<u8> = (0..8).collect();
        assert_eq!(t.ring.push(&data), 8);
        assert_eq!(t.ring.push(&[99]), 0); // full

        let mut buf = [0u8; 5];
        assert_eq!(t.ring.pop(&mut buf), 5);
        assert_eq!(buf, [0, 1, 2, 3, 4]);

        let more: Vec<u8> = (8..13).collect();
        assert_eq!(t.ring.push(&more), 5);

        let mut buf2 = [0u8; 8];
        assert_eq!(t.ring.pop(&mut buf2), 8);
        assert_eq!(buf2, [5, 6, 7, 8, 9, 10, 11, 12]);
    }

    #[test]
    fn wraparound_correctness() {
        // spec.md §8.1 invariant 6: writing/reading 3C + k bytes recovers
        // the exact stream, for capacity C and chunked 17-byte transfers.
        let capacity = 64u32;
        let t = make_ring(capacity);
        let total = capacity as usize * 3 + 13;
        let input: Vec<u8> = (0..total).map(|i| (i % 251) as u8).collect();
        let mut output = Vec::with_capacity(total);

        let mut sent = 0;
        while sent < total || output.len() < total {
            if sent < total {
                let chunk = &input[sent..(sent + 17).min(total)];
                sent += t.ring.push(chunk);
            }
            let mut buf = [0u8; 17];
            let n = t.ring.pop(&mut buf);
            output.extend_from_slice(&buf[..n]);
        }

        assert_eq!(output, input);
    }

    #[test]
    fn readable_writable_snapshots() {
        let t = make_ring(16);
        assert_eq!(t.ring.writable_bytes(), 16);
        t.ring.push(b"abc");
        assert_eq!(t.ring.readable_bytes(), 3);
        assert_eq!(t.ring.writable_bytes(), 13);
    }
}
