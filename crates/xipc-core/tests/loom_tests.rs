//! Loom-based exhaustive interleaving check for the release/acquire
//! protocol in `spec.md` §4.A, trimmed from the teacher's
//! `loom_tests.rs` down to the byte ring's push/pop handshake (no FIFO,
//! no SHM — just the two atomics and the ordering contract).
//!
//! Run with: `cargo test --features loom --test loom_tests --release`

#![cfg(feature = "loom")]

use loom::sync::atomic::{AtomicU64, Ordering};
use loom::sync::Arc;
use loom::thread;
use std::cell::UnsafeCell;

/// Same push/pop protocol as `xipc_core::ring::ByteRing`, reduced to a
/// 4-byte capacity so loom's exhaustive search stays tractable.
struct LoomByteRing {
    write_idx: AtomicU64,
    read_idx: AtomicU64,
    data: UnsafeCell<[u8; 4]>,
}

unsafe impl Send for LoomByteRing {}
unsafe impl Sync for LoomByteRing {}

impl LoomByteRing {
    fn new() -> Self {
        Self {
            write_idx: AtomicU64::new(0),
            read_idx: AtomicU64::new(0),
            data: UnsafeCell::new([0; 4]),
        }
    }

    fn push(&self, byte: u8) -> bool {
        let w = self.write_idx.load(Ordering::Relaxed);
        let r = self.read_idx.load(Ordering::Acquire);
        if w.wrapping_sub(r) as usize >= 4 {
            return false;
        }
        unsafe {
            (*self.data.get())[(w as usize) & 3] = byte;
        }
        self.write_idx.store(w.wrapping_add(1), Ordering::Release);
        true
    }

    fn pop(&self) -> Option<u8> {
        let r = self.read_idx.load(Ordering::Relaxed);
        let w = self.write_idx.load(Ordering::Acquire);
        if w == r {
            return None;
        }
        let byte = unsafe { (*self.data.get())[(r as usize) & 3] };
        self.read_idx.store(r.wrapping_add(1), Ordering::Release);
        Some(byte)
    }
}

#[test]
fn loom_single_producer_single_consumer_preserves_bytes() {
    loom::model(|| {
        let ring = Arc::new(LoomByteRing::new());

        let producer = {
            let ring = Arc::clone(&ring);
            thread::spawn(move || {
                for b in 0..3u8 {
                    while !ring.push(b) {
                        thread::yield_now();
                    }
                }
            })
        };

        let consumer = thread::spawn(move || {
            let mut received = Vec::new();
            while received.len() < 3 {
                if let Some(b) = ring.pop() {
                    received.push(b);
                } else {
                    thread::yield_now();
                }
            }
            received
        });

        producer.join().unwrap();
        let received = consumer.join().unwrap();
        assert_eq!(received, vec![0, 1, 2]);
    });
}
