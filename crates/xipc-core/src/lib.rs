//! xipc-core — the data-plane session (`spec.md` §1-§5): a lock-free SPSC
//! byte ring in POSIX shared memory, synchronized by a pair of named-pipe
//! wakeup channels, exposed as a bidirectional stream between exactly two
//! peers (a Creator and an Attacher).
//!
//! This crate is intentionally the only one in the workspace with `unsafe`
//! code — the shared-memory mapping and the header layout it points into.
//! Everything built on top (`xipc-handshake`, `xipc-cli`) is safe Rust
//! calling these public types.
//!
//! # Example
//!
//! ```no_run
//! use xipc_core::{OpenFlags, Session, UnlinkPolicy};
//!
//! // Creator:
//! let session = Session::open("demo", Some(4096), OpenFlags { creat: true, nonblock: false }).unwrap();
//! session.send.write(b"hello").unwrap();
//! session.close(UnlinkPolicy::UnlinkIfCreator);
//! ```

mod backoff;
mod error;
mod header;
mod invariants;
mod ring;
mod session;
mod stream;
mod wakeup;

pub use backoff::Backoff;
pub use error::XipcError;
pub use header::{MAGIC, VERSION};
pub use ring::ByteRing;
pub use session::{NotifyPolicy, OpenFlags, Role, Session, SessionName, UnlinkPolicy, DEFAULT_RUNTIME_DIR};
pub use stream::{RecvHalf, SendHalf};
pub use wakeup::{WakeupEvent, WakeupPipe};

/// Retries a non-blocking `write` with the teacher's spin-then-yield
/// backoff instead of the session's own blocking `wait` (`spec.md` §5
/// forbids spinning inside the core's blocking path, but a caller that
/// wants bounded, non-blocking-mode retries without syscalls is free to
/// compose one — this is that composition, kept at arm's length from
/// `SendHalf::write`'s contract).
pub fn write_with_backoff(send: &SendHalf, buf: &[u8], max_attempts: u32) -> Result<usize, XipcError> {
    let mut backoff = Backoff::new();
    for _ in 0..max_attempts {
        match send.write(buf) {
            Ok(n) => return Ok(n),
            Err(XipcError::WouldBlock) => backoff.snooze(),
            Err(e) => return Err(e),
        }
    }
    Err(XipcError::WouldBlock)
}

/// Symmetric retry helper for non-blocking `read`.
pub fn read_with_backoff(recv: &RecvHalf, buf: &mut [u8], max_attempts: u32) -> Result<usize, XipcError> {
    let mut backoff = Backoff::new();
    for _ in 0..max_attempts {
        match recv.read(buf) {
            Ok(n) => return Ok(n),
            Err(XipcError::WouldBlock) => backoff.snooze(),
            Err(e) => return Err(e),
        }
    }
    Err(XipcError::WouldBlock)
}
