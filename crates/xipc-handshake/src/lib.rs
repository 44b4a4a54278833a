//! Control-plane handshake (`spec.md` §6.3): a small request/response over
//! a Unix domain socket that negotiates `(session_name, capacity, role)`.
//!
//! This is the external collaborator `spec.md` treats as out of scope for
//! the core, specified only at its boundary: it hands both peers a
//! [`Negotiation`] and gets out of the way. The core (`xipc_core::Session`)
//! knows nothing about this crate; all the wiring happens the other way.
//!
//! Wire format: a 4-byte little-endian length prefix followed by a
//! `bincode`-encoded [`Negotiation`], in the same spirit as the teacher's
//! other crates pairing `serde` with a compact binary codec.

use serde::{Deserialize, Serialize};
use std::io::{self, Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, instrument};

/// The role a peer will open its `xipc_core::Session` with, handed down
/// by the handshake (`spec.md` §6.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NegotiatedRole {
    Creator,
    Attacher,
}

/// Everything a peer needs to call `xipc_core::Session::open`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Negotiation {
    pub session_name: String,
    pub capacity: u32,
    pub role: NegotiatedRole,
}

impl Negotiation {
    /// Opens the `xipc_core::Session` this negotiation describes —
    /// `spec.md` §6.3's "each peer calls `open` with the appropriate
    /// flags" step, expressed as one call so callers never have to
    /// hand-translate a `Negotiation` into `xipc_core::OpenFlags`.
    pub fn open_session(&self, nonblock: bool) -> Result<xipc_core::Session, xipc_core::XipcError> {
        let flags = xipc_core::OpenFlags {
            creat: self.role == NegotiatedRole::Creator,
            nonblock,
        };
        let capacity = (self.role == NegotiatedRole::Creator).then_some(self.capacity);
        xipc_core::Session::open(&self.session_name, capacity, flags)
    }
}

#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("I/O error during handshake: {0}")]
    Io(#[from] io::Error),
    #[error("failed to encode negotiation: {0}")]
    Encode(#[from] bincode::Error),
    #[error("peer sent a negotiation frame larger than the {0}-byte limit")]
    FrameTooLarge(u32),
}

/// Cap on the encoded frame size — `Negotiation` is tiny, so anything
/// beyond a few KiB is a misbehaving or hostile peer, not a legitimate
/// message.
const MAX_FRAME_LEN: u32 = 64 * 1024;

fn write_frame(stream: &mut UnixStream, negotiation: &Negotiation) -> Result<(), HandshakeError> {
    let body = bincode::serialize(negotiation)?;
    let len = u32::try_from(body.len()).unwrap_or(u32::MAX);
    stream.write_all(&len.to_le_bytes())?;
    stream.write_all(&body)?;
    Ok(())
}

fn read_frame(stream: &mut UnixStream) -> Result<Negotiation, HandshakeError> {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf)?;
    let len = u32::from_le_bytes(len_buf);
    if len > MAX_FRAME_LEN {
        return Err(HandshakeError::FrameTooLarge(len));
    }
    let mut body = vec![0u8; len as usize];
    stream.read_exact(&mut body)?;
    Ok(bincode::deserialize(&body)?)
}

/// Creator-side listener. Binds a Unix domain socket, accepts exactly one
/// connection per [`HandshakeServer::accept_one`] call, and sends the
/// caller-supplied [`Negotiation`] (with the peer's role flipped to
/// `Attacher`) down the wire.
pub struct HandshakeServer {
    listener: UnixListener,
    path: PathBuf,
}

impl HandshakeServer {
    /// Binds at `path`, removing any stale socket file left behind by a
    /// prior, uncleanly-terminated run.
    #[instrument(skip(path), fields(path = %path.as_ref().display()))]
    pub fn bind(path: impl AsRef<Path>) -> Result<Self, HandshakeError> {
        let path = path.as_ref().to_path_buf();
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        let listener = UnixListener::bind(&path)?;
        info!(path = %path.display(), "handshake server listening");
        Ok(Self { listener, path })
    }

    /// Accepts a single Attacher connection and sends it `negotiation`
    /// with the role forced to `Attacher` (the server always speaks for
    /// the Creator).
    pub fn accept_one(&self, negotiation: &Negotiation) -> Result<(), HandshakeError> {
        let (mut stream, _addr) = self.listener.accept()?;
        let to_send = Negotiation {
            role: NegotiatedRole::Attacher,
            ..negotiation.clone()
        };
        write_frame(&mut stream, &to_send)?;
        debug!(session = %to_send.session_name, "handshake served attacher");
        Ok(())
    }
}

impl Drop for HandshakeServer {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Attacher-side client: connects to a running [`HandshakeServer`] and
/// reads back the negotiated tuple.
pub struct HandshakeClient;

impl HandshakeClient {
    #[instrument(skip(path), fields(path = %path.as_ref().display()))]
    pub fn connect(path: impl AsRef<Path>) -> Result<Negotiation, HandshakeError> {
        let mut stream = UnixStream::connect(path.as_ref())?;
        let negotiation = read_frame(&mut stream)?;
        debug!(session = %negotiation.session_name, "handshake received negotiation");
        Ok(negotiation)
    }
}
