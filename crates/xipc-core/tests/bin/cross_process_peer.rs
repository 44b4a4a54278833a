//! Attacher-side helper process for the genuine two-process scenario in
//! `spec.md` §8.3 scenario 3 ("blocking cross-fill"). The parent test
//! process plays Creator; this binary is spawned as a real child process
//! via `std::process::Command` so the blocking write/read path is
//! exercised across an actual process boundary, not just two threads
//! sharing one address space.
//!
//! Usage: `cross_process_peer --dir <path> --name <name> --capacity <u32> --bytes <usize>`
//!
//! Writes a deterministic `bytes`-length payload (`i % 256` for byte `i`)
//! to the session's send half in blocking mode, then exits 0. Any error
//! is printed to stderr and the process exits non-zero so the parent
//! test can fail loudly instead of hanging.

use std::path::PathBuf;
use xipc_core::{OpenFlags, Session, UnlinkPolicy};

fn main() {
    if let Err(err) = run() {
        eprintln!("cross_process_peer: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();
    let dir = arg_value(&args, "--dir").ok_or("missing --dir")?;
    let name = arg_value(&args, "--name").ok_or("missing --name")?;
    let bytes: usize = arg_value(&args, "--bytes")
        .ok_or("missing --bytes")?
        .parse()?;

    let session = Session::open_in(
        &name,
        None,
        OpenFlags { creat: false, nonblock: false },
        &PathBuf::from(dir),
    )?;

    let payload: Vec<u8> = (0..bytes).map(|i| (i % 256) as u8).collect();
    let mut sent = 0;
    while sent < payload.len() {
        sent += session.send.write(&payload[sent..])?;
    }

    session.close(UnlinkPolicy::Keep);
    Ok(())
}

fn arg_value(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}
