//! Demonstration/convenience binary wiring `xipc-handshake`'s control
//! plane to an `xipc-core` session (`spec.md` §6.3's "thin convenience
//! wrapper", `SPEC_FULL.md` §0). Not part of the data-plane core; this is
//! the ambient CLI surface around it.

mod config;

use clap::{Parser, Subcommand};
use config::Config;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use tracing::{error, info};
use xipc_core::{OpenFlags, Session, UnlinkPolicy};
use xipc_handshake::{HandshakeClient, HandshakeServer, NegotiatedRole, Negotiation};

#[derive(Parser)]
#[command(name = "xipc", about = "Creator/attacher demo for the xipc shared-memory transport")]
struct Cli {
    /// Optional TOML config file (runtime_dir, default_capacity, nonblock_default).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Acts as the Creator: binds a handshake socket, provisions the
    /// session once an Attacher connects, then echoes stdin lines to the
    /// peer and prints whatever the peer sends back.
    Serve {
        /// Session name to provision.
        #[arg(long)]
        name: String,
        /// Ring capacity in bytes (power of two). Overrides the config
        /// file's `default_capacity`.
        #[arg(long)]
        capacity: Option<u32>,
        /// Handshake socket path.
        #[arg(long, default_value = "/tmp/xipc/handshake.sock")]
        socket: PathBuf,
    },
    /// Acts as the Attacher: connects to a running `serve` handshake
    /// socket, maps the negotiated session, and joins the same echo loop.
    Attach {
        /// Handshake socket path.
        #[arg(long, default_value = "/tmp/xipc/handshake.sock")]
        socket: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    match cli.command {
        Command::Serve { name, capacity, socket } => run_creator(&config, &name, capacity, &socket),
        Command::Attach { socket } => run_attacher(&config, &socket),
    }
}

fn run_creator(config: &Config, name: &str, capacity: Option<u32>, socket: &PathBuf) -> anyhow::Result<()> {
    let capacity = capacity.unwrap_or(config.default_capacity);
    let negotiation = Negotiation {
        session_name: name.to_string(),
        capacity,
        role: NegotiatedRole::Creator,
    };

    info!(session = name, capacity, "provisioning session");
    let session = Session::open_in(
        name,
        Some(capacity),
        OpenFlags { creat: true, nonblock: config.nonblock_default },
        &config.runtime_dir,
    )?;

    let server = HandshakeServer::bind(socket)?;
    info!(socket = %socket.display(), "waiting for attacher");
    server.accept_one(&negotiation)?;
    info!("attacher joined, entering echo loop");

    run_echo_loop(&session);
    session.close(UnlinkPolicy::UnlinkIfCreator);
    Ok(())
}

fn run_attacher(config: &Config, socket: &PathBuf) -> anyhow::Result<()> {
    let negotiation = HandshakeClient::connect(socket)?;
    info!(session = %negotiation.session_name, capacity = negotiation.capacity, "negotiated session");

    let session = Session::open_in(
        &negotiation.session_name,
        Some(negotiation.capacity),
        OpenFlags { creat: false, nonblock: config.nonblock_default },
        &config.runtime_dir,
    )?;

    run_echo_loop(&session);
    session.close(UnlinkPolicy::Keep);
    Ok(())
}

/// Reads lines from stdin and writes them to the session while a
/// background thread prints whatever the peer sends. Purely a demo of the
/// stream API (`spec.md` §4.E) — message framing (newline-delimited here)
/// is explicitly the application's job, not the core's (`spec.md` §1
/// Non-goals).
fn run_echo_loop(session: &Session) {
    let reader_name = session.name().as_str().to_string();
    std::thread::scope(|scope| {
        scope.spawn(|| {
            let mut buf = [0u8; 4096];
            loop {
                match session.recv.read(&mut buf) {
                    Ok(0) => continue,
                    Ok(n) => {
                        let mut stdout = std::io::stdout().lock();
                        let _ = stdout.write_all(&buf[..n]);
                        let _ = stdout.flush();
                    }
                    Err(xipc_core::XipcError::BrokenPipe) => {
                        error!(session = %reader_name, "peer is gone");
                        break;
                    }
                    Err(e) => {
                        error!(session = %reader_name, %e, "read failed");
                        break;
                    }
                }
            }
        });

        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(mut line) = line else { break };
            line.push('\n');
            if session.send.write(line.as_bytes()).is_err() {
                break;
            }
        }
    });
}
