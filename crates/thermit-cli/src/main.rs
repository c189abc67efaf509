//! Demo thermit endpoint: a TCP link standing in for the serial line, real
//! files on disk.
//!
//! ```text
//! # terminal 1: slave, receiving into ./inbox
//! thermit --listen 127.0.0.1:7001 --out-dir inbox
//!
//! # terminal 2: master, sending a file
//! thermit --master --connect 127.0.0.1:7001 --send notes.txt
//! ```

mod env;

use std::{path::PathBuf, thread, time::Duration};

use anyhow::{Context, bail};
use clap::Parser;
use thermit_core::{Role, Session, State};
use thermit_proto::Parameters;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::env::{LinkMode, TcpEnv};

/// Pause between steps: the protocol is request/response paced, so a short
/// sleep keeps CPU use negligible without hurting throughput much.
const STEP_DELAY: Duration = Duration::from_millis(2);

#[derive(Debug, Parser)]
#[command(name = "thermit", about = "thermit file-transfer endpoint over TCP")]
struct Args {
    /// Act as the negotiation master (default: slave).
    #[arg(long)]
    master: bool,

    /// Bind this address and wait for the peer.
    #[arg(long, conflicts_with = "connect")]
    listen: Option<String>,

    /// Connect to a listening peer at this address.
    #[arg(long)]
    connect: Option<String>,

    /// File(s) to send once the session is running.
    #[arg(long = "send")]
    send: Vec<PathBuf>,

    /// Directory received files are written into.
    #[arg(long, default_value = ".")]
    out_dir: PathBuf,

    /// Local chunk-size capability in bytes (1..=112).
    #[arg(long)]
    chunk_size: Option<u16>,

    /// Local keepalive capability in milliseconds.
    #[arg(long)]
    keep_alive_ms: Option<u16>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let (mode, addr) = match (&args.listen, &args.connect) {
        (Some(addr), None) => (LinkMode::Listen, addr.clone()),
        (None, Some(addr)) => (LinkMode::Connect, addr.clone()),
        _ => bail!("exactly one of --listen or --connect is required"),
    };

    let role = if args.master { Role::Master } else { Role::Slave };
    let mut params = Parameters::default();
    if let Some(chunk_size) = args.chunk_size {
        params.chunk_size = chunk_size;
    }
    if let Some(keep_alive_ms) = args.keep_alive_ms {
        params.keep_alive_ms = keep_alive_ms;
    }

    std::fs::create_dir_all(&args.out_dir)
        .with_context(|| format!("creating {}", args.out_dir.display()))?;

    let mut env = TcpEnv::new(mode, args.out_dir.clone());
    for path in &args.send {
        env.offer_file(path)
            .with_context(|| format!("offering {}", path.display()))?;
    }
    let to_send = args.send.len() as u32;

    let mut session = Session::with_parameters(&addr, role, env, params)
        .with_context(|| format!("starting session on {addr}"))?;
    info!(?role, %addr, "session started");

    let mut last_state = State::WaitCbConfig;
    loop {
        let state = session.step();
        if state != last_state {
            info!(?state, "state changed");
            last_state = state;
        }

        let diag = session.diagnostics();
        if to_send > 0 && diag.sent_files >= to_send && !session.tx_progress().running() {
            info!(
                sent_files = diag.sent_files,
                sent_bytes = diag.sent_bytes,
                retransmits = diag.retransmits,
                crc_errors = diag.crc_errors,
                "all files delivered"
            );
            return Ok(());
        }

        thread::sleep(STEP_DELAY);
    }
}
