//! duplex-link CLI - relays stdin/stdout over one connected peer.
//!
//! The library leaves connection setup to its owner; this binary is such an
//! owner. It accepts or dials a single peer, hands the socket to a
//! `DuplexTransportWorker`, writes each stdin line to the peer and prints
//! whatever the peer sends.

use std::fs;
use std::io::{self, BufRead, Write};
use std::net::{TcpListener, TcpStream};
#[cfg(unix)]
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use duplex_link::constants::ENV_LOG_FILE;
use duplex_link::{Config, DuplexTransportWorker, TransportEndpoint, TransportEvent};

#[derive(Parser, Debug)]
#[command(name = "duplex-link", version, about = "Relay stdin/stdout over a duplex socket link")]
struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Receive buffer size in bytes (overrides config)
    #[arg(long, global = true)]
    max_message_size: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Wait for one peer to connect, then relay
    Listen(Target),
    /// Connect to a listening peer, then relay
    Connect(Target),
}

/// Where to listen or connect.
#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
struct Target {
    /// TCP address, e.g. 127.0.0.1:7070
    #[arg(long)]
    tcp: Option<String>,

    /// Unix domain socket path
    #[arg(long)]
    unix: Option<PathBuf>,
}

/// Everything the session loop reacts to, from any thread.
#[derive(Debug)]
enum SessionEvent {
    Line(Vec<u8>),
    InputClosed,
    Interrupted,
    ConnectionLost,
}

fn main() -> Result<()> {
    init_logging()?;
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(size) = cli.max_message_size {
        config.max_message_size = size;
        config.validate()?;
    }

    match cli.command {
        Commands::Listen(Target { tcp: Some(addr), .. }) => {
            let listener =
                TcpListener::bind(&addr).with_context(|| format!("bind tcp listener on {addr}"))?;
            eprintln!("Listening on tcp:{addr}");
            let (stream, _) = listener.accept().context("accept tcp peer")?;
            run_session(stream, &config)
        }
        #[cfg(unix)]
        Commands::Listen(Target { unix: Some(path), .. }) => {
            let listener = UnixListener::bind(&path)
                .with_context(|| format!("bind unix socket: {}", path.display()))?;
            let _cleanup = scopeguard::guard(path.clone(), |path| {
                if let Err(e) = fs::remove_file(&path) {
                    log::debug!("[Session] Could not remove {}: {e}", path.display());
                }
            });
            eprintln!("Listening on unix:{}", path.display());
            let (stream, _) = listener.accept().context("accept unix peer")?;
            run_session(stream, &config)
        }
        Commands::Connect(Target { tcp: Some(addr), .. }) => {
            let stream = TcpStream::connect(&addr).with_context(|| format!("connect to tcp:{addr}"))?;
            run_session(stream, &config)
        }
        #[cfg(unix)]
        Commands::Connect(Target { unix: Some(path), .. }) => {
            let stream = UnixStream::connect(&path)
                .with_context(|| format!("connect to unix:{}", path.display()))?;
            run_session(stream, &config)
        }
        #[cfg(not(unix))]
        Commands::Listen(Target { unix: Some(_), .. })
        | Commands::Connect(Target { unix: Some(_), .. }) => {
            anyhow::bail!("--unix is not supported on this platform")
        }
        Commands::Listen(_) | Commands::Connect(_) => {
            anyhow::bail!("one of --tcp or --unix is required")
        }
    }
}

/// Set up env_logger on stderr, or on the file named by `DUPLEX_LINK_LOG_FILE`.
fn init_logging() -> Result<()> {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    builder.format_timestamp_secs();
    if let Ok(path) = std::env::var(ENV_LOG_FILE) {
        let file = fs::File::create(&path).with_context(|| format!("create log file {path}"))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }
    builder.init();
    Ok(())
}

/// Relay until stdin closes, Ctrl-C, or the connection is lost.
fn run_session<E: TransportEndpoint + 'static>(endpoint: E, config: &Config) -> Result<()> {
    let (events_tx, events_rx) = mpsc::channel::<SessionEvent>();

    let lost_tx = events_tx.clone();
    let sink = Arc::new(move |event: TransportEvent<'_>| match event {
        TransportEvent::Inbound { buffer, .. } => {
            let mut stdout = io::stdout().lock();
            if let Err(e) = stdout.write_all(buffer).and_then(|()| stdout.flush()) {
                log::warn!("[Session] stdout write failed: {e}");
            }
        }
        TransportEvent::Outbound { payload } => {
            log::debug!("[Session] Sent {} bytes", payload.len());
        }
        TransportEvent::ConnectionLost { payload } => {
            match payload {
                Some(unsent) => log::warn!("[Session] Connection lost, {} bytes unsent", unsent.len()),
                None => log::warn!("[Session] Connection lost"),
            }
            if lost_tx.send(SessionEvent::ConnectionLost).is_err() {
                log::debug!("[Session] Session loop gone, dropping connection-lost notice");
            }
        }
    });

    let worker = DuplexTransportWorker::new(endpoint, sink, config)?;
    worker.start()?;
    eprintln!("Connected to {}", worker.peer());

    let interrupt_tx = events_tx.clone();
    ctrlc::set_handler(move || {
        if interrupt_tx.send(SessionEvent::Interrupted).is_err() {
            log::debug!("[Session] Session loop gone, ignoring interrupt");
        }
    })
    .context("install Ctrl-C handler")?;

    spawn_stdin_reader(events_tx)?;

    for event in &events_rx {
        match event {
            SessionEvent::Line(bytes) => {
                // Failures also arrive as ConnectionLost through the sink.
                if let Err(e) = worker.write(&bytes) {
                    log::debug!("[Session] {e}");
                }
            }
            SessionEvent::InputClosed => {
                log::info!("[Session] stdin closed, disconnecting");
                break;
            }
            SessionEvent::Interrupted => {
                log::info!("[Session] Interrupted, disconnecting");
                break;
            }
            SessionEvent::ConnectionLost => {
                eprintln!("Connection lost");
                break;
            }
        }
    }

    let stopped = match config.stop_timeout() {
        Some(timeout) => worker.stop_timeout(timeout),
        None => worker.stop(),
    };
    if let Err(e) = stopped {
        log::warn!("[Session] {e}");
    }
    Ok(())
}

/// Forward stdin lines (newline included) to the session loop.
fn spawn_stdin_reader(tx: mpsc::Sender<SessionEvent>) -> Result<()> {
    thread::Builder::new()
        .name("stdin-reader".to_owned())
        .spawn(move || {
            let mut input = io::stdin().lock();
            let mut line = Vec::new();
            loop {
                line.clear();
                match input.read_until(b'\n', &mut line) {
                    Ok(0) => {
                        if tx.send(SessionEvent::InputClosed).is_err() {
                            log::debug!("[Session] Session loop gone before stdin closed");
                        }
                        break;
                    }
                    Ok(_) => {
                        if tx.send(SessionEvent::Line(line.clone())).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        log::error!("[Session] stdin read failed: {e}");
                        if tx.send(SessionEvent::InputClosed).is_err() {
                            log::debug!("[Session] Session loop gone before stdin closed");
                        }
                        break;
                    }
                }
            }
        })
        .context("spawn stdin reader")?;
    Ok(())
}
