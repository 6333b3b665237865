//! # Ferry Server
//!
//! Receives segmented streams over UDP from any number of clients,
//! acknowledges every segment, and answers each completed stream with its
//! CRC32C.
//!
//! ## Usage
//!
//! ```bash
//! ferry-server --bind 0.0.0.0 --port 9000
//! ferry-server --port 9000 --config ferry.toml
//! RUST_LOG=debug ferry-server --port 9000
//! ```

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ferry_node::config::FerryConfig;
use ferry_node::server::Server;

fn main() -> anyhow::Result<()> {
    // ── Logging ─────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(true)
        .compact()
        .init();

    // ── Parse CLI ───────────────────────────────────────────────
    let args = parse_args()?;
    let config = match &args.config {
        Some(path) => FerryConfig::load(path)?,
        None => FerryConfig::default(),
    };

    // ── Bind ────────────────────────────────────────────────────
    let addr = SocketAddr::new(args.bind, args.port);
    let mut server = Server::bind(addr, &config)?;
    tracing::info!(
        addr = %server.local_addr()?,
        expiry_ms = config.reassembly.session_expiry.as_millis() as u64,
        "ferry-server started"
    );

    // ── Graceful shutdown ───────────────────────────────────────
    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        ctrlc::set_handler(move || {
            tracing::info!("shutting down...");
            running.store(false, Ordering::Relaxed);
        })?;
    }

    // ── Main loop ───────────────────────────────────────────────
    server.run(&running);

    // ── Cleanup ─────────────────────────────────────────────────
    let report = server.shutdown();
    tracing::info!(
        received = report.server.datagrams_received,
        sent = report.server.datagrams_sent,
        send_failures = report.server.send_failures,
        peers = report.dispatcher.peers_created,
        streams_completed = report.dispatcher.reassembly.streams_completed,
        duplicates = report.dispatcher.reassembly.duplicate_frames,
        goodput = report.dispatcher.reassembly.goodput_ratio(),
        malformed = report.dispatcher.reassembly.malformed_frames,
        "ferry-server stopped"
    );
    tracing::debug!(report = %serde_json::to_string(&report)?, "final stats");

    Ok(())
}

// ─── CLI Parsing ────────────────────────────────────────────────────────────

struct Args {
    bind: IpAddr,
    port: u16,
    config: Option<PathBuf>,
}

fn parse_args() -> anyhow::Result<Args> {
    let args: Vec<String> = std::env::args().collect();
    let mut bind: IpAddr = [0, 0, 0, 0].into();
    let mut port = None;
    let mut config = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--bind" | "-b" => {
                i += 1;
                let val = args
                    .get(i)
                    .ok_or_else(|| anyhow::anyhow!("--bind requires a value"))?;
                bind = val
                    .parse()
                    .map_err(|e| anyhow::anyhow!("invalid bind address '{}': {}", val, e))?;
            }
            "--port" | "-p" => {
                i += 1;
                let val = args
                    .get(i)
                    .ok_or_else(|| anyhow::anyhow!("--port requires a value"))?;
                port = Some(
                    val.parse()
                        .map_err(|e| anyhow::anyhow!("invalid port '{}': {}", val, e))?,
                );
            }
            "--config" | "-c" => {
                i += 1;
                config = Some(PathBuf::from(
                    args.get(i)
                        .ok_or_else(|| anyhow::anyhow!("--config requires a value"))?,
                ));
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            other => {
                anyhow::bail!("unknown argument: {other}\nRun with --help for usage.");
            }
        }
        i += 1;
    }

    let port = port.ok_or_else(|| anyhow::anyhow!("--port is required\nRun with --help for usage."))?;

    Ok(Args { bind, port, config })
}

fn print_help() {
    eprintln!(
        r#"ferry-server — segmented stream receiver

USAGE:
  ferry-server --port <PORT> [OPTIONS]

OPTIONS:
  --bind, -b <addr>       Local IP address to bind (default 0.0.0.0)
  --port, -p <port>       UDP port to listen on (required)
  --config, -c <path>     TOML config file
  --help, -h              Show this help

ENVIRONMENT:
  RUST_LOG                Log filter (default: info)"#
    );
}
