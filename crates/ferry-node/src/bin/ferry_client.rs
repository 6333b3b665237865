//! # Ferry Client
//!
//! Generates synthetic streams, sends them to a ferry-server with
//! retransmission until every segment is acknowledged, and reports whether
//! the server's checksum for each stream matched the local one.
//!
//! ## Usage
//!
//! ```bash
//! ferry-client --host 127.0.0.1 --port 9000
//! ferry-client --host server.lan --port 9000 --streams 5 --segments 100
//! ```

use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use ferry_node::client::SenderHandle;
use ferry_node::config::FerryConfig;
use ferry_node::net::{resolve, UdpTransport};
use ferry_transport::segment::{Segmenter, StreamIdAllocator};
use ferry_transport::sender::{ChecksumVerdict, ReliableSender};

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
    let mut config = match &args.config {
        Some(path) => FerryConfig::load(path)?,
        None => FerryConfig::default(),
    };
    if let Some(n) = args.streams {
        config.sender.streams = n;
    }
    if let Some(n) = args.segments {
        config.sender.segments_per_stream = n;
    }
    let settings = config.sender;

    // ── Streams ─────────────────────────────────────────────────
    let dest = resolve(&args.host, args.port)?;
    let ids = Arc::new(StreamIdAllocator::new());
    let mut segmenter = Segmenter::new(settings.segmenter.clone(), ids);
    let streams = (0..settings.streams)
        .map(|_| segmenter.generate(settings.segments_per_stream))
        .collect();
    let mut sender = ReliableSender::new(settings.sender_config(), streams);
    sender.shuffle();

    tracing::info!(
        %dest,
        streams = settings.streams,
        segments = sender.segments().len(),
        "ferry-client starting"
    );

    // ── Sender thread ───────────────────────────────────────────
    let transport = UdpTransport::ephemeral_for(dest)?;
    let handle = SenderHandle::spawn(sender, transport, dest, settings.poll_timeout)?;

    {
        let stop = handle.stop_flag();
        ctrlc::set_handler(move || {
            tracing::info!("stopping sender...");
            stop.store(true, Ordering::Relaxed);
        })?;
    }

    let report = handle.join()?;

    // ── Report ──────────────────────────────────────────────────
    for stream in &report.streams {
        match stream.verdict() {
            ChecksumVerdict::Matched => tracing::info!(
                stream = %stream.stream_id,
                checksum = stream.expected_checksum,
                "matched"
            ),
            ChecksumVerdict::Mismatched { expected, reported } => tracing::warn!(
                stream = %stream.stream_id,
                expected,
                reported,
                "mismatched"
            ),
            ChecksumVerdict::Unconfirmed => tracing::warn!(
                stream = %stream.stream_id,
                expected = stream.expected_checksum,
                "unconfirmed"
            ),
        }
    }
    tracing::info!(
        complete = report.complete,
        transmissions = report.stats.transmissions,
        retransmissions = report.stats.retransmissions,
        retransmit_ratio = report.stats.retransmit_ratio(),
        acked = report.stats.segments_acked,
        total = report.stats.segments_total,
        "ferry-client stopped"
    );
    tracing::debug!(stats = %serde_json::to_string(&report.stats)?, "final stats");

    Ok(())
}

// ─── CLI Parsing ────────────────────────────────────────────────────────────

struct Args {
    host: String,
    port: u16,
    streams: Option<u32>,
    segments: Option<u32>,
    config: Option<PathBuf>,
}

fn parse_args() -> anyhow::Result<Args> {
    let args: Vec<String> = std::env::args().collect();
    let mut host = None;
    let mut port = None;
    let mut streams = None;
    let mut segments = None;
    let mut config = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--host" | "-H" => {
                i += 1;
                host = Some(
                    args.get(i)
                        .ok_or_else(|| anyhow::anyhow!("--host requires a value"))?
                        .clone(),
                );
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
            "--streams" | "-s" => {
                i += 1;
                let val = args
                    .get(i)
                    .ok_or_else(|| anyhow::anyhow!("--streams requires a value"))?;
                streams = Some(
                    val.parse()
                        .map_err(|e| anyhow::anyhow!("invalid stream count '{}': {}", val, e))?,
                );
            }
            "--segments" | "-n" => {
                i += 1;
                let val = args
                    .get(i)
                    .ok_or_else(|| anyhow::anyhow!("--segments requires a value"))?;
                segments = Some(
                    val.parse()
                        .map_err(|e| anyhow::anyhow!("invalid segment count '{}': {}", val, e))?,
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

    let host = host.ok_or_else(|| anyhow::anyhow!("--host is required\nRun with --help for usage."))?;
    let port = port.ok_or_else(|| anyhow::anyhow!("--port is required\nRun with --help for usage."))?;

    Ok(Args {
        host,
        port,
        streams,
        segments,
        config,
    })
}

fn print_help() {
    eprintln!(
        r#"ferry-client — segmented stream sender

USAGE:
  ferry-client --host <HOST> --port <PORT> [OPTIONS]

OPTIONS:
  --host, -H <host>       Server address or hostname (required)
  --port, -p <port>       Server UDP port (required)
  --streams, -s <n>       Synthetic streams to send (default 3)
  --segments, -n <n>      Segments per stream (default 20)
  --config, -c <path>     TOML config file
  --help, -h              Show this help

ENVIRONMENT:
  RUST_LOG                Log filter (default: info)"#
    );
}
