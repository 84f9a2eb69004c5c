//! devgate: TCP device gateway, entry point.
//!
//! Accepts raw TCP connections from field devices, tracks them by their
//! `"ip:port"` identifier, evicts connections that stay silent for too long,
//! and logs every chunk of data they send.
//!
//! # Usage
//!
//! ```text
//! devgate [OPTIONS]
//!
//! Options:
//!   --config            <PATH>  TOML config file [default: devgate.toml]
//!   --listen-ip         <IP>    IPv4 address to bind
//!   --port              <PORT>  TCP port to bind (0 = 6050)
//!   --buffer-size       <BYTES> Per-connection receive buffer
//!   --idle-minutes      <MIN>   Idle timeout before eviction (min 1)
//!   --send-timeout-secs <SECS>  Deadline for one outbound send (0 = 30)
//! ```
//!
//! # Environment variable overrides
//!
//! | Variable                    | Description                  |
//! |-----------------------------|------------------------------|
//! | `DEVGATE_CONFIG`            | Config file path             |
//! | `DEVGATE_LISTEN_IP`         | Listen address               |
//! | `DEVGATE_PORT`              | Listen port                  |
//! | `DEVGATE_BUFFER_SIZE`       | Receive buffer size          |
//! | `DEVGATE_IDLE_MINUTES`      | Idle timeout in minutes      |
//! | `DEVGATE_SEND_TIMEOUT_SECS` | Per-send deadline in seconds |
//! | `RUST_LOG`                  | Log filter (overrides file)  |
//!
//! Command-line flags win over environment variables, which win over the
//! config file, which wins over built-in defaults.

use std::fmt::Write as _;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use devgate_core::{load_config, AppConfig, DispatchItem, ServerEvent};
use devgate_server::GatewayServer;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// TCP device gateway.
#[derive(Debug, Parser)]
#[command(
    name = "devgate",
    about = "TCP gateway that tracks device connections and forwards their data",
    version
)]
struct Cli {
    /// Path to the TOML config file.  A missing file means "all defaults".
    #[arg(long, default_value = "devgate.toml", env = "DEVGATE_CONFIG")]
    config: PathBuf,

    /// IPv4 address to listen on.
    #[arg(long, env = "DEVGATE_LISTEN_IP")]
    listen_ip: Option<String>,

    /// TCP port to listen on.
    #[arg(long, env = "DEVGATE_PORT")]
    port: Option<u16>,

    /// Size in bytes of each per-connection receive buffer.
    #[arg(long, env = "DEVGATE_BUFFER_SIZE")]
    buffer_size: Option<usize>,

    /// Minutes a connection may stay silent before it is evicted.
    #[arg(long, env = "DEVGATE_IDLE_MINUTES")]
    idle_minutes: Option<u32>,

    /// Seconds a single send may wait on a peer that stopped reading.
    #[arg(long, env = "DEVGATE_SEND_TIMEOUT_SECS")]
    send_timeout_secs: Option<u64>,
}

impl Cli {
    /// Applies the flags that were given on top of `config`.
    fn apply_to(&self, config: &mut AppConfig) {
        if let Some(ip) = &self.listen_ip {
            config.server.listen_ip = ip.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(size) = self.buffer_size {
            config.server.buffer_size = size;
        }
        if let Some(minutes) = self.idle_minutes {
            config.server.idle_timeout_minutes = minutes;
        }
        if let Some(secs) = self.send_timeout_secs {
            config.server.send_timeout_secs = secs;
        }
    }
}

/// Renders `bytes` as space-separated lowercase hex.
fn hex_dump(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for (i, b) in bytes.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let _ = write!(out, "{b:02x}");
    }
    out
}

fn log_payload(item: DispatchItem) {
    info!("{} bytes from {}", item.len(), item.client_id());
    debug!("{}: {}", item.client_id(), hex_dump(item.payload()));
}

fn log_event(event: &ServerEvent) {
    match event {
        ServerEvent::Error { .. } => warn!("{event}"),
        _ => info!("{event}"),
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = load_config(&cli.config)
        .with_context(|| format!("failed to load config from {}", cli.config.display()))?;
    cli.apply_to(&mut config);

    // RUST_LOG wins; otherwise the level from the config file.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new(&config.logging.level))
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!(
        "devgate starting on {}:{} (buffer {} bytes, idle timeout {} min)",
        config.server.listen_ip,
        config.server.effective_port(),
        config.server.effective_buffer_size(),
        config.server.idle_timeout_minutes
    );

    let idle_minutes = config.server.idle_timeout_minutes;
    let (mut server, mut events) = GatewayServer::new(config.server, log_payload);
    server
        .start(idle_minutes)
        .context("failed to start the gateway")?;

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                match signal {
                    Ok(()) => info!("received Ctrl+C; shutting down"),
                    Err(e) => error!("failed to listen for Ctrl+C signal: {e}"),
                }
                break;
            }
            event = events.recv() => match event {
                Some(event) => log_event(&event),
                None => break,
            },
        }
    }

    server.shutdown().await;
    while let Ok(event) = events.try_recv() {
        log_event(&event);
    }
    info!("devgate stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
