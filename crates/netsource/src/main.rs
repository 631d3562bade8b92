//! Network source daemon
//!
//! Runs one network source from a TOML config file and logs a summary of
//! every packet delivered to the configured connections.

use anyhow::Context;
use clap::Parser;
use netsource::{ChannelSink, Connection, NetworkSource, SamplePacket, SourceConfig};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// TCP to sample packet streaming bridge
#[derive(Parser, Debug)]
#[command(name = "netsourced")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the TOML config file
    #[arg(short = 'c', long, default_value = netsource::config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// TCP port to listen on or connect to
    #[arg(short = 'p', long)]
    port: Option<u16>,

    /// Socket role (server or client)
    #[arg(short = 't', long)]
    connection_type: Option<String>,

    /// Peer address for the client role
    #[arg(short = 'i', long)]
    ip_address: Option<String>,

    /// Byte swap width (0 = none, 1 = sample width, N = N-byte groups)
    #[arg(short = 's', long)]
    byte_swap: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,
}

/// Initialize logging; RUST_LOG takes precedence over `log_level`.
fn init_logging(log_level: &str) {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .compact(),
        )
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(&args.log_level);

    info!("netsourced: Starting network source daemon");

    match run(args).await {
        Ok(()) => {
            info!("netsourced: Daemon exiting normally");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %format!("{:#}", e), "netsourced: Daemon exiting with error");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = SourceConfig::load_or_default(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    let connections = config.connections.clone();

    let source = Arc::new(NetworkSource::new(config).context("invalid configuration")?);
    if let Some(connection_type) = args.connection_type.as_deref() {
        source.set_connection_type(connection_type)?;
    }
    if let Some(ip_address) = args.ip_address.as_deref() {
        source.set_ip_address(ip_address);
    }
    if let Some(port) = args.port {
        source.set_port(port);
    }
    if let Some(byte_swap) = args.byte_swap {
        source.set_byte_swap(byte_swap);
    }

    if connections.is_empty() {
        warn!("netsourced: No connections configured, received data will be held");
    }

    let mut consumers = Vec::with_capacity(connections.len());
    for entry in connections {
        let (sink, rx) = ChannelSink::channel();
        let mut connection = Connection::new(entry.name.clone(), entry.port_type, Arc::new(sink));
        if let Some(byte_swap) = entry.byte_swap {
            connection = connection.with_byte_swap(byte_swap);
        }
        source.add_connection(connection)?;
        consumers.push(spawn_consumer(entry.name, rx));
    }

    info!(
        connection_type = %source.connection_type(),
        port = source.port(),
        byte_swap = source.byte_swap(),
        max_bytes = source.max_bytes(),
        min_bytes = source.min_bytes(),
        "netsourced: Source configured"
    );

    source.start()?;

    signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    info!("netsourced: Received shutdown signal");

    let stopper = Arc::clone(&source);
    tokio::task::spawn_blocking(move || stopper.stop())
        .await
        .context("stop task failed")??;

    for stat in source.connection_stats() {
        info!(
            connection = %stat.name,
            kind = %stat.kind,
            packets = stat.packets,
            bytes = stat.bytes,
            samples = stat.samples,
            "netsourced: Connection totals"
        );
    }

    // Dropping the source releases the sinks, which ends the consumers.
    drop(source);
    for consumer in consumers {
        let _ = consumer.await;
    }

    info!("netsourced: Graceful shutdown complete");
    Ok(())
}

/// Logs packets arriving for one connection until its sink is dropped.
fn spawn_consumer(name: String, mut rx: mpsc::UnboundedReceiver<SamplePacket>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut packets = 0u64;
        while let Some(packet) = rx.recv().await {
            packets += 1;
            if packet.end_of_stream {
                info!(connection = %name, stream_id = %packet.stream_id, "End of stream");
                continue;
            }
            info!(
                connection = %name,
                kind = %packet.kind,
                samples = packet.data.len(),
                time = packet.time.as_secs_f64(),
                "Packet received"
            );
        }
        info!(connection = %name, packets, "Consumer finished");
    })
}
