//! mcc - command-line maritime cloud client
//!
//! Connects to a relay as one actor and either prints the position
//! reports it hears or publishes one.
//!
//! # Usage
//!
//! ```text
//! mcc --id mmsi:219000123 listen
//! mcc --id mmsi:219000123 send --mmsi 219000123 --lat 55.7 --lon 12.6 --sog 11.2
//! ```
//!
//! The relay address defaults to `$MCC_HOST`, then `localhost:43234`.

use std::env;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mcc_client::{
    listener_fn, BroadcastManifest, BroadcastMessage, BroadcastOptions, ClientConfiguration,
    ConnectionEvent, ConnectionSession, PositionTime, TcpTransportFactory, DEFAULT_HOST,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

// ============================================================================
// CLI Arguments
// ============================================================================

/// mcc - maritime cloud client
#[derive(Parser, Debug)]
#[command(name = "mcc")]
#[command(about = "Publish and receive maritime cloud broadcasts")]
#[command(version)]
struct Args {
    /// Relay address, or a comma-separated list tried round-robin
    #[arg(long, global = true)]
    host: Option<String>,

    /// Maritime identity of this actor, e.g. mmsi:219000123
    #[arg(long)]
    id: String,

    /// Keep-alive interval in milliseconds
    #[arg(long, global = true, default_value_t = 2_000)]
    keep_alive_ms: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print position reports until interrupted
    Listen,
    /// Publish one position report
    Send {
        #[arg(long)]
        mmsi: u32,
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,
        /// Speed over ground in knots
        #[arg(long, default_value_t = 0.0)]
        sog: f64,
        /// Limit delivery to receivers within this many meters
        #[arg(long)]
        radius: Option<u32>,
        /// Wait this many seconds for receiver acknowledgments
        #[arg(long)]
        ack_secs: Option<u64>,
    },
}

// ============================================================================
// Messages
// ============================================================================

/// AIS-style position report.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PositionReport {
    mmsi: u32,
    latitude: f64,
    longitude: f64,
    sog: f64,
}

impl BroadcastMessage for PositionReport {
    const CHANNEL: &'static str = "ais.position";
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("mcc=info".parse()?)
                .add_directive("mcc_client=info".parse()?),
        )
        .init();

    let host = args
        .host
        .clone()
        .or_else(|| env::var("MCC_HOST").ok())
        .unwrap_or_else(|| DEFAULT_HOST.to_string());

    let mut config = ClientConfiguration::create_with_id(args.id.as_str())
        .set_host(host.as_str())
        .set_keep_alive(Duration::from_millis(args.keep_alive_ms))
        .set_broadcast_manifest(BroadcastManifest::new().with::<PositionReport>())
        .add_listener(listener_fn(log_event));

    if let Command::Send { lat, lon, .. } = &args.command {
        let (lat, lon) = (*lat, *lon);
        PositionTime::create(lat, lon, now_millis())
            .with_context(|| format!("Invalid position {lat}, {lon}"))?;
        config = config.set_position_supplier(move || {
            PositionTime::create(lat, lon, now_millis()).unwrap_or_default()
        });
    }

    let session = config
        .build(Arc::new(TcpTransportFactory::new()))
        .context("Failed to create session")?;

    session
        .await_connected(Duration::from_secs(30))
        .await
        .with_context(|| format!("Failed to connect to {host}"))?;

    let result = match args.command {
        Command::Listen => listen(&session).await,
        Command::Send {
            mmsi,
            lat,
            lon,
            sog,
            radius,
            ack_secs,
        } => {
            let report = PositionReport {
                mmsi,
                latitude: lat,
                longitude: lon,
                sog,
            };
            send(&session, &report, radius, ack_secs).await
        }
    };

    session.close().await;
    result
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn log_event(event: ConnectionEvent) {
    match event {
        ConnectionEvent::Reconnecting(loss) => warn!(%loss, "Connection lost"),
        ConnectionEvent::Disconnected(reason) => info!(%reason, "Disconnected"),
        ConnectionEvent::RoutingFailure(failure) => warn!(%failure, "Dropped frame"),
        ConnectionEvent::Connecting(_) | ConnectionEvent::Connected(_) => {}
    }
}

async fn listen(session: &ConnectionSession) -> Result<()> {
    let _subscription = session
        .listen::<PositionReport, _>(|header, report| {
            println!(
                "{} mmsi={} lat={:.5} lon={:.5} sog={:.1}",
                header.sender, report.mmsi, report.latitude, report.longitude, report.sog
            );
        })
        .context("Failed to subscribe")?;

    info!(channel = PositionReport::CHANNEL, "Listening for broadcasts");
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Error waiting for shutdown signal");
    }
    info!("Shutdown signal received");
    Ok(())
}

async fn send(
    session: &ConnectionSession,
    report: &PositionReport,
    radius: Option<u32>,
    ack_secs: Option<u64>,
) -> Result<()> {
    let mut options = BroadcastOptions::new().with_receiver_ack(ack_secs.is_some());
    if let Some(radius) = radius {
        options = options.with_radius(radius);
    }

    let mut handle = session
        .broadcast_with(report, options)
        .context("Failed to broadcast")?;
    println!("sent message {} on {}", handle.message_id(), handle.channel());

    let Some(secs) = ack_secs else {
        return Ok(());
    };

    let deadline = tokio::time::sleep(Duration::from_secs(secs));
    tokio::pin!(deadline);
    let mut acks = 0usize;
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            ack = handle.next_ack() => match ack {
                Some(ack) => {
                    acks += 1;
                    println!("ack from {}", ack.receiver);
                }
                None => break,
            },
        }
    }
    println!("{acks} acknowledgment(s)");
    Ok(())
}
