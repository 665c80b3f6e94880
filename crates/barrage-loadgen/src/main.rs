//! Barrage load generator binary.
//!
//! # Usage
//!
//! ```bash
//! # 26 transmitters + 2 receivers, window 5, 10000 submits (defaults)
//! barrage
//!
//! # One minute of sustained load across 10 sessions
//! barrage --transmitters 10 --receivers 0 --duration-secs 60
//!
//! # Stop early with Enter
//! barrage --manual-exit
//! ```

use std::time::Duration;

use barrage_client::{LoopbackClient, LoopbackConfig};
use barrage_core::{ExitPolicy, SessionConfig};
use barrage_loadgen::{Orchestrator, RunConfig};
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Windowed multi-session load generator
#[derive(Parser, Debug)]
#[command(name = "barrage")]
#[command(about = "Windowed multi-session load generator")]
#[command(version)]
struct Args {
    /// Number of transmitter sessions
    #[arg(long, default_value = "26")]
    transmitters: usize,

    /// Number of receiver sessions
    #[arg(long, default_value = "2")]
    receivers: usize,

    /// Number of transceiver sessions
    #[arg(long, default_value = "0")]
    transceivers: usize,

    /// Outstanding-request window per session
    #[arg(long, default_value = "5")]
    window: usize,

    /// Peer host
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Peer port
    #[arg(long, default_value = "8088")]
    port: u16,

    /// Stop after this many submits across all sessions
    #[arg(long, conflicts_with = "duration_secs")]
    submit_count: Option<u64>,

    /// Stop after this many seconds of sending
    #[arg(long)]
    duration_secs: Option<u64>,

    /// Pause between consecutive sends on one session, in milliseconds
    #[arg(long, default_value = "1")]
    submit_delay_ms: u64,

    /// Do not request delivery receipts
    #[arg(long)]
    no_receipts: bool,

    /// System identifier presented at bind time
    #[arg(long, default_value = "loadclient1")]
    system_id: String,

    /// Credential presented at bind time
    #[arg(long, default_value = "password")]
    password: String,

    /// How long to wait for all sessions to bind, in seconds
    #[arg(long, default_value = "7")]
    bind_deadline_secs: u64,

    /// Simulated peer response latency in milliseconds
    #[arg(long, default_value = "2")]
    peer_latency_ms: u64,

    /// Upper bound of peer latency jitter in milliseconds
    #[arg(long, default_value = "0")]
    peer_jitter_ms: u64,

    /// Answer every Nth submit with an error status
    #[arg(long)]
    peer_error_every: Option<u64>,

    /// Stop the run when a line arrives on stdin
    #[arg(long)]
    manual_exit: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let policy = match (args.submit_count, args.duration_secs) {
        (Some(count), _) => ExitPolicy::submit_count(count),
        (None, Some(secs)) => ExitPolicy::duration(Duration::from_secs(secs)),
        (None, None) => ExitPolicy::submit_count(10_000),
    };

    let session = SessionConfig {
        host: args.host,
        port: args.port,
        window_size: args.window,
        system_id: args.system_id,
        password: args.password,
        registered_receipts: !args.no_receipts,
        ..SessionConfig::default()
    };

    let client = LoopbackClient::new(LoopbackConfig {
        response_latency: Duration::from_millis(args.peer_latency_ms),
        latency_jitter: Duration::from_millis(args.peer_jitter_ms),
        error_every: args.peer_error_every,
        ..LoopbackConfig::default()
    });

    let config = RunConfig {
        transmitters: args.transmitters,
        receivers: args.receivers,
        transceivers: args.transceivers,
        session,
        policy,
        submit_delay: Duration::from_millis(args.submit_delay_ms),
        bind_deadline: Duration::from_secs(args.bind_deadline_secs),
        manual_exit: args.manual_exit,
        ..RunConfig::default()
    };

    tracing::info!(
        transmitters = config.transmitters,
        receivers = config.receivers,
        transceivers = config.transceivers,
        window = config.session.window_size,
        "starting load run"
    );

    let summary = Orchestrator::new(client, config).execute().await;
    summary.log();

    if summary.aborted {
        return Err("run aborted: one or more sessions failed to bind".into());
    }

    tracing::info!("done, exiting");
    Ok(())
}
