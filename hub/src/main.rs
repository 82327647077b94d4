//! DVB-RCS2 Return Link Hub
//!
//! Runs the DAMA superframe cycle of every configured beam, fed by synthetic
//! terminals and, optionally, terminal reports received over ZeroMQ.

mod config;
mod traffic;
mod transport;

use anyhow::Result;
use clap::Parser;
use interfaces::zmq_handler::AsyncZmqHandler;
use layers::mac::run_superframe_loop;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use config::HubConfig;
use traffic::{drive_terminals, TrafficProfile};
use transport::HubSink;

/// DVB-RCS2 return link hub
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "hub.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Seed of the slot shuffles, overrides the configuration
    #[arg(long)]
    seed: Option<u64>,

    /// Number of superframes to run, overrides the configuration
    #[arg(long)]
    cycles: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    info!("Starting DVB-RCS2 return link hub");
    info!("Configuration file: {}", args.config.display());

    let mut config = HubConfig::load(&args.config)?;
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    if args.cycles.is_some() {
        config.cycles = args.cycles;
    }

    let context = config.build_context()?;
    let superframe = context.superframe(0)?;
    let period = superframe.duration();
    info!("Superframe: {:?}, {} frames, {} carriers, period {:?}",
          superframe.config_type(), superframe.frame_count(), superframe.carrier_count(), period);

    let (ncc, lls) = config.build_ncc(&context)?;
    let ncc = Arc::new(Mutex::new(ncc));

    // ZeroMQ transport
    let (reports, publisher) = match &config.zmq {
        Some(zmq) => {
            let reports = AsyncZmqHandler::new(zmq.report_config())?;
            reports.initialize().await?;
            let publisher = AsyncZmqHandler::new(zmq.tbtp_config())?;
            publisher.initialize().await?;
            (Some(reports), Some(publisher))
        }
        None => {
            info!("No ZeroMQ endpoints configured, TBTPs are only logged");
            (None, None)
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let traffic_handle = tokio::spawn(drive_terminals(
        ncc.clone(),
        TrafficProfile::new(&config.terminals, &config.beams),
        reports.clone(),
        lls,
        period,
        shutdown_rx.clone(),
    ));

    let sink = Arc::new(HubSink::new(publisher.clone()));
    let mut loop_handle = tokio::spawn(run_superframe_loop(
        ncc.clone(),
        sink,
        period,
        config.cycles,
        shutdown_rx,
    ));

    // Wait for shutdown signal or the last cycle
    let finished = tokio::select! {
        _ = tokio::signal::ctrl_c() => None,
        result = &mut loop_handle => Some(result),
    };
    let result = match finished {
        Some(result) => result,
        None => {
            info!("Received shutdown signal");
            let _ = shutdown_tx.send(true);
            loop_handle.await
        }
    };

    // Shutdown
    info!("Shutting down hub");
    let _ = shutdown_tx.send(true);

    match tokio::time::timeout(tokio::time::Duration::from_secs(5), traffic_handle).await {
        Ok(Ok(Err(e))) => warn!("Traffic driver error: {}", e),
        Ok(Err(e)) => warn!("Traffic driver panicked: {}", e),
        Err(_) => warn!("Traffic driver did not stop in time"),
        Ok(Ok(Ok(()))) => {}
    }

    for handler in [reports, publisher].into_iter().flatten() {
        handler.shutdown().await?;
    }

    let cycles = result??;
    info!("Hub shutdown complete after {} superframes", cycles);
    Ok(())
}
