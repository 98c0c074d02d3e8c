mod capture;
mod decoder;
mod frame;

use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use pathwatch_core::{
    flush_pending, Classifier, ClockMode, ConfirmRule, FlowLedger, IngestPipeline, MeasurementClock,
    ObservedDatagram, ObserverMetrics, Reporter, Sweeper, WorkerPool,
};
use tokio::sync::watch;

use crate::capture::SourceSpec;
use crate::decoder::ClientHelloSni;

/// Decoded datagrams buffered between the capture loop and the ingestion
/// workers.
const INGEST_QUEUE: usize = 1_024;

#[derive(Parser, Debug)]
#[command(name = "pathwatch-observer")]
#[command(about = "Watch traffic and report, per probe flow, whether a confirmation returned in time")]
struct Args {
    /// BPF filter applied to every capture source.
    #[arg(long, default_value = "udp")]
    filter: String,

    /// Resolution timeout: a flow with no confirmation this long after its
    /// initiation is reported as censored.
    #[arg(long, default_value_t = 10)]
    timeout_secs: u64,

    /// Expiry sweep cadence.
    #[arg(long, default_value_t = 1)]
    sweep_interval_secs: u64,

    /// Confirmation heuristic: payloads shorter than this count as
    /// confirmations.
    #[arg(long, default_value_t = 20)]
    confirm_max_len: usize,

    /// Hex-encoded marker prefix; when set, replaces the length heuristic
    /// with an exact prefix match.
    #[arg(long)]
    confirm_marker: Option<String>,

    /// Ingestion worker count (0 = derived from CPU count).
    #[arg(long, default_value_t = 0)]
    workers: usize,

    /// Ledger shard count (1 = single lock).
    #[arg(long, default_value_t = 16)]
    ledger_shards: usize,

    /// Interface for live capture.
    #[arg(short = 'i', long, conflicts_with = "traces")]
    interface: Option<String>,

    /// Trace files to replay; with none (or `-`) reads a capture stream
    /// from standard input.
    #[arg()]
    traces: Vec<PathBuf>,
}

impl Args {
    fn source(&self) -> SourceSpec {
        if let Some(iface) = &self.interface {
            SourceSpec::Live(iface.clone())
        } else if self.traces.is_empty() || self.traces == [PathBuf::from("-")] {
            SourceSpec::Stdin
        } else {
            SourceSpec::Files(self.traces.clone())
        }
    }

    fn confirm_rule(&self) -> Result<ConfirmRule> {
        match &self.confirm_marker {
            Some(marker) => {
                let bytes = hex::decode(marker).context("--confirm-marker is not valid hex")?;
                Ok(ConfirmRule::MarkerPrefix(bytes))
            }
            None => Ok(ConfirmRule::MaxPayloadLen(self.confirm_max_len)),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let source = args.source();
    // Live capture runs on wall-clock time; replayed traces may sit far
    // from wall-clock time, so their own timestamps drive expiry.
    let mode = match source {
        SourceSpec::Live(_) => ClockMode::Wall,
        SourceSpec::Files(_) | SourceSpec::Stdin => ClockMode::Trace,
    };
    let workers = if args.workers == 0 { num_cpus::get().max(1) * 2 } else { args.workers };

    let ledger = Arc::new(FlowLedger::new(args.ledger_shards));
    let clock = Arc::new(MeasurementClock::new(mode));
    let metrics = Arc::new(ObserverMetrics::new());
    let reporter = Arc::new(Reporter::stdout());
    let classifier = Classifier::new(args.confirm_rule()?, Arc::new(ClientHelloSni));
    let pipeline = Arc::new(IngestPipeline::new(
        classifier,
        Arc::clone(&ledger),
        Arc::clone(&clock),
        Arc::clone(&reporter),
        Arc::clone(&metrics),
    ));

    info!(
        "observer.event=start mode={mode:?} workers={workers} timeout_secs={} shards={}",
        args.timeout_secs, args.ledger_shards
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    spawn_signal_handler(shutdown_tx.clone());

    let sweeper = Sweeper::new(
        Arc::clone(&ledger),
        Arc::clone(&clock),
        Arc::clone(&reporter),
        Arc::clone(&metrics),
        Duration::from_secs(args.timeout_secs),
        Duration::from_secs(args.sweep_interval_secs.max(1)),
    )
    .spawn(shutdown_rx.clone());

    let pool: WorkerPool<ObservedDatagram, Infallible> = {
        let pipeline = Arc::clone(&pipeline);
        WorkerPool::start(workers, INGEST_QUEUE, move |datagram| {
            let pipeline = Arc::clone(&pipeline);
            async move {
                pipeline.process(&datagram);
                Ok(())
            }
        })
    };

    let mut capture_task = {
        let tx = pool.sender();
        let filter = args.filter.clone();
        let capture_shutdown = shutdown_rx.clone();
        tokio::task::spawn_blocking(move || capture::run(source, &filter, tx, capture_shutdown))
    };

    // Wait for the source to run dry or for an interrupt. A reader blocked
    // on a quiet pipe cannot observe the shutdown flag, so after an
    // interrupt the capture thread only gets a bounded grace period before
    // the flush proceeds without it.
    let mut shutdown_watch = shutdown_rx.clone();
    let stats = tokio::select! {
        joined = &mut capture_task => unwrap_capture(joined)?,
        _ = shutdown_watch.changed() => {
            match tokio::time::timeout(Duration::from_secs(2), &mut capture_task).await {
                Ok(joined) => unwrap_capture(joined)?,
                Err(_) => {
                    warn!("capture.event=reader_stalled note=flushing_without_it");
                    capture::CaptureStats::default()
                }
            }
        }
    };

    // Drain the ingestion queue, then flush whatever never resolved.
    pool.close();
    let _ = pool.join().await;
    let _ = shutdown_tx.send(true);
    let _ = sweeper.await;
    flush_pending(&ledger, &reporter, &metrics);

    info!(
        "observer.event=done frames={} decoded={} datagrams={} resolved={:?}",
        stats.frames,
        stats.decoded,
        metrics.datagrams_total(),
        metrics.resolved_snapshot(),
    );
    Ok(())
}

fn unwrap_capture(
    joined: std::result::Result<Result<capture::CaptureStats>, tokio::task::JoinError>,
) -> Result<capture::CaptureStats> {
    joined.context("capture task panicked")?
}

fn spawn_signal_handler(shutdown: watch::Sender<bool>) {
    tokio::spawn(async move {
        let interrupted = wait_for_signal().await;
        if interrupted {
            warn!("observer.event=interrupt note=flushing_pending");
        }
        let _ = shutdown.send(true);
    });
}

#[cfg(unix)]
async fn wait_for_signal() -> bool {
    use tokio::signal::unix::{signal, SignalKind};
    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(err) => {
            warn!("observer.event=signal_setup_failed reason={err}");
            return tokio::signal::ctrl_c().await.is_ok();
        }
    };
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.is_ok(),
        _ = term.recv() => true,
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> bool {
    tokio::signal::ctrl_c().await.is_ok()
}
