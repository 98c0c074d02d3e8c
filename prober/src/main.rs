mod jobs;
mod sender;

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::Parser;
use log::info;
use pathwatch_core::{ProbeDispatcher, ProbeTemplate};

use crate::sender::UdpSenderPool;

#[derive(Parser, Debug)]
#[command(name = "pathwatch-prober")]
#[command(about = "Send paced handshake+filler UDP probe flows for path-interference measurement")]
struct Args {
    /// Local address the probes are sent from.
    #[arg(long)]
    source_addr: Ipv4Addr,

    /// Address of the controlled vantage point the probes are sent to.
    #[arg(long)]
    target_addr: Ipv4Addr,

    /// Hex-encoded handshake blob sent first on every flow.
    #[arg(long)]
    initiation_payload: String,

    /// Hex-encoded bytes repeated after the handshake.
    #[arg(long)]
    filler_payload: String,

    /// Pause between the initiation datagram and the first filler (µs).
    #[arg(long, default_value_t = 100)]
    initiation_delay_us: u64,

    /// Pause between consecutive filler datagrams (µs).
    #[arg(long, default_value_t = 100)]
    filler_delay_us: u64,

    /// Filler datagrams per flow.
    #[arg(long, default_value_t = 3)]
    filler_count: u32,

    /// Concurrent probe workers.
    #[arg(long, default_value_t = 100)]
    workers: usize,

    /// Job file: one whitespace-separated `src_port dst_port` pair per line.
    #[arg(long)]
    ports: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let initiation = Bytes::from(hex::decode(&args.initiation_payload).context("--initiation-payload is not valid hex")?);
    let filler = Bytes::from(hex::decode(&args.filler_payload).context("--filler-payload is not valid hex")?);

    // The whole job list is validated before the first datagram goes out;
    // a malformed entry must not leave a run half-executed.
    let jobs = jobs::load_jobs(&args.ports)?;
    let source_ports = jobs::source_ports(&jobs);
    info!("prober.event=jobs_loaded jobs={} source_ports={}", jobs.len(), source_ports.len());

    let pool = Arc::new(UdpSenderPool::bind(args.source_addr, &source_ports)?);

    let template = ProbeTemplate {
        initiation,
        filler,
        initiation_delay: Duration::from_micros(args.initiation_delay_us),
        filler_delay: Duration::from_micros(args.filler_delay_us),
        filler_count: args.filler_count,
    };
    let dispatcher = ProbeDispatcher::new(args.source_addr, args.target_addr, template, args.workers, pool);

    let summary = dispatcher.run(jobs).await?;
    info!("prober.event=done jobs={} datagrams={}", summary.jobs, summary.datagrams_sent);
    Ok(())
}
