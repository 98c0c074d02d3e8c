use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use log::{debug, info};
use thiserror::Error;

use crate::key::FlowKey;
use crate::pool::WorkerPool;

/// One probe job from the external job source: the port pair to probe. The
/// run's fixed addresses and payload templates supply the rest of the flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowJob {
    pub src_port: u16,
    pub dst_port: u16,
}

/// Payload bytes and pacing for every flow of a run.
#[derive(Debug, Clone)]
pub struct ProbeTemplate {
    /// Handshake-shaped blob sent first on each flow.
    pub initiation: Bytes,
    /// Opaque bytes repeated after the initiation.
    pub filler: Bytes,
    /// Pause between the initiation datagram and the first filler.
    pub initiation_delay: Duration,
    /// Pause after each filler datagram.
    pub filler_delay: Duration,
    /// Fillers per flow; each job sends `1 + filler_count` datagrams total.
    pub filler_count: u32,
}

#[derive(Debug, Error)]
pub enum SendError {
    #[error("no socket bound for source port {0}")]
    UnboundSourcePort(u16),
    #[error("transmit failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Raw datagram send primitive. Must be safe for concurrent use by all
/// dispatcher workers; header construction and checksums are its problem,
/// not the engine's. Production binds kernel UDP sockets, tests record.
pub trait DatagramSender: Send + Sync {
    fn send(&self, key: &FlowKey, payload: &[u8]) -> Result<(), SendError>;
}

/// Dispatch failures are configuration-or-environment defects, not
/// transient network conditions, so one failed transmit kills the run.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("probe transmit failed on flow {key}: {source}")]
    Send { key: FlowKey, source: SendError },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchSummary {
    pub jobs: u64,
    pub datagrams_sent: u64,
}

/// Bounded pool of workers pacing probe sequences across many flows at
/// once. Jobs stream through a queue sized to the worker count; within one
/// job the initiation datagram always precedes the fillers, and no ordering
/// holds across jobs.
pub struct ProbeDispatcher {
    src_addr: Ipv4Addr,
    dst_addr: Ipv4Addr,
    template: ProbeTemplate,
    workers: usize,
    sender: Arc<dyn DatagramSender>,
}

impl ProbeDispatcher {
    pub fn new(
        src_addr: Ipv4Addr,
        dst_addr: Ipv4Addr,
        template: ProbeTemplate,
        workers: usize,
        sender: Arc<dyn DatagramSender>,
    ) -> Self {
        Self { src_addr, dst_addr, template, workers: workers.max(1), sender }
    }

    pub fn flow_key(&self, job: FlowJob) -> FlowKey {
        FlowKey::new(self.src_addr, self.dst_addr, job.src_port, job.dst_port)
    }

    /// Run every job to completion. The job list must already be validated;
    /// the first transmit failure aborts the run and is returned after all
    /// workers have stopped (the transport must not be torn down before the
    /// join completes).
    pub async fn run(&self, jobs: Vec<FlowJob>) -> Result<DispatchSummary, DispatchError> {
        let total_jobs = jobs.len() as u64;
        let sent = Arc::new(AtomicU64::new(0));
        info!("dispatch.event=run_start jobs={} workers={} fillers={}", total_jobs, self.workers, self.template.filler_count);

        let pool: WorkerPool<FlowJob, DispatchError> = {
            let src_addr = self.src_addr;
            let dst_addr = self.dst_addr;
            let template = self.template.clone();
            let sender = Arc::clone(&self.sender);
            let sent = Arc::clone(&sent);
            WorkerPool::start(self.workers, self.workers, move |job: FlowJob| {
                let template = template.clone();
                let sender = Arc::clone(&sender);
                let sent = Arc::clone(&sent);
                async move {
                    let key = FlowKey::new(src_addr, dst_addr, job.src_port, job.dst_port);
                    probe_flow(&key, &template, sender.as_ref(), &sent).await
                }
            })
        };

        for job in jobs {
            if !pool.submit(job).await {
                break;
            }
        }
        pool.join().await?;

        let summary = DispatchSummary { jobs: total_jobs, datagrams_sent: sent.load(Ordering::Relaxed) };
        info!("dispatch.event=run_done jobs={} datagrams={}", summary.jobs, summary.datagrams_sent);
        Ok(summary)
    }
}

async fn probe_flow(
    key: &FlowKey,
    template: &ProbeTemplate,
    sender: &dyn DatagramSender,
    sent: &AtomicU64,
) -> Result<(), DispatchError> {
    send_one(key, &template.initiation, sender, sent)?;
    if !template.initiation_delay.is_zero() {
        tokio::time::sleep(template.initiation_delay).await;
    }
    for _ in 0..template.filler_count {
        send_one(key, &template.filler, sender, sent)?;
        if !template.filler_delay.is_zero() {
            tokio::time::sleep(template.filler_delay).await;
        }
    }
    debug!("dispatch.event=flow_done key={key}");
    Ok(())
}

fn send_one(
    key: &FlowKey,
    payload: &[u8],
    sender: &dyn DatagramSender,
    sent: &AtomicU64,
) -> Result<(), DispatchError> {
    sender.send(key, payload).map_err(|source| DispatchError::Send { key: *key, source })?;
    sent.fetch_add(1, Ordering::Relaxed);
    Ok(())
}
