//! Capture/replay loops feeding the ingestion pool. The pcap layer owns
//! interface and file access; this module walks packets, hands frames to
//! the edge decoder and pushes decoded datagrams into the bounded channel.

use std::path::PathBuf;

use anyhow::{Context, Result};
use log::{info, warn};
use pathwatch_core::ObservedDatagram;
use pcap::{Activated, Capture, PacketHeader};
use tokio::sync::watch;

use crate::frame;

const LIVE_SNAPLEN: i32 = 262_144;
/// Read timeout so a quiet interface still lets the loop observe shutdown.
const LIVE_TIMEOUT_MS: i32 = 1_000;

#[derive(Debug, Clone)]
pub enum SourceSpec {
    Live(String),
    Files(Vec<PathBuf>),
    Stdin,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CaptureStats {
    pub frames: u64,
    pub decoded: u64,
}

pub fn run(
    source: SourceSpec,
    filter: &str,
    tx: async_channel::Sender<ObservedDatagram>,
    shutdown: watch::Receiver<bool>,
) -> Result<CaptureStats> {
    let mut stats = CaptureStats::default();
    match source {
        SourceSpec::Live(iface) => {
            // Live setup failures are fatal at startup: a missing interface
            // or rejected filter means the deployment is wrong.
            let mut cap = Capture::from_device(iface.as_str())
                .with_context(|| format!("unknown capture device {iface}"))?
                .promisc(true)
                .snaplen(LIVE_SNAPLEN)
                .timeout(LIVE_TIMEOUT_MS)
                .open()
                .with_context(|| format!("failed to open interface {iface}"))?;
            cap.filter(filter, true).with_context(|| format!("filter rejected: {filter:?}"))?;
            info!("capture.event=live_open iface={iface} filter={filter:?}");
            pump(&mut cap, &tx, &shutdown, &mut stats);
        }
        SourceSpec::Files(paths) => {
            for path in paths {
                if *shutdown.borrow() {
                    break;
                }
                // A bad trace is logged and skipped; the batch continues.
                let mut cap = match Capture::from_file(&path) {
                    Ok(cap) => cap,
                    Err(err) => {
                        warn!("capture.event=open_failed path={} reason={err}", path.display());
                        continue;
                    }
                };
                cap.filter(filter, true).with_context(|| format!("filter rejected: {filter:?}"))?;
                info!("capture.event=trace_open path={}", path.display());
                if !pump(&mut cap, &tx, &shutdown, &mut stats) {
                    break;
                }
            }
        }
        SourceSpec::Stdin => {
            #[cfg(unix)]
            {
                let mut cap = unsafe { Capture::from_raw_fd(0) }.context("failed to read capture from stdin")?;
                cap.filter(filter, true).with_context(|| format!("filter rejected: {filter:?}"))?;
                info!("capture.event=stdin_open");
                pump(&mut cap, &tx, &shutdown, &mut stats);
            }
            #[cfg(not(unix))]
            anyhow::bail!("stdin capture is only supported on unix");
        }
    }
    info!("capture.event=done frames={} decoded={}", stats.frames, stats.decoded);
    Ok(stats)
}

/// Drain one capture handle. Returns false when the run should stop (
/// shutdown signalled or the ingest channel closed), true when the source
/// is simply exhausted.
fn pump<T: Activated + ?Sized>(
    cap: &mut Capture<T>,
    tx: &async_channel::Sender<ObservedDatagram>,
    shutdown: &watch::Receiver<bool>,
    stats: &mut CaptureStats,
) -> bool {
    loop {
        if *shutdown.borrow() {
            return false;
        }
        match cap.next_packet() {
            Ok(packet) => {
                stats.frames += 1;
                if let Some(datagram) = frame::decode(packet.data, header_micros(packet.header)) {
                    stats.decoded += 1;
                    if tx.send_blocking(datagram).is_err() {
                        return false;
                    }
                }
            }
            Err(pcap::Error::TimeoutExpired) => continue,
            Err(pcap::Error::NoMorePackets) => return true,
            Err(err) => {
                warn!("capture.event=read_failed reason={err}");
                return true;
            }
        }
    }
}

fn header_micros(header: &PacketHeader) -> u64 {
    let secs = header.ts.tv_sec.max(0) as u64;
    let micros = header.ts.tv_usec.max(0) as u64;
    secs * 1_000_000 + micros
}
