//! End-to-end resolution semantics over the classifier, ledger, sweeper and
//! reporter, driven with a trace clock so time is fully controlled.

use std::io::{self, Write};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use pathwatch_core::{
    flush_pending, Classifier, ClockMode, ConfirmRule, FlowKey, FlowLedger, HandshakeDecoder, IngestPipeline,
    MeasurementClock, ObservedDatagram, ObserverMetrics, Reporter, Resolution, Sweeper,
};
use tokio::sync::watch;
use tokio::time::sleep;

/// Test handshake format: `init <name>`.
struct TestDecoder;

impl HandshakeDecoder for TestDecoder {
    fn server_name(&self, payload: &[u8]) -> Option<String> {
        let rest = payload.strip_prefix(b"init ")?;
        String::from_utf8(rest.to_vec()).ok()
    }
}

#[derive(Clone, Default)]
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl SharedBuf {
    fn lines(&self) -> Vec<String> {
        String::from_utf8(self.0.lock().clone()).unwrap().lines().map(str::to_owned).collect()
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

struct Harness {
    pipeline: IngestPipeline,
    ledger: Arc<FlowLedger>,
    clock: Arc<MeasurementClock>,
    reporter: Arc<Reporter>,
    metrics: Arc<ObserverMetrics>,
    out: SharedBuf,
}

impl Harness {
    fn new() -> Self {
        let ledger = Arc::new(FlowLedger::new(8));
        let clock = Arc::new(MeasurementClock::new(ClockMode::Trace));
        let metrics = Arc::new(ObserverMetrics::new());
        let out = SharedBuf::default();
        let reporter = Arc::new(Reporter::new(Box::new(out.clone())));
        // Threshold below the shortest `init <name>` payload, so only the
        // bare confirmation datagrams match the length rule.
        let classifier = Classifier::new(ConfirmRule::MaxPayloadLen(4), Arc::new(TestDecoder));
        let pipeline = IngestPipeline::new(
            classifier,
            Arc::clone(&ledger),
            Arc::clone(&clock),
            Arc::clone(&reporter),
            Arc::clone(&metrics),
        );
        Self { pipeline, ledger, clock, reporter, metrics, out }
    }

    fn initiation(&self, src_port: u16, name: &str, ts_micros: u64) {
        self.pipeline.process(&datagram(src_port, format!("init {name}").as_bytes(), ts_micros));
    }

    fn confirmation(&self, src_port: u16, ts_micros: u64) {
        self.pipeline.process(&datagram(src_port, b"ok", ts_micros));
    }
}

fn datagram(src_port: u16, payload: &[u8], ts_micros: u64) -> ObservedDatagram {
    ObservedDatagram {
        key: FlowKey::new(Ipv4Addr::new(203, 0, 113, 5), Ipv4Addr::new(198, 51, 100, 7), src_port, 443),
        payload: Bytes::copy_from_slice(payload),
        ts_micros,
    }
}

const SECOND: u64 = 1_000_000;

#[tokio::test]
async fn confirmed_and_expired_flows_resolve_exactly_once() {
    let h = Harness::new();

    // Key A: created at t=0, confirmed at t=1. Key B: created at t=0, never
    // confirmed. Timeout is 2 time units.
    h.initiation(1000, "a.example", 0);
    h.initiation(2000, "b.example", 0);
    h.confirmation(1000, SECOND);

    let lines = h.out.lines();
    assert_eq!(lines.len(), 1, "confirmation resolves immediately");
    assert!(lines[0].contains(",a.example,false"));
    assert_eq!(h.ledger.pending_len(), 1);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = Sweeper::new(
        Arc::clone(&h.ledger),
        Arc::clone(&h.clock),
        Arc::clone(&h.reporter),
        Arc::clone(&h.metrics),
        Duration::from_secs(2),
        Duration::from_millis(10),
    )
    .spawn(shutdown_rx);

    // Advance trace time just past t=2; the next sweep pass expires B.
    h.clock.observe(2 * SECOND + 1);
    sleep(Duration::from_millis(100)).await;

    let lines = h.out.lines();
    assert_eq!(lines.len(), 2);
    assert!(lines[1].contains(",b.example,true"));
    assert!(h.ledger.is_empty());

    shutdown_tx.send(true).unwrap();
    sweeper.await.unwrap();

    assert_eq!(h.metrics.resolved(Resolution::Confirmed), 1);
    assert_eq!(h.metrics.resolved(Resolution::Expired), 1);
}

#[tokio::test]
async fn repeat_initiation_keeps_latest_name_through_expiry() {
    let h = Harness::new();

    // Two initiations for key C at t=0 ("x") and t=0.5 ("y"), no
    // confirmation: the expired record must carry "y".
    h.initiation(3000, "x", 0);
    h.initiation(3000, "y", SECOND / 2);
    assert_eq!(h.ledger.pending_len(), 1, "repeat initiation must not grow the ledger");
    assert!(h.out.lines().is_empty(), "no intermediate output");

    h.clock.observe(3 * SECOND);
    let expired = h.ledger.sweep_expired(h.clock.now_micros(), Duration::from_secs(2));
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].server_name, "y");
    assert_eq!(expired[0].timestamp_micros, SECOND / 2);
}

#[tokio::test]
async fn interrupt_flushes_pending_with_default_flag() {
    let h = Harness::new();

    // Key D pending since t=0 with a 10-unit timeout; an interrupt at t=1
    // flushes it censored even though the timeout never elapsed.
    h.initiation(4000, "d.example", 0);
    h.clock.observe(SECOND);
    assert!(h.ledger.sweep_expired(h.clock.now_micros(), Duration::from_secs(10)).is_empty());

    flush_pending(&h.ledger, &h.reporter, &h.metrics);
    let lines = h.out.lines();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].contains(",d.example,true"));
    assert_eq!(h.metrics.resolved(Resolution::Flushed), 1);
    assert!(h.ledger.is_empty());
}

#[tokio::test]
async fn duplicate_confirmations_emit_one_record() {
    let h = Harness::new();
    h.initiation(5000, "dup.example", 0);
    for step in 1..=5u64 {
        h.confirmation(5000, step * 1_000);
    }
    assert_eq!(h.out.lines().len(), 1);
    assert_eq!(h.metrics.resolved(Resolution::Confirmed), 1);
}

#[tokio::test]
async fn ledger_size_tracks_distinct_unresolved_keys() {
    let h = Harness::new();
    for port in 0..10u16 {
        h.initiation(6000 + port, "bulk.example", 0);
        h.initiation(6000 + port, "bulk.example", 1); // retransmission
    }
    assert_eq!(h.ledger.pending_len(), 10);

    for port in 0..4u16 {
        h.confirmation(6000 + port, 2);
    }
    assert_eq!(h.ledger.pending_len(), 6, "each resolution removes exactly one key");
    assert_eq!(h.out.lines().len(), 4);
}
