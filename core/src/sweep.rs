use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, warn};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::clock::MeasurementClock;
use crate::ledger::FlowLedger;
use crate::metrics::ObserverMetrics;
use crate::record::Resolution;
use crate::report::Reporter;

/// Periodic expiry sweep over the ledger. Individual events never expire
/// records; only this task does, reading the mode-dependent clock and
/// emitting each timed-out flow as censored.
pub struct Sweeper {
    ledger: Arc<FlowLedger>,
    clock: Arc<MeasurementClock>,
    reporter: Arc<Reporter>,
    metrics: Arc<ObserverMetrics>,
    timeout: Duration,
    interval: Duration,
}

impl Sweeper {
    pub fn new(
        ledger: Arc<FlowLedger>,
        clock: Arc<MeasurementClock>,
        reporter: Arc<Reporter>,
        metrics: Arc<ObserverMetrics>,
        timeout: Duration,
        interval: Duration,
    ) -> Self {
        Self { ledger, clock, reporter, metrics, timeout, interval }
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => self.pass(),
            }
        }
        debug!("sweep.event=stopped");
    }

    fn pass(&self) {
        let now = self.clock.now_micros();
        let expired = self.ledger.sweep_expired(now, self.timeout);
        for record in &expired {
            self.metrics.record_resolution(Resolution::Expired);
            if let Err(err) = self.reporter.emit(record) {
                error!("sweep.event=emit_failed key={} reason={err}", record.key);
            }
        }
        if !expired.is_empty() {
            debug!("sweep.event=pass expired={} pending={}", expired.len(), self.ledger.pending_len());
        }
    }
}

/// Shutdown flush: drain every still-pending record through the reporter.
/// Distinct from a sweep expiry; the records keep their held censored flag
/// and are counted as flushed.
pub fn flush_pending(ledger: &FlowLedger, reporter: &Reporter, metrics: &ObserverMetrics) {
    let drained = ledger.drain_all();
    if drained.is_empty() {
        return;
    }
    warn!("flush.event=drain pending={}", drained.len());
    for record in &drained {
        metrics.record_resolution(Resolution::Flushed);
        if let Err(err) = reporter.emit(record) {
            error!("flush.event=emit_failed key={} reason={err}", record.key);
        }
    }
}
