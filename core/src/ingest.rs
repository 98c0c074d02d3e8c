use std::sync::Arc;

use log::{error, trace};

use crate::classify::{Classifier, ObservedDatagram, Verdict};
use crate::clock::MeasurementClock;
use crate::ledger::FlowLedger;
use crate::metrics::ObserverMetrics;
use crate::record::Resolution;
use crate::report::Reporter;

/// Per-datagram ingestion path: advance the clock watermark, classify, and
/// apply the verdict to the ledger. Safe for concurrent use by all
/// ingestion workers; the ledger's shard locks are the only contended
/// state.
pub struct IngestPipeline {
    classifier: Classifier,
    ledger: Arc<FlowLedger>,
    clock: Arc<MeasurementClock>,
    reporter: Arc<Reporter>,
    metrics: Arc<ObserverMetrics>,
}

impl IngestPipeline {
    pub fn new(
        classifier: Classifier,
        ledger: Arc<FlowLedger>,
        clock: Arc<MeasurementClock>,
        reporter: Arc<Reporter>,
        metrics: Arc<ObserverMetrics>,
    ) -> Self {
        Self { classifier, ledger, clock, reporter, metrics }
    }

    pub fn ledger(&self) -> &Arc<FlowLedger> {
        &self.ledger
    }

    pub fn process(&self, datagram: &ObservedDatagram) {
        self.metrics.record_datagram();
        // Every observed datagram feeds the watermark, including ones the
        // classifier will ignore.
        self.clock.observe(datagram.ts_micros);

        let verdict = self.classifier.classify(datagram);
        self.metrics.record_verdict(&verdict);
        match verdict {
            Verdict::Confirmation(key) => {
                // A confirmation with nothing pending is common: every
                // filler after the first confirmation of a flow lands here.
                if let Some(record) = self.ledger.resolve_confirmed(&key) {
                    self.metrics.record_resolution(Resolution::Confirmed);
                    if let Err(err) = self.reporter.emit(&record) {
                        error!("ingest.event=emit_failed key={key} reason={err}");
                    }
                }
            }
            Verdict::Initiation { key, server_name } => {
                let new = self.ledger.record_initiation(key, server_name, datagram.ts_micros);
                trace!("ingest.event=initiation key={key} new={new}");
            }
            Verdict::Ignore => {
                trace!("ingest.event=ignored key={}", datagram.key);
            }
        }
    }
}
