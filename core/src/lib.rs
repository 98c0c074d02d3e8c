pub mod classify;
pub mod clock;
pub mod dispatch;
pub mod ingest;
pub mod key;
pub mod ledger;
pub mod metrics;
pub mod pool;
pub mod record;
pub mod report;
pub mod sweep;

pub use classify::{Classifier, ConfirmRule, HandshakeDecoder, ObservedDatagram, Verdict};
pub use clock::{wall_micros, ClockMode, MeasurementClock, TimeWatermark};
pub use dispatch::{
    DatagramSender, DispatchError, DispatchSummary, FlowJob, ProbeDispatcher, ProbeTemplate, SendError,
};
pub use ingest::IngestPipeline;
pub use key::FlowKey;
pub use ledger::FlowLedger;
pub use metrics::ObserverMetrics;
pub use pool::WorkerPool;
pub use record::{PendingRecord, Resolution, ResolvedRecord};
pub use report::{format_record, Reporter};
pub use sweep::{flush_pending, Sweeper};
