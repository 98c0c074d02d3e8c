use std::io::{self, Write};

use chrono::{DateTime, SecondsFormat};
use parking_lot::Mutex;

use crate::record::ResolvedRecord;

/// Serializes resolved records to the output stream, one CSV line each:
/// timestamp, source address, destination address, source port, destination
/// port, server name, censored flag. No header; flushed per line so
/// downstream consumers see resolutions as they commit. Line order is
/// commit order; nothing more is promised across flows.
pub struct Reporter {
    out: Mutex<Box<dyn Write + Send>>,
}

impl Reporter {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self { out: Mutex::new(out) }
    }

    pub fn stdout() -> Self {
        Self::new(Box::new(io::stdout()))
    }

    pub fn emit(&self, record: &ResolvedRecord) -> io::Result<()> {
        let line = format_record(record);
        let mut out = self.out.lock();
        out.write_all(line.as_bytes())?;
        out.flush()
    }
}

pub fn format_record(record: &ResolvedRecord) -> String {
    format!(
        "{},{},{},{},{},{},{}\n",
        rfc3339_micros(record.timestamp_micros),
        record.key.src_addr,
        record.key.dst_addr,
        record.key.src_port,
        record.key.dst_port,
        record.server_name,
        record.censored,
    )
}

fn rfc3339_micros(micros: u64) -> String {
    DateTime::from_timestamp_micros(micros as i64)
        .map(|ts| ts.to_rfc3339_opts(SecondsFormat::Micros, true))
        .unwrap_or_else(|| micros.to_string())
}
