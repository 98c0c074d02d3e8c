use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Lock-free high-water mark over observed capture timestamps. `observe`
/// only ever advances the value; a stale or reordered timestamp leaves it
/// untouched. Readers never contend with the ledger lock.
#[derive(Debug, Default)]
pub struct TimeWatermark {
    micros: AtomicU64,
}

impl TimeWatermark {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the watermark to `ts_micros` if it is ahead of the current
    /// value.
    pub fn observe(&self, ts_micros: u64) {
        loop {
            let current = self.micros.load(Ordering::Relaxed);
            if ts_micros <= current {
                return;
            }
            if self.micros.compare_exchange(current, ts_micros, Ordering::SeqCst, Ordering::Relaxed).is_ok() {
                return;
            }
        }
    }

    /// Latest observed timestamp, zero before the first observation.
    pub fn current(&self) -> u64 {
        self.micros.load(Ordering::Relaxed)
    }
}

/// Where "current time" comes from for expiry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockMode {
    /// Live capture: wall-clock time.
    Wall,
    /// Trace replay: trace time may run far ahead of or behind wall-clock
    /// time, so the watermark of observed datagram timestamps is
    /// authoritative.
    Trace,
}

/// Mode-dependent time source for the ledger sweep. Every observed datagram
/// feeds the watermark regardless of mode; only `now_micros` differs.
#[derive(Debug)]
pub struct MeasurementClock {
    mode: ClockMode,
    watermark: TimeWatermark,
}

impl MeasurementClock {
    pub fn new(mode: ClockMode) -> Self {
        Self { mode, watermark: TimeWatermark::new() }
    }

    pub fn mode(&self) -> ClockMode {
        self.mode
    }

    pub fn observe(&self, ts_micros: u64) {
        self.watermark.observe(ts_micros);
    }

    pub fn now_micros(&self) -> u64 {
        match self.mode {
            ClockMode::Wall => wall_micros(),
            ClockMode::Trace => self.watermark.current(),
        }
    }

    pub fn watermark_micros(&self) -> u64 {
        self.watermark.current()
    }
}

/// Wall-clock microseconds since the Unix epoch.
pub fn wall_micros() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_micros() as u64).unwrap_or(0)
}
