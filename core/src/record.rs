use crate::key::FlowKey;

/// How a pending flow reached its terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// A confirmation datagram arrived while the flow was pending.
    Confirmed,
    /// The expiry sweep found the flow past its deadline.
    Expired,
    /// The record was still pending at shutdown and was flushed as-is.
    Flushed,
}

impl Resolution {
    pub const ALL: [Resolution; 3] = [Resolution::Confirmed, Resolution::Expired, Resolution::Flushed];

    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::Confirmed => "confirmed",
            Resolution::Expired => "expired",
            Resolution::Flushed => "flushed",
        }
    }

    pub fn index(&self) -> usize {
        match self {
            Resolution::Confirmed => 0,
            Resolution::Expired => 1,
            Resolution::Flushed => 2,
        }
    }
}

/// Live ledger entry for an unresolved flow. `censored` starts true and is
/// only ever flipped to false by an explicit confirmation.
#[derive(Debug, Clone)]
pub struct PendingRecord {
    pub key: FlowKey,
    pub server_name: String,
    pub first_seen_micros: u64,
    pub censored: bool,
}

impl PendingRecord {
    pub fn new(key: FlowKey, server_name: String, first_seen_micros: u64) -> Self {
        Self { key, server_name, first_seen_micros, censored: true }
    }

    /// Consume the pending record into its terminal form. A confirmation
    /// clears the censored flag, an expiry asserts it, a flush keeps
    /// whatever was held.
    pub fn resolve(self, resolution: Resolution) -> ResolvedRecord {
        let censored = match resolution {
            Resolution::Confirmed => false,
            Resolution::Expired => true,
            Resolution::Flushed => self.censored,
        };
        ResolvedRecord {
            key: self.key,
            server_name: self.server_name,
            timestamp_micros: self.first_seen_micros,
            censored,
            resolution,
        }
    }
}

/// Immutable resolution of one flow, consumed by the reporter exactly once.
#[derive(Debug, Clone)]
pub struct ResolvedRecord {
    pub key: FlowKey,
    pub server_name: String,
    pub timestamp_micros: u64,
    pub censored: bool,
    pub resolution: Resolution,
}
