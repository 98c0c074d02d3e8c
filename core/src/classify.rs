use std::sync::Arc;

use bytes::Bytes;

use crate::key::FlowKey;

/// One decoded inbound datagram: addressing, opaque payload and the capture
/// timestamp. Link/IP/UDP framing is already stripped by the packet I/O
/// layer.
#[derive(Debug, Clone)]
pub struct ObservedDatagram {
    pub key: FlowKey,
    pub payload: Bytes,
    pub ts_micros: u64,
}

/// Parses the opaque handshake blob carried by an initiation datagram and
/// recovers the negotiated server name. Implementations live outside the
/// engine; any parse failure is reported as None and the datagram is
/// ignored.
pub trait HandshakeDecoder: Send + Sync {
    fn server_name(&self, payload: &[u8]) -> Option<String>;
}

/// The "this path is working" test over a confirmation payload.
///
/// `MaxPayloadLen` is a conservative placeholder (a short datagram counts
/// as confirmation); `MarkerPrefix` is the exact-match rule it stands in
/// for.
/// Which rule runs is configuration, never a hardcoded choice, since it
/// directly decides censored-vs-not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmRule {
    MaxPayloadLen(usize),
    MarkerPrefix(Vec<u8>),
}

impl ConfirmRule {
    pub fn matches(&self, payload: &[u8]) -> bool {
        match self {
            ConfirmRule::MaxPayloadLen(limit) => payload.len() < *limit,
            ConfirmRule::MarkerPrefix(marker) => !marker.is_empty() && payload.starts_with(marker),
        }
    }
}

/// Exactly one of these per inbound datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Confirmation(FlowKey),
    Initiation { key: FlowKey, server_name: String },
    Ignore,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Confirmation(_) => "confirmation",
            Verdict::Initiation { .. } => "initiation",
            Verdict::Ignore => "ignore",
        }
    }
}

/// Stateless per-datagram classifier. The confirmation rule is checked
/// first; everything else is handed to the handshake decoder, and whatever
/// fails to decode (or decodes to an empty name) is ignored rather than
/// treated as an error.
pub struct Classifier {
    rule: ConfirmRule,
    decoder: Arc<dyn HandshakeDecoder>,
}

impl Classifier {
    pub fn new(rule: ConfirmRule, decoder: Arc<dyn HandshakeDecoder>) -> Self {
        Self { rule, decoder }
    }

    pub fn rule(&self) -> &ConfirmRule {
        &self.rule
    }

    pub fn classify(&self, datagram: &ObservedDatagram) -> Verdict {
        if self.rule.matches(&datagram.payload) {
            return Verdict::Confirmation(datagram.key);
        }
        match self.decoder.server_name(&datagram.payload) {
            Some(name) if !name.is_empty() => Verdict::Initiation { key: datagram.key, server_name: name },
            _ => Verdict::Ignore,
        }
    }
}
