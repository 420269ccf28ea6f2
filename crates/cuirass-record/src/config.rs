//! Session role and tunables.

use crate::wire::{DEFAULT_MAX_RECORD_SIZE, ProtocolVersion};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// Record-layer configuration. Everything here is fixed at session creation
/// except the timeouts and MTU, which have setters on the session.
#[derive(Debug, Clone)]
pub struct Config {
    pub role: Role,
    pub version: ProtocolVersion,

    /// Largest plaintext fragment we will produce.
    pub max_record_send_size: usize,
    /// Largest decrypted record we will accept.
    pub max_record_recv_size: usize,
    /// 0-RTT budget, counted on both the presend and receive sides.
    pub max_early_data_size: usize,

    /// Force the TLS 1.3 inner-type scan to walk the whole buffer.
    pub safe_padding: bool,
    /// Schedule an automatic KeyUpdate after 2^24 records on one key.
    pub auto_rekey: bool,
    /// DTLS anti-replay window; disabling accepts duplicates.
    pub replay_protection: bool,
    /// Never sleep in the transport; surface `WouldBlock` instead.
    pub nonblock: bool,

    /// DTLS path MTU (link layer budget for one datagram).
    pub mtu: usize,
    /// Initial DTLS retransmission timeout; doubles per retransmit.
    pub retrans_timeout_ms: u32,
    /// DTLS handshake abort envelope.
    pub total_timeout_ms: u32,
    /// Per-call receive deadline; 0 = none, `INDEFINITE_TIMEOUT` = forever.
    pub record_timeout_ms: u32,
}

/// Default DTLS MTU, conservative for tunneled paths.
pub const DEFAULT_MTU: usize = 1200;

/// RFC 6347 recommends 1 s initial retransmit, 60 s give-up.
pub const DEFAULT_RETRANS_TIMEOUT_MS: u32 = 1000;
pub const DEFAULT_TOTAL_TIMEOUT_MS: u32 = 60000;

/// Retransmission timeout cap for the exponential backoff.
pub const MAX_DTLS_TIMEOUT_MS: u32 = 60000;

impl Config {
    pub fn new(role: Role, version: ProtocolVersion) -> Self {
        Config {
            role,
            version,
            max_record_send_size: DEFAULT_MAX_RECORD_SIZE,
            max_record_recv_size: DEFAULT_MAX_RECORD_SIZE,
            max_early_data_size: 16384,
            safe_padding: true,
            auto_rekey: true,
            replay_protection: true,
            nonblock: false,
            mtu: DEFAULT_MTU,
            retrans_timeout_ms: DEFAULT_RETRANS_TIMEOUT_MS,
            total_timeout_ms: DEFAULT_TOTAL_TIMEOUT_MS,
            record_timeout_ms: 0,
        }
    }
}
