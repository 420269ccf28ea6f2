//! DTLS flight buffering, fragmentation, and retransmission timers.
//!
//! Outbound handshake messages are buffered whole; transmission chops them
//! into MTU-sized fragments. A flight is implicitly acknowledged by the
//! arrival of the peer's next flight, except the flight containing Finished,
//! which the peer cannot acknowledge and which is retransmitted on demand
//! until the total-timeout envelope closes.

use std::collections::VecDeque;
use std::time::Instant;

use crate::config::MAX_DTLS_TIMEOUT_MS;
use crate::wire::{ContentType, DTLS_HANDSHAKE_HEADER_SIZE, FragmentHeader, handshake};

/// One whole handshake (or CCS) message awaiting acknowledgement.
#[derive(Debug, Clone)]
pub struct FlightMessage {
    pub ctype: ContentType,
    pub htype: u8,
    pub handshake_seq: u16,
    /// Epoch this message must be sent under; pins the epoch's refcount
    /// while buffered.
    pub epoch: u16,
    /// Message body, without the fragment header.
    pub data: Vec<u8>,
}

/// Flight and timer state for one session.
#[derive(Debug)]
pub struct FlightState {
    pub buffer: VecDeque<FlightMessage>,
    /// The current flight has been transmitted at least once.
    pub flight_init: bool,
    /// This flight ends with Finished: no implicit ACK will come.
    pub last_flight: bool,
    /// The last-flight retransmission timer is armed.
    pub async_timer: bool,
    /// Current backoff window, doubled per retransmission.
    pub actual_retrans_timeout_ms: u32,
    pub last_retransmit: Option<Instant>,
    pub handshake_start: Option<Instant>,
}

impl FlightState {
    pub fn new(retrans_timeout_ms: u32) -> Self {
        FlightState {
            buffer: VecDeque::new(),
            flight_init: false,
            last_flight: false,
            async_timer: false,
            actual_retrans_timeout_ms: retrans_timeout_ms,
            last_retransmit: None,
            handshake_start: None,
        }
    }

    /// Exponential backoff, bounded by the timeout cap.
    pub fn update_timer(&mut self) {
        self.actual_retrans_timeout_ms =
            (self.actual_retrans_timeout_ms * 2) % MAX_DTLS_TIMEOUT_MS;
    }

    pub fn reset_timer(&mut self, base_ms: u32) {
        self.actual_retrans_timeout_ms = base_ms;
    }

    /// Milliseconds since the last (re)transmission, or `None` before the
    /// first.
    pub fn since_last_transmit(&self) -> Option<u128> {
        self.last_retransmit.map(|t| t.elapsed().as_millis())
    }

    /// Milliseconds since the handshake began.
    pub fn handshake_elapsed(&self) -> u128 {
        self.handshake_start
            .map(|t| t.elapsed().as_millis())
            .unwrap_or(0)
    }

    /// Queue a message; the first queued message of a flight stamps the
    /// handshake start time if unset.
    pub fn enqueue(&mut self, msg: FlightMessage) {
        if self.handshake_start.is_none() {
            self.handshake_start = Some(Instant::now());
        }
        self.buffer.push_back(msg);
    }

    /// Flight acknowledged (implicitly or handshake done): drop the buffer
    /// and return the epochs it was pinning.
    pub fn clear(&mut self) -> Vec<u16> {
        let epochs = self.buffer.iter().map(|m| m.epoch).collect();
        self.buffer.clear();
        self.flight_init = false;
        epochs
    }
}

/// Split one handshake message into fragment payloads that fit `mtu`
/// (the per-record payload budget, fragment header included).
///
/// Zero-length messages produce a single zero-length fragment.
pub fn fragment_message(msg: &FlightMessage, mtu: usize) -> Vec<Vec<u8>> {
    let budget = mtu.saturating_sub(DTLS_HANDSHAKE_HEADER_SIZE).max(1);
    let total = msg.data.len();
    let mut out = Vec::new();

    let mut offset = 0;
    loop {
        let frag_len = budget.min(total - offset);
        // A zero-length trailing fragment only exists for zero-length
        // messages.
        if frag_len == 0 && total > 0 {
            break;
        }

        let mut frag = vec![0u8; DTLS_HANDSHAKE_HEADER_SIZE + frag_len];
        FragmentHeader {
            msg_type: msg.htype,
            total_length: total as u32,
            msg_seq: msg.handshake_seq,
            frag_offset: offset as u32,
            frag_length: frag_len as u32,
        }
        .encode(&mut frag[..DTLS_HANDSHAKE_HEADER_SIZE]);
        frag[DTLS_HANDSHAKE_HEADER_SIZE..].copy_from_slice(&msg.data[offset..offset + frag_len]);
        out.push(frag);

        offset += frag_len;
        if offset >= total {
            break;
        }
    }
    out
}

/// Whether a flight ending in `htype` is the handshake's last flight.
pub fn is_last_flight_type(htype: u8) -> bool {
    htype == handshake::FINISHED
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(len: usize) -> FlightMessage {
        FlightMessage {
            ctype: ContentType::Handshake,
            htype: 1,
            handshake_seq: 2,
            epoch: 0,
            data: vec![0xaa; len],
        }
    }

    #[test]
    fn test_single_fragment_when_it_fits() {
        let frags = fragment_message(&msg(100), 500);
        assert_eq!(frags.len(), 1);
        let fh = FragmentHeader::parse(&frags[0]).unwrap();
        assert_eq!(fh.total_length, 100);
        assert_eq!(fh.frag_offset, 0);
        assert_eq!(fh.frag_length, 100);
    }

    #[test]
    fn test_fragments_cover_message_exactly_once() {
        let m = msg(1000);
        let frags = fragment_message(&m, 300);
        let mut reassembled = vec![0u8; 1000];
        let mut covered = 0;
        for f in &frags {
            let fh = FragmentHeader::parse(f).unwrap();
            assert_eq!(fh.msg_seq, 2);
            assert_eq!(fh.total_length, 1000);
            let (o, l) = (fh.frag_offset as usize, fh.frag_length as usize);
            reassembled[o..o + l].copy_from_slice(&f[DTLS_HANDSHAKE_HEADER_SIZE..]);
            covered += l;
        }
        assert_eq!(covered, 1000);
        assert_eq!(reassembled, m.data);
    }

    #[test]
    fn test_zero_length_message_yields_one_fragment() {
        let frags = fragment_message(&msg(0), 300);
        assert_eq!(frags.len(), 1);
        let fh = FragmentHeader::parse(&frags[0]).unwrap();
        assert_eq!(fh.total_length, 0);
        assert_eq!(fh.frag_length, 0);
    }

    #[test]
    fn test_backoff_doubles_and_wraps_at_cap() {
        let mut fs = FlightState::new(1000);
        fs.update_timer();
        assert_eq!(fs.actual_retrans_timeout_ms, 2000);
        fs.update_timer();
        assert_eq!(fs.actual_retrans_timeout_ms, 4000);
        fs.reset_timer(1000);
        assert_eq!(fs.actual_retrans_timeout_ms, 1000);
    }

    #[test]
    fn test_clear_returns_pinned_epochs() {
        let mut fs = FlightState::new(1000);
        fs.enqueue(FlightMessage { epoch: 1, ..msg(4) });
        fs.enqueue(FlightMessage { epoch: 2, ..msg(4) });
        fs.flight_init = true;
        assert_eq!(fs.clear(), vec![1, 2]);
        assert!(!fs.flight_init);
        assert!(fs.buffer.is_empty());
    }

    #[test]
    fn test_last_flight_detection() {
        assert!(is_last_flight_type(handshake::FINISHED));
        assert!(!is_last_flight_type(handshake::CLIENT_HELLO));
    }
}
