//! Cross-cutting record-layer properties: sequencing, chunking, resume
//! semantics, corking, and the upward control-flow signals.
//!
//! Run: cargo test -p cuirass-harness --test properties_test

use cuirass_harness::pipe::{StreamEnd, stream_pair};
use cuirass_harness::{arm_tls13, loopback_config, tls12_pair, tls13_pair};
use cuirass_record::RecordError;
use cuirass_record::config::Role;
use cuirass_record::session::Session;
use cuirass_record::transport::{Transport, TransportError};
use cuirass_record::wire::{ProtocolVersion, alert, handshake};
use rand::SeedableRng;
use rand::rngs::StdRng;

// ---------------------------------------------------------------------------
// Sequencing and framing
// ---------------------------------------------------------------------------

#[test]
fn sequence_numbers_increase_per_record() {
    let (mut client, mut server) = tls13_pair(0x1301);
    for _ in 0..32 {
        client.send(b"tick").unwrap();
    }
    let mut last = None;
    let mut buf = [0u8; 4];
    for _ in 0..32 {
        let (n, seq) = server.recv_seq(&mut buf).unwrap();
        assert_eq!(n, 4);
        if let Some(prev) = last {
            assert!(seq > prev, "sequence must be strictly increasing");
        }
        last = Some(seq);
    }
}

#[test]
fn oversize_tls_send_is_chunked() {
    let (mut client, mut server) = tls13_pair(0x1301);
    let big = vec![0xabu8; 20000];
    // TLS truncates to one record's worth; the caller loops.
    let n = client.send(&big).unwrap();
    assert_eq!(n, 16384);
    let n2 = client.send(&big[n..]).unwrap();
    assert_eq!(n2, 20000 - 16384);

    let mut out = Vec::new();
    let mut buf = vec![0u8; 1 << 15];
    while out.len() < 20000 {
        let n = server.recv(&mut buf).unwrap();
        out.extend_from_slice(&buf[..n]);
    }
    assert_eq!(out, big);
}

#[test]
fn recv_packet_preserves_record_boundaries() {
    let (mut client, mut server) = tls12_pair(0xc02f);
    client.send(b"first record").unwrap();
    client.send(b"second").unwrap();

    let p1 = server.recv_packet().unwrap().unwrap();
    let p2 = server.recv_packet().unwrap().unwrap();
    assert_eq!(p1.data, b"first record");
    assert_eq!(p2.data, b"second");
    assert!(p2.sequence > p1.sequence);
}

#[test]
fn check_pending_counts_buffered_bytes() {
    let (mut client, mut server) = tls13_pair(0x1301);
    client.send(b"abcdef").unwrap();
    assert_eq!(server.check_pending(), 0);

    // Read two bytes; four stay buffered.
    let mut buf = [0u8; 2];
    server.recv(&mut buf).unwrap();
    assert_eq!(server.check_pending(), 4);
    let mut rest = [0u8; 8];
    assert_eq!(server.recv(&mut rest).unwrap(), 4);
    assert_eq!(server.check_pending(), 0);
}

// ---------------------------------------------------------------------------
// WouldBlock resume
// ---------------------------------------------------------------------------

/// Wraps a stream end and refuses the first `deny` pushes.
struct Balky {
    inner: StreamEnd,
    deny: usize,
}

impl Transport for Balky {
    fn push(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        if self.deny > 0 {
            self.deny -= 1;
            return Err(TransportError::WouldBlock);
        }
        self.inner.push(data)
    }
    fn pull(&mut self, out: &mut [u8]) -> Result<usize, TransportError> {
        self.inner.pull(out)
    }
    fn pull_timeout(&mut self, ms: u32) -> Result<bool, TransportError> {
        self.inner.pull_timeout(ms)
    }
}

#[test]
fn interrupted_send_resumes_without_duplication() {
    let (a, b) = stream_pair();
    let mut client = Session::new(
        loopback_config(Role::Client, ProtocolVersion::Tls13),
        Balky { inner: a, deny: 1 },
        StdRng::seed_from_u64(31),
    );
    let mut server = Session::new(
        loopback_config(Role::Server, ProtocolVersion::Tls13),
        b,
        StdRng::seed_from_u64(32),
    );
    arm_tls13(&mut client, 0x1301);
    arm_tls13(&mut server, 0x1301);

    // First attempt blocks after encryption; the ciphertext stays queued.
    assert_eq!(
        client.send(b"exactly once").unwrap_err(),
        RecordError::WouldBlock
    );
    // Retrying with the same arguments flushes the queued record.
    assert_eq!(client.send(b"exactly once").unwrap(), 12);

    let mut buf = [0u8; 32];
    assert_eq!(server.recv(&mut buf).unwrap(), 12);
    assert_eq!(&buf[..12], b"exactly once");
    // No duplicate record follows.
    assert_eq!(server.recv(&mut buf).unwrap_err(), RecordError::WouldBlock);
}

#[test]
fn discard_queued_drops_interrupted_ciphertext() {
    let (a, b) = stream_pair();
    let mut client = Session::new(
        loopback_config(Role::Client, ProtocolVersion::Tls13),
        Balky { inner: a, deny: 1 },
        StdRng::seed_from_u64(33),
    );
    let mut server = Session::new(
        loopback_config(Role::Server, ProtocolVersion::Tls13),
        b,
        StdRng::seed_from_u64(34),
    );
    arm_tls13(&mut client, 0x1301);
    arm_tls13(&mut server, 0x1301);

    assert_eq!(client.send(b"doomed").unwrap_err(), RecordError::WouldBlock);
    assert!(client.discard_queued() > 0);
    assert_eq!(client.discard_queued(), 0);

    client.send(b"kept").unwrap();
    let mut buf = [0u8; 16];
    assert_eq!(server.recv(&mut buf).unwrap(), 4);
    assert_eq!(&buf[..4], b"kept");
}

// ---------------------------------------------------------------------------
// Corking
// ---------------------------------------------------------------------------

#[test]
fn corked_sends_flush_together() {
    let (mut client, mut server) = tls13_pair(0x1301);

    client.cork();
    client.send(b"one ").unwrap();
    client.send(b"two ").unwrap();
    client.send(b"three").unwrap();
    assert_eq!(client.corked_pending(), 13);

    let flushed = client.uncork(true).unwrap();
    assert_eq!(flushed, 13);
    assert_eq!(client.corked_pending(), 0);

    let mut buf = [0u8; 32];
    let n = server.recv(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"one two three");
}

// ---------------------------------------------------------------------------
// Upward signals
// ---------------------------------------------------------------------------

#[test]
fn warning_alert_is_transient() {
    let (mut client, mut server) = tls12_pair(0xc02f);
    client
        .send_alert(alert::LEVEL_WARNING, alert::NO_RENEGOTIATION)
        .unwrap();
    client.send(b"still here").unwrap();

    let mut buf = [0u8; 32];
    assert_eq!(
        server.recv(&mut buf).unwrap_err(),
        RecordError::WarningAlert(alert::NO_RENEGOTIATION)
    );
    assert_eq!(server.last_alert(), alert::NO_RENEGOTIATION);
    // The session survives a warning.
    assert_eq!(server.recv(&mut buf).unwrap(), 10);
}

#[test]
fn fatal_alert_invalidates() {
    let (mut client, mut server) = tls12_pair(0xc02f);
    client
        .send_alert(alert::LEVEL_FATAL, alert::HANDSHAKE_FAILURE)
        .unwrap();

    let mut buf = [0u8; 8];
    assert_eq!(
        server.recv(&mut buf).unwrap_err(),
        RecordError::FatalAlert(alert::HANDSHAKE_FAILURE)
    );
    assert_eq!(server.recv(&mut buf).unwrap_err(), RecordError::InvalidSession);
}

#[test]
fn client_hello_after_establishment_signals_rehandshake() {
    let (mut client, mut server) = tls12_pair(0xc02f);
    // A minimal ClientHello-shaped handshake message.
    let hello = [handshake::CLIENT_HELLO, 0, 0, 2, 3, 3];
    client
        .send_handshake_message(handshake::CLIENT_HELLO, &hello)
        .unwrap();

    let mut buf = [0u8; 8];
    assert_eq!(server.recv(&mut buf).unwrap_err(), RecordError::Rehandshake);
    // The hello is queued for the handshake layer to pick up.
    assert!(server.take_handshake_message().is_some());
    // And the session remains usable while policy is decided.
    client.send(b"app").unwrap();
    assert_eq!(server.recv(&mut buf).unwrap(), 3);
}

#[test]
fn heartbeat_routed_to_handler_queue() {
    let (mut client, mut server) = tls13_pair(0x1303);
    client.send_heartbeat(&[1, 0, 4, 0xde, 0xad, 0xbe, 0xef]).unwrap();
    client.send(b"data").unwrap();

    let mut buf = [0u8; 8];
    assert_eq!(server.recv(&mut buf).unwrap(), 4);
    assert_eq!(
        server.take_heartbeat().unwrap(),
        vec![1, 0, 4, 0xde, 0xad, 0xbe, 0xef]
    );
}

#[test]
fn keylog_callback_sees_traffic_secrets() {
    use std::sync::Arc;
    use std::sync::Mutex;

    let (a, _b) = stream_pair();
    let mut client = Session::new(
        loopback_config(Role::Client, ProtocolVersion::Tls13),
        a,
        StdRng::seed_from_u64(35),
    );
    let lines: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = lines.clone();
    client.set_keylog(Box::new(move |label, secret| {
        sink.lock().unwrap().push(format!("{label} {}", secret.len()));
    }));
    arm_tls13(&mut client, 0x1301);

    let got = lines.lock().unwrap().clone();
    assert_eq!(
        got,
        vec![
            "CLIENT_TRAFFIC_SECRET_0 32".to_string(),
            "SERVER_TRAFFIC_SECRET_0 32".to_string()
        ]
    );
}
