//! DTLS behavior over the datagram pipe: anti-replay, discard accounting,
//! flight retransmission, fragmentation, and the cookie prestate.
//!
//! Run: cargo test -p cuirass-harness --test dtls_test

use std::thread::sleep;
use std::time::Duration;

use cuirass_harness::pipe::datagram_pair;
use cuirass_harness::{DatagramSession, dtls12_handshaking_pair, dtls12_pair, loopback_config};
use cuirass_record::RecordError;
use cuirass_record::config::Role;
use cuirass_record::dtls::cookie::CookiePrestate;
use cuirass_record::session::Session;
use cuirass_record::wire::{ContentType, FragmentHeader, ProtocolVersion, handshake};
use rand::SeedableRng;
use rand::rngs::StdRng;

fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// ---------------------------------------------------------------------------
// Anti-replay at the session level
// ---------------------------------------------------------------------------

#[test]
fn replayed_datagram_discarded_silently() {
    init_logs();
    let (a, b) = datagram_pair();
    let tap = a.clone();
    let mut client = Session::new(
        loopback_config(Role::Client, ProtocolVersion::Dtls12),
        a,
        StdRng::seed_from_u64(1),
    );
    let mut server = Session::new(
        loopback_config(Role::Server, ProtocolVersion::Dtls12),
        b,
        StdRng::seed_from_u64(2),
    );
    cuirass_harness::arm_tls12(&mut client, 0xc02f);
    cuirass_harness::arm_tls12(&mut server, 0xc02f);

    client.send(b"first").unwrap();
    let captured = tap.queued_to_peer().pop().expect("datagram queued");

    let mut buf = [0u8; 32];
    assert_eq!(server.recv(&mut buf).unwrap(), 5);
    assert_eq!(server.get_discarded(), 0);

    // Replay the very same datagram: authenticated, then rejected by the
    // window, silently.
    tap.replay_to_peer(captured.clone());
    assert_eq!(server.recv(&mut buf).unwrap_err(), RecordError::WouldBlock);
    assert_eq!(server.get_discarded(), 1);

    // Twice more for good measure.
    tap.replay_to_peer(captured);
    assert_eq!(server.recv(&mut buf).unwrap_err(), RecordError::WouldBlock);
    assert_eq!(server.get_discarded(), 2);

    // The session itself is unharmed.
    client.send(b"second").unwrap();
    assert_eq!(server.recv(&mut buf).unwrap(), 6);
}

#[test]
fn out_of_order_delivery_within_window() {
    let (a, b) = datagram_pair();
    let tap = a.clone();
    let mut client = Session::new(
        loopback_config(Role::Client, ProtocolVersion::Dtls12),
        a,
        StdRng::seed_from_u64(3),
    );
    let mut server = Session::new(
        loopback_config(Role::Server, ProtocolVersion::Dtls12),
        b,
        StdRng::seed_from_u64(4),
    );
    cuirass_harness::arm_tls12(&mut client, 0xc02f);
    cuirass_harness::arm_tls12(&mut server, 0xc02f);

    client.send(b"aa").unwrap();
    client.send(b"bb").unwrap();
    client.send(b"cc").unwrap();

    // Reorder: deliver cc, aa, bb.
    let queued = tap.queued_to_peer();
    tap.clear_to_peer();
    tap.replay_to_peer(queued[2].clone());
    tap.replay_to_peer(queued[0].clone());
    tap.replay_to_peer(queued[1].clone());

    let mut buf = [0u8; 8];
    let (n, seq) = server.recv_seq(&mut buf).unwrap();
    assert_eq!((n, &buf[..2]), (2, &b"cc"[..]));
    assert_eq!(seq & 0xffff_ffff_ffff, 2);
    let (_, seq) = server.recv_seq(&mut buf).unwrap();
    assert_eq!(seq & 0xffff_ffff_ffff, 0);
    let (_, seq) = server.recv_seq(&mut buf).unwrap();
    assert_eq!(seq & 0xffff_ffff_ffff, 1);

    // Each of them again is a replay.
    for d in queued {
        tap.replay_to_peer(d);
        assert_eq!(server.recv(&mut buf).unwrap_err(), RecordError::WouldBlock);
    }
    assert_eq!(server.get_discarded(), 3);
}

// ---------------------------------------------------------------------------
// Oversize payloads
// ---------------------------------------------------------------------------

#[test]
fn oversize_datagram_payload_refused() {
    let (mut client, _server) = dtls12_pair(0xc02f);
    let mtu = client.get_data_mtu();
    let too_big = vec![0u8; mtu + 1];
    assert_eq!(client.send(&too_big).unwrap_err(), RecordError::LargePacket);
    // Exactly the MTU is fine.
    assert_eq!(client.send(&too_big[..mtu]).unwrap(), mtu);
}

// ---------------------------------------------------------------------------
// Flight engine
// ---------------------------------------------------------------------------

fn queue_client_hello(s: &mut DatagramSession, len: usize) {
    s.queue_flight_message(
        ContentType::Handshake,
        handshake::CLIENT_HELLO,
        vec![0x77; len],
    )
    .unwrap();
}

#[test]
fn flight_transmits_and_retransmits_on_timer() {
    init_logs();
    let (a, _b) = datagram_pair();
    let tap = a.clone();
    let mut client = Session::new(
        loopback_config(Role::Client, ProtocolVersion::Dtls12),
        a,
        StdRng::seed_from_u64(5),
    );
    client.set_dtls_timeouts(1, 60_000);

    queue_client_hello(&mut client, 200);
    assert_eq!(client.dtls_transmit().unwrap_err(), RecordError::WouldBlock);
    assert_eq!(tap.queued_to_peer().len(), 1);

    // Nothing arrives; once the retransmission window passes, the same
    // flight goes out again with fresh record sequence numbers.
    sleep(Duration::from_millis(5));
    assert_eq!(client.dtls_transmit().unwrap_err(), RecordError::WouldBlock);
    let queued = tap.queued_to_peer();
    assert_eq!(queued.len(), 2);
    let seq0 = u64::from_be_bytes(queued[0][3..11].try_into().unwrap());
    let seq1 = u64::from_be_bytes(queued[1][3..11].try_into().unwrap());
    assert!(seq1 > seq0, "retransmission must consume fresh sequences");
}

#[test]
fn flight_fragments_to_mtu() {
    let (a, b) = datagram_pair();
    let tap = a.clone();
    let mut client = Session::new(
        loopback_config(Role::Client, ProtocolVersion::Dtls12),
        a,
        StdRng::seed_from_u64(6),
    );
    let mut server = Session::new(
        loopback_config(Role::Server, ProtocolVersion::Dtls12),
        b,
        StdRng::seed_from_u64(7),
    );
    client.set_mtu(200);

    queue_client_hello(&mut client, 700);
    assert_eq!(client.dtls_transmit().unwrap_err(), RecordError::WouldBlock);

    let datagrams = tap.queued_to_peer();
    assert!(datagrams.len() >= 4, "700 bytes over a 200-byte MTU fragments");
    for d in &datagrams {
        assert!(d.len() <= 200, "datagram exceeds MTU: {}", d.len());
    }

    // The server can reassemble from the fragment headers.
    let mut body = vec![0u8; 700];
    let mut covered = 0;
    loop {
        match server.recv_handshake_record(0) {
            Ok(()) => {}
            Err(RecordError::WouldBlock) => break,
            Err(e) => panic!("unexpected: {e}"),
        }
        while let Some(frag) = server.take_handshake_message() {
            let fh = FragmentHeader::parse(&frag).unwrap();
            assert_eq!(fh.msg_type, handshake::CLIENT_HELLO);
            assert_eq!(fh.total_length, 700);
            let (o, l) = (fh.frag_offset as usize, fh.frag_length as usize);
            body[o..o + l].copy_from_slice(&frag[12..12 + l]);
            covered += l;
        }
    }
    assert_eq!(covered, 700);
    assert_eq!(body, vec![0x77; 700]);
}

#[test]
fn flight_acknowledged_by_next_flight() {
    let (mut client, mut server) = dtls12_handshaking_pair();

    queue_client_hello(&mut client, 120);
    assert_eq!(client.dtls_transmit().unwrap_err(), RecordError::WouldBlock);

    // Server consumes the ClientHello and answers with its own flight.
    server.recv_handshake_record(0).unwrap();
    assert!(server.take_handshake_message().is_some());
    server
        .queue_flight_message(ContentType::Handshake, handshake::SERVER_HELLO, vec![1; 90])
        .unwrap();
    assert_eq!(server.dtls_transmit().unwrap_err(), RecordError::WouldBlock);

    // The arrival of the server's flight implicitly acknowledges ours.
    client.dtls_transmit().unwrap();
    assert!(client.take_handshake_message().is_some());
}

#[test]
fn lost_flight_recovers_via_retransmission() {
    let (a, b) = datagram_pair();
    let drop_tap = a.clone();
    let mut client = Session::new(
        loopback_config(Role::Client, ProtocolVersion::Dtls12),
        a,
        StdRng::seed_from_u64(8),
    );
    let mut server = Session::new(
        loopback_config(Role::Server, ProtocolVersion::Dtls12),
        b,
        StdRng::seed_from_u64(9),
    );
    client.set_dtls_timeouts(1, 60_000);

    // First transmission evaporates on the wire.
    drop_tap.drop_next(1);
    queue_client_hello(&mut client, 80);
    assert_eq!(client.dtls_transmit().unwrap_err(), RecordError::WouldBlock);
    assert_eq!(
        server.recv_handshake_record(0).unwrap_err(),
        RecordError::WouldBlock
    );

    // The retransmission gets through.
    sleep(Duration::from_millis(5));
    assert_eq!(client.dtls_transmit().unwrap_err(), RecordError::WouldBlock);
    server.recv_handshake_record(0).unwrap();
    assert!(server.take_handshake_message().is_some());
}

#[test]
fn last_flight_retransmits_on_demand() {
    let (a, _b) = datagram_pair();
    let tap = a.clone();
    let mut client = Session::new(
        loopback_config(Role::Client, ProtocolVersion::Dtls12),
        a,
        StdRng::seed_from_u64(10),
    );
    client.set_dtls_timeouts(1, 60_000);

    client
        .queue_flight_message(ContentType::Handshake, handshake::FINISHED, vec![2; 40])
        .unwrap();
    // The Finished flight returns immediately with the async timer armed.
    client.dtls_transmit().unwrap();
    assert_eq!(tap.queued_to_peer().len(), 1);

    // No reply: wait-and-retransmit fires the on-demand resend.
    sleep(Duration::from_millis(5));
    assert_eq!(
        client.dtls_wait_and_retransmit().unwrap_err(),
        RecordError::WouldBlock
    );
    assert_eq!(tap.queued_to_peer().len(), 2);
}

#[test]
fn total_timeout_wins_over_retransmission() {
    let (a, _b) = datagram_pair();
    let mut client = Session::new(
        loopback_config(Role::Client, ProtocolVersion::Dtls12),
        a,
        StdRng::seed_from_u64(11),
    );
    // Total timeout below the retransmission window: the envelope check
    // fires first.
    client.set_dtls_timeouts(10_000, 50);
    queue_client_hello(&mut client, 30);
    assert_eq!(client.dtls_transmit().unwrap_err(), RecordError::WouldBlock);
    sleep(Duration::from_millis(60));
    assert_eq!(client.dtls_transmit().unwrap_err(), RecordError::Timeout);
}

// ---------------------------------------------------------------------------
// Cookie prestate
// ---------------------------------------------------------------------------

#[test]
fn prestate_resumes_sequence_numbers() {
    let (a, _b) = datagram_pair();
    let tap = a.clone();
    let mut server = Session::new(
        loopback_config(Role::Server, ProtocolVersion::Dtls12),
        a,
        StdRng::seed_from_u64(12),
    );

    let prestate = CookiePrestate {
        record_seq: 2,
        hsk_read_seq: 1,
        hsk_write_seq: 0,
    };
    server.prestate_set(&prestate).unwrap();

    server
        .queue_flight_message(ContentType::Handshake, handshake::SERVER_HELLO, vec![0; 20])
        .unwrap();
    assert_eq!(server.dtls_transmit().unwrap_err(), RecordError::WouldBlock);

    let datagram = tap.queued_to_peer().pop().unwrap();
    let seq = u64::from_be_bytes(datagram[3..11].try_into().unwrap());
    // Epoch 0, record sequence continuing after the stateless exchange.
    assert_eq!(seq, 2);
}
