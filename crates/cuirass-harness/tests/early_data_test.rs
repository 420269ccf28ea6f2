//! TLS 1.3 0-RTT: early-data arming, budgets, and the server-side
//! skip-on-reject path.
//!
//! Run: cargo test -p cuirass-harness --test early_data_test

use cuirass_harness::pipe::stream_pair;
use cuirass_harness::{StreamSession, loopback_config};
use cuirass_record::RecordError;
use cuirass_record::config::Role;
use cuirass_record::keys::Stage;
use cuirass_record::session::Session;
use cuirass_record::wire::ProtocolVersion;
use rand::SeedableRng;
use rand::rngs::StdRng;

const EARLY_SECRET: [u8; 32] = [9u8; 32];

fn early_pair() -> (StreamSession, StreamSession) {
    let (a, b) = stream_pair();
    let mut client = Session::new(
        loopback_config(Role::Client, ProtocolVersion::Tls13),
        a,
        StdRng::seed_from_u64(21),
    );
    let mut server = Session::new(
        loopback_config(Role::Server, ProtocolVersion::Tls13),
        b,
        StdRng::seed_from_u64(22),
    );

    for s in [&mut client, &mut server] {
        s.setup_next_epoch(false).unwrap();
        s.set_cipher_suite(0x1301, false).unwrap();
        s.set_early_traffic_secret(&EARLY_SECRET);
    }
    // Only the client's write and the server's read are armed for 0-RTT.
    client.write_state_init(Stage::Early).unwrap();
    server.read_state_init(Stage::Early).unwrap();
    (client, server)
}

#[test]
fn early_data_roundtrip() {
    let (mut client, mut server) = early_pair();
    server.set_early_data_state(true, true);

    assert_eq!(client.send_early_data(b"0rtt hello").unwrap(), 10);
    client.flush_early_data().unwrap();

    // Driving the handshake receive loop consumes the early records into
    // the dedicated buffer.
    assert_eq!(
        server.recv_handshake_record(0).unwrap_err(),
        RecordError::WouldBlock
    );
    let mut buf = [0u8; 32];
    let n = server.recv_early_data(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"0rtt hello");
}

#[test]
fn early_data_budget_enforced_on_send() {
    let (mut client, _server) = early_pair();
    let budget = vec![0u8; 16384];
    client.send_early_data(&budget).unwrap();
    assert_eq!(
        client.send_early_data(b"x").unwrap_err(),
        RecordError::RecordLimitReached
    );
}

#[test]
fn recv_early_data_without_any_is_not_available() {
    let (_client, mut server) = early_pair();
    server.set_early_data_state(true, true);
    let mut buf = [0u8; 8];
    assert_eq!(
        server.recv_early_data(&mut buf).unwrap_err(),
        RecordError::NotAvailable
    );
}

#[test]
fn recv_early_data_is_server_only() {
    let (mut client, _server) = early_pair();
    let mut buf = [0u8; 8];
    assert_eq!(
        client.recv_early_data(&mut buf).unwrap_err(),
        RecordError::InvalidRequest
    );
}

#[test]
fn rejected_early_data_skipped_against_budget() {
    // The server never arms early keys: the client's 0-RTT records cannot
    // decrypt and are skipped, counted against the budget, without killing
    // the session.
    let (a, b) = stream_pair();
    let mut client = Session::new(
        loopback_config(Role::Client, ProtocolVersion::Tls13),
        a,
        StdRng::seed_from_u64(23),
    );
    let mut server = Session::new(
        loopback_config(Role::Server, ProtocolVersion::Tls13),
        b,
        StdRng::seed_from_u64(24),
    );
    client.setup_next_epoch(false).unwrap();
    client.set_cipher_suite(0x1301, false).unwrap();
    client.set_early_traffic_secret(&EARLY_SECRET);
    client.write_state_init(Stage::Early).unwrap();

    server.set_early_data_state(true, false);

    client.send_early_data(b"discard me").unwrap();
    client.flush_early_data().unwrap();

    assert_eq!(
        server.recv_handshake_record(0).unwrap_err(),
        RecordError::WouldBlock
    );
    // Nothing was delivered, and the session is still alive.
    let mut buf = [0u8; 8];
    assert_eq!(
        server.recv_early_data(&mut buf).unwrap_err(),
        RecordError::NotAvailable
    );
}
