//! # cuirass-harness
//!
//! Loopback plumbing for exercising the record layer end to end without
//! sockets: in-memory stream and datagram pipes (with optional loss
//! injection) and builders that stand up client/server session pairs with
//! externally installed keys, standing in for a completed handshake.

pub mod pipe;

use cuirass_record::config::{Config, Role};
use cuirass_record::keys::Stage;
use cuirass_record::session::Session;
use cuirass_record::wire::ProtocolVersion;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::pipe::{DatagramEnd, StreamEnd, datagram_pair, stream_pair};

pub type StreamSession = Session<StreamEnd, StdRng>;
pub type DatagramSession = Session<DatagramEnd, StdRng>;

/// Install a TLS 1.2 epoch on one side from a fixed master secret, as the
/// handshake layer would after Finished.
pub fn arm_tls12<T: cuirass_record::transport::Transport>(s: &mut Session<T, StdRng>, suite: u16) {
    s.setup_next_epoch(false).expect("setup next epoch");
    s.set_cipher_suite(suite, false).expect("bind suite");
    s.set_master_secret(&[0u8; 48]);
    s.set_randoms([0x11; 32], [0x22; 32]);
    s.read_state_init(Stage::Tls12).expect("read keys");
    s.write_state_init(Stage::Tls12).expect("write keys");
    s.epoch_bump();
    s.handshake_complete();
}

/// A session config suited to the loopback pipes: they never block, so the
/// session must surface `WouldBlock` instead of sleeping.
pub fn loopback_config(role: Role, version: ProtocolVersion) -> Config {
    let mut cfg = Config::new(role, version);
    cfg.nonblock = true;
    cfg
}

fn config(role: Role, version: ProtocolVersion) -> Config {
    loopback_config(role, version)
}

/// A connected TLS 1.2 pair over a byte-stream pipe, keys installed, ready
/// for application data.
pub fn tls12_pair(suite: u16) -> (StreamSession, StreamSession) {
    let (a, b) = stream_pair();
    let mut client = Session::new(
        config(Role::Client, ProtocolVersion::Tls12),
        a,
        StdRng::seed_from_u64(1),
    );
    let mut server = Session::new(
        config(Role::Server, ProtocolVersion::Tls12),
        b,
        StdRng::seed_from_u64(2),
    );
    arm_tls12(&mut client, suite);
    arm_tls12(&mut server, suite);
    (client, server)
}

/// A connected TLS 1.2 pair negotiated with encrypt-then-MAC.
pub fn tls12_etm_pair(suite: u16) -> (StreamSession, StreamSession) {
    let (a, b) = stream_pair();
    let mut client = Session::new(
        config(Role::Client, ProtocolVersion::Tls12),
        a,
        StdRng::seed_from_u64(3),
    );
    let mut server = Session::new(
        config(Role::Server, ProtocolVersion::Tls12),
        b,
        StdRng::seed_from_u64(4),
    );
    for s in [&mut client, &mut server] {
        s.setup_next_epoch(false).expect("setup next epoch");
        s.set_cipher_suite(suite, true).expect("bind suite");
        s.set_master_secret(&[0u8; 48]);
        s.set_randoms([0x11; 32], [0x22; 32]);
        s.read_state_init(Stage::Tls12).expect("read keys");
        s.write_state_init(Stage::Tls12).expect("write keys");
        s.epoch_bump();
        s.handshake_complete();
    }
    (client, server)
}

pub fn arm_tls13<T: cuirass_record::transport::Transport>(s: &mut Session<T, StdRng>, suite: u16) {
    s.setup_next_epoch(false).expect("setup next epoch");
    s.set_cipher_suite(suite, false).expect("bind suite");
    s.set_temp_secret(&[0x42; 48]);
    s.set_transcript_hash(&[0x13; 32]);
    s.read_state_init(Stage::Application).expect("read keys");
    s.write_state_init(Stage::Application).expect("write keys");
    s.epoch_bump();
    s.handshake_complete();
}

/// A connected TLS 1.3 pair with application traffic keys installed.
pub fn tls13_pair(suite: u16) -> (StreamSession, StreamSession) {
    let (a, b) = stream_pair();
    let mut client = Session::new(
        config(Role::Client, ProtocolVersion::Tls13),
        a,
        StdRng::seed_from_u64(5),
    );
    let mut server = Session::new(
        config(Role::Server, ProtocolVersion::Tls13),
        b,
        StdRng::seed_from_u64(6),
    );
    arm_tls13(&mut client, suite);
    arm_tls13(&mut server, suite);
    (client, server)
}

/// A connected DTLS 1.2 pair over a datagram pipe.
pub fn dtls12_pair(suite: u16) -> (DatagramSession, DatagramSession) {
    let (a, b) = datagram_pair();
    let mut client = Session::new(
        config(Role::Client, ProtocolVersion::Dtls12),
        a,
        StdRng::seed_from_u64(7),
    );
    let mut server = Session::new(
        config(Role::Server, ProtocolVersion::Dtls12),
        b,
        StdRng::seed_from_u64(8),
    );
    arm_tls12(&mut client, suite);
    arm_tls12(&mut server, suite);
    (client, server)
}

/// A DTLS 1.2 pair still in handshake phase: null epoch live, flight engine
/// usable, keys not yet installed.
pub fn dtls12_handshaking_pair() -> (DatagramSession, DatagramSession) {
    let (a, b) = datagram_pair();
    let client = Session::new(
        config(Role::Client, ProtocolVersion::Dtls12),
        a,
        StdRng::seed_from_u64(9),
    );
    let server = Session::new(
        config(Role::Server, ProtocolVersion::Dtls12),
        b,
        StdRng::seed_from_u64(10),
    );
    (client, server)
}
