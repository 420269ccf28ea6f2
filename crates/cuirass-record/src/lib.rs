//! # cuirass-record
//!
//! The record layer of a TLS/DTLS protocol engine: the component that, once a
//! handshake has produced cipher parameters, turns application messages into
//! authenticated encrypted records on the wire and back.
//!
//! What lives here:
//!
//! - record protection for TLS 1.2 (CBC MAC-then-encrypt and
//!   encrypt-then-MAC, stream+MAC, AEAD) and TLS 1.3 (AEAD with XOR-derived
//!   nonces and hidden inner content types),
//! - the epoch table: concurrently live sets of read/write parameters across
//!   rekeys and DTLS retransmissions, with refcounted GC,
//! - key-schedule binding: TLS 1.2 key-block expansion and the TLS 1.3
//!   traffic-secret machinery including in-place key update,
//! - the record I/O loop over a pluggable [`transport::Transport`],
//! - DTLS anti-replay, handshake-flight retransmission, and the stateless
//!   cookie exchange.
//!
//! What deliberately does not live here: handshake negotiation, certificate
//! processing, raw primitives (see `cuirass-crypto`), and socket I/O.

pub mod buffers;
pub mod config;
pub mod dtls;
pub mod epoch;
pub mod error;
pub mod keys;
pub mod params;
pub mod prf;
pub mod protect;
pub mod session;
pub mod transport;
pub mod wire;

pub use config::{Config, Role};
pub use error::RecordError;
pub use session::Session;
