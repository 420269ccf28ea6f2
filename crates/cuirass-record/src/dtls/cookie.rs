//! Stateless DTLS cookie exchange (HelloVerifyRequest).
//!
//! The server answers a cookie-less ClientHello with a HelloVerifyRequest
//! carrying `MAC(key, client_identity)` and allocates nothing. When the
//! cookie comes back it is recomputed and compared in constant time; the
//! client's record and handshake sequence numbers are captured in a
//! [`CookiePrestate`] so the new session resumes counting where the
//! stateless exchange left off.

use cuirass_crypto::ct::ct_eq;
use cuirass_crypto::mac::hmac_oneshot;
use cuirass_crypto::suite::MacId;

use crate::error::RecordError;
use crate::transport::Transport;
use crate::wire::{
    self, DTLS10_WIRE, DTLS_HANDSHAKE_HEADER_SIZE, DTLS_RECORD_HEADER_SIZE, handshake,
};

/// Cookie bytes on the wire: a SHA-1 MAC truncated to 16.
pub const COOKIE_SIZE: usize = 16;

/// Sequence numbers preserved across the stateless exchange.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CookiePrestate {
    /// Low byte of the client's record sequence, echoed back.
    pub record_seq: u8,
    /// Client's handshake sequence we have consumed.
    pub hsk_read_seq: u8,
    /// Our handshake sequence (always zero: HelloVerifyRequest is the only
    /// message sent statelessly).
    pub hsk_write_seq: u8,
}

/// Emit a HelloVerifyRequest for `client_id` through `push`.
///
/// The record goes out with the DTLS 1.0 version tuple regardless of what
/// will be negotiated, and echoes the client's record sequence so the
/// retried ClientHello lines up. Returns the bytes pushed.
pub fn cookie_send<T: Transport>(
    key: &[u8],
    client_id: &[u8],
    prestate: &CookiePrestate,
    transport: &mut T,
) -> Result<usize, RecordError> {
    if key.is_empty() {
        return Err(RecordError::InvalidRequest);
    }

    let body_len = COOKIE_SIZE + 3; // server_version(2) + cookie_len(1) + cookie
    let mut hvr =
        Vec::with_capacity(DTLS_RECORD_HEADER_SIZE + DTLS_HANDSHAKE_HEADER_SIZE + body_len);

    // Record header, epoch 0, sequence echoing the client's.
    hvr.push(wire::ContentType::Handshake.as_u8());
    hvr.extend_from_slice(&DTLS10_WIRE);
    hvr.extend_from_slice(&[0u8; 7]);
    hvr.push(prestate.record_seq);
    hvr.extend_from_slice(&((DTLS_HANDSHAKE_HEADER_SIZE + body_len) as u16).to_be_bytes());

    // Handshake fragment header; the message is never fragmented.
    hvr.push(handshake::HELLO_VERIFY_REQUEST);
    let mut u24 = [0u8; 3];
    wire::write_u24(body_len as u32, &mut u24);
    hvr.extend_from_slice(&u24);
    hvr.push(0);
    hvr.push(prestate.hsk_write_seq);
    hvr.extend_from_slice(&[0u8; 3]); // fragment offset
    wire::write_u24(body_len as u32, &mut u24);
    hvr.extend_from_slice(&u24); // fragment length

    // HelloVerifyRequest body.
    hvr.extend_from_slice(&DTLS10_WIRE);
    hvr.push(COOKIE_SIZE as u8);
    let digest = hmac_oneshot(MacId::HmacSha1, key, client_id)?;
    hvr.extend_from_slice(&digest[..COOKIE_SIZE]);

    transport
        .push(&hvr)
        .map_err(|_| RecordError::PushError)?;
    Ok(hvr.len())
}

/// Verify the cookie inside a ClientHello datagram `msg` (record layer
/// included) and fill `prestate` from its sequence numbers.
pub fn cookie_verify(
    key: &[u8],
    client_id: &[u8],
    msg: &[u8],
    prestate: &mut CookiePrestate,
) -> Result<(), RecordError> {
    if key.is_empty() {
        return Err(RecordError::InvalidRequest);
    }

    // ClientHello body: version(2) ‖ random(32) ‖ session_id<1..32> ‖
    // cookie<0..32> ‖ …
    let mut pos = 34 + DTLS_RECORD_HEADER_SIZE + DTLS_HANDSHAKE_HEADER_SIZE;
    if msg.len() < pos + 1 {
        return Err(RecordError::UnexpectedPacketLength);
    }

    let sid_size = msg[pos] as usize;
    pos += 1;
    if sid_size > 32 || msg.len() < pos + sid_size + 1 {
        return Err(RecordError::UnexpectedPacketLength);
    }
    pos += sid_size;

    let cookie_size = msg[pos] as usize;
    pos += 1;
    if msg.len() < pos + cookie_size {
        return Err(RecordError::UnexpectedPacketLength);
    }
    if cookie_size != COOKIE_SIZE {
        if cookie_size > 0 {
            log::debug!("received cookie with illegal size {cookie_size}, expected {COOKIE_SIZE}");
        }
        return Err(RecordError::BadCookie);
    }

    let digest = hmac_oneshot(MacId::HmacSha1, key, client_id)?;
    if !ct_eq(&digest[..COOKIE_SIZE], &msg[pos..pos + COOKIE_SIZE]) {
        return Err(RecordError::BadCookie);
    }

    prestate.record_seq = msg[10]; // client's record sequence, low byte
    prestate.hsk_read_seq = msg[DTLS_RECORD_HEADER_SIZE + 5]; // client's handshake seq
    prestate.hsk_write_seq = 0;
    Ok(())
}
