//! Record protection: version dispatch and overhead accounting.

pub mod preamble;
pub mod tls12;
pub mod tls13;

use cuirass_crypto::suite::{CipherEntry, CipherKind, MacEntry, MacId};
use rand_core::{CryptoRng, RngCore};

use crate::error::RecordError;
use crate::params::RecordParameters;
use crate::wire::{ContentType, ProtocolVersion};

/// Encrypt `plain` into a wire payload under `params.write`.
pub fn encrypt_record<R: RngCore + CryptoRng + ?Sized>(
    params: &mut RecordParameters,
    version: ProtocolVersion,
    ctype: ContentType,
    plain: &[u8],
    min_pad: usize,
    max_send: usize,
    rng: &mut R,
) -> Result<Vec<u8>, RecordError> {
    if version.tls13_sem() {
        // The inner content-type octet rides on top of the plaintext cap.
        tls13::encrypt(params, ctype, plain, min_pad, max_send + 1)
    } else {
        tls12::encrypt(params, version, ctype, plain, min_pad, rng)
    }
}

/// Decrypt a wire payload under `params.read`, returning the plaintext and
/// the effective content type (recovered from the inner framing under
/// TLS 1.3, the outer header type otherwise).
#[allow(clippy::too_many_arguments)]
pub fn decrypt_record(
    params: &mut RecordParameters,
    version: ProtocolVersion,
    outer_type: ContentType,
    sequence: u64,
    ciphertext: &[u8],
    max_decrypted: usize,
    plain_capacity: usize,
    safe_padding: bool,
) -> Result<(Vec<u8>, ContentType), RecordError> {
    if ciphertext.is_empty() {
        return Ok((Vec::new(), outer_type));
    }
    if version.tls13_sem() {
        tls13::decrypt(
            params,
            sequence,
            ciphertext,
            outer_type,
            max_decrypted,
            safe_padding,
        )
    } else {
        let plain = tls12::decrypt(
            params,
            version,
            outer_type,
            sequence,
            ciphertext,
            plain_capacity,
        )?;
        Ok((plain, outer_type))
    }
}

/// Per-record byte overhead of a cipher/MAC pairing, excluding the record
/// header. With `max` the worst case is reported (full CBC padding);
/// otherwise the minimum.
pub fn record_overhead(
    version: ProtocolVersion,
    cipher: &'static CipherEntry,
    mac: &'static MacEntry,
    max: bool,
) -> usize {
    let mut total = 0;

    // The inner content-type octet.
    if version.tls13_sem() {
        total += 1;
    }

    if mac.id == MacId::Aead {
        if !version.tls13_sem() {
            total += cipher.explicit_iv;
        }
        total += cipher.tag_size;
    } else {
        total += mac.output_size;
    }

    if cipher.kind == CipherKind::Block {
        let iv = cipher.explicit_iv;
        if max {
            total += 2 * iv; // IV plus up to a whole block of padding
        } else {
            total += iv + 1;
        }
    }

    total
}
