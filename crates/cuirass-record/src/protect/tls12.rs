//! Record protection for TLS 1.2 / DTLS 1.2 semantics: CBC with
//! MAC-then-encrypt or encrypt-then-MAC, stream+MAC, and AEAD with either an
//! explicit on-wire nonce (GCM/CCM) or a sequence-XOR nonce (ChaCha20).

use cuirass_crypto::block::{cbc_decrypt, cbc_encrypt};
use cuirass_crypto::ct::ct_eq;
use cuirass_crypto::mac::MacContext;
use cuirass_crypto::suite::CipherKind;
use rand_core::{CryptoRng, RngCore};

use crate::error::RecordError;
use crate::params::RecordParameters;
use crate::protect::preamble::make_preamble;
use crate::wire::{ContentType, ProtocolVersion};

/// Choose the padding for a CBC record.
///
/// `min_pad` is the caller-requested extra padding; on top of it only the
/// minimal padding to reach a block boundary is added, shrunk by one block
/// if the total would not fit the one-byte pad length encoding.
fn calc_block_pad(data_size: usize, hash_size: usize, min_pad: usize, block: usize, etm: bool) -> usize {
    let mut pre_length = data_size + min_pad;
    if !etm {
        pre_length += hash_size;
    }
    let mut pad = (block - (pre_length % block)) + min_pad;
    if pad > 255 {
        pad -= block;
    }
    pad
}

/// Encrypt one record under `params.write`, returning the wire payload
/// (everything after the record header).
pub fn encrypt<R: RngCore + CryptoRng + ?Sized>(
    params: &mut RecordParameters,
    version: ProtocolVersion,
    ctype: ContentType,
    plain: &[u8],
    min_pad: usize,
    rng: &mut R,
) -> Result<Vec<u8>, RecordError> {
    let cipher = params.cipher;
    let mac = params.mac;
    let sequence = params.write.sequence_number;
    let wire_version = version.wire_bytes();
    let etm = params.etm && cipher.kind == CipherKind::Block;

    if min_pad > 255 {
        return Err(RecordError::InvalidRequest);
    }

    log::debug!(
        "ENC: cipher {}, mac {}, epoch {}",
        cipher.name,
        mac.name,
        params.epoch
    );

    match cipher.kind {
        CipherKind::Block => {
            let block = cipher.block_size;
            let hash_size = mac.output_size;
            let pad = calc_block_pad(plain.len(), hash_size, min_pad, block, etm);
            let pad_byte = (pad - 1) as u8;

            let mut iv = vec![0u8; block];
            rng.fill_bytes(&mut iv);

            let mut out = Vec::with_capacity(block + plain.len() + hash_size + pad);
            out.extend_from_slice(&iv);

            if etm {
                // Encrypt plaintext‖padding, then MAC over
                // preamble ‖ IV ‖ ciphertext.
                let enc_start = out.len();
                out.extend_from_slice(plain);
                out.resize(enc_start + plain.len() + pad, pad_byte);
                cbc_encrypt(cipher.id, &params.write.key, &iv, &mut out[enc_start..])?;

                let preamble =
                    make_preamble(sequence, ctype.as_u8(), wire_version, out.len() as u16);
                let mut m = MacContext::new(mac.id, &params.write.mac_key)?;
                m.update(&preamble);
                m.update(&out);
                let tag = m.finalize();
                out.extend_from_slice(&tag);
            } else {
                // MAC over preamble ‖ plaintext, then encrypt
                // plaintext ‖ MAC ‖ padding.
                let preamble =
                    make_preamble(sequence, ctype.as_u8(), wire_version, plain.len() as u16);
                let mut m = MacContext::new(mac.id, &params.write.mac_key)?;
                m.update(&preamble);
                m.update(plain);
                let tag = m.finalize();

                let enc_start = out.len();
                out.extend_from_slice(plain);
                out.extend_from_slice(&tag);
                out.resize(enc_start + plain.len() + hash_size + pad, pad_byte);
                cbc_encrypt(cipher.id, &params.write.key, &iv, &mut out[enc_start..])?;
            }
            Ok(out)
        }
        CipherKind::Stream => {
            // Only the identity transform is registered; the MAC still
            // authenticates preamble ‖ plaintext.
            let preamble = make_preamble(sequence, ctype.as_u8(), wire_version, plain.len() as u16);
            let mut m = MacContext::new(mac.id, &params.write.mac_key)?;
            m.update(&preamble);
            m.update(plain);
            let tag = m.finalize();

            let mut out = Vec::with_capacity(plain.len() + tag.len());
            out.extend_from_slice(plain);
            out.extend_from_slice(&tag);
            Ok(out)
        }
        CipherKind::Aead => {
            let crate::params::RecordContext::Aead(ctx) = &params.write.ctx else {
                return Err(RecordError::InternalError);
            };
            let preamble = make_preamble(sequence, ctype.as_u8(), wire_version, plain.len() as u16);

            let mut nonce = [0u8; 12];
            if cipher.xor_nonce {
                if params.write.iv.len() != 12 {
                    return Err(RecordError::InternalError);
                }
                // Nonce = (0^4 ‖ sequence) XOR implicit IV; nothing on the
                // wire.
                nonce[4..].copy_from_slice(&sequence.to_be_bytes());
                for (n, iv) in nonce.iter_mut().zip(params.write.iv.iter()) {
                    *n ^= iv;
                }
                let sealed = ctx.seal(&nonce, &preamble, plain)?;
                Ok(sealed)
            } else {
                // Nonce = implicit IV ‖ sequence; the sequence doubles as
                // the on-wire explicit nonce, so it can never repeat under
                // one key.
                if params.write.iv.len() != cipher.implicit_iv {
                    return Err(RecordError::InternalError);
                }
                nonce[..cipher.implicit_iv].copy_from_slice(&params.write.iv);
                nonce[cipher.implicit_iv..].copy_from_slice(&sequence.to_be_bytes());

                let sealed = ctx.seal(&nonce, &preamble, plain)?;
                let mut out = Vec::with_capacity(cipher.explicit_iv + sealed.len());
                out.extend_from_slice(&sequence.to_be_bytes());
                out.extend_from_slice(&sealed);
                Ok(out)
            }
        }
    }
}

/// Decrypt one record under `params.read`.
///
/// `sequence` is the record's sequence number (for DTLS the wire value with
/// its epoch prefix). `plain_capacity` bounds the ciphertext a record may
/// carry before it is rejected outright.
pub fn decrypt(
    params: &mut RecordParameters,
    version: ProtocolVersion,
    ctype: ContentType,
    sequence: u64,
    ciphertext: &[u8],
    plain_capacity: usize,
) -> Result<Vec<u8>, RecordError> {
    let cipher = params.cipher;
    let mac = params.mac;
    let wire_version = version.wire_bytes();
    let tag_size = if cipher.kind == CipherKind::Aead {
        cipher.tag_size
    } else {
        mac.output_size
    };
    let etm = params.etm && cipher.kind == CipherKind::Block;

    let mut ct = ciphertext;

    // Encrypt-then-MAC verifies over preamble ‖ IV ‖ ciphertext before any
    // decryption happens.
    if etm {
        if ct.len() < tag_size {
            return Err(RecordError::UnexpectedPacketLength);
        }
        let body_len = ct.len() - tag_size;
        let preamble = make_preamble(sequence, ctype.as_u8(), wire_version, body_len as u16);
        let mut m = MacContext::new(mac.id, &params.read.mac_key)?;
        m.update(&preamble);
        m.update(&ct[..body_len]);
        if m.verify(&ct[body_len..]).is_err() {
            return Err(RecordError::DecryptionFailed);
        }
    }

    match cipher.kind {
        CipherKind::Aead => {
            let crate::params::RecordContext::Aead(ctx) = &params.read.ctx else {
                return Err(RecordError::DecryptionFailed);
            };
            if ct.len() < tag_size + cipher.explicit_iv {
                return Err(RecordError::DecryptionFailed);
            }

            let mut nonce = [0u8; 12];
            if cipher.xor_nonce {
                if params.read.iv.len() != 12 {
                    return Err(RecordError::DecryptionFailed);
                }
                nonce[4..].copy_from_slice(&sequence.to_be_bytes());
                for (n, iv) in nonce.iter_mut().zip(params.read.iv.iter()) {
                    *n ^= iv;
                }
            } else {
                if params.read.iv.len() != cipher.implicit_iv {
                    return Err(RecordError::DecryptionFailed);
                }
                nonce[..cipher.implicit_iv].copy_from_slice(&params.read.iv);
                nonce[cipher.implicit_iv..].copy_from_slice(&ct[..cipher.explicit_iv]);
                ct = &ct[cipher.explicit_iv..];
            }

            if ct.len() > plain_capacity {
                log::debug!("received {} bytes, expecting less than {plain_capacity}", ct.len());
                return Err(RecordError::DecryptionFailed);
            }

            let length = ct.len() - tag_size;
            let preamble = make_preamble(sequence, ctype.as_u8(), wire_version, length as u16);
            let plain = ctx
                .open(&nonce, &preamble, ct)
                .map_err(|_| RecordError::DecryptionFailed)?;
            Ok(plain)
        }
        CipherKind::Stream => {
            if ct.len() < tag_size {
                return Err(RecordError::UnexpectedPacketLength);
            }
            if ct.len() > plain_capacity {
                return Err(RecordError::DecryptionFailed);
            }
            let length = ct.len() - tag_size;
            let preamble = make_preamble(sequence, ctype.as_u8(), wire_version, length as u16);
            let mut m = MacContext::new(mac.id, &params.read.mac_key)?;
            m.update(&preamble);
            m.update(&ct[..length]);
            if m.verify(&ct[length..]).is_err() {
                return Err(RecordError::DecryptionFailed);
            }
            Ok(ct[..length].to_vec())
        }
        CipherKind::Block => {
            let block = cipher.block_size;
            if ct.len() < block {
                return Err(RecordError::UnexpectedPacketLength);
            }
            let enc_len = if etm { ct.len() - tag_size } else { ct.len() };
            if enc_len % block != 0 {
                return Err(RecordError::UnexpectedPacketLength);
            }

            // TLS 1.1+ always carries the IV up front; it is authenticated
            // (EtM) but never secret.
            let iv = ct[..block].to_vec();
            ct = &ct[block..];
            let enc_len = enc_len - block;

            if ct.len() < tag_size + 1 {
                return Err(RecordError::DecryptionFailed);
            }
            if ct.len() > plain_capacity {
                return Err(RecordError::DecryptionFailed);
            }

            if etm {
                let mut buf = ct[..enc_len].to_vec();
                cbc_decrypt(cipher.id, &params.read.key, &iv, &mut buf)?;
                let pad = buf[enc_len - 1] as usize;
                let length = enc_len
                    .checked_sub(pad + 1)
                    .ok_or(RecordError::DecryptionFailed)?;
                buf.truncate(length);
                Ok(buf)
            } else {
                let mut buf = ct.to_vec();
                cbc_decrypt(cipher.id, &params.read.key, &iv, &mut buf)?;
                cbc_mac_verify(
                    mac.id,
                    &params.read.mac_key,
                    sequence,
                    ctype.as_u8(),
                    wire_version,
                    buf,
                    tag_size,
                )
            }
        }
    }
}

/// MAC-then-encrypt verification after CBC decryption.
///
/// The declared plaintext length comes from the last-byte padding count;
/// padding bytes and the MAC are both checked, and every failure collapses
/// into the same uniform `DecryptionFailed`. The MAC is computed even when
/// the padding is malformed so the rejection time does not depend on which
/// check tripped.
fn cbc_mac_verify(
    mac_id: cuirass_crypto::suite::MacId,
    mac_key: &[u8],
    sequence: u64,
    ctype: u8,
    wire_version: [u8; 2],
    mut buf: Vec<u8>,
    tag_size: usize,
) -> Result<Vec<u8>, RecordError> {
    let n = buf.len();
    let pad = buf[n - 1] as usize;

    let pad_failed = pad + tag_size + 1 > n;
    let pad = if pad_failed { 0 } else { pad };
    let pad_byte = buf[n - 1];

    // All `pad` bytes before the length byte must equal it.
    let mut diff = 0u8;
    for &b in &buf[n - 1 - pad..n - 1] {
        diff |= b ^ pad_byte;
    }

    let length = n - tag_size - pad - 1;
    let preamble = make_preamble(sequence, ctype, wire_version, length as u16);
    let mut m = MacContext::new(mac_id, mac_key)?;
    m.update(&preamble);
    m.update(&buf[..length]);
    let tag = m.finalize();

    let mac_ok = ct_eq(&tag, &buf[length..length + tag_size]);
    if pad_failed || diff != 0 || !mac_ok {
        return Err(RecordError::DecryptionFailed);
    }

    buf.truncate(length);
    Ok(buf)
}
