//! Record protection for TLS 1.3: AEAD with an XOR-derived nonce, inner
//! content-type framing, padding, and constant-time type recovery.

use cuirass_crypto::ct::ct_scan_right_nonzero;

use crate::error::RecordError;
use crate::params::{RecordContext, RecordParameters};
use crate::protect::preamble::make_tls13_aad;
use crate::wire::ContentType;

fn tls13_nonce(iv: &[u8], sequence: u64) -> Result<[u8; 12], RecordError> {
    if iv.len() != 12 {
        return Err(RecordError::InternalError);
    }
    let mut nonce = [0u8; 12];
    nonce.copy_from_slice(iv);
    for (n, s) in nonce[4..].iter_mut().zip(sequence.to_be_bytes()) {
        *n ^= s;
    }
    Ok(nonce)
}

/// Encrypt one record under `params.write`.
///
/// The inner plaintext is `content ‖ type(1) ‖ 0^pad`; the requested padding
/// is clamped down if the total would exceed `max_send`, and the outer
/// content type is always `application_data`.
pub fn encrypt(
    params: &mut RecordParameters,
    ctype: ContentType,
    plain: &[u8],
    mut pad_size: usize,
    max_send: usize,
) -> Result<Vec<u8>, RecordError> {
    // Null-cipher epoch: framing applies, protection is the identity.
    if params.is_null_cipher() {
        return Ok(plain.to_vec());
    }

    let RecordContext::Aead(ctx) = &params.write.ctx else {
        return Err(RecordError::InternalError);
    };
    let tag_size = params.cipher.tag_size;

    log::debug!(
        "ENC: cipher {}, epoch {} (1.3)",
        params.cipher.name,
        params.epoch
    );

    let mut total = plain.len() + 1 + pad_size;
    if total > max_send {
        if max_send < plain.len() + 1 {
            return Err(RecordError::InternalError);
        }
        pad_size = max_send - plain.len() - 1;
        total = max_send;
    }

    let nonce = tls13_nonce(&params.write.iv, params.write.sequence_number)?;
    let aad = make_tls13_aad((total + tag_size) as u16);

    let mut inner = Vec::with_capacity(total);
    inner.extend_from_slice(plain);
    inner.push(ctype.as_u8());
    inner.resize(total, 0);

    let sealed = ctx.seal(&nonce, &aad, &inner)?;
    Ok(sealed)
}

/// Decrypt one record under `params.read`, recovering the inner content
/// type from the trailing non-zero byte.
///
/// With `safe_padding` the scan walks the whole decrypted buffer so its
/// duration is independent of the padding length.
pub fn decrypt(
    params: &mut RecordParameters,
    sequence: u64,
    ciphertext: &[u8],
    outer_type: ContentType,
    max_decrypted: usize,
    safe_padding: bool,
) -> Result<(Vec<u8>, ContentType), RecordError> {
    if params.is_null_cipher() {
        return Ok((ciphertext.to_vec(), outer_type));
    }

    let RecordContext::Aead(ctx) = &params.read.ctx else {
        return Err(RecordError::DecryptionFailed);
    };
    let tag_size = params.cipher.tag_size;

    if ciphertext.len() < tag_size {
        return Err(RecordError::DecryptionFailed);
    }

    let nonce = tls13_nonce(&params.read.iv, sequence).map_err(|_| RecordError::DecryptionFailed)?;
    let aad = make_tls13_aad(ciphertext.len() as u16);

    let mut plain = ctx
        .open(&nonce, &aad, ciphertext)
        .map_err(|_| RecordError::DecryptionFailed)?;

    // One extra octet allowed for the inner content type.
    if plain.len() > max_decrypted + 1 {
        log::debug!("received packet with illegal length {}", plain.len());
        return Err(RecordError::RecordOverflow);
    }

    let Some((length, type_byte)) = ct_scan_right_nonzero(&plain, safe_padding) else {
        // All-zero inner plaintext: no content type to recover.
        return Err(RecordError::DecryptionFailed);
    };
    let ctype = ContentType::from_u8(type_byte).ok_or(RecordError::UnexpectedPacket)?;
    plain.truncate(length);
    Ok((plain, ctype))
}
