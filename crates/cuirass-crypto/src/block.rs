//! Per-record CBC encryption and decryption.
//!
//! TLS block suites rekey the chaining state every record via the explicit
//! IV, so a fresh mode context is built from `(key, iv)` per call and the
//! transform runs in place over whole blocks. Padding bytes are produced and
//! checked by the protection layer, not here.

use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, block_padding::NoPadding};
use aes::{Aes128, Aes256};

use crate::CryptoError;
use crate::suite::{CipherId, cipher_entry};

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;
type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

fn check_args(id: CipherId, key: &[u8], iv: &[u8], buf: &[u8]) -> Result<(), CryptoError> {
    let entry = cipher_entry(id);
    if key.len() != entry.key_size || iv.len() != entry.iv_size {
        return Err(CryptoError::InvalidRequest);
    }
    if buf.is_empty() || buf.len() % entry.block_size != 0 {
        return Err(CryptoError::InvalidRequest);
    }
    Ok(())
}

/// CBC-encrypt `buf` in place. `buf` must be a whole number of blocks.
pub fn cbc_encrypt(
    id: CipherId,
    key: &[u8],
    iv: &[u8],
    buf: &mut [u8],
) -> Result<(), CryptoError> {
    check_args(id, key, iv, buf)?;
    let len = buf.len();
    match id {
        CipherId::Aes128Cbc => Aes128CbcEnc::new_from_slices(key, iv)
            .map_err(|_| CryptoError::InvalidRequest)?
            .encrypt_padded_mut::<NoPadding>(buf, len)
            .map_err(|_| CryptoError::InternalError)?,
        CipherId::Aes256Cbc => Aes256CbcEnc::new_from_slices(key, iv)
            .map_err(|_| CryptoError::InvalidRequest)?
            .encrypt_padded_mut::<NoPadding>(buf, len)
            .map_err(|_| CryptoError::InternalError)?,
        _ => return Err(CryptoError::InvalidRequest),
    };
    Ok(())
}

/// CBC-decrypt `buf` in place. `buf` must be a whole number of blocks.
pub fn cbc_decrypt(
    id: CipherId,
    key: &[u8],
    iv: &[u8],
    buf: &mut [u8],
) -> Result<(), CryptoError> {
    check_args(id, key, iv, buf)?;
    match id {
        CipherId::Aes128Cbc => Aes128CbcDec::new_from_slices(key, iv)
            .map_err(|_| CryptoError::InvalidRequest)?
            .decrypt_padded_mut::<NoPadding>(buf)
            .map_err(|_| CryptoError::InternalError)?,
        CipherId::Aes256Cbc => Aes256CbcDec::new_from_slices(key, iv)
            .map_err(|_| CryptoError::InvalidRequest)?
            .decrypt_padded_mut::<NoPadding>(buf)
            .map_err(|_| CryptoError::InternalError)?,
        _ => return Err(CryptoError::InvalidRequest),
    };
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_aes128() {
        let key = [0x11u8; 16];
        let iv = [0x22u8; 16];
        let plain = *b"0123456789abcdef0123456789abcdef";
        let mut buf = plain;
        cbc_encrypt(CipherId::Aes128Cbc, &key, &iv, &mut buf).unwrap();
        assert_ne!(buf, plain);
        cbc_decrypt(CipherId::Aes128Cbc, &key, &iv, &mut buf).unwrap();
        assert_eq!(buf, plain);
    }

    #[test]
    fn test_partial_block_rejected() {
        let key = [0u8; 16];
        let iv = [0u8; 16];
        let mut buf = [0u8; 17];
        assert_eq!(
            cbc_encrypt(CipherId::Aes128Cbc, &key, &iv, &mut buf),
            Err(CryptoError::InvalidRequest)
        );
    }

    #[test]
    fn test_key_size_mismatch_rejected() {
        let iv = [0u8; 16];
        let mut buf = [0u8; 16];
        assert_eq!(
            cbc_encrypt(CipherId::Aes256Cbc, &[0u8; 16], &iv, &mut buf),
            Err(CryptoError::InvalidRequest)
        );
    }

    #[test]
    fn test_non_block_cipher_rejected() {
        let mut buf = [0u8; 16];
        assert_eq!(
            cbc_encrypt(CipherId::Aes128Gcm, &[0u8; 16], &[0u8; 12], &mut buf),
            Err(CryptoError::InvalidRequest)
        );
    }
}
