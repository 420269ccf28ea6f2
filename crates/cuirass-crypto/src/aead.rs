//! Keyed AEAD contexts.
//!
//! One context lives per direction per epoch; `seal`/`open` take the fully
//! formed nonce and associated data from the protection layer. The tag is
//! always appended to (expected after) the ciphertext.

use aes::Aes128;
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes128Gcm, Aes256Gcm};
use ccm::Ccm;
use ccm::consts::{U12, U16};
use chacha20poly1305::ChaCha20Poly1305;

use crate::CryptoError;
use crate::suite::{CipherId, CipherKind, cipher_entry};

type Aes128Ccm = Ccm<Aes128, U16, U12>;

/// Tagged AEAD context. Dispatch happens once per record on the tag.
pub enum AeadContext {
    Aes128Gcm(Box<Aes128Gcm>),
    Aes256Gcm(Box<Aes256Gcm>),
    Aes128Ccm(Box<Aes128Ccm>),
    Chacha20Poly1305(Box<ChaCha20Poly1305>),
}

impl AeadContext {
    /// Key a context for `id`. The key length must match the descriptor.
    pub fn new(id: CipherId, key: &[u8]) -> Result<Self, CryptoError> {
        let entry = cipher_entry(id);
        if entry.kind != CipherKind::Aead || key.len() != entry.key_size {
            return Err(CryptoError::InvalidRequest);
        }
        match id {
            CipherId::Aes128Gcm => Aes128Gcm::new_from_slice(key)
                .map(|c| AeadContext::Aes128Gcm(Box::new(c)))
                .map_err(|_| CryptoError::InvalidRequest),
            CipherId::Aes256Gcm => Aes256Gcm::new_from_slice(key)
                .map(|c| AeadContext::Aes256Gcm(Box::new(c)))
                .map_err(|_| CryptoError::InvalidRequest),
            CipherId::Aes128Ccm => Aes128Ccm::new_from_slice(key)
                .map(|c| AeadContext::Aes128Ccm(Box::new(c)))
                .map_err(|_| CryptoError::InvalidRequest),
            CipherId::Chacha20Poly1305 => ChaCha20Poly1305::new_from_slice(key)
                .map(|c| AeadContext::Chacha20Poly1305(Box::new(c)))
                .map_err(|_| CryptoError::InvalidRequest),
            _ => Err(CryptoError::InvalidRequest),
        }
    }

    /// Encrypt and authenticate. Returns `ciphertext ‖ tag`.
    pub fn seal(&self, nonce: &[u8], aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if nonce.len() != 12 {
            return Err(CryptoError::InvalidRequest);
        }
        let nonce = GenericArray::from_slice(nonce);
        let payload = Payload {
            msg: plaintext,
            aad,
        };
        let out = match self {
            AeadContext::Aes128Gcm(c) => c.encrypt(nonce, payload),
            AeadContext::Aes256Gcm(c) => c.encrypt(nonce, payload),
            AeadContext::Aes128Ccm(c) => c.encrypt(nonce, payload),
            AeadContext::Chacha20Poly1305(c) => c.encrypt(nonce, payload),
        };
        out.map_err(|_| CryptoError::InternalError)
    }

    /// Verify and decrypt `ciphertext ‖ tag`.
    pub fn open(&self, nonce: &[u8], aad: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if nonce.len() != 12 || ciphertext.len() < 16 {
            return Err(CryptoError::InvalidRequest);
        }
        let nonce = GenericArray::from_slice(nonce);
        let payload = Payload {
            msg: ciphertext,
            aad,
        };
        let out = match self {
            AeadContext::Aes128Gcm(c) => c.decrypt(nonce, payload),
            AeadContext::Aes256Gcm(c) => c.decrypt(nonce, payload),
            AeadContext::Aes128Ccm(c) => c.decrypt(nonce, payload),
            AeadContext::Chacha20Poly1305(c) => c.decrypt(nonce, payload),
        };
        out.map_err(|_| CryptoError::AuthenticationFailure)
    }

    /// Tag length for this context.
    pub fn tag_size(&self) -> usize {
        16
    }
}

impl core::fmt::Debug for AeadContext {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            AeadContext::Aes128Gcm(_) => "Aes128Gcm",
            AeadContext::Aes256Gcm(_) => "Aes256Gcm",
            AeadContext::Aes128Ccm(_) => "Aes128Ccm",
            AeadContext::Chacha20Poly1305(_) => "Chacha20Poly1305",
        };
        f.debug_tuple(name).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(id: CipherId, key_len: usize) {
        let key = vec![0x42u8; key_len];
        let ctx = AeadContext::new(id, &key).unwrap();
        let nonce = [9u8; 12];
        let aad = b"header";
        let sealed = ctx.seal(&nonce, aad, b"payload").unwrap();
        assert_eq!(sealed.len(), 7 + 16);
        let opened = ctx.open(&nonce, aad, &sealed).unwrap();
        assert_eq!(opened, b"payload");
    }

    #[test]
    fn test_roundtrip_all_suites() {
        roundtrip(CipherId::Aes128Gcm, 16);
        roundtrip(CipherId::Aes256Gcm, 32);
        roundtrip(CipherId::Aes128Ccm, 16);
        roundtrip(CipherId::Chacha20Poly1305, 32);
    }

    #[test]
    fn test_tampered_tag_fails() {
        let ctx = AeadContext::new(CipherId::Aes128Gcm, &[1u8; 16]).unwrap();
        let nonce = [0u8; 12];
        let mut sealed = ctx.seal(&nonce, b"", b"secret").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0x80;
        assert_eq!(
            ctx.open(&nonce, b"", &sealed),
            Err(CryptoError::AuthenticationFailure)
        );
    }

    #[test]
    fn test_tampered_aad_fails() {
        let ctx = AeadContext::new(CipherId::Chacha20Poly1305, &[1u8; 32]).unwrap();
        let nonce = [0u8; 12];
        let sealed = ctx.seal(&nonce, b"aad-a", b"secret").unwrap();
        assert_eq!(
            ctx.open(&nonce, b"aad-b", &sealed),
            Err(CryptoError::AuthenticationFailure)
        );
    }

    #[test]
    fn test_wrong_key_size_rejected() {
        assert!(AeadContext::new(CipherId::Aes256Gcm, &[0u8; 16]).is_err());
        assert!(AeadContext::new(CipherId::Aes128Cbc, &[0u8; 16]).is_err());
    }
}
