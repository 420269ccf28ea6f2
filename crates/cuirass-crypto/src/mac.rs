//! Incremental and one-shot HMAC over the record MAC algorithms.

use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::{Sha256, Sha384};

use crate::CryptoError;
use crate::ct::ct_eq;
use crate::suite::MacId;

type HmacSha1 = Hmac<Sha1>;
type HmacSha256 = Hmac<Sha256>;
type HmacSha384 = Hmac<Sha384>;

/// Incremental MAC context, constructed per record.
pub enum MacContext {
    Null,
    Sha1(HmacSha1),
    Sha256(HmacSha256),
    Sha384(HmacSha384),
}

impl MacContext {
    /// Key an HMAC context. The null MAC accepts any key (including empty)
    /// and produces an empty tag.
    pub fn new(id: MacId, key: &[u8]) -> Result<Self, CryptoError> {
        match id {
            MacId::Null | MacId::Aead => Ok(MacContext::Null),
            MacId::HmacSha1 => HmacSha1::new_from_slice(key)
                .map(MacContext::Sha1)
                .map_err(|_| CryptoError::InvalidRequest),
            MacId::HmacSha256 => HmacSha256::new_from_slice(key)
                .map(MacContext::Sha256)
                .map_err(|_| CryptoError::InvalidRequest),
            MacId::HmacSha384 => HmacSha384::new_from_slice(key)
                .map(MacContext::Sha384)
                .map_err(|_| CryptoError::InvalidRequest),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        match self {
            MacContext::Null => {}
            MacContext::Sha1(m) => m.update(data),
            MacContext::Sha256(m) => m.update(data),
            MacContext::Sha384(m) => m.update(data),
        }
    }

    /// Finalize and return the tag.
    pub fn finalize(self) -> Vec<u8> {
        match self {
            MacContext::Null => Vec::new(),
            MacContext::Sha1(m) => m.finalize().into_bytes().to_vec(),
            MacContext::Sha256(m) => m.finalize().into_bytes().to_vec(),
            MacContext::Sha384(m) => m.finalize().into_bytes().to_vec(),
        }
    }

    /// Finalize and compare against an expected tag in constant time.
    pub fn verify(self, expected: &[u8]) -> Result<(), CryptoError> {
        let tag = self.finalize();
        if ct_eq(&tag, expected) {
            Ok(())
        } else {
            Err(CryptoError::AuthenticationFailure)
        }
    }
}

/// One-shot HMAC, used for the DTLS cookie.
pub fn hmac_oneshot(id: MacId, key: &[u8], data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let mut ctx = MacContext::new(id, key)?;
    ctx.update(data);
    Ok(ctx.finalize())
}
