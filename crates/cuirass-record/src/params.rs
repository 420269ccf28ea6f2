//! Per-epoch record parameters: one set of cryptographic state for each of
//! the read and write directions, plus the DTLS anti-replay window.

use cuirass_crypto::aead::AeadContext;
use cuirass_crypto::suite::{CIPHER_NULL, CipherEntry, CipherKind, MAC_NULL, MacEntry};
use zeroize::Zeroizing;

use crate::dtls::window::ReplayWindow;
use crate::error::RecordError;
use crate::wire::DTLS_SEQ_MASK;

/// Cipher state of one direction once keys are installed.
///
/// CBC and HMAC contexts are rebuilt per record from the stored key
/// material (the explicit IV rekeys the chain anyway); AEAD contexts are
/// keyed once here and reused.
#[derive(Debug)]
pub enum RecordContext {
    /// No keys installed yet.
    Uninit,
    /// Null cipher: identity transform, MAC per the slot's MAC descriptor.
    Null,
    /// Block or stream suite; per-record contexts come from `key`/`mac_key`.
    Composite,
    /// Keyed AEAD.
    Aead(AeadContext),
}

/// Keys, IV and sequence state for one direction of one epoch.
#[derive(Debug)]
pub struct DirectionState {
    pub key: Zeroizing<Vec<u8>>,
    pub mac_key: Zeroizing<Vec<u8>>,
    pub iv: Zeroizing<Vec<u8>>,
    /// Next sequence number to assign (DTLS: epoch in the top 16 bits).
    pub sequence_number: u64,
    pub ctx: RecordContext,
}

impl Default for DirectionState {
    fn default() -> Self {
        DirectionState {
            key: Zeroizing::new(Vec::new()),
            mac_key: Zeroizing::new(Vec::new()),
            iv: Zeroizing::new(Vec::new()),
            sequence_number: 0,
            ctx: RecordContext::Uninit,
        }
    }
}

impl DirectionState {
    /// Build the direction's cipher context from the installed key material.
    pub fn init_context(&mut self, cipher: &'static CipherEntry) -> Result<(), RecordError> {
        self.ctx = match cipher.kind {
            CipherKind::Aead => RecordContext::Aead(AeadContext::new(cipher.id, &self.key)?),
            CipherKind::Block => {
                if self.key.len() != cipher.key_size {
                    return Err(RecordError::InvalidRequest);
                }
                RecordContext::Composite
            }
            CipherKind::Stream => {
                if cipher.key_size == 0 {
                    RecordContext::Null
                } else {
                    RecordContext::Composite
                }
            }
        };
        Ok(())
    }

    /// Increment the sequence number. TLS exhausts at 2^64, DTLS at 2^48
    /// within the epoch; either way the session must not send again.
    pub fn increment_sequence(&mut self, is_dtls: bool) -> Result<(), RecordError> {
        if is_dtls {
            if self.sequence_number & DTLS_SEQ_MASK == DTLS_SEQ_MASK {
                return Err(RecordError::RecordLimitReached);
            }
            self.sequence_number += 1;
        } else {
            self.sequence_number = self
                .sequence_number
                .checked_add(1)
                .ok_or(RecordError::RecordLimitReached)?;
        }
        Ok(())
    }
}

/// One epoch slot. Owned by the epoch table; buffered outbound records pin
/// it through `usage_count` until their datagram is flushed.
#[derive(Debug)]
pub struct RecordParameters {
    pub epoch: u16,
    pub cipher: &'static CipherEntry,
    pub mac: &'static MacEntry,
    /// Encrypt-then-MAC was negotiated for this epoch's block suites.
    pub etm: bool,
    pub initialized: bool,
    pub usage_count: u32,
    pub read: DirectionState,
    pub write: DirectionState,
    pub window: ReplayWindow,
}

impl RecordParameters {
    /// A freshly allocated slot with no suite bound.
    pub fn new(epoch: u16) -> Self {
        RecordParameters {
            epoch,
            cipher: &CIPHER_NULL,
            mac: &MAC_NULL,
            etm: false,
            initialized: false,
            usage_count: 0,
            read: DirectionState::default(),
            write: DirectionState::default(),
            window: ReplayWindow::default(),
        }
    }

    /// The null-cipher epoch used before the first key change: framing
    /// applies, protection is the identity.
    pub fn new_null(epoch: u16) -> Self {
        let mut p = RecordParameters::new(epoch);
        p.read.ctx = RecordContext::Null;
        p.write.ctx = RecordContext::Null;
        p.initialized = true;
        p
    }

    pub fn is_null_cipher(&self) -> bool {
        self.cipher.key_size == 0 && matches!(self.cipher.kind, CipherKind::Stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cuirass_crypto::suite::{CipherId, cipher_entry};

    #[test]
    fn test_null_slot_is_initialized() {
        let p = RecordParameters::new_null(0);
        assert!(p.initialized);
        assert!(p.is_null_cipher());
        assert_eq!(p.epoch, 0);
    }

    #[test]
    fn test_tls_sequence_limit() {
        let mut d = DirectionState {
            sequence_number: u64::MAX,
            ..Default::default()
        };
        assert_eq!(
            d.increment_sequence(false),
            Err(RecordError::RecordLimitReached)
        );
    }

    #[test]
    fn test_dtls_sequence_limit_preserves_epoch() {
        let mut d = DirectionState {
            sequence_number: (3u64 << 48) | 7,
            ..Default::default()
        };
        d.increment_sequence(true).unwrap();
        assert_eq!(d.sequence_number, (3u64 << 48) | 8);

        d.sequence_number = (3u64 << 48) | DTLS_SEQ_MASK;
        assert_eq!(
            d.increment_sequence(true),
            Err(RecordError::RecordLimitReached)
        );
    }

    #[test]
    fn test_init_context_checks_key_size() {
        let mut d = DirectionState::default();
        assert!(d.init_context(cipher_entry(CipherId::Aes128Gcm)).is_err());

        d.key = Zeroizing::new(vec![0u8; 16]);
        d.init_context(cipher_entry(CipherId::Aes128Gcm)).unwrap();
        assert!(matches!(d.ctx, RecordContext::Aead(_)));

        d.init_context(cipher_entry(CipherId::Aes128Cbc)).unwrap();
        assert!(matches!(d.ctx, RecordContext::Composite));
    }
}
