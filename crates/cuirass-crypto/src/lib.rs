//! # cuirass-crypto
//!
//! Crypto provider adapter for the cuirass record layer.
//!
//! This crate wraps the RustCrypto primitives behind the small set of
//! capabilities the record layer needs per record: keyed AEAD seal/open,
//! per-record CBC encrypt/decrypt, incremental HMAC, and the constant-time
//! helpers required around tag and padding verification.
//!
//! The adapter is stateless with respect to records: nonces, associated data
//! and sequence numbers are built by the protection layer and supplied per
//! call. Buffer sizes are validated against the suite descriptors before any
//! primitive is touched.

pub mod aead;
pub mod block;
pub mod ct;
pub mod mac;
pub mod suite;

use thiserror::Error;

/// Errors surfaced by the crypto provider.
///
/// `AuthenticationFailure` is deliberately carried as a single uniform value:
/// callers map it to their own `DecryptionFailed` without learning which
/// byte differed.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CryptoError {
    /// Context uninitialized, or buffer sizes disagree with the descriptor.
    #[error("invalid crypto request")]
    InvalidRequest,
    /// AEAD tag or MAC verification failed.
    #[error("authentication failure")]
    AuthenticationFailure,
    /// A primitive failed in a way that should not happen with valid inputs.
    #[error("internal crypto error")]
    InternalError,
}
