//! Record-layer error taxonomy.
//!
//! Every public operation returns `Result<_, RecordError>`. The split that
//! matters operationally is [`RecordError::is_fatal`]: non-fatal errors leave
//! the session state untouched and the caller retries with identical
//! arguments; fatal errors flip the session-invalid flag checked at the top
//! of every entry point.

use cuirass_crypto::CryptoError;
use thiserror::Error;

use crate::transport::TransportError;
use crate::wire::alert;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RecordError {
    // -- transient ---------------------------------------------------------
    /// The transport cannot make progress right now; retry the same call.
    #[error("operation would block")]
    WouldBlock,
    /// The transport was interrupted; retry the same call.
    #[error("operation interrupted")]
    Interrupted,
    /// The per-call receive deadline or the DTLS total timeout expired.
    #[error("timed out")]
    Timeout,
    /// More consecutive empty records than the anti-exhaustion cap allows.
    #[error("too many empty records")]
    TooManyEmptyRecords,

    // -- framing -----------------------------------------------------------
    #[error("unexpected packet length")]
    UnexpectedPacketLength,
    #[error("unsupported record version")]
    UnsupportedVersion,
    #[error("record overflow")]
    RecordOverflow,
    #[error("unexpected packet")]
    UnexpectedPacket,
    /// DTLS payload exceeds the data MTU.
    #[error("packet too large for a datagram")]
    LargePacket,
    /// Transport closed mid-record without a close_notify.
    #[error("premature termination")]
    PrematureTermination,

    // -- cryptographic -----------------------------------------------------
    /// AEAD tag, MAC, or padding verification failed. Deliberately uniform.
    #[error("decryption failed")]
    DecryptionFailed,
    #[error("encryption failed")]
    EncryptionFailed,
    #[error("bad cookie")]
    BadCookie,

    // -- state -------------------------------------------------------------
    /// API misuse: uninitialized epoch, out-of-range argument, wrong role.
    #[error("invalid request")]
    InvalidRequest,
    /// The session was invalidated by an earlier fatal error.
    #[error("session is invalid")]
    InvalidSession,
    #[error("operation unavailable until the handshake completes")]
    UnavailableDuringHandshake,
    /// The peer asked for a new handshake; policy belongs to the caller.
    #[error("rehandshake requested by peer")]
    Rehandshake,
    /// Application data arrived while a handshake message was expected.
    #[error("application data received during handshake")]
    GotApplicationData,
    #[error("record sequence limit reached")]
    RecordLimitReached,
    /// No early data was received (or the suite forbids it).
    #[error("requested data not available")]
    NotAvailable,
    #[error("unsupported algorithm")]
    UnsupportedAlgorithm,

    // -- fatal-session -----------------------------------------------------
    #[error("internal error")]
    InternalError,
    #[error("warning alert received ({0})")]
    WarningAlert(u8),
    #[error("fatal alert received ({0})")]
    FatalAlert(u8),
    #[error("transport push failed")]
    PushError,
    #[error("transport pull failed")]
    PullError,
}

impl RecordError {
    /// Whether this error invalidates the session.
    ///
    /// Non-fatal errors never alter session state; a subsequent call with
    /// the same arguments resumes where the previous one stopped.
    pub fn is_fatal(self) -> bool {
        !matches!(
            self,
            RecordError::WouldBlock
                | RecordError::Interrupted
                | RecordError::Timeout
                | RecordError::Rehandshake
                | RecordError::GotApplicationData
                | RecordError::WarningAlert(_)
                | RecordError::NotAvailable
                | RecordError::LargePacket
                | RecordError::InvalidRequest
                | RecordError::UnavailableDuringHandshake
                | RecordError::BadCookie
        )
    }

    /// The alert description a peer should see for this failure, if any.
    /// Values are the stable on-the-wire codes.
    pub fn to_alert(self) -> Option<u8> {
        match self {
            RecordError::DecryptionFailed => Some(alert::BAD_RECORD_MAC),
            RecordError::RecordOverflow => Some(alert::RECORD_OVERFLOW),
            RecordError::UnexpectedPacket | RecordError::GotApplicationData => {
                Some(alert::UNEXPECTED_MESSAGE)
            }
            RecordError::UnexpectedPacketLength => Some(alert::DECODE_ERROR),
            RecordError::UnsupportedVersion => Some(alert::PROTOCOL_VERSION),
            RecordError::RecordLimitReached
            | RecordError::InternalError
            | RecordError::EncryptionFailed
            | RecordError::TooManyEmptyRecords => Some(alert::INTERNAL_ERROR),
            RecordError::Rehandshake => Some(alert::NO_RENEGOTIATION),
            _ => None,
        }
    }
}

impl From<CryptoError> for RecordError {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::InvalidRequest => RecordError::InvalidRequest,
            CryptoError::AuthenticationFailure => RecordError::DecryptionFailed,
            CryptoError::InternalError => RecordError::InternalError,
        }
    }
}

impl From<TransportError> for RecordError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::WouldBlock => RecordError::WouldBlock,
            TransportError::Interrupted => RecordError::Interrupted,
            TransportError::Closed => RecordError::PrematureTermination,
            TransportError::Failed => RecordError::PullError,
        }
    }
}
