//! The transport boundary.
//!
//! The record layer never touches sockets; it pushes and pulls bytes through
//! this trait and suspends only here. `WouldBlock`/`Interrupted` are the two
//! recoverable outcomes: the caller retries the same record-layer call and
//! buffered state resumes it.

use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport would block")]
    WouldBlock,
    #[error("transport interrupted")]
    Interrupted,
    #[error("transport closed")]
    Closed,
    #[error("transport failed")]
    Failed,
}

/// Byte transport under a session.
///
/// Stream transports (TLS) may accept or return partial byte counts;
/// datagram transports (DTLS) must push whole datagrams and return whole
/// datagrams from `pull`.
pub trait Transport {
    /// Write bytes toward the peer. Returns the number accepted.
    fn push(&mut self, data: &[u8]) -> Result<usize, TransportError>;

    /// Read available bytes. `Ok(0)` means end of stream.
    fn pull(&mut self, out: &mut [u8]) -> Result<usize, TransportError>;

    /// Wait up to `ms` milliseconds for readability. Returns whether data is
    /// ready. `ms == 0` polls.
    fn pull_timeout(&mut self, ms: u32) -> Result<bool, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo(Vec<u8>);

    impl Transport for Echo {
        fn push(&mut self, data: &[u8]) -> Result<usize, TransportError> {
            self.0.extend_from_slice(data);
            Ok(data.len())
        }
        fn pull(&mut self, out: &mut [u8]) -> Result<usize, TransportError> {
            let n = out.len().min(self.0.len());
            if n == 0 {
                return Err(TransportError::WouldBlock);
            }
            out[..n].copy_from_slice(&self.0[..n]);
            self.0.drain(..n);
            Ok(n)
        }
        fn pull_timeout(&mut self, _ms: u32) -> Result<bool, TransportError> {
            Ok(!self.0.is_empty())
        }
    }

    #[test]
    fn test_object_safety_and_roundtrip() {
        let mut t: Box<dyn Transport> = Box::new(Echo(Vec::new()));
        assert_eq!(t.push(b"abc").unwrap(), 3);
        assert!(t.pull_timeout(0).unwrap());
        let mut buf = [0u8; 8];
        assert_eq!(t.pull(&mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], b"abc");
        assert_eq!(t.pull(&mut buf), Err(TransportError::WouldBlock));
    }
}
