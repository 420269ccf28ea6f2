//! In-memory loopback transports.
//!
//! Both pipes are non-blocking: an empty queue yields `WouldBlock` from
//! `pull` and `Ok(false)` from `pull_timeout`, so tests drive the two
//! endpoints alternately without threads. The datagram pipe preserves
//! message boundaries and can drop or duplicate datagrams to simulate a
//! lossy path.

use std::collections::VecDeque;
use std::sync::Arc;

use cuirass_record::transport::{Transport, TransportError};
use parking_lot::Mutex;

// ---------------------------------------------------------------------------
// Stream pipe
// ---------------------------------------------------------------------------

#[derive(Default)]
struct StreamState {
    a_to_b: VecDeque<u8>,
    b_to_a: VecDeque<u8>,
    a_closed: bool,
    b_closed: bool,
}

/// One end of a bidirectional in-memory byte stream. Clones share the
/// underlying pipe, which lets a test keep an inspection handle while the
/// session owns the transport.
#[derive(Clone)]
pub struct StreamEnd {
    state: Arc<Mutex<StreamState>>,
    is_a: bool,
}

/// A connected pair of stream endpoints.
pub fn stream_pair() -> (StreamEnd, StreamEnd) {
    let state = Arc::new(Mutex::new(StreamState::default()));
    (
        StreamEnd {
            state: state.clone(),
            is_a: true,
        },
        StreamEnd { state, is_a: false },
    )
}

impl StreamEnd {
    /// Copy of the bytes queued toward the peer (wire inspection).
    pub fn queued_to_peer(&self) -> Vec<u8> {
        let s = self.state.lock();
        let q = if self.is_a { &s.a_to_b } else { &s.b_to_a };
        q.iter().copied().collect()
    }

    /// Corrupt one queued byte on its way to the peer.
    pub fn flip_queued_bit(&self, offset: usize) {
        let mut s = self.state.lock();
        let q = if self.is_a { &mut s.a_to_b } else { &mut s.b_to_a };
        if let Some(b) = q.get_mut(offset) {
            *b ^= 0x40;
        }
    }

    /// Close our write direction; the peer reads EOF after draining.
    pub fn close(&mut self) {
        let mut s = self.state.lock();
        if self.is_a {
            s.a_closed = true;
        } else {
            s.b_closed = true;
        }
    }
}

impl Transport for StreamEnd {
    fn push(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        let mut s = self.state.lock();
        let q = if self.is_a { &mut s.a_to_b } else { &mut s.b_to_a };
        q.extend(data.iter().copied());
        Ok(data.len())
    }

    fn pull(&mut self, out: &mut [u8]) -> Result<usize, TransportError> {
        let mut s = self.state.lock();
        let peer_closed = if self.is_a { s.b_closed } else { s.a_closed };
        let q = if self.is_a { &mut s.b_to_a } else { &mut s.a_to_b };
        if q.is_empty() {
            return if peer_closed {
                Ok(0)
            } else {
                Err(TransportError::WouldBlock)
            };
        }
        let n = out.len().min(q.len());
        for b in out.iter_mut().take(n) {
            *b = q.pop_front().unwrap_or(0);
        }
        Ok(n)
    }

    fn pull_timeout(&mut self, _ms: u32) -> Result<bool, TransportError> {
        let s = self.state.lock();
        let (q, peer_closed) = if self.is_a {
            (&s.b_to_a, s.b_closed)
        } else {
            (&s.a_to_b, s.a_closed)
        };
        Ok(!q.is_empty() || peer_closed)
    }
}

// ---------------------------------------------------------------------------
// Datagram pipe
// ---------------------------------------------------------------------------

#[derive(Default)]
struct DatagramState {
    a_to_b: VecDeque<Vec<u8>>,
    b_to_a: VecDeque<Vec<u8>>,
    /// Datagrams from A still to be dropped.
    drop_from_a: usize,
    /// Datagrams from B still to be dropped.
    drop_from_b: usize,
}

/// One end of a bidirectional in-memory datagram channel. Clones share the
/// underlying channel.
#[derive(Clone)]
pub struct DatagramEnd {
    state: Arc<Mutex<DatagramState>>,
    is_a: bool,
}

/// A connected pair of datagram endpoints.
pub fn datagram_pair() -> (DatagramEnd, DatagramEnd) {
    let state = Arc::new(Mutex::new(DatagramState::default()));
    (
        DatagramEnd {
            state: state.clone(),
            is_a: true,
        },
        DatagramEnd { state, is_a: false },
    )
}

impl DatagramEnd {
    /// Drop the next `n` datagrams this end sends.
    pub fn drop_next(&self, n: usize) {
        let mut s = self.state.lock();
        if self.is_a {
            s.drop_from_a += n;
        } else {
            s.drop_from_b += n;
        }
    }

    /// Re-inject a copy of a previously delivered datagram (replay attack).
    pub fn replay_to_peer(&self, datagram: Vec<u8>) {
        let mut s = self.state.lock();
        if self.is_a {
            s.a_to_b.push_back(datagram);
        } else {
            s.b_to_a.push_back(datagram);
        }
    }

    /// Drop every datagram currently queued toward the peer.
    pub fn clear_to_peer(&self) {
        let mut s = self.state.lock();
        if self.is_a {
            s.a_to_b.clear();
        } else {
            s.b_to_a.clear();
        }
    }

    /// Peek a copy of every datagram currently queued toward the peer.
    pub fn queued_to_peer(&self) -> Vec<Vec<u8>> {
        let s = self.state.lock();
        let q = if self.is_a { &s.a_to_b } else { &s.b_to_a };
        q.iter().cloned().collect()
    }
}

impl Transport for DatagramEnd {
    fn push(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        let mut s = self.state.lock();
        if self.is_a {
            if s.drop_from_a > 0 {
                s.drop_from_a -= 1;
                return Ok(data.len());
            }
            s.a_to_b.push_back(data.to_vec());
        } else {
            if s.drop_from_b > 0 {
                s.drop_from_b -= 1;
                return Ok(data.len());
            }
            s.b_to_a.push_back(data.to_vec());
        }
        Ok(data.len())
    }

    fn pull(&mut self, out: &mut [u8]) -> Result<usize, TransportError> {
        let mut s = self.state.lock();
        let q = if self.is_a { &mut s.b_to_a } else { &mut s.a_to_b };
        let Some(datagram) = q.pop_front() else {
            return Err(TransportError::WouldBlock);
        };
        let n = out.len().min(datagram.len());
        out[..n].copy_from_slice(&datagram[..n]);
        Ok(n)
    }

    fn pull_timeout(&mut self, _ms: u32) -> Result<bool, TransportError> {
        let s = self.state.lock();
        let q = if self.is_a { &s.b_to_a } else { &s.a_to_b };
        Ok(!q.is_empty())
    }
}
