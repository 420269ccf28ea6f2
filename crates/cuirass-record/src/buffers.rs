//! Record-sized message buffers and the typed queues between the I/O loop
//! and the application.

use std::collections::VecDeque;

// ---------------------------------------------------------------------------
// Outbound message buffer
// ---------------------------------------------------------------------------

/// One wire record (header + protected payload) waiting to be pushed.
#[derive(Debug, Clone)]
pub struct MessageBuffer {
    /// Complete record bytes: header then ciphertext.
    pub data: Vec<u8>,
    /// Bytes already accepted by the transport (partial-write resume point).
    pub off: usize,
    /// Epoch whose refcount this buffer pins until flushed.
    pub epoch: u16,
}

impl MessageBuffer {
    pub fn remaining(&self) -> &[u8] {
        &self.data[self.off..]
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// FIFO of records pending transmission. Mirrors the classic
/// "record send buffer": encryption happened already, only transport
/// progress is outstanding.
#[derive(Debug, Default)]
pub struct SendQueue {
    queue: VecDeque<MessageBuffer>,
    byte_length: usize,
}

impl SendQueue {
    pub fn push(&mut self, buf: MessageBuffer) {
        self.byte_length += buf.data.len() - buf.off;
        self.queue.push_back(buf);
    }

    pub fn front_mut(&mut self) -> Option<&mut MessageBuffer> {
        self.queue.front_mut()
    }

    pub fn pop_front(&mut self) -> Option<MessageBuffer> {
        let buf = self.queue.pop_front()?;
        self.byte_length -= buf.data.len() - buf.off;
        Some(buf)
    }

    /// Note `n` more bytes of the front buffer were accepted.
    pub fn advance_front(&mut self, n: usize) {
        if let Some(front) = self.queue.front_mut() {
            front.off += n;
            self.byte_length -= n;
        }
    }

    /// Drop everything, returning the byte count discarded and the epochs
    /// the dropped buffers were pinning.
    pub fn clear(&mut self) -> (usize, Vec<u16>) {
        let bytes = self.byte_length;
        let epochs = self.queue.iter().map(|b| b.epoch).collect();
        self.queue.clear();
        self.byte_length = 0;
        (bytes, epochs)
    }

    pub fn byte_length(&self) -> usize {
        self.byte_length
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Inbound typed buffers
// ---------------------------------------------------------------------------

/// One decrypted record as delivered to a typed buffer.
#[derive(Debug, Clone)]
pub struct Packet {
    pub data: Vec<u8>,
    /// Record sequence number, big-endian order as it appeared on the wire
    /// (DTLS: includes the epoch in the top 16 bits).
    pub sequence: u64,
}

/// Per-content-type receive queue. `recv` drains bytes across packet
/// boundaries; `recv_packet` pops whole packets.
#[derive(Debug, Default)]
pub struct DataBuffer {
    packets: VecDeque<Packet>,
    byte_length: usize,
}

impl DataBuffer {
    pub fn push(&mut self, data: Vec<u8>, sequence: u64) {
        self.byte_length += data.len();
        self.packets.push_back(Packet { data, sequence });
    }

    /// Copy up to `out.len()` bytes into `out`, consuming partial packets,
    /// and return the count plus the sequence of the first packet touched.
    pub fn read_bytes(&mut self, out: &mut [u8]) -> (usize, Option<u64>) {
        let mut copied = 0;
        let mut first_seq = None;
        while copied < out.len() {
            let Some(front) = self.packets.front_mut() else {
                break;
            };
            if first_seq.is_none() {
                first_seq = Some(front.sequence);
            }
            let n = (out.len() - copied).min(front.data.len());
            out[copied..copied + n].copy_from_slice(&front.data[..n]);
            front.data.drain(..n);
            copied += n;
            self.byte_length -= n;
            if front.data.is_empty() {
                self.packets.pop_front();
            }
        }
        (copied, first_seq)
    }

    pub fn pop_packet(&mut self) -> Option<Packet> {
        let p = self.packets.pop_front()?;
        self.byte_length -= p.data.len();
        Some(p)
    }

    pub fn byte_length(&self) -> usize {
        self.byte_length
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    pub fn clear(&mut self) {
        self.packets.clear();
        self.byte_length = 0;
    }
}
