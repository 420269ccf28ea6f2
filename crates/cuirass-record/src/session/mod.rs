//! Session state and the surface the handshake layer drives.
//!
//! A session owns the epoch table, the key schedule, the transport, and the
//! typed record buffers. All record-layer transitions for one session are
//! serialized by the single thread driving it; the epoch table's internal
//! mutex exists so a reader thread and a writer thread may touch disjoint
//! epochs.

mod dtls_io;
mod recv;
mod send;

pub use send::CloseRequest;

use cuirass_crypto::suite::{SuiteEntry, suite_by_id};
use rand_core::{CryptoRng, RngCore};
use zeroize::Zeroizing;

use crate::buffers::{DataBuffer, SendQueue};
use crate::config::{Config, Role};
use crate::dtls::cookie::CookiePrestate;
use crate::dtls::flight::FlightState;
use crate::epoch::{EpochRel, EpochTable};
use crate::error::RecordError;
use crate::keys::{KeySchedule, KeylogFn, Stage};
use crate::params::RecordParameters;
use crate::protect::record_overhead;
use crate::transport::Transport;
use crate::wire::ProtocolVersion;

/// Where the send path routes application data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SendState {
    Normal,
    Corked,
    CorkedToKeyUpdate,
    /// 2^24 records went out on one key: stash the payload, then update.
    KeyUpdate1,
    KeyUpdate2,
    KeyUpdate3,
}

pub struct Session<T: Transport, R: RngCore + CryptoRng> {
    pub(crate) cfg: Config,
    pub(crate) transport: T,
    pub(crate) rng: R,
    pub(crate) epochs: EpochTable,
    pub(crate) keys: KeySchedule,
    pub(crate) suite: Option<&'static SuiteEntry>,
    pub(crate) etm_negotiated: bool,
    pub(crate) hrr_sent: bool,

    // Outbound state.
    pub(crate) send_queue: SendQueue,
    pub(crate) send_buffer_user_size: usize,
    pub(crate) rsend_state: SendState,
    pub(crate) presend: Vec<u8>,
    pub(crate) key_update_buffer: Vec<u8>,

    // Inbound state.
    pub(crate) recv_raw: Vec<u8>,
    pub(crate) app_buffer: DataBuffer,
    pub(crate) handshake_buffer: DataBuffer,
    pub(crate) ccs_buffer: DataBuffer,
    pub(crate) heartbeat_buffer: DataBuffer,
    pub(crate) early_recv: DataBuffer,
    pub(crate) early_presend: Vec<u8>,
    pub(crate) early_data_received: usize,

    // Validity and phase flags.
    pub(crate) invalid: bool,
    pub(crate) may_not_read: bool,
    pub(crate) may_not_write: bool,
    pub(crate) read_eof: bool,
    pub(crate) unresumable: bool,
    pub(crate) handshake_in_progress: bool,
    pub(crate) initial_negotiation_completed: bool,
    pub(crate) early_data_in_flight: bool,
    pub(crate) early_data_accepted: bool,
    pub(crate) last_alert: u8,

    // DTLS.
    pub(crate) flight: FlightState,
    pub(crate) hsk_read_seq: u16,
    pub(crate) hsk_write_seq: u16,
    pub(crate) packets_dropped: u64,
}

impl<T: Transport, R: RngCore + CryptoRng> Session<T, R> {
    pub fn new(cfg: Config, transport: T, rng: R) -> Self {
        let epochs = EpochTable::new(cfg.version.is_dtls());
        let keys = KeySchedule::new(cfg.role);
        let retrans = cfg.retrans_timeout_ms;
        Session {
            cfg,
            transport,
            rng,
            epochs,
            keys,
            suite: None,
            etm_negotiated: false,
            hrr_sent: false,
            send_queue: SendQueue::default(),
            send_buffer_user_size: 0,
            rsend_state: SendState::Normal,
            presend: Vec::new(),
            key_update_buffer: Vec::new(),
            recv_raw: Vec::new(),
            app_buffer: DataBuffer::default(),
            handshake_buffer: DataBuffer::default(),
            ccs_buffer: DataBuffer::default(),
            heartbeat_buffer: DataBuffer::default(),
            early_recv: DataBuffer::default(),
            early_presend: Vec::new(),
            early_data_received: 0,
            invalid: false,
            may_not_read: false,
            may_not_write: false,
            read_eof: false,
            unresumable: false,
            handshake_in_progress: true,
            initial_negotiation_completed: false,
            early_data_in_flight: false,
            early_data_accepted: false,
            last_alert: 0,
            flight: FlightState::new(retrans),
            hsk_read_seq: 0,
            hsk_write_seq: 0,
            packets_dropped: 0,
        }
    }

    pub fn role(&self) -> Role {
        self.cfg.role
    }

    pub fn version(&self) -> ProtocolVersion {
        self.cfg.version
    }

    // -- handshake-layer surface -------------------------------------------

    /// Prepare the `next` epoch slot; `null_epoch` fills it with the null
    /// cipher immediately.
    pub fn setup_next_epoch(&mut self, null_epoch: bool) -> Result<(), RecordError> {
        self.epochs.setup_next(null_epoch).map(|_| ())
    }

    /// Bind the negotiated cipher suite to the `next` epoch.
    pub fn set_cipher_suite(&mut self, suite_id: u16, etm: bool) -> Result<(), RecordError> {
        let suite = suite_by_id(suite_id).ok_or(RecordError::UnsupportedAlgorithm)?;
        self.epochs.setup_next(false)?;
        self.epochs.set_cipher_suite(suite, etm, self.hrr_sent)?;
        self.suite = Some(suite);
        self.etm_negotiated = etm;
        self.keys.prf = suite.prf;
        Ok(())
    }

    /// Record that a HelloRetryRequest went out: the next suite binding may
    /// legally repeat.
    pub fn hello_retry_sent(&mut self) {
        self.hrr_sent = true;
    }

    pub fn set_master_secret(&mut self, secret: &[u8]) {
        self.keys.master_secret = Zeroizing::new(secret.to_vec());
    }

    pub fn set_randoms(&mut self, client: [u8; 32], server: [u8; 32]) {
        self.keys.client_random = client;
        self.keys.server_random = server;
    }

    /// TLS 1.3: the secret the next derive stage expands from.
    pub fn set_temp_secret(&mut self, secret: &[u8]) {
        self.keys.secrets.temp_secret = Zeroizing::new(secret.to_vec());
    }

    /// TLS 1.3: transcript hash at the current derivation milestone.
    pub fn set_transcript_hash(&mut self, hash: &[u8]) {
        self.keys.transcript_hash = hash.to_vec();
    }

    /// TLS 1.3 0-RTT: the client early traffic secret.
    pub fn set_early_traffic_secret(&mut self, secret: &[u8]) {
        self.keys.secrets.early_client = Zeroizing::new(secret.to_vec());
    }

    pub fn set_keylog(&mut self, cb: Box<KeylogFn>) {
        self.keys.keylog = Some(cb);
    }

    /// Install keys into the `next` epoch and make it current for reading.
    pub fn read_state_init(&mut self, stage: Stage) -> Result<(), RecordError> {
        let epoch = self.epochs.epoch_next();
        self.keys
            .set_keys(&self.epochs, self.cfg.version, epoch, stage)?;
        self.epochs.set_read_current(epoch);
        Ok(())
    }

    /// Install keys into the `next` epoch and make it current for writing.
    pub fn write_state_init(&mut self, stage: Stage) -> Result<(), RecordError> {
        let epoch = self.epochs.epoch_next();
        self.keys
            .set_keys(&self.epochs, self.cfg.version, epoch, stage)?;
        self.epochs.set_write_current(epoch);
        Ok(())
    }

    /// Advance the epoch counter once both directions moved off `next`.
    pub fn epoch_bump(&mut self) {
        self.epochs.bump_next();
    }

    /// Handshake finished: application traffic may flow, retired epochs can
    /// be collected.
    pub fn handshake_complete(&mut self) {
        self.handshake_in_progress = false;
        self.initial_negotiation_completed = true;
        self.early_data_in_flight = false;
        self.epochs.gc();
    }

    /// Server-side 0-RTT disposition, decided by the handshake layer.
    pub fn set_early_data_state(&mut self, in_flight: bool, accepted: bool) {
        self.early_data_in_flight = in_flight;
        self.early_data_accepted = accepted;
    }

    /// Prepare the `next` epoch as a cipher/MAC clone of an existing one
    /// (TLS 1.2 renegotiation); keys are installed separately.
    pub fn epoch_dup(&mut self, from: EpochRel) -> Result<(), RecordError> {
        self.epochs.dup_from(from)
    }

    /// Per-record byte overhead (header included) under the current write
    /// parameters, at worst-case padding.
    pub fn record_overhead_size(&self) -> usize {
        let header = self.cfg.version.record_header_size();
        match self.epochs.get(EpochRel::WriteCurrent) {
            Ok(shared) => {
                let p = shared.lock();
                header + record_overhead(self.cfg.version, p.cipher, p.mac, true)
            }
            Err(_) => header,
        }
    }

    // -- small accessors ----------------------------------------------------

    /// Bytes of already-decrypted application data waiting in the buffer.
    pub fn check_pending(&self) -> usize {
        self.app_buffer.byte_length()
    }

    /// Datagrams discarded by the DTLS receive path.
    pub fn get_discarded(&self) -> u64 {
        self.packets_dropped
    }

    pub fn set_timeout(&mut self, ms: u32) {
        self.cfg.record_timeout_ms = ms;
    }

    pub fn get_timeout(&self) -> u32 {
        self.cfg.record_timeout_ms
    }

    /// Pop a queued heartbeat payload for the external heartbeat handler.
    pub fn take_heartbeat(&mut self) -> Option<Vec<u8>> {
        self.heartbeat_buffer.pop_packet().map(|p| p.data)
    }

    /// Pop a queued post-handshake handshake message (TLS 1.3 NewSessionTicket,
    /// KeyUpdate, …) for the handshake layer.
    pub fn take_handshake_message(&mut self) -> Option<Vec<u8>> {
        self.handshake_buffer.pop_packet().map(|p| p.data)
    }

    /// The last alert description received.
    pub fn last_alert(&self) -> u8 {
        self.last_alert
    }

    /// Whether the session may still be resumed (no fatal failure seen).
    pub fn is_resumable(&self) -> bool {
        !self.unresumable
    }

    /// DTLS handshake sequence numbers, as preserved across the cookie
    /// exchange and consumed by the handshake layer.
    pub fn handshake_sequences(&self) -> (u16, u16) {
        (self.hsk_read_seq, self.hsk_write_seq)
    }

    /// Import the sequence numbers preserved across the stateless cookie
    /// exchange into this (fresh) session.
    pub fn prestate_set(&mut self, prestate: &CookiePrestate) -> Result<(), RecordError> {
        let shared = self.epochs.get(EpochRel::WriteCurrent)?;
        shared.lock().write.sequence_number = u64::from(prestate.record_seq);
        self.hsk_read_seq = u16::from(prestate.hsk_read_seq);
        self.hsk_write_seq = u16::from(prestate.hsk_write_seq) + 1;
        Ok(())
    }

    // -- internals ----------------------------------------------------------

    pub(crate) fn invalidate(&mut self) {
        self.invalid = true;
    }

    /// Route an error: fatal ones invalidate the session (and make it
    /// non-resumable) before propagating.
    pub(crate) fn fail(&mut self, err: RecordError) -> RecordError {
        if err.is_fatal() {
            self.unresumable = true;
            self.invalidate();
        }
        err
    }

    /// Largest wire-record length field we accept under `params`.
    pub(crate) fn max_wire_recv(&self, params: &RecordParameters) -> usize {
        let mut max = self.cfg.max_record_recv_size;
        // Up to 256 bytes of padding slack, mirrored from the interop
        // allowance for over-padded CBC records.
        if self.cfg.version.tls13_sem()
            || params.cipher.kind == cuirass_crypto::suite::CipherKind::Block
        {
            max += 256;
        }
        if self.cfg.version.tls13_sem() {
            max += 1 + params.cipher.tag_size;
        } else {
            max += record_overhead(self.cfg.version, params.cipher, params.mac, true);
        }
        max
    }

    /// Largest plaintext we may stuff into one record right now.
    pub(crate) fn max_send_plain(&self) -> usize {
        if self.cfg.version.is_dtls() {
            self.cfg.max_record_send_size.min(self.data_mtu())
        } else {
            self.cfg.max_record_send_size
        }
    }

    /// Flush queued wire records into the transport. Returns bytes pushed;
    /// stops (without error-state changes) on `WouldBlock`/`Interrupted`.
    pub(crate) fn flush_send_queue(&mut self) -> Result<usize, RecordError> {
        let mut total = 0;
        loop {
            let Some(front) = self.send_queue.front_mut() else {
                return Ok(total);
            };
            let chunk = front.remaining().to_vec();
            let epoch = front.epoch;
            match self.transport.push(&chunk) {
                Ok(n) => {
                    total += n;
                    self.send_queue.advance_front(n);
                    if n >= chunk.len() {
                        self.send_queue.pop_front();
                        let _ = self.epochs.dec_usage(epoch);
                    } else if n == 0 {
                        return Err(RecordError::PushError);
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Ensure `needed` raw bytes are buffered, waiting up to `ms`
    /// (0 or the indefinite sentinel: block on the transport).
    pub(crate) fn read_buffered(&mut self, needed: usize, ms: u32) -> Result<(), RecordError> {
        use crate::wire::INDEFINITE_TIMEOUT;
        while self.recv_raw.len() < needed {
            if ms != 0 && ms != INDEFINITE_TIMEOUT && !self.cfg.nonblock {
                let ready = self
                    .transport
                    .pull_timeout(ms)
                    .map_err(RecordError::from)?;
                if !ready {
                    return Err(RecordError::Timeout);
                }
            }
            let mut chunk = vec![0u8; 1 << 14];
            let n = self.transport.pull(&mut chunk).map_err(RecordError::from)?;
            if n == 0 {
                return Err(RecordError::PrematureTermination);
            }
            self.recv_raw.extend_from_slice(&chunk[..n]);
        }
        Ok(())
    }

    /// Drop whatever remains of the current datagram (DTLS discard path).
    pub(crate) fn discard_datagram(&mut self) {
        self.recv_raw.clear();
        self.packets_dropped += 1;
    }
}
