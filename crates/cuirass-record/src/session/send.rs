//! Send path: protection, flushing, corking, auto-rekey, graceful close.

use rand_core::{CryptoRng, RngCore};

use crate::buffers::MessageBuffer;
use crate::config::Role;
use crate::epoch::EpochRel;
use crate::error::RecordError;
use crate::keys::Stage;
use crate::protect;
use crate::session::{SendState, Session};
use crate::transport::Transport;
use crate::wire::{
    self, ContentType, DTLS10_WIRE, TLS_HANDSHAKE_HEADER_SIZE, alert, handshake,
};

/// How [`Session::bye`] closes the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseRequest {
    /// Send close_notify and wait for the peer's.
    ReadWrite,
    /// Half-close: send close_notify, keep reading.
    Write,
}

impl<T: Transport, R: RngCore + CryptoRng> Session<T, R> {
    /// Protect and transmit one record. The workhorse under every public
    /// send operation and the DTLS flight engine.
    ///
    /// With data already queued from an interrupted send, `flush == true`
    /// resumes that write and reports the byte count of the original
    /// payload; new data must not be supplied until the queue drains.
    pub(crate) fn send_record(
        &mut self,
        ctype: ContentType,
        htype: Option<u8>,
        epoch_rel: EpochRel,
        data: &[u8],
        min_pad: usize,
        flush: bool,
    ) -> Result<usize, RecordError> {
        let shared = self.epochs.get(epoch_rel)?;

        // Refuse to protect data with an incomplete cipher state.
        if !shared.lock().initialized {
            return Err(RecordError::InvalidRequest);
        }

        if self.send_queue.is_empty() && data.is_empty() && min_pad == 0 {
            return Err(RecordError::InvalidRequest);
        }

        // Alerts go out even on a dying session.
        if ctype != ContentType::Alert && (self.invalid || self.may_not_write) {
            return Err(RecordError::InvalidSession);
        }

        // Resume an interrupted write before touching new data.
        if flush && !self.send_queue.is_empty() {
            self.flush_send_queue()?;
            let done = self.send_buffer_user_size;
            self.send_buffer_user_size = 0;
            return Ok(done);
        }

        let max_send = self.max_send_plain();
        let send_size = if data.len() > max_send {
            if self.cfg.version.is_dtls() {
                return Err(RecordError::LargePacket);
            }
            max_send
        } else {
            data.len()
        };

        let is_dtls = self.cfg.version.is_dtls();
        let tls13 = self.cfg.version.tls13_sem();

        let (mut record, epoch, new_sequence) = {
            let mut p = shared.lock();

            // Once the null cipher is gone, TLS 1.3 advertises
            // application_data no matter what rides inside.
            let outer = if tls13 && !p.is_null_cipher() {
                ContentType::ApplicationData.as_u8()
            } else {
                ctype.as_u8()
            };

            // The very first DTLS ClientHello goes out under the legacy
            // version tuple, before anything is negotiated.
            let version_bytes = if is_dtls
                && !self.initial_negotiation_completed
                && htype == Some(handshake::CLIENT_HELLO)
            {
                DTLS10_WIRE
            } else {
                self.cfg.version.wire_bytes()
            };

            log::debug!(
                "REC: preparing packet {}({}) with length {} and min pad {}",
                outer,
                ctype.as_u8(),
                send_size,
                min_pad
            );

            let mut record = Vec::new();
            wire::write_record_header(is_dtls, outer, version_bytes, p.write.sequence_number, &mut record);
            let header_len = record.len();

            let body = protect::encrypt_record(
                &mut p,
                self.cfg.version,
                ctype,
                &data[..send_size],
                min_pad,
                max_send,
                &mut self.rng,
            )?;
            record.extend_from_slice(&body);
            wire::patch_record_length(is_dtls, body.len() as u16, &mut record[..header_len]);

            if let Err(e) = p.write.increment_sequence(is_dtls) {
                drop(p);
                return Err(self.fail(e));
            }
            (record, p.epoch, p.write.sequence_number)
        };

        let record_len = record.len();
        self.epochs.inc_usage(epoch)?;
        self.send_queue.push({
            record.shrink_to_fit();
            MessageBuffer {
                data: record,
                off: 0,
                epoch,
            }
        });
        self.send_buffer_user_size = send_size;

        log::debug!(
            "REC: sent packet {}({}) in epoch {epoch} with length {record_len}",
            ctype.as_u8(),
            ctype.as_u8(),
        );

        // After 2^24 records on one key, schedule an automatic KeyUpdate for
        // the next application send.
        if tls13
            && self.cfg.auto_rekey
            && new_sequence & 0x00ff_ffff == 0x00ff_fffd
            && self.rsend_state == SendState::Normal
        {
            self.rsend_state = SendState::KeyUpdate1;
        }

        if flush {
            self.flush_send_queue()?;
            self.send_buffer_user_size = 0;
        }
        Ok(send_size)
    }

    /// Send application data; semantics of `write(2)` plus record framing.
    pub fn send(&mut self, data: &[u8]) -> Result<usize, RecordError> {
        self.send2(data, 0)
    }

    /// [`send`](Session::send) with an explicit padding request (TLS 1.3).
    pub fn send2(&mut self, data: &[u8], pad: usize) -> Result<usize, RecordError> {
        if !self.initial_negotiation_completed && !self.early_data_in_flight {
            return Err(RecordError::UnavailableDuringHandshake);
        }

        let max_pad = if self.cfg.version.tls13_sem() {
            let params = self.epochs.get(EpochRel::WriteCurrent)?;
            let overhead = {
                let p = params.lock();
                protect::record_overhead(self.cfg.version, p.cipher, p.mac, true)
            };
            self.cfg.max_record_send_size.saturating_sub(overhead)
        } else {
            0
        };
        if pad > max_pad {
            return Err(RecordError::InvalidRequest);
        }

        match self.rsend_state {
            SendState::Normal => self.send_record(
                ContentType::ApplicationData,
                None,
                EpochRel::WriteCurrent,
                data,
                pad,
                true,
            ),
            SendState::Corked | SendState::CorkedToKeyUpdate => self.append_corked(data),
            SendState::KeyUpdate1 => {
                self.key_update_buffer = data.to_vec();
                self.rsend_state = SendState::KeyUpdate2;
                self.continue_key_update_send()
            }
            SendState::KeyUpdate2 | SendState::KeyUpdate3 => self.continue_key_update_send(),
        }
    }

    fn continue_key_update_send(&mut self) -> Result<usize, RecordError> {
        if self.rsend_state == SendState::KeyUpdate2 {
            self.key_update(false)?;
            self.rsend_state = SendState::KeyUpdate3;
        }
        let payload = std::mem::take(&mut self.key_update_buffer);
        let ret = self.send_record(
            ContentType::ApplicationData,
            None,
            EpochRel::WriteCurrent,
            &payload,
            0,
            true,
        );
        match ret {
            Ok(n) => {
                self.rsend_state = SendState::Normal;
                Ok(n)
            }
            Err(e) if !e.is_fatal() => {
                // Retry resumes from the stashed payload.
                self.key_update_buffer = payload;
                Err(e)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    fn append_corked(&mut self, data: &[u8]) -> Result<usize, RecordError> {
        if self.cfg.version.is_dtls() && self.presend.len() + data.len() > self.data_mtu() {
            return Err(RecordError::LargePacket);
        }
        self.presend.extend_from_slice(data);
        Ok(data.len())
    }

    /// Stop emitting records; sends accumulate until [`uncork`](Session::uncork).
    pub fn cork(&mut self) {
        self.rsend_state = match self.rsend_state {
            SendState::KeyUpdate1 | SendState::KeyUpdate2 | SendState::KeyUpdate3 => {
                SendState::CorkedToKeyUpdate
            }
            _ => SendState::Corked,
        };
    }

    /// Flush everything corked. With `wait` the call retries through
    /// transient transport errors; otherwise the residue stays corked.
    pub fn uncork(&mut self, wait: bool) -> Result<usize, RecordError> {
        self.rsend_state = match self.rsend_state {
            SendState::Corked => SendState::Normal,
            SendState::CorkedToKeyUpdate => SendState::KeyUpdate1,
            _ => return Ok(0),
        };

        let mut total = 0;
        while !self.presend.is_empty() {
            let chunk = std::mem::take(&mut self.presend);
            match self.send2(&chunk, 0) {
                Ok(n) => {
                    total += n;
                    self.presend = chunk[n..].to_vec();
                }
                Err(e) if wait && matches!(e, RecordError::WouldBlock | RecordError::Interrupted) => {
                    self.presend = chunk;
                }
                Err(e) => {
                    self.presend = chunk;
                    self.rsend_state = SendState::Corked;
                    return Err(e);
                }
            }
        }
        Ok(total)
    }

    /// Bytes corked but not yet flushed.
    pub fn corked_pending(&self) -> usize {
        self.presend.len()
    }

    /// Throw away any ciphertext queued by an interrupted send. Returns the
    /// byte count discarded.
    pub fn discard_queued(&mut self) -> usize {
        let (bytes, epochs) = self.send_queue.clear();
        for e in epochs {
            let _ = self.epochs.dec_usage(e);
        }
        self.send_buffer_user_size = 0;
        bytes
    }

    /// Emit one handshake message under the current write epoch (the TLS
    /// transmission path for the handshake layer; DTLS goes through the
    /// flight engine instead).
    pub fn send_handshake_message(&mut self, htype: u8, data: &[u8]) -> Result<usize, RecordError> {
        self.send_record(
            ContentType::Handshake,
            Some(htype),
            EpochRel::WriteCurrent,
            data,
            0,
            true,
        )
    }

    /// Emit a heartbeat record; the peer hands it to its heartbeat handler.
    pub fn send_heartbeat(&mut self, payload: &[u8]) -> Result<usize, RecordError> {
        self.send_record(
            ContentType::Heartbeat,
            None,
            EpochRel::WriteCurrent,
            payload,
            0,
            true,
        )
    }

    /// Emit an alert record. Alerts go out even on an invalidated session,
    /// as long as the write side still functions.
    pub fn send_alert(&mut self, level: u8, desc: u8) -> Result<(), RecordError> {
        self.send_record(
            ContentType::Alert,
            None,
            EpochRel::WriteCurrent,
            &[level, desc],
            0,
            true,
        )
        .map(|_| ())
    }

    /// Graceful close: flush pending data, emit close_notify, and for a full
    /// close wait for the peer's close_notify.
    pub fn bye(&mut self, how: CloseRequest) -> Result<(), RecordError> {
        if !self.send_queue.is_empty() {
            self.flush_send_queue()?;
        }

        if !self.may_not_write {
            self.send_alert(alert::LEVEL_WARNING, alert::CLOSE_NOTIFY)?;
            self.may_not_write = true;
        }

        if how == CloseRequest::ReadWrite && !self.read_eof && !self.invalid {
            loop {
                match self.recv_record(ContentType::Alert, None, self.cfg.record_timeout_ms) {
                    Ok(()) if self.read_eof => break,
                    Ok(()) => continue,
                    Err(RecordError::WouldBlock | RecordError::Interrupted) => {
                        return Err(RecordError::WouldBlock);
                    }
                    // The peer hanging up without close_notify still ends
                    // the session; the close we wanted has happened.
                    Err(RecordError::PrematureTermination) => break,
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(())
    }

    // -- TLS 1.3 key update -------------------------------------------------

    /// Rotate our write keys: emit a KeyUpdate handshake message, derive the
    /// next write epoch, and start its sequence at zero.
    pub fn key_update(&mut self, request_peer: bool) -> Result<(), RecordError> {
        if !self.cfg.version.tls13_sem() {
            return Err(RecordError::InvalidRequest);
        }
        let suite = self.suite.ok_or(RecordError::InternalError)?;

        let mut msg = [0u8; TLS_HANDSHAKE_HEADER_SIZE + 1];
        msg[0] = handshake::KEY_UPDATE;
        wire::write_u24(1, &mut msg[1..4]);
        msg[4] = u8::from(request_peer);
        self.send_record(
            ContentType::Handshake,
            Some(handshake::KEY_UPDATE),
            EpochRel::WriteCurrent,
            &msg,
            0,
            true,
        )?;

        self.epochs.setup_next(false)?;
        self.epochs
            .set_cipher_suite(suite, self.etm_negotiated, false)?;
        let epoch = self.epochs.epoch_next();
        self.keys
            .set_keys(&self.epochs, self.cfg.version, epoch, Stage::UpdateOurs)?;
        self.epochs.set_write_current(epoch);
        self.epochs.bump_next();
        self.epochs.gc();
        Ok(())
    }

    /// The handshake layer processed a peer KeyUpdate: rotate our read keys
    /// to follow.
    pub fn peer_key_update_received(&mut self) -> Result<(), RecordError> {
        if !self.cfg.version.tls13_sem() {
            return Err(RecordError::InvalidRequest);
        }
        let suite = self.suite.ok_or(RecordError::InternalError)?;

        self.epochs.setup_next(false)?;
        self.epochs
            .set_cipher_suite(suite, self.etm_negotiated, false)?;
        let epoch = self.epochs.epoch_next();
        self.keys
            .set_keys(&self.epochs, self.cfg.version, epoch, Stage::UpdatePeers)?;
        self.epochs.set_read_current(epoch);
        self.epochs.bump_next();
        self.epochs.gc();
        Ok(())
    }

    // -- 0-RTT --------------------------------------------------------------

    /// Client: queue early application data, bounded by the early-data
    /// budget.
    pub fn send_early_data(&mut self, data: &[u8]) -> Result<usize, RecordError> {
        if self.cfg.role != Role::Client {
            return Err(RecordError::InvalidRequest);
        }
        if self.early_presend.len() + data.len() > self.cfg.max_early_data_size {
            return Err(RecordError::RecordLimitReached);
        }
        self.early_presend.extend_from_slice(data);
        Ok(data.len())
    }

    /// Client: emit queued early data under the (armed) early-data epoch.
    pub fn flush_early_data(&mut self) -> Result<usize, RecordError> {
        if self.early_presend.is_empty() {
            return Ok(0);
        }
        let data = std::mem::take(&mut self.early_presend);
        let mut sent = 0;
        while sent < data.len() {
            let n = self.send_record(
                ContentType::ApplicationData,
                None,
                EpochRel::WriteCurrent,
                &data[sent..],
                0,
                true,
            )?;
            sent += n;
        }
        Ok(sent)
    }
}
