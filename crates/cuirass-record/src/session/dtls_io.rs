//! DTLS flight transmission and retransmission on a session.

use std::time::Instant;

use rand_core::{CryptoRng, RngCore};

use crate::dtls;
use crate::dtls::flight::{FlightMessage, fragment_message, is_last_flight_type};
use crate::epoch::EpochRel;
use crate::error::RecordError;
use crate::session::Session;
use crate::transport::Transport;
use crate::wire::{ContentType, DTLS_RECORD_HEADER_SIZE, handshake};

impl<T: Transport, R: RngCore + CryptoRng> Session<T, R> {
    /// Application-data budget of one datagram under the current write
    /// epoch.
    pub fn get_data_mtu(&self) -> usize {
        self.data_mtu()
    }

    pub(crate) fn data_mtu(&self) -> usize {
        if !self.cfg.version.is_dtls() {
            return self.cfg.max_record_send_size;
        }
        let (cipher, mac, etm) = if self.initial_negotiation_completed {
            match self.epochs.get(EpochRel::WriteCurrent) {
                Ok(shared) => {
                    let p = shared.lock();
                    if p.is_null_cipher() {
                        (None, None, false)
                    } else {
                        (Some(p.cipher), Some(p.mac), p.etm)
                    }
                }
                Err(_) => (None, None, false),
            }
        } else {
            (None, None, false)
        };
        dtls::data_mtu(self.cfg.mtu, self.cfg.version, cipher, mac, etm)
    }

    pub fn set_mtu(&mut self, mtu: usize) {
        self.cfg.mtu = mtu;
    }

    pub fn get_mtu(&self) -> usize {
        self.cfg.mtu
    }

    /// Configure the retransmission and total handshake timeouts.
    pub fn set_dtls_timeouts(&mut self, retrans_ms: u32, total_ms: u32) {
        self.cfg.retrans_timeout_ms = retrans_ms;
        self.cfg.total_timeout_ms = total_ms;
        self.flight.reset_timer(retrans_ms);
    }

    /// Milliseconds until the retransmission timer next fires.
    pub fn get_dtls_timeout(&self) -> u32 {
        let window = u128::from(self.flight.actual_retrans_timeout_ms);
        match self.flight.since_last_transmit() {
            Some(elapsed) if elapsed < window => (window - elapsed) as u32,
            Some(_) => 0,
            None => self.flight.actual_retrans_timeout_ms,
        }
    }

    /// Buffer one outgoing handshake message (or CCS) into the current
    /// flight. Handshake messages consume a handshake sequence number; the
    /// message is pinned to the current write epoch until acknowledged.
    pub fn queue_flight_message(
        &mut self,
        ctype: ContentType,
        htype: u8,
        data: Vec<u8>,
    ) -> Result<(), RecordError> {
        let epoch = self.epochs.epoch_write();
        self.epochs.inc_usage(epoch)?;

        let handshake_seq = if ctype == ContentType::Handshake {
            let seq = self.hsk_write_seq;
            self.hsk_write_seq += 1;
            seq
        } else {
            0
        };

        self.flight.enqueue(FlightMessage {
            ctype,
            htype,
            handshake_seq,
            epoch,
            data,
        });
        Ok(())
    }

    /// Transmit (or retransmit) the buffered flight and wait for its
    /// implicit acknowledgement: the first message of the peer's next
    /// flight. The last flight (Finished) cannot be acknowledged and returns
    /// immediately with its async retransmission timer armed.
    pub fn dtls_transmit(&mut self) -> Result<(), RecordError> {
        // Non-blocking sessions poll: if a retransmission is not due yet and
        // nothing arrived, bounce back to the caller.
        if self.flight.flight_init && self.cfg.nonblock {
            self.flush_send_queue()?;

            if !self.flight.last_flight || !self.flight.async_timer {
                match self.transport.pull_timeout(0) {
                    Ok(true) => {
                        if self.next_flight_arrived()? {
                            self.end_flight();
                            return Ok(());
                        }
                    }
                    Ok(false) => {
                        let window = u128::from(self.flight.actual_retrans_timeout_ms);
                        if self.flight.since_last_transmit().unwrap_or(u128::MAX) < window {
                            return Err(self.dtls_again_or_timeout());
                        }
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }

        loop {
            // The total-timeout envelope is checked before the
            // retransmission timer; a coinciding expiry surfaces Timeout.
            if self.flight.handshake_elapsed() >= u128::from(self.cfg.total_timeout_ms) {
                log::debug!("DTLS handshake timeout");
                self.reset_flight_state();
                return Err(RecordError::Timeout);
            }

            let window = u128::from(self.flight.actual_retrans_timeout_ms);
            let due = !self.flight.flight_init
                || self.flight.since_last_transmit().unwrap_or(u128::MAX) >= window;

            if due {
                log::debug!(
                    "DTLS: {}start of flight transmission",
                    if self.flight.flight_init { "re-" } else { "" }
                );
                let last_type = self.transmit_flight()?;
                self.flight.last_retransmit = Some(Instant::now());

                if !self.flight.flight_init {
                    self.flight.flight_init = true;
                    self.flight.reset_timer(self.cfg.retrans_timeout_ms);
                    self.flight.last_flight = is_last_flight_type(last_type);
                } else {
                    self.flight.update_timer();
                }
            }

            self.flush_send_queue()?;

            if self.flight.last_flight {
                // Retransmission of the last flight happens on demand, from
                // the receive path or dtls_wait_and_retransmit().
                self.flight.async_timer = true;
                return Ok(());
            }

            let wait_ms = if self.cfg.nonblock {
                0
            } else {
                self.flight.actual_retrans_timeout_ms
            };
            match self.transport.pull_timeout(wait_ms) {
                Ok(true) => {
                    if self.next_flight_arrived()? {
                        self.end_flight();
                        return Ok(());
                    }
                    // Peer retransmitted an old flight: ours was lost, go
                    // around and retransmit.
                }
                Ok(false) => {
                    if self.cfg.nonblock {
                        return Err(self.dtls_again_or_timeout());
                    }
                    // Timer expired: loop retransmits.
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Non-blocking verdict while a flight is pending: `WouldBlock` inside
    /// the total-timeout envelope, `Timeout` (with the flight torn down)
    /// once it closes.
    fn dtls_again_or_timeout(&mut self) -> RecordError {
        if self.flight.handshake_elapsed() >= u128::from(self.cfg.total_timeout_ms) {
            self.reset_flight_state();
            RecordError::Timeout
        } else {
            RecordError::WouldBlock
        }
    }

    /// One unconditional retransmission of the buffered flight (the
    /// on-demand path for the last flight).
    pub(crate) fn dtls_retransmit(&mut self) -> Result<(), RecordError> {
        if self.flight.buffer.is_empty() {
            return Ok(());
        }
        log::debug!("DTLS: on-demand flight retransmission");
        self.transmit_flight()?;
        self.flight.last_retransmit = Some(Instant::now());
        self.flight.update_timer();
        self.flush_send_queue()?;
        Ok(())
    }

    /// Wait for the peer's reply to our last flight, retransmitting it when
    /// the timer fires. Used while the handshake layer expects the final
    /// acknowledgement exchange.
    pub fn dtls_wait_and_retransmit(&mut self) -> Result<(), RecordError> {
        if self.flight.handshake_elapsed() >= u128::from(self.cfg.total_timeout_ms) {
            return Err(RecordError::Timeout);
        }

        let wait_ms = if self.cfg.nonblock {
            0
        } else {
            self.flight.actual_retrans_timeout_ms
        };
        let ready = self.transport.pull_timeout(wait_ms).map_err(RecordError::from)?;
        if !ready {
            self.dtls_retransmit()?;
            return Err(RecordError::WouldBlock);
        }
        self.flight.reset_timer(self.cfg.retrans_timeout_ms);
        Ok(())
    }

    /// Fragment and send every buffered message. Returns the handshake type
    /// of the last message.
    fn transmit_flight(&mut self) -> Result<u8, RecordError> {
        let messages: Vec<FlightMessage> = self.flight.buffer.iter().cloned().collect();
        let mut last_type = 0;

        let mtu = self
            .data_mtu()
            .min(self.cfg.max_record_send_size.saturating_sub(DTLS_RECORD_HEADER_SIZE));

        for msg in &messages {
            last_type = msg.htype;

            if msg.ctype == ContentType::ChangeCipherSpec {
                // CCS is a single byte and never fragments.
                log::debug!(
                    "DTLS: sending packet[{}] {} (CCS), mtu {mtu}",
                    msg.handshake_seq,
                    msg.htype
                );
                self.send_record(
                    ContentType::ChangeCipherSpec,
                    None,
                    EpochRel::Epoch(msg.epoch),
                    &msg.data,
                    0,
                    true,
                )?;
                continue;
            }

            for frag in fragment_message(msg, mtu) {
                log::debug!(
                    "DTLS: sending packet[{}] fragment type {} with length {}, mtu {mtu}",
                    msg.handshake_seq,
                    msg.htype,
                    frag.len()
                );
                self.send_record(
                    ContentType::Handshake,
                    Some(msg.htype),
                    EpochRel::Epoch(msg.epoch),
                    &frag,
                    0,
                    true,
                )?;
            }
        }
        Ok(last_type)
    }

    /// Probe whether the peer's next flight started arriving: any buffered
    /// handshake data counts.
    fn next_flight_arrived(&mut self) -> Result<bool, RecordError> {
        match self.recv_record(ContentType::Handshake, Some(handshake::FINISHED), 0) {
            Ok(()) => Ok(!self.handshake_buffer.is_empty() || !self.ccs_buffer.is_empty()),
            Err(RecordError::WouldBlock | RecordError::Interrupted | RecordError::Timeout) => {
                Ok(!self.handshake_buffer.is_empty() || !self.ccs_buffer.is_empty())
            }
            Err(e) => Err(e),
        }
    }

    /// The flight was acknowledged: unpin its epochs and stop the timer.
    fn end_flight(&mut self) {
        log::debug!("DTLS: end of flight transmission");
        self.reset_flight_state();
    }

    pub(crate) fn reset_flight_state(&mut self) {
        for epoch in self.flight.clear() {
            let _ = self.epochs.dec_usage(epoch);
        }
        self.flight.last_flight = false;
        self.flight.async_timer = false;
    }

    /// Expected application data implicitly acknowledges the last flight;
    /// tear down its retransmission state.
    pub(crate) fn dtls_async_timer_delete(&mut self) {
        if self.flight.async_timer {
            log::debug!("DTLS: deinitializing previous handshake state");
            self.flight.async_timer = false;
            self.reset_flight_state();
            self.epochs.gc();
        }
    }
}
