//! Receive path: header validation, decryption, replay filtering, and
//! routing into the typed buffers.

use rand_core::{CryptoRng, RngCore};

use crate::buffers::Packet;
use crate::config::Role;
use crate::epoch::EpochRel;
use crate::error::RecordError;
use crate::protect;
use crate::session::Session;
use crate::transport::Transport;
use crate::wire::{
    self, ContentType, MAX_EMPTY_RECORDS, ProtocolVersion, RecordHeader, alert, handshake,
};

/// What a routed record did to the session.
enum Route {
    /// The record landed in a typed buffer (possibly not the caller's).
    Delivered,
    /// The record was consumed internally; read another one.
    Continue,
}

impl<T: Transport, R: RngCore + CryptoRng> Session<T, R> {
    /// Receive and process one record (or several, when records are
    /// consumed internally), leaving the result in the typed buffers.
    ///
    /// `type_expected`/`htype` describe what the caller is waiting for and
    /// only influence the unexpected-packet rules; everything readable is
    /// processed regardless.
    pub(crate) fn recv_record(
        &mut self,
        type_expected: ContentType,
        htype: Option<u8>,
        ms: u32,
    ) -> Result<(), RecordError> {
        let mut empty_retries = 0usize;

        loop {
            if empty_retries > MAX_EMPTY_RECORDS {
                return Err(self.fail(RecordError::TooManyEmptyRecords));
            }
            if self.read_eof {
                return Ok(());
            }
            if self.invalid || self.may_not_read {
                return Err(RecordError::InvalidSession);
            }

            match self.recv_one(type_expected, htype, ms, &mut empty_retries)? {
                Route::Delivered => return Ok(()),
                Route::Continue => continue,
            }
        }
    }

    /// Read, decrypt and route a single record.
    fn recv_one(
        &mut self,
        type_expected: ContentType,
        htype: Option<u8>,
        ms: u32,
        empty_retries: &mut usize,
    ) -> Result<Route, RecordError> {
        let is_dtls = self.cfg.version.is_dtls();
        let tls13 = self.cfg.version.tls13_sem();

        let shared = self.epochs.get(EpochRel::ReadCurrent)?;
        if !shared.lock().initialized {
            return Err(self.fail(RecordError::InternalError));
        }

        // -- headers --------------------------------------------------------

        let header_size = self.cfg.version.record_header_size();
        if let Err(e) = self.read_buffered(header_size, ms) {
            return Err(self.recv_error(e, type_expected));
        }
        let header = wire::parse_record_header(is_dtls, &self.recv_raw);

        log::debug!(
            "REC: {}.{} packet type {} received, epoch {}, length {}",
            header.version[0],
            header.version[1],
            header.ctype,
            header.epoch,
            header.length
        );

        // A DTLS record under a dead (or future) epoch is silently dropped.
        if is_dtls && !self.epochs.is_valid(header.epoch) {
            log::debug!(
                "discarded message with invalid epoch {}",
                header.epoch
            );
            self.discard_datagram();
            return Ok(Route::Continue);
        }

        let Some(outer_type) = ContentType::from_u8(header.ctype) else {
            return Err(self.recv_error(RecordError::UnexpectedPacket, type_expected));
        };

        if let Err(e) = self.check_record_version(header, htype) {
            return Err(self.recv_error(e, type_expected));
        }

        let wire_max = {
            let p = shared.lock();
            let max = self.max_wire_recv(&p);
            if header.length == 0 {
                // Empty, unencrypted records are always unexpected; under a
                // real cipher an empty wire record cannot authenticate.
                let e = if p.is_null_cipher() {
                    RecordError::UnexpectedPacket
                } else {
                    RecordError::DecryptionFailed
                };
                drop(p);
                return Err(self.recv_error(e, type_expected));
            }
            max
        };
        if header.length as usize > wire_max {
            log::debug!(
                "received packet with illegal length {} (max {wire_max})",
                header.length
            );
            return Err(self.recv_error(RecordError::RecordOverflow, type_expected));
        }

        // -- body -----------------------------------------------------------

        let total = header_size + header.length as usize;
        if let Err(e) = self.read_buffered(total, ms) {
            return Err(self.recv_error(e, type_expected));
        }
        let ciphertext: Vec<u8> = self.recv_raw[header_size..total].to_vec();
        self.recv_raw.drain(..total);

        // TLS 1.3 legacy ChangeCipherSpec: a single 0x01 byte during the
        // handshake is dropped on the floor; anything else is an error.
        if tls13 && outer_type == ContentType::ChangeCipherSpec {
            if header.length != 1 || ciphertext[0] != 0x01 || !self.handshake_in_progress {
                return Err(self.fail(RecordError::UnexpectedPacket));
            }
            log::debug!("discarding change cipher spec in TLS1.3");
            *empty_retries += 1;
            return Ok(Route::Continue);
        }

        // -- decrypt --------------------------------------------------------

        let sequence = if is_dtls {
            header.sequence
        } else {
            shared.lock().read.sequence_number
        };

        let decrypted = {
            let mut p = shared.lock();
            protect::decrypt_record(
                &mut p,
                self.cfg.version,
                outer_type,
                sequence,
                &ciphertext,
                self.cfg.max_record_recv_size,
                self.cfg.max_record_recv_size + 512,
                self.cfg.safe_padding,
            )
        };

        // Server-side 0-RTT accounting happens before the generic failure
        // handling: rejected early data is skipped against the budget.
        if self.cfg.role == Role::Server && self.early_data_in_flight {
            match self.route_early_data(&shared, &header, outer_type, &decrypted)? {
                Some(route) => return Ok(route),
                None => {}
            }
        }

        let (plain, effective_type) = match decrypted {
            Ok(ok) => ok,
            Err(e) => {
                log::debug!("discarded message[{sequence}] due to invalid decryption");
                if is_dtls {
                    self.discard_datagram();
                    return Ok(Route::Continue);
                }
                return Err(self.fail(e));
            }
        };

        // -- replay and sequence bookkeeping --------------------------------

        {
            let mut p = shared.lock();
            if is_dtls {
                // Replay is checked only after authentication so nobody can
                // poison the window.
                if self.cfg.replay_protection {
                    let epoch = p.epoch;
                    if let Err(verdict) = p.window.check(epoch, header.sequence) {
                        drop(p);
                        log::debug!(
                            "discarded duplicate message[{}]: {verdict:?}",
                            header.sequence & wire::DTLS_SEQ_MASK
                        );
                        self.discard_datagram();
                        return Ok(Route::Continue);
                    }
                }
                // Mirror the wire sequence for callers that expose it.
                p.read.sequence_number = header.sequence;
            }
            if let Err(e) = p.read.increment_sequence(is_dtls) {
                drop(p);
                return Err(self.fail(e));
            }
        }

        // Empty records are a pre-1.3 CBC-protection quirk; retry a bounded
        // number of them.
        if plain.is_empty() && !tls13 {
            *empty_retries += 1;
            return Ok(Route::Continue);
        }

        if plain.len() > self.cfg.max_record_recv_size {
            log::debug!("received packet with illegal length {}", plain.len());
            if is_dtls {
                self.discard_datagram();
                return Ok(Route::Continue);
            }
            return Err(self.fail(RecordError::RecordOverflow));
        }

        self.route_record(effective_type, type_expected, htype, sequence, plain, empty_retries)
    }

    /// Version rules: TLS 1.3 requires the 0x0303 fiction; otherwise the
    /// header must match the negotiated version, with slack only for hello
    /// exchanges.
    fn check_record_version(
        &self,
        header: RecordHeader,
        htype: Option<u8>,
    ) -> Result<(), RecordError> {
        let expected = self.cfg.version.wire_bytes();
        let diff = header.version != expected;

        match self.cfg.version {
            ProtocolVersion::Tls13 => {
                if diff {
                    return Err(RecordError::UnsupportedVersion);
                }
            }
            ProtocolVersion::Tls12 => {
                if matches!(
                    htype,
                    Some(handshake::CLIENT_HELLO) | Some(handshake::SERVER_HELLO)
                ) {
                    // Hello records may carry any 3.x version.
                    if header.version[0] != 3 {
                        return Err(RecordError::UnsupportedVersion);
                    }
                } else if diff {
                    return Err(RecordError::UnsupportedVersion);
                }
            }
            ProtocolVersion::Dtls12 => {
                // Before negotiation completes the only sane check is the
                // DTLS major range.
                if htype.is_none() {
                    if diff {
                        return Err(RecordError::UnsupportedVersion);
                    }
                } else if header.version[0] < 254 {
                    return Err(RecordError::UnsupportedVersion);
                }
            }
        }
        Ok(())
    }

    /// Server-side early-data disposition. Returns `Some(route)` when the
    /// record was consumed here.
    #[allow(clippy::type_complexity)]
    fn route_early_data(
        &mut self,
        shared: &crate::epoch::SharedParams,
        header: &RecordHeader,
        outer_type: ContentType,
        decrypted: &Result<(Vec<u8>, ContentType), RecordError>,
    ) -> Result<Option<Route>, RecordError> {
        let is_null = shared.lock().is_null_cipher();

        if self.early_data_accepted {
            // Early data must decrypt; a plaintext record in this window is
            // treated as a decryption failure too.
            if decrypted.is_err() || is_null {
                log::debug!("failed to decrypt early data");
                return Err(self.fail(RecordError::DecryptionFailed));
            }
            if let Ok((plain, ContentType::ApplicationData)) = decrypted {
                if plain.len()
                    > self
                        .cfg
                        .max_early_data_size
                        .saturating_sub(self.early_data_received)
                {
                    log::debug!("max_early_data_size exceeded");
                    return Err(self.fail(RecordError::UnexpectedPacket));
                }
                self.early_recv.push(plain.clone(), header.sequence);
                self.early_data_received += plain.len();

                let mut p = shared.lock();
                if let Err(e) = p.read.increment_sequence(self.cfg.version.is_dtls()) {
                    drop(p);
                    return Err(self.fail(e));
                }
                return Ok(Some(Route::Continue));
            }
            // Not early application data: fall through to normal handling.
            Ok(None)
        } else {
            // Early data we did not accept: skip undecryptable records
            // against the budget until the client's real second flight
            // appears.
            if outer_type == ContentType::ApplicationData && (decrypted.is_err() || is_null) {
                if header.length as usize
                    > self
                        .cfg
                        .max_early_data_size
                        .saturating_sub(self.early_data_received)
                {
                    log::debug!("max_early_data_size exceeded");
                    return Err(self.fail(RecordError::UnexpectedPacket));
                }
                log::debug!(
                    "discarded early data[{}] due to invalid decryption, length {}",
                    header.sequence,
                    header.length
                );
                self.early_data_received += header.length as usize;
                return Ok(Some(Route::Continue));
            }
            self.early_data_in_flight = false;
            Ok(None)
        }
    }

    /// Place a decrypted record where it belongs, or surface the state
    /// signal it implies.
    fn route_record(
        &mut self,
        rtype: ContentType,
        type_expected: ContentType,
        htype: Option<u8>,
        sequence: u64,
        plain: Vec<u8>,
        empty_retries: &mut usize,
    ) -> Result<Route, RecordError> {
        let is_dtls = self.cfg.version.is_dtls();
        let tls13 = self.cfg.version.tls13_sem();

        // The expected-type fast path.
        if rtype == type_expected
            && matches!(
                rtype,
                ContentType::ApplicationData
                    | ContentType::ChangeCipherSpec
                    | ContentType::Handshake
            )
        {
            if plain.is_empty() {
                if rtype == ContentType::ApplicationData {
                    // Distinguishes an empty message from EOF.
                    *empty_retries += 1;
                    return Ok(Route::Continue);
                }
                return Err(self.fail(RecordError::UnexpectedPacket));
            }

            match rtype {
                ContentType::ApplicationData => self.app_buffer.push(plain, sequence),
                ContentType::Handshake => self.handshake_buffer.push(plain, sequence),
                ContentType::ChangeCipherSpec => self.ccs_buffer.push(plain, sequence),
                _ => unreachable!(),
            }

            // Expected application data doubles as the implicit ACK of our
            // last DTLS flight.
            if rtype == ContentType::ApplicationData && is_dtls {
                self.dtls_async_timer_delete();
            }
            return Ok(Route::Delivered);
        }

        match rtype {
            ContentType::Alert => {
                if plain.len() < 2 {
                    return Err(self.fail(RecordError::UnexpectedPacket));
                }
                let (level, desc) = (plain[0], plain[1]);
                log::debug!("alert[{level}|{desc}] received");
                self.last_alert = desc;

                if desc == alert::CLOSE_NOTIFY && level != alert::LEVEL_FATAL {
                    self.read_eof = true;
                    Ok(Route::Delivered)
                } else if tls13 || level == alert::LEVEL_FATAL {
                    self.unresumable = true;
                    self.invalidate();
                    Err(RecordError::FatalAlert(desc))
                } else {
                    Err(RecordError::WarningAlert(desc))
                }
            }

            ContentType::ChangeCipherSpec => {
                // Only DTLS may see a CCS out of order (reordered datagrams).
                if !is_dtls {
                    return Err(self.fail(RecordError::UnexpectedPacket));
                }
                self.ccs_buffer.push(plain, sequence);
                Ok(Route::Delivered)
            }

            ContentType::Heartbeat => {
                // Queued for the external heartbeat handler.
                self.heartbeat_buffer.push(plain, sequence);
                Ok(Route::Continue)
            }

            ContentType::ApplicationData => {
                if !self.initial_negotiation_completed {
                    return Err(self.fail(RecordError::UnexpectedPacket));
                }
                // Tolerated only where a rehandshake or post-handshake-auth
                // exchange may interleave with application data.
                let rehandshake_window = type_expected == ContentType::Alert
                    || (type_expected == ContentType::Handshake
                        && matches!(
                            htype,
                            Some(handshake::CLIENT_HELLO) | Some(handshake::SERVER_HELLO)
                        ));
                if rehandshake_window {
                    self.app_buffer.push(plain, sequence);
                    Err(RecordError::GotApplicationData)
                } else {
                    Err(self.fail(RecordError::UnexpectedPacket))
                }
            }

            ContentType::Handshake => self.route_unexpected_handshake(plain, sequence),
        }
    }

    /// A handshake record arrived while something else was expected.
    fn route_unexpected_handshake(
        &mut self,
        plain: Vec<u8>,
        sequence: u64,
    ) -> Result<Route, RecordError> {
        let is_dtls = self.cfg.version.is_dtls();
        let tls13 = self.cfg.version.tls13_sem();
        let msg_type = plain[0];

        if is_dtls && self.flight.async_timer {
            if self.cfg.role == Role::Server && msg_type == handshake::CLIENT_HELLO {
                // The client started over; the old flight is moot.
                self.dtls_async_timer_delete();
            } else {
                // A replayed handshake message means our last flight was
                // lost: retransmit it.
                self.dtls_retransmit()?;
                return Ok(Route::Continue);
            }
        }

        if tls13 {
            // Post-handshake messages (NewSessionTicket, KeyUpdate) queue up
            // for the handshake layer to process asynchronously.
            self.handshake_buffer.push(plain, sequence);
            return Ok(Route::Continue);
        }

        if self.cfg.role == Role::Server
            && !self.handshake_in_progress
            && msg_type == handshake::CLIENT_HELLO
        {
            self.handshake_buffer.push(plain, sequence);
            return Err(RecordError::Rehandshake);
        }

        // A client may legally receive HelloRequest at any quiet moment.
        if self.cfg.role == Role::Client
            && !self.handshake_in_progress
            && msg_type == handshake::HELLO_REQUEST
        {
            if is_dtls {
                self.hsk_read_seq += 1;
            }
            return Err(RecordError::Rehandshake);
        }

        Err(self.fail(RecordError::UnexpectedPacket))
    }

    /// Map transport/framing failures from the header/body reads, honoring
    /// the DTLS discard rules.
    fn recv_error(&mut self, err: RecordError, type_expected: ContentType) -> RecordError {
        if matches!(
            err,
            RecordError::WouldBlock | RecordError::Interrupted | RecordError::Timeout
        ) {
            return err;
        }

        if err == RecordError::PrematureTermination && type_expected == ContentType::Alert {
            // We were waiting for close_notify anyway.
            self.invalidate();
            self.read_eof = true;
            return RecordError::PrematureTermination;
        }

        if self.cfg.version.is_dtls()
            && matches!(
                err,
                RecordError::DecryptionFailed
                    | RecordError::UnsupportedVersion
                    | RecordError::UnexpectedPacketLength
                    | RecordError::RecordOverflow
                    | RecordError::UnexpectedPacket
            )
        {
            self.discard_datagram();
            return RecordError::WouldBlock;
        }

        self.fail(err)
    }

    // -- public receive surface --------------------------------------------

    /// Receive application data; semantics of `read(2)`. `Ok(0)` is EOF
    /// (close_notify received).
    pub fn recv(&mut self, buf: &mut [u8]) -> Result<usize, RecordError> {
        if !self.initial_negotiation_completed {
            return Err(RecordError::UnavailableDuringHandshake);
        }
        self.recv_internal(buf).map(|(n, _)| n)
    }

    /// [`recv`](Session::recv) returning the record sequence number of the
    /// first packet read, as DTLS callers need for ordering.
    pub fn recv_seq(&mut self, buf: &mut [u8]) -> Result<(usize, u64), RecordError> {
        if !self.initial_negotiation_completed {
            return Err(RecordError::UnavailableDuringHandshake);
        }
        self.recv_internal(buf)
    }

    fn recv_internal(&mut self, buf: &mut [u8]) -> Result<(usize, u64), RecordError> {
        loop {
            if !self.app_buffer.is_empty() {
                let (n, seq) = self.app_buffer.read_bytes(buf);
                return Ok((n, seq.unwrap_or(0)));
            }
            if self.read_eof {
                return Ok((0, 0));
            }
            self.recv_record(
                ContentType::ApplicationData,
                None,
                self.cfg.record_timeout_ms,
            )?;
        }
    }

    /// Zero-copy variant: hand out the whole decrypted record.
    /// `Ok(None)` is EOF.
    pub fn recv_packet(&mut self) -> Result<Option<Packet>, RecordError> {
        if !self.initial_negotiation_completed {
            return Err(RecordError::UnavailableDuringHandshake);
        }
        loop {
            if let Some(p) = self.app_buffer.pop_packet() {
                return Ok(Some(p));
            }
            if self.read_eof {
                return Ok(None);
            }
            self.recv_record(
                ContentType::ApplicationData,
                None,
                self.cfg.record_timeout_ms,
            )?;
        }
    }

    /// Server: drain 0-RTT data received during the handshake.
    pub fn recv_early_data(&mut self, buf: &mut [u8]) -> Result<usize, RecordError> {
        if self.cfg.role != Role::Server {
            return Err(RecordError::InvalidRequest);
        }
        if self.early_recv.is_empty() {
            return Err(RecordError::NotAvailable);
        }
        let (n, _) = self.early_recv.read_bytes(buf);
        Ok(n)
    }

    /// Drive the receive loop on behalf of the handshake layer, filling the
    /// handshake/CCS buffers.
    pub fn recv_handshake_record(&mut self, ms: u32) -> Result<(), RecordError> {
        self.recv_record(ContentType::Handshake, Some(handshake::FINISHED), ms)
    }

    /// Pop a buffered CCS payload (DTLS epoch transitions).
    pub fn take_ccs(&mut self) -> Option<Vec<u8>> {
        self.ccs_buffer.pop_packet().map(|p| p.data)
    }
}
