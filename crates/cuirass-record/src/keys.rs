//! Key-schedule binding: turning handshake-produced secrets into per-epoch
//! record keys.
//!
//! TLS 1.2 expands one key block with the PRF and slices it into
//! {client MAC, server MAC, client key, server key, client IV, server IV}.
//! TLS 1.3 derives per-direction traffic secrets with HKDF-Expand-Label and
//! re-expands them to `key`/`iv` pairs; a key update rotates the traffic
//! secret in place with the `"traffic upd"` label and re-arms only the
//! updated direction, copying the other direction from the previous epoch.

use cuirass_crypto::suite::{CipherKind, MacId, PrfHash};
use hkdf::Hkdf;
use log::debug;
use sha2::{Sha256, Sha384};
use zeroize::Zeroizing;

use crate::config::Role;
use crate::epoch::{EpochRel, EpochTable};
use crate::error::RecordError;
use crate::prf::prf_tls12;
use crate::wire::ProtocolVersion;

const KEY_EXPANSION_LABEL: &[u8] = b"key expansion";

const HANDSHAKE_CLIENT_TRAFFIC_LABEL: &[u8] = b"c hs traffic";
const HANDSHAKE_SERVER_TRAFFIC_LABEL: &[u8] = b"s hs traffic";
const APPLICATION_CLIENT_TRAFFIC_LABEL: &[u8] = b"c ap traffic";
const APPLICATION_SERVER_TRAFFIC_LABEL: &[u8] = b"s ap traffic";
const APPLICATION_TRAFFIC_UPDATE: &[u8] = b"traffic upd";

/// Which key installation a `set_keys` call performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// TLS 1.2 key-block expansion from the master secret.
    Tls12,
    /// 0-RTT: only one direction is armed.
    Early,
    Handshake,
    Application,
    /// TLS 1.3 KeyUpdate of our write direction.
    UpdateOurs,
    /// TLS 1.3 KeyUpdate of the peer's write (our read) direction.
    UpdatePeers,
}

/// TLS 1.3 traffic secrets, rotated in place across key updates.
/// All buffers are PRF-output length once set.
#[derive(Default)]
pub struct TrafficSecrets {
    pub temp_secret: Zeroizing<Vec<u8>>,
    pub early_client: Zeroizing<Vec<u8>>,
    pub hs_client: Zeroizing<Vec<u8>>,
    pub hs_server: Zeroizing<Vec<u8>>,
    pub ap_client: Zeroizing<Vec<u8>>,
    pub ap_server: Zeroizing<Vec<u8>>,
    pub resumption_master: Zeroizing<Vec<u8>>,
    pub exporter: Zeroizing<Vec<u8>>,
}

/// Keylog sink: `(label, secret)` pairs in NSS keylog terms.
pub type KeylogFn = dyn FnMut(&str, &[u8]) + Send;

// ---------------------------------------------------------------------------
// HKDF-Expand-Label (RFC 8446 section 7.1)
// ---------------------------------------------------------------------------

/// `HKDF-Expand-Label(secret, label, context, length)` with the
/// `"tls13 "` prefix.
pub fn hkdf_expand_label(
    hash: PrfHash,
    secret: &[u8],
    label: &[u8],
    context: &[u8],
    length: usize,
) -> Result<Zeroizing<Vec<u8>>, RecordError> {
    const LABEL_PREFIX: &[u8] = b"tls13 ";

    if label.len() + LABEL_PREFIX.len() > 255 || context.len() > 255 || length > 0xffff {
        return Err(RecordError::InvalidRequest);
    }

    let mut info = Vec::with_capacity(4 + LABEL_PREFIX.len() + label.len() + context.len());
    info.extend_from_slice(&(length as u16).to_be_bytes());
    info.push((LABEL_PREFIX.len() + label.len()) as u8);
    info.extend_from_slice(LABEL_PREFIX);
    info.extend_from_slice(label);
    info.push(context.len() as u8);
    info.extend_from_slice(context);

    let mut out = Zeroizing::new(vec![0u8; length]);
    match hash {
        PrfHash::Sha256 => Hkdf::<Sha256>::from_prk(secret)
            .map_err(|_| RecordError::InternalError)?
            .expand(&info, &mut out)
            .map_err(|_| RecordError::InternalError)?,
        PrfHash::Sha384 => Hkdf::<Sha384>::from_prk(secret)
            .map_err(|_| RecordError::InternalError)?
            .expand(&info, &mut out)
            .map_err(|_| RecordError::InternalError)?,
    }
    Ok(out)
}

/// `Derive-Secret(secret, label, transcript)` where the caller supplies the
/// transcript hash.
pub fn derive_secret(
    hash: PrfHash,
    secret: &[u8],
    label: &[u8],
    transcript_hash: &[u8],
) -> Result<Zeroizing<Vec<u8>>, RecordError> {
    hkdf_expand_label(hash, secret, label, transcript_hash, hash.output_size())
}

// ---------------------------------------------------------------------------
// Key schedule state
// ---------------------------------------------------------------------------

/// Everything the record layer holds on behalf of the key schedule: TLS 1.2
/// master secret and randoms, TLS 1.3 traffic secrets, and the keylog sink.
pub struct KeySchedule {
    pub prf: PrfHash,
    pub role: Role,
    pub master_secret: Zeroizing<Vec<u8>>,
    pub client_random: [u8; 32],
    pub server_random: [u8; 32],
    pub secrets: TrafficSecrets,
    /// Transcript hash at the point the current stage's secrets are derived
    /// (for Application: the hash at server Finished).
    pub transcript_hash: Vec<u8>,
    pub keylog: Option<Box<KeylogFn>>,
}

impl KeySchedule {
    pub fn new(role: Role) -> Self {
        KeySchedule {
            prf: PrfHash::Sha256,
            role,
            master_secret: Zeroizing::new(vec![0u8; 48]),
            client_random: [0u8; 32],
            server_random: [0u8; 32],
            secrets: TrafficSecrets::default(),
            transcript_hash: Vec::new(),
            keylog: None,
        }
    }

    fn emit_keylog(&mut self, label: &str, secret: &[u8]) {
        if let Some(cb) = self.keylog.as_mut() {
            cb(label, secret);
        }
    }

    /// Derive or copy keys into `epoch`'s slot per `stage`, build the cipher
    /// contexts, and mark the slot initialized. Idempotent on an already
    /// initialized slot.
    pub fn set_keys(
        &mut self,
        table: &EpochTable,
        version: ProtocolVersion,
        epoch: u16,
        stage: Stage,
    ) -> Result<(), RecordError> {
        let shared = table.get(EpochRel::Epoch(epoch))?;

        {
            let p = shared.lock();
            if p.initialized {
                return Ok(());
            }
            if p.mac.id == MacId::Null && p.cipher.key_size == 0 {
                // No suite was ever bound to this slot.
                return Err(RecordError::UnsupportedAlgorithm);
            }
        }

        debug!("initializing epoch #{epoch}");

        if version.tls13_sem() {
            self.set_keys_tls13(table, &shared, stage)?;
        } else {
            if stage != Stage::Tls12 {
                return Err(RecordError::InvalidRequest);
            }
            self.set_keys_tls12(version, &shared)?;
        }

        let mut p = shared.lock();
        let cipher = p.cipher;
        match stage {
            Stage::Early => {
                // Only one direction is armed for 0-RTT.
                if self.role == Role::Client {
                    p.write.init_context(cipher)?;
                } else {
                    p.read.init_context(cipher)?;
                }
            }
            _ => {
                p.read.init_context(cipher)?;
                p.write.init_context(cipher)?;
            }
        }
        p.window.reset();
        p.initialized = true;

        debug!("epoch #{epoch} ready");
        Ok(())
    }

    // -- TLS 1.2 -----------------------------------------------------------

    fn set_keys_tls12(
        &mut self,
        version: ProtocolVersion,
        shared: &crate::epoch::SharedParams,
    ) -> Result<(), RecordError> {
        let mut guard = shared.lock();
        let p = &mut *guard;

        let mac_size = p.mac.key_size;
        let key_size = p.cipher.key_size;
        // AEAD suites derive only the implicit nonce part; block suites get
        // a full-IV share even though the per-record IV supersedes it.
        let iv_size = if version.explicit_iv() && p.cipher.kind != CipherKind::Block {
            p.cipher.implicit_iv
        } else {
            p.cipher.iv_size
        };

        let mut seed = [0u8; 64];
        seed[..32].copy_from_slice(&self.server_random);
        seed[32..].copy_from_slice(&self.client_random);

        let block_len = 2 * (mac_size + key_size + iv_size);
        let key_block = prf_tls12(
            self.prf,
            &self.master_secret,
            KEY_EXPANSION_LABEL,
            &seed,
            block_len,
        )?;

        let (client, server) = match self.role {
            Role::Client => (&mut p.write, &mut p.read),
            Role::Server => (&mut p.read, &mut p.write),
        };

        let mut pos = 0;
        let take = |n: usize, pos: &mut usize| {
            let s = Zeroizing::new(key_block[*pos..*pos + n].to_vec());
            *pos += n;
            s
        };

        client.mac_key = take(mac_size, &mut pos);
        server.mac_key = take(mac_size, &mut pos);
        client.key = take(key_size, &mut pos);
        server.key = take(key_size, &mut pos);
        client.iv = take(iv_size, &mut pos);
        server.iv = take(iv_size, &mut pos);

        Ok(())
    }

    // -- TLS 1.3 -----------------------------------------------------------

    fn set_keys_tls13(
        &mut self,
        table: &EpochTable,
        shared: &crate::epoch::SharedParams,
        stage: Stage,
    ) -> Result<(), RecordError> {
        match stage {
            Stage::Early => self.tls13_early_keys(shared),
            Stage::Handshake | Stage::Application => self.tls13_both_directions(shared, stage),
            Stage::UpdateOurs | Stage::UpdatePeers => self.tls13_update_keys(table, shared, stage),
            Stage::Tls12 => Err(RecordError::InvalidRequest),
        }
    }

    fn expand_key_iv(
        &self,
        secret: &[u8],
        key_size: usize,
        iv_size: usize,
    ) -> Result<(Zeroizing<Vec<u8>>, Zeroizing<Vec<u8>>), RecordError> {
        let key = hkdf_expand_label(self.prf, secret, b"key", b"", key_size)?;
        let iv = hkdf_expand_label(self.prf, secret, b"iv", b"", iv_size)?;
        Ok((key, iv))
    }

    fn tls13_early_keys(&mut self, shared: &crate::epoch::SharedParams) -> Result<(), RecordError> {
        if self.secrets.early_client.is_empty() {
            return Err(RecordError::InvalidRequest);
        }

        let mut p = shared.lock();
        let (key_size, iv_size) = (p.cipher.key_size, p.cipher.iv_size);
        let (key, iv) = self.expand_key_iv(&self.secrets.early_client, key_size, iv_size)?;

        let early = match self.role {
            Role::Client => &mut p.write,
            Role::Server => &mut p.read,
        };
        early.mac_key = Zeroizing::new(Vec::new());
        early.key = key;
        early.iv = iv;
        Ok(())
    }

    fn tls13_both_directions(
        &mut self,
        shared: &crate::epoch::SharedParams,
        stage: Stage,
    ) -> Result<(), RecordError> {
        let prf = self.prf;
        let transcript = self.transcript_hash.clone();

        let (c_label, s_label, c_keylog, s_keylog) = if stage == Stage::Handshake {
            (
                HANDSHAKE_CLIENT_TRAFFIC_LABEL,
                HANDSHAKE_SERVER_TRAFFIC_LABEL,
                "CLIENT_HANDSHAKE_TRAFFIC_SECRET",
                "SERVER_HANDSHAKE_TRAFFIC_SECRET",
            )
        } else {
            (
                APPLICATION_CLIENT_TRAFFIC_LABEL,
                APPLICATION_SERVER_TRAFFIC_LABEL,
                "CLIENT_TRAFFIC_SECRET_0",
                "SERVER_TRAFFIC_SECRET_0",
            )
        };

        let ckey = derive_secret(prf, &self.secrets.temp_secret, c_label, &transcript)?;
        let skey = derive_secret(prf, &self.secrets.temp_secret, s_label, &transcript)?;
        self.emit_keylog(c_keylog, &ckey);
        self.emit_keylog(s_keylog, &skey);

        let mut guard = shared.lock();
        let p = &mut *guard;
        let (key_size, iv_size) = (p.cipher.key_size, p.cipher.iv_size);
        let (c_key, c_iv) = self.expand_key_iv(&ckey, key_size, iv_size)?;
        let (s_key, s_iv) = self.expand_key_iv(&skey, key_size, iv_size)?;

        let (client, server) = match self.role {
            Role::Client => (&mut p.write, &mut p.read),
            Role::Server => (&mut p.read, &mut p.write),
        };
        client.mac_key = Zeroizing::new(Vec::new());
        server.mac_key = Zeroizing::new(Vec::new());
        client.key = c_key;
        client.iv = c_iv;
        server.key = s_key;
        server.iv = s_iv;
        drop(guard);

        if stage == Stage::Handshake {
            self.secrets.hs_client = ckey;
            self.secrets.hs_server = skey;
        } else {
            self.secrets.ap_client = ckey;
            self.secrets.ap_server = skey;
        }
        Ok(())
    }

    fn tls13_update_keys(
        &mut self,
        table: &EpochTable,
        shared: &crate::epoch::SharedParams,
        stage: Stage,
    ) -> Result<(), RecordError> {
        // Copy the direction that is not being updated from the epoch it is
        // still live in.
        let prev_rel = if stage == Stage::UpdateOurs {
            EpochRel::ReadCurrent
        } else {
            EpochRel::WriteCurrent
        };
        let prev = table.get(prev_rel)?;

        {
            let prev = prev.lock();
            let mut p = shared.lock();
            let (src, dst) = if stage == Stage::UpdateOurs {
                (&prev.read, &mut p.read)
            } else {
                (&prev.write, &mut p.write)
            };
            dst.sequence_number = src.sequence_number;
            dst.key = src.key.clone();
            dst.iv = src.iv.clone();
            dst.mac_key = Zeroizing::new(Vec::new());
        }

        // Rotate the traffic secret of the direction being updated.
        let update_client = (self.role == Role::Client && stage == Stage::UpdateOurs)
            || (self.role == Role::Server && stage == Stage::UpdatePeers);
        let secret = if update_client {
            &mut self.secrets.ap_client
        } else {
            &mut self.secrets.ap_server
        };
        if secret.is_empty() {
            return Err(RecordError::InternalError);
        }
        *secret = hkdf_expand_label(
            self.prf,
            secret,
            APPLICATION_TRAFFIC_UPDATE,
            b"",
            self.prf.output_size(),
        )?;

        let rotated = secret.clone();
        let mut p = shared.lock();
        let (key_size, iv_size) = (p.cipher.key_size, p.cipher.iv_size);
        let (key, iv) = self.expand_key_iv(&rotated, key_size, iv_size)?;

        let upd = if stage == Stage::UpdateOurs {
            &mut p.write
        } else {
            &mut p.read
        };
        upd.mac_key = Zeroizing::new(Vec::new());
        upd.key = key;
        upd.iv = iv;
        // The updated direction starts over at sequence 0.
        upd.sequence_number = 0;
        Ok(())
    }
}
