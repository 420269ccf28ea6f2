//! Epoch table: slot-based storage of record parameters across rekeys.
//!
//! A small ring of slots indexed by `epoch - epoch_min` holds every epoch
//! that is still live: the current read epoch, the current write epoch, the
//! `next` epoch being prepared, and any retiring epoch still pinned by
//! buffered outbound records. The table is the only shared mutable structure
//! in a session; one mutex guards the ring so a reader thread and a writer
//! thread may operate on disjoint epochs.

use std::sync::Arc;

use cuirass_crypto::suite::{MacId, SuiteEntry, cipher_entry, mac_entry};
use log::debug;
use parking_lot::Mutex;

use crate::error::RecordError;
use crate::params::RecordParameters;
use crate::wire::DTLS_SEQ_MASK;

/// Live-epoch window. Read-current, write-current, next, plus one retiring
/// epoch pinned by in-flight retransmissions.
pub const MAX_EPOCH_SLOTS: usize = 4;

pub type SharedParams = Arc<Mutex<RecordParameters>>;

/// Symbolic or absolute epoch reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpochRel {
    ReadCurrent,
    WriteCurrent,
    Next,
    Epoch(u16),
}

struct TableInner {
    slots: [Option<SharedParams>; MAX_EPOCH_SLOTS],
    epoch_min: u16,
    epoch_read: u16,
    epoch_write: u16,
    epoch_next: u16,
}

impl TableInner {
    fn resolve(&self, rel: EpochRel) -> u16 {
        match rel {
            EpochRel::ReadCurrent => self.epoch_read,
            EpochRel::WriteCurrent => self.epoch_write,
            EpochRel::Next => self.epoch_next,
            EpochRel::Epoch(e) => e,
        }
    }

    fn slot_index(&self, epoch: u16) -> Result<usize, RecordError> {
        let index = epoch.wrapping_sub(self.epoch_min) as usize;
        if index >= MAX_EPOCH_SLOTS {
            debug!(
                "epoch {epoch} out of range (min {}, max index {MAX_EPOCH_SLOTS})",
                self.epoch_min
            );
            return Err(RecordError::InvalidRequest);
        }
        Ok(index)
    }

    fn get(&self, epoch: u16) -> Result<SharedParams, RecordError> {
        let idx = self.slot_index(epoch)?;
        self.slots[idx].clone().ok_or(RecordError::InvalidRequest)
    }
}

pub struct EpochTable {
    is_dtls: bool,
    inner: Mutex<TableInner>,
}

impl EpochTable {
    /// A new table with the null-cipher epoch 0 installed and current in
    /// both directions.
    pub fn new(is_dtls: bool) -> Self {
        let mut slots: [Option<SharedParams>; MAX_EPOCH_SLOTS] = Default::default();
        slots[0] = Some(Arc::new(Mutex::new(RecordParameters::new_null(0))));
        EpochTable {
            is_dtls,
            inner: Mutex::new(TableInner {
                slots,
                epoch_min: 0,
                epoch_read: 0,
                epoch_write: 0,
                epoch_next: 1,
            }),
        }
    }

    pub fn epoch_read(&self) -> u16 {
        self.inner.lock().epoch_read
    }

    pub fn epoch_write(&self) -> u16 {
        self.inner.lock().epoch_write
    }

    pub fn epoch_next(&self) -> u16 {
        self.inner.lock().epoch_next
    }

    /// Look up a slot. The returned handle does not pin the slot; callers
    /// holding it across I/O must bump the refcount via [`inc_usage`].
    ///
    /// [`inc_usage`]: EpochTable::inc_usage
    pub fn get(&self, rel: EpochRel) -> Result<SharedParams, RecordError> {
        let inner = self.inner.lock();
        let epoch = inner.resolve(rel);
        inner.get(epoch)
    }

    /// Whether `epoch` currently has a slot (DTLS header validation).
    pub fn is_valid(&self, epoch: u16) -> bool {
        let inner = self.inner.lock();
        inner.get(epoch).is_ok()
    }

    /// Ensure the `next` epoch slot exists. With `null_epoch` the slot is
    /// filled with the null cipher and is immediately initialized; otherwise
    /// cipher and MAC stay unset for a later [`set_cipher_suite`] +
    /// `set_keys`. Idempotent on an existing matching slot.
    ///
    /// [`set_cipher_suite`]: EpochTable::set_cipher_suite
    pub fn setup_next(&self, null_epoch: bool) -> Result<SharedParams, RecordError> {
        let mut inner = self.inner.lock();
        let epoch = inner.epoch_next;
        let idx = inner.slot_index(epoch)?;

        if let Some(existing) = &inner.slots[idx] {
            let p = existing.lock();
            if null_epoch && !p.initialized {
                return Err(RecordError::InternalError);
            }
            if p.epoch != epoch {
                return Err(RecordError::InternalError);
            }
            drop(p);
            return Ok(existing.clone());
        }

        debug!("allocating epoch #{epoch}");

        let mut params = if null_epoch {
            RecordParameters::new_null(epoch)
        } else {
            RecordParameters::new(epoch)
        };

        if self.is_dtls {
            // The wire sequence carries the epoch in its top 16 bits.
            let seq = params.write.sequence_number & DTLS_SEQ_MASK;
            params.write.sequence_number = seq | (u64::from(epoch) << 48);
        }

        let shared = Arc::new(Mutex::new(params));
        inner.slots[idx] = Some(shared.clone());
        Ok(shared)
    }

    /// Bind a cipher suite to the `next` slot.
    ///
    /// After a HelloRetryRequest the suite may arrive a second time; that is
    /// accepted iff it matches what is already bound. Otherwise the slot
    /// must still be untouched.
    pub fn set_cipher_suite(
        &self,
        suite: &'static SuiteEntry,
        etm: bool,
        hrr_sent: bool,
    ) -> Result<(), RecordError> {
        let shared = self.get(EpochRel::Next)?;
        let mut p = shared.lock();

        if hrr_sent {
            if p.initialized
                && (!std::ptr::eq(p.cipher, suite.cipher) || !std::ptr::eq(p.mac, suite.mac))
            {
                return Err(RecordError::UnexpectedPacket);
            }
            if p.initialized {
                return Ok(());
            }
        } else if p.initialized || p.cipher.key_size != 0 || p.mac.id != MacId::Null {
            return Err(RecordError::InternalError);
        }

        p.cipher = suite.cipher;
        p.mac = suite.mac;
        p.etm = etm;
        Ok(())
    }

    /// Clone cipher and MAC identifiers (not keys) from `from` into the
    /// `next` slot; used to prepare a renegotiation epoch.
    pub fn dup_from(&self, from: EpochRel) -> Result<(), RecordError> {
        let prev = self.get(from)?;
        let next = match self.get(EpochRel::Next) {
            Ok(n) => n,
            Err(_) => self.setup_next(false)?,
        };

        let (cipher_id, mac_id) = {
            let p = prev.lock();
            (p.cipher.id, p.mac.id)
        };

        let mut n = next.lock();
        if n.initialized || n.cipher.key_size != 0 || n.mac.id != MacId::Null {
            return Err(RecordError::InternalError);
        }
        n.cipher = cipher_entry(cipher_id);
        n.mac = mac_entry(mac_id);
        Ok(())
    }

    /// Make `epoch` the current read epoch.
    pub fn set_read_current(&self, epoch: u16) {
        self.inner.lock().epoch_read = epoch;
    }

    /// Make `epoch` the current write epoch.
    pub fn set_write_current(&self, epoch: u16) {
        self.inner.lock().epoch_write = epoch;
    }

    /// Advance the `next` epoch counter after the previous next went live.
    pub fn bump_next(&self) {
        self.inner.lock().epoch_next += 1;
    }

    pub fn inc_usage(&self, epoch: u16) -> Result<(), RecordError> {
        let shared = self.get(EpochRel::Epoch(epoch))?;
        shared.lock().usage_count += 1;
        Ok(())
    }

    pub fn dec_usage(&self, epoch: u16) -> Result<(), RecordError> {
        let shared = self.get(EpochRel::Epoch(epoch))?;
        let mut p = shared.lock();
        if p.usage_count == 0 {
            return Err(RecordError::InternalError);
        }
        p.usage_count -= 1;
        Ok(())
    }

    /// Free slots that are neither current in either direction, nor next,
    /// nor pinned, then compact the ring so the live window stays contiguous.
    pub fn gc(&self) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        debug!("start of epoch cleanup");

        let (epoch_read, epoch_write, epoch_next) =
            (inner.epoch_read, inner.epoch_write, inner.epoch_next);
        for slot in inner.slots.iter_mut() {
            let Some(shared) = slot else { continue };
            let p = shared.lock();
            let active =
                p.epoch == epoch_read || p.epoch == epoch_write || p.epoch == epoch_next;
            if !active && p.usage_count > 0 {
                debug!("inactive epoch {} still has {} users", p.epoch, p.usage_count);
            }
            let alive = active || p.usage_count > 0;
            let epoch = p.epoch;
            drop(p);
            if !alive {
                debug!("epoch #{epoch} freed");
                *slot = None;
            }
        }

        // Close the gap of leading empty slots and lift epoch_min.
        let lead = inner.slots.iter().take_while(|s| s.is_none()).count();
        if lead != 0 && lead < MAX_EPOCH_SLOTS {
            inner.slots.rotate_left(lead);
        }
        if let Some(first) = inner.slots[0].as_ref() {
            inner.epoch_min = first.lock().epoch;
        }

        debug!("end of epoch cleanup");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cuirass_crypto::suite::suite_by_id;

    #[test]
    fn test_new_table_has_null_epoch() {
        let t = EpochTable::new(false);
        let p = t.get(EpochRel::ReadCurrent).unwrap();
        assert!(p.lock().initialized);
        assert_eq!(t.epoch_read(), 0);
        assert_eq!(t.epoch_next(), 1);
    }

    #[test]
    fn test_setup_next_is_idempotent() {
        let t = EpochTable::new(false);
        let a = t.setup_next(false).unwrap();
        let b = t.setup_next(false).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_dtls_next_epoch_patches_sequence() {
        let t = EpochTable::new(true);
        let p = t.setup_next(false).unwrap();
        assert_eq!(p.lock().write.sequence_number >> 48, 1);
    }

    #[test]
    fn test_suite_binding_rejects_double_init() {
        let t = EpochTable::new(false);
        t.setup_next(false).unwrap();
        let suite = suite_by_id(0x1301).unwrap();
        t.set_cipher_suite(suite, false, false).unwrap();
        assert_eq!(
            t.set_cipher_suite(suite, false, false),
            Err(RecordError::InternalError)
        );
    }

    #[test]
    fn test_dup_clones_suite_not_keys() {
        let t = EpochTable::new(false);
        t.setup_next(false).unwrap();
        let suite = suite_by_id(0x002f).unwrap();
        t.set_cipher_suite(suite, false, false).unwrap();

        // Pretend the epoch went live, then prepare a renegotiation clone.
        t.set_read_current(1);
        t.set_write_current(1);
        t.bump_next();
        t.dup_from(EpochRel::ReadCurrent).unwrap();

        let next = t.get(EpochRel::Next).unwrap();
        let next = next.lock();
        assert!(std::ptr::eq(next.cipher, suite.cipher));
        assert!(std::ptr::eq(next.mac, suite.mac));
        assert!(!next.initialized);
        assert!(next.read.key.is_empty());
    }

    #[test]
    fn test_out_of_window_epoch_rejected() {
        let t = EpochTable::new(false);
        assert_eq!(
            t.get(EpochRel::Epoch(40)).unwrap_err(),
            RecordError::InvalidRequest
        );
        assert!(!t.is_valid(40));
    }

    #[test]
    fn test_gc_respects_activity_and_refcount() {
        let t = EpochTable::new(false);
        t.setup_next(true).unwrap();

        // Epoch 0 still read/write current: nothing to free.
        t.gc();
        assert!(t.is_valid(0));

        // Move both directions to epoch 1 but pin 0 with a refcount.
        t.set_read_current(1);
        t.set_write_current(1);
        t.bump_next();
        t.inc_usage(0).unwrap();
        t.gc();
        assert!(t.is_valid(0), "pinned epoch must survive gc");

        // Unpin and collect: slot 0 goes away and the window compacts.
        t.dec_usage(0).unwrap();
        t.gc();
        assert!(!t.is_valid(0));
        assert!(t.is_valid(1));
        assert_eq!(t.inner.lock().epoch_min, 1);
    }

    #[test]
    fn test_window_advances_after_gc() {
        let t = EpochTable::new(false);
        // Epoch 4 is unreachable while epoch_min == 0.
        assert!(t.get(EpochRel::Epoch(4)).is_err());

        t.setup_next(true).unwrap();
        t.set_read_current(1);
        t.set_write_current(1);
        t.bump_next();
        t.gc(); // frees epoch 0, epoch_min = 1

        // Slot for epoch 4 is now in range and can be allocated.
        t.inner.lock().epoch_next = 4;
        assert!(t.setup_next(true).is_ok());
    }
}
