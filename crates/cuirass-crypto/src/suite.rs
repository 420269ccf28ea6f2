//! Cipher, MAC and cipher-suite descriptor tables.
//!
//! Mirrors the classic TLS implementation pattern of static descriptor
//! entries consulted at dispatch time: every per-record decision (nonce
//! layout, padding, tag length) is read out of a `&'static CipherEntry`
//! rather than recomputed from the algorithm identifier.

// ---------------------------------------------------------------------------
// Cipher descriptors
// ---------------------------------------------------------------------------

/// Dispatch family of a cipher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherKind {
    /// CBC block cipher; padded, MAC composed separately.
    Block,
    /// Byte-stream transform (only the identity/NULL transform is registered).
    Stream,
    /// Authenticated encryption with associated data.
    Aead,
}

/// Concrete cipher algorithms the provider knows how to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CipherId {
    Null,
    Aes128Cbc,
    Aes256Cbc,
    Aes128Gcm,
    Aes256Gcm,
    Aes128Ccm,
    Chacha20Poly1305,
}

/// Static per-cipher parameters.
///
/// `implicit_iv + explicit_iv == iv_size` for the AEAD explicit-nonce
/// family; XOR-nonce ciphers carry the whole IV implicitly.
#[derive(Debug)]
pub struct CipherEntry {
    pub id: CipherId,
    pub name: &'static str,
    pub kind: CipherKind,
    pub key_size: usize,
    pub block_size: usize,
    /// Record-layer IV length (CBC: block size; AEAD: nonce length).
    pub iv_size: usize,
    /// Portion of the nonce taken from the key schedule.
    pub implicit_iv: usize,
    /// Portion of the nonce carried on the wire per record.
    pub explicit_iv: usize,
    pub tag_size: usize,
    /// Nonce = (0-pad ‖ sequence) XOR implicit IV, nothing on the wire.
    pub xor_nonce: bool,
}

pub static CIPHER_NULL: CipherEntry = CipherEntry {
    id: CipherId::Null,
    name: "NULL",
    kind: CipherKind::Stream,
    key_size: 0,
    block_size: 1,
    iv_size: 0,
    implicit_iv: 0,
    explicit_iv: 0,
    tag_size: 0,
    xor_nonce: false,
};

pub static CIPHER_AES_128_CBC: CipherEntry = CipherEntry {
    id: CipherId::Aes128Cbc,
    name: "AES-128-CBC",
    kind: CipherKind::Block,
    key_size: 16,
    block_size: 16,
    iv_size: 16,
    implicit_iv: 0,
    explicit_iv: 16,
    tag_size: 0,
    xor_nonce: false,
};

pub static CIPHER_AES_256_CBC: CipherEntry = CipherEntry {
    id: CipherId::Aes256Cbc,
    name: "AES-256-CBC",
    kind: CipherKind::Block,
    key_size: 32,
    block_size: 16,
    iv_size: 16,
    implicit_iv: 0,
    explicit_iv: 16,
    tag_size: 0,
    xor_nonce: false,
};

pub static CIPHER_AES_128_GCM: CipherEntry = CipherEntry {
    id: CipherId::Aes128Gcm,
    name: "AES-128-GCM",
    kind: CipherKind::Aead,
    key_size: 16,
    block_size: 1,
    iv_size: 12,
    implicit_iv: 4,
    explicit_iv: 8,
    tag_size: 16,
    xor_nonce: false,
};

pub static CIPHER_AES_256_GCM: CipherEntry = CipherEntry {
    id: CipherId::Aes256Gcm,
    name: "AES-256-GCM",
    kind: CipherKind::Aead,
    key_size: 32,
    block_size: 1,
    iv_size: 12,
    implicit_iv: 4,
    explicit_iv: 8,
    tag_size: 16,
    xor_nonce: false,
};

pub static CIPHER_AES_128_CCM: CipherEntry = CipherEntry {
    id: CipherId::Aes128Ccm,
    name: "AES-128-CCM",
    kind: CipherKind::Aead,
    key_size: 16,
    block_size: 1,
    iv_size: 12,
    implicit_iv: 4,
    explicit_iv: 8,
    tag_size: 16,
    xor_nonce: false,
};

pub static CIPHER_CHACHA20_POLY1305: CipherEntry = CipherEntry {
    id: CipherId::Chacha20Poly1305,
    name: "CHACHA20-POLY1305",
    kind: CipherKind::Aead,
    key_size: 32,
    block_size: 1,
    iv_size: 12,
    implicit_iv: 12,
    explicit_iv: 0,
    tag_size: 16,
    xor_nonce: true,
};

/// Look up the static descriptor for a cipher algorithm.
pub fn cipher_entry(id: CipherId) -> &'static CipherEntry {
    match id {
        CipherId::Null => &CIPHER_NULL,
        CipherId::Aes128Cbc => &CIPHER_AES_128_CBC,
        CipherId::Aes256Cbc => &CIPHER_AES_256_CBC,
        CipherId::Aes128Gcm => &CIPHER_AES_128_GCM,
        CipherId::Aes256Gcm => &CIPHER_AES_256_GCM,
        CipherId::Aes128Ccm => &CIPHER_AES_128_CCM,
        CipherId::Chacha20Poly1305 => &CIPHER_CHACHA20_POLY1305,
    }
}

// ---------------------------------------------------------------------------
// MAC descriptors
// ---------------------------------------------------------------------------

/// Record MAC algorithms. `Aead` marks suites whose integrity comes from the
/// cipher itself; no separate MAC key is derived for them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MacId {
    Null,
    HmacSha1,
    HmacSha256,
    HmacSha384,
    Aead,
}

#[derive(Debug)]
pub struct MacEntry {
    pub id: MacId,
    pub name: &'static str,
    pub key_size: usize,
    pub output_size: usize,
}

pub static MAC_NULL: MacEntry = MacEntry {
    id: MacId::Null,
    name: "MAC-NULL",
    key_size: 0,
    output_size: 0,
};

pub static MAC_HMAC_SHA1: MacEntry = MacEntry {
    id: MacId::HmacSha1,
    name: "HMAC-SHA1",
    key_size: 20,
    output_size: 20,
};

pub static MAC_HMAC_SHA256: MacEntry = MacEntry {
    id: MacId::HmacSha256,
    name: "HMAC-SHA256",
    key_size: 32,
    output_size: 32,
};

pub static MAC_HMAC_SHA384: MacEntry = MacEntry {
    id: MacId::HmacSha384,
    name: "HMAC-SHA384",
    key_size: 48,
    output_size: 48,
};

pub static MAC_AEAD: MacEntry = MacEntry {
    id: MacId::Aead,
    name: "AEAD",
    key_size: 0,
    output_size: 0,
};

/// Look up the static descriptor for a MAC algorithm.
pub fn mac_entry(id: MacId) -> &'static MacEntry {
    match id {
        MacId::Null => &MAC_NULL,
        MacId::HmacSha1 => &MAC_HMAC_SHA1,
        MacId::HmacSha256 => &MAC_HMAC_SHA256,
        MacId::HmacSha384 => &MAC_HMAC_SHA384,
        MacId::Aead => &MAC_AEAD,
    }
}

// ---------------------------------------------------------------------------
// Cipher suites
// ---------------------------------------------------------------------------

/// Hash backing the key schedule (TLS 1.2 PRF or TLS 1.3 HKDF).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrfHash {
    Sha256,
    Sha384,
}

impl PrfHash {
    /// Output length of the PRF hash in bytes.
    pub const fn output_size(self) -> usize {
        match self {
            PrfHash::Sha256 => 32,
            PrfHash::Sha384 => 48,
        }
    }
}

/// One negotiable cipher suite: the record layer only cares about the
/// cipher/MAC/PRF binding, not the key exchange half of the name.
#[derive(Debug)]
pub struct SuiteEntry {
    /// IANA ciphersuite value.
    pub id: u16,
    pub name: &'static str,
    pub cipher: &'static CipherEntry,
    pub mac: &'static MacEntry,
    pub prf: PrfHash,
    /// Suite is only valid under TLS 1.3 framing.
    pub tls13: bool,
}

pub static SUITES: &[SuiteEntry] = &[
    SuiteEntry {
        id: 0x1301,
        name: "TLS_AES_128_GCM_SHA256",
        cipher: &CIPHER_AES_128_GCM,
        mac: &MAC_AEAD,
        prf: PrfHash::Sha256,
        tls13: true,
    },
    SuiteEntry {
        id: 0x1302,
        name: "TLS_AES_256_GCM_SHA384",
        cipher: &CIPHER_AES_256_GCM,
        mac: &MAC_AEAD,
        prf: PrfHash::Sha384,
        tls13: true,
    },
    SuiteEntry {
        id: 0x1303,
        name: "TLS_CHACHA20_POLY1305_SHA256",
        cipher: &CIPHER_CHACHA20_POLY1305,
        mac: &MAC_AEAD,
        prf: PrfHash::Sha256,
        tls13: true,
    },
    SuiteEntry {
        id: 0x1304,
        name: "TLS_AES_128_CCM_SHA256",
        cipher: &CIPHER_AES_128_CCM,
        mac: &MAC_AEAD,
        prf: PrfHash::Sha256,
        tls13: true,
    },
    SuiteEntry {
        id: 0xc02f,
        name: "TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256",
        cipher: &CIPHER_AES_128_GCM,
        mac: &MAC_AEAD,
        prf: PrfHash::Sha256,
        tls13: false,
    },
    SuiteEntry {
        id: 0xcca8,
        name: "TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256",
        cipher: &CIPHER_CHACHA20_POLY1305,
        mac: &MAC_AEAD,
        prf: PrfHash::Sha256,
        tls13: false,
    },
    SuiteEntry {
        id: 0x002f,
        name: "TLS_RSA_WITH_AES_128_CBC_SHA",
        cipher: &CIPHER_AES_128_CBC,
        mac: &MAC_HMAC_SHA1,
        prf: PrfHash::Sha256,
        tls13: false,
    },
    SuiteEntry {
        id: 0x003d,
        name: "TLS_RSA_WITH_AES_256_CBC_SHA256",
        cipher: &CIPHER_AES_256_CBC,
        mac: &MAC_HMAC_SHA256,
        prf: PrfHash::Sha256,
        tls13: false,
    },
    SuiteEntry {
        id: 0x0002,
        name: "TLS_RSA_WITH_NULL_SHA",
        cipher: &CIPHER_NULL,
        mac: &MAC_HMAC_SHA1,
        prf: PrfHash::Sha256,
        tls13: false,
    },
];

/// Find a suite by its IANA value.
pub fn suite_by_id(id: u16) -> Option<&'static SuiteEntry> {
    SUITES.iter().find(|s| s.id == id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aead_nonce_geometry() {
        let gcm = cipher_entry(CipherId::Aes128Gcm);
        assert_eq!(gcm.implicit_iv + gcm.explicit_iv, gcm.iv_size);
        assert!(!gcm.xor_nonce);

        let chacha = cipher_entry(CipherId::Chacha20Poly1305);
        assert_eq!(chacha.implicit_iv, 12);
        assert_eq!(chacha.explicit_iv, 0);
        assert!(chacha.xor_nonce);
    }

    #[test]
    fn test_cbc_iv_is_blocksize() {
        for id in [CipherId::Aes128Cbc, CipherId::Aes256Cbc] {
            let e = cipher_entry(id);
            assert_eq!(e.iv_size, e.block_size);
            assert_eq!(e.tag_size, 0);
        }
    }

    #[test]
    fn test_suite_lookup() {
        let s = suite_by_id(0x1301).unwrap();
        assert_eq!(s.name, "TLS_AES_128_GCM_SHA256");
        assert!(s.tls13);
        assert!(suite_by_id(0xffff).is_none());
    }
}
