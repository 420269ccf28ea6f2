//! MAC preamble (TLS 1.2) and AEAD associated data (TLS 1.3).

/// TLS 1.2 preamble: `sequence(8) ‖ type(1) ‖ version(2) ‖ length(2)`.
///
/// The length field's meaning shifts with the construction: plaintext size
/// for MAC-then-encrypt and AEAD, ciphertext-minus-tag size for
/// encrypt-then-MAC.
pub const PREAMBLE_SIZE: usize = 13;

pub fn make_preamble(sequence: u64, ctype: u8, version: [u8; 2], length: u16) -> [u8; PREAMBLE_SIZE] {
    let mut p = [0u8; PREAMBLE_SIZE];
    p[..8].copy_from_slice(&sequence.to_be_bytes());
    p[8] = ctype;
    p[9] = version[0];
    p[10] = version[1];
    p[11..13].copy_from_slice(&length.to_be_bytes());
    p
}

/// TLS 1.3 AAD: `application_data(0x17) ‖ 0x0303 ‖ length(2)` where the
/// length covers inner plaintext, inner type byte, padding and tag.
pub fn make_tls13_aad(wire_length: u16) -> [u8; 5] {
    let mut aad = [0x17, 0x03, 0x03, 0, 0];
    aad[3..5].copy_from_slice(&wire_length.to_be_bytes());
    aad
}
