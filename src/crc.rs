//! CRC-16/CCITT packet checksum.
//!
//! Polynomial 0x1021, initial value 0xFFFF, no reflection, no final xor
//! (catalogued as CRC-16/IBM-3740, a.k.a. CCITT-FALSE). Transmitted
//! least-significant byte first.

use crate::constants::CRC_LEN;

const CCITT: ::crc::Crc<u16> = ::crc::Crc::<u16>::new(&::crc::CRC_16_IBM_3740);

/// Checksum of `bytes`.
#[inline]
pub fn compute(bytes: &[u8]) -> u16 {
    CCITT.checksum(bytes)
}

/// Copy of `bytes` with the checksum appended, LSB first.
pub fn append(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len() + CRC_LEN);
    out.extend_from_slice(bytes);
    out.extend_from_slice(&compute(bytes).to_le_bytes());
    out
}

/// Whether the trailing two bytes are the checksum of everything before them.
pub fn validate(bytes_with_crc: &[u8]) -> bool {
    match split(bytes_with_crc) {
        Some((body, received)) => compute(body) == received,
        None => false,
    }
}

/// Split into body and the received (little-endian) checksum.
pub fn split(bytes_with_crc: &[u8]) -> Option<(&[u8], u16)> {
    let body_len = bytes_with_crc.len().checked_sub(CRC_LEN)?;
    let (body, tail) = bytes_with_crc.split_at(body_len);
    Some((body, u16::from_le_bytes([tail[0], tail[1]])))
}

/// Body without its checksum; `None` if too short to carry one.
pub fn strip(bytes_with_crc: &[u8]) -> Option<&[u8]> {
    split(bytes_with_crc).map(|(body, _)| body)
}
