//! CRC-16/CCITT validation for wire frames.

use crc_all::CrcAlgo;

/// Calculates a 16-bit CRC using the CRC-16-CCITT-FALSE algorithm over a
/// slice of bytes.
///
/// Every binary frame carries this checksum, computed over everything after
/// the two start-of-frame bytes through the last payload byte. The
/// algorithm uses:
/// - Polynomial: 0x1021
/// - Initial value: 0xFFFF
/// - No output XOR
/// - No bit reflection
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc = CRC16_INIT;
    CRC16.update_crc(&mut crc, data);
    CRC16.finish_crc(&crc)
}

const CRC16_INIT: u16 = 0xFFFF;

const CRC16: CrcAlgo<u16> = CrcAlgo::<u16>::new(
    0x1021,     // polynomial (CRC-16-CCITT-FALSE)
    16,         // width
    CRC16_INIT, // init
    0,          // xorout
    false,      // reflect
);
