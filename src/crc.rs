//! 6-bit checksum used on every M-sequence.
//!
//! The accumulator is eight bits wide with the polynomial `x^6+x^4+x^3+x^2+1`
//! (`0x1D`) pre-shifted into the upper six bits, seeded with `0x15`.

const SEED: u8 = 0x15;
const POLY: u8 = 0x1D << 2;

/// Compute the 6-bit CRC of `data`. The result is always in `0..=63`.
pub fn crc6(data: &[u8]) -> u8 {
    let mut crc = Crc6::new();
    crc.update(data);
    crc.finish()
}

/// Checksum of a Type 0 M-sequence: master command and CKT byte.
pub fn checksum_type0(command: u8, ckt: u8) -> u8 {
    crc6(&[command, ckt])
}

/// Checksum of a cyclic M-sequence.
///
/// Covers the command, the CKT byte, the process data and the OD byte(s)
/// actually present in the frame.
pub fn checksum_type1(command: u8, ckt: u8, pd: &[u8], od: u8, od2: Option<u8>) -> u8 {
    let mut crc = Crc6::new();
    crc.update(&[command, ckt]);
    crc.update(pd);
    crc.update(&[od]);
    if let Some(od2) = od2 {
        crc.update(&[od2]);
    }
    crc.finish()
}

/// Checksum a well-behaved device appends to its response, computed over
/// every response byte before the checksum itself.
pub fn response_checksum(body: &[u8]) -> u8 {
    crc6(body)
}

/// Incremental form of [`crc6`], for checksumming data held in several slices.
#[derive(Debug, Clone, Copy)]
pub struct Crc6(u8);

impl Crc6 {
    pub const fn new() -> Self {
        Self(SEED)
    }

    pub fn update(&mut self, data: &[u8]) {
        for byte in data {
            self.0 ^= *byte;
            for _ in 0..8 {
                self.0 = if self.0 & 0x80 != 0 {
                    (self.0 << 1) ^ POLY
                } else {
                    self.0 << 1
                };
            }
        }
    }

    pub const fn finish(self) -> u8 {
        (self.0 >> 2) & 0x3F
    }
}

impl Default for Crc6 {
    fn default() -> Self {
        Self::new()
    }
}
