//! Master frame (M-sequence) encoding.
//!
//! See [`encode_type0`] and [`encode_cyclic`].

use arrayvec::ArrayVec;
use snafu::{ensure, Snafu};

use crate::crc::{checksum_type0, checksum_type1};
use crate::types::{FrameConfig, OnRequestData, MAX_PD_LEN};

/// Error type for this module
#[derive(Debug, Snafu, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// The session has no cyclic frame geometry.
    #[snafu(display("Type 0 sessions have no cyclic frames"))]
    NotCyclic,
    /// The process data doesn't match the configured PD out length.
    #[snafu(display("PD out has {len} bytes, expected {expected}"))]
    PdLength { len: usize, expected: usize },
    /// The OD doesn't match the configured OD width.
    #[snafu(display("OD has {len} bytes, expected {expected}"))]
    OdLength { len: usize, expected: usize },
}

/// Command and CKT byte, 32 bytes PD, two OD bytes and the checksum.
pub const MAX_FRAME_LEN: usize = 2 + MAX_PD_LEN + 2 + 1;

/// An encoded master frame.
pub type Frame = ArrayVec<u8, MAX_FRAME_LEN>;

/// Master command bytes.
pub mod command {
    /// Wake-up request.
    pub const WAKEUP: u8 = 0x95;
    /// Idle frame, used to probe for and clock out device responses.
    pub const IDLE: u8 = 0x00;
    /// Request the device to switch to cyclic exchange.
    pub const OPERATE: u8 = 0x0F;
    /// Ask the device for a pending event.
    pub const EVENT_REQUEST: u8 = 0xA2;
}

/// Encode a Type 0 frame: `[command, checksum]`.
pub fn encode_type0(command: u8, ckt: u8) -> Frame {
    let mut frame = Frame::new();
    frame.push(command);
    frame.push(checksum_type0(command, ckt));
    frame
}

/// Encode a cyclic frame: `[command, ckt] + pd_out + od_bytes + [checksum]`.
///
/// `pd_out` and `od` must match the geometry in `config`.
///
/// # Example
/// ```
/// use iolink_master::frame::encode_cyclic;
/// use iolink_master::{FrameConfig, OnRequestData, SequenceType};
/// let config = FrameConfig::new(SequenceType::Type1_2, 2, 2).unwrap();
/// let frame = encode_cyclic(&config, 0x00, 0x00, &[0x12, 0x34], OnRequestData::One(0)).unwrap();
/// assert_eq!(frame.len(), 6);
/// ```
pub fn encode_cyclic(
    config: &FrameConfig,
    command: u8,
    ckt: u8,
    pd_out: &[u8],
    od: OnRequestData,
) -> Result<Frame, Error> {
    ensure!(config.sequence_type().is_cyclic(), NotCyclicSnafu);
    ensure!(
        pd_out.len() == config.pd_out_len(),
        PdLengthSnafu {
            len: pd_out.len(),
            expected: config.pd_out_len(),
        }
    );
    ensure!(
        od.len() == config.od_len(),
        OdLengthSnafu {
            len: od.len(),
            expected: config.od_len(),
        }
    );

    let mut frame = Frame::new();
    frame.push(command);
    frame.push(ckt);
    // Capacity is fixed by MAX_PD_LEN, which FrameConfig enforces.
    for byte in pd_out {
        frame.push(*byte);
    }
    frame.push(od.first());
    if let Some(od2) = od.second() {
        frame.push(od2);
    }
    frame.push(checksum_type1(command, ckt, pd_out, od.first(), od.second()));
    Ok(frame)
}

/// Flip every bit of the trailing checksum byte.
///
/// A device must drop such a frame, which the master sees as a missing response.
pub fn corrupt_checksum(frame: &mut Frame) {
    if let Some(ck) = frame.last_mut() {
        *ck ^= 0xFF;
    }
}
