//! This module defines range-checked types for the session configuration,
//! meant to make invalid frame geometries unrepresentable.

use snafu::{ensure, Snafu};

use core::convert::TryFrom;
use core::fmt;
use core::ops::RangeInclusive;
use core::str::FromStr;

/// Error type for this module
#[derive(Debug, Snafu, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// The value doesn't name a known M-sequence type.
    #[snafu(display("Invalid M-sequence type"))]
    InvalidSequenceType,
    /// Process data lengths outside of what the sequence type allows.
    #[snafu(display(
        "Invalid PD length for {sequence_type}: in={pd_in}, out={pd_out}"
    ))]
    InvalidPdLength {
        sequence_type: SequenceType,
        pd_in: usize,
        pd_out: usize,
    },
    /// The sequence type has a fixed PD geometry.
    #[snafu(display("PD length is fixed for {sequence_type}"))]
    FixedPdLength { sequence_type: SequenceType },
    /// Not one of COM1, COM2, COM3.
    #[snafu(display("Invalid baud rate"))]
    InvalidBaudRate,
    /// Not SDCI or SIO.
    #[snafu(display("Invalid PHY mode"))]
    InvalidPhyMode,
}

const fn invalid_sequence_type() -> InvalidSequenceTypeSnafu {
    InvalidSequenceTypeSnafu
}

const fn invalid_baud_rate() -> InvalidBaudRateSnafu {
    InvalidBaudRateSnafu
}

/// Longest process data image carried by a single frame.
pub const MAX_PD_LEN: usize = 32;

/// Allowed PD lengths for the variable (`*_V`) sequence types.
pub const VARIABLE_PD_RANGE: RangeInclusive<usize> = 2..=MAX_PD_LEN;

/// M-sequence type, i.e. the frame geometry of a communication cycle.
#[derive(PartialEq, Eq, Debug, Copy, Clone, Hash)]
#[allow(non_camel_case_types)]
pub enum SequenceType {
    /// On-request data only.
    Type0,
    Type1_1,
    Type1_2,
    /// Negotiable PD length, 1 byte OD.
    Type1_V,
    Type2_1,
    Type2_2,
    /// Negotiable PD length, 2 byte OD.
    Type2_V,
}

impl SequenceType {
    /// Width of the on-request data channel in bytes.
    pub const fn od_len(self) -> usize {
        match self {
            Self::Type0 | Self::Type1_1 | Self::Type1_2 | Self::Type1_V => 1,
            Self::Type2_1 | Self::Type2_2 | Self::Type2_V => 2,
        }
    }

    /// True for the types whose PD length may be changed during a session.
    pub const fn is_variable(self) -> bool {
        matches!(self, Self::Type1_V | Self::Type2_V)
    }

    /// True for every type that carries process data in a cyclic frame.
    pub const fn is_cyclic(self) -> bool {
        !matches!(self, Self::Type0)
    }

    /// Numeric code used by conformance scripts: 0, 11, 12, 13 (1_V), 21, 22, 23 (2_V).
    pub const fn code(self) -> u8 {
        match self {
            Self::Type0 => 0,
            Self::Type1_1 => 11,
            Self::Type1_2 => 12,
            Self::Type1_V => 13,
            Self::Type2_1 => 21,
            Self::Type2_2 => 22,
            Self::Type2_V => 23,
        }
    }
}

impl TryFrom<u8> for SequenceType {
    type Error = Error;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Ok(match code {
            0 => Self::Type0,
            11 => Self::Type1_1,
            12 => Self::Type1_2,
            13 => Self::Type1_V,
            21 => Self::Type2_1,
            22 => Self::Type2_2,
            23 => Self::Type2_V,
            _ => return invalid_sequence_type().fail(),
        })
    }
}

impl FromStr for SequenceType {
    type Err = Error;

    /// Accepts `0`, `1_2`, `TYPE_1_2`, `type2_v`, or a numeric code like `12`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        let name = upper
            .strip_prefix("TYPE_")
            .or_else(|| upper.strip_prefix("TYPE"))
            .unwrap_or(&upper);
        Ok(match name {
            "0" => Self::Type0,
            "1_1" => Self::Type1_1,
            "1_2" => Self::Type1_2,
            "1_V" => Self::Type1_V,
            "2_1" => Self::Type2_1,
            "2_2" => Self::Type2_2,
            "2_V" => Self::Type2_V,
            other => {
                let code: u8 = other.parse().map_err(|_| Error::InvalidSequenceType)?;
                Self::try_from(code)?
            }
        })
    }
}

impl fmt::Display for SequenceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Type0 => "TYPE_0",
            Self::Type1_1 => "TYPE_1_1",
            Self::Type1_2 => "TYPE_1_2",
            Self::Type1_V => "TYPE_1_V",
            Self::Type2_1 => "TYPE_2_1",
            Self::Type2_2 => "TYPE_2_2",
            Self::Type2_V => "TYPE_2_V",
        };
        f.write_str(name)
    }
}

/// Frame geometry of a session.
///
/// The OD length is derived from the sequence type and can't be set on its own.
///
/// ## Example
/// ```
/// use iolink_master::{FrameConfig, SequenceType};
/// let config = FrameConfig::new(SequenceType::Type2_V, 4, 8).unwrap();
/// assert_eq!(config.od_len(), 2);
/// assert!(config.with_pd_lengths(1, 8).is_err());
/// ```
#[derive(PartialEq, Eq, Debug, Copy, Clone, Hash)]
pub struct FrameConfig {
    sequence_type: SequenceType,
    pd_in_len: usize,
    pd_out_len: usize,
}

impl FrameConfig {
    /// Create a new frame configuration, checking the PD lengths against
    /// the sequence type.
    /// # Errors
    /// Returns [`Error::InvalidPdLength`] if the lengths don't fit the sequence type.
    pub fn new(
        sequence_type: SequenceType,
        pd_in_len: usize,
        pd_out_len: usize,
    ) -> Result<Self, Error> {
        let ok = |len: usize| match sequence_type {
            SequenceType::Type0 => len == 0,
            t if t.is_variable() => VARIABLE_PD_RANGE.contains(&len),
            _ => len <= MAX_PD_LEN,
        };
        ensure!(
            ok(pd_in_len) && ok(pd_out_len),
            InvalidPdLengthSnafu {
                sequence_type,
                pd_in: pd_in_len,
                pd_out: pd_out_len,
            }
        );
        Ok(Self {
            sequence_type,
            pd_in_len,
            pd_out_len,
        })
    }

    /// A Type 0 session, carrying on-request data only.
    pub const fn type0() -> Self {
        Self {
            sequence_type: SequenceType::Type0,
            pd_in_len: 0,
            pd_out_len: 0,
        }
    }

    /// Return a copy with new PD lengths. Only variable sequence types
    /// accept this, and only with lengths in `[2, 32]`.
    /// # Errors
    /// [`Error::FixedPdLength`] for fixed geometries, [`Error::InvalidPdLength`]
    /// if a length is out of range.
    pub fn with_pd_lengths(self, pd_in_len: usize, pd_out_len: usize) -> Result<Self, Error> {
        let sequence_type = self.sequence_type;
        ensure!(
            VARIABLE_PD_RANGE.contains(&pd_in_len) && VARIABLE_PD_RANGE.contains(&pd_out_len),
            InvalidPdLengthSnafu {
                sequence_type,
                pd_in: pd_in_len,
                pd_out: pd_out_len,
            }
        );
        ensure!(sequence_type.is_variable(), FixedPdLengthSnafu { sequence_type });
        Self::new(sequence_type, pd_in_len, pd_out_len)
    }

    pub const fn sequence_type(&self) -> SequenceType {
        self.sequence_type
    }

    pub const fn pd_in_len(&self) -> usize {
        self.pd_in_len
    }

    pub const fn pd_out_len(&self) -> usize {
        self.pd_out_len
    }

    /// Width of the OD channel, derived from the sequence type.
    pub const fn od_len(&self) -> usize {
        self.sequence_type.od_len()
    }

    /// Length of a cyclic request frame: command, CKT, PD out, OD and checksum.
    pub const fn request_len(&self) -> usize {
        match self.sequence_type {
            SequenceType::Type0 => 2,
            _ => 2 + self.pd_out_len + self.od_len() + 1,
        }
    }

    /// Length of the expected device response: status, PD in, OD and checksum.
    pub const fn response_len(&self) -> usize {
        match self.sequence_type {
            SequenceType::Type0 => 2,
            _ => 1 + self.pd_in_len + self.od_len() + 1,
        }
    }
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self::type0()
    }
}

impl FromStr for FrameConfig {
    type Err = Error;

    /// Parses `<type>[:<pd_in>:<pd_out>]`, e.g. `1_2:2:2` or `0`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(':');
        let sequence_type: SequenceType = parts.next().unwrap_or_default().parse()?;
        let mut len = |seq| -> Result<usize, Error> {
            match parts.next() {
                Some(n) => n.trim().parse().map_err(|_| Error::InvalidPdLength {
                    sequence_type: seq,
                    pd_in: 0,
                    pd_out: 0,
                }),
                None => Ok(0),
            }
        };
        let pd_in = len(sequence_type)?;
        let pd_out = len(sequence_type)?;
        Self::new(sequence_type, pd_in, pd_out)
    }
}

/// ISDU flow control byte: `start` is bit 7, `last` is bit 6, and
/// the low six bits hold a sequence number.
#[derive(PartialEq, Eq, Debug, Copy, Clone, Hash)]
#[repr(transparent)]
pub struct ControlByte(u8);

impl ControlByte {
    pub const START: u8 = 0x80;
    pub const LAST: u8 = 0x40;
    pub const SEQ_MASK: u8 = 0x3F;

    /// Build a control byte. The sequence number is taken modulo 64.
    pub const fn new(start: bool, last: bool, seq: u8) -> Self {
        let mut byte = seq & Self::SEQ_MASK;
        if start {
            byte |= Self::START;
        }
        if last {
            byte |= Self::LAST;
        }
        Self(byte)
    }

    pub const fn from_byte(byte: u8) -> Self {
        Self(byte)
    }

    pub const fn start(self) -> bool {
        self.0 & Self::START != 0
    }

    pub const fn last(self) -> bool {
        self.0 & Self::LAST != 0
    }

    pub const fn seq(self) -> u8 {
        self.0 & Self::SEQ_MASK
    }

    pub const fn as_byte(self) -> u8 {
        self.0
    }
}

impl From<ControlByte> for u8 {
    fn from(cb: ControlByte) -> Self {
        cb.0
    }
}

/// The on-request data bytes of one frame, one or two bytes wide
/// depending on the sequence type.
#[derive(PartialEq, Eq, Debug, Copy, Clone, Hash)]
pub enum OnRequestData {
    One(u8),
    Two(u8, u8),
}

impl OnRequestData {
    /// OD of the given width carrying `byte` in its first position.
    pub const fn with_first(od_len: usize, byte: u8) -> Self {
        if od_len == 2 {
            Self::Two(byte, 0)
        } else {
            Self::One(byte)
        }
    }

    pub const fn first(self) -> u8 {
        match self {
            Self::One(od) | Self::Two(od, _) => od,
        }
    }

    pub const fn second(self) -> Option<u8> {
        match self {
            Self::One(_) => None,
            Self::Two(_, od2) => Some(od2),
        }
    }

    pub const fn len(self) -> usize {
        match self {
            Self::One(_) => 1,
            Self::Two(..) => 2,
        }
    }
}

/// Transmission rate of the link.
#[derive(PartialEq, Eq, Debug, Copy, Clone, Hash)]
pub enum BaudRate {
    /// 4.8 kbit/s
    Com1,
    /// 38.4 kbit/s
    Com2,
    /// 230.4 kbit/s
    Com3,
}

impl BaudRate {
    pub const fn bits_per_second(self) -> u32 {
        match self {
            Self::Com1 => 4_800,
            Self::Com2 => 38_400,
            Self::Com3 => 230_400,
        }
    }
}

impl Default for BaudRate {
    fn default() -> Self {
        Self::Com2
    }
}

impl FromStr for BaudRate {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "COM1" => Ok(Self::Com1),
            "COM2" => Ok(Self::Com2),
            "COM3" => Ok(Self::Com3),
            _ => invalid_baud_rate().fail(),
        }
    }
}

impl fmt::Display for BaudRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Com1 => f.write_str("COM1"),
            Self::Com2 => f.write_str("COM2"),
            Self::Com3 => f.write_str("COM3"),
        }
    }
}

/// Physical layer mode.
#[derive(PartialEq, Eq, Debug, Copy, Clone, Hash)]
pub enum PhyMode {
    /// Standard IO-Link communication.
    Sdci,
    /// Standard I/O, the line is used as a plain switching signal.
    Sio,
}

impl Default for PhyMode {
    fn default() -> Self {
        Self::Sdci
    }
}

impl FromStr for PhyMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SDCI" => Ok(Self::Sdci),
            "SIO" => Ok(Self::Sio),
            _ => InvalidPhyModeSnafu.fail(),
        }
    }
}
