//! Segmented parameter transfer (ISDU) over the on-request data channel.
//!
//! A request is flattened into `[control, data]` pairs, one OD byte per
//! cycle. The response comes back the same way: pairs of a control byte
//! and a data byte, the start bit on the first control byte and the last
//! bit on the control byte of the final pair. An empty value is the single
//! control byte [`EMPTY_RESPONSE`].
//!
//! This module is sans-io. [`IsduRequest::od_bytes()`] yields the bytes to
//! transmit, and the [`Receiver`] implementations consume the OD byte of
//! each response. The [`Master`](crate::Master) wires the two to a transport.

use core::fmt;

use snafu::{ensure, Snafu};

use crate::types::ControlByte;

/// Error type for this module
#[derive(Debug, Snafu, PartialEq, Eq, Clone)]
#[non_exhaustive]
pub enum Error {
    /// A cycle of the transfer got no valid response.
    #[snafu(display("ISDU {operation} {index:#06X}/{subindex}: no valid response"))]
    Timeout {
        operation: Operation,
        index: u16,
        subindex: u8,
    },
    /// The device never presented a control byte with the start bit.
    #[snafu(display(
        "ISDU {operation} {index:#06X}/{subindex}: no start marker within {polls} polls"
    ))]
    NoStart {
        operation: Operation,
        index: u16,
        subindex: u8,
        polls: usize,
    },
    /// More data than any parameter holds arrived without a last marker.
    #[snafu(display(
        "ISDU {operation} {index:#06X}/{subindex}: no last marker after {len} bytes"
    ))]
    Overrun {
        operation: Operation,
        index: u16,
        subindex: u8,
        len: usize,
    },
    /// No non-zero acknowledgement arrived after a write.
    #[snafu(display(
        "ISDU {operation} {index:#06X}/{subindex}: no acknowledgement within {polls} polls"
    ))]
    NoAck {
        operation: Operation,
        index: u16,
        subindex: u8,
        polls: usize,
    },
    /// Write data doesn't fit the extended length byte.
    #[snafu(display("ISDU write of {len} bytes, at most {MAX_WRITE_LEN} allowed"))]
    DataTooLong { len: usize },
}

/// Service byte of a read request, length nibble zero.
pub const SERVICE_READ: u8 = 0x90;
/// Service nibble of a write request. A zero length nibble means that an
/// explicit length byte follows.
pub const SERVICE_WRITE: u8 = 0xA0;
/// Longest data carried by the short (length nibble) form.
pub const MAX_SHORT_LEN: usize = 15;
/// Longest write data, limited by the extended length byte.
pub const MAX_WRITE_LEN: usize = 255;
/// Upper bound for a response, reaching it without a last marker is a desync.
pub const MAX_RESPONSE_DATA: usize = 256;
/// Control byte with start, last and all sequence bits set, answering a
/// read of an empty value. No data byte follows it.
pub const EMPTY_RESPONSE: u8 = 0xFF;

/// Well known parameter indices.
pub mod index {
    pub const SYSTEM_COMMAND: u16 = 0x0002;
    pub const DEVICE_ACCESS_LOCKS: u16 = 0x000C;
    pub const VENDOR_NAME: u16 = 0x0010;
    pub const VENDOR_TEXT: u16 = 0x0011;
    pub const PRODUCT_NAME: u16 = 0x0012;
    pub const PRODUCT_ID: u16 = 0x0013;
    pub const PRODUCT_TEXT: u16 = 0x0014;
    pub const SERIAL_NUMBER: u16 = 0x0015;
    pub const HARDWARE_REVISION: u16 = 0x0016;
    pub const FIRMWARE_REVISION: u16 = 0x0017;
    pub const APPLICATION_TAG: u16 = 0x0018;
    pub const DEVICE_STATUS: u16 = 0x001B;
    pub const DETAILED_DEVICE_STATUS: u16 = 0x001C;
    pub const REVISION_ID: u16 = 0x001E;
    pub const MIN_CYCLE_TIME: u16 = 0x0024;
}

/// Values written to [`index::SYSTEM_COMMAND`].
pub mod system_command {
    pub const DEVICE_RESET: u8 = 0x80;
    pub const APPLICATION_RESET: u8 = 0x81;
    pub const RESTORE_FACTORY_SETTINGS: u8 = 0x82;
    pub const BACK_TO_BOX: u8 = 0x83;
}

#[derive(PartialEq, Eq, Debug, Copy, Clone, Hash)]
pub enum Operation {
    Read,
    Write,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => f.write_str("read"),
            Self::Write => f.write_str("write"),
        }
    }
}

/// A parameter read or write.
#[derive(PartialEq, Eq, Debug, Clone)]
pub struct IsduRequest {
    operation: Operation,
    index: u16,
    subindex: u8,
    data: Vec<u8>,
}

impl IsduRequest {
    pub fn read(index: u16, subindex: u8) -> Self {
        Self {
            operation: Operation::Read,
            index,
            subindex,
            data: Vec::new(),
        }
    }

    /// # Errors
    /// Returns [`Error::DataTooLong`] for more than [`MAX_WRITE_LEN`] bytes.
    pub fn write(index: u16, subindex: u8, data: &[u8]) -> Result<Self, Error> {
        ensure!(
            data.len() <= MAX_WRITE_LEN,
            DataTooLongSnafu { len: data.len() }
        );
        Ok(Self {
            operation: Operation::Write,
            index,
            subindex,
            data: data.to_vec(),
        })
    }

    pub const fn operation(&self) -> Operation {
        self.operation
    }

    pub const fn index(&self) -> u16 {
        self.index
    }

    pub const fn subindex(&self) -> u8 {
        self.subindex
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// The request as sent, before interleaving with control bytes.
    ///
    /// Read: `[0x90, idx_hi, idx_lo, sub]`.
    /// Write, 1 to 15 bytes: `[0xA0 | len, idx_hi, idx_lo, sub] + data`.
    /// Write, otherwise: `[0xA0, len, idx_hi, idx_lo, sub] + data`.
    ///
    /// A zero length write takes the extended form. The short form would
    /// be `[0xA0, idx_hi, ..]`, and its service byte can't be told apart
    /// from the extended marker.
    pub fn service_bytes(&self) -> Vec<u8> {
        let [idx_hi, idx_lo] = self.index.to_be_bytes();
        let mut bytes = Vec::with_capacity(5 + self.data.len());
        match self.operation {
            Operation::Read => bytes.push(SERVICE_READ),
            Operation::Write => {
                let len = self.data.len();
                if (1..=MAX_SHORT_LEN).contains(&len) {
                    bytes.push(SERVICE_WRITE | len as u8);
                } else {
                    bytes.push(SERVICE_WRITE);
                    bytes.push(len as u8);
                }
            }
        }
        bytes.extend_from_slice(&[idx_hi, idx_lo, self.subindex]);
        bytes.extend_from_slice(&self.data);
        bytes
    }

    /// `[control, data]` pairs, start bit on the first, last bit on the final
    /// pair, sequence number counting up modulo 64.
    pub fn segments(&self) -> Segments {
        Segments {
            bytes: self.service_bytes(),
            pos: 0,
        }
    }

    /// The segments flattened into the OD bytes of consecutive cycles.
    pub fn od_bytes(&self) -> impl Iterator<Item = u8> {
        self.segments().flat_map(|pair| pair.to_vec())
    }
}

/// Iterator over the `[control, data]` pairs of a request.
#[derive(Debug, Clone)]
pub struct Segments {
    bytes: Vec<u8>,
    pos: usize,
}

impl Iterator for Segments {
    type Item = [u8; 2];

    fn next(&mut self) -> Option<Self::Item> {
        let data = *self.bytes.get(self.pos)?;
        let start = self.pos == 0;
        let last = self.pos + 1 == self.bytes.len();
        let control = ControlByte::new(start, last, (self.pos % 64) as u8);
        self.pos += 1;
        Some([control.as_byte(), data])
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.bytes.len() - self.pos;
        (n, Some(n))
    }
}

impl ExactSizeIterator for Segments {}

/// Outcome of feeding one OD byte to a [`Receiver`].
#[derive(Debug)]
pub enum ReceiverResult<R, T> {
    /// Another cycle is needed.
    NeedData(R),
    Done(T),
}

/// Consumes the OD byte of successive responses after a request was sent.
pub trait Receiver: Sized {
    type Response;

    /// Feed the first OD byte of the next response.
    fn receive_od(self, od: u8) -> ReceiverResult<Self, Result<Self::Response, Error>>;
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
struct Header {
    operation: Operation,
    index: u16,
    subindex: u8,
}

impl From<&IsduRequest> for Header {
    fn from(req: &IsduRequest) -> Self {
        Self {
            operation: req.operation,
            index: req.index,
            subindex: req.subindex,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Phase {
    WaitStart,
    /// The next byte is data, the final one if the preceding control byte
    /// carried the last bit.
    Data { last: bool },
    Control,
}

/// Reassembles a read response.
///
/// Expects `[control, data]` pairs: `[0x80, 'h', 0x41, 'i']` is `"hi"`, and
/// `[0xC0, 'x']` is `"x"`.
///
/// Non-start bytes before the start marker are the device being busy and
/// are skipped, up to the poll budget. The response to the final request
/// cycle is looked at first and doesn't count against the budget.
#[derive(Debug)]
pub struct ResponseCollector {
    header: Header,
    phase: Phase,
    looks_left: usize,
    poll_limit: usize,
    data: Vec<u8>,
}

impl ResponseCollector {
    pub fn new(request: &IsduRequest, poll_limit: usize) -> Self {
        Self {
            header: request.into(),
            phase: Phase::WaitStart,
            looks_left: poll_limit + 1,
            poll_limit,
            data: Vec::new(),
        }
    }

    fn fail(self, kind: impl FnOnce(Header) -> Error) -> ReceiverResult<Self, Result<Vec<u8>, Error>> {
        ReceiverResult::Done(Err(kind(self.header)))
    }
}

impl Receiver for ResponseCollector {
    type Response = Vec<u8>;

    fn receive_od(mut self, od: u8) -> ReceiverResult<Self, Result<Vec<u8>, Error>> {
        match self.phase {
            Phase::WaitStart => {
                let control = ControlByte::from_byte(od);
                if od == EMPTY_RESPONSE {
                    return ReceiverResult::Done(Ok(self.data));
                } else if control.start() {
                    self.phase = Phase::Data {
                        last: control.last(),
                    };
                } else {
                    self.looks_left -= 1;
                    if self.looks_left == 0 {
                        let polls = self.poll_limit;
                        return self.fail(|h| Error::NoStart {
                            operation: h.operation,
                            index: h.index,
                            subindex: h.subindex,
                            polls,
                        });
                    }
                }
            }
            Phase::Data { last } => {
                if self.data.len() == MAX_RESPONSE_DATA {
                    let len = self.data.len();
                    return self.fail(|h| Error::Overrun {
                        operation: h.operation,
                        index: h.index,
                        subindex: h.subindex,
                        len,
                    });
                }
                self.data.push(od);
                if last {
                    return ReceiverResult::Done(Ok(self.data));
                }
                self.phase = Phase::Control;
            }
            Phase::Control => {
                self.phase = Phase::Data {
                    last: ControlByte::from_byte(od).last(),
                };
            }
        }
        ReceiverResult::NeedData(self)
    }
}

/// Waits for the acknowledgement of a write: any non-zero OD byte. The
/// acknowledgement isn't decoded, and a data byte following it is ignored.
#[derive(Debug)]
pub struct WriteAckWaiter {
    header: Header,
    looks_left: usize,
    poll_limit: usize,
}

impl WriteAckWaiter {
    pub fn new(request: &IsduRequest, poll_limit: usize) -> Self {
        Self {
            header: request.into(),
            looks_left: poll_limit + 1,
            poll_limit,
        }
    }
}

impl Receiver for WriteAckWaiter {
    /// The acknowledging control byte, as received.
    type Response = u8;

    fn receive_od(mut self, od: u8) -> ReceiverResult<Self, Result<u8, Error>> {
        if od != 0 {
            return ReceiverResult::Done(Ok(od));
        }
        self.looks_left -= 1;
        if self.looks_left == 0 {
            let h = self.header;
            return ReceiverResult::Done(Err(Error::NoAck {
                operation: h.operation,
                index: h.index,
                subindex: h.subindex,
                polls: self.poll_limit,
            }));
        }
        ReceiverResult::NeedData(self)
    }
}
