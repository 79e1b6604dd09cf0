//! Device responses and their decoding.

use arrayvec::ArrayVec;

use crate::crc::response_checksum;
use crate::nom_parser::{cyclic_response, type0_response};
use crate::types::{OnRequestData, MAX_PD_LEN};

/// Longest response a device can send: status, 32 bytes PD, two OD bytes and checksum.
pub const MAX_RESPONSE_LEN: usize = 1 + MAX_PD_LEN + 2 + 1;

type RawBytes = ArrayVec<u8, MAX_RESPONSE_LEN>;
type Payload = ArrayVec<u8, MAX_PD_LEN>;

/// Result of checking the checksum byte of a response.
#[derive(PartialEq, Eq, Debug, Copy, Clone)]
pub enum ChecksumStatus {
    Ok,
    Mismatch { expected: u8, received: u8 },
    /// Nothing to check, the response is not valid.
    NotReceived,
}

/// One response from the device, as received in reply to a single frame.
///
/// `is_valid()` only says that enough bytes arrived to split the response
/// into its fields. Whether the checksum matches is a separate question,
/// answered by [`verify_checksum()`](Self::verify_checksum()).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceResponse {
    status: u8,
    payload: Payload,
    od: OnRequestData,
    checksum: u8,
    valid: bool,
    raw: RawBytes,
}

impl DeviceResponse {
    /// A response representing "nothing (usable) arrived before the timeout".
    pub fn invalid(od_len: usize) -> Self {
        Self {
            status: 0,
            payload: Payload::new(),
            od: OnRequestData::with_first(od_len, 0),
            checksum: 0,
            valid: false,
            raw: RawBytes::new(),
        }
    }

    pub const fn status(&self) -> u8 {
        self.status
    }

    /// The process data input, or the single OD byte for the two byte Type 0 form.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub const fn on_request_data(&self) -> OnRequestData {
        self.od
    }

    /// First OD byte.
    pub const fn od(&self) -> u8 {
        self.od.first()
    }

    /// Second OD byte, present for sessions with a two byte OD channel.
    pub const fn od2(&self) -> Option<u8> {
        self.od.second()
    }

    pub const fn checksum(&self) -> u8 {
        self.checksum
    }

    pub const fn is_valid(&self) -> bool {
        self.valid
    }

    /// The device signals a pending event in bit 0 of the status byte.
    pub const fn has_event(&self) -> bool {
        self.valid && self.status & 0x01 != 0
    }

    /// The bytes as received.
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// Compare the received checksum with the one computed over the
    /// preceding response bytes.
    pub fn verify_checksum(&self) -> ChecksumStatus {
        if !self.valid {
            return ChecksumStatus::NotReceived;
        }
        let (body, _) = self.raw.split_at(self.raw.len() - 1);
        let expected = response_checksum(body);
        if expected == self.checksum {
            ChecksumStatus::Ok
        } else {
            ChecksumStatus::Mismatch {
                expected,
                received: self.checksum,
            }
        }
    }
}

/// Split a received byte sequence into a [`DeviceResponse`].
///
/// Two bytes are read as the Type 0 form `[od, checksum]`. Anything longer
/// is `[status] + pd_in + od_bytes + [checksum]` with `od_len` OD bytes.
/// Input too short for its layout gives an invalid response, never an error.
pub fn decode(bytes: &[u8], od_len: usize) -> DeviceResponse {
    let parsed = match bytes.len() {
        0 | 1 => return DeviceResponse::invalid(od_len),
        2 => type0_response(bytes),
        _ => cyclic_response(bytes, od_len),
    };
    let fields = match parsed {
        Ok((_, fields)) => fields,
        Err(_) => return DeviceResponse::invalid(od_len),
    };
    let mut raw = RawBytes::new();
    let mut payload = Payload::new();
    if raw.try_extend_from_slice(bytes).is_err()
        || payload.try_extend_from_slice(fields.payload).is_err()
    {
        return DeviceResponse::invalid(od_len);
    }
    DeviceResponse {
        status: fields.status,
        payload,
        od: fields.od,
        checksum: fields.checksum,
        valid: true,
        raw,
    }
}

/// Append the checksum a device would send to `body`. Mostly useful for
/// building expected responses in tests and simulators.
pub fn seal_response(body: &[u8]) -> Vec<u8> {
    let mut bytes = body.to_vec();
    bytes.push(response_checksum(body));
    bytes
}
