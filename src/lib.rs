//! Master side of an IO-Link style point-to-point sensor/actuator protocol.
//!
//! The crate is split in a sans-io protocol layer and a small driver:
//!
//! * [`crc`] computes the 6-bit frame checksum.
//! * [`frame`] encodes master frames, [`response`] decodes device responses.
//! * [`isdu`] segments parameter requests into on-request data bytes and
//!   reassembles the responses.
//! * [`master`] drives a device through startup into cyclic exchange over
//!   any [`Transport`].
//!
//! With the `serial` feature, `Box<dyn serialport::SerialPort>` implements
//! [`Transport`] and can be handed straight to a [`Master`].

pub mod crc;
pub mod frame;
pub mod isdu;
pub mod master;
mod nom_parser;
pub mod response;
pub mod transport;
pub mod types;

pub use isdu::IsduRequest;
pub use master::{Master, MasterConfig, MasterState};
pub use response::{decode, ChecksumStatus, DeviceResponse};
pub use transport::Transport;
pub use types::{BaudRate, ControlByte, FrameConfig, OnRequestData, PhyMode, SequenceType};
