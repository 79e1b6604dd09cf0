//! See [`Master`] for more details.

use std::fmt;
use std::io;
use std::thread::sleep;
use std::time::Duration;

use log::{debug, info, warn};
use snafu::{ensure, ResultExt, Snafu};

use crate::crc::response_checksum;
use crate::frame::{self, command, corrupt_checksum, encode_cyclic, encode_type0, Frame};
use crate::isdu::{self, IsduRequest, Receiver, ReceiverResult, ResponseCollector, WriteAckWaiter};
use crate::response::{decode, ChecksumStatus, DeviceResponse};
use crate::transport::Transport;
use crate::types::{self, BaudRate, FrameConfig, OnRequestData, PhyMode};

/// Error type for the master.
#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    /// The transport failed to send or receive.
    #[snafu(display("Transport error: {source}"))]
    Transport { source: io::Error },
    /// No idle frame got a valid response during startup.
    #[snafu(display("Startup failed, no valid response after {attempts} attempts"))]
    StartupFailed { attempts: usize },
    /// The operation isn't allowed in the current state.
    #[snafu(display("{operation} not allowed in state {state}"))]
    InvalidState {
        operation: &'static str,
        state: MasterState,
    },
    /// The transition command was sent, but no valid cyclic response followed.
    #[snafu(display("No valid response after the switch to OPERATE"))]
    NotConfirmed,
    /// Rejected configuration, the session is unchanged.
    #[snafu(context(false), display("{source}"))]
    Config { source: types::Error },
    #[snafu(context(false), display("{source}"))]
    Frame { source: frame::Error },
    /// A parameter transfer failed.
    #[snafu(context(false), display("{source}"))]
    Isdu { source: isdu::Error },
}

/// Connection state of the master.
#[derive(PartialEq, Eq, Debug, Copy, Clone, Hash)]
pub enum MasterState {
    Startup,
    EstabCom,
    Preoperate,
    Operate,
}

impl fmt::Display for MasterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Startup => "STARTUP",
            Self::EstabCom => "ESTAB_COM",
            Self::Preoperate => "PREOPERATE",
            Self::Operate => "OPERATE",
        })
    }
}

/// Timing and retry settings of a [`Master`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MasterConfig {
    /// Pause after the wake-up request.
    pub wakeup_settle: Duration,
    /// Idle frames sent during startup before giving up.
    pub startup_attempts: usize,
    /// Pause between startup attempts.
    pub startup_retry_delay: Duration,
    /// Response timeout for idle frames.
    pub idle_timeout: Duration,
    /// Response timeout for cyclic frames.
    pub cycle_timeout: Duration,
    /// Response timeout for Type 0 ISDU exchanges.
    pub isdu_timeout: Duration,
    /// Response timeout for frames with a corrupted checksum.
    pub fault_timeout: Duration,
    /// Response timeout for event requests.
    pub event_timeout: Duration,
    /// Pause after the transition command.
    pub operate_settle: Duration,
    /// Idle cycles to wait for the start of an ISDU response.
    pub isdu_poll_limit: usize,
    /// Drop responses whose checksum doesn't match.
    pub enforce_checksum: bool,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            wakeup_settle: Duration::from_millis(100),
            startup_attempts: 3,
            startup_retry_delay: Duration::from_millis(50),
            idle_timeout: Duration::from_millis(500),
            cycle_timeout: Duration::from_millis(500),
            isdu_timeout: Duration::from_millis(100),
            fault_timeout: Duration::from_millis(100),
            event_timeout: Duration::from_millis(100),
            operate_settle: Duration::from_millis(50),
            isdu_poll_limit: 10,
            enforce_checksum: true,
        }
    }
}

/// Master side of the protocol, owning the transport to one device.
///
/// # Example
///
/// ```no_run
/// # use std::time::Duration;
/// # struct Link;
/// # impl iolink_master::Transport for Link {
/// #     fn send(&mut self, _: &[u8]) -> std::io::Result<()> { Ok(()) }
/// #     fn recv(&mut self, _: usize, _: Duration) -> std::io::Result<Option<Vec<u8>>> { Ok(None) }
/// # }
/// # fn main() -> Result<(), iolink_master::master::Error> {
/// use iolink_master::{FrameConfig, Master, SequenceType};
/// use iolink_master::isdu::index;
///
/// let config = FrameConfig::new(SequenceType::Type1_2, 2, 2)?;
/// let mut master = Master::new(Link, config);
/// master.run_startup_sequence()?;
/// master.go_to_operate()?;
/// let response = master.run_cycle(&[0x12, 0x34], 0)?;
/// assert!(response.is_valid());
/// let vendor = master.read_isdu(index::VENDOR_NAME, 0)?;
/// # Ok(()) }
/// ```
#[derive(Debug)]
pub struct Master<T: Transport> {
    transport: T,
    frame_config: FrameConfig,
    config: MasterConfig,
    state: MasterState,
    phy_mode: PhyMode,
    baud_rate: BaudRate,
}

impl<T: Transport> Master<T> {
    /// Create a new master in the `Startup` state with default timing.
    pub fn new(transport: T, frame_config: FrameConfig) -> Self {
        Self::with_config(transport, frame_config, MasterConfig::default())
    }

    pub fn with_config(transport: T, frame_config: FrameConfig, config: MasterConfig) -> Self {
        Self {
            transport,
            frame_config,
            config,
            state: MasterState::Startup,
            phy_mode: PhyMode::default(),
            baud_rate: BaudRate::default(),
        }
    }

    pub const fn state(&self) -> MasterState {
        self.state
    }

    /// Current frame geometry.
    pub const fn config(&self) -> &FrameConfig {
        &self.frame_config
    }

    pub const fn master_config(&self) -> &MasterConfig {
        &self.config
    }

    pub const fn phy_mode(&self) -> PhyMode {
        self.phy_mode
    }

    pub const fn baud_rate(&self) -> BaudRate {
        self.baud_rate
    }

    /// Give up the master and return the transport.
    pub fn into_transport(self) -> T {
        self.transport
    }

    fn set_state(&mut self, state: MasterState) {
        if self.state != state {
            info!("State {} -> {}", self.state, state);
            self.state = state;
        }
    }

    /// Send the wake-up request. No response is expected.
    pub fn send_wakeup(&mut self) -> Result<(), Error> {
        let frame = encode_type0(command::WAKEUP, 0);
        self.send_frame(&frame)
    }

    /// Send an idle frame and return the device's response.
    pub fn send_idle(&mut self) -> Result<DeviceResponse, Error> {
        let timeout = self.config.idle_timeout;
        self.exchange_type0(command::IDLE, timeout)
    }

    /// Wake up the device and probe it with idle frames until it answers.
    ///
    /// On success the master is in `Preoperate`. If every attempt times out,
    /// [`Error::StartupFailed`] is returned and the state is left as it was.
    pub fn run_startup_sequence(&mut self) -> Result<(), Error> {
        info!("Starting startup sequence");
        self.send_wakeup()?;
        sleep(self.config.wakeup_settle);
        self.transport.discard_input().context(TransportSnafu)?;

        let attempts = self.config.startup_attempts;
        for attempt in 1..=attempts {
            if self.send_idle()?.is_valid() {
                info!("Communication established (attempt {})", attempt);
                self.set_state(MasterState::Preoperate);
                return Ok(());
            }
            if attempt < attempts {
                sleep(self.config.startup_retry_delay);
            }
        }
        warn!("Startup failed, no valid response");
        StartupFailedSnafu { attempts }.fail()
    }

    /// Send the transition command and wait for the first valid cyclic
    /// response, which moves the master from `EstabCom` to `Operate`.
    ///
    /// Only allowed in `Preoperate`. If the confirming cycle
    /// fails the master stays in `EstabCom` and returns [`Error::NotConfirmed`];
    /// any later valid [`run_cycle()`](Self::run_cycle()) completes the switch.
    pub fn go_to_operate(&mut self) -> Result<(), Error> {
        let state = self.state;
        ensure!(
            state == MasterState::Preoperate,
            InvalidStateSnafu {
                operation: "go_to_operate",
                state,
            }
        );
        info!("Sending OPERATE transition command");
        self.send_frame(&encode_type0(command::OPERATE, 0))?;
        sleep(self.config.operate_settle);
        self.transport.discard_input().context(TransportSnafu)?;
        self.set_state(MasterState::EstabCom);

        if self.run_cycle(&[], 0)?.is_valid() {
            Ok(())
        } else {
            warn!("No valid cyclic response after the transition command");
            NotConfirmedSnafu.fail()
        }
    }

    /// Run one communication cycle with `od` in the first OD byte.
    ///
    /// `pd_out` is cut or zero padded to the configured length. A response
    /// that didn't arrive in time, or arrived with a bad checksum, is
    /// returned as an invalid [`DeviceResponse`]. Before startup nothing is
    /// sent and the response is invalid.
    pub fn run_cycle(&mut self, pd_out: &[u8], od: u8) -> Result<DeviceResponse, Error> {
        let od = OnRequestData::with_first(self.frame_config.od_len(), od);
        self.run_cycle_with(pd_out, od)
    }

    /// Like [`run_cycle()`](Self::run_cycle()), with full control over the OD bytes.
    pub fn run_cycle_with(
        &mut self,
        pd_out: &[u8],
        od: OnRequestData,
    ) -> Result<DeviceResponse, Error> {
        if self.state == MasterState::Startup {
            warn!("Cycle requested before startup, nothing sent");
            return Ok(DeviceResponse::invalid(self.frame_config.od_len()));
        }
        let response = if self.frame_config.sequence_type().is_cyclic() {
            let frame = self.cyclic_frame(pd_out, od)?;
            let timeout = self.config.cycle_timeout;
            self.exchange(&frame, timeout)?
        } else {
            self.send_idle()?
        };
        if response.is_valid() && self.state == MasterState::EstabCom {
            self.set_state(MasterState::Operate);
        }
        Ok(response)
    }

    /// Run one cycle whose checksum byte is inverted. A correct device drops
    /// the frame, so the expected outcome is an invalid response.
    pub fn run_cycle_bad_crc(&mut self, pd_out: &[u8], od: u8) -> Result<DeviceResponse, Error> {
        let mut frame = if self.frame_config.sequence_type().is_cyclic() {
            let od = OnRequestData::with_first(self.frame_config.od_len(), od);
            self.cyclic_frame(pd_out, od)?
        } else {
            encode_type0(command::IDLE, 0)
        };
        corrupt_checksum(&mut frame);
        self.send_frame(&frame)?;
        let bytes = self
            .transport
            .recv(self.frame_config.response_len(), self.config.fault_timeout)
            .context(TransportSnafu)?;
        Ok(self.decode_bytes(bytes))
    }

    /// Send `count` frames with corrupted checksums, to simulate a link with
    /// sustained errors. Returns how many of them got a valid response.
    pub fn inject_checksum_errors(&mut self, count: usize) -> Result<usize, Error> {
        info!("Injecting {} frames with bad checksums", count);
        let mut answered = 0;
        for _ in 0..count {
            if self.run_cycle_bad_crc(&[], 0)?.is_valid() {
                answered += 1;
            }
        }
        if answered > 0 {
            warn!("{} of {} corrupted frames were answered", answered, count);
        }
        Ok(answered)
    }

    /// Change the PD lengths of a variable (`*_V`) session.
    ///
    /// Both lengths must be in `[2, 32]`. On error nothing changes.
    pub fn set_pd_length(&mut self, pd_in_len: usize, pd_out_len: usize) -> Result<(), Error> {
        self.frame_config = self.frame_config.with_pd_lengths(pd_in_len, pd_out_len)?;
        info!("PD length changed: in={}, out={}", pd_in_len, pd_out_len);
        Ok(())
    }

    /// Replace the frame geometry of the session.
    ///
    /// Keeping the sequence type only changes the PD lengths, with the same
    /// rules as [`set_pd_length()`](Self::set_pd_length()). A different
    /// sequence type is only accepted before the switch to `Operate`. On
    /// error nothing changes.
    pub fn reconfigure(&mut self, frame_config: FrameConfig) -> Result<(), Error> {
        let current = self.frame_config;
        if frame_config == current {
            return Ok(());
        }
        let frame_config = if frame_config.sequence_type() == current.sequence_type() {
            current.with_pd_lengths(frame_config.pd_in_len(), frame_config.pd_out_len())?
        } else {
            let state = self.state;
            ensure!(
                matches!(state, MasterState::Startup | MasterState::Preoperate),
                InvalidStateSnafu {
                    operation: "sequence type change",
                    state,
                }
            );
            frame_config
        };
        info!(
            "Reconfigured to {} (in={}, out={})",
            frame_config.sequence_type(),
            frame_config.pd_in_len(),
            frame_config.pd_out_len()
        );
        self.frame_config = frame_config;
        Ok(())
    }

    /// Switch the physical layer mode. Only allowed in `Operate`.
    pub fn set_phy_mode(&mut self, mode: PhyMode) -> Result<(), Error> {
        let state = self.state;
        ensure!(
            state == MasterState::Operate,
            InvalidStateSnafu {
                operation: "PHY mode switch",
                state,
            }
        );
        info!("PHY mode {:?} -> {:?}", self.phy_mode, mode);
        self.phy_mode = mode;
        Ok(())
    }

    /// Select the baud rate by name, `COM1`, `COM2` or `COM3`.
    pub fn set_baud_rate(&mut self, name: &str) -> Result<(), Error> {
        let rate: BaudRate = name.parse().map_err(|e| {
            warn!("Invalid baud rate: {}", name);
            e
        })?;
        self.set_baud(rate);
        Ok(())
    }

    pub fn set_baud(&mut self, rate: BaudRate) {
        info!("Baud rate set to {} ({} bit/s)", rate, rate.bits_per_second());
        self.baud_rate = rate;
    }

    /// Ask the device for a pending event.
    ///
    /// The device answers `[code_hi, code_lo, status, checksum]`, or not at all.
    /// Before startup nothing is sent and there is no event.
    pub fn request_event(&mut self) -> Result<Option<u16>, Error> {
        if self.state == MasterState::Startup {
            debug!("No event request before startup");
            return Ok(None);
        }
        self.send_frame(&encode_type0(command::EVENT_REQUEST, 0))?;
        let bytes = self
            .transport
            .recv(4, self.config.event_timeout)
            .context(TransportSnafu)?;
        let bytes = match bytes {
            Some(bytes) if bytes.len() == 4 => bytes,
            _ => return Ok(None),
        };
        debug!("Event response {:02X?}", bytes);
        if self.config.enforce_checksum && response_checksum(&bytes[..3]) != bytes[3] {
            warn!("Dropped event response with bad checksum");
            return Ok(None);
        }
        let code = u16::from_be_bytes([bytes[0], bytes[1]]);
        info!("Event received: {:#06X}", code);
        Ok(Some(code))
    }

    /// Read a parameter from the device.
    pub fn read_isdu(&mut self, index: u16, subindex: u8) -> Result<Vec<u8>, Error> {
        info!("ISDU read {:#06X}/{}", index, subindex);
        let request = IsduRequest::read(index, subindex);
        let collector = ResponseCollector::new(&request, self.config.isdu_poll_limit);
        let data = self.run_transfer(&request, collector)?;
        debug!("ISDU read collected {} bytes", data.len());
        Ok(data)
    }

    /// Write a parameter. Any non-zero control byte in reply counts as success.
    pub fn write_isdu(&mut self, index: u16, subindex: u8, data: &[u8]) -> Result<(), Error> {
        info!("ISDU write {:#06X}/{} {:02X?}", index, subindex, data);
        let request = IsduRequest::write(index, subindex, data)?;
        let waiter = WriteAckWaiter::new(&request, self.config.isdu_poll_limit);
        let ack = self.run_transfer(&request, waiter)?;
        debug!("ISDU write acknowledged with {:#04X}", ack);
        Ok(())
    }

    // Send the request one OD byte per cycle, then hand the OD byte of each
    // following response to the receiver. The response to the last request
    // cycle is the receiver's first input.
    fn run_transfer<R: Receiver>(
        &mut self,
        request: &IsduRequest,
        receiver: R,
    ) -> Result<R::Response, Error> {
        let mut od = 0;
        for byte in request.od_bytes() {
            od = self.exchange_od(request, byte)?;
        }
        let mut receiver = receiver;
        loop {
            match receiver.receive_od(od) {
                ReceiverResult::NeedData(next) => {
                    receiver = next;
                    od = self.exchange_od(request, 0)?;
                }
                ReceiverResult::Done(result) => {
                    if let Err(e) = &result {
                        warn!("{}", e);
                    }
                    return Ok(result?);
                }
            }
        }
    }

    // One OD byte out, the first OD byte of the response back.
    fn exchange_od(&mut self, request: &IsduRequest, od: u8) -> Result<u8, Error> {
        let response = if self.state == MasterState::Startup {
            DeviceResponse::invalid(self.frame_config.od_len())
        } else if self.frame_config.sequence_type().is_cyclic() {
            self.run_cycle(&[], od)?
        } else {
            let timeout = self.config.isdu_timeout;
            self.exchange_type0(od, timeout)?
        };
        if !response.is_valid() {
            let err = isdu::Error::Timeout {
                operation: request.operation(),
                index: request.index(),
                subindex: request.subindex(),
            };
            warn!("{}", err);
            return Err(err.into());
        }
        Ok(response.od())
    }

    fn cyclic_frame(&self, pd_out: &[u8], od: OnRequestData) -> Result<Frame, Error> {
        let len = self.frame_config.pd_out_len();
        let mut pd = pd_out[..pd_out.len().min(len)].to_vec();
        if pd_out.len() != len {
            debug!("PD out resized from {} to {} bytes", pd_out.len(), len);
            pd.resize(len, 0);
        }
        Ok(encode_cyclic(&self.frame_config, command::IDLE, 0, &pd, od)?)
    }

    fn exchange_type0(&mut self, command: u8, timeout: Duration) -> Result<DeviceResponse, Error> {
        self.exchange(&encode_type0(command, 0), timeout)
    }

    fn exchange(&mut self, frame: &[u8], timeout: Duration) -> Result<DeviceResponse, Error> {
        self.send_frame(frame)?;
        let len = if frame.len() == 2 {
            2
        } else {
            self.frame_config.response_len()
        };
        let bytes = self.transport.recv(len, timeout).context(TransportSnafu)?;
        let response = self.decode_bytes(bytes);
        if self.config.enforce_checksum {
            if let ChecksumStatus::Mismatch { expected, received } = response.verify_checksum() {
                warn!(
                    "Dropped response with bad checksum (expected {:#04X}, got {:#04X})",
                    expected, received
                );
                return Ok(DeviceResponse::invalid(self.frame_config.od_len()));
            }
        }
        Ok(response)
    }

    fn decode_bytes(&self, bytes: Option<Vec<u8>>) -> DeviceResponse {
        match bytes {
            Some(bytes) => {
                debug!("Received {:02X?}", bytes);
                decode(&bytes, self.frame_config.od_len())
            }
            None => {
                debug!("No response (timeout)");
                DeviceResponse::invalid(self.frame_config.od_len())
            }
        }
    }

    fn send_frame(&mut self, frame: &[u8]) -> Result<(), Error> {
        debug!("Sending {:02X?}", frame);
        self.transport.send(frame).context(TransportSnafu)
    }
}
