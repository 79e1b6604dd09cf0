#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::io::{self, ErrorKind};
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering::SeqCst;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use iolink_master::crc::{checksum_type0, checksum_type1};
use iolink_master::frame::command;
use iolink_master::isdu::{index, EMPTY_RESPONSE, SERVICE_READ, SERVICE_WRITE};
use iolink_master::response::seal_response;
use iolink_master::{ControlByte, FrameConfig, MasterConfig, Transport};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Short timings so a test with a responsive simulated device runs quickly.
pub fn fast_config() -> MasterConfig {
    MasterConfig {
        wakeup_settle: Duration::from_millis(5),
        startup_retry_delay: Duration::from_millis(0),
        idle_timeout: Duration::from_millis(200),
        cycle_timeout: Duration::from_millis(200),
        isdu_timeout: Duration::from_millis(200),
        fault_timeout: Duration::from_millis(30),
        event_timeout: Duration::from_millis(50),
        operate_settle: Duration::from_millis(5),
        ..MasterConfig::default()
    }
}

type QueueT = Mutex<VecDeque<u8>>;

/// Point-to-point duplex byte pipe between a master and one device.
#[derive(Default)]
pub struct VirtualLink {
    to_master: QueueT,
    to_device: QueueT,
    master_data_available: Condvar,
    device_data_available: Condvar,
    eof: AtomicBool,
}

impl VirtualLink {
    pub fn new() -> Arc<VirtualLink> {
        Default::default()
    }

    pub fn disconnect(&self) {
        self.eof.store(true, SeqCst);
        self.master_data_available.notify_all();
        self.device_data_available.notify_all();
    }

    pub fn master_port(self: &Arc<Self>) -> LinkPort {
        LinkPort::new(Arc::clone(self), true)
    }

    pub fn device_port(self: &Arc<Self>) -> LinkPort {
        LinkPort::new(Arc::clone(self), false)
    }
}

pub struct LinkPort {
    link: Arc<VirtualLink>,
    is_master: bool,
    pub do_write_error: bool,
}

impl LinkPort {
    fn new(link: Arc<VirtualLink>, is_master: bool) -> LinkPort {
        LinkPort {
            link,
            is_master,
            do_write_error: false,
        }
    }

    fn inbox(&self) -> (&QueueT, &Condvar) {
        if self.is_master {
            (&self.link.to_master, &self.link.master_data_available)
        } else {
            (&self.link.to_device, &self.link.device_data_available)
        }
    }

    pub fn is_closed(&self) -> bool {
        self.link.eof.load(SeqCst)
    }

    pub fn write(&self, data: &[u8]) {
        let (queue, ready) = if self.is_master {
            (&self.link.to_device, &self.link.device_data_available)
        } else {
            (&self.link.to_master, &self.link.master_data_available)
        };
        queue.lock().unwrap().extend(data.iter().copied());
        ready.notify_all();
    }

    pub fn read_byte(&self, timeout: Duration) -> Option<u8> {
        let (queue, ready) = self.inbox();
        let deadline = Instant::now() + timeout;
        let mut rx = queue.lock().expect("Read mutex is poisoned");
        loop {
            if let Some(byte) = rx.pop_front() {
                return Some(byte);
            }
            let now = Instant::now();
            if self.is_closed() || now >= deadline {
                return None;
            }
            rx = ready
                .wait_timeout(rx, deadline - now)
                .expect("Mutex lock failed")
                .0;
        }
    }
}

impl Transport for LinkPort {
    fn send(&mut self, data: &[u8]) -> io::Result<()> {
        if self.do_write_error {
            self.do_write_error = false;
            return Err(io::Error::new(ErrorKind::BrokenPipe, "link down"));
        }
        self.write(data);
        Ok(())
    }

    fn recv(&mut self, count: usize, timeout: Duration) -> io::Result<Option<Vec<u8>>> {
        let deadline = Instant::now() + timeout;
        let mut buf = Vec::with_capacity(count);
        while buf.len() < count {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.read_byte(remaining) {
                Some(byte) => buf.push(byte),
                None => return Ok(None),
            }
        }
        Ok(Some(buf))
    }

    fn discard_input(&mut self) -> io::Result<()> {
        self.inbox().0.lock().unwrap().clear();
        Ok(())
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Intake {
    Idle,
    Data { last: bool },
    Control,
}

/// Device side state, shared between the device thread and the test.
pub struct DeviceState {
    config: FrameConfig,
    operate: bool,
    pd_in: Vec<u8>,
    pd_out_log: Vec<Vec<u8>>,
    events: VecDeque<u16>,
    params: HashMap<(u16, u8), Vec<u8>>,
    busy_polls: usize,
    dropped: usize,
    intake: Intake,
    request: Vec<u8>,
    outbound: VecDeque<u8>,
}

impl DeviceState {
    fn new(config: FrameConfig) -> DeviceState {
        let mut params = HashMap::new();
        params.insert((index::VENDOR_NAME, 0), b"IO-Link Sim".to_vec());
        params.insert((index::PRODUCT_NAME, 0), b"Sim Device".to_vec());
        params.insert((index::SERIAL_NUMBER, 0), b"SN0001".to_vec());
        DeviceState {
            config,
            operate: false,
            pd_in: Vec::new(),
            pd_out_log: Vec::new(),
            events: VecDeque::new(),
            params,
            busy_polls: 0,
            dropped: 0,
            intake: Intake::Idle,
            request: Vec::new(),
            outbound: VecDeque::new(),
        }
    }

    fn reset(&mut self) {
        self.operate = false;
        self.intake = Intake::Idle;
        self.request.clear();
        self.outbound.clear();
    }

    fn frame_len(&self, first: u8) -> usize {
        if self.operate && self.config.sequence_type().is_cyclic() && first == command::IDLE {
            self.config.request_len()
        } else {
            2
        }
    }

    fn handle_frame(&mut self, frame: &[u8]) -> Option<Vec<u8>> {
        if frame.len() == 2 {
            let cmd = frame[0];
            if frame[1] != checksum_type0(cmd, 0) {
                self.dropped += 1;
                return None;
            }
            if self.intake == Intake::Idle {
                match cmd {
                    command::WAKEUP => {
                        self.reset();
                        return None;
                    }
                    command::OPERATE => {
                        self.operate = true;
                        return None;
                    }
                    command::EVENT_REQUEST => return self.event_reply(),
                    _ => {}
                }
            }
            let od = self.exchange_od(cmd);
            return Some(seal_response(&[od]));
        }

        let (body, ck) = frame.split_at(frame.len() - 1);
        let pd_end = 2 + self.config.pd_out_len();
        let pd = &body[2..pd_end];
        let od = body[pd_end];
        let od2 = if self.config.od_len() == 2 {
            Some(body[pd_end + 1])
        } else {
            None
        };
        if ck[0] != checksum_type1(body[0], body[1], pd, od, od2) {
            self.dropped += 1;
            return None;
        }
        self.pd_out_log.push(pd.to_vec());

        let status = if self.events.is_empty() { 0x00 } else { 0x01 };
        let mut reply = vec![status];
        let mut pd_in = self.pd_in.clone();
        pd_in.resize(self.config.pd_in_len(), 0);
        reply.extend_from_slice(&pd_in);
        reply.push(self.exchange_od(od));
        if let Some(od2) = od2 {
            reply.push(od2);
        }
        Some(seal_response(&reply))
    }

    fn event_reply(&mut self) -> Option<Vec<u8>> {
        let code = self.events.pop_front()?;
        let [hi, lo] = code.to_be_bytes();
        let status = if self.events.is_empty() { 0x00 } else { 0x01 };
        Some(seal_response(&[hi, lo, status]))
    }

    fn exchange_od(&mut self, od: u8) -> u8 {
        self.take_od(od);
        self.outbound.pop_front().unwrap_or(0)
    }

    fn take_od(&mut self, od: u8) {
        let control = ControlByte::from_byte(od);
        self.intake = match self.intake {
            Intake::Idle if control.start() => {
                self.request.clear();
                Intake::Data {
                    last: control.last(),
                }
            }
            Intake::Idle => Intake::Idle,
            Intake::Control => Intake::Data {
                last: control.last(),
            },
            Intake::Data { last } => {
                self.request.push(od);
                if last {
                    let request = std::mem::take(&mut self.request);
                    self.process_request(&request);
                    Intake::Idle
                } else {
                    Intake::Control
                }
            }
        };
    }

    fn process_request(&mut self, req: &[u8]) {
        let response = match req.first() {
            Some(&SERVICE_READ) if req.len() == 4 => {
                let index = u16::from_be_bytes([req[1], req[2]]);
                Some(self.params.get(&(index, req[3])).cloned().unwrap_or_default())
            }
            Some(&service) if service & 0xF0 == SERVICE_WRITE => {
                let (len, rest) = match service & 0x0F {
                    0 => (req.get(1).copied().unwrap_or(0) as usize, req.get(2..)),
                    n => (n as usize, req.get(1..)),
                };
                match rest {
                    Some(rest) if rest.len() == 3 + len => {
                        let index = u16::from_be_bytes([rest[0], rest[1]]);
                        self.params.insert((index, rest[2]), rest[3..].to_vec());
                        // Acknowledged with a single zero status byte.
                        Some(vec![0x00])
                    }
                    _ => None,
                }
            }
            _ => None,
        };
        if let Some(data) = response {
            for _ in 0..self.busy_polls {
                self.outbound.push_back(0);
            }
            self.queue_response(&data);
        }
    }

    fn queue_response(&mut self, data: &[u8]) {
        if data.is_empty() {
            self.outbound.push_back(EMPTY_RESPONSE);
            return;
        }
        for (i, byte) in data.iter().enumerate() {
            let control = ControlByte::new(i == 0, i + 1 == data.len(), (i % 64) as u8);
            self.outbound.push_back(control.as_byte());
            self.outbound.push_back(*byte);
        }
    }
}

const IDLE_POLL: Duration = Duration::from_millis(20);
const BYTE_TIMEOUT: Duration = Duration::from_millis(100);

fn device_main_loop(port: LinkPort, state: Arc<Mutex<DeviceState>>) {
    while !port.is_closed() {
        let first = match port.read_byte(IDLE_POLL) {
            Some(byte) => byte,
            None => continue,
        };
        let len = state.lock().unwrap().frame_len(first);
        let mut frame = vec![first];
        while frame.len() < len {
            match port.read_byte(BYTE_TIMEOUT) {
                Some(byte) => frame.push(byte),
                None => break,
            }
        }
        if frame.len() < len {
            continue;
        }
        let reply = state.lock().unwrap().handle_frame(&frame);
        if let Some(reply) = reply {
            port.write(&reply);
        }
    }
}

/// A minimal device answering on its own thread. Dropping it closes the link.
pub struct SimDevice {
    link: Arc<VirtualLink>,
    state: Arc<Mutex<DeviceState>>,
    handle: Option<JoinHandle<()>>,
}

impl SimDevice {
    /// Start a device and return it with the master end of the link.
    pub fn spawn(config: FrameConfig) -> (SimDevice, LinkPort) {
        let link = VirtualLink::new();
        let state = Arc::new(Mutex::new(DeviceState::new(config)));
        let port = link.device_port();
        let thread_state = Arc::clone(&state);
        let handle = thread::spawn(move || device_main_loop(port, thread_state));
        let master_port = link.master_port();
        (
            SimDevice {
                link,
                state,
                handle: Some(handle),
            },
            master_port,
        )
    }

    fn state(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap()
    }

    pub fn set_config(&self, config: FrameConfig) {
        self.state().config = config;
    }

    pub fn set_pd_in(&self, pd: &[u8]) {
        self.state().pd_in = pd.to_vec();
    }

    pub fn pd_out_log(&self) -> Vec<Vec<u8>> {
        self.state().pd_out_log.clone()
    }

    pub fn push_event(&self, code: u16) {
        self.state().events.push_back(code);
    }

    /// Idle responses to insert before the start of every ISDU response.
    pub fn set_busy_polls(&self, polls: usize) {
        self.state().busy_polls = polls;
    }

    pub fn dropped_frames(&self) -> usize {
        self.state().dropped
    }

    pub fn param(&self, index: u16, subindex: u8) -> Option<Vec<u8>> {
        self.state().params.get(&(index, subindex)).cloned()
    }
}

impl Drop for SimDevice {
    fn drop(&mut self) {
        self.link.disconnect();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
