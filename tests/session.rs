mod common;

use iolink_master::isdu::index;
use iolink_master::master::Error;
use iolink_master::{FrameConfig, Master, MasterState, OnRequestData, PhyMode, SequenceType};

use common::{fast_config, init_logging, LinkPort, SimDevice, VirtualLink};

fn operate(config: FrameConfig) -> (SimDevice, Master<LinkPort>) {
    init_logging();
    let (device, port) = SimDevice::spawn(config);
    let mut master = Master::with_config(port, config, fast_config());
    master.run_startup_sequence().unwrap();
    master.go_to_operate().unwrap();
    (device, master)
}

#[test]
fn type1_2_session() {
    init_logging();
    let config = FrameConfig::new(SequenceType::Type1_2, 2, 2).unwrap();
    let (device, port) = SimDevice::spawn(config);
    device.set_pd_in(&[0x11, 0x22]);
    let mut master = Master::with_config(port, config, fast_config());

    master.run_startup_sequence().unwrap();
    assert_eq!(master.state(), MasterState::Preoperate);
    master.go_to_operate().unwrap();
    assert_eq!(master.state(), MasterState::Operate);

    let cycles: [[u8; 2]; 3] = [[0x12, 0x34], [0xAA, 0xBB], [0x55, 0x66]];
    for pd in cycles.iter() {
        let response = master.run_cycle(pd, 0).unwrap();
        assert!(response.is_valid());
        assert_eq!(response.payload(), &[0x11, 0x22]);
        assert_eq!(response.raw().len(), config.response_len());
    }
    let log = device.pd_out_log();
    // The first entry is the confirmation cycle of go_to_operate.
    assert_eq!(log[0], vec![0x00, 0x00]);
    assert_eq!(log[1..], [vec![0x12, 0x34], vec![0xAA, 0xBB], vec![0x55, 0x66]]);

    let vendor = master.read_isdu(index::VENDOR_NAME, 0).unwrap();
    assert_eq!(vendor, b"IO-Link Sim".to_vec());
    assert_eq!(device.dropped_frames(), 0);
}

#[test]
fn type0_session() {
    let (device, mut master) = operate(FrameConfig::type0());
    assert_eq!(master.state(), MasterState::Operate);
    let response = master.run_cycle(&[1, 2, 3], 0).unwrap();
    assert!(response.is_valid());
    assert_eq!(response.od(), 0);
    assert!(device.pd_out_log().is_empty());
}

#[test]
fn no_device() {
    init_logging();
    let link = VirtualLink::new();
    let mut master = Master::with_config(link.master_port(), FrameConfig::type0(), fast_config());
    match master.run_startup_sequence() {
        Err(Error::StartupFailed { attempts }) => assert_eq!(attempts, 3),
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(master.state(), MasterState::Startup);
    assert!(!master.run_cycle(&[], 0).unwrap().is_valid());
    assert!(matches!(
        master.go_to_operate(),
        Err(Error::InvalidState { .. })
    ));
}

#[test]
fn fault_injection() {
    let config = FrameConfig::new(SequenceType::Type1_1, 2, 2).unwrap();
    let (device, mut master) = operate(config);
    assert_eq!(master.inject_checksum_errors(3).unwrap(), 0);
    assert_eq!(device.dropped_frames(), 3);
    assert!(!master.run_cycle_bad_crc(&[1, 2], 0).unwrap().is_valid());

    // The link recovers right away.
    assert!(master.run_cycle(&[1, 2], 0).unwrap().is_valid());
    assert_eq!(master.state(), MasterState::Operate);
}

#[test]
fn type2_carries_second_od_byte() {
    let config = FrameConfig::new(SequenceType::Type2_2, 3, 1).unwrap();
    let (device, mut master) = operate(config);
    device.set_pd_in(&[7, 8, 9]);
    let response = master
        .run_cycle_with(&[0x42], OnRequestData::Two(0x00, 0x5A))
        .unwrap();
    assert!(response.is_valid());
    assert_eq!(response.payload(), &[7, 8, 9]);
    assert_eq!(response.od2(), Some(0x5A));

    let response = master.run_cycle(&[0x42], 0).unwrap();
    assert_eq!(response.od2(), Some(0x00));
}

#[test]
fn variable_pd_reconfigure() {
    let config = FrameConfig::new(SequenceType::Type1_V, 2, 2).unwrap();
    let (device, mut master) = operate(config);
    device.set_pd_in(&(1..=16).collect::<Vec<u8>>());

    master.set_pd_length(8, 4).unwrap();
    device.set_config(*master.config());
    let response = master.run_cycle(&[0xDE, 0xAD, 0xBE, 0xEF], 0).unwrap();
    assert!(response.is_valid());
    assert_eq!(response.payload(), &[1, 2, 3, 4, 5, 6, 7, 8]);
    assert_eq!(device.pd_out_log().last().unwrap(), &vec![0xDE, 0xAD, 0xBE, 0xEF]);

    assert!(master.set_pd_length(1, 4).is_err());
    assert!(master.set_pd_length(8, 33).is_err());
    assert_eq!(master.config().pd_in_len(), 8);

    // The sequence type is settled once operating.
    let fixed = FrameConfig::new(SequenceType::Type2_1, 4, 4).unwrap();
    assert!(matches!(
        master.reconfigure(fixed),
        Err(Error::InvalidState {
            state: MasterState::Operate,
            ..
        })
    ));
    let resized = FrameConfig::new(SequenceType::Type1_V, 4, 4).unwrap();
    master.reconfigure(resized).unwrap();
    device.set_config(resized);
    let response = master.run_cycle(&[], 0).unwrap();
    assert_eq!(response.payload(), &[1, 2, 3, 4]);
}

#[test]
fn fixed_reconfigure_before_operate() {
    init_logging();
    let config = FrameConfig::new(SequenceType::Type1_V, 2, 2).unwrap();
    let (device, port) = SimDevice::spawn(config);
    let mut master = Master::with_config(port, config, fast_config());
    master.run_startup_sequence().unwrap();

    let fixed = FrameConfig::new(SequenceType::Type2_1, 4, 4).unwrap();
    master.reconfigure(fixed).unwrap();
    device.set_config(fixed);
    master.go_to_operate().unwrap();
    assert!(master.run_cycle(&[], 0).unwrap().is_valid());

    let resized = FrameConfig::new(SequenceType::Type2_1, 10, 10).unwrap();
    assert!(matches!(
        master.reconfigure(resized),
        Err(Error::Config { .. })
    ));
    assert!(master.set_pd_length(10, 10).is_err());
    assert_eq!(*master.config(), fixed);
}

#[test]
fn events() {
    let config = FrameConfig::new(SequenceType::Type1_2, 2, 2).unwrap();
    let (device, mut master) = operate(config);
    assert_eq!(master.request_event().unwrap(), None);

    device.push_event(0x1800);
    device.push_event(0x4210);
    assert!(master.run_cycle(&[], 0).unwrap().has_event());
    assert_eq!(master.request_event().unwrap(), Some(0x1800));
    assert_eq!(master.request_event().unwrap(), Some(0x4210));
    assert!(!master.run_cycle(&[], 0).unwrap().has_event());
}

#[test]
fn phy_and_baud() {
    let config = FrameConfig::new(SequenceType::Type1_2, 2, 2).unwrap();
    let (_device, mut master) = operate(config);
    master.set_phy_mode(PhyMode::Sio).unwrap();
    master.set_phy_mode(PhyMode::Sdci).unwrap();
    master.set_baud_rate("com3").unwrap();
    assert!(matches!(
        master.set_baud_rate("COM4"),
        Err(Error::Config { .. })
    ));
    assert_eq!(master.baud_rate().bits_per_second(), 230_400);
}

#[test]
fn transport_error() {
    let config = FrameConfig::new(SequenceType::Type1_2, 2, 2).unwrap();
    let (_device, port) = SimDevice::spawn(config);
    let mut master = Master::with_config(port, config, fast_config());
    master.run_startup_sequence().unwrap();

    let mut port = master.into_transport();
    port.do_write_error = true;
    let mut master = Master::with_config(port, config, fast_config());
    assert!(matches!(
        master.run_startup_sequence(),
        Err(Error::Transport { .. })
    ));
    assert!(master.run_startup_sequence().is_ok());
}
