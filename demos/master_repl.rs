use anyhow::{bail, Context, Result};
use serialport::{DataBits, Parity, SerialPort, StopBits};
use std::io::Write;
use std::iter::Peekable;
use std::str::SplitWhitespace;
use std::sync::mpsc;

use iolink_master::{BaudRate, FrameConfig, Master, PhyMode};

type IoLink = Master<Box<dyn SerialPort>>;

fn cmd_cycle(args: &mut CmdScanner, master: &mut IoLink) -> Result<()> {
    let pd = args.hex_rest()?;
    let response = master.run_cycle(&pd, 0)?;
    if response.is_valid() {
        println!(
            "status={:02X} pd={:02X?} od={:02X}",
            response.status(),
            response.payload(),
            response.od()
        );
    } else {
        println!("No response");
    }
    Ok(())
}

fn cmd_poll(args: &mut CmdScanner, master: &mut IoLink) -> Result<()> {
    let delay = std::time::Duration::from_secs_f32(args.next()?.parse()?);

    println!("Press enter to stop polling.");
    let (io_tx, io_rx) = mpsc::channel::<()>();
    std::thread::spawn(move || {
        let _ch = io_tx;
        let mut buf = String::new();
        let _ = std::io::stdin().read_line(&mut buf);
    });
    loop {
        if io_rx.recv_timeout(delay) == Err(mpsc::RecvTimeoutError::Disconnected) {
            break;
        }
        let response = master.run_cycle(&[], 0)?;
        println!("{:02X?}", response.payload());
    }
    Ok(())
}

fn cmd_read(args: &mut CmdScanner, master: &mut IoLink) -> Result<()> {
    let index = args.number()?;
    let subindex = args.number_or(0)?;
    let data = master.read_isdu(index, subindex as u8)?;
    println!("{:02X?} {:?}", data, String::from_utf8_lossy(&data));
    Ok(())
}

fn cmd_write(args: &mut CmdScanner, master: &mut IoLink) -> Result<()> {
    let index = args.number()?;
    let subindex = args.number()?;
    let data = args.hex_rest()?;
    master.write_isdu(index, subindex as u8, &data)?;
    println!("OK");
    Ok(())
}

fn cmd_pd(args: &mut CmdScanner, master: &mut IoLink) -> Result<()> {
    let pd_in = args.next()?.parse()?;
    let pd_out = args.next()?.parse()?;
    master.set_pd_length(pd_in, pd_out)?;
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();

    let mut args = std::env::args();
    args.next(); // Skip program name
    let port = args.next().unwrap_or_else(|| "/dev/ttyUSB0".to_string());
    let frame_config: FrameConfig = args.next().as_deref().unwrap_or("0").parse()?;
    let baud: BaudRate = args.next().as_deref().unwrap_or("COM2").parse()?;

    let serial = serialport::new(&port, baud.bits_per_second())
        .data_bits(DataBits::Eight)
        .parity(Parity::Even)
        .stop_bits(StopBits::One)
        .timeout(std::time::Duration::from_millis(100))
        .open()
        .with_context(|| format!("Failed to open serial port {}", port))?;

    let mut stdout = std::io::stdout();

    let mut master = Master::new(serial, frame_config);
    master.set_baud(baud);
    loop {
        print!("{} >> ", master.state());
        stdout.flush()?;
        let mut cmd = String::new();
        let mut scan = match CmdScanner::read_stdin(&mut cmd) {
            Ok(scan) => scan,
            Err(_) => return Ok(()),
        };
        let result: Result<()> = match scan.next() {
            Err(_) => continue,
            Ok("startup") => master.run_startup_sequence().map_err(Into::into),
            Ok("operate") => master.go_to_operate().map_err(Into::into),
            Ok("cycle") | Ok("c") => cmd_cycle(&mut scan, &mut master),
            Ok("poll") => cmd_poll(&mut scan, &mut master),
            Ok("read") | Ok("r") => cmd_read(&mut scan, &mut master),
            Ok("write") | Ok("w") => cmd_write(&mut scan, &mut master),
            Ok("event") => master
                .request_event()
                .map(|code| println!("{:04X?}", code))
                .map_err(Into::into),
            Ok("pd") => cmd_pd(&mut scan, &mut master),
            Ok("phy") => scan
                .next()
                .and_then(|mode| Ok(mode.parse::<PhyMode>()?))
                .and_then(|mode| Ok(master.set_phy_mode(mode)?)),
            Ok("fault") => scan
                .number_or(1)
                .and_then(|n| Ok(master.inject_checksum_errors(n as usize)?))
                .map(|valid| println!("{} valid responses", valid)),
            Ok("quit") | Ok("q") => return Ok(()),
            Ok(cmd) => {
                println!("Unknown command {}", cmd);
                continue;
            }
        };
        if let Err(err) = result {
            println!("{:#}", err)
        }
    }
}

struct CmdScanner<'a> {
    splt: Peekable<SplitWhitespace<'a>>,
}

impl<'a> CmdScanner<'a> {
    fn read_stdin(buf: &'a mut String) -> Result<Self> {
        buf.clear();
        if std::io::stdin().read_line(buf)? == 0 {
            bail!("End of input");
        }
        let splt = buf.split_whitespace().peekable();
        Ok(Self { splt })
    }

    fn next(&mut self) -> Result<&'a str> {
        self.splt.next().context("Missing argument")
    }

    /// Decimal, or hex with a `0x` prefix.
    fn number(&mut self) -> Result<u16> {
        let s = self.next()?;
        let n = match s.strip_prefix("0x") {
            Some(hex) => u16::from_str_radix(hex, 16),
            None => s.parse(),
        };
        n.with_context(|| format!("Not a number: {}", s))
    }

    fn number_or(&mut self, default: u16) -> Result<u16> {
        if self.splt.peek().is_some() {
            self.number()
        } else {
            Ok(default)
        }
    }

    /// Remaining arguments as hex bytes, e.g. `12 34` or `1234`.
    fn hex_rest(&mut self) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        for word in &mut self.splt {
            if word.len() % 2 != 0 {
                bail!("Odd number of hex digits: {}", word);
            }
            for i in (0..word.len()).step_by(2) {
                let byte = word
                    .get(i..i + 2)
                    .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                    .with_context(|| format!("Not hex: {}", word))?;
                bytes.push(byte);
            }
        }
        Ok(bytes)
    }
}
