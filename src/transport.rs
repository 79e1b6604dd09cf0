//! The byte stream between master and device.

use std::io;
use std::time::Duration;

/// Duplex byte channel to one device.
///
/// A transport is owned by exactly one [`Master`](crate::Master).
pub trait Transport {
    /// Transmit all of `data`.
    fn send(&mut self, data: &[u8]) -> io::Result<()>;

    /// Block until exactly `count` bytes have arrived or `timeout` elapsed.
    ///
    /// Returns `Ok(None)` on timeout, never a short read.
    fn recv(&mut self, count: usize, timeout: Duration) -> io::Result<Option<Vec<u8>>>;

    /// Drop any bytes received but not yet read.
    fn discard_input(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn send(&mut self, data: &[u8]) -> io::Result<()> {
        (**self).send(data)
    }

    fn recv(&mut self, count: usize, timeout: Duration) -> io::Result<Option<Vec<u8>>> {
        (**self).recv(count, timeout)
    }

    fn discard_input(&mut self) -> io::Result<()> {
        (**self).discard_input()
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn send(&mut self, data: &[u8]) -> io::Result<()> {
        (**self).send(data)
    }

    fn recv(&mut self, count: usize, timeout: Duration) -> io::Result<Option<Vec<u8>>> {
        (**self).recv(count, timeout)
    }

    fn discard_input(&mut self) -> io::Result<()> {
        (**self).discard_input()
    }
}

#[cfg(feature = "serial")]
mod serial {
    use super::Transport;
    use serialport::{ClearBuffer, SerialPort};
    use std::io::{self, ErrorKind, Read, Write};
    use std::time::{Duration, Instant};

    impl Transport for dyn SerialPort {
        fn send(&mut self, data: &[u8]) -> io::Result<()> {
            self.write_all(data)?;
            self.flush()
        }

        fn recv(&mut self, count: usize, timeout: Duration) -> io::Result<Option<Vec<u8>>> {
            let deadline = Instant::now() + timeout;
            let mut buf = vec![0; count];
            let mut filled = 0;
            while filled < count {
                let remaining = match deadline.checked_duration_since(Instant::now()) {
                    Some(d) if !d.is_zero() => d,
                    _ => return Ok(None),
                };
                self.set_timeout(remaining)?;
                match self.read(&mut buf[filled..]) {
                    Ok(0) => return Ok(None),
                    Ok(n) => filled += n,
                    Err(e) if e.kind() == ErrorKind::TimedOut => return Ok(None),
                    Err(e) if e.kind() == ErrorKind::Interrupted => {}
                    Err(e) => return Err(e),
                }
            }
            Ok(Some(buf))
        }

        fn discard_input(&mut self) -> io::Result<()> {
            Ok(self.clear(ClearBuffer::Input)?)
        }
    }
}
