// Copyright 2021 Locha Mesh Developers <contact@locha.io>
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Serial transport: byte I/O with timeouts, DTR/RTS reset pulse, and port
//! auto-detection (§4.A).

use std::{
    io::{self, Read, Write},
    thread,
    time::Duration,
};

use serial::SerialPort as _;

use crate::error::{Error, Result};
use crate::ports::PortInfo;

/// USB VID:PID pairs recognized by auto-detect. Widening this list is a
/// documented limitation (§6, §9), not an oversight: anything else needs an
/// explicit port argument.
const KNOWN_USB_IDS: &[(u16, u16)] = &[
    (0x1A86, 0x7523), // QinHeng CH340
    (0x2341, 0x0043), // Arduino Uno
];

fn ser_err(e: serial::Error) -> Error {
    Error::Io(io::Error::new(io::ErrorKind::Other, e.to_string()))
}

/// A serial port, generic over anything implementing `serial`'s
/// `SerialPort` trait so tests can swap in an in-memory double.
pub struct Transport<P> {
    port: P,
}

impl Transport<serial::SystemPort> {
    /// Open `path` at `baud`, 8 data bits, no parity, 1 stop bit.
    pub fn open(path: &str, baud: serial::BaudRate) -> Result<Self> {
        let mut port =
            serial::SystemPort::open(path).map_err(|e| Error::OpenFailed(io::Error::new(io::ErrorKind::Other, e.to_string())))?;

        let settings = serial::PortSettings {
            baud_rate: baud,
            char_size: serial::CharSize::Bits8,
            parity: serial::Parity::ParityNone,
            stop_bits: serial::StopBits::Stop1,
            flow_control: serial::FlowControl::FlowNone,
        };
        port.configure(&settings).map_err(ser_err)?;
        port.set_timeout(Duration::from_millis(1000))
            .map_err(ser_err)?;

        Ok(Transport { port })
    }

    /// Find the first port whose USB VID:PID matches [`KNOWN_USB_IDS`].
    pub fn auto_detect() -> Option<String> {
        for info in PortInfo::list_all() {
            if let Some(usb) = &info.usb_info {
                if KNOWN_USB_IDS.contains(&(usb.vid, usb.pid)) {
                    return Some(info.port.to_string_lossy().into_owned());
                }
            }
        }
        None
    }

    /// All serial ports the host knows about, as `(device, hwid)` pairs.
    pub fn list_ports() -> Vec<(String, Option<String>)> {
        PortInfo::list_all()
            .into_iter()
            .map(|info| {
                let hwid = info
                    .usb_info
                    .as_ref()
                    .map(|usb| format!("USB VID:PID={:04X}:{:04X}", usb.vid, usb.pid));
                (info.port.to_string_lossy().into_owned(), hwid)
            })
            .collect()
    }
}

impl<P> Transport<P>
where
    P: Read + Write,
{
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        log::trace!("write: {:02x?}", data);
        self.port.write_all(data)?;
        self.port.flush()?;
        Ok(())
    }

    /// Read exactly `n` bytes, using whatever timeout is currently
    /// configured (see [`Transport::set_timeout`]).
    pub fn read_exact(&mut self, n: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; n];
        match self.port.read_exact(&mut buf) {
            Ok(()) => {
                log::trace!("read: {:02x?}", buf);
                Ok(buf)
            }
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Err(Error::Timeout),
            Err(e) => Err(Error::Io(e)),
        }
    }

    pub fn read_byte(&mut self) -> Result<u8> {
        Ok(self.read_exact(1)?[0])
    }
}

impl<P> Transport<P>
where
    P: serial::SerialPort,
{
    /// Set the per-read timeout, returning the previous value so callers
    /// that need to temporarily change it (sync, flush_input) can restore
    /// it afterwards.
    pub fn set_timeout(&mut self, timeout: Duration) -> Result<Duration> {
        let previous = self.port.timeout();
        self.port.set_timeout(timeout).map_err(ser_err)?;
        Ok(previous)
    }

    pub fn set_dtr(&mut self, level: bool) -> Result<()> {
        self.port.set_dtr(level).map_err(ser_err)
    }

    pub fn set_rts(&mut self, level: bool) -> Result<()> {
        self.port.set_rts(level).map_err(ser_err)
    }

    /// Discard anything currently buffered on the line, one byte at a time,
    /// under a short timeout. Used after the reset pulse to drop the
    /// bootloader's reset banner before synchronizing.
    pub fn flush_input(&mut self) -> Result<()> {
        let saved = self.set_timeout(Duration::from_millis(50))?;
        loop {
            let mut byte = [0u8; 1];
            match self.port.read(&mut byte) {
                Ok(0) => break,
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::TimedOut => break,
                Err(e) => {
                    self.set_timeout(saved)?;
                    return Err(Error::Io(e));
                }
            }
        }
        self.set_timeout(saved)?;
        Ok(())
    }

    /// Assert DTR+RTS for 50ms, release for 50ms, then flush whatever
    /// reset-banner chatter accumulated (§4.A).
    pub fn reset_pulse(&mut self) -> Result<()> {
        self.set_dtr(true)?;
        self.set_rts(true)?;
        thread::sleep(Duration::from_millis(50));
        self.set_dtr(false)?;
        self.set_rts(false)?;
        thread::sleep(Duration::from_millis(50));
        self.flush_input()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::VecDeque;
    use std::io::{self, Read, Write};

    /// An in-memory `Read + Write` double standing in for a serial port, so
    /// codec logic can be tested without a real bootloader on the other
    /// end. `inbound` is what the fake device sends back; `outbound`
    /// records what was written to it.
    pub struct FakePort {
        pub inbound: VecDeque<u8>,
        pub outbound: Vec<u8>,
    }

    impl FakePort {
        pub fn new(inbound: &[u8]) -> Self {
            FakePort {
                inbound: inbound.iter().copied().collect(),
                outbound: Vec::new(),
            }
        }
    }

    impl Read for FakePort {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.inbound.is_empty() {
                return Err(io::Error::new(io::ErrorKind::TimedOut, "no more data"));
            }
            let mut n = 0;
            while n < buf.len() {
                match self.inbound.pop_front() {
                    Some(byte) => {
                        buf[n] = byte;
                        n += 1;
                    }
                    None => break,
                }
            }
            Ok(n)
        }
    }

    impl Write for FakePort {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.outbound.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl super::Transport<FakePort> {
        pub fn fake(inbound: &[u8]) -> Self {
            super::Transport {
                port: FakePort::new(inbound),
            }
        }

        pub fn sent(&self) -> &[u8] {
            &self.port.outbound
        }
    }
}
