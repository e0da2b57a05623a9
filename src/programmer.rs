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

//! Unified programmer surface (§4.E) over the two wire codecs.
//!
//! [`Protocol`] is a tagged variant rather than a trait object: the two
//! codecs never need dynamic dispatch (there's exactly one Session per
//! open port, and it's picked once at `open()` time), so a plain `match`
//! in each method is both simpler and allocation-free.

use std::io::{Read, Write};
use std::str::FromStr;

use crate::cpu::CpuDescriptor;
use crate::codec::{v1, v2};
use crate::error::{Error, Result};
use crate::session_state::SessionState;
use crate::transport::Transport;

/// Which dialect of STK500 to speak.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Stk500v1,
    Stk500v2,
}

impl FromStr for Protocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Stk500v1" => Ok(Protocol::Stk500v1),
            "Stk500v2" => Ok(Protocol::Stk500v2),
            other => Err(Error::UnsupportedProtocol(other.to_owned())),
        }
    }
}

/// `select_programmer`: the factory named in §4.E.
pub fn select_programmer(name: &str) -> Result<Protocol> {
    name.parse()
}

/// A programmer session: a protocol tag, the session state it mutates, and
/// the transport it talks over. Every method here matches on `self.protocol`
/// and delegates to the matching codec module, which is the only place that
/// knows the wire format.
pub struct Session<P> {
    protocol: Protocol,
    transport: Transport<P>,
    pub state: SessionState,
}

impl<P> Session<P>
where
    P: Read + Write,
{
    pub fn new(protocol: Protocol, transport: Transport<P>) -> Self {
        Session {
            protocol,
            transport,
            state: SessionState::new(),
        }
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// `board_request`: populate hw/sw versions.
    pub fn board_request(&mut self) -> Result<()> {
        match self.protocol {
            Protocol::Stk500v1 => v1::board_request(&mut self.transport, &mut self.state),
            Protocol::Stk500v2 => v2::board_request(&mut self.transport, &mut self.state),
        }
    }

    /// `cpu_signature`: populate and return the CPU descriptor.
    pub fn cpu_signature(&mut self) -> Result<CpuDescriptor> {
        match self.protocol {
            Protocol::Stk500v1 => v1::cpu_signature(&mut self.transport, &mut self.state),
            Protocol::Stk500v2 => v2::cpu_signature(&mut self.transport, &mut self.state),
        }
    }

    pub fn load_address(&mut self, byte_addr: u32, flash: bool) -> Result<()> {
        match self.protocol {
            Protocol::Stk500v1 => v1::load_address(&mut self.transport, byte_addr, flash),
            Protocol::Stk500v2 => v2::load_address(&mut self.transport, &mut self.state, byte_addr, flash),
        }
    }

    pub fn write_memory(&mut self, buffer: &[u8], byte_addr: u32, flash: bool) -> Result<()> {
        match self.protocol {
            Protocol::Stk500v1 => v1::write_memory(&mut self.transport, buffer, byte_addr, flash),
            Protocol::Stk500v2 => v2::write_memory(&mut self.transport, &mut self.state, buffer, byte_addr, flash),
        }
    }

    pub fn read_memory(&mut self, byte_addr: u32, count: usize, flash: bool) -> Result<Vec<u8>> {
        match self.protocol {
            Protocol::Stk500v1 => v1::read_memory(&mut self.transport, byte_addr, count, flash),
            Protocol::Stk500v2 => v2::read_memory(&mut self.transport, &mut self.state, byte_addr, count, flash),
        }
    }

    pub fn leave_bootloader(&mut self) -> Result<()> {
        match self.protocol {
            Protocol::Stk500v1 => v1::leave_bootloader(&mut self.transport),
            Protocol::Stk500v2 => v2::leave_bootloader(&mut self.transport, &mut self.state),
        }
    }
}

impl<P> Session<P>
where
    P: serial::SerialPort,
{
    /// `sync()`: v1 has a dedicated retry-tolerant handshake; v2 has none
    /// (a `SIGN_ON` serves the same purpose and also fills in the
    /// programmer name, so it's used here for both effects).
    pub fn sync(&mut self) -> Result<()> {
        match self.protocol {
            Protocol::Stk500v1 => {
                v1::sync(&mut self.transport)?;
                self.state.programmer_name = v1::get_sign_on(&mut self.transport)?;
                Ok(())
            }
            Protocol::Stk500v2 => {
                v2::sign_on(&mut self.transport, &mut self.state)?;
                Ok(())
            }
        }
    }

    pub fn reset_pulse(&mut self) -> Result<()> {
        self.transport.reset_pulse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_programmer_accepts_known_names() {
        assert_eq!(select_programmer("Stk500v1").unwrap(), Protocol::Stk500v1);
        assert_eq!(select_programmer("Stk500v2").unwrap(), Protocol::Stk500v2);
    }

    #[test]
    fn select_programmer_rejects_unknown_names() {
        match select_programmer("Stk1000") {
            Err(Error::UnsupportedProtocol(name)) => assert_eq!(name, "Stk1000"),
            other => panic!("expected UnsupportedProtocol, got {:?}", other),
        }
    }
}
