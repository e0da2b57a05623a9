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

//! STK500v1 codec (§4.B): the ad-hoc, length-agnostic dialect ATmegaBOOT
//! and Optiboot speak. Every outbound command is terminated by `CRC_EOP`
//! and every inbound reply is bounded by `RESP_STK_IN_SYNC ... RESP_STK_OK`.

use std::io::{Read, Write};
use std::time::Duration;

use crate::cpu;
use crate::error::{Error, Result};
use crate::session_state::SessionState;
use crate::transport::Transport;

/// Sent by the bootloader as the first byte of every reply.
pub const RESP_STK_IN_SYNC: u8 = 0x14;
/// Sent by the bootloader as the last byte of every reply.
pub const RESP_STK_OK: u8 = 0x10;
/// Terminates every outbound command ("CRC_EOP" in Atmel's docs, a
/// historical name; it's just a fixed sentinel byte, not a CRC).
const CRC_EOP: u8 = 0x20;

const PARAM_HW_VERSION: u8 = 0x80;
const PARAM_SW_MAJOR: u8 = 0x81;
const PARAM_SW_MINOR: u8 = 0x82;

/// Longest reply [`get_sign_on`] will read before giving up on ever seeing
/// `RESP_STK_OK`.
const SIGN_ON_MAX_LEN: usize = 64;

/// Send `body` followed by `CRC_EOP`, read exactly `expected_len` bytes
/// back, and check the `RESP_STK_IN_SYNC ... RESP_STK_OK` envelope.
fn cmd_request<P>(t: &mut Transport<P>, body: &[u8], expected_len: usize) -> Result<Vec<u8>>
where
    P: Read + Write,
{
    let mut out = Vec::with_capacity(body.len() + 1);
    out.extend_from_slice(body);
    out.push(CRC_EOP);
    t.write(&out)?;

    let reply = t.read_exact(expected_len)?;
    if reply[0] != RESP_STK_IN_SYNC {
        return Err(Error::BadSync(reply[0]));
    }
    if reply[reply.len() - 1] != RESP_STK_OK {
        return Err(Error::BadTerminator(reply[reply.len() - 1]));
    }
    Ok(reply)
}

/// Read a reply while tolerating leading noise: discard bytes until
/// `RESP_STK_IN_SYNC` is seen, then read the remaining `total_len - 1`
/// bytes and check the terminator. Used only by [`sync`] — every other
/// operation assumes the line is already in sync and uses [`cmd_request`].
fn read_in_sync<P>(t: &mut Transport<P>, total_len: usize) -> Result<Vec<u8>>
where
    P: Read + Write,
{
    loop {
        let byte = t.read_byte()?;
        if byte == RESP_STK_IN_SYNC {
            let mut reply = vec![byte];
            reply.extend(t.read_exact(total_len - 1)?);
            if reply[reply.len() - 1] != RESP_STK_OK {
                return Err(Error::BadTerminator(reply[reply.len() - 1]));
            }
            return Ok(reply);
        }
        // discard and keep scanning; a dead line eventually times out.
    }
}

/// Synchronize with the bootloader: up to 5 attempts at 500ms each, any
/// other bytes received (reset-banner chatter) are discarded while
/// scanning for `RESP_STK_IN_SYNC`. Restores the 1000ms steady-state
/// timeout before returning either way.
pub fn sync<P>(t: &mut Transport<P>) -> Result<()>
where
    P: serial::SerialPort,
{
    t.set_timeout(Duration::from_millis(500))?;

    let mut last_err = Error::Timeout;
    let mut synced = false;
    for _ in 0..5 {
        t.write(&[b'0', CRC_EOP])?;
        match read_in_sync(t, 2) {
            Ok(_) => {
                synced = true;
                break;
            }
            Err(e) => last_err = e,
        }
    }

    t.set_timeout(Duration::from_millis(1000))?;

    if synced {
        Ok(())
    } else {
        Err(last_err)
    }
}

/// `GET_SIGN_ON`: Optiboot doesn't implement this and just echoes the
/// envelope with an empty name, so this reads byte-at-a-time up to
/// [`SIGN_ON_MAX_LEN`] rather than requiring an exact length.
pub fn get_sign_on<P>(t: &mut Transport<P>) -> Result<String>
where
    P: Read + Write,
{
    t.write(&[b'1', CRC_EOP])?;

    let mut buf = Vec::new();
    loop {
        let byte = t.read_byte()?;
        buf.push(byte);
        if buf.len() >= 2 && byte == RESP_STK_OK {
            break;
        }
        if buf.len() >= SIGN_ON_MAX_LEN {
            break;
        }
    }

    match buf.first() {
        Some(&RESP_STK_IN_SYNC) => {}
        Some(&other) => return Err(Error::BadSync(other)),
        None => return Err(Error::Timeout),
    }
    match buf.last() {
        Some(&RESP_STK_OK) => {}
        Some(&other) => return Err(Error::BadTerminator(other)),
        None => return Err(Error::Timeout),
    }

    Ok(String::from_utf8_lossy(&buf[1..buf.len() - 1]).into_owned())
}

fn get_parameter<P>(t: &mut Transport<P>, id: u8) -> Result<u8>
where
    P: Read + Write,
{
    let reply = cmd_request(t, &[b'A', id], 3)?;
    Ok(reply[1])
}

/// Populate `state.hw_version`/`sw_major`/`sw_minor`.
///
/// The original source stores the `SW_MAJOR` reply into `hw_version`,
/// clobbering the hardware version it had just read — a bug (§9 open
/// questions). This stores it into `sw_major` as intended.
pub fn board_request<P>(t: &mut Transport<P>, state: &mut SessionState) -> Result<()>
where
    P: Read + Write,
{
    state.hw_version = get_parameter(t, PARAM_HW_VERSION)?;
    state.sw_major = get_parameter(t, PARAM_SW_MAJOR)?;
    state.sw_minor = get_parameter(t, PARAM_SW_MINOR)?;
    Ok(())
}

/// `cpu_signature ('u')`: read the 3 signature bytes and resolve them
/// against the CPU registry (§3).
pub fn cpu_signature<P>(t: &mut Transport<P>, state: &mut SessionState) -> Result<cpu::CpuDescriptor>
where
    P: Read + Write,
{
    let reply = cmd_request(t, b"u", 5)?;
    let signature = (u32::from(reply[1]) << 16) | (u32::from(reply[2]) << 8) | u32::from(reply[3]);
    let descriptor = cpu::lookup(signature);
    state.cpu = Some(descriptor.clone());
    Ok(descriptor)
}

fn word_address(byte_addr: u32, flash: bool) -> u32 {
    if flash {
        byte_addr / 2
    } else {
        byte_addr
    }
}

/// `load_address ('U')`: little-endian word address for flash, byte
/// address unchanged for EEPROM.
pub fn load_address<P>(t: &mut Transport<P>, byte_addr: u32, flash: bool) -> Result<()>
where
    P: Read + Write,
{
    let addr = word_address(byte_addr, flash);
    let lo = (addr & 0xFF) as u8;
    let hi = ((addr >> 8) & 0xFF) as u8;
    cmd_request(t, &[b'U', lo, hi], 2)?;
    Ok(())
}

/// `program_page ('d')`: write `buffer` to flash or EEPROM at `byte_addr`.
pub fn write_memory<P>(t: &mut Transport<P>, buffer: &[u8], byte_addr: u32, flash: bool) -> Result<()>
where
    P: Read + Write,
{
    load_address(t, byte_addr, flash)?;

    let len = buffer.len();
    let mut body = Vec::with_capacity(4 + len);
    body.push(b'd');
    body.push(((len >> 8) & 0xFF) as u8);
    body.push((len & 0xFF) as u8);
    body.push(if flash { b'F' } else { b'E' });
    body.extend_from_slice(buffer);

    cmd_request(t, &body, 2).map_err(|_| Error::WriteFailed(byte_addr))?;
    Ok(())
}

/// `read_page ('t')`: read `count` bytes of flash or EEPROM from
/// `byte_addr`.
pub fn read_memory<P>(t: &mut Transport<P>, byte_addr: u32, count: usize, flash: bool) -> Result<Vec<u8>>
where
    P: Read + Write,
{
    load_address(t, byte_addr, flash)?;

    let body = [
        b't',
        ((count >> 8) & 0xFF) as u8,
        (count & 0xFF) as u8,
        if flash { b'F' } else { b'E' },
    ];
    let reply = cmd_request(t, &body, count + 2).map_err(|_| Error::ReadFailed(byte_addr))?;
    Ok(reply[1..=count].to_vec())
}

/// `leave ('Q')`: tell the bootloader to boot the application.
pub fn leave_bootloader<P>(t: &mut Transport<P>) -> Result<()>
where
    P: Read + Write,
{
    cmd_request(t, b"Q", 2)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::test_support::FakePort;

    #[test]
    fn sync_succeeds_on_first_good_reply() {
        let mut t = Transport::<FakePort>::fake(&[0x14, 0x10]);
        assert!(sync(&mut t).is_ok());
        assert_eq!(t.sent(), &[b'0', 0x20]);
    }

    #[test]
    fn sync_tolerates_leading_noise_byte() {
        let mut t = Transport::<FakePort>::fake(&[0x00, 0x14, 0x10]);
        assert!(sync(&mut t).is_ok());
    }

    #[test]
    fn get_sign_on_empty_for_optiboot() {
        let mut t = Transport::<FakePort>::fake(&[0x14, 0x10]);
        let name = get_sign_on(&mut t).unwrap();
        assert_eq!(name, "");
    }

    #[test]
    fn get_sign_on_returns_name_between_envelope() {
        let mut t = Transport::<FakePort>::fake(b"\x14STK500\x10");
        let name = get_sign_on(&mut t).unwrap();
        assert_eq!(name, "STK500");
    }

    #[test]
    fn load_address_divides_flash_address_by_two() {
        // byte address 0x1234 -> word address 0x091A, little-endian on the wire.
        let mut t = Transport::<FakePort>::fake(&[0x14, 0x10]);
        load_address(&mut t, 0x1234, true).unwrap();
        assert_eq!(t.sent(), &[b'U', 0x1A, 0x09, 0x20]);
    }

    #[test]
    fn load_address_keeps_eeprom_address_in_bytes() {
        let mut t = Transport::<FakePort>::fake(&[0x14, 0x10]);
        load_address(&mut t, 0x0080, false).unwrap();
        assert_eq!(t.sent(), &[b'U', 0x80, 0x00, 0x20]);
    }

    #[test]
    fn write_memory_emits_load_then_program_page() {
        let mut t = Transport::<FakePort>::fake(&[0x14, 0x10, 0x14, 0x10]);
        write_memory(&mut t, &[0xAA, 0xBB, 0xCC, 0xDD], 0x0100, true).unwrap();
        assert_eq!(
            t.sent(),
            &[
                b'U', 0x80, 0x00, 0x20, // load_address(0x0100/2 = 0x0080)
                b'd', 0x00, 0x04, b'F', 0xAA, 0xBB, 0xCC, 0xDD, 0x20,
            ]
        );
    }

    #[test]
    fn read_memory_returns_bytes_between_envelope() {
        let mut t = Transport::<FakePort>::fake(&[0x14, 0x10, 0x14, 1, 2, 3, 4, 0x10]);
        let data = read_memory(&mut t, 0x0000, 4, true).unwrap();
        assert_eq!(data, vec![1, 2, 3, 4]);
    }

    #[test]
    fn cpu_signature_resolves_known_part() {
        let mut t = Transport::<FakePort>::fake(&[0x14, 0x1E, 0x98, 0x01, 0x10]);
        let mut state = SessionState::new();
        let descriptor = cpu_signature(&mut t, &mut state).unwrap();
        assert_eq!(descriptor.name, "ATmega2560");
        assert_eq!(state.cpu.unwrap().name, "ATmega2560");
    }

    #[test]
    fn board_request_stores_sw_major_not_hw_version() {
        let mut t = Transport::<FakePort>::fake(&[
            0x14, 10, 0x10, // hw_version reply
            0x14, 2, 0x10, // sw_major reply
            0x14, 7, 0x10, // sw_minor reply
        ]);
        let mut state = SessionState::new();
        board_request(&mut t, &mut state).unwrap();
        assert_eq!(state.hw_version, 10);
        assert_eq!(state.sw_major, 2);
        assert_eq!(state.sw_minor, 7);
    }
}
