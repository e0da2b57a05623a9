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

//! STK500v2 codec (§4.C): the binary, framed, checksummed dialect spoken by
//! `STK500 AVR ISP` and `Arduino as ISP` firmwares.
//!
//! Frame layout: `MESSAGE_START seq len_hi len_lo TOKEN <body> checksum`,
//! where `checksum` is the XOR of every preceding byte in the frame.

use std::io::{Read, Write};

use crate::cpu;
use crate::error::{Error, Result};
use crate::session_state::SessionState;
use crate::transport::Transport;

const MESSAGE_START: u8 = 0x1B;
pub const TOKEN: u8 = 0x0E;

/// How many candidate bytes [`read_frame`] will discard looking for
/// `MESSAGE_START` before giving up (§4.C: "retry up to 10 times").
const HEADER_SCAN_LIMIT: u32 = 10;

const CMD_SIGN_ON: u8 = 0x01;
const CMD_GET_PARAMETER: u8 = 0x03;
const CMD_LOAD_ADDRESS: u8 = 0x06;
const CMD_PROGRAM_FLASH_ISP: u8 = 0x13;
const CMD_READ_FLASH_ISP: u8 = 0x14;
const CMD_LEAVE_PROGMODE_ISP: u8 = 0x11;
const CMD_SPI_MULTI: u8 = 0x1D;

const STATUS_CMD_OK: u8 = 0x00;

const PARAM_HW_VERSION: u8 = 0x80;
const PARAM_SW_MAJOR: u8 = 0x81;
const PARAM_SW_MINOR: u8 = 0x82;

/// Bit set in the 32-bit address of `LOAD_ADDRESS` to select flash memory
/// (vs. EEPROM, which leaves it clear).
const FLASH_ADDRESS_BIT: u32 = 1 << 31;

fn checksum(frame: &[u8]) -> u8 {
    frame.iter().fold(0u8, |acc, &b| acc ^ b)
}

fn build_frame(seq: u8, command: u8, body: &[u8]) -> Vec<u8> {
    let len = 1 + body.len();
    let mut frame = Vec::with_capacity(5 + len + 1);
    frame.push(MESSAGE_START);
    frame.push(seq);
    frame.push(((len >> 8) & 0xFF) as u8);
    frame.push((len & 0xFF) as u8);
    frame.push(TOKEN);
    frame.push(command);
    frame.extend_from_slice(body);
    let cksum = checksum(&frame);
    frame.push(cksum);
    frame
}

/// Scan for `MESSAGE_START`, then read the fixed header and variable body,
/// validating sequence number and checksum.
fn read_frame<P>(t: &mut Transport<P>, expected_seq: u8) -> Result<(u8, Vec<u8>)>
where
    P: Read + Write,
{
    let mut scanned = 0u32;
    loop {
        let byte = t.read_byte()?;
        if byte == MESSAGE_START {
            break;
        }
        scanned += 1;
        if scanned >= HEADER_SCAN_LIMIT {
            return Err(Error::HeaderTimeout(HEADER_SCAN_LIMIT));
        }
    }

    let mut header = vec![MESSAGE_START];
    header.extend(t.read_exact(3)?); // seq, len_hi, len_lo
    let seq = header[1];
    let len = (usize::from(header[2]) << 8) | usize::from(header[3]);

    let token = t.read_byte()?;
    header.push(token);
    if token != TOKEN {
        return Err(Error::BadToken(token));
    }

    let body = t.read_exact(len)?;
    let received_checksum = t.read_byte()?;

    let mut full = header;
    full.extend_from_slice(&body);
    let computed = checksum(&full);
    if computed != received_checksum {
        return Err(Error::BadChecksum {
            expected: computed,
            got: received_checksum,
        });
    }

    if seq != expected_seq {
        return Err(Error::BadSequence {
            expected: expected_seq,
            got: seq,
        });
    }

    // body[0] is the echoed command id, body[1] is status, the rest is the
    // command-specific payload.
    Ok((token, body))
}

/// Send `command`/`body` as the next frame (bumping `state`'s sequence
/// number first) and return the reply's payload after `[command, status]`.
fn transact<P>(
    t: &mut Transport<P>,
    state: &mut SessionState,
    command: u8,
    body: &[u8],
) -> Result<Vec<u8>>
where
    P: Read + Write,
{
    let seq = state.next_sequence_number();
    let frame = build_frame(seq, command, body);
    t.write(&frame)?;

    let (_token, reply_body) = read_frame(t, seq)?;
    if reply_body.len() < 2 {
        return Err(Error::ShortReply {
            expected: 2,
            got: reply_body.len(),
        });
    }
    if reply_body[0] != command {
        return Err(Error::StatusNotOk(reply_body[1]));
    }
    if reply_body[1] != STATUS_CMD_OK {
        return Err(Error::StatusNotOk(reply_body[1]));
    }
    Ok(reply_body[2..].to_vec())
}

/// `SIGN_ON (0x01)`: populates `state.programmer_name`.
pub fn sign_on<P>(t: &mut Transport<P>, state: &mut SessionState) -> Result<String>
where
    P: Read + Write,
{
    let payload = transact(t, state, CMD_SIGN_ON, &[])?;
    // payload[0] is the programmer id string length, the rest is the string.
    let name = if payload.is_empty() {
        String::new()
    } else {
        let len = usize::from(payload[0]).min(payload.len().saturating_sub(1));
        String::from_utf8_lossy(&payload[1..1 + len]).into_owned()
    };
    state.programmer_name = name.clone();
    Ok(name)
}

fn get_parameter<P>(t: &mut Transport<P>, state: &mut SessionState, id: u8) -> Result<u8>
where
    P: Read + Write,
{
    let payload = transact(t, state, CMD_GET_PARAMETER, &[id])?;
    payload
        .first()
        .copied()
        .ok_or(Error::ShortReply { expected: 1, got: 0 })
}

/// Populate `state.hw_version`/`sw_major`/`sw_minor`.
pub fn board_request<P>(t: &mut Transport<P>, state: &mut SessionState) -> Result<()>
where
    P: Read + Write,
{
    state.hw_version = get_parameter(t, state, PARAM_HW_VERSION)?;
    state.sw_major = get_parameter(t, state, PARAM_SW_MAJOR)?;
    state.sw_minor = get_parameter(t, state, PARAM_SW_MINOR)?;
    Ok(())
}

/// `SPI_MULTI (0x1D)`: read the 3 signature bytes through a raw SPI
/// passthrough and resolve them against the CPU registry (§3).
pub fn cpu_signature<P>(t: &mut Transport<P>, state: &mut SessionState) -> Result<cpu::CpuDescriptor>
where
    P: Read + Write,
{
    let mut signature_bytes = [0u8; 3];
    for (i, byte) in signature_bytes.iter_mut().enumerate() {
        // Read Signature Byte instruction: '0' 0x00 0x00 idx, reply's
        // 4th byte is the signature byte.
        let body = [4, 4, 0, b'0', 0x00, 0x00, i as u8];
        let payload = transact(t, state, CMD_SPI_MULTI, &body)?;
        *byte = *payload.last().ok_or(Error::ShortReply {
            expected: 1,
            got: 0,
        })?;
    }

    let signature = (u32::from(signature_bytes[0]) << 16)
        | (u32::from(signature_bytes[1]) << 8)
        | u32::from(signature_bytes[2]);
    let descriptor = cpu::lookup(signature);
    state.cpu = Some(descriptor.clone());
    Ok(descriptor)
}

/// `LOAD_ADDRESS (0x06)`: 32-bit big-endian address, bit 31 set for flash.
pub fn load_address<P>(t: &mut Transport<P>, state: &mut SessionState, byte_addr: u32, flash: bool) -> Result<()>
where
    P: Read + Write,
{
    let word_addr = if flash { byte_addr / 2 } else { byte_addr };
    let mut addr = word_addr;
    if flash {
        addr |= FLASH_ADDRESS_BIT;
    }
    let body = addr.to_be_bytes();
    transact(t, state, CMD_LOAD_ADDRESS, &body)?;
    Ok(())
}

/// `PROGRAM_FLASH_ISP (0x13)` / EEPROM variant: program one page.
pub fn write_memory<P>(
    t: &mut Transport<P>,
    state: &mut SessionState,
    buffer: &[u8],
    byte_addr: u32,
    flash: bool,
) -> Result<()>
where
    P: Read + Write,
{
    load_address(t, state, byte_addr, flash)?;

    // Just lenH, lenL, data: shorter than the full mode/delay/cmd/poll
    // header stock firmware expects, but every bootloader this targets
    // tolerates it (kept bit-exact with the source, see DESIGN.md).
    let len = buffer.len() as u16;
    let mut body = Vec::with_capacity(2 + buffer.len());
    body.extend_from_slice(&len.to_be_bytes());
    body.extend_from_slice(buffer);

    transact(t, state, CMD_PROGRAM_FLASH_ISP, &body).map_err(|_| Error::WriteFailed(byte_addr))?;
    Ok(())
}

/// `READ_FLASH_ISP (0x14)` / EEPROM variant: read back `count` bytes.
pub fn read_memory<P>(
    t: &mut Transport<P>,
    state: &mut SessionState,
    byte_addr: u32,
    count: usize,
    flash: bool,
) -> Result<Vec<u8>>
where
    P: Read + Write,
{
    load_address(t, state, byte_addr, flash)?;

    let len = count as u16;
    let mut body = Vec::with_capacity(4);
    body.extend_from_slice(&len.to_be_bytes());
    body.push(if flash { 0x20 } else { 0xA0 }); // Read Program/EEPROM Memory cmd1

    let payload = transact(t, state, CMD_READ_FLASH_ISP, &body).map_err(|_| Error::ReadFailed(byte_addr))?;
    if payload.len() < count {
        return Err(Error::ReadFailed(byte_addr));
    }
    Ok(payload[..count].to_vec())
}

/// `LEAVE_PROGMODE_ISP (0x11)`.
pub fn leave_bootloader<P>(t: &mut Transport<P>, state: &mut SessionState) -> Result<()>
where
    P: Read + Write,
{
    let body = [0, 0]; // pre-delay, post-delay
    transact(t, state, CMD_LEAVE_PROGMODE_ISP, &body)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::test_support::FakePort;

    /// Build a raw reply frame the way a device would, independent of
    /// `build_frame` (which is also under test), so tests don't validate a
    /// function against itself.
    fn raw_reply(seq: u8, command: u8, status: u8, payload: &[u8]) -> Vec<u8> {
        let mut body = vec![command, status];
        body.extend_from_slice(payload);
        let len = body.len();
        let mut frame = vec![
            MESSAGE_START,
            seq,
            ((len >> 8) & 0xFF) as u8,
            (len & 0xFF) as u8,
            TOKEN,
        ];
        frame.extend_from_slice(&body);
        let cksum = checksum(&frame);
        frame.push(cksum);
        frame
    }

    #[test]
    fn checksum_is_xor_of_whole_frame() {
        let frame = build_frame(1, CMD_SIGN_ON, &[]);
        assert_eq!(checksum(&frame[..frame.len() - 1]), frame[frame.len() - 1]);
    }

    #[test]
    fn sign_on_sends_seq_one_first() {
        let name_bytes = b"STK500v";
        let mut payload = vec![name_bytes.len() as u8];
        payload.extend_from_slice(name_bytes);
        let reply = raw_reply(1, CMD_SIGN_ON, STATUS_CMD_OK, &payload);
        let mut t = Transport::<FakePort>::fake(&reply);
        let mut state = SessionState::new();
        let name = sign_on(&mut t, &mut state).unwrap();
        assert_eq!(name, "STK500v");
        assert_eq!(t.sent()[1], 1); // first frame carries seq = 1
        assert_eq!(state.programmer_name, "STK500v");
    }

    #[test]
    fn load_address_sets_flash_bit_and_halves_address() {
        let reply = raw_reply(1, CMD_LOAD_ADDRESS, STATUS_CMD_OK, &[]);
        let mut t = Transport::<FakePort>::fake(&reply);
        let mut state = SessionState::new();
        load_address(&mut t, &mut state, 0x0200, true).unwrap();

        let sent = t.sent();
        // frame: START seq lenH lenL TOKEN cmd addr(4) checksum
        let addr_bytes = &sent[6..10];
        let addr = u32::from_be_bytes([addr_bytes[0], addr_bytes[1], addr_bytes[2], addr_bytes[3]]);
        assert_eq!(addr & FLASH_ADDRESS_BIT, FLASH_ADDRESS_BIT);
        assert_eq!(addr & !FLASH_ADDRESS_BIT, 0x0100);
    }

    #[test]
    fn write_memory_uses_short_two_byte_length_prefix() {
        // load_address (seq 1) then program_flash_isp (seq 2).
        let mut combined = raw_reply(1, CMD_LOAD_ADDRESS, STATUS_CMD_OK, &[]);
        combined.extend_from_slice(&raw_reply(2, CMD_PROGRAM_FLASH_ISP, STATUS_CMD_OK, &[]));
        let mut t = Transport::<FakePort>::fake(&combined);
        let mut state = SessionState::new();
        write_memory(&mut t, &mut state, &[0xAA, 0xBB, 0xCC, 0xDD], 0x0000, true).unwrap();

        let sent = t.sent();
        // second frame starts right after the first (load_address) frame.
        let first_len = 5 + 1 + 4 + 1; // header(5) + cmd(1) + addr(4) + checksum(1)
        let second = &sent[first_len..];
        // header(5) + cmd(1) + lenH + lenL + data(4) + checksum(1)
        assert_eq!(second[6], 0x00); // lenH
        assert_eq!(second[7], 0x04); // lenL
        assert_eq!(&second[8..12], &[0xAA, 0xBB, 0xCC, 0xDD]);
    }

    #[test]
    fn mismatched_sequence_number_is_rejected() {
        let reply = raw_reply(99, CMD_SIGN_ON, STATUS_CMD_OK, &[0]);
        let mut t = Transport::<FakePort>::fake(&reply);
        let mut state = SessionState::new();
        match sign_on(&mut t, &mut state) {
            Err(Error::BadSequence { expected: 1, got: 99 }) => {}
            other => panic!("expected BadSequence, got {:?}", other),
        }
    }

    #[test]
    fn corrupted_checksum_is_rejected() {
        let mut reply = raw_reply(1, CMD_SIGN_ON, STATUS_CMD_OK, &[0]);
        let last = reply.len() - 1;
        reply[last] ^= 0xFF;
        let mut t = Transport::<FakePort>::fake(&reply);
        let mut state = SessionState::new();
        match sign_on(&mut t, &mut state) {
            Err(Error::BadChecksum { .. }) => {}
            other => panic!("expected BadChecksum, got {:?}", other),
        }
    }

    #[test]
    fn corrupted_token_is_rejected() {
        // Corrupt only the TOKEN byte (offset 4) and recompute the checksum
        // over the corrupted frame, so the checksum check alone can't catch
        // this — only an explicit TOKEN comparison can.
        let mut reply = raw_reply(1, CMD_SIGN_ON, STATUS_CMD_OK, &[0]);
        reply[4] ^= 0xFF;
        let last = reply.len() - 1;
        reply[last] = checksum(&reply[..last]);
        let mut t = Transport::<FakePort>::fake(&reply);
        let mut state = SessionState::new();
        match sign_on(&mut t, &mut state) {
            Err(Error::BadToken(_)) => {}
            other => panic!("expected BadToken, got {:?}", other),
        }
    }

    #[test]
    fn non_ok_status_is_surfaced() {
        let reply = raw_reply(1, CMD_LEAVE_PROGMODE_ISP, 0x01, &[]);
        let mut t = Transport::<FakePort>::fake(&reply);
        let mut state = SessionState::new();
        match leave_bootloader(&mut t, &mut state) {
            Err(Error::StatusNotOk(0x01)) => {}
            other => panic!("expected StatusNotOk, got {:?}", other),
        }
    }

    #[test]
    fn read_memory_returns_requested_bytes() {
        // load_address consumes seq 1, the read itself consumes seq 2.
        let mut combined = raw_reply(1, CMD_LOAD_ADDRESS, STATUS_CMD_OK, &[]);
        combined.extend_from_slice(&raw_reply(2, CMD_READ_FLASH_ISP, STATUS_CMD_OK, &[1, 2, 3, 4]));
        let mut t = Transport::<FakePort>::fake(&combined);
        let mut state = SessionState::new();
        let data = read_memory(&mut t, &mut state, 0x0000, 4, true).unwrap();
        assert_eq!(data, vec![1, 2, 3, 4]);
    }

    #[test]
    fn cpu_signature_resolves_atmega2560_from_three_spi_multi_replies() {
        // Three SPI_MULTI round trips (seq 1..3), signature byte at offset 3
        // of each reply body: 0x1E, 0x98, 0x01 -> 0x1E9801 -> ATmega2560.
        let mut combined = raw_reply(1, CMD_SPI_MULTI, STATUS_CMD_OK, &[0, 0, 0, 0x1E]);
        combined.extend_from_slice(&raw_reply(2, CMD_SPI_MULTI, STATUS_CMD_OK, &[0, 0, 0, 0x98]));
        combined.extend_from_slice(&raw_reply(3, CMD_SPI_MULTI, STATUS_CMD_OK, &[0, 0, 0, 0x01]));
        let mut t = Transport::<FakePort>::fake(&combined);
        let mut state = SessionState::new();

        let descriptor = cpu_signature(&mut t, &mut state).unwrap();
        assert_eq!(descriptor.name, "ATmega2560");
        assert_eq!(descriptor.flash_page_size_bytes, 256);
        assert_eq!(descriptor.flash_page_count, 1024);
        assert_eq!(state.cpu.unwrap().name, "ATmega2560");
    }
}
