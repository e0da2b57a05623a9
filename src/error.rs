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

//! Error taxonomy for the protocol stack.
//!
//! Codecs surface [`Error::BadSync`]/[`Error::BadChecksum`]-style framing
//! errors, the programmer surfaces protocol errors such as
//! [`Error::StatusNotOk`], and the flash driver wraps whichever error it
//! gets with the pipeline stage it happened in (see [`FlashError`]).

use std::io;

use thiserror::Error;

/// Errors produced anywhere in the transport/codec/programmer stack.
#[derive(Debug, Error)]
pub enum Error {
    /// No serial device matched the auto-detect VID:PID list.
    #[error("no matching serial device found, pass an explicit port")]
    NoDevice,

    /// The serial port could not be opened.
    #[error("couldn't open serial port: {0}")]
    OpenFailed(#[source] io::Error),

    /// Any other I/O failure on an already-open port.
    #[error(transparent)]
    Io(#[from] io::Error),

    /// A read didn't produce the expected bytes within the timeout.
    #[error("timed out waiting for a reply")]
    Timeout,

    /// The first byte of a v1 reply wasn't `RESP_STK_IN_SYNC` (0x14).
    #[error("bad sync byte: expected {:#04x}, got {0:#04x}", crate::codec::v1::RESP_STK_IN_SYNC)]
    BadSync(u8),

    /// The last byte of a v1 reply wasn't `RESP_STK_OK` (0x10).
    #[error("bad terminator byte: expected {:#04x}, got {0:#04x}", crate::codec::v1::RESP_STK_OK)]
    BadTerminator(u8),

    /// A v1 reply's length didn't match what the caller expected.
    #[error("short reply: expected {expected} bytes, got {got}")]
    ShortReply { expected: usize, got: usize },

    /// `MESSAGE_START` wasn't seen after scanning the configured number of
    /// candidate header bytes.
    #[error("no MESSAGE_START found after {0} bytes, bootloader may be out of sync")]
    HeaderTimeout(u32),

    /// A v2 frame's XOR checksum didn't match.
    #[error("bad checksum: expected {expected:#04x}, got {got:#04x}")]
    BadChecksum { expected: u8, got: u8 },

    /// A v2 frame's TOKEN byte (offset 4) wasn't `0x0E`.
    #[error("bad token byte: expected {:#04x}, got {0:#04x}", crate::codec::v2::TOKEN)]
    BadToken(u8),

    /// A v2 reply carried a sequence number that didn't match the request.
    #[error("reply sequence number {got:#04x} doesn't match the request's {expected:#04x}")]
    BadSequence { expected: u8, got: u8 },

    /// The device reported a non-OK status for the command just sent.
    #[error("device returned status {0:#04x}")]
    StatusNotOk(u8),

    /// `select_programmer` was given a name that isn't `Stk500v1`/`Stk500v2`.
    #[error("unsupported programmer protocol `{0}`")]
    UnsupportedProtocol(String),

    /// `cpu_signature` read a 24-bit signature not present in the registry.
    #[error("unrecognized CPU signature {0:#08x}")]
    UnsupportedCpu(u32),

    /// A page write wasn't acknowledged by the bootloader.
    #[error("write to flash failed at address {0:#06x}")]
    WriteFailed(u32),

    /// A page read wasn't acknowledged by the bootloader.
    #[error("read from flash failed at address {0:#06x}")]
    ReadFailed(u32),

    /// A page read back after writing didn't match what was sent.
    #[error("verification failed at address {addr:#06x}")]
    VerifyFailed {
        addr: u32,
        expected: Vec<u8>,
        got: Vec<u8>,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Pipeline stage a [`FlashError`] occurred in.
///
/// Named exactly as the CLI prints them (`error, <stage>`) per the external
/// interface contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Open,
    Sync,
    BoardRequest,
    CpuSignature,
    Write,
    Verify,
    Read,
    Leave,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Stage::Open => "open",
            Stage::Sync => "sync",
            Stage::BoardRequest => "board_request",
            Stage::CpuSignature => "cpu_signature",
            Stage::Write => "write",
            Stage::Verify => "verify",
            Stage::Read => "read",
            Stage::Leave => "leave",
        };
        fmt.write_str(s)
    }
}

/// A stack [`Error`] tagged with the pipeline stage it surfaced in.
///
/// This is what the flash driver (§4.F) returns; it's the single result
/// type the CLI and any other embedder need to handle.
#[derive(Debug, Error)]
#[error("error, {stage}: {source}")]
pub struct FlashError {
    pub stage: Stage,
    #[source]
    pub source: Error,
}

impl FlashError {
    pub fn new(stage: Stage, source: Error) -> Self {
        FlashError { stage, source }
    }
}
