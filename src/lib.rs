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

//! # AVR STK500 bootloader interface library
//!
//! This is a library to flash AVR-based boards (Arduino Nano, Uno,
//! Mega2560, and similar) through the STK500v1 or STK500v2 dialect their
//! stock bootloader speaks, over a plain serial connection.
//!
//! The pieces are layered so each can be used (and tested) on its own:
//!
//! - [`transport`]: serial I/O, DTR/RTS reset pulse, port enumeration.
//! - [`cpu`]: the AVR signature → flash geometry registry.
//! - [`codec`]: the two wire-level dialects, v1 and v2.
//! - [`programmer`]: a single [`programmer::Session`] surface over either
//!   codec, selected by [`programmer::select_programmer`].
//! - [`flash`]: the open → sync → identify → program → verify → leave
//!   pipeline, reporting progress through [`flash::ProgressSink`].
//!
//! # Tested bootloaders
//!
//! - Optiboot (STK500v1, Arduino Uno/Nano)
//! - ATmegaBOOT (STK500v1, legacy Arduino boards)
//! - `Arduino as ISP` / `STK500 AVR ISP` (STK500v2, Arduino Mega2560)

pub mod codec;
pub mod cpu;
pub mod error;
pub mod flash;
pub mod ports;
pub mod programmer;
pub mod session_state;
pub mod transport;

pub use crate::error::{Error, FlashError, Result, Stage};
pub use crate::flash::{Driver, HexImage, Progress, ProgressSink, ProgressSource};
pub use crate::programmer::{select_programmer, Protocol, Session};
