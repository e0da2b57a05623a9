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

//! Session state shared by both codecs.
//!
//! Holding this in a plain struct owned by [`crate::programmer::Session`]
//! and handed to the codecs by `&mut` reference (rather than the codecs
//! reaching into a shared parent object, as the Python source does) keeps
//! the codecs free of any dependency on a live serial port: they can be
//! unit-tested against just this struct and an in-memory transport.

use std::time::Duration;

use crate::cpu::CpuDescriptor;

/// Per-open-port state populated as the handshake progresses.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub hw_version: u8,
    pub sw_major: u8,
    pub sw_minor: u8,
    pub programmer_name: String,
    pub cpu: Option<CpuDescriptor>,
    /// v2 only; unused by the v1 codec.
    pub sequence_number: u8,
    pub timeout: Duration,
}

impl SessionState {
    pub fn new() -> Self {
        SessionState {
            hw_version: 0,
            sw_major: 0,
            sw_minor: 0,
            programmer_name: String::new(),
            cpu: None,
            sequence_number: 0,
            timeout: Duration::from_millis(1000),
        }
    }

    /// `"{major}.{minor}"`, as exposed to callers that want a single string.
    pub fn sw_version(&self) -> String {
        format!("{}.{}", self.sw_major, self.sw_minor)
    }

    /// Increment (mod 256) and return the new sequence number. The v2 codec
    /// calls this *before* constructing each outbound frame, so the very
    /// first frame of a session carries `seq = 1`, matching Avrdude.
    pub fn next_sequence_number(&mut self) -> u8 {
        self.sequence_number = self.sequence_number.wrapping_add(1);
        self.sequence_number
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_number_starts_at_one() {
        let mut state = SessionState::new();
        assert_eq!(state.next_sequence_number(), 1);
    }

    #[test]
    fn sequence_number_wraps_modulo_256() {
        let mut state = SessionState::new();
        for _ in 0..255 {
            state.next_sequence_number();
        }
        assert_eq!(state.sequence_number, 255);
        assert_eq!(state.next_sequence_number(), 0);
        assert_eq!(state.next_sequence_number(), 1);
    }

    #[test]
    fn sw_version_formats_major_dot_minor() {
        let mut state = SessionState::new();
        state.sw_major = 2;
        state.sw_minor = 17;
        assert_eq!(state.sw_version(), "2.17");
    }
}
