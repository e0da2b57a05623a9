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

//! AVR CPU signature registry.
//!
//! Keyed by the 24-bit Atmel signature (`SIG1<<16 | SIG2<<8 | SIG3`), read
//! three bytes at a time over the wire (§4.B/§4.C).

/// Flash geometry and display name for one AVR part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpuDescriptor {
    pub name: String,
    /// Always even: flash is word-addressed on AVR.
    pub flash_page_size_bytes: u16,
    pub flash_page_count: u16,
}

impl CpuDescriptor {
    /// Total flash size in bytes, `page_size * page_count`.
    pub fn flash_size_bytes(&self) -> u32 {
        u32::from(self.flash_page_size_bytes) * u32::from(self.flash_page_count)
    }

    /// An unrecognized part: name is the hex signature, sizes are zero.
    /// Flashing against this descriptor is blocked by the driver.
    fn unknown(signature: u32) -> Self {
        CpuDescriptor {
            name: format!("{:06X}", signature),
            flash_page_size_bytes: 0,
            flash_page_count: 0,
        }
    }
}

/// `(signature, name, page_size_bytes, page_count)`
const TABLE: &[(u32, &str, u16, u16)] = &[
    (0x1E_9608, "ATmega640", 256, 1024),
    (0x1E_9801, "ATmega2560", 256, 1024),
    (0x1E_9802, "ATmega2561", 256, 1024),
    (0x1E_9703, "ATmega1280", 256, 512),
    (0x1E_9704, "ATmega1281", 256, 512),
    (0x1E_9705, "ATmega1284P", 256, 512),
    (0x1E_9782, "AT90USB1287", 256, 512),
    (0x1E_9702, "ATmega128", 256, 512),
    (0x1E_9602, "ATmega64", 256, 256),
    (0x1E_9502, "ATmega32", 128, 256),
    (0x1E_9403, "ATmega16", 128, 128),
    (0x1E_9307, "ATmega8", 64, 128),
    (0x1E_930A, "ATmega88", 64, 128),
    (0x1E_9406, "ATmega168", 128, 256),
    (0x1E_950F, "ATmega328P", 128, 256),
    (0x1E_9514, "ATmega328", 128, 256),
    (0x1E_9404, "ATmega162", 128, 128),
    (0x1E_9402, "ATmega163", 128, 128),
    (0x1E_9405, "ATmega169", 128, 128),
    (0x1E_9306, "ATmega8515", 64, 128),
    (0x1E_9308, "ATmega8535", 64, 128),
];

/// Look up the 24-bit signature in the registry.
///
/// Returns an `unknown` descriptor (zeroed page size/count) rather than
/// `None` when the signature isn't in [`TABLE`], since callers always need
/// something to display; the zero page size is what the driver checks to
/// refuse flashing an unrecognized part.
pub fn lookup(signature: u32) -> CpuDescriptor {
    match TABLE.iter().find(|&&(sig, ..)| sig == signature) {
        Some(&(_, name, page_size, page_count)) => CpuDescriptor {
            name: name.to_owned(),
            flash_page_size_bytes: page_size,
            flash_page_count: page_count,
        },
        None => CpuDescriptor::unknown(signature),
    }
}

/// Whether `descriptor` refers to a recognized part (non-zero page size).
pub fn is_known(descriptor: &CpuDescriptor) -> bool {
    descriptor.flash_page_size_bytes != 0
}
