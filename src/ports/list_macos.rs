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

use std::ffi::OsString;

use super::PortInfo;

fn glob(pat: &str) -> glob::Paths {
    glob::glob(pat).unwrap()
}

/// Enumerate `/dev/cu.*` call-out devices.
///
/// Unlike [`super::list_linux`], this doesn't walk IOKit for USB vendor and
/// product IDs, so `usb_info` is always `None` here; auto-detect (§4.A)
/// therefore never matches on macOS and callers need an explicit port.
pub fn list_all() -> Vec<PortInfo> {
    let mut ports = Vec::new();

    for entry in glob("/dev/cu.*") {
        if let Ok(path) = entry {
            let name = match path.file_name() {
                Some(name) => name.to_owned(),
                None => continue,
            };

            ports.push(PortInfo {
                port: OsString::from(&path),
                name,
                usb_info: None,
            });
        }
    }

    ports
}
