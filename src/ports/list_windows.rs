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

use super::PortInfo;

/// Not implemented: enumerating `HARDWARE\DEVICEMAP\SERIALCOMM` needs a
/// registry-access crate that isn't part of this crate's dependency stack.
/// Auto-detect (§4.A) is therefore unavailable on Windows in this revision;
/// `arduinoflash` requires an explicit `--port` there (documented in §6).
pub fn list_all() -> Vec<PortInfo> {
    log::debug!("serial port enumeration isn't implemented on Windows, pass --port explicitly");
    Vec::new()
}
