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

//! Intel-HEX collaborator (§6): the `HexImage` the flash driver reads from,
//! backed by the `ihex` crate instead of the source's custom parser.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use avr_stk500::HexImage;
use ihex::{Record, Reader};

/// A parsed Intel-HEX file, stored as a sparse address → byte map so the
/// (usually large) gaps between records don't need to be materialized.
#[derive(Debug, Default)]
pub struct HexFile {
    bytes: BTreeMap<u32, u8>,
}

impl HexFile {
    /// Parse `path`, following `:02` extended segment/linear address
    /// records to resolve the full 32-bit address of each data record.
    pub fn from_path(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("hex file not found: `{}`", path.display()))?;

        let mut bytes = BTreeMap::new();
        let mut upper = 0u32;

        for record in Reader::new(&text) {
            let record = record
                .with_context(|| format!("bad hex record in `{}`", path.display()))?;
            match record {
                Record::Data { offset, value } => {
                    let base = upper + u32::from(offset);
                    for (i, byte) in value.into_iter().enumerate() {
                        if bytes.insert(base + i as u32, byte).is_some() {
                            bail!(
                                "address overlap at {:#06x} in `{}`",
                                base + i as u32,
                                path.display()
                            );
                        }
                    }
                }
                Record::ExtendedSegmentAddress(seg) => upper = u32::from(seg) << 4,
                Record::ExtendedLinearAddress(high) => upper = u32::from(high) << 16,
                Record::StartSegmentAddress { .. } | Record::StartLinearAddress(_) => {}
                Record::EndOfFile => break,
            }
        }

        if bytes.is_empty() {
            bail!("hex file `{}` has no data records", path.display());
        }

        Ok(HexFile { bytes })
    }
}

impl HexImage for HexFile {
    fn min_addr(&self) -> u32 {
        *self.bytes.keys().next().unwrap_or(&0)
    }

    fn max_addr(&self) -> u32 {
        self.bytes.keys().next_back().map_or(0, |a| a + 1)
    }

    fn slice(&self, start: u32, size: usize) -> Vec<u8> {
        (0..size as u32)
            .map(|i| self.bytes.get(&(start + i)).copied().unwrap_or(0))
            .collect()
    }
}

/// Write `bytes` (starting at address 0, as produced by a flash dump) out
/// as an Intel-HEX file, emitting an `ExtendedLinearAddress` record every
/// time the high 16 bits of the address change.
pub fn write_intel_hex(path: &Path, bytes: &[u8]) -> Result<()> {
    const LINE_LEN: usize = 16;

    let mut records = Vec::new();
    let mut upper = 0u32;

    for (chunk_index, chunk) in bytes.chunks(LINE_LEN).enumerate() {
        let addr = chunk_index as u32 * LINE_LEN as u32;
        let high = addr >> 16;
        if high != upper {
            records.push(Record::ExtendedLinearAddress(high as u16));
            upper = high;
        }
        records.push(Record::Data {
            offset: (addr & 0xFFFF) as u16,
            value: chunk.to_vec(),
        });
    }
    records.push(Record::EndOfFile);

    let text = ihex::create_object_file_representation(&records)
        .context("failed to render Intel-HEX output")?;
    fs::write(path, text)
        .with_context(|| format!("couldn't write hex file `{}`", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_single_data_record() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, ":04000000DEADBEEF20").unwrap();
        writeln!(file, ":00000001FF").unwrap();

        let hex = HexFile::from_path(file.path()).unwrap();
        assert_eq!(hex.min_addr(), 0);
        assert_eq!(hex.max_addr(), 4);
        assert_eq!(hex.slice(0, 4), vec![0xDE, 0xAD, 0xBE, 0xEF]);
    }

    #[test]
    fn honors_extended_linear_address() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, ":02000004000100F9").unwrap();
        writeln!(file, ":02000000AABB54").unwrap();
        writeln!(file, ":00000001FF").unwrap();

        let hex = HexFile::from_path(file.path()).unwrap();
        assert_eq!(hex.min_addr(), 0x1_0000);
        assert_eq!(hex.slice(0x1_0000, 2), vec![0xAA, 0xBB]);
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(HexFile::from_path(Path::new("/nonexistent/path.hex")).is_err());
    }
}
