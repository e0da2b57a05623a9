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

//! `update`/`read` subcommands (§6): drives the library's [`Driver`] on a
//! worker thread and renders its [`Progress`] mailbox on an `indicatif` bar,
//! the same worker-thread/mailbox split §5 describes for a GUI embedder.

use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};

use avr_stk500::flash::{progress_channel, Driver, Progress};
use avr_stk500::programmer::Protocol;

use crate::hex::{write_intel_hex, HexFile};

fn bar_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{msg:12} [{bar:40.cyan/blue}] {percent}%")
        .progress_chars("=> ")
}

/// Drain `source`'s mailbox on the calling thread, rendering each event
/// onto `bar`. The terminal `Done` event carries no information the CLI
/// needs: success/failure is reported through the driver call's `Result`.
fn pump_progress(bar: &ProgressBar, source: &avr_stk500::flash::ProgressSource) {
    for event in source.try_iter() {
        match event {
            Progress::BoardInfo {
                hw_version,
                sw_version,
                programmer_name,
            } => {
                bar.println(format!(
                    "board: hw={} sw={} programmer=\"{}\"",
                    hw_version, sw_version, programmer_name
                ));
            }
            Progress::CpuInfo(cpu) => {
                bar.println(format!(
                    "cpu: {} (page {} x {})",
                    cpu.name, cpu.flash_page_size_bytes, cpu.flash_page_count
                ));
            }
            Progress::WriteProgress(frac) => {
                bar.set_message("writing");
                bar.set_position((frac * 1000.0) as u64);
            }
            Progress::VerifyProgress(frac) => {
                bar.set_message("verifying");
                bar.set_position((frac * 1000.0) as u64);
            }
            Progress::Done(_) => {}
        }
    }
}

/// Write `filename` (an Intel-HEX image) to the target and verify it.
pub fn update(
    filename: &str,
    protocol: Protocol,
    baudrate: serial::BaudRate,
    port: Option<String>,
) -> Result<()> {
    let image = HexFile::from_path(Path::new(filename))
        .with_context(|| format!("couldn't read hex file `{}`", filename))?;

    let driver = Driver::new(protocol, baudrate, port);
    let (sink, source) = progress_channel();
    let cancel = AtomicBool::new(false);

    let bar = ProgressBar::new(1000);
    bar.set_style(bar_style());

    let handle = thread::spawn(move || driver.flash(&image, &cancel, &sink));

    loop {
        pump_progress(&bar, &source);
        if handle.is_finished() {
            break;
        }
        thread::sleep(Duration::from_millis(50));
    }
    let result = handle.join().expect("flash worker thread panicked");
    pump_progress(&bar, &source);
    bar.finish_and_clear();

    result?;
    println!("done.");
    Ok(())
}

/// Dump the target's flash into `filename` as an Intel-HEX image.
pub fn read(
    filename: &str,
    protocol: Protocol,
    baudrate: serial::BaudRate,
    port: Option<String>,
) -> Result<()> {
    let driver = Driver::new(protocol, baudrate, port);
    let (sink, source) = progress_channel();
    let cancel = AtomicBool::new(false);

    let bar = ProgressBar::new(1000);
    bar.set_style(bar_style());

    let handle = thread::spawn(move || driver.dump(&cancel, &sink));

    loop {
        pump_progress(&bar, &source);
        if handle.is_finished() {
            break;
        }
        thread::sleep(Duration::from_millis(50));
    }
    let image = handle.join().expect("read worker thread panicked")?;
    pump_progress(&bar, &source);
    bar.finish_and_clear();

    write_intel_hex(Path::new(filename), image.as_bytes())
        .with_context(|| format!("couldn't write hex file `{}`", filename))?;
    println!("wrote {} bytes to `{}`.", image.as_bytes().len(), filename);
    Ok(())
}
