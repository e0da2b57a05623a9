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

use std::io::{self, Write};

use anyhow::{Context, Result};
use clap::{crate_authors, crate_version, App, AppSettings, Arg};

use avr_stk500::programmer::Protocol;

mod flash;
mod hex;
mod list;

const PORT_HELP: &str = "Serial port to use (auto-detected if omitted)";

fn main() {
    let exit_code = match run() {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("{:#}", e);
            1
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<()> {
    let app = App::new("arduinoflash")
        .setting(AppSettings::ColoredHelp)
        .version(crate_version!())
        .author(crate_authors!())
        .about("Flash AVR boards over the STK500v1/v2 bootloader protocol\nProject website: https://locha.io/software/arduinoflash")
        .arg(
            Arg::with_name("FILENAME")
                .required_unless("list-ports")
                .takes_value(true)
                .help("Intel-HEX file to write, or to write a read-back dump to with --read"),
        )
        .arg(
            Arg::with_name("baudrate")
                .short("b")
                .long("baudrate")
                .required_unless("list-ports")
                .takes_value(true)
                .help("Serial baud rate, e.g. 57600 for ATmegaBOOT, 115200 for Optiboot/Wiring"),
        )
        .arg(
            Arg::with_name("programmer")
                .short("p")
                .long("programmer")
                .required_unless("list-ports")
                .takes_value(true)
                .possible_values(&["Stk500v1", "Stk500v2"])
                .help("STK500 dialect the target's bootloader speaks"),
        )
        .arg(
            Arg::with_name("port")
                .long("port")
                .takes_value(true)
                .help(PORT_HELP),
        )
        .arg(
            Arg::with_name("read")
                .short("r")
                .long("read")
                .conflicts_with("update")
                .help("Dump the target's flash to FILENAME instead of writing it"),
        )
        .arg(
            Arg::with_name("update")
                .short("u")
                .long("update")
                .conflicts_with("read")
                .help("Write FILENAME to the target's flash and verify it (default)"),
        )
        .arg(
            Arg::with_name("list-ports")
                .long("list-ports")
                .help("List available serial ports and exit"),
        )
        .arg(
            Arg::with_name("v")
                .short("v")
                .multiple(true)
                .help("Sets the level of verbosity, -v (debug), -vv (trace)"),
        );

    let matches = app.get_matches();

    init_logger(match matches.occurrences_of("v") {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        2..=u64::MAX => log::LevelFilter::Trace,
    })?;

    if matches.is_present("list-ports") {
        return list::list();
    }

    let filename = matches.value_of("FILENAME").unwrap();
    let baudrate = parse_baudrate(matches.value_of("baudrate").unwrap())?;
    let protocol: Protocol = matches
        .value_of("programmer")
        .unwrap()
        .parse()
        .context("invalid programmer")?;
    let port = matches.value_of("port").map(str::to_owned);
    let read_mode = matches.is_present("read");

    if read_mode {
        flash::read(filename, protocol, baudrate, port)
    } else {
        flash::update(filename, protocol, baudrate, port)
    }
}

fn parse_baudrate(s: &str) -> Result<serial::BaudRate> {
    let n: usize = s.parse().context("baud rate must be an integer")?;
    Ok(match n {
        110 => serial::BaudRate::Baud110,
        300 => serial::BaudRate::Baud300,
        600 => serial::BaudRate::Baud600,
        1200 => serial::BaudRate::Baud1200,
        2400 => serial::BaudRate::Baud2400,
        4800 => serial::BaudRate::Baud4800,
        9600 => serial::BaudRate::Baud9600,
        19200 => serial::BaudRate::Baud19200,
        38400 => serial::BaudRate::Baud38400,
        57600 => serial::BaudRate::Baud57600,
        115200 => serial::BaudRate::Baud115200,
        n => serial::BaudRate::BaudOther(n),
    })
}

fn init_logger(level: log::LevelFilter) -> Result<()> {
    let mut logger = env_logger::Builder::from_env("ARDUINOFLASH_LOG");
    logger.filter_level(level);

    #[cfg(unix)]
    logger.format(log_format_color);
    #[cfg(not(unix))]
    logger.format(log_format_no_color);

    logger.try_init().context("failed to initialize logger")
}

#[cfg(unix)]
fn log_format_color(
    fmt: &mut env_logger::fmt::Formatter,
    record: &log::Record<'_>,
) -> io::Result<()> {
    let level = match record.level() {
        log::Level::Error => ansi_term::Color::Red.bold().paint("ERROR"),
        log::Level::Warn => ansi_term::Color::Yellow.bold().paint("WARN"),
        log::Level::Info => ansi_term::Color::Green.bold().paint("INFO"),
        log::Level::Debug => ansi_term::Color::Cyan.bold().paint("DBG"),
        log::Level::Trace => ansi_term::Color::Cyan.bold().paint("TRACE"),
    };

    writeln!(fmt, "[{}] - {}", level, record.args())
}

#[cfg(not(unix))]
fn log_format_no_color(
    fmt: &mut env_logger::fmt::Formatter,
    record: &log::Record<'_>,
) -> io::Result<()> {
    let level = match record.level() {
        log::Level::Error => "ERROR",
        log::Level::Warn => "WARN",
        log::Level::Info => "INFO",
        log::Level::Debug => "DBG",
        log::Level::Trace => "TRACE",
    };

    writeln!(fmt, "[{}] - {}", level, record.args())
}
