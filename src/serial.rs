// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! UART ports of the mmWave EVM: the data port streaming frames and the CLI
//! port accepting text commands.

use crate::reader::ByteStream;
use log::{debug, info, trace};
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::{
    io::{self, Read, Write},
    thread,
    time::Duration,
};

/// Default baud rate of the data port.
pub const DATA_BAUD_RATE: u32 = 921_600;

/// Default baud rate of the CLI port.
pub const CLI_BAUD_RATE: u32 = 115_200;

/// Poll interval of the underlying driver.  Reads keep waiting past it, a
/// stalled sensor stalls the reader.
const POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Pause after each command so the sensor CLI keeps up.
const COMMAND_DELAY: Duration = Duration::from_millis(100);

fn open(path: &str, baud_rate: u32) -> Result<Box<dyn SerialPort>, serialport::Error> {
    serialport::new(path, baud_rate)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(FlowControl::None)
        .timeout(POLL_TIMEOUT)
        .open()
}

/// Blocking reader for the data port.
pub struct SerialStream {
    port: Box<dyn SerialPort>,
}

impl SerialStream {
    /// Opens the data port, e.g. `/dev/ttyACM1` at 921600 baud.
    pub fn open(path: &str, baud_rate: u32) -> Result<Self, serialport::Error> {
        let port = open(path, baud_rate)?;
        // Stale bytes from before the open would only cost a sync loss.
        port.clear(ClearBuffer::Input)?;
        info!("opened data port {} at {} baud", path, baud_rate);
        Ok(SerialStream { port })
    }
}

impl ByteStream for SerialStream {
    fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        let mut filled = 0;

        while filled < buf.len() {
            match self.port.read(&mut buf[filled..]) {
                Ok(0) => return Err(io::ErrorKind::UnexpectedEof.into()),
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::TimedOut => (),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => (),
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }

    fn discard_buffered(&mut self) -> io::Result<()> {
        trace!("discarding {:?} buffered bytes", self.port.bytes_to_read());
        self.port.clear(ClearBuffer::Input)?;
        Ok(())
    }
}

/// Writer for the CLI port.
pub struct CommandPort {
    port: Box<dyn SerialPort>,
}

impl CommandPort {
    /// Opens the CLI port, e.g. `/dev/ttyACM0` at 115200 baud.
    pub fn open(path: &str, baud_rate: u32) -> Result<Self, serialport::Error> {
        let port = open(path, baud_rate)?;
        info!("opened cli port {} at {} baud", path, baud_rate);
        Ok(CommandPort { port })
    }

    /// Sends one command line such as `sensorStop`.
    pub fn send(&mut self, command: &str) -> io::Result<()> {
        debug!("cli command: {}", command.trim_end());
        write_command(&mut self.port, command)?;
        thread::sleep(COMMAND_DELAY);
        Ok(())
    }
}

fn write_command<W: Write + ?Sized>(port: &mut W, command: &str) -> io::Result<()> {
    port.write_all(command.trim_end().as_bytes())?;
    port.write_all(b"\n")?;
    port.flush()
}
