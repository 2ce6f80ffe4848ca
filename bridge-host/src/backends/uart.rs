//! # TTY UART Backend
//!
//! A serial device (`/dev/ttyS*`, `/dev/ttyUSB*`) in raw, non-blocking mode.
//! Closing the device is what releases the lines.
use std::{
    fs::{File, OpenOptions},
    io::{self, ErrorKind, Read, Write},
    os::unix::fs::OpenOptionsExt,
    path::{Path, PathBuf},
};

use bridge_core::hal::SerialPort;
use nix::{
    fcntl::OFlag,
    sys::termios::{self, BaudRate, SetArg},
};

fn baud_rate(baud: u32) -> io::Result<BaudRate> {
    Ok(match baud {
        9600 => BaudRate::B9600,
        19_200 => BaudRate::B19200,
        38_400 => BaudRate::B38400,
        57_600 => BaudRate::B57600,
        115_200 => BaudRate::B115200,
        230_400 => BaudRate::B230400,
        460_800 => BaudRate::B460800,
        921_600 => BaudRate::B921600,
        other => {
            return Err(io::Error::new(
                ErrorKind::InvalidInput,
                format!("Unsupported baud rate {}", other),
            ));
        }
    })
}

#[derive(Debug)]
pub struct TtyUart {
    path: PathBuf,
    file: Option<File>,
}

impl TtyUart {
    pub fn new(path: impl AsRef<Path>) -> TtyUart {
        TtyUart {
            path: path.as_ref().to_path_buf(),
            file: None,
        }
    }

    fn open(&self, baud: u32) -> io::Result<File> {
        let rate = baud_rate(baud)?;
        log::debug!("Opening {} at {} baud", self.path.display(), baud);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags((OFlag::O_NOCTTY | OFlag::O_NONBLOCK).bits())
            .open(&self.path)?;
        let mut settings = termios::tcgetattr(&file)?;
        termios::cfmakeraw(&mut settings);
        termios::cfsetspeed(&mut settings, rate)?;
        termios::tcsetattr(&file, SetArg::TCSANOW, &settings)?;
        Ok(file)
    }

    fn file(&mut self) -> io::Result<&mut File> {
        self.file
            .as_mut()
            .ok_or_else(|| io::Error::new(ErrorKind::NotConnected, "UART is closed"))
    }
}

impl SerialPort for TtyUart {
    fn begin(&mut self, baud: u32) -> io::Result<()> {
        self.file = Some(self.open(baud)?);
        Ok(())
    }

    fn end(&mut self) {
        if self.file.take().is_some() {
            log::debug!("Closed {}", self.path.display());
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.file()?.read(buf) {
            Err(err) if err.kind() == ErrorKind::WouldBlock => Ok(0),
            other => other,
        }
    }

    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        match self.file()?.write(data) {
            Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => {
                Ok(0)
            }
            other => other,
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.as_ref() {
            Some(file) => termios::tcdrain(file).map_err(io::Error::from),
            None => Ok(()),
        }
    }
}
