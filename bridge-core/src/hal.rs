//! Capabilities the bridge needs from the platform it runs on.
//!
//! Everything below these traits (GPIO registers, the UART peripheral, the clock
//! source, credential storage) belongs to the host.
use std::{fmt::Display, io, ops::Not};

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum Level {
    #[default]
    Low,
    High,
}

impl Level {
    pub fn is_high(self) -> bool {
        self == Level::High
    }

    pub fn is_low(self) -> bool {
        self == Level::Low
    }
}

impl From<bool> for Level {
    fn from(value: bool) -> Self {
        if value { Level::High } else { Level::Low }
    }
}

impl From<Level> for bool {
    fn from(value: Level) -> Self {
        value.is_high()
    }
}

impl Not for Level {
    type Output = Level;

    fn not(self) -> Level {
        match self {
            Level::Low => Level::High,
            Level::High => Level::Low,
        }
    }
}

impl Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(if self.is_high() { "1" } else { "0" })
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PinMode {
    /// High impedance. The pin neither drives nor loads the line.
    Input,
    Output,
}

/// A single GPIO line.
pub trait DigitalPin {
    fn set_mode(&mut self, mode: PinMode) -> io::Result<()>;

    /// Drives the line. Has no effect on the wire while the pin is an input.
    fn write(&mut self, level: Level);

    fn read(&self) -> Level;
}

/// The UART whose two pins are shared with the host console.
pub trait SerialPort {
    /// Routes the pins to the UART and opens it at `baud`.
    fn begin(&mut self, baud: u32) -> io::Result<()>;

    /// Closes the UART and tri-states its pins.
    fn end(&mut self);

    /// Reads whatever is pending without blocking. `Ok(0)` means nothing was pending.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Writes as much of `data` as the transmitter takes without waiting. `Ok(0)`
    /// means it is full.
    fn write(&mut self, data: &[u8]) -> io::Result<usize>;

    /// Waits for queued output to go out on the wire.
    fn flush(&mut self) -> io::Result<()>;
}

/// Clock, delays and restart.
pub trait System {
    /// Milliseconds since start. Wraps around at `u32::MAX`, so compare with
    /// `wrapping_sub`.
    fn millis(&self) -> u32;

    fn delay_ms(&mut self, ms: u32);

    /// Restarts the bridge. Pending network writes are abandoned.
    fn reboot(&mut self) -> !;
}

/// Network credential storage and association.
pub trait Provisioning {
    /// Joins the network with the stored credentials, provisioning them first if
    /// there are none. Returns `false` if no connection could be made.
    fn try_connect(&mut self) -> bool;

    /// Forgets the stored credentials.
    fn reset_credentials(&mut self);
}
