//! # Bridge Core Library
//!
//! The logic of a small network bridge that sits next to a target board and exposes
//! three TCP services:
//!
//! - **XVC** (default port 2542): Xilinx Virtual Cable 1.0, shifted out over four
//!   bit-banged GPIO lines ([`jtag::JtagLink`]).
//! - **Serial bridge** (default port 2222): raw bytes between one TCP client and the
//!   target's UART ([`serial::SerialBridge`]).
//! - **Command** (default port 42069): a framed protocol that drives the target's reset
//!   and boot-mode lines and starts or stops the other two services
//!   ([`command::CommandService`]).
//!
//! A push button on the bridge toggles the boot-mode line as well ([`board::Board`]).
//!
//! ## Architecture
//!
//! Nothing here blocks or spawns threads. [`device::Device::tick`] polls the button and
//! gives each service one short, non-blocking turn; the host calls it in a loop. A
//! partially received XVC or command frame simply waits in its decoder until more
//! bytes arrive on a later tick.
//!
//! The platform is reached through traits only:
//!
//! - [`hal::DigitalPin`], [`hal::SerialPort`], [`hal::System`] and
//!   [`hal::Provisioning`] for pins, the UART, the clock and network credentials
//! - [`net::Network`] for listening sockets, with [`net::TcpNetwork`] on top of std
//! - [`XvcBackend`] for whatever executes JTAG shifts
//!
//! [`sim`] implements all of them in memory, which is what the tests run against.
//!
//! ## Basic Usage
//!
//! ```ignore
//! use bridge_core::{config::Config, device::Device};
//!
//! let mut device = Device::new(Config::default(), network, system, board_pins, jtag, uart);
//! device.start()?;
//! loop {
//!     device.tick();
//! }
//! ```
//!
//! ## Logging
//!
//! This crate uses the `log` crate. Connections, service state changes and button
//! toggles are logged at `info`. Individual XVC messages are logged at `debug`, or
//! at `info` while the verbose flag (command opcode 8) is set.
pub mod board;
pub mod command;
pub mod config;
pub mod device;
pub mod error;
pub mod hal;
pub mod jtag;
pub mod net;
pub mod serial;
pub mod sim;
pub mod xvc;

use error::BridgeError;

/// What the XVC service hands decoded requests to.
///
/// [`jtag::JtagLink`] is the bit-banged implementation.
pub trait XvcBackend {
    /// Takes control of the JTAG lines.
    fn activate(&mut self) -> Result<(), BridgeError>;

    /// Releases the JTAG lines (high impedance).
    fn deactivate(&mut self);

    /// Set the TCK period. Returns the period actually in effect, which is sent
    /// back to the client.
    fn set_tck(&mut self, period_ns: u32) -> u32;

    /// Shift `num_bits` bits. `vectors` holds `num_bytes` bytes of TMS followed by
    /// `num_bytes` bytes of TDI; on return the first `num_bytes` bytes hold TDO.
    ///
    /// XVC has no way to report a failed shift, so this cannot fail.
    fn shift(&mut self, num_bits: u32, num_bytes: usize, vectors: &mut [u8]);
}
