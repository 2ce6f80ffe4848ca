use std::time::Duration;

use bridge_protocol::DEFAULT_MAX_VECTOR_LEN;

use crate::jtag::DEFAULT_HOLD_CYCLES;

pub const DEFAULT_COMMAND_PORT: u16 = 42069;
pub const DEFAULT_XVC_PORT: u16 = 2542;
pub const DEFAULT_SERIAL_PORT: u16 = 2222;
pub const DEFAULT_SERIAL_BAUD: u32 = 115_200;

#[derive(Debug, Clone)]
pub struct Config {
    pub command_port: u16,
    pub xvc_port: u16,
    pub serial_port: u16,
    pub serial_baud: u32,
    /// Bytes moved in each direction per serial bridge tick.
    pub serial_buffer_size: usize,
    /// XVC shift capacity in bytes per vector, advertised by `getinfo:`.
    pub max_vector_size: u32,
    pub jtag_hold_cycles: u32,
    pub debounce_ms: u32,
    pub button_lockout_ms: u32,
    pub reset_pulse_ms: u32,
    /// Boot mode driven at power-on.
    pub initial_boot_mode: bool,
    /// Wait before rebooting when the network cannot be joined at startup.
    pub provisioning_retry_ms: u32,
    /// How long a client may leave output untaken before it is dropped.
    pub write_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            command_port: DEFAULT_COMMAND_PORT,
            xvc_port: DEFAULT_XVC_PORT,
            serial_port: DEFAULT_SERIAL_PORT,
            serial_baud: DEFAULT_SERIAL_BAUD,
            serial_buffer_size: 64,
            max_vector_size: DEFAULT_MAX_VECTOR_LEN,
            jtag_hold_cycles: DEFAULT_HOLD_CYCLES,
            debounce_ms: 5,
            button_lockout_ms: 750,
            reset_pulse_ms: 5,
            initial_boot_mode: true,
            provisioning_retry_ms: 500,
            write_timeout: Duration::from_secs(30),
        }
    }
}

/// Builder to create a [Config] and modify its options
///
/// # Example
///
/// ```
/// use bridge_core::config::Builder;
///
/// let config = Builder::new()
///     .command_port(4000)
///     .max_vector_size(1024)
///     .build();
/// assert_eq!(config.xvc_port, 2542);
/// ```
#[derive(Default)]
pub struct Builder {
    config: Config,
}

impl Builder {
    pub fn new() -> Builder {
        Builder::default()
    }

    pub fn command_port(mut self, port: u16) -> Self {
        self.config.command_port = port;
        self
    }

    pub fn xvc_port(mut self, port: u16) -> Self {
        self.config.xvc_port = port;
        self
    }

    pub fn serial_port(mut self, port: u16) -> Self {
        self.config.serial_port = port;
        self
    }

    pub fn serial_baud(mut self, baud: u32) -> Self {
        self.config.serial_baud = baud;
        self
    }

    /// Set the highest vector size, in bytes, that the XVC service accepts.
    pub fn max_vector_size(mut self, size: u32) -> Self {
        self.config.max_vector_size = size;
        self
    }

    pub fn jtag_hold_cycles(mut self, cycles: u32) -> Self {
        self.config.jtag_hold_cycles = cycles;
        self
    }

    /// Set the shortest time between two boot-mode toggles by the button.
    pub fn button_lockout_ms(mut self, ms: u32) -> Self {
        self.config.button_lockout_ms = ms;
        self
    }

    pub fn initial_boot_mode(mut self, mode: bool) -> Self {
        self.config.initial_boot_mode = mode;
        self
    }

    /// Set how long a TCP client may stall output before it is disconnected
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.config.write_timeout = timeout;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
