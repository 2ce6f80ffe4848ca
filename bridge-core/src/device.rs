//! The bridge as a whole: owns every service and runs them in turn.
use bridge_protocol::command::{Opcode, PING_PATTERN, Request, Response};

use crate::{
    XvcBackend,
    board::{Board, BoardPins},
    command::CommandService,
    config::Config,
    error::BridgeError,
    hal::{DigitalPin, Provisioning, SerialPort, System},
    net::Network,
    serial::SerialBridge,
    xvc::XvcService,
};

/// Settle time between forgetting credentials and rebooting.
const CREDENTIAL_RESET_SETTLE_MS: u32 = 1000;

pub struct Device<N, B, U, P, S>
where
    N: Network,
    B: XvcBackend,
    U: SerialPort,
    P: DigitalPin,
    S: System + Provisioning,
{
    config: Config,
    network: N,
    system: S,
    board: Board<P>,
    xvc: XvcService<N::Listener, B>,
    serial: SerialBridge<N::Listener, U>,
    command: CommandService<N::Listener>,
    verbose: bool,
}

impl<N, B, U, P, S> Device<N, B, U, P, S>
where
    N: Network,
    B: XvcBackend,
    U: SerialPort,
    P: DigitalPin,
    S: System + Provisioning,
{
    /// Assembles the bridge. The JTAG and UART pins are tri-stated right away; the
    /// board pins are left alone until [`Device::start`].
    pub fn new(
        config: Config,
        network: N,
        system: S,
        board_pins: BoardPins<P>,
        jtag: B,
        uart: U,
    ) -> Self {
        let board = Board::new(board_pins, &config);
        let xvc = XvcService::new(jtag, config.xvc_port, config.max_vector_size);
        let serial = SerialBridge::new(
            uart,
            config.serial_port,
            config.serial_baud,
            config.serial_buffer_size,
        );
        Device {
            config,
            network,
            system,
            board,
            xvc,
            serial,
            command: CommandService::new(),
            verbose: false,
        }
    }

    /// Holds the board in reset, joins the network and opens the command port.
    ///
    /// Reboots if the network cannot be joined.
    pub fn start(&mut self) -> Result<(), BridgeError> {
        self.board.init()?;
        self.xvc.stop();
        self.serial.stop();

        if !self.system.try_connect() {
            log::error!(
                "Could not connect to the network, rebooting in {} ms",
                self.config.provisioning_retry_ms
            );
            self.system.delay_ms(self.config.provisioning_retry_ms);
            self.reboot();
        }

        self.command.open(&mut self.network, self.config.command_port)?;
        log::info!("Ports:");
        log::info!("  command: {}", self.config.command_port);
        log::info!("  serial:  {} (disabled)", self.config.serial_port);
        log::info!("  xvc:     {} (disabled)", self.config.xvc_port);
        self.board.release_reset();
        Ok(())
    }

    /// One pass of the scheduler: button, serial bridge, XVC, then the command port.
    /// Never blocks on I/O.
    pub fn tick(&mut self) {
        self.board.poll_button(&mut self.system);
        self.serial.tick();
        self.xvc.tick(self.verbose);
        if let Some(request) = self.command.poll(self.verbose) {
            let response = self.execute(request);
            self.command.respond(&response);
        }
    }

    /// Runs a decoded request. Opcodes 7 and 10 reboot and never return.
    pub fn execute(&mut self, request: Request) -> Response {
        log::debug!("Executing {}", request.opcode);
        let value = match request.opcode {
            Opcode::SetBootMode => self.board.set_boot_mode(request.flag()) as u32,
            Opcode::GetBootMode => self.board.boot_mode() as u32,
            Opcode::ResetBoard => {
                self.board.pulse_reset(&mut self.system);
                1
            }
            Opcode::SetXvcRunning => self.set_xvc_running(request.flag()) as u32,
            Opcode::GetXvcRunning => self.xvc.is_running() as u32,
            Opcode::SetSerialRunning => self.set_serial_running(request.flag()) as u32,
            Opcode::GetSerialRunning => self.serial.is_running() as u32,
            Opcode::ReconfigureNetwork => {
                log::warn!("Forgetting network credentials");
                self.system.reset_credentials();
                self.system.delay_ms(CREDENTIAL_RESET_SETTLE_MS);
                self.reboot()
            }
            Opcode::SetVerbose => {
                self.verbose = request.flag();
                log::info!("Verbose logging {}", if self.verbose { "on" } else { "off" });
                self.verbose as u32
            }
            Opcode::GetVerbose => self.verbose as u32,
            Opcode::Reboot => self.reboot(),
            Opcode::Ping => PING_PATTERN,
        };
        Response::status(request.opcode, value)
    }

    fn set_xvc_running(&mut self, enable: bool) -> bool {
        if !enable {
            self.xvc.stop();
        } else if let Err(err) = self.xvc.start(&mut self.network) {
            log::error!("Could not start XVC service: {}", err);
        }
        self.xvc.is_running()
    }

    fn set_serial_running(&mut self, enable: bool) -> bool {
        if !enable {
            self.serial.stop();
        } else if let Err(err) = self.serial.start(&mut self.network) {
            log::error!("Could not start serial bridge: {}", err);
        }
        self.serial.is_running()
    }

    fn reboot(&mut self) -> ! {
        log::warn!("Rebooting");
        self.system.reboot()
    }

    /// Stops both services and tri-states their pins. The command port stays open.
    pub fn shutdown(&mut self) {
        self.xvc.stop();
        self.serial.stop();
    }

    pub fn boot_mode(&self) -> bool {
        self.board.boot_mode()
    }

    pub fn verbose(&self) -> bool {
        self.verbose
    }

    pub fn xvc(&self) -> &XvcService<N::Listener, B> {
        &self.xvc
    }

    pub fn serial(&self) -> &SerialBridge<N::Listener, U> {
        &self.serial
    }

    pub fn command_port(&self) -> Option<u16> {
        self.command.local_port()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}
