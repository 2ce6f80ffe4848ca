//! A bridge on real loopback sockets with a simulated board behind it.
//!
//! The JTAG chain is a single wire from TDI back to TDO, so every shift returns
//! its TDI vector.
use std::{
    net::{Ipv4Addr, TcpListener},
    thread,
    time::Duration,
};

use bridge_core::{
    board::BoardPins,
    config::{Builder, Config},
    device::Device,
    hal::Level,
    jtag::{JtagLink, JtagPins},
    net::TcpNetwork,
    sim::{SimLine, SimPin, SimSerial, SimSystem},
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A port nothing listens on right now.
pub fn free_port() -> u16 {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    listener.local_addr().unwrap().port()
}

pub struct Bridge {
    pub config: Config,
    pub uart: SimSerial,
    pub system: SimSystem,
    pub reset: SimLine,
    pub boot_mode: SimLine,
    pub button: SimLine,
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl Bridge {
    /// Starts a bridge on free loopback ports and runs its scheduler on a blocking
    /// task. Must be called from within a multi-threaded tokio runtime.
    pub fn spawn() -> Bridge {
        Bridge::spawn_with(Builder::new())
    }

    /// Like [`Bridge::spawn`], with ports, hold cycles and write timeout replaced.
    pub fn spawn_with(builder: Builder) -> Bridge {
        let config = builder
            .command_port(free_port())
            .xvc_port(free_port())
            .serial_port(free_port())
            .jtag_hold_cycles(0)
            .write_timeout(Duration::from_secs(5))
            .build();

        let tdi = SimLine::new();
        let jtag = JtagLink::new(
            JtagPins {
                tck: SimPin::new(&SimLine::new()),
                tdo: SimPin::new(&tdi),
                tdi: SimPin::new(&tdi),
                tms: SimPin::new(&SimLine::new()),
            },
            config.jtag_hold_cycles,
        );
        let reset = SimLine::new();
        let boot_mode = SimLine::new();
        let button = SimLine::new();
        button.set(Level::High);
        let pins = BoardPins {
            reset: SimPin::new(&reset),
            boot_mode: SimPin::new(&boot_mode),
            boot_button: SimPin::new(&button),
        };
        let uart = SimSerial::new();
        let system = SimSystem::new();

        let mut device = Device::new(
            config.clone(),
            TcpNetwork::new(Ipv4Addr::LOCALHOST.into(), config.write_timeout),
            system.clone(),
            pins,
            jtag,
            uart.clone(),
        );
        device.start().unwrap();

        let token = CancellationToken::new();
        let task = tokio::task::spawn_blocking({
            let token = token.clone();
            move || {
                while !token.is_cancelled() {
                    device.tick();
                    thread::sleep(Duration::from_micros(50));
                }
                device.shutdown();
            }
        });

        Bridge {
            config,
            uart,
            system,
            reset,
            boot_mode,
            button,
            token,
            task,
        }
    }

    pub fn command_addr(&self) -> (Ipv4Addr, u16) {
        (Ipv4Addr::LOCALHOST, self.config.command_port)
    }

    pub fn xvc_addr(&self) -> (Ipv4Addr, u16) {
        (Ipv4Addr::LOCALHOST, self.config.xvc_port)
    }

    pub fn serial_addr(&self) -> (Ipv4Addr, u16) {
        (Ipv4Addr::LOCALHOST, self.config.serial_port)
    }

    /// Stops the scheduler and waits for it to release its services.
    pub async fn stop(self) {
        self.token.cancel();
        self.task.await.unwrap();
    }

    /// Waits for the scheduler to end on a reboot request.
    pub async fn rebooted(self) -> bool {
        match tokio::time::timeout(Duration::from_secs(5), self.task).await {
            Ok(Err(err)) => err.is_panic(),
            _ => false,
        }
    }
}

/// Runs blocking client code off the async runtime.
pub async fn blocking<T, F>(f: F) -> T
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.unwrap()
}
