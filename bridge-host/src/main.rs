//! # XVC-Serial Bridge for Linux Hosts
//!
//! Runs the bridge on a Linux board whose GPIOs are wired to the target: four JTAG
//! lines, the target's reset and boot-mode lines, a boot-mode push button and a
//! UART.
//!
//! ## Overview
//!
//! Pins are driven through sysfs GPIO ([`backends::gpio`]), the UART is a tty in raw
//! mode ([`backends::uart`]) and a reboot re-executes the binary
//! ([`backends::system`]). The device loop runs on a blocking task until Ctrl-C.
pub mod backends;

use std::error::Error;
use std::net::IpAddr;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use bridge_core::{
    board::BoardPins,
    config::{
        Builder, DEFAULT_COMMAND_PORT, DEFAULT_SERIAL_BAUD, DEFAULT_SERIAL_PORT, DEFAULT_XVC_PORT,
    },
    device::Device,
    jtag::{DEFAULT_HOLD_CYCLES, JtagLink, JtagPins},
    net::TcpNetwork,
};
use bridge_protocol::DEFAULT_MAX_VECTOR_LEN;
use clap::Parser;
use clap_num::number_range;
use env_logger::Env;
use tokio_util::sync::CancellationToken;

use crate::backends::{
    gpio::{SYSFS_GPIO_ROOT, SysfsPin},
    system::HostSystem,
    uart::TtyUart,
};

fn vector_size(s: &str) -> Result<u32, String> {
    number_range(s, 1, 1 << 20)
}

#[derive(Parser)]
#[command(about = "XVC, serial and board-control bridge for Linux GPIO hosts", long_about=None)]
struct Args {
    #[arg(short, long, default_value = "0.0.0.0")]
    ip: IpAddr,

    #[arg(long, default_value_t = DEFAULT_COMMAND_PORT)]
    command_port: u16,

    #[arg(long, default_value_t = DEFAULT_XVC_PORT)]
    xvc_port: u16,

    #[arg(long, default_value_t = DEFAULT_SERIAL_PORT)]
    serial_port: u16,

    #[arg(short, long, help = "Serial device wired to the target", default_value = "/dev/ttyS1")]
    tty: PathBuf,

    #[arg(short, long, default_value_t = DEFAULT_SERIAL_BAUD)]
    baud: u32,

    #[arg(
        long,
        help = "Largest XVC vector accepted, in bytes",
        value_parser = vector_size,
        default_value_t = DEFAULT_MAX_VECTOR_LEN
    )]
    max_vector_size: u32,

    #[arg(long, help = "Busy-wait iterations per JTAG clock phase", default_value_t = DEFAULT_HOLD_CYCLES)]
    hold_cycles: u32,

    #[arg(long, default_value = SYSFS_GPIO_ROOT)]
    gpio_root: PathBuf,

    #[arg(long)]
    tck: u32,
    #[arg(long)]
    tdo: u32,
    #[arg(long)]
    tdi: u32,
    #[arg(long)]
    tms: u32,
    #[arg(long)]
    reset: u32,
    #[arg(long)]
    boot_mode: u32,
    #[arg(long)]
    boot_button: u32,

    #[arg(long, help = "Start with the boot-mode line low")]
    boot_mode_low: bool,

    #[arg(long, help = "File holding the network credentials. Removed by reconfig-wifi")]
    credentials: Option<PathBuf>,

    #[arg(long, help = "Sleep between scheduler passes, in microseconds", default_value = "100")]
    idle_us: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    log::info!("Starting XVC-serial bridge");

    let args = Args::parse();

    let config = Builder::new()
        .command_port(args.command_port)
        .xvc_port(args.xvc_port)
        .serial_port(args.serial_port)
        .serial_baud(args.baud)
        .max_vector_size(args.max_vector_size)
        .jtag_hold_cycles(args.hold_cycles)
        .initial_boot_mode(!args.boot_mode_low)
        .build();
    log::debug!(
        "Bridge config: max_vector_size={}, hold_cycles={}",
        config.max_vector_size,
        config.jtag_hold_cycles
    );

    let pin = |number: u32| SysfsPin::new(&args.gpio_root, number);
    let jtag = JtagLink::new(
        JtagPins {
            tck: pin(args.tck)?,
            tdo: pin(args.tdo)?,
            tdi: pin(args.tdi)?,
            tms: pin(args.tms)?,
        },
        config.jtag_hold_cycles,
    );
    let board = BoardPins {
        reset: pin(args.reset)?,
        boot_mode: pin(args.boot_mode)?,
        boot_button: pin(args.boot_button)?,
    };
    let network = TcpNetwork::new(args.ip, config.write_timeout);
    let system = HostSystem::new(args.ip, args.credentials.clone());

    let mut device = Device::new(
        config,
        network,
        system,
        board,
        jtag,
        TtyUart::new(&args.tty),
    );
    device.start()?;

    let token = CancellationToken::new();
    let idle = Duration::from_micros(args.idle_us);
    let run = tokio::task::spawn_blocking({
        let token = token.clone();
        move || {
            while !token.is_cancelled() {
                device.tick();
                if !idle.is_zero() {
                    thread::sleep(idle);
                }
            }
            device.shutdown();
        }
    });

    tokio::signal::ctrl_c().await?;
    log::info!("Shutting down");
    token.cancel();
    run.await?;
    Ok(())
}
