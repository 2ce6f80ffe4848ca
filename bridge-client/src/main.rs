//! # bridge-ctl
//!
//! Command line front end of the bridge's command port.
use std::error::Error;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use bridge_client::{CommandClient, DEFAULT_TIMEOUT};
use bridge_protocol::error::ReadError;
use clap::{Parser, Subcommand};
use env_logger::Env;

#[derive(Subcommand, Eq, PartialEq, Clone, Copy, Debug, Default)]
enum Switch {
    /// Print whether it is on
    #[default]
    Status,
    On,
    Off,
}

#[derive(Subcommand, Eq, PartialEq, Clone, Copy, Debug, Default)]
enum BootModeAction {
    #[default]
    Get,
    Set {
        #[arg(value_parser = clap::value_parser!(u8).range(0..=1))]
        mode: u8,
    },
    Toggle,
}

#[derive(Subcommand, Eq, PartialEq, Clone, Copy, Debug)]
enum Action {
    /// Read or drive the target's boot-mode line
    BootMode {
        #[clap(subcommand)]
        action: Option<BootModeAction>,
    },
    /// Pulse the target's reset line
    Reset,
    /// The XVC (JTAG) service
    Xvc {
        #[clap(subcommand)]
        switch: Option<Switch>,
    },
    /// The serial bridge
    Serial {
        #[clap(subcommand)]
        switch: Option<Switch>,
    },
    /// Verbose logging on the bridge
    Log {
        #[clap(subcommand)]
        switch: Option<Switch>,
    },
    /// Forget the network credentials and reboot into provisioning
    ReconfigWifi,
    /// Reboot the bridge
    Reboot,
    /// Check that the bridge answers
    Ping,
}

#[derive(Parser)]
#[command(about = "Control an XVC-serial bridge over its command port", long_about=None)]
struct Args {
    #[arg(short, long, default_value = "42069")]
    port: u16,

    #[arg(short, long)]
    ip: IpAddr,

    #[arg(
        short,
        long,
        help = "Seconds to wait for a response",
        default_value_t = DEFAULT_TIMEOUT.as_secs()
    )]
    timeout: u64,

    #[clap(subcommand)]
    action: Action,
}

fn on_off(value: bool) -> &'static str {
    if value { "on" } else { "off" }
}

fn switch(
    client: &mut CommandClient,
    name: &str,
    switch: Switch,
    get: fn(&mut CommandClient) -> Result<bool, ReadError>,
    set: fn(&mut CommandClient, bool) -> Result<bool, ReadError>,
) -> Result<(), Box<dyn Error>> {
    let state = match switch {
        Switch::Status => get(client)?,
        Switch::On => set(client, true)?,
        Switch::Off => set(client, false)?,
    };
    println!("{}: {}", name, on_off(state));
    if switch == Switch::On && !state {
        return Err(format!("{} could not be started", name).into());
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let addr = SocketAddr::new(args.ip, args.port);
    log::debug!("Connecting to {}", addr);
    let mut client = CommandClient::connect(addr)?;
    client.set_timeout(Duration::from_secs(args.timeout))?;

    match args.action {
        Action::BootMode { action } => {
            let mode = match action.unwrap_or_default() {
                BootModeAction::Get => client.boot_mode()?,
                BootModeAction::Set { mode } => client.set_boot_mode(mode != 0)?,
                BootModeAction::Toggle => {
                    let mode = client.boot_mode()?;
                    client.set_boot_mode(!mode)?
                }
            };
            println!("boot mode: {}", mode as u8);
        }
        Action::Reset => {
            client.reset_board()?;
            println!("board reset");
        }
        Action::Xvc { switch: s } => switch(
            &mut client,
            "xvc",
            s.unwrap_or_default(),
            CommandClient::xvc_running,
            CommandClient::set_xvc_running,
        )?,
        Action::Serial { switch: s } => switch(
            &mut client,
            "serial",
            s.unwrap_or_default(),
            CommandClient::serial_running,
            CommandClient::set_serial_running,
        )?,
        Action::Log { switch: s } => switch(
            &mut client,
            "verbose log",
            s.unwrap_or_default(),
            CommandClient::verbose,
            CommandClient::set_verbose,
        )?,
        Action::ReconfigWifi => {
            client.reconfigure_network()?;
            println!("bridge is rebooting into provisioning");
        }
        Action::Reboot => {
            client.reboot()?;
            println!("bridge is rebooting");
        }
        Action::Ping => {
            if !client.ping()? {
                return Err("bridge answered with an unexpected pattern".into());
            }
            println!("pong from {}", addr);
        }
    }
    Ok(())
}
