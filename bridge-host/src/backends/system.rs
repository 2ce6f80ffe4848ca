//! Clock, restart and network credentials of a Linux host.
//!
//! A reboot re-executes the running binary with the same arguments. Credentials
//! live in a file; the bridge refuses to come up while the file is missing, which
//! is how forgetting them sends the bridge back to provisioning.
use std::{
    ffi::CString,
    fs, io,
    net::{IpAddr, UdpSocket},
    os::unix::ffi::OsStrExt,
    path::PathBuf,
    process, thread,
    time::{Duration, Instant},
};

use bridge_core::hal::{Provisioning, System};
use nix::unistd::execv;

#[derive(Debug)]
pub struct HostSystem {
    start: Instant,
    ip: IpAddr,
    credentials: Option<PathBuf>,
}

impl HostSystem {
    pub fn new(ip: IpAddr, credentials: Option<PathBuf>) -> HostSystem {
        HostSystem {
            start: Instant::now(),
            ip,
            credentials,
        }
    }
}

fn c_string(bytes: &[u8]) -> io::Result<CString> {
    CString::new(bytes).map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))
}

fn reexec() -> io::Result<()> {
    let exe = std::env::current_exe()?;
    let path = c_string(exe.as_os_str().as_bytes())?;
    let args = std::env::args_os()
        .map(|arg| c_string(arg.as_bytes()))
        .collect::<io::Result<Vec<_>>>()?;
    log::info!("Re-executing {}", exe.display());
    execv(&path, &args)?;
    Ok(())
}

impl System for HostSystem {
    fn millis(&self) -> u32 {
        // truncation is the wraparound
        self.start.elapsed().as_millis() as u32
    }

    fn delay_ms(&mut self, ms: u32) {
        thread::sleep(Duration::from_millis(ms.into()));
    }

    fn reboot(&mut self) -> ! {
        if let Err(err) = reexec() {
            log::error!("Could not restart: {}", err);
        }
        process::exit(1)
    }
}

impl Provisioning for HostSystem {
    fn try_connect(&mut self) -> bool {
        if let Some(path) = &self.credentials {
            match fs::read_to_string(path) {
                Ok(content) if !content.trim().is_empty() => {
                    log::debug!("Using network credentials from {}", path.display());
                }
                Ok(_) | Err(_) => {
                    log::error!("No network credentials in {}", path.display());
                    return false;
                }
            }
        }
        match UdpSocket::bind((self.ip, 0)) {
            Ok(_) => true,
            Err(err) => {
                log::error!("Address {} is not available: {}", self.ip, err);
                false
            }
        }
    }

    fn reset_credentials(&mut self) {
        let Some(path) = &self.credentials else {
            log::warn!("No credential file configured, nothing to forget");
            return;
        };
        match fs::remove_file(path) {
            Ok(()) => log::info!("Removed {}", path.display()),
            Err(err) => log::error!("Could not remove {}: {}", path.display(), err),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn clock_moves_with_delays() {
        let mut system = HostSystem::new(Ipv4Addr::LOCALHOST.into(), None);
        let before = system.millis();
        system.delay_ms(5);
        assert!(system.millis().wrapping_sub(before) >= 5);
    }

    #[test]
    fn credentials_gate_connecting() {
        let path = std::env::temp_dir().join(format!("bridge-host-creds-{}", process::id()));
        let mut system = HostSystem::new(Ipv4Addr::LOCALHOST.into(), Some(path.clone()));
        assert!(!system.try_connect());
        fs::write(&path, "lab-network\n").unwrap();
        assert!(system.try_connect());
        system.reset_credentials();
        assert!(!path.exists());
        assert!(!system.try_connect());
    }

    #[test]
    fn unassigned_address_fails() {
        // TEST-NET-1, never assigned to a local interface
        let mut system = HostSystem::new(Ipv4Addr::new(192, 0, 2, 1).into(), None);
        assert!(!system.try_connect());
    }
}
