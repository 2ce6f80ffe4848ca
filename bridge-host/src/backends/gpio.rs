//! # Sysfs GPIO Backend
//!
//! Pins exported through `/sys/class/gpio`.
//!
//! ## Example Usage
//!
//! ```ignore
//! let mut tck = SysfsPin::new("/sys/class/gpio", 17)?;
//! tck.set_mode(PinMode::Output)?;
//! tck.write(Level::High);
//! ```
use std::{
    fs, io,
    path::{Path, PathBuf},
    thread,
    time::Duration,
};

use bridge_core::hal::{DigitalPin, Level, PinMode};

/// Default location of the sysfs GPIO class.
pub const SYSFS_GPIO_ROOT: &str = "/sys/class/gpio";

#[derive(Debug)]
pub struct SysfsPin {
    number: u32,
    direction: PathBuf,
    value: PathBuf,
}

impl SysfsPin {
    /// Exports the pin if needed. The pin keeps whatever direction it had.
    pub fn new(root: impl AsRef<Path>, number: u32) -> io::Result<SysfsPin> {
        let root = root.as_ref();
        let dir = root.join(format!("gpio{}", number));
        if !dir.exists() {
            log::debug!("Exporting GPIO {}", number);
            fs::write(root.join("export"), number.to_string())?;
            // udev needs a moment to hand out the attribute files
            for _ in 0..50 {
                if dir.join("direction").exists() {
                    break;
                }
                thread::sleep(Duration::from_millis(2));
            }
        }
        Ok(SysfsPin {
            number,
            direction: dir.join("direction"),
            value: dir.join("value"),
        })
    }
}

impl DigitalPin for SysfsPin {
    fn set_mode(&mut self, mode: PinMode) -> io::Result<()> {
        let direction = match mode {
            PinMode::Input => "in",
            PinMode::Output => "out",
        };
        fs::write(&self.direction, direction)
    }

    fn write(&mut self, level: Level) {
        if let Err(err) = fs::write(&self.value, level.to_string()) {
            log::error!("Could not write GPIO {}: {}", self.number, err);
        }
    }

    fn read(&self) -> Level {
        match fs::read(&self.value) {
            Ok(value) => (value.first() == Some(&b'1')).into(),
            Err(err) => {
                log::error!("Could not read GPIO {}: {}", self.number, err);
                Level::Low
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    /// A directory that looks like an exported sysfs pin.
    fn fake_root(name: &str) -> PathBuf {
        let root = std::env::temp_dir().join(format!("bridge-host-gpio-{}-{}", name, std::process::id()));
        let pin = root.join("gpio5");
        fs::create_dir_all(&pin).unwrap();
        fs::write(pin.join("direction"), "in").unwrap();
        fs::write(pin.join("value"), "0\n").unwrap();
        root
    }

    #[test]
    fn drives_sysfs_files() {
        let root = fake_root("drive");
        let mut pin = SysfsPin::new(&root, 5).unwrap();
        pin.set_mode(PinMode::Output).unwrap();
        assert_eq!(fs::read_to_string(root.join("gpio5/direction")).unwrap(), "out");
        pin.write(Level::High);
        assert_eq!(pin.read(), Level::High);
        pin.write(Level::Low);
        assert_eq!(pin.read(), Level::Low);
        fs::remove_dir_all(root).unwrap();
    }

    #[test]
    fn exports_missing_pin() {
        let root = fake_root("export");
        // nothing creates gpio6 here, so only the export request is observable
        SysfsPin::new(&root, 6).unwrap();
        assert_eq!(fs::read_to_string(root.join("export")).unwrap(), "6");
        fs::remove_dir_all(root).unwrap();
    }
}
