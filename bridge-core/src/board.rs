//! Target board lines: reset, boot mode and the boot-mode push button.
use crate::{
    config::Config,
    error::BridgeError,
    hal::{DigitalPin, Level, PinMode, System},
};

#[derive(Debug)]
pub struct BoardPins<P> {
    /// Active low.
    pub reset: P,
    pub boot_mode: P,
    /// Active low, externally pulled up.
    pub boot_button: P,
}

/// Whether `now` is still within `lockout_ms` of `last`, across counter wraparound.
pub fn within_lockout(now: u32, last: u32, lockout_ms: u32) -> bool {
    now.wrapping_sub(last) <= lockout_ms
}

#[derive(Debug)]
pub struct Board<P: DigitalPin> {
    pins: BoardPins<P>,
    boot_mode: bool,
    last_toggle: Option<u32>,
    debounce_ms: u32,
    lockout_ms: u32,
    reset_pulse_ms: u32,
}

impl<P: DigitalPin> Board<P> {
    pub fn new(pins: BoardPins<P>, config: &Config) -> Board<P> {
        Board {
            pins,
            boot_mode: config.initial_boot_mode,
            last_toggle: None,
            debounce_ms: config.debounce_ms,
            lockout_ms: config.button_lockout_ms,
            reset_pulse_ms: config.reset_pulse_ms,
        }
    }

    /// Configures the pins. The board is left held in reset with the boot-mode
    /// line at its initial level.
    pub fn init(&mut self) -> Result<(), BridgeError> {
        self.pins
            .reset
            .set_mode(PinMode::Output)
            .map_err(|source| BridgeError::Pin {
                role: "reset",
                source,
            })?;
        self.pins.reset.write(Level::Low);
        self.pins
            .boot_mode
            .set_mode(PinMode::Output)
            .map_err(|source| BridgeError::Pin {
                role: "boot mode",
                source,
            })?;
        self.pins.boot_mode.write(self.boot_mode.into());
        self.pins
            .boot_button
            .set_mode(PinMode::Input)
            .map_err(|source| BridgeError::Pin {
                role: "boot button",
                source,
            })?;
        Ok(())
    }

    pub fn release_reset(&mut self) {
        self.pins.reset.write(Level::High);
    }

    pub fn boot_mode(&self) -> bool {
        self.boot_mode
    }

    pub fn set_boot_mode(&mut self, mode: bool) -> bool {
        self.boot_mode = mode;
        self.pins.boot_mode.write(mode.into());
        log::info!("Boot mode set to {}", Level::from(mode));
        mode
    }

    /// Drives reset low for the configured pulse width, then releases it.
    pub fn pulse_reset(&mut self, system: &mut impl System) {
        log::info!("Resetting target board");
        self.pins.reset.write(Level::Low);
        system.delay_ms(self.reset_pulse_ms);
        self.pins.reset.write(Level::High);
    }

    /// Toggles the boot mode if the button is held down past the debounce delay and
    /// the last toggle is older than the lockout. Returns whether it toggled.
    ///
    /// Blocks for the debounce delay whenever the button reads pressed.
    pub fn poll_button(&mut self, system: &mut impl System) -> bool {
        if self.pins.boot_button.read().is_high() {
            return false;
        }
        system.delay_ms(self.debounce_ms);
        if self.pins.boot_button.read().is_high() {
            return false;
        }
        let now = system.millis();
        if self
            .last_toggle
            .is_some_and(|last| within_lockout(now, last, self.lockout_ms))
        {
            return false;
        }
        self.last_toggle = Some(now);
        log::info!("Boot button pressed");
        self.set_boot_mode(!self.boot_mode);
        true
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::sim::{SimLine, SimPin, SimSystem};

    struct Harness {
        board: Board<SimPin>,
        system: SimSystem,
        reset: SimLine,
        boot_mode: SimLine,
        button: SimLine,
    }

    fn board() -> Harness {
        let reset = SimLine::new();
        let boot_mode = SimLine::new();
        let button = SimLine::new();
        button.set(Level::High);
        let pins = BoardPins {
            reset: SimPin::new(&reset),
            boot_mode: SimPin::new(&boot_mode),
            boot_button: SimPin::new(&button),
        };
        let mut board = Board::new(pins, &Config::default());
        board.init().unwrap();
        Harness {
            board,
            system: SimSystem::new(),
            reset,
            boot_mode,
            button,
        }
    }

    #[test]
    fn init_holds_reset() {
        let h = board();
        assert_eq!(h.reset.level(), Level::Low);
        assert_eq!(h.boot_mode.level(), Level::High);
        assert!(h.board.boot_mode());
    }

    #[test]
    fn failed_pin_is_reported() {
        let line = SimLine::new();
        let pins = BoardPins {
            reset: SimPin::new(&line),
            boot_mode: SimPin::new(&line),
            boot_button: SimPin::new(&line),
        };
        pins.boot_mode.fail_next_configuration();
        let mut board = Board::new(pins, &Config::default());
        match board.init() {
            Err(BridgeError::Pin { role, .. }) => assert_eq!(role, "boot mode"),
            other => panic!("expected pin error, got {:?}", other),
        }
    }

    #[test]
    fn reset_pulse() {
        let mut h = board();
        h.board.release_reset();
        assert_eq!(h.reset.level(), Level::High);
        h.system.set_millis(100);
        h.board.pulse_reset(&mut h.system);
        assert_eq!(h.reset.level(), Level::High);
        assert_eq!(h.reset.rising_edges(), 2);
        assert_eq!(h.system.millis(), 105);
    }

    #[test]
    fn set_boot_mode_drives_line() {
        let mut h = board();
        assert!(!h.board.set_boot_mode(false));
        assert_eq!(h.boot_mode.level(), Level::Low);
        assert!(h.board.set_boot_mode(true));
        assert_eq!(h.boot_mode.level(), Level::High);
    }

    #[test]
    fn released_button_does_nothing() {
        let mut h = board();
        h.system.set_millis(1000);
        assert!(!h.board.poll_button(&mut h.system));
        // no debounce delay when the button is up
        assert_eq!(h.system.millis(), 1000);
    }

    #[test]
    fn press_toggles_once_per_lockout() {
        let mut h = board();
        h.system.set_millis(1000);
        h.button.set(Level::Low);
        assert!(h.board.poll_button(&mut h.system));
        assert!(!h.board.boot_mode());
        assert_eq!(h.boot_mode.level(), Level::Low);

        // still held 500 ms later
        h.system.advance(500);
        assert!(!h.board.poll_button(&mut h.system));
        assert!(!h.board.boot_mode());

        h.system.advance(300);
        assert!(h.board.poll_button(&mut h.system));
        assert!(h.board.boot_mode());
    }

    #[test]
    fn first_press_right_after_start_counts() {
        let mut h = board();
        h.button.set(Level::Low);
        assert!(h.board.poll_button(&mut h.system));
    }

    #[test]
    fn lockout_survives_wraparound() {
        let mut h = board();
        h.system.set_millis(u32::MAX - 100);
        h.button.set(Level::Low);
        assert!(h.board.poll_button(&mut h.system));
        h.system.advance(300);
        assert!(!h.board.poll_button(&mut h.system));
        h.system.advance(500);
        assert!(h.board.poll_button(&mut h.system));
    }

    #[test]
    fn lockout_boundary() {
        assert!(within_lockout(750, 0, 750));
        assert!(!within_lockout(751, 0, 750));
        assert!(within_lockout(10, u32::MAX - 10, 750));
        assert!(!within_lockout(1000, u32::MAX - 10, 750));
    }
}
