//! Bit-banged JTAG on four GPIO lines.
use crate::{
    XvcBackend,
    error::BridgeError,
    hal::{DigitalPin, Level, PinMode},
};

/// Busy-wait iterations each clock phase is held for.
pub const DEFAULT_HOLD_CYCLES: u32 = 10;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LinkMode {
    /// All four pins are inputs.
    Stopped,
    /// TCK, TDI and TMS drive the target, TDO is sampled.
    Active,
}

/// The four JTAG lines, as seen from the bridge.
#[derive(Debug)]
pub struct JtagPins<P> {
    pub tck: P,
    pub tdo: P,
    pub tdi: P,
    pub tms: P,
}

#[derive(Debug)]
pub struct JtagLink<P: DigitalPin> {
    pins: JtagPins<P>,
    mode: LinkMode,
    hold_cycles: u32,
}

impl<P: DigitalPin> JtagLink<P> {
    /// Takes the pins and leaves them tri-stated.
    pub fn new(pins: JtagPins<P>, hold_cycles: u32) -> JtagLink<P> {
        let mut link = JtagLink {
            pins,
            mode: LinkMode::Active,
            hold_cycles,
        };
        link.deactivate();
        link
    }

    pub fn mode(&self) -> LinkMode {
        self.mode
    }

    pub fn pins(&self) -> &JtagPins<P> {
        &self.pins
    }

    /// Drives the lines to their idle levels: TCK low, TDI low, TMS high.
    pub fn activate(&mut self) -> Result<(), BridgeError> {
        if let Err(err) = self.configure() {
            self.deactivate();
            return Err(err);
        }
        self.pins.tdi.write(Level::Low);
        self.pins.tck.write(Level::Low);
        self.pins.tms.write(Level::High);
        self.mode = LinkMode::Active;
        log::debug!("JTAG link active");
        Ok(())
    }

    fn configure(&mut self) -> Result<(), BridgeError> {
        let pin = |role: &'static str| {
            move |source: std::io::Error| BridgeError::Pin { role, source }
        };
        self.pins.tdo.set_mode(PinMode::Input).map_err(pin("TDO"))?;
        self.pins.tdi.set_mode(PinMode::Output).map_err(pin("TDI"))?;
        self.pins.tck.set_mode(PinMode::Output).map_err(pin("TCK"))?;
        self.pins.tms.set_mode(PinMode::Output).map_err(pin("TMS"))?;
        Ok(())
    }

    /// Puts all four lines in high impedance.
    pub fn deactivate(&mut self) {
        for (role, pin) in [
            ("TCK", &mut self.pins.tck),
            ("TDO", &mut self.pins.tdo),
            ("TDI", &mut self.pins.tdi),
            ("TMS", &mut self.pins.tms),
        ] {
            if let Err(err) = pin.set_mode(PinMode::Input) {
                log::error!("Could not tri-state {} pin: {}", role, err);
            }
        }
        if self.mode == LinkMode::Active {
            log::debug!("JTAG link stopped");
        }
        self.mode = LinkMode::Stopped;
    }

    /// Clocks one bit: TMS and TDI are set up while TCK is low, then TCK rises. TCK
    /// is left high.
    ///
    /// TDO is read just before the rising edge. Targets change TDO on the falling
    /// edge, so it is stable while TCK is low and this read returns the bit a host
    /// sampling on the rising edge sees.
    pub fn step(&mut self, tms: bool, tdi: bool) -> bool {
        self.pins.tck.write(Level::Low);
        self.pins.tms.write(tms.into());
        self.pins.tdi.write(tdi.into());
        self.hold();
        let tdo = self.pins.tdo.read().is_high();
        self.pins.tck.write(Level::High);
        self.hold();
        tdo
    }

    /// Clocks `num_bits` bits from the two vectors in `buffer`: `num_bytes` bytes of
    /// TMS followed by `num_bytes` bytes of TDI, both LSB first.
    ///
    /// The TMS vector is overwritten with the captured TDO bits. Unused bits of the
    /// last byte read back as zero. TCK is low on return.
    ///
    /// # Panics
    ///
    /// Panics if `buffer` is shorter than `2 * num_bytes`.
    pub fn shift_bits(&mut self, num_bits: u32, num_bytes: usize, buffer: &mut [u8]) {
        debug_assert!(num_bits as usize <= num_bytes * 8);
        let (tms, tdi) = buffer[..2 * num_bytes].split_at_mut(num_bytes);
        let mut bits_left = num_bits as usize;
        for (tms_byte, tdi_byte) in tms.iter_mut().zip(tdi.iter()) {
            let bits = bits_left.min(8);
            let mut tdo = 0u8;
            for bit in 0..bits {
                let captured = self.step(*tms_byte >> bit & 1 == 1, *tdi_byte >> bit & 1 == 1);
                tdo |= (captured as u8) << bit;
            }
            *tms_byte = tdo;
            bits_left -= bits;
        }
        self.pins.tck.write(Level::Low);
    }

    #[inline(always)]
    fn hold(&self) {
        for _ in 0..self.hold_cycles {
            std::hint::spin_loop();
        }
    }
}

impl<P: DigitalPin> XvcBackend for JtagLink<P> {
    fn activate(&mut self) -> Result<(), BridgeError> {
        JtagLink::activate(self)
    }

    fn deactivate(&mut self) {
        JtagLink::deactivate(self)
    }

    fn set_tck(&mut self, period_ns: u32) -> u32 {
        // The clock rate is set by the hold cycles; acknowledge whatever was asked for.
        log::debug!("Bit-bang set_tck: period_ns={} (fixed rate)", period_ns);
        period_ns
    }

    fn shift(&mut self, num_bits: u32, num_bytes: usize, vectors: &mut [u8]) {
        log::trace!("Bit-bang shift TMS: {:02x?}", &vectors[..num_bytes]);
        log::trace!("Bit-bang shift TDI: {:02x?}", &vectors[num_bytes..2 * num_bytes]);
        self.shift_bits(num_bits, num_bytes, vectors);
        log::trace!("Bit-bang shift TDO: {:02x?}", &vectors[..num_bytes]);
    }
}
