//! 4-bit bidirectional GPIO port in the cartridge space.
//!
//! Three registers overlay ROM at 0x080000C4 (data), 0x080000C6
//! (direction) and 0x080000C8 (control). The direction register masks
//! which pins the program drives; the control register switches the
//! whole port between write-only (reads fall through to ROM) and
//! read/write. The only device wired to the port here is the RTC.

use crate::bit;
use crate::gba::Gba;
use crate::memory::addr;
use crate::peripherals::rtc;

pub struct Gpio {
    /// Current pin levels, 4 bits.
    pub data: u8,
    /// Pins the program may read (direction bit clear).
    pub read_mask: u8,
    /// Pins the program may drive (direction bit set).
    pub write_mask: u8,
    /// Whether the port is readable; selects the bus handler for the
    /// low ROM mirror.
    pub readable: bool,
}

impl Gpio {
    pub fn new() -> Self {
        Self {
            data: 0,
            read_mask: 0b0000,
            write_mask: 0b1111,
            readable: false,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

impl Default for Gpio {
    fn default() -> Self {
        Self::new()
    }
}

/// Registered read. Only called when the port is readable.
pub fn read(gba: &mut Gba, address: u32) -> u16 {
    debug_assert!(gba.gpio.readable);

    match address & !1 {
        addr::GPIO_DATA => (gba.gpio.data & gba.gpio.read_mask) as u16,
        addr::GPIO_DIRECTION => gba.gpio.write_mask as u16,
        addr::GPIO_CONTROL => gba.gpio.readable as u16,
        _ => 0,
    }
}

pub fn write(gba: &mut Gba, address: u32, value: u16) {
    match address & !1 {
        addr::GPIO_DATA => {
            let driven = (value as u8) & gba.gpio.write_mask;
            gba.gpio.data = driven;
            rtc::write(gba, driven);
        }
        addr::GPIO_DIRECTION => {
            // bit clear = input (readable), bit set = output
            gba.gpio.read_mask = bit::get_range(!value as u32, 0, 3) as u8;
            gba.gpio.write_mask = bit::get_range(value as u32, 0, 3) as u8;
        }
        addr::GPIO_CONTROL => {
            gba.gpio.readable = value & 1 != 0;
            log::debug!(
                "gpio port now {}",
                if gba.gpio.readable { "r/w" } else { "write-only" }
            );
        }
        _ => {}
    }
}
