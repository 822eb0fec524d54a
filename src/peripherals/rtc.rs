//! Serial real-time clock behind the GPIO port.
//!
//! Three pins: SCK (bit 0), SIO (bit 1), CS (bit 2). A transfer starts
//! with CS low / SCK high, then CS rising; bits are latched on the SCK
//! rising edge, low bit first. A command byte carries the magic 0b0110
//! in its high nibble (otherwise it arrives bit-reversed and is
//! swapped), a 3-bit command number and a read flag. Date and time are
//! answered in BCD from the host's wall clock.

use chrono::{Datelike, Local, Timelike};

use crate::bit;
use crate::gba::Gba;

const COMMAND_MAGIC: u32 = 0b0110;

/// Payload length in bits per command.
const COMMAND_LENGTH: [u32; 8] = [8, 8, 56, 24, 24, 24, 0, 0];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Waiting for CS low with SCK high.
    Init1,
    /// Waiting for CS to rise.
    Init2,
    /// Shifting in the command byte.
    Command,
    /// Shifting out a response.
    Read,
    /// Shifting in a payload.
    Write,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Reset = 0,
    Control = 1,
    Date = 2,
    Time = 3,
    Alarm1 = 4,
    Alarm2 = 5,
    Irq = 6,
    Unused = 7,
}

impl Command {
    fn from_bits(value: u32) -> Command {
        match value & 7 {
            0 => Command::Reset,
            1 => Command::Control,
            2 => Command::Date,
            3 => Command::Time,
            4 => Command::Alarm1,
            5 => Command::Alarm2,
            6 => Command::Irq,
            _ => Command::Unused,
        }
    }
}

pub struct Rtc {
    pub state: State,
    pub command: Command,
    /// Shift register, low bit first.
    pub bits: u64,
    pub bit_counter: u32,
    /// Bit latched while SCK is low.
    pub pending_bit: bool,
    /// Control register; bit 6 is 24-hour mode.
    pub control: u8,
}

impl Rtc {
    pub fn new() -> Self {
        Self {
            state: State::Init1,
            command: Command::Unused,
            bits: 0,
            bit_counter: 0,
            pending_bit: false,
            control: 0b0100_0000,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

impl Default for Rtc {
    fn default() -> Self {
        Self::new()
    }
}

fn bcd(value: u32) -> u64 {
    debug_assert!(value <= 99);
    (((value / 10) << 4) | (value % 10)) as u64
}

fn date_time_bits() -> u64 {
    let now = Local::now();
    let mut bits = 0u64;
    bits |= bcd(now.year() as u32 % 100);
    bits |= bcd(now.month()) << 8;
    bits |= bcd(now.day()) << 16;
    bits |= bcd(now.weekday().num_days_from_sunday()) << 24;
    bits |= bcd(now.hour()) << 32;
    bits |= bcd(now.minute()) << 40;
    bits |= bcd(now.second()) << 48;
    bits
}

fn time_bits() -> u64 {
    let now = Local::now();
    let mut bits = 0u64;
    bits |= bcd(now.hour());
    bits |= bcd(now.minute()) << 8;
    bits |= bcd(now.second()) << 16;
    bits
}

/// Reverse the bit order of a byte, for commands sent MSB-first.
fn reverse_byte(value: u64) -> u64 {
    (value as u8).reverse_bits() as u64
}

fn begin_command(gba: &mut Gba) {
    let rtc = &mut gba.rtc;

    let mut byte = rtc.bits;
    if COMMAND_MAGIC != bit::get_range(byte as u32, 4, 7) {
        byte = reverse_byte(byte);
    }

    let is_read = byte & 1 != 0;
    rtc.state = if is_read { State::Read } else { State::Write };
    rtc.command = Command::from_bits(bit::get_range(byte as u32, 1, 3));
    rtc.bits = 0;
    rtc.bit_counter = 0;

    match rtc.command {
        Command::Reset => {
            rtc.control = 0;
            rtc.state = State::Init1;
        }
        Command::Control => {
            if rtc.state == State::Read {
                rtc.bits = rtc.control as u64;
            }
        }
        Command::Date => {
            if rtc.state == State::Read {
                rtc.bits = date_time_bits();
            }
        }
        Command::Time => {
            if rtc.state == State::Read {
                rtc.bits = time_bits();
            }
        }
        Command::Alarm1 | Command::Alarm2 | Command::Irq | Command::Unused => {
            log::warn!("unhandled rtc command {:?}", rtc.command);
            rtc.state = State::Init1;
        }
    }
}

/// Drive the RTC pins with a GPIO data write.
pub fn write(gba: &mut Gba, pins: u8) {
    let sck = pins & 0b001 != 0;
    let sio = pins & 0b010 != 0;
    let cs = pins & 0b100 != 0;

    match gba.rtc.state {
        State::Init1 => {
            if !cs && sck {
                gba.rtc.bits = 0;
                gba.rtc.bit_counter = 0;
                gba.rtc.state = State::Init2;
            }
        }

        State::Init2 => {
            if cs && sck {
                gba.rtc.state = State::Command;
            }
        }

        State::Command => {
            if !cs {
                // chip deselected mid-command
                gba.rtc.state = State::Init1;
            } else if !sck {
                gba.rtc.pending_bit = sio;
            } else {
                let bit_value = gba.rtc.pending_bit as u64;
                gba.rtc.bits |= bit_value << gba.rtc.bit_counter;
                gba.rtc.bit_counter += 1;
                if gba.rtc.bit_counter == 8 {
                    begin_command(gba);
                }
            }
        }

        State::Read => {
            if !cs {
                gba.rtc.state = State::Init1;
            } else if sck {
                let out = (gba.rtc.bits >> gba.rtc.bit_counter) & 1 != 0;
                gba.rtc.pending_bit = out;
                gba.gpio.data = crate::bit::set(gba.gpio.data as u16, 1, out) as u8;
                gba.rtc.bit_counter += 1;

                if gba.rtc.bit_counter == COMMAND_LENGTH[gba.rtc.command as usize] {
                    gba.rtc.state = State::Init1;
                }
            }
        }

        State::Write => {
            if !cs {
                gba.rtc.state = State::Init1;
            } else if !sck {
                gba.rtc.pending_bit = sio;
            } else {
                let bit_value = gba.rtc.pending_bit as u64;
                gba.rtc.bits |= bit_value << gba.rtc.bit_counter;
                gba.rtc.bit_counter += 1;

                if gba.rtc.bit_counter >= COMMAND_LENGTH[gba.rtc.command as usize] {
                    let payload = gba.rtc.bits;
                    gba.rtc.state = State::Init1;

                    match gba.rtc.command {
                        Command::Control => {
                            // bits 0, 2, 4 unused; bit 7 read-only
                            gba.rtc.control = (payload as u8) & 0b0110_1010;
                        }
                        other => {
                            log::warn!("rtc write to {other:?} ignored");
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gba::Gba;

    /// Clock one bit into the device, LSB-first framing handled by the
    /// caller.
    fn clock_bit(gba: &mut Gba, bit_value: bool) {
        let sio = (bit_value as u8) << 1;
        write(gba, 0b100 | sio); // SCK low, CS high, SIO = bit
        write(gba, 0b101 | sio); // SCK high latches
    }

    fn select(gba: &mut Gba) {
        write(gba, 0b001); // CS low, SCK high
        write(gba, 0b101); // CS high, SCK high
    }

    fn send_command(gba: &mut Gba, command: u8, read: bool) {
        select(gba);
        let byte = (COMMAND_MAGIC as u8) << 4 | (command << 1) | read as u8;
        for i in 0..8 {
            clock_bit(gba, (byte >> i) & 1 != 0);
        }
    }

    #[test]
    fn test_read_control() {
        let mut gba = Gba::new();
        send_command(&mut gba, Command::Control as u8, true);
        assert_eq!(gba.rtc.state, State::Read);

        let mut value = 0u8;
        for i in 0..8 {
            write(&mut gba, 0b100);
            write(&mut gba, 0b101);
            value |= ((gba.gpio.data >> 1) & 1) << i;
        }
        // 24h bit set by default
        assert_eq!(value, 0b0100_0000);
        assert_eq!(gba.rtc.state, State::Init1);
    }

    #[test]
    fn test_write_control() {
        let mut gba = Gba::new();
        send_command(&mut gba, Command::Control as u8, false);
        assert_eq!(gba.rtc.state, State::Write);

        for i in 0..8 {
            clock_bit(&mut gba, (0b0100_1010 >> i) & 1 != 0);
        }
        assert_eq!(gba.rtc.control, 0b0100_1010);
        assert_eq!(gba.rtc.state, State::Init1);
    }

    #[test]
    fn test_reset_command() {
        let mut gba = Gba::new();
        send_command(&mut gba, Command::Reset as u8, false);
        assert_eq!(gba.rtc.control, 0);
        assert_eq!(gba.rtc.state, State::Init1);
    }

    #[test]
    fn test_time_read_is_bcd() {
        let mut gba = Gba::new();
        send_command(&mut gba, Command::Time as u8, true);

        let mut bits = 0u64;
        for i in 0..24 {
            write(&mut gba, 0b100);
            write(&mut gba, 0b101);
            bits |= (((gba.gpio.data >> 1) & 1) as u64) << i;
        }
        let hour = bits & 0xFF;
        let minute = (bits >> 8) & 0xFF;
        let second = (bits >> 16) & 0xFF;
        // each BCD nibble stays in decimal range
        for value in [hour, minute, second] {
            assert!(value & 0xF <= 9);
            assert!((value >> 4) & 0xF <= 9);
        }
    }
}
