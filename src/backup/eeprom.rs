//! Bit-serial EEPROM.
//!
//! The device sees single bits, carried in the low bit of writes to the
//! backup region. A transfer is: 2 command bits (0b10 write, 0b11 read),
//! then a 6- or 14-bit address, then either 64 data bits in, or a
//! 64-bit read-out preceded by 4 dummy bits. Reads outside a read
//! window return the ready bit.
//!
//! Whether the part is 6- or 14-bit addressed is not discoverable from
//! the ROM; it is inferred from the length of the first DMA transfer
//! aimed at the device.

const READY_BIT: u8 = 1;
/// 4 dummy bits + 64 data bits per read-out.
const READ_COUNTER_RESET: u8 = 68;

pub const EEPROM_SIZE: usize = 0x2000;
pub const SAVE_SIZE_SMALL: usize = 512;
pub const SAVE_SIZE_BIG: usize = EEPROM_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Width {
    Unknown,
    /// 6-bit address, 512 B part.
    Small,
    /// 14-bit address, 8 KiB part.
    Big,
}

impl Width {
    fn address_bits(self) -> u32 {
        match self {
            Width::Unknown => 6,
            Width::Small => 6,
            Width::Big => 14,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Command,
    Address,
    Data,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Request {
    None,
    Write,
    Read,
}

pub struct Eeprom {
    data: Box<[u8; EEPROM_SIZE]>,
    state: State,
    request: Request,
    width: Width,
    /// Bits shifted in during the current phase.
    bits: u64,
    bit_write_counter: u32,
    /// Counts down through the 68-bit read window.
    bit_read_counter: u8,
    write_address: usize,
    read_address: usize,
    pub dirty: bool,
}

impl Eeprom {
    pub fn new() -> Self {
        Self {
            data: vec![0xFF; EEPROM_SIZE].into_boxed_slice().try_into().unwrap(),
            state: State::Command,
            request: Request::None,
            width: Width::Unknown,
            bits: 0,
            bit_write_counter: 0,
            bit_read_counter: READ_COUNTER_RESET,
            write_address: 0,
            read_address: 0,
            dirty: false,
        }
    }

    pub fn width(&self) -> Width {
        self.width
    }

    /// Fix the device width. The first caller wins; a later conflicting
    /// size is rejected.
    pub fn set_width(&mut self, width: Width) {
        if self.width == Width::Unknown {
            self.width = width;
        } else if self.width != width {
            log::warn!(
                "eeprom width change rejected: {:?} -> {:?}",
                self.width,
                width
            );
        }
    }

    /// Infer the width from a DMA transfer length in units.
    /// 9/73 units carry a 6-bit frame, 17/81 units a 14-bit frame.
    pub fn width_from_transfer(&mut self, units: u32) {
        match units {
            9 | 73 => self.set_width(Width::Small),
            17 | 81 => self.set_width(Width::Big),
            _ => log::warn!("eeprom transfer of {units} units, width not inferred"),
        }
    }

    pub fn save_data(&self) -> &[u8] {
        match self.width {
            Width::Unknown => &[],
            Width::Small => &self.data[..SAVE_SIZE_SMALL],
            Width::Big => &self.data[..],
        }
    }

    pub fn load_data(&mut self, data: &[u8]) -> bool {
        match data.len() {
            SAVE_SIZE_SMALL => {
                self.data[..SAVE_SIZE_SMALL].copy_from_slice(data);
                self.set_width(Width::Small);
                true
            }
            SAVE_SIZE_BIG => {
                self.data.copy_from_slice(data);
                self.set_width(Width::Big);
                true
            }
            _ => {
                log::warn!("bad eeprom save size: {}", data.len());
                false
            }
        }
    }

    fn change_state(&mut self, state: State) {
        self.state = state;
        self.bits = 0;
        self.bit_write_counter = 0;
    }

    /// Serial read. Returns 1 until a read transfer reaches its data
    /// window; the first 4 window bits are dummy, then 64 data bits
    /// MSB-first.
    pub fn read(&mut self) -> u8 {
        if self.request != Request::Read {
            return READY_BIT;
        }

        self.bit_read_counter -= 1;

        if self.bit_read_counter >= 64 {
            return READY_BIT;
        }

        let bit = 1 << (self.bit_read_counter % 8);
        let value = (self.data[self.read_address & (EEPROM_SIZE - 1)] & bit != 0) as u8;

        if self.bit_read_counter % 8 == 0 {
            self.read_address += 1;
        }
        if self.bit_read_counter == 0 {
            self.bit_read_counter = READ_COUNTER_RESET;
            self.request = Request::None;
        }

        value
    }

    /// Serial write of one bit (the low bit of `value`).
    pub fn write(&mut self, value: u8) {
        self.bits = (self.bits << 1) | (value & 1) as u64;
        self.bit_write_counter += 1;

        match self.state {
            State::Command => {
                if self.bit_write_counter == 2 {
                    self.request = match self.bits & 0x3 {
                        0b10 => Request::Write,
                        0b11 => Request::Read,
                        _ => Request::None,
                    };
                    self.change_state(State::Address);
                }
            }

            State::Address => {
                if self.bit_write_counter == self.width.address_bits() {
                    let address = (self.bits as usize) * 8;
                    match self.request {
                        Request::Read => self.read_address = address,
                        Request::Write => self.write_address = address,
                        Request::None => {}
                    }
                    self.change_state(State::Data);
                }
            }

            State::Data => {
                if self.request == Request::Read {
                    // single terminating bit, then the read window opens
                    self.bit_read_counter = READ_COUNTER_RESET;
                    self.change_state(State::Command);
                } else if self.bit_write_counter == 65 {
                    self.request = Request::None;
                    self.change_state(State::Command);
                } else {
                    if self.bit_write_counter % 8 == 0 {
                        self.data[self.write_address & (EEPROM_SIZE - 1)] = self.bits as u8;
                        self.write_address += 1;
                        self.bits = 0;
                    }
                    self.dirty = true;
                }
            }
        }
    }
}

impl Default for Eeprom {
    fn default() -> Self {
        Self::new()
    }
}

// save-state plumbing
impl Eeprom {
    pub fn save_state(&self, w: &mut crate::savestate::StateWriter) {
        w.bytes(self.data.as_ref());
        w.u8(match self.state {
            State::Command => 0,
            State::Address => 1,
            State::Data => 2,
        });
        w.u8(match self.request {
            Request::None => 0,
            Request::Write => 1,
            Request::Read => 2,
        });
        w.u8(match self.width {
            Width::Unknown => 0,
            Width::Small => 1,
            Width::Big => 2,
        });
        w.u64(self.bits);
        w.u32(self.bit_write_counter);
        w.u8(self.bit_read_counter);
        w.u32(self.write_address as u32);
        w.u32(self.read_address as u32);
        w.bool(self.dirty);
    }

    pub fn load_state(
        &mut self,
        r: &mut crate::savestate::StateReader,
    ) -> Result<(), crate::savestate::StateError> {
        r.bytes(self.data.as_mut())?;
        self.state = match r.u8()? {
            0 => State::Command,
            1 => State::Address,
            _ => State::Data,
        };
        self.request = match r.u8()? {
            1 => Request::Write,
            2 => Request::Read,
            _ => Request::None,
        };
        self.width = match r.u8()? {
            1 => Width::Small,
            2 => Width::Big,
            _ => Width::Unknown,
        };
        self.bits = r.u64()?;
        self.bit_write_counter = r.u32()?;
        self.bit_read_counter = r.u8()?;
        self.write_address = r.u32()? as usize;
        self.read_address = r.u32()? as usize;
        self.dirty = r.bool()?;
        Ok(())
    }
}
