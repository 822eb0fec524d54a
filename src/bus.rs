//! Memory bus: region dispatch for 8/16/32-bit reads and writes.
//!
//! Every access charges a region- and width-dependent waitstate to
//! `gba.elapsed`, which the run loop feeds to the scheduler at the next
//! instruction boundary. Unmapped reads return the open-bus value
//! derived from the CPU pipeline; BIOS reads outside BIOS-resident code
//! return the last value legitimately fetched from it.
//!
//! The I/O region dispatches per register: reads apply a
//! readable-bit mask, writes apply side effects (timer and DMA control,
//! interrupt scheduling, APU registers, halt).

use crate::apu;
use crate::backup::Backup;
use crate::cpu;
use crate::gba::Gba;
use crate::memory::{addr, reg, Mem};
use crate::peripherals::{dma, gpio, timer};
use crate::ppu;

/// Access waitstates indexed by [width 0=8/1=16/2=32][region nibble].
const TIMINGS: [[u32; 16]; 3] = [
    [1, 1, 3, 1, 1, 1, 1, 1, 2, 2, 2, 2, 2, 2, 5, 1],
    [1, 1, 3, 1, 1, 1, 1, 1, 2, 2, 2, 2, 2, 2, 5, 1],
    [1, 1, 6, 1, 1, 2, 2, 1, 4, 4, 4, 4, 4, 4, 8, 1],
];

#[inline]
fn add_wait(gba: &mut Gba, width_index: usize, address: u32) {
    gba.elapsed += TIMINGS[width_index][((address >> 24) & 0xF) as usize] as i32;
}

/// Open-bus value: the most recent fetch, combined per CPU state.
fn open_bus(gba: &Gba, address: u32) -> u32 {
    if address <= 0x3FFF {
        return gba.mem.bios_latch;
    }

    match cpu::get_state(gba) {
        cpu::State::Arm => gba.cpu.pipeline[1],
        cpu::State::Thumb => {
            if address & 1 != 0 {
                (gba.cpu.pipeline[1] << 16) | gba.cpu.pipeline[0]
            } else {
                (gba.cpu.pipeline[0] << 16) | gba.cpu.pipeline[1]
            }
        }
    }
}

// ========== BIOS ==========

fn read_bios32(gba: &mut Gba, address: u32) -> u32 {
    if cpu::get_pc(gba) <= addr::BIOS_SIZE as u32 {
        let value = Mem::read32_array(gba.bios.as_ref(), addr::BIOS_MASK, address);
        gba.mem.bios_latch = value;
        value
    } else {
        open_bus(gba, address)
    }
}

// ========== VRAM folding ==========

/// Fold the 128 KiB VRAM window down to 96 KiB. Returns `None` when the
/// mirror region is unmapped (bitmap modes).
fn vram_offset(gba: &Gba, address: u32) -> Option<u32> {
    let mut offset = address & addr::VRAM_MASK;
    if offset >= 0x18000 {
        if ppu::is_bitmap_mode(gba) && offset <= 0x1BFFF {
            return None;
        }
        offset -= 0x8000;
    }
    Some(offset)
}

// ========== ROM / EEPROM / GPIO ==========

#[inline]
fn gpio_overlaps(address: u32) -> bool {
    (addr::GPIO_DATA..=addr::GPIO_CONTROL + 1).contains(&address)
}

fn rom_read16(gba: &mut Gba, address: u32) -> u16 {
    if gpio_overlaps(address) && gba.gpio.readable {
        return gpio::read(gba, address);
    }

    let offset = (address & addr::ROM_MASK) as usize;
    if offset + 2 <= gba.rom.len() {
        u16::from_le_bytes([gba.rom[offset & !1], gba.rom[(offset & !1) + 1]])
    } else {
        open_bus(gba, address) as u16
    }
}

fn rom_read8(gba: &mut Gba, address: u32) -> u8 {
    let halfword = rom_read16(gba, address);
    (halfword >> ((address & 1) * 8)) as u8
}

fn rom_read32(gba: &mut Gba, address: u32) -> u32 {
    let lo = rom_read16(gba, address & !3) as u32;
    let hi = rom_read16(gba, (address & !3) + 2) as u32;
    lo | (hi << 16)
}

fn is_eeprom_region(gba: &Gba, address: u32) -> bool {
    address >> 24 == 0xD && gba.backup.is_eeprom()
}

// ========== SRAM / Flash region ==========

fn sram_read8(gba: &mut Gba, address: u32) -> u8 {
    if address & 0x00FF_FFFF > 0xFFFF {
        return open_bus(gba, address) as u8;
    }

    match &gba.backup {
        Backup::Sram(sram) => sram.read(address),
        Backup::Flash(flash) => flash.read(address),
        _ => 0xFF,
    }
}

fn sram_write8(gba: &mut Gba, address: u32, value: u8) {
    if address & 0x00FF_FFFF > 0xFFFF {
        return;
    }

    match &mut gba.backup {
        Backup::Sram(sram) => sram.write(address, value),
        Backup::Flash(flash) => flash.write(address, value),
        _ => {}
    }
}

// ========== Reads ==========

pub fn read8(gba: &mut Gba, address: u32) -> u8 {
    add_wait(gba, 0, address);
    let address = address & addr::MIRROR_MASK;

    match address >> 24 {
        0x0 => {
            let word = read_bios32(gba, address);
            (word >> ((address & 3) * 8)) as u8
        }
        0x2 => gba.mem.ewram[(address & addr::EWRAM_MASK) as usize],
        0x3 => gba.mem.iwram[(address & addr::IWRAM_MASK) as usize],
        0x4 => read_io8(gba, address),
        0x5 => gba.mem.pram[(address & addr::PRAM_MASK) as usize],
        0x6 => match vram_offset(gba, address) {
            Some(offset) => gba.mem.vram[offset as usize],
            None => 0,
        },
        0x7 => gba.mem.oam[(address & addr::OAM_MASK) as usize],
        0x8..=0xC => rom_read8(gba, address),
        0xD => {
            if is_eeprom_region(gba, address) {
                if let Backup::Eeprom(ref mut eeprom) = gba.backup {
                    eeprom.read()
                } else {
                    0
                }
            } else {
                rom_read8(gba, address)
            }
        }
        0xE | 0xF => sram_read8(gba, address),
        _ => open_bus(gba, address) as u8,
    }
}

pub fn read16(gba: &mut Gba, address: u32) -> u16 {
    add_wait(gba, 1, address);
    let address = (address & addr::MIRROR_MASK) & !1;

    match address >> 24 {
        0x0 => {
            let word = read_bios32(gba, address);
            (word >> ((address & 2) * 8)) as u16
        }
        0x2 => Mem::read16_array(gba.mem.ewram.as_ref(), addr::EWRAM_MASK, address),
        0x3 => Mem::read16_array(gba.mem.iwram.as_ref(), addr::IWRAM_MASK, address),
        0x4 => read_io16(gba, address),
        0x5 => Mem::read16_array(gba.mem.pram.as_ref(), addr::PRAM_MASK, address),
        0x6 => match vram_offset(gba, address) {
            Some(offset) => Mem::read16_array(gba.mem.vram.as_ref(), addr::VRAM_MASK, offset),
            None => 0,
        },
        0x7 => Mem::read16_array(gba.mem.oam.as_ref(), addr::OAM_MASK, address),
        0x8..=0xC => rom_read16(gba, address),
        0xD => {
            if is_eeprom_region(gba, address) {
                if let Backup::Eeprom(ref mut eeprom) = gba.backup {
                    eeprom.read() as u16
                } else {
                    0
                }
            } else {
                rom_read16(gba, address)
            }
        }
        0xE | 0xF => sram_read8(gba, address) as u16 * 0x0101,
        _ => open_bus(gba, address) as u16,
    }
}

pub fn read32(gba: &mut Gba, address: u32) -> u32 {
    add_wait(gba, 2, address);
    let address = (address & addr::MIRROR_MASK) & !3;

    match address >> 24 {
        0x0 => read_bios32(gba, address),
        0x2 => Mem::read32_array(gba.mem.ewram.as_ref(), addr::EWRAM_MASK, address),
        0x3 => Mem::read32_array(gba.mem.iwram.as_ref(), addr::IWRAM_MASK, address),
        0x4 => read_io16(gba, address) as u32 | ((read_io16(gba, address + 2) as u32) << 16),
        0x5 => Mem::read32_array(gba.mem.pram.as_ref(), addr::PRAM_MASK, address),
        0x6 => match vram_offset(gba, address) {
            Some(offset) => Mem::read32_array(gba.mem.vram.as_ref(), addr::VRAM_MASK, offset),
            None => 0,
        },
        0x7 => Mem::read32_array(gba.mem.oam.as_ref(), addr::OAM_MASK, address),
        0x8..=0xC => rom_read32(gba, address),
        0xD => {
            if is_eeprom_region(gba, address) {
                if let Backup::Eeprom(ref mut eeprom) = gba.backup {
                    let value = eeprom.read() as u32;
                    value | (value << 16)
                } else {
                    0
                }
            } else {
                rom_read32(gba, address)
            }
        }
        0xE | 0xF => sram_read8(gba, address) as u32 * 0x0101_0101,
        _ => open_bus(gba, address),
    }
}

// ========== Writes ==========

pub fn write8(gba: &mut Gba, address: u32, value: u8) {
    add_wait(gba, 0, address);
    let address = address & addr::MIRROR_MASK;

    match address >> 24 {
        0x2 => gba.mem.ewram[(address & addr::EWRAM_MASK) as usize] = value,
        0x3 => gba.mem.iwram[(address & addr::IWRAM_MASK) as usize] = value,
        0x4 => write_io8(gba, address, value),
        0x5 => {
            // byte writes mirror into both halves of the halfword
            let halfword = (value as u16) << 8 | value as u16;
            Mem::write16_array(gba.mem.pram.as_mut(), addr::PRAM_MASK, address, halfword);
        }
        0x6 => {
            if let Some(offset) = vram_offset(gba, address) {
                // byte stores only land in the background region, where
                // they are duplicated; sprite-region bytes are dropped
                let end = if ppu::is_bitmap_mode(gba) { 0x13FFF } else { 0xFFFF };
                if offset <= end {
                    let halfword = (value as u16) << 8 | value as u16;
                    Mem::write16_array(gba.mem.vram.as_mut(), addr::VRAM_MASK, offset, halfword);
                }
            }
        }
        // byte writes to OAM are dropped
        0x7 => {}
        0x8 if gpio_overlaps(address) => gpio::write(gba, address, value as u16),
        0xD => {
            if is_eeprom_region(gba, address) {
                if let Backup::Eeprom(ref mut eeprom) = gba.backup {
                    eeprom.write(value);
                }
            }
        }
        0xE | 0xF => sram_write8(gba, address, value),
        _ => {}
    }
}

pub fn write16(gba: &mut Gba, address: u32, value: u16) {
    add_wait(gba, 1, address);
    let address = (address & addr::MIRROR_MASK) & !1;

    match address >> 24 {
        0x2 => Mem::write16_array(gba.mem.ewram.as_mut(), addr::EWRAM_MASK, address, value),
        0x3 => Mem::write16_array(gba.mem.iwram.as_mut(), addr::IWRAM_MASK, address, value),
        0x4 => write_io16(gba, address, value),
        0x5 => Mem::write16_array(gba.mem.pram.as_mut(), addr::PRAM_MASK, address, value),
        0x6 => {
            if let Some(offset) = vram_offset(gba, address) {
                Mem::write16_array(gba.mem.vram.as_mut(), addr::VRAM_MASK, offset, value);
            }
        }
        0x7 => Mem::write16_array(gba.mem.oam.as_mut(), addr::OAM_MASK, address, value),
        0x8 if gpio_overlaps(address) => gpio::write(gba, address, value),
        0xD => {
            if is_eeprom_region(gba, address) {
                if let Backup::Eeprom(ref mut eeprom) = gba.backup {
                    eeprom.write(value as u8);
                }
            }
        }
        0xE | 0xF => sram_write8(gba, address, (value >> ((address & 1) * 8)) as u8),
        _ => {}
    }
}

pub fn write32(gba: &mut Gba, address: u32, value: u32) {
    add_wait(gba, 2, address);
    let address = (address & addr::MIRROR_MASK) & !3;

    match address >> 24 {
        0x2 => Mem::write32_array(gba.mem.ewram.as_mut(), addr::EWRAM_MASK, address, value),
        0x3 => Mem::write32_array(gba.mem.iwram.as_mut(), addr::IWRAM_MASK, address, value),
        0x4 => {
            // the FIFO ports accept a full word at once
            match address {
                a if a == reg::FIFO_A_L => apu::on_fifo_write32(gba, value, 0),
                a if a == reg::FIFO_B_L => apu::on_fifo_write32(gba, value, 1),
                _ => {
                    write_io16(gba, address, value as u16);
                    write_io16(gba, address + 2, (value >> 16) as u16);
                }
            }
        }
        0x5 => Mem::write32_array(gba.mem.pram.as_mut(), addr::PRAM_MASK, address, value),
        0x6 => {
            if let Some(offset) = vram_offset(gba, address) {
                Mem::write32_array(gba.mem.vram.as_mut(), addr::VRAM_MASK, offset, value);
            }
        }
        0x7 => Mem::write32_array(gba.mem.oam.as_mut(), addr::OAM_MASK, address, value),
        0x8 if gpio_overlaps(address) => gpio::write(gba, address, value as u16),
        0xD => {
            if is_eeprom_region(gba, address) {
                if let Backup::Eeprom(ref mut eeprom) = gba.backup {
                    eeprom.write(value as u8);
                }
            }
        }
        0xE | 0xF => sram_write8(gba, address, (value >> ((address & 3) * 8)) as u8),
        _ => {}
    }
}

// ========== I/O register dispatch ==========

fn read_io16(gba: &mut Gba, address: u32) -> u16 {
    if address & 0x00FF_FFFF >= addr::IO_SIZE as u32 {
        return open_bus(gba, address) as u16;
    }

    match address {
        // stored value is the readable value
        a if a == reg::DISPCNT
            || a == reg::DISPSTAT
            || a == reg::VCOUNT
            || a == reg::BG2CNT
            || a == reg::BG3CNT
            || a == reg::SOUNDBIAS
            || a == reg::TM0CNT
            || a == reg::TM1CNT
            || a == reg::TM2CNT
            || a == reg::TM3CNT
            || a == reg::RCNT
            || a == reg::IE
            || a == reg::IF
            || a == reg::WSCNT
            || a == reg::IME
            || a == reg::KEYCNT
            || a == reg::HALTCNT_L =>
        {
            gba.mem.ioreg(address)
        }

        a if a == reg::BG0CNT || a == reg::BG1CNT => gba.mem.ioreg(address) & 0xDFFF,
        a if a == reg::WININ || a == reg::WINOUT => gba.mem.ioreg(address) & 0x3F3F,
        a if a == reg::BLDCNT => gba.mem.ioreg(address) & 0x3FFF,
        a if a == reg::BLDALPHA => gba.mem.ioreg(address) & 0x1F1F,
        a if a == reg::KEYINPUT => gba.mem.ioreg(address) & 0x03FF,

        a if a == reg::TM0D => timer::read_timer(gba, 0),
        a if a == reg::TM1D => timer::read_timer(gba, 1),
        a if a == reg::TM2D => timer::read_timer(gba, 2),
        a if a == reg::TM3D => timer::read_timer(gba, 3),

        a if (reg::WAVE_RAM0_L..=reg::WAVE_RAM3_H).contains(&a) => {
            apu::read_wave8(gba, a) as u16 | ((apu::read_wave8(gba, a + 1) as u16) << 8)
        }

        a if a == reg::SOUND1CNT_L => gba.mem.ioreg(address) & 0x007F,
        a if a == reg::SOUND1CNT_H => gba.mem.ioreg(address) & 0xFFC0,
        a if a == reg::SOUND1CNT_X => gba.mem.ioreg(address) & 0x4000,
        a if a == reg::SOUND2CNT_L => gba.mem.ioreg(address) & 0xFFC0,
        a if a == reg::SOUND2CNT_H => gba.mem.ioreg(address) & 0x4000,
        a if a == reg::SOUND3CNT_L => gba.mem.ioreg(address) & 0x00E0,
        a if a == reg::SOUND3CNT_H => gba.mem.ioreg(address) & 0xE000,
        a if a == reg::SOUND3CNT_X => gba.mem.ioreg(address) & 0x4000,
        a if a == reg::SOUND4CNT_L => gba.mem.ioreg(address) & 0xFF00,
        a if a == reg::SOUND4CNT_H => gba.mem.ioreg(address) & 0x40FF,
        a if a == reg::SOUNDCNT_L => gba.mem.ioreg(address) & 0xFF77,
        a if a == reg::SOUNDCNT_H => gba.mem.ioreg(address) & 0x770F,
        a if a == reg::SOUNDCNT_X => gba.mem.ioreg(address) & 0x008F,

        a if a == reg::DMA0CNT_H || a == reg::DMA1CNT_H || a == reg::DMA2CNT_H => {
            gba.mem.ioreg(address) & 0xF7E0
        }
        a if a == reg::DMA3CNT_H => gba.mem.ioreg(address) & 0xFFE0,

        // write-only halves of otherwise-mapped registers read 0
        a if a == reg::SOUND1CNT_X + 2
            || a == reg::SOUND2CNT_L + 2
            || a == reg::SOUND2CNT_H + 2
            || a == reg::SOUND3CNT_X + 2
            || a == reg::SOUND4CNT_L + 2
            || a == reg::SOUND4CNT_H + 2
            || a == reg::SOUNDCNT_X + 2
            || a == reg::SOUNDBIAS + 2
            || a == reg::DMA0CNT_L
            || a == reg::DMA1CNT_L
            || a == reg::DMA2CNT_L
            || a == reg::DMA3CNT_L
            || a == reg::WSCNT + 2
            || a == reg::IME + 2
            || a == reg::HALTCNT_H =>
        {
            0x0000
        }

        // everything else (write-only or unmapped) is open bus
        _ => open_bus(gba, address) as u16,
    }
}

fn read_io8(gba: &mut Gba, address: u32) -> u8 {
    let halfword = read_io16(gba, address & !1);
    (halfword >> ((address & 1) * 8)) as u8
}

fn write_io16(gba: &mut Gba, address: u32, value: u16) {
    if address & 0x00FF_FFFF >= addr::IO_SIZE as u32 {
        return;
    }

    match address {
        a if a == reg::TM0D => timer::write_reload(gba, 0, value),
        a if a == reg::TM1D => timer::write_reload(gba, 1, value),
        a if a == reg::TM2D => timer::write_reload(gba, 2, value),
        a if a == reg::TM3D => timer::write_reload(gba, 3, value),

        a if a == reg::TM0CNT || a == reg::TM1CNT || a == reg::TM2CNT || a == reg::TM3CNT => {
            gba.mem.set_ioreg(address, value);
            timer::on_cnt_write(gba, ((address - reg::TM0CNT) / 4) as usize);
        }

        // acknowledging an interrupt clears the written bits
        a if a == reg::IF => {
            let current = gba.mem.ioreg(reg::IF);
            gba.mem.set_ioreg(reg::IF, current & !value);
        }

        // the period flags in the low bits are hardware-owned
        a if a == reg::DISPSTAT => {
            let current = gba.mem.ioreg(reg::DISPSTAT);
            gba.mem.set_ioreg(reg::DISPSTAT, (current & 0x7) | (value & !0x7));
        }

        a if a == reg::VCOUNT || a == reg::KEYINPUT => {}

        a if (reg::BG2X_LO..=reg::BG2Y_HI).contains(&a)
            || (reg::BG3X_LO..=reg::BG3Y_HI).contains(&a) =>
        {
            gba.mem.set_ioreg(address, value);
            ppu::write_bg_reference(gba, address, value);
        }

        a if a == reg::DMA0CNT_H
            || a == reg::DMA1CNT_H
            || a == reg::DMA2CNT_H
            || a == reg::DMA3CNT_H =>
        {
            gba.mem.set_ioreg(address, value);
            dma::on_cnt_write(gba, ((address - reg::DMA0CNT_H) / 12) as usize);
        }

        a if a == reg::IE || a == reg::IME => {
            gba.mem.set_ioreg(address, value);
            cpu::schedule_interrupt(gba);
        }

        a if a == reg::HALTCNT_L => {
            gba.mem.set_ioreg(address, value);
            cpu::on_halt_trigger(gba, cpu::HaltType::Write);
        }

        a if a == reg::FIFO_A_L || a == reg::FIFO_A_H => apu::on_fifo_write16(gba, value, 0),
        a if a == reg::FIFO_B_L || a == reg::FIFO_B_H => apu::on_fifo_write16(gba, value, 1),

        a if a == reg::SOUNDCNT_H => {
            gba.mem.set_ioreg(address, value);
            apu::on_soundcnt_h_write(gba);
        }

        a if a == reg::SOUNDCNT_X => {
            // bits 0-3 are live channel flags; only bit 7 is writable
            apu::write_nr8(gba, address, value as u8);
        }

        a if (reg::WAVE_RAM0_L..=reg::WAVE_RAM3_H + 1).contains(&a) => {
            gba.mem.set_ioreg(address, value);
            apu::write_wave8(gba, a, value as u8);
            apu::write_wave8(gba, a + 1, (value >> 8) as u8);
        }

        a if (reg::SOUND1CNT_L..=reg::SOUNDCNT_L + 1).contains(&a) => {
            gba.mem.set_ioreg(address, value);
            apu::write_nr8(gba, a, value as u8);
            apu::write_nr8(gba, a + 1, (value >> 8) as u8);
        }

        // plain storage: display control, scrolling, blending, DMA
        // addresses, waitstate and serial stubs
        _ => gba.mem.set_ioreg(address, value),
    }
}

fn write_io8(gba: &mut Gba, address: u32, value: u8) {
    match address {
        // tone registers decode at byte granularity
        a if (reg::SOUND1CNT_L..=reg::SOUNDCNT_X + 1).contains(&a)
            && a != reg::SOUNDCNT_H
            && a != reg::SOUNDCNT_H + 1 =>
        {
            // keep the stored halfword for readback
            let stored = gba.mem.ioreg(a);
            let halfword = if a & 1 != 0 {
                (stored & 0x00FF) | ((value as u16) << 8)
            } else {
                (stored & 0xFF00) | value as u16
            };
            gba.mem.set_ioreg(a, halfword);
            apu::write_nr8(gba, a, value);
        }

        a if (reg::WAVE_RAM0_L..=reg::WAVE_RAM3_H + 1).contains(&a) => {
            let stored = gba.mem.ioreg(a);
            let halfword = if a & 1 != 0 {
                (stored & 0x00FF) | ((value as u16) << 8)
            } else {
                (stored & 0xFF00) | value as u16
            };
            gba.mem.set_ioreg(a, halfword);
            apu::write_wave8(gba, a, value);
        }

        a if a == reg::IF => {
            let current = gba.mem.ioreg(reg::IF);
            gba.mem.set_ioreg(reg::IF, current & !(value as u16));
        }
        a if a == reg::IF + 1 => {
            let current = gba.mem.ioreg(reg::IF);
            gba.mem.set_ioreg(reg::IF, current & !((value as u16) << 8));
        }

        a if (reg::FIFO_A_L..=reg::FIFO_A_H + 1).contains(&a) => {
            apu::on_fifo_write8(gba, value, 0)
        }
        a if (reg::FIFO_B_L..=reg::FIFO_B_H + 1).contains(&a) => {
            apu::on_fifo_write8(gba, value, 1)
        }

        a if a == reg::IME => {
            gba.mem.set_ioreg(reg::IME, value as u16);
            cpu::schedule_interrupt(gba);
        }

        // 0x4000300 is the post-boot flag; 0x4000301 is the halt latch
        a if a == reg::HALTCNT_L => {
            let stored = gba.mem.ioreg(reg::HALTCNT_L);
            gba.mem.set_ioreg(reg::HALTCNT_L, (stored & 0xFF00) | value as u16);
        }
        a if a == reg::HALTCNT_L + 1 => {
            cpu::on_halt_trigger(gba, cpu::HaltType::Write);
        }

        a => {
            // merge into the containing halfword and re-dispatch
            let stored = gba.mem.ioreg(a);
            let halfword = if a & 1 != 0 {
                (stored & 0x00FF) | ((value as u16) << 8)
            } else {
                (stored & 0xFF00) | value as u16
            };
            write_io16(gba, a & !1, halfword);
        }
    }
}
