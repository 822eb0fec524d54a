//! Display unit: scanline timing, interrupts and DMA triggers.
//!
//! Each line is HDraw (960 cycles) then HBlank (272 cycles); lines
//! 0-159 render, lines 160-227 are the vertical blank. The four affine
//! reference shadows advance at each visible HBlank and reload from
//! their registers at the end of line 227. Rendering itself lives in
//! [`render`].

pub mod render;

use crate::bit;
use crate::cpu::{self, Interrupt};
use crate::gba::Gba;
use crate::memory::reg;
use crate::peripherals::dma;
use crate::scheduler::Event;

pub const WIDTH: usize = 240;
pub const HEIGHT: usize = 160;

pub const HDRAW_CYCLES: i32 = 960;
pub const HBLANK_CYCLES: i32 = 272;
/// Total lines, including the vertical blank.
pub const LINES: u16 = 228;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    HDraw,
    HBlank,
    VDraw,
    VBlank,
}

pub struct Ppu {
    pub period: Period,
    /// Affine reference shadows, 20.8 fixed point sign-extended to 28
    /// bits. Stepped by PB/PD at HBlank, reloaded at VBlank end.
    pub bg2x: i32,
    pub bg2y: i32,
    pub bg3x: i32,
    pub bg3y: i32,
    /// Finished frame, native 15-bit BGR.
    pub pixels: Box<[[u16; WIDTH]; HEIGHT]>,
}

impl Ppu {
    pub fn new() -> Self {
        Self {
            period: Period::HDraw,
            bg2x: 0,
            bg2y: 0,
            bg3x: 0,
            bg3y: 0,
            pixels: vec![[0; WIDTH]; HEIGHT]
                .into_boxed_slice()
                .try_into()
                .unwrap(),
        }
    }
}

impl Default for Ppu {
    fn default() -> Self {
        Self::new()
    }
}

pub fn get_mode(gba: &Gba) -> u8 {
    bit::get_range16(gba.mem.ioreg(reg::DISPCNT), 0, 2) as u8
}

pub fn is_bitmap_mode(gba: &Gba) -> bool {
    get_mode(gba) >= 3
}

/// Bit 7 of DISPCNT blanks the whole frame.
pub fn is_screen_blanked(gba: &Gba) -> bool {
    bit::is_set(gba.mem.ioreg(reg::DISPCNT) as u32, 7)
}

fn period_cycles(period: Period) -> i32 {
    match period {
        Period::HDraw | Period::VDraw => HDRAW_CYCLES,
        Period::HBlank | Period::VBlank => HBLANK_CYCLES,
    }
}

pub fn reset(gba: &mut Gba, skip_bios: bool) {
    gba.ppu = Ppu::new();
    gba.scheduler.add(Event::Ppu, HDRAW_CYCLES, on_event);

    if skip_bios {
        gba.mem.set_ioreg(reg::DISPCNT, 0x0080);
        gba.mem.set_ioreg(reg::BG2PA, 0x0100);
        gba.mem.set_ioreg(reg::BG2PD, 0x0100);
        gba.mem.set_ioreg(reg::BG3PA, 0x0100);
        gba.mem.set_ioreg(reg::BG3PD, 0x0100);
    }
}

/// Writes to BGxX/BGxY update the rendering shadow immediately; the
/// stored register halves are what the VBlank-end reload uses.
pub fn write_bg_reference(gba: &mut Gba, address: u32, value: u16) {
    let shadow = match address & !3 {
        a if a == reg::BG2X_LO => &mut gba.ppu.bg2x,
        a if a == reg::BG2Y_LO => &mut gba.ppu.bg2y,
        a if a == reg::BG3X_LO => &mut gba.ppu.bg3x,
        _ => &mut gba.ppu.bg3y,
    };

    if address & 2 != 0 {
        *shadow = (*shadow & 0x0000_FFFF) | ((value as i32) << 16);
    } else {
        *shadow = (*shadow as u32 & 0xFFFF_0000) as i32 | value as i32;
    }
    *shadow = bit::sign_extend(*shadow as u32, 27);
}

fn on_hblank(gba: &mut Gba) {
    let stat = gba.mem.ioreg(reg::DISPSTAT);
    gba.mem.set_ioreg(reg::DISPSTAT, bit::set(stat, 1, true));

    if bit::is_set(stat as u32, 4) {
        cpu::fire_interrupt(gba, Interrupt::HBlank);
    }

    if gba.ppu.period == Period::HBlank {
        render::render(gba);
        dma::on_hblank(gba);
    }

    let line = gba.mem.ioreg(reg::VCOUNT);
    if let Some(mut callback) = gba.hblank_callback.take() {
        (callback)(line);
        gba.hblank_callback = Some(callback);
    }
}

fn on_vblank(gba: &mut Gba) {
    let stat = gba.mem.ioreg(reg::DISPSTAT);
    gba.mem.set_ioreg(reg::DISPSTAT, bit::set(stat, 0, true));

    if bit::is_set(stat as u32, 3) {
        cpu::fire_interrupt(gba, Interrupt::VBlank);
    }

    dma::on_vblank(gba);

    let line = gba.mem.ioreg(reg::VCOUNT);
    if let Some(mut callback) = gba.vblank_callback.take() {
        (callback)(line);
        gba.vblank_callback = Some(callback);
    }
}

fn set_vcount(gba: &mut Gba, line: u16) {
    gba.mem.set_ioreg(reg::VCOUNT, line);

    // the capture window spans lines 2..162
    if (2..=162).contains(&line) {
        dma::on_dma3_special(gba);
    }

    let stat = gba.mem.ioreg(reg::DISPSTAT);
    let lyc = bit::get_range16(stat, 8, 15);

    if line == lyc {
        gba.mem.set_ioreg(reg::DISPSTAT, bit::set(stat, 2, true));
        if bit::is_set(stat as u32, 5) {
            cpu::fire_interrupt(gba, Interrupt::VCount);
        }
    } else {
        gba.mem.set_ioreg(reg::DISPSTAT, bit::set(stat, 2, false));
    }
}

fn change_period(gba: &mut Gba) {
    match gba.ppu.period {
        Period::HDraw => {
            gba.ppu.period = Period::HBlank;
            on_hblank(gba);
        }

        Period::HBlank => {
            let line = gba.mem.ioreg(reg::VCOUNT) + 1;
            set_vcount(gba, line);

            let stat = gba.mem.ioreg(reg::DISPSTAT);
            gba.mem.set_ioreg(reg::DISPSTAT, bit::set(stat, 1, false));

            gba.ppu.period = Period::HDraw;
            if line == HEIGHT as u16 {
                gba.ppu.period = Period::VDraw;
                on_vblank(gba);
            } else {
                // affine references step once per visible line
                let pb = gba.mem.ioreg(reg::BG2PB) as i16 as i32;
                let pd = gba.mem.ioreg(reg::BG2PD) as i16 as i32;
                gba.ppu.bg2x = bit::sign_extend(gba.ppu.bg2x.wrapping_add(pb) as u32, 27);
                gba.ppu.bg2y = bit::sign_extend(gba.ppu.bg2y.wrapping_add(pd) as u32, 27);

                let pb = gba.mem.ioreg(reg::BG3PB) as i16 as i32;
                let pd = gba.mem.ioreg(reg::BG3PD) as i16 as i32;
                gba.ppu.bg3x = bit::sign_extend(gba.ppu.bg3x.wrapping_add(pb) as u32, 27);
                gba.ppu.bg3y = bit::sign_extend(gba.ppu.bg3y.wrapping_add(pd) as u32, 27);
            }
        }

        Period::VDraw => {
            on_hblank(gba);
            gba.ppu.period = Period::VBlank;
        }

        Period::VBlank => {
            let line = gba.mem.ioreg(reg::VCOUNT) + 1;
            set_vcount(gba, line);
            gba.ppu.period = Period::VDraw;

            if line == LINES - 1 {
                let stat = gba.mem.ioreg(reg::DISPSTAT);
                gba.mem.set_ioreg(reg::DISPSTAT, bit::set(stat, 0, false));
            }
            if line == LINES {
                // end of frame: reload affine references and wrap
                gba.ppu.bg2x = reference_from_regs(gba, reg::BG2X_LO);
                gba.ppu.bg2y = reference_from_regs(gba, reg::BG2Y_LO);
                gba.ppu.bg3x = reference_from_regs(gba, reg::BG3X_LO);
                gba.ppu.bg3y = reference_from_regs(gba, reg::BG3Y_LO);

                set_vcount(gba, 0);
                gba.ppu.period = Period::HDraw;
            }
        }
    }
}

fn reference_from_regs(gba: &Gba, lo_reg: u32) -> i32 {
    let raw = gba.mem.ioreg(lo_reg) as u32 | ((gba.mem.ioreg(lo_reg + 2) as u32) << 16);
    bit::sign_extend(raw, 27)
}

pub fn on_event(gba: &mut Gba, _id: Event, late: i32) {
    change_period(gba);
    let cycles = period_cycles(gba.ppu.period);
    gba.scheduler.add(Event::Ppu, cycles - late, on_event);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gba::Gba;
    use crate::scheduler;

    fn run_cycles(gba: &mut Gba, cycles: i32) {
        gba.scheduler.tick(cycles);
        scheduler::fire(gba);
    }

    fn fresh() -> Gba {
        let mut gba = Gba::new();
        reset(&mut gba, true);
        gba
    }

    #[test]
    fn test_line_period() {
        let mut gba = fresh();
        assert_eq!(gba.mem.ioreg(reg::VCOUNT), 0);

        run_cycles(&mut gba, HDRAW_CYCLES);
        assert_eq!(gba.ppu.period, Period::HBlank);
        assert!(bit::is_set(gba.mem.ioreg(reg::DISPSTAT) as u32, 1));

        run_cycles(&mut gba, HBLANK_CYCLES);
        assert_eq!(gba.ppu.period, Period::HDraw);
        assert_eq!(gba.mem.ioreg(reg::VCOUNT), 1);
        assert!(!bit::is_set(gba.mem.ioreg(reg::DISPSTAT) as u32, 1));
    }

    #[test]
    fn test_vblank_at_line_160() {
        let mut gba = fresh();
        for _ in 0..160 {
            run_cycles(&mut gba, HDRAW_CYCLES);
            run_cycles(&mut gba, HBLANK_CYCLES);
        }
        assert_eq!(gba.mem.ioreg(reg::VCOUNT), 160);
        assert!(bit::is_set(gba.mem.ioreg(reg::DISPSTAT) as u32, 0));
    }

    #[test]
    fn test_frame_wraps_to_line_0() {
        let mut gba = fresh();
        for _ in 0..LINES {
            run_cycles(&mut gba, HDRAW_CYCLES);
            run_cycles(&mut gba, HBLANK_CYCLES);
        }
        assert_eq!(gba.mem.ioreg(reg::VCOUNT), 0);
        assert_eq!(gba.ppu.period, Period::HDraw);
        assert!(!bit::is_set(gba.mem.ioreg(reg::DISPSTAT) as u32, 0));
    }

    #[test]
    fn test_vcount_match_fires_irq() {
        let mut gba = fresh();
        // lyc = 3, vcount irq enable
        gba.mem.set_ioreg(reg::DISPSTAT, (3 << 8) | (1 << 5));
        for _ in 0..3 {
            run_cycles(&mut gba, HDRAW_CYCLES);
            run_cycles(&mut gba, HBLANK_CYCLES);
        }
        assert!(bit::is_set(gba.mem.ioreg(reg::DISPSTAT) as u32, 2));
        assert_eq!(
            gba.mem.ioreg(reg::IF) & Interrupt::VCount as u16,
            Interrupt::VCount as u16
        );
    }

    #[test]
    fn test_hblank_irq() {
        let mut gba = fresh();
        gba.mem.set_ioreg(reg::DISPSTAT, 1 << 4);
        run_cycles(&mut gba, HDRAW_CYCLES);
        assert_eq!(
            gba.mem.ioreg(reg::IF) & Interrupt::HBlank as u16,
            Interrupt::HBlank as u16
        );
    }

    #[test]
    fn test_affine_shadow_steps_and_reloads() {
        let mut gba = fresh();
        gba.mem.set_ioreg(reg::BG2PB, 0x0100); // +1.0 per line
        gba.mem.set_ioreg(reg::BG2X_LO, 0x0800);
        write_bg_reference(&mut gba, reg::BG2X_LO, 0x0800);

        // one full visible line advances the shadow by pb
        run_cycles(&mut gba, HDRAW_CYCLES);
        run_cycles(&mut gba, HBLANK_CYCLES);
        assert_eq!(gba.ppu.bg2x, 0x0800 + 0x0100);

        // a full frame reloads from the registers
        for _ in 1..LINES {
            run_cycles(&mut gba, HDRAW_CYCLES);
            run_cycles(&mut gba, HBLANK_CYCLES);
        }
        assert_eq!(gba.ppu.bg2x, 0x0800);
    }

    #[test]
    fn test_bg_reference_write_sign_extends() {
        let mut gba = fresh();
        write_bg_reference(&mut gba, reg::BG2X_LO, 0xFFFF);
        write_bg_reference(&mut gba, reg::BG2X_LO + 2, 0x0FFF);
        assert_eq!(gba.ppu.bg2x, -1);
    }
}
