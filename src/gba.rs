//! Top-level console: owns every component and drives the run loop.
//!
//! The CPU is the only source of simulated time. `run` executes
//! instructions, feeding their cycle cost to the scheduler, and fires
//! due events between instructions; a sentinel event marks the end of
//! the requested slice. While the CPU is halted the loop fast-forwards
//! from event to event instead.

use bitflags::bitflags;

use crate::apu::{self, Apu};
use crate::backup::{self, Backup};
use crate::cpu::{self, Arm7tdmi};
use crate::memory::{addr, reg, Mem};
use crate::peripherals::dma::Channel;
use crate::peripherals::gpio::Gpio;
use crate::peripherals::rtc::Rtc;
use crate::peripherals::timer::Timer;
use crate::ppu::{self, Ppu, HEIGHT, WIDTH};
use crate::scheduler::{self, Event, Scheduler};

/// CPU cycles per video frame: 228 lines of 1232 cycles.
pub const FRAME_CYCLES: u32 = 280896;

pub type AudioCallback = Box<dyn FnMut(i16, i16)>;
pub type LineCallback = Box<dyn FnMut(u16)>;
pub type ColourCallback = Box<dyn Fn(u16) -> u32>;

bitflags! {
    /// Button bits as seen by software, active high for callers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Buttons: u16 {
        const A      = 1 << 0;
        const B      = 1 << 1;
        const SELECT = 1 << 2;
        const START  = 1 << 3;
        const RIGHT  = 1 << 4;
        const LEFT   = 1 << 5;
        const UP     = 1 << 6;
        const DOWN   = 1 << 7;
        const R      = 1 << 8;
        const L      = 1 << 9;

        const DIRECTIONAL = Self::RIGHT.bits()
            | Self::LEFT.bits()
            | Self::UP.bits()
            | Self::DOWN.bits();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadError {
    /// ROM or BIOS image has an impossible size.
    BadSize,
    /// Save data does not fit the detected backup device.
    BadSaveData,
    /// No ROM is loaded to apply the data to.
    NoRom,
}

/// Cartridge header, 192 bytes at the start of the ROM.
pub struct Header {
    pub title: [u8; 12],
    pub game_code: [u8; 4],
    pub maker_code: [u8; 2],
    pub fixed_value: u8,
    pub checksum: u8,
}

impl Header {
    pub const SIZE: usize = 192;

    pub fn parse(rom: &[u8]) -> Option<Header> {
        if rom.len() < Self::SIZE {
            return None;
        }
        Some(Header {
            title: rom[0xA0..0xAC].try_into().unwrap(),
            game_code: rom[0xAC..0xB0].try_into().unwrap(),
            maker_code: rom[0xB0..0xB2].try_into().unwrap(),
            fixed_value: rom[0xB2],
            checksum: rom[0xBD],
        })
    }

    pub fn fixed_value_ok(&self) -> bool {
        self.fixed_value == 0x96
    }

    /// `(-(0x19 + sum of bytes 0xA0..0xBD)) & 0xFF`
    pub fn computed_checksum(rom: &[u8]) -> u8 {
        let sum = rom[0xA0..0xBD]
            .iter()
            .fold(0x19u8, |acc, &b| acc.wrapping_add(b));
        0u8.wrapping_sub(sum)
    }
}

pub struct Gba {
    pub scheduler: Scheduler,
    pub cpu: Arm7tdmi,
    pub mem: Mem,
    pub ppu: Ppu,
    pub apu: Apu,
    pub dma: [Channel; 4],
    pub timer: [Timer; 4],
    pub backup: Backup,
    pub gpio: Gpio,
    pub rtc: Rtc,

    /// Not part of save states.
    pub bios: Box<[u8; addr::BIOS_SIZE]>,
    pub rom: Vec<u8>,
    pub has_bios: bool,

    /// Waitstate cycles accumulated by bus accesses since the last
    /// scheduler tick.
    pub elapsed: i32,
    rom_loaded: bool,

    pub audio_callback: Option<AudioCallback>,
    pub vblank_callback: Option<LineCallback>,
    pub hblank_callback: Option<LineCallback>,
    pub colour_callback: Option<ColourCallback>,
}

impl Gba {
    pub fn new() -> Self {
        Self {
            scheduler: Scheduler::new(),
            cpu: Arm7tdmi::new(),
            mem: Mem::new(),
            ppu: Ppu::new(),
            apu: Apu::new(),
            dma: [Channel::new(), Channel::new(), Channel::new(), Channel::new()],
            timer: [Timer::new(), Timer::new(), Timer::new(), Timer::new()],
            backup: Backup::None,
            gpio: Gpio::new(),
            rtc: Rtc::new(),
            bios: vec![0; addr::BIOS_SIZE].into_boxed_slice().try_into().unwrap(),
            rom: Vec::new(),
            has_bios: false,
            elapsed: 0,
            rom_loaded: false,
            audio_callback: None,
            vblank_callback: None,
            hblank_callback: None,
            colour_callback: None,
        }
    }

    /// Reset every component. Backup contents and the loaded images
    /// survive; everything else starts over.
    pub fn reset(&mut self) {
        let skip_bios = !self.has_bios;

        self.elapsed = 0;
        self.scheduler.reset();
        self.mem.reset();
        self.gpio.reset();
        self.rtc.reset();
        for channel in &mut self.dma {
            *channel = Channel::new();
        }
        for timer in &mut self.timer {
            let delay = timer.start_delay;
            *timer = Timer::new();
            timer.start_delay = delay;
        }

        apu::reset(self);
        ppu::reset(self, skip_bios);
        cpu::reset(self, skip_bios);
    }

    /// Install a cartridge image and reset. The header is validated but
    /// only the size is fatal: plenty of test images carry no header.
    pub fn loadrom(&mut self, data: &[u8]) -> Result<(), LoadError> {
        if data.is_empty() || data.len() > addr::ROM_MAX_SIZE {
            return Err(LoadError::BadSize);
        }

        match Header::parse(data) {
            Some(header) => {
                if !header.fixed_value_ok() {
                    log::warn!("header fixed value is {:#04X}, not 0x96", header.fixed_value);
                }
                let computed = Header::computed_checksum(data);
                if computed != header.checksum {
                    log::warn!(
                        "header checksum mismatch: stored {:#04X}, computed {computed:#04X}",
                        header.checksum
                    );
                }
            }
            None => log::warn!("rom shorter than a cartridge header"),
        }

        self.rom = data.to_vec();
        self.backup = backup::detect(&self.rom);
        self.rom_loaded = true;
        self.reset();
        Ok(())
    }

    /// Install a 16 KiB boot ROM and reset.
    pub fn loadbios(&mut self, data: &[u8]) -> Result<(), LoadError> {
        if data.len() != addr::BIOS_SIZE {
            return Err(LoadError::BadSize);
        }
        self.bios.copy_from_slice(data);
        self.has_bios = true;
        if self.rom_loaded {
            self.reset();
        }
        Ok(())
    }

    /// Apply save data to the currently loaded ROM's backup device.
    pub fn loadsave(&mut self, data: &[u8]) -> Result<(), LoadError> {
        if !self.rom_loaded {
            return Err(LoadError::NoRom);
        }
        if self.backup.load_data(data) {
            Ok(())
        } else {
            Err(LoadError::BadSaveData)
        }
    }

    /// Current save payload; empty when the game has no backup.
    pub fn getsave(&self) -> &[u8] {
        self.backup.save_data()
    }

    /// Run one frame's worth of cycles (or any other slice).
    pub fn run(&mut self, cycles: u32) {
        if !self.rom_loaded {
            return;
        }

        self.scheduler.frame_end = false;
        self.scheduler
            .add(Event::FrameEnd, cycles as i32, on_frame_end_event);

        while !self.scheduler.frame_end {
            if self.cpu.halted {
                cpu::run_halted(self);
                continue;
            }

            cpu::step(self);
            self.flush_elapsed();

            while self.scheduler.should_fire() {
                scheduler::fire(self);
                self.flush_elapsed();
            }
        }
    }

    #[inline]
    fn flush_elapsed(&mut self) {
        let elapsed = self.elapsed;
        self.elapsed = 0;
        self.scheduler.tick(elapsed);
    }

    /// Update the key register. `buttons` is active-high; the register
    /// is active-low.
    pub fn setkeys(&mut self, buttons: Buttons, pressed: bool) {
        let mut keys = self.mem.ioreg(reg::KEYINPUT);
        if pressed {
            keys &= !buttons.bits();
        } else {
            keys |= buttons.bits();
        }
        self.mem.set_ioreg(reg::KEYINPUT, keys);
    }

    /// Finished frame in native 15-bit BGR.
    pub fn framebuffer(&self) -> &[[u16; WIDTH]; HEIGHT] {
        &self.ppu.pixels
    }

    /// Convert the frame for the host. Uses the registered colour
    /// callback, falling back to BGR555 -> ARGB8888 expansion.
    pub fn convert_frame(&self, out: &mut [u32]) {
        debug_assert!(out.len() >= WIDTH * HEIGHT);

        for y in 0..HEIGHT {
            for x in 0..WIDTH {
                let native = self.ppu.pixels[y][x];
                out[y * WIDTH + x] = match &self.colour_callback {
                    Some(callback) => callback(native),
                    None => expand_bgr555(native),
                };
            }
        }
    }

    pub fn set_audio_callback(&mut self, callback: Option<AudioCallback>) {
        self.audio_callback = callback;
    }

    pub fn set_vblank_callback(&mut self, callback: Option<LineCallback>) {
        self.vblank_callback = callback;
    }

    pub fn set_hblank_callback(&mut self, callback: Option<LineCallback>) {
        self.hblank_callback = callback;
    }

    pub fn set_colour_callback(&mut self, callback: Option<ColourCallback>) {
        self.colour_callback = callback;
    }

    pub fn is_rom_loaded(&self) -> bool {
        self.rom_loaded
    }
}

impl Default for Gba {
    fn default() -> Self {
        Self::new()
    }
}

fn expand_bgr555(colour: u16) -> u32 {
    let r = (colour & 0x1F) as u32;
    let g = ((colour >> 5) & 0x1F) as u32;
    let b = ((colour >> 10) & 0x1F) as u32;
    let r8 = (r << 3) | (r >> 2);
    let g8 = (g << 3) | (g >> 2);
    let b8 = (b << 3) | (b >> 2);
    0xFF00_0000 | (r8 << 16) | (g8 << 8) | b8
}

pub(crate) fn on_frame_end_event(gba: &mut Gba, _id: Event, _late: i32) {
    gba.scheduler.frame_end = true;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_rom() -> Vec<u8> {
        // enough space for a header plus a bit of code
        let mut rom = vec![0u8; 0x400];
        rom[0xB2] = 0x96;
        let checksum = Header::computed_checksum(&rom);
        rom[0xBD] = checksum;
        rom
    }

    #[test]
    fn test_loadrom_size_limits() {
        let mut gba = Gba::new();
        assert_eq!(gba.loadrom(&[]), Err(LoadError::BadSize));
        assert!(gba.loadrom(&minimal_rom()).is_ok());
        assert!(gba.is_rom_loaded());
    }

    #[test]
    fn test_loadbios_requires_exact_size() {
        let mut gba = Gba::new();
        assert_eq!(gba.loadbios(&[0u8; 100]), Err(LoadError::BadSize));
        assert!(gba.loadbios(&vec![0u8; addr::BIOS_SIZE]).is_ok());
        assert!(gba.has_bios);
    }

    #[test]
    fn test_header_checksum() {
        let rom = minimal_rom();
        let header = Header::parse(&rom).unwrap();
        assert!(header.fixed_value_ok());
        assert_eq!(header.checksum, Header::computed_checksum(&rom));
    }

    #[test]
    fn test_setkeys_round_trip() {
        let mut gba = Gba::new();
        gba.mem.reset();

        gba.setkeys(Buttons::A | Buttons::START, true);
        let keys = gba.mem.ioreg(reg::KEYINPUT);
        assert_eq!(keys & Buttons::A.bits(), 0);
        assert_eq!(keys & Buttons::START.bits(), 0);
        assert_ne!(keys & Buttons::B.bits(), 0);

        gba.setkeys(Buttons::A | Buttons::START, false);
        assert_eq!(gba.mem.ioreg(reg::KEYINPUT), 0xFFFF);
    }

    #[test]
    fn test_run_without_rom_is_noop() {
        let mut gba = Gba::new();
        gba.run(FRAME_CYCLES);
        assert_eq!(gba.scheduler.ticks(), 0);
    }

    #[test]
    fn test_reset_seeds_post_boot_state() {
        let mut gba = Gba::new();
        gba.loadrom(&minimal_rom()).unwrap();

        assert_eq!(cpu::get_reg(&gba, 13), 0x0300_7F00);
        // pc is two fetches past the entry point
        assert_eq!(cpu::get_pc(&gba), 0x0800_0008);
        assert_eq!(gba.mem.ioreg(reg::KEYINPUT), 0xFFFF);
    }

    #[test]
    fn test_save_round_trip_without_running() {
        let mut gba = Gba::new();
        let mut rom = minimal_rom();
        rom.extend_from_slice(b"SRAM_V113");
        gba.loadrom(&rom).unwrap();

        let save = vec![0x5A; 0x8000];
        gba.loadsave(&save).unwrap();
        assert_eq!(gba.getsave(), &save[..]);
    }

    #[test]
    fn test_expand_bgr555() {
        assert_eq!(expand_bgr555(0x7FFF), 0xFFFF_FFFF);
        assert_eq!(expand_bgr555(0x0000), 0xFF00_0000);
        // pure red channel
        assert_eq!(expand_bgr555(0x001F), 0xFFFF_0000);
    }
}
