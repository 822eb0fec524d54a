//! Game Boy Advance Emulator Core
//!
//! This crate provides a platform-agnostic emulator core with a stable
//! C ABI. No OS APIs are used for I/O - the host supplies ROM/BIOS/save
//! images as byte buffers and receives frames and audio via callbacks.
//!
//! # Architecture
//!
//! The emulator is organized into several modules:
//! - `scheduler`: event queue driving every timed subsystem
//! - `bus` / `memory`: address decoding and memory containers
//! - `cpu`: ARM7TDMI interpreter (ARM and THUMB)
//! - `ppu` / `apu`: video and audio units
//! - `peripherals`: DMA, timers, GPIO and the cartridge RTC
//! - `backup`: EEPROM / SRAM / Flash cartridge saves
//! - `gba`: the top-level console and run loop
//!
//! # Memory Map (28-bit address space, mirrored above)
//!
//! | Address Range           | Region              |
//! |-------------------------|---------------------|
//! | 0x00000000 - 0x00003FFF | BIOS (16 KiB)       |
//! | 0x02000000 - 0x0203FFFF | On-board WRAM       |
//! | 0x03000000 - 0x03007FFF | On-chip WRAM        |
//! | 0x04000000 - 0x040003FF | I/O registers       |
//! | 0x05000000 - 0x050003FF | Palette RAM         |
//! | 0x06000000 - 0x06017FFF | VRAM                |
//! | 0x07000000 - 0x070003FF | OAM                 |
//! | 0x08000000 - 0x0DFFFFFF | Cartridge ROM (×3)  |
//! | 0x0E000000 - 0x0E00FFFF | Cartridge backup    |

pub mod apu;
pub mod backup;
pub mod bios;
pub mod bit;
pub mod bus;
pub mod cpu;
pub mod gba;
pub mod memory;
pub mod peripherals;
pub mod ppu;
pub mod savestate;
pub mod scheduler;

#[cfg(feature = "wasm")]
mod wasm;


use std::ptr;
use std::slice;

pub use gba::{Buttons, Gba, FRAME_CYCLES};

/// Create a new console instance.
#[no_mangle]
pub extern "C" fn gba_create() -> *mut Gba {
    Box::into_raw(Box::new(Gba::new()))
}

/// Destroy a console instance. Safe to call with null.
#[no_mangle]
pub extern "C" fn gba_destroy(gba: *mut Gba) {
    if !gba.is_null() {
        unsafe {
            drop(Box::from_raw(gba));
        }
    }
}

/// Load a cartridge image. Returns 0 on success, negative on failure.
#[no_mangle]
pub extern "C" fn gba_load_rom(gba: *mut Gba, data: *const u8, len: usize) -> i32 {
    if gba.is_null() || data.is_null() {
        return -1;
    }

    let gba = unsafe { &mut *gba };
    let rom = unsafe { slice::from_raw_parts(data, len) };

    match gba.loadrom(rom) {
        Ok(()) => 0,
        Err(_) => -2,
    }
}

/// Load a 16 KiB boot ROM. Returns 0 on success.
#[no_mangle]
pub extern "C" fn gba_load_bios(gba: *mut Gba, data: *const u8, len: usize) -> i32 {
    if gba.is_null() || data.is_null() {
        return -1;
    }

    let gba = unsafe { &mut *gba };
    let bios = unsafe { slice::from_raw_parts(data, len) };

    match gba.loadbios(bios) {
        Ok(()) => 0,
        Err(_) => -2,
    }
}

/// Load save data for the current ROM. Returns 0 on success.
#[no_mangle]
pub extern "C" fn gba_load_save(gba: *mut Gba, data: *const u8, len: usize) -> i32 {
    if gba.is_null() || data.is_null() {
        return -1;
    }

    let gba = unsafe { &mut *gba };
    let save = unsafe { slice::from_raw_parts(data, len) };

    match gba.loadsave(save) {
        Ok(()) => 0,
        Err(_) => -2,
    }
}

/// Get the current save payload. Writes its length to `len` and returns
/// a pointer owned by the console (null when there is no backup).
#[no_mangle]
pub extern "C" fn gba_get_save(gba: *const Gba, len: *mut usize) -> *const u8 {
    if gba.is_null() {
        return ptr::null();
    }

    let gba = unsafe { &*gba };
    let save = gba.getsave();

    if !len.is_null() {
        unsafe { *len = save.len() };
    }
    if save.is_empty() {
        ptr::null()
    } else {
        save.as_ptr()
    }
}

/// Reset to the powered-on state, keeping loaded images and saves.
#[no_mangle]
pub extern "C" fn gba_reset(gba: *mut Gba) {
    if gba.is_null() {
        return;
    }
    unsafe { &mut *gba }.reset();
}

/// Run for the given number of CPU cycles (one frame = 280896).
#[no_mangle]
pub extern "C" fn gba_run(gba: *mut Gba, cycles: u32) {
    if gba.is_null() {
        return;
    }
    unsafe { &mut *gba }.run(cycles);
}

/// Press or release the buttons in `mask` (active high).
#[no_mangle]
pub extern "C" fn gba_set_keys(gba: *mut Gba, mask: u16, down: i32) {
    if gba.is_null() {
        return;
    }
    let gba = unsafe { &mut *gba };
    gba.setkeys(Buttons::from_bits_truncate(mask), down != 0);
}

/// Get a pointer to the 240x160 frame in native 15-bit BGR.
/// Writes width and height to the provided pointers if non-null.
#[no_mangle]
pub extern "C" fn gba_framebuffer(gba: *const Gba, w: *mut i32, h: *mut i32) -> *const u16 {
    if gba.is_null() {
        return ptr::null();
    }

    let gba = unsafe { &*gba };
    if !w.is_null() {
        unsafe { *w = ppu::WIDTH as i32 };
    }
    if !h.is_null() {
        unsafe { *h = ppu::HEIGHT as i32 };
    }

    gba.framebuffer().as_ptr() as *const u16
}

/// Save the console state. Returns bytes written, or negative if the
/// buffer is too small.
#[no_mangle]
pub extern "C" fn gba_save_state(gba: *const Gba, out: *mut u8, cap: usize) -> i32 {
    if gba.is_null() || out.is_null() {
        return -1;
    }

    let gba = unsafe { &*gba };
    let state = savestate::savestate(gba);
    if state.len() > cap {
        return -2;
    }

    let buffer = unsafe { slice::from_raw_parts_mut(out, cap) };
    buffer[..state.len()].copy_from_slice(&state);
    state.len() as i32
}

/// Load a console state. Returns 0 on success.
#[no_mangle]
pub extern "C" fn gba_load_state(gba: *mut Gba, data: *const u8, len: usize) -> i32 {
    if gba.is_null() || data.is_null() {
        return -1;
    }

    let gba = unsafe { &mut *gba };
    let state = unsafe { slice::from_raw_parts(data, len) };

    match gba.loadstate(state) {
        Ok(()) => 0,
        Err(_) => -2,
    }
}
