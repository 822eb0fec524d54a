//! WASM bindings for browser front-ends.

use wasm_bindgen::prelude::*;

use crate::gba::{Buttons, Gba, FRAME_CYCLES};
use crate::ppu::{HEIGHT, WIDTH};
use crate::savestate;

#[wasm_bindgen]
pub struct WasmGba {
    gba: Box<Gba>,
    frame: Vec<u32>,
}

#[wasm_bindgen]
impl WasmGba {
    #[wasm_bindgen(constructor)]
    pub fn new() -> WasmGba {
        #[cfg(target_arch = "wasm32")]
        console_error_panic_hook::set_once();

        WasmGba {
            gba: Box::new(Gba::new()),
            frame: vec![0; WIDTH * HEIGHT],
        }
    }

    pub fn load_rom(&mut self, data: &[u8]) -> bool {
        self.gba.loadrom(data).is_ok()
    }

    pub fn load_bios(&mut self, data: &[u8]) -> bool {
        self.gba.loadbios(data).is_ok()
    }

    pub fn load_save(&mut self, data: &[u8]) -> bool {
        self.gba.loadsave(data).is_ok()
    }

    pub fn get_save(&self) -> Vec<u8> {
        self.gba.getsave().to_vec()
    }

    pub fn reset(&mut self) {
        self.gba.reset();
    }

    /// Run one frame and convert it for a canvas.
    pub fn run_frame(&mut self) {
        self.gba.run(FRAME_CYCLES);
        self.gba.convert_frame(&mut self.frame);
    }

    pub fn frame_ptr(&self) -> *const u32 {
        self.frame.as_ptr()
    }

    pub fn frame_width(&self) -> usize {
        WIDTH
    }

    pub fn frame_height(&self) -> usize {
        HEIGHT
    }

    pub fn set_keys(&mut self, mask: u16, down: bool) {
        self.gba.setkeys(Buttons::from_bits_truncate(mask), down);
    }

    pub fn save_state(&self) -> Vec<u8> {
        savestate::savestate(&self.gba)
    }

    pub fn load_state(&mut self, data: &[u8]) -> bool {
        savestate::loadstate(&mut self.gba, data).is_ok()
    }
}

impl Default for WasmGba {
    fn default() -> Self {
        Self::new()
    }
}
