//! High-level emulation of a few BIOS calls.
//!
//! Used only when no boot ROM has been supplied. Anything not handled
//! here falls through to the real SWI vector.

use crate::cpu::{self, HaltType};
use crate::gba::Gba;

const SWI_HALT: u8 = 0x02;
const SWI_DIV: u8 = 0x06;
const SWI_SQRT: u8 = 0x08;

fn div(gba: &mut Gba) {
    let number = cpu::get_reg(gba, 0) as i32;
    let denom = cpu::get_reg(gba, 1) as i32;

    if denom == 0 {
        // the real routine loops; surface it rather than divide by zero
        log::warn!("swi div by zero");
        return;
    }

    let quot = number.wrapping_div(denom);
    let rem = number.wrapping_rem(denom);

    cpu::set_reg(gba, 0, quot as u32);
    cpu::set_reg(gba, 1, rem as u32);
    cpu::set_reg(gba, 3, quot.unsigned_abs());
}

fn sqrt(gba: &mut Gba) {
    let number = cpu::get_reg(gba, 0);
    cpu::set_reg(gba, 0, (number as f64).sqrt() as u32 & 0xFFFF);
}

/// Handle an SWI without a BIOS. Returns false if the comment field is
/// not emulated, in which case the caller takes the normal SWI path.
pub fn hle(gba: &mut Gba, comment: u8) -> bool {
    match comment {
        SWI_HALT => {
            cpu::on_halt_trigger(gba, HaltType::HleHalt);
            true
        }
        SWI_DIV => {
            div(gba);
            true
        }
        SWI_SQRT => {
            sqrt(gba);
            true
        }
        _ => {
            log::debug!("unhandled swi hle: {comment:#04X}");
            false
        }
    }
}
