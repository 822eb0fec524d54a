//! CPU test support: tiny programs placed in on-chip WRAM.

mod arm;
mod modes;

use crate::cpu::{self, PC_INDEX};
use crate::gba::Gba;
use crate::memory::{addr, Mem};

pub const CODE_BASE: u32 = 0x0300_0000;
pub const DATA_BASE: u32 = 0x0200_0000;

/// Build a console with an ARM program at the start of IWRAM.
pub fn gba_with_arm(instructions: &[u32]) -> Gba {
    let mut gba = Gba::new();
    for (i, &opcode) in instructions.iter().enumerate() {
        Mem::write32_array(gba.mem.iwram.as_mut(), addr::IWRAM_MASK, (i * 4) as u32, opcode);
    }
    cpu::set_pc(&mut gba, CODE_BASE);
    gba
}

/// Build a console in THUMB state with a program at the start of IWRAM.
pub fn gba_with_thumb(instructions: &[u16]) -> Gba {
    let mut gba = Gba::new();
    for (i, &opcode) in instructions.iter().enumerate() {
        Mem::write16_array(gba.mem.iwram.as_mut(), addr::IWRAM_MASK, (i * 2) as u32, opcode);
    }
    gba.cpu.cpsr.t = true;
    cpu::set_pc(&mut gba, CODE_BASE);
    gba
}

pub fn step(gba: &mut Gba, count: usize) {
    for _ in 0..count {
        cpu::step(gba);
    }
}

/// Address of the instruction that will execute next. Between steps
/// the PC sits one fetch ahead of the pending pipeline slot.
pub fn executing_pc(gba: &Gba) -> u32 {
    let width = if gba.cpu.cpsr.t { 2 } else { 4 };
    gba.cpu.registers[PC_INDEX] - width
}
