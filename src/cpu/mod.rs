//! ARM7TDMI core.
//!
//! # Module Organization
//!
//! - `psr`: status registers, modes, condition predicates
//! - `arm`: ARM-state decoder and instruction implementations
//! - `thumb`: THUMB-state decoder and instruction implementations
//!
//! The core keeps a two-slot prefetch pipeline in the current state's
//! instruction width. `registers[15]` always holds the address two
//! fetches ahead of the instruction being executed; switching state or
//! writing the PC refills both slots.
//!
//! All functions take the top-level [`Gba`] so that memory, the
//! scheduler and the interrupt registers are reachable without any
//! back-pointers.

use crate::bus;
use crate::gba::Gba;
use crate::memory::reg;
use crate::scheduler::{self, Event};

pub mod arm;
pub mod psr;
pub mod thumb;

#[cfg(test)]
mod tests;

pub use psr::{Psr, State};
use psr::*;

pub const SP_INDEX: usize = 13;
pub const LR_INDEX: usize = 14;
pub const PC_INDEX: usize = 15;

/// Interrupt sources, as bit positions in IE/IF.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Interrupt {
    VBlank = 1 << 0,
    HBlank = 1 << 1,
    VCount = 1 << 2,
    Timer0 = 1 << 3,
    Timer1 = 1 << 4,
    Timer2 = 1 << 5,
    Timer3 = 1 << 6,
    Serial = 1 << 7,
    Dma0 = 1 << 8,
    Dma1 = 1 << 9,
    Dma2 = 1 << 10,
    Dma3 = 1 << 11,
    Key = 1 << 12,
    Cartridge = 1 << 13,
}

/// Mask of implemented interrupt sources.
const IRQ_SOURCE_MASK: u16 = 0x3FFF;

/// CPU state: visible registers, banked spill arrays, status registers
/// and the prefetch pipeline.
pub struct Arm7tdmi {
    pub registers: [u32; 16],
    pub cpsr: Psr,
    /// SPSR of the current mode. Meaningless in User/System.
    pub spsr: Psr,

    // banked r8-r14 (user/system) and r8-r14 (FIQ)
    pub banked_usr: [u32; 7],
    pub banked_fiq: [u32; 7],
    // banked r13-r14 for the two-register modes
    pub banked_irq: [u32; 2],
    pub banked_svc: [u32; 2],
    pub banked_abt: [u32; 2],
    pub banked_und: [u32; 2],

    pub spsr_fiq: Psr,
    pub spsr_irq: Psr,
    pub spsr_svc: Psr,
    pub spsr_abt: Psr,
    pub spsr_und: Psr,

    /// Prefetch slots. `pipeline[0]` is the opcode executed next.
    pub pipeline: [u32; 2],
    pub halted: bool,
}

impl Arm7tdmi {
    pub fn new() -> Self {
        Self {
            registers: [0; 16],
            cpsr: Psr::new(MODE_SYSTEM),
            spsr: Psr::new(MODE_SYSTEM),
            banked_usr: [0; 7],
            banked_fiq: [0; 7],
            banked_irq: [0; 2],
            banked_svc: [0; 2],
            banked_abt: [0; 2],
            banked_und: [0; 2],
            spsr_fiq: Psr::new(MODE_FIQ),
            spsr_irq: Psr::new(MODE_IRQ),
            spsr_svc: Psr::new(MODE_SUPERVISOR),
            spsr_abt: Psr::new(MODE_ABORT),
            spsr_und: Psr::new(MODE_UNDEFINED),
            pipeline: [0; 2],
            halted: false,
        }
    }
}

impl Default for Arm7tdmi {
    fn default() -> Self {
        Self::new()
    }
}

/// Reset the core. Without a BIOS the registers are seeded with the
/// documented post-boot values and execution starts at the cartridge
/// entry point; with a BIOS, at the reset vector.
pub fn reset(gba: &mut Gba, skip_bios: bool) {
    gba.cpu = Arm7tdmi::new();

    if skip_bios {
        gba.cpu.cpsr.m = MODE_SYSTEM;
        gba.cpu.registers[PC_INDEX] = 0x0800_0000;
        gba.cpu.registers[LR_INDEX] = 0x0800_0000;
        gba.cpu.registers[SP_INDEX] = 0x0300_7F00;
        gba.cpu.banked_irq[0] = 0x0300_7FA0;
        gba.cpu.banked_svc[0] = 0x0300_7FE0;
    } else {
        gba.cpu.cpsr.m = MODE_SUPERVISOR;
        gba.cpu.cpsr.i = true;
        gba.cpu.cpsr.f = true;
        gba.cpu.registers[PC_INDEX] = 0x0000_0000;
    }

    refill_pipeline(gba);
}

#[inline]
pub fn get_mode(gba: &Gba) -> u8 {
    gba.cpu.cpsr.m
}

#[inline]
pub fn get_state(gba: &Gba) -> State {
    gba.cpu.cpsr.state()
}

#[inline]
pub fn get_reg(gba: &Gba, r: usize) -> u32 {
    debug_assert!(r <= 15);
    gba.cpu.registers[r]
}

#[inline]
pub fn get_pc(gba: &Gba) -> u32 {
    gba.cpu.registers[PC_INDEX]
}

/// Write a register. A PC write clears bit 0 and refills the pipeline.
pub fn set_reg(gba: &mut Gba, r: usize, value: u32) {
    debug_assert!(r <= 15);
    gba.cpu.registers[r] = value;

    if r == PC_INDEX {
        gba.cpu.registers[PC_INDEX] &= !0x1;
        refill_pipeline(gba);
    }
}

/// Register write for data-processing results, which handle the
/// pipeline refill themselves (after the S-bit SPSR restore).
pub fn set_reg_no_refill(gba: &mut Gba, r: usize, value: u32) {
    debug_assert!(r <= 15);
    gba.cpu.registers[r] = value;
    if r == PC_INDEX {
        gba.cpu.registers[PC_INDEX] &= !0x1;
    }
}

pub fn set_pc(gba: &mut Gba, value: u32) {
    set_reg(gba, PC_INDEX, value);
}

/// Reload both pipeline slots from the current PC and advance it by one
/// fetch width, restoring the "two ahead" invariant.
pub fn refill_pipeline(gba: &mut Gba) {
    match get_state(gba) {
        State::Arm => {
            let pc = get_pc(gba) & !0x3;
            gba.cpu.registers[PC_INDEX] = pc;
            gba.cpu.pipeline[0] = bus::read32(gba, pc);
            gba.cpu.pipeline[1] = bus::read32(gba, pc + 4);
            gba.cpu.registers[PC_INDEX] += 4;
        }
        State::Thumb => {
            let pc = get_pc(gba) & !0x1;
            gba.cpu.registers[PC_INDEX] = pc;
            gba.cpu.pipeline[0] = bus::read16(gba, pc) as u32;
            gba.cpu.pipeline[1] = bus::read16(gba, pc + 2) as u32;
            gba.cpu.registers[PC_INDEX] += 2;
        }
    }
}

// ========== Mode switching ==========

fn save_bank(gba: &mut Gba, mode: u8) {
    let regs = &gba.cpu.registers;
    match mode {
        MODE_USER | MODE_SYSTEM => {
            gba.cpu.banked_usr.copy_from_slice(&regs[8..15]);
        }
        MODE_FIQ => {
            gba.cpu.banked_fiq.copy_from_slice(&regs[8..15]);
            gba.cpu.spsr_fiq = gba.cpu.spsr;
        }
        _ => {
            // r8-r12 are shared with user in these modes; keep the user
            // bank current so a later FIQ round-trip restores them.
            gba.cpu.banked_usr[..5].copy_from_slice(&regs[8..13]);
            let pair = [regs[13], regs[14]];
            match mode {
                MODE_IRQ => {
                    gba.cpu.banked_irq = pair;
                    gba.cpu.spsr_irq = gba.cpu.spsr;
                }
                MODE_SUPERVISOR => {
                    gba.cpu.banked_svc = pair;
                    gba.cpu.spsr_svc = gba.cpu.spsr;
                }
                MODE_ABORT => {
                    gba.cpu.banked_abt = pair;
                    gba.cpu.spsr_abt = gba.cpu.spsr;
                }
                MODE_UNDEFINED => {
                    gba.cpu.banked_und = pair;
                    gba.cpu.spsr_und = gba.cpu.spsr;
                }
                _ => debug_assert!(false, "illegal mode {mode:#04X}"),
            }
        }
    }
}

fn load_bank(gba: &mut Gba, mode: u8) {
    match mode {
        MODE_USER | MODE_SYSTEM => {
            let bank = gba.cpu.banked_usr;
            gba.cpu.registers[8..15].copy_from_slice(&bank);
        }
        MODE_FIQ => {
            let bank = gba.cpu.banked_fiq;
            gba.cpu.registers[8..15].copy_from_slice(&bank);
            gba.cpu.spsr = gba.cpu.spsr_fiq;
        }
        _ => {
            let usr = gba.cpu.banked_usr;
            gba.cpu.registers[8..13].copy_from_slice(&usr[..5]);
            let (pair, spsr) = match mode {
                MODE_IRQ => (gba.cpu.banked_irq, gba.cpu.spsr_irq),
                MODE_SUPERVISOR => (gba.cpu.banked_svc, gba.cpu.spsr_svc),
                MODE_ABORT => (gba.cpu.banked_abt, gba.cpu.spsr_abt),
                MODE_UNDEFINED => (gba.cpu.banked_und, gba.cpu.spsr_und),
                _ => {
                    debug_assert!(false, "illegal mode {mode:#04X}");
                    (gba.cpu.banked_irq, gba.cpu.spsr_irq)
                }
            };
            gba.cpu.registers[13] = pair[0];
            gba.cpu.registers[14] = pair[1];
            gba.cpu.spsr = spsr;
        }
    }
}

/// Swap register banks when the mode field changes. User and System
/// share a bank, so moving between them is only a field update.
pub fn change_mode(gba: &mut Gba, old_mode: u8, new_mode: u8) {
    gba.cpu.cpsr.m = new_mode;

    let usr_sys = |m| m == MODE_USER || m == MODE_SYSTEM;
    if old_mode == new_mode || (usr_sys(old_mode) && usr_sys(new_mode)) {
        return;
    }

    save_bank(gba, old_mode);
    load_bank(gba, new_mode);
}

pub fn get_cpsr(gba: &Gba) -> u32 {
    gba.cpu.cpsr.to_u32()
}

/// User and System have no SPSR; reading it yields the CPSR.
pub fn get_spsr(gba: &Gba) -> u32 {
    match get_mode(gba) {
        MODE_USER | MODE_SYSTEM => gba.cpu.cpsr.to_u32(),
        _ => gba.cpu.spsr.to_u32(),
    }
}

pub fn set_cpsr_from_u32(gba: &mut Gba, value: u32, flag_write: bool, control_write: bool) {
    let old_mode = get_mode(gba);
    let mut psr = gba.cpu.cpsr;
    psr.set_from_u32(value, flag_write, control_write, old_mode);
    let new_mode = psr.m;
    gba.cpu.cpsr = psr;
    change_mode(gba, old_mode, new_mode);
}

pub fn set_spsr_from_u32(gba: &mut Gba, value: u32, flag_write: bool, control_write: bool) {
    let mode = get_mode(gba);
    if mode != MODE_USER && mode != MODE_SYSTEM {
        let mut psr = gba.cpu.spsr;
        psr.set_from_u32(value, flag_write, control_write, mode);
        gba.cpu.spsr = psr;
    }
}

/// SPSR -> CPSR restore used by `SUBS pc` / LDM^ / MOVS pc returns.
pub fn load_spsr_into_cpsr(gba: &mut Gba) {
    let old_mode = get_mode(gba);
    if old_mode != MODE_USER && old_mode != MODE_SYSTEM {
        let spsr = gba.cpu.spsr;
        gba.cpu.cpsr = spsr;
        change_mode(gba, old_mode, spsr.m);
    }
}

// ========== Exceptions ==========

/// SWI entry, or BIOS HLE when no boot ROM is installed.
pub fn software_interrupt(gba: &mut Gba, comment: u8) {
    if !gba.has_bios && crate::bios::hle(gba, comment) {
        return;
    }

    let pc_offset = if get_state(gba) == State::Thumb { 2 } else { 4 };
    let lr = get_pc(gba) - pc_offset;
    let cpsr = gba.cpu.cpsr;

    change_mode(gba, get_mode(gba), MODE_SUPERVISOR);
    gba.cpu.spsr = cpsr;
    gba.cpu.cpsr.i = true;
    gba.cpu.cpsr.t = false;
    set_reg(gba, LR_INDEX, lr);
    set_pc(gba, 0x08);
}

/// IRQ exception entry.
fn enter_irq(gba: &mut Gba) {
    let lr = get_pc(gba) + if get_state(gba) == State::Thumb { 2 } else { 0 };
    let cpsr = gba.cpu.cpsr;

    change_mode(gba, get_mode(gba), MODE_IRQ);
    gba.cpu.spsr = cpsr;
    gba.cpu.cpsr.i = true;
    gba.cpu.cpsr.t = false;
    set_reg(gba, LR_INDEX, lr);
    set_pc(gba, 0x18);
}

/// Latch an interrupt request and schedule the gate check.
pub fn fire_interrupt(gba: &mut Gba, source: Interrupt) {
    let iflag = gba.mem.ioreg(reg::IF);
    gba.mem.set_ioreg(reg::IF, iflag | source as u16);
    schedule_interrupt(gba);
}

/// Arm a zero-cycle interrupt check. Called whenever IE, IF or IME
/// change so the gate is evaluated at the right point on the timeline,
/// including while the CPU is halted.
pub fn schedule_interrupt(gba: &mut Gba) {
    let ie = gba.mem.ioreg(reg::IE);
    let iflag = gba.mem.ioreg(reg::IF);

    if ie & iflag & IRQ_SOURCE_MASK != 0 {
        // a pending, enabled source always ends halt
        gba.cpu.halted = false;

        let ime = gba.mem.ioreg(reg::IME);
        if ime & 1 != 0 && !gba.cpu.cpsr.i {
            gba.scheduler.add(Event::Interrupt, 0, on_interrupt_event);
        }
    }
}

pub fn on_interrupt_event(gba: &mut Gba, _id: Event, _late: i32) {
    let ie = gba.mem.ioreg(reg::IE);
    let iflag = gba.mem.ioreg(reg::IF);
    let ime = gba.mem.ioreg(reg::IME);

    // state may have changed between scheduling and firing
    if ie & iflag & IRQ_SOURCE_MASK != 0 && ime & 1 != 0 && !gba.cpu.cpsr.i {
        enter_irq(gba);
    }
}

/// Why the halt register was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaltType {
    /// Store to HALTCNT.
    Write,
    /// SWI 0x02 handled by the HLE path.
    HleHalt,
}

/// Enter the halted state. While halted, `Gba::run` advances the
/// scheduler from event to event instead of executing instructions.
pub fn on_halt_trigger(gba: &mut Gba, halt_type: HaltType) {
    if halt_type == HaltType::Write && (get_pc(gba) >> 24) != 0 {
        // HALTCNT is only meant to be reachable from BIOS code, but at
        // least one commercial game performs this store.
        log::warn!("HALTCNT written with pc={:08X} outside bios, ignored", get_pc(gba));
        return;
    }

    if gba.mem.ioreg(reg::IE) != 0 && !gba.cpu.cpsr.i {
        gba.cpu.halted = true;
    } else {
        log::warn!("halt entered with no wakeable interrupt");
        gba.cpu.halted = true;
    }
}

// ========== Execution ==========

/// Execute one instruction in the current state.
pub fn step(gba: &mut Gba) {
    match get_state(gba) {
        State::Arm => arm::execute(gba),
        State::Thumb => thumb::execute(gba),
    }
}

/// Fast-forward while halted: jump the clock to the next event and fire
/// it, until an interrupt clears the halt or the frame ends. Bounded by
/// the frame-end sentinel, which is always queued during `run`.
pub fn run_halted(gba: &mut Gba) {
    while gba.cpu.halted && !gba.scheduler.frame_end {
        gba.scheduler.advance_to_next_event();
        scheduler::fire(gba);
    }
    gba.elapsed = 0;
}
