//! Mode switching and banked-register tests.

use super::*;
use crate::cpu::psr::*;
use crate::cpu::{change_mode, Interrupt};
use crate::memory::reg;
use crate::scheduler;

#[test]
fn test_user_bank_restored_after_mode_round_trip() {
    for &mode in &[MODE_FIQ, MODE_IRQ, MODE_SUPERVISOR, MODE_ABORT, MODE_UNDEFINED] {
        let mut gba = gba_with_arm(&[0xE3A00000]);
        for r in 0..16 {
            gba.cpu.registers[r] = 0x1000 + r as u32;
        }
        let before = gba.cpu.registers;

        change_mode(&mut gba, MODE_SYSTEM, mode);
        // clobber everything the mode banks
        for r in 8..15 {
            gba.cpu.registers[r] = 0xDEAD_0000 + r as u32;
        }
        change_mode(&mut gba, mode, MODE_SYSTEM);

        assert_eq!(gba.cpu.registers[..15], before[..15], "mode {mode:#04X}");
    }
}

#[test]
fn test_fiq_banks_r8_to_r14() {
    let mut gba = gba_with_arm(&[0xE3A00000]);
    gba.cpu.registers[8] = 0x88;
    gba.cpu.registers[13] = 0x1313;

    change_mode(&mut gba, MODE_SYSTEM, MODE_FIQ);
    gba.cpu.registers[8] = 0xF8;
    gba.cpu.registers[13] = 0xF13;

    change_mode(&mut gba, MODE_FIQ, MODE_SYSTEM);
    assert_eq!(gba.cpu.registers[8], 0x88);
    assert_eq!(gba.cpu.registers[13], 0x1313);

    // the fiq values survive in their bank
    change_mode(&mut gba, MODE_SYSTEM, MODE_FIQ);
    assert_eq!(gba.cpu.registers[8], 0xF8);
    assert_eq!(gba.cpu.registers[13], 0xF13);
}

#[test]
fn test_irq_banks_only_r13_r14() {
    let mut gba = gba_with_arm(&[0xE3A00000]);
    gba.cpu.registers[8] = 0x88;
    gba.cpu.registers[13] = 0x1313;
    gba.cpu.registers[14] = 0x1414;

    change_mode(&mut gba, MODE_SYSTEM, MODE_IRQ);
    // r8 is shared with user mode; r13/r14 are banked
    assert_eq!(gba.cpu.registers[8], 0x88);
    gba.cpu.registers[13] = 0xAAA;

    change_mode(&mut gba, MODE_IRQ, MODE_SYSTEM);
    assert_eq!(gba.cpu.registers[13], 0x1313);
    assert_eq!(gba.cpu.registers[14], 0x1414);
}

#[test]
fn test_user_system_share_bank() {
    let mut gba = gba_with_arm(&[0xE3A00000]);
    gba.cpu.registers[13] = 0x1234;
    change_mode(&mut gba, MODE_SYSTEM, MODE_USER);
    assert_eq!(gba.cpu.registers[13], 0x1234);
}

#[test]
fn test_spsr_saved_per_mode() {
    let mut gba = gba_with_arm(&[0xE3A00000]);
    gba.cpu.cpsr.n = true;

    let cpsr = gba.cpu.cpsr;
    change_mode(&mut gba, MODE_SYSTEM, MODE_SUPERVISOR);
    gba.cpu.spsr = cpsr;

    change_mode(&mut gba, MODE_SUPERVISOR, MODE_IRQ);
    gba.cpu.spsr = gba.cpu.cpsr;

    // returning to supervisor brings its spsr back
    change_mode(&mut gba, MODE_IRQ, MODE_SUPERVISOR);
    assert!(gba.cpu.spsr.n);
    assert_eq!(gba.cpu.spsr.m, MODE_SYSTEM);
}

#[test]
fn test_msr_mode_change_from_user_ignored() {
    let mut gba = gba_with_arm(&[0xE3A00000]);
    change_mode(&mut gba, MODE_SYSTEM, MODE_USER);

    crate::cpu::set_cpsr_from_u32(&mut gba, MODE_SYSTEM as u32, false, true);
    assert_eq!(crate::cpu::get_mode(&gba), MODE_USER);
}

#[test]
fn test_irq_gate_requires_ime_ie_and_cpsr() {
    let mut gba = gba_with_arm(&[
        0xE3A00000, // mov r0, #0
        0xE3A00000,
        0xE3A00000,
    ]);
    gba.cpu.cpsr.i = false;

    // flag without enable: nothing happens
    crate::cpu::fire_interrupt(&mut gba, Interrupt::VBlank);
    assert!(!gba.scheduler.has_event(scheduler::Event::Interrupt));

    // enable + master enable: the gate opens
    gba.mem.set_ioreg(reg::IE, Interrupt::VBlank as u16);
    gba.mem.set_ioreg(reg::IME, 1);
    crate::cpu::schedule_interrupt(&mut gba);
    assert!(gba.scheduler.has_event(scheduler::Event::Interrupt));

    scheduler::fire(&mut gba);
    assert_eq!(crate::cpu::get_mode(&gba), MODE_IRQ);
    assert!(gba.cpu.cpsr.i);
    assert_eq!(executing_pc(&gba), 0x18);
}

#[test]
fn test_irq_masked_by_cpsr_i() {
    let mut gba = gba_with_arm(&[0xE3A00000]);
    gba.cpu.cpsr.i = true;
    gba.mem.set_ioreg(reg::IE, Interrupt::VBlank as u16);
    gba.mem.set_ioreg(reg::IME, 1);

    crate::cpu::fire_interrupt(&mut gba, Interrupt::VBlank);
    assert!(!gba.scheduler.has_event(scheduler::Event::Interrupt));
}

#[test]
fn test_pending_interrupt_clears_halt() {
    let mut gba = gba_with_arm(&[0xE3A00000]);
    gba.cpu.halted = true;
    gba.mem.set_ioreg(reg::IE, Interrupt::Timer0 as u16);

    // even with IME off, a pending enabled source ends the halt
    crate::cpu::fire_interrupt(&mut gba, Interrupt::Timer0);
    assert!(!gba.cpu.halted);
}

#[test]
fn test_exception_return_restores_cpsr() {
    // swi followed by movs pc, lr in the handler
    let mut gba = gba_with_arm(&[
        0xEF000000, // swi 0
    ]);
    gba.cpu.cpsr.c = true;

    step(&mut gba, 1);
    assert_eq!(crate::cpu::get_mode(&gba), MODE_SUPERVISOR);

    // place "movs pc, lr" at the svc vector and run it
    crate::memory::Mem::write32_array(
        gba.bios.as_mut(),
        crate::memory::addr::BIOS_MASK,
        0x08,
        0xE1B0F00E,
    );
    crate::cpu::set_pc(&mut gba, 0x08);
    step(&mut gba, 1);

    assert_eq!(crate::cpu::get_mode(&gba), MODE_SYSTEM);
    assert!(gba.cpu.cpsr.c);
    assert_eq!(executing_pc(&gba), CODE_BASE + 4);
}
