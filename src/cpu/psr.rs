//! Program status registers, processor modes and condition predicates.

use crate::bit;

/// Mode field values. Only these six (plus System) are legal on this
/// core; anything else written via MSR is software error.
pub const MODE_USER: u8 = 0x10;
pub const MODE_FIQ: u8 = 0x11;
pub const MODE_IRQ: u8 = 0x12;
pub const MODE_SUPERVISOR: u8 = 0x13;
pub const MODE_ABORT: u8 = 0x17;
pub const MODE_UNDEFINED: u8 = 0x1B;
pub const MODE_SYSTEM: u8 = 0x1F;

/// Condition codes, bits 31:28 of every ARM opcode.
pub const COND_EQ: u8 = 0x0;
pub const COND_NE: u8 = 0x1;
pub const COND_CS: u8 = 0x2;
pub const COND_CC: u8 = 0x3;
pub const COND_MI: u8 = 0x4;
pub const COND_PL: u8 = 0x5;
pub const COND_VS: u8 = 0x6;
pub const COND_VC: u8 = 0x7;
pub const COND_HI: u8 = 0x8;
pub const COND_LS: u8 = 0x9;
pub const COND_GE: u8 = 0xA;
pub const COND_LT: u8 = 0xB;
pub const COND_GT: u8 = 0xC;
pub const COND_LE: u8 = 0xD;
pub const COND_AL: u8 = 0xE;

/// CPU state selected by the T bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Arm,
    Thumb,
}

/// A program status register, unpacked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Psr {
    pub n: bool,
    pub z: bool,
    pub c: bool,
    pub v: bool,
    /// IRQ disable.
    pub i: bool,
    /// FIQ disable.
    pub f: bool,
    /// Thumb state.
    pub t: bool,
    /// 5-bit mode field.
    pub m: u8,
}

impl Psr {
    pub fn new(mode: u8) -> Self {
        Self {
            n: false,
            z: false,
            c: false,
            v: false,
            i: false,
            f: false,
            t: false,
            m: mode,
        }
    }

    /// Rebuild from a raw word, every field taken verbatim. Only for
    /// state restore; MSR goes through [`Psr::set_from_u32`].
    pub fn from_u32(value: u32) -> Self {
        Self {
            n: bit::is_set(value, 31),
            z: bit::is_set(value, 30),
            c: bit::is_set(value, 29),
            v: bit::is_set(value, 28),
            i: bit::is_set(value, 7),
            f: bit::is_set(value, 6),
            t: bit::is_set(value, 5),
            m: bit::get_range(value, 0, 4) as u8,
        }
    }

    pub fn to_u32(self) -> u32 {
        ((self.n as u32) << 31)
            | ((self.z as u32) << 30)
            | ((self.c as u32) << 29)
            | ((self.v as u32) << 28)
            | ((self.i as u32) << 7)
            | ((self.f as u32) << 6)
            | ((self.t as u32) << 5)
            | self.m as u32
    }

    /// Update from a raw word, gated by the MSR field masks. Control
    /// writes are ignored in User mode.
    pub fn set_from_u32(&mut self, value: u32, flag_write: bool, control_write: bool, current_mode: u8) {
        if flag_write {
            self.n = bit::is_set(value, 31);
            self.z = bit::is_set(value, 30);
            self.c = bit::is_set(value, 29);
            self.v = bit::is_set(value, 28);
        }

        if control_write && current_mode != MODE_USER {
            self.i = bit::is_set(value, 7);
            self.f = bit::is_set(value, 6);
            self.t = bit::is_set(value, 5);
            self.m = bit::get_range(value, 0, 4) as u8;
        }
    }

    pub fn state(self) -> State {
        if self.t {
            State::Thumb
        } else {
            State::Arm
        }
    }

    /// Evaluate a 4-bit condition code against the flags.
    pub fn check_cond(self, cond: u8) -> bool {
        match cond & 0xF {
            x if x == COND_EQ => self.z,
            x if x == COND_NE => !self.z,
            x if x == COND_CS => self.c,
            x if x == COND_CC => !self.c,
            x if x == COND_MI => self.n,
            x if x == COND_PL => !self.n,
            x if x == COND_VS => self.v,
            x if x == COND_VC => !self.v,
            x if x == COND_HI => self.c && !self.z,
            x if x == COND_LS => !self.c || self.z,
            x if x == COND_GE => self.n == self.v,
            x if x == COND_LT => self.n != self.v,
            x if x == COND_GT => !self.z && (self.n == self.v),
            x if x == COND_LE => self.z || (self.n != self.v),
            x if x == COND_AL => true,
            // 0xF: never on ARMv4, treated as always-false
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let mut psr = Psr::new(MODE_SYSTEM);
        psr.n = true;
        psr.c = true;
        psr.i = true;
        let raw = psr.to_u32();
        assert_eq!(raw, 0xA000_009F);

        let mut other = Psr::new(MODE_SUPERVISOR);
        other.set_from_u32(raw, true, true, MODE_SUPERVISOR);
        assert_eq!(other, psr);
    }

    #[test]
    fn test_user_mode_control_write_ignored() {
        let mut psr = Psr::new(MODE_USER);
        psr.set_from_u32(0xFFFF_FFFF, true, true, MODE_USER);
        // flags took
        assert!(psr.n && psr.z && psr.c && psr.v);
        // control did not
        assert!(!psr.i && !psr.f && !psr.t);
        assert_eq!(psr.m, MODE_USER);
    }

    #[test]
    fn test_conditions() {
        let mut psr = Psr::new(MODE_SYSTEM);
        psr.z = true;
        assert!(psr.check_cond(COND_EQ));
        assert!(!psr.check_cond(COND_NE));
        assert!(psr.check_cond(COND_LS));
        assert!(psr.check_cond(COND_AL));

        psr.z = false;
        psr.n = true;
        psr.v = false;
        assert!(psr.check_cond(COND_LT));
        assert!(!psr.check_cond(COND_GE));
        assert!(psr.check_cond(COND_MI));
    }
}
