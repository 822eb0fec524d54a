//! Save states: a little-endian snapshot of the whole console minus
//! the boot ROM and cartridge image.
//!
//! Layout: 4-byte magic, version word, length word, then one section
//! per component. Loading verifies all three header fields before
//! touching any state. Scheduler entries are stored as (id, deadline)
//! pairs and have their callbacks re-bound by id on load.

use crate::apu::{self, Envelope, Len};
use crate::backup::{Backup, Eeprom, Flash, Sram};
use crate::cpu::{self, Psr};
use crate::gba::{self, Gba};
use crate::peripherals::{dma, rtc, timer};
use crate::ppu::{self, Period};
use crate::scheduler::{self, Callback, Event};

pub const MAGIC: [u8; 4] = *b"GBAS";
pub const VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateError {
    BadMagic,
    BadVersion,
    BadLength,
    Truncated,
    BadData,
}

// ========== Byte stream helpers ==========

pub struct StateWriter {
    buf: Vec<u8>,
}

impl StateWriter {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn bool(&mut self, value: bool) {
        self.buf.push(value as u8);
    }

    pub fn u16(&mut self, value: u16) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn i32(&mut self, value: i32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn u64(&mut self, value: u64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn bytes(&mut self, value: &[u8]) {
        self.buf.extend_from_slice(value);
    }

    fn finish(mut self) -> Vec<u8> {
        // patch the length word now that the size is known
        let len = self.buf.len() as u32;
        self.buf[8..12].copy_from_slice(&len.to_le_bytes());
        self.buf
    }
}

impl Default for StateWriter {
    fn default() -> Self {
        Self::new()
    }
}

pub struct StateReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> StateReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], StateError> {
        if self.pos + len > self.data.len() {
            return Err(StateError::Truncated);
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    pub fn u8(&mut self) -> Result<u8, StateError> {
        Ok(self.take(1)?[0])
    }

    pub fn bool(&mut self) -> Result<bool, StateError> {
        Ok(self.u8()? != 0)
    }

    pub fn u16(&mut self) -> Result<u16, StateError> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    pub fn u32(&mut self) -> Result<u32, StateError> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    pub fn i32(&mut self) -> Result<i32, StateError> {
        Ok(i32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    pub fn u64(&mut self) -> Result<u64, StateError> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    pub fn bytes(&mut self, out: &mut [u8]) -> Result<(), StateError> {
        out.copy_from_slice(self.take(out.len())?);
        Ok(())
    }
}

// ========== Scheduler callback rebinding ==========

fn callback_for(id: Event) -> Callback {
    match id {
        Event::Ppu => ppu::on_event,
        Event::ApuSquare0 => apu::on_square0_event,
        Event::ApuSquare1 => apu::on_square1_event,
        Event::ApuWave => apu::on_wave_event,
        Event::ApuNoise => apu::on_noise_event,
        Event::ApuFrameSequencer => apu::on_frame_sequencer_event,
        Event::ApuSample => apu::on_sample_event,
        Event::Timer0 | Event::Timer1 | Event::Timer2 | Event::Timer3 => timer::on_timer_event,
        Event::Dma => dma::on_event,
        Event::Interrupt => cpu::on_interrupt_event,
        Event::FrameEnd => gba::on_frame_end_event,
        Event::Rebase => scheduler::on_rebase_event,
    }
}

// ========== Sections ==========

fn save_scheduler(gba: &Gba, w: &mut StateWriter) {
    w.i32(gba.scheduler.ticks());
    let mut entries: Vec<_> = gba.scheduler.entries().collect();
    // write in firing order so ties replay identically after a load
    entries.sort_by_key(|&(_, time, seq)| (time, seq));
    w.u8(entries.len() as u8);
    for (id, time, _) in entries {
        w.u8(id as u8);
        w.i32(time);
    }
}

fn load_scheduler(gba: &mut Gba, r: &mut StateReader) -> Result<(), StateError> {
    let ticks = r.i32()?;
    let count = r.u8()?;

    gba.scheduler.reset();
    gba.scheduler.remove(Event::Rebase);
    gba.scheduler.tick(ticks);

    for _ in 0..count {
        let id = Event::from_index(r.u8()?).ok_or(StateError::BadData)?;
        let time = r.i32()?;
        gba.scheduler.restore(id, time, callback_for(id));
    }
    Ok(())
}

fn save_psr(w: &mut StateWriter, psr: Psr) {
    w.u32(psr.to_u32());
}

fn load_psr(r: &mut StateReader) -> Result<Psr, StateError> {
    Ok(Psr::from_u32(r.u32()?))
}

fn save_cpu(gba: &Gba, w: &mut StateWriter) {
    let c = &gba.cpu;
    for reg in c.registers {
        w.u32(reg);
    }
    save_psr(w, c.cpsr);
    save_psr(w, c.spsr);
    for bank in [&c.banked_usr[..], &c.banked_fiq[..]] {
        for &value in bank {
            w.u32(value);
        }
    }
    for bank in [c.banked_irq, c.banked_svc, c.banked_abt, c.banked_und] {
        w.u32(bank[0]);
        w.u32(bank[1]);
    }
    for psr in [c.spsr_fiq, c.spsr_irq, c.spsr_svc, c.spsr_abt, c.spsr_und] {
        save_psr(w, psr);
    }
    w.u32(c.pipeline[0]);
    w.u32(c.pipeline[1]);
    w.bool(c.halted);
}

fn load_cpu(gba: &mut Gba, r: &mut StateReader) -> Result<(), StateError> {
    let c = &mut gba.cpu;
    for reg in &mut c.registers {
        *reg = r.u32()?;
    }
    c.cpsr = load_psr(r)?;
    c.spsr = load_psr(r)?;
    for i in 0..7 {
        c.banked_usr[i] = r.u32()?;
    }
    for i in 0..7 {
        c.banked_fiq[i] = r.u32()?;
    }
    for bank in [
        &mut c.banked_irq,
        &mut c.banked_svc,
        &mut c.banked_abt,
        &mut c.banked_und,
    ] {
        bank[0] = r.u32()?;
        bank[1] = r.u32()?;
    }
    c.spsr_fiq = load_psr(r)?;
    c.spsr_irq = load_psr(r)?;
    c.spsr_svc = load_psr(r)?;
    c.spsr_abt = load_psr(r)?;
    c.spsr_und = load_psr(r)?;
    c.pipeline[0] = r.u32()?;
    c.pipeline[1] = r.u32()?;
    c.halted = r.bool()?;
    Ok(())
}

fn save_mem(gba: &Gba, w: &mut StateWriter) {
    w.bytes(gba.mem.ewram.as_ref());
    w.bytes(gba.mem.iwram.as_ref());
    w.bytes(gba.mem.pram.as_ref());
    w.bytes(gba.mem.vram.as_ref());
    w.bytes(gba.mem.oam.as_ref());
    for halfword in gba.mem.io {
        w.u16(halfword);
    }
    w.u32(gba.mem.bios_latch);
}

fn load_mem(gba: &mut Gba, r: &mut StateReader) -> Result<(), StateError> {
    r.bytes(gba.mem.ewram.as_mut())?;
    r.bytes(gba.mem.iwram.as_mut())?;
    r.bytes(gba.mem.pram.as_mut())?;
    r.bytes(gba.mem.vram.as_mut())?;
    r.bytes(gba.mem.oam.as_mut())?;
    for halfword in &mut gba.mem.io {
        *halfword = r.u16()?;
    }
    gba.mem.bios_latch = r.u32()?;
    Ok(())
}

fn save_ppu(gba: &Gba, w: &mut StateWriter) {
    let period = match gba.ppu.period {
        Period::HDraw => 0u8,
        Period::HBlank => 1,
        Period::VDraw => 2,
        Period::VBlank => 3,
    };
    w.u8(period);
    w.i32(gba.ppu.bg2x);
    w.i32(gba.ppu.bg2y);
    w.i32(gba.ppu.bg3x);
    w.i32(gba.ppu.bg3y);
    for row in gba.ppu.pixels.iter() {
        for &pixel in row {
            w.u16(pixel);
        }
    }
}

fn load_ppu(gba: &mut Gba, r: &mut StateReader) -> Result<(), StateError> {
    gba.ppu.period = match r.u8()? {
        0 => Period::HDraw,
        1 => Period::HBlank,
        2 => Period::VDraw,
        3 => Period::VBlank,
        _ => return Err(StateError::BadData),
    };
    gba.ppu.bg2x = r.i32()?;
    gba.ppu.bg2y = r.i32()?;
    gba.ppu.bg3x = r.i32()?;
    gba.ppu.bg3y = r.i32()?;
    for row in gba.ppu.pixels.iter_mut() {
        for pixel in row.iter_mut() {
            *pixel = r.u16()?;
        }
    }
    Ok(())
}

fn save_len(w: &mut StateWriter, len: Len) {
    w.u16(len.counter);
    w.bool(len.enable);
}

fn load_len(r: &mut StateReader) -> Result<Len, StateError> {
    Ok(Len {
        counter: r.u16()?,
        enable: r.bool()?,
    })
}

fn save_env(w: &mut StateWriter, env: Envelope) {
    w.u8(env.starting_vol);
    w.u8(env.volume);
    w.u8(env.period);
    w.u8(env.timer as u8);
    w.bool(env.add_mode);
    w.bool(env.disabled);
}

fn load_env(r: &mut StateReader) -> Result<Envelope, StateError> {
    Ok(Envelope {
        starting_vol: r.u8()?,
        volume: r.u8()?,
        period: r.u8()?,
        timer: r.u8()? as i8,
        add_mode: r.bool()?,
        disabled: r.bool()?,
    })
}

fn save_apu(gba: &Gba, w: &mut StateWriter) {
    let a = &gba.apu;

    for fifo in &a.fifo {
        for &sample in &fifo.buf {
            w.u8(sample as u8);
        }
        w.u8(fifo.read_index as u8);
        w.u8(fifo.write_index as u8);
        w.u8(fifo.count as u8);
        w.u8(fifo.current_sample as u8);
        w.bool(fifo.full_volume);
        w.bool(fifo.enable_right);
        w.bool(fifo.enable_left);
        w.u8(fifo.timer_select as u8);
    }

    for square in [&a.square0, &a.square1] {
        save_len(w, square.len);
        save_env(w, square.env);
        w.u8(square.duty);
        w.u8(square.duty_index);
        w.u8(square.freq_lsb);
        w.u8(square.freq_msb);
        w.i32(square.timer);
    }

    let s = &a.sweep;
    w.u16(s.shadow);
    w.u8(s.period);
    w.u8(s.shift);
    w.u8(s.timer as u8);
    w.bool(s.enabled);
    w.bool(s.negate);
    w.bool(s.did_negate);

    let wave = &a.wave;
    save_len(w, wave.len);
    w.bytes(&wave.ram);
    w.u8(wave.vol_code);
    w.u8(wave.freq_lsb);
    w.u8(wave.freq_msb);
    w.u8(wave.sample_buffer);
    w.u8(wave.position);
    w.bool(wave.bank_select);
    w.bool(wave.bank_mode);
    w.bool(wave.force_volume);
    w.bool(wave.dac_power);
    w.i32(wave.timer);

    let n = &a.noise;
    save_len(w, n.len);
    save_env(w, n.env);
    w.u16(n.lfsr);
    w.u8(n.clock_shift);
    w.u8(n.divisor_code);
    w.bool(n.half_width);
    w.i32(n.timer);

    w.u8(a.fs_index);
    w.bool(a.enabled);
}

fn load_apu(gba: &mut Gba, r: &mut StateReader) -> Result<(), StateError> {
    for fifo in &mut gba.apu.fifo {
        let mut raw = [0u8; apu::FIFO_CAPACITY];
        r.bytes(&mut raw)?;
        for (slot, byte) in fifo.buf.iter_mut().zip(raw) {
            *slot = byte as i8;
        }
        fifo.read_index = r.u8()? as usize % apu::FIFO_CAPACITY;
        fifo.write_index = r.u8()? as usize % apu::FIFO_CAPACITY;
        fifo.count = (r.u8()? as usize).min(apu::FIFO_CAPACITY);
        fifo.current_sample = r.u8()? as i8;
        fifo.full_volume = r.bool()?;
        fifo.enable_right = r.bool()?;
        fifo.enable_left = r.bool()?;
        fifo.timer_select = r.u8()? as usize & 1;
    }

    for num in 0..2 {
        let len = load_len(r)?;
        let env = load_env(r)?;
        let square = if num == 0 {
            &mut gba.apu.square0
        } else {
            &mut gba.apu.square1
        };
        square.len = len;
        square.env = env;
        square.duty = r.u8()?;
        square.duty_index = r.u8()?;
        square.freq_lsb = r.u8()?;
        square.freq_msb = r.u8()?;
        square.timer = r.i32()?;
    }

    let s = &mut gba.apu.sweep;
    s.shadow = r.u16()?;
    s.period = r.u8()?;
    s.shift = r.u8()?;
    s.timer = r.u8()? as i8;
    s.enabled = r.bool()?;
    s.negate = r.bool()?;
    s.did_negate = r.bool()?;

    gba.apu.wave.len = load_len(r)?;
    r.bytes(&mut gba.apu.wave.ram)?;
    let wave = &mut gba.apu.wave;
    wave.vol_code = r.u8()?;
    wave.freq_lsb = r.u8()?;
    wave.freq_msb = r.u8()?;
    wave.sample_buffer = r.u8()?;
    wave.position = r.u8()?;
    wave.bank_select = r.bool()?;
    wave.bank_mode = r.bool()?;
    wave.force_volume = r.bool()?;
    wave.dac_power = r.bool()?;
    wave.timer = r.i32()?;

    let len = load_len(r)?;
    let env = load_env(r)?;
    let n = &mut gba.apu.noise;
    n.len = len;
    n.env = env;
    n.lfsr = r.u16()?;
    n.clock_shift = r.u8()?;
    n.divisor_code = r.u8()?;
    n.half_width = r.bool()?;
    n.timer = r.i32()?;

    gba.apu.fs_index = r.u8()? % 8;
    gba.apu.enabled = r.bool()?;
    Ok(())
}

fn save_dma_and_timers(gba: &Gba, w: &mut StateWriter) {
    for channel in &gba.dma {
        w.u32(channel.src);
        w.u32(channel.dst);
        w.u32(channel.count);
        w.bool(channel.enabled);
        w.bool(channel.pending);
    }
    for timer in &gba.timer {
        w.u16(timer.counter);
        w.u16(timer.reload);
        w.u16(timer.freq);
        w.bool(timer.cascade);
        w.bool(timer.irq);
        w.bool(timer.enabled);
        w.i32(timer.start_delay);
    }
}

fn load_dma_and_timers(gba: &mut Gba, r: &mut StateReader) -> Result<(), StateError> {
    for channel in &mut gba.dma {
        channel.src = r.u32()?;
        channel.dst = r.u32()?;
        channel.count = r.u32()?;
        channel.enabled = r.bool()?;
        channel.pending = r.bool()?;
    }
    for timer in &mut gba.timer {
        timer.counter = r.u16()?;
        timer.reload = r.u16()?;
        timer.freq = r.u16()?.max(1);
        timer.cascade = r.bool()?;
        timer.irq = r.bool()?;
        timer.enabled = r.bool()?;
        timer.start_delay = r.i32()?;
    }
    Ok(())
}

const BACKUP_NONE: u8 = 0;
const BACKUP_EEPROM: u8 = 1;
const BACKUP_SRAM: u8 = 2;
const BACKUP_FLASH: u8 = 3;

fn save_backup(gba: &Gba, w: &mut StateWriter) {
    match &gba.backup {
        Backup::None => w.u8(BACKUP_NONE),
        Backup::Eeprom(eeprom) => {
            w.u8(BACKUP_EEPROM);
            eeprom.save_state(w);
        }
        Backup::Sram(sram) => {
            w.u8(BACKUP_SRAM);
            w.bytes(sram.data.as_ref());
        }
        Backup::Flash(flash) => {
            w.u8(BACKUP_FLASH);
            flash.save_state(w);
        }
    }
}

fn load_backup(gba: &mut Gba, r: &mut StateReader) -> Result<(), StateError> {
    match r.u8()? {
        BACKUP_NONE => gba.backup = Backup::None,
        BACKUP_EEPROM => {
            let mut eeprom = Eeprom::new();
            eeprom.load_state(r)?;
            gba.backup = Backup::Eeprom(eeprom);
        }
        BACKUP_SRAM => {
            let mut sram = Sram::new();
            r.bytes(sram.data.as_mut())?;
            gba.backup = Backup::Sram(sram);
        }
        BACKUP_FLASH => {
            gba.backup = Backup::Flash(Flash::load_state(r)?);
        }
        _ => return Err(StateError::BadData),
    }
    Ok(())
}

fn save_gpio_rtc(gba: &Gba, w: &mut StateWriter) {
    w.u8(gba.gpio.data);
    w.u8(gba.gpio.read_mask);
    w.u8(gba.gpio.write_mask);
    w.bool(gba.gpio.readable);

    let rtc = &gba.rtc;
    w.u8(rtc_state_index(rtc.state));
    w.u8(rtc.command as u8);
    w.u64(rtc.bits);
    w.u32(rtc.bit_counter);
    w.bool(rtc.pending_bit);
    w.u8(rtc.control);
}

// the rtc State enum carries no explicit discriminants; map it by hand
fn rtc_state_index(state: rtc::State) -> u8 {
    match state {
        rtc::State::Init1 => 0,
        rtc::State::Init2 => 1,
        rtc::State::Command => 2,
        rtc::State::Read => 3,
        rtc::State::Write => 4,
    }
}

fn rtc_state_from_index(index: u8) -> Result<rtc::State, StateError> {
    Ok(match index {
        0 => rtc::State::Init1,
        1 => rtc::State::Init2,
        2 => rtc::State::Command,
        3 => rtc::State::Read,
        4 => rtc::State::Write,
        _ => return Err(StateError::BadData),
    })
}

fn rtc_command_from_index(index: u8) -> rtc::Command {
    match index {
        0 => rtc::Command::Reset,
        1 => rtc::Command::Control,
        2 => rtc::Command::Date,
        3 => rtc::Command::Time,
        4 => rtc::Command::Alarm1,
        5 => rtc::Command::Alarm2,
        6 => rtc::Command::Irq,
        _ => rtc::Command::Unused,
    }
}

fn load_gpio_rtc(gba: &mut Gba, r: &mut StateReader) -> Result<(), StateError> {
    gba.gpio.data = r.u8()?;
    gba.gpio.read_mask = r.u8()?;
    gba.gpio.write_mask = r.u8()?;
    gba.gpio.readable = r.bool()?;

    gba.rtc.state = rtc_state_from_index(r.u8()?)?;
    gba.rtc.command = rtc_command_from_index(r.u8()?);
    gba.rtc.bits = r.u64()?;
    gba.rtc.bit_counter = r.u32()?;
    gba.rtc.pending_bit = r.bool()?;
    gba.rtc.control = r.u8()?;
    Ok(())
}

// ========== Entry points ==========

pub fn savestate(gba: &Gba) -> Vec<u8> {
    let mut w = StateWriter::new();
    w.bytes(&MAGIC);
    w.u32(VERSION);
    w.u32(0); // length, patched by finish()

    save_scheduler(gba, &mut w);
    save_cpu(gba, &mut w);
    save_mem(gba, &mut w);
    save_ppu(gba, &mut w);
    save_apu(gba, &mut w);
    save_dma_and_timers(gba, &mut w);
    save_backup(gba, &mut w);
    save_gpio_rtc(gba, &mut w);
    w.i32(gba.elapsed);

    w.finish()
}

pub fn loadstate(gba: &mut Gba, data: &[u8]) -> Result<(), StateError> {
    let mut r = StateReader::new(data);

    let mut magic = [0u8; 4];
    r.bytes(&mut magic)?;
    if magic != MAGIC {
        return Err(StateError::BadMagic);
    }
    if r.u32()? != VERSION {
        return Err(StateError::BadVersion);
    }
    if r.u32()? as usize != data.len() {
        return Err(StateError::BadLength);
    }

    load_scheduler(gba, &mut r)?;
    load_cpu(gba, &mut r)?;
    load_mem(gba, &mut r)?;
    load_ppu(gba, &mut r)?;
    load_apu(gba, &mut r)?;
    load_dma_and_timers(gba, &mut r)?;
    load_backup(gba, &mut r)?;
    load_gpio_rtc(gba, &mut r)?;
    gba.elapsed = r.i32()?;
    Ok(())
}

impl Gba {
    /// Serialise the console into `out`.
    pub fn savestate(&self, out: &mut Vec<u8>) -> bool {
        out.clear();
        out.extend_from_slice(&savestate(self));
        true
    }

    /// Restore a snapshot previously produced by [`Gba::savestate`].
    pub fn loadstate(&mut self, data: &[u8]) -> Result<(), StateError> {
        loadstate(self, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gba::Gba;

    fn loaded_gba() -> Gba {
        let mut gba = Gba::new();
        let mut rom = vec![0u8; 0x400];
        rom[0xB2] = 0x96;
        gba.loadrom(&rom).unwrap();
        gba
    }

    #[test]
    fn test_round_trip_preserves_state() {
        let mut gba = loaded_gba();
        gba.mem.ewram[0x100] = 0xAB;
        gba.cpu.registers[5] = 0x1234_5678;
        gba.ppu.bg2x = -42;
        gba.timer[2].reload = 0xBEEF;

        let state = savestate(&gba);

        let mut other = loaded_gba();
        loadstate(&mut other, &state).unwrap();

        assert_eq!(other.mem.ewram[0x100], 0xAB);
        assert_eq!(other.cpu.registers[5], 0x1234_5678);
        assert_eq!(other.ppu.bg2x, -42);
        assert_eq!(other.timer[2].reload, 0xBEEF);
        assert_eq!(other.scheduler.ticks(), gba.scheduler.ticks());
    }

    #[test]
    fn test_header_checks() {
        let mut gba = loaded_gba();
        let mut state = savestate(&gba);

        assert_eq!(loadstate(&mut gba, b"GB"), Err(StateError::Truncated));
        assert_eq!(loadstate(&mut gba, b"XXXXXXXXXXXX"), Err(StateError::BadMagic));

        let mut bad_magic = state.clone();
        bad_magic[0] = b'X';
        assert_eq!(loadstate(&mut gba, &bad_magic), Err(StateError::BadMagic));

        let mut bad_version = state.clone();
        bad_version[4] = 0xFF;
        assert_eq!(
            loadstate(&mut gba, &bad_version),
            Err(StateError::BadVersion)
        );

        state.push(0);
        assert_eq!(loadstate(&mut gba, &state), Err(StateError::BadLength));
    }

    #[test]
    fn test_scheduler_entries_survive() {
        let mut gba = loaded_gba();
        let mut expected: Vec<_> = gba
            .scheduler
            .entries()
            .map(|(id, time, _)| (id as u8, time))
            .collect();
        assert!(!expected.is_empty());

        let state = savestate(&gba);
        let mut other = loaded_gba();
        loadstate(&mut other, &state).unwrap();

        let mut after: Vec<_> = other
            .scheduler
            .entries()
            .map(|(id, time, _)| (id as u8, time))
            .collect();
        after.sort();
        expected.sort();
        assert_eq!(after, expected);
    }

    #[test]
    fn test_backup_state_survives() {
        let mut gba = Gba::new();
        let mut rom = vec![0u8; 0x400];
        rom[0xB2] = 0x96;
        rom.extend_from_slice(b"SRAM_V113");
        gba.loadrom(&rom).unwrap();

        if let crate::backup::Backup::Sram(ref mut sram) = gba.backup {
            sram.write(0x10, 0x77);
        }

        let state = savestate(&gba);
        let mut other = Gba::new();
        other.loadrom(&rom).unwrap();
        loadstate(&mut other, &state).unwrap();

        if let crate::backup::Backup::Sram(ref sram) = other.backup {
            assert_eq!(sram.read(0x10), 0x77);
        } else {
            panic!("expected sram backup");
        }
    }
}
