//! The four 16-bit timers.
//!
//! An enabled, non-cascade timer never counts in place: its next
//! overflow is computed as `(0x10000 - counter) * prescaler` cycles and
//! registered with the scheduler, and reads derive the live counter
//! back from the event deadline. A cascade timer has no event of its
//! own; it advances only when the timer below overflows.
//!
//! Timers 0 and 1 notify the APU on overflow so the FIFO channels can
//! drain at their programmed sample rate.

use crate::apu;
use crate::bit;
use crate::cpu::{self, Interrupt};
use crate::gba::Gba;
use crate::memory::reg;
use crate::scheduler::Event;

const PRESCALER_TABLE: [u16; 4] = [1, 64, 256, 1024];

const EVENTS: [Event; 4] = [Event::Timer0, Event::Timer1, Event::Timer2, Event::Timer3];

const INTERRUPTS: [Interrupt; 4] = [
    Interrupt::Timer0,
    Interrupt::Timer1,
    Interrupt::Timer2,
    Interrupt::Timer3,
];

const CNT_REGS: [u32; 4] = [reg::TM0CNT, reg::TM1CNT, reg::TM2CNT, reg::TM3CNT];

pub struct Timer {
    pub counter: u16,
    pub reload: u16,
    /// Prescaler in cycles per tick: 1, 64, 256 or 1024.
    pub freq: u16,
    pub cascade: bool,
    pub irq: bool,
    pub enabled: bool,
    /// Cycles between the enable edge and the first tick. Hardware
    /// measures ~2; kept adjustable for timing-sensitive test ROMs.
    pub start_delay: i32,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            counter: 0,
            reload: 0,
            freq: 1,
            cascade: false,
            irq: false,
            enabled: false,
            start_delay: 2,
        }
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

fn num_from_event(id: Event) -> usize {
    match id {
        Event::Timer0 => 0,
        Event::Timer1 => 1,
        Event::Timer2 => 2,
        _ => 3,
    }
}

/// Derive the live counter of a scheduled timer from its deadline.
fn read_from_scheduler(gba: &Gba, num: usize) -> u16 {
    let timer = &gba.timer[num];
    let deadline = gba.scheduler.event_cycles_absolute(EVENTS[num]);
    let delta = (gba.scheduler.ticks() - deadline) / timer.freq as i32;

    // a timer read within the start delay still shows the reload value
    if delta < timer.counter as i32 - 0x10000 {
        timer.counter
    } else {
        delta as u16
    }
}

/// Register the next overflow. `offset` shifts the deadline: positive
/// for the enable delay, negative to absorb callback lateness.
fn add_event(gba: &mut Gba, num: usize, offset: i32) {
    let timer = &gba.timer[num];

    // cascade timers are clocked by the timer below, not the scheduler
    if num != 0 && timer.cascade {
        return;
    }

    let cycles = (0x10000 - timer.counter as i32) * timer.freq as i32 + offset;
    gba.scheduler.add(EVENTS[num], cycles, on_timer_event);
}

fn on_overflow(gba: &mut Gba, num: usize, late: i32) {
    gba.timer[num].counter = gba.timer[num].reload;

    // timers 0 and 1 drive the audio FIFOs
    if num < 2 {
        apu::on_timer_overflow(gba, num);
    }

    // an overflow clocks the cascade timer above, if armed
    if num < 3 {
        let above = &mut gba.timer[num + 1];
        if above.enabled && above.cascade {
            above.counter = above.counter.wrapping_add(1);
            if above.counter == 0 {
                on_overflow(gba, num + 1, 0);
            }
        }
    }

    if gba.timer[num].irq {
        cpu::fire_interrupt(gba, INTERRUPTS[num]);
    }

    add_event(gba, num, -late);
}

pub fn on_timer_event(gba: &mut Gba, id: Event, late: i32) {
    on_overflow(gba, num_from_event(id), late);
}

/// TMxCNT write side effect.
pub fn on_cnt_write(gba: &mut Gba, num: usize) {
    let cnt = gba.mem.ioreg(CNT_REGS[num]);

    let freq = PRESCALER_TABLE[bit::get_range16(cnt, 0, 1) as usize];
    let cascade = bit::is_set(cnt as u32, 2);
    let irq = bit::is_set(cnt as u32, 6);
    let enable = bit::is_set(cnt as u32, 7);

    let was_enabled = gba.timer[num].enabled;

    {
        let timer = &mut gba.timer[num];
        timer.freq = freq;
        timer.cascade = cascade;
        timer.irq = irq;
        timer.enabled = enable;
    }

    if !was_enabled && enable {
        gba.timer[num].counter = gba.timer[num].reload;
    } else if was_enabled && !enable {
        // freeze the live counter before dropping the event
        if num == 0 || !cascade {
            if gba.scheduler.has_event(EVENTS[num]) {
                gba.timer[num].counter = read_from_scheduler(gba, num);
            }
        }
        gba.scheduler.remove(EVENTS[num]);
        return;
    }

    if enable {
        let delay = gba.timer[num].start_delay;
        gba.scheduler.remove(EVENTS[num]);
        add_event(gba, num, delay);
    }
}

/// TMxD write stores the reload; a disabled timer shows it immediately.
pub fn write_reload(gba: &mut Gba, num: usize, value: u16) {
    gba.timer[num].reload = value;
    if !gba.timer[num].enabled {
        gba.timer[num].counter = value;
    }
}

/// TMxD read.
pub fn read_timer(gba: &mut Gba, num: usize) -> u16 {
    if !gba.timer[num].enabled {
        gba.timer[num].counter
    } else if gba.timer[num].cascade {
        // flush pending overflows of the driving timer first
        crate::scheduler::fire(gba);
        gba.timer[num].counter
    } else {
        read_from_scheduler(gba, num)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gba::Gba;
    use crate::scheduler;

    fn enable_timer(gba: &mut Gba, num: usize, reload: u16, cnt: u16) {
        write_reload(gba, num, reload);
        gba.mem.set_ioreg(CNT_REGS[num], cnt | 0x80);
        on_cnt_write(gba, num);
    }

    #[test]
    fn test_overflow_period() {
        let mut gba = Gba::new();
        // reload 0xFF80, prescaler 64: overflow every 0x80 * 64 cycles
        enable_timer(&mut gba, 0, 0xFF80, 0b01);

        let expected = 0x80 * 64;
        assert_eq!(
            gba.scheduler.event_cycles(Event::Timer0),
            expected + gba.timer[0].start_delay
        );

        // run to the overflow; the next period must be exact
        gba.scheduler.tick(expected + gba.timer[0].start_delay);
        scheduler::fire(&mut gba);
        assert_eq!(gba.scheduler.event_cycles(Event::Timer0), expected);
    }

    #[test]
    fn test_overflow_fires_irq() {
        let mut gba = Gba::new();
        enable_timer(&mut gba, 0, 0xFFFF, 0x40); // irq bit

        gba.scheduler.tick(1 + gba.timer[0].start_delay);
        scheduler::fire(&mut gba);

        assert_eq!(
            gba.mem.ioreg(reg::IF) & Interrupt::Timer0 as u16,
            Interrupt::Timer0 as u16
        );
    }

    #[test]
    fn test_scheduled_read() {
        let mut gba = Gba::new();
        enable_timer(&mut gba, 0, 0x1000, 0b00); // prescaler 1

        gba.scheduler.tick(0x500 + gba.timer[0].start_delay);
        assert_eq!(read_timer(&mut gba, 0), 0x1500);
    }

    #[test]
    fn test_read_within_start_delay() {
        let mut gba = Gba::new();
        enable_timer(&mut gba, 0, 0x1234, 0b00);
        // no cycles elapsed: still shows the reload
        assert_eq!(read_timer(&mut gba, 0), 0x1234);
    }

    #[test]
    fn test_disable_freezes_counter() {
        let mut gba = Gba::new();
        enable_timer(&mut gba, 0, 0, 0b00);
        gba.scheduler.tick(0x100 + gba.timer[0].start_delay);

        gba.mem.set_ioreg(CNT_REGS[0], 0);
        on_cnt_write(&mut gba, 0);

        assert!(!gba.scheduler.has_event(Event::Timer0));
        assert_eq!(gba.timer[0].counter, 0x100);
        assert_eq!(read_timer(&mut gba, 0), 0x100);
    }

    #[test]
    fn test_cascade_ticks_on_lower_overflow() {
        let mut gba = Gba::new();
        // timer 1 cascades on timer 0
        write_reload(&mut gba, 1, 0);
        gba.mem.set_ioreg(CNT_REGS[1], 0x80 | 0b100);
        on_cnt_write(&mut gba, 1);
        assert!(!gba.scheduler.has_event(Event::Timer1));

        enable_timer(&mut gba, 0, 0xFFFF, 0b00);
        gba.scheduler.tick(1 + gba.timer[0].start_delay);
        scheduler::fire(&mut gba);

        assert_eq!(gba.timer[1].counter, 1);
    }

    #[test]
    fn test_cascade_overflow_chains_irq() {
        let mut gba = Gba::new();
        write_reload(&mut gba, 1, 0xFFFF);
        gba.mem.set_ioreg(CNT_REGS[1], 0x80 | 0x40 | 0b100);
        on_cnt_write(&mut gba, 1);

        enable_timer(&mut gba, 0, 0xFFFF, 0b00);
        gba.scheduler.tick(1 + gba.timer[0].start_delay);
        scheduler::fire(&mut gba);

        assert_eq!(
            gba.mem.ioreg(reg::IF) & Interrupt::Timer1 as u16,
            Interrupt::Timer1 as u16
        );
    }

    #[test]
    fn test_reload_write_while_disabled() {
        let mut gba = Gba::new();
        write_reload(&mut gba, 2, 0xBEEF);
        assert_eq!(read_timer(&mut gba, 2), 0xBEEF);
    }
}
