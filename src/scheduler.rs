//! Cooperative event scheduler.
//!
//! Every timed subsystem (PPU periods, timers, APU channels, DMA,
//! interrupt delivery, the frame-end sentinel) registers events here.
//! The CPU is the only driver of time: each instruction reports its cost
//! via `tick`, and due events fire between instructions.
//!
//! The queue is a binary min-heap keyed on `(deadline, insertion seq)`,
//! so events at equal deadlines fire in the order they were added. There
//! is at most one live entry per event id; re-adding an id updates it in
//! place and removal is idempotent.
//!
//! The clock is a signed 32-bit cycle counter. A reserved rebase event
//! fires every `REBASE_CYCLES` and subtracts that constant from the
//! clock and every pending deadline, which keeps the counter from
//! overflowing without disturbing relative order.

use crate::gba::Gba;

/// Callback invoked when an event expires. `lateness` is
/// `clock - deadline` and is always non-negative; subsystems that re-arm
/// themselves must subtract it from their next interval to keep their
/// average period.
pub type Callback = fn(&mut Gba, Event, i32);

/// Cycles between rebase events. Also the amount subtracted on rebase.
pub const REBASE_CYCLES: i32 = 1 << 30;

/// Event identifiers. One slot per component instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Event {
    Ppu = 0,
    ApuSquare0 = 1,
    ApuSquare1 = 2,
    ApuWave = 3,
    ApuNoise = 4,
    ApuFrameSequencer = 5,
    ApuSample = 6,
    Timer0 = 7,
    Timer1 = 8,
    Timer2 = 9,
    Timer3 = 10,
    Dma = 11,
    Interrupt = 12,
    FrameEnd = 13,
    Rebase = 14,
}

/// Number of distinct event ids.
pub const EVENT_COUNT: usize = 15;

impl Event {
    pub fn from_index(index: u8) -> Option<Event> {
        match index {
            0 => Some(Event::Ppu),
            1 => Some(Event::ApuSquare0),
            2 => Some(Event::ApuSquare1),
            3 => Some(Event::ApuWave),
            4 => Some(Event::ApuNoise),
            5 => Some(Event::ApuFrameSequencer),
            6 => Some(Event::ApuSample),
            7 => Some(Event::Timer0),
            8 => Some(Event::Timer1),
            9 => Some(Event::Timer2),
            10 => Some(Event::Timer3),
            11 => Some(Event::Dma),
            12 => Some(Event::Interrupt),
            13 => Some(Event::FrameEnd),
            14 => Some(Event::Rebase),
            _ => None,
        }
    }
}

#[derive(Clone, Copy)]
struct Entry {
    /// Absolute deadline on the scheduler clock.
    time: i32,
    /// Insertion order, used to break deadline ties.
    seq: u64,
    id: Event,
    callback: Callback,
}

impl Entry {
    #[inline]
    fn key(&self) -> (i32, u64) {
        (self.time, self.seq)
    }
}

/// Min-heap event queue plus the global cycle clock.
pub struct Scheduler {
    queue: Vec<Entry>,
    cycles: i32,
    next_seq: u64,
    /// Set by the frame-end sentinel; cleared by `Gba::run`.
    pub frame_end: bool,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            queue: Vec::with_capacity(EVENT_COUNT),
            cycles: 0,
            next_seq: 0,
            frame_end: false,
        }
    }

    /// Clear the queue and clock, then arm the rebase event.
    pub fn reset(&mut self) {
        self.queue.clear();
        self.cycles = 0;
        self.next_seq = 0;
        self.frame_end = false;
        self.add(Event::Rebase, REBASE_CYCLES, on_rebase_event);
    }

    /// Current time on the scheduler clock. Absolute values are opaque
    /// to consumers: rebase shifts them.
    #[inline]
    pub fn ticks(&self) -> i32 {
        self.cycles
    }

    /// Advance the clock.
    #[inline]
    pub fn tick(&mut self, cycles: i32) {
        self.cycles += cycles;
    }

    /// Add or update an event `cycles_from_now` ahead of the clock.
    pub fn add(&mut self, id: Event, cycles_from_now: i32, callback: Callback) {
        self.add_absolute(id, self.cycles + cycles_from_now, callback);
    }

    /// Add or update an event with an absolute deadline.
    pub fn add_absolute(&mut self, id: Event, time: i32, callback: Callback) {
        self.remove(id);
        let seq = self.next_seq;
        self.next_seq += 1;
        self.push(Entry {
            time,
            seq,
            id,
            callback,
        });
    }

    /// Remove an event. Does nothing if the id is not queued.
    pub fn remove(&mut self, id: Event) {
        if let Some(pos) = self.queue.iter().position(|e| e.id == id) {
            let last = self.queue.len() - 1;
            self.queue.swap(pos, last);
            self.queue.pop();
            if pos < self.queue.len() {
                self.sift_down(pos);
                self.sift_up(pos);
            }
        }
    }

    /// True if an event with this id is queued.
    pub fn has_event(&self, id: Event) -> bool {
        self.queue.iter().any(|e| e.id == id)
    }

    /// Cycles until the event fires, or 0 if not queued.
    pub fn event_cycles(&self, id: Event) -> i32 {
        self.queue
            .iter()
            .find(|e| e.id == id)
            .map_or(0, |e| e.time - self.cycles)
    }

    /// Absolute deadline of the event, or 0 if not queued.
    pub fn event_cycles_absolute(&self, id: Event) -> i32 {
        self.queue.iter().find(|e| e.id == id).map_or(0, |e| e.time)
    }

    /// Cycles until the earliest event, or 0 if the queue is empty.
    pub fn next_event_cycles(&self) -> i32 {
        self.queue.first().map_or(0, |e| e.time - self.cycles)
    }

    /// True if the earliest event is due.
    #[inline]
    pub fn should_fire(&self) -> bool {
        match self.queue.first() {
            Some(e) => e.time <= self.cycles,
            None => false,
        }
    }

    /// Jump the clock forward to the earliest deadline, if it is in the
    /// future. Used by the halted-CPU fast-forward loop.
    pub fn advance_to_next_event(&mut self) {
        if let Some(e) = self.queue.first() {
            if e.time > self.cycles {
                self.cycles = e.time;
            }
        }
    }

    fn pop_due(&mut self) -> Option<Entry> {
        match self.queue.first() {
            Some(e) if e.time <= self.cycles => {}
            _ => return None,
        }
        let last = self.queue.len() - 1;
        self.queue.swap(0, last);
        let entry = self.queue.pop();
        if !self.queue.is_empty() {
            self.sift_down(0);
        }
        entry
    }

    fn push(&mut self, entry: Entry) {
        self.queue.push(entry);
        self.sift_up(self.queue.len() - 1);
    }

    fn sift_up(&mut self, mut pos: usize) {
        while pos > 0 {
            let parent = (pos - 1) / 2;
            if self.queue[pos].key() < self.queue[parent].key() {
                self.queue.swap(pos, parent);
                pos = parent;
            } else {
                break;
            }
        }
    }

    fn sift_down(&mut self, mut pos: usize) {
        let len = self.queue.len();
        loop {
            let left = pos * 2 + 1;
            let right = pos * 2 + 2;
            let mut smallest = pos;
            if left < len && self.queue[left].key() < self.queue[smallest].key() {
                smallest = left;
            }
            if right < len && self.queue[right].key() < self.queue[smallest].key() {
                smallest = right;
            }
            if smallest == pos {
                break;
            }
            self.queue.swap(pos, smallest);
            pos = smallest;
        }
    }

    /// Iterate queued `(id, absolute deadline, insertion seq)` triples,
    /// for save states. Persisting entries in `(deadline, seq)` order
    /// keeps equal-deadline firing order stable across a restore.
    pub fn entries(&self) -> impl Iterator<Item = (Event, i32, u64)> + '_ {
        self.queue.iter().map(|e| (e.id, e.time, e.seq))
    }

    /// Restore an entry from a save state with its callback re-bound.
    pub fn restore(&mut self, id: Event, time: i32, callback: Callback) {
        self.add_absolute(id, time, callback);
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// Fire all due events, in `(deadline, insertion)` order. A callback may
/// add or remove events, including re-arming its own id.
pub fn fire(gba: &mut Gba) {
    while let Some(entry) = gba.scheduler.pop_due() {
        let late = gba.scheduler.cycles - entry.time;
        (entry.callback)(gba, entry.id, late);
    }
}

/// Rebase: shift the clock and every pending deadline down by
/// `REBASE_CYCLES`. Relative order is untouched, so no re-heapify.
pub fn on_rebase_event(gba: &mut Gba, _id: Event, _late: i32) {
    let sched = &mut gba.scheduler;
    sched.cycles -= REBASE_CYCLES;
    for entry in &mut sched.queue {
        entry.time -= REBASE_CYCLES;
    }
    sched.add(Event::Rebase, REBASE_CYCLES, on_rebase_event);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gba::Gba;

    fn nop(_: &mut Gba, _: Event, _: i32) {}

    #[test]
    fn test_new_scheduler_empty() {
        let sched = Scheduler::new();
        assert_eq!(sched.ticks(), 0);
        assert!(!sched.has_event(Event::Timer0));
        assert!(!sched.should_fire());
    }

    #[test]
    fn test_add_and_query() {
        let mut sched = Scheduler::new();
        sched.add(Event::Timer0, 100, nop);
        assert!(sched.has_event(Event::Timer0));
        assert_eq!(sched.event_cycles(Event::Timer0), 100);
        assert_eq!(sched.next_event_cycles(), 100);
        assert!(!sched.should_fire());

        sched.tick(100);
        assert!(sched.should_fire());
    }

    #[test]
    fn test_re_add_updates_in_place() {
        let mut sched = Scheduler::new();
        sched.add(Event::Timer0, 100, nop);
        sched.add(Event::Timer0, 50, nop);
        assert_eq!(sched.event_cycles(Event::Timer0), 50);
        // still only one entry
        assert_eq!(sched.entries().count(), 1);
    }

    #[test]
    fn test_remove_idempotent() {
        let mut sched = Scheduler::new();
        sched.add(Event::Timer0, 100, nop);
        sched.remove(Event::Timer0);
        assert!(!sched.has_event(Event::Timer0));
        sched.remove(Event::Timer0);
        assert!(!sched.has_event(Event::Timer0));
    }

    #[test]
    fn test_heap_ordering() {
        let mut sched = Scheduler::new();
        sched.add(Event::Timer2, 300, nop);
        sched.add(Event::Timer0, 100, nop);
        sched.add(Event::Timer1, 200, nop);
        assert_eq!(sched.next_event_cycles(), 100);
        sched.remove(Event::Timer0);
        assert_eq!(sched.next_event_cycles(), 200);
    }

    #[test]
    fn test_equal_deadlines_fire_in_insertion_order() {
        let mut gba = Gba::new();
        fn record_a(gba: &mut Gba, _: Event, _: i32) {
            gba.mem.ewram[0] = 1;
            gba.mem.ewram[1] = gba.mem.ewram[0] + gba.mem.ewram[2];
        }
        fn record_b(gba: &mut Gba, _: Event, _: i32) {
            gba.mem.ewram[2] = 2;
        }
        // b added first at the same deadline, must fire first
        gba.scheduler.add(Event::Timer1, 10, record_b);
        gba.scheduler.add(Event::Timer0, 10, record_a);
        gba.scheduler.tick(10);
        fire(&mut gba);
        // record_a saw record_b's store
        assert_eq!(gba.mem.ewram[1], 3);
    }

    #[test]
    fn test_lateness_reported() {
        let mut gba = Gba::new();
        fn check(gba: &mut Gba, _: Event, late: i32) {
            gba.mem.ewram[0] = late as u8;
        }
        gba.scheduler.add(Event::Timer0, 10, check);
        gba.scheduler.tick(17);
        fire(&mut gba);
        assert_eq!(gba.mem.ewram[0], 7);
    }

    #[test]
    fn test_callback_can_rearm_itself() {
        let mut gba = Gba::new();
        fn rearm(gba: &mut Gba, id: Event, _: i32) {
            gba.mem.ewram[0] += 1;
            if gba.mem.ewram[0] < 3 {
                gba.scheduler.add(id, 10, rearm);
            }
        }
        gba.scheduler.add(Event::Timer0, 10, rearm);
        for _ in 0..3 {
            gba.scheduler.tick(10);
            fire(&mut gba);
        }
        assert_eq!(gba.mem.ewram[0], 3);
    }

    #[test]
    fn test_rebase_preserves_relative_deadlines() {
        let mut gba = Gba::new();
        gba.scheduler.reset();
        gba.scheduler.add(Event::Timer0, REBASE_CYCLES + 500, nop);
        gba.scheduler.tick(REBASE_CYCLES);
        fire(&mut gba);
        // clock was pulled back, deadline moved with it
        assert_eq!(gba.scheduler.ticks(), 0);
        assert_eq!(gba.scheduler.event_cycles(Event::Timer0), 500);
        // rebase re-armed itself
        assert!(gba.scheduler.has_event(Event::Rebase));
    }
}
