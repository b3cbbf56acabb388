//! Cascading hierarchical timer wheel: four levels of 256 bins each.
//!
//! A near-future timer lives in level 0, where each bin is exactly one
//! tick (one [`ReactorConfig::timer_granularity`](crate::config::ReactorConfig)
//! apart); timers further out live in progressively coarser levels and get
//! cascaded down a level every time the wheel wraps past that level's bin
//! width, at which point their now-precise deadline is re-resolved into a
//! level-0 (or lower) bin. This keeps insert, cancel, and per-tick firing
//! all O(1) amortized regardless of how far out a timer is armed.

use std::time::{Duration, Instant};

const LEVELS: usize = 4;
const SLOTS: usize = 256;
const SLOT_BITS: u32 = 8;
const SLOT_MASK: u64 = (SLOTS as u64) - 1;

fn level_span(level: usize) -> u64 {
    1u64 << (SLOT_BITS as usize * level)
}

struct Entry {
    deadline_tick: u64,
    callback: Option<Box<dyn FnOnce()>>,
    prev: Option<usize>,
    next: Option<usize>,
    level: usize,
    slot: usize,
    generation: u32,
}

/// A handle to an armed timer, returned by [`Timers::register_at`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerId {
    index: usize,
    generation: u32,
}

impl TimerId {
    /// A handle that refers to no timer. `is_valid` is always `false` for
    /// it, and cancelling it is a no-op.
    pub const fn unset() -> Self {
        Self { index: usize::MAX, generation: 0 }
    }

    /// Clears the handle back to the unset state, without cancelling the
    /// timer it used to refer to (call [`cancel`](Self::cancel) first if
    /// that's what's wanted).
    pub fn reset(&mut self) {
        *self = Self::unset();
    }

    /// Whether this handle still refers to an armed, not-yet-fired,
    /// not-yet-cancelled timer in the currently running reactor. `false`
    /// if unset, if the timer already fired or was cancelled, or if
    /// there's no reactor running on this thread to check against.
    pub fn is_valid(&self) -> bool {
        self.index != usize::MAX
            && crate::scheduler::try_with(|s| s.timers.is_valid(*self)).unwrap_or(false)
    }

    /// Cancels the timer this handle refers to, if still armed. A no-op
    /// if unset, already fired, already cancelled, or called with no
    /// reactor running.
    pub fn cancel(&self) {
        if self.index != usize::MAX {
            crate::scheduler::try_with(|s| s.cancel_timer(*self));
        }
    }
}

impl Default for TimerId {
    fn default() -> Self {
        Self::unset()
    }
}

pub(crate) struct Timers {
    granularity: Duration,
    epoch: Instant,
    now_tick: u64,
    wheels: [[Option<usize>; SLOTS]; LEVELS],
    entries: Vec<Entry>,
    free: Vec<usize>,
    count: usize,
}

impl Timers {
    pub(crate) fn new(granularity: Duration, capacity: usize, epoch: Instant) -> Self {
        Self {
            granularity,
            epoch,
            now_tick: 0,
            wheels: [[None; SLOTS]; LEVELS],
            entries: Vec::with_capacity(capacity),
            free: Vec::new(),
            count: 0,
        }
    }

    fn tick_of(&self, instant: Instant) -> u64 {
        let elapsed = instant.saturating_duration_since(self.epoch);
        (elapsed.as_nanos() / self.granularity.as_nanos().max(1)) as u64
    }

    fn level_and_slot_for(&self, tick: u64) -> (usize, usize) {
        let delta = tick.saturating_sub(self.now_tick);
        for level in 0..LEVELS {
            if delta < level_span(level) * (SLOTS as u64) || level == LEVELS - 1 {
                let slot = ((tick >> (SLOT_BITS as usize * level)) & SLOT_MASK) as usize;
                return (level, slot);
            }
        }
        unreachable!()
    }

    fn link(&mut self, index: usize) {
        let (level, slot) = (self.entries[index].level, self.entries[index].slot);
        let head = self.wheels[level][slot];
        self.entries[index].next = head;
        self.entries[index].prev = None;
        if let Some(h) = head {
            self.entries[h].prev = Some(index);
        }
        self.wheels[level][slot] = Some(index);
    }

    fn unlink(&mut self, index: usize) {
        let (level, slot, prev, next) = {
            let e = &self.entries[index];
            (e.level, e.slot, e.prev, e.next)
        };
        match prev {
            Some(p) => self.entries[p].next = next,
            None => self.wheels[level][slot] = next,
        }
        if let Some(n) = next {
            self.entries[n].prev = prev;
        }
    }

    /// Arms a one-shot timer that fires no earlier than `deadline`.
    pub(crate) fn register_at(
        &mut self,
        deadline: Instant,
        callback: impl FnOnce() + 'static,
    ) -> TimerId {
        let tick = self.tick_of(deadline).max(self.now_tick + 1);
        let (level, slot) = self.level_and_slot_for(tick);

        let index = if let Some(i) = self.free.pop() {
            i
        } else {
            self.entries.push(Entry {
                deadline_tick: 0,
                callback: None,
                prev: None,
                next: None,
                level: 0,
                slot: 0,
                generation: 0,
            });
            self.entries.len() - 1
        };

        let generation = self.entries[index].generation;
        self.entries[index] = Entry {
            deadline_tick: tick,
            callback: Some(Box::new(callback)),
            prev: None,
            next: None,
            level,
            slot,
            generation,
        };
        self.link(index);
        self.count += 1;
        TimerId { index, generation }
    }

    /// Whether `id` still refers to an armed, not-yet-fired timer.
    pub(crate) fn is_valid(&self, id: TimerId) -> bool {
        self.entries
            .get(id.index)
            .is_some_and(|e| e.generation == id.generation && e.callback.is_some())
    }

    /// Cancels a previously-armed timer. A no-op if it has already fired
    /// or was already cancelled (cancel is always safe to call twice).
    pub(crate) fn cancel(&mut self, id: TimerId) {
        if let Some(entry) = self.entries.get(id.index) {
            if entry.generation != id.generation || entry.callback.is_none() {
                return;
            }
        } else {
            return;
        }
        self.unlink(id.index);
        self.entries[id.index].generation = self.entries[id.index].generation.wrapping_add(1);
        self.entries[id.index].callback = None;
        self.free.push(id.index);
        self.count -= 1;
    }

    fn cascade(&mut self, level: usize) {
        let slot = ((self.now_tick >> (SLOT_BITS as usize * level)) & SLOT_MASK) as usize;
        let mut current = self.wheels[level][slot].take();
        while let Some(index) = current {
            current = self.entries[index].next;
            let tick = self.entries[index].deadline_tick;
            let (new_level, new_slot) = self.level_and_slot_for(tick);
            self.entries[index].level = new_level;
            self.entries[index].slot = new_slot;
            self.link(index);
        }
    }

    /// Advances the wheel to `now`, returning every callback whose deadline
    /// has been reached, in no particular cross-tick order (callers invoke
    /// them after re-borrowing the scheduler, not from inside this call).
    pub(crate) fn advance_and_fire(&mut self, now: Instant) -> Vec<Box<dyn FnOnce()>> {
        let target = self.tick_of(now);
        let mut fired = Vec::new();
        while self.now_tick < target {
            self.now_tick += 1;
            for level in 1..LEVELS {
                if self.now_tick % level_span(level) == 0 {
                    self.cascade(level);
                }
            }
            let slot = (self.now_tick & SLOT_MASK) as usize;
            let mut current = self.wheels[0][slot].take();
            while let Some(index) = current {
                current = self.entries[index].next;
                if let Some(cb) = self.entries[index].callback.take() {
                    fired.push(cb);
                }
                self.entries[index].generation = self.entries[index].generation.wrapping_add(1);
                self.free.push(index);
                self.count -= 1;
            }
        }
        fired
    }

    /// How long until the nearest armed timer fires, for the poller to use
    /// as its wait timeout. `None` means no timers are armed.
    pub(crate) fn time_till_next(&self, now: Instant) -> Option<Duration> {
        if self.count == 0 {
            return None;
        }
        let mut nearest: Option<u64> = None;
        'levels: for level in 0..LEVELS {
            for offset in 0..SLOTS {
                let slot = if level == 0 {
                    ((self.now_tick + offset as u64) & SLOT_MASK) as usize
                } else {
                    // Coarser levels: scan every bin; exact ordering within
                    // a bin is resolved once it cascades down.
                    offset
                };
                if let Some(index) = self.wheels[level][slot] {
                    let mut node = Some(index);
                    while let Some(i) = node {
                        let tick = self.entries[i].deadline_tick;
                        nearest = Some(nearest.map_or(tick, |n| n.min(tick)));
                        node = self.entries[i].next;
                    }
                    if level == 0 {
                        break 'levels;
                    }
                }
            }
        }
        let tick = nearest?;
        let target_nanos = tick.saturating_mul(self.granularity.as_nanos().max(1) as u64);
        let target = self.epoch + Duration::from_nanos(target_nanos);
        Some(target.saturating_duration_since(now))
    }

    pub(crate) fn len(&self) -> usize {
        self.count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn fires_in_deadline_order_across_levels() {
        let epoch = Instant::now();
        let mut timers = Timers::new(Duration::from_millis(1), 64, epoch);
        let order = Rc::new(RefCell::new(Vec::new()));

        let far = order.clone();
        timers.register_at(epoch + Duration::from_millis(5000), move || far.borrow_mut().push("far"));
        let near = order.clone();
        timers.register_at(epoch + Duration::from_millis(10), move || near.borrow_mut().push("near"));
        let mid = order.clone();
        timers.register_at(epoch + Duration::from_millis(300), move || mid.borrow_mut().push("mid"));

        let mut fired = timers.advance_and_fire(epoch + Duration::from_millis(10));
        for cb in fired.drain(..) {
            cb();
        }
        assert_eq!(*order.borrow(), vec!["near"]);

        let mut fired = timers.advance_and_fire(epoch + Duration::from_millis(300));
        for cb in fired.drain(..) {
            cb();
        }
        assert_eq!(*order.borrow(), vec!["near", "mid"]);

        let mut fired = timers.advance_and_fire(epoch + Duration::from_millis(5000));
        for cb in fired.drain(..) {
            cb();
        }
        assert_eq!(*order.borrow(), vec!["near", "mid", "far"]);
    }

    #[test]
    fn cancel_prevents_firing() {
        let epoch = Instant::now();
        let mut timers = Timers::new(Duration::from_millis(1), 8, epoch);
        let fired = Rc::new(RefCell::new(false));
        let f = fired.clone();
        let id = timers.register_at(epoch + Duration::from_millis(50), move || *f.borrow_mut() = true);
        timers.cancel(id);
        let callbacks = timers.advance_and_fire(epoch + Duration::from_millis(50));
        assert!(callbacks.is_empty());
        assert!(!*fired.borrow());
    }
}
