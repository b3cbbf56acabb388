use super::slot::{FiberFlags, FiberState, Slot};
use super::{FiberHandle, FiberId, IDLE_SLOT, MAIN_SLOT};

/// The fixed-capacity fiber table: the single owner of every fiber slot.
///
/// Capacity is fixed at construction (`spawn` asserts rather than growing
/// the table) because the scheduler hands out raw slot indices as part of
/// [`FiberId`], and those must remain valid addresses into a stable array
/// for the table's lifetime.
pub struct Table {
    slots: Vec<Slot>,
    free: Vec<usize>,
    slot_bits: u32,
    /// Running totals per state, kept in lockstep with `slots[i].state` so
    /// that `sum(histogram) == slots.len()` always holds.
    histogram: [usize; 6],
}

fn state_index(state: FiberState) -> usize {
    match state {
        FiberState::None => 0,
        FiberState::Starting => 1,
        FiberState::Scheduled => 2,
        FiberState::Running => 3,
        FiberState::Sleeping => 4,
        FiberState::Done => 5,
    }
}

impl Table {
    pub fn new(num_fibers: usize) -> Self {
        assert!(num_fibers >= 2, "a reactor needs at least the main and idle fibers");
        let slot_bits = FiberId::slot_bits(num_fibers);
        let mut slots = Vec::with_capacity(num_fibers);
        for _ in 0..num_fibers {
            slots.push(Slot::free());
        }
        // Slots 0 and 1 are the special main/idle fibers: never freed,
        // never reincarnated, always present.
        slots[MAIN_SLOT].flags |= FiberFlags::SPECIAL;
        slots[IDLE_SLOT].flags |= FiberFlags::SPECIAL;
        slots[MAIN_SLOT].state = FiberState::Running;
        slots[IDLE_SLOT].state = FiberState::Scheduled;

        let free = (2..num_fibers).rev().collect();

        let mut histogram = [0usize; 6];
        histogram[state_index(FiberState::Running)] += 1;
        histogram[state_index(FiberState::Scheduled)] += 1;
        histogram[state_index(FiberState::None)] += num_fibers - 2;

        Self { slots, free, slot_bits, histogram }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn slot(&self, index: usize) -> &Slot {
        &self.slots[index]
    }

    pub(crate) fn slot_mut(&mut self, index: usize) -> &mut Slot {
        &mut self.slots[index]
    }

    /// Handle for the given slot, reflecting its *current* incarnation.
    pub(crate) fn handle_for(&self, index: usize) -> FiberHandle {
        let incarnation = self.slots[index].incarnation;
        FiberHandle::new(FiberId::new(index, incarnation, self.slot_bits), index, incarnation)
    }

    fn set_state(&mut self, index: usize, state: FiberState) {
        let old = self.slots[index].state;
        if old == state {
            return;
        }
        self.histogram[state_index(old)] -= 1;
        self.histogram[state_index(state)] += 1;
        self.slots[index].state = state;
    }

    /// `None -> Starting`: allocates a slot and installs the closure. The
    /// caller is responsible for appending the returned index to the
    /// ready queue (mirrors `spawn`'s "with `resume_fiber` appended to
    /// ready" step).
    ///
    /// # Panics
    /// If the free pool is exhausted — an exhausted fiber pool is a fatal
    /// programming error, not a recoverable one.
    pub fn spawn(&mut self, body: Box<dyn FnOnce() + 'static>) -> usize {
        let index = self.free.pop().expect("fiber table exhausted: no free slots");
        let slot = &mut self.slots[index];
        debug_assert!(slot.is_free());
        slot.entry = Some(body);
        slot.flags |= FiberFlags::CALLBACK_SET;
        self.set_state(index, FiberState::Starting);
        self.slots[index].flags |= FiberFlags::SCHEDULED;
        self.set_state(index, FiberState::Scheduled);
        index
    }

    pub fn transition_running(&mut self, index: usize) {
        self.slots[index].flags.remove(FiberFlags::SCHEDULED);
        self.set_state(index, FiberState::Running);
    }

    pub fn transition_sleeping(&mut self, index: usize) {
        self.set_state(index, FiberState::Sleeping);
    }

    pub fn transition_scheduled(&mut self, index: usize) {
        self.slots[index].flags.insert(FiberFlags::SCHEDULED);
        self.set_state(index, FiberState::Scheduled);
    }

    /// `Running -> Done`. The slot is left in place (stack, panic payload
    /// and all) until [`finish_and_recycle`](Self::finish_and_recycle)
    /// is called, so that a joiner has something to read.
    pub fn transition_done(&mut self, index: usize) {
        self.set_state(index, FiberState::Done);
    }

    /// `Done -> None`: recycles the slot, bumping its incarnation so that
    /// outstanding handles become invalid.
    pub fn finish_and_recycle(&mut self, index: usize) {
        let slot = &mut self.slots[index];
        slot.entry = None;
        slot.stack = None;
        slot.sp = 0;
        slot.pending_exception = None;
        slot.panic = None;
        slot.flags = FiberFlags::empty();
        slot.incarnation = slot.incarnation.wrapping_add(1);
        self.set_state(index, FiberState::None);
        if index != MAIN_SLOT && index != IDLE_SLOT {
            self.free.push(index);
        }
    }

    /// External view of a slot's state: `Scheduled` is reported whenever
    /// the raw state is `Sleeping` but `SCHEDULED` is set, matching
    /// `getFiberState`'s documented behavior.
    pub fn fiber_state(&self, handle: FiberHandle) -> FiberState {
        let Some(index) = self.resolve(handle) else {
            return FiberState::None;
        };
        let slot = &self.slots[index];
        if slot.state == FiberState::Sleeping && slot.flags.contains(FiberFlags::SCHEDULED) {
            FiberState::Scheduled
        } else {
            slot.state
        }
    }

    /// Resolves a handle to a live slot index, or `None` if the slot is
    /// free or has since been reincarnated.
    pub fn resolve(&self, handle: FiberHandle) -> Option<usize> {
        let slot = self.slots.get(handle.slot_index)?;
        if slot.is_free() || slot.incarnation != handle.incarnation {
            return None;
        }
        Some(handle.slot_index)
    }

    pub fn histogram(&self) -> [usize; 6] {
        self.histogram
    }

    #[cfg(test)]
    pub(crate) fn count_state(&self, state: FiberState) -> usize {
        self.histogram[state_index(state)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn histogram_sums_to_capacity() {
        let mut table = Table::new(8);
        let idx = table.spawn(Box::new(|| {}));
        assert_eq!(table.histogram().iter().sum::<usize>(), 8);
        table.transition_running(idx);
        assert_eq!(table.histogram().iter().sum::<usize>(), 8);
        table.finish_and_recycle(idx);
        assert_eq!(table.histogram().iter().sum::<usize>(), 8);
    }

    #[test]
    fn handle_invalid_after_recycle() {
        let mut table = Table::new(8);
        let idx = table.spawn(Box::new(|| {}));
        let handle = table.handle_for(idx);
        assert!(table.resolve(handle).is_some());
        table.finish_and_recycle(idx);
        assert!(table.resolve(handle).is_none());
    }

    #[test]
    fn slot_bits_cover_capacity() {
        assert_eq!(FiberId::slot_bits(2), 1);
        assert_eq!(FiberId::slot_bits(256), 8);
        assert_eq!(FiberId::slot_bits(257), 9);
    }
}
