//! Timer slots driven by the session engine.
//!
//! A session has at most three pending timers: the progress sampler, the
//! phase-advance timer and the duration tick. Each lives in its own slot,
//! tagged with the epoch of the session that armed it. Cancelling is just
//! clearing the slot.

/// The three timer activities of a session
///
/// Declaration order is the firing order for equal deadlines: a phase's last
/// progress sample lands before the advance, and the advance before the
/// duration check.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum TimerKind {
    Sampler,
    Advance,
    Tick,
}

/// A timer taken out of its slot because it came due
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Fired {
    pub kind: TimerKind,
    pub deadline: u64,
    pub epoch: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Armed {
    deadline: u64,
    epoch: u64,
}

#[derive(Clone, Debug, Default)]
pub struct TimerSlots {
    sampler: Option<Armed>,
    advance: Option<Armed>,
    tick: Option<Armed>,
}

impl TimerSlots {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, kind: TimerKind) -> &Option<Armed> {
        match kind {
            TimerKind::Sampler => &self.sampler,
            TimerKind::Advance => &self.advance,
            TimerKind::Tick => &self.tick,
        }
    }

    fn slot_mut(&mut self, kind: TimerKind) -> &mut Option<Armed> {
        match kind {
            TimerKind::Sampler => &mut self.sampler,
            TimerKind::Advance => &mut self.advance,
            TimerKind::Tick => &mut self.tick,
        }
    }

    /// Arm (or re-arm) a slot, replacing whatever was pending there
    pub fn arm(&mut self, kind: TimerKind, deadline: u64, epoch: u64) {
        *self.slot_mut(kind) = Some(Armed { deadline, epoch });
    }

    pub fn cancel(&mut self, kind: TimerKind) {
        *self.slot_mut(kind) = None;
    }

    pub fn cancel_all(&mut self) {
        self.sampler = None;
        self.advance = None;
        self.tick = None;
    }

    pub fn is_armed(&self, kind: TimerKind) -> bool {
        self.slot(kind).is_some()
    }

    pub fn deadline(&self, kind: TimerKind) -> Option<u64> {
        self.slot(kind).map(|armed| armed.deadline)
    }

    fn earliest(&self) -> Option<(TimerKind, Armed)> {
        [TimerKind::Sampler, TimerKind::Advance, TimerKind::Tick]
            .into_iter()
            .filter_map(|kind| self.slot(kind).map(|armed| (kind, armed)))
            .min_by_key(|(kind, armed)| (armed.deadline, *kind))
    }

    /// Earliest pending deadline across all slots
    pub fn next_deadline(&self) -> Option<u64> {
        self.earliest().map(|(_, armed)| armed.deadline)
    }

    /// Remove and return the earliest timer due at `now`
    pub fn pop_due(&mut self, now: u64) -> Option<Fired> {
        let (kind, armed) = self.earliest()?;
        if armed.deadline > now {
            return None;
        }
        self.cancel(kind);
        Some(Fired {
            kind,
            deadline: armed.deadline,
            epoch: armed.epoch,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pop_due_in_deadline_order() {
        let mut slots = TimerSlots::new();
        slots.arm(TimerKind::Tick, 100, 1);
        slots.arm(TimerKind::Advance, 4_000, 1);
        slots.arm(TimerKind::Sampler, 50, 1);

        assert_eq!(slots.next_deadline(), Some(50));
        assert_eq!(slots.pop_due(120).map(|f| f.kind), Some(TimerKind::Sampler));
        assert_eq!(slots.pop_due(120).map(|f| f.kind), Some(TimerKind::Tick));
        assert_eq!(slots.pop_due(120), None);
        assert!(slots.is_armed(TimerKind::Advance));
    }

    #[test]
    fn test_ties_resolve_sampler_advance_tick() {
        let mut slots = TimerSlots::new();
        slots.arm(TimerKind::Tick, 4_000, 1);
        slots.arm(TimerKind::Advance, 4_000, 1);
        slots.arm(TimerKind::Sampler, 4_000, 1);

        let order: Vec<_> = std::iter::from_fn(|| slots.pop_due(4_000))
            .map(|f| f.kind)
            .collect();
        assert_eq!(
            order,
            vec![TimerKind::Sampler, TimerKind::Advance, TimerKind::Tick]
        );
    }

    #[test]
    fn test_cancel_all_clears_every_slot() {
        let mut slots = TimerSlots::new();
        slots.arm(TimerKind::Tick, 100, 3);
        slots.arm(TimerKind::Advance, 200, 3);
        slots.cancel_all();

        assert_eq!(slots.next_deadline(), None);
        assert_eq!(slots.pop_due(u64::MAX), None);
    }

    #[test]
    fn test_rearm_replaces_pending_deadline() {
        let mut slots = TimerSlots::new();
        slots.arm(TimerKind::Advance, 4_000, 1);
        slots.arm(TimerKind::Advance, 7_000, 2);

        let fired = slots.pop_due(10_000).unwrap();
        assert_eq!(fired.deadline, 7_000);
        assert_eq!(fired.epoch, 2);
    }
}
