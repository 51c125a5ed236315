//! The two-level event queue. Level one: a bounded per-particle list of
//! pending events. Level two: a lazy min-heap over the queue heads. Events
//! are never deleted, only invalidated by counter mismatch and skipped on
//! extraction. When an insertion overflows a bounded queue, the earliest
//! dropped time is remembered and surfaces as a `Recalculate` event, so a
//! dropped collision is re-derived before its time instead of being lost.

use crate::core::event::{Event, EventKind, SYSTEM_PARTICLE};
use crate::error::Result;
use ordered_float::NotNan;
use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// Capacity of each per-particle event list.
pub const PEL_CAPACITY: usize = 12;

#[derive(Debug, Default)]
struct PelQueue {
    /// Sorted ascending by the event order; the head is `events[0]`.
    events: Vec<Event>,
    /// Earliest time lost to the capacity bound since the last clear.
    overflow_time: Option<NotNan<f64>>,
    /// The SYSTEM slot holds few events and must never drop one.
    bounded: bool,
}

impl PelQueue {
    fn push(&mut self, ev: Event) {
        let pos = self.events.partition_point(|e| *e < ev);
        self.events.insert(pos, ev);
        if self.bounded && self.events.len() > PEL_CAPACITY {
            if let Some(dropped) = self.events.pop() {
                self.overflow_time = Some(match self.overflow_time {
                    Some(t) => t.min(dropped.time),
                    None => dropped.time,
                });
            }
        }
    }

    /// The earliest scheduling time in this queue: the head event, or the
    /// pending recalculation if that comes first.
    fn head_time(&self) -> Option<NotNan<f64>> {
        match (self.events.first().map(|e| e.time), self.overflow_time) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (Some(a), None) => Some(a),
            (None, b) => b,
        }
    }

    /// Extract the entry at `head_time`, synthesising the recalculation
    /// event for `particle` when the overflow marker is due first.
    fn pop_head(&mut self, particle: u32) -> Option<Event> {
        let recalc_due = match (self.events.first(), self.overflow_time) {
            (Some(e), Some(t)) => t <= e.time,
            (None, Some(_)) => true,
            _ => false,
        };
        if recalc_due {
            let t = self.overflow_time.take()?;
            return Event::new(t.into_inner(), particle, 0, None, EventKind::Recalculate).ok();
        }
        if self.events.is_empty() {
            None
        } else {
            Some(self.events.remove(0))
        }
    }

    fn clear(&mut self) {
        self.events.clear();
        self.overflow_time = None;
    }
}

/// Earliest-event extraction keyed by particle ID, with one extra slot for
/// SYSTEM events.
#[derive(Debug)]
pub struct Sorter {
    queues: Vec<PelQueue>,
    heads: BinaryHeap<Reverse<(NotNan<f64>, u32)>>,
}

impl Sorter {
    pub fn new(n_particles: usize) -> Self {
        let mut queues = Vec::with_capacity(n_particles + 1);
        for _ in 0..n_particles {
            queues.push(PelQueue {
                bounded: true,
                ..PelQueue::default()
            });
        }
        // The SYSTEM slot.
        queues.push(PelQueue::default());
        Self {
            queues,
            heads: BinaryHeap::new(),
        }
    }

    #[inline]
    fn slot(&self, particle: u32) -> usize {
        if particle == SYSTEM_PARTICLE {
            self.queues.len() - 1
        } else {
            particle as usize
        }
    }

    #[inline]
    fn particle_of(&self, slot: usize) -> u32 {
        if slot == self.queues.len() - 1 {
            SYSTEM_PARTICLE
        } else {
            slot as u32
        }
    }

    /// Number of events currently stored (stale ones included).
    pub fn len(&self) -> usize {
        self.queues.iter().map(|q| q.events.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert an event under its keyed particle.
    pub fn push(&mut self, ev: Event) {
        let slot = self.slot(ev.particle);
        let was_head = self.queues[slot].head_time();
        self.queues[slot].push(ev);
        let now_head = self.queues[slot].head_time();
        if now_head != was_head {
            if let Some(t) = now_head {
                self.heads.push(Reverse((t, slot as u32)));
            }
        }
    }

    /// Extract the globally earliest stored entry. Returns `None` when no
    /// events remain anywhere. Counter validity is the caller's check.
    pub fn pop_next(&mut self) -> Option<Event> {
        loop {
            let Reverse((t, slot)) = self.heads.pop()?;
            let slot = slot as usize;
            if self.queues[slot].head_time() != Some(t) {
                // Stale head entry from an earlier queue state.
                continue;
            }
            let particle = self.particle_of(slot);
            let Some(ev) = self.queues[slot].pop_head(particle) else {
                continue;
            };
            if let Some(next) = self.queues[slot].head_time() {
                self.heads.push(Reverse((next, slot as u32)));
            }
            return Some(ev);
        }
    }

    /// Earliest stored entry without extracting it (stale head entries are
    /// discarded on the way). Overflow markers surface as `Recalculate`.
    pub fn peek(&mut self) -> Option<Event> {
        loop {
            let Reverse((t, slot)) = *self.heads.peek()?;
            let slot_idx = slot as usize;
            if self.queues[slot_idx].head_time() != Some(t) {
                self.heads.pop();
                continue;
            }
            let q = &self.queues[slot_idx];
            let recalc_due = match (q.events.first(), q.overflow_time) {
                (Some(e), Some(ot)) => ot <= e.time,
                (None, Some(_)) => true,
                _ => false,
            };
            if recalc_due {
                return Event::new(
                    t.into_inner(),
                    self.particle_of(slot_idx),
                    0,
                    None,
                    EventKind::Recalculate,
                )
                .ok();
            }
            return q.events.first().copied();
        }
    }

    /// Earliest stored entry time without extracting it.
    pub fn peek_time(&mut self) -> Option<f64> {
        self.peek().map(|ev| ev.time_f64())
    }

    /// Drop every stored event for a particle. Cheap: stale head-heap
    /// entries are discarded lazily.
    pub fn clear_particle(&mut self, particle: u32) {
        let slot = self.slot(particle);
        self.queues[slot].clear();
    }

    /// Multiply every stored time-to-event by `factor` (replica exchange
    /// matches velocity-scaled clocks this way). Times are stored absolute,
    /// so the scaling is affine about `origin`, the current clock.
    pub fn rescale_times(&mut self, factor: f64, origin: f64) -> Result<()> {
        for q in &mut self.queues {
            for ev in &mut q.events {
                *ev = Event::new(
                    origin + (ev.time_f64() - origin) * factor,
                    ev.particle,
                    ev.counter,
                    ev.partner,
                    ev.kind,
                )?;
            }
            if let Some(t) = q.overflow_time {
                q.overflow_time =
                    NotNan::new(origin + (t.into_inner() - origin) * factor).ok();
            }
            // A positive factor preserves the order within each queue.
        }
        self.rebuild_heads();
        Ok(())
    }

    /// Clear the SYSTEM slot and re-push the given schedule.
    pub fn rebuild_system_events<I>(&mut self, schedule: I) -> Result<()>
    where
        I: IntoIterator<Item = (usize, f64)>,
    {
        let slot = self.queues.len() - 1;
        self.queues[slot].clear();
        for (source, time) in schedule {
            let ev = Event::new(
                time,
                SYSTEM_PARTICLE,
                0,
                None,
                EventKind::System {
                    source: source as u32,
                },
            )?;
            self.queues[slot].push(ev);
        }
        if let Some(t) = self.queues[slot].head_time() {
            self.heads.push(Reverse((t, slot as u32)));
        }
        Ok(())
    }

    fn rebuild_heads(&mut self) {
        self.heads.clear();
        for (slot, q) in self.queues.iter().enumerate() {
            if let Some(t) = q.head_time() {
                self.heads.push(Reverse((t, slot as u32)));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::event::InteractionKind;

    fn cell_event(t: f64, p: u32, c: u64) -> Event {
        Event::new(
            t,
            p,
            c,
            None,
            EventKind::CellCrossing {
                axis: 0,
                positive: true,
            },
        )
        .unwrap()
    }

    fn pair(t: f64, i: u32, j: u32) -> Event {
        Event::new(
            t,
            i,
            0,
            Some((j, 0)),
            EventKind::Interaction {
                source: 0,
                kind: InteractionKind::Core,
            },
        )
        .unwrap()
    }

    #[test]
    fn extraction_is_time_ordered() {
        let mut s = Sorter::new(4);
        s.push(cell_event(3.0, 0, 0));
        s.push(cell_event(1.0, 1, 0));
        s.push(cell_event(2.0, 2, 0));
        let mut times = Vec::new();
        while let Some(ev) = s.pop_next() {
            times.push(ev.time_f64());
        }
        assert_eq!(times, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn per_particle_queue_orders_events() {
        let mut s = Sorter::new(2);
        s.push(pair(5.0, 0, 1));
        s.push(cell_event(2.0, 0, 0));
        let first = s.pop_next().unwrap();
        assert_eq!(first.time_f64(), 2.0);
        let second = s.pop_next().unwrap();
        assert_eq!(second.time_f64(), 5.0);
    }

    #[test]
    fn clear_particle_empties_queue() {
        let mut s = Sorter::new(2);
        s.push(cell_event(1.0, 0, 0));
        s.push(cell_event(2.0, 1, 0));
        s.clear_particle(0);
        let ev = s.pop_next().unwrap();
        assert_eq!(ev.particle, 1);
        assert!(s.pop_next().is_none());
    }

    #[test]
    fn overflow_surfaces_as_recalculate_at_the_dropped_time() {
        let mut s = Sorter::new(1);
        for k in 0..(PEL_CAPACITY + 3) {
            s.push(cell_event(1.0 + k as f64, 0, 0));
        }
        // The kept events extract in order; the earliest dropped time
        // (PEL_CAPACITY + 1) then surfaces as a recalculation, ahead of
        // nothing it could have hidden.
        for k in 0..PEL_CAPACITY {
            let ev = s.pop_next().unwrap();
            assert_eq!(ev.time_f64(), 1.0 + k as f64);
        }
        let recalc = s.pop_next().unwrap();
        assert!(matches!(recalc.kind, EventKind::Recalculate));
        assert_eq!(recalc.time_f64(), (PEL_CAPACITY + 1) as f64);
        assert!(s.pop_next().is_none());
    }

    #[test]
    fn overflow_marker_preempts_later_valid_events() {
        let mut s = Sorter::new(1);
        // Fill with far-future events, then overflow with a near one: the
        // dropped far event's time must still surface before it was due.
        for k in 0..PEL_CAPACITY {
            s.push(cell_event(100.0 + k as f64, 0, 0));
        }
        s.push(cell_event(5.0, 0, 0));
        let first = s.pop_next().unwrap();
        assert_eq!(first.time_f64(), 5.0);
        // The dropped event was at 111; the marker fires at that time,
        // before any later stored event could mask a lost collision.
        let mut saw_recalc_at = None;
        while let Some(ev) = s.pop_next() {
            if matches!(ev.kind, EventKind::Recalculate) {
                saw_recalc_at = Some(ev.time_f64());
                break;
            }
        }
        assert_eq!(saw_recalc_at, Some(111.0));
    }

    #[test]
    fn rescale_times_scales_about_origin() -> Result<()> {
        let mut s = Sorter::new(2);
        s.push(cell_event(2.0, 0, 0));
        s.push(cell_event(4.0, 1, 0));
        s.rescale_times(0.5, 0.0)?;
        assert_eq!(s.pop_next().unwrap().time_f64(), 1.0);
        assert_eq!(s.pop_next().unwrap().time_f64(), 2.0);

        // A non-zero origin scales the remaining time-to-event only.
        let mut s = Sorter::new(1);
        s.push(cell_event(12.0, 0, 0));
        s.rescale_times(2.0, 10.0)?;
        assert_eq!(s.pop_next().unwrap().time_f64(), 14.0);
        Ok(())
    }

    #[test]
    fn system_schedule_rebuilds() -> Result<()> {
        let mut s = Sorter::new(1);
        s.rebuild_system_events([(0usize, 5.0), (1usize, 3.0)])?;
        let ev = s.pop_next().unwrap();
        assert!(matches!(ev.kind, EventKind::System { source: 1 }));
        assert_eq!(ev.time_f64(), 3.0);
        // Rebuilding replaces the previous schedule.
        s.rebuild_system_events([(2usize, 1.0)])?;
        let ev = s.pop_next().unwrap();
        assert!(matches!(ev.kind, EventKind::System { source: 2 }));
        Ok(())
    }

    #[test]
    fn peek_does_not_extract() {
        let mut s = Sorter::new(1);
        s.push(cell_event(7.0, 0, 0));
        assert_eq!(s.peek_time(), Some(7.0));
        assert_eq!(s.peek_time(), Some(7.0));
        assert_eq!(s.pop_next().unwrap().time_f64(), 7.0);
    }
}
