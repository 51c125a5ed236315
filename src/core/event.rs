use crate::error::{Error, Result};
use ordered_float::NotNan;
use std::cmp::Ordering;

/// Pseudo particle ID under which SYSTEM events are queued.
pub const SYSTEM_PARTICLE: u32 = u32::MAX;

/// Subtype of an INTERACTION event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum InteractionKind {
    /// Hard-core impact.
    Core,
    /// Capture into an attractive well.
    WellIn,
    /// Escape from an attractive well.
    WellOut,
    /// Reflection off the inside of a well edge (insufficient energy to
    /// escape).
    Bounce,
}

/// Kinds of events the engine schedules.
///
/// Pair events are keyed under one participant (`Event::particle`); the
/// partner is recorded with its own counter snapshot for invalidation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Pairwise interaction event produced by the interaction at registry
    /// index `source`.
    Interaction { source: u32, kind: InteractionKind },
    /// Cell-list crossing: the particle reaches a cell face. Direction is
    /// fixed at scheduling time; the trajectory cannot have changed since
    /// (a counter bump would have invalidated the event).
    CellCrossing { axis: u8, positive: bool },
    /// Per-particle event from the global at index `source` (sentinels).
    Global { source: u32 },
    /// Per-particle event from the local at index `source` (walls).
    Local { source: u32 },
    /// Fixed-schedule system event (halts, tickers) at index `source`.
    System { source: u32 },
    /// Virtual event forcing a full re-enumeration for a particle whose
    /// bounded queue overflowed and drained.
    Recalculate,
}

impl EventKind {
    /// Rank used to break time ties deterministically: interactions first,
    /// then locals, globals, cell crossings, system events.
    #[inline]
    fn rank(&self) -> u8 {
        match self {
            EventKind::Interaction { .. } => 0,
            EventKind::Local { .. } => 1,
            EventKind::Global { .. } => 2,
            EventKind::CellCrossing { .. } => 3,
            EventKind::System { .. } => 4,
            EventKind::Recalculate => 5,
        }
    }
}

/// A scheduled event.
///
/// Stores absolute time (finite, non-NaN), the keyed particle with its
/// counter snapshot, an optional partner with its snapshot, and the kind.
/// The snapshots implement the lazy invalidation protocol: an event is
/// executable only while every stored counter matches the participant's
/// current counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub time: NotNan<f64>,
    pub particle: u32,
    pub counter: u64,
    pub partner: Option<(u32, u64)>,
    pub kind: EventKind,
}

impl Event {
    /// Create a new event, validating that the time is finite and non-NaN.
    pub fn new(
        time: f64,
        particle: u32,
        counter: u64,
        partner: Option<(u32, u64)>,
        kind: EventKind,
    ) -> Result<Self> {
        if !time.is_finite() {
            return Err(Error::Math(format!(
                "event time must be finite (got {time}, particle {particle})"
            )));
        }
        let time =
            NotNan::new(time).map_err(|_| Error::Math("event time cannot be NaN".into()))?;
        Ok(Self {
            time,
            particle,
            counter,
            partner,
            kind,
        })
    }

    /// Returns the raw f64 event time.
    #[inline]
    pub fn time_f64(&self) -> f64 {
        self.time.into_inner()
    }

    /// Validate against current counters. Recalculate and system events
    /// never go stale.
    #[inline]
    pub fn is_valid(&self, current: u64, partner_current: Option<u64>) -> bool {
        match self.kind {
            EventKind::Recalculate | EventKind::System { .. } => true,
            _ => {
                if self.counter != current {
                    return false;
                }
                match (self.partner, partner_current) {
                    (Some((_, snap)), Some(cur)) => snap == cur,
                    (None, _) => true,
                    (Some(_), None) => false,
                }
            }
        }
    }

    #[inline]
    fn order_key(&self) -> (u8, u32, u32) {
        (
            self.kind.rank(),
            self.particle,
            self.partner.map(|(id, _)| id).unwrap_or(0),
        )
    }
}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.time.cmp(&other.time) {
            Ordering::Equal => match self.order_key().cmp(&other.order_key()) {
                // Counter snapshots as a final tie-breaker for a total order.
                Ordering::Equal => (self.counter, self.partner.map(|(_, c)| c).unwrap_or(0))
                    .cmp(&(other.counter, other.partner.map(|(_, c)| c).unwrap_or(0))),
                o => o,
            },
            o => o,
        }
    }
}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair_event(t: f64, i: u32, j: u32, ci: u64, cj: u64) -> Event {
        Event::new(
            t,
            i,
            ci,
            Some((j, cj)),
            EventKind::Interaction {
                source: 0,
                kind: InteractionKind::Core,
            },
        )
        .unwrap()
    }

    #[test]
    fn new_event_rejects_nan_and_infinite_time() {
        assert!(Event::new(f64::NAN, 0, 0, None, EventKind::Recalculate).is_err());
        assert!(Event::new(f64::INFINITY, 0, 0, None, EventKind::Recalculate).is_err());
    }

    #[test]
    fn ordering_by_time_then_kind() -> Result<()> {
        let a = pair_event(1.0, 0, 1, 0, 0);
        let b = Event::new(
            2.0,
            0,
            0,
            None,
            EventKind::CellCrossing {
                axis: 0,
                positive: true,
            },
        )?;
        assert!(a < b);

        // Equal times: interaction outranks cell crossing.
        let c = Event::new(
            1.0,
            0,
            0,
            None,
            EventKind::CellCrossing {
                axis: 0,
                positive: true,
            },
        )?;
        assert!(a < c);
        Ok(())
    }

    #[test]
    fn equal_time_lower_ids_first() {
        let a = pair_event(5.0, 0, 1, 0, 0);
        let b = pair_event(5.0, 0, 2, 0, 0);
        let c = pair_event(5.0, 1, 2, 0, 0);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn is_valid_checks_counters() {
        let e = pair_event(1.0, 1, 2, 10, 20);
        assert!(e.is_valid(10, Some(20)));
        assert!(!e.is_valid(11, Some(20)));
        assert!(!e.is_valid(10, Some(21)));
        assert!(!e.is_valid(10, None));

        let w = Event::new(1.0, 3, 7, None, EventKind::Local { source: 0 }).unwrap();
        assert!(w.is_valid(7, None));
        assert!(w.is_valid(7, Some(999)));
        assert!(!w.is_valid(8, None));
    }

    #[test]
    fn system_and_recalc_never_stale() {
        let s = Event::new(1.0, SYSTEM_PARTICLE, 0, None, EventKind::System { source: 0 }).unwrap();
        assert!(s.is_valid(123, None));
        let r = Event::new(1.0, 4, 0, None, EventKind::Recalculate).unwrap();
        assert!(r.is_valid(55, None));
    }
}
