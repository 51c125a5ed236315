//! The event loop: earliest-event extraction, lazy-invalidation checks,
//! clock streaming, dispatch to the owning component and re-enumeration of
//! the participants' future events through the cell list.

use crate::core::cells::CellList;
use crate::core::dynamics::PairEventData;
use crate::core::event::{Event, EventKind};
use crate::core::globals::Global;
use crate::core::interactions::{pair_event, Interaction};
use crate::core::locals::Local;
use crate::core::sorter::Sorter;
use crate::core::system::{SystemAction, SystemEvent};
use crate::core::world::World;
use crate::error::{Error, Result};

/// Relative tolerance used when re-verifying an extracted interaction
/// event against a freshly computed one.
const REVERIFY_TOL: f64 = 1e-9;

/// Overlap factor applied to the cell edge when compression headroom is
/// requested.
const CELL_OVERLAP_LAMBDA: f64 = 1.1;

/// What `run_next_event` did.
#[derive(Debug, Clone, Copy)]
pub enum ExecutedEvent {
    /// A realised pair event.
    Interaction { time: f64, data: PairEventData },
    /// A particle moved between cells (virtual).
    CellCrossing { time: f64, particle: u32 },
    /// A sentinel resync (virtual).
    Global {
        time: f64,
        particle: u32,
        source: u32,
    },
    /// A wall event.
    Local {
        time: f64,
        particle: u32,
        source: u32,
    },
    /// A system event fired; the action has already been applied to the
    /// scheduler, the caller handles `Halt`.
    System {
        time: f64,
        source: u32,
        action: SystemAction,
    },
    /// A bounded queue was re-derived (virtual).
    Recalculate { time: f64, particle: u32 },
    /// No events remain anywhere.
    Exhausted,
}

impl ExecutedEvent {
    /// Whether this counted as a realised event.
    pub fn is_real(&self) -> bool {
        matches!(
            self,
            ExecutedEvent::Interaction { .. } | ExecutedEvent::Local { .. }
        )
    }
}

/// Owns the sorter and the cell list; drives one simulation instance.
#[derive(Debug)]
pub struct Scheduler {
    sorter: Sorter,
    cells: Option<CellList>,
    overlap: bool,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            sorter: Sorter::new(0),
            cells: None,
            overlap: true,
        }
    }

    pub fn set_cell_overlap(&mut self, overlap: bool) {
        self.overlap = overlap;
        if let Some(cells) = &mut self.cells {
            cells.set_cell_overlap(overlap);
        }
    }

    pub fn cells(&self) -> Option<&CellList> {
        self.cells.as_ref()
    }

    /// Build the cell grid and enumerate every particle's initial events.
    pub fn initialise(
        &mut self,
        world: &mut World,
        interactions: &[Box<dyn Interaction>],
        locals: &[Box<dyn Local>],
        globals: &[Box<dyn Global>],
        systems: &[SystemEvent],
    ) -> Result<()> {
        let max_dist = interactions
            .iter()
            .map(|i| i.max_int_dist())
            .fold(0.0_f64, f64::max)
            * world.dynamics.diameter_scale(world.sim_time);
        if max_dist <= 0.0 {
            return Err(Error::Config(
                "no interaction provides a positive range".into(),
            ));
        }
        let mut cells = CellList::build(
            world.n(),
            world.primary_cell,
            max_dist,
            world.bc.is_periodic(),
            self.overlap,
            CELL_OVERLAP_LAMBDA,
        )?;
        cells.repopulate(&world.particles);
        self.cells = Some(cells);
        self.sorter = Sorter::new(world.n());
        for p in 0..world.n() {
            self.full_update(world, interactions, locals, globals, p)?;
        }
        self.rebuild_system_events(systems)?;
        Ok(())
    }

    /// Re-derive the cell grid (diameters grew, or the dynamics changed)
    /// and re-enumerate everything.
    pub fn rebuild_cells(
        &mut self,
        world: &mut World,
        interactions: &[Box<dyn Interaction>],
        locals: &[Box<dyn Local>],
        globals: &[Box<dyn Global>],
    ) -> Result<()> {
        let max_dist = interactions
            .iter()
            .map(|i| i.max_int_dist())
            .fold(0.0_f64, f64::max)
            * world.dynamics.diameter_scale(world.sim_time);
        let mut cells = CellList::build(
            world.n(),
            world.primary_cell,
            max_dist,
            world.bc.is_periodic(),
            self.overlap,
            CELL_OVERLAP_LAMBDA,
        )?;
        world.stream_all();
        cells.repopulate(&world.particles);
        self.cells = Some(cells);
        for p in 0..world.n() {
            self.full_update(world, interactions, locals, globals, p)?;
        }
        Ok(())
    }

    pub fn rebuild_system_events(&mut self, systems: &[SystemEvent]) -> Result<()> {
        self.sorter.rebuild_system_events(
            systems
                .iter()
                .enumerate()
                .filter_map(|(idx, s)| s.next_time().map(|t| (idx, t))),
        )
    }

    /// Multiply every queued time-to-event by `factor`, about the current
    /// clock.
    pub fn rescale_times(&mut self, factor: f64, origin: f64) -> Result<()> {
        self.sorter.rescale_times(factor, origin)
    }

    /// Earliest pending event time (stale entries skipped lazily).
    pub fn peek_next_time(&mut self) -> Option<f64> {
        self.sorter.peek_time()
    }

    /// Earliest event time that would survive counter validation; invalid
    /// heads are extracted and dropped along the way.
    pub fn peek_next_valid_time(&mut self, world: &World) -> Option<f64> {
        loop {
            let ev = self.sorter.peek()?;
            let valid = match ev.kind {
                EventKind::System { .. } | EventKind::Recalculate => true,
                _ => {
                    let current = world.particles[ev.particle as usize].counter;
                    let partner_current = ev
                        .partner
                        .map(|(id, _)| world.particles[id as usize].counter);
                    ev.is_valid(current, partner_current)
                }
            };
            if valid {
                return Some(ev.time_f64());
            }
            self.sorter.pop_next();
        }
    }

    /// Advisory cell-list integrity check.
    pub fn validate_cells(&self, world: &World) -> usize {
        self.cells
            .as_ref()
            .map(|c| c.validate(&world.particles))
            .unwrap_or(0)
    }

    /// Bump the particle's counter, drop its queue, and re-enumerate every
    /// event it can participate in. The primitive event handlers use to
    /// reschedule participants.
    pub fn full_update(
        &mut self,
        world: &mut World,
        interactions: &[Box<dyn Interaction>],
        locals: &[Box<dyn Local>],
        globals: &[Box<dyn Global>],
        p: usize,
    ) -> Result<()> {
        world.stream_particle(p);
        world.particles[p].bump_counter();
        self.sorter.clear_particle(p as u32);

        for local in locals {
            if local.covers(p as u32) {
                if let Some(ev) = local.get_event(world, p)? {
                    self.sorter.push(ev);
                }
            }
        }
        for global in globals {
            if let Some(ev) = global.get_event(world, p)? {
                self.sorter.push(ev);
            }
        }
        let cells = self
            .cells
            .as_ref()
            .ok_or_else(|| Error::State("scheduler used before initialisation".into()))?;
        for q in cells.particle_neighbourhood(p) {
            if let Some(ev) = pair_event(world, interactions, p, q as usize)? {
                self.sorter.push(ev);
            }
        }
        self.push_cell_event(world, p)?;
        Ok(())
    }

    fn push_cell_event(&mut self, world: &mut World, p: usize) -> Result<()> {
        let cells = self
            .cells
            .as_ref()
            .ok_or_else(|| Error::State("scheduler used before initialisation".into()))?;
        let Some(cell) = cells.cell_of_particle(p) else {
            return Ok(());
        };
        let (lo, hi) = cells.cell_bounds(cell);
        world.stream_particle(p);
        let particle = &world.particles[p];
        if let Some((dt, axis, positive)) = world.dynamics.cell_exit_time(particle, &lo, &hi) {
            self.sorter.push(Event::new(
                world.sim_time + dt,
                p as u32,
                particle.counter,
                None,
                EventKind::CellCrossing {
                    axis: axis as u8,
                    positive,
                },
            )?);
        }
        Ok(())
    }

    /// Execute the next event. See the module docs for the step protocol.
    #[allow(clippy::too_many_arguments)]
    pub fn run_next_event(
        &mut self,
        world: &mut World,
        interactions: &mut [Box<dyn Interaction>],
        locals: &mut [Box<dyn Local>],
        globals: &mut [Box<dyn Global>],
        systems: &mut [SystemEvent],
        event_count: &mut u64,
    ) -> Result<ExecutedEvent> {
        loop {
            let Some(ev) = self.sorter.pop_next() else {
                return Ok(ExecutedEvent::Exhausted);
            };

            // Lazy invalidation: stored counter snapshots must match.
            let valid = match ev.kind {
                EventKind::System { .. } | EventKind::Recalculate => true,
                _ => {
                    let current = world.particles[ev.particle as usize].counter;
                    let partner_current = ev
                        .partner
                        .map(|(id, _)| world.particles[id as usize].counter);
                    ev.is_valid(current, partner_current)
                }
            };
            if !valid {
                continue;
            }

            if let EventKind::Recalculate = ev.kind {
                // No clock advance: the queue drained at a time already
                // processed; re-derive this particle's events.
                let p = ev.particle as usize;
                self.full_update(world, interactions, locals, globals, p)?;
                return Ok(ExecutedEvent::Recalculate {
                    time: world.sim_time,
                    particle: ev.particle,
                });
            }

            let t = ev.time_f64();
            let dt = t - world.sim_time;
            if dt < -1e-6 {
                return Err(Error::Math(format!(
                    "event time ran backwards: {t} < {}",
                    world.sim_time
                )));
            }
            let dt = dt.max(0.0);

            match ev.kind {
                EventKind::Recalculate => continue,
                EventKind::Interaction { source, kind } => {
                    let i = ev.particle as usize;
                    let j = ev
                        .partner
                        .map(|(id, _)| id as usize)
                        .ok_or_else(|| Error::State("pair event without a partner".into()))?;

                    // Re-verify against a fresh computation before touching
                    // the clock; shear offsets or earlier same-time events
                    // can perturb the root.
                    let fresh = interactions[source as usize].get_event(world, i, j)?;
                    let confirmed = fresh
                        .as_ref()
                        .map(|f| {
                            (f.time_f64() - t).abs() <= REVERIFY_TOL * t.abs().max(1.0)
                                && matches!(
                                    f.kind,
                                    EventKind::Interaction { kind: fk, .. } if fk == kind
                                )
                        })
                        .unwrap_or(false);
                    if !confirmed {
                        if let Some(f) = fresh {
                            self.sorter.push(f);
                        }
                        continue;
                    }

                    world.sim_time = t;
                    world.bc.update(dt);
                    world.stream_particle(i);
                    world.stream_particle(j);
                    let data = interactions[source as usize].run_event(world, &ev)?;
                    *event_count += 1;
                    self.full_update(world, interactions, locals, globals, i)?;
                    self.full_update(world, interactions, locals, globals, j)?;
                    return Ok(ExecutedEvent::Interaction { time: t, data });
                }
                EventKind::CellCrossing { axis, positive } => {
                    let p = ev.particle as usize;
                    world.sim_time = t;
                    world.bc.update(dt);
                    world.stream_particle(p);
                    let cells = self
                        .cells
                        .as_mut()
                        .ok_or_else(|| Error::State("scheduler used before initialisation".into()))?;
                    let fresh = cells.run_crossing(
                        p,
                        axis as usize,
                        positive,
                        &mut world.particles[p],
                        &world.bc,
                    );
                    // The trajectory is unchanged: existing events stay
                    // valid, only the newly visible candidates are added.
                    for q in fresh {
                        if let Some(pev) = pair_event(world, interactions, p, q as usize)? {
                            self.sorter.push(pev);
                        }
                    }
                    self.push_cell_event(world, p)?;
                    return Ok(ExecutedEvent::CellCrossing {
                        time: t,
                        particle: ev.particle,
                    });
                }
                EventKind::Global { source } => {
                    let p = ev.particle as usize;
                    world.sim_time = t;
                    world.bc.update(dt);
                    world.stream_particle(p);
                    globals[source as usize].run_event(world, p)?;
                    world.freestream_acc += dt;
                    self.full_update(world, interactions, locals, globals, p)?;
                    return Ok(ExecutedEvent::Global {
                        time: t,
                        particle: ev.particle,
                        source,
                    });
                }
                EventKind::Local { source } => {
                    let p = ev.particle as usize;
                    world.sim_time = t;
                    world.bc.update(dt);
                    world.stream_particle(p);
                    locals[source as usize].run_event(world, &ev)?;
                    *event_count += 1;
                    self.full_update(world, interactions, locals, globals, p)?;
                    return Ok(ExecutedEvent::Local {
                        time: t,
                        particle: ev.particle,
                        source,
                    });
                }
                EventKind::System { source } => {
                    world.sim_time = t;
                    world.bc.update(dt);
                    let action = systems[source as usize].run(world, *event_count)?;
                    if action == SystemAction::RebuildCells {
                        self.rebuild_cells(world, interactions, locals, globals)?;
                        // Reschedule the watchdog from the headroom the new
                        // grid actually has before the grown diameters meet
                        // the cell edge again.
                        if let SystemEvent::NbListCompressionFix {
                            growth_rate, next, ..
                        } = &mut systems[source as usize]
                        {
                            let max_dist = interactions
                                .iter()
                                .map(|i| i.max_int_dist())
                                .fold(0.0_f64, f64::max);
                            let width = self
                                .cells
                                .as_ref()
                                .map(|c| c.min_width())
                                .unwrap_or(max_dist);
                            *next = ((width / max_dist - 1.0) / *growth_rate)
                                .max(t + 1e-9 / *growth_rate);
                        }
                    }
                    self.rebuild_system_events(systems)?;
                    return Ok(ExecutedEvent::System {
                        time: t,
                        source,
                        action,
                    });
                }
            }
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}
