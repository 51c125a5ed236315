//! Globals: virtual per-particle events attached to all of space. Both
//! sentinels exist to bound numerical drift, not to change trajectories.

use crate::core::event::{Event, EventKind};
use crate::core::vec3::DIM;
use crate::core::world::World;
use crate::error::Result;

/// Serializable description of a global.
#[derive(Debug, Clone, PartialEq)]
pub enum GlobalSpec {
    PbcSentinel { name: String },
    ParabolaSentinel { name: String },
}

impl GlobalSpec {
    pub fn name(&self) -> &str {
        match self {
            GlobalSpec::PbcSentinel { name } | GlobalSpec::ParabolaSentinel { name } => name,
        }
    }

    pub fn build(self) -> Box<dyn Global> {
        match self {
            GlobalSpec::PbcSentinel { name } => Box::new(PbcSentinel::new(name)),
            GlobalSpec::ParabolaSentinel { name } => Box::new(ParabolaSentinel::new(name)),
        }
    }
}

/// A per-particle event source covering every particle.
pub trait Global: std::fmt::Debug + Send + Sync {
    fn name(&self) -> &str;

    fn index(&self) -> usize;

    fn initialise(&mut self, index: usize, world: &World) -> Result<()>;

    fn get_event(&self, world: &mut World, i: usize) -> Result<Option<Event>>;

    /// Execute the (virtual) event. The scheduler has already streamed the
    /// particle and will issue the full update afterwards.
    fn run_event(&mut self, world: &mut World, i: usize) -> Result<()>;

    fn spec(&self) -> GlobalSpec;
}

/// Schedules a resync before any particle can traverse half the primary
/// image, so a fast particle can never wrap twice between events.
#[derive(Debug, Clone)]
pub struct PbcSentinel {
    name: String,
    index: usize,
}

impl PbcSentinel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            index: 0,
        }
    }
}

impl Global for PbcSentinel {
    fn name(&self) -> &str {
        &self.name
    }

    fn index(&self) -> usize {
        self.index
    }

    fn initialise(&mut self, index: usize, _world: &World) -> Result<()> {
        self.index = index;
        log::debug!("PBC sentinel loaded");
        Ok(())
    }

    fn get_event(&self, world: &mut World, i: usize) -> Result<Option<Event>> {
        world.stream_particle(i);
        let p = &world.particles[i];
        if !p.dynamic {
            return Ok(None);
        }
        let mut dt = f64::INFINITY;
        for k in 0..DIM {
            let v = p.v[k].abs();
            if v > 0.0 {
                dt = dt.min(0.5 * world.primary_cell[k] / v);
            }
        }
        if !dt.is_finite() {
            return Ok(None);
        }
        Ok(Some(Event::new(
            world.sim_time + dt,
            i as u32,
            p.counter,
            None,
            EventKind::Global {
                source: self.index as u32,
            },
        )?))
    }

    fn run_event(&mut self, _world: &mut World, _i: usize) -> Result<()> {
        // Pure resync: streaming the particle was the whole point.
        Ok(())
    }

    fn spec(&self) -> GlobalSpec {
        GlobalSpec::PbcSentinel {
            name: self.name.clone(),
        }
    }
}

/// Under gravity, resyncs each particle at its trajectory apex so the
/// turning point is represented exactly rather than accumulating error.
#[derive(Debug, Clone)]
pub struct ParabolaSentinel {
    name: String,
    index: usize,
}

impl ParabolaSentinel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            index: 0,
        }
    }
}

impl Global for ParabolaSentinel {
    fn name(&self) -> &str {
        &self.name
    }

    fn index(&self) -> usize {
        self.index
    }

    fn initialise(&mut self, index: usize, _world: &World) -> Result<()> {
        self.index = index;
        log::debug!("parabola sentinel loaded");
        Ok(())
    }

    fn get_event(&self, world: &mut World, i: usize) -> Result<Option<Event>> {
        world.stream_particle(i);
        let p = &world.particles[i];
        let Some(dt) = world.dynamics.parabola_sentinel_time(p) else {
            return Ok(None);
        };
        Ok(Some(Event::new(
            world.sim_time + dt,
            i as u32,
            p.counter,
            None,
            EventKind::Global {
                source: self.index as u32,
            },
        )?))
    }

    fn run_event(&mut self, world: &mut World, i: usize) -> Result<()> {
        // We may have numerically drifted slightly past the apex; the
        // enforcement is exact either way.
        let dynamics = world.dynamics.clone();
        dynamics.enforce_parabola(&mut world.particles[i]);
        Ok(())
    }

    fn spec(&self) -> GlobalSpec {
        GlobalSpec::ParabolaSentinel {
            name: self.name.clone(),
        }
    }
}
