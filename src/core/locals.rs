//! Locals: per-particle events tied to fixed geometry (walls).

use crate::core::event::{Event, EventKind};
use crate::core::range::IdRange;
use crate::core::vec3::{dot, Vec3};
use crate::core::world::World;
use crate::error::{Error, Result};

/// Serializable description of a local.
#[derive(Debug, Clone, PartialEq)]
pub enum LocalSpec {
    Wall {
        name: String,
        range: IdRange,
        normal: Vec3,
        origin_dist: f64,
        elasticity: f64,
        diameter: f64,
    },
    AndersenWall {
        name: String,
        range: IdRange,
        normal: Vec3,
        origin_dist: f64,
        temperature: f64,
        accommodation: f64,
        diameter: f64,
    },
}

impl LocalSpec {
    pub fn name(&self) -> &str {
        match self {
            LocalSpec::Wall { name, .. } | LocalSpec::AndersenWall { name, .. } => name,
        }
    }

    pub fn build(self) -> Box<dyn Local> {
        match self {
            LocalSpec::Wall {
                name,
                range,
                normal,
                origin_dist,
                elasticity,
                diameter,
            } => Box::new(Wall::new(name, range, normal, origin_dist, elasticity, diameter)),
            LocalSpec::AndersenWall {
                name,
                range,
                normal,
                origin_dist,
                temperature,
                accommodation,
                diameter,
            } => Box::new(AndersenWall::new(
                name,
                range,
                normal,
                origin_dist,
                temperature,
                accommodation,
                diameter,
            )),
        }
    }
}

/// A per-particle event source attached to fixed geometry. Same contract
/// as an interaction but with a single participant.
pub trait Local: std::fmt::Debug + Send + Sync {
    fn name(&self) -> &str;

    fn covers(&self, id: u32) -> bool;

    fn index(&self) -> usize;

    fn initialise(&mut self, index: usize, world: &World) -> Result<()>;

    fn get_event(&self, world: &mut World, i: usize) -> Result<Option<Event>>;

    fn run_event(&mut self, world: &mut World, ev: &Event) -> Result<()>;

    /// Advisory check for particle `i`; returns violations found.
    fn validate_state(&self, world: &World, i: usize) -> usize;

    /// Scale every stored length (compression restore).
    fn rescale_lengths(&mut self, factor: f64);

    fn spec(&self) -> LocalSpec;
}

/// Planar hard wall. The normal points from the interior towards the
/// wall; contact happens when the particle surface reaches the plane
/// `normal . r = origin_dist`.
#[derive(Debug, Clone)]
pub struct Wall {
    name: String,
    range: IdRange,
    index: usize,
    normal: Vec3,
    origin_dist: f64,
    elasticity: f64,
    diameter: f64,
}

impl Wall {
    pub fn new(
        name: impl Into<String>,
        range: IdRange,
        normal: Vec3,
        origin_dist: f64,
        elasticity: f64,
        diameter: f64,
    ) -> Self {
        Self {
            name: name.into(),
            range,
            index: 0,
            normal,
            origin_dist,
            elasticity,
            diameter,
        }
    }

    #[inline]
    fn contact_dist(&self) -> f64 {
        self.origin_dist - 0.5 * self.diameter
    }
}

fn check_unit_normal(name: &str, normal: &Vec3) -> Result<()> {
    let n2 = dot(normal, normal);
    if (n2 - 1.0).abs() > 1e-9 {
        return Err(Error::Config(format!(
            "local {name}: wall normal must be a unit vector"
        )));
    }
    Ok(())
}

impl Local for Wall {
    fn name(&self) -> &str {
        &self.name
    }

    fn covers(&self, id: u32) -> bool {
        self.range.contains(id)
    }

    fn index(&self) -> usize {
        self.index
    }

    fn initialise(&mut self, index: usize, _world: &World) -> Result<()> {
        check_unit_normal(&self.name, &self.normal)?;
        self.index = index;
        Ok(())
    }

    fn get_event(&self, world: &mut World, i: usize) -> Result<Option<Event>> {
        world.stream_particle(i);
        let p = &world.particles[i];
        let Some(dt) = world
            .dynamics
            .wall_collision_time(p, &self.normal, self.contact_dist())
        else {
            return Ok(None);
        };
        Ok(Some(Event::new(
            world.sim_time + dt,
            i as u32,
            p.counter,
            None,
            EventKind::Local {
                source: self.index as u32,
            },
        )?))
    }

    fn run_event(&mut self, world: &mut World, ev: &Event) -> Result<()> {
        let i = ev.particle as usize;
        let dynamics = world.dynamics.clone();
        dynamics.run_wall_collision(&mut world.particles[i], &self.normal, self.elasticity);
        Ok(())
    }

    fn validate_state(&self, world: &World, i: usize) -> usize {
        if !self.covers(i as u32) {
            return 0;
        }
        let depth = dot(&self.normal, &world.particles[i].r) - self.contact_dist();
        usize::from(depth > 1e-9)
    }

    fn rescale_lengths(&mut self, factor: f64) {
        self.origin_dist *= factor;
        self.diameter *= factor;
    }

    fn spec(&self) -> LocalSpec {
        LocalSpec::Wall {
            name: self.name.clone(),
            range: self.range.clone(),
            normal: self.normal,
            origin_dist: self.origin_dist,
            elasticity: self.elasticity,
            diameter: self.diameter,
        }
    }
}

/// Planar wall with Andersen thermostatting: colliding particles leave
/// with velocities resampled at the wall temperature (per the
/// accommodation coefficient).
#[derive(Debug, Clone)]
pub struct AndersenWall {
    name: String,
    range: IdRange,
    index: usize,
    normal: Vec3,
    origin_dist: f64,
    temperature: f64,
    accommodation: f64,
    diameter: f64,
}

impl AndersenWall {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        range: IdRange,
        normal: Vec3,
        origin_dist: f64,
        temperature: f64,
        accommodation: f64,
        diameter: f64,
    ) -> Self {
        Self {
            name: name.into(),
            range,
            index: 0,
            normal,
            origin_dist,
            temperature,
            accommodation,
            diameter,
        }
    }

    #[inline]
    fn contact_dist(&self) -> f64 {
        self.origin_dist - 0.5 * self.diameter
    }
}

impl Local for AndersenWall {
    fn name(&self) -> &str {
        &self.name
    }

    fn covers(&self, id: u32) -> bool {
        self.range.contains(id)
    }

    fn index(&self) -> usize {
        self.index
    }

    fn initialise(&mut self, index: usize, _world: &World) -> Result<()> {
        check_unit_normal(&self.name, &self.normal)?;
        if !(self.temperature > 0.0) {
            return Err(Error::Config(format!(
                "local {}: wall temperature must be > 0",
                self.name
            )));
        }
        if !(0.0..=1.0).contains(&self.accommodation) {
            return Err(Error::Config(format!(
                "local {}: accommodation must lie in [0, 1]",
                self.name
            )));
        }
        self.index = index;
        Ok(())
    }

    fn get_event(&self, world: &mut World, i: usize) -> Result<Option<Event>> {
        world.stream_particle(i);
        let p = &world.particles[i];
        let Some(dt) = world
            .dynamics
            .wall_collision_time(p, &self.normal, self.contact_dist())
        else {
            return Ok(None);
        };
        Ok(Some(Event::new(
            world.sim_time + dt,
            i as u32,
            p.counter,
            None,
            EventKind::Local {
                source: self.index as u32,
            },
        )?))
    }

    fn run_event(&mut self, world: &mut World, ev: &Event) -> Result<()> {
        let i = ev.particle as usize;
        let mass = world.mass_of(i as u32)?;
        let World {
            particles,
            dynamics,
            rng,
            ..
        } = world;
        dynamics.run_andersen_wall_collision(
            &mut particles[i],
            &self.normal,
            self.temperature,
            self.accommodation,
            mass,
            rng,
        );
        Ok(())
    }

    fn validate_state(&self, world: &World, i: usize) -> usize {
        if !self.covers(i as u32) {
            return 0;
        }
        let depth = dot(&self.normal, &world.particles[i].r) - self.contact_dist();
        usize::from(depth > 1e-9)
    }

    fn rescale_lengths(&mut self, factor: f64) {
        self.origin_dist *= factor;
        self.diameter *= factor;
    }

    fn spec(&self) -> LocalSpec {
        LocalSpec::AndersenWall {
            name: self.name.clone(),
            range: self.range.clone(),
            normal: self.normal,
            origin_dist: self.origin_dist,
            temperature: self.temperature,
            accommodation: self.accommodation,
            diameter: self.diameter,
        }
    }
}
