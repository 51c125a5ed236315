use crate::core::dynamics::{PairEventData, RelativeState};
use crate::core::event::{Event, EventKind, InteractionKind};
use crate::core::interactions::{Interaction, InteractionSpec};
use crate::core::range::PairRange;
use crate::core::vec3::norm_sq;
use crate::core::world::World;
use crate::error::{Error, Result};

/// Hard spheres with surface roughness: a tangential restitution couples
/// the translational and rotational degrees of freedom at impact. Covered
/// particles must belong to an inertial species.
#[derive(Debug, Clone)]
pub struct RoughHardSphere {
    name: String,
    range: PairRange,
    index: usize,
    diameter: f64,
    elasticity: f64,
    tangential_elasticity: f64,
}

impl RoughHardSphere {
    pub fn new(
        name: impl Into<String>,
        range: PairRange,
        diameter: f64,
        elasticity: f64,
        tangential_elasticity: f64,
    ) -> Self {
        Self {
            name: name.into(),
            range,
            index: 0,
            diameter,
            elasticity,
            tangential_elasticity,
        }
    }
}

impl Interaction for RoughHardSphere {
    fn name(&self) -> &str {
        &self.name
    }

    fn range(&self) -> &PairRange {
        &self.range
    }

    fn index(&self) -> usize {
        self.index
    }

    fn requires_orientation(&self) -> bool {
        true
    }

    fn initialise(&mut self, index: usize, world: &mut World) -> Result<()> {
        if !self.diameter.is_finite() || self.diameter <= 0.0 {
            return Err(Error::Config(format!(
                "interaction {}: diameter must be finite and > 0",
                self.name
            )));
        }
        self.index = index;
        for p in &world.particles {
            if self.range.covers(p.id, p.id) && p.angular.is_none() {
                return Err(Error::Config(format!(
                    "interaction {} requires angular state on particle {}",
                    self.name, p.id
                )));
            }
        }
        Ok(())
    }

    fn max_int_dist(&self) -> f64 {
        self.diameter
    }

    fn excluded_volume(&self, world: &World, _id: u32) -> f64 {
        let d = self.diameter * world.dynamics.diameter_scale(world.sim_time);
        std::f64::consts::PI * d * d * d / 6.0
    }

    fn get_event(&self, world: &mut World, i: usize, j: usize) -> Result<Option<Event>> {
        world.stream_particle(i);
        world.stream_particle(j);
        let rel = RelativeState::of(&world.particles[i], &world.particles[j], &world.bc);
        let Some(dt) = world
            .dynamics
            .sphere_sphere_in_root(&rel, self.diameter, world.sim_time)
        else {
            return Ok(None);
        };
        Ok(Some(Event::new(
            world.sim_time + dt,
            i as u32,
            world.particles[i].counter,
            Some((j as u32, world.particles[j].counter)),
            EventKind::Interaction {
                source: self.index as u32,
                kind: InteractionKind::Core,
            },
        )?))
    }

    fn run_event(&mut self, world: &mut World, ev: &Event) -> Result<PairEventData> {
        let i = ev.particle as usize;
        let j = ev
            .partner
            .map(|(id, _)| id as usize)
            .ok_or_else(|| Error::State("pair event without a partner".into()))?;
        let (m1, m2) = (world.mass_of(i as u32)?, world.mass_of(j as u32)?);
        let (i1, i2) = (world.inertia_of(i as u32)?, world.inertia_of(j as u32)?);
        let dynamics = world.dynamics.clone();
        let bc = world.bc.clone();
        let (p1, p2) = world.pair_mut(i, j);
        dynamics.run_rough_sphere_collision(
            p1,
            p2,
            m1,
            m2,
            i1,
            i2,
            self.elasticity,
            self.tangential_elasticity,
            self.diameter,
            &bc,
        )
    }

    fn validate_state(&self, world: &World) -> usize {
        let mut errors = 0;
        let scale = world.dynamics.diameter_scale(world.sim_time);
        let d2 = (self.diameter * scale) * (self.diameter * scale);
        let n = world.n();
        for i in 0..n {
            for j in (i + 1)..n {
                if !self.range.covers(i as u32, j as u32) {
                    continue;
                }
                let rel =
                    RelativeState::of(&world.particles[i], &world.particles[j], &world.bc);
                if norm_sq(&rel.dr) < d2 * (1.0 - 1e-9) {
                    errors += 1;
                }
            }
        }
        errors
    }

    fn rescale_lengths(&mut self, factor: f64) {
        self.diameter *= factor;
    }

    fn spec(&self) -> InteractionSpec {
        InteractionSpec::RoughHardSphere {
            name: self.name.clone(),
            range: self.range.clone(),
            diameter: self.diameter,
            elasticity: self.elasticity,
            tangential_elasticity: self.tangential_elasticity,
        }
    }
}
