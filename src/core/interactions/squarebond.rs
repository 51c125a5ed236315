use crate::core::dynamics::{PairEventData, RelativeState};
use crate::core::event::{Event, EventKind, InteractionKind};
use crate::core::interactions::{Interaction, InteractionSpec};
use crate::core::range::PairRange;
use crate::core::vec3::norm_sq;
use crate::core::world::World;
use crate::error::{Error, Result};

/// A permanent bond: the pair rattles between a hard core at `diameter`
/// and an unbreakable outer wall at `lambda * diameter`. Typically used
/// with an explicit pair list.
#[derive(Debug, Clone)]
pub struct SquareBond {
    name: String,
    range: PairRange,
    index: usize,
    diameter: f64,
    lambda: f64,
}

impl SquareBond {
    pub fn new(name: impl Into<String>, range: PairRange, diameter: f64, lambda: f64) -> Self {
        Self {
            name: name.into(),
            range,
            index: 0,
            diameter,
            lambda,
        }
    }

    #[inline]
    fn outer_diameter(&self) -> f64 {
        self.lambda * self.diameter
    }
}

impl Interaction for SquareBond {
    fn name(&self) -> &str {
        &self.name
    }

    fn range(&self) -> &PairRange {
        &self.range
    }

    fn index(&self) -> usize {
        self.index
    }

    fn initialise(&mut self, index: usize, world: &mut World) -> Result<()> {
        if self.lambda <= 1.0 {
            return Err(Error::Config(format!(
                "interaction {}: bond width lambda must exceed 1",
                self.name
            )));
        }
        self.index = index;
        // Every bonded pair must start inside its shell.
        if let PairRange::List(pairs) = &self.range {
            for &(i, j) in pairs {
                if (i as usize) < world.n() && (j as usize) < world.n() {
                    let rel = RelativeState::of(
                        &world.particles[i as usize],
                        &world.particles[j as usize],
                        &world.bc,
                    );
                    let od = self.outer_diameter();
                    if norm_sq(&rel.dr) > od * od {
                        return Err(Error::Config(format!(
                            "interaction {}: bonded pair ({i}, {j}) starts outside its shell",
                            self.name
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    fn max_int_dist(&self) -> f64 {
        self.outer_diameter()
    }

    fn excluded_volume(&self, world: &World, _id: u32) -> f64 {
        let d = self.diameter * world.dynamics.diameter_scale(world.sim_time);
        std::f64::consts::PI * d * d * d / 6.0
    }

    fn get_event(&self, world: &mut World, i: usize, j: usize) -> Result<Option<Event>> {
        world.stream_particle(i);
        world.stream_particle(j);
        let rel = RelativeState::of(&world.particles[i], &world.particles[j], &world.bc);
        let now = world.sim_time;
        let (dt, kind) = if let Some(dt) =
            world.dynamics.sphere_sphere_in_root(&rel, self.diameter, now)
        {
            (dt, InteractionKind::Core)
        } else if let Some(dt) =
            world
                .dynamics
                .sphere_sphere_out_root(&rel, self.outer_diameter(), now)
        {
            (dt, InteractionKind::Bounce)
        } else {
            return Ok(None);
        };
        Ok(Some(Event::new(
            now + dt,
            i as u32,
            world.particles[i].counter,
            Some((j as u32, world.particles[j].counter)),
            EventKind::Interaction {
                source: self.index as u32,
                kind,
            },
        )?))
    }

    fn run_event(&mut self, world: &mut World, ev: &Event) -> Result<PairEventData> {
        let i = ev.particle as usize;
        let j = ev
            .partner
            .map(|(id, _)| id as usize)
            .ok_or_else(|| Error::State("pair event without a partner".into()))?;
        let EventKind::Interaction { kind, .. } = ev.kind else {
            return Err(Error::State("bond asked to run a non-interaction event".into()));
        };
        let (m1, m2) = (world.mass_of(i as u32)?, world.mass_of(j as u32)?);
        let dynamics = world.dynamics.clone();
        let bc = world.bc.clone();
        let (p1, p2) = world.pair_mut(i, j);
        match kind {
            InteractionKind::Core => {
                dynamics.run_core_collision(p1, p2, m1, m2, 1.0, self.diameter, &bc)
            }
            _ => {
                // Outer shell: an unclimbable step reflects the pair inward.
                let (data, _) = dynamics.run_well_kernel(
                    p1,
                    p2,
                    m1,
                    m2,
                    f64::INFINITY,
                    InteractionKind::Bounce,
                    &bc,
                )?;
                Ok(data)
            }
        }
    }

    fn captured(&self, i: u32, j: u32) -> bool {
        // Bonded pairs are permanently captured.
        self.range.covers(i, j)
    }

    fn capture_test(&self, _world: &World, i: usize, j: usize) -> Result<bool> {
        Ok(self.range.covers(i as u32, j as u32))
    }

    fn validate_state(&self, world: &World) -> usize {
        let PairRange::List(pairs) = &self.range else {
            return 0;
        };
        let scale = world.dynamics.diameter_scale(world.sim_time);
        let od = self.outer_diameter() * scale;
        let d = self.diameter * scale;
        let mut errors = 0;
        for &(i, j) in pairs {
            let rel = RelativeState::of(
                &world.particles[i as usize],
                &world.particles[j as usize],
                &world.bc,
            );
            let r2 = norm_sq(&rel.dr);
            if r2 > od * od * (1.0 + 1e-9) || r2 < d * d * (1.0 - 1e-9) {
                errors += 1;
            }
        }
        errors
    }

    fn rescale_lengths(&mut self, factor: f64) {
        self.diameter *= factor;
    }

    fn spec(&self) -> InteractionSpec {
        InteractionSpec::SquareBond {
            name: self.name.clone(),
            range: self.range.clone(),
            diameter: self.diameter,
            lambda: self.lambda,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::particle::Particle;
    use crate::core::range::IdRange;
    use crate::core::species::Species;

    fn world() -> World {
        let mut w = World::new(Some(5));
        w.species
            .push(Species::point("A", IdRange::All, 1.0).unwrap());
        w.particles
            .push(Particle::new(0, [-0.6, 0.0, 0.0], [-0.5, 0.0, 0.0]).unwrap());
        w.particles
            .push(Particle::new(1, [0.6, 0.0, 0.0], [0.5, 0.0, 0.0]).unwrap());
        w
    }

    #[test]
    fn bond_reflects_at_outer_shell() -> Result<()> {
        let mut w = world();
        let mut bond = SquareBond::new("Bond", PairRange::List(vec![(0, 1)]), 1.0, 1.5);
        bond.initialise(0, &mut w)?;
        let ev = bond.get_event(&mut w, 0, 1)?.expect("bond event");
        let EventKind::Interaction { kind, .. } = ev.kind else {
            panic!()
        };
        assert_eq!(kind, InteractionKind::Bounce);
        // Separation 1.2 -> 1.5 at rate 1.
        assert!((ev.time_f64() - 0.3).abs() < 1e-12);
        w.sim_time = ev.time_f64();
        w.stream_all();
        bond.run_event(&mut w, &ev)?;
        // Reflected inward.
        assert!(w.particles[0].v[0] > 0.0);
        assert!(w.particles[1].v[0] < 0.0);
        assert_eq!(bond.validate_state(&w), 0);
        Ok(())
    }

    #[test]
    fn broken_bond_rejected_at_init() {
        let mut w = world();
        w.particles[1].r = [5.0, 0.0, 0.0];
        let mut bond = SquareBond::new("Bond", PairRange::List(vec![(0, 1)]), 1.0, 1.5);
        assert!(bond.initialise(0, &mut w).is_err());
    }
}
