use crate::core::dynamics::{PairEventData, RelativeState};
use crate::core::event::{Event, EventKind, InteractionKind};
use crate::core::interactions::{CaptureMap, Interaction, InteractionSpec};
use crate::core::range::PairRange;
use crate::core::vec3::norm_sq;
use crate::core::world::World;
use crate::error::{Error, Result};

/// Square-well potential: a hard core of diameter `diameter` surrounded by
/// an attractive well out to `lambda * diameter` of depth `well_depth`.
///
/// The capture map records which pairs are currently inside the well. It is
/// populated once at initialisation (or loaded from the configuration) and
/// then mutated only when WELL_IN/WELL_OUT events execute.
#[derive(Debug, Clone)]
pub struct SquareWell {
    name: String,
    range: PairRange,
    index: usize,
    diameter: f64,
    lambda: f64,
    well_depth: f64,
    elasticity: f64,
    captures: CaptureMap,
    captures_loaded: bool,
}

impl SquareWell {
    pub fn new(
        name: impl Into<String>,
        range: PairRange,
        diameter: f64,
        lambda: f64,
        well_depth: f64,
        elasticity: f64,
    ) -> Self {
        Self {
            name: name.into(),
            range,
            index: 0,
            diameter,
            lambda,
            well_depth,
            elasticity,
            captures: CaptureMap::default(),
            captures_loaded: false,
        }
    }

    pub fn with_captures(
        name: impl Into<String>,
        range: PairRange,
        diameter: f64,
        lambda: f64,
        well_depth: f64,
        elasticity: f64,
        captures: Vec<(u32, u32)>,
    ) -> Self {
        let mut s = Self::new(name, range, diameter, lambda, well_depth, elasticity);
        if !captures.is_empty() {
            for (i, j) in captures {
                s.captures.insert(i, j);
            }
            s.captures_loaded = true;
        }
        s
    }

    #[inline]
    fn well_diameter(&self) -> f64 {
        self.lambda * self.diameter
    }
}

impl Interaction for SquareWell {
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
        if !self.diameter.is_finite() || self.diameter <= 0.0 {
            return Err(Error::Config(format!(
                "interaction {}: diameter must be finite and > 0",
                self.name
            )));
        }
        if self.lambda <= 1.0 {
            return Err(Error::Config(format!(
                "interaction {}: well width lambda must exceed 1",
                self.name
            )));
        }
        self.index = index;
        if !self.captures_loaded {
            let n = world.n();
            for i in 0..n {
                for j in (i + 1)..n {
                    if self.range.covers(i as u32, j as u32) && self.capture_test(world, i, j)? {
                        self.captures.insert(i as u32, j as u32);
                    }
                }
            }
            log::debug!(
                "interaction {}: capture map initialised with {} pair(s)",
                self.name,
                self.captures.len()
            );
        }
        Ok(())
    }

    fn max_int_dist(&self) -> f64 {
        self.well_diameter()
    }

    fn excluded_volume(&self, world: &World, _id: u32) -> f64 {
        let d = self.diameter * world.dynamics.diameter_scale(world.sim_time);
        std::f64::consts::PI * d * d * d / 6.0
    }

    fn internal_energy(&self) -> f64 {
        -self.well_depth * self.captures.len() as f64
    }

    fn get_event(&self, world: &mut World, i: usize, j: usize) -> Result<Option<Event>> {
        world.stream_particle(i);
        world.stream_particle(j);
        let rel = RelativeState::of(&world.particles[i], &world.particles[j], &world.bc);
        let now = world.sim_time;

        let (dt, kind) = if self.captured(i as u32, j as u32) {
            // Inside the well: a core impact preempts the well escape.
            if let Some(dt) = world.dynamics.sphere_sphere_in_root(&rel, self.diameter, now) {
                (dt, InteractionKind::Core)
            } else if let Some(dt) =
                world
                    .dynamics
                    .sphere_sphere_out_root(&rel, self.well_diameter(), now)
            {
                (dt, InteractionKind::WellOut)
            } else {
                return Ok(None);
            }
        } else if let Some(dt) =
            world
                .dynamics
                .sphere_sphere_in_root(&rel, self.well_diameter(), now)
        {
            (dt, InteractionKind::WellIn)
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
            return Err(Error::State("square well asked to run a non-interaction event".into()));
        };
        let (m1, m2) = (world.mass_of(i as u32)?, world.mass_of(j as u32)?);
        let dynamics = world.dynamics.clone();
        let bc = world.bc.clone();
        match kind {
            InteractionKind::Core => {
                let (p1, p2) = world.pair_mut(i, j);
                dynamics.run_core_collision(p1, p2, m1, m2, self.elasticity, self.diameter, &bc)
            }
            InteractionKind::WellIn => {
                let (p1, p2) = world.pair_mut(i, j);
                let (data, bounced) = dynamics.run_well_kernel(
                    p1,
                    p2,
                    m1,
                    m2,
                    -self.well_depth,
                    InteractionKind::WellIn,
                    &bc,
                )?;
                if !bounced {
                    self.captures.insert(i as u32, j as u32);
                }
                Ok(data)
            }
            InteractionKind::WellOut | InteractionKind::Bounce => {
                let (p1, p2) = world.pair_mut(i, j);
                let (data, bounced) = dynamics.run_well_kernel(
                    p1,
                    p2,
                    m1,
                    m2,
                    self.well_depth,
                    InteractionKind::WellOut,
                    &bc,
                )?;
                if !bounced {
                    self.captures.remove(i as u32, j as u32);
                }
                Ok(data)
            }
        }
    }

    fn captured(&self, i: u32, j: u32) -> bool {
        self.captures.contains(i, j)
    }

    fn capture_test(&self, world: &World, i: usize, j: usize) -> Result<bool> {
        let rel = RelativeState::of(&world.particles[i], &world.particles[j], &world.bc);
        let scale = world.dynamics.diameter_scale(world.sim_time);
        let wd = self.well_diameter() * scale;
        Ok(norm_sq(&rel.dr) <= wd * wd)
    }

    fn validate_state(&self, world: &World) -> usize {
        let mut errors = 0;
        let scale = world.dynamics.diameter_scale(world.sim_time);
        let d2 = (self.diameter * scale) * (self.diameter * scale);
        let wd = self.well_diameter() * scale;
        let wd2 = wd * wd;
        // Captured pairs must sit inside the well.
        for (i, j) in self.captures.iter() {
            let rel = RelativeState::of(
                &world.particles[i as usize],
                &world.particles[j as usize],
                &world.bc,
            );
            if norm_sq(&rel.dr) > wd2 * (1.0 + 1e-9) {
                log::debug!("captured pair ({i}, {j}) outside its well");
                errors += 1;
            }
        }
        // No pair may breach the hard core.
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
        let mut captures: Vec<(u32, u32)> = self.captures.iter().collect();
        captures.sort_unstable();
        InteractionSpec::SquareWell {
            name: self.name.clone(),
            range: self.range.clone(),
            diameter: self.diameter,
            lambda: self.lambda,
            well_depth: self.well_depth,
            elasticity: self.elasticity,
            captures,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::particle::Particle;
    use crate::core::range::IdRange;
    use crate::core::species::Species;

    fn world(x1: f64, v1: f64, x2: f64, v2: f64) -> World {
        let mut w = World::new(Some(3));
        w.species
            .push(Species::point("A", IdRange::All, 1.0).unwrap());
        w.particles
            .push(Particle::new(0, [x1, 0.0, 0.0], [v1, 0.0, 0.0]).unwrap());
        w.particles
            .push(Particle::new(1, [x2, 0.0, 0.0], [v2, 0.0, 0.0]).unwrap());
        w
    }

    #[test]
    fn capture_sequence() -> Result<()> {
        // Approach at relative speed 1: well entry when separation reaches
        // lambda * sigma = 1.5.
        let mut w = world(-2.0, 0.25, 2.0, -0.25);
        let mut sw = SquareWell::new("Well", PairRange::All, 1.0, 1.5, 1.0, 1.0);
        sw.initialise(0, &mut w)?;
        assert!(sw.captures.is_empty());

        let ev = sw.get_event(&mut w, 0, 1)?.expect("approaching pair");
        let EventKind::Interaction { kind, .. } = ev.kind else {
            panic!()
        };
        assert_eq!(kind, InteractionKind::WellIn);
        // Separation 4 -> 1.5 at closing speed 0.5.
        assert!((ev.time_f64() - 5.0).abs() < 1e-12);

        w.sim_time = ev.time_f64();
        w.stream_all();
        sw.run_event(&mut w, &ev)?;
        assert!(sw.captured(0, 1));
        assert!((sw.internal_energy() - (-1.0)).abs() < 1e-12);

        // Next: the hard core.
        let ev2 = sw.get_event(&mut w, 0, 1)?.expect("core ahead");
        let EventKind::Interaction { kind, .. } = ev2.kind else {
            panic!()
        };
        assert_eq!(kind, InteractionKind::Core);

        w.sim_time = ev2.time_f64();
        w.stream_all();
        sw.run_event(&mut w, &ev2)?;
        assert!(sw.captured(0, 1));

        // Then the escape.
        let ev3 = sw.get_event(&mut w, 0, 1)?.expect("well exit ahead");
        let EventKind::Interaction { kind, .. } = ev3.kind else {
            panic!()
        };
        assert_eq!(kind, InteractionKind::WellOut);
        w.sim_time = ev3.time_f64();
        w.stream_all();
        sw.run_event(&mut w, &ev3)?;
        assert!(!sw.captured(0, 1));
        assert_eq!(sw.validate_state(&w), 0);
        Ok(())
    }

    #[test]
    fn initialise_derives_captures_from_positions() -> Result<()> {
        let mut w = world(-0.6, 0.0, 0.6, 0.0);
        let mut sw = SquareWell::new("Well", PairRange::All, 1.0, 1.5, 1.0, 1.0);
        sw.initialise(0, &mut w)?;
        assert!(sw.captured(0, 1));
        Ok(())
    }

    #[test]
    fn bad_lambda_rejected() {
        let mut w = world(-2.0, 0.0, 2.0, 0.0);
        let mut sw = SquareWell::new("Well", PairRange::All, 1.0, 0.9, 1.0, 1.0);
        assert!(sw.initialise(0, &mut w).is_err());
    }
}
