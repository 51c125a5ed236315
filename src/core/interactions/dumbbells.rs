use crate::core::dynamics::{PairEventData, RelativeState};
use crate::core::event::{Event, EventKind, InteractionKind};
use crate::core::interactions::{CaptureMap, Interaction, InteractionSpec};
use crate::core::range::PairRange;
use crate::core::vec3::{axpy, norm, norm_sq, scale};
use crate::core::world::World;
use crate::error::{Error, Result};

/// Rigid dumbbells: two spheres of radius `radius` fixed at the ends of a
/// rod of length `length`. A bounding sphere of diameter
/// `length + 2 * radius` gates the expensive end-sphere contact search.
#[derive(Debug, Clone)]
pub struct Dumbbells {
    name: String,
    range: PairRange,
    index: usize,
    length: f64,
    radius: f64,
    elasticity: f64,
    captures: CaptureMap,
    captures_loaded: bool,
}

impl Dumbbells {
    pub fn new(
        name: impl Into<String>,
        range: PairRange,
        length: f64,
        radius: f64,
        elasticity: f64,
    ) -> Self {
        Self {
            name: name.into(),
            range,
            index: 0,
            length,
            radius,
            elasticity,
            captures: CaptureMap::default(),
            captures_loaded: false,
        }
    }

    pub fn with_captures(
        name: impl Into<String>,
        range: PairRange,
        length: f64,
        radius: f64,
        elasticity: f64,
        captures: Vec<(u32, u32)>,
    ) -> Self {
        let mut s = Self::new(name, range, length, radius, elasticity);
        if !captures.is_empty() {
            for (i, j) in captures {
                s.captures.insert(i, j);
            }
            s.captures_loaded = true;
        }
        s
    }

    #[inline]
    fn bounding_diameter(&self) -> f64 {
        self.length + 2.0 * self.radius
    }

    /// End signs of the sphere pair currently in contact (the combination
    /// whose surface separation is smallest).
    fn contact_ends(&self, world: &World, i: usize, j: usize) -> Option<(f64, f64)> {
        let a1 = world.particles[i].angular?;
        let a2 = world.particles[j].angular?;
        let rel = RelativeState::of(&world.particles[i], &world.particles[j], &world.bc);
        let half = 0.5 * self.length;
        let mut best: Option<(f64, f64, f64)> = None;
        for s1 in [-1.0, 1.0] {
            for s2 in [-1.0, 1.0] {
                let mut d = rel.dr;
                axpy(&mut d, s1 * half, &a1.u);
                axpy(&mut d, -s2 * half, &a2.u);
                let gap = (norm(&d) - 2.0 * self.radius).abs();
                if best.map(|(g, ..)| gap < g).unwrap_or(true) {
                    best = Some((gap, s1, s2));
                }
            }
        }
        best.map(|(_, s1, s2)| (s1, s2))
    }
}

impl Interaction for Dumbbells {
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
        if !self.length.is_finite() || self.length <= 0.0 {
            return Err(Error::Config(format!(
                "interaction {}: rod length must be finite and > 0",
                self.name
            )));
        }
        if !self.radius.is_finite() || self.radius <= 0.0 {
            return Err(Error::Config(format!(
                "interaction {}: sphere radius must be finite and > 0",
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
        if !self.captures_loaded {
            let n = world.n();
            for i in 0..n {
                for j in (i + 1)..n {
                    if self.range.covers(i as u32, j as u32) && self.capture_test(world, i, j)? {
                        self.captures.insert(i as u32, j as u32);
                    }
                }
            }
        }
        Ok(())
    }

    fn max_int_dist(&self) -> f64 {
        self.bounding_diameter()
    }

    fn excluded_volume(&self, world: &World, _id: u32) -> f64 {
        let r = self.radius * world.dynamics.diameter_scale(world.sim_time);
        2.0 * 4.0 / 3.0 * std::f64::consts::PI * r * r * r
    }

    fn get_event(&self, world: &mut World, i: usize, j: usize) -> Result<Option<Event>> {
        world.stream_particle(i);
        world.stream_particle(j);
        let now = world.sim_time;
        let rel = RelativeState::of(&world.particles[i], &world.particles[j], &world.bc);

        let (dt, kind) = if self.captured(i as u32, j as u32) {
            let t_out = world
                .dynamics
                .sphere_sphere_out_root(&rel, self.bounding_diameter(), now)
                .unwrap_or(f64::INFINITY);
            if let Some((t, ..)) = world.dynamics.offcenter_sphere_collision_time(
                &world.particles[i],
                &world.particles[j],
                self.length,
                self.radius,
                t_out.min(1e6),
                &world.bc,
            ) {
                (t, InteractionKind::Core)
            } else if t_out.is_finite() {
                (t_out, InteractionKind::WellOut)
            } else {
                return Ok(None);
            }
        } else if let Some(dt) =
            world
                .dynamics
                .sphere_sphere_in_root(&rel, self.bounding_diameter(), now)
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
            return Err(Error::State(
                "dumbbells asked to run a non-interaction event".into(),
            ));
        };
        match kind {
            InteractionKind::WellIn => {
                self.captures.insert(i as u32, j as u32);
                Ok(PairEventData {
                    p1: i as u32,
                    p2: j as u32,
                    kind,
                    impulse: [0.0; 3],
                    delta_ke: 0.0,
                    delta_u: 0.0,
                })
            }
            InteractionKind::WellOut | InteractionKind::Bounce => {
                self.captures.remove(i as u32, j as u32);
                Ok(PairEventData {
                    p1: i as u32,
                    p2: j as u32,
                    kind: InteractionKind::WellOut,
                    impulse: [0.0; 3],
                    delta_ke: 0.0,
                    delta_u: 0.0,
                })
            }
            InteractionKind::Core => {
                let (s1, s2) = self.contact_ends(world, i, j).ok_or_else(|| {
                    Error::Math(format!(
                        "dumbbell contact between {i} and {j} lost before execution"
                    ))
                })?;
                let (m1, m2) = (world.mass_of(i as u32)?, world.mass_of(j as u32)?);
                let (i1, i2) = (world.inertia_of(i as u32)?, world.inertia_of(j as u32)?);
                let dynamics = world.dynamics.clone();
                let bc = world.bc.clone();
                let (p1, p2) = world.pair_mut(i, j);
                dynamics.run_offcenter_sphere_collision(
                    p1,
                    p2,
                    m1,
                    m2,
                    i1,
                    i2,
                    self.elasticity,
                    self.length,
                    s1,
                    s2,
                    &bc,
                )
            }
        }
    }

    fn captured(&self, i: u32, j: u32) -> bool {
        self.captures.contains(i, j)
    }

    fn capture_test(&self, world: &World, i: usize, j: usize) -> Result<bool> {
        let rel = RelativeState::of(&world.particles[i], &world.particles[j], &world.bc);
        let bd = self.bounding_diameter();
        Ok(norm_sq(&rel.dr) <= bd * bd)
    }

    fn validate_state(&self, world: &World) -> usize {
        let mut errors = 0;
        let bd = self.bounding_diameter();
        for (i, j) in self.captures.iter() {
            let rel = RelativeState::of(
                &world.particles[i as usize],
                &world.particles[j as usize],
                &world.bc,
            );
            if norm_sq(&rel.dr) > bd * bd * (1.0 + 1e-9) {
                errors += 1;
            }
        }
        errors
    }

    fn rescale_lengths(&mut self, factor: f64) {
        self.length *= factor;
        self.radius *= factor;
    }

    fn spec(&self) -> InteractionSpec {
        let mut captures: Vec<(u32, u32)> = self.captures.iter().collect();
        captures.sort_unstable();
        InteractionSpec::Dumbbells {
            name: self.name.clone(),
            range: self.range.clone(),
            length: self.length,
            radius: self.radius,
            elasticity: self.elasticity,
            captures,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::particle::{AngularState, Particle};
    use crate::core::range::IdRange;
    use crate::core::species::Species;

    fn world() -> World {
        let mut w = World::new(Some(23));
        w.species
            .push(Species::spherical_top("DB", IdRange::All, 1.0, 0.25).unwrap());
        let mut p0 = Particle::new(0, [-2.0, 0.0, 0.0], [1.0, 0.0, 0.0]).unwrap();
        p0.angular = Some(AngularState::new([1.0, 0.0, 0.0], [0.0; 3]));
        let mut p1 = Particle::new(1, [2.0, 0.0, 0.0], [-1.0, 0.0, 0.0]).unwrap();
        p1.angular = Some(AngularState::new([1.0, 0.0, 0.0], [0.0; 3]));
        w.particles.push(p0);
        w.particles.push(p1);
        w
    }

    #[test]
    fn aligned_dumbbells_collide_end_on() -> Result<()> {
        let mut w = world();
        let mut db = Dumbbells::new("DB", PairRange::All, 1.0, 0.25, 1.0);
        db.initialise(0, &mut w)?;

        // Capture first.
        let ev = db.get_event(&mut w, 0, 1)?.expect("approaching");
        let EventKind::Interaction { kind, .. } = ev.kind else {
            panic!()
        };
        assert_eq!(kind, InteractionKind::WellIn);
        w.sim_time = ev.time_f64();
        w.stream_all();
        db.run_event(&mut w, &ev)?;
        assert!(db.captured(0, 1));

        // Facing end spheres meet when the inner sphere gap closes:
        // centres 4 apart, inner sphere centres 3 apart, contact at 2r.
        let ev2 = db.get_event(&mut w, 0, 1)?.expect("core");
        let EventKind::Interaction { kind, .. } = ev2.kind else {
            panic!()
        };
        assert_eq!(kind, InteractionKind::Core);
        assert!((ev2.time_f64() - 1.25).abs() < 1e-6);

        w.sim_time = ev2.time_f64();
        w.stream_all();
        db.run_event(&mut w, &ev2)?;
        // Head-on symmetric impact through the axis: pure reversal.
        assert!(w.particles[0].v[0] < 0.0);
        assert!(w.particles[1].v[0] > 0.0);
        Ok(())
    }
}
