use crate::core::dynamics::{PairEventData, RelativeState};
use crate::core::event::{Event, EventKind, InteractionKind};
use crate::core::interactions::{CaptureMap, Interaction, InteractionSpec};
use crate::core::range::PairRange;
use crate::core::vec3::{dot, norm_sq};
use crate::core::world::World;
use crate::error::{Error, Result};

/// Infinitely thin hard rods of a common length.
///
/// The capture map tracks pairs whose bounding spheres (diameter = rod
/// length) overlap; only captured pairs are searched for rod-rod contact.
/// Capture events are virtual: no impulse, just bookkeeping.
#[derive(Debug, Clone)]
pub struct Lines {
    name: String,
    range: PairRange,
    index: usize,
    length: f64,
    elasticity: f64,
    captures: CaptureMap,
    captures_loaded: bool,
}

impl Lines {
    pub fn new(name: impl Into<String>, range: PairRange, length: f64, elasticity: f64) -> Self {
        Self {
            name: name.into(),
            range,
            index: 0,
            length,
            elasticity,
            captures: CaptureMap::default(),
            captures_loaded: false,
        }
    }

    pub fn with_captures(
        name: impl Into<String>,
        range: PairRange,
        length: f64,
        elasticity: f64,
        captures: Vec<(u32, u32)>,
    ) -> Self {
        let mut s = Self::new(name, range, length, elasticity);
        if !captures.is_empty() {
            for (i, j) in captures {
                s.captures.insert(i, j);
            }
            s.captures_loaded = true;
        }
        s
    }

    /// Contact parameters of the two rod axes at the current configuration,
    /// if the closest approach lies within both rods.
    fn contact_params(&self, world: &World, i: usize, j: usize) -> Option<(f64, f64)> {
        let a1 = world.particles[i].angular?;
        let a2 = world.particles[j].angular?;
        let rel = RelativeState::of(&world.particles[i], &world.particles[j], &world.bc);
        let c = dot(&a1.u, &a2.u);
        let denom = 1.0 - c * c;
        if denom < 1e-12 {
            return None;
        }
        let d1 = dot(&rel.dr, &a1.u);
        let d2 = dot(&rel.dr, &a2.u);
        let s1 = (c * d2 - d1) / denom;
        let s2 = (d2 - c * d1) / denom;
        let half = 0.5 * self.length;
        (s1.abs() <= half * (1.0 + 1e-9) && s2.abs() <= half * (1.0 + 1e-9)).then_some((s1, s2))
    }
}

impl Interaction for Lines {
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
        self.length
    }

    fn excluded_volume(&self, _world: &World, _id: u32) -> f64 {
        // Thin rods exclude no volume.
        0.0
    }

    fn get_event(&self, world: &mut World, i: usize, j: usize) -> Result<Option<Event>> {
        world.stream_particle(i);
        world.stream_particle(j);
        let now = world.sim_time;
        let rel = RelativeState::of(&world.particles[i], &world.particles[j], &world.bc);

        let (dt, kind) = if self.captured(i as u32, j as u32) {
            let t_out = world
                .dynamics
                .sphere_sphere_out_root(&rel, self.length, now)
                .unwrap_or(f64::INFINITY);
            if let Some((t, ..)) = world.dynamics.line_line_collision_time(
                &world.particles[i],
                &world.particles[j],
                self.length,
                t_out.min(1e6),
                &world.bc,
            ) {
                (t, InteractionKind::Core)
            } else if t_out.is_finite() {
                (t_out, InteractionKind::WellOut)
            } else {
                return Ok(None);
            }
        } else if let Some(dt) = world.dynamics.sphere_sphere_in_root(&rel, self.length, now) {
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
            return Err(Error::State("lines asked to run a non-interaction event".into()));
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
                let (c1, c2) = self.contact_params(world, i, j).ok_or_else(|| {
                    Error::Math(format!(
                        "rod contact between {i} and {j} lost before execution"
                    ))
                })?;
                let (m1, m2) = (world.mass_of(i as u32)?, world.mass_of(j as u32)?);
                let (i1, i2) = (world.inertia_of(i as u32)?, world.inertia_of(j as u32)?);
                let dynamics = world.dynamics.clone();
                let bc = world.bc.clone();
                let (p1, p2) = world.pair_mut(i, j);
                dynamics.run_line_line_collision(
                    p1,
                    p2,
                    m1,
                    m2,
                    i1,
                    i2,
                    self.elasticity,
                    c1,
                    c2,
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
        Ok(norm_sq(&rel.dr) <= self.length * self.length)
    }

    fn validate_state(&self, world: &World) -> usize {
        let mut errors = 0;
        for (i, j) in self.captures.iter() {
            let rel = RelativeState::of(
                &world.particles[i as usize],
                &world.particles[j as usize],
                &world.bc,
            );
            if norm_sq(&rel.dr) > self.length * self.length * (1.0 + 1e-9) {
                errors += 1;
            }
        }
        errors
    }

    fn rescale_lengths(&mut self, factor: f64) {
        self.length *= factor;
    }

    fn spec(&self) -> InteractionSpec {
        let mut captures: Vec<(u32, u32)> = self.captures.iter().collect();
        captures.sort_unstable();
        InteractionSpec::Lines {
            name: self.name.clone(),
            range: self.range.clone(),
            length: self.length,
            elasticity: self.elasticity,
            captures,
        }
    }
}
