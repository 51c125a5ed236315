use crate::core::boundary::Boundary;
use crate::core::dynamics::Dynamics;
use crate::core::particle::Particle;
use crate::core::species::Species;
use crate::core::vec3::{axpy, norm_sq, Vec3};
use crate::error::{Error, Result};
use crate::units::Units;
use rand::rngs::StdRng;
use rand::SeedableRng;

/// The physical state every component operates on: the particle store, the
/// species table, the boundary condition, the propagator and the clock.
///
/// Kept as one struct so interactions, locals and globals can take a single
/// `&mut World` instead of threading five borrows through every call.
#[derive(Debug)]
pub struct World {
    pub particles: Vec<Particle>,
    pub species: Vec<Species>,
    pub bc: Boundary,
    pub dynamics: Dynamics,
    pub units: Units,
    /// Extent of the primary image. Matches the boundary's box under
    /// periodic conditions; for infinite boundaries it still bounds the
    /// cell grid.
    pub primary_cell: Vec3,
    /// The global simulation clock.
    pub sim_time: f64,
    /// Simulation time accumulated by suppressed virtual events (sentinel
    /// resyncs); tracked so the free-streaming contribution is auditable.
    pub freestream_acc: f64,
    pub rng: StdRng,
}

impl World {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_os_rng(),
        };
        Self {
            particles: Vec::new(),
            species: Vec::new(),
            bc: Boundary::None,
            dynamics: Dynamics::Newtonian,
            units: Units::default(),
            primary_cell: [1.0, 1.0, 1.0],
            sim_time: 0.0,
            freestream_acc: 0.0,
            rng,
        }
    }

    #[inline]
    pub fn n(&self) -> usize {
        self.particles.len()
    }

    /// The species owning particle `id`.
    pub fn species_of(&self, id: u32) -> Result<&Species> {
        self.species
            .iter()
            .find(|s| s.is_species(id))
            .ok_or_else(|| Error::Config(format!("particle {id} has no species")))
    }

    pub fn mass_of(&self, id: u32) -> Result<f64> {
        Ok(self.species_of(id)?.mass)
    }

    /// Moment of inertia for particle `id`; an error for non-inertial
    /// species (interactions that need it must run on inertial species).
    pub fn inertia_of(&self, id: u32) -> Result<f64> {
        self.species_of(id)?.moment_of_inertia().ok_or_else(|| {
            Error::Config(format!(
                "particle {id} belongs to a species without inertia"
            ))
        })
    }

    /// Stream a particle to the current simulation time.
    #[inline]
    pub fn stream_particle(&mut self, id: usize) {
        let to = self.sim_time;
        self.dynamics.update_particle(&mut self.particles[id], to);
    }

    pub fn stream_all(&mut self) {
        let to = self.sim_time;
        self.dynamics.update_all_particles(&mut self.particles, to);
    }

    /// Disjoint mutable access to a particle pair.
    pub fn pair_mut(&mut self, i: usize, j: usize) -> (&mut Particle, &mut Particle) {
        debug_assert!(i != j);
        if i < j {
            let (a, b) = self.particles.split_at_mut(j);
            (&mut a[i], &mut b[0])
        } else {
            let (a, b) = self.particles.split_at_mut(i);
            (&mut b[0], &mut a[j])
        }
    }

    /// Total kinetic energy (translational + rotational).
    pub fn kinetic_energy(&self) -> f64 {
        let mut ke = 0.0;
        for p in &self.particles {
            if !p.dynamic {
                continue;
            }
            let sp = match self.species_of(p.id) {
                Ok(sp) => sp,
                Err(_) => continue,
            };
            ke += 0.5 * sp.mass * norm_sq(&p.v);
            if let (Some(ang), Some(i)) = (&p.angular, sp.moment_of_inertia()) {
                ke += 0.5 * i * norm_sq(&ang.omega);
            }
        }
        ke
    }

    /// Total momentum of the mobile particles.
    pub fn momentum(&self) -> Vec3 {
        let mut mom = [0.0; 3];
        for p in &self.particles {
            if !p.dynamic {
                continue;
            }
            if let Ok(m) = self.mass_of(p.id) {
                axpy(&mut mom, m, &p.v);
            }
        }
        mom
    }

    /// Instantaneous kinetic temperature (2 KE / (DIM N)).
    pub fn temperature(&self) -> f64 {
        let n_dyn = self.particles.iter().filter(|p| p.dynamic).count();
        if n_dyn == 0 {
            return 0.0;
        }
        2.0 * self.kinetic_energy() / (3.0 * n_dyn as f64)
    }

    /// Subtract the centre-of-mass drift so net momentum vanishes.
    pub fn zero_com_velocity(&mut self) -> Result<()> {
        let mut mom = [0.0; 3];
        let mut total_mass = 0.0;
        for p in &self.particles {
            if !p.dynamic {
                continue;
            }
            let m = self.mass_of(p.id)?;
            axpy(&mut mom, m, &p.v);
            total_mass += m;
        }
        if total_mass == 0.0 {
            return Ok(());
        }
        let drift = [
            mom[0] / total_mass,
            mom[1] / total_mass,
            mom[2] / total_mass,
        ];
        for p in &mut self.particles {
            if p.dynamic {
                axpy(&mut p.v, -1.0, &drift);
            }
        }
        Ok(())
    }

    /// Volume of the primary cell.
    pub fn volume(&self) -> f64 {
        self.primary_cell[0] * self.primary_cell[1] * self.primary_cell[2]
    }

    pub fn number_density(&self) -> f64 {
        self.n() as f64 / self.volume()
    }
}
