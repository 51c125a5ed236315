use crate::core::vec3::{dot, Vec3};
use crate::error::{Error, Result};

/// Angular state carried by particles of inertial species (rough spheres,
/// lines, dumbbells). `u` is the unit orientation vector, `omega` the
/// angular velocity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AngularState {
    pub u: Vec3,
    pub omega: Vec3,
}

impl AngularState {
    pub fn new(u: Vec3, omega: Vec3) -> Self {
        Self { u, omega }
    }
}

/// A particle's kinematic record.
///
/// `pec_time` is the simulation time to which this particle's state has
/// been advanced; the rest of the system may be ahead. Streaming a particle
/// to the current simulation time is idempotent. `counter` increments each
/// time the particle participates in a realised event and is the basis of
/// lazy event invalidation.
#[derive(Debug, Clone)]
pub struct Particle {
    /// Stable particle identifier, equal to its index in the store.
    pub id: u32,
    /// Position.
    pub r: Vec3,
    /// Velocity.
    pub v: Vec3,
    /// Simulation time this particle was last synchronised to.
    pub pec_time: f64,
    /// Event participation counter (for lazy invalidation).
    pub counter: u64,
    /// Mobile particles stream; non-dynamic ones have infinite mass and
    /// never move.
    pub dynamic: bool,
    /// Orientation and angular velocity for inertial species.
    pub angular: Option<AngularState>,
}

impl Particle {
    /// Create a new particle after validating invariants.
    pub fn new(id: u32, r: Vec3, v: Vec3) -> Result<Self> {
        if !r.iter().all(|x| x.is_finite()) {
            return Err(Error::InvalidParam("position must be finite".into()));
        }
        if !v.iter().all(|x| x.is_finite()) {
            return Err(Error::InvalidParam("velocity must be finite".into()));
        }
        Ok(Self {
            id,
            r,
            v,
            pec_time: 0.0,
            counter: 0,
            dynamic: true,
            angular: None,
        })
    }

    /// Increment the event counter, invalidating every queued event that
    /// references this particle.
    #[inline]
    pub fn bump_counter(&mut self) {
        self.counter = self.counter.saturating_add(1);
    }

    /// Kinetic energy 1/2 m |v|^2 for the given mass. Static particles
    /// contribute nothing.
    #[inline]
    pub fn kinetic_energy(&self, mass: f64) -> f64 {
        if !self.dynamic {
            return 0.0;
        }
        0.5 * mass * dot(&self.v, &self.v)
    }
}
