use crate::core::world::World;

/// The conserved-quantity record. Replica exchange reads the temperature
/// from here; NVE ensembles fall back to the measured kinetic temperature.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Ensemble {
    Nve,
    Nvt { temperature: f64 },
}

impl Default for Ensemble {
    fn default() -> Self {
        Ensemble::Nve
    }
}

impl Ensemble {
    /// The ensemble values (N, V, E) or (N, V, T).
    pub fn values(&self, world: &World) -> [f64; 3] {
        let n = world.n() as f64;
        let v = world.volume();
        match self {
            Ensemble::Nve => [n, v, world.kinetic_energy()],
            Ensemble::Nvt { temperature } => [n, v, *temperature],
        }
    }

    pub fn temperature(&self, world: &World) -> f64 {
        match self {
            Ensemble::Nve => world.temperature(),
            Ensemble::Nvt { temperature } => *temperature,
        }
    }
}
