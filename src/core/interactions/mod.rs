//! Pairwise interactions: the ordered registry, the capture-map
//! bookkeeping for stepped potentials, and the concrete interaction types.

mod dumbbells;
mod hardsphere;
mod lines;
mod roughhardsphere;
mod squarebond;
mod squarewell;

pub use dumbbells::Dumbbells;
pub use hardsphere::HardSphere;
pub use lines::Lines;
pub use roughhardsphere::RoughHardSphere;
pub use squarebond::SquareBond;
pub use squarewell::SquareWell;

use crate::core::dynamics::PairEventData;
use crate::core::event::Event;
use crate::core::range::PairRange;
use crate::core::world::World;
use crate::error::{Error, Result};
use std::collections::HashSet;

/// Symmetric set of pairs currently inside an attractive well (or tracked
/// by a bounding sphere for composite bodies). Mutated only when the
/// corresponding WELL_IN/WELL_OUT events execute.
#[derive(Debug, Default, Clone)]
pub struct CaptureMap {
    pairs: HashSet<(u32, u32)>,
}

impl CaptureMap {
    #[inline]
    fn key(i: u32, j: u32) -> (u32, u32) {
        if i <= j {
            (i, j)
        } else {
            (j, i)
        }
    }

    #[inline]
    pub fn contains(&self, i: u32, j: u32) -> bool {
        self.pairs.contains(&Self::key(i, j))
    }

    pub fn insert(&mut self, i: u32, j: u32) {
        self.pairs.insert(Self::key(i, j));
    }

    pub fn remove(&mut self, i: u32, j: u32) {
        self.pairs.remove(&Self::key(i, j));
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.pairs.iter().copied()
    }

    pub fn clear(&mut self) {
        self.pairs.clear();
    }
}

/// Serializable description of an interaction; the configuration layer
/// maps these to and from XML.
#[derive(Debug, Clone, PartialEq)]
pub enum InteractionSpec {
    HardSphere {
        name: String,
        range: PairRange,
        diameter: f64,
        elasticity: f64,
    },
    SquareWell {
        name: String,
        range: PairRange,
        diameter: f64,
        lambda: f64,
        well_depth: f64,
        elasticity: f64,
        captures: Vec<(u32, u32)>,
    },
    SquareBond {
        name: String,
        range: PairRange,
        diameter: f64,
        lambda: f64,
    },
    RoughHardSphere {
        name: String,
        range: PairRange,
        diameter: f64,
        elasticity: f64,
        tangential_elasticity: f64,
    },
    Lines {
        name: String,
        range: PairRange,
        length: f64,
        elasticity: f64,
        captures: Vec<(u32, u32)>,
    },
    Dumbbells {
        name: String,
        range: PairRange,
        length: f64,
        radius: f64,
        elasticity: f64,
        captures: Vec<(u32, u32)>,
    },
}

impl InteractionSpec {
    pub fn name(&self) -> &str {
        match self {
            InteractionSpec::HardSphere { name, .. }
            | InteractionSpec::SquareWell { name, .. }
            | InteractionSpec::SquareBond { name, .. }
            | InteractionSpec::RoughHardSphere { name, .. }
            | InteractionSpec::Lines { name, .. }
            | InteractionSpec::Dumbbells { name, .. } => name,
        }
    }

    /// Instantiate the interaction this spec describes.
    pub fn build(self) -> Box<dyn Interaction> {
        match self {
            InteractionSpec::HardSphere {
                name,
                range,
                diameter,
                elasticity,
            } => Box::new(HardSphere::new(name, range, diameter, elasticity)),
            InteractionSpec::SquareWell {
                name,
                range,
                diameter,
                lambda,
                well_depth,
                elasticity,
                captures,
            } => Box::new(SquareWell::with_captures(
                name, range, diameter, lambda, well_depth, elasticity, captures,
            )),
            InteractionSpec::SquareBond {
                name,
                range,
                diameter,
                lambda,
            } => Box::new(SquareBond::new(name, range, diameter, lambda)),
            InteractionSpec::RoughHardSphere {
                name,
                range,
                diameter,
                elasticity,
                tangential_elasticity,
            } => Box::new(RoughHardSphere::new(
                name,
                range,
                diameter,
                elasticity,
                tangential_elasticity,
            )),
            InteractionSpec::Lines {
                name,
                range,
                length,
                elasticity,
                captures,
            } => Box::new(Lines::with_captures(name, range, length, elasticity, captures)),
            InteractionSpec::Dumbbells {
                name,
                range,
                length,
                radius,
                elasticity,
                captures,
            } => Box::new(Dumbbells::with_captures(
                name, range, length, radius, elasticity, captures,
            )),
        }
    }
}

/// A pairwise interaction rule.
///
/// `get_event` lazily streams both participants to the current simulation
/// time before root finding, so it takes `&mut World`. Event times are
/// absolute.
pub trait Interaction: std::fmt::Debug + Send + Sync {
    fn name(&self) -> &str;

    fn range(&self) -> &PairRange;

    /// Registry position, assigned at initialisation; stamped into events
    /// so the scheduler can dispatch back without a second range scan.
    fn index(&self) -> usize;

    /// Whether covered particles must carry angular state.
    fn requires_orientation(&self) -> bool {
        false
    }

    fn initialise(&mut self, index: usize, world: &mut World) -> Result<()>;

    /// Upper bound on the interaction range; the maximum over the registry
    /// sets the cell edge length.
    fn max_int_dist(&self) -> f64;

    /// Volume excluded by particle `id` under this interaction.
    fn excluded_volume(&self, world: &World, id: u32) -> f64;

    /// Potential energy currently stored in this interaction.
    fn internal_energy(&self) -> f64 {
        0.0
    }

    /// Soonest event for the pair, or `None` when they never interact.
    fn get_event(&self, world: &mut World, i: usize, j: usize) -> Result<Option<Event>>;

    /// Execute an event produced by `get_event`, updating particle state
    /// and capture bookkeeping.
    fn run_event(&mut self, world: &mut World, ev: &Event) -> Result<PairEventData>;

    /// Whether the pair is currently in this interaction's capture map.
    fn captured(&self, _i: u32, _j: u32) -> bool {
        false
    }

    /// Recompute whether the pair should be captured from its current
    /// separation.
    fn capture_test(&self, _world: &World, _i: usize, _j: usize) -> Result<bool> {
        Ok(false)
    }

    /// Advisory consistency check; returns the number of violations.
    fn validate_state(&self, world: &World) -> usize;

    /// Scale every stored length (compression restore).
    fn rescale_lengths(&mut self, factor: f64);

    fn spec(&self) -> InteractionSpec;
}

/// Index of the first interaction whose selector covers the pair.
pub fn interaction_for(list: &[Box<dyn Interaction>], i: u32, j: u32) -> Option<usize> {
    list.iter().position(|int| int.range().covers(i, j))
}

/// Soonest event for a pair via the registry (first match wins).
pub fn pair_event(
    world: &mut World,
    list: &[Box<dyn Interaction>],
    i: usize,
    j: usize,
) -> Result<Option<Event>> {
    let idx = interaction_for(list, i as u32, j as u32).ok_or_else(|| {
        Error::Config(format!("no interaction defined between particles {i} and {j}"))
    })?;
    list[idx].get_event(world, i, j)
}
