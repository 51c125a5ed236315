use crate::core::range::IdRange;
use crate::error::{Error, Result};

/// A named subset of particles sharing mass and, for inertial species, a
/// moment-of-inertia constant (I/m, units of length squared).
#[derive(Debug, Clone, PartialEq)]
pub struct Species {
    pub name: String,
    pub range: IdRange,
    pub mass: f64,
    pub inertia_constant: Option<f64>,
}

impl Species {
    pub fn point(name: impl Into<String>, range: IdRange, mass: f64) -> Result<Self> {
        if !mass.is_finite() || mass <= 0.0 {
            return Err(Error::InvalidParam("species mass must be finite and > 0".into()));
        }
        Ok(Self {
            name: name.into(),
            range,
            mass,
            inertia_constant: None,
        })
    }

    /// Spherical-top species: particles carry angular state with moment of
    /// inertia `inertia_constant * mass`.
    pub fn spherical_top(
        name: impl Into<String>,
        range: IdRange,
        mass: f64,
        inertia_constant: f64,
    ) -> Result<Self> {
        if !inertia_constant.is_finite() || inertia_constant <= 0.0 {
            return Err(Error::InvalidParam(
                "inertia constant must be finite and > 0".into(),
            ));
        }
        let mut s = Self::point(name, range, mass)?;
        s.inertia_constant = Some(inertia_constant);
        Ok(s)
    }

    #[inline]
    pub fn is_species(&self, id: u32) -> bool {
        self.range.contains(id)
    }

    /// Moment of inertia, if this is an inertial species.
    #[inline]
    pub fn moment_of_inertia(&self) -> Option<f64> {
        self.inertia_constant.map(|ic| ic * self.mass)
    }
}
