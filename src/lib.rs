use numpy::ndarray::Array2;
use numpy::{IntoPyArray, PyArray2};
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use std::path::PathBuf;

pub mod config;
pub mod core;
pub mod error;
pub mod units;

use crate::core::Simulation;

fn py_err<E: ToString>(e: E) -> PyErr {
    PyValueError::new_err(e.to_string())
}

/// Python-facing wrapper around the Rust event-driven MD core.
///
/// - `EdmdSim(num_particles, box_size, diameter=1.0, mass=1.0, seed=None)`
///   builds a periodic hard-sphere gas.
/// - `EdmdSim.from_config(path, seed=None)` loads a configuration file
///   (`.xml` or `.xml.bz2`).
/// - `run_events(n)` / `run_until(time)` advance the event stream.
/// - `get_positions()` / `get_velocities()` return `(N, 3)` float64 arrays.
#[pyclass]
pub struct EdmdSim {
    sim: Simulation,
}

#[pymethods]
impl EdmdSim {
    /// Initialise a periodic hard-sphere gas on a cubic lattice.
    ///
    /// Errors: raises ValueError on invalid parameters or when the box
    /// cannot hold a non-overlapping lattice.
    #[new]
    #[pyo3(signature = (num_particles, box_size, diameter=1.0, mass=1.0, seed=None))]
    fn new(
        num_particles: usize,
        box_size: Vec<f64>,
        diameter: f64,
        mass: f64,
        seed: Option<u64>,
    ) -> PyResult<Self> {
        if box_size.len() != 3 {
            return Err(py_err("box_size must have length 3"));
        }
        let mut sim = Simulation::hard_sphere_gas(
            num_particles,
            [box_size[0], box_size[1], box_size[2]],
            diameter,
            mass,
            seed,
        )
        .map_err(py_err)?;
        sim.initialise().map_err(py_err)?;
        Ok(Self { sim })
    }

    /// Load and initialise a simulation from a configuration file.
    #[staticmethod]
    #[pyo3(signature = (path, seed=None))]
    fn from_config(path: PathBuf, seed: Option<u64>) -> PyResult<Self> {
        let mut sim = config::load(&path, seed).map_err(py_err)?;
        sim.initialise().map_err(py_err)?;
        Ok(Self { sim })
    }

    /// Execute `n` realised events (releases the GIL while running).
    fn run_events(&mut self, py: Python<'_>, n: u64) -> PyResult<()> {
        py.allow_threads(|| self.sim.run_events(n)).map_err(py_err)
    }

    /// Advance to an absolute simulation time (releases the GIL).
    fn run_until(&mut self, py: Python<'_>, target_time: f64) -> PyResult<()> {
        py.allow_threads(|| self.sim.run_until_time(target_time))
            .map_err(py_err)
    }

    /// Current simulation time.
    fn time(&self) -> f64 {
        self.sim.time()
    }

    /// Realised events executed so far.
    fn event_count(&self) -> u64 {
        self.sim.event_count()
    }

    fn num_particles(&self) -> usize {
        self.sim.n()
    }

    fn kinetic_energy(&self) -> f64 {
        self.sim.kinetic_energy()
    }

    fn internal_energy(&self) -> f64 {
        self.sim.internal_energy()
    }

    fn packing_fraction(&self) -> f64 {
        self.sim.packing_fraction()
    }

    /// Advisory invariant check; returns the number of violations found.
    fn check_system(&mut self) -> usize {
        self.sim.check_system()
    }

    /// Return positions as a NumPy array of shape (N, 3), dtype=float64.
    /// Particles are synchronised to the current time first.
    fn get_positions<'py>(&mut self, py: Python<'py>) -> PyResult<Py<PyArray2<f64>>> {
        self.sim.world_mut().stream_all();
        let n = self.sim.n();
        let mut arr = Array2::<f64>::zeros((n, 3));
        for (i, p) in self.sim.world().particles.iter().enumerate() {
            for k in 0..3 {
                arr[[i, k]] = p.r[k];
            }
        }
        Ok(arr.into_pyarray(py).to_owned().into())
    }

    /// Return velocities as a NumPy array of shape (N, 3), dtype=float64.
    fn get_velocities<'py>(&mut self, py: Python<'py>) -> PyResult<Py<PyArray2<f64>>> {
        self.sim.world_mut().stream_all();
        let n = self.sim.n();
        let mut arr = Array2::<f64>::zeros((n, 3));
        for (i, p) in self.sim.world().particles.iter().enumerate() {
            for k in 0..3 {
                arr[[i, k]] = p.v[k];
            }
        }
        Ok(arr.into_pyarray(py).to_owned().into())
    }

    /// Write the current state to a configuration file (`.xml` or
    /// `.xml.bz2`).
    fn save_config(&self, path: PathBuf) -> PyResult<()> {
        config::save(&self.sim, &path).map_err(py_err)
    }

    /// Write the run summary document.
    fn save_output(&self, path: PathBuf) -> PyResult<()> {
        config::output_data(&self.sim, &path).map_err(py_err)
    }
}

/// The edmd Python module entry point.
#[pymodule]
fn edmd(_py: Python<'_>, m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<EdmdSim>()?;
    Ok(())
}
