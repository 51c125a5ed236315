//! The simulation container: owns every component, enforces the
//! init-phase ordering, and exposes the stepping, replica-exchange and
//! compression drivers.

use crate::core::boundary::Boundary;
use crate::core::dynamics::Dynamics;
use crate::core::ensemble::Ensemble;
use crate::core::globals::{Global, ParabolaSentinel, PbcSentinel};
use crate::core::interactions::{interaction_for, Interaction};
use crate::core::locals::Local;
use crate::core::particle::{AngularState, Particle};
use crate::core::range::IdRange;
use crate::core::scheduler::{ExecutedEvent, Scheduler};
use crate::core::species::Species;
use crate::core::system::{SystemAction, SystemEvent};
use crate::core::vec3::Vec3;
use crate::core::world::World;
use crate::error::{Error, Result};
use rand::Rng;

/// Linear lifecycle of a simulation. Transitions are monotonic; mutating
/// the component lists after `Initialised` is a state violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SimStatus {
    Start,
    SpeciesInit,
    DynamicsInit,
    InteractionInit,
    LocalInit,
    GlobalInit,
    SystemInit,
    EnsembleInit,
    SchedulerInit,
    OutputPluginInit,
    Initialised,
}

/// An event-driven molecular dynamics simulation instance.
#[derive(Debug)]
pub struct Simulation {
    pub(crate) world: World,
    interactions: Vec<Box<dyn Interaction>>,
    locals: Vec<Box<dyn Local>>,
    globals: Vec<Box<dyn Global>>,
    systems: Vec<SystemEvent>,
    scheduler: Scheduler,
    ensemble: Ensemble,
    status: SimStatus,
    event_count: u64,
    end_event_count: u64,
    last_run_mft: f64,
    saved_dynamics: Option<Dynamics>,
    compression_rate: Option<f64>,
}

impl Simulation {
    pub fn new(seed: Option<u64>) -> Self {
        Self {
            world: World::new(seed),
            interactions: Vec::new(),
            locals: Vec::new(),
            globals: Vec::new(),
            systems: Vec::new(),
            scheduler: Scheduler::new(),
            ensemble: Ensemble::default(),
            status: SimStatus::Start,
            event_count: 0,
            end_event_count: u64::MAX,
            last_run_mft: 0.0,
            saved_dynamics: None,
            compression_rate: None,
        }
    }

    fn check_mutable(&self, what: &str) -> Result<()> {
        if self.status >= SimStatus::Initialised {
            return Err(Error::State(format!(
                "cannot add {what} after simulation initialisation"
            )));
        }
        Ok(())
    }

    // ---- Construction ----

    pub fn set_primary_cell(&mut self, size: Vec3) -> Result<()> {
        self.check_mutable("a primary cell")?;
        if !size.iter().all(|l| l.is_finite() && *l > 0.0) {
            return Err(Error::InvalidParam(
                "primary cell lengths must be finite and > 0".into(),
            ));
        }
        self.world.primary_cell = size;
        Ok(())
    }

    pub fn set_boundary(&mut self, bc: Boundary) -> Result<()> {
        self.check_mutable("a boundary condition")?;
        self.world.bc = bc;
        Ok(())
    }

    pub fn set_dynamics(&mut self, dynamics: Dynamics) -> Result<()> {
        self.check_mutable("dynamics")?;
        self.world.dynamics = dynamics;
        Ok(())
    }

    pub fn set_ensemble(&mut self, ensemble: Ensemble) -> Result<()> {
        self.check_mutable("an ensemble")?;
        self.ensemble = ensemble;
        Ok(())
    }

    pub fn add_species(&mut self, species: Species) -> Result<()> {
        self.check_mutable("a species")?;
        if self.world.species.iter().any(|s| s.name == species.name) {
            return Err(Error::Config(format!(
                "species name {} is not unique",
                species.name
            )));
        }
        self.world.species.push(species);
        Ok(())
    }

    pub fn add_particle(&mut self, r: Vec3, v: Vec3) -> Result<u32> {
        self.check_mutable("a particle")?;
        let id = self.world.n() as u32;
        self.world.particles.push(Particle::new(id, r, v)?);
        Ok(id)
    }

    pub fn add_interaction(&mut self, interaction: Box<dyn Interaction>) -> Result<()> {
        self.check_mutable("an interaction")?;
        if self
            .interactions
            .iter()
            .any(|i| i.name() == interaction.name())
        {
            return Err(Error::Config(format!(
                "interaction name {} is not unique",
                interaction.name()
            )));
        }
        self.interactions.push(interaction);
        Ok(())
    }

    pub fn add_local(&mut self, local: Box<dyn Local>) -> Result<()> {
        self.check_mutable("a local")?;
        self.locals.push(local);
        Ok(())
    }

    pub fn add_global(&mut self, global: Box<dyn Global>) -> Result<()> {
        self.check_mutable("a global")?;
        self.globals.push(global);
        Ok(())
    }

    pub fn add_system_event(&mut self, system: SystemEvent) -> Result<()> {
        if self.status >= SimStatus::Initialised {
            // System events may be appended later through the dedicated
            // drivers; direct additions stay pre-init.
            return Err(Error::State(
                "cannot add system events after initialisation".into(),
            ));
        }
        self.systems.push(system);
        Ok(())
    }

    pub fn set_last_run_mft(&mut self, mft: f64) {
        self.last_run_mft = mft;
    }

    /// Convenience constructor: N identical hard spheres on a cubic
    /// lattice in a periodic box, velocities uniform in [-1, 1] per
    /// component with the centre-of-mass drift removed.
    pub fn hard_sphere_gas(
        n: usize,
        box_size: Vec3,
        diameter: f64,
        mass: f64,
        seed: Option<u64>,
    ) -> Result<Self> {
        if n == 0 {
            return Err(Error::InvalidParam("n must be > 0".into()));
        }
        if !diameter.is_finite() || diameter <= 0.0 {
            return Err(Error::InvalidParam("diameter must be finite and > 0".into()));
        }
        let mut sim = Simulation::new(seed);
        sim.set_primary_cell(box_size)?;
        sim.set_boundary(Boundary::Periodic { box_size })?;
        sim.add_species(Species::point(
            "Bulk",
            IdRange::Span {
                start: 0,
                end: n as u32,
            },
            mass,
        )?)?;
        sim.add_interaction(Box::new(crate::core::interactions::HardSphere::new(
            "Bulk",
            crate::core::range::PairRange::All,
            diameter,
            1.0,
        )))?;

        // Simple cubic lattice; reject configurations that cannot fit.
        let side = (n as f64).cbrt().ceil() as usize;
        let spacing = [
            box_size[0] / side as f64,
            box_size[1] / side as f64,
            box_size[2] / side as f64,
        ];
        if spacing.iter().any(|&s| s < diameter) {
            return Err(Error::InvalidParam(
                "box too small for a non-overlapping lattice at this diameter".into(),
            ));
        }
        for id in 0..n {
            let cx = id % side;
            let cy = (id / side) % side;
            let cz = id / (side * side);
            let r = [
                -0.5 * box_size[0] + (cx as f64 + 0.5) * spacing[0],
                -0.5 * box_size[1] + (cy as f64 + 0.5) * spacing[1],
                -0.5 * box_size[2] + (cz as f64 + 0.5) * spacing[2],
            ];
            let v = [
                sim.world.rng.random_range(-1.0..=1.0),
                sim.world.rng.random_range(-1.0..=1.0),
                sim.world.rng.random_range(-1.0..=1.0),
            ];
            sim.add_particle(r, v)?;
        }
        sim.world.zero_com_velocity()?;
        Ok(sim)
    }

    // ---- Initialisation ----

    /// Run the ordered init phases. Fails on any coverage or sizing error;
    /// the status records the phase reached.
    pub fn initialise(&mut self) -> Result<()> {
        if self.status != SimStatus::Start {
            return Err(Error::State(format!(
                "simulation initialised in the wrong phase ({:?})",
                self.status
            )));
        }

        // Species must partition the particle set.
        for p in &self.world.particles {
            let count = self
                .world
                .species
                .iter()
                .filter(|s| s.is_species(p.id))
                .count();
            if count == 0 {
                return Err(Error::Config(format!("particle {} has no species", p.id)));
            }
            if count > 1 {
                return Err(Error::Config(format!(
                    "particle {} has more than one species",
                    p.id
                )));
            }
        }
        {
            let mut total = 0usize;
            for s in &self.world.species {
                total += s
                    .range
                    .count()
                    .unwrap_or_else(|| self.world.n());
            }
            if total != self.world.n() {
                return Err(Error::Config(format!(
                    "species counts ({total}) do not match the particle count ({})",
                    self.world.n()
                )));
            }
        }
        // Inertial species grant angular state up front.
        for s in &self.world.species {
            if s.inertia_constant.is_some() {
                for p in &mut self.world.particles {
                    if s.is_species(p.id) && p.angular.is_none() {
                        p.angular = Some(AngularState::new([0.0, 0.0, 1.0], [0.0; 3]));
                    }
                }
            }
        }
        self.status = SimStatus::SpeciesInit;
        self.status = SimStatus::DynamicsInit;

        // Every pair (and every self-pair) needs a responsible interaction.
        for i in 0..self.world.n() as u32 {
            if interaction_for(&self.interactions, i, i).is_none() {
                return Err(Error::Config(format!(
                    "particle {i} has no self interaction defined"
                )));
            }
            for j in (i + 1)..self.world.n() as u32 {
                if interaction_for(&self.interactions, i, j).is_none() {
                    return Err(Error::Config(format!(
                        "no interaction defined between particles {i} and {j}"
                    )));
                }
            }
        }
        for (idx, interaction) in self.interactions.iter_mut().enumerate() {
            interaction.initialise(idx, &mut self.world)?;
        }
        // Under periodic boundaries a particle must not reach two images
        // of the same partner.
        if self.world.bc.is_periodic() {
            let max_dist = self.longest_interaction();
            for k in 0..3 {
                if self.world.primary_cell[k] <= 2.0 * max_dist {
                    return Err(Error::Config(format!(
                        "primary cell axis {k} ({}) must exceed twice the longest \
                         interaction distance ({max_dist})",
                        self.world.primary_cell[k]
                    )));
                }
            }
        }
        self.status = SimStatus::InteractionInit;

        for (idx, local) in self.locals.iter_mut().enumerate() {
            local.initialise(idx, &self.world)?;
        }
        self.status = SimStatus::LocalInit;

        // Sentinels attach themselves; neighbour-capable globals must come
        // after locals so local IDs are assigned.
        if self.world.bc.is_periodic()
            && !self
                .globals
                .iter()
                .any(|g| matches!(g.spec(), crate::core::globals::GlobalSpec::PbcSentinel { .. }))
        {
            self.globals.push(Box::new(PbcSentinel::new("PBCSentinel")));
        }
        if matches!(self.world.dynamics, Dynamics::NewtonianGravity { .. })
            && !self.globals.iter().any(|g| {
                matches!(
                    g.spec(),
                    crate::core::globals::GlobalSpec::ParabolaSentinel { .. }
                )
            })
        {
            self.globals
                .push(Box::new(ParabolaSentinel::new("ParabolaSentinel")));
        }
        for (idx, global) in self.globals.iter_mut().enumerate() {
            global.initialise(idx, &self.world)?;
        }
        self.status = SimStatus::GlobalInit;
        self.status = SimStatus::SystemInit;
        self.status = SimStatus::EnsembleInit;

        self.scheduler.initialise(
            &mut self.world,
            &self.interactions,
            &self.locals,
            &self.globals,
            &self.systems,
        )?;
        self.status = SimStatus::SchedulerInit;
        self.status = SimStatus::OutputPluginInit;
        self.status = SimStatus::Initialised;
        log::info!(
            "simulation initialised: {} particles, {} interaction(s), {} cell(s)",
            self.world.n(),
            self.interactions.len(),
            self.scheduler.cells().map(|c| c.n_cells()).unwrap_or(0)
        );
        Ok(())
    }

    // ---- Accessors ----

    pub fn status(&self) -> SimStatus {
        self.status
    }

    pub fn time(&self) -> f64 {
        self.world.sim_time
    }

    pub fn event_count(&self) -> u64 {
        self.event_count
    }

    pub fn n(&self) -> usize {
        self.world.n()
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    pub fn interactions(&self) -> &[Box<dyn Interaction>] {
        &self.interactions
    }

    pub fn locals(&self) -> &[Box<dyn Local>] {
        &self.locals
    }

    pub fn globals(&self) -> &[Box<dyn Global>] {
        &self.globals
    }

    pub fn systems(&self) -> &[SystemEvent] {
        &self.systems
    }

    pub fn ensemble(&self) -> &Ensemble {
        &self.ensemble
    }

    pub fn last_run_mft(&self) -> f64 {
        self.last_run_mft
    }

    pub fn freestream_acc(&self) -> f64 {
        self.world.freestream_acc
    }

    pub fn kinetic_energy(&self) -> f64 {
        self.world.kinetic_energy()
    }

    /// Potential energy stored across all interactions.
    pub fn internal_energy(&self) -> f64 {
        self.interactions.iter().map(|i| i.internal_energy()).sum()
    }

    pub fn total_energy(&self) -> f64 {
        self.kinetic_energy() + self.internal_energy()
    }

    pub fn longest_interaction(&self) -> f64 {
        self.interactions
            .iter()
            .map(|i| i.max_int_dist())
            .fold(0.0_f64, f64::max)
    }

    /// Fraction of the primary cell occupied by particle cores.
    pub fn packing_fraction(&self) -> f64 {
        let mut vol = 0.0;
        for p in &self.world.particles {
            if let Some(idx) = interaction_for(&self.interactions, p.id, p.id) {
                vol += self.interactions[idx].excluded_volume(&self.world, p.id);
            }
        }
        vol / self.world.volume()
    }

    /// Mean free time over the realised events so far.
    pub fn mean_free_time(&self) -> f64 {
        if self.event_count == 0 {
            return self.last_run_mft;
        }
        self.world.sim_time * self.world.n() as f64 / (2.0 * self.event_count as f64)
    }

    // ---- Stepping ----

    /// Execute the next event. Errors are wrapped with the event count so
    /// a failing run identifies where it died.
    pub fn step(&mut self) -> Result<ExecutedEvent> {
        if self.status < SimStatus::Initialised {
            return Err(Error::State("bad state for stepping".into()));
        }
        let count = self.event_count;
        let result = self.scheduler.run_next_event(
            &mut self.world,
            &mut self.interactions,
            &mut self.locals,
            &mut self.globals,
            &mut self.systems,
            &mut self.event_count,
        );
        match result {
            Ok(ExecutedEvent::System { action, .. }) if action == SystemAction::Halt => {
                self.end_event_count = self.event_count;
                result
            }
            Ok(other) => Ok(other),
            Err(e) => Err(Error::State(format!(
                "exception while executing event {count}: {e}"
            ))),
        }
    }

    /// Run one step; returns whether the run should continue.
    pub fn run_simulation_step(&mut self) -> Result<bool> {
        self.step()?;
        Ok(self.event_count < self.end_event_count)
    }

    /// Execute `n` realised events (virtual events do not count).
    pub fn run_events(&mut self, n: u64) -> Result<()> {
        let target = self.event_count + n;
        while self.event_count < target {
            match self.step()? {
                ExecutedEvent::Exhausted => break,
                ExecutedEvent::System { action, .. } if action == SystemAction::Halt => break,
                _ => {}
            }
        }
        Ok(())
    }

    /// Advance the simulation clock to `t`, executing every event due on
    /// the way and streaming the remainder.
    pub fn run_until_time(&mut self, t: f64) -> Result<()> {
        if self.status < SimStatus::Initialised {
            return Err(Error::State("bad state for stepping".into()));
        }
        if !t.is_finite() || t < self.world.sim_time {
            return Err(Error::InvalidParam(
                "target time must be finite and ahead of the clock".into(),
            ));
        }
        loop {
            match self.scheduler.peek_next_valid_time(&self.world) {
                Some(te) if te <= t => match self.step()? {
                    ExecutedEvent::Exhausted => break,
                    ExecutedEvent::System { action, .. } if action == SystemAction::Halt => {
                        // Stop at the halt boundary rather than streaming on.
                        return Ok(());
                    }
                    _ => {}
                },
                _ => break,
            }
        }
        let dt = t - self.world.sim_time;
        if dt > 0.0 {
            self.world.sim_time = t;
            self.world.bc.update(dt);
            self.world.stream_all();
        }
        Ok(())
    }

    /// Earliest queued event time that would survive validation.
    pub fn peek_next_event_time(&mut self) -> Option<f64> {
        self.scheduler.peek_next_valid_time(&self.world)
    }

    /// Request a soft shutdown: the current step boundary becomes the end
    /// of the run.
    pub fn sim_shutdown(&mut self) {
        self.end_event_count = self.event_count;
    }

    pub fn set_end_event_count(&mut self, count: u64) {
        self.end_event_count = count;
    }

    /// Schedule a halt at an absolute simulation time.
    pub fn halt_at(&mut self, time: f64) -> Result<()> {
        self.systems.push(SystemEvent::halt("Halt", time));
        if self.status >= SimStatus::Initialised {
            self.scheduler.rebuild_system_events(&self.systems)?;
        }
        Ok(())
    }

    // ---- Consistency ----

    /// Advisory validation of every invariant-carrying structure. Returns
    /// the number of violations found.
    pub fn check_system(&mut self) -> usize {
        self.world.stream_all();
        let mut errors = 0;
        for interaction in &self.interactions {
            errors += interaction.validate_state(&self.world);
        }
        for local in &self.locals {
            for p in 0..self.world.n() {
                if local.covers(p as u32) {
                    errors += local.validate_state(&self.world, p);
                }
            }
        }
        errors += self.scheduler.validate_cells(&self.world);
        if errors > 0 {
            log::warn!("check_system found {errors} violation(s)");
        }
        errors
    }

    // ---- Replica exchange ----

    /// Swap thermodynamic identity with `other`: velocities are rescaled
    /// by the temperature ratio, queued event times by the inverse, and
    /// the ensembles exchange. Total kinetic energy after the exchange
    /// equals the partner's pre-exchange value (exactly, for NVE pairs of
    /// equal size).
    pub fn replica_exchange(&mut self, other: &mut Simulation) -> Result<()> {
        if self.status < SimStatus::Initialised || other.status < SimStatus::Initialised {
            return Err(Error::State(
                "replica exchange requires initialised simulations".into(),
            ));
        }
        self.world.stream_all();
        other.world.stream_all();

        let t_self = self.ensemble.temperature(&self.world);
        let t_other = other.ensemble.temperature(&other.world);
        if !(t_self > 0.0) || !(t_other > 0.0) {
            return Err(Error::InvalidParam(
                "replica exchange requires positive temperatures".into(),
            ));
        }
        let scale1 = (t_other / t_self).sqrt();
        let scale2 = 1.0 / scale1;

        for p in &mut self.world.particles {
            for v in &mut p.v {
                *v *= scale1;
            }
        }
        self.scheduler.rescale_times(scale2, self.world.sim_time)?;

        for p in &mut other.world.particles {
            for v in &mut p.v {
                *v *= scale2;
            }
        }
        other
            .scheduler
            .rescale_times(scale1, other.world.sim_time)?;

        self.scheduler.rebuild_system_events(&self.systems)?;
        other.scheduler.rebuild_system_events(&other.systems)?;

        std::mem::swap(&mut self.ensemble, &mut other.ensemble);
        log::debug!("replica exchange at scale {scale1:.6}");
        Ok(())
    }

    // ---- Compression driver ----

    /// Swap to the compression propagator: diameters grow at `growth_rate`
    /// until `restore_system` is called. The cell grid loses its overlap
    /// headroom and gains a watchdog that rebuilds it as diameters grow.
    pub fn begin_compression(&mut self, growth_rate: f64) -> Result<()> {
        if self.status < SimStatus::Initialised {
            return Err(Error::State("compression requires an initialised simulation".into()));
        }
        if self.compression_rate.is_some() {
            return Err(Error::State("compression already active".into()));
        }
        if !(growth_rate > 0.0) {
            return Err(Error::InvalidParam("growth rate must be > 0".into()));
        }
        if !matches!(self.world.dynamics, Dynamics::Newtonian) {
            return Err(Error::State(
                "compression starts from Newtonian dynamics".into(),
            ));
        }
        log::info!("compression started, growth rate {growth_rate}");
        self.world.stream_all();
        self.saved_dynamics = Some(self.world.dynamics.clone());
        self.world.dynamics = Dynamics::Compression { growth_rate };
        self.compression_rate = Some(growth_rate);
        self.scheduler.set_cell_overlap(false);

        // Watch the growing diameters against the cell edge. It fires
        // immediately; the scheduler reschedules it from the true headroom
        // after each rebuild.
        self.systems.push(SystemEvent::compression_fix(
            "NbListCompressionFix",
            growth_rate,
            self.world.sim_time,
            0.0,
        ));
        self.scheduler.initialise(
            &mut self.world,
            &self.interactions,
            &self.locals,
            &self.globals,
            &self.systems,
        )?;
        Ok(())
    }

    /// End a compression run: restore the saved propagator and rescale the
    /// units so the grown diameters read as their original values.
    pub fn restore_system(&mut self) -> Result<()> {
        let Some(growth_rate) = self.compression_rate.take() else {
            return Err(Error::State("no compression to restore".into()));
        };
        self.world.stream_all();
        let factor = 1.0 + self.world.sim_time * growth_rate;
        // The grown lengths become the stored lengths, and the unit scales
        // grow with them so every length reads as its pre-compression value
        // on output. Length and time rescale together, leaving the velocity
        // and energy scales unchanged.
        for interaction in &mut self.interactions {
            interaction.rescale_lengths(factor);
        }
        for local in &mut self.locals {
            local.rescale_lengths(factor);
        }
        self.world.units.rescale_length(factor);
        self.world.units.rescale_time(factor);
        self.world.dynamics = self
            .saved_dynamics
            .take()
            .unwrap_or(Dynamics::Newtonian);
        self.systems
            .retain(|s| !matches!(s, SystemEvent::NbListCompressionFix { .. }));
        self.scheduler.set_cell_overlap(true);
        self.scheduler.initialise(
            &mut self.world,
            &self.interactions,
            &self.locals,
            &self.globals,
            &self.systems,
        )?;
        log::info!("compression restored, unit rescale factor {factor:.6}");
        Ok(())
    }

    /// Halt the compression once the packing fraction reaches `target`.
    pub fn limit_packing_fraction(&mut self, target: f64) -> Result<()> {
        let Some(growth_rate) = self.compression_rate else {
            return Err(Error::State("packing limit requires active compression".into()));
        };
        let current = self.packing_fraction();
        if target <= current {
            return Err(Error::InvalidParam(format!(
                "target packing fraction {target} is not above the current {current}"
            )));
        }
        let dt = ((target / current).powf(1.0 / 3.0) - 1.0) / growth_rate
            * self.world.dynamics.diameter_scale(self.world.sim_time);
        self.systems
            .push(SystemEvent::halt("CompressionLimiter", self.world.sim_time + dt));
        self.scheduler.rebuild_system_events(&self.systems)?;
        log::info!("compression limited to packing fraction {target} (halt in {dt:.6})");
        Ok(())
    }

    /// Halt the compression at a target number density.
    pub fn limit_density(&mut self, target: f64) -> Result<()> {
        let molar_volume = self.packing_fraction() * self.world.volume()
            / (self.world.n() as f64);
        self.limit_packing_fraction(molar_volume * target)
    }
}
