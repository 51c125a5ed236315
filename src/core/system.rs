//! Fixed-schedule SYSTEM events: halts, tickers and the compression
//! neighbour-list fix. A closed set, scheduled under a dedicated sorter
//! slot and rebuilt wholesale whenever their timetable changes.

use crate::core::world::World;
use crate::error::Result;

/// Action requested by an executed system event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemAction {
    None,
    /// Stop the run at the next step boundary.
    Halt,
    /// Rebuild the cell grid against the current interaction ranges.
    RebuildCells,
}

/// A system event with an absolute schedule.
#[derive(Debug, Clone, PartialEq)]
pub enum SystemEvent {
    /// One-shot halt at an absolute simulation time.
    Halt { name: String, time: Option<f64> },
    /// Periodic progress tick.
    Ticker {
        name: String,
        period: f64,
        next: f64,
    },
    /// Watches growing diameters under compression and requests a grid
    /// rebuild before they outgrow the cell edge.
    NbListCompressionFix {
        name: String,
        growth_rate: f64,
        /// Cell edge over interaction range headroom left, as a time.
        next: f64,
    },
}

impl SystemEvent {
    pub fn halt(name: impl Into<String>, time: f64) -> Self {
        SystemEvent::Halt {
            name: name.into(),
            time: Some(time),
        }
    }

    pub fn ticker(name: impl Into<String>, period: f64, now: f64) -> Self {
        SystemEvent::Ticker {
            name: name.into(),
            period,
            next: now + period,
        }
    }

    /// `headroom` is the time until the grown interaction range meets the
    /// current cell edge.
    pub fn compression_fix(name: impl Into<String>, growth_rate: f64, now: f64, headroom: f64) -> Self {
        SystemEvent::NbListCompressionFix {
            name: name.into(),
            growth_rate,
            next: now + headroom,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            SystemEvent::Halt { name, .. }
            | SystemEvent::Ticker { name, .. }
            | SystemEvent::NbListCompressionFix { name, .. } => name,
        }
    }

    /// Next firing time, if any remains scheduled.
    pub fn next_time(&self) -> Option<f64> {
        match self {
            SystemEvent::Halt { time, .. } => *time,
            SystemEvent::Ticker { next, .. } => Some(*next),
            SystemEvent::NbListCompressionFix { next, .. } => Some(*next),
        }
    }

    /// Execute at the scheduled time and reschedule.
    pub fn run(&mut self, world: &mut World, event_count: u64) -> Result<SystemAction> {
        match self {
            SystemEvent::Halt { name, time } => {
                log::info!("system event {name}: halting at t = {}", world.sim_time);
                *time = None;
                Ok(SystemAction::Halt)
            }
            SystemEvent::Ticker { period, next, .. } => {
                log::info!(
                    "t = {:.6}, {} events, KE = {:.6}",
                    world.sim_time,
                    event_count,
                    world.kinetic_energy()
                );
                *next += *period;
                Ok(SystemAction::None)
            }
            SystemEvent::NbListCompressionFix { name, .. } => {
                log::debug!("system event {name}: rebuilding cells under compression");
                // The scheduler reschedules this from the headroom the
                // rebuilt grid actually has.
                Ok(SystemAction::RebuildCells)
            }
        }
    }
}
