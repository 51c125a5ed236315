use edmd::core::{ExecutedEvent, Simulation};
use edmd::error::Result;

/// NVE hard-sphere gas under periodic boundaries: energy and momentum are
/// conserved over many realised events, and the extracted event times are
/// non-decreasing.
#[test]
fn energy_momentum_and_ordering() -> Result<()> {
    let mut sim = Simulation::hard_sphere_gas(125, [12.0, 12.0, 12.0], 0.5, 1.0, Some(12345))?;
    sim.initialise()?;

    let e0 = sim.kinetic_energy();
    let p0 = sim.world().momentum();

    let mut last_time = 0.0;
    let mut realised = 0u64;
    let mut steps = 0u64;
    while realised < 5000 && steps < 500_000 {
        let out = sim.step()?;
        steps += 1;
        let t = match out {
            ExecutedEvent::Interaction { time, .. } => {
                realised += 1;
                time
            }
            ExecutedEvent::Local { time, .. } => {
                realised += 1;
                time
            }
            ExecutedEvent::CellCrossing { time, .. } => time,
            ExecutedEvent::Global { time, .. } => time,
            ExecutedEvent::System { time, .. } => time,
            ExecutedEvent::Recalculate { time, .. } => time,
            ExecutedEvent::Exhausted => break,
        };
        assert!(
            t >= last_time - 1e-12,
            "event time decreased: {t} after {last_time}"
        );
        last_time = t;
    }
    assert!(realised >= 5000, "only {realised} realised events");

    let e1 = sim.kinetic_energy();
    let rel = ((e1 - e0) / e0).abs();
    assert!(
        rel < 1e-9,
        "relative energy drift {rel} too large (E0={e0}, E1={e1})"
    );

    let p1 = sim.world().momentum();
    for k in 0..3 {
        assert!(
            (p1[k] - p0[k]).abs() < 1e-9,
            "momentum component {k} drifted: {} -> {}",
            p0[k],
            p1[k]
        );
    }
    Ok(())
}

/// The advisory validators find nothing wrong mid-run: no core overlaps,
/// intact cell lists.
#[test]
fn invariants_hold_during_run() -> Result<()> {
    let mut sim = Simulation::hard_sphere_gas(64, [10.0, 10.0, 10.0], 0.5, 1.0, Some(777))?;
    sim.initialise()?;
    for _ in 0..5 {
        sim.run_events(500)?;
        let errors = sim.check_system();
        assert_eq!(errors, 0, "validators reported {errors} violation(s)");
    }
    Ok(())
}

/// Approximate isotropy at equilibrium: per-axis mean squared velocities
/// spread by less than 20% of the mean after mixing.
#[test]
fn isotropy_after_mixing() -> Result<()> {
    let mut sim = Simulation::hard_sphere_gas(125, [12.0, 12.0, 12.0], 0.5, 1.0, Some(7777))?;
    sim.initialise()?;
    sim.run_events(10_000)?;

    let mut sum_sq = [0.0_f64; 3];
    let n = sim.n() as f64;
    for p in &sim.world().particles {
        for (k, vk) in p.v.iter().enumerate() {
            sum_sq[k] += vk * vk;
        }
    }
    for x in &mut sum_sq {
        *x /= n;
    }
    let mean = (sum_sq[0] + sum_sq[1] + sum_sq[2]) / 3.0;
    let maxv = sum_sq.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let minv = sum_sq.iter().cloned().fold(f64::INFINITY, f64::min);
    assert!(
        (maxv - minv) / mean < 0.2,
        "anisotropy too high: {sum_sq:?}"
    );
    Ok(())
}
