use edmd::core::interactions::HardSphere;
use edmd::core::{
    Boundary, Dynamics, ExecutedEvent, IdRange, PairRange, Simulation, Species,
};
use edmd::error::Result;

/// A single fast particle in a periodic box: the PBC sentinel resyncs it
/// after half a box length so it can never wrap twice unseen, and the
/// position never leaves the primary image.
#[test]
fn pbc_sentinel_prevents_double_wrap() -> Result<()> {
    let mut sim = Simulation::new(Some(5));
    let l = 4.0;
    sim.set_primary_cell([l, l, l])?;
    sim.set_boundary(Boundary::Periodic {
        box_size: [l, l, l],
    })?;
    sim.add_species(Species::point("Bulk", IdRange::All, 1.0)?)?;
    sim.add_interaction(Box::new(HardSphere::new("Bulk", PairRange::All, 0.5, 1.0)))?;
    let v = 2.0;
    sim.add_particle([0.0, 0.0, 0.0], [v, 0.0, 0.0])?;
    sim.initialise()?;

    assert!(sim.globals().iter().any(|g| g.name() == "PBCSentinel"));

    let mut first_sentinel = None;
    for _ in 0..500 {
        match sim.step()? {
            ExecutedEvent::Global { time, .. } => {
                if first_sentinel.is_none() {
                    first_sentinel = Some(time);
                }
            }
            ExecutedEvent::Exhausted => break,
            _ => {}
        }
        let p = &sim.world().particles[0];
        assert!(
            p.r[0].abs() <= 0.5 * l + 1e-9,
            "particle left the primary image: x = {}",
            p.r[0]
        );
        if sim.time() > 20.0 {
            break;
        }
    }
    let t = first_sentinel.expect("the sentinel must fire");
    assert!(
        (t - 0.5 * l / v).abs() < 1e-9,
        "first sentinel at {t}, expected {}",
        0.5 * l / v
    );
    Ok(())
}

/// Under gravity the parabola sentinel fires at each apex, kills the
/// vertical velocity exactly, and its suppressed stream time accumulates
/// in `freestream_acc`.
#[test]
fn parabola_sentinel_resyncs_apices() -> Result<()> {
    let mut sim = Simulation::new(Some(6));
    sim.set_primary_cell([40.0, 40.0, 40.0])?;
    sim.set_boundary(Boundary::None)?;
    sim.set_dynamics(Dynamics::NewtonianGravity {
        g: [0.0, -1.0, 0.0],
    })?;
    sim.add_species(Species::point("Bulk", IdRange::All, 1.0)?)?;
    sim.add_interaction(Box::new(HardSphere::new("Bulk", PairRange::All, 0.5, 1.0)))?;
    sim.add_particle([0.0, -10.0, 0.0], [0.2, 3.0, 0.0])?;
    sim.initialise()?;

    assert!(sim
        .globals()
        .iter()
        .any(|g| g.name() == "ParabolaSentinel"));

    let mut prev_event_time = 0.0;
    let mut expected_acc = 0.0;
    let mut apex_time = None;
    for _ in 0..2000 {
        match sim.step()? {
            ExecutedEvent::Global { time, .. } => {
                expected_acc += time - prev_event_time;
                prev_event_time = time;
                if apex_time.is_none() {
                    apex_time = Some(time);
                    let p = &sim.world().particles[0];
                    assert!(
                        p.v[1].abs() < 1e-12,
                        "vertical velocity {} at the apex",
                        p.v[1]
                    );
                }
            }
            ExecutedEvent::Exhausted => break,
            other => {
                if let Some(t) = event_time(&other) {
                    prev_event_time = t;
                }
            }
        }
        if sim.time() > 10.0 {
            break;
        }
    }
    // Launched upward at 3 under g = 1.
    let t = apex_time.expect("the apex sentinel must fire");
    assert!((t - 3.0).abs() < 1e-9, "apex at {t}, expected 3.0");
    assert!(
        (sim.freestream_acc() - expected_acc).abs() < 1e-9,
        "freestream accumulator {} does not match the suppressed time {}",
        sim.freestream_acc(),
        expected_acc
    );
    Ok(())
}

fn event_time(ev: &ExecutedEvent) -> Option<f64> {
    match ev {
        ExecutedEvent::Interaction { time, .. }
        | ExecutedEvent::CellCrossing { time, .. }
        | ExecutedEvent::Global { time, .. }
        | ExecutedEvent::Local { time, .. }
        | ExecutedEvent::System { time, .. }
        | ExecutedEvent::Recalculate { time, .. } => Some(*time),
        ExecutedEvent::Exhausted => None,
    }
}
