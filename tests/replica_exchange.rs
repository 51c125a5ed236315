use edmd::core::Simulation;
use edmd::error::Result;

fn gas(seed: u64, velocity_scale: f64) -> Result<Simulation> {
    let mut sim = Simulation::hard_sphere_gas(64, [10.0, 10.0, 10.0], 0.5, 1.0, Some(seed))?;
    for p in &mut sim.world_mut().particles {
        for v in &mut p.v {
            *v *= velocity_scale;
        }
    }
    sim.initialise()?;
    Ok(sim)
}

/// After an exchange the kinetic energies have swapped and the queued
/// event times have been rescaled by the inverse velocity factor.
#[test]
fn kinetic_energies_swap() -> Result<()> {
    let mut cold = gas(100, 1.0)?;
    let mut hot = gas(200, 2.0)?;

    let ke_cold = cold.kinetic_energy();
    let ke_hot = hot.kinetic_energy();
    assert!(ke_hot > ke_cold);

    cold.replica_exchange(&mut hot)?;

    assert!(
        ((cold.kinetic_energy() - ke_hot) / ke_hot).abs() < 1e-12,
        "cold box should carry the hot box's kinetic energy"
    );
    assert!(
        ((hot.kinetic_energy() - ke_cold) / ke_cold).abs() < 1e-12,
        "hot box should carry the cold box's kinetic energy"
    );

    // The event stream stays physical at the new temperatures.
    let e0 = cold.kinetic_energy();
    cold.run_events(500)?;
    assert!(((cold.kinetic_energy() - e0) / e0).abs() < 1e-9);
    let e0 = hot.kinetic_energy();
    hot.run_events(500)?;
    assert!(((hot.kinetic_energy() - e0) / e0).abs() < 1e-9);
    Ok(())
}

/// Exchanging A with B and then B with A restores the original state.
#[test]
fn exchange_is_involutive() -> Result<()> {
    let mut a = gas(300, 1.0)?;
    let mut b = gas(400, 1.7)?;

    let va: Vec<[f64; 3]> = a.world().particles.iter().map(|p| p.v).collect();
    let vb: Vec<[f64; 3]> = b.world().particles.iter().map(|p| p.v).collect();

    a.replica_exchange(&mut b)?;
    b.replica_exchange(&mut a)?;

    for (p, v0) in a.world().particles.iter().zip(&va) {
        for k in 0..3 {
            assert!(
                (p.v[k] - v0[k]).abs() < 1e-12,
                "velocity not restored after a double exchange"
            );
        }
    }
    for (p, v0) in b.world().particles.iter().zip(&vb) {
        for k in 0..3 {
            assert!((p.v[k] - v0[k]).abs() < 1e-12);
        }
    }
    Ok(())
}

/// The time-to-event of every queued event contracts by the velocity
/// factor when a box heats up.
#[test]
fn queued_times_rescale() -> Result<()> {
    let mut cold = gas(500, 1.0)?;
    let mut hot = gas(600, 2.0)?;

    let ke_cold = cold.kinetic_energy();
    let ke_hot = hot.kinetic_energy();
    let scale = (ke_hot / ke_cold).sqrt();

    let next_before = cold
        .peek_next_event_time()
        .expect("a fresh gas has events queued");
    cold.replica_exchange(&mut hot)?;
    let next_after = cold
        .peek_next_event_time()
        .expect("events survive the exchange");
    assert!(
        (next_after - next_before / scale).abs() < 1e-9,
        "next event moved from {next_before} to {next_after}, expected the \
         1/{scale} contraction"
    );
    Ok(())
}
