use edmd::core::{ExecutedEvent, Simulation};
use edmd::error::Result;

fn dilute_gas() -> Result<Simulation> {
    // 27 spheres in a 6^3 box; diameter chosen for phi0 = 0.1.
    let phi0 = 0.1_f64;
    let volume = 6.0_f64.powi(3);
    let diameter = (phi0 * volume / (27.0 * std::f64::consts::PI / 6.0)).cbrt();
    let mut sim = Simulation::hard_sphere_gas(27, [6.0, 6.0, 6.0], diameter, 1.0, Some(4242))?;
    sim.initialise()?;
    Ok(sim)
}

/// Compression grows the packing fraction as phi0 (1 + gamma t)^3 and the
/// limiter halts the run at the requested fraction.
#[test]
fn packing_fraction_growth_and_halt() -> Result<()> {
    let mut sim = dilute_gas()?;
    let phi0 = sim.packing_fraction();
    assert!((phi0 - 0.1).abs() < 1e-9);

    let gamma = 0.01;
    let target = 0.15;
    sim.begin_compression(gamma)?;
    sim.limit_packing_fraction(target)?;

    let expected_halt = ((target / phi0).powf(1.0 / 3.0) - 1.0) / gamma;

    let mut halted = false;
    for _ in 0..2_000_000 {
        match sim.step()? {
            ExecutedEvent::System { action, .. }
                if action == edmd::core::system::SystemAction::Halt =>
            {
                halted = true;
                break;
            }
            ExecutedEvent::Exhausted => break,
            _ => {
                // The growth law holds at every instant of the run.
                let phi = sim.packing_fraction();
                let law = phi0 * (1.0 + gamma * sim.time()).powi(3);
                assert!(
                    ((phi - law) / law).abs() < 1e-9,
                    "phi = {phi} but the growth law gives {law}"
                );
            }
        }
    }
    assert!(halted, "compression limiter never fired");
    assert!(
        (sim.time() - expected_halt).abs() < 1e-6,
        "halt at t = {}, expected {expected_halt}",
        sim.time()
    );
    assert!(
        (sim.packing_fraction() - target).abs() < 1e-6,
        "packing fraction {} at the halt, expected {target}",
        sim.packing_fraction()
    );

    // No overlaps were allowed to creep in while the spheres grew.
    assert_eq!(sim.check_system(), 0);
    Ok(())
}

/// Restoring a compressed system rescales the unit length so the grown
/// diameters read as their original values, leaving velocities alone.
#[test]
fn restore_rescales_units() -> Result<()> {
    let mut sim = dilute_gas()?;
    let d0 = sim.longest_interaction();
    let gamma = 0.01;
    let target = 0.12;
    sim.begin_compression(gamma)?;
    sim.limit_packing_fraction(target)?;
    while sim.run_simulation_step()? {}

    let ke_before = sim.kinetic_energy();
    let t_halt = sim.time();
    sim.restore_system()?;

    let expected_factor = 1.0 + gamma * t_halt;
    let units = &sim.world().units;
    assert!(
        (units.unit_length() - expected_factor).abs() < 1e-9,
        "unit length {} after restore, expected {expected_factor}",
        units.unit_length()
    );
    assert!((units.unit_time() - expected_factor).abs() < 1e-9);

    // The grown diameter is now the stored diameter, and in multiples of
    // the rescaled unit length it reads as its pre-compression value.
    let d1 = sim.longest_interaction();
    assert!(
        ((d1 - d0 * expected_factor) / d1).abs() < 1e-9,
        "stored diameter {d1} after restore, expected {}",
        d0 * expected_factor
    );
    assert!(((d1 / units.unit_length() - d0) / d0).abs() < 1e-9);

    // The compressed packing survives the restore; velocities are untouched.
    assert!(
        ((sim.packing_fraction() - target) / target).abs() < 1e-6,
        "packing fraction {} after restore, expected {target}",
        sim.packing_fraction()
    );
    assert!(((sim.kinetic_energy() - ke_before) / ke_before).abs() < 1e-12);

    // The restored system keeps running as a plain Newtonian gas.
    sim.run_events(200)?;
    assert_eq!(sim.check_system(), 0);
    Ok(())
}
