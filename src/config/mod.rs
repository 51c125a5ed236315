//! Configuration load/save: the `<DynamOconfig>` XML schema, reduced-unit
//! conversion at the boundary, and transparent bzip2 for `.bz2` paths.

pub mod xml;

use crate::core::boundary::Boundary;
use crate::core::dynamics::Dynamics;
use crate::core::ensemble::Ensemble;
use crate::core::globals::GlobalSpec;
use crate::core::interactions::InteractionSpec;
use crate::core::locals::LocalSpec;
use crate::core::particle::AngularState;
use crate::core::range::{IdRange, PairRange};
use crate::core::sim::Simulation;
use crate::core::species::Species;
use crate::core::system::SystemEvent;
use crate::error::{Error, Result};
use crate::units::Units;
use bzip2::read::BzDecoder;
use bzip2::write::BzEncoder;
use bzip2::Compression;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use self::xml::XmlNode;

/// The configuration file version; a mismatch prevents a load.
pub const CONFIG_FILE_VERSION: &str = "1.5.0";

// ---- File I/O ----

fn is_bz2(path: &Path) -> bool {
    path.extension().map(|e| e == "bz2").unwrap_or(false)
}

fn read_to_string(path: &Path) -> Result<String> {
    let file = File::open(path).map_err(|e| {
        Error::Config(format!("could not open {}: {e}", path.display()))
    })?;
    let mut data = String::new();
    if is_bz2(path) {
        BzDecoder::new(file).read_to_string(&mut data)?;
    } else {
        let mut file = file;
        file.read_to_string(&mut data)?;
    }
    Ok(data)
}

fn write_string(path: &Path, data: &str) -> Result<()> {
    let file = File::create(path).map_err(|e| {
        Error::Config(format!("could not create {}: {e}", path.display()))
    })?;
    if is_bz2(path) {
        let mut encoder = BzEncoder::new(file, Compression::default());
        encoder.write_all(data.as_bytes())?;
        let mut file = encoder.finish()?;
        file.flush()?;
    } else {
        let mut file = file;
        file.write_all(data.as_bytes())?;
        file.flush()?;
    }
    Ok(())
}

/// Load a simulation from a configuration file (`.xml` or `.xml.bz2`).
/// The returned simulation is not yet initialised.
pub fn load(path: &Path, seed: Option<u64>) -> Result<Simulation> {
    let name = path.to_string_lossy();
    if !(name.ends_with(".xml") || name.ends_with(".xml.bz2")) {
        return Err(Error::Config(format!(
            "unrecognised extension for config file {name}"
        )));
    }
    log::info!("reading configuration from {name}");
    let data = read_to_string(path)?;
    load_from_str(&data, seed)
}

/// Write the simulation state to a configuration file.
pub fn save(sim: &Simulation, path: &Path) -> Result<()> {
    let doc = save_to_string(sim)?;
    write_string(path, &doc)?;
    log::info!("configuration written to {}", path.display());
    Ok(())
}

/// Write the run summary (`<OutputData>`) document.
pub fn output_data(sim: &Simulation, path: &Path) -> Result<()> {
    let mut root = XmlNode::new("OutputData");
    let mut misc = XmlNode::new("Misc");
    misc.set_attr("Events", sim.event_count());
    misc.set_attr("SimTime", sim.time() / sim.world().units.unit_time());
    misc.set_attr(
        "MeanFreeTime",
        sim.mean_free_time() / sim.world().units.unit_time(),
    );
    misc.set_attr(
        "KineticEnergy",
        sim.kinetic_energy() / sim.world().units.unit_energy(),
    );
    misc.set_attr(
        "InternalEnergy",
        sim.internal_energy() / sim.world().units.unit_energy(),
    );
    root.add_child(misc);
    write_string(path, &root.to_document()?)
}

// ---- Range encoding ----

fn id_range_node(range: &IdRange) -> XmlNode {
    let mut node = XmlNode::new("IDRange");
    match range {
        IdRange::All => {
            node.set_attr("Type", "All");
        }
        IdRange::Span { start, end } => {
            node.set_attr("Type", "Ranged");
            node.set_attr("Start", start);
            node.set_attr("End", end);
        }
        IdRange::List(ids) => {
            node.set_attr("Type", "List");
            let joined = ids
                .iter()
                .map(|i| i.to_string())
                .collect::<Vec<_>>()
                .join(" ");
            node.set_attr("IDs", joined);
        }
    }
    node
}

fn parse_id_range(node: &XmlNode) -> Result<IdRange> {
    match node.req_attr("Type")? {
        "All" => Ok(IdRange::All),
        "Ranged" => Ok(IdRange::Span {
            start: node.attr_u32("Start")?,
            end: node.attr_u32("End")?,
        }),
        "List" => {
            let mut ids = Vec::new();
            for tok in node.req_attr("IDs")?.split_whitespace() {
                ids.push(tok.parse().map_err(|_| {
                    Error::Config(format!("IDRange list entry {tok} is not an integer"))
                })?);
            }
            Ok(IdRange::List(ids))
        }
        other => Err(Error::Config(format!("unknown IDRange type {other}"))),
    }
}

fn pair_range_node(range: &PairRange) -> XmlNode {
    let mut node = XmlNode::new("IDPairRange");
    match range {
        PairRange::All => {
            node.set_attr("Type", "All");
        }
        PairRange::Single(r) => {
            node.set_attr("Type", "Single");
            node.add_child(id_range_node(r));
        }
        PairRange::Pair(a, b) => {
            node.set_attr("Type", "Pair");
            node.add_child(id_range_node(a));
            node.add_child(id_range_node(b));
        }
        PairRange::List(pairs) => {
            node.set_attr("Type", "List");
            for (i, j) in pairs {
                let mut pair = XmlNode::new("IDPair");
                pair.set_attr("ID1", i);
                pair.set_attr("ID2", j);
                node.add_child(pair);
            }
        }
    }
    node
}

fn parse_pair_range(node: &XmlNode) -> Result<PairRange> {
    match node.req_attr("Type")? {
        "All" => Ok(PairRange::All),
        "Single" => Ok(PairRange::Single(parse_id_range(
            node.req_child("IDRange")?,
        )?)),
        "Pair" => {
            let mut ranges = node.children_named("IDRange");
            let a = ranges
                .next()
                .ok_or_else(|| Error::Config("pair range needs two IDRange children".into()))?;
            let b = ranges
                .next()
                .ok_or_else(|| Error::Config("pair range needs two IDRange children".into()))?;
            Ok(PairRange::Pair(parse_id_range(a)?, parse_id_range(b)?))
        }
        "List" => {
            let mut pairs = Vec::new();
            for pair in node.children_named("IDPair") {
                pairs.push((pair.attr_u32("ID1")?, pair.attr_u32("ID2")?));
            }
            Ok(PairRange::List(pairs))
        }
        other => Err(Error::Config(format!("unknown IDPairRange type {other}"))),
    }
}

fn capture_map_node(captures: &[(u32, u32)]) -> XmlNode {
    let mut node = XmlNode::new("CaptureMap");
    for (i, j) in captures {
        let mut pair = XmlNode::new("Pair");
        pair.set_attr("ID1", i);
        pair.set_attr("ID2", j);
        node.add_child(pair);
    }
    node
}

fn parse_capture_map(node: Option<&XmlNode>) -> Result<Vec<(u32, u32)>> {
    let Some(node) = node else {
        return Ok(Vec::new());
    };
    let mut pairs = Vec::new();
    for pair in node.children_named("Pair") {
        pairs.push((pair.attr_u32("ID1")?, pair.attr_u32("ID2")?));
    }
    Ok(pairs)
}

// ---- Interactions ----

fn interaction_node(spec: &InteractionSpec, units: &Units) -> XmlNode {
    let ul = units.unit_length();
    let ue = units.unit_energy();
    let mut node = XmlNode::new("Interaction");
    match spec {
        InteractionSpec::HardSphere {
            name,
            range,
            diameter,
            elasticity,
        } => {
            node.set_attr("Type", "HardSphere");
            node.set_attr("Name", name);
            node.set_attr("Diameter", diameter / ul);
            node.set_attr("Elasticity", elasticity);
            node.add_child(pair_range_node(range));
        }
        InteractionSpec::SquareWell {
            name,
            range,
            diameter,
            lambda,
            well_depth,
            elasticity,
            captures,
        } => {
            node.set_attr("Type", "SquareWell");
            node.set_attr("Name", name);
            node.set_attr("Diameter", diameter / ul);
            node.set_attr("Lambda", lambda);
            node.set_attr("WellDepth", well_depth / ue);
            node.set_attr("Elasticity", elasticity);
            node.add_child(pair_range_node(range));
            node.add_child(capture_map_node(captures));
        }
        InteractionSpec::SquareBond {
            name,
            range,
            diameter,
            lambda,
        } => {
            node.set_attr("Type", "SquareBond");
            node.set_attr("Name", name);
            node.set_attr("Diameter", diameter / ul);
            node.set_attr("Lambda", lambda);
            node.add_child(pair_range_node(range));
        }
        InteractionSpec::RoughHardSphere {
            name,
            range,
            diameter,
            elasticity,
            tangential_elasticity,
        } => {
            node.set_attr("Type", "RoughHardSphere");
            node.set_attr("Name", name);
            node.set_attr("Diameter", diameter / ul);
            node.set_attr("Elasticity", elasticity);
            node.set_attr("TangentialElasticity", tangential_elasticity);
            node.add_child(pair_range_node(range));
        }
        InteractionSpec::Lines {
            name,
            range,
            length,
            elasticity,
            captures,
        } => {
            node.set_attr("Type", "Lines");
            node.set_attr("Name", name);
            node.set_attr("Length", length / ul);
            node.set_attr("Elasticity", elasticity);
            node.add_child(pair_range_node(range));
            node.add_child(capture_map_node(captures));
        }
        InteractionSpec::Dumbbells {
            name,
            range,
            length,
            radius,
            elasticity,
            captures,
        } => {
            node.set_attr("Type", "Dumbbells");
            node.set_attr("Name", name);
            node.set_attr("Length", length / ul);
            node.set_attr("Radius", radius / ul);
            node.set_attr("Elasticity", elasticity);
            node.add_child(pair_range_node(range));
            node.add_child(capture_map_node(captures));
        }
    }
    node
}

fn parse_interaction(node: &XmlNode, units: &Units) -> Result<InteractionSpec> {
    let ul = units.unit_length();
    let ue = units.unit_energy();
    let name = node.req_attr("Name")?.to_string();
    let range = parse_pair_range(node.req_child("IDPairRange")?)?;
    match node.req_attr("Type")? {
        "HardSphere" => Ok(InteractionSpec::HardSphere {
            name,
            range,
            diameter: node.attr_f64("Diameter")? * ul,
            elasticity: node.attr_f64("Elasticity")?,
        }),
        "SquareWell" => Ok(InteractionSpec::SquareWell {
            name,
            range,
            diameter: node.attr_f64("Diameter")? * ul,
            lambda: node.attr_f64("Lambda")?,
            well_depth: node.attr_f64("WellDepth")? * ue,
            elasticity: node.attr_f64("Elasticity")?,
            captures: parse_capture_map(node.child("CaptureMap"))?,
        }),
        "SquareBond" => Ok(InteractionSpec::SquareBond {
            name,
            range,
            diameter: node.attr_f64("Diameter")? * ul,
            lambda: node.attr_f64("Lambda")?,
        }),
        "RoughHardSphere" => Ok(InteractionSpec::RoughHardSphere {
            name,
            range,
            diameter: node.attr_f64("Diameter")? * ul,
            elasticity: node.attr_f64("Elasticity")?,
            tangential_elasticity: node.attr_f64("TangentialElasticity")?,
        }),
        "Lines" => Ok(InteractionSpec::Lines {
            name,
            range,
            length: node.attr_f64("Length")? * ul,
            elasticity: node.attr_f64("Elasticity")?,
            captures: parse_capture_map(node.child("CaptureMap"))?,
        }),
        "Dumbbells" => Ok(InteractionSpec::Dumbbells {
            name,
            range,
            length: node.attr_f64("Length")? * ul,
            radius: node.attr_f64("Radius")? * ul,
            elasticity: node.attr_f64("Elasticity")?,
            captures: parse_capture_map(node.child("CaptureMap"))?,
        }),
        other => Err(Error::Config(format!("unknown Interaction type {other}"))),
    }
}

// ---- Locals / Globals / Systems ----

fn local_node(spec: &LocalSpec, units: &Units) -> XmlNode {
    let ul = units.unit_length();
    let ue = units.unit_energy();
    let mut node = XmlNode::new("Local");
    match spec {
        LocalSpec::Wall {
            name,
            range,
            normal,
            origin_dist,
            elasticity,
            diameter,
        } => {
            node.set_attr("Type", "Wall");
            node.set_attr("Name", name);
            node.set_attr("Elasticity", elasticity);
            node.set_attr("Diameter", diameter / ul);
            node.set_attr("OriginDist", origin_dist / ul);
            let mut n = XmlNode::new("Norm");
            n.set_attr("x", normal[0]);
            n.set_attr("y", normal[1]);
            n.set_attr("z", normal[2]);
            node.add_child(n);
            node.add_child(id_range_node(range));
        }
        LocalSpec::AndersenWall {
            name,
            range,
            normal,
            origin_dist,
            temperature,
            accommodation,
            diameter,
        } => {
            node.set_attr("Type", "AndersenWall");
            node.set_attr("Name", name);
            node.set_attr("Temperature", temperature / ue);
            node.set_attr("Accommodation", accommodation);
            node.set_attr("Diameter", diameter / ul);
            node.set_attr("OriginDist", origin_dist / ul);
            let mut n = XmlNode::new("Norm");
            n.set_attr("x", normal[0]);
            n.set_attr("y", normal[1]);
            n.set_attr("z", normal[2]);
            node.add_child(n);
            node.add_child(id_range_node(range));
        }
    }
    node
}

fn parse_local(node: &XmlNode, units: &Units) -> Result<LocalSpec> {
    let ul = units.unit_length();
    let ue = units.unit_energy();
    let name = node.req_attr("Name")?.to_string();
    let range = parse_id_range(node.req_child("IDRange")?)?;
    let normal = node.req_child("Norm")?.vec3()?;
    let origin_dist = node.attr_f64("OriginDist")? * ul;
    let diameter = node.attr_f64("Diameter")? * ul;
    match node.req_attr("Type")? {
        "Wall" => Ok(LocalSpec::Wall {
            name,
            range,
            normal,
            origin_dist,
            elasticity: node.attr_f64("Elasticity")?,
            diameter,
        }),
        "AndersenWall" => Ok(LocalSpec::AndersenWall {
            name,
            range,
            normal,
            origin_dist,
            temperature: node.attr_f64("Temperature")? * ue,
            accommodation: node.attr_f64("Accommodation")?,
            diameter,
        }),
        other => Err(Error::Config(format!("unknown Local type {other}"))),
    }
}

fn global_node(spec: &GlobalSpec) -> XmlNode {
    let mut node = XmlNode::new("Global");
    match spec {
        GlobalSpec::PbcSentinel { name } => {
            node.set_attr("Type", "PBCSentinel");
            node.set_attr("Name", name);
        }
        GlobalSpec::ParabolaSentinel { name } => {
            node.set_attr("Type", "ParabolaSentinel");
            node.set_attr("Name", name);
        }
    }
    node
}

fn parse_global(node: &XmlNode) -> Result<GlobalSpec> {
    let name = node.req_attr("Name")?.to_string();
    match node.req_attr("Type")? {
        "PBCSentinel" => Ok(GlobalSpec::PbcSentinel { name }),
        "ParabolaSentinel" => Ok(GlobalSpec::ParabolaSentinel { name }),
        other => Err(Error::Config(format!("unknown Global type {other}"))),
    }
}

fn system_node(system: &SystemEvent, units: &Units) -> Option<XmlNode> {
    let ut = units.unit_time();
    let mut node = XmlNode::new("System");
    match system {
        SystemEvent::Halt { name, time } => {
            let time = (*time)?;
            node.set_attr("Type", "Halt");
            node.set_attr("Name", name);
            node.set_attr("Time", time / ut);
            Some(node)
        }
        SystemEvent::Ticker { name, period, next } => {
            node.set_attr("Type", "Ticker");
            node.set_attr("Name", name);
            node.set_attr("Period", period / ut);
            node.set_attr("Next", next / ut);
            Some(node)
        }
        // Runtime-only watchdog; regenerated by the compression driver.
        SystemEvent::NbListCompressionFix { .. } => None,
    }
}

fn parse_system(node: &XmlNode, units: &Units) -> Result<SystemEvent> {
    let ut = units.unit_time();
    let name = node.req_attr("Name")?.to_string();
    match node.req_attr("Type")? {
        "Halt" => Ok(SystemEvent::Halt {
            name,
            time: Some(node.attr_f64("Time")? * ut),
        }),
        "Ticker" => Ok(SystemEvent::Ticker {
            name,
            period: node.attr_f64("Period")? * ut,
            next: node.attr_f64("Next")? * ut,
        }),
        other => Err(Error::Config(format!("unknown System type {other}"))),
    }
}

// ---- Species / BC / Dynamics / Ensemble ----

fn species_node(species: &Species, units: &Units) -> XmlNode {
    let mut node = XmlNode::new("Species");
    node.set_attr("Name", &species.name);
    node.set_attr("Mass", species.mass / units.unit_mass());
    match species.inertia_constant {
        Some(ic) => {
            node.set_attr("Type", "SphericalTop");
            node.set_attr("InertiaConstant", ic / units.unit_area());
        }
        None => {
            node.set_attr("Type", "Point");
        }
    }
    node.add_child(id_range_node(&species.range));
    node
}

fn parse_species(node: &XmlNode, units: &Units) -> Result<Species> {
    let name = node.req_attr("Name")?.to_string();
    let mass = node.attr_f64("Mass")? * units.unit_mass();
    let range = parse_id_range(node.req_child("IDRange")?)?;
    match node.req_attr("Type")? {
        "Point" => Species::point(name, range, mass),
        "SphericalTop" => Species::spherical_top(
            name,
            range,
            mass,
            node.attr_f64("InertiaConstant")? * units.unit_area(),
        ),
        other => Err(Error::Config(format!("unknown Species type {other}"))),
    }
}

fn bc_node(bc: &Boundary) -> XmlNode {
    let mut node = XmlNode::new("BC");
    match bc {
        Boundary::None => {
            node.set_attr("Type", "None");
        }
        Boundary::Periodic { .. } => {
            node.set_attr("Type", "PBC");
        }
        Boundary::LeesEdwards {
            shear_rate, offset, ..
        } => {
            node.set_attr("Type", "LE");
            node.set_attr("Rate", shear_rate);
            node.set_attr("Offset", offset);
        }
    }
    node
}

fn parse_bc(node: &XmlNode, box_size: [f64; 3]) -> Result<Boundary> {
    match node.req_attr("Type")? {
        "None" => Ok(Boundary::None),
        "PBC" => Ok(Boundary::Periodic { box_size }),
        "LE" => Ok(Boundary::LeesEdwards {
            box_size,
            shear_rate: node.attr_f64("Rate")?,
            offset: node.opt_attr_f64("Offset")?.unwrap_or(0.0),
        }),
        other => Err(Error::Config(format!("unknown BC type {other}"))),
    }
}

fn dynamics_node(dynamics: &Dynamics, units: &Units) -> XmlNode {
    let mut node = XmlNode::new("Dynamics");
    match dynamics {
        Dynamics::Newtonian => {
            node.set_attr("Type", "Newtonian");
        }
        Dynamics::Compression { growth_rate } => {
            node.set_attr("Type", "Compression");
            node.set_attr("GrowthRate", growth_rate * units.unit_time());
        }
        Dynamics::NewtonianGravity { g } => {
            node.set_attr("Type", "NewtonianGravity");
            let scale = units.unit_time() * units.unit_time() / units.unit_length();
            let mut gn = XmlNode::new("g");
            gn.set_attr("x", g[0] * scale);
            gn.set_attr("y", g[1] * scale);
            gn.set_attr("z", g[2] * scale);
            node.add_child(gn);
        }
    }
    node
}

fn parse_dynamics(node: &XmlNode, units: &Units) -> Result<Dynamics> {
    match node.req_attr("Type")? {
        "Newtonian" => Ok(Dynamics::Newtonian),
        "Compression" => Ok(Dynamics::Compression {
            growth_rate: node.attr_f64("GrowthRate")? / units.unit_time(),
        }),
        "NewtonianGravity" => {
            let raw = node.req_child("g")?.vec3()?;
            let scale = units.unit_length() / (units.unit_time() * units.unit_time());
            Ok(Dynamics::NewtonianGravity {
                g: [raw[0] * scale, raw[1] * scale, raw[2] * scale],
            })
        }
        other => Err(Error::Config(format!("unknown Dynamics type {other}"))),
    }
}

fn ensemble_node(ensemble: &Ensemble, units: &Units) -> XmlNode {
    let mut node = XmlNode::new("Ensemble");
    match ensemble {
        Ensemble::Nve => {
            node.set_attr("Type", "NVE");
        }
        Ensemble::Nvt { temperature } => {
            node.set_attr("Type", "NVT");
            node.set_attr("Temperature", temperature / units.unit_energy());
        }
    }
    node
}

fn parse_ensemble(node: Option<&XmlNode>, units: &Units) -> Result<Ensemble> {
    let Some(node) = node else {
        return Ok(Ensemble::Nve);
    };
    match node.req_attr("Type")? {
        "NVE" => Ok(Ensemble::Nve),
        "NVT" => Ok(Ensemble::Nvt {
            temperature: node.attr_f64("Temperature")? * units.unit_energy(),
        }),
        other => Err(Error::Config(format!("unknown Ensemble type {other}"))),
    }
}

// ---- Whole documents ----

/// Serialise a simulation to the configuration document.
pub fn save_to_string(sim: &Simulation) -> Result<String> {
    let world = sim.world();
    let units = &world.units;
    let ul = units.unit_length();
    let uv = units.unit_velocity();

    let mut root = XmlNode::new("DynamOconfig");
    root.set_attr("version", CONFIG_FILE_VERSION);

    let mut sim_node = XmlNode::new("Simulation");
    if sim.mean_free_time() > 0.0 {
        sim_node.set_attr("lastMFT", sim.mean_free_time() / units.unit_time());
    }

    let mut scheduler = XmlNode::new("Scheduler");
    scheduler.set_attr("Type", "NeighbourList");
    let mut sorter = XmlNode::new("Sorter");
    sorter.set_attr("Type", "BoundedPQMinMax");
    scheduler.add_child(sorter);
    sim_node.add_child(scheduler);

    let mut size = XmlNode::new("SimulationSize");
    size.set_attr("x", world.primary_cell[0] / ul);
    size.set_attr("y", world.primary_cell[1] / ul);
    size.set_attr("z", world.primary_cell[2] / ul);
    sim_node.add_child(size);

    let mut units_node = XmlNode::new("Units");
    units_node.set_attr("Length", units.unit_length());
    units_node.set_attr("Time", units.unit_time());
    units_node.set_attr("Mass", units.unit_mass());
    sim_node.add_child(units_node);

    let mut genus = XmlNode::new("Genus");
    for species in &world.species {
        genus.add_child(species_node(species, units));
    }
    sim_node.add_child(genus);

    sim_node.add_child(bc_node(&world.bc));

    let mut interactions = XmlNode::new("Interactions");
    for interaction in sim.interactions() {
        interactions.add_child(interaction_node(&interaction.spec(), units));
    }
    sim_node.add_child(interactions);

    let mut locals = XmlNode::new("Locals");
    for local in sim.locals() {
        locals.add_child(local_node(&local.spec(), units));
    }
    sim_node.add_child(locals);

    let mut globals = XmlNode::new("Globals");
    for global in sim.globals() {
        globals.add_child(global_node(&global.spec()));
    }
    sim_node.add_child(globals);

    let mut systems = XmlNode::new("SystemEvents");
    for system in sim.systems() {
        if let Some(node) = system_node(system, units) {
            systems.add_child(node);
        }
    }
    sim_node.add_child(systems);

    sim_node.add_child(dynamics_node(&world.dynamics, units));
    sim_node.add_child(ensemble_node(sim.ensemble(), units));

    let mut particle_data = XmlNode::new("ParticleData");
    for p in &world.particles {
        let mut pt = XmlNode::new("Pt");
        pt.set_attr("ID", p.id);
        if !p.dynamic {
            pt.set_attr("Static", 1u32);
        }
        let mut pos = XmlNode::new("P");
        pos.set_attr("x", p.r[0] / ul);
        pos.set_attr("y", p.r[1] / ul);
        pos.set_attr("z", p.r[2] / ul);
        pt.add_child(pos);
        let mut vel = XmlNode::new("V");
        vel.set_attr("x", p.v[0] / uv);
        vel.set_attr("y", p.v[1] / uv);
        vel.set_attr("z", p.v[2] / uv);
        pt.add_child(vel);
        if let Some(ang) = &p.angular {
            let mut u = XmlNode::new("U");
            u.set_attr("x", ang.u[0]);
            u.set_attr("y", ang.u[1]);
            u.set_attr("z", ang.u[2]);
            pt.add_child(u);
            let mut w = XmlNode::new("W");
            w.set_attr("x", ang.omega[0] * units.unit_time());
            w.set_attr("y", ang.omega[1] * units.unit_time());
            w.set_attr("z", ang.omega[2] * units.unit_time());
            pt.add_child(w);
        }
        particle_data.add_child(pt);
    }
    sim_node.add_child(particle_data);

    root.add_child(sim_node);
    root.to_document()
}

/// Build a (not yet initialised) simulation from configuration text.
pub fn load_from_str(data: &str, seed: Option<u64>) -> Result<Simulation> {
    let root = XmlNode::parse(data)?;
    if root.name != "DynamOconfig" {
        return Err(Error::Config(format!(
            "expected a DynamOconfig document, found {}",
            root.name
        )));
    }
    let version = root.req_attr("version")?;
    if version != CONFIG_FILE_VERSION {
        return Err(Error::Config(format!(
            "config file version {version} is obsolete; current version is {CONFIG_FILE_VERSION}"
        )));
    }
    let sim_node = root.req_child("Simulation")?;

    let units = match sim_node.child("Units") {
        Some(n) => Units::new(
            n.attr_f64("Length")?,
            n.attr_f64("Time")?,
            n.attr_f64("Mass")?,
        ),
        None => Units::default(),
    };
    let ul = units.unit_length();
    let uv = units.unit_velocity();

    let mut sim = Simulation::new(seed);
    sim.world_mut().units = units.clone();

    if let Some(mft) = sim_node.opt_attr_f64("lastMFT")? {
        sim.set_last_run_mft(mft * units.unit_time());
    }

    let size = sim_node.req_child("SimulationSize")?.vec3()?;
    let primary = [size[0] * ul, size[1] * ul, size[2] * ul];
    sim.set_primary_cell(primary)?;

    for node in sim_node.req_child("Genus")?.children_named("Species") {
        sim.add_species(parse_species(node, &units)?)?;
    }

    sim.set_boundary(parse_bc(sim_node.req_child("BC")?, primary)?)?;
    sim.set_dynamics(parse_dynamics(sim_node.req_child("Dynamics")?, &units)?)?;
    sim.set_ensemble(parse_ensemble(sim_node.child("Ensemble"), &units)?)?;

    for node in sim_node
        .req_child("Interactions")?
        .children_named("Interaction")
    {
        sim.add_interaction(parse_interaction(node, &units)?.build())?;
    }
    if let Some(locals) = sim_node.child("Locals") {
        for node in locals.children_named("Local") {
            sim.add_local(parse_local(node, &units)?.build())?;
        }
    }
    if let Some(globals) = sim_node.child("Globals") {
        for node in globals.children_named("Global") {
            sim.add_global(parse_global(node)?.build())?;
        }
    }
    if let Some(systems) = sim_node.child("SystemEvents") {
        for node in systems.children_named("System") {
            sim.add_system_event(parse_system(node, &units)?)?;
        }
    }

    for pt in sim_node
        .req_child("ParticleData")?
        .children_named("Pt")
    {
        let expected = sim.n() as u32;
        let id = pt.attr_u32("ID")?;
        if id != expected {
            return Err(Error::Config(format!(
                "particle IDs must be dense and ordered (expected {expected}, found {id})"
            )));
        }
        let rp = pt.req_child("P")?.vec3()?;
        let rv = pt.req_child("V")?.vec3()?;
        sim.add_particle(
            [rp[0] * ul, rp[1] * ul, rp[2] * ul],
            [rv[0] * uv, rv[1] * uv, rv[2] * uv],
        )?;
        let world = sim.world_mut();
        let p = world
            .particles
            .last_mut()
            .ok_or_else(|| Error::Config("particle store empty after insertion".into()))?;
        if pt.attr("Static").is_some() {
            p.dynamic = false;
        }
        if let (Some(u), Some(w)) = (pt.child("U"), pt.child("W")) {
            let uvec = u.vec3()?;
            let wvec = w.vec3()?;
            p.angular = Some(AngularState::new(
                uvec,
                [
                    wvec[0] / units.unit_time(),
                    wvec[1] / units.unit_time(),
                    wvec[2] / units.unit_time(),
                ],
            ));
        }
    }

    log::info!(
        "configuration loaded: {} particle(s), {} interaction(s)",
        sim.n(),
        sim.interactions().len()
    );
    Ok(sim)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_mismatch_rejected() {
        let doc = r#"<DynamOconfig version="0.9.0"><Simulation/></DynamOconfig>"#;
        let err = load_from_str(doc, None).unwrap_err();
        assert!(format!("{err}").contains("obsolete"));
    }

    #[test]
    fn wrong_root_rejected() {
        let doc = r#"<SomethingElse version="1.5.0"/>"#;
        assert!(load_from_str(doc, None).is_err());
    }

    #[test]
    fn minimal_round_trip() -> Result<()> {
        let sim = Simulation::hard_sphere_gas(8, [10.0, 10.0, 10.0], 0.5, 1.0, Some(77))?;
        let doc = save_to_string(&sim)?;
        let reloaded = load_from_str(&doc, Some(77))?;
        assert_eq!(reloaded.n(), sim.n());
        for (a, b) in sim
            .world()
            .particles
            .iter()
            .zip(reloaded.world().particles.iter())
        {
            assert_eq!(a.r, b.r);
            assert_eq!(a.v, b.v);
        }
        assert_eq!(save_to_string(&reloaded)?, doc);
        Ok(())
    }
}
