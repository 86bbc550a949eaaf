//! `mores-sim`: run a synthetic population through a rule library.
//!
//! Loads and merges authored definition files, compiles them, spawns
//! societies of members with default stores, feeds random observations for
//! a number of ticks and prints the engine counters in Prometheus format.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use mores_core::definition::EffectType;
use mores_core::effects::ValueBuffer;
use mores_core::{bake, DefinitionSet, EntityId, LibIndex, MoresConfig, Observation};
use mores_world::{FixedClock, SocietyWorld};

#[derive(Parser, Debug)]
#[command(name = "mores-sim", version, about = "Run a synthetic society against a rule library")]
struct Args {
    /// Definition files (`.toml` or `.json`), merged in order.
    #[arg(required = true)]
    definitions: Vec<PathBuf>,

    /// Engine configuration (TOML).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Society profile to spawn with; omit for the full library.
    #[arg(long)]
    profile: Option<String>,

    /// Number of societies.
    #[arg(long, default_value_t = 1)]
    societies: u32,

    /// Members per society.
    #[arg(long, default_value_t = 50)]
    members: u32,

    /// Ticks to run.
    #[arg(long, default_value_t = 100)]
    ticks: u32,

    /// Seconds per tick.
    #[arg(long, default_value_t = 1.0)]
    dt: f64,

    /// Chance per member per tick of one random observation.
    #[arg(long, default_value_t = 0.3)]
    rate: f64,

    /// Seed for observations and entity seeds.
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Write the compiled library to this path.
    #[arg(long)]
    bake: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long)]
    json_logs: bool,
}

/// Reject numeric arguments the run loop cannot use.
fn check_args(args: &Args) -> Result<()> {
    if !args.rate.is_finite() || !(0.0..=1.0).contains(&args.rate) {
        bail!("--rate must be within [0, 1], got {}", args.rate);
    }
    if !args.dt.is_finite() || args.dt < 0.0 {
        bail!("--dt must be a finite, non-negative number of seconds, got {}", args.dt);
    }
    Ok(())
}

fn init_logging(default_level: &str, json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}

fn load_definitions(paths: &[PathBuf]) -> Result<DefinitionSet> {
    let mut set = DefinitionSet::new();
    for path in paths {
        let part = DefinitionSet::from_file(path)
            .with_context(|| format!("loading definitions from {}", path.display()))?;
        set.merge(part);
    }
    Ok(set)
}

/// Give every member the needs the library can touch, plus open stores.
fn furnish(world: &mut SocietyWorld, rng: &mut StdRng) -> Result<Vec<EntityId>> {
    let mut needs = ValueBuffer::new();
    for effect in &world.library().effects {
        if effect.effect_type == EffectType::ModifyNeed {
            needs.set(&effect.parameter_id, 0.5);
        }
    }

    let roots: Vec<EntityId> = world.societies().map(|s| s.root).collect();
    let mut members = Vec::new();
    for root in roots {
        world.set_cohesion(root, 1.0)?;
        world.set_reputation(root, ValueBuffer::new())?;
        for id in world.society(root).map(|s| s.members.clone()).unwrap_or_default() {
            world.set_needs(id, needs.clone())?;
            world.set_resources(id, ValueBuffer::new())?;
            world.set_reputation(id, ValueBuffer::new())?;
            world.set_health(id, rng.gen_range(50.0..=100.0), 100.0)?;
            world.enable_relationships(id)?;
            world.enable_intents(id)?;
            members.push(id);
        }
    }
    Ok(members)
}

fn main() -> Result<()> {
    let args = Args::parse();
    check_args(&args)?;
    let config = match &args.config {
        Some(path) => MoresConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => MoresConfig::default(),
    };
    init_logging(&config.general.log_level, args.json_logs);

    let definitions = load_definitions(&args.definitions)?;
    let mut world = SocietyWorld::from_definitions(&definitions, config);
    if let Some(path) = &args.bake {
        bake::save(world.library(), path)
            .with_context(|| format!("baking library to {}", path.display()))?;
    }

    let mut rng = StdRng::seed_from_u64(args.seed);
    for _ in 0..args.societies {
        let root = world.spawn_society(args.profile.as_deref(), rng.gen_range(1..=u32::MAX));
        for _ in 0..args.members {
            world.spawn_member(root, rng.gen_range(1..=u32::MAX))?;
        }
    }
    let members = furnish(&mut world, &mut rng)?;
    info!(
        societies = args.societies,
        members = members.len(),
        ticks = args.ticks,
        "Simulation starting"
    );

    let signal_count = world.library().signals.len() as LibIndex;
    let rate = args.rate;
    let mut clock = FixedClock::new(0.0);
    for tick in 0..args.ticks {
        clock.advance(args.dt);
        if signal_count > 0 && !members.is_empty() {
            for &member in &members {
                if !rng.gen_bool(rate) {
                    continue;
                }
                let signal = rng.gen_range(0..signal_count);
                let value: f32 = rng.gen_range(0.0..1.0);
                let other = members[rng.gen_range(0..members.len())];
                let observation = Observation::new(signal, value, clock.time()).with_target(other);
                world.observe(member, &observation)?;
            }
        }
        let report = world.tick(&clock);
        debug!(
            tick,
            samples = report.samples,
            fired = report.evaluation.fired,
            applied = report.effects_applied,
            missed = report.effects_missed,
            elapsed_ms = report.elapsed_ms,
            "Tick complete"
        );
    }

    let monitor = world.monitor();
    println!("{}", world.counters().snapshot().to_prometheus());
    println!("{}", monitor.percentiles().summary(monitor.budget_ms()));
    println!(
        "schedule overrides: {}, signals pending: {}",
        world.schedule_overrides().len(),
        world.pending_signals()
    );
    Ok(())
}
