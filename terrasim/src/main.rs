//! Headless engine runner.
//!
//! Boots the engine from a world file, then either steps a fixed number of
//! ticks and prints a summary (batch mode), or runs live at the configured
//! tick rate, printing stats periodically until interrupted.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use terrasim_core::{Engine, EngineConfig, ResourceKind};

#[derive(Parser, Debug)]
#[command(name = "terrasim", about = "Territory economy simulation engine")]
struct Args {
    /// World file (territory names, ids, base generation, links)
    #[arg(long)]
    world: PathBuf,

    /// Cost file replacing the built-in upgrade/bonus tables
    #[arg(long)]
    costs: Option<PathBuf>,

    /// Run exactly N ticks, print a summary, and exit
    #[arg(short = 't', long)]
    ticks: Option<u64>,

    /// Target ticks per second in live mode
    #[arg(long, default_value_t = 1.0)]
    tick_rate: f64,

    /// Snapshot to thaw before running
    #[arg(long)]
    load: Option<PathBuf>,

    /// Snapshot to freeze after the run (batch mode only)
    #[arg(long)]
    save: Option<PathBuf>,

    /// Auto-save path, written once per simulated minute
    #[arg(long)]
    auto_save: Option<PathBuf>,

    /// Skip thawing an existing auto-save at boot
    #[arg(long)]
    no_auto_save: bool,

    /// Seconds between status lines in live mode
    #[arg(long, default_value_t = 10)]
    status_interval: u64,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let batch = args.ticks.is_some();
    let config = EngineConfig {
        auto_save_path: args.auto_save.clone(),
        load_auto_save: !args.no_auto_save,
        tick_rate: args.tick_rate,
        start_halted: batch,
        ..Default::default()
    };

    let engine = Engine::boot(&args.world, args.costs.as_deref(), config)
        .with_context(|| format!("booting engine from {}", args.world.display()))?;

    if let Some(path) = &args.load {
        engine
            .load_state(path)
            .with_context(|| format!("loading snapshot {}", path.display()))?;
        log::info!("loaded snapshot from {}", path.display());
    }

    match args.ticks {
        Some(ticks) => run_batch(&engine, ticks, args.save.as_deref()),
        None => run_live(&engine, args.status_interval),
    }
}

fn run_batch(engine: &Engine, ticks: u64, save: Option<&std::path::Path>) -> Result<()> {
    for _ in 0..ticks {
        engine.next_tick();
    }
    print_summary(engine);

    if let Some(path) = save {
        engine
            .save_state(path)
            .with_context(|| format!("saving snapshot {}", path.display()))?;
        log::info!("saved snapshot to {}", path.display());
    }
    Ok(())
}

fn run_live(engine: &Engine, status_interval: u64) -> Result<()> {
    log::info!("running live; interrupt to stop");
    loop {
        std::thread::sleep(Duration::from_secs(status_interval.max(1)));
        let stats = engine.system_stats();
        let metrics = engine.metrics();
        println!(
            "tick {:>8}  territories {:>4}  transits {:>3}  tps {:.2} (target {:.2})  avg {:.2}ms",
            stats.tick,
            stats.total_territories,
            engine.all_transits().len(),
            stats.actual_tps,
            stats.target_tps,
            metrics.tick_avg_ms(),
        );
    }
}

fn print_summary(engine: &Engine) {
    let stats = engine.system_stats();
    println!("tick {} | {} territories", stats.tick, stats.total_territories);
    println!(
        "{:<24} {:<20} {:>10} {:>10} {:>10} {:>10} {:>10}  {}",
        "territory", "guild", "emeralds", "ores", "wood", "fish", "crops", "treasury"
    );
    for t in engine.all_territory_stats() {
        println!(
            "{:<24} {:<20} {:>10.1} {:>10.1} {:>10.1} {:>10.1} {:>10.1}  {}{}",
            t.name,
            t.guild.to_string(),
            t.storage.at.get(ResourceKind::Emeralds),
            t.storage.at.get(ResourceKind::Ores),
            t.storage.at.get(ResourceKind::Wood),
            t.storage.at.get(ResourceKind::Fish),
            t.storage.at.get(ResourceKind::Crops),
            t.treasury,
            if t.hq { " [HQ]" } else { "" },
        );
    }
}
