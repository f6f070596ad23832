use std::path::PathBuf;

use clap::Parser;
use phasecc::{
    config::{set_logger, Config},
    congestion_control::CongestionControlAlgorithm,
    simulation::{Link, LinkPreset, SenderLoop},
};
use tracing::level_filters::LevelFilter;

#[derive(Parser, Debug)]
#[command(name = "phasecc-sim")]
#[command(about = "Run a congestion controller against a simulated bottleneck link")]
struct Args {
    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Congestion control algorithm (phase, aimd); overrides the file
    #[arg(long)]
    algorithm: Option<CongestionControlAlgorithm>,

    /// Link preset; replaces the [link] table of the file
    #[arg(long, value_enum)]
    link: Option<LinkPreset>,

    /// Simulated duration in milliseconds
    #[arg(long, default_value = "10000")]
    duration_ms: u64,

    /// Seed for the link and the probe coin
    #[arg(long)]
    seed: Option<u64>,

    /// Log every controller event at DEBUG
    #[arg(long)]
    debug: bool,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    set_logger(args.debug.then_some(LevelFilter::DEBUG));

    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => {
            let mut config = Config::default();
            config.apply_env_overrides(|key| std::env::var(key).ok())?;
            config
        }
    };

    if let Some(algorithm) = args.algorithm {
        config.algorithm = algorithm;
    }
    if let Some(preset) = args.link {
        config.link = preset.config().with_seed(config.link.seed);
    }
    if let Some(seed) = args.seed {
        config.link.seed = seed;
        config.phase.seed = Some(seed);
    }
    config.debug |= args.debug;
    config.validate()?;

    tracing::info!(
        algorithm = %config.algorithm,
        base_rtt_ms = config.link.base_rtt_ms(),
        capacity = config.link.capacity_per_sec(),
        duration_ms = args.duration_ms,
        "Starting simulation"
    );

    let controller = config.congestion_config().try_build()?;
    let mut sim = SenderLoop::new(controller, Link::new(config.link.clone()));
    let report = sim.run_for(args.duration_ms).report();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{report}");
    }
    Ok(())
}
