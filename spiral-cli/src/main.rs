mod config;

use anyhow::{Result, bail};
use candle_core::Device;
use clap::{Args, Parser, Subcommand};
use config::RunConfig;
use rand::Rng;
use spiral_agents::{snapshot, trainer::{AsyncTrainer, EnvFactory}};
use spiral_core::{
    env::{Action, Env, RenderMode},
    rng::with_rng,
};
use spiral_api::evaluate;
use spiral_env::{BrushInfo, ToyEnv, toy_dataset::Split, viewer::Viewer};
use std::{path::PathBuf, sync::Arc};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "spiral", about = "Adversarially trained drawing agents")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Train an agent on the toy canvas.
    Train(TrainArgs),
    /// Paint random strokes, optionally dumping every frame.
    Random(RandomArgs),
}

#[derive(Args)]
struct TrainArgs {
    /// TOML run configuration
    #[arg(long)]
    config: Option<PathBuf>,
    /// Training steps per worker
    #[arg(long, default_value_t = 100)]
    steps: usize,
    #[arg(long, default_value_t = 1)]
    workers: usize,
    #[arg(long)]
    snapshot_dir: Option<PathBuf>,
    /// Continue from the newest snapshot in the snapshot directory
    #[arg(long, requires = "snapshot_dir")]
    resume: bool,
    #[arg(long, default_value_t = 0)]
    seed: u64,
}

#[derive(Args)]
struct RandomArgs {
    #[arg(long, default_value_t = 16)]
    imsize: usize,
    #[arg(long, default_value_t = 20)]
    steps: usize,
    /// Writes a PNG per rendered frame into this directory
    #[arg(long)]
    frame_dir: Option<PathBuf>,
    /// Loads the brush named by the BRUSHINFO variable
    #[arg(long)]
    brush_from_env: bool,
    #[arg(long, default_value_t = 0)]
    seed: u64,
}

fn train(args: TrainArgs) -> Result<()> {
    spiral_core::rng::seed(args.seed);
    let config = RunConfig::load(args.config.as_deref())?;
    let dataset = Arc::new(config.dataset()?);
    let mut agent = config.agent.build(dataset.clone(), None, &Device::Cpu)?;

    let mut step = 0;
    if args.resume {
        if let Some(dir) = args.snapshot_dir.as_deref() {
            match agent.resume_latest(dir)? {
                Some(restored) => {
                    info!(step = restored, "resuming");
                    step = restored;
                }
                None => info!(dir = %dir.display(), "no snapshot to resume from"),
            }
        }
    }

    let imsize = config.agent.imsize;
    if args.workers > 1 {
        let make_env: EnvFactory<ToyEnv> = Arc::new(move |_worker: usize| ToyEnv::new(imsize));
        let trainer = AsyncTrainer::spawn(&agent, args.workers, make_env)?;
        let stats = trainer.train(args.steps)?;
        step += trainer.completed_steps();
        if let Some(last) = stats.last() {
            info!(?last, "async training finished");
        }
        if trainer.failed_updates() > 0 {
            bail!("{} gradient proposals were rejected", trainer.failed_updates());
        }
    } else {
        let mut env = ToyEnv::new(imsize)?;
        let last = agent.train(&mut env, args.steps, args.snapshot_dir.as_deref())?;
        step = agent.step();
        if let Some(last) = last {
            info!(?last, "training finished");
        }
    }

    let test_samples: Vec<_> = dataset
        .patterns(Split::Test)
        .iter()
        .map(|pattern| dataset.render(pattern))
        .collect();
    if !test_samples.is_empty() {
        let mut env = ToyEnv::new(imsize)?;
        let scores = evaluate(&agent, &mut env, &test_samples)?;
        let mean = scores.iter().sum::<f32>() / scores.len() as f32;
        info!(samples = scores.len(), mean_similarity = mean, "test split evaluated");
    }

    if let Some(dir) = args.snapshot_dir.as_deref() {
        if snapshot::list_snapshots(dir)?.iter().all(|(s, _)| *s != step) {
            let path = agent.snapshot(step, dir)?;
            info!(path = %path.display(), "snapshot written");
        }
        if let Some(keep) = config.keep_snapshots {
            for pruned in snapshot::prune_snapshots(dir, keep)? {
                info!(path = %pruned.display(), "snapshot pruned");
            }
        }
    }
    Ok(())
}

fn random(args: RandomArgs) -> Result<()> {
    spiral_core::rng::seed(args.seed);
    let brush = if args.brush_from_env {
        BrushInfo::from_process_env()?
    } else {
        BrushInfo::default()
    };
    let mut env = ToyEnv::with_brush(args.imsize, brush)?;
    if let Some(dir) = args.frame_dir {
        env = env.with_viewer(Viewer::with_frame_dir(dir));
    }
    env.reset()?;
    for _ in 0..args.steps {
        let action = with_rng(|rng| {
            Action::new(
                [rng.random(), rng.random()],
                rng.random(),
                [rng.random(), rng.random(), rng.random()],
                rng.random_range(0..=1),
            )
        })?;
        let outcome = env.step(&action)?;
        env.render(RenderMode::Human)?;
        if outcome.done {
            break;
        }
    }
    info!(frames = env.viewer().frames(), "random episode finished");
    env.close()?;
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    match Cli::parse().command {
        Command::Train(args) => train(args),
        Command::Random(args) => random(args),
    }
}
