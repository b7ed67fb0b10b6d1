use crate::compose::{CompositeImage, Compositor};
use crate::config::{Config, load_config};
use crate::feedback::GeminiEngine;
use crate::placement::PlacementSet;
use crate::placement_dump::write_placement_dump;
use crate::refine::{RefineOptions, RefinementController, RunState};
use crate::render::write_output_png;
use crate::selection::{AssetLibrary, SelectionSet, load_selections};
use anyhow::Result;
use clap::{Parser, Subcommand};
use image::RgbImage;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(
    name = "facecomp",
    version,
    about = "Layered face-part compositor with iterative refinement"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Compose one image from a selection file
    Compose(ComposeArgs),
    /// Compose, then refine placements against a reference photo
    Refine(RefineArgs),
}

#[derive(clap::Args, Debug)]
pub struct InputArgs {
    /// Selection file: JSON array of records or an analysis-run document
    #[arg(short = 's', long = "selections")]
    pub selections: PathBuf,

    /// Part library root (`<root>/<category>/<category>_NNN.png`)
    #[arg(short = 'a', long = "assets")]
    pub assets: Option<PathBuf>,

    /// Config file (JSON/JSON5)
    #[arg(short = 'c', long = "configFile")]
    pub config: Option<PathBuf>,

    /// Canvas size in pixels
    #[arg(long = "canvas")]
    pub canvas: Option<u32>,

    /// Output PNG
    #[arg(short = 'o', long = "output")]
    pub output: PathBuf,
}

#[derive(clap::Args, Debug)]
pub struct ComposeArgs {
    #[command(flatten)]
    pub input: InputArgs,

    /// Draw the debug grid and part centres over the result
    #[arg(long = "grid")]
    pub grid: bool,

    /// Write resolved placements as JSON
    #[arg(long = "dump-placements")]
    pub dump_placements: Option<PathBuf>,
}

#[derive(clap::Args, Debug)]
pub struct RefineArgs {
    #[command(flatten)]
    pub input: InputArgs,

    /// Reference photo. Defaults to the selection file's `input_image`.
    #[arg(short = 'r', long = "reference")]
    pub reference: Option<PathBuf>,

    /// Maximum feedback rounds
    #[arg(short = 'b', long = "budget")]
    pub budget: Option<u32>,

    /// Per-call feedback timeout
    #[arg(long = "timeout-secs")]
    pub timeout_secs: Option<u64>,

    /// Directory for per-iteration PNGs and the run log
    #[arg(long = "output-dir")]
    pub output_dir: Option<PathBuf>,

    #[arg(long = "run-id")]
    pub run_id: Option<String>,
}

pub fn run() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    match args.command {
        Command::Compose(args) => compose(args),
        Command::Refine(args) => refine(args),
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

struct Prepared {
    config: Config,
    selections: SelectionSet,
}

fn prepare(input: &InputArgs) -> Result<Prepared> {
    let mut config = load_config(input.config.as_deref())?;
    if let Some(canvas) = input.canvas {
        config.canvas.size = canvas;
    }
    let library = input.assets.as_deref().map(AssetLibrary::new);
    let selections = load_selections(&input.selections, library.as_ref())?;
    if selections.selections.is_empty() {
        tracing::warn!(
            path = %input.selections.display(),
            "no selections found; output will be blank"
        );
    }
    Ok(Prepared { config, selections })
}

fn compose(args: ComposeArgs) -> Result<()> {
    let Prepared { config, selections } = prepare(&args.input)?;
    config.placement.validate()?;
    let placements = PlacementSet::for_selections(&config.placement, &selections.selections);
    let compositor = Compositor::new(config.canvas.size, &config.theme);
    let composite = compositor.compose_selections(&selections.selections, &placements)?;

    if let Some(path) = args.dump_placements.as_deref() {
        write_placement_dump(path, &composite)?;
    }
    let image = if args.grid {
        grid_image(&composite, &config)?
    } else {
        composite.image().clone()
    };
    write_output_png(&image, &args.input.output)?;
    tracing::info!(
        output = %args.input.output.display(),
        layers = composite.instances().len(),
        skipped = composite.skipped().len(),
        "composite written"
    );
    Ok(())
}

#[cfg(feature = "grid")]
fn grid_image(composite: &CompositeImage, config: &Config) -> Result<RgbImage> {
    let svg =
        crate::render::grid_overlay_svg(composite.size(), composite.instances(), &config.theme);
    crate::render::apply_overlay(composite.image(), &svg)
}

#[cfg(not(feature = "grid"))]
fn grid_image(_composite: &CompositeImage, _config: &Config) -> Result<RgbImage> {
    Err(anyhow::anyhow!("--grid requires the `grid` feature"))
}

fn refine(args: RefineArgs) -> Result<()> {
    let Prepared { config, selections } = prepare(&args.input)?;
    let reference = resolve_reference(&args, &selections)?;

    let mut options = RefineOptions::from_config(&config.refine);
    if let Some(budget) = args.budget {
        options.budget = budget;
    }
    if let Some(secs) = args.timeout_secs {
        options.timeout = Duration::from_secs(secs);
    }
    options.output_dir = args.output_dir.clone();
    if let Some(run_id) = args.run_id.clone() {
        options.run_id = run_id;
    }

    let engine = GeminiEngine::from_env(config.theme.clone())?;
    tracing::info!(model = engine.model(), run_id = %options.run_id, "starting refinement");
    let compositor = Compositor::new(config.canvas.size, &config.theme);
    let controller = RefinementController::new(compositor, Arc::new(engine), options);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let report = runtime.block_on(async {
        let cancel = controller.cancel_token();
        let watcher = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received; stopping after the current step");
                cancel.cancel();
            }
        });
        let report = controller
            .run(&selections.selections, &config.placement, &reference)
            .await;
        watcher.abort();
        report
    })?;

    write_output_png(report.final_composite.image(), &args.input.output)?;
    for entry in &report.log {
        let steps: Vec<String> = entry
            .adjustments_applied
            .iter()
            .map(|s| s.to_string())
            .collect();
        tracing::info!(
            iteration = entry.iteration,
            converged = entry.converged,
            "applied [{}]",
            steps.join(", ")
        );
    }
    match &report.final_state {
        RunState::Failed(reason) if !report.final_state.is_deliberate_stop() => Err(anyhow::anyhow!(
            "refinement failed after {} iteration(s): {reason}",
            report.history.len()
        )),
        state => {
            tracing::info!(
                state = %state,
                output = %args.input.output.display(),
                "refinement finished"
            );
            Ok(())
        }
    }
}

fn resolve_reference(args: &RefineArgs, selections: &SelectionSet) -> Result<PathBuf> {
    if let Some(path) = &args.reference {
        return Ok(path.clone());
    }
    let hint = selections.reference_hint.as_deref().ok_or_else(|| {
        anyhow::anyhow!("no --reference given and the selection file names no input_image")
    })?;
    if hint.is_absolute() {
        return Ok(hint.to_path_buf());
    }
    let base = args.input.selections.parent().unwrap_or_else(|| Path::new("."));
    Ok(base.join(hint))
}
