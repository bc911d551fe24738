use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use env_logger::Env;
use indicatif::{ProgressBar, ProgressStyle};
use reuprs::config::DetectorConfig;
use reuprs::services::{load_batch, DetectionPipeline, DetectionReport};
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

#[derive(Parser, Debug)]
#[command(name = "reuprs", version, about = "Detect reuploaded media segments")]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Cluster a batch of analysed items into reupload groups
    Detect {
        /// JSON manifest with items and optional inline features
        #[arg(short, long, value_name = "FILE")]
        manifest: PathBuf,
        /// Directory of `*.audio.json` / `*.video.json` feature files
        #[arg(short, long, value_name = "DIR")]
        features_dir: Option<PathBuf>,
        /// Configuration file (default: the user config directory)
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,
        /// Where to write the JSON report
        #[arg(short, long, value_name = "FILE", default_value = "reupload_report.json")]
        output: PathBuf,
        /// Override the worker count
        #[arg(short, long)]
        workers: Option<usize>,
    },

    /// Print the summary of a saved report
    Report {
        #[arg(short, long, value_name = "FILE")]
        path: PathBuf,
    },

    /// Inspect configuration
    Config {
        #[command(subcommand)]
        command: ConfigCmd,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCmd {
    /// Print the effective configuration as TOML
    Show {
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,
    },
    /// Print the default configuration path
    Path,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Detect {
            manifest,
            features_dir,
            config,
            output,
            workers,
        } => detect(&manifest, features_dir.as_deref(), config.as_deref(), &output, workers)?,

        Commands::Report { path } => {
            let report = DetectionReport::read(&path)
                .with_context(|| format!("Could not open report {:?}", path))?;
            print!("{}", report.summary());
        }

        Commands::Config { command } => match command {
            ConfigCmd::Show { config } => {
                let config = load_config(config.as_deref())?;
                let text = config
                    .to_toml_string()
                    .context("Failed to serialize configuration")?;
                print!("{}", text);
            }
            ConfigCmd::Path => match DetectorConfig::default_path() {
                Some(path) => println!("{}", path.display()),
                None => bail!("No configuration directory on this platform"),
            },
        },
    }

    Ok(())
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(level)).init();
}

fn load_config(path: Option<&Path>) -> Result<DetectorConfig> {
    let config = DetectorConfig::load_or_default(path).with_context(|| match path {
        Some(path) => format!("Failed to load configuration {:?}", path),
        None => "Failed to load default configuration".to_string(),
    })?;
    Ok(config)
}

fn detect(
    manifest: &Path,
    features_dir: Option<&Path>,
    config_path: Option<&Path>,
    output: &Path,
    workers: Option<usize>,
) -> Result<()> {
    let config = load_config(config_path)?;

    println!("▶ Loading manifest: {}", manifest.display());
    let batch = benchmark("loading features", || {
        load_batch(manifest, features_dir, &config)
    })
    .with_context(|| format!("Failed to load batch from {:?}", manifest))?;
    println!(
        "▶ {} items, {} audio and {} video feature records",
        batch.items.len(),
        batch.features.audio.len(),
        batch.features.video.len()
    );
    if batch.tagged > 0 {
        println!("▶ {} item(s) typed by the karaoke classifier", batch.tagged);
    }

    let progress = ProgressBar::new(0);
    progress.set_style(
        ProgressStyle::with_template("{spinner:.green} [{bar:30}] {pos}/{len} groups {msg}")?
            .progress_chars("=> "),
    );
    progress.enable_steady_tick(Duration::from_millis(100));

    let mut pipeline = DetectionPipeline::new(config.clone()).with_progress_bar(progress);
    if let Some(workers) = workers {
        pipeline = pipeline.with_workers(workers);
    }

    let token = pipeline.get_cancellation_token();
    ctrlc::set_handler(move || {
        eprintln!("⏹ Cancelling after the groups in progress…");
        token.store(true, Ordering::Relaxed);
    })
    .context("Failed to install Ctrl-C handler")?;

    let run = benchmark("detection", || pipeline.run(&batch.items, &batch.features));
    let cancelled = run.cancelled;

    let report = DetectionReport::new(run, config, Some(manifest));
    print!("{}", report.summary());
    report
        .write(output)
        .with_context(|| format!("Failed to write report {:?}", output))?;
    println!("✔ Report written to {}", output.display());

    if cancelled {
        bail!("Detection cancelled; partial report written to {:?}", output);
    }
    Ok(())
}

/// Run `f()`, print how long it took (with `label`), and return its result.
fn benchmark<T, F: FnOnce() -> T>(label: &str, f: F) -> T {
    let start = Instant::now();
    let result = f();
    println!("⏱ {} took {:.2?}", label, start.elapsed());
    result
}
