//! Fractal BCI Application
//!
//! Command-line entry point for the motor-imagery decoding pipeline.
//!
//! # Usage
//!
//! ```bash
//! # Decode nine synthetic subjects with the fractal features
//! fractal-bci run
//!
//! # Decode exported subjects P01.json..P05.json with the log-power baseline
//! fractal-bci run --data-dir data/ --subjects 5 --features log-power
//!
//! # Enhanced Higuchi descriptor of a one-column signal file
//! fractal-bci hfd signal.txt --k-max 50
//!
//! # Print the default configuration
//! fractal-bci config > pipeline.toml
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use fractal_bci_core::math;
use fractal_bci_core::{FeatureKind, PipelineConfig};
use fractal_bci_native::pipeline::{
    BatchReport, BatchRunner, JsonDirSource, ResultWriter, SubjectPipeline, SyntheticConfig,
    SyntheticSource,
};
use fractal_bci_native::processing::fractal::HiguchiEstimator;

/// Fractal BCI Application
#[derive(Parser, Debug)]
#[command(name = "fractal-bci")]
#[command(author, version, about = "Fractal-feature motor-imagery decoding", long_about = None)]
struct Cli {
    /// Logging verbosity level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

/// Feature-extraction strategy
#[derive(Copy, Clone, Debug, ValueEnum)]
enum FeatureArg {
    /// Enhanced Higuchi descriptors
    Fractal,
    /// Band log-variance
    LogPower,
}

impl From<FeatureArg> for FeatureKind {
    fn from(arg: FeatureArg) -> Self {
        match arg {
            FeatureArg::Fractal => Self::Fractal,
            FeatureArg::LogPower => Self::LogPower,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the batch pipeline over subjects 1..=N
    Run {
        /// TOML configuration file (defaults apply to missing keys)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Directory of P{id:02}.json subject files (synthetic data if omitted)
        #[arg(short, long)]
        data_dir: Option<PathBuf>,

        /// Number of subjects
        #[arg(short, long, default_value = "9")]
        subjects: u32,

        /// Feature-extraction strategy
        #[arg(short, long, value_enum)]
        features: Option<FeatureArg>,

        /// Maximum Higuchi scale
        #[arg(long)]
        k_max: Option<usize>,

        /// Cross-validation folds
        #[arg(long)]
        folds: Option<usize>,

        /// Partition and synthetic-data seed
        #[arg(long)]
        seed: Option<u64>,

        /// Skip the in-sample refinement stage
        #[arg(long)]
        no_refine: bool,

        /// Process subjects one at a time
        #[arg(long)]
        sequential: bool,

        /// Output root directory
        #[arg(short, long, default_value = "results")]
        out: PathBuf,
    },

    /// Compute the enhanced Higuchi descriptor of a signal file
    Hfd {
        /// Text file with one sample per line (first column of CSV)
        file: PathBuf,

        /// Maximum scale
        #[arg(short, long, default_value = "100")]
        k_max: usize,
    },

    /// Print the default configuration as TOML
    Config,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Fractal BCI v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Run {
            config,
            data_dir,
            subjects,
            features,
            k_max,
            folds,
            seed,
            no_refine,
            sequential,
            out,
        } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(features) = features {
                config.features = features.into();
            }
            if let Some(k_max) = k_max {
                config.fractal.k_max = k_max;
            }
            if let Some(folds) = folds {
                config.cv.folds = folds;
            }
            if let Some(seed) = seed {
                config.cv.seed = seed;
            }
            if no_refine {
                config.refinement.enabled = false;
            }
            run_batch(config, data_dir, subjects, sequential, &out)?;
        }
        Commands::Hfd { file, k_max } => {
            compute_hfd(&file, k_max)?;
        }
        Commands::Config => {
            print!("{}", toml::to_string_pretty(&PipelineConfig::default())?);
        }
    }

    Ok(())
}

/// Load a TOML configuration, or the defaults
fn load_config(path: Option<&Path>) -> anyhow::Result<PipelineConfig> {
    let Some(path) = path else {
        return Ok(PipelineConfig::default());
    };
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let config: PipelineConfig =
        toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    info!("Loaded configuration from {}", path.display());
    Ok(config)
}

/// Run every subject and write the result tables
fn run_batch(
    config: PipelineConfig,
    data_dir: Option<PathBuf>,
    subjects: u32,
    sequential: bool,
    out: &Path,
) -> anyhow::Result<()> {
    let seed = config.cv.seed;
    let mut runner = BatchRunner::new(SubjectPipeline::new(config)?);
    if sequential {
        runner = runner.sequential();
    }
    let ids: Vec<u32> = (1..=subjects).collect();

    let report = match data_dir {
        Some(dir) => runner.run(&JsonDirSource::new(dir), &ids),
        None => {
            let source = SyntheticSource::new(SyntheticConfig { seed, ..SyntheticConfig::default() });
            runner.run(&source, &ids)
        }
    };

    let writer = ResultWriter::new(out, report.variant());
    writer.write_report(&report)?;
    print_summary(&report);

    if report.successes().next().is_none() {
        anyhow::bail!("no subject completed");
    }
    Ok(())
}

fn print_summary(report: &BatchReport) {
    let summary = report.summary();
    println!("{}", summary.variant);
    println!("{:>8} {:>8} {:>10} {:>10} {:>10}", "subject", "trials", "cv_acc", "cv_kappa", "final_acc");
    for s in &summary.subjects {
        println!(
            "{:>8} {:>8} {:>10.3} {:>10.3} {:>10.3}",
            s.subject_id, s.n_trials, s.cv_accuracy, s.cv_kappa, s.final_accuracy
        );
    }
    for f in &summary.failures {
        let status = if f.skipped { "skipped" } else { "failed" };
        warn!("Subject {} {}: {}", f.subject_id, status, f.error);
    }
    println!(
        "combined: {} rows, accuracy {:.3}, mean correct-class probability {:.3}",
        summary.combined_rows, summary.combined_accuracy, summary.mean_correct_prob
    );
}

/// Read a one-column signal and print its descriptor as JSON
fn compute_hfd(file: &Path, k_max: usize) -> anyhow::Result<()> {
    let text = fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))?;
    let mut signal = Vec::new();
    for (line_no, line) in text.lines().enumerate() {
        let Some(field) = line.split(',').next().map(str::trim) else {
            continue;
        };
        if field.is_empty() || field.starts_with('#') {
            continue;
        }
        match field.parse::<f64>() {
            Ok(v) => signal.push(v),
            // A header row is allowed on the first line
            Err(_) if line_no == 0 => {}
            Err(e) => anyhow::bail!("line {}: {e}", line_no + 1),
        }
    }

    let m = math::mean(&signal);
    signal.iter_mut().for_each(|v| *v -= m);

    let descriptor = HiguchiEstimator::new(k_max).estimate(&signal);
    if descriptor.is_degenerate() {
        warn!("Degenerate signal ({} samples): {:?}", signal.len(), descriptor.degeneracy);
    }
    println!("{}", serde_json::to_string_pretty(&descriptor)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_toml_roundtrip() {
        let text = toml::to_string_pretty(&PipelineConfig::default()).unwrap();
        let parsed: PipelineConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, PipelineConfig::default());
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let parsed: PipelineConfig = toml::from_str("features = \"log_power\"\n[cv]\nfolds = 3\n").unwrap();
        assert_eq!(parsed.features, FeatureKind::LogPower);
        assert_eq!(parsed.cv.folds, 3);
        assert_eq!(parsed.cv.seed, 42);
        assert_eq!(parsed.fractal.k_max, 100);
    }

    #[test]
    fn test_cli_parses_run_overrides() {
        let cli = Cli::parse_from(["fractal-bci", "run", "--features", "log-power", "--folds", "4", "--no-refine"]);
        match cli.command {
            Commands::Run { features, folds, no_refine, subjects, .. } => {
                assert!(matches!(features, Some(FeatureArg::LogPower)));
                assert_eq!(folds, Some(4));
                assert!(no_refine);
                assert_eq!(subjects, 9);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
