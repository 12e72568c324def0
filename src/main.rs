//! OOD Guard command line
//!
//! `oodguard run` calibrates a reject threshold on a dataset directory and
//! evaluates it; `oodguard show-artifact` prints a saved calibration artifact.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use oodguard_core::constants::{APP_NAME, APP_VERSION};
use oodguard_core::logic::config::DetectorConfig;
use oodguard_core::logic::dataset::{self, RecordTokenizer};
use oodguard_core::logic::model::{
    load_table, Classifier, OnnxClassifier, OnnxScorer, inference::DEFAULT_LOSS_OUTPUT,
};
use oodguard_core::logic::pipeline::{self, RunReport};

#[derive(Parser)]
#[command(name = "oodguard", version, about = "Out-of-domain detection with EVT thresholds")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Calibrate on train/dev and evaluate on test + ood
    Run {
        /// JSON config file (defaults apply when omitted)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Directory holding train/dev/test/ood.jsonl
        #[arg(long)]
        data_dir: PathBuf,

        /// ONNX scoring model; recorded losses are replayed when omitted
        #[arg(long)]
        scorer: Option<PathBuf>,

        /// Name of the scorer output holding the registered loss
        #[arg(long, default_value = DEFAULT_LOSS_OUTPUT)]
        loss_output: String,

        /// ONNX classifier; recorded logits are replayed when omitted
        #[arg(long)]
        classifier: Option<PathBuf>,

        /// Override the artifacts directory
        #[arg(long)]
        artifacts_dir: Option<PathBuf>,

        /// Write the full run report as JSON
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Print a calibration artifact
    ShowArtifact {
        path: PathBuf,
    },
}

struct RunArgs {
    config: Option<PathBuf>,
    data_dir: PathBuf,
    scorer: Option<PathBuf>,
    loss_output: String,
    classifier: Option<PathBuf>,
    artifacts_dir: Option<PathBuf>,
    report: Option<PathBuf>,
}

fn path_str(path: &Path) -> Result<&str> {
    path.to_str()
        .with_context(|| format!("Path is not valid UTF-8: {}", path.display()))
}

fn cmd_run(args: RunArgs) -> Result<()> {
    let mut config = DetectorConfig::from_sources(args.config.as_deref())
        .context("Failed to load configuration")?;
    if let Some(dir) = args.artifacts_dir {
        config.artifacts_dir = dir;
    }
    log::info!("Artifacts dir: {}", config.artifacts_dir.display());

    let splits = dataset::load_splits(&args.data_dir)
        .with_context(|| format!("Failed to load dataset from {}", args.data_dir.display()))?;
    let tokenizer = RecordTokenizer::from_splits(&splits);

    let losses = match &args.scorer {
        Some(path) => {
            let mut scorer = OnnxScorer::load(path_str(path)?, &args.loss_output)
                .context("Failed to load scoring model")?;
            pipeline::score_splits(&mut scorer, &splits, config.max_length)?
        }
        None => {
            log::info!("No scorer given, replaying recorded losses");
            pipeline::replay_split_losses(&splits, config.max_length)?
        }
    };

    let mut classifier: Box<dyn Classifier> = match &args.classifier {
        Some(path) => Box::new(
            OnnxClassifier::load(path_str(path)?).context("Failed to load classifier")?,
        ),
        None => {
            log::info!("No classifier given, replaying recorded logits");
            Box::new(dataset::replay_classifier(&splits, config.max_length))
        }
    };

    let report = pipeline::run(&config, &splits, &losses, classifier.as_mut(), &tokenizer)?;
    print_summary(&report);

    if let Some(path) = args.report {
        let json = serde_json::to_vec_pretty(&report)?;
        fs::write(&path, json)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
        log::info!("Report written to {}", path.display());
    }
    Ok(())
}

fn print_summary(report: &RunReport) {
    let eval = &report.evaluation;
    println!("Run {} ({:?})", report.run_id, report.mode);
    if let Some(t) = report.threshold {
        println!("  threshold:          {:.6}", t);
    }
    if let Some(table) = &report.table {
        println!("  thresholds fitted:  {} ({} GEV)", table.len(), table.gev_models().count());
    }
    println!("  skipped (train/dev/test/ood): {}/{}/{}/{}",
        report.train.skipped, report.dev.skipped, report.test.skipped, report.ood.skipped);
    println!("  multiclass F1:      macro {:.4}  micro {:.4}", eval.multiclass_macro_f1, eval.multiclass_micro_f1);
    println!("  binary F1:          macro {:.4}  micro {:.4}", eval.binary_macro_f1, eval.binary_micro_f1);
    match eval.auc_roc {
        Some(auc) => println!("  AUC-ROC:            {:.4}", auc),
        None => println!("  AUC-ROC:            n/a"),
    }
}

fn cmd_show_artifact(path: &Path) -> Result<()> {
    let table = load_table(path)
        .with_context(|| format!("Failed to load artifact {}", path.display()))?;
    println!("{}", serde_json::to_string_pretty(&table)?);
    Ok(())
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("{} v{}", APP_NAME, APP_VERSION);

    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            config,
            data_dir,
            scorer,
            loss_output,
            classifier,
            artifacts_dir,
            report,
        } => cmd_run(RunArgs {
            config,
            data_dir,
            scorer,
            loss_output,
            classifier,
            artifacts_dir,
            report,
        }),
        Commands::ShowArtifact { path } => cmd_show_artifact(&path),
    }
}
