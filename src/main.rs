use anyhow::{Context, Result};
use clap::Parser;
use cwe_score::aggregate::aggregate;
use cwe_score::config::Config;
use cwe_score::corpus::{RecordEntry, SampleStore, annotations, read_records};
use cwe_score::detector::{ConfiguredDetector, DetectorAdapter};
use cwe_score::matching::Verdict;
use cwe_score::runner::{self, CancellationToken};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(
    name = "cwescore",
    about = "Score a vulnerability detector against CWE-labeled C/C++ samples"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Run the detector over a corpus and emit verdicts plus the aggregate report
    Score {
        /// Annotated fragment directory, or a JSON / JSON Lines record file
        #[arg(long)]
        corpus: PathBuf,

        /// Path to config file
        #[arg(short, long, default_value = "cwescore.toml")]
        config: PathBuf,

        /// Write the run outcome here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Fail on the first malformed record instead of skipping it
        #[arg(long)]
        strict: bool,

        /// Detector program; switches the detector to kind = "command"
        #[arg(long)]
        detector: Option<String>,

        /// Argument for the detector program, replacing configured args; repeatable
        #[arg(long = "detector-arg", allow_hyphen_values = true)]
        detector_args: Vec<String>,

        /// Number of samples scored concurrently
        #[arg(long)]
        workers: Option<usize>,

        /// Accepted distance between reported and ground-truth line
        #[arg(long)]
        line_tolerance: Option<u32>,

        /// Per-call detector timeout
        #[arg(long)]
        timeout_secs: Option<u64>,

        /// Whole-run deadline; pending samples become inconclusive
        #[arg(long)]
        run_timeout_secs: Option<u64>,
    },

    /// Parse an annotated fragment directory and print the records as JSON
    Ingest {
        /// Directory of annotated C/C++ fragments
        dir: PathBuf,
    },

    /// Re-aggregate saved verdicts (a verdict array or a score outcome) into a report
    Aggregate {
        #[arg(long)]
        verdicts: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cwe_score=info".into()),
        )
        .init();

    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    match cli.command {
        Command::Score {
            corpus,
            config,
            output,
            strict,
            detector,
            detector_args,
            workers,
            line_tolerance,
            timeout_secs,
            run_timeout_secs,
        } => {
            let mut cfg = Config::load_or_default(&config)?;
            cfg.override_command(detector, detector_args);
            if let Some(workers) = workers {
                cfg.run.workers = workers;
            }
            if let Some(tolerance) = line_tolerance {
                cfg.matching.line_tolerance = tolerance;
            }
            if let Some(secs) = timeout_secs {
                cfg.detector.timeout_secs = secs;
            }
            if run_timeout_secs.is_some() {
                cfg.run.run_timeout_secs = run_timeout_secs;
            }
            cfg.run.strict |= strict;
            cfg.validate()?;

            score(&cfg, &corpus, output.as_deref()).await
        }
        Command::Ingest { dir } => {
            let records = annotations::load_dir(&dir)?;
            info!(records = records.len(), dir = %dir.display(), "fragments parsed");
            println!("{}", serde_json::to_string_pretty(&records)?);
            Ok(())
        }
        Command::Aggregate { verdicts } => {
            let verdicts = read_verdicts(&verdicts)?;
            let report = aggregate(&verdicts);
            println!("{}", serde_json::to_string_pretty(&report.document())?);
            Ok(())
        }
    }
}

async fn score(cfg: &Config, corpus: &Path, output: Option<&Path>) -> Result<()> {
    let records = load_corpus(corpus)?;
    let (store, rejected) = SampleStore::load(records, cfg.run.strict)?;
    if store.is_empty() {
        anyhow::bail!("no usable samples in {}", corpus.display());
    }

    let detector = ConfiguredDetector::from_config(&cfg.detector)?;
    let adapter = Arc::new(DetectorAdapter::new(detector, cfg.adapter_options()));

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, cancelling run");
                cancel.cancel();
            }
        });
    }

    let outcome = runner::run(
        &store,
        adapter,
        cfg.match_policy(),
        &cfg.run_options(),
        &cancel,
    )
    .await
    .with_rejected(&rejected);

    let json = serde_json::to_string_pretty(&outcome.to_json())?;
    match output {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, &json)?;
            info!(path = %path.display(), "run outcome written");
        }
        None => println!("{json}"),
    }

    if !outcome.is_complete() {
        warn!(
            exceptions = outcome.exceptions.len(),
            rejected = outcome.rejected_records.len(),
            "run finished with exceptions"
        );
    }
    Ok(())
}

fn load_corpus(path: &Path) -> Result<Vec<RecordEntry>> {
    if path.is_dir() {
        let records = annotations::load_dir(path)?;
        return Ok(records.into_iter().map(RecordEntry::from).collect());
    }
    Ok(read_records(path)?)
}

fn read_verdicts(path: &Path) -> Result<Vec<Verdict>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let mut value: serde_json::Value = serde_json::from_str(&content)?;
    // Accept a full `score` outcome as well as a bare verdict array.
    if let Some(verdicts) = value.get_mut("verdicts") {
        value = verdicts.take();
    }
    Ok(serde_json::from_value(value)?)
}
