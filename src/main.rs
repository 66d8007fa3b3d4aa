//! Autograder - Command Line Entry Point

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use autograder::{
    builder::Builder,
    report::ReportAggregator,
    runner::TestRunner,
    source::SubmissionSource,
    testcase::load_fixtures,
    CommandExecutor, Config, EvaluationResult, EvaluationStage, Evaluator, TestFixture,
};

#[derive(Parser)]
#[command(name = "autograder", version)]
#[command(about = "Build and test a batch of compiler submissions", long_about = None)]
struct Cli {
    /// Submissions zip (batch mode) or one submission archive (single mode)
    #[arg(long)]
    src: PathBuf,

    /// Directory containing the test fixtures
    #[arg(long)]
    testdir: PathBuf,

    /// Evaluation mode
    #[arg(short, long, value_enum)]
    mode: Mode,

    /// Where submissions are extracted (default: a temporary directory)
    #[arg(long)]
    extract_dir: Option<PathBuf>,

    /// Report format printed to stdout
    #[arg(short, long, value_enum, default_value_t = Format::Table)]
    format: Format,

    /// Also write the CSV report to this file
    #[arg(long, value_name = "PATH")]
    csv: Option<PathBuf>,

    /// Print score statistics after the report
    #[arg(long)]
    summary: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Points awarded per passing fixture
    #[arg(long)]
    points_per_pass: Option<f64>,

    /// Time limit for each run of submission code
    #[arg(long)]
    run_timeout_secs: Option<u64>,

    /// Time limit for extraction, build and assembly
    #[arg(long)]
    build_timeout_secs: Option<u64>,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    #[value(alias = "b")]
    Batch,
    #[value(alias = "s")]
    Single,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Table,
    Csv,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "autograder=debug"
    } else {
        "autograder=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = load_config(&cli)?;

    let fixtures: Arc<[TestFixture]> = load_fixtures(&cli.testdir)
        .with_context(|| format!("Failed to load fixtures from {}", cli.testdir.display()))?
        .into();
    if fixtures.is_empty() {
        tracing::warn!(dir = %cli.testdir.display(), "No fixtures found, every score will be 0");
    }

    let executor = Arc::new(
        CommandExecutor::new(&config.toolchain, &config.execution)
            .context("Failed to set up command executor")?,
    );
    let source =
        SubmissionSource::new(&config.identifier).context("Invalid identifier pattern")?;

    let (extract_root, _extract_guard) = extract_root(cli.extract_dir.as_deref())?;
    tracing::info!(dir = %extract_root.display(), "Extracting submissions");

    let evaluator = Evaluator::new(
        Builder::new(
            executor.clone(),
            config.build.clone(),
            config.execution.diagnostic_limit_bytes,
        ),
        TestRunner::new(
            executor,
            fixtures.clone(),
            config.execution.clone(),
            config.build.timeout,
        ),
        extract_root,
        config.scoring.points_per_pass,
    );

    let mut report = ReportAggregator::new(fixtures.len());

    match cli.mode {
        Mode::Batch => {
            let batch = source
                .batch(&cli.src)
                .await
                .with_context(|| format!("Failed to read submissions from {}", cli.src.display()))?;
            for entry in batch.rejected.iter().cloned() {
                report.reject(entry);
            }
            if batch.is_empty() {
                tracing::warn!(src = %cli.src.display(), "No evaluable submissions in batch");
            } else {
                tracing::info!(count = batch.len(), "Evaluating submissions");
            }
            for submission in &batch.submissions {
                report.add(evaluator.evaluate(submission).await);
            }
        }
        Mode::Single => match source.single(&cli.src) {
            Ok(submission) => report.add(evaluator.evaluate(&submission).await),
            Err(err) => {
                tracing::warn!(
                    src = %cli.src.display(),
                    error = %err,
                    "Cannot evaluate submission"
                );
                let name = cli
                    .src
                    .file_name()
                    .map(|n| n.to_string_lossy())
                    .unwrap_or_default();
                let stem = name.split('.').next().unwrap_or_default().to_string();
                report.add(EvaluationResult::failed(stem, &err, EvaluationStage::NotStarted));
            }
        },
    }

    let rendered = match cli.format {
        Format::Table => report.render_table(),
        Format::Csv => report.render_csv(),
        Format::Json => report.render_json().context("Failed to render JSON report")?,
    };
    print!("{}", rendered);
    if cli.format == Format::Json {
        println!();
    }

    if let Some(path) = &cli.csv {
        std::fs::write(path, report.render_csv())
            .with_context(|| format!("Failed to write CSV report to {}", path.display()))?;
        tracing::info!(path = %path.display(), "Wrote CSV report");
    }

    if cli.summary {
        print!("\n{}", report.render_summary());
    }

    Ok(())
}

/// Environment configuration with command-line overrides applied
fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::from_env().context("Failed to load configuration")?;

    if let Some(points) = cli.points_per_pass {
        config.scoring.points_per_pass = points;
    }
    if let Some(secs) = cli.run_timeout_secs {
        config.execution.run_timeout = Duration::from_secs(secs);
    }
    if let Some(secs) = cli.build_timeout_secs {
        config.build.timeout = Duration::from_secs(secs);
    }

    config.validate().context("Invalid command-line option")?;
    Ok(config)
}

/// Absolute extraction root, plus the temporary directory owning it if one was created
fn extract_root(requested: Option<&Path>) -> Result<(PathBuf, Option<tempfile::TempDir>)> {
    match requested {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
            let dir = std::path::absolute(dir)
                .with_context(|| format!("Failed to resolve {}", dir.display()))?;
            Ok((dir, None))
        }
        None => {
            let temp = tempfile::Builder::new()
                .prefix("autograder-extract-")
                .tempdir()
                .context("Failed to create extraction directory")?;
            Ok((temp.path().to_path_buf(), Some(temp)))
        }
    }
}
