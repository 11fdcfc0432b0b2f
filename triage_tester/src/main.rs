use anyhow::{Context, Result};
use clap::Parser;
use radiograph_triage::{TriageConfig, TriageEngine, TriageSummary, TriageWorkerPool};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "triage_tester", version, about = "Run chest radiographs through the triage engine")]
struct Cli {
    /// JPEG or PNG radiographs to process.
    #[arg(required = true, num_args = 1..)]
    images: Vec<PathBuf>,

    /// Directory that receives `<name>_enhanced.png` for every input.
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Engine configuration (JSON).
    #[arg(long, env = "TRIAGE_CONFIG")]
    config: Option<PathBuf>,

    /// Protocol reference table (JSON). Overrides the one named in the config.
    #[arg(long, env = "TRIAGE_PROTOCOLS")]
    protocols: Option<PathBuf>,

    #[arg(long, default_value_t = 0, help = "Number of workers (0 = one per CPU)")]
    workers: usize,

    /// Print a plain-text report instead of JSON lines.
    #[arg(long, default_value_t = false)]
    text: bool,
}

#[derive(Serialize)]
struct OutputLine<'a> {
    file: &'a Path,
    #[serde(skip_serializing_if = "Option::is_none")]
    enhanced: Option<&'a Path>,
    #[serde(flatten)]
    summary: TriageSummary,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    // --- 1. Configuration ---
    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => TriageConfig::from_path(path)?,
        None => TriageConfig::default(),
    };
    if let Some(protocols) = &cli.protocols {
        config.protocols.table_path = Some(protocols.clone());
    }

    // --- 2. Engine & Worker Pool ---
    // No model loader ships with this driver; the engine runs on the heuristic path.
    let engine = Arc::new(TriageEngine::new(&config, None).context("failed to build triage engine")?);
    let pool = if cli.workers == 0 {
        TriageWorkerPool::with_default_workers(engine)
    } else {
        TriageWorkerPool::new(engine, cli.workers)
    };

    if let Some(dir) = &cli.output_dir {
        std::fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    }

    // --- 3. Read & Process ---
    let mut uploads = Vec::with_capacity(cli.images.len());
    for path in &cli.images {
        uploads.push(std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?);
    }
    let results = pool.triage_batch(uploads).await;

    // --- 4. Report ---
    let mut failures = 0usize;
    for (path, result) in cli.images.iter().zip(results) {
        let report = match result {
            Ok(report) => report,
            Err(error) => {
                tracing::error!(file = %path.display(), %error, "triage failed");
                failures += 1;
                continue;
            }
        };

        let enhanced_path = match &cli.output_dir {
            Some(dir) => {
                let target = enhanced_path_for(dir, path);
                let png = report.enhanced.encode_png().context("failed to encode enhanced image")?;
                std::fs::write(&target, png).with_context(|| format!("failed to write {}", target.display()))?;
                Some(target)
            }
            None => None,
        };

        if cli.text {
            let classification = &report.classification;
            let source = if classification.is_model_based() { "model" } else { "heuristic only" };
            println!("== {}", path.display());
            println!(
                "Result: {} (confidence {:.1}%, {source})",
                classification.label,
                classification.confidence.value() * 100.0
            );
            println!("{}", report.protocol);
        } else {
            let line = OutputLine {
                file: path,
                enhanced: enhanced_path.as_deref(),
                summary: report.summary(),
            };
            println!("{}", serde_json::to_string(&line)?);
        }
    }

    if failures > 0 {
        anyhow::bail!("{failures} of {} images failed", cli.images.len());
    }
    Ok(())
}

fn enhanced_path_for(dir: &Path, input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    dir.join(format!("{stem}_enhanced.png"))
}
