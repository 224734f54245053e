//! # Skeptic News
//!
//! Runs a news article through a staged set of LLM analyses and assembles a
//! skepticism report: the article's core claims, its language and tone, bias
//! red flags, questions to verify, key entities and counter-arguments.
//!
//! ## Usage
//!
//! ```sh
//! skeptic_news https://example.com/news/article -j ./json -m ./markdown
//! ```
//!
//! ## Architecture
//!
//! 1. **Fetching**: Download the article and extract its text and metadata
//! 2. **Planning**: Resolve the requested stages and their dependencies into waves
//! 3. **Analysis**: Run each wave concurrently against the LLM, retrying transient failures
//! 4. **Output**: Assemble the report and write JSON and Markdown
//!
//! A failing stage never aborts the run: its section is marked unavailable
//! with the reason, and stages that need its output are skipped.

use awful_aj::config_dir;
use clap::Parser;
use std::error::Error;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{fmt as tfmt, EnvFilter};

mod analyzer;
mod backend;
mod cli;
mod executor;
mod fetcher;
mod models;
mod orchestrator;
mod outputs;
mod payloads;
mod rate_limiter;
mod report;
mod stages;
#[cfg(test)]
mod testing;
mod utils;

use analyzer::{AnalyzeOptions, Analyzer};
use backend::AwfulJadeBackend;
use cli::Cli;
use fetcher::HttpFetcher;
use models::RunStatus;
use orchestrator::PipelineOrchestrator;
use outputs::{json, markdown};
use rate_limiter::RateLimiter;
use stages::PipelineConfig;
use utils::ensure_writable_dir;

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!("skeptic_news starting up");

    let args = Cli::parse();
    debug!(?args, "Parsed CLI arguments");

    // Early check: output dirs must be writable before any LLM time is spent
    for dir in [&args.json_output_dir, &args.markdown_output_dir].into_iter().flatten() {
        if let Err(e) = ensure_writable_dir(dir).await {
            error!(path = %dir, error = %e, "Output directory is not writable (fix perms or choose a different path)");
            return Err(e);
        }
    }

    // ---- Pipeline & backend config ----
    let pipeline = match &args.config {
        Some(path) => PipelineConfig::load(Path::new(path)).map_err(|e| {
            error!(path = %path, error = %e, "Invalid pipeline configuration");
            e
        })?,
        None => PipelineConfig::default(),
    };
    let pipeline = Arc::new(pipeline);
    info!(stages = pipeline.stages.len(), "Pipeline configuration ready");

    let llm_config = match &args.llm_config {
        Some(path) => path.clone(),
        None => config_dir()?.join("config.yaml").to_string_lossy().into_owned(),
    };
    let limiter = RateLimiter::per_minute(args.requests_per_minute);
    let backend = AwfulJadeBackend::load(&llm_config, &pipeline, limiter).await?;

    let analyzer = Analyzer::new(
        HttpFetcher::new()?,
        PipelineOrchestrator::new(Arc::clone(&pipeline), backend),
    );
    let options = AnalyzeOptions {
        deadline: Duration::from_millis(args.deadline_ms),
        stages: args.requested_stages(),
    };

    // ---- Analyze ----
    let report = analyzer.analyze(&args.url, &options).await.map_err(|e| {
        error!(url = %args.url, error = %e, "Rejected analysis request");
        e
    })?;
    match report.overall_status {
        RunStatus::Complete => info!(sections = report.sections.len(), "All sections available"),
        RunStatus::Failed => warn!(error = ?report.error, "Analysis failed; report has no available sections"),
        status => warn!(
            %status,
            available = report.available_count(),
            total = report.sections.len(),
            "Partial report"
        ),
    }

    // ---- Outputs ----
    if let Some(dir) = &args.json_output_dir {
        match json::write_report_json(&report, dir).await {
            Ok(path) => info!(path = %path.display(), "JSON report written"),
            Err(e) => error!(error = %e, "Failed to write JSON report"),
        }
    }

    match &args.markdown_output_dir {
        Some(dir) => match markdown::write_report_markdown(&report, dir).await {
            Ok(path) => info!(path = %path.display(), "Markdown report written"),
            Err(e) => error!(error = %e, "Failed to write Markdown report"),
        },
        None => println!("{}", markdown::render_markdown(&report)),
    }

    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        secs = elapsed.as_secs(),
        millis = elapsed.subsec_millis(),
        status = %report.overall_status,
        "Execution complete"
    );

    Ok(())
}
