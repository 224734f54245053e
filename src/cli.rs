//! Command-line interface definitions for Skeptic News.
//!
//! This module defines the CLI arguments and options using the `clap` crate.
//! Backend settings can also be provided via environment variables.

use crate::models::StageId;
use clap::Parser;

/// Command-line arguments for the Skeptic News application.
///
/// # Examples
///
/// ```sh
/// # Full default report, Markdown printed to stdout
/// skeptic_news https://example.com/news/article
///
/// # Only the claims and counter-arguments, written to disk
/// skeptic_news https://example.com/news/article --stages claims,counterargs -j ./json -m ./markdown
///
/// # Add the overall credibility assessment
/// skeptic_news https://example.com/news/article --assess
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// URL of the news article to analyze
    pub url: String,

    /// Deadline for the whole analysis run, in milliseconds
    #[arg(short, long, default_value_t = 120_000)]
    pub deadline_ms: u64,

    /// Comma-separated stages to run (dependencies are added automatically)
    #[arg(short, long, value_delimiter = ',')]
    pub stages: Vec<StageId>,

    /// Also run the overall credibility assessment
    #[arg(long)]
    pub assess: bool,

    /// Output directory for the JSON report
    #[arg(short, long)]
    pub json_output_dir: Option<String>,

    /// Output directory for the Markdown report (stdout when omitted)
    #[arg(short, long)]
    pub markdown_output_dir: Option<String>,

    /// Optional path to a pipeline configuration YAML file
    #[arg(short, long)]
    pub config: Option<String>,

    /// Path to the LLM client config.yaml
    #[arg(long, env = "SKEPTIC_LLM_CONFIG")]
    pub llm_config: Option<String>,

    /// Maximum backend requests per minute (0 disables pacing)
    #[arg(long, env = "SKEPTIC_RPM", default_value_t = 15)]
    pub requests_per_minute: u32,
}

impl Cli {
    /// The stage selection to analyze, `None` for the default core set.
    pub fn requested_stages(&self) -> Option<Vec<StageId>> {
        if self.stages.is_empty() && !self.assess {
            return None;
        }
        let mut stages = if self.stages.is_empty() {
            StageId::CORE.to_vec()
        } else {
            self.stages.clone()
        };
        if self.assess {
            stages.push(StageId::Assessment);
        }
        stages.sort();
        stages.dedup();
        Some(stages)
    }
}
