//! The request entry point: validate, fetch, run, assemble.

use crate::backend::ReasoningBackend;
use crate::fetcher::DocumentFetcher;
use crate::models::{Document, StageId};
use crate::orchestrator::PipelineOrchestrator;
use crate::report::{Report, ReportAssembler};
use crate::stages::ConfigError;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, instrument, warn};
use url::Url;

/// Rejections raised before any work begins.
#[derive(Debug, Error)]
pub enum AnalyzeError {
    #[error("invalid url {0:?}: expected an absolute http(s) url")]
    InvalidUrl(String),
    #[error("no stages requested")]
    EmptyStageSet,
    #[error(transparent)]
    Plan(#[from] ConfigError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalyzeOptions {
    pub deadline: Duration,
    /// `None` runs the six core stages.
    pub stages: Option<Vec<StageId>>,
}

impl Default for AnalyzeOptions {
    fn default() -> Self {
        Self {
            deadline: Duration::from_millis(120_000),
            stages: None,
        }
    }
}

pub struct Analyzer<F, B> {
    fetcher: F,
    orchestrator: PipelineOrchestrator<B>,
}

impl<F, B> Analyzer<F, B>
where
    F: DocumentFetcher,
    B: ReasoningBackend,
{
    pub fn new(fetcher: F, orchestrator: PipelineOrchestrator<B>) -> Self {
        Self { fetcher, orchestrator }
    }

    #[cfg(test)]
    pub fn orchestrator(&self) -> &PipelineOrchestrator<B> {
        &self.orchestrator
    }

    #[cfg(test)]
    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    /// Analyze the article at `url`.
    ///
    /// Only input validation errors are returned as `Err`. A fetch failure
    /// or an empty article yields a `FAILED` report with no stage executed.
    #[instrument(level = "info", skip_all, fields(url = %url))]
    pub async fn analyze(&self, url: &str, options: &AnalyzeOptions) -> Result<Report, AnalyzeError> {
        let parsed = parse_url(url)?;
        let requested = match &options.stages {
            Some(stages) if stages.is_empty() => return Err(AnalyzeError::EmptyStageSet),
            Some(stages) => stages.clone(),
            None => StageId::CORE.to_vec(),
        };
        let plan = self.orchestrator.plan(&requested, options.deadline)?;

        let run = match self.fetcher.fetch(&parsed).await {
            Ok(document) => {
                info!(chars = document.raw_text.chars().count(), title = %document.label(), "Fetched document");
                self.orchestrator.run(document, &plan).await
            }
            Err(e) => {
                warn!(error = %e, "Fetch failed; reporting run as failed");
                let mut document = Document::new(parsed.as_str(), "");
                document.metadata.domain = parsed.host_str().unwrap_or_default().to_string();
                self.orchestrator.failed_run(document, &plan, format!("fetch failed: {e}"))
            }
        };

        Ok(ReportAssembler::assemble(&run))
    }
}

fn parse_url(url: &str) -> Result<Url, AnalyzeError> {
    let parsed = Url::parse(url.trim()).map_err(|_| AnalyzeError::InvalidUrl(url.to_string()))?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return Err(AnalyzeError::InvalidUrl(url.to_string()));
    }
    Ok(parsed)
}
