//! Data models for documents, stage results and analysis runs.
//!
//! This module defines the core data structures used throughout the application:
//! - [`Document`]: Fetched article text plus scraped metadata
//! - [`StageId`]: The analytical stages a document can be run through
//! - [`StageResult`]: The terminal outcome of one stage for one run
//! - [`AnalysisRun`]: One end-to-end execution of the pipeline for a document
//!
//! Status and error enums serialize in `SCREAMING_SNAKE_CASE` so that reports
//! read the same way the stage outcomes are described in logs.

use crate::payloads::StagePayload;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Metadata scraped from the article page alongside its text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ArticleMetadata {
    /// Headline, from `h1`, `title` or `og:title`.
    pub title: String,
    /// Byline, when the page exposes one.
    pub author: String,
    /// Publication date as written on the page (not normalized).
    pub publish_date: String,
    /// Host the article was served from.
    pub domain: String,
}

/// A fetched article, immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Document {
    /// The URL the document was fetched from.
    pub source_url: String,
    /// Cleaned plain text of the article body.
    pub raw_text: String,
    /// When the fetch completed.
    pub fetched_at: DateTime<Utc>,
    /// Scraped page metadata.
    pub metadata: ArticleMetadata,
}

impl Document {
    pub fn new(source_url: impl Into<String>, raw_text: impl Into<String>) -> Self {
        Self {
            source_url: source_url.into(),
            raw_text: raw_text.into(),
            fetched_at: Utc::now(),
            metadata: ArticleMetadata::default(),
        }
    }

    /// A document whose text is missing or whitespace only cannot be analyzed.
    pub fn has_text(&self) -> bool {
        !self.raw_text.trim().is_empty()
    }

    /// Human readable label used for report titles and file names.
    pub fn label(&self) -> &str {
        if !self.metadata.title.is_empty() {
            &self.metadata.title
        } else if !self.metadata.domain.is_empty() {
            &self.metadata.domain
        } else {
            "untitled"
        }
    }
}

/// One analytical task applied to a document.
///
/// The declaration order is the canonical order used for report sections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StageId {
    Claims,
    Language,
    RedFlags,
    Verification,
    Entities,
    CounterArgs,
    /// Overall credibility assessment; opt-in, not part of [`StageId::CORE`].
    Assessment,
}

impl StageId {
    /// The six stages run when a caller does not ask for a subset.
    pub const CORE: [StageId; 6] = [
        StageId::Claims,
        StageId::Language,
        StageId::RedFlags,
        StageId::Verification,
        StageId::Entities,
        StageId::CounterArgs,
    ];

    /// Lowercase identifier used on the command line and in template names.
    pub fn slug(self) -> &'static str {
        match self {
            StageId::Claims => "claims",
            StageId::Language => "language",
            StageId::RedFlags => "red_flags",
            StageId::Verification => "verification",
            StageId::Entities => "entities",
            StageId::CounterArgs => "counter_arguments",
            StageId::Assessment => "assessment",
        }
    }

    /// Section heading used in rendered reports.
    pub fn title(self) -> &'static str {
        match self {
            StageId::Claims => "Core Claims",
            StageId::Language => "Language & Tone",
            StageId::RedFlags => "Bias & Red Flags",
            StageId::Verification => "Verification Questions",
            StageId::Entities => "Key Entities",
            StageId::CounterArgs => "Counter-Arguments",
            StageId::Assessment => "Overall Assessment",
        }
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

impl FromStr for StageId {
    type Err = String;

    /// Accepts the slug (`red_flags`), the wire name (`REDFLAGS`) and a few
    /// shorthands, case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace(['-', '_'], "");
        match normalized.as_str() {
            "claims" => Ok(StageId::Claims),
            "language" => Ok(StageId::Language),
            "redflags" | "bias" => Ok(StageId::RedFlags),
            "verification" => Ok(StageId::Verification),
            "entities" => Ok(StageId::Entities),
            "counterargs" | "counterarguments" => Ok(StageId::CounterArgs),
            "assessment" => Ok(StageId::Assessment),
            _ => Err(format!("unknown stage `{s}`")),
        }
    }
}

/// Terminal status of a single stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageStatus {
    Ok,
    Failed,
    Skipped,
    TimedOut,
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StageStatus::Ok => "OK",
            StageStatus::Failed => "FAILED",
            StageStatus::Skipped => "SKIPPED",
            StageStatus::TimedOut => "TIMED_OUT",
        };
        f.write_str(s)
    }
}

/// Why a stage did not produce a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Timeout,
    RateLimited,
    InvalidRequest,
    ServerError,
    MalformedOutput,
    DependencySkipped,
    /// The run-level deadline expired before the stage finished.
    DeadlineExceeded,
    /// The document could not be fetched or had no text, so nothing ran.
    DocumentUnavailable,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::RateLimited => "RATE_LIMITED",
            ErrorKind::InvalidRequest => "INVALID_REQUEST",
            ErrorKind::ServerError => "SERVER_ERROR",
            ErrorKind::MalformedOutput => "MALFORMED_OUTPUT",
            ErrorKind::DependencySkipped => "DEPENDENCY_SKIPPED",
            ErrorKind::DeadlineExceeded => "DEADLINE_EXCEEDED",
            ErrorKind::DocumentUnavailable => "DOCUMENT_UNAVAILABLE",
        };
        f.write_str(s)
    }
}

/// The outcome of one stage for one run. Immutable after creation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageResult {
    pub stage_id: StageId,
    pub status: StageStatus,
    pub payload: Option<StagePayload>,
    pub error: Option<ErrorKind>,
    /// Free-form context for the error (backend message, parse failure, ...).
    pub detail: Option<String>,
    /// Number of backend calls made; zero for skipped stages.
    pub attempts: u32,
    pub elapsed_ms: u64,
}

impl StageResult {
    pub fn ok(stage_id: StageId, payload: StagePayload, attempts: u32, elapsed_ms: u64) -> Self {
        Self {
            stage_id,
            status: StageStatus::Ok,
            payload: Some(payload),
            error: None,
            detail: None,
            attempts,
            elapsed_ms,
        }
    }

    pub fn failed(
        stage_id: StageId,
        error: ErrorKind,
        detail: impl Into<String>,
        attempts: u32,
        elapsed_ms: u64,
    ) -> Self {
        Self {
            stage_id,
            status: StageStatus::Failed,
            payload: None,
            error: Some(error),
            detail: Some(detail.into()),
            attempts,
            elapsed_ms,
        }
    }

    pub fn timed_out(
        stage_id: StageId,
        error: ErrorKind,
        detail: impl Into<String>,
        attempts: u32,
        elapsed_ms: u64,
    ) -> Self {
        Self {
            status: StageStatus::TimedOut,
            ..Self::failed(stage_id, error, detail, attempts, elapsed_ms)
        }
    }

    /// A stage that was never dispatched.
    pub fn skipped(stage_id: StageId, error: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            status: StageStatus::Skipped,
            ..Self::failed(stage_id, error, detail, 0, 0)
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == StageStatus::Ok
    }
}

/// Lifecycle of a run: `Pending -> Running -> {Complete, Partial, Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Pending,
    Running,
    Complete,
    Partial,
    Failed,
}

impl RunStatus {
    #[cfg(test)]
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Complete | RunStatus::Partial | RunStatus::Failed)
    }

    /// Derive the terminal status from a set of stage results.
    ///
    /// No results, or no `OK` result, is `Failed`; all `OK` is `Complete`;
    /// anything in between is `Partial`.
    pub fn from_results<'a>(results: impl IntoIterator<Item = &'a StageResult>) -> Self {
        let mut ok = 0usize;
        let mut not_ok = 0usize;
        for result in results {
            if result.is_ok() {
                ok += 1;
            } else {
                not_ok += 1;
            }
        }
        match (ok, not_ok) {
            (0, _) => RunStatus::Failed,
            (_, 0) => RunStatus::Complete,
            _ => RunStatus::Partial,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Pending => "PENDING",
            RunStatus::Running => "RUNNING",
            RunStatus::Complete => "COMPLETE",
            RunStatus::Partial => "PARTIAL",
            RunStatus::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// One end-to-end execution of the pipeline for a single document.
///
/// Owned exclusively by the orchestrator while it runs; nothing in it is
/// shared with other runs.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisRun {
    pub run_id: Uuid,
    pub document: Document,
    /// Stages selected for this run (requested stages plus their dependencies).
    pub stages: Vec<StageId>,
    pub results: BTreeMap<StageId, StageResult>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub overall_status: RunStatus,
    /// Run-level failure, set only when no stage could be dispatched.
    pub error: Option<String>,
}

impl AnalysisRun {
    pub fn new(document: Document, stages: Vec<StageId>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            document,
            stages,
            results: BTreeMap::new(),
            started_at: Utc::now(),
            finished_at: None,
            overall_status: RunStatus::Pending,
            error: None,
        }
    }

    pub fn start(&mut self) {
        debug_assert_eq!(self.overall_status, RunStatus::Pending);
        self.started_at = Utc::now();
        self.overall_status = RunStatus::Running;
    }

    pub fn record(&mut self, result: StageResult) {
        self.results.insert(result.stage_id, result);
    }

    /// Finalize as `Failed` without dispatching any stage.
    pub fn abort(&mut self, error: impl Into<String>) {
        self.error = Some(error.into());
        self.results.clear();
        self.finished_at = Some(Utc::now());
        self.overall_status = RunStatus::Failed;
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
        self.overall_status = RunStatus::from_results(self.results.values());
    }

    pub fn result(&self, stage: StageId) -> Option<&StageResult> {
        self.results.get(&stage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payloads::{LanguageAnalysis, StagePayload};

    fn ok(stage: StageId) -> StageResult {
        StageResult::ok(
            stage,
            StagePayload::Language(LanguageAnalysis {
                overall_tone: "neutral".to_string(),
                ..Default::default()
            }),
            1,
            10,
        )
    }

    #[test]
    fn test_stage_id_parsing() {
        assert_eq!("claims".parse::<StageId>(), Ok(StageId::Claims));
        assert_eq!("REDFLAGS".parse::<StageId>(), Ok(StageId::RedFlags));
        assert_eq!("red_flags".parse::<StageId>(), Ok(StageId::RedFlags));
        assert_eq!("counter-arguments".parse::<StageId>(), Ok(StageId::CounterArgs));
        assert!("vibes".parse::<StageId>().is_err());
    }

    #[test]
    fn test_stage_id_wire_names() {
        let json = serde_json::to_string(&StageId::CounterArgs).unwrap();
        assert_eq!(json, "\"COUNTERARGS\"");
        let json = serde_json::to_string(&StageId::RedFlags).unwrap();
        assert_eq!(json, "\"REDFLAGS\"");
    }

    #[test]
    fn test_core_stages_exclude_assessment() {
        assert_eq!(StageId::CORE.len(), 6);
        assert!(!StageId::CORE.contains(&StageId::Assessment));
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(serde_json::to_string(&StageStatus::TimedOut).unwrap(), "\"TIMED_OUT\"");
        assert_eq!(
            serde_json::to_string(&ErrorKind::MalformedOutput).unwrap(),
            "\"MALFORMED_OUTPUT\""
        );
        assert_eq!(ErrorKind::DependencySkipped.to_string(), "DEPENDENCY_SKIPPED");
    }

    #[test]
    fn test_run_status_rules() {
        let all_ok = vec![ok(StageId::Claims), ok(StageId::Language)];
        assert_eq!(RunStatus::from_results(&all_ok), RunStatus::Complete);

        let mixed = vec![
            ok(StageId::Claims),
            StageResult::failed(StageId::Language, ErrorKind::ServerError, "boom", 3, 5),
        ];
        assert_eq!(RunStatus::from_results(&mixed), RunStatus::Partial);

        let none_ok = vec![
            StageResult::failed(StageId::Claims, ErrorKind::MalformedOutput, "bad", 1, 5),
            StageResult::skipped(StageId::CounterArgs, ErrorKind::DependencySkipped, "claims"),
        ];
        assert_eq!(RunStatus::from_results(&none_ok), RunStatus::Failed);

        let empty: Vec<StageResult> = Vec::new();
        assert_eq!(RunStatus::from_results(&empty), RunStatus::Failed);
    }

    #[test]
    fn test_run_lifecycle() {
        let mut run = AnalysisRun::new(Document::new("https://example.com/a", "text"), vec![StageId::Claims]);
        assert_eq!(run.overall_status, RunStatus::Pending);
        run.start();
        assert_eq!(run.overall_status, RunStatus::Running);
        run.record(ok(StageId::Claims));
        run.finish();
        assert_eq!(run.overall_status, RunStatus::Complete);
        assert!(run.overall_status.is_terminal());
        assert!(run.finished_at.is_some());
    }

    #[test]
    fn test_abort_clears_results() {
        let mut run = AnalysisRun::new(Document::new("https://example.com/a", ""), vec![StageId::Claims]);
        run.start();
        run.abort("document has no text");
        assert_eq!(run.overall_status, RunStatus::Failed);
        assert!(run.results.is_empty());
        assert_eq!(run.error.as_deref(), Some("document has no text"));
    }

    #[test]
    fn test_document_label() {
        let mut doc = Document::new("https://example.com/a", "body");
        assert_eq!(doc.label(), "untitled");
        doc.metadata.domain = "example.com".to_string();
        assert_eq!(doc.label(), "example.com");
        doc.metadata.title = "Headline".to_string();
        assert_eq!(doc.label(), "Headline");
        assert!(doc.has_text());
        assert!(!Document::new("u", "  \n").has_text());
    }
}
