//! Report assembly.
//!
//! A [`Report`] is the caller-facing view of an [`AnalysisRun`]: one section
//! per planned stage, in canonical stage order, each either `available` with
//! its payload or `unavailable` with the reason. Sections are never omitted,
//! so "no red flags found" and "red flag analysis failed" stay
//! distinguishable.

use crate::models::{AnalysisRun, ErrorKind, RunStatus, StageId, StageResult, StageStatus};
use crate::payloads::StagePayload;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    pub run_id: Uuid,
    pub source_url: String,
    pub title: String,
    pub author: String,
    pub publish_date: String,
    pub domain: String,
    /// Characters of article text the stages were given.
    pub content_length: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub overall_status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub sections: Vec<Section>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "availability", rename_all = "lowercase")]
pub enum Section {
    Available {
        stage: StageId,
        title: String,
        payload: StagePayload,
        attempts: u32,
        elapsed_ms: u64,
    },
    Unavailable {
        stage: StageId,
        title: String,
        /// `None` when the stage never got a result (document unavailable).
        status: Option<StageStatus>,
        reason: ErrorKind,
        detail: Option<String>,
        attempts: u32,
        elapsed_ms: u64,
    },
}

impl Section {
    #[cfg(test)]
    pub fn stage(&self) -> StageId {
        match self {
            Section::Available { stage, .. } | Section::Unavailable { stage, .. } => *stage,
        }
    }

    pub fn title(&self) -> &str {
        match self {
            Section::Available { title, .. } | Section::Unavailable { title, .. } => title,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Section::Available { .. })
    }

    fn from_result(result: &StageResult) -> Self {
        let stage = result.stage_id;
        match (&result.status, &result.payload) {
            (StageStatus::Ok, Some(payload)) => Section::Available {
                stage,
                title: stage.title().to_string(),
                payload: payload.clone(),
                attempts: result.attempts,
                elapsed_ms: result.elapsed_ms,
            },
            (status, _) => Section::Unavailable {
                stage,
                title: stage.title().to_string(),
                status: Some(*status),
                // An OK result always carries a payload; this arm only guards the type.
                reason: result.error.unwrap_or(ErrorKind::MalformedOutput),
                detail: result.detail.clone(),
                attempts: result.attempts,
                elapsed_ms: result.elapsed_ms,
            },
        }
    }

    fn missing(stage: StageId, detail: Option<String>) -> Self {
        Section::Unavailable {
            stage,
            title: stage.title().to_string(),
            status: None,
            reason: ErrorKind::DocumentUnavailable,
            detail,
            attempts: 0,
            elapsed_ms: 0,
        }
    }
}

impl Report {
    #[cfg(test)]
    pub fn section(&self, stage: StageId) -> Option<&Section> {
        self.sections.iter().find(|s| s.stage() == stage)
    }

    pub fn available_count(&self) -> usize {
        self.sections.iter().filter(|s| s.is_available()).count()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Turns a finished run into a [`Report`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ReportAssembler;

impl ReportAssembler {
    /// Pure and deterministic: nothing but `run` feeds the report.
    pub fn assemble(run: &AnalysisRun) -> Report {
        let mut stages = run.stages.clone();
        stages.sort();
        stages.dedup();

        let sections = stages
            .into_iter()
            .map(|stage| match run.result(stage) {
                Some(result) => Section::from_result(result),
                None => Section::missing(stage, run.error.clone()),
            })
            .collect();

        let meta = &run.document.metadata;
        Report {
            run_id: run.run_id,
            source_url: run.document.source_url.clone(),
            title: run.document.label().to_string(),
            author: meta.author.clone(),
            publish_date: meta.publish_date.clone(),
            domain: meta.domain.clone(),
            content_length: run.document.raw_text.chars().count(),
            started_at: run.started_at,
            finished_at: run.finished_at,
            overall_status: run.overall_status,
            error: run.error.clone(),
            sections,
        }
    }
}
