//! In-memory collaborators for unit tests.

use crate::backend::{BackendError, ReasoningBackend};
use crate::fetcher::{DocumentFetcher, FetchError};
use crate::models::{Document, StageId};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use url::Url;

/// What the scripted backend does on one call for a stage.
#[derive(Debug, Clone)]
pub enum Step {
    Reply(String),
    Fail(BackendError),
    /// Never answer.
    Hang,
    /// Answer with a valid payload after a delay.
    Delay(Duration),
}

/// A well-formed response for every stage.
pub fn valid_response(stage: StageId) -> String {
    let json = match stage {
        StageId::Claims => {
            r#"{"analysis_certainty": "High", "core_claims": [{"claim": "Rents rose 12% in 2024", "type": "Statistical", "confidence_level": "High", "evidence_provided": "City housing report", "verifiability": "Easy"}], "claim_summary": "One statistical claim"}"#
        }
        StageId::Language => {
            r#"{"overall_tone": "neutral", "language_intensity": "measured", "hedging_language": ["may"], "absolute_statements": []}"#
        }
        StageId::RedFlags => {
            r#"{"bias_risk_level": "LOW", "red_flags": [], "missing_perspectives": ["tenants"], "overall_balance": "Balanced"}"#
        }
        StageId::Verification => {
            r#"{"verification_questions": [{"question": "What does the housing report say?", "difficulty": "Easy", "suggested_sources": ["city.gov"]}], "quick_checks": ["2024 rent index"]}"#
        }
        StageId::Entities => {
            r#"{"people": [{"name": "Jane Roe", "role": "Housing commissioner", "research_priority": "High"}], "organizations": [{"name": "City Council", "type": "government"}]}"#
        }
        StageId::CounterArgs => {
            r#"{"counter_arguments": [{"original_claim": "Rents rose 12%", "counter_perspective": "Growth is concentrated in new builds", "strength": "Moderate"}], "skeptical_questions": ["Which units were sampled?"]}"#
        }
        StageId::Assessment => {
            r#"{"credibility_score": {"value": 78, "reasoning": "Sourced statistics"}, "credibility_level": "High", "key_strengths": ["Cites data"], "key_concerns": [], "summary": "Mostly reliable"}"#
        }
    };
    format!("```json\n{json}\n```")
}

/// A [`ReasoningBackend`] that plays back scripted steps per stage and
/// answers with [`valid_response`] once a stage's script runs out.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    scripts: Mutex<HashMap<StageId, VecDeque<Step>>>,
    calls: Mutex<HashMap<StageId, usize>>,
    contexts: Mutex<HashMap<StageId, BTreeMap<StageId, Value>>>,
    total: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(self, stage: StageId, step: Step) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .entry(stage)
            .or_default()
            .push_back(step);
        self
    }

    pub fn calls(&self, stage: StageId) -> usize {
        self.calls.lock().unwrap().get(&stage).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    /// Context passed on the most recent call for `stage`.
    pub fn context(&self, stage: StageId) -> Option<BTreeMap<StageId, Value>> {
        self.contexts.lock().unwrap().get(&stage).cloned()
    }
}

impl ReasoningBackend for ScriptedBackend {
    async fn infer(
        &self,
        stage: StageId,
        _text: &str,
        context: &BTreeMap<StageId, Value>,
    ) -> Result<String, BackendError> {
        self.total.fetch_add(1, Ordering::SeqCst);
        *self.calls.lock().unwrap().entry(stage).or_default() += 1;
        self.contexts.lock().unwrap().insert(stage, context.clone());
        let step = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&stage)
            .and_then(|queue| queue.pop_front());

        match step {
            None => Ok(valid_response(stage)),
            Some(Step::Reply(raw)) => Ok(raw),
            Some(Step::Fail(err)) => Err(err),
            Some(Step::Hang) => std::future::pending().await,
            Some(Step::Delay(delay)) => {
                tokio::time::sleep(delay).await;
                Ok(valid_response(stage))
            }
        }
    }
}

/// A [`DocumentFetcher`] returning a fixed outcome and counting calls.
#[derive(Debug)]
pub struct StaticFetcher {
    outcome: Result<String, FetchError>,
    calls: AtomicUsize,
}

impl StaticFetcher {
    pub fn text(text: &str) -> Self {
        Self {
            outcome: Ok(text.to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(err: FetchError) -> Self {
        Self {
            outcome: Err(err),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl DocumentFetcher for StaticFetcher {
    async fn fetch(&self, url: &Url) -> Result<Document, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let text = self.outcome.clone()?;
        let mut document = Document::new(url.as_str(), text);
        document.metadata.title = "Rents Are Rising".to_string();
        document.metadata.domain = url.host_str().unwrap_or_default().to_string();
        Ok(document)
    }
}
