//! Wave-based pipeline orchestration.
//!
//! The orchestrator turns a [`Document`] into an [`AnalysisRun`]:
//!
//! 1. **Planning**: resolve the requested stages plus their dependencies and
//!    partition them into waves ([`PipelineOrchestrator::plan`])
//! 2. **Dispatch**: run every stage of a wave concurrently on the current task
//! 3. **Barrier**: wait for the slowest stage of the wave, record all results
//! 4. **Propagation**: a stage whose dependency did not finish `OK` is marked
//!    `SKIPPED` without being executed, unless it declares a fallback
//!
//! A single stage failure never aborts the run. The only run-fatal condition is
//! a document without text. The run-level deadline is checked against every
//! wave; when it expires the in-flight stage futures are dropped and every
//! stage that has not reached a terminal status is recorded as `TIMED_OUT`.

use crate::backend::ReasoningBackend;
use crate::executor::{StageExecutor, StageInput};
use crate::models::{AnalysisRun, Document, ErrorKind, StageId, StageResult};
use crate::stages::{ConfigError, PipelineConfig, StageSpec};
use futures::stream::{FuturesUnordered, StreamExt};
use itertools::Itertools;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, instrument, warn};

/// The stages selected for one run, already split into dispatch waves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPlan {
    pub selected: BTreeSet<StageId>,
    pub waves: Vec<Vec<StageId>>,
    pub deadline: Duration,
}

impl RunPlan {
    pub fn stages(&self) -> Vec<StageId> {
        self.selected.iter().copied().collect()
    }
}

/// Sequences stage executors for one document at a time.
///
/// The configuration is shared read-only; each call to [`run`](Self::run)
/// owns its [`AnalysisRun`] outright, so concurrent runs never share mutable
/// state.
pub struct PipelineOrchestrator<B> {
    config: Arc<PipelineConfig>,
    backend: B,
}

impl<B> std::fmt::Debug for PipelineOrchestrator<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineOrchestrator")
            .field("stages", &self.config.stages.len())
            .finish()
    }
}

impl<B> PipelineOrchestrator<B>
where
    B: ReasoningBackend,
{
    pub fn new(config: Arc<PipelineConfig>, backend: B) -> Self {
        Self { config, backend }
    }

    #[cfg(test)]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Resolve `requested` into waves. Dependencies of requested stages are
    /// included implicitly.
    pub fn plan(&self, requested: &[StageId], deadline: Duration) -> Result<RunPlan, ConfigError> {
        let selected = self.config.closure(requested)?;
        let waves = self.config.waves(&selected)?;
        debug!(?waves, "Planned run");
        Ok(RunPlan {
            selected,
            waves,
            deadline,
        })
    }

    /// A run that failed before any stage could be dispatched.
    pub fn failed_run(&self, document: Document, plan: &RunPlan, error: impl Into<String>) -> AnalysisRun {
        let mut run = AnalysisRun::new(document, plan.stages());
        run.start();
        run.abort(error);
        run
    }

    #[instrument(level = "info", skip_all, fields(url = %document.source_url))]
    pub async fn run(&self, document: Document, plan: &RunPlan) -> AnalysisRun {
        let mut run = AnalysisRun::new(document, plan.stages());
        run.start();
        info!(run_id = %run.run_id, stages = plan.selected.len(), waves = plan.waves.len(), "Run started");

        if !run.document.has_text() {
            warn!(run_id = %run.run_id, "Document has no text; nothing to analyze");
            run.abort("document has no text");
            return run;
        }

        let text = run.document.raw_text.clone();
        let deadline = Instant::now() + plan.deadline;

        for (index, wave) in plan.waves.iter().enumerate() {
            if Instant::now() >= deadline {
                expire(&mut run, &plan.waves[index..], Duration::ZERO);
                break;
            }

            let mut dispatch: Vec<(&StageSpec, StageInput<'_>)> = Vec::new();
            for &stage in wave {
                let Some(spec) = self.config.spec(stage) else { continue };
                match self.resolve_input(&run, spec, &text) {
                    Some(input) => dispatch.push((spec, input)),
                    None => {
                        let missing = spec
                            .depends_on
                            .iter()
                            .filter(|d| !run.result(**d).is_some_and(StageResult::is_ok))
                            .join(", ");
                        info!(%stage, %missing, "Skipping stage; dependencies did not succeed");
                        run.record(StageResult::skipped(
                            stage,
                            ErrorKind::DependencySkipped,
                            format!("dependencies did not succeed: {missing}"),
                        ));
                    }
                }
            }

            info!(wave = index, dispatched = dispatch.len(), "Dispatching wave");
            let wave_t0 = Instant::now();
            let mut pending: FuturesUnordered<_> = dispatch
                .iter()
                .map(|(spec, input)| async move {
                    StageExecutor::new(spec, &self.config.retry, &self.backend)
                        .execute(input)
                        .await
                })
                .collect();

            let mut completed = Vec::with_capacity(dispatch.len());
            let finished_in_time = timeout_at(deadline, async {
                while let Some(result) = pending.next().await {
                    completed.push(result);
                }
            })
            .await
            .is_ok();
            // In-flight backend calls are abandoned here.
            drop(pending);

            for result in completed {
                run.record(result);
            }

            if !finished_in_time {
                let elapsed = wave_t0.elapsed();
                let abandoned: Vec<StageId> = dispatch
                    .iter()
                    .map(|(spec, _)| spec.id)
                    .filter(|id| run.result(*id).is_none())
                    .collect();
                warn!(wave = index, abandoned = ?abandoned, "Run deadline expired");
                for stage in abandoned {
                    run.record(deadline_result(stage, elapsed));
                }
                expire(&mut run, &plan.waves[index + 1..], Duration::ZERO);
                break;
            }
        }

        run.finish();
        info!(
            run_id = %run.run_id,
            status = %run.overall_status,
            ok = run.results.values().filter(|r| r.is_ok()).count(),
            total = run.results.len(),
            "Run finished"
        );
        run
    }

    /// Build the input for `spec`, or `None` when it must be skipped.
    ///
    /// Missing inputs of a fallback stage become empty objects.
    fn resolve_input<'t>(&self, run: &AnalysisRun, spec: &StageSpec, text: &'t str) -> Option<StageInput<'t>> {
        let mut input = StageInput::new(text);
        for dep in &spec.depends_on {
            match run.result(*dep).and_then(|r| r.payload.as_ref()) {
                Some(payload) => input = input.with(*dep, payload.to_value()),
                None if spec.fallback => input = input.with(*dep, Value::Object(Map::new())),
                None => return None,
            }
        }
        Some(input)
    }
}

fn deadline_result(stage: StageId, elapsed: Duration) -> StageResult {
    StageResult::timed_out(
        stage,
        ErrorKind::DeadlineExceeded,
        "run deadline expired before the stage finished",
        0,
        elapsed.as_millis() as u64,
    )
}

/// Mark every stage in `waves` as timed out by the run deadline.
fn expire(run: &mut AnalysisRun, waves: &[Vec<StageId>], elapsed: Duration) {
    for stage in waves.iter().flatten() {
        run.record(deadline_result(*stage, elapsed));
    }
}
