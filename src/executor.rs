//! Single-stage execution with per-attempt timeouts and exponential backoff.
//!
//! A [`StageExecutor`] turns one backend call into a [`StageResult`] and never
//! returns an error: every failure mode is encoded in the result's status.
//!
//! # Retry Strategy
//!
//! - Each attempt is bounded by the stage timeout
//! - `TIMEOUT`, `RATE_LIMITED` and `SERVER_ERROR` are retried up to `max_retries` times
//! - `INVALID_REQUEST` and malformed output fail immediately
//! - Delay before retry `k`: `min(base * multiplier^(k-1), stage timeout)` plus optional jitter
//!
//! Exhausting the retries on a timeout yields `TIMED_OUT`; exhausting them on
//! any other error yields `FAILED`.

use crate::backend::{BackendError, ReasoningBackend};
use crate::models::{ErrorKind, StageId, StageResult};
use crate::payloads::StagePayload;
use crate::stages::{RetryPolicy, StageSpec};
use crate::utils::truncate_for_log;
use rand::{rng, Rng};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};
use tracing::{error, info, instrument, warn};

/// Everything a stage sees: the document text and the payloads of its
/// declared dependencies.
#[derive(Debug, Clone)]
pub struct StageInput<'a> {
    pub text: &'a str,
    pub context: BTreeMap<StageId, Value>,
}

impl<'a> StageInput<'a> {
    pub fn new(text: &'a str) -> Self {
        Self {
            text,
            context: BTreeMap::new(),
        }
    }

    pub fn with(mut self, stage: StageId, payload: Value) -> Self {
        self.context.insert(stage, payload);
        self
    }
}

/// Runs one stage against a [`ReasoningBackend`].
pub struct StageExecutor<'a, B> {
    spec: &'a StageSpec,
    retry: &'a RetryPolicy,
    backend: &'a B,
}

impl<'a, B> std::fmt::Debug for StageExecutor<'a, B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageExecutor")
            .field("stage", &self.spec.id)
            .field("max_retries", &self.spec.max_retries)
            .field("timeout_ms", &self.spec.timeout_ms)
            .finish()
    }
}

impl<'a, B> StageExecutor<'a, B>
where
    B: ReasoningBackend,
{
    pub fn new(spec: &'a StageSpec, retry: &'a RetryPolicy, backend: &'a B) -> Self {
        Self { spec, retry, backend }
    }

    #[instrument(level = "info", skip_all, fields(stage = %self.spec.id))]
    pub async fn execute(&self, input: &StageInput<'_>) -> StageResult {
        let stage = self.spec.id;
        let stage_timeout = self.spec.timeout();
        let t0 = Instant::now();
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            let attempt_t0 = Instant::now();
            let outcome = match timeout(
                stage_timeout,
                self.backend.infer(stage, input.text, &input.context),
            )
            .await
            {
                Ok(res) => res,
                Err(_) => Err(BackendError::Timeout(format!(
                    "no response within {}ms",
                    stage_timeout.as_millis()
                ))),
            };
            let elapsed_ms = t0.elapsed().as_millis() as u64;

            let err = match outcome {
                Ok(raw) => {
                    return match StagePayload::parse(stage, &raw) {
                        Ok(payload) => {
                            info!(attempts, elapsed_ms, "Stage succeeded");
                            StageResult::ok(stage, payload, attempts, elapsed_ms)
                        }
                        Err(detail) => {
                            warn!(
                                attempts,
                                error = %detail,
                                response_preview = %truncate_for_log(&raw, 300),
                                "Model returned non-conforming output"
                            );
                            StageResult::failed(stage, ErrorKind::MalformedOutput, detail, attempts, elapsed_ms)
                        }
                    };
                }
                Err(err) => err,
            };

            let retries_used = attempts - 1;
            if !err.is_retryable() || retries_used >= self.spec.max_retries {
                error!(
                    attempts,
                    max_retries = self.spec.max_retries,
                    elapsed_ms,
                    error = %err,
                    "Stage gave up"
                );
                return match err {
                    BackendError::Timeout(_) => {
                        StageResult::timed_out(stage, ErrorKind::Timeout, err.to_string(), attempts, elapsed_ms)
                    }
                    other => StageResult::failed(stage, other.kind(), other.to_string(), attempts, elapsed_ms),
                };
            }

            let delay = self.backoff(attempts, stage_timeout);
            warn!(
                attempt = attempts,
                max_retries = self.spec.max_retries,
                elapsed_ms_attempt = attempt_t0.elapsed().as_millis() as u64,
                elapsed_ms_total = elapsed_ms,
                ?delay,
                error = %err,
                "Stage attempt failed; backing off"
            );
            sleep(delay).await;
        }
    }

    fn backoff(&self, retry: u32, cap: Duration) -> Duration {
        let delay = self.retry.delay_for(retry, cap);
        if self.retry.jitter_ms == 0 {
            return delay;
        }
        let jitter_ms: u64 = rng().random_range(0..=self.retry.jitter_ms);
        delay + Duration::from_millis(jitter_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StageStatus;
    use crate::testing::{valid_response, ScriptedBackend, Step};

    fn spec(stage: StageId, max_retries: u32) -> StageSpec {
        StageSpec::new(stage).max_retries(max_retries).timeout_ms(10_000)
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_on_first_attempt() {
        let backend = ScriptedBackend::new();
        let spec = spec(StageId::Claims, 2);
        let retry = RetryPolicy::default();
        let result = StageExecutor::new(&spec, &retry, &backend)
            .execute(&StageInput::new("text"))
            .await;

        assert_eq!(result.status, StageStatus::Ok);
        assert_eq!(result.attempts, 1);
        assert!(result.payload.is_some());
        assert_eq!(backend.calls(StageId::Claims), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_timeouts_then_success() {
        let backend = ScriptedBackend::new()
            .then(StageId::Claims, Step::Fail(BackendError::Timeout("slow".into())))
            .then(StageId::Claims, Step::Fail(BackendError::Timeout("slow".into())));
        let spec = spec(StageId::Claims, 2);
        let retry = RetryPolicy::default();

        let t0 = Instant::now();
        let result = StageExecutor::new(&spec, &retry, &backend)
            .execute(&StageInput::new("text"))
            .await;

        assert_eq!(result.status, StageStatus::Ok);
        assert_eq!(result.attempts, 3);
        // 500ms + 1000ms of backoff
        let elapsed = t0.elapsed();
        assert!(elapsed >= Duration::from_millis(1500) && elapsed < Duration::from_millis(1600));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_backend_hits_stage_timeout() {
        let backend = ScriptedBackend::new()
            .then(StageId::Language, Step::Hang)
            .then(StageId::Language, Step::Hang);
        let spec = StageSpec::new(StageId::Language).max_retries(1).timeout_ms(2_000);
        let retry = RetryPolicy::default();

        let result = StageExecutor::new(&spec, &retry, &backend)
            .execute(&StageInput::new("text"))
            .await;

        assert_eq!(result.status, StageStatus::TimedOut);
        assert_eq!(result.error, Some(ErrorKind::Timeout));
        assert_eq!(result.attempts, 2);
        assert_eq!(backend.calls(StageId::Language), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_server_errors_fail() {
        let backend = ScriptedBackend::new()
            .then(StageId::RedFlags, Step::Fail(BackendError::ServerError("500".into())))
            .then(StageId::RedFlags, Step::Fail(BackendError::RateLimited("429".into())));
        let spec = spec(StageId::RedFlags, 1);
        let retry = RetryPolicy::default();

        let result = StageExecutor::new(&spec, &retry, &backend)
            .execute(&StageInput::new("text"))
            .await;

        assert_eq!(result.status, StageStatus::Failed);
        assert_eq!(result.error, Some(ErrorKind::RateLimited));
        assert_eq!(result.attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_request_is_not_retried() {
        let backend = ScriptedBackend::new()
            .then(StageId::Entities, Step::Fail(BackendError::InvalidRequest("400".into())));
        let spec = spec(StageId::Entities, 3);
        let retry = RetryPolicy::default();

        let result = StageExecutor::new(&spec, &retry, &backend)
            .execute(&StageInput::new("text"))
            .await;

        assert_eq!(result.status, StageStatus::Failed);
        assert_eq!(result.error, Some(ErrorKind::InvalidRequest));
        assert_eq!(result.attempts, 1);
        assert_eq!(backend.calls(StageId::Entities), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_output_is_not_retried() {
        let backend = ScriptedBackend::new().then(
            StageId::Claims,
            Step::Reply(r#"{"core_claims": [{"text": "no confidence"}]}"#.into()),
        );
        let spec = spec(StageId::Claims, 3);
        let retry = RetryPolicy::default();

        let result = StageExecutor::new(&spec, &retry, &backend)
            .execute(&StageInput::new("text"))
            .await;

        assert_eq!(result.status, StageStatus::Failed);
        assert_eq!(result.error, Some(ErrorKind::MalformedOutput));
        assert!(result.payload.is_none());
        assert_eq!(result.attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_is_capped_at_stage_timeout() {
        let backend = ScriptedBackend::new()
            .then(StageId::Claims, Step::Fail(BackendError::ServerError("a".into())))
            .then(StageId::Claims, Step::Fail(BackendError::ServerError("b".into())))
            .then(StageId::Claims, Step::Reply(valid_response(StageId::Claims)));
        let spec = StageSpec::new(StageId::Claims).max_retries(2).timeout_ms(700);
        let retry = RetryPolicy::default();

        let t0 = Instant::now();
        let result = StageExecutor::new(&spec, &retry, &backend)
            .execute(&StageInput::new("text"))
            .await;

        assert_eq!(result.status, StageStatus::Ok);
        // 500ms, then min(1000ms, 700ms)
        let elapsed = t0.elapsed();
        assert!(elapsed >= Duration::from_millis(1200) && elapsed < Duration::from_millis(1300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_context_is_forwarded_to_backend() {
        let backend = ScriptedBackend::new();
        let spec = spec(StageId::CounterArgs, 0);
        let retry = RetryPolicy::default();
        let input = StageInput::new("text").with(StageId::Claims, serde_json::json!({"core_claims": []}));

        StageExecutor::new(&spec, &retry, &backend).execute(&input).await;

        let seen = backend.context(StageId::CounterArgs).unwrap();
        assert_eq!(seen.keys().copied().collect::<Vec<_>>(), vec![StageId::Claims]);
    }
}
