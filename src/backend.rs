//! Reasoning backend abstraction and the OpenAI-compatible implementation.
//!
//! The pipeline only ever talks to a [`ReasoningBackend`]: given the article
//! text, the stage being run and the payloads of the stage's dependencies,
//! return the model's raw answer. Retries, timeouts and output validation are
//! the stage executor's business; the backend makes exactly one call per
//! `infer`.
//!
//! # Architecture
//!
//! - [`ReasoningBackend`]: Core trait defining one async inference call
//! - [`AwfulJadeBackend`]: Wraps `awful_aj::api::ask` with one chat template per stage
//! - [`RateLimiter`]: Paces outbound calls; owned by the backend, never by a run

use crate::models::{ErrorKind, StageId};
use crate::rate_limiter::RateLimiter;
use crate::stages::PipelineConfig;
use awful_aj::api::ask;
use awful_aj::{config, config::AwfulJadeConfig, template, template::ChatTemplate};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::error::Error;
use std::fmt::Write;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

/// Failure of a single backend call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("backend timed out: {0}")]
    Timeout(String),
    #[error("backend rate limited the request: {0}")]
    RateLimited(String),
    #[error("backend rejected the request: {0}")]
    InvalidRequest(String),
    #[error("backend server error: {0}")]
    ServerError(String),
}

impl BackendError {
    /// Transient failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, BackendError::InvalidRequest(_))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            BackendError::Timeout(_) => ErrorKind::Timeout,
            BackendError::RateLimited(_) => ErrorKind::RateLimited,
            BackendError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            BackendError::ServerError(_) => ErrorKind::ServerError,
        }
    }

    /// Map a client error message onto the backend error taxonomy.
    ///
    /// The LLM client only surfaces boxed errors, so the HTTP status and
    /// transport failures are recognized from their text. A status code only
    /// counts when it leads the message, follows the word `status` or opens
    /// reqwest's `error (NNN ...)` group; digits in URLs, ports or request
    /// ids are ignored.
    pub fn classify(message: &str) -> Self {
        let owned = message.to_string();
        if let Some(code) = status_code(message) {
            return match code {
                429 => BackendError::RateLimited(owned),
                408 | 504 => BackendError::Timeout(owned),
                400..=499 => BackendError::InvalidRequest(owned),
                _ => BackendError::ServerError(owned),
            };
        }

        if RATE_LIMITED.is_match(message) {
            BackendError::RateLimited(owned)
        } else if TIMED_OUT.is_match(message) {
            BackendError::Timeout(owned)
        } else if TRANSIENT.is_match(message) {
            BackendError::ServerError(owned)
        } else if REJECTED.is_match(message) {
            BackendError::InvalidRequest(owned)
        } else {
            BackendError::ServerError(owned)
        }
    }
}

static STATUS_CODE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:^\s*(?:http/\d(?:\.\d)?\s+)?|\bstatus(?:\s+code)?\s*[:=]?\s*|\berror\s*\()([1-5]\d{2})\b")
        .expect("valid regex")
});
static RATE_LIMITED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)rate.?limit|too many requests|\bquota\b").expect("valid regex"));
static TIMED_OUT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)timed out|\btimeout\b|deadline has elapsed").expect("valid regex"));
static TRANSIENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)error sending request|connection (?:refused|reset|closed|aborted)|broken pipe|bad gateway|service unavailable|internal server error|overloaded",
    )
    .expect("valid regex")
});
static REJECTED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)bad request|unauthorized|forbidden|not found|\binvalid\b").expect("valid regex")
});

fn status_code(message: &str) -> Option<u16> {
    STATUS_CODE
        .captures(message)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Trait for async reasoning backends.
///
/// Implementors send one request for one stage and hand back the raw model
/// output; they must not retry internally.
pub trait ReasoningBackend {
    /// Run `stage` over `text`, with `context` holding the payloads of the
    /// stage's dependencies (an empty object for a missing optional input).
    async fn infer(
        &self,
        stage: StageId,
        text: &str,
        context: &BTreeMap<StageId, Value>,
    ) -> Result<String, BackendError>;
}

/// Build the user message for a stage: the article followed by the
/// dependency payloads as labelled JSON blocks.
pub fn compose_input(text: &str, context: &BTreeMap<StageId, Value>) -> String {
    let mut input = String::with_capacity(text.len() + 256);
    input.push_str(text);
    if context.is_empty() {
        return input;
    }
    input.push_str("\n\n### Results from earlier analysis stages\n");
    for (stage, payload) in context {
        let json = serde_json::to_string_pretty(payload).unwrap_or_else(|_| "{}".to_string());
        let _ = write!(input, "\n#### {}\n```json\n{}\n```\n", stage.title(), json);
    }
    input
}

/// [`ReasoningBackend`] over an OpenAI-compatible API via `awful_aj`.
///
/// Holds the client configuration and one [`ChatTemplate`] per stage, all
/// loaded once at startup and never mutated afterwards.
pub struct AwfulJadeBackend {
    /// LLM configuration (API keys, endpoints, model settings).
    config: AwfulJadeConfig,
    templates: HashMap<StageId, ChatTemplate>,
    limiter: RateLimiter,
}

impl std::fmt::Debug for AwfulJadeBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwfulJadeBackend")
            .field("stages", &self.templates.keys().collect::<Vec<_>>())
            .field("limiter", &self.limiter)
            .finish()
    }
}

impl AwfulJadeBackend {
    /// Load the client config and the template of every configured stage.
    ///
    /// Template names come from [`PipelineConfig::template_name`], e.g.
    /// `skeptic_claims`.
    #[instrument(level = "info", skip_all, fields(%config_path))]
    pub async fn load(
        config_path: &str,
        pipeline: &PipelineConfig,
        limiter: RateLimiter,
    ) -> Result<Self, Box<dyn Error>> {
        let config = config::load_config(config_path)?;
        info!(config_path, "Loaded LLM configuration");

        let mut templates = HashMap::new();
        for spec in &pipeline.stages {
            let name = pipeline.template_name(spec.id);
            let template = template::load_template(&name).await?;
            info!(stage = %spec.id, template = %name, "Loaded template");
            templates.insert(spec.id, template);
        }

        Ok(Self {
            config,
            templates,
            limiter,
        })
    }
}

impl ReasoningBackend for AwfulJadeBackend {
    #[instrument(level = "info", skip_all, fields(%stage))]
    async fn infer(
        &self,
        stage: StageId,
        text: &str,
        context: &BTreeMap<StageId, Value>,
    ) -> Result<String, BackendError> {
        let template = self
            .templates
            .get(&stage)
            .ok_or_else(|| BackendError::InvalidRequest(format!("no template loaded for {stage}")))?;

        self.limiter.wait_if_needed().await;

        let input = compose_input(text, context);
        debug!(bytes = input.len(), context_stages = context.len(), "Sending stage request");

        let t0 = Instant::now();
        let res = ask(&self.config, input, template, None, None).await;
        let dt = t0.elapsed();

        match res {
            Ok(response) => {
                debug!(elapsed_ms = dt.as_millis() as u64, bytes = response.len(), "API call succeeded");
                Ok(response)
            }
            Err(e) => {
                let err = BackendError::classify(&e.to_string());
                warn!(elapsed_ms = dt.as_millis() as u64, error = %e, kind = %err.kind(), "API call failed");
                Err(err)
            }
        }
    }
}
