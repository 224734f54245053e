//! Static stage configuration and the stage dependency graph.
//!
//! A [`PipelineConfig`] is built once at process start, either from the
//! built-in defaults or from a YAML file, validated, and then shared
//! read-only by every run. It answers two questions for the orchestrator:
//! which stages a request actually needs ([`PipelineConfig::closure`]) and in
//! which waves they can be dispatched ([`PipelineConfig::waves`]).
//!
//! # YAML Format
//!
//! ```yaml
//! template_prefix: skeptic_
//! retry:
//!   base_delay_ms: 500
//!   multiplier: 2
//! stages:
//!   - id: CLAIMS
//!     timeout_ms: 60000
//!     max_retries: 2
//!   - id: COUNTERARGS
//!     depends_on: [CLAIMS, LANGUAGE]
//!     timeout_ms: 60000
//!     max_retries: 2
//! ```

use crate::models::StageId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, instrument};

const DEFAULT_STAGE_TIMEOUT_MS: u64 = 60_000;
const DEFAULT_MAX_RETRIES: u32 = 2;

/// Errors raised while loading or validating pipeline configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read pipeline config {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse pipeline config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("stage {0} is configured more than once")]
    DuplicateStage(StageId),
    #[error("stage {stage} depends on {dependency}, which is not configured")]
    UnknownDependency { stage: StageId, dependency: StageId },
    #[error("stage {0} is not configured")]
    UnknownStage(StageId),
    #[error("dependency cycle between stages {0:?}")]
    Cycle(Vec<StageId>),
    #[error("invalid retry policy: {0}")]
    InvalidRetry(String),
}

/// Static configuration for one stage.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct StageSpec {
    pub id: StageId,
    #[serde(default)]
    pub depends_on: BTreeSet<StageId>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Run even when a dependency did not finish `OK`, with an empty
    /// payload standing in for the missing input.
    #[serde(default)]
    pub fallback: bool,
}

fn default_timeout_ms() -> u64 {
    DEFAULT_STAGE_TIMEOUT_MS
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

impl StageSpec {
    pub fn new(id: StageId) -> Self {
        Self {
            id,
            depends_on: BTreeSet::new(),
            timeout_ms: DEFAULT_STAGE_TIMEOUT_MS,
            max_retries: DEFAULT_MAX_RETRIES,
            fallback: false,
        }
    }

    pub fn depends_on(mut self, deps: impl IntoIterator<Item = StageId>) -> Self {
        self.depends_on.extend(deps);
        self
    }

    pub fn with_fallback(mut self) -> Self {
        self.fallback = true;
        self
    }

    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Backoff parameters shared by every stage executor.
///
/// The delay before retry `k` (1-based) is
/// `min(base_delay * multiplier^(k-1), stage timeout) + jitter`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RetryPolicy {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: u32,
    /// Upper bound of the random jitter added to each delay; 0 disables it.
    #[serde(default)]
    pub jitter_ms: u64,
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_multiplier() -> u32 {
    2
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            multiplier: default_multiplier(),
            jitter_ms: 0,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based), capped at `cap`, without jitter.
    pub fn delay_for(&self, retry: u32, cap: Duration) -> Duration {
        let factor = (self.multiplier as u64).saturating_pow(retry.saturating_sub(1));
        let delay = Duration::from_millis(self.base_delay_ms.saturating_mul(factor));
        delay.min(cap)
    }
}

/// Process-wide, read-only pipeline configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PipelineConfig {
    pub stages: Vec<StageSpec>,
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Prepended to each stage slug to name its prompt template.
    #[serde(default = "default_template_prefix")]
    pub template_prefix: String,
}

fn default_template_prefix() -> String {
    "skeptic_".to_string()
}

impl Default for PipelineConfig {
    /// The built-in seven stage graph.
    ///
    /// Verification and the assessment can work from whatever their
    /// dependencies produced; counter-arguments need the claims and the tone.
    fn default() -> Self {
        use StageId::*;
        Self {
            stages: vec![
                StageSpec::new(Claims),
                StageSpec::new(Language),
                StageSpec::new(RedFlags),
                StageSpec::new(Entities),
                StageSpec::new(Verification).depends_on([Claims]).with_fallback(),
                StageSpec::new(CounterArgs).depends_on([Claims, Language]),
                StageSpec::new(Assessment)
                    .depends_on([Claims, Language, RedFlags, Entities])
                    .with_fallback()
                    .timeout_ms(90_000),
            ],
            retry: RetryPolicy::default(),
            template_prefix: default_template_prefix(),
        }
    }
}

impl PipelineConfig {
    /// Load and validate a YAML pipeline configuration.
    #[instrument(level = "info", skip_all, fields(path = %path.display()))]
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let yaml = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_yaml(&yaml)?;
        info!(stages = config.stages.len(), "Loaded pipeline configuration");
        Ok(config)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: PipelineConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject duplicate stages, dangling dependencies, cycles and a
    /// degenerate retry policy.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = BTreeSet::new();
        for spec in &self.stages {
            if !seen.insert(spec.id) {
                return Err(ConfigError::DuplicateStage(spec.id));
            }
        }
        for spec in &self.stages {
            if let Some(dep) = spec.depends_on.iter().find(|d| !seen.contains(*d)) {
                return Err(ConfigError::UnknownDependency {
                    stage: spec.id,
                    dependency: *dep,
                });
            }
        }
        if self.retry.multiplier == 0 {
            return Err(ConfigError::InvalidRetry("multiplier must be at least 1".into()));
        }
        self.waves(&seen)?;
        Ok(())
    }

    pub fn spec(&self, id: StageId) -> Option<&StageSpec> {
        self.stages.iter().find(|s| s.id == id)
    }

    /// Template name for a stage, e.g. `skeptic_claims`.
    pub fn template_name(&self, id: StageId) -> String {
        format!("{}{}", self.template_prefix, id.slug())
    }

    /// The requested stages plus everything they transitively depend on.
    pub fn closure(&self, requested: &[StageId]) -> Result<BTreeSet<StageId>, ConfigError> {
        let mut selected = BTreeSet::new();
        let mut stack: Vec<StageId> = requested.to_vec();
        while let Some(id) = stack.pop() {
            let spec = self.spec(id).ok_or(ConfigError::UnknownStage(id))?;
            if selected.insert(id) {
                stack.extend(spec.depends_on.iter().copied());
            }
        }
        debug!(?requested, ?selected, "Resolved stage closure");
        Ok(selected)
    }

    /// Partition `selected` into dispatch waves.
    ///
    /// Every stage in wave `n` depends only on stages in earlier waves, and
    /// each stage sits in the earliest wave that allows, so the number of
    /// waves equals the longest dependency chain. Dependencies outside
    /// `selected` are ignored.
    pub fn waves(&self, selected: &BTreeSet<StageId>) -> Result<Vec<Vec<StageId>>, ConfigError> {
        let mut placed: BTreeSet<StageId> = BTreeSet::new();
        let mut remaining: Vec<StageId> = selected.iter().copied().collect();
        let mut waves = Vec::new();

        while !remaining.is_empty() {
            let (ready, blocked): (Vec<StageId>, Vec<StageId>) =
                remaining.into_iter().partition(|id| {
                    self.spec(*id).is_some_and(|spec| {
                        spec.depends_on
                            .iter()
                            .filter(|d| selected.contains(*d))
                            .all(|d| placed.contains(d))
                    })
                });
            if ready.is_empty() {
                if let Some(missing) = blocked.iter().find(|id| self.spec(**id).is_none()) {
                    return Err(ConfigError::UnknownStage(*missing));
                }
                return Err(ConfigError::Cycle(blocked));
            }
            placed.extend(ready.iter().copied());
            waves.push(ready);
            remaining = blocked;
        }
        Ok(waves)
    }
}
