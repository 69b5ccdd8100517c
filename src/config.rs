//! Layered configuration: built-in defaults, optional TOML file, environment
//! variables, then explicit CLI flags, in increasing priority. Validated
//! eagerly at startup so configuration errors fail fast (`Error::Config`).

use std::path::Path;

use serde::Deserialize;

use crate::error::{Error, Result};

/// `database: {type, path, walMode, autoMigrate}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
    #[serde(default = "default_true")]
    pub wal_mode: bool,
    #[serde(default = "default_true")]
    pub auto_migrate: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            wal_mode: true,
            auto_migrate: true,
        }
    }
}

fn default_db_path() -> String {
    "classify.db".to_string()
}

fn default_true() -> bool {
    true
}

/// `models: {router, specialist, orientation, review}`.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelsConfig {
    #[serde(default = "default_model")]
    pub router: String,
    #[serde(default = "default_model")]
    pub specialist: String,
    #[serde(default = "default_model")]
    pub orientation: String,
    #[serde(default = "default_model")]
    pub review: String,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            router: default_model(),
            specialist: default_model(),
            orientation: default_model(),
            review: default_model(),
        }
    }
}

fn default_model() -> String {
    "claude-3-5-sonnet-20241022".to_string()
}

/// `batch: {routerBatchSize, specialistBatchSize, orientationBatchSize, reviewBatchSize}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchConfig {
    #[serde(default = "default_batch_size")]
    pub router_batch_size: usize,
    #[serde(default = "default_batch_size")]
    pub specialist_batch_size: usize,
    #[serde(default = "default_batch_size")]
    pub orientation_batch_size: usize,
    #[serde(default = "default_batch_size")]
    pub review_batch_size: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            router_batch_size: default_batch_size(),
            specialist_batch_size: default_batch_size(),
            orientation_batch_size: default_batch_size(),
            review_batch_size: default_batch_size(),
        }
    }
}

fn default_batch_size() -> usize {
    20
}

/// `concurrency: {router, specialist, orientation, review}`.
#[derive(Debug, Clone, Deserialize)]
pub struct ConcurrencyConfig {
    #[serde(default = "default_concurrency")]
    pub router: usize,
    #[serde(default = "default_concurrency")]
    pub specialist: usize,
    #[serde(default = "default_concurrency")]
    pub orientation: usize,
    #[serde(default = "default_concurrency")]
    pub review: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            router: default_concurrency(),
            specialist: default_concurrency(),
            orientation: default_concurrency(),
            review: default_concurrency(),
        }
    }
}

fn default_concurrency() -> usize {
    2
}

/// `thresholds: {confidenceFamilyMin, confidenceClsMin, confidenceOrientMin, confidenceReviewMin}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdsConfig {
    #[serde(default = "default_family_threshold")]
    pub confidence_family_min: f64,
    #[serde(default = "default_cls_threshold")]
    pub confidence_cls_min: f64,
    #[serde(default = "default_orient_threshold")]
    pub confidence_orient_min: f64,
    /// Below this, a `ReviewDecision` escalates regardless of its returned
    /// action (`spec.md` §4.6).
    #[serde(default = "default_review_threshold")]
    pub confidence_review_min: f64,
}

impl Default for ThresholdsConfig {
    fn default() -> Self {
        Self {
            confidence_family_min: default_family_threshold(),
            confidence_cls_min: default_cls_threshold(),
            confidence_orient_min: default_orient_threshold(),
            confidence_review_min: default_review_threshold(),
        }
    }
}

fn default_family_threshold() -> f64 {
    0.6
}

fn default_cls_threshold() -> f64 {
    0.6
}

fn default_orient_threshold() -> f64 {
    0.6
}

fn default_review_threshold() -> f64 {
    0.6
}

/// `retry: {maxRetries, retryDelayMs}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            backoff_factor: default_backoff_factor(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_backoff_factor() -> f64 {
    2.0
}

impl RetryConfig {
    /// Delay before the given 0-indexed retry attempt, per the exponential
    /// backoff rule stated in `spec.md` §4.2 ("doubling").
    pub fn delay_for_attempt(&self, attempt: u32) -> std::time::Duration {
        let millis = self.retry_delay_ms as f64 * self.backoff_factor.powi(attempt as i32);
        std::time::Duration::from_millis(millis.round() as u64)
    }
}

/// `reviewMode: auto-fix | flag-only`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReviewMode {
    AutoFix,
    FlagOnly,
}

impl Default for ReviewMode {
    fn default() -> Self {
        ReviewMode::AutoFix
    }
}

/// The fully-resolved configuration for a pipeline run.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub models: ModelsConfig,
    pub batch: BatchConfig,
    pub concurrency: ConcurrencyConfig,
    pub thresholds: ThresholdsConfig,
    pub retry: RetryConfig,
    pub dry_run: bool,
    pub review_mode: ReviewMode,

    /// Not part of the TOML file; populated from environment/CLI.
    #[serde(skip)]
    pub anthropic_api_key: Option<String>,
    #[serde(skip)]
    pub openai_api_key: Option<String>,
    #[serde(skip)]
    pub gemini_api_key: Option<String>,
    #[serde(skip)]
    pub review_provider: Option<String>,
    #[serde(skip)]
    pub review_model: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            models: ModelsConfig::default(),
            batch: BatchConfig::default(),
            concurrency: ConcurrencyConfig::default(),
            thresholds: ThresholdsConfig::default(),
            retry: RetryConfig::default(),
            dry_run: false,
            review_mode: ReviewMode::default(),
            anthropic_api_key: None,
            openai_api_key: None,
            gemini_api_key: None,
            review_provider: None,
            review_model: None,
        }
    }
}

impl Config {
    /// Load defaults, overlay an optional TOML file, then overlay
    /// environment variables (`spec.md` §6's recognized list), and validate.
    pub fn load(file_path: Option<&Path>) -> Result<Self> {
        let config = Self::load_unvalidated(file_path)?;
        config.validate()?;
        Ok(config)
    }

    /// Like [`load`](Self::load), but skips the final validation pass.
    /// Callers that still need to apply CLI overrides (`--dry-run`,
    /// `--db`) before the key/threshold checks run should use this and
    /// call [`validate`](Self::validate) themselves afterward.
    pub fn load_unvalidated(file_path: Option<&Path>) -> Result<Self> {
        let mut config = match file_path {
            Some(path) if path.exists() => {
                let text = std::fs::read_to_string(path).map_err(|e| {
                    Error::Config(format!("failed to read config file {}: {e}", path.display()))
                })?;
                toml::from_str(&text)
                    .map_err(|e| Error::Config(format!("invalid config file: {e}")))?
            }
            _ => Config::default(),
        };

        config.overlay_env();
        Ok(config)
    }

    fn overlay_env(&mut self) {
        if let Ok(v) = std::env::var("ANTHROPIC_API_KEY") {
            self.anthropic_api_key = Some(v);
        }
        if let Ok(v) = std::env::var("OPENAI_API_KEY") {
            self.openai_api_key = Some(v);
        }
        if let Ok(v) = std::env::var("GEMINI_API_KEY") {
            self.gemini_api_key = Some(v);
        }
        if let Ok(v) = std::env::var("CLASSIFY_DB") {
            self.database.path = v;
        }
        if let Ok(v) = std::env::var("REVIEW_PROVIDER") {
            self.review_provider = Some(v);
        }
        if let Ok(v) = std::env::var("REVIEW_MODEL") {
            self.review_model = Some(v);
        }
    }

    /// Fail-fast validation. Must be called before any stage runs.
    pub fn validate(&self) -> Result<()> {
        if !self.dry_run {
            let key_count = [
                &self.anthropic_api_key,
                &self.openai_api_key,
                &self.gemini_api_key,
            ]
            .iter()
            .filter(|k| k.is_some())
            .count();

            if key_count == 0 {
                return Err(Error::Config(
                    "no provider API key present; set ANTHROPIC_API_KEY, OPENAI_API_KEY, or GEMINI_API_KEY, or pass --dry-run".into(),
                ));
            }
        }

        for (name, size) in [
            ("batch.routerBatchSize", self.batch.router_batch_size),
            ("batch.specialistBatchSize", self.batch.specialist_batch_size),
            ("batch.orientationBatchSize", self.batch.orientation_batch_size),
            ("batch.reviewBatchSize", self.batch.review_batch_size),
        ] {
            if size == 0 {
                return Err(Error::Config(format!("{name} must be non-zero")));
            }
        }

        for (name, n) in [
            ("concurrency.router", self.concurrency.router),
            ("concurrency.specialist", self.concurrency.specialist),
            ("concurrency.orientation", self.concurrency.orientation),
            ("concurrency.review", self.concurrency.review),
        ] {
            if n == 0 {
                return Err(Error::Config(format!("{name} must be non-zero")));
            }
        }

        for (name, t) in [
            ("thresholds.confidenceFamilyMin", self.thresholds.confidence_family_min),
            ("thresholds.confidenceClsMin", self.thresholds.confidence_cls_min),
            ("thresholds.confidenceOrientMin", self.thresholds.confidence_orient_min),
            ("thresholds.confidenceReviewMin", self.thresholds.confidence_review_min),
        ] {
            if !(0.0..=1.0).contains(&t) {
                return Err(Error::Config(format!("{name} must be in [0, 1], got {t}")));
            }
        }

        if self.retry.max_retries == 0 {
            return Err(Error::Config("retry.maxRetries must be non-zero".into()));
        }

        Ok(())
    }
}
