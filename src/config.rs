//! Configuration for the job engine, vault, router and classifier.
//!
//! Every knob lives in [`EngineConfig`], built via [`EngineConfigBuilder`] or
//! overlaid from `DOCMARK_*` environment variables with
//! [`EngineConfig::from_env`]. Sub-structs group the settings each component
//! reads so they can be handed out independently.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::warn;

/// Top-level configuration.
///
/// # Example
/// ```rust
/// use docmark::EngineConfig;
///
/// let config = EngineConfig::builder()
///     .workers(4)
///     .max_attempts(5)
///     .vault_path("/tmp/profiles.enc")
///     .build()
///     .unwrap();
/// assert_eq!(config.workers, 4);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Jobs that may run a phase at the same time. Default: 2.
    ///
    /// Jobs sleeping in `Retrying` do not count against this limit.
    pub workers: usize,

    /// Attempt budget and backoff shape per job phase.
    pub retry: RetryPolicy,

    /// Per-HTTP-request timeout in seconds. Default: 120.
    pub request_timeout_secs: u64,

    pub vault: VaultConfig,

    pub probe: ProbeConfig,

    pub structuring: StructuringOptions,

    /// Extracted text beyond this many characters is cut off before
    /// structuring. Default: 2 000 000.
    pub max_source_chars: usize,

    /// Progress events buffered per subscriber before the oldest are dropped.
    /// Default: 256.
    pub event_buffer: usize,

    /// Profile used for structuring. `None` picks the first enabled profile.
    pub active_profile: Option<String>,

    /// Directory for exported Markdown. `None` writes next to the source.
    pub output_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            retry: RetryPolicy::default(),
            request_timeout_secs: 120,
            vault: VaultConfig::default(),
            probe: ProbeConfig::default(),
            structuring: StructuringOptions::default(),
            max_source_chars: 2_000_000,
            event_buffer: 256,
            active_profile: None,
            output_dir: None,
        }
    }
}

/// Retry budget for one job phase.
///
/// Delay before attempt `n + 1` (after `n` failures) is
/// `min(max_delay_ms, base_delay_ms · 2^(n-1) + jitter)`, with jitter drawn
/// from `[0, jitter_ratio · base_delay_ms · 2^(n-1))`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts per phase, first one included. Default: 3.
    pub max_attempts: u32,
    /// Default: 500.
    pub base_delay_ms: u64,
    /// Default: 30 000.
    pub max_delay_ms: u64,
    /// 0.0 disables jitter; capped at 0.5. Default: 0.25.
    pub jitter_ratio: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            jitter_ratio: 0.25,
        }
    }
}

/// Where the vault lives and how hard its key is to derive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultConfig {
    /// Default: `<config dir>/docmark/profiles.enc`.
    pub path: PathBuf,
    /// Seconds without vault access before the session re-locks. Default: 900.
    pub idle_timeout_secs: u64,
    pub kdf: KdfParams,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            path: default_vault_path(),
            idle_timeout_secs: 900,
            kdf: KdfParams::default(),
        }
    }
}

/// Argon2id work factor used for new envelopes.
///
/// Envelopes record the parameters they were sealed with, so changing these
/// never locks out an existing vault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB. Default: 19 456 (19 MiB).
    pub memory_kib: u32,
    /// Passes over memory. Default: 2.
    pub iterations: u32,
    /// Lanes. Default: 1.
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: 19_456,
            iterations: 2,
            parallelism: 1,
        }
    }
}

/// Dual-layer PDF probe settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Pages inspected from the start of the document. Default: 3.
    pub max_pages: usize,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self { max_pages: 3 }
    }
}

/// Model-call settings shared by every backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuringOptions {
    /// Custom system prompt. `None` uses [`crate::prompts::DEFAULT_SYSTEM_PROMPT`].
    pub system_prompt: Option<String>,
    /// Default: 0.1.
    pub temperature: f32,
    /// Default: 4096.
    pub max_tokens: u32,
    /// `anthropic-version` header value. Default: "2023-06-01".
    pub anthropic_version: String,
}

impl Default for StructuringOptions {
    fn default() -> Self {
        Self {
            system_prompt: None,
            temperature: 0.1,
            max_tokens: 4096,
            anthropic_version: "2023-06-01".to_string(),
        }
    }
}

fn default_vault_path() -> PathBuf {
    let mut root = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    root.push("docmark");
    root.push("profiles.enc");
    root
}

impl EngineConfig {
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder {
            config: Self::default(),
        }
    }

    /// Defaults overlaid with any `DOCMARK_*` variables that parse.
    ///
    /// | Variable | Field |
    /// |---|---|
    /// | `DOCMARK_WORKERS` | `workers` |
    /// | `DOCMARK_RETRY_MAX_ATTEMPTS` | `retry.max_attempts` |
    /// | `DOCMARK_RETRY_BASE_MS` | `retry.base_delay_ms` |
    /// | `DOCMARK_RETRY_MAX_MS` | `retry.max_delay_ms` |
    /// | `DOCMARK_REQUEST_TIMEOUT_SECS` | `request_timeout_secs` |
    /// | `DOCMARK_VAULT_PATH` | `vault.path` |
    /// | `DOCMARK_VAULT_IDLE_SECS` | `vault.idle_timeout_secs` |
    /// | `DOCMARK_KDF_MEMORY_KIB` | `vault.kdf.memory_kib` |
    /// | `DOCMARK_MAX_SOURCE_CHARS` | `max_source_chars` |
    /// | `DOCMARK_PROFILE` | `active_profile` |
    /// | `DOCMARK_OUTPUT_DIR` | `output_dir` |
    /// | `DOCMARK_ANTHROPIC_VERSION` | `structuring.anthropic_version` |
    /// | `DOCMARK_MAX_TOKENS` | `structuring.max_tokens` |
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut b = Self::builder();
        if let Some(v) = env_parse::<usize>("DOCMARK_WORKERS") {
            b = b.workers(v);
        }
        if let Some(v) = env_parse::<u32>("DOCMARK_RETRY_MAX_ATTEMPTS") {
            b = b.max_attempts(v);
        }
        if let Some(v) = env_parse::<u64>("DOCMARK_RETRY_BASE_MS") {
            b = b.base_delay_ms(v);
        }
        if let Some(v) = env_parse::<u64>("DOCMARK_RETRY_MAX_MS") {
            b = b.max_delay_ms(v);
        }
        if let Some(v) = env_parse::<u64>("DOCMARK_REQUEST_TIMEOUT_SECS") {
            b = b.request_timeout_secs(v);
        }
        if let Some(v) = env_string("DOCMARK_VAULT_PATH") {
            b = b.vault_path(v);
        }
        if let Some(v) = env_parse::<u64>("DOCMARK_VAULT_IDLE_SECS") {
            b = b.idle_timeout_secs(v);
        }
        if let Some(v) = env_parse::<u32>("DOCMARK_KDF_MEMORY_KIB") {
            let kdf = KdfParams {
                memory_kib: v,
                ..b.config.vault.kdf
            };
            b = b.kdf(kdf);
        }
        if let Some(v) = env_parse::<usize>("DOCMARK_MAX_SOURCE_CHARS") {
            b = b.max_source_chars(v);
        }
        if let Some(v) = env_string("DOCMARK_PROFILE") {
            b = b.active_profile(v);
        }
        if let Some(v) = env_string("DOCMARK_OUTPUT_DIR") {
            b = b.output_dir(v);
        }
        if let Some(v) = env_string("DOCMARK_ANTHROPIC_VERSION") {
            b.config.structuring.anthropic_version = v;
        }
        if let Some(v) = env_parse::<u32>("DOCMARK_MAX_TOKENS") {
            b = b.max_tokens(v);
        }
        b.build()
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = env_string(key)?;
    match raw.parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("Ignoring {}: '{}' is not a valid value", key, raw);
            None
        }
    }
}

/// Builder for [`EngineConfig`].
#[derive(Debug)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    pub fn workers(mut self, n: usize) -> Self {
        self.config.workers = n.max(1);
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.config.retry = policy;
        self
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.config.retry.max_attempts = n.max(1);
        self
    }

    pub fn base_delay_ms(mut self, ms: u64) -> Self {
        self.config.retry.base_delay_ms = ms;
        self
    }

    pub fn max_delay_ms(mut self, ms: u64) -> Self {
        self.config.retry.max_delay_ms = ms;
        self
    }

    pub fn jitter_ratio(mut self, ratio: f64) -> Self {
        self.config.retry.jitter_ratio = ratio.clamp(0.0, 0.5);
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.request_timeout_secs = secs.max(1);
        self
    }

    pub fn vault_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.vault.path = path.into();
        self
    }

    pub fn idle_timeout_secs(mut self, secs: u64) -> Self {
        self.config.vault.idle_timeout_secs = secs;
        self
    }

    pub fn kdf(mut self, params: KdfParams) -> Self {
        self.config.vault.kdf = params;
        self
    }

    pub fn probe_pages(mut self, pages: usize) -> Self {
        self.config.probe.max_pages = pages.max(1);
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.structuring.system_prompt = Some(prompt.into());
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.structuring.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: u32) -> Self {
        self.config.structuring.max_tokens = n;
        self
    }

    pub fn max_source_chars(mut self, n: usize) -> Self {
        self.config.max_source_chars = n;
        self
    }

    pub fn event_buffer(mut self, n: usize) -> Self {
        self.config.event_buffer = n.max(1);
        self
    }

    pub fn active_profile(mut self, name: impl Into<String>) -> Self {
        self.config.active_profile = Some(name.into());
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = Some(dir.into());
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<EngineConfig, ConfigError> {
        let c = &self.config;
        if c.workers == 0 {
            return Err(ConfigError::Invalid("workers must be ≥ 1".into()));
        }
        if c.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("max_attempts must be ≥ 1".into()));
        }
        if c.retry.max_delay_ms < c.retry.base_delay_ms {
            return Err(ConfigError::Invalid(format!(
                "max_delay_ms ({}) must be ≥ base_delay_ms ({})",
                c.retry.max_delay_ms, c.retry.base_delay_ms
            )));
        }
        if !(0.0..=0.5).contains(&c.retry.jitter_ratio) {
            return Err(ConfigError::Invalid(format!(
                "jitter_ratio must be within 0.0–0.5, got {}",
                c.retry.jitter_ratio
            )));
        }
        if c.structuring.max_tokens == 0 {
            return Err(ConfigError::Invalid("max_tokens must be ≥ 1".into()));
        }
        crate::vault::kdf::validate_params(&c.vault.kdf)
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = EngineConfig::builder().build().unwrap();
        assert_eq!(config.workers, 2);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.vault.idle_timeout_secs, 900);
        assert!(config.vault.path.ends_with("docmark/profiles.enc"));
    }

    #[test]
    fn builder_clamps_out_of_range_values() {
        let config = EngineConfig::builder()
            .workers(0)
            .max_attempts(0)
            .jitter_ratio(3.0)
            .build()
            .unwrap();
        assert_eq!(config.workers, 1);
        assert_eq!(config.retry.max_attempts, 1);
        assert_eq!(config.retry.jitter_ratio, 0.5);
    }

    #[test]
    fn rejects_cap_below_base() {
        let err = EngineConfig::builder()
            .base_delay_ms(1_000)
            .max_delay_ms(10)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("max_delay_ms"));
    }

    #[test]
    fn rejects_zero_max_tokens() {
        let err = EngineConfig::builder().max_tokens(0).build().unwrap_err();
        assert!(err.to_string().contains("max_tokens"));
    }

    #[test]
    fn rejects_weak_kdf() {
        let err = EngineConfig::builder()
            .kdf(KdfParams {
                memory_kib: 1,
                iterations: 1,
                parallelism: 1,
            })
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }
}
