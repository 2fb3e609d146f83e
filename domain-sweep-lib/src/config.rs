//! Configuration file parsing and management.
//!
//! This module handles loading configuration from TOML files, merging
//! configurations with proper precedence rules, and reading `DS_*`
//! environment variables.

use crate::alert::AlertConfig;
use crate::error::SweepError;
use crate::policy::PolicyConfig;
use crate::probe::HttpProbeConfig;
use crate::session::SessionConfig;
use crate::sink::SinkFileNames;
use crate::types::{SweepConfig, UnknownDisposition};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration loaded from TOML files.
///
/// Every table is optional; anything missing keeps its built-in default.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FileConfig {
    /// Engine tuning (rate, concurrency, retries)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engine: Option<EngineConfig>,

    /// Response classification rules
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy: Option<PolicyConfig>,

    /// HTTP probe endpoint and request shape
    #[serde(skip_serializing_if = "Option::is_none")]
    pub probe: Option<HttpProbeConfig>,

    /// Session source
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionConfig>,

    /// Success notifications
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert: Option<AlertConfig>,

    /// Output directory and sink file names
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<OutputConfig>,
}

/// `[engine]` table. Durations are strings such as `"250ms"`, `"5s"`, `"2m"`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requests_per_second: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limiter_tick: Option<String>,

    /// Starting concurrency ceiling
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_concurrency: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_concurrency: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_concurrency: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub window_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adjust_interval: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub high_threshold: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub low_threshold: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub increase_step: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decrease_factor: Option<f64>,

    /// Per-probe timeout
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inter_pass_delay: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset_ceiling_on_retry: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub backoff_base: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backoff_cap: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub permanent_errors_terminal: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unknown_disposition: Option<UnknownDisposition>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress_interval: Option<String>,
}

impl EngineConfig {
    /// Field-wise merge; values from `higher` win.
    fn merge(self, higher: EngineConfig) -> EngineConfig {
        EngineConfig {
            requests_per_second: higher.requests_per_second.or(self.requests_per_second),
            limiter_tick: higher.limiter_tick.or(self.limiter_tick),
            concurrency: higher.concurrency.or(self.concurrency),
            min_concurrency: higher.min_concurrency.or(self.min_concurrency),
            max_concurrency: higher.max_concurrency.or(self.max_concurrency),
            retry_concurrency: higher.retry_concurrency.or(self.retry_concurrency),
            window_size: higher.window_size.or(self.window_size),
            adjust_interval: higher.adjust_interval.or(self.adjust_interval),
            high_threshold: higher.high_threshold.or(self.high_threshold),
            low_threshold: higher.low_threshold.or(self.low_threshold),
            increase_step: higher.increase_step.or(self.increase_step),
            decrease_factor: higher.decrease_factor.or(self.decrease_factor),
            timeout: higher.timeout.or(self.timeout),
            max_retries: higher.max_retries.or(self.max_retries),
            inter_pass_delay: higher.inter_pass_delay.or(self.inter_pass_delay),
            reset_ceiling_on_retry: higher.reset_ceiling_on_retry.or(self.reset_ceiling_on_retry),
            backoff_base: higher.backoff_base.or(self.backoff_base),
            backoff_cap: higher.backoff_cap.or(self.backoff_cap),
            permanent_errors_terminal: higher
                .permanent_errors_terminal
                .or(self.permanent_errors_terminal),
            unknown_disposition: higher.unknown_disposition.or(self.unknown_disposition),
            progress_interval: higher.progress_interval.or(self.progress_interval),
        }
    }

    /// Overlay the values set here onto `config`.
    pub fn apply_to(&self, config: &mut SweepConfig) -> Result<(), SweepError> {
        fn duration(field: &str, value: &Option<String>) -> Result<Option<Duration>, SweepError> {
            match value {
                Some(s) => parse_duration_string(s).map(Some).ok_or_else(|| {
                    SweepError::config(format!(
                        "Invalid {} '{}'. Use a format like '250ms', '5s', '2m'",
                        field, s
                    ))
                }),
                None => Ok(None),
            }
        }

        if let Some(rps) = self.requests_per_second {
            config.requests_per_second = rps;
        }
        if let Some(tick) = duration("limiter_tick", &self.limiter_tick)? {
            config.limiter_tick = tick;
        }
        if let Some(n) = self.concurrency {
            config.initial_concurrency = n;
        }
        if let Some(n) = self.min_concurrency {
            config.min_concurrency = n;
        }
        if let Some(n) = self.max_concurrency {
            config.max_concurrency = n;
        }
        if self.retry_concurrency.is_some() {
            config.retry_concurrency = self.retry_concurrency;
        }
        if let Some(n) = self.window_size {
            config.window_size = n;
        }
        if let Some(interval) = duration("adjust_interval", &self.adjust_interval)? {
            config.adjust_interval = interval;
        }
        if let Some(t) = self.high_threshold {
            config.high_threshold = t;
        }
        if let Some(t) = self.low_threshold {
            config.low_threshold = t;
        }
        if let Some(step) = self.increase_step {
            config.increase_step = step;
        }
        if let Some(factor) = self.decrease_factor {
            config.decrease_factor = factor;
        }
        if let Some(timeout) = duration("timeout", &self.timeout)? {
            config.probe_timeout = timeout;
        }
        if let Some(n) = self.max_retries {
            config.max_retries = n;
        }
        if let Some(delay) = duration("inter_pass_delay", &self.inter_pass_delay)? {
            config.inter_pass_delay = delay;
        }
        if let Some(reset) = self.reset_ceiling_on_retry {
            config.reset_ceiling_on_retry = reset;
        }
        if let Some(base) = duration("backoff_base", &self.backoff_base)? {
            config.backoff_base = base;
        }
        if let Some(cap) = duration("backoff_cap", &self.backoff_cap)? {
            config.backoff_cap = cap;
        }
        if let Some(terminal) = self.permanent_errors_terminal {
            config.permanent_errors_terminal = terminal;
        }
        if let Some(disposition) = self.unknown_disposition {
            config.unknown_disposition = disposition;
        }
        if let Some(interval) = duration("progress_interval", &self.progress_interval)? {
            config.progress_interval = interval;
        }
        Ok(())
    }
}

/// `[output]` table.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OutputConfig {
    /// Directory the sink files are created in
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub success: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unknown: Option<String>,
}

impl OutputConfig {
    /// Sink file names with defaults filled in.
    pub fn file_names(&self) -> SinkFileNames {
        let defaults = SinkFileNames::default();
        SinkFileNames {
            success: self.success.clone().unwrap_or(defaults.success),
            blocked: self.blocked.clone().unwrap_or(defaults.blocked),
            failed: self.failed.clone().unwrap_or(defaults.failed),
            unknown: self.unknown.clone().unwrap_or(defaults.unknown),
        }
    }
}

impl FileConfig {
    /// Engine configuration: built-in defaults overlaid with `[engine]`.
    pub fn sweep_config(&self) -> Result<SweepConfig, SweepError> {
        let mut config = SweepConfig::default();
        if let Some(engine) = &self.engine {
            engine.apply_to(&mut config)?;
        }
        Ok(config)
    }
}

/// Configuration discovery and loading functionality.
pub struct ConfigManager {
    /// Whether to report which config files were picked up
    pub verbose: bool,
}

impl ConfigManager {
    /// Create a new configuration manager.
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }

    /// Load configuration from a specific file.
    pub fn load_file<P: AsRef<Path>>(&self, path: P) -> Result<FileConfig, SweepError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(SweepError::file_error(
                path.to_string_lossy(),
                "Configuration file not found",
            ));
        }

        let content = fs::read_to_string(path).map_err(|e| {
            SweepError::file_error(
                path.to_string_lossy(),
                format!("Failed to read configuration file: {}", e),
            )
        })?;

        let config: FileConfig = toml::from_str(&content).map_err(|e| SweepError::ConfigError {
            message: format!("Failed to parse TOML configuration: {}", e),
        })?;

        self.validate_config(&config)?;

        Ok(config)
    }

    /// Discover and load configuration files in precedence order.
    ///
    /// XDG config is lowest, then the home directory file, then the file in
    /// the current directory.
    pub fn discover_and_load(&self) -> Result<FileConfig, SweepError> {
        let mut merged_config = FileConfig::default();
        let mut loaded_files = Vec::new();

        let candidates = [
            self.get_xdg_config_path(),
            self.get_global_config_path(),
            self.get_local_config_path(),
        ];
        for path in candidates.into_iter().flatten() {
            match self.load_file(&path) {
                Ok(config) => {
                    merged_config = self.merge_configs(merged_config, config);
                    loaded_files.push(path);
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "ignoring config file");
                }
            }
        }

        if self.verbose {
            for path in &loaded_files {
                tracing::info!(path = %path.display(), "loaded config file");
            }
        }

        Ok(merged_config)
    }

    /// Local configuration file in the current directory.
    fn get_local_config_path(&self) -> Option<PathBuf> {
        let candidates = ["./domain-sweep.toml", "./.domain-sweep.toml"];

        for candidate in &candidates {
            let path = Path::new(candidate);
            if path.exists() {
                return Some(path.to_path_buf());
            }
        }

        None
    }

    /// Global configuration file in the user's home directory.
    fn get_global_config_path(&self) -> Option<PathBuf> {
        if let Some(home) = env::var_os("HOME") {
            let candidates = [".domain-sweep.toml", "domain-sweep.toml"];

            for candidate in &candidates {
                let path = Path::new(&home).join(candidate);
                if path.exists() {
                    return Some(path);
                }
            }
        }

        None
    }

    /// XDG configuration file.
    fn get_xdg_config_path(&self) -> Option<PathBuf> {
        let config_dir = env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| env::var_os("HOME").map(|home| Path::new(&home).join(".config")))?;

        let path = config_dir.join("domain-sweep").join("config.toml");
        if path.exists() {
            Some(path)
        } else {
            None
        }
    }

    /// Merge two configurations with proper precedence.
    ///
    /// `[engine]` and `[output]` merge field by field; the other tables are
    /// taken whole from the higher file when present there.
    fn merge_configs(&self, lower: FileConfig, higher: FileConfig) -> FileConfig {
        FileConfig {
            engine: match (lower.engine, higher.engine) {
                (Some(lower_engine), Some(higher_engine)) => {
                    Some(lower_engine.merge(higher_engine))
                }
                (None, Some(higher_engine)) => Some(higher_engine),
                (Some(lower_engine), None) => Some(lower_engine),
                (None, None) => None,
            },
            policy: higher.policy.or(lower.policy),
            probe: higher.probe.or(lower.probe),
            session: higher.session.or(lower.session),
            alert: higher.alert.or(lower.alert),
            output: match (lower.output, higher.output) {
                (Some(lower_output), Some(higher_output)) => Some(OutputConfig {
                    dir: higher_output.dir.or(lower_output.dir),
                    success: higher_output.success.or(lower_output.success),
                    blocked: higher_output.blocked.or(lower_output.blocked),
                    failed: higher_output.failed.or(lower_output.failed),
                    unknown: higher_output.unknown.or(lower_output.unknown),
                }),
                (None, Some(higher_output)) => Some(higher_output),
                (Some(lower_output), None) => Some(lower_output),
                (None, None) => None,
            },
        }
    }

    /// Validate a configuration for common issues.
    fn validate_config(&self, config: &FileConfig) -> Result<(), SweepError> {
        if let Some(engine) = &config.engine {
            if let Some(rps) = engine.requests_per_second {
                if !(rps.is_finite() && rps > 0.0) {
                    return Err(SweepError::config(
                        "requests_per_second must be a positive number",
                    ));
                }
            }

            for concurrency in [
                engine.concurrency,
                engine.min_concurrency,
                engine.max_concurrency,
            ]
            .into_iter()
            .flatten()
            {
                if concurrency == 0 {
                    return Err(SweepError::config("Concurrency values must be at least 1"));
                }
            }

            // Duration formats are checked here so a typo fails at load time.
            engine.apply_to(&mut SweepConfig::default())?;
        }

        if let Some(policy) = &config.policy {
            if policy.rules.iter().any(|rule| rule.marker.is_empty()) {
                return Err(SweepError::config("Policy markers cannot be empty"));
            }
        }

        if let Some(session) = &config.session {
            if let Some(interval) = &session.refresh_interval {
                if parse_duration_string(interval).is_none() {
                    return Err(SweepError::config(format!(
                        "Invalid session refresh_interval '{}'",
                        interval
                    )));
                }
            }
        }

        Ok(())
    }
}

/// Environment variable configuration that mirrors CLI options.
///
/// This represents configuration values that can be set via DS_* environment variables.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnvConfig {
    pub requests_per_second: Option<f64>,
    pub concurrency: Option<usize>,
    pub max_concurrency: Option<usize>,
    pub timeout: Option<Duration>,
    pub max_retries: Option<u32>,
    pub output_dir: Option<String>,
    pub config: Option<String>,
}

impl EnvConfig {
    /// Overlay the values set here onto `config`.
    pub fn apply_to(&self, config: &mut SweepConfig) {
        if let Some(rps) = self.requests_per_second {
            config.requests_per_second = rps;
        }
        if let Some(n) = self.concurrency {
            config.initial_concurrency = n;
        }
        if let Some(n) = self.max_concurrency {
            config.max_concurrency = n;
        }
        if let Some(timeout) = self.timeout {
            config.probe_timeout = timeout;
        }
        if let Some(n) = self.max_retries {
            config.max_retries = n;
        }
    }
}

/// Load configuration from the process environment.
///
/// Invalid values are logged as warnings and ignored.
pub fn load_env_config() -> EnvConfig {
    load_env_config_from(|key| env::var(key).ok())
}

/// Load DS_* configuration through an arbitrary lookup function.
pub fn load_env_config_from<F>(lookup: F) -> EnvConfig
where
    F: Fn(&str) -> Option<String>,
{
    let mut env_config = EnvConfig::default();

    // DS_RPS - admission rate
    if let Some(val) = lookup("DS_RPS") {
        match val.trim().parse::<f64>() {
            Ok(rps) if rps.is_finite() && rps > 0.0 => {
                env_config.requests_per_second = Some(rps);
                tracing::debug!(rps, "using DS_RPS");
            }
            _ => tracing::warn!(value = %val, "invalid DS_RPS, must be a positive number"),
        }
    }

    // DS_CONCURRENCY - starting ceiling
    if let Some(val) = lookup("DS_CONCURRENCY") {
        match val.trim().parse::<usize>() {
            Ok(n) if n > 0 => {
                env_config.concurrency = Some(n);
                tracing::debug!(concurrency = n, "using DS_CONCURRENCY");
            }
            _ => tracing::warn!(value = %val, "invalid DS_CONCURRENCY, must be at least 1"),
        }
    }

    // DS_MAX_CONCURRENCY - ceiling upper bound
    if let Some(val) = lookup("DS_MAX_CONCURRENCY") {
        match val.trim().parse::<usize>() {
            Ok(n) if n > 0 => {
                env_config.max_concurrency = Some(n);
                tracing::debug!(max_concurrency = n, "using DS_MAX_CONCURRENCY");
            }
            _ => tracing::warn!(value = %val, "invalid DS_MAX_CONCURRENCY, must be at least 1"),
        }
    }

    // DS_TIMEOUT - per-probe timeout
    if let Some(val) = lookup("DS_TIMEOUT") {
        match parse_duration_string(&val) {
            Some(timeout) if !timeout.is_zero() => {
                env_config.timeout = Some(timeout);
                tracing::debug!(?timeout, "using DS_TIMEOUT");
            }
            _ => tracing::warn!(
                value = %val,
                "invalid DS_TIMEOUT, use a format like '250ms', '5s', '2m'"
            ),
        }
    }

    // DS_MAX_RETRIES - retry passes
    if let Some(val) = lookup("DS_MAX_RETRIES") {
        match val.trim().parse::<u32>() {
            Ok(n) => {
                env_config.max_retries = Some(n);
                tracing::debug!(max_retries = n, "using DS_MAX_RETRIES");
            }
            Err(_) => tracing::warn!(value = %val, "invalid DS_MAX_RETRIES"),
        }
    }

    // DS_OUTPUT_DIR - sink directory
    if let Some(dir) = lookup("DS_OUTPUT_DIR") {
        if !dir.trim().is_empty() {
            tracing::debug!(dir = %dir, "using DS_OUTPUT_DIR");
            env_config.output_dir = Some(dir);
        }
    }

    // DS_CONFIG - explicit config file
    if let Some(path) = lookup("DS_CONFIG") {
        if !path.trim().is_empty() {
            tracing::debug!(path = %path, "using DS_CONFIG");
            env_config.config = Some(path);
        }
    }

    env_config
}

/// Parse a duration string like "250ms", "5s", "2m"; a bare number is seconds.
pub fn parse_duration_string(duration_str: &str) -> Option<Duration> {
    let duration_str = duration_str.trim().to_lowercase();

    if let Some(ms) = duration_str.strip_suffix("ms") {
        ms.trim().parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(s) = duration_str.strip_suffix('s') {
        s.trim().parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(m) = duration_str.strip_suffix('m') {
        m.trim()
            .parse::<u64>()
            .ok()
            .map(|m| Duration::from_secs(m * 60))
    } else {
        duration_str.parse::<u64>().ok().map(Duration::from_secs)
    }
}
