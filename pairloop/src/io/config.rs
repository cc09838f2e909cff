//! Configuration stored under `.pairloop/config.toml`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::machine::CoordinationPolicy;
use crate::io::executor::CliProcessExecutor;

/// Pairloop configuration (TOML).
///
/// This file is intended to be edited by humans. Missing fields fall back to
/// defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct PairloopConfig {
    pub policy: PolicyConfig,
    pub process: ProcessConfig,
    pub prompt: PromptConfig,
}

/// Escalation and budget settings; see [`CoordinationPolicy`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PolicyConfig {
    pub max_consecutive_failures: u32,
    pub max_planning_iterations: u32,
    pub allow_fallback: bool,
    pub max_iterations: u32,
    pub max_session_secs: u64,
    pub iteration_timeout_secs: u64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        let policy = CoordinationPolicy::default();
        Self {
            max_consecutive_failures: policy.max_consecutive_failures,
            max_planning_iterations: policy.max_planning_iterations,
            allow_fallback: policy.allow_fallback,
            max_iterations: policy.max_iterations,
            max_session_secs: policy.max_session_duration.as_secs(),
            iteration_timeout_secs: policy.iteration_timeout.as_secs(),
        }
    }
}

impl PolicyConfig {
    pub fn to_policy(&self) -> CoordinationPolicy {
        CoordinationPolicy {
            max_consecutive_failures: self.max_consecutive_failures,
            max_planning_iterations: self.max_planning_iterations,
            allow_fallback: self.allow_fallback,
            max_iterations: self.max_iterations,
            max_session_duration: Duration::from_secs(self.max_session_secs),
            iteration_timeout: Duration::from_secs(self.iteration_timeout_secs),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProcessConfig {
    /// Assistant command; the prompt is written to its stdin.
    pub command: Vec<String>,
    /// Stop reading process stdout beyond this many bytes per iteration.
    pub output_limit_bytes: usize,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            command: CliProcessExecutor::default_command(),
            output_limit_bytes: 4 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PromptConfig {
    pub budget_bytes: usize,
    /// Prior iterations summarized in each prompt.
    pub history_iterations: usize,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            budget_bytes: 48 * 1024,
            history_iterations: 8,
        }
    }
}

impl PairloopConfig {
    pub fn validate(&self) -> Result<()> {
        let policy = &self.policy;
        if policy.max_consecutive_failures == 0 {
            return Err(anyhow!("policy.max_consecutive_failures must be > 0"));
        }
        if policy.max_planning_iterations == 0 {
            return Err(anyhow!("policy.max_planning_iterations must be > 0"));
        }
        if policy.max_iterations == 0 {
            return Err(anyhow!("policy.max_iterations must be > 0"));
        }
        if policy.max_session_secs == 0 {
            return Err(anyhow!("policy.max_session_secs must be > 0"));
        }
        if policy.iteration_timeout_secs == 0 {
            return Err(anyhow!("policy.iteration_timeout_secs must be > 0"));
        }
        if self.process.command.is_empty() || self.process.command[0].trim().is_empty() {
            return Err(anyhow!("process.command must be a non-empty array"));
        }
        if self.process.output_limit_bytes == 0 {
            return Err(anyhow!("process.output_limit_bytes must be > 0"));
        }
        if self.prompt.budget_bytes == 0 {
            return Err(anyhow!("prompt.budget_bytes must be > 0"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `PairloopConfig::default()`.
pub fn load_config(path: &Path) -> Result<PairloopConfig> {
    if !path.exists() {
        let cfg = PairloopConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: PairloopConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &PairloopConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
