//! Runtime configuration.
//!
//! ## Precedence (highest to lowest)
//!
//! 1. Command-line flags (applied by `main.rs`)
//! 2. TOML config file passed with `--config`
//! 3. Environment variables (`RACER_*`)
//! 4. Built-in defaults
//!
//! `RacerConfig::default()` reads the environment, and every struct here is
//! `#[serde(default)]`, so a config file only needs the keys it changes.

use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use coordination::{CommitIdentity, GateSpec};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::strategy::Strategy;

/// Default generator base URL (any OpenAI-compatible completions server).
const DEFAULT_GENERATOR_URL: &str = "http://localhost:8080/v1";
const DEFAULT_GENERATOR_MODEL: &str = "Qwen2.5-Coder-32B-Instruct";
const DEFAULT_HOSTING_API: &str = "https://api.github.com";
const DEFAULT_RACE_TIMEOUT_SECS: u64 = 900;
const DEFAULT_CANCEL_GRACE_SECS: u64 = 10;
const DEFAULT_GATE_TIMEOUT_SECS: u64 = 300;
const DEFAULT_CLONE_TIMEOUT_SECS: u64 = 600;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 180;
/// Upper bound for every timeout knob (one week).
const MAX_TIMEOUT_SECS: u64 = 7 * 24 * 60 * 60;

const ENV_GENERATOR_URL: &str = "RACER_GENERATOR_URL";
const ENV_GENERATOR_API_KEY: &str = "RACER_GENERATOR_API_KEY";
const ENV_GENERATOR_MODEL: &str = "RACER_GENERATOR_MODEL";
const ENV_REQUEST_TIMEOUT: &str = "RACER_REQUEST_TIMEOUT_SECS";
const ENV_WORKSPACE_DIR: &str = "RACER_WORKSPACE_DIR";
const ENV_RACE_TIMEOUT: &str = "RACER_RACE_TIMEOUT_SECS";
const ENV_CANCEL_GRACE: &str = "RACER_CANCEL_GRACE_SECS";
/// Semicolon-separated `name=command` gate list.
const ENV_GATES: &str = "RACER_GATES";
const ENV_GATE_TIMEOUT: &str = "RACER_GATE_TIMEOUT_SECS";
const ENV_COMPREHENSIVE_GATES: &str = "RACER_COMPREHENSIVE_GATES";
const ENV_BASE_BRANCH: &str = "RACER_BASE_BRANCH";
const ENV_BRANCH_PREFIX: &str = "RACER_BRANCH_PREFIX";
const ENV_AUTHOR_NAME: &str = "RACER_AUTHOR_NAME";
const ENV_AUTHOR_EMAIL: &str = "RACER_AUTHOR_EMAIL";
const ENV_HOSTING_API: &str = "RACER_HOSTING_API";
const ENV_ENHANCE_TASK: &str = "RACER_ENHANCE_TASK";
const ENV_FORK: &str = "RACER_FORK";
const ENV_TELEMETRY_PATH: &str = "RACER_TELEMETRY_PATH";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// OpenAI-compatible completions endpoint.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub url: String,
    pub api_key: String,
    pub model: String,
    /// Upper bound on a single completion request.
    pub request_timeout_secs: u64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            url: env::var(ENV_GENERATOR_URL).unwrap_or_else(|_| DEFAULT_GENERATOR_URL.into()),
            api_key: env::var(ENV_GENERATOR_API_KEY).unwrap_or_else(|_| "not-needed".into()),
            model: env::var(ENV_GENERATOR_MODEL).unwrap_or_else(|_| DEFAULT_GENERATOR_MODEL.into()),
            request_timeout_secs: env_parse(ENV_REQUEST_TIMEOUT, DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }
}

impl fmt::Debug for GeneratorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeneratorConfig")
            .field("url", &self.url)
            .field("api_key", &"***")
            .field("model", &self.model)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

/// Top-level configuration for one `patch-racer` process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RacerConfig {
    pub generator: GeneratorConfig,
    /// Strategies raced against each other, one attempt each.
    pub strategies: Vec<Strategy>,
    /// Directory under which every job's workspaces are allocated.
    pub workspace_base: PathBuf,
    /// Deadline for the whole race; no winner by then fails the job.
    pub race_timeout_secs: u64,
    /// How long abandoned attempts get to wind down before being aborted.
    pub cancel_grace_secs: u64,
    /// Validation gates run in each attempt workspace, in order.
    pub gates: Vec<GateSpec>,
    pub gate_timeout_secs: u64,
    /// Keep running gates after one fails, for a fuller failure summary.
    pub comprehensive_gates: bool,
    pub clone_timeout_secs: u64,
    /// Pull requests target this branch.
    pub base_branch: String,
    /// Published branches are named `<prefix>/<strategy>-<job>-<timestamp>`.
    pub branch_prefix: String,
    pub author_name: String,
    pub author_email: String,
    /// Hosting REST API root.
    pub hosting_api: String,
    /// Publish through a fork owned by the credential holder instead of
    /// pushing to the upstream repository.
    pub fork: bool,
    /// Rewrite the task with the generator before planning.
    pub enhance_task: bool,
    /// Append one JSON line per finished job here.
    pub telemetry_path: Option<PathBuf>,
}

impl Default for RacerConfig {
    fn default() -> Self {
        let identity = CommitIdentity::default();
        Self {
            generator: GeneratorConfig::default(),
            strategies: Strategy::presets(),
            workspace_base: env::var(ENV_WORKSPACE_DIR)
                .map(PathBuf::from)
                .unwrap_or_else(|_| env::temp_dir().join("patch-racer")),
            race_timeout_secs: env_parse(ENV_RACE_TIMEOUT, DEFAULT_RACE_TIMEOUT_SECS),
            cancel_grace_secs: env_parse(ENV_CANCEL_GRACE, DEFAULT_CANCEL_GRACE_SECS),
            gates: env::var(ENV_GATES)
                .map(|raw| parse_gate_list(&raw))
                .unwrap_or_default(),
            gate_timeout_secs: env_parse(ENV_GATE_TIMEOUT, DEFAULT_GATE_TIMEOUT_SECS),
            comprehensive_gates: env_parse(ENV_COMPREHENSIVE_GATES, false),
            clone_timeout_secs: DEFAULT_CLONE_TIMEOUT_SECS,
            base_branch: env::var(ENV_BASE_BRANCH).unwrap_or_else(|_| "main".into()),
            branch_prefix: env::var(ENV_BRANCH_PREFIX).unwrap_or_else(|_| "ai-agent".into()),
            author_name: env::var(ENV_AUTHOR_NAME).unwrap_or(identity.name),
            author_email: env::var(ENV_AUTHOR_EMAIL).unwrap_or(identity.email),
            hosting_api: env::var(ENV_HOSTING_API).unwrap_or_else(|_| DEFAULT_HOSTING_API.into()),
            fork: env_parse(ENV_FORK, false),
            enhance_task: env_parse(ENV_ENHANCE_TASK, false),
            telemetry_path: env::var(ENV_TELEMETRY_PATH).ok().map(PathBuf::from),
        }
    }
}

impl RacerConfig {
    /// Environment defaults overlaid with the keys present in `path`.
    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.strategies.is_empty() {
            return Err(invalid("at least one strategy is required"));
        }
        let mut seen = std::collections::HashSet::new();
        for strategy in &self.strategies {
            if strategy.name.trim().is_empty() {
                return Err(invalid("strategy names must not be empty"));
            }
            if !seen.insert(strategy.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate strategy name '{}'",
                    strategy.name
                )));
            }
            if !(0.0..=2.0).contains(&strategy.temperature) {
                return Err(ConfigError::Invalid(format!(
                    "strategy '{}' temperature must be in [0, 2], got {}",
                    strategy.name, strategy.temperature
                )));
            }
        }
        for (name, value) in [
            ("race_timeout_secs", self.race_timeout_secs),
            ("gate_timeout_secs", self.gate_timeout_secs),
            ("clone_timeout_secs", self.clone_timeout_secs),
            ("generator.request_timeout_secs", self.generator.request_timeout_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be > 0")));
            }
            if value > MAX_TIMEOUT_SECS {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be at most {MAX_TIMEOUT_SECS}, got {value}"
                )));
            }
        }
        if self.base_branch.trim().is_empty() {
            return Err(invalid("base_branch must not be empty"));
        }
        if self.branch_prefix.trim().is_empty() || self.branch_prefix.contains(' ') {
            return Err(ConfigError::Invalid(format!(
                "invalid branch_prefix '{}'",
                self.branch_prefix
            )));
        }
        Ok(())
    }

    pub fn race_timeout(&self) -> Duration {
        Duration::from_secs(self.race_timeout_secs)
    }

    pub fn cancel_grace(&self) -> Duration {
        Duration::from_secs(self.cancel_grace_secs)
    }

    pub fn commit_identity(&self) -> CommitIdentity {
        CommitIdentity {
            name: self.author_name.clone(),
            email: self.author_email.clone(),
        }
    }
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::Invalid(message.to_string())
}

/// Parse `name=cmd; other=cmd` into gate specs, skipping blanks.
pub fn parse_gate_list(raw: &str) -> Vec<GateSpec> {
    raw.split(';').filter_map(GateSpec::parse).collect()
}

/// Gates given one per argument. Each value is a whole gate, so `;` inside a
/// command is kept.
pub fn parse_gate_args<S: AsRef<str>>(args: &[S]) -> Vec<GateSpec> {
    args.iter().filter_map(|g| GateSpec::parse(g.as_ref())).collect()
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Check if an inference endpoint is reachable (GET /models).
pub async fn check_endpoint(url: &str) -> bool {
    let models_url = format!("{}/models", url.trim_end_matches('/'));
    match reqwest::Client::new()
        .get(&models_url)
        .timeout(Duration::from_secs(5))
        .send()
        .await
    {
        Ok(resp) => resp.status().is_success(),
        Err(_) => false,
    }
}
