use crate::detector::AdapterOptions;
use crate::detector::prepare::PrepareOptions;
use crate::error::{Error, Result};
use crate::matching::MatchPolicy;
use crate::runner::RunOptions;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub matching: MatchingConfig,
}

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DetectorKind {
    #[default]
    Command,
    Http,
}

/// What a command detector receives on stdin.
#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InputFormat {
    /// `{"source": "..."}`
    #[default]
    Json,
    /// The prepared source text as-is.
    Raw,
}

#[derive(Debug, Deserialize)]
pub struct DetectorConfig {
    #[serde(default)]
    pub kind: DetectorKind,
    #[serde(default = "default_detector_name")]
    pub name: String,
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub input: InputFormat,
    pub url: Option<String>,
    pub api_key_env: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Upper bound on simultaneous calls into the tool; 0 = no bound.
    #[serde(default)]
    pub max_concurrent_calls: usize,
    #[serde(default = "default_true")]
    pub strip_comments: bool,
    #[serde(default)]
    pub collapse_blank_lines: bool,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            kind: DetectorKind::default(),
            name: default_detector_name(),
            command: None,
            args: Vec::new(),
            input: InputFormat::default(),
            url: None,
            api_key_env: None,
            timeout_secs: default_timeout_secs(),
            max_concurrent_calls: 0,
            strip_comments: true,
            collapse_blank_lines: false,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RunConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Whole-run deadline. Samples still pending when it passes are
    /// reported as inconclusive.
    pub run_timeout_secs: Option<u64>,
    #[serde(default)]
    pub strict: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            run_timeout_secs: None,
            strict: false,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct MatchingConfig {
    /// Accepted distance between reported and ground-truth line. 0 = exact.
    #[serde(default)]
    pub line_tolerance: u32,
}

// Defaults
fn default_detector_name() -> String {
    "detector".into()
}
fn default_timeout_secs() -> u64 {
    60
}
fn default_true() -> bool {
    true
}
fn default_workers() -> usize {
    4
}
fn default_max_retries() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    500
}
fn default_max_delay_ms() -> u64 {
    30_000
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("Failed to read config {}: {e}", path.display())))?;
        toml::from_str(&content).map_err(|e| Error::config(format!("Failed to parse config: {e}")))
    }

    /// Load `path` if it exists, defaults otherwise.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self.detector.kind {
            DetectorKind::Command if self.detector.command.is_none() => {
                return Err(Error::config(
                    "detector.command not set. Set it in config.toml or pass --detector",
                ));
            }
            DetectorKind::Http if self.detector.url.is_none() => {
                return Err(Error::config("detector.url not set for kind = \"http\""));
            }
            _ => {}
        }
        if self.run.workers == 0 {
            return Err(Error::config("run.workers must be at least 1"));
        }
        if self.detector.timeout_secs == 0 {
            return Err(Error::config("detector.timeout_secs must be at least 1"));
        }
        Ok(())
    }

    /// Apply command-line detector overrides. A program switches the
    /// detector to a subprocess; args replace the configured ones either way.
    pub fn override_command(&mut self, program: Option<String>, args: Vec<String>) {
        if let Some(program) = program {
            self.detector.kind = DetectorKind::Command;
            self.detector.command = Some(program);
        }
        if !args.is_empty() {
            self.detector.args = args;
        }
    }

    pub fn adapter_options(&self) -> AdapterOptions {
        AdapterOptions {
            max_retries: self.run.max_retries,
            base_delay: Duration::from_millis(self.run.base_delay_ms),
            max_delay: Duration::from_millis(self.run.max_delay_ms),
            call_timeout: Duration::from_secs(self.detector.timeout_secs),
            max_concurrent_calls: self.detector.max_concurrent_calls,
            prepare: PrepareOptions {
                strip_comments: self.detector.strip_comments,
                collapse_blank_lines: self.detector.collapse_blank_lines,
            },
        }
    }

    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            workers: self.run.workers,
            run_timeout: self.run.run_timeout_secs.map(Duration::from_secs),
        }
    }

    pub fn match_policy(&self) -> MatchPolicy {
        MatchPolicy {
            line_tolerance: self.matching.line_tolerance,
        }
    }
}
