//! Detector boundary: the external tool is a black box that takes source text
//! and returns findings in whatever JSON shape it likes. This module turns
//! that into uniform [`Finding`]s and owns retries, timeouts and call
//! serialization so the rest of the pipeline stays pure.

pub mod command;
pub mod prepare;
pub mod remote;

use crate::config::{DetectorConfig, DetectorKind};
use crate::corpus::{CweId, Sample};
use crate::error::{Error, Result};
use prepare::PrepareOptions;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::future::Future;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

pub use command::CommandDetector;
pub use remote::RemoteDetector;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    /// `None` is the detector saying "not vulnerable".
    pub cwe: Option<CweId>,
    pub line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<f64>,
}

impl Finding {
    pub fn new(cwe: &str, line: Option<u32>) -> Self {
        Self {
            cwe: CweId::parse(cwe),
            line,
            confidence: None,
            severity: None,
        }
    }

    pub fn not_vulnerable() -> Self {
        Self {
            cwe: None,
            line: None,
            confidence: None,
            severity: None,
        }
    }

    /// Whether this finding claims a vulnerability at all.
    pub fn is_claim(&self) -> bool {
        self.cwe.is_some()
    }
}

/// An external detector. Implementations return the tool's raw JSON output;
/// normalization happens in the adapter.
pub trait Detector: Send + Sync {
    fn name(&self) -> &str;

    fn detect(&self, source: &str) -> impl Future<Output = Result<Value>> + Send;
}

/// Detector chosen at runtime from configuration.
pub enum ConfiguredDetector {
    Command(CommandDetector),
    Remote(RemoteDetector),
}

impl ConfiguredDetector {
    pub fn from_config(config: &DetectorConfig) -> Result<Self> {
        match config.kind {
            DetectorKind::Command => {
                let program = config
                    .command
                    .clone()
                    .ok_or_else(|| Error::config("detector.command is required for kind = \"command\""))?;
                Ok(Self::Command(
                    CommandDetector::new(program, config.args.clone())
                        .with_name(&config.name)
                        .with_input(config.input),
                ))
            }
            DetectorKind::Http => {
                let url = config
                    .url
                    .clone()
                    .ok_or_else(|| Error::config("detector.url is required for kind = \"http\""))?;
                let api_key = config
                    .api_key_env
                    .as_deref()
                    .and_then(|var| std::env::var(var).ok());
                Ok(Self::Remote(RemoteDetector::new(
                    &config.name,
                    url,
                    api_key,
                    Duration::from_secs(config.timeout_secs),
                )?))
            }
        }
    }
}

impl Detector for ConfiguredDetector {
    fn name(&self) -> &str {
        match self {
            Self::Command(d) => d.name(),
            Self::Remote(d) => d.name(),
        }
    }

    async fn detect(&self, source: &str) -> Result<Value> {
        match self {
            Self::Command(d) => d.detect(source).await,
            Self::Remote(d) => d.detect(source).await,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AdapterOptions {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub call_timeout: Duration,
    /// 0 means unlimited. 1 serializes every call into the tool.
    pub max_concurrent_calls: usize,
    pub prepare: PrepareOptions,
}

impl Default for AdapterOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            call_timeout: Duration::from_secs(60),
            max_concurrent_calls: 0,
            prepare: PrepareOptions::default(),
        }
    }
}

pub struct DetectorAdapter<D> {
    detector: D,
    options: AdapterOptions,
    gate: Option<Semaphore>,
}

impl<D: Detector> DetectorAdapter<D> {
    pub fn new(detector: D, options: AdapterOptions) -> Self {
        let gate = (options.max_concurrent_calls > 0)
            .then(|| Semaphore::new(options.max_concurrent_calls));
        Self {
            detector,
            options,
            gate,
        }
    }

    pub fn detector_name(&self) -> &str {
        self.detector.name()
    }

    pub fn detector(&self) -> &D {
        &self.detector
    }

    /// Run the detector on one sample and return normalized findings, with
    /// lines expressed in the sample's own numbering.
    pub async fn run(&self, sample: &Sample) -> Result<Vec<Finding>> {
        let prepared = prepare::prepare(&sample.source_text, &self.options.prepare);
        let raw = self.detect_with_retry(&sample.id, &prepared.text).await?;
        let mut findings = normalize(&raw)?;
        for finding in &mut findings {
            finding.line = finding.line.map(|l| prepared.original_line(l));
        }
        debug!(sample = %sample.id, count = findings.len(), "detector findings");
        Ok(findings)
    }

    async fn detect_with_retry(&self, sample_id: &str, text: &str) -> Result<Value> {
        let name = self.detector.name();
        let mut last_error = Error::unavailable(name, "no attempts made");
        let mut delay = self.options.base_delay;

        for attempt in 0..=self.options.max_retries {
            if attempt > 0 {
                if let Error::RateLimit {
                    retry_after_secs: Some(secs),
                    ..
                } = &last_error
                {
                    delay = delay.max(Duration::from_secs(*secs));
                }
                debug!(sample = sample_id, attempt, delay_ms = delay.as_millis() as u64, "retrying detector call");
                sleep(delay).await;
                delay = (delay * 2).min(self.options.max_delay);
            }

            let _permit = match &self.gate {
                Some(gate) => Some(
                    gate.acquire()
                        .await
                        .map_err(|_| Error::unavailable(name, "call gate closed"))?,
                ),
                None => None,
            };

            match timeout(self.options.call_timeout, self.detector.detect(text)).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) if e.is_transient() => {
                    warn!(sample = sample_id, attempt, error = %e, "transient detector failure, will retry");
                    last_error = e;
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    warn!(sample = sample_id, attempt, "detector call timed out");
                    last_error = Error::unavailable(
                        name,
                        format!("call timed out after {:?}", self.options.call_timeout),
                    );
                }
            }
        }

        let attempts = self.options.max_retries + 1;
        Err(match last_error {
            Error::DetectorUnavailable { detector, message } => Error::DetectorUnavailable {
                detector,
                message: format!("{message} (gave up after {attempts} attempts)"),
            },
            other => Error::unavailable(name, format!("{other} (gave up after {attempts} attempts)")),
        })
    }
}

// -- Output normalization --

const CWE_KEYS: &[&str] = &["cwe", "cwe_id", "cweId"];
const LINE_KEYS: &[&str] = &["line", "line_number", "lineno"];
const CONFIDENCE_KEYS: &[&str] = &["confidence", "score", "probability"];
const SEVERITY_KEYS: &[&str] = &["severity", "sev"];
const NOT_VULNERABLE: &[&str] = &["", "none", "n/a", "safe", "not vulnerable", "non-vulnerable"];

/// Normalize arbitrary detector output into findings.
///
/// Accepted shapes: `null`; an array of findings; `{"findings": [...]}`;
/// `{"vulnerable": false}`; parallel arrays `{"cwe": [..], "line": [..]}`;
/// a single finding object; a bare CWE string.
pub fn normalize(value: &Value) -> Result<Vec<Finding>> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => items.iter().map(finding_from_value).collect(),
        Value::String(_) => finding_from_value(value).map(|f| vec![f]),
        Value::Object(map) => {
            if let Some(inner) = map.get("findings") {
                return normalize(inner);
            }
            if let Some(Value::Array(cwes)) = first_key(map, CWE_KEYS) {
                return parallel_findings(map, cwes);
            }
            finding_from_value(value).map(|f| vec![f])
        }
        other => Err(Error::parse(format!("unrecognized detector output: {other}"))),
    }
}

fn first_key<'a>(map: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|k| map.get(*k))
}

fn parallel_findings(map: &Map<String, Value>, cwes: &[Value]) -> Result<Vec<Finding>> {
    let column = |keys: &[&str]| match first_key(map, keys) {
        Some(Value::Array(v)) => v.clone(),
        _ => Vec::new(),
    };
    let lines = column(LINE_KEYS);
    let confidences = column(CONFIDENCE_KEYS);
    let severities = column(SEVERITY_KEYS);

    cwes.iter()
        .enumerate()
        .map(|(i, cwe)| {
            Ok(Finding {
                cwe: claimed_cwe(cwe)?,
                line: lines.get(i).map(as_line).transpose()?.flatten(),
                confidence: confidences.get(i).and_then(Value::as_f64),
                severity: severities.get(i).and_then(Value::as_f64),
            })
        })
        .collect()
}

fn finding_from_value(value: &Value) -> Result<Finding> {
    match value {
        Value::String(_) => Ok(Finding {
            cwe: claimed_cwe(value)?,
            ..Finding::not_vulnerable()
        }),
        Value::Object(map) => {
            if map.get("vulnerable") == Some(&Value::Bool(false)) {
                return Ok(Finding::not_vulnerable());
            }
            let cwe = first_key(map, CWE_KEYS)
                .ok_or_else(|| Error::parse(format!("finding without a cwe field: {value}")))?;
            Ok(Finding {
                cwe: claimed_cwe(cwe)?,
                line: first_key(map, LINE_KEYS).map(as_line).transpose()?.flatten(),
                confidence: first_key(map, CONFIDENCE_KEYS).and_then(Value::as_f64),
                severity: first_key(map, SEVERITY_KEYS).and_then(Value::as_f64),
            })
        }
        other => Err(Error::parse(format!("unrecognized finding: {other}"))),
    }
}

fn claimed_cwe(value: &Value) -> Result<Option<CweId>> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => Ok(CweId::parse(&n.to_string())),
        Value::String(s) => {
            let lowered = s.trim().to_ascii_lowercase();
            if NOT_VULNERABLE.contains(&lowered.as_str()) {
                return Ok(None);
            }
            CweId::parse(s)
                .map(Some)
                .ok_or_else(|| Error::parse(format!("unrecognized cwe value: {s:?}")))
        }
        other => Err(Error::parse(format!("unrecognized cwe value: {other}"))),
    }
}

fn as_line(value: &Value) -> Result<Option<u32>> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => n
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .map(Some)
            .ok_or_else(|| Error::parse(format!("invalid line number: {n}"))),
        Value::String(s) => s
            .trim()
            .parse::<u32>()
            .map(Some)
            .map_err(|_| Error::parse(format!("invalid line number: {s:?}"))),
        other => Err(Error::parse(format!("invalid line number: {other}"))),
    }
}
