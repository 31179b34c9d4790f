//! Ground-truth sample store.
//!
//! Samples are created once at load time and never mutated afterwards. The
//! store hands them out as shared `Arc`s so run workers can read them without
//! locking.

pub mod annotations;

use crate::error::{Error, Result};
use fancy_regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, LazyLock};
use tracing::{info, warn};

static CWE_LABEL_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*CWE[-_\s]*(\d+)(?![0-9A-Za-z_])").ok());
static BARE_NUMBER_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^\s*(\d+)\s*$").ok());

/// Normalized CWE identifier, always `CWE-<n>`. Comparison is exact on the
/// number, so `cwe-416`, `CWE 416`, `416` and `CWE-416 (Use After Free)` are
/// all equal and `CWE-41` is not.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CweId(String);

impl CweId {
    /// Extract the identifier from a CWE label or a bare number. Anything
    /// else (`none`, free text) is not a CWE.
    pub fn parse(raw: &str) -> Option<Self> {
        let number = [&CWE_LABEL_RE, &BARE_NUMBER_RE].into_iter().find_map(|re| {
            let caps = re.as_ref()?.captures(raw).ok()??;
            caps.get(1)?.as_str().parse::<u32>().ok()
        })?;
        Some(Self(format!("CWE-{number}")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CweId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for CweId {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        Self::parse(&value).ok_or_else(|| format!("'{value}' is not a CWE identifier"))
    }
}

impl From<CweId> for String {
    fn from(value: CweId) -> Self {
        value.0
    }
}

/// Ground-truth line. Uncertain labels stay explicit instead of hiding behind
/// a sentinel number.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroundTruthLine {
    Known(u32),
    #[default]
    Unknown,
}

impl GroundTruthLine {
    pub fn is_known(&self) -> bool {
        matches!(self, Self::Known(_))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Variant {
    #[default]
    Vulnerable,
    Fixed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub id: String,
    pub source_text: String,
    /// `None` marks a "not vulnerable" fixture.
    pub ground_truth_cwe: Option<CweId>,
    pub ground_truth_line: GroundTruthLine,
    pub provenance_row: Option<String>,
    pub pair_id: Option<String>,
    pub variant: Variant,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl Sample {
    pub fn vulnerable(
        id: impl Into<String>,
        source_text: impl Into<String>,
        cwe: CweId,
        line: GroundTruthLine,
    ) -> Self {
        Self {
            id: id.into(),
            source_text: source_text.into(),
            ground_truth_cwe: Some(cwe),
            ground_truth_line: line,
            provenance_row: None,
            pair_id: None,
            variant: Variant::Vulnerable,
            note: None,
        }
    }

    pub fn clean(id: impl Into<String>, source_text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source_text: source_text.into(),
            ground_truth_cwe: None,
            ground_truth_line: GroundTruthLine::Unknown,
            provenance_row: None,
            pair_id: None,
            variant: Variant::Vulnerable,
            note: None,
        }
    }
}

// -- Raw ingestion records --

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawCwe {
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawLine {
    Number(u32),
    Text(String),
}

/// One ingestion record as it arrives from a record file or the annotation
/// parser. Validation happens in [`SampleStore::load`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    #[serde(default, deserialize_with = "string_or_number")]
    pub id: Option<String>,
    #[serde(default, alias = "sourceText", alias = "source")]
    pub source_text: Option<String>,
    #[serde(default, alias = "fixedText")]
    pub fixed_text: Option<String>,
    #[serde(default, alias = "groundTruthCwe", alias = "cwe_id")]
    pub cwe: Option<RawCwe>,
    #[serde(default, alias = "groundTruthLine")]
    pub line: Option<RawLine>,
    #[serde(default, alias = "provenanceRow", deserialize_with = "string_or_number")]
    pub provenance_row: Option<String>,
    /// Declares a vulnerability-free fixture; such records carry no CWE.
    #[serde(default)]
    pub clean: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Ids and dataset rows are often numeric (`"id": 175`); keep them as text.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Number(serde_json::Number),
}

impl From<RawId> for String {
    fn from(id: RawId) -> Self {
        match id {
            RawId::Text(s) => s,
            RawId::Number(n) => n.to_string(),
        }
    }
}

fn string_or_number<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<String>, D::Error> {
    Ok(Option::<RawId>::deserialize(deserializer)?.map(String::from))
}

/// Suffix appended to a record id to name its fixed variant.
pub const FIXED_SUFFIX: &str = "/fixed";

/// One entry of a record file. An entry that is valid JSON but not a valid
/// record stays in the sequence so the store can reject it by position.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordEntry {
    Record(RawRecord),
    Unreadable { id: Option<String>, reason: String },
}

impl RecordEntry {
    fn from_value(value: Value) -> Self {
        let id = match value.get("id") {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        };
        match serde_json::from_value(value) {
            Ok(record) => Self::Record(record),
            Err(e) => Self::Unreadable {
                id,
                reason: format!("unreadable record: {e}"),
            },
        }
    }
}

impl From<RawRecord> for RecordEntry {
    fn from(record: RawRecord) -> Self {
        Self::Record(record)
    }
}

/// Read record entries from a JSON array or JSON Lines file.
///
/// Only a file that is not JSON at all fails as a whole. Individual array
/// elements or lines that do not form a record come back as
/// [`RecordEntry::Unreadable`].
pub fn read_records(path: &Path) -> Result<Vec<RecordEntry>> {
    let content = std::fs::read_to_string(path)?;
    if content.trim_start().starts_with('[') {
        let values: Vec<Value> = serde_json::from_str(&content)
            .map_err(|e| Error::parse(format!("{}: {e}", path.display())))?;
        return Ok(values.into_iter().map(RecordEntry::from_value).collect());
    }
    Ok(content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| match serde_json::from_str::<Value>(line) {
            Ok(value) => RecordEntry::from_value(value),
            Err(e) => RecordEntry::Unreadable {
                id: None,
                reason: format!("line {} is not JSON: {e}", i + 1),
            },
        })
        .collect())
}

/// Write-once store of samples, in ingestion order.
#[derive(Debug, Default)]
pub struct SampleStore {
    samples: Vec<Arc<Sample>>,
    index: HashMap<String, usize>,
}

impl SampleStore {
    /// Build a store from raw records.
    ///
    /// Malformed records are skipped and returned alongside the store, unless
    /// `strict` is set, in which case the first one aborts the load. Duplicate
    /// ids and multi-label ground truth always abort.
    pub fn load<R: Into<RecordEntry>>(
        records: impl IntoIterator<Item = R>,
        strict: bool,
    ) -> Result<(Self, Vec<Error>)> {
        let mut store = Self::default();
        let mut rejected = Vec::new();

        for (position, entry) in records.into_iter().enumerate() {
            let parsed = match entry.into() {
                RecordEntry::Record(record) => samples_from_record(position, record),
                RecordEntry::Unreadable { id, reason } => {
                    Err(Error::malformed(position, id.as_deref(), reason))
                }
            };
            match parsed {
                Ok(samples) => {
                    for sample in samples {
                        store.insert(sample)?;
                    }
                }
                Err(e) if e.is_fatal() || strict => return Err(e),
                Err(e) => {
                    warn!(position, error = %e, "rejecting record");
                    rejected.push(e);
                }
            }
        }

        info!(
            samples = store.len(),
            rejected = rejected.len(),
            "sample store loaded"
        );
        Ok((store, rejected))
    }

    fn insert(&mut self, sample: Sample) -> Result<()> {
        if self.index.contains_key(&sample.id) {
            return Err(Error::invariant(format!(
                "duplicate sample id '{}'",
                sample.id
            )));
        }
        self.index.insert(sample.id.clone(), self.samples.len());
        self.samples.push(Arc::new(sample));
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<&Arc<Sample>> {
        self.index
            .get(id)
            .map(|&i| &self.samples[i])
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    /// Every sample in ingestion order. Each call starts a fresh iteration.
    pub fn all(&self) -> impl Iterator<Item = &Arc<Sample>> + '_ {
        self.samples.iter()
    }

    /// The other variant of a paired sample, if any.
    pub fn pair(&self, id: &str) -> Result<Option<&Arc<Sample>>> {
        let sample = self.get(id)?;
        let Some(pair_id) = sample.pair_id.as_deref() else {
            return Ok(None);
        };
        Ok(self
            .samples
            .iter()
            .find(|s| s.pair_id.as_deref() == Some(pair_id) && s.id != sample.id))
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

fn samples_from_record(position: usize, record: RawRecord) -> Result<Vec<Sample>> {
    let id = match record.id.as_deref().map(str::trim) {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => return Err(Error::malformed(position, None, "missing id")),
    };
    let malformed = |reason: &str| Error::malformed(position, Some(&id), reason);

    let source_text = match record.source_text {
        Some(text) if !text.trim().is_empty() => text,
        _ => return Err(malformed("missing sourceText")),
    };

    let (ground_truth_cwe, ground_truth_line) = if record.clean {
        if record.cwe.is_some() {
            return Err(malformed("clean record carries a groundTruthCwe"));
        }
        (None, GroundTruthLine::Unknown)
    } else {
        let cwe = parse_cwe(position, &id, record.cwe)?;
        let line = parse_line(record.line.as_ref(), &source_text)
            .map_err(|reason| malformed(&reason))?;
        (Some(cwe), line)
    };

    let pair_id = record.fixed_text.as_ref().map(|_| id.clone());
    let mut samples = vec![Sample {
        id: id.clone(),
        source_text,
        ground_truth_cwe,
        ground_truth_line,
        provenance_row: record.provenance_row.clone(),
        pair_id: pair_id.clone(),
        variant: Variant::Vulnerable,
        note: record.note,
    }];

    if let Some(fixed_text) = record.fixed_text {
        if fixed_text.trim().is_empty() {
            return Err(malformed("fixedText is empty"));
        }
        samples.push(Sample {
            id: format!("{id}{FIXED_SUFFIX}"),
            source_text: fixed_text,
            ground_truth_cwe: None,
            ground_truth_line: GroundTruthLine::Unknown,
            provenance_row: record.provenance_row,
            pair_id,
            variant: Variant::Fixed,
            note: None,
        });
    }

    Ok(samples)
}

fn parse_cwe(position: usize, id: &str, raw: Option<RawCwe>) -> Result<CweId> {
    let raw_labels = match raw {
        None => Vec::new(),
        Some(RawCwe::One(s)) => vec![s],
        Some(RawCwe::Many(v)) => v,
    };
    let mut labels = raw_labels
        .iter()
        .map(|s| {
            CweId::parse(s).ok_or_else(|| {
                Error::malformed(
                    position,
                    Some(id),
                    format!("groundTruthCwe '{s}' is not a CWE identifier"),
                )
            })
        })
        .collect::<Result<Vec<CweId>>>()?;
    labels.sort();
    labels.dedup();

    if labels.len() > 1 {
        return Err(Error::invariant(format!(
            "sample '{id}' has {} ground-truth CWEs; exactly one is required",
            labels.len()
        )));
    }
    labels
        .pop()
        .ok_or_else(|| Error::malformed(position, Some(id), "missing groundTruthCwe"))
}

fn parse_line(raw: Option<&RawLine>, source_text: &str) -> std::result::Result<GroundTruthLine, String> {
    let line = match raw {
        None => return Ok(GroundTruthLine::Unknown),
        Some(RawLine::Number(n)) => *n,
        Some(RawLine::Text(t)) if t.trim().eq_ignore_ascii_case("unknown") => {
            return Ok(GroundTruthLine::Unknown);
        }
        Some(RawLine::Text(t)) => t
            .trim()
            .parse::<u32>()
            .map_err(|_| format!("groundTruthLine '{t}' is neither a number nor 'unknown'"))?,
    };

    let line_count = source_text.lines().count();
    if line == 0 || line as usize > line_count {
        return Err(format!(
            "groundTruthLine {line} outside sourceText (1..={line_count})"
        ));
    }
    Ok(GroundTruthLine::Known(line))
}
