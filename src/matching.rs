//! Per-sample classification of detector findings against ground truth.

use crate::corpus::{CweId, GroundTruthLine, Sample};
use crate::detector::Finding;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerdictStatus {
    CweAndLineMatch,
    CweMatchLineMiss,
    CweMismatch,
    FalseNegative,
    FalsePositive,
    TrueNegative,
    /// The detector could not be run to completion for this sample.
    Inconclusive,
}

impl std::fmt::Display for VerdictStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CweAndLineMatch => write!(f, "CWE_AND_LINE_MATCH"),
            Self::CweMatchLineMiss => write!(f, "CWE_MATCH_LINE_MISS"),
            Self::CweMismatch => write!(f, "CWE_MISMATCH"),
            Self::FalseNegative => write!(f, "FALSE_NEGATIVE"),
            Self::FalsePositive => write!(f, "FALSE_POSITIVE"),
            Self::TrueNegative => write!(f, "TRUE_NEGATIVE"),
            Self::Inconclusive => write!(f, "INCONCLUSIVE"),
        }
    }
}

/// Outcome of matching one sample. Carries the ground truth it was judged
/// against so aggregation needs nothing but verdicts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub sample_id: String,
    pub status: VerdictStatus,
    pub ground_truth_cwe: Option<CweId>,
    pub ground_truth_line: GroundTruthLine,
    /// CWE of the finding that decided the verdict.
    pub claimed_cwe: Option<CweId>,
    /// Index into the finding list the verdict was computed from.
    pub matched_finding: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Verdict {
    pub fn inconclusive(sample: &Sample, reason: impl Into<String>) -> Self {
        Self {
            sample_id: sample.id.clone(),
            status: VerdictStatus::Inconclusive,
            ground_truth_cwe: sample.ground_truth_cwe.clone(),
            ground_truth_line: sample.ground_truth_line,
            claimed_cwe: None,
            matched_finding: None,
            reason: Some(reason.into()),
        }
    }

    /// CWE detected, regardless of line.
    pub fn is_true_positive(&self) -> bool {
        matches!(
            self.status,
            VerdictStatus::CweAndLineMatch | VerdictStatus::CweMatchLineMiss
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MatchPolicy {
    /// Maximum accepted |reported - ground truth| line distance.
    pub line_tolerance: u32,
}

impl MatchPolicy {
    pub fn exact() -> Self {
        Self::default()
    }

    fn line_matches(&self, reported: Option<u32>, truth: u32) -> bool {
        reported.is_some_and(|l| l.abs_diff(truth) <= self.line_tolerance)
    }
}

/// Classify `findings` against `sample`'s ground truth.
///
/// Findings without a CWE ("not vulnerable") are not claims and never decide
/// a verdict. Among findings with the right CWE, an exact line hit wins, then
/// the first within tolerance, otherwise the first in detector order.
pub fn match_sample(sample: &Sample, findings: &[Finding], policy: &MatchPolicy) -> Verdict {
    let claims: Vec<(usize, &Finding)> = findings
        .iter()
        .enumerate()
        .filter(|(_, f)| f.is_claim())
        .collect();

    let verdict = |status, matched: Option<(usize, &Finding)>| Verdict {
        sample_id: sample.id.clone(),
        status,
        ground_truth_cwe: sample.ground_truth_cwe.clone(),
        ground_truth_line: sample.ground_truth_line,
        claimed_cwe: matched.and_then(|(_, f)| f.cwe.clone()),
        matched_finding: matched.map(|(i, _)| i),
        reason: None,
    };

    let Some(truth) = sample.ground_truth_cwe.as_ref() else {
        return match claims.first() {
            Some(&first) => verdict(VerdictStatus::FalsePositive, Some(first)),
            None => verdict(VerdictStatus::TrueNegative, None),
        };
    };

    let Some(&first_claim) = claims.first() else {
        return verdict(VerdictStatus::FalseNegative, None);
    };

    let mut same_cwe = claims
        .iter()
        .copied()
        .filter(|(_, f)| f.cwe.as_ref() == Some(truth))
        .peekable();

    let Some(&first_same) = same_cwe.peek() else {
        return verdict(VerdictStatus::CweMismatch, Some(first_claim));
    };

    match sample.ground_truth_line {
        GroundTruthLine::Unknown => verdict(VerdictStatus::CweAndLineMatch, Some(first_same)),
        GroundTruthLine::Known(line) => {
            let same_cwe: Vec<(usize, &Finding)> = same_cwe.collect();
            // An exact hit beats an earlier one that is only within tolerance.
            let hit = same_cwe
                .iter()
                .find(|(_, f)| f.line == Some(line))
                .or_else(|| {
                    same_cwe
                        .iter()
                        .find(|(_, f)| policy.line_matches(f.line, line))
                })
                .copied();
            match hit {
                Some(hit) => verdict(VerdictStatus::CweAndLineMatch, Some(hit)),
                None => verdict(VerdictStatus::CweMatchLineMiss, Some(first_same)),
            }
        }
    }
}
