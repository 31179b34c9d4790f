//! Aggregate report model. Counts are stored; metrics are derived on demand
//! and come back as `None` when their denominator is zero.

use crate::corpus::CweId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counts {
    pub true_positives: u64,
    pub false_negatives: u64,
    pub false_positives: u64,
    pub true_negatives: u64,
    /// True positives whose reported line matched a known ground-truth line.
    pub line_accurate_count: u64,
    /// True positives with a known ground-truth line (line-accuracy denominator).
    pub line_scored: u64,
}

fn ratio(num: u64, den: u64) -> Option<f64> {
    (den > 0).then(|| num as f64 / den as f64)
}

impl Counts {
    pub fn precision(&self) -> Option<f64> {
        ratio(
            self.true_positives,
            self.true_positives + self.false_positives,
        )
    }

    pub fn recall(&self) -> Option<f64> {
        ratio(
            self.true_positives,
            self.true_positives + self.false_negatives,
        )
    }

    pub fn line_accuracy(&self) -> Option<f64> {
        ratio(self.line_accurate_count, self.line_scored)
    }

    pub fn f1(&self) -> Option<f64> {
        let (p, r) = (self.precision()?, self.recall()?);
        (p + r > 0.0).then(|| 2.0 * p * r / (p + r))
    }

    pub fn add(&mut self, other: &Counts) {
        self.true_positives += other.true_positives;
        self.false_negatives += other.false_negatives;
        self.false_positives += other.false_positives;
        self.true_negatives += other.true_negatives;
        self.line_accurate_count += other.line_accurate_count;
        self.line_scored += other.line_scored;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    /// Only CWEs that occurred in some verdict have a bucket.
    pub per_cwe: BTreeMap<CweId, Counts>,
    pub overall: Counts,
    /// Samples whose detector run never completed.
    pub inconclusive: u64,
}

impl Report {
    pub fn cwe(&self, cwe: &CweId) -> Option<&Counts> {
        self.per_cwe.get(cwe)
    }

    /// Serializable view with derived metrics next to the raw counts.
    pub fn document(&self) -> ReportDocument {
        ReportDocument {
            per_cwe: self
                .per_cwe
                .iter()
                .map(|(cwe, counts)| (cwe.to_string(), CountsView::from(counts)))
                .collect(),
            overall: CountsView::from(&self.overall),
            inconclusive: self.inconclusive,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CountsView {
    #[serde(flatten)]
    pub counts: Counts,
    pub precision: Option<f64>,
    pub recall: Option<f64>,
    pub line_accuracy: Option<f64>,
    pub f1: Option<f64>,
}

impl From<&Counts> for CountsView {
    fn from(counts: &Counts) -> Self {
        Self {
            counts: *counts,
            precision: counts.precision(),
            recall: counts.recall(),
            line_accuracy: counts.line_accuracy(),
            f1: counts.f1(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportDocument {
    pub per_cwe: BTreeMap<String, CountsView>,
    pub overall: CountsView,
    pub inconclusive: u64,
}
