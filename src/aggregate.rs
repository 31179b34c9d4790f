use crate::corpus::CweId;
use crate::matching::{Verdict, VerdictStatus};
use crate::report::{Counts, Report};

/// Fold verdicts into a report. Pure; any order of the same verdicts gives
/// the same report, and no verdicts gives a zeroed one.
///
/// A CWE mismatch counts twice: a miss for the ground-truth CWE and a false
/// alarm for the claimed one. `overall` always equals the sum of the
/// buckets, plus true negatives, which belong to no CWE.
pub fn aggregate<'a>(verdicts: impl IntoIterator<Item = &'a Verdict>) -> Report {
    let mut report = Report::default();

    for v in verdicts {
        let truth = v.ground_truth_cwe.as_ref();
        let claimed = v.claimed_cwe.as_ref();
        let line_known = v.ground_truth_line.is_known();

        match v.status {
            VerdictStatus::CweAndLineMatch => bump(&mut report, truth, |c| {
                c.true_positives += 1;
                if line_known {
                    c.line_scored += 1;
                    c.line_accurate_count += 1;
                }
            }),
            VerdictStatus::CweMatchLineMiss => bump(&mut report, truth, |c| {
                c.true_positives += 1;
                if line_known {
                    c.line_scored += 1;
                }
            }),
            VerdictStatus::FalseNegative => {
                bump(&mut report, truth, |c| c.false_negatives += 1);
            }
            VerdictStatus::CweMismatch => {
                bump(&mut report, truth, |c| c.false_negatives += 1);
                bump(&mut report, claimed, |c| c.false_positives += 1);
            }
            VerdictStatus::FalsePositive => {
                bump(&mut report, claimed, |c| c.false_positives += 1);
            }
            VerdictStatus::TrueNegative => report.overall.true_negatives += 1,
            VerdictStatus::Inconclusive => report.inconclusive += 1,
        }
    }

    report
}

fn bump(report: &mut Report, cwe: Option<&CweId>, apply: impl Fn(&mut Counts)) {
    if let Some(cwe) = cwe {
        apply(report.per_cwe.entry(cwe.clone()).or_default());
    }
    apply(&mut report.overall);
}
