use crate::scripted::{Reply, adapter};
use cwe_score::aggregate::aggregate;
use cwe_score::corpus::{CweId, GroundTruthLine, Sample};
use cwe_score::matching::{MatchPolicy, Verdict, VerdictStatus, match_sample};
use serde_json::json;

async fn judge(sample: &Sample, reply: Reply) -> Verdict {
    let adapter = adapter(vec![("", reply)]);
    let findings = adapter.run(sample).await.unwrap();
    match_sample(sample, &findings, &MatchPolicy::exact())
}

fn cwe(s: &str) -> CweId {
    CweId::parse(s).unwrap()
}

fn read_at_line_9() -> Sample {
    let text = (1..=12).map(|i| format!("stmt_{i};\n")).collect::<String>();
    Sample::vulnerable("336", text, cwe("CWE-125"), GroundTruthLine::Known(9))
}

#[tokio::test]
async fn use_after_free_with_empty_output_is_false_negative() {
    let s = Sample::vulnerable("152", "free(p);\nuse(p);\n", cwe("CWE-416"), GroundTruthLine::Unknown);
    let v = judge(&s, Reply::Json(json!([]))).await;
    assert_eq!(v.status, VerdictStatus::FalseNegative);
}

#[tokio::test]
async fn any_claim_on_clean_sample_is_false_positive() {
    let s = Sample::clean("175/fixed", "int ok;\n");
    let v = judge(&s, Reply::Json(json!({"cwe": "CWE-119", "line": 1}))).await;
    assert_eq!(v.status, VerdictStatus::FalsePositive);
}

#[tokio::test]
async fn read_out_of_bounds_scenarios() {
    let s = read_at_line_9();
    let cases = [
        (json!([{"cwe": "CWE-125", "line": 9}]), VerdictStatus::CweAndLineMatch),
        (json!([{"cwe": "CWE-125", "line": 3}]), VerdictStatus::CweMatchLineMiss),
        (json!([{"cwe": "CWE-787", "line": 9}]), VerdictStatus::CweMismatch),
    ];
    for (output, expected) in cases {
        let v = judge(&s, Reply::Json(output.clone())).await;
        assert_eq!(v.status, expected, "detector output {output}");
    }
}

#[tokio::test]
async fn unknown_line_matches_on_cwe_and_is_not_line_scored() {
    let s = Sample::vulnerable("393", "a;\nb;\n", cwe("CWE-416"), GroundTruthLine::Unknown);
    let v = judge(&s, Reply::Json(json!({"cwe": "CWE-416", "line": 2}))).await;
    assert_eq!(v.status, VerdictStatus::CweAndLineMatch);

    let report = aggregate([&v]);
    let counts = report.cwe(&cwe("CWE-416")).unwrap();
    assert_eq!(counts.true_positives, 1);
    assert_eq!(counts.line_scored, 0);
    assert_eq!(counts.line_accuracy(), None);
}

#[tokio::test]
async fn matching_the_same_output_twice_agrees() {
    let s = read_at_line_9();
    let output = json!([{"cwe": "CWE-787", "line": 2}, {"cwe": "CWE-125", "line": 9}]);
    let a = judge(&s, Reply::Json(output.clone())).await;
    let b = judge(&s, Reply::Json(output)).await;
    assert_eq!(a, b);
    assert_eq!(a.matched_finding, Some(1));
}

#[test]
fn empty_aggregate_is_all_zero() {
    let none: Vec<Verdict> = Vec::new();
    let report = aggregate(&none);
    assert!(report.per_cwe.is_empty());
    assert_eq!(report.overall.true_positives, 0);
    assert_eq!(report.overall.precision(), None);
    assert_eq!(report.overall.recall(), None);
    assert_eq!(report.overall.line_accuracy(), None);
}
