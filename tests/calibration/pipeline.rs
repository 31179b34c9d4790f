use crate::ground_truth::fixture_store;
use crate::scripted::{Reply, ScriptedDetector, adapter, quick_options};
use cwe_score::corpus::{CweId, SampleStore, read_records};
use cwe_score::detector::DetectorAdapter;
use cwe_score::matching::{MatchPolicy, VerdictStatus};
use cwe_score::runner::{self, CancellationToken, ExceptionKind, RunOptions};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

fn cwe(s: &str) -> CweId {
    CweId::parse(s).unwrap()
}

fn statuses(outcome: &runner::RunOutcome) -> Vec<(&str, VerdictStatus)> {
    outcome
        .verdicts
        .iter()
        .map(|v| (v.sample_id.as_str(), v.status))
        .collect()
}

fn fixture_replies(release_node: Reply) -> Vec<(&'static str, Reply)> {
    vec![
        ("read_at", Reply::Json(json!([{"cwe": "CWE-125", "line": 4}]))),
        ("release_node", release_node),
        ("alloc_size", Reply::Json(json!({"cwe": "CWE-787", "line": 3}))),
    ]
}

#[tokio::test]
async fn full_run_over_fixture_corpus() {
    let store = fixture_store();
    let adapter = adapter(fixture_replies(Reply::Json(
        json!({"cwe": ["CWE-416"], "line": [99]}),
    )));
    let outcome = runner::run(
        &store,
        adapter,
        MatchPolicy::exact(),
        &RunOptions::default(),
        &CancellationToken::new(),
    )
    .await;

    assert!(outcome.is_complete());
    assert!(!outcome.cancelled);
    assert_eq!(outcome.samples, 3);
    assert_eq!(
        statuses(&outcome),
        vec![
            ("101", VerdictStatus::CweAndLineMatch),
            ("202", VerdictStatus::CweAndLineMatch),
            ("303", VerdictStatus::CweMismatch),
        ]
    );

    let report = &outcome.report;
    let c125 = report.cwe(&cwe("CWE-125")).unwrap();
    assert_eq!((c125.true_positives, c125.line_scored, c125.line_accurate_count), (1, 1, 1));
    let c416 = report.cwe(&cwe("CWE-416")).unwrap();
    assert_eq!((c416.true_positives, c416.line_scored), (1, 0));
    assert_eq!(report.cwe(&cwe("CWE-190")).unwrap().false_negatives, 1);
    assert_eq!(report.cwe(&cwe("CWE-787")).unwrap().false_positives, 1);
    assert_eq!(report.overall.true_positives, 2);
    assert_eq!(report.overall.recall(), Some(2.0 / 3.0));
    assert_eq!(report.overall.line_accuracy(), Some(1.0));

    let json = outcome.to_json();
    assert_eq!(json["report"]["per_cwe"]["CWE-125"]["precision"], 1.0);
    assert_eq!(json["verdicts"][2]["status"], "CWE_MISMATCH");
}

#[tokio::test]
async fn unavailable_detector_makes_sample_inconclusive_without_aborting() {
    let store = fixture_store();
    let adapter = adapter(fixture_replies(Reply::Down));
    let outcome = runner::run(
        &store,
        Arc::clone(&adapter),
        MatchPolicy::exact(),
        &RunOptions::default(),
        &CancellationToken::new(),
    )
    .await;

    assert_eq!(outcome.verdicts.len(), 3);
    assert_eq!(outcome.verdicts[1].status, VerdictStatus::Inconclusive);
    assert_eq!(outcome.report.inconclusive, 1);
    assert_eq!(outcome.exceptions.len(), 1);
    assert_eq!(outcome.exceptions[0].sample_id, "202");
    assert_eq!(outcome.exceptions[0].kind, ExceptionKind::Inconclusive);
    assert!(outcome.exceptions[0].message.contains("gave up after 2 attempts"));
    // Inconclusive samples count toward nothing but the inconclusive tally.
    assert!(outcome.report.cwe(&cwe("CWE-416")).is_none());
    // One call each for the healthy samples, initial call plus one retry for the failing one.
    assert_eq!(adapter_calls(&adapter), 4);
}

fn adapter_calls(adapter: &DetectorAdapter<ScriptedDetector>) -> usize {
    adapter.detector().calls()
}

#[tokio::test]
async fn run_deadline_turns_pending_samples_inconclusive() {
    let store = fixture_store();
    let adapter = adapter(fixture_replies(Reply::Hang));
    let options = RunOptions {
        workers: 2,
        run_timeout: Some(Duration::from_millis(300)),
    };
    let outcome = runner::run(
        &store,
        adapter,
        MatchPolicy::exact(),
        &options,
        &CancellationToken::new(),
    )
    .await;

    assert!(outcome.deadline_elapsed);
    assert!(!outcome.cancelled);
    assert_eq!(
        statuses(&outcome),
        vec![
            ("101", VerdictStatus::CweAndLineMatch),
            ("202", VerdictStatus::Inconclusive),
            ("303", VerdictStatus::CweMismatch),
        ]
    );
    assert!(outcome.verdicts[1].reason.as_deref().unwrap().contains("deadline"));
    assert_eq!(outcome.report.overall.true_positives, 1);
    assert_eq!(outcome.report.inconclusive, 1);
}

#[tokio::test]
async fn cancellation_keeps_completed_verdicts_and_lists_the_rest() {
    let store = fixture_store();
    let adapter = adapter(fixture_replies(Reply::Hang));
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            cancel.cancel();
        });
    }
    let outcome = runner::run(
        &store,
        adapter,
        MatchPolicy::exact(),
        &RunOptions::default(),
        &cancel,
    )
    .await;

    assert!(outcome.cancelled);
    assert_eq!(
        statuses(&outcome),
        vec![
            ("101", VerdictStatus::CweAndLineMatch),
            ("303", VerdictStatus::CweMismatch),
        ]
    );
    assert_eq!(outcome.exceptions.len(), 1);
    assert_eq!(outcome.exceptions[0].sample_id, "202");
    assert_eq!(outcome.exceptions[0].kind, ExceptionKind::Cancelled);
    assert_eq!(outcome.report.inconclusive, 0);
}

#[tokio::test]
async fn cancelled_before_start_scores_nothing() {
    let store = fixture_store();
    let adapter = adapter(fixture_replies(Reply::Hang));
    let cancel = CancellationToken::new();
    cancel.cancel();
    let outcome = runner::run(
        &store,
        Arc::clone(&adapter),
        MatchPolicy::exact(),
        &RunOptions::default(),
        &cancel,
    )
    .await;

    assert!(outcome.verdicts.is_empty());
    assert_eq!(outcome.exceptions.len(), 3);
    assert!(outcome.exceptions.iter().all(|e| e.kind == ExceptionKind::Cancelled));
    assert_eq!(outcome.report.overall.true_positives, 0);
    assert_eq!(adapter_calls(&adapter), 0);
}

#[tokio::test]
async fn rerunning_gives_identical_verdicts_and_report() {
    let store = fixture_store();
    let adapter = adapter(fixture_replies(Reply::Json(json!("CWE-416"))));
    let options = RunOptions {
        workers: 3,
        run_timeout: None,
    };
    let first = runner::run(
        &store,
        Arc::clone(&adapter),
        MatchPolicy::exact(),
        &options,
        &CancellationToken::new(),
    )
    .await;
    let second = runner::run(
        &store,
        adapter,
        MatchPolicy::exact(),
        &options,
        &CancellationToken::new(),
    )
    .await;
    assert_eq!(first.verdicts, second.verdicts);
    assert_eq!(first.report, second.report);
}

#[tokio::test]
async fn paired_and_clean_records_score_as_true_negatives() {
    let records = read_records(Path::new("tests/fixtures/records.json")).unwrap();
    let (store, rejected) = SampleStore::load(records, false).unwrap();
    let adapter = Arc::new(DetectorAdapter::new(
        ScriptedDetector::new(vec![
            ("strcpy", Reply::Json(json!([{"cwe": "CWE-787", "line": 3}]))),
            ("p->field", Reply::Json(json!({"vulnerable": false}))),
        ]),
        quick_options(),
    ));
    let outcome = runner::run(
        &store,
        adapter,
        MatchPolicy::exact(),
        &RunOptions {
            workers: 1,
            run_timeout: None,
        },
        &CancellationToken::new(),
    )
    .await
    .with_rejected(&rejected);

    assert_eq!(
        statuses(&outcome),
        vec![
            ("r1", VerdictStatus::CweAndLineMatch),
            ("r1/fixed", VerdictStatus::TrueNegative),
            ("r2", VerdictStatus::FalseNegative),
            ("r3", VerdictStatus::TrueNegative),
        ]
    );
    assert_eq!(outcome.report.overall.true_negatives, 2);
    assert_eq!(outcome.report.cwe(&cwe("CWE-476")).unwrap().false_negatives, 1);
    assert_eq!(outcome.rejected_records.len(), 1);
    assert!(!outcome.is_complete());
}
