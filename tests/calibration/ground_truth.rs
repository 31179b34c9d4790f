use cwe_score::corpus::{
    CweId, GroundTruthLine, SampleStore, Variant, annotations, read_records,
};
use cwe_score::detector::prepare::{PrepareOptions, prepare};
use std::path::Path;

/// A hand-checked sample from `tests/fixtures/corpus`.
pub struct ExpectedSample {
    pub id: &'static str,
    pub cwe: &'static str,
    pub line: GroundTruthLine,
    pub row: &'static str,
    /// A token that appears only in this fragment's code.
    pub marker: &'static str,
}

pub const FIXTURE_CORPUS: &str = "tests/fixtures/corpus";

pub const EXPECTED: &[ExpectedSample] = &[
    ExpectedSample {
        id: "101",
        cwe: "CWE-125",
        line: GroundTruthLine::Known(4),
        row: "1201",
        marker: "read_at",
    },
    ExpectedSample {
        id: "202",
        cwe: "CWE-416",
        line: GroundTruthLine::Unknown,
        row: "5530",
        marker: "release_node",
    },
    ExpectedSample {
        id: "303",
        cwe: "CWE-190",
        line: GroundTruthLine::Known(3),
        row: "812",
        marker: "alloc_size",
    },
];

pub fn fixture_store() -> SampleStore {
    let records = annotations::load_dir(Path::new(FIXTURE_CORPUS)).unwrap();
    let (store, rejected) = SampleStore::load(records, true).unwrap();
    assert!(rejected.is_empty());
    store
}

#[test]
fn fixture_corpus_matches_hand_checked_labels() {
    let store = fixture_store();
    assert_eq!(store.len(), EXPECTED.len(), "README.txt must be skipped");

    for (sample, expected) in store.all().zip(EXPECTED) {
        assert_eq!(sample.id, expected.id);
        assert_eq!(sample.ground_truth_cwe, CweId::parse(expected.cwe));
        assert_eq!(sample.ground_truth_line, expected.line, "{}", expected.id);
        assert_eq!(sample.provenance_row.as_deref(), Some(expected.row));
        assert!(sample.source_text.contains(expected.marker));
        assert!(!sample.source_text.contains("CWE-ID"), "trailer leaked into {}", expected.id);
    }
}

#[test]
fn known_lines_point_at_the_flagged_statement() {
    let store = fixture_store();
    let line_of = |id: &str, n: usize| {
        store.get(id).unwrap().source_text.lines().nth(n - 1).unwrap().to_string()
    };
    assert!(line_of("101", 4).contains("table[idx]"));
    assert!(line_of("303", 3).contains("count * elem"));
}

#[test]
fn detection_notes_are_kept() {
    let store = fixture_store();
    let note = store.get("303").unwrap().note.clone().unwrap();
    assert!(note.contains("Correct CWE is CWE-190"));
    assert!(note.contains("Should be line 3"));
}

#[test]
fn prepared_text_keeps_line_numbers_without_comments() {
    let store = fixture_store();
    let sample = store.get("202").unwrap();
    let prepared = prepare(&sample.source_text, &PrepareOptions::default());
    assert!(!prepared.text.contains("node gone"));
    assert_eq!(prepared.text.lines().count(), sample.source_text.lines().count());
    assert_eq!(prepared.original_line(4), 4);
}

#[test]
fn record_file_fixture_expands_pairs_and_rejects_broken_records() {
    let records = read_records(Path::new("tests/fixtures/records.json")).unwrap();
    assert_eq!(records.len(), 4);

    let (store, rejected) = SampleStore::load(records.clone(), false).unwrap();
    assert_eq!(rejected.len(), 1);
    assert!(rejected[0].to_string().contains("broken"));

    let ids: Vec<&str> = store.all().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["r1", "r1/fixed", "r2", "r3"]);

    let fixed = store.pair("r1").unwrap().unwrap();
    assert_eq!(fixed.id, "r1/fixed");
    assert_eq!(fixed.variant, Variant::Fixed);
    assert!(fixed.ground_truth_cwe.is_none());

    assert_eq!(store.get("r2").unwrap().ground_truth_cwe, CweId::parse("CWE-476"));
    assert!(store.get("r3").unwrap().ground_truth_cwe.is_none());

    assert!(SampleStore::load(records, true).is_err(), "strict mode aborts");
}
