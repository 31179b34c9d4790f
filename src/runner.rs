//! Run pipeline: store → detector → match → aggregate.
//!
//! Detector calls fan out over a bounded pool of tasks; each task reads one
//! sample and yields one result, so workers share nothing mutable.
//! Aggregation waits for every task, the run deadline, or cancellation,
//! whichever comes first. Verdicts finished by then are always kept.

use crate::aggregate::aggregate;
use crate::corpus::{Sample, SampleStore};
use crate::detector::{Detector, DetectorAdapter};
use crate::matching::{MatchPolicy, Verdict, match_sample};
use crate::report::Report;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Notify, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tracing::{error, info, warn};

/// Run-level cancellation signal. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<CancelState>,
}

#[derive(Debug, Default)]
struct CancelState {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register before checking the flag so a concurrent cancel is not missed.
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub workers: usize,
    pub run_timeout: Option<Duration>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            workers: 4,
            run_timeout: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExceptionKind {
    /// Detector failed or the deadline passed; the sample has an
    /// `INCONCLUSIVE` verdict.
    Inconclusive,
    /// Abandoned by cancellation; no verdict.
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleException {
    pub sample_id: String,
    pub kind: ExceptionKind,
    pub message: String,
}

/// Everything a run produced. Partial failure always shows up in
/// `exceptions`, never as a silently smaller sample count.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub generated_at: DateTime<Utc>,
    pub detector: String,
    pub samples: usize,
    pub cancelled: bool,
    pub deadline_elapsed: bool,
    pub report: Report,
    pub verdicts: Vec<Verdict>,
    pub exceptions: Vec<SampleException>,
    /// Records rejected at load time, as display strings.
    pub rejected_records: Vec<String>,
}

impl RunOutcome {
    pub fn with_rejected(mut self, rejected: &[crate::error::Error]) -> Self {
        self.rejected_records = rejected.iter().map(|e| e.to_string()).collect();
        self
    }

    pub fn is_complete(&self) -> bool {
        self.exceptions.is_empty() && self.rejected_records.is_empty()
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "generated_at": self.generated_at.to_rfc3339(),
            "detector": self.detector,
            "samples": self.samples,
            "cancelled": self.cancelled,
            "deadline_elapsed": self.deadline_elapsed,
            "report": self.report.document(),
            "verdicts": self.verdicts,
            "exceptions": self.exceptions,
            "rejected_records": self.rejected_records,
        })
    }
}

enum SampleResult {
    Scored(Verdict),
    Failed(Verdict, String),
    Cancelled,
}

/// Score every sample in `store` with `adapter`.
pub async fn run<D: Detector + 'static>(
    store: &SampleStore,
    adapter: Arc<DetectorAdapter<D>>,
    policy: MatchPolicy,
    options: &RunOptions,
    cancel: &CancellationToken,
) -> RunOutcome {
    let samples: Vec<Arc<Sample>> = store.all().cloned().collect();
    let detector = adapter.detector_name().to_string();
    info!(
        samples = samples.len(),
        workers = options.workers,
        detector = %detector,
        "run starting"
    );

    let mut slots: Vec<Option<SampleResult>> = (0..samples.len()).map(|_| None).collect();
    let work = dispatch(
        &samples,
        &adapter,
        policy,
        options.workers.max(1),
        cancel,
        &mut slots,
    );
    let deadline_elapsed = match options.run_timeout {
        Some(limit) => tokio::time::timeout(limit, work).await.is_err(),
        None => {
            work.await;
            false
        }
    };
    if deadline_elapsed {
        warn!("run deadline elapsed; pending samples become inconclusive");
    }

    let mut verdicts = Vec::with_capacity(samples.len());
    let mut exceptions = Vec::new();
    for (sample, slot) in samples.iter().zip(slots) {
        match slot {
            Some(SampleResult::Scored(v)) => verdicts.push(v),
            Some(SampleResult::Failed(v, message)) => {
                exceptions.push(SampleException {
                    sample_id: sample.id.clone(),
                    kind: ExceptionKind::Inconclusive,
                    message,
                });
                verdicts.push(v);
            }
            Some(SampleResult::Cancelled) => exceptions.push(cancelled(sample)),
            None if cancel.is_cancelled() && !deadline_elapsed => {
                exceptions.push(cancelled(sample));
            }
            None => {
                let message = if deadline_elapsed {
                    "detector unavailable: run deadline elapsed"
                } else {
                    "detector unavailable: worker task failed"
                };
                exceptions.push(SampleException {
                    sample_id: sample.id.clone(),
                    kind: ExceptionKind::Inconclusive,
                    message: message.into(),
                });
                verdicts.push(Verdict::inconclusive(sample, message));
            }
        }
    }

    let report = aggregate(&verdicts);
    info!(
        verdicts = verdicts.len(),
        exceptions = exceptions.len(),
        true_positives = report.overall.true_positives,
        false_negatives = report.overall.false_negatives,
        false_positives = report.overall.false_positives,
        "run complete"
    );

    RunOutcome {
        generated_at: Utc::now(),
        detector,
        samples: samples.len(),
        cancelled: cancel.is_cancelled(),
        deadline_elapsed,
        report,
        verdicts,
        exceptions,
        rejected_records: Vec::new(),
    }
}

fn cancelled(sample: &Sample) -> SampleException {
    SampleException {
        sample_id: sample.id.clone(),
        kind: ExceptionKind::Cancelled,
        message: "run cancelled before the detector finished".into(),
    }
}

async fn dispatch<D: Detector + 'static>(
    samples: &[Arc<Sample>],
    adapter: &Arc<DetectorAdapter<D>>,
    policy: MatchPolicy,
    workers: usize,
    cancel: &CancellationToken,
    slots: &mut [Option<SampleResult>],
) {
    let pool = Arc::new(Semaphore::new(workers));
    let mut tasks = JoinSet::new();

    for (idx, sample) in samples.iter().enumerate() {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            permit = Arc::clone(&pool).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let sample = Arc::clone(sample);
        let adapter = Arc::clone(adapter);
        let cancel = cancel.clone();
        tasks.spawn(async move {
            let _permit = permit;
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => SampleResult::Cancelled,
                findings = adapter.run(&sample) => match findings {
                    Ok(findings) => SampleResult::Scored(match_sample(&sample, &findings, &policy)),
                    Err(e) => {
                        warn!(sample = %sample.id, error = %e, "sample inconclusive");
                        let message = e.to_string();
                        SampleResult::Failed(Verdict::inconclusive(&sample, message.clone()), message)
                    }
                },
            };
            (idx, result)
        });

        while let Some(joined) = tasks.try_join_next() {
            record(joined, slots);
        }
    }

    while let Some(joined) = tasks.join_next().await {
        record(joined, slots);
    }
}

fn record(
    joined: Result<(usize, SampleResult), JoinError>,
    slots: &mut [Option<SampleResult>],
) {
    match joined {
        Ok((idx, result)) => slots[idx] = Some(result),
        Err(e) => error!(error = %e, "worker task failed"),
    }
}
