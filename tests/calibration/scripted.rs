use cwe_score::detector::{AdapterOptions, Detector, DetectorAdapter};
use cwe_score::error::{Error, Result};
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// How the scripted detector answers a source containing a marker.
#[allow(dead_code)]
pub enum Reply {
    Json(Value),
    Down,
    Hang,
}

/// In-process detector answering by substring marker. Sources that match no
/// marker get `null` (no findings).
pub struct ScriptedDetector {
    rules: Vec<(&'static str, Reply)>,
    calls: AtomicUsize,
}

impl ScriptedDetector {
    pub fn new(rules: Vec<(&'static str, Reply)>) -> Self {
        Self {
            rules,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Detector for ScriptedDetector {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn detect(&self, source: &str) -> Result<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let reply = self
            .rules
            .iter()
            .find(|(marker, _)| source.contains(marker))
            .map(|(_, reply)| reply);
        match reply {
            Some(Reply::Json(value)) => Ok(value.clone()),
            Some(Reply::Down) => Err(Error::unavailable("scripted", "connection refused")),
            Some(Reply::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(Value::Null)
            }
            None => Ok(Value::Null),
        }
    }
}

/// Fast-failing adapter options: one retry, millisecond backoff.
pub fn quick_options() -> AdapterOptions {
    AdapterOptions {
        max_retries: 1,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        call_timeout: Duration::from_secs(5),
        ..Default::default()
    }
}

pub fn adapter(rules: Vec<(&'static str, Reply)>) -> Arc<DetectorAdapter<ScriptedDetector>> {
    Arc::new(DetectorAdapter::new(
        ScriptedDetector::new(rules),
        quick_options(),
    ))
}
