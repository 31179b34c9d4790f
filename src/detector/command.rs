use super::Detector;
use crate::config::InputFormat;
use crate::error::{Error, Result};
use serde_json::Value;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Runs the detector as a subprocess: source goes in on stdin, JSON comes out
/// on stdout. A process per call keeps calls independent; the child is killed
/// if the call is dropped (timeout or cancellation).
pub struct CommandDetector {
    name: String,
    program: String,
    args: Vec<String>,
    input: InputFormat,
}

impl CommandDetector {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        let program = program.into();
        Self {
            name: program.clone(),
            program,
            args,
            input: InputFormat::Json,
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        if !name.is_empty() {
            self.name = name.to_string();
        }
        self
    }

    pub fn with_input(mut self, input: InputFormat) -> Self {
        self.input = input;
        self
    }

    fn payload(&self, source: &str) -> Vec<u8> {
        match self.input {
            InputFormat::Json => serde_json::json!({ "source": source }).to_string().into_bytes(),
            InputFormat::Raw => source.as_bytes().to_vec(),
        }
    }
}

impl Detector for CommandDetector {
    fn name(&self) -> &str {
        &self.name
    }

    async fn detect(&self, source: &str) -> Result<Value> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::unavailable(&self.name, format!("failed to spawn {}: {e}", self.program)))?;

        // Feed stdin while stdout is drained; a tool that streams output as it
        // reads would otherwise block on a full pipe.
        let stdin = child.stdin.take();
        let payload = self.payload(source);
        let feed = async move {
            if let Some(mut stdin) = stdin {
                match stdin.write_all(&payload).await {
                    // A tool that exits without reading stdin is not a failure by itself.
                    Err(e) if e.kind() != std::io::ErrorKind::BrokenPipe => return Err(e),
                    _ => {}
                }
            }
            Ok(())
        };
        let (fed, output) = tokio::join!(feed, child.wait_with_output());

        let output =
            output.map_err(|e| Error::unavailable(&self.name, format!("wait failed: {e}")))?;
        fed.map_err(|e| Error::unavailable(&self.name, format!("stdin write failed: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stderr: String = stderr.trim().chars().take(500).collect();
            return Err(Error::unavailable(
                &self.name,
                format!("exited with {}: {stderr}", output.status),
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stdout = stdout.trim();
        debug!(detector = %self.name, bytes = stdout.len(), "detector output received");
        if stdout.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(stdout)
            .map_err(|e| Error::parse(format!("{} output is not JSON: {e}", self.name)))
    }
}
