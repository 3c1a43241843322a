//! Production extractor backed by the external command-line tool

use async_trait::async_trait;
use parking_lot::RwLock;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::error::ExtractError;

use super::process::{ToolProcess, WaitOutcome};
use super::Extractor;

/// Timeout of the startup `--version` probe
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Longest stderr excerpt carried in errors
const MAX_STDERR_CHARS: usize = 2000;

/// Runs the extraction tool as a supervised subprocess
pub struct ToolInvoker {
    program: String,
    available: AtomicBool,
    version: RwLock<Option<String>>,
}

impl ToolInvoker {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            available: AtomicBool::new(false),
            version: RwLock::new(None),
        }
    }

    /// Check once whether the tool runs, caching the answer.
    ///
    /// The flag is advisory: invocations are attempted regardless.
    pub async fn probe(&self) -> bool {
        let args = vec!["--version".to_string()];
        match self.invoke(&args, PROBE_TIMEOUT).await {
            Ok(output) => {
                let version = output.trim().to_string();
                tracing::info!("{} available, version {}", self.program, version);
                *self.version.write() = Some(version);
                self.available.store(true, Ordering::SeqCst);
                true
            }
            Err(e) => {
                tracing::warn!("{} not available: {}", self.program, e);
                self.available.store(false, Ordering::SeqCst);
                false
            }
        }
    }

    async fn invoke(&self, args: &[String], timeout: Duration) -> Result<String, ExtractError> {
        let process = ToolProcess::spawn(&self.program, args).map_err(|e| self.spawn_error(e))?;

        let outcome = process
            .wait(timeout)
            .await
            .map_err(|e| ExtractError::Io(e.to_string()))?;

        match outcome {
            WaitOutcome::Exited {
                code: 0, stdout, ..
            } => Ok(String::from_utf8_lossy(&stdout).into_owned()),
            WaitOutcome::Exited { code, stderr, .. } => {
                let stderr: String = String::from_utf8_lossy(&stderr)
                    .trim()
                    .chars()
                    .take(MAX_STDERR_CHARS)
                    .collect();
                tracing::warn!("{} exited with code {}: {}", self.program, code, stderr);
                Err(ExtractError::Process { code, stderr })
            }
            WaitOutcome::TimedOut => Err(ExtractError::Timeout(timeout.as_secs())),
        }
    }

    fn spawn_error(&self, e: io::Error) -> ExtractError {
        match e.kind() {
            io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => {
                self.available.store(false, Ordering::SeqCst);
                ExtractError::Unavailable(format!("{}: {}", self.program, e))
            }
            _ => ExtractError::Io(e.to_string()),
        }
    }
}

#[async_trait]
impl Extractor for ToolInvoker {
    async fn run(&self, args: Vec<String>, timeout: Duration) -> Result<String, ExtractError> {
        tracing::debug!(program = %self.program, ?args, "invoking extraction tool");
        self.invoke(&args, timeout).await
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn version(&self) -> Option<String> {
        self.version.read().clone()
    }

    fn program(&self) -> &str {
        &self.program
    }
}
