//! Supervised extraction tool subprocess
//!
//! A `ToolProcess` owns the child for its whole life: output is collected
//! concurrently while waiting, and on timeout the handle kills and reaps
//! the child itself.

use std::io;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};

/// How a supervised process ended
#[derive(Debug)]
pub enum WaitOutcome {
    Exited {
        /// Exit code, -1 when terminated by a signal
        code: i32,
        stdout: Vec<u8>,
        stderr: Vec<u8>,
    },
    TimedOut,
}

/// Handle to a running extraction tool process
pub struct ToolProcess {
    child: Child,
    program: String,
}

impl ToolProcess {
    /// Spawn `program` with `args`, stdout and stderr piped
    pub fn spawn(program: &str, args: &[String]) -> io::Result<Self> {
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        tracing::debug!(program, pid = child.id(), "spawned extraction tool");

        Ok(Self {
            child,
            program: program.to_string(),
        })
    }

    /// Wait for exit, collecting output, or kill the process once
    /// `limit` has elapsed.
    pub async fn wait(mut self, limit: Duration) -> io::Result<WaitOutcome> {
        let stdout = self.child.stdout.take();
        let stderr = self.child.stderr.take();

        let collected =
            tokio::time::timeout(limit, collect(&mut self.child, stdout, stderr)).await;

        match collected {
            Ok(result) => {
                let (status, stdout, stderr) = result?;
                Ok(WaitOutcome::Exited {
                    code: status.code().unwrap_or(-1),
                    stdout,
                    stderr,
                })
            }
            Err(_) => {
                tracing::warn!(
                    program = %self.program,
                    timeout_secs = limit.as_secs_f64(),
                    "extraction tool timed out, killing"
                );
                if let Err(e) = self.child.start_kill() {
                    tracing::debug!("kill failed (already exited?): {}", e);
                }
                // Reap so no zombie is left behind
                let _ = self.child.wait().await;
                Ok(WaitOutcome::TimedOut)
            }
        }
    }
}

async fn read_all<R: AsyncRead + Unpin>(pipe: Option<R>) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        pipe.read_to_end(&mut buf).await?;
    }
    Ok(buf)
}

async fn collect<O, E>(
    child: &mut Child,
    stdout: Option<O>,
    stderr: Option<E>,
) -> io::Result<(ExitStatus, Vec<u8>, Vec<u8>)>
where
    O: AsyncRead + Unpin,
    E: AsyncRead + Unpin,
{
    let (stdout, stderr, status) = tokio::join!(read_all(stdout), read_all(stderr), child.wait());
    Ok((status?, stdout?, stderr?))
}
