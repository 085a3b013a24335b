//! Child processes with a deadline and bounded output capture.

use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// How long output readers may run after a timed-out child is killed.
const KILL_GRACE: Duration = Duration::from_secs(2);

/// Captured child process output.
#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
    /// Exit code, `None` if the process was killed by a signal.
    pub exit_code: Option<i32>,
    /// Captured stdout, up to the limit.
    pub stdout: Vec<u8>,
    /// Captured stderr, up to the limit.
    pub stderr: Vec<u8>,
    /// Bytes of stdout discarded past the limit.
    pub stdout_truncated: usize,
    /// Bytes of stderr discarded past the limit.
    pub stderr_truncated: usize,
    /// Whether the deadline elapsed and the process was killed.
    pub timed_out: bool,
}

impl ProcessOutput {
    /// Returns true if the process exited with status 0.
    #[must_use]
    pub const fn success(&self) -> bool {
        matches!(self.exit_code, Some(0)) && !self.timed_out
    }

    /// Stdout as text.
    #[must_use]
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Diagnostic text: stderr, or stdout when stderr is empty.
    #[must_use]
    pub fn diagnostics(&self) -> String {
        let text = if self.stderr.iter().all(u8::is_ascii_whitespace) {
            &self.stdout
        } else {
            &self.stderr
        };
        String::from_utf8_lossy(text).trim().to_string()
    }
}

/// Runs a command until it exits or `timeout` elapses.
///
/// Output is drained concurrently so a chatty child cannot block on a full
/// pipe; bytes beyond `output_limit` are discarded. On timeout the child is
/// killed and reaped.
///
/// # Errors
///
/// Returns an error if the process cannot be spawned or waited on.
pub async fn run_with_timeout(
    mut cmd: Command,
    timeout: Duration,
    output_limit: usize,
) -> std::io::Result<ProcessOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!("Spawning {:?}", cmd.as_std().get_program());
    let mut child = cmd.spawn()?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| std::io::Error::other("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| std::io::Error::other("stderr was not piped"))?;

    let stdout_task = tokio::spawn(read_limited(stdout, output_limit));
    let stderr_task = tokio::spawn(read_limited(stderr, output_limit));

    let mut timed_out = false;
    let status = match tokio::time::timeout(timeout, child.wait()).await {
        Ok(status) => status?,
        Err(_) => {
            warn!("Process timed out after {}s, killing", timeout.as_secs());
            timed_out = true;
            child.kill().await?;
            child.wait().await?
        }
    };

    let (stdout, stdout_truncated) = join_output(stdout_task, timed_out).await?;
    let (stderr, stderr_truncated) = join_output(stderr_task, timed_out).await?;

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!("Process output truncated (stdout: {stdout_truncated}, stderr: {stderr_truncated} bytes)");
    }

    debug!("Process finished with {:?} (timed out: {timed_out})", status.code());
    Ok(ProcessOutput {
        exit_code: status.code(),
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
    })
}

/// Collects a reader task. After a kill, grandchildren may still hold the
/// pipes open, so the reader only gets a short grace period.
async fn join_output(
    mut task: JoinHandle<std::io::Result<(Vec<u8>, usize)>>,
    timed_out: bool,
) -> std::io::Result<(Vec<u8>, usize)> {
    if !timed_out {
        return task.await.map_err(std::io::Error::other)?;
    }
    match tokio::time::timeout(KILL_GRACE, &mut task).await {
        Ok(joined) => joined.map_err(std::io::Error::other)?,
        Err(_) => {
            task.abort();
            Ok((Vec::new(), 0))
        }
    }
}

async fn read_limited<R: AsyncRead + Unpin>(
    mut reader: R,
    limit: usize,
) -> std::io::Result<(Vec<u8>, usize)> {
    let mut kept = Vec::new();
    let mut truncated = 0;
    let mut buf = [0u8; 8192];

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        let room = limit.saturating_sub(kept.len());
        let take = n.min(room);
        kept.extend_from_slice(&buf[..take]);
        truncated += n - take;
    }

    Ok((kept, truncated))
}
