//! Child processes with a deadline and a cap on captured output.
//!
//! Both the executor and the validator shell out through [`run_bounded`].

use std::fmt::Write as _;
use std::io::{Read, Write};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};
use wait_timeout::ChildExt;

/// How long a child may run and how much of each stream is kept.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub timeout: Duration,
    pub output_limit_bytes: usize,
}

/// The kept prefix of one output stream and the count of bytes past the cap.
#[derive(Debug, Default)]
pub struct Captured {
    pub bytes: Vec<u8>,
    pub dropped: usize,
}

impl Captured {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

#[derive(Debug)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    pub stdout: Captured,
    pub stderr: Captured,
    pub timed_out: bool,
}

impl ProcessOutput {
    pub fn succeeded(&self) -> bool {
        !self.timed_out && self.status.success()
    }

    /// Human-readable record of both streams, for log files.
    pub fn transcript(&self, label: &str) -> String {
        let mut out = String::new();
        for (name, stream) in [("stdout", &self.stdout), ("stderr", &self.stderr)] {
            let _ = writeln!(out, "--- {label} {name} ---");
            out.push_str(&String::from_utf8_lossy(&stream.bytes));
            if !out.ends_with('\n') {
                out.push('\n');
            }
            if stream.dropped > 0 {
                let _ = writeln!(out, "({} more bytes not kept)", stream.dropped);
            }
        }
        let _ = match self.status.code() {
            _ if self.timed_out => writeln!(out, "--- {label} killed after timeout ---"),
            Some(code) => writeln!(out, "--- {label} exit {code} ---"),
            None => writeln!(out, "--- {label} terminated by signal ---"),
        };
        out
    }
}

/// Run `cmd`, feeding it `stdin`, and wait at most `limits.timeout`.
///
/// Streams are pumped on scoped threads while the child runs, so neither a
/// large request nor a chatty child can stall on a full pipe. A child that
/// outlives the deadline is killed and reported with `timed_out` set.
#[instrument(skip_all, fields(timeout_secs = limits.timeout.as_secs()))]
pub fn run_bounded(mut cmd: Command, stdin: Option<&[u8]>, limits: Limits) -> Result<ProcessOutput> {
    cmd.stdin(if stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    })
    .stdout(Stdio::piped())
    .stderr(Stdio::piped());

    let mut child = cmd.spawn().context("spawn command")?;
    debug!(pid = child.id(), "child started");

    let stdout_pipe = child.stdout.take().ok_or_else(|| anyhow!("stdout not piped"))?;
    let stderr_pipe = child.stderr.take().ok_or_else(|| anyhow!("stderr not piped"))?;
    let stdin_pipe = child.stdin.take();
    let cap = limits.output_limit_bytes;

    let (waited, stdout, stderr) = thread::scope(|scope| {
        let out = scope.spawn(move || capture(stdout_pipe, cap));
        let err = scope.spawn(move || capture(stderr_pipe, cap));
        if let (Some(mut pipe), Some(input)) = (stdin_pipe, stdin) {
            scope.spawn(move || {
                // Dropping the pipe afterwards signals EOF.
                if let Err(e) = pipe.write_all(input) {
                    debug!(err = %e, "child closed stdin early");
                }
            });
        }

        let waited = wait_or_kill(&mut child, limits.timeout);
        let stdout = out.join().map_err(|_| anyhow!("stdout reader panicked"));
        let stderr = err.join().map_err(|_| anyhow!("stderr reader panicked"));
        (waited, stdout, stderr)
    });
    let (status, timed_out) = waited?;
    let stdout = stdout??;
    let stderr = stderr??;

    if stdout.dropped > 0 || stderr.dropped > 0 {
        warn!(
            stdout_dropped = stdout.dropped,
            stderr_dropped = stderr.dropped,
            "child output exceeded the cap"
        );
    }
    debug!(exit_code = ?status.code(), timed_out, "child finished");
    Ok(ProcessOutput {
        status,
        stdout,
        stderr,
        timed_out,
    })
}

fn wait_or_kill(child: &mut std::process::Child, timeout: Duration) -> Result<(ExitStatus, bool)> {
    if let Some(status) = child.wait_timeout(timeout).context("wait for child")? {
        return Ok((status, false));
    }
    warn!(timeout_secs = timeout.as_secs(), "child timed out, killing");
    child.kill().context("kill child")?;
    let status = child.wait().context("reap killed child")?;
    Ok((status, true))
}

fn capture(mut reader: impl Read, cap: usize) -> Result<Captured> {
    let mut captured = Captured::default();
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).context("read child output")?;
        if n == 0 {
            return Ok(captured);
        }
        let keep = n.min(cap.saturating_sub(captured.bytes.len()));
        captured.bytes.extend_from_slice(&chunk[..keep]);
        captured.dropped += n - keep;
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    fn limits(timeout: Duration, output_limit_bytes: usize) -> Limits {
        Limits {
            timeout,
            output_limit_bytes,
        }
    }

    #[test]
    fn stdin_is_delivered_and_echoed() {
        let output = run_bounded(
            sh("cat"),
            Some(b"hello".as_slice()),
            limits(Duration::from_secs(10), 1000),
        )
        .expect("run");
        assert!(output.succeeded());
        assert_eq!(output.stdout.text(), "hello");
    }

    #[test]
    fn output_past_the_cap_is_counted_not_kept() {
        let output = run_bounded(
            sh("printf 0123456789; printf oops >&2; exit 3"),
            None,
            limits(Duration::from_secs(10), 4),
        )
        .expect("run");
        assert_eq!(output.stdout.bytes, b"0123");
        assert_eq!(output.stdout.dropped, 6);
        assert_eq!(output.stderr.text(), "oops");
        assert!(!output.succeeded());

        let transcript = output.transcript("check");
        assert!(transcript.contains("(6 more bytes not kept)"));
        assert!(transcript.contains("--- check exit 3 ---"));
    }

    #[test]
    fn overdue_child_is_killed() {
        let output = run_bounded(
            sh("exec sleep 5"),
            None,
            limits(Duration::from_millis(200), 100),
        )
        .expect("run");
        assert!(output.timed_out);
        assert!(!output.succeeded());
        assert!(output.transcript("slow").contains("killed after timeout"));
    }
}
