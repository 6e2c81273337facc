//! Child process execution with a deadline and capped output capture.
//!
//! Every pipe (stdin, stdout, stderr) is serviced on its own thread, so a
//! child that ignores its input or floods one stream cannot stall the
//! deadline. On Unix the child leads its own process group and the whole
//! group is killed on timeout, so descendants holding the output pipes go
//! with it. Readers still open after [`DRAIN_GRACE`] are abandoned and the
//! bytes captured so far are returned.

use std::io::{ErrorKind, Read, Write};
use std::mem;
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow, bail};
use tracing::{debug, instrument, warn};
use wait_timeout::ChildExt;

/// How long readers may keep draining after the child has exited or been killed.
pub const DRAIN_GRACE: Duration = Duration::from_secs(2);

const READ_CHUNK: usize = 8192;

/// Bytes kept from one output stream.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Captured {
    pub bytes: Vec<u8>,
    /// Bytes read past the cap and discarded.
    pub dropped: usize,
}

impl Captured {
    /// Lossy UTF-8 text, with a marker when bytes were dropped.
    pub fn lossy(&self, label: &str) -> String {
        let text = String::from_utf8_lossy(&self.bytes);
        if self.dropped == 0 {
            return text.into_owned();
        }
        format!("{text}\n[{label} truncated {} bytes]\n", self.dropped)
    }

    fn push(&mut self, chunk: &[u8], limit: usize) {
        let keep = chunk.len().min(limit.saturating_sub(self.bytes.len()));
        self.bytes.extend_from_slice(&chunk[..keep]);
        self.dropped += chunk.len() - keep;
    }
}

#[derive(Debug)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    pub stdout: Captured,
    pub stderr: Captured,
    /// The deadline elapsed and the child was killed.
    pub timed_out: bool,
}

impl ProcessOutput {
    pub fn stdout_lossy(&self) -> String {
        self.stdout.lossy("stdout")
    }

    pub fn stderr_lossy(&self) -> String {
        self.stderr.lossy("stderr")
    }

    /// Stdout followed by stderr, for diagnostics.
    pub fn combined_lossy(&self) -> String {
        format!("{}{}", self.stdout_lossy(), self.stderr_lossy())
    }
}

/// Spawn `cmd`, feed it `stdin`, and wait at most `timeout`.
///
/// Each stream keeps at most `output_limit_bytes`; the rest is drained and
/// counted. A timeout is not an error: the child's process group is killed
/// and the output says so. The call returns within `timeout` plus
/// [`DRAIN_GRACE`] even when descendants keep the pipes open.
#[instrument(skip_all, fields(program = ?cmd.get_program(), timeout_secs = timeout.as_secs()))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<ProcessOutput> {
    cmd.stdin(if stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    })
    .stdout(Stdio::piped())
    .stderr(Stdio::piped());
    #[cfg(unix)]
    std::os::unix::process::CommandExt::process_group(&mut cmd, 0);

    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawn {:?}", cmd.get_program()))?;
    debug!(pid = child.id(), "child spawned");

    let stdout = StreamCapture::start(
        child.stdout.take().ok_or_else(|| anyhow!("stdout not piped"))?,
        output_limit_bytes,
    );
    let stderr = StreamCapture::start(
        child.stderr.take().ok_or_else(|| anyhow!("stderr not piped"))?,
        output_limit_bytes,
    );
    let writer = match (stdin, child.stdin.take()) {
        (Some(input), Some(pipe)) => Some(feed(pipe, input.to_vec())),
        _ => None,
    };

    let (status, timed_out) = match child.wait_timeout(timeout).context("wait for child")? {
        Some(status) => (status, false),
        None => {
            warn!("deadline elapsed, killing process group");
            kill_tree(&mut child);
            (child.wait().context("reap child")?, true)
        }
    };

    let drain_deadline = Instant::now() + DRAIN_GRACE;
    let (stdout, stdout_open) = stdout.finish(drain_deadline).context("read stdout")?;
    let (stderr, stderr_open) = stderr.finish(drain_deadline).context("read stderr")?;
    if stdout_open || stderr_open {
        warn!("descendants still hold the output pipes, killing process group");
        kill_tree(&mut child);
    }
    if let Some(writer) = writer
        && writer.is_finished()
    {
        join(writer, "stdin writer")?.context("write stdin")?;
    }

    if stdout.dropped > 0 || stderr.dropped > 0 {
        warn!(
            stdout_dropped = stdout.dropped,
            stderr_dropped = stderr.dropped,
            "output exceeded cap"
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

/// One output pipe read on a background thread into a shared buffer.
struct StreamCapture {
    captured: Arc<Mutex<Captured>>,
    done: Receiver<std::io::Result<()>>,
}

impl StreamCapture {
    fn start<R: Read + Send + 'static>(mut reader: R, limit: usize) -> Self {
        let captured = Arc::new(Mutex::new(Captured::default()));
        let (tx, done) = mpsc::channel();
        let sink = Arc::clone(&captured);
        thread::spawn(move || {
            let mut chunk = [0u8; READ_CHUNK];
            let result = loop {
                match reader.read(&mut chunk) {
                    Ok(0) => break Ok(()),
                    Ok(n) => match sink.lock() {
                        Ok(mut captured) => captured.push(&chunk[..n], limit),
                        Err(_) => break Ok(()),
                    },
                    Err(err) if err.kind() == ErrorKind::Interrupted => {}
                    Err(err) => break Err(err),
                }
            };
            tx.send(result).ok();
        });
        Self { captured, done }
    }

    /// Wait for EOF until `deadline`; returns what was captured and whether the pipe is still open.
    fn finish(self, deadline: Instant) -> Result<(Captured, bool)> {
        let still_open = match self
            .done
            .recv_timeout(deadline.saturating_duration_since(Instant::now()))
        {
            Ok(result) => {
                result?;
                false
            }
            Err(RecvTimeoutError::Timeout) => true,
            Err(RecvTimeoutError::Disconnected) => bail!("reader thread panicked"),
        };
        let mut captured = self
            .captured
            .lock()
            .map_err(|_| anyhow!("output buffer poisoned"))?;
        Ok((mem::take(&mut *captured), still_open))
    }
}

/// Kill the child's process group, then the child itself.
fn kill_tree(child: &mut Child) {
    #[cfg(unix)]
    {
        let group = format!("-{}", child.id());
        match Command::new("kill")
            .args(["-KILL", "--", &group])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
        {
            Ok(status) if !status.success() => {
                debug!(exit_code = ?status.code(), "process group already gone");
            }
            Ok(_) => {}
            Err(err) => warn!(err = %err, "could not signal process group"),
        }
    }
    if let Err(err) = child.kill() {
        debug!(err = %err, "child already exited");
    }
}

/// A child that exits without reading its input is reported through its status.
fn feed(mut pipe: ChildStdin, input: Vec<u8>) -> JoinHandle<std::io::Result<()>> {
    thread::spawn(move || match pipe.write_all(&input) {
        Err(err) if err.kind() == ErrorKind::BrokenPipe => Ok(()),
        other => other,
    })
}

fn join<T>(handle: JoinHandle<T>, name: &str) -> Result<T> {
    handle.join().map_err(|_| anyhow!("{name} thread panicked"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    fn run(script: &str, stdin: Option<&[u8]>, limit: usize) -> ProcessOutput {
        run_command_with_timeout(sh(script), stdin, Duration::from_secs(5), limit).expect("run")
    }

    #[test]
    fn separates_streams() {
        let output = run("printf trace; printf warning >&2", None, 1024);
        assert!(output.status.success());
        assert_eq!(output.stdout.bytes, b"trace");
        assert_eq!(output.stderr.bytes, b"warning");
        assert_eq!(output.combined_lossy(), "tracewarning");
    }

    #[test]
    fn prompt_reaches_stdin() {
        let output = run("cat", Some(b"/rwx:rwx"), 1024);
        assert_eq!(output.stdout_lossy(), "/rwx:rwx");
    }

    #[test]
    fn ignored_stdin_does_not_fail() {
        let prompt = vec![b'x'; 1 << 20];
        let output = run("exit 3", Some(&prompt), 1024);
        assert_eq!(output.status.code(), Some(3));
        assert!(!output.timed_out);
    }

    #[test]
    fn caps_each_stream() {
        let output = run("printf abcdef; printf 123456 >&2", None, 4);
        assert_eq!(
            output.stdout,
            Captured {
                bytes: b"abcd".to_vec(),
                dropped: 2
            }
        );
        assert_eq!(output.stderr.dropped, 2);
        assert!(output.stdout_lossy().ends_with("[stdout truncated 2 bytes]\n"));
    }

    #[test]
    fn deadline_kills_child() {
        let output = run_command_with_timeout(
            sh("printf started; exec sleep 5"),
            None,
            Duration::from_millis(200),
            1024,
        )
        .expect("run");
        assert!(output.timed_out);
        assert!(!output.status.success());
        assert_eq!(output.stdout.bytes, b"started");
    }

    #[test]
    fn deadline_kills_shell_and_its_children() {
        let started = Instant::now();
        let output = run_command_with_timeout(
            sh("sleep 4; echo done"),
            None,
            Duration::from_millis(200),
            1024,
        )
        .expect("run");
        assert!(output.timed_out);
        assert!(output.stdout.bytes.is_empty());
        assert!(started.elapsed() < Duration::from_secs(3), "{:?}", started.elapsed());
    }

    #[test]
    fn background_child_holding_pipes_is_abandoned() {
        let started = Instant::now();
        let output = run_command_with_timeout(
            sh("sleep 30 & echo started"),
            None,
            Duration::from_secs(5),
            1024,
        )
        .expect("run");
        assert!(output.status.success());
        assert!(!output.timed_out);
        assert_eq!(output.stdout_lossy(), "started\n");
        assert!(started.elapsed() < DRAIN_GRACE + Duration::from_secs(2));
    }

    #[test]
    fn missing_program_fails_to_spawn() {
        let err = run_command_with_timeout(
            Command::new("definitely-not-a-real-binary-4821"),
            None,
            Duration::from_secs(1),
            1024,
        )
        .expect_err("spawn fails");
        assert!(format!("{err:#}").contains("spawn"));
    }
}
