//! Completion watcher for one child process.
//!
//! The watcher owns the [`Child`]. Capture tasks drain stdout and stderr
//! into the console buffer while the watcher applies termination requests
//! forwarded by the owning instance. Once the process has been reaped the
//! watcher waits at most [`OUTPUT_DRAIN_GRACE`] for the streams to close and
//! then resolves to an [`ExitReport`]. A descendant that inherited the pipes
//! keeps its capture task alive in the background; it never delays the exit.
//!
//! Signals are only ever delivered by the watcher, so a request can never
//! reach a reaped (and possibly recycled) PID.

use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn, Instrument};

/// Longest wait for output to reach end-of-file after the process exits.
pub const OUTPUT_DRAIN_GRACE: Duration = Duration::from_secs(1);

use super::console::ConsoleBuffer;

/// How the owning instance wants the process to end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationRequest {
    /// Polite request (`SIGTERM` on Unix).
    Graceful,
    /// Unconditional kill.
    Forceful,
}

/// Final result of a watched process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitReport {
    /// Exit code; `None` when terminated by a signal or when waiting failed.
    pub code: Option<i32>,
    /// Whether the process exited with code zero.
    pub success: bool,
}

impl ExitReport {
    fn from_wait(result: std::io::Result<ExitStatus>) -> Self {
        match result {
            Ok(status) => Self {
                code: status.code(),
                success: status.success(),
            },
            Err(err) => {
                warn!(%err, "error waiting for child process");
                Self {
                    code: None,
                    success: false,
                }
            }
        }
    }
}

/// Drive `child` to completion.
///
/// Returns once the exit status has been collected and the output streams
/// have closed, or [`OUTPUT_DRAIN_GRACE`] after the exit if they have not.
pub async fn supervise(
    mut child: Child,
    console: Arc<ConsoleBuffer>,
    mut requests: mpsc::UnboundedReceiver<TerminationRequest>,
) -> ExitReport {
    let pid = child.id();
    let capture = [
        spawn_capture(child.stdout.take(), &console, "stdout"),
        spawn_capture(child.stderr.take(), &console, "stderr"),
    ];

    let report = loop {
        tokio::select! {
            result = child.wait() => break ExitReport::from_wait(result),
            Some(request) = requests.recv() => deliver(&mut child, pid, request),
        }
    };

    drain(capture).await;
    report
}

fn spawn_capture<R>(
    stream: Option<R>,
    console: &Arc<ConsoleBuffer>,
    name: &'static str,
) -> Option<JoinHandle<()>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let stream = stream?;
    let console = Arc::clone(console);
    Some(tokio::spawn(
        capture_stream(stream, console, name).in_current_span(),
    ))
}

/// Wait for the capture tasks, bounded by [`OUTPUT_DRAIN_GRACE`].
///
/// Handles left over on timeout are dropped, which detaches their tasks.
async fn drain(capture: [Option<JoinHandle<()>>; 2]) {
    let finished = async {
        for handle in capture.into_iter().flatten() {
            if let Err(err) = handle.await {
                warn!(%err, "console capture task failed");
            }
        }
    };
    if tokio::time::timeout(OUTPUT_DRAIN_GRACE, finished).await.is_err() {
        debug!("output still open after exit; capture continues in background");
    }
}

fn deliver(child: &mut Child, pid: Option<u32>, request: TerminationRequest) {
    match request {
        TerminationRequest::Graceful => send_graceful(child, pid),
        TerminationRequest::Forceful => {
            if let Err(err) = child.start_kill() {
                warn!(?pid, %err, "failed to force kill process");
            }
        }
    }
}

#[cfg(unix)]
fn send_graceful(_child: &mut Child, pid: Option<u32>) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(raw) = pid.and_then(|p| i32::try_from(p).ok()) else {
        warn!(?pid, "no usable pid for graceful termination");
        return;
    };
    if let Err(err) = kill(Pid::from_raw(raw), Signal::SIGTERM) {
        warn!(pid = raw, %err, "failed to send SIGTERM");
    }
}

#[cfg(not(unix))]
fn send_graceful(child: &mut Child, pid: Option<u32>) {
    // No polite termination signal off Unix.
    if let Err(err) = child.start_kill() {
        warn!(?pid, %err, "failed to terminate process");
    }
}

async fn capture_stream<R>(stream: R, console: Arc<ConsoleBuffer>, name: &'static str)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => console.push(decode_line(&buf)),
            Err(err) => {
                debug!(stream = name, %err, "console capture stopped");
                break;
            }
        }
    }
}

/// Strip the line terminator and decode lossily.
#[must_use]
pub fn decode_line(raw: &[u8]) -> String {
    let mut end = raw.len();
    if end > 0 && raw[end - 1] == b'\n' {
        end -= 1;
    }
    if end > 0 && raw[end - 1] == b'\r' {
        end -= 1;
    }
    String::from_utf8_lossy(&raw[..end]).into_owned()
}
