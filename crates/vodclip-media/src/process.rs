//! Supervised FFmpeg process.
//!
//! One supervisor task owns the child for its whole life. It races the
//! child's exit against cancellation and the first-byte watchdog, then
//! publishes exactly one [`ProcessOutcome`]. Output bytes flow through a
//! capacity-1 channel so a slow consumer stalls the stdout reader, which in
//! turn blocks the tool on its pipe.

use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use futures_util::Stream;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::command::FfmpegCommand;
use crate::error::{MediaError, MediaResult};
use crate::progress::{FfmpegProgress, ProgressParser, StderrLine};

/// Default cap on captured diagnostic text.
pub const DEFAULT_DIAGNOSTIC_LIMIT: usize = 2000;
/// Default stdout read size.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// How to launch and supervise the tool.
#[derive(Debug, Clone)]
pub struct ProcessOptions {
    /// FFmpeg binary
    pub program: PathBuf,
    /// First-byte deadline; `None` disables the watchdog
    pub watchdog: Option<Duration>,
    /// Whether the caller expects media on stdout
    pub expects_stdout: bool,
    pub chunk_size: usize,
    pub diagnostic_limit: usize,
}

impl ProcessOptions {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            watchdog: None,
            expects_stdout: true,
            chunk_size: DEFAULT_CHUNK_SIZE,
            diagnostic_limit: DEFAULT_DIAGNOSTIC_LIMIT,
        }
    }

    pub fn with_watchdog(mut self, watchdog: Option<Duration>) -> Self {
        self.watchdog = watchdog;
        self
    }

    pub fn with_expects_stdout(mut self, expects_stdout: bool) -> Self {
        self.expects_stdout = expects_stdout;
        self
    }
}

/// Events emitted while the tool runs.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessEvent {
    /// A `-progress` block completed
    Progress(FfmpegProgress),
    /// The first stdout byte arrived
    FirstOutput,
    /// The process is gone; always the last event
    Finished(ProcessOutcome),
}

/// Why the tool failed.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolFailure {
    /// Exited before any byte reached the caller
    ZeroOutput {
        exit_code: Option<i32>,
        diagnostic: String,
    },
    /// Exited abnormally after output had started
    MidStream {
        exit_code: Option<i32>,
        bytes_out: u64,
        diagnostic: String,
    },
}

impl ToolFailure {
    pub fn diagnostic(&self) -> &str {
        match self {
            ToolFailure::ZeroOutput { diagnostic, .. } => diagnostic,
            ToolFailure::MidStream { diagnostic, .. } => diagnostic,
        }
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ToolFailure::ZeroOutput { exit_code, .. } => *exit_code,
            ToolFailure::MidStream { exit_code, .. } => *exit_code,
        }
    }
}

/// Final result of one supervised run.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    Completed { bytes_out: u64 },
    Failed(ToolFailure),
    /// Killed by the watchdog
    Stalled { after: Duration },
    /// Killed on request or because the consumer went away
    Cancelled,
}

impl ProcessOutcome {
    /// Convert a non-success outcome into an error.
    pub fn into_result(self) -> MediaResult<u64> {
        match self {
            ProcessOutcome::Completed { bytes_out } => Ok(bytes_out),
            ProcessOutcome::Failed(failure) => {
                let message = match &failure {
                    ToolFailure::ZeroOutput { .. } => "FFmpeg exited without producing output",
                    ToolFailure::MidStream { .. } => "FFmpeg failed mid-stream",
                };
                let diagnostic = failure.diagnostic();
                Err(MediaError::ffmpeg_failed(
                    message,
                    (!diagnostic.is_empty()).then(|| diagnostic.to_string()),
                    failure.exit_code(),
                ))
            }
            ProcessOutcome::Stalled { after } => Err(MediaError::Stalled(after.as_secs())),
            ProcessOutcome::Cancelled => Err(MediaError::Cancelled),
        }
    }
}

/// Idempotent kill switch shared by everything that may cancel a job.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { tx: Arc::new(tx) }, rx)
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Receives the single outcome of a run.
#[derive(Debug, Clone)]
pub struct OutcomeWatch {
    rx: watch::Receiver<Option<ProcessOutcome>>,
}

impl OutcomeWatch {
    /// Wait for the outcome.
    pub async fn wait(&mut self) -> ProcessOutcome {
        match self.rx.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone().unwrap_or(ProcessOutcome::Cancelled),
            // Supervisor vanished without publishing; treat as killed.
            Err(_) => ProcessOutcome::Cancelled,
        }
    }

    /// Outcome if already known.
    pub fn peek(&self) -> Option<ProcessOutcome> {
        self.rx.borrow().clone()
    }
}

/// Bounded diagnostic text that keeps the most recent lines.
#[derive(Debug)]
pub struct DiagnosticTail {
    text: String,
    limit: usize,
}

impl DiagnosticTail {
    pub fn new(limit: usize) -> Self {
        Self {
            text: String::new(),
            limit,
        }
    }

    pub fn push_line(&mut self, line: &str) {
        let line = line.trim_end();
        if line.is_empty() {
            return;
        }
        if !self.text.is_empty() {
            self.text.push('\n');
        }
        self.text.push_str(line);

        if self.text.len() > self.limit {
            let mut cut = self.text.len() - self.limit;
            while !self.text.is_char_boundary(cut) {
                cut += 1;
            }
            self.text.drain(..cut);
        }
    }

    pub fn into_string(self) -> String {
        self.text
    }
}

/// Streamed tool output.
///
/// Dropping it before the end cancels the run, so a caller disconnect
/// kills the tool even while it is not writing.
pub struct OutputStream {
    rx: mpsc::Receiver<Bytes>,
    cancel: CancelHandle,
    finished: bool,
}

impl OutputStream {
    pub async fn next_chunk(&mut self) -> Option<Bytes> {
        let chunk = self.rx.recv().await;
        if chunk.is_none() {
            self.finished = true;
        }
        chunk
    }
}

impl Stream for OutputStream {
    type Item = Bytes;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Bytes>> {
        let poll = self.rx.poll_recv(cx);
        if let Poll::Ready(None) = poll {
            self.finished = true;
        }
        poll
    }
}

impl Drop for OutputStream {
    fn drop(&mut self) {
        if !self.finished {
            debug!("Output consumer dropped before end of stream, cancelling");
            self.cancel.cancel();
        }
    }
}

/// A launched, supervised FFmpeg process.
pub struct ClipProcess {
    pid: Option<u32>,
    events: mpsc::UnboundedReceiver<ProcessEvent>,
    output: Option<OutputStream>,
    outcome: OutcomeWatch,
    cancel: CancelHandle,
}

impl ClipProcess {
    /// Launch the tool and start supervising it.
    ///
    /// Spawn failures are reported here; everything after is reported
    /// through [`ProcessEvent`]s and the outcome.
    pub fn spawn(cmd: &FfmpegCommand, options: ProcessOptions) -> MediaResult<Self> {
        let args = cmd.build_args();
        debug!("Running FFmpeg: {} {}", options.program.display(), args.join(" "));

        let mut child = Command::new(&options.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    MediaError::FfmpegNotFound
                } else {
                    MediaError::SpawnFailed(e.to_string())
                }
            })?;

        let pid = child.id();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MediaError::internal("stdout not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| MediaError::internal("stderr not captured"))?;

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (output_tx, output_rx) = mpsc::channel::<Bytes>(1);
        let (outcome_tx, outcome_rx) = watch::channel(None);
        let (first_tx, first_rx) = oneshot::channel();
        let (cancel, cancel_rx) = CancelHandle::new();

        let stdout_task = tokio::spawn(pump_stdout(
            stdout,
            output_tx,
            first_tx,
            event_tx.clone(),
            options.chunk_size,
        ));
        let stderr_task = tokio::spawn(pump_stderr(
            stderr,
            event_tx.clone(),
            options.diagnostic_limit,
        ));

        tokio::spawn(supervise(Supervisor {
            child,
            pid,
            cancel_rx,
            first_rx,
            watchdog: options.watchdog,
            expects_stdout: options.expects_stdout,
            stdout_task,
            stderr_task,
            events: event_tx,
            outcome: outcome_tx,
        }));

        info!(pid = ?pid, "FFmpeg started");

        Ok(Self {
            pid,
            events: event_rx,
            output: Some(OutputStream {
                rx: output_rx,
                cancel: cancel.clone(),
                finished: false,
            }),
            outcome: OutcomeWatch { rx: outcome_rx },
            cancel,
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Take the stdout stream. Only the first call returns it.
    pub fn take_output(&mut self) -> Option<OutputStream> {
        self.output.take()
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn outcome(&self) -> OutcomeWatch {
        self.outcome.clone()
    }

    /// Next event; `None` after [`ProcessEvent::Finished`].
    pub async fn next_event(&mut self) -> Option<ProcessEvent> {
        self.events.recv().await
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct PumpResult {
    bytes_out: u64,
    consumer_gone: bool,
}

async fn pump_stdout<R: AsyncRead + Unpin>(
    mut stdout: R,
    output: mpsc::Sender<Bytes>,
    first_tx: oneshot::Sender<()>,
    events: mpsc::UnboundedSender<ProcessEvent>,
    chunk_size: usize,
) -> PumpResult {
    let mut first_tx = Some(first_tx);
    let mut result = PumpResult::default();

    loop {
        let mut buf = BytesMut::with_capacity(chunk_size);
        match stdout.read_buf(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if let Some(tx) = first_tx.take() {
                    let _ = tx.send(());
                    let _ = events.send(ProcessEvent::FirstOutput);
                }
                result.bytes_out += n as u64;
                if output.send(buf.freeze()).await.is_err() {
                    result.consumer_gone = true;
                    break;
                }
            }
            Err(e) => {
                warn!("Failed to read FFmpeg stdout: {}", e);
                break;
            }
        }
    }

    result
}

async fn pump_stderr<R: AsyncRead + Unpin>(
    mut stderr: R,
    events: mpsc::UnboundedSender<ProcessEvent>,
    diagnostic_limit: usize,
) -> String {
    let mut parser = ProgressParser::new();
    let mut diagnostic = DiagnosticTail::new(diagnostic_limit);
    let mut buf = vec![0u8; 8 * 1024];

    let handle = |line: StderrLine, diagnostic: &mut DiagnosticTail| match line {
        StderrLine::Progress(progress) => {
            let _ = events.send(ProcessEvent::Progress(progress));
        }
        StderrLine::ProgressField => {}
        StderrLine::Diagnostic(text) => {
            debug!(target: "vodclip_media::ffmpeg", "{}", text);
            diagnostic.push_line(&text);
        }
    };

    loop {
        match stderr.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                for line in parser.feed(&buf[..n]) {
                    handle(line, &mut diagnostic);
                }
            }
            Err(e) => {
                warn!("Failed to read FFmpeg stderr: {}", e);
                break;
            }
        }
    }
    if let Some(line) = parser.finish() {
        handle(line, &mut diagnostic);
    }

    diagnostic.into_string()
}

struct Supervisor {
    child: Child,
    pid: Option<u32>,
    cancel_rx: watch::Receiver<bool>,
    first_rx: oneshot::Receiver<()>,
    watchdog: Option<Duration>,
    expects_stdout: bool,
    stdout_task: tokio::task::JoinHandle<PumpResult>,
    stderr_task: tokio::task::JoinHandle<String>,
    events: mpsc::UnboundedSender<ProcessEvent>,
    outcome: watch::Sender<Option<ProcessOutcome>>,
}

enum Exit {
    Exited(std::io::Result<std::process::ExitStatus>),
    Cancelled,
    Stalled(Duration),
}

async fn supervise(sv: Supervisor) {
    let Supervisor {
        mut child,
        pid,
        mut cancel_rx,
        mut first_rx,
        watchdog,
        expects_stdout,
        stdout_task,
        stderr_task,
        events,
        outcome,
    } = sv;

    let started = Instant::now();
    let mut watchdog_armed = watchdog.is_some();
    let mut awaiting_first = true;
    let mut cancel_open = true;
    let deadline = tokio::time::sleep(watchdog.unwrap_or_default());
    tokio::pin!(deadline);

    let exit = loop {
        tokio::select! {
            biased;

            changed = cancel_rx.changed(), if cancel_open => {
                match changed {
                    Ok(()) if *cancel_rx.borrow() => {
                        info!(pid = ?pid, "Cancelling FFmpeg");
                        kill(&mut child).await;
                        break Exit::Cancelled;
                    }
                    Ok(()) => {}
                    Err(_) => cancel_open = false,
                }
            }

            first = &mut first_rx, if awaiting_first => {
                awaiting_first = false;
                if first.is_ok() {
                    watchdog_armed = false;
                }
            }

            _ = &mut deadline, if watchdog_armed => {
                watchdog_armed = false;
                let after = watchdog.unwrap_or_default();
                warn!(pid = ?pid, "FFmpeg produced no output within {:?}, killing", after);
                kill(&mut child).await;
                break Exit::Stalled(after);
            }

            status = child.wait() => break Exit::Exited(status),
        }
    };

    // Pipes close once the process is gone; the stdout pump may still be
    // handing its last chunk to the consumer.
    let pump = stdout_task.await.unwrap_or_default();
    let diagnostic = stderr_task.await.unwrap_or_default();

    let result = match exit {
        Exit::Cancelled => ProcessOutcome::Cancelled,
        Exit::Stalled(after) => ProcessOutcome::Stalled { after },
        _ if pump.consumer_gone => ProcessOutcome::Cancelled,
        Exit::Exited(Ok(status)) => {
            let exit_code = status.code();
            if status.success() && (pump.bytes_out > 0 || !expects_stdout) {
                ProcessOutcome::Completed {
                    bytes_out: pump.bytes_out,
                }
            } else if pump.bytes_out == 0 {
                ProcessOutcome::Failed(ToolFailure::ZeroOutput {
                    exit_code,
                    diagnostic,
                })
            } else {
                ProcessOutcome::Failed(ToolFailure::MidStream {
                    exit_code,
                    bytes_out: pump.bytes_out,
                    diagnostic,
                })
            }
        }
        Exit::Exited(Err(e)) => ProcessOutcome::Failed(ToolFailure::ZeroOutput {
            exit_code: None,
            diagnostic: format!("failed to wait for FFmpeg: {}", e),
        }),
    };

    info!(
        pid = ?pid,
        elapsed_ms = started.elapsed().as_millis() as u64,
        bytes_out = pump.bytes_out,
        outcome = ?result,
        "FFmpeg finished"
    );

    outcome.send_replace(Some(result.clone()));
    let _ = events.send(ProcessEvent::Finished(result));
}

/// Kill and reap; an already-exited child is fine.
async fn kill(child: &mut Child) {
    if let Err(e) = child.kill().await {
        debug!("Kill ignored: {}", e);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::command::OutputTarget;
    use futures_util::StreamExt;
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;

    /// Write an executable shell script standing in for FFmpeg.
    fn fake_tool(dir: &tempfile::TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("fake-ffmpeg");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "#!/bin/sh\n{}", body).unwrap();
        let mut perms = file.metadata().unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }

    fn cmd() -> FfmpegCommand {
        FfmpegCommand::new("http://origin/a/index.m3u8", OutputTarget::Pipe)
    }

    #[test]
    fn test_diagnostic_tail_keeps_latest() {
        let mut tail = DiagnosticTail::new(16);
        tail.push_line("first line that is long");
        tail.push_line("HTTP error 404");
        let text = tail.into_string();
        assert!(text.len() <= 16);
        assert!(text.ends_with("HTTP error 404"));
    }

    #[test]
    fn test_diagnostic_tail_char_boundary() {
        let mut tail = DiagnosticTail::new(5);
        tail.push_line("ééééé");
        let text = tail.into_string();
        assert!(text.len() <= 5);
        assert!(text.chars().all(|c| c == 'é'));
    }

    #[test]
    fn test_outcome_into_result() {
        assert_eq!(
            ProcessOutcome::Completed { bytes_out: 3 }.into_result().unwrap(),
            3
        );
        let err = ProcessOutcome::Failed(ToolFailure::ZeroOutput {
            exit_code: Some(1),
            diagnostic: "boom".to_string(),
        })
        .into_result()
        .unwrap_err();
        assert!(matches!(
            err,
            MediaError::FfmpegFailed { stderr: Some(ref s), exit_code: Some(1), .. } if s == "boom"
        ));
        assert!(matches!(
            ProcessOutcome::Stalled { after: Duration::from_secs(20) }.into_result(),
            Err(MediaError::Stalled(20))
        ));
    }

    #[tokio::test]
    async fn test_streams_output_and_progress() {
        let dir = tempfile::tempdir().unwrap();
        let tool = fake_tool(
            &dir,
            "printf 'out_time_us=500000\\nprogress=continue\\n' >&2\n\
             printf 'hello '\n\
             printf 'out_time_us=1000000\\nprogress=end\\n' >&2\n\
             printf 'world'",
        );

        let mut process = ClipProcess::spawn(&cmd(), ProcessOptions::new(tool)).unwrap();
        let output = process.take_output().unwrap();
        let outcome = process.outcome();

        let body: Vec<u8> = output.map(|b| b.to_vec()).concat().await;
        assert_eq!(body, b"hello world");

        let mut progress = Vec::new();
        let mut finished = None;
        while let Some(event) = process.next_event().await {
            match event {
                ProcessEvent::Progress(p) => progress.push(p),
                ProcessEvent::Finished(o) => finished = Some(o),
                ProcessEvent::FirstOutput => {}
            }
        }

        assert_eq!(finished, Some(ProcessOutcome::Completed { bytes_out: 11 }));
        assert_eq!(outcome.peek(), finished);
        assert_eq!(progress.len(), 2);
        assert!(progress[1].is_complete);
        assert_eq!(progress[1].processed_ms(), 1000);
    }

    #[tokio::test]
    async fn test_zero_output_failure_captures_diagnostic() {
        let dir = tempfile::tempdir().unwrap();
        let tool = fake_tool(
            &dir,
            "echo '[https @ 0x1] HTTP error 404 Not Found' >&2\n\
             echo 'out_time_us=0' >&2\n\
             exit 8",
        );

        let mut process = ClipProcess::spawn(&cmd(), ProcessOptions::new(tool)).unwrap();
        let mut output = process.take_output().unwrap();
        assert!(output.next_chunk().await.is_none());

        match process.outcome().wait().await {
            ProcessOutcome::Failed(ToolFailure::ZeroOutput {
                exit_code,
                diagnostic,
            }) => {
                assert_eq!(exit_code, Some(8));
                assert_eq!(diagnostic, "[https @ 0x1] HTTP error 404 Not Found");
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_mid_stream_failure() {
        let dir = tempfile::tempdir().unwrap();
        let tool = fake_tool(&dir, "printf 'partial'\necho 'broken pipe' >&2\nexit 1");

        let mut process = ClipProcess::spawn(&cmd(), ProcessOptions::new(tool)).unwrap();
        let output = process.take_output().unwrap();
        let body: Vec<u8> = output.map(|b| b.to_vec()).concat().await;
        assert_eq!(body, b"partial");

        assert!(matches!(
            process.outcome().wait().await,
            ProcessOutcome::Failed(ToolFailure::MidStream { bytes_out: 7, .. })
        ));
    }

    #[tokio::test]
    async fn test_success_without_output_is_zero_output_failure() {
        let dir = tempfile::tempdir().unwrap();
        let tool = fake_tool(&dir, "exit 0");

        let mut process = ClipProcess::spawn(&cmd(), ProcessOptions::new(tool)).unwrap();
        let _output = process.take_output();
        assert!(matches!(
            process.outcome().wait().await,
            ProcessOutcome::Failed(ToolFailure::ZeroOutput { exit_code: Some(0), .. })
        ));
    }

    #[tokio::test]
    async fn test_file_output_completes_without_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let tool = fake_tool(&dir, "exit 0");

        let process = ClipProcess::spawn(
            &cmd(),
            ProcessOptions::new(tool).with_expects_stdout(false),
        )
        .unwrap();
        assert_eq!(
            process.outcome().wait().await,
            ProcessOutcome::Completed { bytes_out: 0 }
        );
    }

    #[tokio::test]
    async fn test_watchdog_kills_silent_process() {
        let dir = tempfile::tempdir().unwrap();
        let tool = fake_tool(&dir, "exec sleep 30");

        let started = Instant::now();
        let mut process = ClipProcess::spawn(
            &cmd(),
            ProcessOptions::new(tool).with_watchdog(Some(Duration::from_millis(200))),
        )
        .unwrap();
        let _output = process.take_output();

        assert_eq!(
            process.outcome().wait().await,
            ProcessOutcome::Stalled {
                after: Duration::from_millis(200)
            }
        );
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_watchdog_disarmed_by_first_byte() {
        let dir = tempfile::tempdir().unwrap();
        let tool = fake_tool(&dir, "printf 'x'\nsleep 1\nprintf 'y'");

        let mut process = ClipProcess::spawn(
            &cmd(),
            ProcessOptions::new(tool).with_watchdog(Some(Duration::from_millis(300))),
        )
        .unwrap();
        let output = process.take_output().unwrap();
        let body: Vec<u8> = output.map(|b| b.to_vec()).concat().await;
        assert_eq!(body, b"xy");
        assert_eq!(
            process.outcome().wait().await,
            ProcessOutcome::Completed { bytes_out: 2 }
        );
    }

    #[tokio::test]
    async fn test_dropping_output_cancels() {
        let dir = tempfile::tempdir().unwrap();
        let tool = fake_tool(&dir, "exec sleep 30");

        let mut process = ClipProcess::spawn(&cmd(), ProcessOptions::new(tool)).unwrap();
        drop(process.take_output());

        assert_eq!(process.outcome().wait().await, ProcessOutcome::Cancelled);
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let tool = fake_tool(&dir, "exec sleep 30");

        let mut process = ClipProcess::spawn(&cmd(), ProcessOptions::new(tool)).unwrap();
        let _output = process.take_output();
        let cancel = process.cancel_handle();
        cancel.cancel();
        cancel.cancel();
        assert!(cancel.is_cancelled());
        assert_eq!(process.outcome().wait().await, ProcessOutcome::Cancelled);
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let result = ClipProcess::spawn(
            &cmd(),
            ProcessOptions::new("/nonexistent/path/to/ffmpeg"),
        );
        assert!(matches!(result, Err(MediaError::FfmpegNotFound)));
    }
}
