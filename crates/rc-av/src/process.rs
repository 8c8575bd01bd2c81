//! Encoder process runner.
//!
//! [`ProcessRunner::run`] spawns one encoder, forwards its stdout to a
//! [`ChunkSink`] chunk by chunk, and always leaves the child reaped or
//! killed when it returns. Standard error is drained by a separate task into
//! a bounded tail buffer that only ever surfaces in
//! [`Error::EncodeFailed`]; it is never forwarded to the consumer.
//!
//! The only suspension points are reading the next chunk, handing it to the
//! sink, and waiting for exit. Each of those races against caller
//! cancellation, consumer disconnect, and the wall-clock deadline.

use std::path::PathBuf;
use std::pin::Pin;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use bytes::BytesMut;
use rc_core::config::{TranscodeConfig, DEFAULT_CHUNK_SIZE};
use rc_core::{Error, Result};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::mpsc;
use tokio::time::{Instant, Sleep};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::sink::{ChannelSink, ChunkSink};
use crate::transcoder::TranscodeStream;

/// Chunks buffered between a background encode and its stream consumer.
pub(crate) const STREAM_BUFFER: usize = 8;

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Limits applied to every encode.
#[derive(Debug, Clone)]
pub struct TranscodeSettings {
    /// Wall-clock limit; expiry is reported as [`Error::Cancelled`].
    pub max_duration: Duration,
    /// How long to wait for a killed child to be reaped.
    pub kill_grace: Duration,
    /// Bytes of stderr retained for diagnostics.
    pub stderr_limit: usize,
    /// Read size for stdout.
    pub chunk_size: usize,
}

impl Default for TranscodeSettings {
    fn default() -> Self {
        Self::from(&TranscodeConfig::default())
    }
}

impl From<&TranscodeConfig> for TranscodeSettings {
    fn from(cfg: &TranscodeConfig) -> Self {
        Self {
            max_duration: Duration::from_secs(cfg.max_encode_secs),
            kill_grace: Duration::from_millis(cfg.kill_grace_ms),
            stderr_limit: cfg.stderr_buffer_bytes,
            chunk_size: if cfg.chunk_size == 0 { DEFAULT_CHUNK_SIZE } else { cfg.chunk_size },
        }
    }
}

// ---------------------------------------------------------------------------
// EncoderInvocation
// ---------------------------------------------------------------------------

/// A fully built encoder command line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EncoderInvocation {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl EncoderInvocation {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// File name of the program, for logs and error messages.
    pub fn program_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.program.to_string_lossy().to_string())
    }

    /// Shell-like rendering of the command line (for logs only).
    pub fn display(&self) -> String {
        let mut out = self.program.to_string_lossy().to_string();
        for arg in &self.args {
            out.push(' ');
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                out.push('"');
                out.push_str(arg);
                out.push('"');
            } else {
                out.push_str(arg);
            }
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Process handle
// ---------------------------------------------------------------------------

/// Lifecycle of one encoder process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ExitState {
    Running,
    Exited(i32),
    Killed,
    Failed(String),
}

/// Outcome of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub pid: Option<u32>,
    /// Bytes delivered to the sink.
    pub bytes: u64,
    pub exit: ExitState,
    pub elapsed: Duration,
}

/// Scoped ownership of a spawned encoder. Dropping it while the child is
/// still running kills the child.
struct ProcessHandle {
    child: Child,
    pid: Option<u32>,
    state: ExitState,
    name: String,
}

impl ProcessHandle {
    fn spawn(invocation: &EncoderInvocation) -> Result<Self> {
        let name = invocation.program_name();
        let child = Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::tool(&name, format!("failed to spawn: {e}")))?;

        Ok(Self {
            pid: child.id(),
            child,
            state: ExitState::Running,
            name,
        })
    }

    async fn wait(&mut self) -> std::io::Result<ExitStatus> {
        match self.child.wait().await {
            Ok(status) => {
                self.state = match status.code() {
                    Some(code) => ExitState::Exited(code),
                    None => ExitState::Killed,
                };
                Ok(status)
            }
            Err(e) => {
                self.state = ExitState::Failed(e.to_string());
                Err(e)
            }
        }
    }

    /// Kill the child and wait (bounded) for it to be reaped.
    async fn terminate(&mut self, grace: Duration) {
        if self.state != ExitState::Running {
            return;
        }
        if let Err(e) = self.child.start_kill() {
            // Already exited; reap below.
            debug!(pid = ?self.pid, "kill failed: {e}");
        }
        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(_)) => self.state = ExitState::Killed,
            Ok(Err(e)) => self.state = ExitState::Failed(e.to_string()),
            Err(_) => {
                warn!(pid = ?self.pid, tool = %self.name, "encoder not reaped within {grace:?}");
                self.state = ExitState::Failed("not reaped after kill".into());
            }
        }
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        if self.state == ExitState::Running {
            warn!(pid = ?self.pid, tool = %self.name, "encoder dropped while running; killing");
            let _ = self.child.start_kill();
        }
    }
}

// ---------------------------------------------------------------------------
// Stderr capture
// ---------------------------------------------------------------------------

/// Drain stderr to EOF, keeping only the last `limit` bytes.
async fn collect_stderr<R: AsyncRead + Unpin>(stderr: R, limit: usize) -> String {
    let mut reader = BufReader::new(stderr);
    let mut tail: Vec<u8> = Vec::new();
    let mut line = Vec::new();

    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) => {
                debug!(target: "encoder_stderr", "{}", String::from_utf8_lossy(&line).trim_end());
                tail.extend_from_slice(&line);
                if tail.len() > limit {
                    let excess = tail.len() - limit;
                    tail.drain(..excess);
                }
            }
            Err(e) => {
                debug!(target: "encoder_stderr", "read error: {e}");
                break;
            }
        }
    }

    String::from_utf8_lossy(&tail).trim().to_string()
}

// ---------------------------------------------------------------------------
// ProcessRunner
// ---------------------------------------------------------------------------

/// Why the stdout pump stopped.
enum Pumped {
    Eof(u64),
    Stopped(String),
    ReadFailed(std::io::Error),
}

/// Runs encoder invocations under [`TranscodeSettings`].
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    settings: TranscodeSettings,
}

impl ProcessRunner {
    pub fn new(settings: TranscodeSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &TranscodeSettings {
        &self.settings
    }

    /// Spawn the encoder and stream its stdout into `sink`.
    ///
    /// # Errors
    ///
    /// - [`Error::Tool`] if the process cannot be spawned.
    /// - [`Error::Cancelled`] if `cancel` fires, the sink reports the
    ///   consumer gone, or the deadline passes. The child is killed first.
    /// - [`Error::EncodeFailed`] on a non-zero exit, after all output
    ///   produced so far has been delivered.
    ///
    /// The sink is finished on every path that got past spawning, so a
    /// buffered writer still receives the partial output of a failed or
    /// cancelled encode.
    pub async fn run<S>(
        &self,
        invocation: &EncoderInvocation,
        sink: &mut S,
        cancel: &CancellationToken,
    ) -> Result<RunSummary>
    where
        S: ChunkSink + ?Sized,
    {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled("cancelled before the encoder started".into()));
        }

        let started = Instant::now();
        let mut handle = ProcessHandle::spawn(invocation)?;
        info!(pid = ?handle.pid, command = %invocation.display(), "Encoder started");

        let (stdout, stderr) = match (handle.child.stdout.take(), handle.child.stderr.take()) {
            (Some(out), Some(err)) => (out, err),
            _ => {
                handle.terminate(self.settings.kill_grace).await;
                return Err(Error::Internal("encoder stdio was not captured".into()));
            }
        };
        let stderr_task = spawn_stderr_collector(stderr, self.settings.stderr_limit);

        let deadline = tokio::time::sleep(self.settings.max_duration);
        tokio::pin!(deadline);

        let bytes = match self.pump(stdout, sink, cancel, &mut deadline).await {
            Pumped::Eof(bytes) => bytes,
            Pumped::Stopped(reason) => {
                handle.terminate(self.settings.kill_grace).await;
                stderr_task.abort();
                finish_partial(sink).await;
                debug!(pid = ?handle.pid, state = ?handle.state, "Encoder stopped: {reason}");
                return Err(Error::Cancelled(reason));
            }
            Pumped::ReadFailed(e) => {
                handle.terminate(self.settings.kill_grace).await;
                stderr_task.abort();
                finish_partial(sink).await;
                return Err(Error::from(e));
            }
        };

        let status = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            _ = deadline.as_mut() => None,
            status = handle.wait() => Some(status),
        };
        let status = match status {
            Some(status) => status?,
            None => {
                handle.terminate(self.settings.kill_grace).await;
                stderr_task.abort();
                finish_partial(sink).await;
                return Err(Error::Cancelled("cancelled while waiting for encoder exit".into()));
            }
        };

        if !status.success() {
            let stderr_excerpt =
                match tokio::time::timeout(self.settings.kill_grace, stderr_task).await {
                    Ok(Ok(text)) => text,
                    _ => String::new(),
                };
            finish_partial(sink).await;
            warn!(
                pid = ?handle.pid,
                code = ?status.code(),
                bytes,
                "Encoder failed: {}",
                stderr_excerpt.lines().last().unwrap_or("")
            );
            return Err(Error::EncodeFailed {
                exit_code: status.code(),
                stderr_excerpt,
            });
        }

        stderr_task.abort();
        sink.finish().await?;

        let summary = RunSummary {
            pid: handle.pid,
            bytes,
            exit: handle.state.clone(),
            elapsed: started.elapsed(),
        };
        info!(
            pid = ?summary.pid,
            bytes = summary.bytes,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "Encoder finished"
        );
        Ok(summary)
    }

    async fn pump<R, S>(
        &self,
        mut reader: R,
        sink: &mut S,
        cancel: &CancellationToken,
        deadline: &mut Pin<&mut Sleep>,
    ) -> Pumped
    where
        R: AsyncRead + Unpin,
        S: ChunkSink + ?Sized,
    {
        let mut buf = BytesMut::with_capacity(self.settings.chunk_size);
        let mut total: u64 = 0;

        loop {
            buf.reserve(self.settings.chunk_size);

            let read = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Pumped::Stopped("cancelled by caller".into()),
                _ = deadline.as_mut() => return Pumped::Stopped(format!(
                    "exceeded maximum encode time of {:?}", self.settings.max_duration
                )),
                _ = sink.closed() => return Pumped::Stopped("consumer disconnected".into()),
                r = reader.read_buf(&mut buf) => r,
            };

            let n = match read {
                Ok(0) => return Pumped::Eof(total),
                Ok(n) => n,
                Err(e) => return Pumped::ReadFailed(e),
            };
            let chunk = buf.split().freeze();

            let delivered = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Pumped::Stopped("cancelled by caller".into()),
                _ = deadline.as_mut() => return Pumped::Stopped(format!(
                    "exceeded maximum encode time of {:?}", self.settings.max_duration
                )),
                r = sink.deliver(chunk) => r,
            };
            if let Err(e) = delivered {
                return Pumped::Stopped(format!("consumer write failed: {e}"));
            }
            total += n as u64;
        }
    }

    /// Run the encode in a background task and expose its output as a
    /// stream. Dropping the stream cancels the encode and kills the child.
    pub fn stream(&self, invocation: EncoderInvocation, cancel: &CancellationToken) -> TranscodeStream {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let runner = self.clone();
        let cancel = cancel.child_token();
        let token = cancel.clone();

        tokio::spawn(async move {
            let mut sink = ChannelSink::new(tx);
            if let Err(e) = runner.run(&invocation, &mut sink, &token).await {
                if e.is_cancelled() {
                    debug!("Encode stream ended: {e}");
                }
                sink.fail(e).await;
            }
        });

        TranscodeStream::new(ReceiverStream::new(rx), cancel)
    }
}

/// Flush whatever reached the sink before a failed or cancelled encode.
/// The original error wins over a failed flush.
async fn finish_partial<S>(sink: &mut S)
where
    S: ChunkSink + ?Sized,
{
    if let Err(e) = sink.finish().await {
        debug!("Discarding sink flush error after failed encode: {e}");
    }
}

fn spawn_stderr_collector(stderr: ChildStderr, limit: usize) -> tokio::task::JoinHandle<String> {
    tokio::spawn(collect_stderr(stderr, limit))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::sink::WriterSink;
    use assert_matches::assert_matches;
    use futures::StreamExt;

    fn sh(script: &str) -> EncoderInvocation {
        EncoderInvocation::new("sh", vec!["-c".into(), script.into()])
    }

    fn quick_settings() -> TranscodeSettings {
        TranscodeSettings {
            max_duration: Duration::from_secs(30),
            kill_grace: Duration::from_secs(5),
            stderr_limit: 256,
            chunk_size: 4096,
        }
    }

    #[cfg(target_os = "linux")]
    fn alive(pid: u32) -> bool {
        std::path::Path::new(&format!("/proc/{pid}")).exists()
    }

    fn first_line_pid(bytes: &[u8]) -> u32 {
        let text = String::from_utf8_lossy(bytes);
        text.lines().next().unwrap().trim().parse().unwrap()
    }

    #[tokio::test]
    async fn successful_encode_drains_all_output() {
        let runner = ProcessRunner::new(quick_settings());
        let mut sink = WriterSink::new(Vec::new());
        let summary = runner
            .run(&sh("printf 'hello '; printf 'world'"), &mut sink, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(sink.get_ref().as_slice(), b"hello world");
        assert_eq!(summary.bytes, 11);
        assert_eq!(summary.exit, ExitState::Exited(0));
        assert!(summary.pid.is_some());
    }

    #[tokio::test]
    async fn large_output_spans_many_chunks() {
        let runner = ProcessRunner::new(quick_settings());
        let mut sink = WriterSink::new(Vec::new());
        let summary = runner
            .run(&sh("head -c 100000 /dev/zero"), &mut sink, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary.bytes, 100_000);
        assert_eq!(sink.get_ref().len(), 100_000);
    }

    #[tokio::test]
    async fn nonzero_exit_is_encode_failed_after_partial_output() {
        let runner = ProcessRunner::new(quick_settings());
        let mut sink = WriterSink::new(Vec::new());
        let err = runner
            .run(
                &sh("printf partial; echo 'Unknown encoder libx265' >&2; exit 3"),
                &mut sink,
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert_matches!(
            err,
            Error::EncodeFailed { exit_code: Some(3), ref stderr_excerpt }
                if stderr_excerpt.contains("Unknown encoder")
        );
        assert_eq!(sink.get_ref().as_slice(), b"partial");
    }

    #[tokio::test]
    async fn failed_encode_flushes_buffered_file_sink() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("partial.webm");
        let file = tokio::fs::File::create(&out).await.unwrap();
        let mut sink = WriterSink::new(tokio::io::BufWriter::new(file));

        let runner = ProcessRunner::new(quick_settings());
        let err = runner
            .run(&sh("printf partial; exit 1"), &mut sink, &CancellationToken::new())
            .await
            .unwrap_err();

        assert_matches!(err, Error::EncodeFailed { exit_code: Some(1), .. });
        assert_eq!(std::fs::read(&out).unwrap(), b"partial");
    }

    #[tokio::test]
    async fn stderr_excerpt_is_bounded() {
        let runner = ProcessRunner::new(quick_settings());
        let mut sink = WriterSink::new(Vec::new());
        let err = runner
            .run(
                &sh("i=0; while [ $i -lt 200 ]; do echo \"line $i of noise\" >&2; i=$((i+1)); done; exit 1"),
                &mut sink,
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        match err {
            Error::EncodeFailed { exit_code, stderr_excerpt } => {
                assert_eq!(exit_code, Some(1));
                assert!(stderr_excerpt.len() <= 256);
                assert!(stderr_excerpt.ends_with("line 199 of noise"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(sink.get_ref().is_empty());
    }

    #[tokio::test]
    async fn missing_program_is_tool_error() {
        let runner = ProcessRunner::new(quick_settings());
        let mut sink = WriterSink::new(Vec::new());
        let invocation = EncoderInvocation::new("nonexistent_encoder_xyz_123", vec![]);
        let err = runner
            .run(&invocation, &mut sink, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_matches!(err, Error::Tool { .. });
    }

    #[tokio::test]
    async fn pre_cancelled_token_never_spawns() {
        let runner = ProcessRunner::new(quick_settings());
        let mut sink = WriterSink::new(Vec::new());
        let cancel = CancellationToken::new();
        cancel.cancel();
        // A missing binary would be a Tool error if a spawn were attempted.
        let invocation = EncoderInvocation::new("nonexistent_encoder_xyz_123", vec![]);
        let err = runner.run(&invocation, &mut sink, &cancel).await.unwrap_err();
        assert_matches!(err, Error::Cancelled(_));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn cancellation_kills_the_child() {
        let runner = ProcessRunner::new(quick_settings());
        let mut sink = WriterSink::new(Vec::new());
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let err = runner
            .run(&sh("echo $$; exec sleep 30"), &mut sink, &cancel)
            .await
            .unwrap_err();

        assert_matches!(err, Error::Cancelled(_));
        assert!(started.elapsed() < Duration::from_secs(10));
        let pid = first_line_pid(sink.get_ref());
        assert!(!alive(pid), "encoder {pid} still running");
    }

    #[tokio::test]
    async fn deadline_expiry_is_cancelled() {
        let mut settings = quick_settings();
        settings.max_duration = Duration::from_millis(200);
        let runner = ProcessRunner::new(settings);
        let mut sink = WriterSink::new(Vec::new());

        let started = std::time::Instant::now();
        let err = runner
            .run(&sh("exec sleep 30"), &mut sink, &CancellationToken::new())
            .await
            .unwrap_err();

        assert_matches!(err, Error::Cancelled(ref reason) if reason.contains("maximum encode time"));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn stream_yields_output_then_ends() {
        let runner = ProcessRunner::new(quick_settings());
        let stream = runner.stream(sh("printf abc"), &CancellationToken::new());
        let chunks: Vec<_> = stream.collect().await;
        let bytes: Vec<u8> = chunks
            .into_iter()
            .flat_map(|c| c.unwrap().to_vec())
            .collect();
        assert_eq!(bytes, b"abc");
    }

    #[tokio::test]
    async fn stream_ends_with_error_on_failed_encode() {
        let runner = ProcessRunner::new(quick_settings());
        let stream = runner.stream(sh("printf abc; exit 4"), &CancellationToken::new());
        let items: Vec<_> = stream.collect().await;
        let last = items.last().unwrap();
        assert_matches!(last, Err(Error::EncodeFailed { exit_code: Some(4), .. }));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn dropping_the_stream_kills_the_child() {
        let runner = ProcessRunner::new(quick_settings());
        let mut stream = runner.stream(sh("echo $$; exec yes"), &CancellationToken::new());

        let mut head = Vec::new();
        while !head.contains(&b'\n') {
            let chunk = stream.next().await.unwrap().unwrap();
            head.extend_from_slice(&chunk);
        }
        let pid = first_line_pid(&head);
        drop(stream);

        let give_up = std::time::Instant::now() + Duration::from_secs(10);
        while alive(pid) && std::time::Instant::now() < give_up {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(!alive(pid), "encoder {pid} survived consumer disconnect");
    }

    #[test]
    fn display_quotes_arguments_with_spaces() {
        let inv = EncoderInvocation::new(
            "/usr/bin/ffmpeg",
            vec!["-i".into(), "/media/My Film.mkv".into(), "pipe:1".into()],
        );
        assert_eq!(inv.display(), "/usr/bin/ffmpeg -i \"/media/My Film.mkv\" pipe:1");
        assert_eq!(inv.program_name(), "ffmpeg");
    }

    #[test]
    fn settings_from_config() {
        let cfg = TranscodeConfig {
            chunk_size: 0,
            ..TranscodeConfig::default()
        };
        let settings = TranscodeSettings::from(&cfg);
        assert_eq!(settings.chunk_size, DEFAULT_CHUNK_SIZE);
        assert_eq!(settings.max_duration, Duration::from_secs(14_400));
        assert_eq!(settings.kill_grace, Duration::from_millis(5000));
    }
}
