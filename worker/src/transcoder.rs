// worker/src/transcoder.rs
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use log::{debug, error, info, trace, warn};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

use crate::options::EncodeSpec;
use crate::profile::ProfileRequest;

const DEFAULT_ENCODER_PROGRAM: &str = "ffmpeg";
const DIAGNOSTIC_TAIL_LINES: usize = 20;
/// Upper bound on buffered engine stderr; older output is discarded.
const MAX_DIAGNOSTIC_BYTES: usize = 64 * 1024;

/// Why a single encode did not produce its output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The engine ran and exited unsuccessfully.
    EngineExited { status: String, diagnostic: String },
    /// The engine could not be started or waited on.
    ProcessError(String),
    /// The engine was killed after exceeding the per-task timeout.
    TimedOut(Duration),
    /// The engine reported success but the output file is absent.
    MissingOutput(PathBuf),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::EngineExited { status, diagnostic } if diagnostic.is_empty() => {
                write!(f, "encoder exited with {}", status)
            }
            FailureReason::EngineExited { status, diagnostic } => {
                write!(f, "encoder exited with {}: {}", status, diagnostic)
            }
            FailureReason::ProcessError(msg) => f.write_str(msg),
            FailureReason::TimedOut(limit) => write!(f, "timed out after {:?}", limit),
            FailureReason::MissingOutput(path) => {
                write!(f, "encoder reported success but {:?} was not written", path)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Running,
    Succeeded,
    Failed(FailureReason),
}

/// Terminal result of [`EncodeTask::execute`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Succeeded,
    Failed(FailureReason),
}

impl TaskOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Succeeded)
    }
}

impl From<TaskOutcome> for TaskStatus {
    fn from(outcome: TaskOutcome) -> Self {
        match outcome {
            TaskOutcome::Succeeded => TaskStatus::Succeeded,
            TaskOutcome::Failed(reason) => TaskStatus::Failed(reason),
        }
    }
}

/// The external encoding engine.
///
/// `encode` blocks until the engine is done with `output`.
pub trait Encoder: Send + Sync {
    fn encode(&self, input: &Path, output: &Path, spec: &EncodeSpec) -> Result<(), FailureReason>;
}

/// Runs ffmpeg (or a compatible wrapper) as a child process.
#[derive(Debug, Clone)]
pub struct FfmpegEncoder {
    program: String,
    leading_args: Vec<String>,
    timeout: Option<Duration>,
}

impl Default for FfmpegEncoder {
    fn default() -> Self {
        FfmpegEncoder {
            program: DEFAULT_ENCODER_PROGRAM.to_string(),
            leading_args: Vec::new(),
            timeout: None,
        }
    }
}

impl FfmpegEncoder {
    pub fn new(program: impl Into<String>) -> Self {
        FfmpegEncoder {
            program: program.into(),
            ..Default::default()
        }
    }

    /// Splits a command line such as `nice -n 10 ffmpeg` into program and
    /// leading arguments. Returns `None` for a blank line.
    pub fn from_command_line(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(FfmpegEncoder {
            program,
            leading_args: parts.collect(),
            timeout: None,
        })
    }

    pub fn with_leading_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.leading_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Full argument list passed to the program.
    pub fn build_args(&self, input: &Path, output: &Path, spec: &EncodeSpec) -> Vec<String> {
        let mut args = self.leading_args.clone();
        args.extend(["-y", "-nostdin", "-i"].map(String::from));
        args.push(input.to_string_lossy().into_owned());
        args.extend(spec.encoder_args());
        args.push(output.to_string_lossy().into_owned());
        args
    }

    async fn run(&self, input: &Path, output: &Path, spec: &EncodeSpec) -> Result<(), FailureReason> {
        let mut cmd = Command::new(&self.program);
        cmd.args(self.build_args(input, output, spec))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        trace!("Executing encoder command: {:?}", cmd);

        let mut child = cmd.spawn().map_err(|e| {
            FailureReason::ProcessError(format!("Failed to execute {}: {}", self.program, e))
        })?;

        // Drained concurrently so a chatty encoder cannot fill the pipe.
        let stderr_task = tokio::spawn(read_tail(child.stderr.take(), MAX_DIAGNOSTIC_BYTES));

        let waited = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
                Ok(waited) => waited,
                Err(_elapsed) => {
                    error!("Encoder for {:?} timed out after {:?}", output, limit);
                    if let Err(e) = child.kill().await {
                        warn!("Failed to kill timed-out encoder: {}", e);
                    }
                    return Err(FailureReason::TimedOut(limit));
                }
            },
            None => child.wait().await,
        };
        let status = waited.map_err(|e| {
            FailureReason::ProcessError(format!("I/O error waiting for {}: {}", self.program, e))
        })?;

        if status.success() {
            debug!("Encoder finished for {:?}", output);
            return Ok(());
        }
        let stderr = stderr_task.await.unwrap_or_default();
        Err(FailureReason::EngineExited {
            status: status.to_string(),
            diagnostic: diagnostic_tail(&String::from_utf8_lossy(&stderr)),
        })
    }
}

impl Encoder for FfmpegEncoder {
    /// Drives the child on a private current-thread runtime, so this works on
    /// plain worker threads as well as inside `spawn_blocking`.
    fn encode(&self, input: &Path, output: &Path, spec: &EncodeSpec) -> Result<(), FailureReason> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| {
                FailureReason::ProcessError(format!("Failed to start encoder runtime: {}", e))
            })?;
        runtime.block_on(self.run(input, output, spec))
    }
}

/// Reads `handle` to the end, keeping only its last `cap` bytes.
async fn read_tail<R: AsyncRead + Unpin>(handle: Option<R>, cap: usize) -> Vec<u8> {
    let mut tail = Vec::new();
    let Some(mut handle) = handle else {
        return tail;
    };
    let mut chunk = [0u8; 8192];
    loop {
        match handle.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                tail.extend_from_slice(&chunk[..n]);
                if tail.len() > cap {
                    let excess = tail.len() - cap;
                    tail.drain(..excess);
                }
            }
        }
    }
    tail
}

/// Last lines of engine output, which is where ffmpeg puts the actual error.
///
/// ffmpeg rewrites its progress line with `\r`; only the final rewrite of
/// each line is kept.
fn diagnostic_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr
        .lines()
        .filter_map(|line| line.rsplit('\r').find(|seg| !seg.trim().is_empty()))
        .collect();
    let start = lines.len().saturating_sub(DIAGNOSTIC_TAIL_LINES);
    lines[start..].join("\n")
}

/// One input file encoded with one spec into one output file.
#[derive(Debug, Clone)]
pub struct EncodeTask {
    pub profile: ProfileRequest,
    pub label: String,
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub spec: EncodeSpec,
    pub status: TaskStatus,
}

impl EncodeTask {
    pub fn new(
        profile: ProfileRequest,
        label: String,
        input_path: PathBuf,
        output_path: PathBuf,
        spec: EncodeSpec,
    ) -> Self {
        EncodeTask {
            profile,
            label,
            input_path,
            output_path,
            spec,
            status: TaskStatus::Pending,
        }
    }

    /// Runs the encoder and records the outcome in `status`.
    ///
    /// Failures are returned as [`TaskOutcome::Failed`]; nothing here aborts
    /// the caller.
    pub fn execute(&mut self, encoder: &dyn Encoder) -> TaskOutcome {
        self.status = TaskStatus::Running;
        info!(
            "Starting transcoding [{}]: {:?} -> {:?}",
            self.label, self.input_path, self.output_path
        );
        debug!("Encode spec [{}]: {:?}", self.label, self.spec);

        let outcome = match encoder.encode(&self.input_path, &self.output_path, &self.spec) {
            Ok(()) if self.output_path.is_file() => {
                info!("Transcoding successful [{}]: {:?}", self.label, self.output_path);
                TaskOutcome::Succeeded
            }
            Ok(()) => {
                let reason = FailureReason::MissingOutput(self.output_path.clone());
                error!("Transcoding failed [{}]: {}", self.label, reason);
                TaskOutcome::Failed(reason)
            }
            Err(reason) => {
                error!("Transcoding failed [{}]: {}", self.label, reason);
                TaskOutcome::Failed(reason)
            }
        };
        self.status = outcome.clone().into();
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{resolve_profile, ProfileRequest};
    use std::fs;

    struct WritingEncoder;

    impl Encoder for WritingEncoder {
        fn encode(&self, _input: &Path, output: &Path, _spec: &EncodeSpec) -> Result<(), FailureReason> {
            fs::write(output, b"encoded").map_err(|e| FailureReason::ProcessError(e.to_string()))
        }
    }

    struct SilentEncoder;

    impl Encoder for SilentEncoder {
        fn encode(&self, _input: &Path, _output: &Path, _spec: &EncodeSpec) -> Result<(), FailureReason> {
            Ok(())
        }
    }

    fn task_for(request: ProfileRequest, dir: &Path) -> EncodeTask {
        let resolved = resolve_profile(&request).unwrap();
        let output = dir.join(format!("clip_{}.mp4", resolved.tag));
        EncodeTask::new(request, resolved.label, dir.join("clip.mp4"), output, resolved.spec)
    }

    #[test]
    fn build_args_orders_input_spec_output() {
        let spec = resolve_profile(&ProfileRequest::codec("h265")).unwrap().spec;
        let args = FfmpegEncoder::default().build_args(
            Path::new("/in/movie.mp4"),
            Path::new("/out/movie_h265.mp4"),
            &spec,
        );
        assert_eq!(
            args,
            vec![
                "-y", "-nostdin", "-i", "/in/movie.mp4", "-c:v", "libx265", "-crf", "28",
                "-preset", "medium", "-c:a", "aac", "/out/movie_h265.mp4",
            ]
        );
    }

    #[test]
    fn build_args_for_rung_sets_size_and_bitrate() {
        let spec = resolve_profile(&ProfileRequest::rung("854x480", "2M")).unwrap().spec;
        let args = FfmpegEncoder::default().build_args(Path::new("a.mp4"), Path::new("b.mp4"), &spec);
        assert_eq!(
            args,
            vec!["-y", "-nostdin", "-i", "a.mp4", "-c:v", "libx264", "-b:v", "2M", "-s", "854x480", "b.mp4"]
        );
    }

    #[test]
    fn command_line_splits_wrapper() {
        let enc = FfmpegEncoder::from_command_line("nice -n 10 ffmpeg").unwrap();
        assert_eq!(enc.program(), "nice");
        let args = enc.build_args(Path::new("a"), Path::new("b"), &resolve_profile(&ProfileRequest::codec("vp8")).unwrap().spec);
        assert_eq!(&args[..3], ["-n", "10", "ffmpeg"]);
        assert!(FfmpegEncoder::from_command_line("   ").is_none());
    }

    #[test]
    fn diagnostic_keeps_last_lines() {
        let stderr: String = (0..50).map(|i| format!("line {}\n", i)).collect();
        let tail = diagnostic_tail(&stderr);
        assert!(tail.starts_with("line 30"));
        assert!(tail.ends_with("line 49"));
    }

    #[test]
    fn diagnostic_keeps_only_final_progress_rewrite() {
        let stderr = "Input #0, mov\nframe=  1 fps=0\rframe=  2 fps=0\rframe=  3 fps=0\r\nError while encoding\n";
        assert_eq!(
            diagnostic_tail(stderr),
            "Input #0, mov\nframe=  3 fps=0\nError while encoding"
        );
    }

    #[tokio::test]
    async fn captured_stderr_is_capped_to_its_tail() {
        let data: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
        let tail = read_tail(Some(&data[..]), 1024).await;
        assert_eq!(tail.len(), 1024);
        assert_eq!(tail[..], data[data.len() - 1024..]);
        assert!(read_tail(None::<&[u8]>, 1024).await.is_empty());
    }

    #[test]
    fn execute_marks_success() {
        let dir = tempfile::tempdir().unwrap();
        let mut task = task_for(ProfileRequest::codec("vp8"), dir.path());
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.execute(&WritingEncoder), TaskOutcome::Succeeded);
        assert_eq!(task.status, TaskStatus::Succeeded);
    }

    #[test]
    fn execute_requires_output_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut task = task_for(ProfileRequest::codec("vp9"), dir.path());
        let outcome = task.execute(&SilentEncoder);
        assert_eq!(
            outcome,
            TaskOutcome::Failed(FailureReason::MissingOutput(task.output_path.clone()))
        );
        assert!(matches!(task.status, TaskStatus::Failed(_)));
    }

    #[test]
    fn missing_program_is_process_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut task = task_for(ProfileRequest::codec("av1"), dir.path());
        let encoder = FfmpegEncoder::new("definitely-not-an-encoder-xyz");
        match task.execute(&encoder) {
            TaskOutcome::Failed(FailureReason::ProcessError(msg)) => {
                assert!(msg.contains("definitely-not-an-encoder-xyz"))
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[cfg(unix)]
    mod subprocess {
        use super::*;
        use std::time::Instant;

        fn script_encoder(dir: &Path, body: &str) -> FfmpegEncoder {
            let script = dir.join("encoder.sh");
            fs::write(&script, body).unwrap();
            FfmpegEncoder::new("sh").with_leading_args([script.to_string_lossy().into_owned()])
        }

        #[test]
        fn zero_exit_with_output_succeeds() {
            let dir = tempfile::tempdir().unwrap();
            let encoder = script_encoder(dir.path(), "for last; do :; done\necho data > \"$last\"\n");
            let mut task = task_for(ProfileRequest::codec("h265"), dir.path());
            assert_eq!(task.execute(&encoder), TaskOutcome::Succeeded);
            assert_eq!(fs::read_to_string(&task.output_path).unwrap().trim(), "data");
        }

        #[test]
        fn non_zero_exit_captures_stderr() {
            let dir = tempfile::tempdir().unwrap();
            let encoder = script_encoder(dir.path(), "echo 'Unknown encoder libvpx' >&2\nexit 3\n");
            let mut task = task_for(ProfileRequest::codec("vp8"), dir.path());
            match task.execute(&encoder) {
                TaskOutcome::Failed(FailureReason::EngineExited { diagnostic, .. }) => {
                    assert_eq!(diagnostic, "Unknown encoder libvpx")
                }
                other => panic!("unexpected outcome {:?}", other),
            }
        }

        #[test]
        fn hung_encoder_times_out() {
            let dir = tempfile::tempdir().unwrap();
            let encoder = script_encoder(dir.path(), "exec sleep 10\n")
                .with_timeout(Some(Duration::from_millis(200)));
            let mut task = task_for(ProfileRequest::codec("vp9"), dir.path());
            let started = Instant::now();
            assert_eq!(
                task.execute(&encoder),
                TaskOutcome::Failed(FailureReason::TimedOut(Duration::from_millis(200)))
            );
            assert!(started.elapsed() < Duration::from_secs(5));
        }

        #[test]
        fn verbose_failure_reports_last_lines() {
            let dir = tempfile::tempdir().unwrap();
            let encoder = script_encoder(
                dir.path(),
                "i=0\nwhile [ $i -lt 5000 ]; do echo \"frame=$i\" >&2; i=$((i+1)); done\necho 'Conversion failed!' >&2\nexit 1\n",
            );
            let mut task = task_for(ProfileRequest::codec("vp9"), dir.path());
            match task.execute(&encoder) {
                TaskOutcome::Failed(FailureReason::EngineExited { diagnostic, .. }) => {
                    assert!(diagnostic.ends_with("Conversion failed!"));
                    assert_eq!(diagnostic.lines().count(), DIAGNOSTIC_TAIL_LINES);
                }
                other => panic!("unexpected outcome {:?}", other),
            }
        }
    }
}
