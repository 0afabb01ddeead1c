// src/supervisor.rs

use std::collections::BTreeMap;
use std::os::unix::process::{CommandExt, ExitStatusExt}; // For pre_exec and signal()
use std::path::PathBuf;
use std::process::{Command as StdCommand, ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tokio::process::{Child, Command as TokioCommand};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::drainer::{DrainOutcome, StreamDrainer};
use crate::error::SupervisorError;
use crate::line_log::{ActivityClock, LineLog};
use crate::sink::{NullSink, Stream, TranscriptSink};
use crate::truncate::{ShrinkOptions, SizeErrorPolicy};

/// Default inactivity budget: one hour without a single line of output.
pub const DEFAULT_NO_OUTPUT_TIMEOUT: Duration = Duration::from_secs(3600);
/// Default per-stream transcript budget, in characters.
pub const DEFAULT_MAX_LOG_SIZE: usize = 32768;
/// How often the watchdog looks at the drainers and the activity clock.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

// --- Structs and Enums ---

/// Everything needed to run one command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandSpec {
    /// Shell command line, passed to `<shell> -c`.
    pub command: String,
    pub working_dir: PathBuf,
    /// Only used to namespace log output.
    pub job_label: String,
    /// Kill the command after this long without a line on either stream.
    pub no_output_timeout: Duration,
    /// Variables set on top of the inherited environment.
    pub env: BTreeMap<String, String>,
    /// Start from an empty environment instead of inheriting ours.
    pub clear_env: bool,
    pub shell: String,
    /// Maximum characters kept per stream in the result.
    pub max_log_size: usize,
}

impl CommandSpec {
    pub fn new(command: impl Into<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            working_dir: working_dir.into(),
            job_label: "command".to_string(),
            no_output_timeout: DEFAULT_NO_OUTPUT_TIMEOUT,
            env: BTreeMap::new(),
            clear_env: false,
            shell: "sh".to_string(),
            max_log_size: DEFAULT_MAX_LOG_SIZE,
        }
    }

    pub fn with_job_label(mut self, label: impl Into<String>) -> Self {
        self.job_label = label.into();
        self
    }

    pub fn with_no_output_timeout(mut self, timeout: Duration) -> Self {
        self.no_output_timeout = timeout;
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_clear_env(mut self, clear: bool) -> Self {
        self.clear_env = clear;
        self
    }

    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    pub fn with_max_log_size(mut self, size: usize) -> Self {
        self.max_log_size = size;
        self
    }
}

/// Outcome of one execution attempt.
///
/// A failed build is data, not an error: inspect `return_code` (or
/// [`success`](Self::success)) to decide what it means.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandResult {
    /// Exit code, or `-signal` when the process was terminated by a signal.
    pub return_code: i32,
    pub stdout: String,
    pub stderr: String,
    /// Killed because no output arrived within the inactivity budget.
    pub timed_out: bool,
    /// Killed because the caller's cancellation token fired.
    pub cancelled: bool,
    pub pid: Option<u32>,
    pub duration: Duration,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.return_code == 0 && !self.timed_out && !self.cancelled
    }

    /// One-line description, e.g. `exit code 2 after 1.52s`.
    pub fn summary(&self) -> String {
        let reason = if self.timed_out {
            "killed for inactivity, "
        } else if self.cancelled {
            "cancelled, "
        } else {
            ""
        };
        format!(
            "{reason}exit code {} after {:.2}s",
            self.return_code,
            self.duration.as_secs_f64()
        )
    }
}

/// Why the watchdog loop ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Termination {
    /// Both streams reached EOF.
    Drained,
    TimedOut,
    Cancelled,
}

/// Runs one command: spawn, drain, watch, kill if stuck, report.
pub struct ProcessSupervisor {
    spec: CommandSpec,
    sink: Arc<dyn TranscriptSink>,
    cancel: Option<CancellationToken>,
    poll_interval: Duration,
}

// --- Helper Functions (Definitions Before Use) ---

fn validate_spec(spec: &CommandSpec, poll_interval: Duration) -> Result<(), SupervisorError> {
    if spec.no_output_timeout == Duration::ZERO {
        return Err(SupervisorError::InvalidTimeout(
            "no_output_timeout must be positive".to_string(),
        ));
    }
    if poll_interval == Duration::ZERO {
        return Err(SupervisorError::InvalidTimeout(
            "poll_interval must be positive".to_string(),
        ));
    }
    if poll_interval > spec.no_output_timeout {
        return Err(SupervisorError::InvalidTimeout(format!(
            "poll_interval ({:?}) cannot be greater than no_output_timeout ({:?})",
            poll_interval, spec.no_output_timeout
        )));
    }
    Ok(())
}

/// Builds `<shell> -c <command>` in its own process group with stdin closed.
fn build_command(spec: &CommandSpec) -> TokioCommand {
    let mut command = StdCommand::new(&spec.shell);
    command
        .arg("-c")
        .arg(&spec.command)
        .current_dir(&spec.working_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if spec.clear_env {
        command.env_clear();
    }
    command.envs(&spec.env);

    // The kill must reach grandchildren too, or they keep the pipes open.
    unsafe {
        command.pre_exec(|| {
            if libc::setpgid(0, 0) == 0 {
                Ok(())
            } else {
                Err(std::io::Error::last_os_error())
            }
        });
    }

    let mut command = TokioCommand::from(command);
    command.kill_on_drop(true);
    command
}

/// Sends SIGKILL to the child's process group. Already-gone is not an error.
fn kill_process_group(child: &mut Child, pid: Option<u32>) {
    let Some(pid_u32) = pid else {
        warn!("No PID recorded for the child, falling back to a direct kill");
        if let Err(e) = child.start_kill() {
            debug!(error = %e, "Direct kill failed, child likely already exited");
        }
        return;
    };

    match killpg(Pid::from_raw(pid_u32 as i32), Signal::SIGKILL) {
        Ok(()) => debug!(pid = pid_u32, "SIGKILL sent to process group"),
        Err(Errno::ESRCH) => debug!(pid = pid_u32, "Process group already gone"),
        Err(e) => {
            warn!(pid = pid_u32, error = %e, "Failed to kill process group, killing child directly");
            if let Err(e) = child.start_kill() {
                warn!(pid = pid_u32, error = %e, "Failed to kill child");
            }
        }
    }
}

fn return_code(status: ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|signal| -signal))
        .unwrap_or(-1)
}

async fn cancelled(token: Option<&CancellationToken>) {
    match token {
        Some(token) => token.cancelled().await,
        None => std::future::pending().await,
    }
}

fn truncated_stream(log: &LineLog, stream: Stream, max_size: usize) -> String {
    let opts = ShrinkOptions::default().with_size_error_policy(SizeErrorPolicy::KeepBeginning);
    log.truncated_text(max_size, &opts).unwrap_or_else(|e| {
        warn!(stream = %stream, error = %e, "Could not truncate output, keeping it whole");
        log.text()
    })
}

fn append_line(text: &mut String, line: &str) {
    if !text.is_empty() {
        text.push('\n');
    }
    text.push_str(line);
}

// --- Public API ---

impl ProcessSupervisor {
    pub fn new(spec: CommandSpec) -> Self {
        Self {
            spec,
            sink: Arc::new(NullSink),
            cancel: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Receives every captured line as it arrives.
    pub fn with_sink(mut self, sink: Arc<dyn TranscriptSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Kills the command when `token` is cancelled, through the same path as
    /// the inactivity timeout.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Runs the command to completion (or to its kill).
    ///
    /// Returns an error only when the command could not be started.
    #[instrument(skip(self), fields(job = %self.spec.job_label, command = %self.spec.command))]
    pub async fn run(self) -> Result<CommandResult, SupervisorError> {
        validate_spec(&self.spec, self.poll_interval)?;
        let spec = &self.spec;

        match tokio::fs::metadata(&spec.working_dir).await {
            Ok(meta) if meta.is_dir() => {}
            _ => return Err(SupervisorError::WorkingDir(spec.working_dir.clone())),
        }

        let start_time = Instant::now();
        let mut child = build_command(spec)
            .spawn()
            .map_err(|source| SupervisorError::Spawn {
                command: spec.command.clone(),
                source,
            })?;
        let pid = child.id();
        info!(pid, dir = %spec.working_dir.display(), "Process spawned");

        let stdout_pipe = child.stdout.take().ok_or(SupervisorError::StdoutPipe)?;
        let stderr_pipe = child.stderr.take().ok_or(SupervisorError::StderrPipe)?;

        let clock = ActivityClock::new();
        let stdout = StreamDrainer::spawn(
            Stream::Stdout,
            stdout_pipe,
            LineLog::new(),
            clock.clone(),
            self.sink.clone(),
            spec.job_label.clone(),
        );
        let stderr = StreamDrainer::spawn(
            Stream::Stderr,
            stderr_pipe,
            LineLog::new(),
            clock.clone(),
            self.sink.clone(),
            spec.job_label.clone(),
        );

        let mut termination = self.watch(&mut child, pid, &stdout, &stderr, &clock).await;
        let code = self.wait_for_exit(&mut child, pid, &mut termination).await;

        let stdout_log = stdout.log().clone();
        let stderr_log = stderr.log().clone();
        let budget = spec.no_output_timeout;
        let (out_outcome, err_outcome) = tokio::join!(stdout.join(budget), stderr.join(budget));
        if out_outcome == DrainOutcome::Abandoned || err_outcome == DrainOutcome::Abandoned {
            warn!(pid, "Proceeding with partial output from an abandoned drainer");
        }
        if let Err(e) = self.sink.flush() {
            debug!(pid, error = %e, "Transcript sink failed to flush");
        }

        let duration = start_time.elapsed();
        let result = self.finalize(&stdout_log, &stderr_log, code, pid, termination, duration);
        info!(
            pid,
            return_code = result.return_code,
            timed_out = result.timed_out,
            cancelled = result.cancelled,
            duration = ?duration,
            "Command finished"
        );
        Ok(result)
    }

    /// Polls until both streams are drained, output has been silent for the
    /// whole budget, or the caller cancels. Kills the process group in the
    /// latter two cases.
    async fn watch(
        &self,
        child: &mut Child,
        pid: Option<u32>,
        stdout: &StreamDrainer,
        stderr: &StreamDrainer,
        clock: &ActivityClock,
    ) -> Termination {
        let timeout = self.spec.no_output_timeout;
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = cancelled(self.cancel.as_ref()) => {
                    info!(pid, "Cancellation requested, killing process group");
                    kill_process_group(child, pid);
                    return Termination::Cancelled;
                }
            }

            if stdout.is_complete() && stderr.is_complete() {
                debug!(pid, "Both output streams closed");
                return Termination::Drained;
            }

            let idle = clock.idle_for();
            if idle >= timeout {
                warn!(pid, idle = ?idle, timeout = ?timeout, "No output within timeout, killing process group");
                kill_process_group(child, pid);
                return Termination::TimedOut;
            }
        }
    }

    /// Reaps the child, bounded by the inactivity budget.
    ///
    /// A child that closed both pipes but keeps running is silent by
    /// definition; once the budget passes it goes through the kill path.
    async fn wait_for_exit(
        &self,
        child: &mut Child,
        pid: Option<u32>,
        termination: &mut Termination,
    ) -> i32 {
        let budget = self.spec.no_output_timeout;
        let status = match tokio::time::timeout(budget, child.wait()).await {
            Ok(status) => Some(status),
            Err(_) => {
                if *termination == Termination::Drained {
                    warn!(pid, timeout = ?budget, "Process closed its output but did not exit, killing process group");
                    kill_process_group(child, pid);
                    *termination = Termination::TimedOut;
                }
                tokio::time::timeout(budget, child.wait()).await.ok()
            }
        };

        match status {
            Some(Ok(status)) => {
                debug!(pid, status = %status, "Process exited");
                return_code(status)
            }
            Some(Err(e)) => {
                warn!(pid, error = %e, "Error waiting for process exit");
                -1
            }
            None => {
                warn!(pid, "Process did not exit after kill, giving up on its status");
                -1
            }
        }
    }

    fn finalize(
        &self,
        stdout_log: &LineLog,
        stderr_log: &LineLog,
        return_code: i32,
        pid: Option<u32>,
        termination: Termination,
        duration: Duration,
    ) -> CommandResult {
        let spec = &self.spec;
        let stdout = truncated_stream(stdout_log, Stream::Stdout, spec.max_log_size);
        let mut stderr = truncated_stream(stderr_log, Stream::Stderr, spec.max_log_size);

        // Notes go after truncation so they are never elided.
        for note in [stdout_log.note(), stderr_log.note()].into_iter().flatten() {
            warn!(pid, note = %note, "Output capture degraded");
            append_line(&mut stderr, &note);
        }

        let pid_text = pid.map_or_else(|| "?".to_string(), |p| p.to_string());
        match termination {
            Termination::Drained => {}
            Termination::TimedOut => append_line(
                &mut stderr,
                &format!(
                    "Process {pid_text} (job '{}') was killed after producing no output for {:?}",
                    spec.job_label, spec.no_output_timeout
                ),
            ),
            Termination::Cancelled => append_line(
                &mut stderr,
                &format!("Process {pid_text} (job '{}') was cancelled", spec.job_label),
            ),
        }

        CommandResult {
            return_code,
            stdout,
            stderr,
            timed_out: termination == Termination::TimedOut,
            cancelled: termination == Termination::Cancelled,
            pid,
            duration,
        }
    }
}

/// Runs `spec` with no sink and no cancellation.
pub async fn run_command(spec: CommandSpec) -> Result<CommandResult, SupervisorError> {
    ProcessSupervisor::new(spec).run().await
}

// ----------- Tests -----------
#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::FileSink;
    use tokio::runtime::Runtime;
    use tracing_subscriber::{fmt, EnvFilter};

    // Helper to initialize tracing for tests
    fn setup_tracing() {
        // Use `RUST_LOG=debug` env var to see logs, default info
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init()
            .ok();
    }

    // Helper to run async tests
    fn run_async_test<F, Fut>(test_fn: F)
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = ()>,
    {
        setup_tracing();
        let rt = Runtime::new().unwrap();
        rt.block_on(test_fn());
    }

    fn spec_in(dir: &tempfile::TempDir, command: &str) -> CommandSpec {
        CommandSpec::new(command, dir.path()).with_no_output_timeout(Duration::from_secs(5))
    }

    fn process_exists(pid: u32) -> bool {
        nix::sys::signal::kill(Pid::from_raw(pid as i32), None).is_ok()
    }

    #[test]
    fn test_captures_stdout_lines_in_order() {
        run_async_test(|| async {
            let dir = tempfile::tempdir().unwrap();
            let spec = spec_in(&dir, "for i in 1 2 3 4 5; do echo line$i; done");

            let result = run_command(spec).await.expect("Command failed unexpectedly");

            assert_eq!(result.return_code, 0);
            assert!(result.success());
            assert_eq!(result.stdout, "line1\nline2\nline3\nline4\nline5");
            assert!(result.stderr.is_empty(), "Stderr should be empty");
            assert!(!result.timed_out);
            assert!(result.pid.is_some());
        });
    }

    #[test]
    fn test_each_stream_keeps_its_own_order() {
        run_async_test(|| async {
            let dir = tempfile::tempdir().unwrap();
            let spec = spec_in(&dir, "for i in 1 2 3; do echo out$i; echo err$i >&2; done");

            let result = run_command(spec).await.unwrap();

            assert_eq!(result.stdout, "out1\nout2\nout3");
            assert_eq!(result.stderr, "err1\nerr2\nerr3");
        });
    }

    #[test]
    fn test_nonzero_exit_is_reported_not_raised() {
        run_async_test(|| async {
            let dir = tempfile::tempdir().unwrap();
            let spec = spec_in(&dir, "echo 'Error message' >&2; exit 55");

            let result = run_command(spec).await.expect("Non-zero exit must not be an error");

            assert_eq!(result.return_code, 55);
            assert!(!result.success());
            assert_eq!(result.stderr, "Error message");
            assert!(!result.timed_out);
        });
    }

    #[test]
    fn test_silent_command_is_killed_after_timeout() {
        run_async_test(|| async {
            let dir = tempfile::tempdir().unwrap();
            let timeout = Duration::from_millis(500);
            let spec = spec_in(&dir, "echo started; sleep 5; echo 'This should not appear'")
                .with_no_output_timeout(timeout)
                .with_job_label("stuck-build");

            let start = Instant::now();
            let result = run_command(spec).await.unwrap();
            let elapsed = start.elapsed();

            assert!(result.timed_out, "Should have timed out");
            assert!(!result.success());
            assert!(elapsed >= timeout, "Killed too early: {elapsed:?}");
            assert!(elapsed < timeout + Duration::from_secs(1), "Killed too late: {elapsed:?}");
            assert_eq!(result.return_code, -(libc::SIGKILL as i32));
            assert_eq!(result.stdout, "started");

            let pid = result.pid.unwrap();
            assert!(result.stderr.contains(&format!("Process {pid}")));
            assert!(result.stderr.contains("stuck-build"));
            assert!(result.stderr.contains("no output"));
            assert!(!process_exists(pid), "Process should be gone after the run");
        });
    }

    #[test]
    fn test_steady_output_is_not_killed() {
        run_async_test(|| async {
            let dir = tempfile::tempdir().unwrap();
            // ~1.5s of runtime, one line every 0.1s, timeout 0.5s
            let spec = spec_in(&dir, "i=0; while [ $i -lt 15 ]; do echo $i; i=$((i+1)); sleep 0.1; done")
                .with_no_output_timeout(Duration::from_millis(500));

            let result = run_command(spec).await.unwrap();

            assert!(!result.timed_out, "Inactivity timeout must not count total runtime");
            assert_eq!(result.return_code, 0);
            assert_eq!(result.stdout.lines().count(), 15);
            assert!(result.duration > Duration::from_secs(1));
        });
    }

    #[test]
    fn test_stderr_activity_keeps_quiet_stdout_alive() {
        run_async_test(|| async {
            let dir = tempfile::tempdir().unwrap();
            let spec = spec_in(&dir, "for i in 1 2 3 4 5 6 7 8; do echo progress$i >&2; sleep 0.1; done; echo done")
                .with_no_output_timeout(Duration::from_millis(400));

            let result = run_command(spec).await.unwrap();

            assert!(!result.timed_out);
            assert_eq!(result.stdout, "done");
            assert_eq!(result.stderr.lines().count(), 8);
        });
    }

    #[test]
    fn test_process_that_closes_pipes_but_keeps_running_is_killed() {
        run_async_test(|| async {
            let dir = tempfile::tempdir().unwrap();
            let timeout = Duration::from_millis(400);
            let spec = spec_in(&dir, "echo bye; exec >&- 2>&-; sleep 5").with_no_output_timeout(timeout);

            let start = Instant::now();
            let result = run_command(spec).await.unwrap();

            assert!(start.elapsed() < Duration::from_secs(3));
            assert!(result.timed_out);
            assert_eq!(result.stdout, "bye");
            assert!(!process_exists(result.pid.unwrap()));
        });
    }

    #[test]
    fn test_concurrent_runs_do_not_share_output() {
        run_async_test(|| async {
            let dir = tempfile::tempdir().unwrap();
            let first = spec_in(&dir, "for i in 1 2 3; do echo token-alpha; sleep 0.05; done");
            let second = spec_in(&dir, "for i in 1 2 3; do echo token-beta; sleep 0.05; done");

            let (a, b) = tokio::join!(run_command(first), run_command(second));
            let (a, b) = (a.unwrap(), b.unwrap());

            assert_eq!(a.stdout, "token-alpha\ntoken-alpha\ntoken-alpha");
            assert_eq!(b.stdout, "token-beta\ntoken-beta\ntoken-beta");
            assert!(!a.stdout.contains("beta"));
            assert!(!b.stdout.contains("alpha"));
        });
    }

    #[test]
    fn test_missing_shell_is_a_spawn_error() {
        run_async_test(|| async {
            let dir = tempfile::tempdir().unwrap();
            let spec = spec_in(&dir, "echo hi").with_shell("a_shell_that_does_not_exist_hopefully");

            match run_command(spec).await {
                Err(SupervisorError::Spawn { source, .. }) => {
                    assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
                }
                other => panic!("Expected SupervisorError::Spawn, got {:?}", other),
            }
        });
    }

    #[test]
    fn test_missing_working_dir_is_an_error() {
        run_async_test(|| async {
            let dir = tempfile::tempdir().unwrap();
            let missing = dir.path().join("no-such-dir");
            let spec = CommandSpec::new("echo hi", &missing);

            match run_command(spec).await {
                Err(SupervisorError::WorkingDir(path)) => assert_eq!(path, missing),
                other => panic!("Expected SupervisorError::WorkingDir, got {:?}", other),
            }
        });
    }

    #[test]
    fn test_zero_timeout_is_rejected() {
        run_async_test(|| async {
            let dir = tempfile::tempdir().unwrap();
            let spec = spec_in(&dir, "echo hi").with_no_output_timeout(Duration::ZERO);
            assert!(matches!(
                run_command(spec).await,
                Err(SupervisorError::InvalidTimeout(_))
            ));

            let spec = spec_in(&dir, "echo hi");
            let result = ProcessSupervisor::new(spec)
                .with_poll_interval(Duration::ZERO)
                .run()
                .await;
            assert!(matches!(result, Err(SupervisorError::InvalidTimeout(_))));

            let spec = spec_in(&dir, "echo hi").with_no_output_timeout(Duration::from_millis(200));
            let result = ProcessSupervisor::new(spec)
                .with_poll_interval(Duration::from_secs(1))
                .run()
                .await;
            assert!(matches!(result, Err(SupervisorError::InvalidTimeout(_))));
        });
    }

    #[test]
    fn test_runs_in_working_dir_with_env() {
        run_async_test(|| async {
            let dir = tempfile::tempdir().unwrap();
            let spec = spec_in(&dir, "pwd; echo \"$INSTALL_DIR\"").with_env("INSTALL_DIR", "/opt/deps/zlib");

            let result = run_command(spec).await.unwrap();

            let expected_dir = dir.path().canonicalize().unwrap();
            let mut lines = result.stdout.lines();
            assert_eq!(lines.next(), Some(expected_dir.to_str().unwrap()));
            assert_eq!(lines.next(), Some("/opt/deps/zlib"));
        });
    }

    #[test]
    fn test_clear_env_drops_inherited_variables() {
        run_async_test(|| async {
            std::env::set_var("CMD_SUPERVISOR_TEST_INHERITED", "leaked");
            let dir = tempfile::tempdir().unwrap();
            let spec = spec_in(&dir, "echo \"[$CMD_SUPERVISOR_TEST_INHERITED]\"")
                .with_clear_env(true)
                .with_shell("/bin/sh");

            let result = run_command(spec).await.unwrap();
            assert_eq!(result.stdout, "[]");
        });
    }

    #[test]
    fn test_stdin_is_not_connected() {
        run_async_test(|| async {
            let dir = tempfile::tempdir().unwrap();
            let spec = spec_in(&dir, "read line; echo \"got:$line\"");

            let result = run_command(spec).await.unwrap();

            assert!(!result.timed_out, "Child must never wait for input");
            assert_eq!(result.stdout, "got:");
        });
    }

    #[test]
    fn test_output_is_truncated_per_stream() {
        run_async_test(|| async {
            let dir = tempfile::tempdir().unwrap();
            let spec = spec_in(&dir, "i=1; while [ $i -le 2000 ]; do echo $i; i=$((i+1)); done; echo fatal >&2")
                .with_max_log_size(100);

            let result = run_command(spec).await.unwrap();

            assert_eq!(result.stdout.chars().count(), 100);
            assert!(result.stdout.starts_with("1\n2\n3\n"));
            assert!(result.stdout.ends_with("1999\n2000"));
            assert_eq!(result.stdout.matches("\n..\n").count(), 1);
            assert_eq!(result.stderr, "fatal");
        });
    }

    #[test]
    fn test_tiny_log_budget_keeps_the_beginning() {
        run_async_test(|| async {
            let dir = tempfile::tempdir().unwrap();
            let spec = spec_in(&dir, "echo abcdefghijklmnop; echo qrstuvwxyz >&2").with_max_log_size(3);

            let result = run_command(spec).await.unwrap();

            assert_eq!(result.stdout, "abc");
            assert_eq!(result.stderr, "qrs");
        });
    }

    #[test]
    fn test_flooded_stderr_does_not_block_quiet_stdout() {
        run_async_test(|| async {
            let dir = tempfile::tempdir().unwrap();
            // ~1 MB on stderr, far beyond an OS pipe buffer
            let spec = spec_in(&dir, "head -c 1000000 /dev/zero | tr '\\0' x | fold -w 100 >&2; echo done")
                .with_max_log_size(2_000_000);

            let result = run_command(spec).await.unwrap();

            assert!(!result.timed_out, "Should not have timed out");
            assert_eq!(result.return_code, 0);
            assert_eq!(result.stdout, "done");
            assert_eq!(result.stderr.lines().count(), 10_000);
            assert!(result.stderr.lines().all(|line| line.len() == 100));
        });
    }

    #[test]
    fn test_cancellation_uses_kill_path() {
        run_async_test(|| async {
            let dir = tempfile::tempdir().unwrap();
            let token = CancellationToken::new();
            let spec = spec_in(&dir, "echo working; sleep 5").with_no_output_timeout(Duration::from_secs(30));

            let canceller = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                canceller.cancel();
            });

            let start = Instant::now();
            let result = ProcessSupervisor::new(spec)
                .with_cancellation(token)
                .run()
                .await
                .unwrap();

            assert!(start.elapsed() < Duration::from_secs(2));
            assert!(result.cancelled);
            assert!(!result.timed_out);
            assert_eq!(result.stdout, "working");
            assert!(result.stderr.contains("was cancelled"));
            assert!(!process_exists(result.pid.unwrap()));
        });
    }

    #[test]
    fn test_sink_receives_lines_as_they_arrive() {
        run_async_test(|| async {
            let dir = tempfile::tempdir().unwrap();
            let log_path = dir.path().join("INSTALLATION.log");
            let sink = Arc::new(FileSink::open(&log_path).unwrap());
            let spec = spec_in(&dir, "echo building; echo oops >&2").with_job_label("zlib");

            let result = ProcessSupervisor::new(spec).with_sink(sink).run().await.unwrap();
            assert_eq!(result.return_code, 0);

            let transcript = std::fs::read_to_string(&log_path).unwrap();
            assert!(transcript.contains("[zlib] [stdout] building"));
            assert!(transcript.contains("[zlib] [stderr] oops"));
        });
    }

    #[test]
    fn test_summary_mentions_kill_reason() {
        let mut result = CommandResult {
            return_code: 2,
            stdout: String::new(),
            stderr: String::new(),
            timed_out: false,
            cancelled: false,
            pid: Some(42),
            duration: Duration::from_millis(1520),
        };
        assert_eq!(result.summary(), "exit code 2 after 1.52s");

        result.timed_out = true;
        result.return_code = -9;
        assert_eq!(result.summary(), "killed for inactivity, exit code -9 after 1.52s");
    }
}
