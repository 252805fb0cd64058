//! Process runner for leased jobs
//!
//! Turns a [`JobPayload`] into a child process, enforcing the command
//! allow-list, the per-job timeout and the output size cap.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;

use crate::metrics;
use crate::models::{CompleteJobRequest, JobPayload};

/// Exit code reported when a job hits its deadline
pub const EXIT_TIMED_OUT: i32 = 124;

/// Exit code reported when the command is not on the allow-list
pub const EXIT_NOT_ALLOWED: i32 = 126;

/// Exit code reported when the process could not be started
pub const EXIT_SPAWN_FAILED: i32 = 127;

/// How long to wait for pipes to drain after the process exits
const OUTPUT_DRAIN_GRACE: Duration = Duration::from_secs(2);

// ============================================================================
// Configuration
// ============================================================================

/// Limits applied to every execution
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Command basenames permitted to run
    pub allowed_commands: Vec<String>,

    /// Timeout when the payload does not carry one, in milliseconds
    pub default_timeout_ms: u64,

    /// Cap for captured stdout and stderr, each
    pub max_output_bytes: usize,

    /// Program started for `automaton-run` jobs
    pub automaton_command: String,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            allowed_commands: ["automaton", "node", "bash", "sh"]
                .iter()
                .map(|c| c.to_string())
                .collect(),
            default_timeout_ms: 300_000,
            max_output_bytes: 128_000,
            automaton_command: "automaton".to_string(),
        }
    }
}

impl ExecutionConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.default_timeout_ms == 0 {
            return Err("default_timeout_ms must be non-zero".to_string());
        }
        if self.automaton_command.trim().is_empty() {
            return Err("automaton_command must not be empty".to_string());
        }
        Ok(())
    }
}

// ============================================================================
// Run Outcome
// ============================================================================

/// What happened to one execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub success: bool,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    pub error: Option<String>,
}

impl RunOutcome {
    fn failed(exit_code: i32, error: String, started: Instant) -> Self {
        Self {
            success: false,
            exit_code,
            stdout: String::new(),
            stderr: String::new(),
            duration_ms: elapsed_ms(started),
            error: Some(error),
        }
    }

    /// Completion report for the coordinator
    pub fn into_report(self, host_id: impl Into<String>) -> CompleteJobRequest {
        CompleteJobRequest {
            host_id: host_id.into(),
            success: self.success,
            duration_ms: self.duration_ms,
            exit_code: self.exit_code,
            stdout: self.stdout,
            stderr: self.stderr,
            error: self.error,
        }
    }
}

/// Runner errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunnerError {
    /// Command basename is not on the allow-list
    NotAllowed { command: String },

    /// Process could not be started
    Spawn { command: String, message: String },

    /// Waiting on the process failed
    Wait(String),
}

impl RunnerError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::NotAllowed { .. } => EXIT_NOT_ALLOWED,
            Self::Spawn { .. } | Self::Wait(_) => EXIT_SPAWN_FAILED,
        }
    }
}

impl std::fmt::Display for RunnerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotAllowed { command } => write!(f, "command not allowed: {}", command),
            Self::Spawn { command, message } => {
                write!(f, "failed to start {}: {}", command, message)
            }
            Self::Wait(msg) => write!(f, "failed to wait for process: {}", msg),
        }
    }
}

impl std::error::Error for RunnerError {}

// ============================================================================
// Job Runner
// ============================================================================

/// Resolved program invocation
#[derive(Debug, Clone, PartialEq, Eq)]
struct Invocation {
    program: String,
    args: Vec<String>,
    cwd: Option<String>,
    env: BTreeMap<String, String>,
    timeout: Duration,
}

/// Executes job payloads as local processes
#[derive(Debug, Clone)]
pub struct JobRunner {
    config: ExecutionConfig,
}

impl JobRunner {
    pub fn new(config: ExecutionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    /// Check a command against the allow-list by basename
    pub fn is_allowed(&self, command: &str) -> bool {
        let Some(name) = basename(command) else {
            return false;
        };
        self.config
            .allowed_commands
            .iter()
            .filter_map(|allowed| basename(allowed))
            .any(|allowed| allowed == name)
    }

    fn invocation(&self, payload: &JobPayload) -> Result<Invocation, RunnerError> {
        let timeout = payload
            .timeout()
            .filter(|t| !t.is_zero())
            .unwrap_or_else(|| self.config.default_timeout());

        let invocation = match payload {
            JobPayload::Shell(shell) => Invocation {
                program: shell.command.trim().to_string(),
                args: shell.args.clone(),
                cwd: shell.cwd.clone(),
                env: shell.env.clone(),
                timeout,
            },
            JobPayload::AutomatonRun(run) => Invocation {
                program: self.config.automaton_command.trim().to_string(),
                args: run.args.clone(),
                cwd: run.automaton_dir.clone(),
                env: run.env.clone(),
                timeout,
            },
        };

        if !self.is_allowed(&invocation.program) {
            return Err(RunnerError::NotAllowed {
                command: invocation.program,
            });
        }
        Ok(invocation)
    }

    /// Run a payload to completion; never fails, failures become the outcome
    pub async fn run(&self, payload: &JobPayload) -> RunOutcome {
        let kind = payload.kind();
        let started = Instant::now();
        let _timer = metrics::start_execution_timer(kind);

        let outcome = match self.invocation(payload) {
            Ok(invocation) => self.execute(invocation, started).await,
            Err(e) => {
                tracing::warn!(kind, error = %e, "Rejected job command");
                metrics::record_execution(kind, "rejected");
                return RunOutcome::failed(e.exit_code(), e.to_string(), started);
            }
        };

        let label = if outcome.success {
            "success"
        } else if outcome.exit_code == EXIT_TIMED_OUT && outcome.error.as_deref() == Some("timed out")
        {
            "timeout"
        } else {
            "failure"
        };
        metrics::record_execution(kind, label);
        outcome
    }

    async fn execute(&self, invocation: Invocation, started: Instant) -> RunOutcome {
        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .envs(&invocation.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = invocation.cwd.as_deref().filter(|c| !c.trim().is_empty()) {
            command.current_dir(cwd);
        }

        tracing::debug!(
            program = %invocation.program,
            args = ?invocation.args,
            timeout_ms = invocation.timeout.as_millis() as u64,
            "Spawning job process"
        );

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                let err = RunnerError::Spawn {
                    command: invocation.program,
                    message: e.to_string(),
                };
                return RunOutcome::failed(err.exit_code(), err.to_string(), started);
            }
        };

        let max = self.config.max_output_bytes;
        let stdout = child.stdout.take().map(|pipe| spawn_reader(pipe, max));
        let stderr = child.stderr.take().map(|pipe| spawn_reader(pipe, max));

        let waited = tokio::time::timeout(invocation.timeout, child.wait()).await;
        let (exit_code, error) = match waited {
            Ok(Ok(status)) => match status.code() {
                Some(0) => (0, None),
                Some(code) => (code, Some(format!("process exited with code {code}"))),
                None => (-1, Some("process terminated by signal".to_string())),
            },
            Ok(Err(e)) => {
                let err = RunnerError::Wait(e.to_string());
                (err.exit_code(), Some(err.to_string()))
            }
            Err(_) => {
                if let Err(e) = child.kill().await {
                    tracing::warn!(error = %e, "Failed to kill timed out process");
                }
                (EXIT_TIMED_OUT, Some("timed out".to_string()))
            }
        };

        RunOutcome {
            success: error.is_none(),
            exit_code,
            stdout: truncate_output(&collect(stdout).await, max),
            stderr: truncate_output(&collect(stderr).await, max),
            duration_ms: elapsed_ms(started),
            error,
        }
    }
}

fn basename(command: &str) -> Option<&str> {
    Path::new(command.trim()).file_name().and_then(|n| n.to_str())
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Read a pipe to the end, keeping at most `max` bytes
fn spawn_reader<R>(mut pipe: R, max: usize) -> JoinHandle<Vec<u8>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut kept = Vec::new();
        let mut chunk = [0u8; 8192];
        loop {
            match pipe.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let room = max.saturating_sub(kept.len());
                    kept.extend_from_slice(&chunk[..n.min(room)]);
                }
            }
        }
        kept
    })
}

async fn collect(reader: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    let Some(handle) = reader else {
        return Vec::new();
    };
    let abort = handle.abort_handle();
    match tokio::time::timeout(OUTPUT_DRAIN_GRACE, handle).await {
        Ok(Ok(bytes)) => bytes,
        _ => {
            abort.abort();
            Vec::new()
        }
    }
}

/// Decode output and cut it to `max` bytes on a char boundary
pub fn truncate_output(bytes: &[u8], max: usize) -> String {
    let text = String::from_utf8_lossy(bytes);
    if text.len() <= max {
        return text.into_owned();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AutomatonRunPayload, ShellPayload};

    fn shell(command: &str, args: &[&str]) -> JobPayload {
        JobPayload::Shell(ShellPayload {
            command: command.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            ..Default::default()
        })
    }

    #[test]
    fn test_allow_list_uses_basename() {
        let runner = JobRunner::new(ExecutionConfig::default());
        assert!(runner.is_allowed("sh"));
        assert!(runner.is_allowed("/bin/bash"));
        assert!(!runner.is_allowed("python3"));
        assert!(!runner.is_allowed("/usr/bin/rm"));
        assert!(!runner.is_allowed(""));
    }

    #[test]
    fn test_automaton_invocation() {
        let runner = JobRunner::new(ExecutionConfig::default());
        let payload = JobPayload::AutomatonRun(AutomatonRunPayload {
            args: vec!["--once".to_string()],
            automaton_dir: Some("/srv/automaton".to_string()),
            timeout_ms: Some(1_500),
            ..Default::default()
        });

        let invocation = runner.invocation(&payload).unwrap();
        assert_eq!(invocation.program, "automaton");
        assert_eq!(invocation.args, vec!["--once"]);
        assert_eq!(invocation.cwd.as_deref(), Some("/srv/automaton"));
        assert_eq!(invocation.timeout, Duration::from_millis(1_500));
    }

    #[test]
    fn test_default_timeout_applies() {
        let runner = JobRunner::new(ExecutionConfig::default());
        let invocation = runner.invocation(&shell("sh", &[])).unwrap();
        assert_eq!(invocation.timeout, Duration::from_secs(300));
    }

    #[test]
    fn test_truncate_output_char_boundary() {
        assert_eq!(truncate_output(b"hello", 10), "hello");
        assert_eq!(truncate_output(b"hello", 3), "hel");
        // "é" is two bytes; cutting inside it drops the whole char
        assert_eq!(truncate_output("aé".as_bytes(), 2), "a");
    }

    #[tokio::test]
    async fn test_rejected_command_never_spawns() {
        let runner = JobRunner::new(ExecutionConfig::default());
        let outcome = runner.run(&shell("python3", &["-c", "print(1)"])).await;

        assert!(!outcome.success);
        assert_eq!(outcome.exit_code, EXIT_NOT_ALLOWED);
        assert_eq!(outcome.error.as_deref(), Some("command not allowed: python3"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_successful_run_captures_output() {
        let runner = JobRunner::new(ExecutionConfig::default());
        let outcome = runner.run(&shell("sh", &["-c", "echo out; echo err >&2"])).await;

        assert!(outcome.success);
        assert_eq!(outcome.exit_code, 0);
        assert_eq!(outcome.stdout, "out\n");
        assert_eq!(outcome.stderr, "err\n");
        assert!(outcome.error.is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_is_failure() {
        let runner = JobRunner::new(ExecutionConfig::default());
        let outcome = runner.run(&shell("sh", &["-c", "exit 3"])).await;

        assert!(!outcome.success);
        assert_eq!(outcome.exit_code, 3);
        assert!(outcome.error.is_some());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_kills_process() {
        let runner = JobRunner::new(ExecutionConfig::default());
        let payload = JobPayload::Shell(ShellPayload {
            command: "sh".to_string(),
            args: vec!["-c".to_string(), "exec sleep 5".to_string()],
            timeout_ms: Some(100),
            ..Default::default()
        });

        let outcome = runner.run(&payload).await;
        assert!(!outcome.success);
        assert_eq!(outcome.exit_code, EXIT_TIMED_OUT);
        assert_eq!(outcome.error.as_deref(), Some("timed out"));
        assert!(outcome.duration_ms < 5_000);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_output_is_capped() {
        let config = ExecutionConfig {
            max_output_bytes: 4,
            ..Default::default()
        };
        let runner = JobRunner::new(config);
        let outcome = runner.run(&shell("sh", &["-c", "printf 0123456789"])).await;
        assert_eq!(outcome.stdout, "0123");
    }

    #[test]
    fn test_into_report() {
        let report = RunOutcome {
            success: true,
            exit_code: 0,
            stdout: "ok".to_string(),
            stderr: String::new(),
            duration_ms: 12,
            error: None,
        }
        .into_report("host-1");

        assert_eq!(report.host_id, "host-1");
        assert!(report.success);
        assert_eq!(report.duration_ms, 12);
    }
}
