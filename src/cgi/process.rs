//! CGI child process supervision.
//!
//! # Responsibilities
//! - Build the command line for a script (interpreter, shell, or direct)
//! - Spawn exactly one child per request with an explicit environment
//! - Stop a child gracefully, escalating to a forced kill after a grace delay
//!
//! # Design Decisions
//! - Absolute interpreter paths are executed directly, never through a shell
//! - Relative commands go through the platform shell so the search path applies
//! - `kill_on_drop` ties the child's lifetime to its owner; nothing leaks
//!   when a request context is dropped early

use std::io;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::time::Instant;

use crate::cgi::env::CgiEnv;
use crate::observability::metrics;
use crate::routing::is_absolute_command;

/// Program and arguments used to run one script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CgiCommand {
    pub program: String,
    pub args: Vec<String>,
    pub via_shell: bool,
}

impl CgiCommand {
    /// Command for `script`, run by `interpreter` when one is mapped.
    pub fn for_script(interpreter: Option<&str>, script: &Path) -> Self {
        let script_arg = script.to_string_lossy().into_owned();
        match interpreter {
            None => Self {
                program: script_arg,
                args: Vec::new(),
                via_shell: false,
            },
            Some(command) if is_absolute_command(command) => {
                let mut words = command.split_whitespace().map(str::to_string);
                let program = words.next().unwrap_or_default();
                let mut args: Vec<String> = words.collect();
                args.push(script_arg);
                Self {
                    program,
                    args,
                    via_shell: false,
                }
            }
            Some(command) => shell_command(command, &script_arg),
        }
    }
}

#[cfg(windows)]
fn shell_command(command: &str, script: &str) -> CgiCommand {
    CgiCommand {
        program: "cmd".to_string(),
        args: vec!["/C".to_string(), format!("{} \"{}\"", command, script)],
        via_shell: true,
    }
}

#[cfg(not(windows))]
fn shell_command(command: &str, script: &str) -> CgiCommand {
    CgiCommand {
        program: "sh".to_string(),
        args: vec!["-c".to_string(), format!("{} {}", command, shell_quote(script))],
        via_shell: true,
    }
}

/// Single-quote a word for `sh -c`.
#[cfg(not(windows))]
fn shell_quote(word: &str) -> String {
    format!("'{}'", word.replace('\'', "'\\''"))
}

/// Spawns children and owns the timeout policy applied to them.
#[derive(Debug, Clone, Copy)]
pub struct ProcessSupervisor {
    timeout: Duration,
    force_kill_delay: Duration,
}

impl ProcessSupervisor {
    pub fn new(timeout: Duration, force_kill_delay: Duration) -> Self {
        Self {
            timeout,
            force_kill_delay,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn force_kill_delay(&self) -> Duration {
        self.force_kill_delay
    }

    /// Start the child. The timeout clock starts here.
    pub fn spawn(
        &self,
        command: &CgiCommand,
        env: &CgiEnv,
        working_dir: Option<&Path>,
    ) -> io::Result<SpawnedProcess> {
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .env_clear()
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn()?;
        let started = Instant::now();

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| io::Error::other("CGI child stdin unavailable"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("CGI child stdout unavailable"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| io::Error::other("CGI child stderr unavailable"))?;

        tracing::debug!(
            program = %command.program,
            pid = child.id(),
            via_shell = command.via_shell,
            "CGI process spawned"
        );

        Ok(SpawnedProcess {
            process: CgiProcess {
                child,
                deadline: started + self.timeout,
                force_kill_delay: self.force_kill_delay,
            },
            stdin,
            stdout,
            stderr,
        })
    }
}

/// A freshly spawned child with its pipes split off.
#[derive(Debug)]
pub struct SpawnedProcess {
    pub process: CgiProcess,
    pub stdin: ChildStdin,
    pub stdout: ChildStdout,
    pub stderr: ChildStderr,
}

/// The single owner of a running child and its kill capability.
#[derive(Debug)]
pub struct CgiProcess {
    child: Child,
    deadline: Instant,
    force_kill_delay: Duration,
}

impl CgiProcess {
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Instant at which the request times out.
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn has_exited(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(Some(_)))
    }

    /// Wait for the child to exit on its own.
    pub async fn wait(&mut self) -> io::Result<ExitStatus> {
        self.child.wait().await
    }

    /// Ask the child to exit, then force-kill it if it is still running
    /// after the grace delay. An earlier voluntary exit cancels the kill.
    pub async fn stop(&mut self) -> Option<ExitStatus> {
        if let Ok(Some(status)) = self.child.try_wait() {
            return Some(status);
        }

        self.request_exit();
        match tokio::time::timeout(self.force_kill_delay, self.child.wait()).await {
            Ok(Ok(status)) => Some(status),
            _ => {
                tracing::warn!(
                    pid = self.child.id(),
                    grace_ms = self.force_kill_delay.as_millis() as u64,
                    "CGI process ignored stop request, killing"
                );
                metrics::record_forced_kill();
                self.kill().await
            }
        }
    }

    /// Unconditional termination.
    pub async fn kill(&mut self) -> Option<ExitStatus> {
        let _ = self.child.start_kill();
        self.child.wait().await.ok()
    }

    #[cfg(unix)]
    fn request_exit(&mut self) {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = self.child.id() {
            let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
        }
    }

    #[cfg(not(unix))]
    fn request_exit(&mut self) {
        let _ = self.child.start_kill();
    }
}
