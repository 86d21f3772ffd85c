//! External command execution.
//!
//! Every side effect the operator has on the host outside of file writes
//! (package manager, service manager, gateway CLI, trust store, openssl) goes
//! through [`CommandRunner`]. Commands run synchronously; a non-zero exit is
//! an error and nothing is retried.

use std::process::{Command, Stdio};
use std::sync::{Mutex, PoisonError};

use crate::{Error, Result};

// ═══════════════════════════════════════════════════════════════════════════
// PUBLIC TYPES
// ═══════════════════════════════════════════════════════════════════════════

/// Output of a successful command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Standard output from the command
    pub stdout: String,
    /// Standard error from the command
    pub stderr: String,
}

/// One recorded invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
}

impl Invocation {
    /// Program and arguments as one space-separated line.
    #[must_use]
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Seam for running external programs.
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args` and wait for it to exit.
    ///
    /// # Errors
    ///
    /// Returns error if the program cannot be started or exits non-zero.
    fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput>;
}

// ═══════════════════════════════════════════════════════════════════════════
// SYSTEM RUNNER
// ═══════════════════════════════════════════════════════════════════════════

/// Runs commands on the host via `std::process::Command`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        tracing::info!(program, args = %args.join(" "), "Running command");

        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| Error::command_spawn_failed(program, e.to_string()))?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if output.status.success() {
            Ok(CommandOutput { stdout, stderr })
        } else {
            tracing::warn!(program, stderr = %stderr.trim(), "Command failed");
            Err(Error::command_failed(
                program,
                args,
                output.status.code(),
                stderr.trim(),
            ))
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// RECORDING RUNNER
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default)]
struct Script {
    calls: Vec<Invocation>,
    responses: Vec<(String, String)>,
    failures: Vec<String>,
}

/// In-memory runner for tests: records every invocation instead of running it.
///
/// Responses and failures are matched by prefix against the full command line.
#[derive(Debug, Default)]
pub struct RecordingRunner {
    script: Mutex<Script>,
}

impl RecordingRunner {
    /// Create a runner where every command succeeds with empty output.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reply with `stdout` to commands whose line starts with `prefix`.
    #[must_use]
    pub fn respond(self, prefix: impl Into<String>, stdout: impl Into<String>) -> Self {
        self.lock().responses.push((prefix.into(), stdout.into()));
        self
    }

    /// Fail commands whose line starts with `prefix`.
    #[must_use]
    pub fn fail_on(self, prefix: impl Into<String>) -> Self {
        self.lock().failures.push(prefix.into());
        self
    }

    /// All invocations so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<Invocation> {
        self.lock().calls.clone()
    }

    /// All invocations as command lines.
    #[must_use]
    pub fn command_lines(&self) -> Vec<String> {
        self.lock()
            .calls
            .iter()
            .map(Invocation::command_line)
            .collect()
    }

    /// Forget recorded invocations, keeping the script.
    pub fn clear(&self) {
        self.lock().calls.clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CommandRunner for RecordingRunner {
    fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        let invocation = Invocation {
            program: program.to_string(),
            args: args.to_vec(),
        };
        let line = invocation.command_line();
        let mut script = self.lock();
        script.calls.push(invocation);

        if script.failures.iter().any(|prefix| line.starts_with(prefix)) {
            return Err(Error::command_failed(program, args, Some(1), "scripted failure"));
        }

        let stdout = script
            .responses
            .iter()
            .find(|(prefix, _)| line.starts_with(prefix))
            .map(|(_, stdout)| stdout.clone())
            .unwrap_or_default();

        Ok(CommandOutput {
            stdout,
            stderr: String::new(),
        })
    }
}

/// Build an owned argument list from string slices.
#[must_use]
pub fn args(items: &[&str]) -> Vec<String> {
    items.iter().map(ToString::to_string).collect()
}
