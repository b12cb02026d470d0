//! Abstraction over external command execution for testability.
//!
//! This module provides the [`CommandRunner`] trait, which abstracts every
//! process boundary the compiler crosses: looking up the build engine on the
//! search path, running the build itself, and feeding finalize plugins their
//! configuration on stdin.
//!
//! # Production Usage
//!
//! [`RealCommandRunner`] delegates to [`std::process::Command`] and the
//! [`which`] crate.
//!
//! # Testing Usage
//!
//! `MockCommandRunner` (test builds only) records all calls and returns
//! canned exit codes, enabling fast, deterministic tests without docker or
//! podman installed.

use anyhow::{Context, Result};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
#[cfg(test)]
use std::{collections::VecDeque, os::unix::process::ExitStatusExt, sync::Mutex};

/// A fully materialized external command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Resolved executable path.
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Working directory for the command.
    pub cwd: Option<PathBuf>,
    /// Additional environment variables.
    pub env: Vec<(String, String)>,
}

impl Invocation {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Shell-quoted command line, for logs and `Running:` lines.
    pub fn display(&self) -> String {
        let program = self.program.to_string_lossy();
        let words: Vec<&str> = std::iter::once(program.as_ref())
            .chain(self.args.iter().map(String::as_str))
            .collect();
        shlex::try_join(words.iter().copied()).unwrap_or_else(|_| words.join(" "))
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }
        for (k, v) in &self.env {
            cmd.env(k, v);
        }
        cmd
    }
}

/// Trait for abstracting external command execution.
pub trait CommandRunner: Send + Sync {
    /// Find an executable on the search path.
    fn locate(&self, program: &str) -> std::result::Result<PathBuf, which::Error>;

    /// Run a command with inherited stdio and return its exit status.
    fn run_status(&self, invocation: &Invocation) -> Result<ExitStatus>;

    /// Run a command with `input` piped to its stdin. stdout and stderr are
    /// inherited.
    fn run_with_stdin(&self, invocation: &Invocation, input: &[u8]) -> Result<ExitStatus>;
}

/// Production implementation that delegates to [`std::process::Command`].
pub struct RealCommandRunner;

impl CommandRunner for RealCommandRunner {
    fn locate(&self, program: &str) -> std::result::Result<PathBuf, which::Error> {
        which::which(program)
    }

    fn run_status(&self, invocation: &Invocation) -> Result<ExitStatus> {
        invocation
            .command()
            .status()
            .with_context(|| format!("Failed to run '{}'", invocation.program.display()))
    }

    fn run_with_stdin(&self, invocation: &Invocation, input: &[u8]) -> Result<ExitStatus> {
        let mut child = invocation
            .command()
            .stdin(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to run '{}'", invocation.program.display()))?;

        let written = match child.stdin.take() {
            Some(mut stdin) => stdin.write_all(input),
            None => Ok(()),
        };
        settle(&mut child, written, &invocation.program)
    }
}

/// Wait for a child whose stdin has been written and closed.
///
/// A plugin may exit without reading its input, so a broken pipe is not an
/// error. Any other write failure kills and reaps the child.
fn settle(child: &mut Child, written: io::Result<()>, program: &Path) -> Result<ExitStatus> {
    match written {
        Err(e) if e.kind() != io::ErrorKind::BrokenPipe => {
            let _ = child.kill();
            let _ = child.wait();
            Err(e).with_context(|| format!("Failed to write input to '{}'", program.display()))
        }
        _ => child
            .wait()
            .with_context(|| format!("Failed to wait for '{}'", program.display())),
    }
}

/// A call recorded by [`MockCommandRunner`].
#[cfg(test)]
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub invocation: Invocation,
    pub stdin: Option<Vec<u8>>,
}

/// Test implementation: a fake search path plus canned exit codes.
#[cfg(test)]
#[derive(Default)]
pub struct MockCommandRunner {
    available: Vec<String>,
    exit_codes: Mutex<VecDeque<i32>>,
    fail_spawn: bool,
    calls: Mutex<Vec<RecordedCall>>,
}

#[cfg(test)]
impl MockCommandRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `program` resolvable as `/usr/bin/<program>`.
    pub fn with_program(mut self, program: &str) -> Self {
        self.available.push(program.to_string());
        self
    }

    /// Queue exit codes for successive calls; calls beyond the queue exit 0.
    pub fn with_exit_codes(self, codes: impl IntoIterator<Item = i32>) -> Self {
        self.exit_codes
            .lock()
            .expect("mock lock poisoned")
            .extend(codes);
        self
    }

    /// Make every run fail as if the executable could not be started.
    pub fn failing_spawn(mut self) -> Self {
        self.fail_spawn = true;
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().expect("mock lock poisoned").clone()
    }

    fn record(&self, invocation: &Invocation, stdin: Option<&[u8]>) -> Result<ExitStatus> {
        self.calls
            .lock()
            .expect("mock lock poisoned")
            .push(RecordedCall {
                invocation: invocation.clone(),
                stdin: stdin.map(<[u8]>::to_vec),
            });

        if self.fail_spawn {
            anyhow::bail!("Failed to run '{}'", invocation.program.display());
        }

        let code = self
            .exit_codes
            .lock()
            .expect("mock lock poisoned")
            .pop_front()
            .unwrap_or(0);
        Ok(ExitStatus::from_raw(code << 8))
    }
}

#[cfg(test)]
impl CommandRunner for MockCommandRunner {
    fn locate(&self, program: &str) -> std::result::Result<PathBuf, which::Error> {
        if self.available.iter().any(|p| p == program) {
            Ok(Path::new("/usr/bin").join(program))
        } else {
            Err(which::Error::CannotFindBinaryPath)
        }
    }

    fn run_status(&self, invocation: &Invocation) -> Result<ExitStatus> {
        self.record(invocation, None)
    }

    fn run_with_stdin(&self, invocation: &Invocation, input: &[u8]) -> Result<ExitStatus> {
        self.record(invocation, Some(input))
    }
}
