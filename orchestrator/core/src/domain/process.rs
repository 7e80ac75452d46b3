// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Local process seam: run-to-completion commands and supervised background children.

use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// A command line: program plus argv, never passed through a shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Inherit stdio instead of capturing/silencing it.
    pub verbose: bool,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            verbose: false,
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

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Best human-readable failure description.
    pub fn failure_reason(&self) -> String {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.to_string();
        }
        match self.exit_code {
            Some(code) => format!("exited with status {}", code),
            None => "terminated by signal".to_string(),
        }
    }
}

/// A background child we supervise but never talk to.
pub trait ChildProcess: Send {
    fn id(&self) -> Option<u32>;
    /// `Some(code)` once the child has exited.
    fn try_exit_code(&mut self) -> Option<Option<i32>>;
    /// Request forceful termination. Must be safe to call repeatedly.
    fn kill(&mut self);
    /// Stop supervising; the child keeps running after we exit.
    fn release(self: Box<Self>) -> Option<u32>;
}

#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run to completion and capture output.
    async fn run(&self, command: &CommandSpec) -> Result<CommandOutput, ProcessError>;
    /// Start in the background, in its own process group.
    fn spawn(&self, command: &CommandSpec) -> Result<Box<dyn ChildProcess>, ProcessError>;
    /// Resolve a program on `PATH`.
    fn locate(&self, program: &str) -> Option<PathBuf>;
}
